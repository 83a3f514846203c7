use mio::Poll;
use server_proxy::config::AppConfig;
use server_proxy::server::Server;
use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

fn spawn_server(config_text: String) {
    thread::spawn(move || {
        let config = AppConfig::from_str(&config_text).expect("test config should parse");
        let poll = Poll::new().unwrap();
        let mut server = Server::new(config, &poll).unwrap();
        server.run(poll).unwrap();
    });
    thread::sleep(Duration::from_millis(300));
}

#[test]
fn chunked_upload_is_assembled_on_disk() {
    let test_root = std::env::temp_dir().join("server_proxy_test_chunked");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();

    let config_text = format!(
        r#"
server {{
    listen 127.0.0.1:18080;
    root {root};
    client_max_body_size 1048576;
    location / {{
        allowed_methods GET PUT;
    }}
}}
"#,
        root = test_root.to_str().unwrap()
    );
    spawn_server(config_text);

    let mut stream = TcpStream::connect("127.0.0.1:18080").expect("failed to connect to test server");
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let headers = "PUT /test.txt HTTP/1.1\r\n\
                   Host: 127.0.0.1:18080\r\n\
                   Transfer-Encoding: chunked\r\n\
                   Content-Type: text/plain\r\n\r\n";
    stream.write_all(headers.as_bytes()).unwrap();

    stream.write_all(b"5\r\nHello\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"7\r\n World!\r\n").unwrap();
    thread::sleep(Duration::from_millis(100));
    stream.write_all(b"0\r\n\r\n").unwrap();
    stream.flush().unwrap();

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer).expect("failed to read response");
    let response = String::from_utf8_lossy(&buffer[..n]);
    assert!(response.contains("201 Created") || response.contains("200 OK"));

    let content = fs::read_to_string(test_root.join("test.txt")).expect("uploaded file should exist");
    assert_eq!(content, "Hello World!", "chunked body was not correctly assembled on disk");

    let _ = fs::remove_dir_all(&test_root);
}

#[test]
fn pipelined_requests_each_get_a_response() {
    let test_root = std::env::temp_dir().join("server_proxy_test_pipeline");
    let _ = fs::remove_dir_all(&test_root);
    fs::create_dir_all(&test_root).unwrap();
    fs::write(test_root.join("index.html"), "Hello").unwrap();

    let config_text = format!(
        r#"
server {{
    listen 127.0.0.1:18081;
    server_name localhost;
    root {root};
    location / {{
        allowed_methods GET HEAD;
        index index.html;
    }}
}}
"#,
        root = test_root.to_str().unwrap()
    );
    spawn_server(config_text);

    let mut stream = TcpStream::connect("127.0.0.1:18081").unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let pipeline_data = "GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n\
                         GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
    stream.write_all(pipeline_data.as_bytes()).unwrap();

    let mut buffer = [0u8; 4096];
    let n1 = stream.read(&mut buffer).unwrap();
    let res1 = String::from_utf8_lossy(&buffer[..n1]).into_owned();
    assert!(res1.contains("200 OK"), "first response was not 200 OK: {res1}");

    if res1.matches("HTTP/1.1").count() < 2 {
        let n2 = stream.read(&mut buffer).unwrap();
        let res2 = String::from_utf8_lossy(&buffer[..n2]);
        assert!(res2.contains("200 OK"), "second response was not 200 OK: {res2}");
    }

    let _ = fs::remove_dir_all(&test_root);
}
