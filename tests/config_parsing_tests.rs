use server_proxy::config::AppConfig;

fn root_dir() -> String {
    std::env::temp_dir().to_str().unwrap().to_string()
}

#[test]
fn parses_minimal_server_block() {
    let text = format!(
        r#"
server {{
    listen 8080;
    server_name example.com;
    root {root};
}}
"#,
        root = root_dir()
    );
    let config = AppConfig::from_str(&text).expect("should parse");
    assert_eq!(config.servers.len(), 1);
    let server = &config.servers[0];
    assert_eq!(server.port, 8080);
    assert_eq!(server.server_names, vec!["example.com".to_string()]);
    assert_eq!(server.root, root_dir());
}

#[test]
fn parses_host_and_port_listen_form() {
    let text = format!(
        r#"
server {{
    listen 127.0.0.1:9090;
    root {root};
}}
"#,
        root = root_dir()
    );
    let config = AppConfig::from_str(&text).unwrap();
    assert_eq!(config.servers[0].host, "127.0.0.1");
    assert_eq!(config.servers[0].port, 9090);
}

#[test]
fn parses_locations_with_directives() {
    let text = format!(
        r#"
server {{
    listen 8080;
    root {root};
    location / {{
        allowed_methods GET HEAD;
        index index.html;
    }}
    location /uploads {{
        allowed_methods POST PUT DELETE;
        upload_store uploads;
        client_max_body_size 4096;
    }}
    location /cgi-bin {{
        cgi_assign py /usr/bin/python3;
    }}
}}
"#,
        root = root_dir()
    );
    let config = AppConfig::from_str(&text).unwrap();
    let server = &config.servers[0];
    // ensure_default_location shouldn't add a duplicate "/" since one already exists
    assert_eq!(server.locations.iter().filter(|l| l.path_prefix == "/").count(), 1);

    let uploads = server.locations.iter().find(|l| l.path_prefix == "/uploads").unwrap();
    assert_eq!(uploads.upload_store.as_deref(), Some("uploads"));
    assert_eq!(uploads.client_max_body_size, Some(4096));

    let cgi = server.locations.iter().find(|l| l.path_prefix == "/cgi-bin").unwrap();
    assert_eq!(cgi.cgi_handlers.get("py").map(|s| s.as_str()), Some("/usr/bin/python3"));
}

#[test]
fn parses_redirect_and_error_page_directives() {
    let err_page = std::env::temp_dir().join("config_test_404.html");
    std::fs::write(&err_page, "not found").unwrap();

    let text = format!(
        r#"
server {{
    listen 8080;
    root {root};
    error_page 404 {err_page};
    location /old {{
        return 301 /new;
    }}
}}
"#,
        root = root_dir(),
        err_page = err_page.to_str().unwrap()
    );
    let config = AppConfig::from_str(&text).unwrap();
    let server = &config.servers[0];
    assert_eq!(server.error_pages.get(&404), Some(&err_page.to_str().unwrap().to_string()));
    let old = server.locations.iter().find(|l| l.path_prefix == "/old").unwrap();
    assert_eq!(old.redirect, Some((301, "/new".to_string())));

    let _ = std::fs::remove_file(&err_page);
}

#[test]
fn rejects_unknown_directive() {
    let text = r#"
server {
    listen 8080;
    frobnicate yes;
}
"#;
    assert!(AppConfig::from_str(text).is_err());
}

#[test]
fn rejects_unterminated_block() {
    let text = r#"
server {
    listen 8080;
"#;
    assert!(AppConfig::from_str(text).is_err());
}

#[test]
fn default_server_flag_is_parsed() {
    let text = format!(
        r#"
server {{
    listen 8080;
    root {root};
    default_server;
}}
"#,
        root = root_dir()
    );
    let config = AppConfig::from_str(&text).unwrap();
    assert!(config.servers[0].default_server);
}
