use server_proxy::http::{HttpRequest, HttpResponse, Method, ParseError};
use server_proxy::http::request::{find_subsequence, parse_part_headers};

#[test]
fn method_parses_known_verbs_case_insensitively() {
    assert_eq!("get".parse::<Method>().unwrap(), Method::GET);
    assert_eq!("POST".parse::<Method>().unwrap(), Method::POST);
    assert_eq!("Delete".parse::<Method>().unwrap(), Method::DELETE);
}

#[test]
fn method_rejects_unsupported_verb() {
    assert_eq!("PATCH".parse::<Method>().unwrap_err(), ParseError::InvalidMethod);
}

#[test]
fn path_strips_query_and_fragment() {
    let mut req = HttpRequest::new();
    req.url = "/search?q=rust&page=2#results".to_string();
    assert_eq!(req.path(), "/search");
    assert_eq!(req.query_string(), "q=rust&page=2");
}

#[test]
fn path_with_no_query_string_is_unchanged() {
    let mut req = HttpRequest::new();
    req.url = "/index.html".to_string();
    assert_eq!(req.path(), "/index.html");
    assert_eq!(req.query_string(), "");
}

#[test]
fn find_subsequence_locates_needle_after_offset() {
    let haystack = b"--boundary\r\nContent\r\n--boundary--";
    let needle = b"--boundary";
    assert_eq!(find_subsequence(haystack, needle, 0), Some(0));
    assert_eq!(find_subsequence(haystack, needle, 1), Some(23));
    assert_eq!(find_subsequence(haystack, b"missing", 0), None);
}

#[test]
fn parse_part_headers_extracts_name_filename_and_content_type() {
    let headers = "Content-Disposition: form-data; name=\"avatar\"; filename=\"cat.png\"\r\nContent-Type: image/png\r\n";
    let info = parse_part_headers(headers);
    assert_eq!(info.name, "avatar");
    assert_eq!(info.filename.as_deref(), Some("cat.png"));
    assert_eq!(info.content_type, "image/png");
}

#[test]
fn parse_part_headers_without_filename_is_a_plain_field() {
    let headers = "Content-Disposition: form-data; name=\"username\"\r\n";
    let info = parse_part_headers(headers);
    assert_eq!(info.name, "username");
    assert_eq!(info.filename, None);
}

#[test]
fn response_serializes_status_line_headers_and_body() {
    let mut res = HttpResponse::new(200, "OK");
    res.set_header("content-type", "text/plain");
    res.set_body(b"Hello Rust".to_vec(), "text/plain");

    let bytes = res.to_bytes();
    let s = String::from_utf8_lossy(&bytes);

    assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(s.contains("Content-Length: 10\r\n"));
    assert!(s.ends_with("\r\n\r\nHello Rust"));
}

#[test]
fn response_status_text_matches_set_status_code() {
    let mut res = HttpResponse::new(200, "OK");
    res.set_status_code(404);
    assert_eq!(res.status_code, 404);
    assert_eq!(res.status_text, "Not Found");
}
