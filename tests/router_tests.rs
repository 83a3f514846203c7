use server_proxy::config::{LocationConfig, ServerConfig};
use server_proxy::http::Method;
use server_proxy::router::RoutingError;

fn server_with_locations(locations: Vec<LocationConfig>) -> ServerConfig {
    ServerConfig {
        locations,
        ..ServerConfig::default()
    }
}

fn loc(path: &str, methods: Vec<Method>) -> LocationConfig {
    LocationConfig {
        path_prefix: path.to_string(),
        allowed_methods: methods,
        ..LocationConfig::default()
    }
}

#[test]
fn find_route_resolves_longest_matching_prefix() {
    let server = server_with_locations(vec![
        loc("/", vec![Method::GET, Method::HEAD]),
        loc("/api", vec![Method::GET, Method::POST]),
    ]);

    let found = server.find_route("/api/widgets", &Method::GET).unwrap();
    assert_eq!(found.path_prefix, "/api");
}

#[test]
fn find_route_reports_not_found_outside_any_prefix() {
    let server = server_with_locations(vec![loc("/static", vec![Method::GET])]);
    match server.find_route("/other/path", &Method::GET) {
        Err(RoutingError::NotFound) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }
}

#[test]
fn find_route_reports_method_not_allowed_when_prefix_matches() {
    let server = server_with_locations(vec![loc("/uploads", vec![Method::GET])]);
    match server.find_route("/uploads/file.txt", &Method::POST) {
        Err(RoutingError::MethodNotAllowed) => {}
        other => panic!("expected MethodNotAllowed, got {:?}", other),
    }
}

#[test]
fn find_route_falls_back_to_root_location() {
    let server = server_with_locations(vec![
        loc("/", vec![Method::GET, Method::HEAD, Method::POST]),
        loc("/cgi-bin", vec![Method::GET]),
    ]);
    let found = server.find_route("/index.html", &Method::GET).unwrap();
    assert_eq!(found.path_prefix, "/");
}

#[test]
fn matches_host_is_case_sensitive_and_port_agnostic() {
    let server = ServerConfig {
        server_names: vec!["example.com".to_string()],
        ..ServerConfig::default()
    };
    assert!(server.matches_host("example.com:8080"));
    assert!(!server.matches_host("other.com"));
}
