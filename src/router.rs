use crate::config::{LocationConfig, ServerConfig};
use crate::http::Method;

#[derive(Debug)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed,
}

/// Longest-prefix match over `locations`, requiring the match to land on a
/// path boundary (full segment, not a partial one).
pub fn resolve_location<'a>(locations: &'a [LocationConfig], url_path: &str) -> Option<&'a LocationConfig> {
    let mut best: Option<&LocationConfig> = None;
    for loc in locations {
        let p = loc.path_prefix.as_str();
        if !url_path.starts_with(p) {
            continue;
        }
        let boundary_ok = p == "/" || url_path.len() == p.len() || url_path.as_bytes()[p.len()] == b'/';
        if !boundary_ok {
            continue;
        }
        if best.map_or(true, |b| p.len() > b.path_prefix.len()) {
            best = Some(loc);
        }
    }
    best
}

/// Strips query string and fragment, returning the path component used for
/// filesystem resolution and routing.
pub fn path_component(raw_target: &str) -> &str {
    let without_fragment = raw_target.split('#').next().unwrap_or(raw_target);
    without_fragment.split('?').next().unwrap_or(without_fragment)
}

pub fn is_unsafe_path(path: &str) -> bool {
    path.contains("..") || path.contains("//") || path.contains('\\') || path.contains('\0')
}

impl ServerConfig {
    pub fn find_route(&self, url: &str, method: &Method) -> Result<&LocationConfig, RoutingError> {
        let path = path_component(url);
        let loc = resolve_location(&self.locations, path).ok_or(RoutingError::NotFound)?;
        if !method.is_allowed(&loc.allowed_methods) {
            return Err(RoutingError::MethodNotAllowed);
        }
        Ok(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str) -> LocationConfig {
        LocationConfig {
            path_prefix: path.to_string(),
            ..LocationConfig::default()
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let locations = vec![loc("/"), loc("/api"), loc("/api/v1")];
        let found = resolve_location(&locations, "/api/v1/users").unwrap();
        assert_eq!(found.path_prefix, "/api/v1");
    }

    #[test]
    fn boundary_check_rejects_partial_segment() {
        let locations = vec![loc("/"), loc("/api")];
        let found = resolve_location(&locations, "/apiextra").unwrap();
        assert_eq!(found.path_prefix, "/");
    }

    #[test]
    fn root_location_is_fallback() {
        let locations = vec![loc("/")];
        let found = resolve_location(&locations, "/anything/here").unwrap();
        assert_eq!(found.path_prefix, "/");
    }

    #[test]
    fn detects_unsafe_paths() {
        assert!(is_unsafe_path("/../etc/passwd"));
        assert!(is_unsafe_path("/a//b"));
        assert!(!is_unsafe_path("/a/b/c.html"));
    }

    #[test]
    fn path_component_strips_query() {
        assert_eq!(path_component("/s.py?q=1"), "/s.py");
        assert_eq!(path_component("/x#frag"), "/x");
    }
}
