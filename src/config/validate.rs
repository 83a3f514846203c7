use std::collections::{HashMap, HashSet};

use crate::config::types::ServerConfig;

pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    // Key: (host, port, server_names) -> indices using this combination.
    let mut usage_map: HashMap<(String, u16, Vec<String>), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        let mut names = config.server_names.clone();
        names.sort();
        let key = (config.host.clone(), config.port, names);
        usage_map.entry(key).or_default().push(idx);
    }

    for ((host, port, names), indices) in usage_map {
        if indices.len() > 1 {
            proxy_log::warn!(
                "conflict: multiple servers defined for {}:{} with names {:?}, dropping",
                host,
                port,
                names
            );
            conflict_indices.extend(indices);
        }
    }

    // Wildcard vs specific-IP bind conflicts on the same port.
    let mut port_hosts: HashMap<u16, HashSet<String>> = HashMap::new();
    for config in &configs {
        port_hosts.entry(config.port).or_default().insert(config.host.clone());
    }
    for (port, hosts) in port_hosts {
        if hosts.contains("0.0.0.0") && hosts.len() > 1 {
            proxy_log::warn!(
                "bind conflict: port {} mixes wildcard 0.0.0.0 with specific hosts {:?}",
                port,
                hosts
            );
            for (idx, config) in configs.iter().enumerate() {
                if config.port == port {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    // Error page codes and file existence, location root directories.
    for (idx, config) in configs.iter().enumerate() {
        let mut valid = true;

        for (code, path) in &config.error_pages {
            if *code < 100 || *code > 599 {
                proxy_log::warn!("server {:?} has invalid error_page code {}", config.server_names, code);
                valid = false;
            }
            if std::fs::File::open(path).is_err() {
                proxy_log::warn!(
                    "server {:?} error_page {} for code {} does not exist",
                    config.server_names,
                    path,
                    code
                );
                valid = false;
            }
        }

        for loc in &config.locations {
            let root = config.effective_root(loc);
            if std::fs::read_dir(root).is_err() {
                proxy_log::warn!(
                    "server {:?} location '{}' root '{}' is not a readable directory",
                    config.server_names,
                    loc.path_prefix,
                    root
                );
                valid = false;
            }
        }

        if !valid {
            conflict_indices.insert(idx);
        }
    }

    let dropped = conflict_indices.len();
    let valid_configs: Vec<ServerConfig> = configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect();

    if dropped > 0 {
        proxy_log::warn!("{} server configuration(s) dropped due to conflicts", dropped);
    }

    valid_configs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(host: &str, port: u16, names: &[&str]) -> ServerConfig {
        ServerConfig {
            host: host.to_string(),
            port,
            server_names: names.iter().map(|s| s.to_string()).collect(),
            root: std::env::temp_dir().to_str().unwrap().to_string(),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn no_conflicts() {
        let configs = vec![
            make_config("127.0.0.1", 8001, &["s1"]),
            make_config("127.0.0.1", 8002, &["s2"]),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn virtual_hosts_ok() {
        let configs = vec![
            make_config("127.0.0.1", 8080, &["example.com"]),
            make_config("127.0.0.1", 8080, &["api.example.com"]),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn duplicate_name_conflict_drops_both() {
        let configs = vec![
            make_config("127.0.0.1", 8080, &["same.com"]),
            make_config("127.0.0.1", 8080, &["same.com"]),
            make_config("127.0.0.1", 8081, &["other.com"]),
        ];
        let valid = validate_configs(configs);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].server_names, vec!["other.com".to_string()]);
    }

    #[test]
    fn wildcard_conflict() {
        let configs = vec![
            make_config("0.0.0.0", 8080, &["s1"]),
            make_config("127.0.0.1", 8080, &["s2"]),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_no_conflict_with_distinct_names() {
        let configs = vec![
            make_config("0.0.0.0", 8080, &["s1"]),
            make_config("0.0.0.0", 8080, &["s2"]),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn invalid_status_code_drops_config() {
        let mut config = make_config("127.0.0.1", 8080, &["s1"]);
        config.error_pages.insert(99, "exists".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_error_page_file_drops_config() {
        let mut config = make_config("127.0.0.1", 8080, &["s1"]);
        config.error_pages.insert(404, "/non/existent/path/err.html".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn missing_root_drops_config() {
        use crate::config::types::LocationConfig;
        let mut config = make_config("127.0.0.1", 8080, &["s1"]);
        config.locations.push(LocationConfig {
            root: Some("/non/existent/dir".to_string()),
            ..LocationConfig::default()
        });
        assert_eq!(validate_configs(vec![config]).len(), 0);
    }

    #[test]
    fn valid_roots_and_error_pages_keep_config() {
        use crate::config::types::LocationConfig;
        let temp_dir = std::env::temp_dir();
        let file_path = temp_dir.join("test_err.html");
        std::fs::write(&file_path, "error").unwrap();

        let mut config = make_config("127.0.0.1", 8080, &["s1"]);
        config
            .error_pages
            .insert(404, file_path.to_str().unwrap().to_string());
        config.locations.push(LocationConfig {
            root: Some(temp_dir.to_str().unwrap().to_string()),
            ..LocationConfig::default()
        });

        assert_eq!(validate_configs(vec![config]).len(), 1);
        let _ = std::fs::remove_file(file_path);
    }
}
