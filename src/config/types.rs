use std::collections::HashMap;

use crate::http::Method;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB
pub const DEFAULT_ROOT: &str = "./www";

#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path_prefix: String,
    pub root: Option<String>,
    pub index_files: Vec<String>,
    pub allowed_methods: Vec<Method>,
    pub autoindex: bool,
    pub client_max_body_size: Option<usize>,
    pub cgi_handlers: HashMap<String, String>,
    pub upload_store: Option<String>,
    pub redirect: Option<(u16, String)>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            path_prefix: "/".to_string(),
            root: None,
            index_files: Vec::new(),
            allowed_methods: vec![Method::GET, Method::HEAD],
            autoindex: false,
            client_max_body_size: None,
            cgi_handlers: HashMap::new(),
            upload_store: None,
            redirect: None,
        }
    }
}

impl LocationConfig {
    /// Extension of the CGI script this location would dispatch `url_path` to, if any.
    pub fn cgi_interpreter_for(&self, url_path: &str) -> Option<&str> {
        let ext = url_path.rsplit('.').next()?;
        self.cgi_handlers.get(ext).map(|s| s.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub server_names: Vec<String>,
    pub default_server: bool,
    pub root: String,
    pub index_files: Vec<String>,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            server_names: Vec::new(),
            default_server: false,
            root: DEFAULT_ROOT.to_string(),
            index_files: vec!["index.html".to_string()],
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Ensures a "/" location always exists so routing never has to fall back
    /// to a hardcoded default outside of config.
    pub fn ensure_default_location(&mut self) {
        if !self.locations.iter().any(|l| l.path_prefix == "/") {
            self.locations.push(LocationConfig::default());
        }
    }

    pub fn effective_root<'a>(&'a self, loc: &'a LocationConfig) -> &'a str {
        loc.root.as_deref().unwrap_or(&self.root)
    }

    pub fn effective_index<'a>(&'a self, loc: &'a LocationConfig) -> &'a [String] {
        if loc.index_files.is_empty() {
            &self.index_files
        } else {
            &loc.index_files
        }
    }

    pub fn effective_max_body_size(&self, loc: &LocationConfig) -> usize {
        loc.client_max_body_size.unwrap_or(self.client_max_body_size)
    }

    pub fn matches_host(&self, host_header: &str) -> bool {
        let hostname = host_header.split(':').next().unwrap_or("");
        self.server_names.iter().any(|n| n == hostname)
    }
}
