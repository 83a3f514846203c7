pub mod display;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod validate;

pub use lexer::ConfigError;
pub use types::{LocationConfig, ServerConfig};

use crate::error::Result;

/// Holds the whole set of server blocks loaded from one configuration file.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    pub fn from_str(content: &str) -> Result<Self> {
        let servers = parser::parse(content)?;
        let servers = validate::validate_configs(servers);
        if servers.is_empty() {
            return Err("no valid server blocks remained after validation".into());
        }
        Ok(AppConfig { servers })
    }

    pub fn display_config(&self) {
        display::display_config(&self.servers);
    }
}
