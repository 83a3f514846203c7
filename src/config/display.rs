use std::fmt;

use crate::config::types::{LocationConfig, ServerConfig};

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNetwork:\x1b[0m     \x1b[32m{}:{}\x1b[0m",
            self.host, self.port
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mNames:\x1b[0m       \x1b[36m{:?}\x1b[0m",
            self.server_names
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mDefault:\x1b[0m     \x1b[{}m{}\x1b[0m",
            if self.default_server { "32" } else { "31" },
            if self.default_server { "YES" } else { "NO" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mBody Limit:\x1b[0m  \x1b[33m{} KB\x1b[0m",
            self.client_max_body_size / 1024
        )?;

        if !self.error_pages.is_empty() {
            writeln!(f, "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mError Pages:\x1b[0m")?;
            for (code, path) in &self.error_pages {
                writeln!(f, "    \x1b[38;5;244m{:4}\x1b[0m → \x1b[31m{}\x1b[0m", code, path)?;
            }
        }

        writeln!(f, "\n  \x1b[1;37m📋 LOCATIONS ({}) \x1b[0m", self.locations.len())?;
        writeln!(f, "  \x1b[38;5;244m───────────────────────────────────────────────\x1b[0m")?;

        let mut sorted = self.locations.clone();
        sorted.sort_by(|a, b| a.path_prefix.cmp(&b.path_prefix));

        for (idx, loc) in sorted.iter().enumerate() {
            let is_last = idx == sorted.len() - 1;
            let branch = if is_last { "  └──" } else { "  ├──" };
            writeln!(f, "  \x1b[38;5;244m{}\x1b[0m \x1b[1;37m{}\x1b[0m", branch, loc.path_prefix)?;
            loc.fmt_details(f, is_last)?;
            if !is_last {
                writeln!(f, "  \x1b[38;5;244m    │\x1b[0m")?;
            }
        }
        Ok(())
    }
}

impl LocationConfig {
    pub(crate) fn fmt_details(&self, f: &mut fmt::Formatter<'_>, is_last: bool) -> fmt::Result {
        let indent = if is_last { "     " } else { "  │  " };
        let methods_fmt = self
            .allowed_methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(" | ");

        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Methods:\x1b[0m {}",
            if is_last { "   " } else { "    " },
            methods_fmt
        )?;
        writeln!(
            f,
            "  \x1b[38;5;250m{}├─ Autoindex:\x1b[0m \x1b[{}m{}\x1b[0m",
            indent,
            if self.autoindex { "32" } else { "31" },
            if self.autoindex { "ON" } else { "OFF" }
        )?;

        if let Some((code, url)) = &self.redirect {
            writeln!(f, "  \x1b[38;5;250m{}├─ Redirect:\x1b[0m \x1b[35m{} -> {}\x1b[0m", indent, code, url)?;
        }
        if self.cgi_handlers.is_empty() {
            writeln!(f, "  \x1b[38;5;250m{}└─ CGI:\x1b[0m \x1b[31mDISABLED\x1b[0m", indent)?;
        } else {
            writeln!(f, "  \x1b[38;5;250m{}└─ CGI:\x1b[0m \x1b[38;5;208m{:?}\x1b[0m", indent, self.cgi_handlers)?;
        }
        Ok(())
    }
}

pub fn display_config(configs: &[ServerConfig]) {
    println!("\n\x1b[1;35m 🌐 SERVER CONFIGURATION DASHBOARD\x1b[0m");
    println!("\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    for (i, server) in configs.iter().enumerate() {
        println!("\n  \x1b[1;37mSERVER BLOCK {:02}\x1b[0m", i + 1);
        print!("{}", server);
    }
    println!("\n\x1b[38;5;240m ════════════════════════════════════════════════════════════════\x1b[0m");
    println!(" \x1b[1;32m✔\x1b[0m Configuration loaded successfully - Ready for requests!\n");
}
