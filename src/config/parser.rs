use std::str::FromStr;

use crate::config::lexer::{ConfigError, ConfigToken, TokenKind};
use crate::config::types::{LocationConfig, ServerConfig};
use crate::http::Method;

pub struct Parser {
    tokens: Vec<ConfigToken>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<ConfigToken>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&ConfigToken> {
        self.tokens.get(self.pos)
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        let (line, col) = self
            .peek()
            .map(|t| (t.line, t.col))
            .unwrap_or_else(|| self.tokens.last().map(|t| (t.line, t.col + 1)).unwrap_or((1, 1)));
        ConfigError {
            message: message.into(),
            line,
            col,
        }
    }

    fn next_word(&mut self) -> Result<String, ConfigError> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Word(w)) => {
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.error("expected a directive word")),
        }
    }

    /// Collects consecutive Word tokens up to (not including) the terminating `;`.
    fn collect_words(&mut self) -> Result<Vec<String>, ConfigError> {
        let mut out = Vec::new();
        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Word(w)) => {
                    out.push(w);
                    self.pos += 1;
                }
                Some(TokenKind::Semicolon) => break,
                _ => return Err(self.error("expected a value or ';'")),
            }
        }
        Ok(out)
    }

    fn expect_semicolon(&mut self) -> Result<(), ConfigError> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Semicolon) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error("expected ';'")),
        }
    }

    fn expect_open_brace(&mut self) -> Result<(), ConfigError> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::OpenBrace) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error("expected '{'")),
        }
    }

    fn at_close_brace(&self) -> bool {
        matches!(self.peek().map(|t| &t.kind), Some(TokenKind::CloseBrace))
    }

    pub fn parse_servers(mut self) -> Result<Vec<ServerConfig>, ConfigError> {
        let mut servers = Vec::new();
        while self.peek().is_some() {
            let word = self.next_word()?;
            if word != "server" {
                return Err(self.error(format!("unexpected top-level directive '{}'", word)));
            }
            servers.push(self.parse_server_block()?);
        }
        if servers.is_empty() {
            return Err(self.error("configuration defines no server blocks"));
        }
        Ok(servers)
    }

    fn parse_server_block(&mut self) -> Result<ServerConfig, ConfigError> {
        self.expect_open_brace()?;
        let mut server = ServerConfig {
            index_files: Vec::new(),
            ..ServerConfig::default()
        };
        server.client_max_body_size = crate::config::types::DEFAULT_MAX_BODY_SIZE;

        while !self.at_close_brace() {
            if self.peek().is_none() {
                return Err(self.error("unterminated server block"));
            }
            let directive = self.next_word()?;
            match directive.as_str() {
                "listen" => {
                    let value = self.next_word()?;
                    self.expect_semicolon()?;
                    parse_listen(&value, &mut server).map_err(|m| self.error(m))?;
                }
                "host" => {
                    server.host = self.next_word()?;
                    self.expect_semicolon()?;
                }
                "server_name" => {
                    server.server_names = self.collect_words()?;
                    self.expect_semicolon()?;
                }
                "root" => {
                    server.root = self.next_word()?;
                    self.expect_semicolon()?;
                }
                "index" => {
                    server.index_files = self.collect_words()?;
                    self.expect_semicolon()?;
                }
                "client_max_body_size" => {
                    let value = self.next_word()?;
                    self.expect_semicolon()?;
                    server.client_max_body_size =
                        value.parse().map_err(|_| self.error("invalid client_max_body_size"))?;
                }
                "error_page" => {
                    let code_str = self.next_word()?;
                    let path = self.next_word()?;
                    self.expect_semicolon()?;
                    let code: u16 = code_str.parse().map_err(|_| self.error("invalid status code"))?;
                    server.error_pages.insert(code, path);
                }
                "default_server" => {
                    self.expect_semicolon()?;
                    server.default_server = true;
                }
                "location" => {
                    let path = self.next_word()?;
                    server.locations.push(self.parse_location_block(path)?);
                }
                other => return Err(self.error(format!("unknown server directive '{}'", other))),
            }
        }
        self.pos += 1; // consume CloseBrace
        server.ensure_default_location();
        Ok(server)
    }

    fn parse_location_block(&mut self, path_prefix: String) -> Result<LocationConfig, ConfigError> {
        self.expect_open_brace()?;
        let mut loc = LocationConfig {
            path_prefix,
            allowed_methods: Vec::new(),
            ..LocationConfig::default()
        };

        while !self.at_close_brace() {
            if self.peek().is_none() {
                return Err(self.error("unterminated location block"));
            }
            let directive = self.next_word()?;
            match directive.as_str() {
                "allowed_methods" => {
                    let words = self.collect_words()?;
                    self.expect_semicolon()?;
                    loc.allowed_methods = words
                        .iter()
                        .map(|w| Method::from_str(w).map_err(|_| self.error(format!("unknown method '{}'", w))))
                        .collect::<Result<_, _>>()?;
                }
                "root" => {
                    loc.root = Some(self.next_word()?);
                    self.expect_semicolon()?;
                }
                "index" => {
                    loc.index_files = self.collect_words()?;
                    self.expect_semicolon()?;
                }
                "autoindex" => {
                    let value = self.next_word()?;
                    self.expect_semicolon()?;
                    loc.autoindex = value == "on";
                }
                "client_max_body_size" => {
                    let value = self.next_word()?;
                    self.expect_semicolon()?;
                    loc.client_max_body_size =
                        Some(value.parse().map_err(|_| self.error("invalid client_max_body_size"))?);
                }
                "upload_store" => {
                    loc.upload_store = Some(self.next_word()?);
                    self.expect_semicolon()?;
                }
                "cgi_assign" => {
                    let ext = self.next_word()?;
                    let interpreter = self.next_word()?;
                    self.expect_semicolon()?;
                    loc.cgi_handlers.insert(ext, interpreter);
                }
                "return" => {
                    let code_str = self.next_word()?;
                    let url = self.next_word()?;
                    self.expect_semicolon()?;
                    let code: u16 = code_str.parse().map_err(|_| self.error("invalid redirect code"))?;
                    loc.redirect = Some((code, url));
                }
                other => return Err(self.error(format!("unknown location directive '{}'", other))),
            }
        }
        self.pos += 1; // consume CloseBrace

        if loc.allowed_methods.is_empty() {
            loc.allowed_methods = vec![Method::GET, Method::HEAD];
        }
        Ok(loc)
    }
}

/// `listen` accepts `<port>`, `<host>` or `<host>:<port>`.
fn parse_listen(value: &str, server: &mut ServerConfig) -> Result<(), String> {
    if let Some((host, port)) = value.rsplit_once(':') {
        server.host = host.to_string();
        server.port = port.parse().map_err(|_| "invalid port in listen directive".to_string())?;
    } else if let Ok(port) = value.parse::<u16>() {
        server.port = port;
    } else {
        server.host = value.to_string();
    }
    Ok(())
}

pub fn parse(input: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    let tokens = crate::config::lexer::tokenize(input)?;
    Parser::new(tokens).parse_servers()
}
