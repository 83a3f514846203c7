use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Word(String),
    OpenBrace,
    CloseBrace,
    Semicolon,
}

#[derive(Debug, Clone)]
pub struct ConfigToken {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error at {}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':')
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('#') => {
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_word_char(c) {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    pub fn tokenize(mut self) -> Result<Vec<ConfigToken>, ConfigError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let (line, col) = (self.line, self.col);
            let Some(&c) = self.chars.peek() else {
                break;
            };

            let kind = match c {
                '{' => {
                    self.advance();
                    TokenKind::OpenBrace
                }
                '}' => {
                    self.advance();
                    TokenKind::CloseBrace
                }
                ';' => {
                    self.advance();
                    TokenKind::Semicolon
                }
                _ if is_word_char(c) => TokenKind::Word(self.read_word()),
                other => {
                    return Err(ConfigError {
                        message: format!("unexpected character '{}'", other),
                        line,
                        col,
                    });
                }
            };

            tokens.push(ConfigToken { kind, line, col });
        }
        Ok(tokens)
    }
}

pub fn tokenize(input: &str) -> Result<Vec<ConfigToken>, ConfigError> {
    Lexer::new(input).tokenize()
}
