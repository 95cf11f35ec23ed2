use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::lexer::{Lexer, Loc, Token, TokenType};
use crate::config::types::{CgiConfig, RouteConfig, ServerConfig};
use crate::http::Method;

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " (at {loc})")?;
        }
        if !self.context.is_empty() {
            write!(f, "\n  context trace:")?;
            for (i, ctx) in self.context.iter().rev().enumerate() {
                write!(f, "\n{}↳ {}", " ".repeat(2 + i * 2), ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

type PResult<T> = Result<T, ConfigError>;

/// Global directives applied to every `server` block that doesn't override
/// them: `maxBodySize`, `autoindex`, `error_pages`.
#[derive(Default)]
struct Globals {
    max_body_size: Option<usize>,
    autoindex: Option<bool>,
    error_pages: HashMap<u16, String>,
}

pub struct ConfigParser {
    tokens: Vec<Token>,
    cursor: usize,
    context: Vec<String>,
}

impl ConfigParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            context: Vec::new(),
        }
    }

    pub fn parse_file(path: &Path) -> PResult<Vec<ServerConfig>> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("cannot read {}: {e}", path.display()),
            loc: None,
            context: vec![],
        })?;
        Self::parse_str(&text)
    }

    pub fn parse_str(text: &str) -> PResult<Vec<ServerConfig>> {
        let tokens = Lexer::new(text).tokenize().map_err(|e| ConfigError {
            message: e,
            loc: None,
            context: vec!["lexing phase".to_string()],
        })?;
        let mut parser = ConfigParser::new(tokens);
        parser.parse_top_level()
    }

    fn peek(&self) -> Option<&TokenType> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).cloned();
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn err(&self, message: impl Into<String>) -> ConfigError {
        ConfigError {
            message: message.into(),
            loc: self.peek_loc(),
            context: self.context.clone(),
        }
    }

    fn expect_brace(&mut self, kind: TokenType) -> PResult<()> {
        match self.advance() {
            Some(t) if std::mem::discriminant(&t.kind) == std::mem::discriminant(&kind) => Ok(()),
            Some(t) => Err(ConfigError {
                message: format!("expected '{kind}', found '{}'", t.kind),
                loc: Some(t.loc),
                context: self.context.clone(),
            }),
            None => Err(self.err(format!("expected '{kind}', found end of file"))),
        }
    }

    fn expect_word(&mut self) -> PResult<String> {
        match self.advance() {
            Some(Token {
                kind: TokenType::Word(w),
                ..
            }) => Ok(w),
            Some(Token {
                kind: TokenType::StringLit(w),
                ..
            }) => Ok(w),
            Some(Token {
                kind: TokenType::Number(n),
                ..
            }) => Ok(n.to_string()),
            Some(t) => Err(ConfigError {
                message: format!("expected a word, found '{}'", t.kind),
                loc: Some(t.loc),
                context: self.context.clone(),
            }),
            None => Err(self.err("expected a word, found end of file")),
        }
    }

    fn expect_number(&mut self) -> PResult<u64> {
        match self.advance() {
            Some(Token {
                kind: TokenType::Number(n),
                ..
            }) => Ok(n),
            Some(t) => Err(ConfigError {
                message: format!("expected a number, found '{}'", t.kind),
                loc: Some(t.loc),
                context: self.context.clone(),
            }),
            None => Err(self.err("expected a number, found end of file")),
        }
    }

    /// Reads words until `;`, consuming the `;`.
    fn read_args_until_semicolon(&mut self) -> PResult<Vec<String>> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(TokenType::Semicolon) => {
                    self.advance();
                    return Ok(args);
                }
                Some(_) => args.push(self.expect_word()?),
                None => return Err(self.err("unterminated directive, expected ';'")),
            }
        }
    }

    fn parse_on_off(s: &str, loc: Option<Loc>, context: &[String]) -> PResult<bool> {
        match s {
            "on" => Ok(true),
            "off" => Ok(false),
            other => Err(ConfigError {
                message: format!("expected 'on' or 'off', found '{other}'"),
                loc,
                context: context.to_vec(),
            }),
        }
    }

    fn parse_methods(args: &[String], loc: Option<Loc>, context: &[String]) -> PResult<Vec<Method>> {
        args.iter()
            .map(|a| {
                Method::from_str(a).map_err(|_| ConfigError {
                    message: format!("unknown method '{a}' in acceptedMethods"),
                    loc,
                    context: context.to_vec(),
                })
            })
            .collect()
    }

    fn parse_top_level(&mut self) -> PResult<Vec<ServerConfig>> {
        let mut globals = Globals::default();
        let mut servers = Vec::new();

        while let Some(kind) = self.peek() {
            match kind {
                TokenType::Word(w) if w == "server" => {
                    self.advance();
                    self.context.push("in server block".to_string());
                    self.expect_brace(TokenType::LBrace)?;
                    let server = self.parse_server_block(&globals)?;
                    self.expect_brace(TokenType::RBrace)?;
                    self.context.pop();
                    servers.push(server);
                }
                TokenType::Word(w) if w == "maxBodySize" => {
                    self.advance();
                    let n = self.expect_number()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    globals.max_body_size = Some(n as usize);
                }
                TokenType::Word(w) if w == "autoindex" => {
                    self.advance();
                    let loc = self.peek_loc();
                    let val = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    globals.autoindex = Some(Self::parse_on_off(&val, loc, &self.context)?);
                }
                TokenType::Word(w) if w == "error_pages" => {
                    self.advance();
                    self.expect_brace(TokenType::LBrace)?;
                    globals.error_pages = self.parse_error_pages_block()?;
                    self.expect_brace(TokenType::RBrace)?;
                }
                _ => {
                    let t = self.advance().unwrap();
                    return Err(ConfigError {
                        message: format!("unexpected top-level directive '{}'", t.kind),
                        loc: Some(t.loc),
                        context: self.context.clone(),
                    });
                }
            }
        }

        Ok(servers)
    }

    fn parse_error_pages_block(&mut self) -> PResult<HashMap<u16, String>> {
        let mut map = HashMap::new();
        while !matches!(self.peek(), Some(TokenType::RBrace) | None) {
            let loc = self.peek_loc();
            let code = self.expect_number()?;
            if code == 0 || code > 599 {
                return Err(ConfigError {
                    message: format!("invalid status code {code} in error_pages"),
                    loc,
                    context: self.context.clone(),
                });
            }
            let path = self.expect_word()?;
            self.expect_brace(TokenType::Semicolon)?;
            map.insert(code as u16, path);
        }
        Ok(map)
    }

    fn parse_server_block(&mut self, globals: &Globals) -> PResult<ServerConfig> {
        let mut cfg = ServerConfig {
            ports: Vec::new(),
            server_names: Vec::new(),
            autoindex: globals.autoindex.unwrap_or(false),
            max_body_size: globals.max_body_size.unwrap_or(crate::config::types::DEFAULT_MAX_BODY_SIZE),
            error_pages: globals.error_pages.clone(),
            ..Default::default()
        };

        while !matches!(self.peek(), Some(TokenType::RBrace) | None) {
            let directive = self.expect_word()?;
            match directive.as_str() {
                "listen" => {
                    let loc = self.peek_loc();
                    let port = self.expect_number()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    if port == 0 || port > u16::MAX as u64 {
                        return Err(ConfigError {
                            message: format!("listen port {port} out of range"),
                            loc,
                            context: self.context.clone(),
                        });
                    }
                    cfg.ports.push(port as u16);
                }
                "server_name" => {
                    let names = self.read_args_until_semicolon()?;
                    cfg.server_names.extend(names);
                }
                "serverListenAddress" => {
                    cfg.bind_address = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "root" => {
                    cfg.root = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "index" => {
                    cfg.index = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "autoindex" => {
                    let loc = self.peek_loc();
                    let val = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    cfg.autoindex = Self::parse_on_off(&val, loc, &self.context)?;
                }
                "maxBodySize" => {
                    let n = self.expect_number()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    cfg.max_body_size = n as usize;
                }
                "acceptedMethods" => {
                    let loc = self.peek_loc();
                    let args = self.read_args_until_semicolon()?;
                    cfg.methods = Self::parse_methods(&args, loc, &self.context)?;
                }
                "error_pages" => {
                    self.expect_brace(TokenType::LBrace)?;
                    let map = self.parse_error_pages_block()?;
                    self.expect_brace(TokenType::RBrace)?;
                    cfg.error_pages.extend(map);
                }
                "location" => {
                    let prefix = self.expect_word()?;
                    self.context.push(format!("in location \"{prefix}\""));
                    self.expect_brace(TokenType::LBrace)?;
                    let loc = self.parse_location_block(prefix)?;
                    self.expect_brace(TokenType::RBrace)?;
                    self.context.pop();
                    cfg.locations.push(loc);
                }
                "cgi" => {
                    self.context.push("in cgi block".to_string());
                    self.expect_brace(TokenType::LBrace)?;
                    let cgi = self.parse_cgi_block()?;
                    self.expect_brace(TokenType::RBrace)?;
                    self.context.pop();
                    cfg.cgi = Some(cgi);
                }
                other => {
                    return Err(self.err(format!("unknown directive '{other}' in server block")));
                }
            }
        }

        if cfg.ports.is_empty() {
            cfg.ports.push(crate::config::types::DEFAULT_PORT);
        }
        if cfg.server_names.is_empty() {
            cfg.server_names.push(crate::config::types::DEFAULT_SERVER_NAME.to_string());
        }
        Ok(cfg)
    }

    fn parse_location_block(&mut self, prefix: String) -> PResult<RouteConfig> {
        let mut loc = RouteConfig {
            prefix,
            ..Default::default()
        };

        while !matches!(self.peek(), Some(TokenType::RBrace) | None) {
            let directive = self.expect_word()?;
            match directive.as_str() {
                "root" => {
                    loc.root = Some(self.expect_word()?);
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "autoindex" => {
                    let at = self.peek_loc();
                    let val = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    loc.autoindex = Some(Self::parse_on_off(&val, at, &self.context)?);
                }
                "internal" => {
                    let at = self.peek_loc();
                    let val = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    loc.internal = Self::parse_on_off(&val, at, &self.context)?;
                }
                "return" => {
                    let at = self.peek_loc();
                    let code = self.expect_number()?;
                    let target = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    if code < 100 || code > 599 {
                        return Err(ConfigError {
                            message: format!("invalid return status {code}"),
                            loc: at,
                            context: self.context.clone(),
                        });
                    }
                    loc.return_directive = Some((code as u16, target));
                }
                "file_upload" => {
                    let at = self.peek_loc();
                    let val = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                    loc.file_upload = Self::parse_on_off(&val, at, &self.context)?;
                }
                "upload_dir" => {
                    loc.upload_dir = Some(self.expect_word()?);
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "acceptedMethods" => {
                    let at = self.peek_loc();
                    let args = self.read_args_until_semicolon()?;
                    loc.methods = Some(Self::parse_methods(&args, at, &self.context)?);
                }
                "error_pages" => {
                    self.expect_brace(TokenType::LBrace)?;
                    let map = self.parse_error_pages_block()?;
                    self.expect_brace(TokenType::RBrace)?;
                    loc.error_pages.extend(map);
                }
                other => {
                    return Err(self.err(format!("unknown directive '{other}' in location block")));
                }
            }
        }

        Ok(loc)
    }

    fn parse_cgi_block(&mut self) -> PResult<CgiConfig> {
        let mut cgi = CgiConfig::default();
        while !matches!(self.peek(), Some(TokenType::RBrace) | None) {
            let directive = self.expect_word()?;
            match directive.as_str() {
                "cgi_path_alias" => {
                    cgi.url_prefix = self.expect_word()?;
                    cgi.fs_path = self.expect_word()?;
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "upload_dir" => {
                    cgi.upload_dir = Some(self.expect_word()?);
                    self.expect_brace(TokenType::Semicolon)?;
                }
                "file_extension" => {
                    cgi.extensions = self.read_args_until_semicolon()?;
                }
                "acceptedMethods" => {
                    let at = self.peek_loc();
                    let args = self.read_args_until_semicolon()?;
                    cgi.methods = Some(Self::parse_methods(&args, at, &self.context)?);
                }
                other => {
                    return Err(self.err(format!("unknown directive '{other}' in cgi block")));
                }
            }
        }
        Ok(cgi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_server_block() {
        let servers = ConfigParser::parse_str(
            r#"
            server {
                listen 8080;
                server_name example.com;
                root ./www;
                index index.html;
            }
            "#,
        )
        .unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].ports, vec![8080]);
        assert_eq!(servers[0].server_names, vec!["example.com"]);
        assert_eq!(servers[0].root, "./www");
    }

    #[test]
    fn parses_location_and_cgi_blocks() {
        let servers = ConfigParser::parse_str(
            r#"
            server {
                listen 80;
                location /upload {
                    file_upload on;
                    upload_dir ./uploads;
                    acceptedMethods POST DELETE;
                }
                cgi {
                    cgi_path_alias /cgi-bin ./cgi-bin;
                    file_extension .py .sh;
                }
            }
            "#,
        )
        .unwrap();
        let s = &servers[0];
        assert_eq!(s.locations.len(), 1);
        assert!(s.locations[0].file_upload);
        assert_eq!(s.locations[0].upload_dir.as_deref(), Some("./uploads"));
        let cgi = s.cgi.as_ref().unwrap();
        assert_eq!(cgi.url_prefix, "/cgi-bin");
        assert_eq!(cgi.extensions, vec![".py", ".sh"]);
    }

    #[test]
    fn global_max_body_size_applies_unless_overridden() {
        let servers = ConfigParser::parse_str(
            r#"
            maxBodySize 5000;
            server { listen 80; }
            server { listen 81; maxBodySize 9000; }
            "#,
        )
        .unwrap();
        assert_eq!(servers[0].max_body_size, 5000);
        assert_eq!(servers[1].max_body_size, 9000);
    }

    #[test]
    fn unknown_directive_is_a_located_error() {
        let err = ConfigParser::parse_str("server { bogus 1; }").unwrap_err();
        assert!(err.message.contains("bogus"));
        assert!(err.loc.is_some());
    }

    #[test]
    fn missing_semicolon_is_an_error() {
        let err = ConfigParser::parse_str("server { listen 80 }").unwrap_err();
        assert!(err.message.contains(";") || err.message.contains("Semicolon") || err.message.contains("found"));
    }
}
