use std::collections::HashMap;

use crate::http::Method;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_INDEX: &str = "index.html";

fn default_methods() -> Vec<Method> {
    vec![Method::Get, Method::Post, Method::Delete, Method::Put]
}

/// A `location PREFIX { ... }` block. Unset fields fall back to the owning
/// `ServerConfig` at resolution time (see `RouteConfig::effective_root` and
/// friends), never by copying values at parse time.
#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub prefix: String,
    pub root: Option<String>,
    pub autoindex: Option<bool>,
    pub internal: bool,
    pub methods: Option<Vec<Method>>,
    pub file_upload: bool,
    pub upload_dir: Option<String>,
    pub return_directive: Option<(u16, String)>,
    pub error_pages: HashMap<u16, String>,
}

impl RouteConfig {
    pub fn matches(&self, decoded_target: &str) -> bool {
        decoded_target.starts_with(&self.prefix)
    }
}

/// A `cgi { ... }` block: a URL-prefix alias mapped onto a filesystem path,
/// with the extensions it may execute.
#[derive(Debug, Clone, Default)]
pub struct CgiConfig {
    pub url_prefix: String,
    pub fs_path: String,
    pub upload_dir: Option<String>,
    pub extensions: Vec<String>,
    pub methods: Option<Vec<Method>>,
}

impl CgiConfig {
    /// True when `decoded_target` is exactly the alias or the alias followed
    /// by `/`.
    pub fn matches(&self, decoded_target: &str) -> bool {
        decoded_target == self.url_prefix
            || decoded_target
                .strip_prefix(&self.url_prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub ports: Vec<u16>,
    pub server_names: Vec<String>,
    pub root: String,
    pub index: String,
    pub autoindex: bool,
    pub methods: Vec<Method>,
    pub max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<RouteConfig>,
    pub cgi: Option<CgiConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_HOST.to_string(),
            ports: vec![DEFAULT_PORT],
            server_names: vec![DEFAULT_SERVER_NAME.to_string()],
            root: DEFAULT_ROOT.to_string(),
            index: DEFAULT_INDEX.to_string(),
            autoindex: false,
            methods: default_methods(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
            cgi: None,
        }
    }
}

impl ServerConfig {
    pub fn matches_host(&self, host: &str) -> bool {
        self.server_names.iter().any(|n| n == host)
    }

    pub fn is_default_server(&self) -> bool {
        self.server_names.iter().any(|n| n == DEFAULT_SERVER_NAME)
    }

    /// First-match-on-prefix, in declaration order (SPEC_FULL.md §4.A/§4.E —
    /// deliberately not longest-prefix-match).
    pub fn find_location(&self, decoded_target: &str) -> Option<&RouteConfig> {
        self.locations.iter().find(|l| l.matches(decoded_target))
    }

    pub fn effective_root<'a>(&'a self, loc: Option<&'a RouteConfig>) -> &'a str {
        loc.and_then(|l| l.root.as_deref()).unwrap_or(&self.root)
    }

    pub fn effective_autoindex(&self, loc: Option<&RouteConfig>) -> bool {
        loc.and_then(|l| l.autoindex).unwrap_or(self.autoindex)
    }

    pub fn effective_methods<'a>(&'a self, loc: Option<&'a RouteConfig>) -> &'a [Method] {
        loc.and_then(|l| l.methods.as_deref()).unwrap_or(&self.methods)
    }

    pub fn effective_error_page(&self, loc: Option<&RouteConfig>, status: u16) -> Option<&str> {
        loc.and_then(|l| l.error_pages.get(&status))
            .or_else(|| self.error_pages.get(&status))
            .map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_prefix_order_wins_over_longer_later_match() {
        let mut cfg = ServerConfig::default();
        cfg.locations.push(RouteConfig {
            prefix: "/a".into(),
            ..Default::default()
        });
        cfg.locations.push(RouteConfig {
            prefix: "/a/b".into(),
            ..Default::default()
        });
        let found = cfg.find_location("/a/b/c").unwrap();
        assert_eq!(found.prefix, "/a");
    }

    #[test]
    fn location_inherits_server_root_when_unset() {
        let cfg = ServerConfig::default();
        let loc = RouteConfig {
            prefix: "/".into(),
            ..Default::default()
        };
        assert_eq!(cfg.effective_root(Some(&loc)), DEFAULT_ROOT);
    }

    #[test]
    fn cgi_matches_alias_and_alias_slash_prefix() {
        let cgi = CgiConfig {
            url_prefix: "/cgi-bin".into(),
            ..Default::default()
        };
        assert!(cgi.matches("/cgi-bin"));
        assert!(cgi.matches("/cgi-bin/echo.py"));
        assert!(!cgi.matches("/cgi-binary"));
    }
}
