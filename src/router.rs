//! Target decoding and location/CGI matching (SPEC_FULL.md §4.E steps 5-9).
//! The per-method dispatch itself (GET/HEAD/POST/DELETE/PUT) lives in
//! `connection.rs`, since it needs to mutate the connection's active
//! handler state; this module only resolves *which* config block and
//! decoded path a request target maps to.

use crate::config::{CgiConfig, RouteConfig, ServerConfig};
use crate::http::ParseError;

pub const UPDATE_COOKIE_PREFIX: &str = "/api/update-cookie/";

#[derive(Debug, PartialEq, Eq)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed,
    Forbidden,
}

/// Percent-decodes a target: `%HH` to a byte, `+` to space. Invalid escapes
/// are a 400.
pub fn percent_decode(input: &str) -> Result<String, ParseError> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or(ParseError::MalformedRequestLine)?;
                let hex_str =
                    std::str::from_utf8(hex).map_err(|_| ParseError::MalformedRequestLine)?;
                let byte = u8::from_str_radix(hex_str, 16)
                    .map_err(|_| ParseError::MalformedRequestLine)?;
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| ParseError::InvalidUtf8)
}

pub fn contains_dot_dot(decoded_target: &str) -> bool {
    decoded_target.split('/').any(|segment| segment == "..")
}

/// Parses `/api/update-cookie/<name>/<value>` into its two components.
pub fn match_update_cookie(decoded_target: &str) -> Option<(String, String)> {
    let rest = decoded_target.strip_prefix(UPDATE_COOKIE_PREFIX)?;
    let mut parts = rest.splitn(2, '/');
    let name = parts.next()?;
    let value = parts.next()?;
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name.to_string(), value.to_string()))
}

pub enum Matched<'a> {
    Cgi(&'a CgiConfig),
    Location(Option<&'a RouteConfig>),
}

/// CGI block wins if the decoded target is its alias or `alias/...`;
/// otherwise falls back to first-match-on-prefix location matching.
pub fn resolve<'a>(server: &'a ServerConfig, decoded_target: &str) -> Matched<'a> {
    if let Some(cgi) = &server.cgi {
        if cgi.matches(decoded_target) {
            return Matched::Cgi(cgi);
        }
    }
    Matched::Location(server.find_location(decoded_target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_space_and_hex() {
        assert_eq!(percent_decode("a+b%20c").unwrap(), "a b c");
    }

    #[test]
    fn percent_decode_rejects_truncated_escape() {
        assert!(percent_decode("a%2").is_err());
    }

    #[test]
    fn detects_dot_dot_segments() {
        assert!(contains_dot_dot("/a/../b"));
        assert!(!contains_dot_dot("/a/..b/c"));
    }

    #[test]
    fn update_cookie_endpoint_parses_name_and_value() {
        let (name, value) = match_update_cookie("/api/update-cookie/theme/dark").unwrap();
        assert_eq!(name, "theme");
        assert_eq!(value, "dark");
    }

    #[test]
    fn update_cookie_rejects_missing_value() {
        assert!(match_update_cookie("/api/update-cookie/theme").is_none());
    }
}
