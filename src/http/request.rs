use std::collections::HashMap;
use std::fmt;

use crate::http::method::Method;

const MAX_CHUNK_SIZE_LINE: usize = 18;
const MAX_TRAILER_SIZE: usize = 8192;

#[derive(Debug, PartialEq, Eq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCrlf,
    ReadTrailers,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    IncompleteRequestLine,
    MalformedRequestLine,
    InvalidMethod,
    InvalidVersion,
    MissingHost,
    InvalidHostPort,
    InvalidUtf8,
    HeaderTooLong,
    InvalidHeaderValue,
    InvalidChunkSize,
    MissingBoundary,
    PayloadTooLarge,
    /// Carries an HTTP status code directly, for errors raised deep inside a
    /// handler (e.g. a failed upload write) that must still surface as a
    /// specific response.
    Status(u16),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::IncompleteRequestLine => write!(f, "incomplete request line"),
            ParseError::MalformedRequestLine => write!(f, "malformed request line"),
            ParseError::InvalidMethod => write!(f, "invalid or unsupported method"),
            ParseError::InvalidVersion => write!(f, "invalid HTTP version"),
            ParseError::MissingHost => write!(f, "missing Host header"),
            ParseError::InvalidHostPort => write!(f, "invalid port in Host header"),
            ParseError::InvalidUtf8 => write!(f, "invalid UTF-8 in request"),
            ParseError::HeaderTooLong => write!(f, "header line too long"),
            ParseError::InvalidHeaderValue => write!(f, "invalid header value"),
            ParseError::InvalidChunkSize => write!(f, "invalid chunk size"),
            ParseError::MissingBoundary => write!(f, "multipart request missing boundary"),
            ParseError::PayloadTooLarge => write!(f, "payload too large"),
            ParseError::Status(code) => write!(f, "error status {code}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Maps a parser-level error to the response status it should produce.
/// Errors discovered before headers finish cannot use a custom error page.
impl ParseError {
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::PayloadTooLarge => 413,
            ParseError::InvalidMethod => 405,
            ParseError::HeaderTooLong => 414,
            ParseError::Status(code) => *code,
            _ => 400,
        }
    }
}

/// A `multipart/form-data` (or CGI-fed) request's body, parsed field headers
/// for a single part.
#[derive(Debug, Default, Clone)]
pub struct PartInfo {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
}

pub fn parse_part_headers(headers: &str) -> PartInfo {
    let mut info = PartInfo::default();
    for line in headers.lines() {
        if let Some(rest) = line.strip_prefix("Content-Disposition:") {
            if let Some(n) = rest.split(';').find(|s| s.trim().starts_with("name=")) {
                info.name = n
                    .split('=')
                    .nth(1)
                    .unwrap_or("")
                    .trim_matches('"')
                    .to_string();
            }
            if let Some(fnm) = rest.split(';').find(|s| s.trim().starts_with("filename=")) {
                info.filename = Some(
                    fnm.split('=')
                        .nth(1)
                        .unwrap_or("")
                        .trim_matches('"')
                        .to_string(),
                );
            }
        } else if let Some(rest) = line.strip_prefix("Content-Type:") {
            info.content_type = rest.trim().to_string();
        }
    }
    info
}

/// Splits a decoded target at the *last* `.`; if that dot is followed
/// somewhere later by a `/`, everything from that `/` onward is `path_info`
/// and the rest is the script path. Used to separate a CGI script's own path
/// from trailing resource path segments (e.g. `/cgi-bin/a.py/extra`).
pub fn split_path_info(path: &str) -> (String, String) {
    match path.rfind('.') {
        Some(dot) => match path[dot..].find('/') {
            Some(rel_slash) => {
                let slash = dot + rel_slash;
                (path[..slash].to_string(), path[slash..].to_string())
            }
            None => (path.to_string(), "/".to_string()),
        },
        None => (path.to_string(), "/".to_string()),
    }
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub target: String,
    pub path: String,
    pub path_info: String,
    pub query: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub cookies: HashMap<String, String>,
    pub host_port: Option<u16>,
    pub content_length: usize,
    pub is_chunked: bool,
    pub boundary: Option<String>,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
    chunk_decoded_len: usize,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::Get,
            target: String::new(),
            path: String::new(),
            path_info: String::new(),
            query: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            cookies: HashMap::new(),
            host_port: None,
            content_length: 0,
            is_chunked: false,
            boundary: None,
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
            chunk_decoded_len: 0,
        }
    }

    /// Resets everything except the unconsumed tail of `buffer`, for the next
    /// pipelined request on a keep-alive connection.
    pub fn reset_for_next(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        *self = HttpRequest {
            buffer: std::mem::take(&mut self.buffer),
            ..HttpRequest::new()
        };
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    /// Drives the parser through as many states as the buffered bytes allow.
    /// Returns once headers (and, if present, the whole body) are parsed, or
    /// `IncompleteRequestLine` if more bytes are needed.
    pub fn advance(&mut self) -> Result<(), ParseError> {
        loop {
            match self.state {
                ParsingState::RequestLine => self.parse_request_line()?,
                ParsingState::Headers => self.parse_headers()?,
                ParsingState::HeadersDone => return Ok(()),
                ParsingState::Body => return Ok(()),
                ParsingState::ChunkedBody => return Ok(()),
            }
        }
    }

    fn parse_request_line(&mut self) -> Result<(), ParseError> {
        let Some(idx) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::IncompleteRequestLine);
        };
        let line = std::str::from_utf8(&self.buffer[self.cursor..idx])
            .map_err(|_| ParseError::InvalidUtf8)?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(ParseError::MalformedRequestLine);
        }
        self.method = parts[0].parse()?;
        if !matches!(parts[2], "HTTP/1.0" | "HTTP/1.1") {
            return Err(ParseError::InvalidVersion);
        }
        self.version = parts[2].to_string();
        self.target = parts[1].to_string();

        match self.target.split_once('?') {
            Some((p, q)) => {
                self.path = p.to_string();
                self.query = q.to_string();
            }
            None => self.path = self.target.clone(),
        }
        let (script, path_info) = split_path_info(&self.path);
        self.path = script;
        self.path_info = path_info;

        self.cursor = idx + 2;
        self.state = ParsingState::Headers;
        Ok(())
    }

    fn extract_header_line(&mut self) -> Result<Option<(String, String)>, ParseError> {
        let Some(idx) = find_crlf(&self.buffer, self.cursor) else {
            return Err(ParseError::IncompleteRequestLine);
        };
        let line_bytes = &self.buffer[self.cursor..idx];
        if line_bytes.is_empty() {
            self.cursor = idx + 2;
            return Ok(None);
        }
        if line_bytes.len() > MAX_TRAILER_SIZE {
            return Err(ParseError::HeaderTooLong);
        }
        let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::InvalidUtf8)?;
        self.cursor = idx + 2;
        let Some(sep) = line.find(':') else {
            return Err(ParseError::MalformedRequestLine);
        };
        let key = line[..sep].trim().to_ascii_lowercase();
        let value = line[sep + 1..].trim().to_string();
        Ok(Some((key, value)))
    }

    fn parse_headers(&mut self) -> Result<(), ParseError> {
        loop {
            match self.extract_header_line()? {
                Some((k, v)) => {
                    if k == "cookie" {
                        self.parse_cookie_header(&v);
                    }
                    self.headers.insert(k, v);
                }
                None => {
                    self.finish_headers()?;
                    self.buffer.drain(..self.cursor);
                    self.cursor = 0;
                    return Ok(());
                }
            }
        }
    }

    fn parse_cookie_header(&mut self, value: &str) {
        for part in value.split(';') {
            let part = part.trim();
            if let Some((k, v)) = part.split_once('=') {
                self.cookies.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
    }

    fn finish_headers(&mut self) -> Result<(), ParseError> {
        let host = self.headers.get("host").ok_or(ParseError::MissingHost)?;
        if let Some((_, port_str)) = host.split_once(':') {
            let port: u16 = port_str.parse().map_err(|_| ParseError::InvalidHostPort)?;
            if port == 0 {
                return Err(ParseError::InvalidHostPort);
            }
            self.host_port = Some(port);
        }

        self.is_chunked = self
            .headers
            .get("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

        if let Some(cl) = self.headers.get("content-length") {
            self.content_length = cl.parse().map_err(|_| ParseError::InvalidHeaderValue)?;
        }

        if self.method == Method::Post && !self.headers.contains_key("content-type") {
            self.headers.insert(
                "content-type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            );
        }

        if let Some(ct) = self.headers.get("content-type").cloned() {
            if ct.to_ascii_lowercase().starts_with("multipart/") {
                match ct.split("boundary=").nth(1) {
                    Some(b) => self.boundary = Some(format!("--{}", b.trim().trim_matches('"'))),
                    None => return Err(ParseError::MissingBoundary),
                }
            }
        }

        self.state = if self.is_chunked {
            ParsingState::ChunkedBody
        } else {
            ParsingState::HeadersDone
        };
        Ok(())
    }

    /// Decodes chunks straight out of `self.buffer` (consuming it), appending
    /// to `self.trailers`. Returns `Ok(true)` once the terminating chunk and
    /// any trailers have been consumed, at which point `content_length` is
    /// set to the total decoded length and `is_chunked`/the `Transfer-Encoding`
    /// header are cleared (SPEC_FULL.md §4.C).
    pub fn parse_chunked_body(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.chunk_state {
                ChunkState::ReadSize => {
                    let len = self.buffer.len();
                    if len == 0 {
                        return Ok(false);
                    }
                    let limit = len.min(MAX_CHUNK_SIZE_LINE);
                    match find_subsequence(&self.buffer[..limit], b"\r\n") {
                        Some(line_end) => {
                            let hex = std::str::from_utf8(&self.buffer[..line_end])
                                .map_err(|_| ParseError::InvalidChunkSize)?;
                            let size = usize::from_str_radix(hex.trim(), 16)
                                .map_err(|_| ParseError::InvalidChunkSize)?;
                            self.buffer.drain(..line_end + 2);
                            if size == 0 {
                                self.chunk_state = ChunkState::ReadTrailers;
                            } else {
                                self.chunk_decoded_len += size;
                                self.chunk_state = ChunkState::ReadData(size);
                            }
                        }
                        None => {
                            if len >= MAX_CHUNK_SIZE_LINE {
                                return Err(ParseError::InvalidChunkSize);
                            }
                            return Ok(false);
                        }
                    }
                }
                ChunkState::ReadData(_) => return Ok(false),
                ChunkState::ReadTrailingCrlf => {
                    if self.buffer.len() < 2 {
                        return Ok(false);
                    }
                    if &self.buffer[..2] != b"\r\n" {
                        return Err(ParseError::InvalidChunkSize);
                    }
                    self.buffer.drain(..2);
                    self.chunk_state = ChunkState::ReadSize;
                }
                ChunkState::ReadTrailers => {
                    if self.buffer.len() > MAX_TRAILER_SIZE {
                        return Err(ParseError::HeaderTooLong);
                    }
                    self.cursor = 0;
                    match self.extract_header_line() {
                        Ok(Some((k, v))) => {
                            self.trailers.insert(k, v);
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                        }
                        Ok(None) => {
                            self.buffer.drain(..self.cursor);
                            self.cursor = 0;
                            self.content_length = self.chunk_decoded_len;
                            self.is_chunked = false;
                            self.headers.remove("transfer-encoding");
                            return Ok(true);
                        }
                        Err(ParseError::IncompleteRequestLine) => return Ok(false),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Pulls the next chunk's data bytes out of `buffer`, driven by the
    /// dispatcher one read at a time so data can be shuttled to its
    /// destination (file, CGI stdin) as it arrives rather than buffered
    /// wholesale. Returns `None` once the chunk boundary requires another
    /// `ReadSize`/trailer pass (call `parse_chunked_body` again after).
    pub fn take_chunk_data(&mut self) -> Option<Vec<u8>> {
        if let ChunkState::ReadData(remaining) = self.chunk_state {
            if self.buffer.is_empty() {
                return None;
            }
            let take = self.buffer.len().min(remaining);
            let data: Vec<u8> = self.buffer.drain(..take).collect();
            let left = remaining - take;
            self.chunk_state = if left == 0 {
                ChunkState::ReadTrailingCrlf
            } else {
                ChunkState::ReadData(left)
            };
            return Some(data);
        }
        None
    }
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    let hay = buf.get(start..)?;
    let mut i = 0;
    while let Some(r) = hay[i..].iter().position(|&b| b == b'\r') {
        let pos = i + r;
        if hay.get(pos + 1) == Some(&b'\n') {
            return Some(start + pos);
        }
        i = pos + 1;
    }
    None
}

pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(req: &mut HttpRequest, bytes: &[u8]) {
        req.buffer.extend_from_slice(bytes);
    }

    #[test]
    fn parses_simple_get_with_host() {
        let mut req = HttpRequest::new();
        feed(&mut req, b"GET /index.html HTTP/1.1\r\nHost: example.com:8080\r\n\r\n");
        req.advance().unwrap();
        assert_eq!(req.state, ParsingState::HeadersDone);
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/index.html");
        assert_eq!(req.host_port, Some(8080));
    }

    #[test]
    fn missing_host_header_is_an_error() {
        let mut req = HttpRequest::new();
        feed(&mut req, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(req.advance(), Err(ParseError::MissingHost));
    }

    #[test]
    fn split_across_two_reads_parses_identically() {
        let mut whole = HttpRequest::new();
        feed(&mut whole, b"GET /a HTTP/1.1\r\nHost: h\r\n\r\n");
        whole.advance().unwrap();

        let mut split = HttpRequest::new();
        feed(&mut split, b"GET /a HTTP/1.1\r\nHost");
        assert_eq!(split.advance(), Err(ParseError::IncompleteRequestLine));
        feed(&mut split, b": h\r\n\r\n");
        split.advance().unwrap();
        assert_eq!(split.path, whole.path);
        assert_eq!(split.headers.get("host"), whole.headers.get("host"));
    }

    #[test]
    fn last_dot_before_slash_splits_path_info() {
        let (script, info) = split_path_info("/cgi-bin/a.py/extra/path");
        assert_eq!(script, "/cgi-bin/a.py");
        assert_eq!(info, "/extra/path");
    }

    #[test]
    fn no_dot_gives_root_path_info() {
        let (script, info) = split_path_info("/static/image");
        assert_eq!(script, "/static/image");
        assert_eq!(info, "/");
    }

    #[test]
    fn cookie_header_is_tokenised() {
        let mut req = HttpRequest::new();
        feed(
            &mut req,
            b"GET / HTTP/1.1\r\nHost: h\r\nCookie: a=1; b=two\r\n\r\n",
        );
        req.advance().unwrap();
        assert_eq!(req.cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(req.cookies.get("b").map(String::as_str), Some("two"));
    }

    #[test]
    fn post_without_content_type_defaults_to_form_urlencoded() {
        let mut req = HttpRequest::new();
        feed(
            &mut req,
            b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Length: 0\r\n\r\n",
        );
        req.advance().unwrap();
        assert_eq!(
            req.headers.get("content-type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn chunked_body_with_straddled_terminator_decodes_once_complete() {
        let mut req = HttpRequest::new();
        feed(
            &mut req,
            b"POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        req.advance().unwrap();
        assert_eq!(req.state, ParsingState::ChunkedBody);

        req.buffer.extend_from_slice(b"5\r\nhello\r\n0\r\n");
        assert!(!req.parse_chunked_body().unwrap());
        req.buffer.extend_from_slice(b"\r\n");
        assert!(req.parse_chunked_body().unwrap());
    }

    #[test]
    fn chunk_data_is_consumable_incrementally() {
        let mut req = HttpRequest::new();
        feed(
            &mut req,
            b"POST /x HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        req.advance().unwrap();
        req.buffer.extend_from_slice(b"5\r\nhel");
        assert!(!req.parse_chunked_body().unwrap());
        let first = req.take_chunk_data().unwrap();
        assert_eq!(first, b"hel");
        req.buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        assert!(!req.parse_chunked_body().unwrap());
        let second = req.take_chunk_data().unwrap();
        assert_eq!(second, b"lo");
        assert!(req.parse_chunked_body().unwrap());
    }

    #[test]
    fn invalid_method_is_rejected() {
        let mut req = HttpRequest::new();
        feed(&mut req, b"PATCH / HTTP/1.1\r\nHost: h\r\n\r\n");
        assert_eq!(req.advance(), Err(ParseError::InvalidMethod));
    }

    #[test]
    fn multipart_without_boundary_is_rejected() {
        let mut req = HttpRequest::new();
        feed(
            &mut req,
            b"POST /x HTTP/1.1\r\nHost: h\r\nContent-Type: multipart/form-data\r\nContent-Length: 0\r\n\r\n",
        );
        assert_eq!(req.advance(), Err(ParseError::MissingBoundary));
    }
}
