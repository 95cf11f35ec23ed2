use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::ServerConfig;
use crate::http::status::{mime_for_extension, status_text};

#[derive(Debug)]
pub struct HttpResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            version: "HTTP/1.1".to_string(),
            status_code,
            status_text: status_text(status_code),
            headers: HashMap::from([("content-length".to_string(), "0".to_string())]),
            body: Vec::new(),
        }
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>, content_type: &str) -> &mut Self {
        self.headers
            .insert("content-length".to_string(), body.len().to_string());
        self.headers
            .insert("content-type".to_string(), content_type.to_string());
        self.body = body;
        self
    }

    pub fn set_status_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.status_text = status_text(code);
        self
    }

    fn to_pascal_case(s: &str) -> String {
        s.split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    None => String::new(),
                    Some(f) => f.to_uppercase().collect::<String>() + chars.as_str(),
                }
            })
            .collect::<Vec<String>>()
            .join("-")
    }

    pub fn to_bytes_headers_only(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.status_text
        )
        .into_bytes();
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", Self::to_pascal_case(k), v).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.to_bytes_headers_only();
        out.extend_from_slice(&self.body);
        out
    }

    pub fn redirect(code: u16, target_url: &str) -> Self {
        let mut res = HttpResponse::new(code);
        res.set_header("location", target_url)
            .set_header("content-length", "0")
            .set_header("connection", "close");
        res
    }
}

/// Looks up a status-specific error page for the matched server/location; on
/// any failure to read it, falls back to a generated minimal HTML page.
pub fn error_response(code: u16, server: Option<&ServerConfig>, error_page: Option<&str>) -> HttpResponse {
    let mut res = HttpResponse::new(code);

    if let (Some(server), Some(page)) = (server, error_page) {
        let path = Path::new(&server.root).join(page.trim_start_matches('/'));
        if let Ok(content) = fs::read(&path) {
            res.set_body(content, "text/html");
            apply_connection_policy(&mut res, code);
            return res;
        }
    }

    let body = format!("<html><body><h1>{code} {}</h1></body></html>", status_text(code)).into_bytes();
    res.set_body(body, "text/html");
    apply_connection_policy(&mut res, code);
    res
}

fn apply_connection_policy(res: &mut HttpResponse, code: u16) {
    let keep_alive = code == 404 || code == 405 || code < 400;
    res.set_header("connection", if keep_alive { "keep-alive" } else { "close" });
}

pub fn mime_type_for_path(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => mime_for_extension(ext),
        None => "application/octet-stream",
    }
}

/// Generates a directory listing as a small HTML document. `base_href` is
/// the request target, trailing-slash-normalised.
pub fn generate_autoindex(dir: &Path, base_href: &str) -> HttpResponse {
    let base = if base_href.ends_with('/') {
        base_href.to_string()
    } else {
        format!("{base_href}/")
    };

    let mut html = format!("<html><body><h1>Index of {base}</h1><ul>");
    if let Ok(entries) = dir.read_dir() {
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        for name in names {
            html.push_str(&format!("<li><a href=\"{base}{name}\">{name}</a></li>"));
        }
    }
    html.push_str("</ul></body></html>");

    let mut res = HttpResponse::new(200);
    res.set_body(html.into_bytes(), "text/html");
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_includes_status_line_and_body() {
        let mut res = HttpResponse::new(200);
        res.set_body(b"hi".to_vec(), "text/plain");
        let bytes = res.to_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn redirect_sets_location_and_closes() {
        let res = HttpResponse::redirect(301, "/new");
        assert_eq!(res.headers.get("location").map(String::as_str), Some("/new"));
        assert_eq!(res.headers.get("connection").map(String::as_str), Some("close"));
    }

    #[test]
    fn error_response_without_custom_page_falls_back_to_generated_body() {
        let res = error_response(404, None, None);
        assert_eq!(res.status_code, 404);
        assert!(String::from_utf8(res.body).unwrap().contains("404"));
    }

    #[test]
    fn mime_type_falls_back_to_octet_stream_for_unknown_extension() {
        assert_eq!(mime_type_for_path(Path::new("foo.weird")), "application/octet-stream");
        assert_eq!(mime_type_for_path(Path::new("foo.html")), "text/html");
    }
}
