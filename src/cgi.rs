//! The CGI/1.1 gateway (SPEC_FULL.md §4.G): spawns the script, shuttles the
//! request body into its stdin, and re-frames its stdout into the outer HTTP
//! response.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use mio::Token;

use crate::config::{CgiConfig, ServerConfig};
use crate::connection::{ActiveAction, ConnState, HttpConnection};
use crate::http::{find_subsequence, status_text, HttpResponse};

pub const CGI_TIMEOUT: Duration = Duration::from_secs(1);
const SERVER_SOFTWARE: &str = "vibeserv/0.1";

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CgiParsingState {
    ReadHeaders,
    StreamBody,
    StreamBodyChunked,
}

/// Resolves the script's filesystem path, validates its extension against
/// the CGI block's allow-list, forks it with its environment, and wires its
/// pipes. On success the connection's `action` becomes `ActiveAction::Cgi`.
pub fn spawn_cgi(
    conn: &mut HttpConnection,
    server: &ServerConfig,
    cgi: &CgiConfig,
) -> std::io::Result<()> {
    let (script_path, extension) = resolve_script_path(conn, server, cgi)?;

    if !cgi.extensions.iter().any(|e| e == &extension) {
        return Err(std::io::Error::new(ErrorKind::InvalidInput, "extension not allowed"));
    }
    let metadata = std::fs::metadata(&script_path)?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(ErrorKind::NotFound, "script missing"));
    }

    let (parent_stdin, child_stdin) = UnixStream::pair()?;
    let (child_stdout, parent_stdout) = UnixStream::pair()?;

    let envs = build_cgi_env(conn, server, cgi, &script_path);

    use std::os::fd::{FromRawFd, IntoRawFd};
    let child_stdin_stdio = unsafe { Stdio::from_raw_fd(child_stdin.into_raw_fd()) };
    let child_stdout_stdio = unsafe { Stdio::from_raw_fd(child_stdout.into_raw_fd()) };

    let child = Command::new(&script_path)
        .envs(envs)
        .stdin(child_stdin_stdio)
        .stdout(child_stdout_stdio)
        .spawn()?;

    parent_stdin.set_nonblocking(true)?;
    parent_stdout.set_nonblocking(true)?;

    let has_body = conn.request.content_length > 0 || conn.request.is_chunked;
    let in_stream = if has_body { Some(parent_stdin) } else { None };

    conn.body_remaining = conn.request.content_length;
    conn.action = ActiveAction::Cgi {
        out_stream: parent_stdout,
        in_stream,
        child,
        parse_state: CgiParsingState::ReadHeaders,
        header_buf: Vec::new(),
        start_time: Instant::now(),
    };

    if !has_body {
        conn.state = ConnState::CgiSending;
    }

    Ok(())
}

fn resolve_script_path(
    conn: &HttpConnection,
    server: &ServerConfig,
    cgi: &CgiConfig,
) -> std::io::Result<(std::path::PathBuf, String)> {
    let target = &conn.request.path;
    let suffix = target.strip_prefix(&cgi.url_prefix).unwrap_or("");
    let script_path = std::path::PathBuf::from(&cgi.fs_path).join(suffix.trim_start_matches('/'));
    let _ = server;

    let extension = script_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    Ok((script_path, extension))
}

fn build_cgi_env(
    conn: &HttpConnection,
    server: &ServerConfig,
    cgi: &CgiConfig,
    script_path: &std::path::Path,
) -> HashMap<String, String> {
    let req = &conn.request;
    let mut envs = HashMap::new();

    envs.insert("GATEWAY_INTERFACE".into(), "CGI/1.1".into());
    envs.insert("SERVER_PROTOCOL".into(), "HTTP/1.1".into());
    envs.insert("SERVER_SOFTWARE".into(), SERVER_SOFTWARE.into());
    envs.insert("REQUEST_METHOD".into(), req.method.to_string());
    envs.insert("SCRIPT_NAME".into(), req.path.clone());
    envs.insert("PATH_INFO".into(), req.path_info.clone());
    envs.insert("PATH_TRANSLATED".into(), script_path.to_string_lossy().into_owned());
    envs.insert("QUERY_STRING".into(), req.query.clone());
    envs.insert("SERVER_NAME".into(), server.server_names.first().cloned().unwrap_or_default());
    envs.insert("REMOTE_USER".into(), "N/A".into());
    envs.insert("AUTH_TYPE".into(), "N/A".into());
    envs.insert("REMOTE_HOST".into(), "N/A".into());
    if let Some(dir) = &cgi.upload_dir {
        envs.insert("UPLOAD_DIR".into(), dir.clone());
    }

    if let Ok(addr) = conn.stream.peer_addr() {
        envs.insert("REMOTE_ADDR".into(), addr.ip().to_string());
    }
    if let Ok(addr) = conn.stream.local_addr() {
        envs.insert("SERVER_PORT".into(), addr.port().to_string());
    }

    if let Some(ct) = req.header("content-type") {
        envs.insert("CONTENT_TYPE".into(), ct.to_string());
    }
    if req.content_length > 0 {
        envs.insert("CONTENT_LENGTH".into(), req.content_length.to_string());
    }

    for (k, v) in req.headers.iter().chain(req.trailers.iter()) {
        if k == "content-type" || k == "content-length" {
            continue;
        }
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }

    envs
}

/// Drives the shuttling for a CGI-backed connection on one readiness pass.
pub fn pump_cgi(conn: &mut HttpConnection, client_token: Token, cgi_token: Token) {
    let in_ready = conn.cgi_in_token == Some(cgi_token);
    let out_ready = conn.cgi_out_token == Some(cgi_token);
    let _ = client_token;

    if let ActiveAction::Cgi { in_stream, .. } = &mut conn.action {
        if in_ready {
            if let Some(pipe) = in_stream {
                if !conn.cgi_buffer.is_empty() {
                    match pipe.write(&conn.cgi_buffer) {
                        Ok(n) => {
                            conn.cgi_buffer.drain(..n);
                        }
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                        Err(_) => conn.closed = true,
                    }
                }
                if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                    if let ActiveAction::Cgi { in_stream, .. } = &mut conn.action {
                        *in_stream = None;
                    }
                    conn.cgi_in_token = None;
                }
            }
        }
    }

    if out_ready {
        read_cgi_stdout(conn);
    }

    reap_if_exited(conn);
}

fn read_cgi_stdout(conn: &mut HttpConnection) {
    let mut buf = [0u8; 4096];
    let read_result = if let ActiveAction::Cgi { out_stream, .. } = &mut conn.action {
        Some(out_stream.read(&mut buf))
    } else {
        None
    };

    match read_result {
        Some(Ok(0)) => {
            if let ActiveAction::Cgi { parse_state, .. } = &conn.action {
                if *parse_state == CgiParsingState::StreamBodyChunked {
                    conn.write_buffer.extend_from_slice(b"0\r\n\r\n");
                }
            }
            conn.cgi_out_token = None;
        }
        Some(Ok(n)) => {
            if let ActiveAction::Cgi { parse_state, header_buf, .. } = &mut conn.action {
                let mut response_headers = None;
                let mut leftover_body = Vec::new();
                process_cgi_stdout(parse_state, header_buf, &buf[..n], &mut response_headers, &mut leftover_body);

                if let Some((status, headers)) = response_headers {
                    let is_chunked = *parse_state == CgiParsingState::StreamBodyChunked;
                    let mut res = HttpResponse::new(status);
                    res.headers.remove("content-length");
                    for (k, v) in headers {
                        res.set_header(&k, v);
                    }
                    if is_chunked {
                        res.set_header("transfer-encoding", "chunked");
                    }
                    conn.write_buffer.extend_from_slice(&res.to_bytes_headers_only());
                    conn.response = res;
                    if !leftover_body.is_empty() {
                        push_cgi_data(&mut conn.write_buffer, &leftover_body, is_chunked);
                    }
                } else {
                    let is_chunked = *parse_state == CgiParsingState::StreamBodyChunked;
                    if !leftover_body.is_empty() {
                        push_cgi_data(&mut conn.write_buffer, &leftover_body, is_chunked);
                    }
                }
            }
        }
        Some(Err(e)) if e.kind() == ErrorKind::WouldBlock => {}
        Some(Err(_)) => conn.closed = true,
        None => {}
    }
}

fn reap_if_exited(conn: &mut HttpConnection) {
    let exited = if let ActiveAction::Cgi { child, .. } = &mut conn.action {
        matches!(child.try_wait(), Ok(Some(_)))
    } else {
        false
    };

    if exited && conn.cgi_out_token.is_none() {
        conn.state = ConnState::CgiFinished;
        conn.action = ActiveAction::None;
        conn.cgi_in_token = None;
        conn.cgi_out_token = None;
        conn.cgi_buffer.clear();
        // CGI responses never offer keep-alive (SPEC_FULL.md §4.G, Open
        // Question resolution).
        conn.keep_alive = false;
        conn.state = ConnState::SimpleResponse;
    }
}

/// Splits the first chunk of CGI stdout into header block + body (if the
/// header terminator is found in it), translating `Status:`/other headers
/// into `response_headers` exactly once; subsequent calls just relay body
/// bytes into `body_out`, which the caller chunk-encodes if no
/// `Content-Length` was declared. Ordering the outer HTTP status line ahead
/// of any body bytes is the caller's job, since it owns the write buffer.
fn process_cgi_stdout(
    parse_state: &mut CgiParsingState,
    header_buf: &mut Vec<u8>,
    new_data: &[u8],
    response_headers: &mut Option<(u16, Vec<(String, String)>)>,
    body_out: &mut Vec<u8>,
) {
    match parse_state {
        CgiParsingState::ReadHeaders => {
            header_buf.extend_from_slice(new_data);

            let found = find_subsequence(header_buf, b"\r\n\r\n")
                .map(|p| (p, 4))
                .or_else(|| find_subsequence(header_buf, b"\n\n").map(|p| (p, 2)));

            if let Some((pos, delim_len)) = found {
                let header_bytes = header_buf[..pos].to_vec();
                let body_start = header_buf[pos + delim_len..].to_vec();

                let (status, headers) = parse_cgi_headers(&header_bytes);
                let is_chunked = !headers.iter().any(|(k, _)| k == "content-length");

                *parse_state = if is_chunked {
                    CgiParsingState::StreamBodyChunked
                } else {
                    CgiParsingState::StreamBody
                };

                *response_headers = Some((status, headers));
                header_buf.clear();
                *body_out = body_start;
            }
        }
        CgiParsingState::StreamBody | CgiParsingState::StreamBodyChunked => {
            body_out.extend_from_slice(new_data);
        }
    }
}

fn push_cgi_data(write_buffer: &mut Vec<u8>, data: &[u8], chunked: bool) {
    if chunked {
        write_buffer.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
        write_buffer.extend_from_slice(data);
        write_buffer.extend_from_slice(b"\r\n");
    } else {
        write_buffer.extend_from_slice(data);
    }
}

fn parse_cgi_headers(bytes: &[u8]) -> (u16, Vec<(String, String)>) {
    let mut status = 200;
    let mut headers = Vec::new();
    let content = String::from_utf8_lossy(bytes);

    for line in content.lines() {
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();
            if key == "status" {
                status = val.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
            } else {
                headers.push((key, val));
            }
        }
    }
    (status, headers)
}

/// Kills and reaps a CGI child whose wall-clock budget expired, emitting a
/// 504 (or completing the in-flight chunked body) depending on whether
/// headers were already sent.
pub fn force_cgi_timeout(conn: &mut HttpConnection) {
    if let ActiveAction::Cgi { child, parse_state, .. } = &mut conn.action {
        let _ = child.kill();
        let _ = child.wait();

        match parse_state {
            CgiParsingState::StreamBodyChunked => {
                conn.write_buffer.extend_from_slice(b"0\r\n\r\n");
            }
            CgiParsingState::ReadHeaders => {
                let body = format!("{} {}", 504, status_text(504));
                let mut res = HttpResponse::new(504);
                res.set_body(body.into_bytes(), "text/plain");
                conn.write_buffer = res.to_bytes();
            }
            CgiParsingState::StreamBody => {}
        }
    }

    conn.cgi_in_token = None;
    conn.cgi_out_token = None;
    conn.cgi_buffer.clear();
    conn.keep_alive = false;
    conn.action = ActiveAction::None;
    conn.state = ConnState::SimpleResponse;
}

pub fn check_cgi_timed_out(conn: &HttpConnection) -> bool {
    matches!(&conn.action, ActiveAction::Cgi { start_time, .. } if start_time.elapsed() > CGI_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers_from_cgi_output() {
        let (status, headers) = parse_cgi_headers(b"Status: 302 Found\r\nLocation: /x\r\n");
        assert_eq!(status, 302);
        assert_eq!(headers, vec![("location".to_string(), "/x".to_string())]);
    }

    #[test]
    fn defaults_to_200_without_status_header() {
        let (status, _) = parse_cgi_headers(b"Content-Type: text/plain\r\n");
        assert_eq!(status, 200);
    }

    #[test]
    fn chunked_push_wraps_data_in_hex_size_line() {
        let mut buf = Vec::new();
        push_cgi_data(&mut buf, b"hi", true);
        assert_eq!(buf, b"2\r\nhi\r\n");
    }
}
