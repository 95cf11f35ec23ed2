//! Per-connection state machine (SPEC_FULL.md §3, §4.H). One `HttpConnection`
//! owns every fd derived from an accepted client: the socket itself, and,
//! while a CGI script is running, its stdin/stdout pipe halves.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::process::Child;
use std::sync::Arc;
use std::time::Instant;

use mio::net::TcpStream;
use mio::Token;

use crate::cgi::CgiParsingState;
use crate::config::{RouteConfig, ServerConfig};
use crate::handlers::{execute_active_action, handle_delete, handle_get};
use crate::http::{
    error_response, HttpRequest, HttpResponse, Method, ParseError, ParsingState,
};
use crate::router::{self, Matched};
use crate::upload::{finish_upload_response, Upload};
use crate::utils::session::SessionStore;

pub const READ_BUF_SIZE: usize = 4096;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {
    Incoming,
    ParsingHeader,
    ReceivingChunks,
    SimpleResponse,
    FileRequest,
    Upload,
    CgiIncoming,
    CgiSending,
    CgiFinished,
}

/// The one active handler for a connection; only one variant is live at a
/// time (SPEC_FULL.md §3 invariant 2).
pub enum ActiveAction {
    None,
    FileDownload {
        file: File,
        remaining: usize,
    },
    Upload(std::path::PathBuf),
    Cgi {
        out_stream: UnixStream,
        in_stream: Option<UnixStream>,
        child: Child,
        parse_state: CgiParsingState,
        header_buf: Vec<u8>,
        start_time: Instant,
    },
}

impl std::fmt::Debug for ActiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveAction::None => write!(f, "None"),
            ActiveAction::FileDownload { remaining, .. } => {
                write!(f, "FileDownload{{remaining: {remaining}}}")
            }
            ActiveAction::Upload(p) => write!(f, "Upload({p:?})"),
            ActiveAction::Cgi { parse_state, .. } => write!(f, "Cgi{{state: {parse_state:?}}}"),
        }
    }
}

pub struct HttpConnection {
    pub stream: TcpStream,
    pub write_buffer: Vec<u8>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub servers: Arc<Vec<ServerConfig>>,
    pub s_cfg: Option<Arc<ServerConfig>>,
    pub r_cfg_prefix: Option<String>,
    pub state: ConnState,
    pub action: ActiveAction,
    pub upload_manager: Option<Upload>,
    pub total_body_read: usize,
    pub body_remaining: usize,
    pub boundary: String,
    pub closed: bool,
    pub keep_alive: bool,
    pub cgi_in_token: Option<Token>,
    pub cgi_out_token: Option<Token>,
    pub cgi_buffer: Vec<u8>,
    pub session_id: Option<String>,
    pending_set_cookie: Option<String>,
    pub last_activity: Instant,
    chunked_buf: Vec<u8>,
}

impl HttpConnection {
    pub fn new(stream: TcpStream, servers: Arc<Vec<ServerConfig>>) -> Self {
        Self {
            stream,
            write_buffer: Vec::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(200),
            servers,
            s_cfg: None,
            r_cfg_prefix: None,
            state: ConnState::Incoming,
            action: ActiveAction::None,
            upload_manager: None,
            total_body_read: 0,
            body_remaining: 0,
            boundary: String::new(),
            closed: false,
            keep_alive: true,
            cgi_in_token: None,
            cgi_out_token: None,
            cgi_buffer: Vec::new(),
            session_id: None,
            pending_set_cookie: None,
            last_activity: Instant::now(),
            chunked_buf: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Selects the server block a parsed request targets, by the port the
    /// client connected to and the `Host` header (falling back to the
    /// `server_name _` default block).
    fn resolve_server(&self) -> Option<Arc<ServerConfig>> {
        let local_port = self.stream.local_addr().ok()?.port();
        let host = self
            .request
            .header("host")
            .and_then(|h| h.split(':').next())
            .unwrap_or("");

        let candidates: Vec<&ServerConfig> = self
            .servers
            .iter()
            .filter(|s| s.ports.contains(&local_port))
            .collect();

        candidates
            .iter()
            .find(|s| s.matches_host(host))
            .or_else(|| candidates.iter().find(|s| s.is_default_server()))
            .or_else(|| candidates.first())
            .map(|s| Arc::new((*s).clone()))
    }

    fn route_config<'a>(&self, server: &'a ServerConfig) -> Option<&'a RouteConfig> {
        server.find_location(&self.request.path)
    }

    /// Reads available bytes off the socket into the request buffer. Returns
    /// `false` on peer-close/error, signalling the caller to tear the
    /// connection down.
    pub fn read_data(&mut self) -> bool {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.request.buffer.extend_from_slice(&buf[..n]);
                    self.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    pub fn write_data(&mut self) -> bool {
        while !self.write_buffer.is_empty() {
            match self.stream.write(&self.write_buffer) {
                Ok(0) => return false,
                Ok(n) => {
                    self.write_buffer.drain(..n);
                    self.touch();
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
        true
    }

    /// Drives parsing and dispatch as far as the buffered bytes allow. Moves
    /// the connection into whichever handler state the dispatched request
    /// needs.
    pub fn handle_read_phase(&mut self, session_store: &mut SessionStore) {
        loop {
            match self.request.advance() {
                Ok(()) => {}
                Err(ParseError::IncompleteRequestLine) => {
                    self.state = ConnState::ParsingHeader;
                    return;
                }
                Err(e) => {
                    self.send_protocol_error(e);
                    return;
                }
            }

            match self.request.state {
                ParsingState::HeadersDone => {
                    self.dispatch(session_store);
                    return;
                }
                ParsingState::ChunkedBody => {
                    self.state = ConnState::ReceivingChunks;
                    if !self.accumulate_chunked_body() {
                        return;
                    }
                    // Whole body assembled: splice it in front of whatever
                    // (pipelined) bytes follow and dispatch exactly as for a
                    // request that carried a literal Content-Length, now that
                    // content_length/is_chunked have been finalized. This is
                    // what makes server lookup, CGI env, and upload/location
                    // routing run with the real decoded length instead of
                    // starting before any of the body exists.
                    let assembled = std::mem::take(&mut self.chunked_buf);
                    self.request.buffer.splice(0..0, assembled);
                    self.request.state = ParsingState::HeadersDone;
                    self.dispatch(session_store);
                    return;
                }
                _ => continue,
            }
        }
    }

    fn send_protocol_error(&mut self, err: ParseError) {
        let code = err.status_code();
        self.response = error_response(code, None, None);
        self.response.set_header("connection", "close");
        self.keep_alive = false;
        self.write_buffer = self.response.to_bytes();
        self.state = ConnState::SimpleResponse;
    }

    /// Serializes `self.response`, attaching a freshly-minted session
    /// `Set-Cookie` header if `dispatch` queued one for this request.
    fn finalize_response(&mut self) {
        if let Some(cookie) = self.pending_set_cookie.take() {
            self.response.set_header("set-cookie", cookie);
        }
        self.write_buffer = self.response.to_bytes();
    }

    /// SPEC_FULL.md §4.E: target decode, `..` rejection, the internal cookie
    /// endpoint, location/CGI resolution, and method dispatch.
    fn dispatch(&mut self, session_store: &mut SessionStore) {
        let decoded = match router::percent_decode(&self.request.path) {
            Ok(d) => d,
            Err(e) => return self.send_protocol_error(e),
        };
        if router::contains_dot_dot(&decoded) {
            return self.send_protocol_error(ParseError::MalformedRequestLine);
        }
        self.request.path = decoded.clone();

        let (session_id, set_cookie) = session_store.manage_session(&self.request);
        self.session_id = Some(session_id);
        self.pending_set_cookie = set_cookie;

        if let Some((name, value)) = router::match_update_cookie(&decoded) {
            return self.handle_update_cookie(&name, &value);
        }

        let Some(server) = self.resolve_server() else {
            self.response = error_response(500, None, None);
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        };

        match router::resolve(&server, &decoded) {
            Matched::Cgi(cgi) => {
                let allowed = cgi.methods.as_deref().unwrap_or(&server.methods);
                if !self.request.method.is_allowed(allowed) {
                    self.response = error_response(405, Some(&server), None);
                    self.finalize_response();
                    self.state = ConnState::SimpleResponse;
                    return;
                }
                self.s_cfg = Some(server.clone());
                self.start_cgi(&server, cgi);
            }
            Matched::Location(loc) => {
                self.s_cfg = Some(server.clone());
                self.r_cfg_prefix = loc.map(|l| l.prefix.clone());
                self.dispatch_static(&server, loc);
            }
        }
    }

    fn handle_update_cookie(&mut self, name: &str, value: &str) {
        self.response = HttpResponse::new(200);
        self.response.set_header(
            "set-cookie",
            crate::utils::set_cookie::SetCookie::new(name, value).to_header(),
        );
        self.response
            .set_body(br#"{"status":"success"}"#.to_vec(), "application/json");
        self.write_buffer = self.response.to_bytes();
        self.state = ConnState::SimpleResponse;
    }

    fn dispatch_static(&mut self, server: &ServerConfig, loc: Option<&RouteConfig>) {
        let allowed = server.effective_methods(loc);
        if !self.request.method.is_allowed(allowed) {
            self.response = error_response(
                405,
                Some(server),
                server.effective_error_page(loc, 405),
            );
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        }

        match self.request.method {
            Method::Get | Method::Head => {
                let is_head = self.request.method == Method::Head;
                let mut response = HttpResponse::new(200);
                self.action = handle_get(&self.request, &mut response, loc, server, is_head);
                self.response = response;
                self.begin_response_state();
            }
            Method::Delete => {
                let Some(loc) = loc else {
                    self.response = error_response(404, Some(server), server.effective_error_page(None, 404));
                    self.finalize_response();
                    self.state = ConnState::SimpleResponse;
                    return;
                };
                self.response = handle_delete(&self.request, loc, server);
                self.finalize_response();
                self.state = ConnState::SimpleResponse;
            }
            Method::Post | Method::Put => self.begin_upload(server, loc),
        }
    }

    fn begin_upload(&mut self, server: &ServerConfig, loc: Option<&RouteConfig>) {
        let Some(loc) = loc else {
            self.response = error_response(404, Some(server), server.effective_error_page(None, 404));
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        };
        if !loc.file_upload {
            self.response = error_response(403, Some(server), server.effective_error_page(Some(loc), 403));
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        }
        if self.request.content_length > server.max_body_size {
            self.response = error_response(413, Some(server), server.effective_error_page(Some(loc), 413));
            self.keep_alive = false;
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        }

        let root = server.effective_root(Some(loc));
        let upload_dir = loc.upload_dir.as_deref().unwrap_or("");
        let path = std::path::PathBuf::from(root).join(upload_dir);
        self.action = ActiveAction::Upload(path);
        self.boundary = self
            .request
            .boundary
            .clone()
            .unwrap_or_default()
            .trim_start_matches("--")
            .to_string();
        self.body_remaining = self.request.content_length;
        self.state = ConnState::Upload;
        self.drain_body_to_upload();
    }

    fn begin_response_state(&mut self) {
        if let Some(cookie) = self.pending_set_cookie.take() {
            self.response.set_header("set-cookie", cookie);
        }
        match &self.action {
            ActiveAction::FileDownload { .. } => {
                self.write_buffer = self.response.to_bytes_headers_only();
                self.state = ConnState::FileRequest;
            }
            _ => {
                self.write_buffer = self.response.to_bytes();
                self.state = ConnState::SimpleResponse;
            }
        }
    }

    /// Consumes already-buffered body bytes (non-chunked) into the active
    /// upload, tracking `body_remaining`.
    fn drain_body_to_upload(&mut self) {
        let available = self.request.buffer.len().min(self.body_remaining);
        if available == 0 {
            return;
        }
        let boundary = self.boundary.clone();
        if let Err(e) = crate::handlers::execute_active_action(
            &self.request,
            &mut self.upload_manager,
            &mut self.action,
            0,
            available,
            &boundary,
        ) {
            self.response = error_response(e.status_code(), self.s_cfg.as_deref(), None);
            self.keep_alive = false;
            self.finalize_response();
            self.state = ConnState::SimpleResponse;
            return;
        }
        self.request.buffer.drain(..available);
        self.body_remaining -= available;
        self.total_body_read += available;

        if self.body_remaining == 0 {
            self.finish_upload();
        }
    }

    fn finish_upload(&mut self) {
        if let Some(mgr) = &mut self.upload_manager {
            let mut response = HttpResponse::new(201);
            finish_upload_response(&mut response, mgr);
            self.response = response;
        } else {
            self.response = error_response(500, self.s_cfg.as_deref(), None);
        }
        self.finalize_response();
        self.state = ConnState::SimpleResponse;
    }

    /// Pulls whatever chunk data is currently decodable into `chunked_buf`,
    /// re-driving `parse_chunked_body` between data segments. No handler sees
    /// any of it until the whole body (and trailers) are in hand, so the
    /// decoded length is known before dispatch ever runs (SPEC_FULL.md §4.E
    /// step 4). Returns `true` once the body is fully assembled.
    fn accumulate_chunked_body(&mut self) -> bool {
        loop {
            while let Some(data) = self.request.take_chunk_data() {
                self.chunked_buf.extend_from_slice(&data);
            }
            match self.request.parse_chunked_body() {
                Ok(true) => return true,
                Ok(false) => return false,
                Err(e) => {
                    self.send_protocol_error(e);
                    return false;
                }
            }
        }
    }

    fn finish_body_and_respond(&mut self) {
        match self.state {
            ConnState::Upload => self.finish_upload(),
            ConnState::CgiIncoming => {
                self.cgi_in_token = None;
                self.state = ConnState::CgiSending;
            }
            _ => {}
        }
    }

    fn start_cgi(&mut self, server: &ServerConfig, cgi: &crate::config::CgiConfig) {
        match crate::cgi::spawn_cgi(self, server, cgi) {
            Ok(()) => {
                if self.state != ConnState::CgiSending {
                    self.state = ConnState::CgiIncoming;
                }
                // Any body bytes already buffered ahead of headers (pipelined
                // writes) move straight into the CGI stdin buffer.
                if !self.request.is_chunked {
                    let available = self.request.buffer.len().min(self.body_remaining);
                    if available > 0 {
                        let drained: Vec<u8> = self.request.buffer.drain(..available).collect();
                        self.cgi_buffer.extend_from_slice(&drained);
                        self.body_remaining -= available;
                        if self.body_remaining == 0 {
                            self.finish_body_and_respond();
                        }
                    }
                }
            }
            Err(_) => {
                self.response = error_response(500, Some(server), None);
                self.finalize_response();
                self.state = ConnState::SimpleResponse;
            }
        }
    }

    /// Reads more body bytes straight off the client socket into the CGI
    /// stdin buffer while in `CgiIncoming`, bypassing the request parser
    /// (the body is opaque to it once dispatch has started a CGI child).
    pub fn read_body_into_cgi_buffer(&mut self) -> bool {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return false,
                Ok(n) => {
                    self.touch();
                    let take = n.min(self.body_remaining);
                    self.cgi_buffer.extend_from_slice(&buf[..take]);
                    self.body_remaining -= take;
                    if self.body_remaining == 0 {
                        self.finish_body_and_respond();
                        return true;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(_) => return false,
            }
        }
    }

    /// After a response buffer fully drains: either reset for the next
    /// pipelined request (keep-alive) or mark the connection closed.
    pub fn handle_post_write_update(&mut self) {
        match self.state {
            ConnState::SimpleResponse => {
                if self.keep_alive && self.response.headers.get("connection").map(String::as_str) != Some("close") {
                    self.request.reset_for_next();
                    self.response = HttpResponse::new(200);
                    self.state = ConnState::Incoming;
                    self.action = ActiveAction::None;
                    self.upload_manager = None;
                    self.chunked_buf.clear();
                } else {
                    self.closed = true;
                }
            }
            ConnState::FileRequest => self.continue_file_send(),
            _ => {}
        }
    }

    fn continue_file_send(&mut self) {
        if let ActiveAction::FileDownload { file, remaining } = &mut self.action {
            if *remaining == 0 {
                self.action = ActiveAction::None;
                self.request.reset_for_next();
                self.response = HttpResponse::new(200);
                self.state = ConnState::Incoming;
                return;
            }
            let mut buf = vec![0u8; READ_BUF_SIZE.min(*remaining)];
            match file.read(&mut buf) {
                Ok(0) => {
                    self.action = ActiveAction::None;
                    self.request.reset_for_next();
                    self.response = HttpResponse::new(200);
                    self.state = ConnState::Incoming;
                }
                Ok(n) => {
                    *remaining -= n;
                    self.write_buffer.extend_from_slice(&buf[..n]);
                }
                Err(_) => self.closed = true,
            }
        }
    }

    pub fn terminate_connection(&mut self) {
        self.closed = true;
    }
}
