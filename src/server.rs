//! The event loop (SPEC_FULL.md §4.H): one `mio::Poll`, one thread, a
//! connection-id-keyed map plus a separate fd→connection-id index so a CGI
//! pipe's readiness event resolves to its owning connection in O(1) instead
//! of an O(n) scan (§9 "Cyclic/shared ownership").

use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use proxy_log::{debug, info, warn};

use crate::cgi::{force_cgi_timeout, pump_cgi};
use crate::config::ServerConfig;
use crate::connection::{ActiveAction, ConnState, HttpConnection};
use crate::error::AppResult;
use crate::utils::session::SessionStore;

const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
pub const MAX_CONNECTIONS: usize = 200;

pub type ConnId = usize;

#[derive(Clone, Copy, PartialEq, Eq)]
enum FdRole {
    Listener(usize),
    Client(ConnId),
    CgiStdin(ConnId),
    CgiStdout(ConnId),
}

pub struct Server {
    poll: Poll,
    listeners: Vec<TcpListener>,
    connections: HashMap<ConnId, HttpConnection>,
    client_tokens: HashMap<ConnId, Token>,
    fd_roles: HashMap<Token, FdRole>,
    next_conn_id: ConnId,
    next_token: usize,
    servers: Arc<Vec<ServerConfig>>,
    session_store: SessionStore,
}

impl Server {
    pub fn new(servers: Vec<ServerConfig>) -> AppResult<Self> {
        let poll = Poll::new().map_err(|e| e.to_string())?;
        let mut ports: Vec<(String, u16)> = Vec::new();
        for s in &servers {
            for p in &s.ports {
                if !ports.iter().any(|(_, existing)| existing == p) {
                    ports.push((s.bind_address.clone(), *p));
                }
            }
        }

        let mut listeners = Vec::new();
        let mut fd_roles = HashMap::new();
        let mut next_token = 0usize;

        for (addr, port) in ports {
            let mut listener = crate::socket::bind_listener(&addr, port)
                .map_err(|e| format!("failed to bind {addr}:{port}: {e}"))?;
            let token = Token(next_token);
            next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)
                .map_err(|e| e.to_string())?;
            fd_roles.insert(token, FdRole::Listener(listeners.len()));
            listeners.push(listener);
            info!("listening on {addr}:{port}");
        }

        Ok(Self {
            poll,
            listeners,
            connections: HashMap::new(),
            client_tokens: HashMap::new(),
            fd_roles,
            next_conn_id: 0,
            next_token,
            servers: Arc::new(servers),
            session_store: SessionStore::new(3600),
        })
    }

    pub fn run(&mut self) -> AppResult<()> {
        let mut events = Events::with_capacity(256);
        loop {
            if crate::signals::shutdown_requested() {
                info!("shutdown requested, exiting event loop");
                return Ok(());
            }

            match self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.to_string().into()),
            }

            if events.is_empty() {
                self.sweep_idle();
                self.purge_closed();
                continue;
            }

            let tokens: Vec<(Token, bool, bool)> = events
                .iter()
                .map(|e| (e.token(), e.is_readable(), e.is_writable()))
                .collect();
            for (token, readable, writable) in tokens {
                self.handle_event(token, readable, writable);
            }

            self.purge_closed();
        }
    }

    fn handle_event(&mut self, token: Token, readable: bool, writable: bool) {
        let Some(&role) = self.fd_roles.get(&token) else { return };
        match role {
            FdRole::Listener(idx) => self.accept_connections(idx),
            FdRole::Client(id) => self.drive_client(id, readable, writable),
            FdRole::CgiStdin(id) => self.drive_cgi(id, token, true),
            FdRole::CgiStdout(id) => self.drive_cgi(id, token, false),
        }
    }

    fn accept_connections(&mut self, listener_idx: usize) {
        loop {
            let Some(listener) = self.listeners.get_mut(listener_idx) else { return };
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.connections.len() >= MAX_CONNECTIONS {
                        warn!("connection cap reached, rejecting {addr} with 503");
                        let _ = std::io::Write::write_all(
                            &mut stream,
                            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        );
                        continue;
                    }

                    let conn_id = self.next_conn_id;
                    self.next_conn_id += 1;
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if self
                        .poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)
                        .is_err()
                    {
                        continue;
                    }

                    self.fd_roles.insert(token, FdRole::Client(conn_id));
                    self.client_tokens.insert(conn_id, token);
                    let conn = HttpConnection::new(stream, self.servers.clone());
                    self.connections.insert(conn_id, conn);
                    debug!("accepted connection {conn_id} from {addr}");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(_) => return,
            }
        }
    }

    fn drive_client(&mut self, id: ConnId, readable: bool, writable: bool) {
        let Some(conn) = self.connections.get_mut(&id) else { return };
        conn.touch();

        match conn.state {
            ConnState::Incoming | ConnState::ParsingHeader | ConnState::ReceivingChunks | ConnState::Upload => {
                if readable {
                    if !conn.read_data() {
                        conn.terminate_connection();
                        return;
                    }
                    conn.handle_read_phase(&mut self.session_store);
                    self.sync_post_dispatch(id);
                }
            }
            ConnState::CgiIncoming => {
                if readable && !conn.read_body_into_cgi_buffer() {
                    conn.terminate_connection();
                }
            }
            ConnState::SimpleResponse | ConnState::FileRequest | ConnState::CgiSending | ConnState::CgiFinished => {
                if writable {
                    if !conn.write_data() {
                        conn.terminate_connection();
                        return;
                    }
                    if conn.write_buffer.is_empty() {
                        conn.handle_post_write_update();
                        self.sync_interest(id);
                    }
                }
            }
        }
    }

    /// After dispatch may have changed the connection's state, re-register
    /// its interests (readable while still consuming input, writable once a
    /// response buffer is ready, or wire up CGI pipe tokens).
    fn sync_post_dispatch(&mut self, id: ConnId) {
        self.register_cgi_pipes_if_needed(id);
        self.sync_interest(id);
    }

    fn register_cgi_pipes_if_needed(&mut self, id: ConnId) {
        let out_token = Token(self.next_token);
        let in_token = Token(self.next_token + 1);

        let Some(conn) = self.connections.get_mut(&id) else { return };
        if conn.cgi_out_token.is_some() {
            return;
        }
        if let ActiveAction::Cgi { out_stream, in_stream, .. } = &mut conn.action {
            let out_fd = out_stream.as_raw_fd();
            if self
                .poll
                .registry()
                .register(&mut SourceFd(&out_fd), out_token, Interest::READABLE)
                .is_ok()
            {
                self.fd_roles.insert(out_token, FdRole::CgiStdout(id));
                conn.cgi_out_token = Some(out_token);
                self.next_token += 1;
            }

            if let Some(in_stream) = in_stream {
                let in_fd = in_stream.as_raw_fd();
                if self
                    .poll
                    .registry()
                    .register(&mut SourceFd(&in_fd), in_token, Interest::WRITABLE)
                    .is_ok()
                {
                    self.fd_roles.insert(in_token, FdRole::CgiStdin(id));
                    conn.cgi_in_token = Some(in_token);
                    self.next_token += 1;
                }
            }
        }
    }

    fn drive_cgi(&mut self, id: ConnId, token: Token, stdin_ready: bool) {
        let Some(conn) = self.connections.get_mut(&id) else { return };
        let driving_token = if stdin_ready {
            conn.cgi_in_token.unwrap_or(token)
        } else {
            conn.cgi_out_token.unwrap_or(token)
        };
        pump_cgi(conn, Token(usize::MAX), driving_token);

        if conn.state == ConnState::SimpleResponse {
            self.sync_interest(id);
        }
    }

    /// Registers/reregisters the client socket for whichever of
    /// READABLE/WRITABLE its current state needs.
    fn sync_interest(&mut self, id: ConnId) {
        let Some(&token) = self.client_tokens.get(&id) else { return };
        let Some(conn) = self.connections.get_mut(&id) else { return };
        let interest = match conn.state {
            ConnState::Incoming
            | ConnState::ParsingHeader
            | ConnState::ReceivingChunks
            | ConnState::Upload
            | ConnState::CgiIncoming => Interest::READABLE,
            ConnState::SimpleResponse | ConnState::FileRequest | ConnState::CgiSending | ConnState::CgiFinished => {
                Interest::WRITABLE
            }
        };
        let _ = self.poll.registry().reregister(&mut conn.stream, token, interest);
    }

    fn sweep_idle(&mut self) {
        crate::signals::take_child_exited();
        crate::timeouts::sweep(self);
        if self.session_store.last_cleanup.elapsed() > SESSION_CLEANUP_INTERVAL {
            self.session_store.cleanup();
        }
    }

    pub(crate) fn connections_mut(&mut self) -> &mut HashMap<ConnId, HttpConnection> {
        &mut self.connections
    }

    /// Tears down an idle connection: deregisters its socket and marks it
    /// for removal at this iteration's purge.
    pub(crate) fn expire_connection(&mut self, id: ConnId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            conn.terminate_connection();
        }
    }

    fn purge_closed(&mut self) {
        let closed: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.closed)
            .map(|(id, _)| *id)
            .collect();

        for id in closed {
            if let Some(mut conn) = self.connections.remove(&id) {
                if let ActiveAction::Cgi { .. } = &conn.action {
                    force_cgi_timeout(&mut conn);
                }
                let _ = self.poll.registry().deregister(&mut conn.stream);
                self.client_tokens.remove(&id);
                self.fd_roles.retain(|_, r| {
                    !matches!(r, FdRole::Client(c) | FdRole::CgiStdin(c) | FdRole::CgiStdout(c) if *c == id)
                });
            }
        }
    }
}
