//! Idle-connection and CGI wall-clock sweeps (SPEC_FULL.md §4.H
//! "Cancellation & timeouts"), run once per `poll` timeout tick.

use std::time::{Duration, Instant};

use crate::cgi::{check_cgi_timed_out, force_cgi_timeout};
use crate::server::{ConnId, Server};

pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(15);

pub fn sweep(server: &mut Server) {
    let now = Instant::now();
    let mut expired: Vec<ConnId> = Vec::new();
    let mut cgi_timed_out: Vec<ConnId> = Vec::new();

    for (id, conn) in server.connections_mut().iter_mut() {
        if now.duration_since(conn.last_activity) > KEEPALIVE_TIMEOUT {
            expired.push(*id);
        } else if check_cgi_timed_out(conn) {
            cgi_timed_out.push(*id);
        }
    }

    for id in cgi_timed_out {
        if let Some(conn) = server.connections_mut().get_mut(&id) {
            force_cgi_timeout(conn);
        }
    }

    for id in expired {
        server.expire_connection(id);
    }
}
