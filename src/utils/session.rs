use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::http::HttpRequest;
use crate::utils::cookie::Cookies;
use crate::utils::set_cookie::SetCookie;

#[derive(Debug, Clone)]
pub struct Session {
    pub data: HashMap<String, String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl Session {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn new(ttl: u64) -> Self {
        Session {
            data: HashMap::new(),
            created_at: current_timestamp(),
            expires_at: current_timestamp() + ttl,
        }
    }
}

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: u64,
    counter: u64,
    pub last_cleanup: Instant,
}

impl SessionStore {
    pub fn new(ttl: u64) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            ttl,
            counter: 0,
            last_cleanup: Instant::now(),
        }
    }

    pub fn cleanup(&mut self) {
        let now = current_timestamp();
        self.sessions.retain(|_, s| !s.is_expired(now));
        self.last_cleanup = Instant::now();
    }

    fn setup_new_session(&mut self) -> (String, String) {
        self.counter += 1;
        let id = format!("{}-{}", current_timestamp(), self.counter);
        self.sessions.insert(id.clone(), Session::new(self.ttl));

        let set_cookie = SetCookie::new("session_id", &id).max_age(3600).to_header();
        (id, set_cookie)
    }

    /// Ensures the request carries a live session, minting one if its
    /// `session_id` cookie is missing or expired. Returns the session id and,
    /// when a fresh session was minted, the `Set-Cookie` header value the
    /// caller should attach to the outgoing response.
    pub fn manage_session(&mut self, request: &HttpRequest) -> (String, Option<String>) {
        let cookies = match request.headers.get("cookie") {
            Some(data) => Cookies::parse(data),
            None => Cookies::new(),
        };

        let needs_new = match cookies.get("session_id") {
            Some(session_id) => !matches!(
                self.sessions.get(session_id),
                Some(s) if !s.is_expired(current_timestamp())
            ),
            None => true,
        };

        if needs_new {
            let (id, set_cookie) = self.setup_new_session();
            (id, Some(set_cookie))
        } else {
            (cookies.get("session_id").cloned().unwrap_or_default(), None)
        }
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_session_is_treated_as_missing() {
        let s = Session {
            data: HashMap::new(),
            created_at: 0,
            expires_at: 10,
        };
        assert!(s.is_expired(11));
        assert!(!s.is_expired(5));
    }

    #[test]
    fn cleanup_drops_only_expired_sessions() {
        let mut store = SessionStore::new(3600);
        store.sessions.insert(
            "old".to_string(),
            Session { data: HashMap::new(), created_at: 0, expires_at: 0 },
        );
        store.sessions.insert(
            "fresh".to_string(),
            Session::new(3600),
        );
        store.cleanup();
        assert!(!store.sessions.contains_key("old"));
        assert!(store.sessions.contains_key("fresh"));
    }
}
