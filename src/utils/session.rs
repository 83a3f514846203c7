use crate::prelude::*;
use std::collections::HashMap;

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

use std::time::{SystemTime, UNIX_EPOCH};

pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: u64,
    pub last_cleanup: Instant,
}

impl SessionStore {
    pub fn new(ttl: u64) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            ttl,
            last_cleanup: Instant::now(),
        }
    }

    pub fn cleanup(&mut self) {
        let now = current_timestamp();
        self.sessions.retain(|_, s| !s.is_expired(now));
        self.last_cleanup = Instant::now();
    }

    fn setup_new_session(&mut self, res: &mut HttpResponse) {
        let uuid = format!("{}-{}", current_timestamp(), next_session_seq());
        self.sessions.insert(uuid.clone(), Session::new(self.ttl));

        let set_cookie = SetCookie::new("session_id", &uuid)
            .max_age(3600)
            .to_header();

        res.headers.insert("Set-Cookie".to_string(), set_cookie);
    }

    pub fn mange_session_store(&mut self, conn: &mut HttpConnection) {
        let cookies_header = conn.request.headers.get("cookie");
        let cookies: Cookies = match cookies_header {
            Some(data) => Cookies::parse(data),
            None => Cookies::new(),
        };

        match cookies.get("session_id") {
            Some(session_id) => match self.sessions.get(session_id) {
                Some(session) if !session.is_expired(current_timestamp()) => {}
                _ => {
                    self.setup_new_session(&mut conn.response);
                }
            },
            _ => {
                self.setup_new_session(&mut conn.response);
            }
        };
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Monotonic per-process counter guaranteeing session ids stay unique even
/// when two clients are handed a fresh session within the same wall-clock
/// second, since the timestamp alone is the only other input.
static SESSION_SEQ: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

fn next_session_seq() -> u64 {
    SESSION_SEQ.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}
