// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Session tokens and per-client rate limiting.

use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Random bytes per token (hex-encoded on the wire).
const TOKEN_BYTES: usize = 16;

/// Opaque tokens issued by `authenticate`, each valid for a fixed lifetime.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, Instant>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl,
        }
    }

    pub fn issue(&mut self) -> String {
        self.issue_at(Instant::now())
    }

    pub fn issue_at(&mut self, now: Instant) -> String {
        self.prune(now);
        let token = generate_token();
        self.sessions.insert(token.clone(), now);
        token
    }

    pub fn is_valid(&mut self, token: &str) -> bool {
        self.is_valid_at(token, Instant::now())
    }

    pub fn is_valid_at(&mut self, token: &str, now: Instant) -> bool {
        self.prune(now);
        self.sessions.contains_key(token)
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.sessions
            .retain(|_, issued| now.saturating_duration_since(*issued) < ttl);
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Sliding-window request quota keyed by client.
#[derive(Debug)]
pub struct RateLimiter<K> {
    clients: HashMap<K, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl<K: std::hash::Hash + Eq + Clone> RateLimiter<K> {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            clients: HashMap::new(),
            max_requests,
            window,
        }
    }

    /// Record a request from `client`. Returns false if it exceeds the quota;
    /// rejected requests are not counted.
    pub fn check(&mut self, client: &K) -> bool {
        self.check_at(client, Instant::now())
    }

    pub fn check_at(&mut self, client: &K, now: Instant) -> bool {
        let window = self.window;
        let stamps = self.clients.entry(client.clone()).or_default();
        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            stamps.pop_front();
        }

        if stamps.len() >= self.max_requests {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Drop clients with no requests inside the window.
    pub fn cleanup(&mut self, now: Instant) {
        let window = self.window;
        self.clients.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}
