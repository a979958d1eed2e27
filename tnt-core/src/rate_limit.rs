//! Per-IP admission and auth-failure tracking.
//!
//! A fixed-capacity table keyed by IP text. Windows are wall-clock-free:
//! everything is measured against [`Instant`] so the table is immune to
//! clock adjustments. When the table is full and a new IP shows up, the
//! entry with the oldest `window_start` is evicted to make room.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{
    RATE_LIMIT_BLOCK_SECS, RATE_LIMIT_MAX_AUTH_FAILURES, RATE_LIMIT_MAX_CONNECTIONS,
    RATE_LIMIT_TABLE_SIZE, RATE_LIMIT_WINDOW_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

#[derive(Debug, Clone)]
struct Entry {
    ip: String,
    window_start: Instant,
    connections: u32,
    auth_failures: u32,
    blocked: bool,
    block_until: Instant,
}

impl Entry {
    fn new(ip: String, now: Instant) -> Self {
        Self {
            ip,
            window_start: now,
            connections: 0,
            auth_failures: 0,
            blocked: false,
            block_until: now,
        }
    }
}

pub struct RateLimiter {
    window: Duration,
    max_connections: u32,
    max_auth_failures: u32,
    block_duration: Duration,
    capacity: usize,
    entries: Mutex<Vec<Entry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_params(
            Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            RATE_LIMIT_MAX_CONNECTIONS,
            RATE_LIMIT_MAX_AUTH_FAILURES,
            Duration::from_secs(RATE_LIMIT_BLOCK_SECS),
            RATE_LIMIT_TABLE_SIZE,
        )
    }

    pub fn with_params(
        window: Duration,
        max_connections: u32,
        max_auth_failures: u32,
        block_duration: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            window,
            max_connections,
            max_auth_failures,
            block_duration,
            capacity,
            entries: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Finds `ip`'s entry, inserting a fresh one (evicting the
    /// least-recently-windowed entry if the table is full) when absent.
    /// Rolls the window over if it has expired and clears an expired block.
    fn find_or_insert<'a>(entries: &'a mut Vec<Entry>, ip: &str, now: Instant, capacity: usize) -> usize {
        if let Some(idx) = entries.iter().position(|e| e.ip == ip) {
            return idx;
        }
        if entries.len() >= capacity {
            if let Some((oldest_idx, _)) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.window_start)
            {
                entries.remove(oldest_idx);
            }
        }
        entries.push(Entry::new(ip.to_string(), now));
        entries.len() - 1
    }

    /// Admits a new TCP connection from `ip`. Returns `Denied` if the IP is
    /// currently blocked or this admission pushes it past `N_c` within the
    /// window (in which case it becomes blocked for `D`).
    pub fn admit_connection(&self, ip: &str) -> Admission {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let idx = Self::find_or_insert(&mut entries, ip, now, self.capacity);
        let entry = &mut entries[idx];

        if entry.blocked {
            if now < entry.block_until {
                return Admission::Denied;
            }
            entry.blocked = false;
            entry.auth_failures = 0;
        }

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.connections = 0;
        }

        entry.connections += 1;
        if entry.connections > self.max_connections {
            entry.blocked = true;
            entry.block_until = now + self.block_duration;
            return Admission::Denied;
        }

        Admission::Allowed
    }

    /// Records an authentication failure for `ip`, blocking it for `D` once
    /// failures reach `N_a`. Independent of the connection counter.
    pub fn record_auth_failure(&self, ip: &str) -> Admission {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let idx = Self::find_or_insert(&mut entries, ip, now, self.capacity);
        let entry = &mut entries[idx];

        if entry.blocked && now >= entry.block_until {
            entry.blocked = false;
            entry.auth_failures = 0;
        }

        entry.auth_failures += 1;
        if entry.auth_failures >= self.max_auth_failures {
            entry.blocked = true;
            entry.block_until = now + self.block_duration;
            return Admission::Denied;
        }

        if entry.blocked {
            return Admission::Denied;
        }
        Admission::Allowed
    }

    /// Whether `ip` is currently serving an active block, without mutating
    /// any counters (used for a pre-auth short-circuit).
    pub fn is_blocked(&self, ip: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.iter_mut().find(|e| e.ip == ip) {
            Some(entry) if entry.blocked => {
                if now >= entry.block_until {
                    entry.blocked = false;
                    entry.auth_failures = 0;
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_n_connections_then_blocks() {
        let limiter = RateLimiter::with_params(
            Duration::from_secs(60),
            10,
            5,
            Duration::from_secs(300),
            256,
        );
        for _ in 0..10 {
            assert_eq!(limiter.admit_connection("1.2.3.4"), Admission::Allowed);
        }
        assert_eq!(limiter.admit_connection("1.2.3.4"), Admission::Denied);
        assert!(limiter.is_blocked("1.2.3.4"));
        // A second IP is unaffected.
        assert_eq!(limiter.admit_connection("5.6.7.8"), Admission::Allowed);
    }

    #[test]
    fn auth_failures_block_independently_of_connection_count() {
        let limiter = RateLimiter::with_params(
            Duration::from_secs(60),
            10,
            5,
            Duration::from_secs(300),
            256,
        );
        for _ in 0..4 {
            assert_eq!(limiter.record_auth_failure("9.9.9.9"), Admission::Allowed);
        }
        assert_eq!(limiter.record_auth_failure("9.9.9.9"), Admission::Denied);
        assert!(limiter.is_blocked("9.9.9.9"));
    }

    #[test]
    fn table_evicts_oldest_window_when_full() {
        let limiter = RateLimiter::with_params(Duration::from_secs(60), 10, 5, Duration::from_secs(300), 2);
        limiter.admit_connection("a");
        std::thread::sleep(Duration::from_millis(5));
        limiter.admit_connection("b");
        // table full at capacity 2; "c" must evict "a" (oldest window_start)
        limiter.admit_connection("c");
        let entries = limiter.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(!entries.iter().any(|e| e.ip == "a"));
        assert!(entries.iter().any(|e| e.ip == "b"));
        assert!(entries.iter().any(|e| e.ip == "c"));
    }
}
