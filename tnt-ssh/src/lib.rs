//! SSH transport for the chat room: the `russh` server handler, the
//! per-connection negotiator/worker, and the accept loop that ties them to
//! the transport-agnostic core in `tnt-core`.

pub mod channel_writer;
pub mod common;
pub mod config;
pub mod handler;
pub mod keys;
pub mod render;
pub mod server;
pub mod transport;
pub mod worker;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use tnt_core::{MessageLog, RateLimiter, Renderer, Room};

pub use config::Config;
pub use server::run;

/// Tracks how many connections are currently live per source IP, a
/// concurrency cap distinct from the rate limiter's connections-per-window
/// admission check: `TNT_MAX_CONN_PER_IP` bounds how many sessions one
/// address may hold open at once, regardless of how slowly it opened them.
#[derive(Debug, Default)]
pub struct PerIpConnections {
    counts: Mutex<HashMap<String, usize>>,
}

impl PerIpConnections {
    /// Admits one more connection from `ip` if it is under `limit`,
    /// incrementing its count and returning `true`; otherwise leaves the
    /// count untouched and returns `false`.
    pub fn try_acquire(&self, ip: &str, limit: u32) -> bool {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let count = counts.entry(ip.to_string()).or_insert(0);
        if *count as u32 >= limit {
            return false;
        }
        *count += 1;
        true
    }

    /// Releases one connection slot for `ip`, dropping the entry once it
    /// reaches zero so the table doesn't grow unbounded with stale IPs.
    pub fn release(&self, ip: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(ip);
            }
        }
    }
}

/// Process-wide state shared by every connection: the room, the rate
/// limiter, the per-IP concurrent-connection tracker, a live session
/// counter for the global admission check, the immutable config, and the
/// append-only log.
pub struct AppState {
    pub room: Arc<Room>,
    pub renderer: Arc<dyn Renderer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub per_ip_connections: Arc<PerIpConnections>,
    pub session_count: Arc<AtomicUsize>,
    pub config: Arc<Config>,
    pub log: Arc<MessageLog>,
}

impl AppState {
    pub fn new(config: Config, log_path: PathBuf) -> Self {
        let renderer: Arc<dyn Renderer> = Arc::new(render::AnsiRenderer);
        let log = Arc::new(MessageLog::new(log_path));
        let room = Arc::new(Room::new(renderer.clone()));
        if let Ok(history) = log.replay(tnt_core::MAX_MESSAGES) {
            room.seed_history(history);
        }
        Self {
            room,
            renderer,
            rate_limiter: Arc::new(RateLimiter::new()),
            per_ip_connections: Arc::new(PerIpConnections::default()),
            session_count: Arc::new(AtomicUsize::new(0)),
            config: Arc::new(config),
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_denies() {
        let tracker = PerIpConnections::default();
        assert!(tracker.try_acquire("1.2.3.4", 2));
        assert!(tracker.try_acquire("1.2.3.4", 2));
        assert!(!tracker.try_acquire("1.2.3.4", 2));
    }

    #[test]
    fn release_frees_a_slot_for_reuse() {
        let tracker = PerIpConnections::default();
        assert!(tracker.try_acquire("1.2.3.4", 1));
        assert!(!tracker.try_acquire("1.2.3.4", 1));
        tracker.release("1.2.3.4");
        assert!(tracker.try_acquire("1.2.3.4", 1));
    }

    #[test]
    fn tracks_ips_independently() {
        let tracker = PerIpConnections::default();
        assert!(tracker.try_acquire("1.2.3.4", 1));
        assert!(tracker.try_acquire("5.6.7.8", 1));
        assert!(!tracker.try_acquire("1.2.3.4", 1));
    }

    #[test]
    fn release_on_an_unknown_ip_is_a_no_op() {
        let tracker = PerIpConnections::default();
        tracker.release("9.9.9.9");
        assert!(tracker.try_acquire("9.9.9.9", 1));
    }

    #[test]
    fn releasing_an_empty_entry_removes_it_rather_than_going_negative() {
        let tracker = PerIpConnections::default();
        assert!(tracker.try_acquire("1.2.3.4", 5));
        tracker.release("1.2.3.4");
        tracker.release("1.2.3.4");
        assert!(tracker.try_acquire("1.2.3.4", 5));
    }
}
