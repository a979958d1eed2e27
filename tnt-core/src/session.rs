//! Per-connection state: transport ownership, modal UI state, and the
//! reference-counting discipline that keeps a session's transport alive
//! through in-flight broadcasts.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use crate::{DEFAULT_TERM_HEIGHT, DEFAULT_TERM_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Insert,
    Normal,
    Command,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpLang {
    English,
    Chinese,
}

/// The modal UI state a worker owns and mutates; broadcasters only read the
/// `connected` flag and overlay state (via [`Session::can_render`]) before
/// invoking the renderer, never the buffers themselves.
#[derive(Debug, Clone)]
pub struct UiState {
    pub mode: Mode,
    pub help_lang: HelpLang,
    pub scroll_pos: usize,
    pub help_scroll_pos: usize,
    pub input: String,
    pub command_input: String,
    pub command_output: String,
    pub command_output_active: bool,
    pub display_name: String,
    pub term_width: u32,
    pub term_height: u32,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            mode: Mode::Insert,
            help_lang: HelpLang::English,
            scroll_pos: 0,
            help_scroll_pos: 0,
            input: String::new(),
            command_input: String::new(),
            command_output: String::new(),
            command_output_active: false,
            display_name: String::from("anonymous"),
            term_width: DEFAULT_TERM_WIDTH,
            term_height: DEFAULT_TERM_HEIGHT,
        }
    }
}

/// Transport handles owned by a session. Closed in order (channel, then
/// session) exactly once, on the last reference drop. `close` is
/// fire-and-forget: implementations queue the async teardown on a
/// background task rather than blocking inside `Drop`.
pub trait Transport: Send + Sync + fmt::Debug {
    fn close(&self);

    /// Queues `data` to be written to the channel. Fire-and-forget, like
    /// `close`: the renderer must not block on a slow peer, so real
    /// implementations hand this to a background writer task.
    fn write(&self, _data: &[u8]) {}
}

#[derive(Debug)]
struct NullTransport;

impl Transport for NullTransport {
    fn close(&self) {}
}

pub struct Session {
    pub id: Uuid,
    pub peer_addr: String,
    transport: Box<dyn Transport>,
    ui: Mutex<UiState>,
    connected: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    pub fn new(peer_addr: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr: peer_addr.into(),
            transport,
            ui: Mutex::new(UiState::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Session with no real transport, for unit tests that exercise the FSM
    /// and room without a live SSH channel.
    #[doc(hidden)]
    pub fn new_for_test(peer_addr: impl Into<String>) -> Self {
        Self::new(peer_addr, Box::new(NullTransport))
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Whether this session should receive a `render_main` call right now:
    /// not mid-help-overlay and not mid-command-output-overlay.
    pub fn can_render(&self) -> bool {
        let ui = self.ui();
        ui.mode != Mode::Help && !ui.command_output_active
    }

    pub fn ui(&self) -> std::sync::MutexGuard<'_, UiState> {
        self.ui.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn display_name(&self) -> String {
        self.ui().display_name.clone()
    }

    /// Queues `data` for the session's transport. Used by renderers; never
    /// blocks.
    pub fn write(&self, data: &[u8]) {
        self.transport.write(data);
    }

    pub fn set_term_size(&self, width: u32, height: u32) {
        let mut ui = self.ui();
        ui.term_width = if width == 0 { DEFAULT_TERM_WIDTH } else { width };
        ui.term_height = if height == 0 {
            DEFAULT_TERM_HEIGHT
        } else {
            height
        };
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn last_arc_drop_closes_transport() {
        #[derive(Debug)]
        struct Flag(Arc<AtomicBool>);
        impl Transport for Flag {
            fn close(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let closed = Arc::new(AtomicBool::new(false));
        let session = Arc::new(Session::new("1.2.3.4", Box::new(Flag(closed.clone()))));
        let extra = session.clone();
        assert!(!closed.load(Ordering::SeqCst));
        drop(extra);
        assert!(!closed.load(Ordering::SeqCst));
        drop(session);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn can_render_false_during_help() {
        let session = Session::new_for_test("127.0.0.1");
        assert!(session.can_render());
        session.ui().mode = Mode::Help;
        assert!(!session.can_render());
    }
}
