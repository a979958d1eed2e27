//! The shared room: bounded history, live roster, and the two-phase
//! broadcast protocol that keeps an append atomic with the membership
//! snapshot while never holding the room lock across a render.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tnt_common::TntError;
use tracing::debug;

use crate::message::Message;
use crate::renderer::Renderer;
use crate::session::Session;
use crate::{MAX_CLIENTS, MAX_MESSAGES};

struct RoomState {
    history: VecDeque<Message>,
    roster: Vec<Arc<Session>>,
}

pub struct Room {
    state: RwLock<RoomState>,
    renderer: Arc<dyn Renderer>,
    history_capacity: usize,
    roster_capacity: usize,
}

impl Room {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self::with_capacities(renderer, MAX_MESSAGES, MAX_CLIENTS)
    }

    pub fn with_capacities(
        renderer: Arc<dyn Renderer>,
        history_capacity: usize,
        roster_capacity: usize,
    ) -> Self {
        Self {
            state: RwLock::new(RoomState {
                history: VecDeque::with_capacity(history_capacity),
                roster: Vec::new(),
            }),
            renderer,
            history_capacity,
            roster_capacity,
        }
    }

    /// Seeds history from a replayed log, oldest first. Only meaningful
    /// before any session has joined.
    pub fn seed_history(&self, messages: VecDeque<Message>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.history = messages;
        while state.history.len() > self.history_capacity {
            state.history.pop_front();
        }
    }

    pub fn add_session(&self, session: Arc<Session>) -> Result<(), TntError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.roster.len() >= self.roster_capacity {
            return Err(TntError::RoomFull);
        }
        state.roster.push(session);
        Ok(())
    }

    /// Removes `session` from the roster by identity. No-op if absent.
    pub fn remove_session(&self, session: &Arc<Session>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.roster.retain(|s| !Arc::ptr_eq(s, session));
    }

    pub fn message_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).history.len()
    }

    pub fn get_message(&self, i: usize) -> Option<Message> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .get(i)
            .cloned()
    }

    pub fn client_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).roster.len()
    }

    /// Snapshot of the full visible history, oldest first. Meant to be
    /// taken by the renderer under a read lock, copied, and released
    /// before anything is written to a channel.
    pub fn history_snapshot(&self) -> Vec<Message> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Display names of everyone currently on the roster, in join order.
    pub fn roster_names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .roster
            .iter()
            .map(|s| s.display_name())
            .collect()
    }

    /// The central fan-out. Appends `msg` under the write lock, snapshots
    /// the roster (cloning each `Arc<Session>`, which is exactly the
    /// reference-count bump the broadcast protocol requires), releases the
    /// lock, then renders to every live, render-eligible session. The
    /// snapshot's `Arc` clones are dropped as the loop proceeds, so a
    /// session that disconnects mid-broadcast is kept alive by its
    /// snapshot entry until its own render call returns.
    pub async fn broadcast(&self, msg: Message) {
        let snapshot: Vec<Arc<Session>> = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.history.push_back(msg);
            while state.history.len() > self.history_capacity {
                state.history.pop_front();
            }
            state.roster.clone()
        };

        for session in snapshot {
            if !session.connected() || !session.can_render() {
                continue;
            }
            self.renderer.render_main(self, &session).await;
        }
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        debug!("room destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRenderer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render_main(&self, _room: &Room, _session: &Arc<Session>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        async fn render_input(&self, _session: &Arc<Session>, _input_bytes: &[u8]) {}
        async fn render_command_output(&self, _session: &Arc<Session>) {}
        async fn render_help(&self, _session: &Arc<Session>) {}
        async fn clear_screen(&self, _session: &Arc<Session>) {}
    }

    #[tokio::test]
    async fn broadcast_evicts_oldest_beyond_capacity() {
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let room = Room::with_capacities(renderer, 2, 8);
        room.broadcast(Message::new("a", "one")).await;
        room.broadcast(Message::new("a", "two")).await;
        room.broadcast(Message::new("a", "three")).await;
        assert_eq!(room.message_count(), 2);
        assert_eq!(room.get_message(0).unwrap().content, "two");
        assert_eq!(room.get_message(1).unwrap().content, "three");
    }

    #[tokio::test]
    async fn add_session_rejects_over_capacity() {
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let room = Room::with_capacities(renderer, 8, 1);
        let s1 = Arc::new(Session::new_for_test("1.1.1.1"));
        let s2 = Arc::new(Session::new_for_test("2.2.2.2"));
        assert!(room.add_session(s1).is_ok());
        assert!(room.add_session(s2).is_err());
    }

    #[tokio::test]
    async fn broadcast_only_renders_connected_render_eligible_sessions() {
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let room = Room::with_capacities(renderer.clone(), 8, 8);
        let live = Arc::new(Session::new_for_test("1.1.1.1"));
        let gone = Arc::new(Session::new_for_test("2.2.2.2"));
        gone.mark_disconnected();
        let helping = Arc::new(Session::new_for_test("3.3.3.3"));
        helping.ui().mode = crate::session::Mode::Help;

        room.add_session(live.clone()).unwrap();
        room.add_session(gone).unwrap();
        room.add_session(helping).unwrap();

        room.broadcast(Message::new("a", "hi")).await;
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    /// Hammers `broadcast`/`add_session`/`remove_session` from many tasks at
    /// once across real OS threads and checks the invariants `spec.md` §8
    /// states directly: history never exceeds capacity, and a roster churned
    /// concurrently with broadcasts never ends up with a duplicate session.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_broadcast_and_membership_churn_holds_invariants() {
        let renderer = Arc::new(CountingRenderer {
            calls: AtomicUsize::new(0),
        });
        let room = Arc::new(Room::with_capacities(renderer, 10, 32));

        let mut handles = Vec::new();
        for n in 0..8 {
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    room.broadcast(Message::new("stress", format!("{n}-{i}"))).await;
                }
            }));
        }
        for n in 0..8 {
            let room = room.clone();
            handles.push(tokio::spawn(async move {
                let session = Arc::new(Session::new_for_test(format!("10.0.0.{n}")));
                for _ in 0..10 {
                    if room.add_session(session.clone()).is_ok() {
                        tokio::task::yield_now().await;
                        room.remove_session(&session);
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(room.message_count() <= 10);
        let names = room.roster_names();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(names.len(), sorted.len(), "roster must contain no duplicates");
    }
}
