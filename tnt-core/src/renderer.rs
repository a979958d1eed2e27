//! The interface the room and FSM invoke to drive the terminal UI. The
//! implementation (escape sequences, line composition, help text) is an
//! external collaborator; the core only ever calls these five hooks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::room::Room;
use crate::session::Session;

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Draws title, visible message window, separator, and status/input
    /// line. Implementations must take a room read lock to copy the
    /// visible slice, release it, and only then write to the channel.
    async fn render_main(&self, room: &Room, session: &Arc<Session>);

    /// Updates only the input line, given the raw bytes currently in the
    /// buffer (so the renderer can re-derive cursor position/width itself).
    async fn render_input(&self, session: &Arc<Session>, input_bytes: &[u8]);

    /// Draws the command-output overlay from `session`'s command output
    /// buffer.
    async fn render_command_output(&self, session: &Arc<Session>);

    /// Draws the help overlay using the session's help language and help
    /// scroll position.
    async fn render_help(&self, session: &Arc<Session>);

    async fn clear_screen(&self, session: &Arc<Session>);
}
