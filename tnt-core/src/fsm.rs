//! The modal input engine: INSERT/NORMAL/COMMAND/HELP plus the
//! command-output overlay, driven one decoded key at a time. All key
//! dispatch is a function of `(mode, overlay, key)`.

use std::sync::Arc;

use crate::command::{self, Command};
use crate::message::{Message, MessageLog};
use crate::room::Room;
use crate::session::{HelpLang, Mode, Session};
use crate::utf8;

pub const CTRL_C: u8 = 0x03;
pub const BS: u8 = 0x08;
pub const LF: u8 = 0x0A;
pub const CR: u8 = 0x0D;
pub const CTRL_U: u8 = 0x15;
pub const CTRL_W: u8 = 0x17;
pub const ESC: u8 = 0x1B;
pub const DEL: u8 = 0x7F;

/// A single decoded unit of keyboard input, assembled by the transport
/// layer: `Byte` for anything under 0x80 (control bytes and printable
/// ASCII), `Char` for a validated multi-byte UTF-8 sequence, `Invalid` for
/// a sequence that failed UTF-8 validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Byte(u8),
    Char(char),
    Invalid,
}

/// Classifies a single lead byte off the wire. Bytes under 0x80 are
/// complete keys by themselves; 0x80 and above need `byte_length(b) - 1`
/// more bytes from the transport before [`decode_sequence`] can run.
pub fn needs_continuation(lead: u8) -> Option<usize> {
    if lead < 0x80 {
        None
    } else {
        Some(utf8::byte_length(lead).saturating_sub(1))
    }
}

/// Validates and decodes a full multi-byte sequence collected by the
/// transport after a lead byte indicated a continuation was needed.
pub fn decode_sequence(bytes: &[u8]) -> Key {
    let declared_len = bytes.len();
    if !utf8::validate(bytes, declared_len) {
        return Key::Invalid;
    }
    match utf8::decode(bytes) {
        Some((cp, consumed)) if consumed == declared_len => {
            char::from_u32(cp).map(Key::Char).unwrap_or(Key::Invalid)
        }
        _ => Key::Invalid,
    }
}

fn is_printable_ascii(b: u8) -> bool {
    (0x20..=0x7E).contains(&b)
}

/// Message rows visible between the title and status lines for a terminal
/// of `term_height` rows. Shared by the FSM's scroll clamp and the
/// renderer's visible-window slice so the two can never disagree about
/// where "bottom" is.
pub fn visible_body_rows(term_height: u32) -> usize {
    (term_height as usize).saturating_sub(3).max(1)
}

/// What the caller should do after a key has been processed. The caller
/// (the SSH worker loop) owns the actual renderer calls; the FSM only says
/// which one applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Nothing to redraw (e.g. an ignored key, or a submit that was
    /// already rendered to every session -- including this one -- by the
    /// broadcast fan-out).
    None,
    RenderInput,
    RenderMain,
    RenderCommandOutput,
    RenderHelp,
    ClearAndRenderMain,
    Disconnect,
}

/// Appends `key` to `buf` subject to INSERT/COMMAND editing semantics
/// (backspace, Ctrl+W, Ctrl+U, printable ASCII, validated UTF-8). Returns
/// whether the buffer actually changed.
fn edit_buffer(buf: &mut String, key: Key) -> bool {
    match key {
        Key::Byte(BS) | Key::Byte(DEL) => {
            let trimmed = utf8::erase_last_char(buf).to_string();
            let changed = trimmed.len() != buf.len();
            *buf = trimmed;
            changed
        }
        Key::Byte(CTRL_W) => {
            let trimmed = utf8::erase_last_word(buf).to_string();
            let changed = trimmed.len() != buf.len();
            *buf = trimmed;
            changed
        }
        Key::Byte(CTRL_U) => {
            let changed = !buf.is_empty();
            buf.clear();
            changed
        }
        Key::Byte(b) if is_printable_ascii(b) => {
            buf.push(b as char);
            true
        }
        Key::Char(c) => {
            buf.push(c);
            true
        }
        _ => false,
    }
}

/// Entry point used while reading the one-shot username line before the
/// session has joined the room. Shares INSERT's editing rules.
pub fn edit_username_buffer(buf: &mut String, key: Key) -> bool {
    edit_buffer(buf, key)
}

/// Processes one decoded key against `session`'s current mode, mutating
/// its UI state and, when INSERT submits a message or COMMAND dispatches
/// one, calling through to `room`/`log`. Never disconnects except on
/// Ctrl+C in NORMAL mode.
pub async fn handle_key(
    session: &Arc<Session>,
    room: &Room,
    log: &MessageLog,
    key: Key,
) -> KeyOutcome {
    {
        let mut ui = session.ui();
        if ui.command_output_active {
            ui.command_output_active = false;
            ui.mode = Mode::Normal;
            return KeyOutcome::RenderMain;
        }

        if key == Key::Byte(CTRL_C) {
            return match ui.mode {
                Mode::Normal => KeyOutcome::Disconnect,
                Mode::Insert => {
                    ui.input.clear();
                    ui.mode = Mode::Normal;
                    KeyOutcome::RenderMain
                }
                Mode::Command => {
                    ui.command_input.clear();
                    ui.mode = Mode::Normal;
                    KeyOutcome::RenderMain
                }
                Mode::Help => {
                    ui.mode = Mode::Normal;
                    KeyOutcome::RenderMain
                }
            };
        }
    }

    let mode = session.ui().mode;
    match mode {
        Mode::Insert => handle_insert(session, room, log, key).await,
        Mode::Normal => handle_normal(session, room, key),
        Mode::Command => handle_command(session, room, key),
        Mode::Help => handle_help(session, key),
    }
}

async fn handle_insert(
    session: &Arc<Session>,
    room: &Room,
    log: &MessageLog,
    key: Key,
) -> KeyOutcome {
    if key == Key::Byte(ESC) {
        let mut ui = session.ui();
        ui.mode = Mode::Normal;
        ui.scroll_pos = 0;
        return KeyOutcome::RenderMain;
    }

    if key == Key::Byte(CR) || key == Key::Byte(LF) {
        let content = {
            let mut ui = session.ui();
            if ui.input.is_empty() {
                return KeyOutcome::None;
            }
            std::mem::take(&mut ui.input)
        };
        let username = session.display_name();
        let msg = Message::new(username, content);
        room.broadcast(msg.clone()).await;
        let _ = log.append(&msg);
        // Every connected session, including this one, was already
        // re-rendered by the broadcast fan-out.
        return KeyOutcome::None;
    }

    let mut ui = session.ui();
    if edit_buffer(&mut ui.input, key) {
        KeyOutcome::RenderInput
    } else {
        KeyOutcome::None
    }
}

fn handle_normal(session: &Arc<Session>, room: &Room, key: Key) -> KeyOutcome {
    let Key::Byte(b) = key else {
        return KeyOutcome::None;
    };
    // Locking discipline: room lock before session lock, never the other
    // way around (see §5). `message_count` takes and releases the room's
    // read lock here, before `session.ui()` takes the per-session lock
    // below, so the two never nest in the forbidden order.
    let history_len = room.message_count();
    let mut ui = session.ui();
    match b {
        b'i' => {
            ui.mode = Mode::Insert;
            KeyOutcome::RenderMain
        }
        b':' => {
            ui.mode = Mode::Command;
            ui.command_input.clear();
            KeyOutcome::RenderMain
        }
        b'j' => {
            let max_scroll = history_len.saturating_sub(visible_body_rows(ui.term_height));
            ui.scroll_pos = ui.scroll_pos.saturating_add(1).min(max_scroll);
            KeyOutcome::RenderMain
        }
        b'k' => {
            ui.scroll_pos = ui.scroll_pos.saturating_sub(1);
            KeyOutcome::RenderMain
        }
        b'g' => {
            // Top: scroll fully toward the oldest message.
            ui.scroll_pos = history_len.saturating_sub(visible_body_rows(ui.term_height));
            KeyOutcome::RenderMain
        }
        b'G' => {
            ui.scroll_pos = 0;
            KeyOutcome::RenderMain
        }
        b'?' => {
            ui.mode = Mode::Help;
            ui.help_scroll_pos = 0;
            KeyOutcome::RenderHelp
        }
        _ => KeyOutcome::None,
    }
}

fn handle_command(session: &Arc<Session>, room: &Room, key: Key) -> KeyOutcome {
    if key == Key::Byte(ESC) {
        let mut ui = session.ui();
        ui.mode = Mode::Normal;
        return KeyOutcome::RenderMain;
    }

    if key == Key::Byte(CR) || key == Key::Byte(LF) {
        let input = {
            let ui = session.ui();
            ui.command_input.clone()
        };
        let cmd = command::parse(&input);
        if cmd == Command::Empty {
            let mut ui = session.ui();
            ui.mode = Mode::Normal;
            return KeyOutcome::RenderMain;
        }
        let output = command::render_output(&cmd, room, session).unwrap_or_default();
        let mut ui = session.ui();
        ui.command_output = output;
        ui.command_output_active = true;
        ui.mode = Mode::Normal;
        return KeyOutcome::RenderCommandOutput;
    }

    let mut ui = session.ui();
    if edit_buffer(&mut ui.command_input, key) {
        KeyOutcome::RenderInput
    } else {
        KeyOutcome::None
    }
}

fn handle_help(session: &Arc<Session>, key: Key) -> KeyOutcome {
    let Key::Byte(b) = key else {
        return KeyOutcome::None;
    };
    let mut ui = session.ui();
    match b {
        b'q' | ESC => {
            ui.mode = Mode::Normal;
            KeyOutcome::RenderMain
        }
        b'j' => {
            ui.help_scroll_pos = ui.help_scroll_pos.saturating_add(1);
            KeyOutcome::RenderHelp
        }
        b'k' => {
            ui.help_scroll_pos = ui.help_scroll_pos.saturating_sub(1);
            KeyOutcome::RenderHelp
        }
        b'g' => {
            ui.help_scroll_pos = 0;
            KeyOutcome::RenderHelp
        }
        b'G' => {
            ui.help_scroll_pos = usize::MAX;
            KeyOutcome::RenderHelp
        }
        b'e' | b'E' => {
            ui.help_lang = HelpLang::English;
            ui.help_scroll_pos = 0;
            KeyOutcome::RenderHelp
        }
        b'z' | b'Z' => {
            ui.help_lang = HelpLang::Chinese;
            ui.help_scroll_pos = 0;
            KeyOutcome::RenderHelp
        }
        _ => KeyOutcome::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::Renderer;
    use async_trait::async_trait;
    use std::sync::Arc as StdArc;

    struct NullRenderer;
    #[async_trait]
    impl Renderer for NullRenderer {
        async fn render_main(&self, _room: &Room, _session: &StdArc<Session>) {}
        async fn render_input(&self, _session: &StdArc<Session>, _input_bytes: &[u8]) {}
        async fn render_command_output(&self, _session: &StdArc<Session>) {}
        async fn render_help(&self, _session: &StdArc<Session>) {}
        async fn clear_screen(&self, _session: &StdArc<Session>) {}
    }

    fn test_room() -> Room {
        Room::new(StdArc::new(NullRenderer))
    }

    fn test_log() -> MessageLog {
        let mut p = std::env::temp_dir();
        p.push(format!("tnt-fsm-test-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&p);
        MessageLog::new(p)
    }

    #[tokio::test]
    async fn insert_mode_submits_on_enter_and_clears_buffer() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        let room = test_room();
        let log = test_log();
        room.add_session(session.clone()).unwrap();

        for b in b"hello" {
            handle_key(&session, &room, &log, Key::Byte(*b)).await;
        }
        assert_eq!(session.ui().input, "hello");

        let outcome = handle_key(&session, &room, &log, Key::Byte(CR)).await;
        assert_eq!(outcome, KeyOutcome::None);
        assert_eq!(session.ui().input, "");
        assert_eq!(room.message_count(), 1);
        assert_eq!(room.get_message(0).unwrap().content, "hello");
    }

    #[tokio::test]
    async fn normal_mode_scroll_is_bounded_by_history_and_visible_height() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        session.set_term_size(80, 5); // visible_body_rows(5) == 2
        let room = test_room();
        let log = test_log();
        for i in 0..10 {
            room.broadcast(Message::new("a", format!("msg {i}"))).await;
        }
        session.ui().mode = Mode::Normal;

        // `j` (scroll older) must stop at history_len - visible_body_rows,
        // not grow unboundedly.
        for _ in 0..50 {
            handle_key(&session, &room, &log, Key::Byte(b'j')).await;
        }
        assert_eq!(session.ui().scroll_pos, 8);

        // `k` (scroll newer) from the clamped top must reach 0 in exactly
        // that many presses, not take an astronomical number of them.
        for _ in 0..8 {
            handle_key(&session, &room, &log, Key::Byte(b'k')).await;
        }
        assert_eq!(session.ui().scroll_pos, 0);

        // `g` (top) jumps straight to the same bound `j` saturates at.
        handle_key(&session, &room, &log, Key::Byte(b'g')).await;
        assert_eq!(session.ui().scroll_pos, 8);
    }

    #[tokio::test]
    async fn ctrl_c_in_normal_mode_disconnects() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        session.ui().mode = Mode::Normal;
        let room = test_room();
        let log = test_log();
        let outcome = handle_key(&session, &room, &log, Key::Byte(CTRL_C)).await;
        assert_eq!(outcome, KeyOutcome::Disconnect);
    }

    #[tokio::test]
    async fn ctrl_c_in_insert_mode_returns_to_normal_and_clears() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        let room = test_room();
        let log = test_log();
        handle_key(&session, &room, &log, Key::Byte(b'h')).await;
        let outcome = handle_key(&session, &room, &log, Key::Byte(CTRL_C)).await;
        assert_eq!(outcome, KeyOutcome::RenderMain);
        assert_eq!(session.ui().mode, Mode::Normal);
        assert_eq!(session.ui().input, "");
    }

    #[tokio::test]
    async fn command_list_opens_overlay_then_any_key_dismisses() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        let room = test_room();
        let log = test_log();
        room.add_session(session.clone()).unwrap();

        session.ui().mode = Mode::Normal;
        handle_key(&session, &room, &log, Key::Byte(b':')).await;
        assert_eq!(session.ui().mode, Mode::Command);
        for b in b"list" {
            handle_key(&session, &room, &log, Key::Byte(*b)).await;
        }
        let outcome = handle_key(&session, &room, &log, Key::Byte(CR)).await;
        assert_eq!(outcome, KeyOutcome::RenderCommandOutput);
        assert!(session.ui().command_output_active);
        assert!(session.ui().command_output.contains("(you)"));

        let outcome = handle_key(&session, &room, &log, Key::Byte(b'x')).await;
        assert_eq!(outcome, KeyOutcome::RenderMain);
        assert!(!session.ui().command_output_active);
        assert_eq!(session.ui().mode, Mode::Normal);
    }

    #[tokio::test]
    async fn empty_command_silently_returns_to_normal() {
        let session = Arc::new(Session::new_for_test("1.1.1.1"));
        let room = test_room();
        let log = test_log();
        session.ui().mode = Mode::Command;
        let outcome = handle_key(&session, &room, &log, Key::Byte(CR)).await;
        assert_eq!(outcome, KeyOutcome::RenderMain);
        assert!(!session.ui().command_output_active);
    }

    #[test]
    fn needs_continuation_for_multibyte_lead() {
        assert_eq!(needs_continuation(b'a'), None);
        assert_eq!(needs_continuation(0xE4), Some(2));
    }

    #[test]
    fn decode_sequence_validates_and_decodes() {
        assert_eq!(decode_sequence(&[0xE4, 0xB8, 0xAD]), Key::Char('中'));
        assert_eq!(decode_sequence(&[0x80]), Key::Invalid);
    }
}
