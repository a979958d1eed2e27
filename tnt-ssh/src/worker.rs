//! Per-connection negotiation and the interactive session worker loop.
//!
//! Negotiation drives the event stream coming out of [`ServerHandler`]
//! until authentication has succeeded, a channel is open, and either a
//! shell or an exec request has landed -- or 30 seconds pass, whichever
//! comes first. A successful shell negotiation hands off to the FSM-driven
//! read loop; exec is a minimal side channel that never touches the room.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use russh::server::Handle;
use russh::ChannelId;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use tnt_core::fsm::{self, Key, KeyOutcome};
use tnt_core::{username, Message, Session, SYSTEM_AUTHOR};

use crate::channel_writer::ChannelWriter;
use crate::common::PtyInfo;
use crate::handler::HandlerEvent;
use crate::transport::SshTransport;
use crate::AppState;

const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(30);
const USERNAME_TIMEOUT: Duration = Duration::from_secs(60);
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Decrements the global session counter and releases this peer's per-IP
/// connection slot exactly once, on drop, regardless of which path out of
/// this module is taken.
struct SessionCounterGuard(Arc<AppState>, String);

impl Drop for SessionCounterGuard {
    fn drop(&mut self) {
        self.0.session_count.fetch_sub(1, Ordering::SeqCst);
        self.0.per_ip_connections.release(&self.1);
    }
}

/// Buffers bytes delivered as `Data` events so the FSM can be driven one
/// byte -- or one validated UTF-8 sequence -- at a time, the same way it
/// would off a blocking read.
struct ByteFeed<'a> {
    pending: std::collections::VecDeque<u8>,
    rx: &'a mut UnboundedReceiver<HandlerEvent>,
    channel: ChannelId,
}

enum FeedEvent {
    Byte(u8),
    Timeout,
    Closed,
}

impl<'a> ByteFeed<'a> {
    fn new(rx: &'a mut UnboundedReceiver<HandlerEvent>, channel: ChannelId) -> Self {
        Self {
            pending: std::collections::VecDeque::new(),
            rx,
            channel,
        }
    }

    async fn next_byte(&mut self, timeout: Duration) -> FeedEvent {
        if let Some(b) = self.pending.pop_front() {
            return FeedEvent::Byte(b);
        }
        loop {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Err(_) => return FeedEvent::Timeout,
                Ok(None) => return FeedEvent::Closed,
                Ok(Some(HandlerEvent::Data(id, data))) if id == self.channel => {
                    self.pending.extend(data.iter().copied());
                    if let Some(b) = self.pending.pop_front() {
                        return FeedEvent::Byte(b);
                    }
                }
                Ok(Some(HandlerEvent::ChannelClose(id))) if id == self.channel => {
                    return FeedEvent::Closed
                }
                Ok(Some(HandlerEvent::ChannelEof(id))) if id == self.channel => {
                    return FeedEvent::Closed
                }
                Ok(Some(HandlerEvent::Disconnect)) => return FeedEvent::Closed,
                Ok(Some(_)) => continue,
            }
        }
    }

    /// Reads one decoded [`Key`]: a single byte under 0x80, or a validated
    /// multi-byte UTF-8 sequence assembled from however many continuation
    /// bytes `byte_length` calls for. A lead-byte read that times out is
    /// reported to the caller as [`NextKey::TimedOut`] rather than retried
    /// silently, so liveness callers can loop on it while the username
    /// reader can treat it as an expiry.
    async fn next_key(&mut self, timeout: Duration) -> NextKey {
        match self.next_byte(timeout).await {
            FeedEvent::Timeout => NextKey::TimedOut,
            FeedEvent::Closed => NextKey::Closed,
            FeedEvent::Byte(lead) => match fsm::needs_continuation(lead) {
                None => NextKey::Key(Key::Byte(lead)),
                Some(extra) => {
                    let mut seq = vec![lead];
                    while seq.len() < 1 + extra {
                        match self.next_byte(timeout).await {
                            FeedEvent::Byte(b) => seq.push(b),
                            FeedEvent::Timeout => continue,
                            FeedEvent::Closed => return NextKey::Closed,
                        }
                    }
                    NextKey::Key(fsm::decode_sequence(&seq))
                }
            },
        }
    }
}

/// Outcome of reading one key off the wire: a decoded key, a liveness
/// timeout with no data (the caller decides whether that means "keep
/// waiting" or "give up"), or the channel closing for good.
enum NextKey {
    Key(Key),
    TimedOut,
    Closed,
}

struct Negotiated {
    handle: Handle,
    channel: ChannelId,
    pty: PtyInfo,
    exec: Option<Bytes>,
}

async fn negotiate(event_rx: &mut UnboundedReceiver<HandlerEvent>) -> Option<Negotiated> {
    let deadline = Instant::now() + NEGOTIATION_TIMEOUT;
    let mut handle = None;
    let mut channel = None;
    let mut pty = PtyInfo::default();
    let mut shell_ready = false;
    let mut exec = None;

    loop {
        if handle.is_some() && channel.is_some() && (shell_ready || exec.is_some()) {
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("session establishment timed out");
            return None;
        }
        match tokio::time::timeout(remaining, event_rx.recv()).await {
            Err(_) => {
                warn!("session establishment timed out");
                return None;
            }
            Ok(None) | Ok(Some(HandlerEvent::Disconnect)) => return None,
            Ok(Some(event)) => match event {
                HandlerEvent::Authenticated(h) => handle = Some(h),
                HandlerEvent::ChannelOpenSession(id, tx) => {
                    channel = Some(id);
                    let _ = tx.send(true);
                }
                HandlerEvent::PtyRequest(_, info) | HandlerEvent::WindowChange(_, info) => {
                    pty = info;
                }
                HandlerEvent::ShellRequest(id, tx) => {
                    let ok = channel == Some(id);
                    shell_ready = ok;
                    let _ = tx.send(ok);
                }
                HandlerEvent::ExecRequest(id, data, tx) => {
                    let ok = channel == Some(id);
                    if ok {
                        exec = Some(data);
                    }
                    let _ = tx.send(ok);
                }
                HandlerEvent::ChannelClose(_) | HandlerEvent::ChannelEof(_) => return None,
                HandlerEvent::Data(_, _) => {}
            },
        }
    }

    Some(Negotiated {
        handle: handle?,
        channel: channel?,
        pty,
        exec,
    })
}

pub async fn run(state: Arc<AppState>, peer_ip: String, mut event_rx: UnboundedReceiver<HandlerEvent>) {
    let _guard = SessionCounterGuard(state.clone(), peer_ip.clone());

    let Some(negotiated) = negotiate(&mut event_rx).await else {
        debug!(%peer_ip, "session establishment did not complete");
        return;
    };

    if let Some(cmd) = negotiated.exec {
        run_exec(negotiated.handle, negotiated.channel, &cmd).await;
        return;
    }

    run_interactive(
        state,
        peer_ip,
        negotiated.handle,
        negotiated.channel,
        negotiated.pty,
        event_rx,
    )
    .await;
}

async fn run_exec(handle: Handle, channel: ChannelId, cmd: &[u8]) {
    let writer = ChannelWriter::new(handle.clone());
    if cmd == b"exit" {
        let _ = handle.exit_status_request(channel, 0).await;
    } else {
        writer.write(channel, russh::CryptoVec::from(&b"unsupported exec command\r\n"[..]));
        let _ = handle.exit_status_request(channel, 1).await;
    }
    let _ = handle.eof(channel).await;
    writer.close(channel);
}

async fn run_interactive(
    state: Arc<AppState>,
    peer_ip: String,
    handle: Handle,
    channel: ChannelId,
    pty: PtyInfo,
    mut event_rx: UnboundedReceiver<HandlerEvent>,
) {
    let writer = ChannelWriter::new(handle);
    let transport = Box::new(SshTransport::new(writer, channel));
    let session = Arc::new(Session::new(peer_ip.clone(), transport));
    session.set_term_size(pty.col_width, pty.row_height);

    let mut feed = ByteFeed::new(&mut event_rx, channel);

    let Some(display_name) = read_username(&session, &mut feed).await else {
        debug!(%peer_ip, "username entry timed out or disconnected");
        return;
    };
    {
        let mut ui = session.ui();
        ui.display_name = display_name;
    }

    if state.room.add_session(session.clone()).is_err() {
        session.write(b"\r\nroom is full, disconnecting\r\n");
        return;
    }

    let join_msg = Message::new(SYSTEM_AUTHOR, format!("{} joined the room", session.display_name()));
    // The broadcast fan-out already renders to every session in the
    // post-append roster snapshot, including this one -- it was added to
    // the roster just above, so no separate initial render is needed.
    state.room.broadcast(join_msg).await;

    loop {
        let key = match feed.next_key(LIVENESS_TIMEOUT).await {
            NextKey::Key(k) => k,
            NextKey::TimedOut => {
                if session.connected() {
                    continue;
                }
                break;
            }
            NextKey::Closed => break,
        };
        if !session.connected() {
            break;
        }
        let outcome = fsm::handle_key(&session, &state.room, &state.log, key).await;
        match outcome {
            KeyOutcome::None => {}
            KeyOutcome::RenderInput => {
                let input = {
                    let ui = session.ui();
                    match ui.mode {
                        tnt_core::Mode::Command => ui.command_input.clone(),
                        _ => ui.input.clone(),
                    }
                };
                state.renderer.render_input(&session, input.as_bytes()).await;
            }
            KeyOutcome::RenderMain | KeyOutcome::ClearAndRenderMain => {
                if matches!(outcome, KeyOutcome::ClearAndRenderMain) {
                    state.renderer.clear_screen(&session).await;
                }
                state.renderer.render_main(&state.room, &session).await;
            }
            KeyOutcome::RenderCommandOutput => {
                state.renderer.render_command_output(&session).await;
            }
            KeyOutcome::RenderHelp => {
                state.renderer.render_help(&session).await;
            }
            KeyOutcome::Disconnect => break,
        }
    }

    session.mark_disconnected();
    let leave_msg = Message::new(SYSTEM_AUTHOR, format!("{} left the room", session.display_name()));
    state.room.broadcast(leave_msg).await;
    state.room.remove_session(&session);
    info!(peer = %session.peer_addr, "session ended");
}

/// Reads the one-shot username line with INSERT's editing rules. A 60s
/// read timeout is treated as a disconnect -- `None` -- rather than falling
/// through to `anonymous`, so the caller never joins a session that never
/// finished naming itself. A rejected name still becomes `anonymous`, with
/// a short fixed delay to slow a retry.
async fn read_username(session: &Arc<Session>, feed: &mut ByteFeed<'_>) -> Option<String> {
    let mut buf = String::new();
    loop {
        let key = match feed.next_key(USERNAME_TIMEOUT).await {
            NextKey::Key(k) => k,
            NextKey::TimedOut => return None,
            NextKey::Closed => return None,
        };
        match key {
            Key::Byte(fsm::CR) | Key::Byte(fsm::LF) => break,
            other => {
                if fsm::edit_username_buffer(&mut buf, other) {
                    session.write(format!("\r\x1b[Kname: {buf}").as_bytes());
                }
            }
        }
    }

    let (name, accepted) = username::resolve(&buf);
    if !accepted {
        session.write(b"\r\ninvalid name, using 'anonymous'\r\n");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Some(name)
}
