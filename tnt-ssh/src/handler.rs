//! The `russh::server::Handler` implementation. Trait callbacks never hold
//! application state themselves; each one forwards an event over an
//! unbounded channel to the per-connection negotiator/worker task and,
//! where the protocol needs an answer, waits on a oneshot reply.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tracing::debug;

use crate::common::PtyInfo;
use crate::AppState;

#[derive(Debug)]
pub enum HandlerEvent {
    Authenticated(russh::server::Handle),
    ChannelOpenSession(ChannelId, oneshot::Sender<bool>),
    PtyRequest(ChannelId, PtyInfo),
    ShellRequest(ChannelId, oneshot::Sender<bool>),
    ExecRequest(ChannelId, Bytes, oneshot::Sender<bool>),
    WindowChange(ChannelId, PtyInfo),
    Data(ChannelId, Bytes),
    ChannelClose(ChannelId),
    ChannelEof(ChannelId),
    Disconnect,
}

pub struct ServerHandler {
    pub state: Arc<AppState>,
    pub peer_ip: String,
    pub event_tx: UnboundedSender<HandlerEvent>,
    auth_attempts: AtomicU8,
    channel_opened: std::sync::atomic::AtomicBool,
}

impl ServerHandler {
    pub fn new(state: Arc<AppState>, peer_ip: String, event_tx: UnboundedSender<HandlerEvent>) -> Self {
        Self {
            state,
            peer_ip,
            event_tx,
            auth_attempts: AtomicU8::new(0),
            channel_opened: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn send(&self, event: HandlerEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl russh::server::Handler for ServerHandler {
    type Error = anyhow::Error;

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        self.send(HandlerEvent::Authenticated(session.handle()));
        Ok(())
    }

    async fn auth_password(&mut self, _user: &str, password: &str) -> Result<Auth, Self::Error> {
        let attempts = self.auth_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > 3 {
            return Ok(Auth::Reject {
                proceed_with_methods: None,
            });
        }

        let accepted = match self.state.config.access_token.as_deref() {
            Some(token) => password == token,
            None => true,
        };

        if accepted {
            return Ok(Auth::Accept);
        }

        if self.state.config.rate_limit_enabled {
            self.state.rate_limiter.record_auth_failure(&self.peer_ip);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Auth::Reject {
            proceed_with_methods: None,
        })
    }

    async fn auth_none(&mut self, _user: &str) -> Result<Auth, Self::Error> {
        if self.state.config.token_required() {
            return Ok(Auth::Reject {
                proceed_with_methods: None,
            });
        }
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if self.channel_opened.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ChannelOpenSession(channel.id(), tx));
        Ok(rx.await.unwrap_or(false))
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.send(HandlerEvent::PtyRequest(
            channel,
            PtyInfo::from_request(col_width, row_height),
        ));
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.send(HandlerEvent::WindowChange(
            channel,
            PtyInfo::from_request(col_width, row_height),
        ));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ShellRequest(channel, tx));
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let (tx, rx) = oneshot::channel();
        self.send(HandlerEvent::ExecRequest(channel, Bytes::from(data.to_vec()), tx));
        if rx.await.unwrap_or(false) {
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.send(HandlerEvent::Data(channel, Bytes::from(data.to_vec())));
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.send(HandlerEvent::ChannelClose(channel));
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.send(HandlerEvent::ChannelEof(channel));
        Ok(())
    }
}

impl Drop for ServerHandler {
    fn drop(&mut self) {
        debug!(peer = %self.peer_ip, "ssh handler dropped");
        let _ = self.event_tx.send(HandlerEvent::Disconnect);
    }
}
