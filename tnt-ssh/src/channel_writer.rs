//! Sequences writes to a channel on a background task so a renderer never
//! blocks the caller on a slow remote peer, and so `Session::close` (which
//! cannot itself be async) has somewhere to hand off the teardown.

use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Op {
    Data(ChannelId, CryptoVec),
    Close(ChannelId),
}

#[derive(Debug)]
pub struct ChannelWriter {
    tx: mpsc::UnboundedSender<Op>,
}

impl ChannelWriter {
    pub fn new(handle: Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Op>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    Op::Data(channel, data) => {
                        let _ = handle.data(channel, data).await;
                    }
                    Op::Close(channel) => {
                        let _ = handle.close(channel).await;
                        let _ = handle
                            .disconnect(russh::Disconnect::ByApplication, "".into(), "".into())
                            .await;
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn write(&self, channel: ChannelId, data: CryptoVec) {
        let _ = self.tx.send(Op::Data(channel, data));
    }

    pub fn close(&self, channel: ChannelId) {
        let _ = self.tx.send(Op::Close(channel));
    }
}
