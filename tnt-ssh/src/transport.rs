use std::fmt;

use russh::ChannelId;
use tnt_core::Transport;

use crate::channel_writer::ChannelWriter;

/// The SSH-channel-backed [`Transport`] a [`tnt_core::Session`] owns.
/// `close` is fire-and-forget: it hands the teardown to the
/// [`ChannelWriter`]'s background task, closing the channel and then
/// disconnecting the session, in that order.
pub struct SshTransport {
    writer: ChannelWriter,
    channel: ChannelId,
}

impl SshTransport {
    pub fn new(writer: ChannelWriter, channel: ChannelId) -> Self {
        Self { writer, channel }
    }

    pub fn writer(&self) -> &ChannelWriter {
        &self.writer
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

impl fmt::Debug for SshTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SshTransport({:?})", self.channel)
    }
}

impl Transport for SshTransport {
    fn close(&self) {
        self.writer.close(self.channel);
    }

    fn write(&self, data: &[u8]) {
        self.writer.write(self.channel, russh::CryptoVec::from(data.to_vec()));
    }
}
