use bytes::Bytes;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use crate::codec::PacketEncode;
use crate::codes::{msg, open};
use crate::error::{Result, Error};
use super::channel_kind::ChannelKind;
use super::channel_state::{ChannelCore, ChannelState, CoreInit, RemoteParams};
use super::conn::Conn;

/// Number of events that may be buffered for a [`ChannelReceiver`].
pub(super) const EVENT_QUEUE_LEN: usize = 32;

/// Handle to an SSH channel.
///
/// Use this object to send requests and data to the server over an SSH channel (RFC 4254,
/// section 5). To receive events and data from the server, use the matching
/// [`ChannelReceiver`]. Channels are opened with [`Client::open_channel()`][super::Client::open_channel()]
/// or one of its shorthands, or obtained from [`AcceptChannel::accept()`].
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Channel {
    pub(super) core: Arc<ChannelCore>,
}

impl Channel {
    /// Send channel data to the server.
    ///
    /// This sends a series of `SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA` (depending
    /// on `data_type`). We split `data` into fragments that fit into the maximum packet size of
    /// the server. With [`ChannelConfig::strict_send_window`], we also wait until the server gives
    /// us enough window.
    ///
    /// Returns [`Error::ChannelClosed`] if you already sent EOF or if the channel is closed.
    pub async fn send_data(&self, data: Bytes, data_type: DataType) -> Result<()> {
        self.core.send_data(data, data_type).await
    }

    /// Send end-of-file marker to the server (`SSH_MSG_CHANNEL_EOF`).
    ///
    /// You cannot send more data after this. Sending EOF twice does nothing.
    pub async fn send_eof(&self) -> Result<()> {
        self.core.send_eof().await
    }

    /// Close the channel.
    ///
    /// This sends `SSH_MSG_CHANNEL_CLOSE` and the channel becomes closed after the server
    /// responds with the same message. Use [`wait_closed()`][Self::wait_closed()] to wait for
    /// that.
    ///
    /// This method is idempotent: if the channel is already closed or closing, we do nothing.
    pub fn close(&self) -> Result<()> {
        self.core.close()
    }

    /// Wait until the channel is closed (by us, by the server or because the connection was
    /// closed).
    pub async fn wait_closed(&self) {
        self.core.wait_closed().await
    }

    /// Returns true if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.core.state() == ChannelState::Closed
    }

    /// Send a raw request to the server (`SSH_MSG_CHANNEL_REQUEST`, RFC 4254, section 5.4).
    ///
    /// If `want_reply` is set, we wait for the reply and return [`Error::ChannelReq`] if the
    /// server refused the request. Requests on one channel are serialized: this waits until the
    /// reply to the previous request was received.
    pub async fn request(&self, request_type: &str, request_data: &[u8], want_reply: bool) -> Result<()> {
        self.core.request(request_type, request_data, want_reply).await
    }

    /// Pass an environment variable to the future process (RFC 4254, section 6.4).
    pub async fn env(&self, name: &str, value: &[u8]) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(name);
        payload.put_bytes(value);
        self.request("env", &payload.finish(), true).await
    }

    /// Request a pseudo-terminal (RFC 4254, section 6.2).
    pub async fn request_pty(&self, pty: &PtyRequest) -> Result<()> {
        self.request("pty-req", &pty.encode(), true).await
    }

    /// Request forwarding of the authentication agent (`auth-agent-req@openssh.com`).
    ///
    /// The server may then open `auth-agent@openssh.com` channels, which you receive as
    /// [`ClientEvent::ChannelOpen`][super::ClientEvent::ChannelOpen].
    pub async fn request_agent_forwarding(&self) -> Result<()> {
        self.request("auth-agent-req@openssh.com", &[], true).await
    }

    /// Start the user's default shell (RFC 4254, section 6.5).
    pub async fn shell(&self) -> Result<()> {
        self.request("shell", &[], true).await
    }

    /// Execute a command (RFC 4254, section 6.5).
    pub async fn exec(&self, command: &[u8]) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_bytes(command);
        self.request("exec", &payload.finish(), true).await
    }

    /// Start a subsystem, such as `"sftp"` (RFC 4254, section 6.5).
    pub async fn subsystem(&self, name: &str) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(name);
        self.request("subsystem", &payload.finish(), true).await
    }

    /// Notify the server that the terminal size changed (RFC 4254, section 6.7).
    pub async fn window_change(&self, size: WindowSize) -> Result<()> {
        let mut payload = PacketEncode::new();
        size.encode(&mut payload);
        self.request("window-change", &payload.finish(), false).await
    }

    /// Send a BREAK of `length_ms` milliseconds (RFC 4335).
    pub async fn send_break(&self, length_ms: u32) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_u32(length_ms);
        self.request("break", &payload.finish(), true).await
    }

    /// Deliver a signal to the remote process (RFC 4254, section 6.9).
    ///
    /// See [`codes::signal`][crate::codes::signal] for signal names.
    pub async fn signal(&self, signal_name: &str) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(signal_name);
        self.request("signal", &payload.finish(), false).await
    }
}


/// Receiving half of a [`Channel`].
///
/// [`ChannelReceiver`] produces [`ChannelEvent`]s, which correspond to the data and requests sent
/// by the server on the channel. You **must** receive the events, otherwise the client will stall
/// when the internal buffer of events fills up. If you drop the receiver, the events are
/// discarded.
#[derive(Debug)]
pub struct ChannelReceiver {
    pub(super) event_rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the channel was closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.event_rx.recv().await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ChannelEvent>> {
        self.event_rx.poll_recv(cx)
    }
}


/// An event returned from [`ChannelReceiver`].
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// Data received from the server (`SSH_MSG_CHANNEL_DATA` or
    /// `SSH_MSG_CHANNEL_EXTENDED_DATA`).
    ///
    /// You should handle this data as a byte stream, the boundaries between consecutive `Data`
    /// events might be arbitrary.
    Data(Bytes, DataType),

    /// The server will not send more data (`SSH_MSG_CHANNEL_EOF`).
    Eof,

    /// The remote process terminated with given exit status.
    ExitStatus(u32),

    /// The remote process terminated violently due to a signal.
    ExitSignal(ExitSignal),
}

/// Information about a process that terminated due to a signal.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    /// Name of the signal that terminated the process.
    ///
    /// [`codes::signal`][crate::codes::signal] lists the signal names defined by SSH.
    pub signal_name: String,
    /// True if the process produced a core dump.
    pub core_dumped: bool,
    /// Error message.
    pub message: String,
    /// Language tag of `message` (per RFC 3066).
    pub message_lang: String,
}


/// Type of data sent over an SSH channel.
///
/// In practice, the only two data types used are `DataType::Standard` ([`DATA_STANDARD`]) and
/// `DataType::Extended(1)` ([`DATA_STDERR`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Standard channel data sent using `SSH_MSG_CHANNEL_DATA`.
    Standard,
    /// Extended channel data sent using `SSH_MSG_CHANNEL_EXTENDED_DATA`.
    Extended(u32),
}

/// Shorthand for `DataType::Standard`.
pub const DATA_STANDARD: DataType = DataType::Standard;

/// Shorthand for `DataType::Extended(1)`.
pub const DATA_STDERR: DataType = DataType::Extended(1);


/// Configuration of a channel.
#[derive(Debug, Copy, Clone)]
#[non_exhaustive]
pub struct ChannelConfig {
    /// The window that we advertise to the server, in bytes.
    pub window_size: u32,
    /// The maximum packet size that we are willing to receive.
    pub max_packet_size: u32,
    /// If true (the default), we never send more data than the window granted by the server and
    /// wait for `SSH_MSG_CHANNEL_WINDOW_ADJUST` when the window is exhausted.
    ///
    /// If false, we send the data even if the server did not give us enough window.
    pub strict_send_window: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            window_size: 1 << 20,
            max_packet_size: 32 << 10,
            strict_send_window: true,
        }
    }
}

impl ChannelConfig {
    /// Mutate `self` in a closure.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}


/// Dimensions of a terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct WindowSize {
    /// Width in characters.
    pub width_chars: u32,
    /// Height in rows.
    pub height_rows: u32,
    /// Width in pixels (may be 0).
    pub width_px: u32,
    /// Height in pixels (may be 0).
    pub height_px: u32,
}

impl WindowSize {
    fn encode(&self, payload: &mut PacketEncode) {
        payload.put_u32(self.width_chars);
        payload.put_u32(self.height_rows);
        payload.put_u32(self.width_px);
        payload.put_u32(self.height_px);
    }
}

/// Request for a pseudo-terminal (`pty-req`, RFC 4254, section 6.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value of the `TERM` environment variable, such as `"xterm"`.
    pub term: String,
    /// Initial size of the terminal.
    pub size: WindowSize,
    /// Terminal modes as `(opcode, argument)` pairs (RFC 4254, section 8).
    pub modes: Vec<(u8, u32)>,
}

impl PtyRequest {
    pub(super) fn encode(&self) -> Bytes {
        let mut modes = PacketEncode::new();
        for &(opcode, arg) in self.modes.iter() {
            modes.put_u8(opcode);
            modes.put_u32(arg);
        }
        modes.put_u8(0); // TTY_OP_END

        let mut payload = PacketEncode::new();
        payload.put_str(&self.term);
        self.size.encode(&mut payload);
        payload.put_bytes(&modes.finish());
        payload.finish()
    }
}


/// Channel offered by the server.
///
/// You receive this object in [`ClientEvent::ChannelOpen`][super::ClientEvent::ChannelOpen].
/// Use [`accept()`][Self::accept()] to open the channel or [`reject()`][Self::reject()] to refuse
/// it. If you drop this object, the channel is refused as "administratively prohibited".
#[derive(Debug)]
pub struct AcceptChannel {
    pub(super) conn: Weak<Conn>,
    pub(super) kind: ChannelKind,
    pub(super) remote: RemoteParams,
    pub(super) answered: bool,
}

impl AcceptChannel {
    /// The kind of the channel, with the data sent by the server.
    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }

    /// Accept the channel, sending `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`.
    pub fn accept(mut self, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        let conn = self.conn.upgrade().ok_or(Error::ClientClosed)?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let core = conn.registry.allocate(|local_id| ChannelCore::new(CoreInit {
            local_id,
            state: ChannelState::InitiatedByServer,
            remote: Some(self.remote),
            transport: conn.transport.clone(),
            config,
            response_timeout: conn.config.response_timeout,
            passing_timeout: conn.config.passing_timeout,
            event_tx,
        }))?;

        let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_CONFIRMATION);
        payload.put_u32(self.remote.remote_id);
        payload.put_u32(core.local_id);
        payload.put_u32(config.window_size);
        payload.put_u32(config.max_packet_size);
        if let Err(err) = conn.transport.send(payload.finish()) {
            conn.registry.remove(core.local_id);
            return Err(err)
        }
        // until now, dropping `self` refuses the channel
        self.answered = true;
        log::debug!("accepted {:?} channel from the server as our channel {}",
            self.kind.channel_type(), core.local_id);

        core.mark_established();
        core.set_ready();
        Ok((Channel { core }, ChannelReceiver { event_rx }))
    }

    /// Reject the channel, sending `SSH_MSG_CHANNEL_OPEN_FAILURE` with the given reason (see
    /// [`codes::open`][crate::codes::open]).
    pub fn reject(mut self, reason_code: u32, description: &str) -> Result<()> {
        self.answered = true;
        let conn = self.conn.upgrade().ok_or(Error::ClientClosed)?;
        send_open_failure(&conn, self.remote.remote_id, reason_code, description)
    }
}

impl Drop for AcceptChannel {
    fn drop(&mut self) {
        if self.answered {
            return
        }
        if let Some(conn) = self.conn.upgrade() {
            let _ = send_open_failure(&conn, self.remote.remote_id, open::ADMINISTRATIVELY_PROHIBITED, "");
        }
    }
}

pub(super) fn send_open_failure(conn: &Conn, remote_id: u32, reason_code: u32, description: &str) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_FAILURE);
    payload.put_u32(remote_id);
    payload.put_u32(reason_code);
    payload.put_str(description);
    payload.put_str("");
    conn.transport.send(payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN_FAILURE for channel {} with reason {}", remote_id, reason_code);
    Ok(())
}
