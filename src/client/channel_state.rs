use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use crate::codec::{Packet, PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{ChannelOpenError, Error, Result};
use super::channel::{ChannelConfig, ChannelEvent, DataType, ExitSignal};
use super::conn::Conn;
use super::rendezvous::Rendezvous;
use super::transport::Transport;

/// State of a channel (RFC 4254, section 5).
///
/// The state only moves forward, [`Closed`][Self::Closed] is final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum ChannelState {
    InitiatedByClient,
    InitiatedByServer,
    Established,
    Ready,
    Closing,
    Closed,
}

/// Bytes of `SSH_MSG_CHANNEL_DATA` framing that do not count towards the data.
const FRAGMENT_OVERHEAD: u32 = 64;
const FRAGMENT_MIN: u32 = 1024;
const FRAGMENT_MAX: u32 = 32768;

/// Largest chunk of data that we put into a single packet.
pub(super) fn fragment_len(remote_max_packet: u32) -> u32 {
    remote_max_packet.saturating_sub(FRAGMENT_OVERHEAD).max(FRAGMENT_MIN).min(FRAGMENT_MAX)
}

/// Shared core of a channel, referenced from the [`ChannelRegistry`][super::registry::ChannelRegistry]
/// and from all [`Channel`][super::Channel] handles.
pub(super) struct ChannelCore {
    pub local_id: u32,
    transport: Transport,
    config: ChannelConfig,
    response_timeout: Duration,
    passing_timeout: Duration,
    state: Mutex<CoreState>,
    open_slot: Rendezvous<Packet>,
    reply_slot: Rendezvous<Packet>,
    request_lock: tokio::sync::Mutex<()>,
    data_lock: tokio::sync::Mutex<()>,
    window_notify: Notify,
    closed: CancellationToken,
}

struct CoreState {
    state: ChannelState,
    remote_id: u32,
    local_window: u32,
    local_window_left: u32,
    remote_window_left: u32,
    remote_max_packet: u32,
    eof_sent: bool,
    awaiting_reply: bool,
    conn_closed: bool,
    event_tx: Option<mpsc::Sender<ChannelEvent>>,
}

/// Parameters of the peer's side of the channel.
#[derive(Debug, Copy, Clone)]
pub(super) struct RemoteParams {
    pub remote_id: u32,
    pub window: u32,
    pub max_packet: u32,
}

pub(super) struct CoreInit {
    pub local_id: u32,
    pub state: ChannelState,
    pub remote: Option<RemoteParams>,
    pub transport: Transport,
    pub config: ChannelConfig,
    pub response_timeout: Duration,
    pub passing_timeout: Duration,
    pub event_tx: mpsc::Sender<ChannelEvent>,
}

impl ChannelCore {
    pub fn new(init: CoreInit) -> ChannelCore {
        let remote = init.remote.unwrap_or(RemoteParams { remote_id: 0, window: 0, max_packet: 0 });
        ChannelCore {
            local_id: init.local_id,
            transport: init.transport,
            config: init.config,
            response_timeout: init.response_timeout,
            passing_timeout: init.passing_timeout,
            state: Mutex::new(CoreState {
                state: init.state,
                remote_id: remote.remote_id,
                local_window: init.config.window_size,
                local_window_left: init.config.window_size,
                remote_window_left: remote.window,
                remote_max_packet: remote.max_packet,
                eof_sent: false,
                awaiting_reply: false,
                conn_closed: false,
                event_tx: Some(init.event_tx),
            }),
            open_slot: Rendezvous::new(),
            reply_slot: Rendezvous::new(),
            request_lock: tokio::sync::Mutex::new(()),
            data_lock: tokio::sync::Mutex::new(()),
            window_notify: Notify::new(),
            closed: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state.lock().state
    }

    fn set_state(&self, st: &mut CoreState, state: ChannelState) {
        if state > st.state {
            log::debug!("channel {}: {:?} -> {:?}", self.local_id, st.state, state);
            st.state = state;
        }
    }

    /// Sends `SSH_MSG_CHANNEL_OPEN` and waits for the reply (RFC 4254, section 5.1).
    ///
    /// On failure, the channel becomes closed without any close handshake.
    pub async fn open(&self, channel_type: &str, open_data: &[u8]) -> Result<()> {
        let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN);
        payload.put_str(channel_type);
        payload.put_u32(self.local_id);
        payload.put_u32(self.config.window_size);
        payload.put_u32(self.config.max_packet_size);
        payload.put_raw(open_data);
        self.transport.send(payload.finish())?;
        log::debug!("sending SSH_MSG_CHANNEL_OPEN {:?} for our channel {}", channel_type, self.local_id);

        let res = self.recv_open_reply().await;
        if res.is_err() {
            self.finalize(false);
        }
        res
    }

    async fn recv_open_reply(&self) -> Result<()> {
        let packet = self.open_slot.try_get(self.response_timeout).await
            .map_err(|err| self.map_closed(err))?;
        let mut payload = packet.decode();
        payload.get_u32()?; // recipient channel
        match packet.msg_id {
            msg::CHANNEL_OPEN_CONFIRMATION => {
                let remote = RemoteParams {
                    remote_id: payload.get_u32()?,
                    window: payload.get_u32()?,
                    max_packet: payload.get_u32()?,
                };
                let mut st = self.state.lock();
                st.remote_id = remote.remote_id;
                st.remote_window_left = remote.window;
                st.remote_max_packet = remote.max_packet;
                self.set_state(&mut st, ChannelState::Established);
                log::debug!("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for our channel {}: {:?}",
                    self.local_id, remote);
                Ok(())
            },
            _ => {
                let err = ChannelOpenError {
                    reason_code: payload.get_u32()?,
                    description: payload.get_string()?,
                    description_lang: payload.get_string()?,
                };
                log::debug!("received SSH_MSG_CHANNEL_OPEN_FAILURE for our channel {}: {}", self.local_id, err);
                Err(Error::ChannelOpen(err))
            },
        }
    }

    /// Marks a channel opened by the server as established after we sent the confirmation.
    pub fn mark_established(&self) {
        let mut st = self.state.lock();
        if st.state == ChannelState::InitiatedByServer {
            self.set_state(&mut st, ChannelState::Established);
        }
    }

    /// Marks the channel as ready after all requests in the "established" phase succeeded.
    pub fn set_ready(&self) {
        let mut st = self.state.lock();
        if st.state == ChannelState::Established {
            self.set_state(&mut st, ChannelState::Ready);
        }
    }

    /// Sends `SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA`, splitting `data` into
    /// fragments that fit into the peer's window and maximum packet size.
    pub async fn send_data(&self, mut data: Bytes, data_type: DataType) -> Result<()> {
        let _lock = self.data_lock.lock().await;
        while !data.is_empty() {
            let (remote_id, len) = self.reserve_window(data.len()).await?;
            let chunk = data.split_to(len);

            let mut payload = match data_type {
                DataType::Standard => {
                    let mut payload = PacketEncode::with_msg(msg::CHANNEL_DATA);
                    payload.put_u32(remote_id);
                    payload
                },
                DataType::Extended(code) => {
                    let mut payload = PacketEncode::with_msg(msg::CHANNEL_EXTENDED_DATA);
                    payload.put_u32(remote_id);
                    payload.put_u32(code);
                    payload
                },
            };
            payload.put_bytes(&chunk);
            self.transport.send(payload.finish())?;
            log::trace!("sending {} bytes of {:?} data for our channel {}", len, data_type, self.local_id);
        }
        Ok(())
    }

    async fn reserve_window(&self, want_len: usize) -> Result<(u32, usize)> {
        loop {
            let notified = self.window_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut st = self.state.lock();
                if !matches!(st.state, ChannelState::Established | ChannelState::Ready) || st.eof_sent {
                    return Err(self.closed_error(&st))
                }

                let len = (fragment_len(st.remote_max_packet) as usize).min(want_len);
                if !self.config.strict_send_window {
                    // the peer did not give us enough window, but we send anyway
                    st.remote_window_left = st.remote_window_left.saturating_sub(len as u32);
                    return Ok((st.remote_id, len))
                }
                if st.remote_window_left > 0 {
                    let len = len.min(st.remote_window_left as usize);
                    st.remote_window_left -= len as u32;
                    return Ok((st.remote_id, len))
                }
                log::trace!("channel {}: waiting for window adjust", self.local_id);
            }

            notified.await;
        }
    }

    /// Sends `SSH_MSG_CHANNEL_EOF`; does nothing if it was already sent.
    pub async fn send_eof(&self) -> Result<()> {
        let _lock = self.data_lock.lock().await;
        let remote_id = {
            let mut st = self.state.lock();
            if !matches!(st.state, ChannelState::Established | ChannelState::Ready) {
                return Err(self.closed_error(&st))
            }
            if st.eof_sent {
                return Ok(())
            }
            st.eof_sent = true;
            st.remote_id
        };

        let mut payload = PacketEncode::with_msg(msg::CHANNEL_EOF);
        payload.put_u32(remote_id);
        self.transport.send(payload.finish())?;
        log::debug!("sending SSH_MSG_CHANNEL_EOF for our channel {}", self.local_id);
        Ok(())
    }

    /// Sends `SSH_MSG_CHANNEL_REQUEST` and waits for the reply if `want_reply` is set.
    ///
    /// Only one request is pending on the channel at a time, further requests wait until the
    /// reply to the previous one is received.
    pub async fn request(&self, request_type: &str, request_data: &[u8], want_reply: bool) -> Result<()> {
        let _lock = self.request_lock.lock().await;
        let remote_id = {
            let mut st = self.state.lock();
            if !matches!(st.state, ChannelState::Established | ChannelState::Ready) {
                return Err(self.closed_error(&st))
            }
            st.awaiting_reply = want_reply;
            st.remote_id
        };

        let mut payload = PacketEncode::with_msg(msg::CHANNEL_REQUEST);
        payload.put_u32(remote_id);
        payload.put_str(request_type);
        payload.put_bool(want_reply);
        payload.put_raw(request_data);
        self.transport.send(payload.finish())?;
        log::debug!("sending SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}", request_type, self.local_id);

        if !want_reply {
            return Ok(())
        }

        let res = self.reply_slot.try_get(self.response_timeout).await;
        self.state.lock().awaiting_reply = false;
        if let Err(Error::Timeout) = res {
            // the reply might have been deposited just as we gave up
            let _ = self.reply_slot.try_get(Duration::ZERO).await;
        }

        match res.map_err(|err| self.map_closed(err))?.msg_id {
            msg::CHANNEL_SUCCESS => {
                log::debug!("received SSH_MSG_CHANNEL_SUCCESS for {:?} on our channel {}", request_type, self.local_id);
                Ok(())
            },
            _ => {
                log::debug!("received SSH_MSG_CHANNEL_FAILURE for {:?} on our channel {}", request_type, self.local_id);
                Err(Error::ChannelReq)
            },
        }
    }

    /// Sends `SSH_MSG_CHANNEL_CLOSE`; does nothing if the channel is already closing or closed.
    pub fn close(&self) -> Result<()> {
        let remote_id = {
            let mut st = self.state.lock();
            if !matches!(st.state, ChannelState::Established | ChannelState::Ready) {
                return Ok(())
            }
            self.set_state(&mut st, ChannelState::Closing);
            st.remote_id
        };
        self.send_close(remote_id)?;
        // waiters for window would otherwise block until the peer answers
        self.window_notify.notify_waiters();
        Ok(())
    }

    fn send_close(&self, remote_id: u32) -> Result<()> {
        let mut payload = PacketEncode::with_msg(msg::CHANNEL_CLOSE);
        payload.put_u32(remote_id);
        self.transport.send(payload.finish())?;
        log::debug!("sending SSH_MSG_CHANNEL_CLOSE for our channel {}", self.local_id);
        Ok(())
    }

    /// Waits until the channel is closed.
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await
    }

    /// Handles a packet addressed to this channel (messages 91 to 100).
    pub async fn recv_packet(&self, conn: &Conn, packet: &Packet) -> Result<()> {
        let mut payload = packet.decode();
        payload.get_u32()?; // recipient channel
        match packet.msg_id {
            msg::CHANNEL_OPEN_CONFIRMATION | msg::CHANNEL_OPEN_FAILURE => self.recv_open_reply_packet(packet).await,
            msg::CHANNEL_WINDOW_ADJUST => self.recv_window_adjust(&mut payload),
            msg::CHANNEL_DATA => {
                let data = payload.get_bytes()?;
                self.recv_data(data, DataType::Standard).await
            },
            msg::CHANNEL_EXTENDED_DATA => {
                let code = payload.get_u32()?;
                let data = payload.get_bytes()?;
                self.recv_data(data, DataType::Extended(code)).await
            },
            msg::CHANNEL_EOF => {
                log::debug!("received SSH_MSG_CHANNEL_EOF for our channel {}", self.local_id);
                self.send_event(ChannelEvent::Eof).await;
                Ok(())
            },
            msg::CHANNEL_CLOSE => self.recv_close(conn),
            msg::CHANNEL_REQUEST => self.recv_request(&mut payload).await,
            msg::CHANNEL_SUCCESS | msg::CHANNEL_FAILURE => self.recv_reply(packet).await,
            _ => Err(Error::Protocol("received unexpected channel message")),
        }
    }

    async fn recv_open_reply_packet(&self, packet: &Packet) -> Result<()> {
        if self.state() != ChannelState::InitiatedByClient {
            return Err(Error::Protocol("received unexpected reply to SSH_MSG_CHANNEL_OPEN"))
        }
        if !self.open_slot.try_set(packet.clone(), self.passing_timeout).await && !self.open_slot.is_closed() {
            return Err(Error::Protocol("channel did not accept the open reply in time"))
        }
        Ok(())
    }

    fn recv_window_adjust(&self, payload: &mut PacketDecode) -> Result<()> {
        let adjust = payload.get_u32()?;
        {
            let mut st = self.state.lock();
            st.remote_window_left = st.remote_window_left.checked_add(adjust)
                .ok_or(Error::Protocol("received SSH_MSG_CHANNEL_WINDOW_ADJUST that overflows the window"))?;
            log::trace!("channel {}: window adjusted by {} to {}", self.local_id, adjust, st.remote_window_left);
        }
        self.window_notify.notify_waiters();
        Ok(())
    }

    async fn recv_data(&self, data: Bytes, data_type: DataType) -> Result<()> {
        let adjust = {
            let mut st = self.state.lock();
            let len = data.len() as u32;
            if data.len() > st.local_window_left as usize {
                return Err(Error::Protocol("received more channel data than the window allows"))
            }
            st.local_window_left -= len;

            let mut adjust = None;
            if st.local_window_left < st.local_window / 2
                && matches!(st.state, ChannelState::Established | ChannelState::Ready)
            {
                adjust = Some((st.remote_id, st.local_window - st.local_window_left));
                st.local_window_left = st.local_window;
            }
            adjust
        };

        if let Some((remote_id, adjust)) = adjust {
            let mut payload = PacketEncode::with_msg(msg::CHANNEL_WINDOW_ADJUST);
            payload.put_u32(remote_id);
            payload.put_u32(adjust);
            self.transport.send(payload.finish())?;
            log::trace!("sending SSH_MSG_CHANNEL_WINDOW_ADJUST by {} for our channel {}", adjust, self.local_id);
        }

        log::trace!("received {} bytes of {:?} data for our channel {}", data.len(), data_type, self.local_id);
        self.send_event(ChannelEvent::Data(data, data_type)).await;
        Ok(())
    }

    fn recv_close(&self, conn: &Conn) -> Result<()> {
        log::debug!("received SSH_MSG_CHANNEL_CLOSE for our channel {}", self.local_id);
        let echo_id = {
            let st = self.state.lock();
            match st.state {
                ChannelState::Established | ChannelState::Ready => Some(st.remote_id),
                ChannelState::Closing => None,
                _ => return Err(Error::Protocol("received SSH_MSG_CHANNEL_CLOSE for a channel that is not open")),
            }
        };
        if let Some(remote_id) = echo_id {
            self.send_close(remote_id)?;
        }
        conn.registry.remove(self.local_id);
        self.finalize(false);
        Ok(())
    }

    async fn recv_request(&self, payload: &mut PacketDecode) -> Result<()> {
        let request_type = payload.get_string()?;
        let want_reply = payload.get_bool()?;
        log::debug!("received SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}", request_type, self.local_id);

        let event = match request_type.as_str() {
            "exit-status" => Some(ChannelEvent::ExitStatus(payload.get_u32()?)),
            "exit-signal" => Some(ChannelEvent::ExitSignal(ExitSignal {
                signal_name: payload.get_string()?,
                core_dumped: payload.get_bool()?,
                message: payload.get_string()?,
                message_lang: payload.get_string()?,
            })),
            _ => None,
        };

        if want_reply {
            let remote_id = self.state.lock().remote_id;
            let msg_id = if event.is_some() { msg::CHANNEL_SUCCESS } else { msg::CHANNEL_FAILURE };
            let mut reply = PacketEncode::with_msg(msg_id);
            reply.put_u32(remote_id);
            self.transport.send(reply.finish())?;
        }

        if let Some(event) = event {
            self.send_event(event).await;
        }
        Ok(())
    }

    async fn recv_reply(&self, packet: &Packet) -> Result<()> {
        if !self.state.lock().awaiting_reply {
            log::warn!("ignoring reply to a channel request on our channel {} that nobody waits for", self.local_id);
            return Ok(())
        }
        if !self.reply_slot.try_set(packet.clone(), self.passing_timeout).await && !self.reply_slot.is_closed() {
            log::warn!("ignoring reply to a channel request on our channel {}", self.local_id);
        }
        Ok(())
    }

    async fn send_event(&self, event: ChannelEvent) {
        let event_tx = self.state.lock().event_tx.clone();
        if let Some(event_tx) = event_tx {
            // the receiver might have been dropped, then we discard the events
            let _ = event_tx.send(event).await;
        }
    }

    /// Moves the channel into the final state and wakes up everybody who waits on it.
    pub fn finalize(&self, conn_closed: bool) {
        {
            let mut st = self.state.lock();
            st.conn_closed |= conn_closed;
            self.set_state(&mut st, ChannelState::Closed);
            st.event_tx = None;
        }
        self.open_slot.close();
        self.reply_slot.close();
        self.window_notify.notify_waiters();
        self.closed.cancel();
    }

    fn closed_error(&self, st: &CoreState) -> Error {
        if st.conn_closed { Error::ConnectionClosed } else { Error::ChannelClosed }
    }

    fn map_closed(&self, err: Error) -> Error {
        match err {
            Error::ConnectionClosed => self.closed_error(&self.state.lock()),
            err => err,
        }
    }

    #[cfg(test)]
    pub fn windows(&self) -> (u32, u32) {
        let st = self.state.lock();
        (st.local_window_left, st.remote_window_left)
    }
}
