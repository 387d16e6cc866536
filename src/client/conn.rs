use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use crate::codec::{Packet, PacketDecode, PacketEncode, RecvPipe};
use crate::codes::{msg, open};
use crate::error::{DisconnectError, Error, Result};
use crate::util::CryptoRngCore;
use super::auth::{self, AuthState};
use super::channel::{self, AcceptChannel};
use super::channel_kind::ChannelKind;
use super::channel_state::RemoteParams;
use super::client::ClientConfig;
use super::client_event::{ClientEvent, DebugMsg};
use super::global::GlobalState;
use super::interceptor::InterceptorChain;
use super::negotiate::KeyExchanger;
use super::registry::ChannelRegistry;
use super::transport::Transport;

/// State of the connection shared by the receive path, the key exchange task and all handles.
pub(super) struct Conn {
    pub config: ClientConfig,
    pub transport: Transport,
    pub rng: Mutex<Box<dyn CryptoRngCore + Send>>,
    pub our_ident: Bytes,
    pub their_ident: OnceLock<Bytes>,
    pub session_id: OnceLock<Bytes>,
    pub recv_pipe: Mutex<RecvPipe>,
    pub event_tx: mpsc::Sender<ClientEvent>,
    pub kex: Arc<KeyExchanger>,
    pub interceptors: Arc<InterceptorChain>,
    pub registry: ChannelRegistry,
    pub auth: AuthState,
    pub global: GlobalState,
    pub agent_forwarding: AtomicBool,
    pub server_sig_algs: Mutex<Option<Vec<String>>>,
    pub closed: CancellationToken,
    close_started: AtomicBool,
    error: Mutex<Option<Error>>,
}

pub(super) struct ConnInit {
    pub config: ClientConfig,
    pub transport: Transport,
    pub rng: Box<dyn CryptoRngCore + Send>,
    pub our_ident: Bytes,
    pub event_tx: mpsc::Sender<ClientEvent>,
}

impl Conn {
    pub fn new(init: ConnInit) -> Conn {
        Conn {
            config: init.config,
            transport: init.transport,
            rng: Mutex::new(init.rng),
            our_ident: init.our_ident,
            their_ident: OnceLock::new(),
            session_id: OnceLock::new(),
            recv_pipe: Mutex::new(RecvPipe::new()),
            event_tx: init.event_tx,
            kex: Arc::new(KeyExchanger::new()),
            interceptors: InterceptorChain::new(),
            registry: ChannelRegistry::new(),
            auth: AuthState::default(),
            global: GlobalState::new(),
            agent_forwarding: AtomicBool::new(false),
            server_sig_algs: Mutex::new(None),
            closed: CancellationToken::new(),
            close_started: AtomicBool::new(false),
            error: Mutex::new(None),
        }
    }

    /// Records a fatal error (only the first one is kept) and closes the connection.
    pub fn fail(&self, err: Error) {
        {
            let mut error = self.error.lock();
            if error.is_none() {
                log::debug!("connection failed: {}", err);
                *error = Some(err);
            }
        }
        self.close();
    }

    /// Closes the connection and wakes up every sequence that waits for a packet.
    pub fn close(&self) {
        if self.close_started.swap(true, Ordering::SeqCst) {
            return
        }
        log::debug!("closing the connection");
        self.closed.cancel();
        self.interceptors.close();
        self.registry.close_all();
        self.kex.close();
    }

    pub fn take_error(&self) -> Option<Error> {
        self.error.lock().take()
    }

    /// Fails the connection if `err` is a protocol violation and hands `err` back to the caller.
    ///
    /// Sequences that run outside of the receive path use this, so that a misbehaving server closes
    /// the whole connection and not only the sequence.
    pub fn check_violation(&self, err: Error) -> Error {
        let fatal = match err {
            Error::Protocol(msg) => Error::Protocol(msg),
            Error::Decode(msg) => Error::Decode(msg),
            _ => return err,
        };
        self.fail(fatal);
        err
    }

    /// Waits until the first key exchange is finished.
    pub async fn wait_ready(&self) -> Result<()> {
        self.kex.wait_done(0, &self.closed).await
    }

    fn is_offer_allowed(&self, kind: &ChannelKind) -> bool {
        match kind {
            ChannelKind::ForwardedTcpip { connected_port, .. } => self.global.is_forwarded(*connected_port),
            ChannelKind::AuthAgent => self.agent_forwarding.load(Ordering::SeqCst),
            _ => false,
        }
    }
}

/// Handles a packet that was not claimed by any interceptor.
pub(super) async fn dispatch(conn: &Arc<Conn>, packet: Packet) -> Result<()> {
    let mut payload = packet.decode();
    match packet.msg_id {
        msg::DISCONNECT => recv_disconnect(&mut payload),
        msg::IGNORE => Ok(()),
        msg::UNIMPLEMENTED => {
            let packet_seq = payload.get_u32()?;
            log::debug!("received SSH_MSG_UNIMPLEMENTED for packet seq {}", packet_seq);
            Ok(())
        },
        msg::DEBUG => recv_debug(conn, &mut payload).await,
        msg::EXT_INFO => recv_ext_info(conn, &mut payload),
        msg::USERAUTH_BANNER => auth::recv_banner(conn, &mut payload).await,
        msg::SERVICE_ACCEPT | 50..=79 => {
            log::warn!("ignoring authentication packet {} outside of authentication", packet.msg_id);
            Ok(())
        },
        msg::GLOBAL_REQUEST => recv_global_request(conn, &mut payload),
        msg::REQUEST_SUCCESS | msg::REQUEST_FAILURE => {
            log::warn!("ignoring reply to a global request that nobody waits for");
            Ok(())
        },
        msg::CHANNEL_OPEN => recv_channel_open(conn, &mut payload).await,
        msg::CHANNEL_OPEN_CONFIRMATION ..= msg::CHANNEL_FAILURE => recv_channel_packet(conn, &packet).await,
        _ => send_unimplemented(conn, &packet),
    }
}

fn recv_disconnect(payload: &mut PacketDecode) -> Result<()> {
    let disconnect = DisconnectError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_DISCONNECT: {}", disconnect);
    Err(Error::PeerDisconnected(disconnect))
}

async fn recv_debug(conn: &Conn, payload: &mut PacketDecode) -> Result<()> {
    let debug_msg = DebugMsg {
        always_display: payload.get_bool()?,
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_DEBUG: {:?}", debug_msg.message);
    let _ = conn.event_tx.send(ClientEvent::DebugMsg(debug_msg)).await;
    Ok(())
}

// RFC 8308, section 2.3
fn recv_ext_info(conn: &Conn, payload: &mut PacketDecode) -> Result<()> {
    let ext_count = payload.get_u32()?;
    log::debug!("received SSH_MSG_EXT_INFO with {} extensions", ext_count);
    for _ in 0..ext_count {
        let ext_name = payload.get_string()?;
        if ext_name == "server-sig-algs" {
            let algo_names = payload.get_name_list()?;
            log::debug!("server accepts signature algorithms {:?}", algo_names);
            *conn.server_sig_algs.lock() = Some(algo_names);
        } else {
            payload.get_bytes()?;
            log::debug!("ignoring extension {:?}", ext_name);
        }
    }
    Ok(())
}

fn recv_global_request(conn: &Conn, payload: &mut PacketDecode) -> Result<()> {
    let request_name = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    log::debug!("received SSH_MSG_GLOBAL_REQUEST {:?}, refusing it", request_name);
    if want_reply {
        conn.transport.send(PacketEncode::with_msg(msg::REQUEST_FAILURE).finish())?;
    }
    Ok(())
}

async fn recv_channel_open(conn: &Arc<Conn>, payload: &mut PacketDecode) -> Result<()> {
    let channel_type = payload.get_string()?;
    let remote = RemoteParams {
        remote_id: payload.get_u32()?,
        window: payload.get_u32()?,
        max_packet: payload.get_u32()?,
    };
    log::debug!("received SSH_MSG_CHANNEL_OPEN {:?} for their channel {}", channel_type, remote.remote_id);

    let kind = match ChannelKind::decode_offer(&channel_type, payload)? {
        Some(kind) => kind,
        None => return channel::send_open_failure(
            conn, remote.remote_id, open::UNKNOWN_CHANNEL_TYPE, "unknown channel type"),
    };
    if !conn.is_offer_allowed(&kind) {
        return channel::send_open_failure(
            conn, remote.remote_id, open::ADMINISTRATIVELY_PROHIBITED, "channel was not requested")
    }

    let accept = AcceptChannel { conn: Arc::downgrade(conn), kind, remote, answered: false };
    // if nobody receives the event, dropping the offer rejects the channel
    let _ = conn.event_tx.send(ClientEvent::ChannelOpen(accept)).await;
    Ok(())
}

async fn recv_channel_packet(conn: &Conn, packet: &Packet) -> Result<()> {
    let mut payload = packet.decode();
    let local_id = payload.get_u32()?;
    match conn.registry.get(local_id) {
        Some(core) => core.recv_packet(conn, packet).await,
        None if packet.msg_id == msg::CHANNEL_OPEN_CONFIRMATION => {
            // we gave up waiting for this channel, so we close it right away
            let remote_id = payload.get_u32()?;
            log::warn!("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for unknown channel {}, closing it", local_id);
            let mut close = PacketEncode::with_msg(msg::CHANNEL_CLOSE);
            close.put_u32(remote_id);
            conn.transport.send(close.finish())
        },
        None => {
            log::warn!("ignoring packet {} for unknown channel {}", packet.msg_id, local_id);
            Ok(())
        },
    }
}

fn send_unimplemented(conn: &Conn, packet: &Packet) -> Result<()> {
    log::debug!("received unimplemented packet {}, seq {}", packet.msg_id, packet.packet_seq);
    let mut reply = PacketEncode::with_msg(msg::UNIMPLEMENTED);
    reply.put_u32(packet.packet_seq);
    conn.transport.send(reply.finish())
}
