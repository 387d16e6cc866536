use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use crate::codec::{Packet, PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use super::conn::Conn;
use super::interceptor::{BoxFuture, Interceptor, Verdict};
use super::rendezvous::Rendezvous;

/// State of global requests (RFC 4254, section 4).
pub(super) struct GlobalState {
    request_lock: tokio::sync::Mutex<()>,
    remote_forwards: Mutex<Vec<RemoteForward>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteForward {
    bind_addr: String,
    bind_port: u32,
}

impl GlobalState {
    pub fn new() -> GlobalState {
        GlobalState {
            request_lock: tokio::sync::Mutex::new(()),
            remote_forwards: Mutex::new(Vec::new()),
        }
    }

    /// Returns true if we asked the server to forward connections to this port.
    ///
    /// Only the port is compared, because servers report the bound address in various forms
    /// (for example `""` might come back as `"0.0.0.0"`).
    pub fn is_forwarded(&self, connected_port: u32) -> bool {
        self.remote_forwards.lock().iter().any(|fwd| fwd.bind_port == connected_port)
    }
}

/// Claims the reply to the single pending global request and then leaves the chain.
struct ReplyInterceptor {
    slot: Rendezvous<Packet>,
    passing_timeout: Duration,
}

impl Interceptor for ReplyInterceptor {
    fn offer<'a>(&'a self, packet: &'a Packet) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            if packet.msg_id != msg::REQUEST_SUCCESS && packet.msg_id != msg::REQUEST_FAILURE {
                return Ok(Verdict::PassThrough)
            }
            if !self.slot.try_set(packet.clone(), self.passing_timeout).await && !self.slot.is_closed() {
                log::warn!("ignoring reply to a global request that nobody waits for");
            }
            Ok(Verdict::Finished)
        })
    }

    fn on_close(&self) {
        self.slot.close();
    }
}

/// Sends `SSH_MSG_GLOBAL_REQUEST` with `want reply` and waits for the reply.
///
/// Returns the request-specific data from `SSH_MSG_REQUEST_SUCCESS`.
pub(super) async fn global_request(conn: &Arc<Conn>, request_name: &str, request_data: &[u8]) -> Result<Bytes> {
    conn.wait_ready().await?;
    let _lock = conn.global.request_lock.lock().await;

    let seq = Arc::new(ReplyInterceptor {
        slot: Rendezvous::new(),
        passing_timeout: conn.config.passing_timeout,
    });
    let _handle = conn.interceptors.register(seq.clone());

    let mut payload = PacketEncode::with_msg(msg::GLOBAL_REQUEST);
    payload.put_str(request_name);
    payload.put_bool(true);
    payload.put_raw(request_data);
    conn.transport.send(payload.finish())?;
    log::debug!("sending SSH_MSG_GLOBAL_REQUEST {:?}", request_name);

    let reply = seq.slot.try_get(conn.config.response_timeout).await?;
    match reply.msg_id {
        msg::REQUEST_SUCCESS => {
            log::debug!("received SSH_MSG_REQUEST_SUCCESS for {:?}", request_name);
            Ok(reply.payload.slice(1..))
        },
        _ => {
            log::debug!("received SSH_MSG_REQUEST_FAILURE for {:?}", request_name);
            Err(Error::GlobalReq)
        },
    }
}

/// Asks the server to forward connections from `bind_addr:bind_port` to us (RFC 4254, section
/// 7.1).
///
/// Returns the bound port, which is chosen by the server if `bind_port` is 0.
pub(super) async fn tcpip_forward(conn: &Arc<Conn>, bind_addr: &str, bind_port: u32) -> Result<u32> {
    let mut payload = PacketEncode::new();
    payload.put_str(bind_addr);
    payload.put_u32(bind_port);
    let reply = global_request(conn, "tcpip-forward", &payload.finish()).await?;

    let bound_port = if bind_port == 0 {
        PacketDecode::new(reply).get_u32()?
    } else {
        bind_port
    };
    log::debug!("server forwards {:?} port {}", bind_addr, bound_port);

    conn.global.remote_forwards.lock().push(RemoteForward {
        bind_addr: bind_addr.into(),
        bind_port: bound_port,
    });
    Ok(bound_port)
}

/// Cancels a forwarding created by [`tcpip_forward()`].
pub(super) async fn cancel_tcpip_forward(conn: &Arc<Conn>, bind_addr: &str, bind_port: u32) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_str(bind_addr);
    payload.put_u32(bind_port);
    global_request(conn, "cancel-tcpip-forward", &payload.finish()).await?;

    conn.global.remote_forwards.lock()
        .retain(|fwd| !(fwd.bind_addr == bind_addr && fwd.bind_port == bind_port));
    Ok(())
}
