use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use crate::codec::{Packet, PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::auth_method::{AuthMethod, MethodStep};
use super::client_event::{ClientEvent, AuthBanner};
use super::conn::Conn;
use super::interceptor::{BoxFuture, Interceptor, Verdict};
use super::rendezvous::Rendezvous;

/// Result of an authentication attempt.
///
/// A failed authentication is not an error: the connection is still usable and you can try
/// another method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthResult {
    /// The server accepted the authentication, you are now logged in.
    Success,

    /// The server rejected the authentication.
    Failure(AuthFailure),

    /// The server asks you to change your password (`SSH_MSG_USERAUTH_PASSWD_CHANGEREQ`, RFC
    /// 4252, section 8).
    ///
    /// You should try again with
    /// [`Client::auth_password_change()`][super::Client::auth_password_change()].
    ChangePassword(AuthPasswordPrompt),
}

impl AuthResult {
    /// Returns true if the authentication was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, AuthResult::Success)
    }
}

/// Message sent by the server when authentication attempt fails.
///
/// This corresponds to `SSH_MSG_USERAUTH_FAILURE` (RFC 4252, section 5.1). Note that this may
/// actually represent a [partial success][Self::partial_success].
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Authentication methods that may productively continue the authentication.
    ///
    /// Note that the server must not list the `"none"` method here, even if it is supported.
    pub methods_can_continue: Vec<String>,

    /// True if the authentication request was successful, but the authentication should continue.
    ///
    /// For example, this might be used if the server requires that you pass multiple
    /// authentications before continuing.
    pub partial_success: bool,
}

/// Prompt for password change sent by the server.
#[derive(Debug, Clone)]
pub struct AuthPasswordPrompt {
    /// Prompt that should be shown to the user.
    pub prompt: String,
    /// Language tag of the prompt (per RFC 3066).
    pub prompt_lang: String,
}

/// Outcome of a single authentication sequence.
#[derive(Debug)]
pub(super) enum AuthOutcome {
    Success,
    Failure(AuthFailure),
    ChangePassword(AuthPasswordPrompt),
    PubkeyOk,
}

impl AuthOutcome {
    pub fn into_result(self, conn: &Conn) -> Result<AuthResult> {
        match self {
            AuthOutcome::Success => Ok(AuthResult::Success),
            AuthOutcome::Failure(failure) => Ok(AuthResult::Failure(failure)),
            AuthOutcome::ChangePassword(prompt) => Ok(AuthResult::ChangePassword(prompt)),
            AuthOutcome::PubkeyOk => Err(conn.check_violation(
                Error::Protocol("received unexpected SSH_MSG_USERAUTH_PK_OK"))),
        }
    }
}

#[derive(Default)]
pub(super) struct AuthState {
    pending: AtomicBool,
    service_accepted: AtomicBool,
    authenticated: AtomicBool,
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

/// Marks an authentication sequence as pending, so that only one sequence runs at a time.
pub(super) struct AuthGuard {
    conn: Arc<Conn>,
}

impl AuthGuard {
    pub fn acquire(conn: &Arc<Conn>) -> Result<AuthGuard> {
        if conn.auth.pending.swap(true, Ordering::SeqCst) {
            return Err(Error::AuthPending)
        }
        Ok(AuthGuard { conn: conn.clone() })
    }
}

impl Drop for AuthGuard {
    fn drop(&mut self) {
        self.conn.auth.pending.store(false, Ordering::SeqCst);
    }
}

/// Claims `SSH_MSG_SERVICE_ACCEPT` and the user authentication messages 50 to 79 while an
/// authentication sequence is running.
struct AuthInterceptor {
    slot: Rendezvous<Packet>,
    passing_timeout: Duration,
}

impl Interceptor for AuthInterceptor {
    fn offer<'a>(&'a self, packet: &'a Packet) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            if packet.msg_id != msg::SERVICE_ACCEPT && !(50..=79).contains(&packet.msg_id) {
                return Ok(Verdict::PassThrough)
            }
            if self.slot.try_set(packet.clone(), self.passing_timeout).await || self.slot.is_closed() {
                Ok(Verdict::Consumed)
            } else {
                Err(Error::Protocol("authentication did not accept a packet in time"))
            }
        })
    }

    fn on_close(&self) {
        self.slot.close();
    }
}

/// Runs one authentication sequence with the given method.
///
/// A protocol violation by the server fails the whole connection, not only this sequence.
pub(super) async fn run_auth(
    conn: &Arc<Conn>,
    _guard: AuthGuard,
    method: &mut (dyn AuthMethod + '_),
) -> Result<AuthOutcome> {
    auth_sequence(conn, method).await.map_err(|err| conn.check_violation(err))
}

async fn auth_sequence(conn: &Arc<Conn>, method: &mut (dyn AuthMethod + '_)) -> Result<AuthOutcome> {
    if conn.auth.is_authenticated() {
        log::debug!("already authenticated, ignoring method {:?}", method.name());
        return Ok(AuthOutcome::Success)
    }

    conn.wait_ready().await?;
    let session_id = conn.session_id.get().cloned()
        .ok_or(Error::Protocol("authentication started before key exchange"))?;
    let timeout = conn.config.response_timeout;

    let seq = Arc::new(AuthInterceptor {
        slot: Rendezvous::new(),
        passing_timeout: conn.config.passing_timeout,
    });
    let _handle = conn.interceptors.register(seq.clone());

    if !conn.auth.service_accepted.load(Ordering::SeqCst) {
        let mut payload = PacketEncode::with_msg(msg::SERVICE_REQUEST);
        payload.put_str("ssh-userauth");
        conn.transport.send(payload.finish())?;
        log::debug!("sending SSH_MSG_SERVICE_REQUEST for 'ssh-userauth'");

        let packet = seq.slot.try_get(timeout).await?;
        if packet.msg_id != msg::SERVICE_ACCEPT {
            return Err(Error::Protocol("expected SSH_MSG_SERVICE_ACCEPT"))
        }
        log::debug!("received SSH_MSG_SERVICE_ACCEPT for 'ssh-userauth'");
        conn.auth.service_accepted.store(true, Ordering::SeqCst);
    }

    conn.transport.send(method.request(&session_id)?)?;
    log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method {:?}", method.name());

    loop {
        let packet = seq.slot.try_get(timeout).await?;
        let mut payload = packet.decode();
        match packet.msg_id {
            msg::USERAUTH_BANNER => recv_banner(conn, &mut payload).await?,
            msg::USERAUTH_SUCCESS => {
                log::debug!("received SSH_MSG_USERAUTH_SUCCESS for method {:?}", method.name());
                conn.auth.authenticated.store(true, Ordering::SeqCst);
                return Ok(AuthOutcome::Success)
            },
            msg::USERAUTH_FAILURE => {
                let failure = AuthFailure {
                    methods_can_continue: payload.get_name_list()?,
                    partial_success: payload.get_bool()?,
                };
                log::debug!("received SSH_MSG_USERAUTH_FAILURE for method {:?}: {:?}", method.name(), failure);
                return Ok(AuthOutcome::Failure(failure))
            },
            60..=79 => match method.recv_method_packet(packet.msg_id, &mut payload)? {
                MethodStep::Respond(response) => conn.transport.send(response)?,
                MethodStep::Prompt(pending) => {
                    // the user might take a while, so we don't time out here
                    let response = tokio::select! {
                        response = pending.into_response() => response,
                        () = conn.closed.cancelled() => return Err(Error::ConnectionClosed),
                    };
                    log::debug!("sending SSH_MSG_USERAUTH_INFO_RESPONSE");
                    conn.transport.send(response)?;
                },
                MethodStep::Finish(outcome) => return Ok(outcome),
            },
            _ => return Err(Error::Protocol("received unexpected packet during authentication")),
        }
    }
}

/// Handles `SSH_MSG_USERAUTH_BANNER` (RFC 4252, section 5.4).
pub(super) async fn recv_banner(conn: &Conn, payload: &mut PacketDecode) -> Result<()> {
    let banner = AuthBanner {
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_USERAUTH_BANNER: {:?}", banner.message);
    let _ = conn.event_tx.send(ClientEvent::AuthBanner(banner)).await;
    Ok(())
}

/// Starts encoding `SSH_MSG_USERAUTH_REQUEST` (RFC 4252, section 5).
pub(super) fn encode_request(username: &str, method_name: &str) -> PacketEncode {
    let mut payload = PacketEncode::with_msg(msg::USERAUTH_REQUEST);
    payload.put_str(username);
    payload.put_str("ssh-connection");
    payload.put_str(method_name);
    payload
}
