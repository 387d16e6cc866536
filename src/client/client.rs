use bytes::Bytes;
use rand::rngs::OsRng;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use crate::{Error, Result, DisconnectError};
use crate::cipher::{self, CipherAlgo};
use crate::codec::{PacketEncode, SendPipe};
use crate::codes::{disconnect, msg};
use crate::kex::{self, KexAlgo};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{self, PubkeyAlgo, Pubkey, Privkey};
use super::{global, negotiate, recv};
use super::auth::{self, AuthGuard, AuthOutcome, AuthResult};
use super::auth_method::keyboard::{AuthKeyboard, PromptCollector};
use super::auth_method::none::AuthNone;
use super::auth_method::password::AuthPassword;
use super::auth_method::pubkey::{AuthPubkey, CheckPubkey};
use super::channel::{Channel, ChannelReceiver, ChannelConfig, PtyRequest, EVENT_QUEUE_LEN};
use super::channel_kind::ChannelKind;
use super::channel_state::{ChannelCore, ChannelState, CoreInit};
use super::client_event::ClientEvent;
use super::conn::{Conn, ConnInit};
use super::interceptor::BoxFuture;
use super::transport::new_transport;

/// Handle to an SSH connection.
///
/// Use this object to send requests to the SSH server. In tandem, you will also need to use
/// [`ClientReceiver`] to handle events that we receive from the server, and [`ClientFuture`] to
/// perform the actual I/O.
///
/// To open a connection, pass your I/O stream (such as `tokio::net::TcpStream`) to
/// [`Client::open()`] and perform authentication using one of the `auth_*` methods. Once
/// you are authenticated, you can open channels with [`Client::open_channel()`] or one of its
/// shorthands. You can open many channels over a single connection.
///
/// At the same time, you must handle events from the [`ClientReceiver`] and poll the
/// [`ClientFuture`] (probably from a different task).
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Client {
    conn: Weak<Conn>,
}

impl Client {
    /// Creates an SSH connection from an existing stream.
    ///
    /// We initialize the client, but do not perform any I/O in this method. You should use the
    /// returned objects as follows:
    ///
    /// - [`Client`] allows you to interact with the SSH client. You should use it to authenticate
    /// yourself to the server and then you can open channels.
    /// - [`ClientReceiver`] is the receiving half of the client. It produces [`ClientEvent`]s,
    /// which mostly correspond to actions initiated by the server. The only event that you need to
    /// handle is [`ClientEvent::ServerPubkey`]. However, you **must** receive these events in a
    /// timely manner, otherwise the client will stall.
    /// - [`ClientFuture`] is a future that you must poll to drive the connection forward. You will
    /// usually spawn a task for this future.
    pub fn open<S>(stream: S, config: ClientConfig) -> Result<(Client, ClientReceiver, ClientFuture)>
        where S: AsyncRead + AsyncWrite + Send + 'static
    {
        let mut rng = Box::new(OsRng);
        let our_ident = Bytes::copy_from_slice(config.client_ident.as_bytes());
        let send_pipe = SendPipe::new(&mut *rng)?;
        let (transport, writer) = new_transport(send_pipe, our_ident.clone());
        let (event_tx, event_rx) = mpsc::channel(1);

        let conn = Arc::new(Conn::new(ConnInit { config, transport, rng, our_ident, event_tx }));
        conn.interceptors.register(Arc::new(negotiate::KexInterceptor {
            kex: conn.kex.clone(),
            closed: conn.closed.clone(),
            passing_timeout: conn.config.passing_timeout,
        })).detach();

        let client = Client { conn: Arc::downgrade(&conn) };
        let client_rx = ClientReceiver { event_rx };

        let inner = Box::pin(async move {
            let _close_guard = CloseOnDrop(conn.clone());
            let (read_half, write_half) = tokio::io::split(stream);
            let writer_fut = writer.run(write_half);
            tokio::pin!(writer_fut);

            let mut writer_done = false;
            let res = tokio::select! {
                res = recv::run_reader(&conn, read_half) => res,
                res = &mut writer_fut => {
                    writer_done = true;
                    res.and(Err(Error::ConnectionClosed))
                },
                res = negotiate::run_kex(&conn) => res,
                _ = conn.closed.cancelled() => Ok(()),
            };
            // a sequence outside of this future may have failed the connection
            let res = res.and_then(|()| match conn.take_error() {
                Some(err) => Err(err),
                None => Ok(()),
            });

            match res {
                Ok(()) => conn.close(),
                Err(err) => {
                    if let Some(reason_code) = disconnect_reason(&err) {
                        let _ = send_disconnect(&conn, &DisconnectError {
                            reason_code,
                            description: err.to_string(),
                            description_lang: String::new(),
                        });
                    }
                    conn.fail(err);
                },
            }

            conn.transport.close();
            if !writer_done {
                match tokio::time::timeout(conn.config.passing_timeout, writer_fut).await {
                    Ok(Ok(())) => {},
                    Ok(Err(err)) => log::debug!("could not flush the transport: {}", err),
                    Err(_) => log::debug!("flushing the transport took too long"),
                }
            }

            match conn.take_error() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });

        Ok((client, client_rx, ClientFuture { inner }))
    }

    fn upgrade(&self) -> Result<Arc<Conn>> {
        self.conn.upgrade().ok_or(Error::ClientClosed)
    }

    /// Try to authenticate using the "none" method.
    ///
    /// The "none" method (RFC 4252, section 5.2) is useful in two situations:
    ///
    /// - The user can be "authorized" without any authorization, e.g. if the user has a blank
    /// password. Note that most SSH servers disable blank passwords by default.
    /// - You want to determine the list of authentication methods for this user, so you expect to
    /// get an [`AuthFailure`][super::AuthFailure] and look at the [list of methods that can
    /// continue][super::AuthFailure::methods_can_continue].
    ///
    /// If a previous authentication attempt was successful, this call immediately succeeds. If you
    /// start another authentication attempt before this attempt is resolved, it will fail with
    /// [`Error::AuthPending`].
    pub async fn auth_none(&self, username: String) -> Result<AuthResult> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = AuthNone { username };
        auth::run_auth(&conn, guard, &mut method).await?.into_result(&conn)
    }

    /// Try to authenticate using the "password" method (RFC 4252, section 8).
    ///
    /// The server may ask you to change the password, in which case you get
    /// [`AuthResult::ChangePassword`] and you should call
    /// [`auth_password_change()`][Self::auth_password_change()].
    pub async fn auth_password(&self, username: String, password: String) -> Result<AuthResult> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = AuthPassword { username, password, new_password: None };
        auth::run_auth(&conn, guard, &mut method).await?.into_result(&conn)
    }

    /// Try to authenticate using the "password" method while changing the password.
    pub async fn auth_password_change(
        &self,
        username: String,
        old_password: String,
        new_password: String,
    ) -> Result<AuthResult> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = AuthPassword { username, password: old_password, new_password: Some(new_password) };
        auth::run_auth(&conn, guard, &mut method).await?.into_result(&conn)
    }

    /// Try to authenticate using the "publickey" method.
    ///
    /// With the "publickey" method (RFC 4252, section 7), the server knows your public key and you
    /// prove that you own the corresponding private key.
    ///
    /// You must specify the private key `privkey` and also `pubkey_algo`, the pubkey algorithm
    /// that is used to prove that you own the private key. If you supply `pubkey_algo` that is
    /// not compatible with the `privkey`, you will get an [`Error::PrivkeyFormat`].
    ///
    /// If a previous authentication attempt was successful, this call immediately succeeds. If you
    /// start another authentication attempt before this attempt is resolved, it will fail with
    /// [`Error::AuthPending`].
    pub async fn auth_pubkey(
        &self,
        username: String,
        privkey: Privkey,
        pubkey_algo: &'static PubkeyAlgo,
    ) -> Result<AuthResult> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = AuthPubkey { username, privkey, pubkey_algo };
        auth::run_auth(&conn, guard, &mut method).await?.into_result(&conn)
    }

    /// Checks whether "publickey" authentication method would be acceptable.
    ///
    /// Before attempting the "publickey" authentication method using
    /// [`auth_pubkey()`][Self::auth_pubkey()], you may ask the server whether authentication using
    /// the given `username`, `pubkey` and `pubkey_algo` would be acceptable.
    pub async fn check_pubkey(
        &self,
        username: String,
        pubkey: &Pubkey,
        pubkey_algo: &'static PubkeyAlgo,
    ) -> Result<bool> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = CheckPubkey { username, pubkey: pubkey.clone(), pubkey_algo };
        match auth::run_auth(&conn, guard, &mut method).await? {
            AuthOutcome::PubkeyOk | AuthOutcome::Success => Ok(true),
            AuthOutcome::Failure(_) => Ok(false),
            AuthOutcome::ChangePassword(_) => Err(conn.check_violation(
                Error::Protocol("received password change request for a pubkey query"))),
        }
    }

    /// Try to authenticate using the "keyboard-interactive" method (RFC 4256).
    ///
    /// The server sends prompts to the `collector`, which must return one answer for each prompt.
    /// There is no timeout while the collector waits for the user; closing the connection ends the
    /// attempt with [`Error::ConnectionClosed`].
    /// `submethods` is a hint for the server, you can usually leave it empty.
    pub async fn auth_keyboard_interactive<C: PromptCollector>(
        &self,
        username: String,
        submethods: Vec<String>,
        collector: C,
    ) -> Result<AuthResult> {
        let conn = self.upgrade()?;
        let guard = AuthGuard::acquire(&conn)?;
        let mut method = AuthKeyboard { username, submethods, collector: Box::new(collector) };
        auth::run_auth(&conn, guard, &mut method).await?.into_result(&conn)
    }

    /// Get the public key algorithms that the server supports for authentication.
    ///
    /// The server sends this information using the SSH extension packet (RFC 8308, section 3.1).
    /// If we haven't received this packet, this method returns `None`. Before you start
    /// authenticating, `None` might also mean that we simply haven't received the packet yet, so
    /// we suggest that you call [`Self::auth_none()`] first.
    pub fn server_sig_algs(&self) -> Result<Option<Vec<String>>> {
        Ok(self.upgrade()?.server_sig_algs.lock().clone())
    }

    /// Returns true if the server has authenticated you.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.upgrade()?.auth.is_authenticated())
    }

    /// Returns the session identifier (the exchange hash of the first key exchange), or `None`
    /// if the first key exchange has not finished yet.
    pub fn session_id(&self) -> Result<Option<Bytes>> {
        Ok(self.upgrade()?.session_id.get().cloned())
    }

    /// Opens a channel of the given kind.
    ///
    /// We send `SSH_MSG_CHANNEL_OPEN` and wait for the confirmation. Then we send the requests
    /// implied by the `kind` (such as `pty-req` and `shell` for [`ChannelKind::Shell`]). If any
    /// of these requests fails, we close the channel and return [`Error::ChannelReq`].
    ///
    /// If the channel is opened successfully, you receive two objects:
    ///
    /// - [`Channel`] is the handle for interacting with the channel and sending data to the
    /// server.
    /// - [`ChannelReceiver`] receives the [`ChannelEvent`][super::ChannelEvent]s produced by the
    /// channel. You **must** receive these events in time, otherwise the client will stall.
    pub async fn open_channel(&self, kind: ChannelKind, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        let conn = self.upgrade()?;
        conn.wait_ready().await?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        let core = conn.registry.allocate(|local_id| ChannelCore::new(CoreInit {
            local_id,
            state: ChannelState::InitiatedByClient,
            remote: None,
            transport: conn.transport.clone(),
            config,
            response_timeout: conn.config.response_timeout,
            passing_timeout: conn.config.passing_timeout,
            event_tx,
        }))?;

        if let Err(err) = core.open(kind.channel_type(), &kind.open_data()).await {
            conn.registry.remove(core.local_id);
            return Err(conn.check_violation(err))
        }

        let channel = Channel { core };
        if let Err(err) = kind.on_established(&conn, &channel).await {
            log::debug!("setting up channel {} failed, closing it: {}", channel.core.local_id, err);
            let _ = channel.close();
            return Err(err)
        }
        channel.core.set_ready();
        Ok((channel, ChannelReceiver { event_rx }))
    }

    /// Opens a plain `"session"` channel without any requests.
    pub async fn open_session(&self, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        self.open_channel(ChannelKind::Session, config).await
    }

    /// Opens a session and starts the user's shell in it.
    pub async fn open_shell(
        &self,
        pty: Option<PtyRequest>,
        agent_forwarding: bool,
        config: ChannelConfig,
    ) -> Result<(Channel, ChannelReceiver)> {
        self.open_channel(ChannelKind::Shell { pty, agent_forwarding }, config).await
    }

    /// Opens a session and executes `command` in it.
    pub async fn open_exec(&self, command: Bytes, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        self.open_channel(ChannelKind::Exec { command }, config).await
    }

    /// Opens a session and starts the subsystem `name` in it.
    pub async fn open_subsystem(&self, name: String, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        self.open_channel(ChannelKind::Subsystem { name }, config).await
    }

    /// Opens a `"direct-tcpip"` channel, asking the server to connect to `host:port`.
    pub async fn open_direct_tcpip(
        &self,
        host: String,
        port: u32,
        originator_host: String,
        originator_port: u32,
        config: ChannelConfig,
    ) -> Result<(Channel, ChannelReceiver)> {
        let kind = ChannelKind::DirectTcpip { host, port, originator_host, originator_port };
        self.open_channel(kind, config).await
    }

    /// Sends a global request and waits for the reply (RFC 4254, section 4).
    ///
    /// Returns the request-specific data from `SSH_MSG_REQUEST_SUCCESS`, or [`Error::GlobalReq`]
    /// if the server refused the request. Only one global request is sent at a time, concurrent
    /// calls wait for their turn.
    pub async fn global_request(&self, request_name: &str, request_data: &[u8]) -> Result<Bytes> {
        global::global_request(&self.upgrade()?, request_name, request_data).await
    }

    /// Checks that the server is alive with `keepalive@openssh.com`.
    ///
    /// Servers usually refuse this request, but any reply proves that the server is alive.
    pub async fn keepalive(&self) -> Result<()> {
        match global::global_request(&self.upgrade()?, "keepalive@openssh.com", &[]).await {
            Ok(_) | Err(Error::GlobalReq) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Asks the server to listen on `bind_addr:bind_port` and forward the connections to us
    /// (RFC 4254, section 7.1).
    ///
    /// Returns the port that the server bound, which is useful when `bind_port` is 0. The server
    /// then opens a `"forwarded-tcpip"` channel for every connection, which you receive as
    /// [`ClientEvent::ChannelOpen`].
    pub async fn tcpip_forward(&self, bind_addr: &str, bind_port: u32) -> Result<u32> {
        global::tcpip_forward(&self.upgrade()?, bind_addr, bind_port).await
    }

    /// Cancels a forwarding created by [`tcpip_forward()`][Self::tcpip_forward()].
    pub async fn cancel_tcpip_forward(&self, bind_addr: &str, bind_port: u32) -> Result<()> {
        global::cancel_tcpip_forward(&self.upgrade()?, bind_addr, bind_port).await
    }

    /// Trigger key exchange (rekeying).
    ///
    /// Starts a key re-exchange (RFC 4253, section 9). Normally, we trigger the re-exchange
    /// automatically as needed (see [`ClientConfig::rekey_after_bytes`] and
    /// [`ClientConfig::rekey_after_duration`]), but you can use this method to start the exchange
    /// earlier.
    ///
    /// This method returns when the key exchange completes. If an exchange is already in progress,
    /// we simply wait for it to complete, we don't trigger another one.
    pub async fn rekey(&self) -> Result<()> {
        let conn = self.upgrade()?;
        let done_count = conn.kex.done_count();
        conn.kex.request();
        conn.kex.wait_done(done_count, &conn.closed).await
    }

    /// Disconnects from the server and closes the client.
    ///
    /// We send a disconnection message to the server, so that they can be sure that we intended to
    /// close the connection (i.e., it was not closed by a man-in-the-middle attacker). After
    /// this message is sent, the [`ClientFuture`] returns.
    ///
    /// The `error` describes the reasons for the disconnection to the server. You may want to use
    /// [`DisconnectError::by_app()`] as a reasonable default value.
    pub fn disconnect(&self, error: DisconnectError) -> Result<()> {
        let conn = self.upgrade()?;
        send_disconnect(&conn, &error)?;
        conn.close();
        Ok(())
    }
}

fn send_disconnect(conn: &Conn, error: &DisconnectError) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::DISCONNECT);
    payload.put_u32(error.reason_code);
    payload.put_str(&error.description);
    payload.put_str(&error.description_lang);
    conn.transport.send(payload.finish())?;
    log::debug!("sending SSH_MSG_DISCONNECT: {}", error);
    Ok(())
}

/// Reason code that we send to the server when the connection fails on our side.
fn disconnect_reason(err: &Error) -> Option<u32> {
    match err {
        Error::Mac => Some(disconnect::MAC_ERROR),
        Error::AlgoNegotiate(_) | Error::Signature | Error::Crypto(_) => Some(disconnect::KEY_EXCHANGE_FAILED),
        Error::PubkeyAccept(_) => Some(disconnect::HOST_KEY_NOT_VERIFIABLE),
        Error::Protocol(_) | Error::Decode(_) | Error::Timeout => Some(disconnect::PROTOCOL_ERROR),
        _ => None,
    }
}

struct CloseOnDrop(Arc<Conn>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Receiving half of a [`Client`].
///
/// [`ClientReceiver`] provides you with the [`ClientEvent`]s, various events that are produced
/// during the life of the connection. You can usually ignore them, except
/// [`ClientEvent::ServerPubkey`], which is used to verify the server's public key (if you ignore
/// that event, we assume that you reject the key and we abort the connection). However, you
/// **must** receive these events, otherwise the client will stall when the internal buffer of
/// events fills up.
pub struct ClientReceiver {
    event_rx: mpsc::Receiver<ClientEvent>,
}

impl ClientReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the connection was closed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.event_rx.recv().await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ClientEvent>> {
        self.event_rx.poll_recv(cx)
    }
}

/// Future that drives the connection.
///
/// This future reads packets from the stream and dispatches them, writes the packets that we
/// send and runs the key exchanges. You must poll this future, usually by spawning a task for
/// it. The future completes with the error that closed the connection, or with `Ok(())` after
/// you called [`Client::disconnect()`].
///
/// If you drop this future, the connection is closed.
pub struct ClientFuture {
    inner: BoxFuture<'static, Result<()>>,
}

impl Future for ClientFuture {
    type Output = Result<()>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        self.inner.as_mut().poll(cx)
    }
}

/// Configuration of a [`Client`].
///
/// You should start from the [default][Default] instance, which has reasonable default
/// configuration, and modify it according to your needs. You may also find the method
/// [`ClientConfig::with()`] syntactically convenient.
///
/// If you need compatibility with old SSH servers that use outdated crypto, you may use
/// [`ClientConfig::default_compatible_less_secure()`]. However, this configuration is less secure.
///
/// This struct is `#[non_exhaustive]`, so we may add more fields without breaking backward
/// compatibility.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Supported [key exchange algorithms][crate::kex].
    ///
    /// We will use the first algorithm that is also supported by the server. If there is no
    /// overlap, the connnection will abort.
    pub kex_algos: Vec<&'static KexAlgo>,

    /// Supported [server public key algorithms][crate::pubkey].
    ///
    /// We will use the first algorithm that is also supported by the server. If there is no
    /// overlap, the connnection will abort.
    pub server_pubkey_algos: Vec<&'static PubkeyAlgo>,

    /// Supported [encryption algorithms][crate::cipher].
    ///
    /// We will use the first algorithm that is also supported by the server. If there is no
    /// overlap, the connnection will abort.
    pub cipher_algos: Vec<&'static CipherAlgo>,

    /// Supported [message authentication algorithms][crate::mac].
    ///
    /// We will use the first algorithm that is also supported by the server. If there is no
    /// overlap, the connnection will abort.
    pub mac_algos: Vec<&'static MacAlgo>,

    /// Start key re-exchange after this many bytes.
    ///
    /// The amount of data that symmetric ciphers can securely encrypt is usually limited, so we
    /// should periodically repeat key exchange to generate new symmetric keys (RFC 4253, section
    /// 9). We will trigger a key re-exchange after this number of bytes is transmitted or
    /// received.
    ///
    /// By default, this configuration is set to 2^30 bytes (as recommended by the SSH
    /// specification).
    pub rekey_after_bytes: u64,

    /// Start key re-exchange after this amount of time.
    ///
    /// By default, we perform the re-exchange after one hour (as recommended by the SSH
    /// specification).
    pub rekey_after_duration: Duration,

    /// How long we wait for a reply from the server.
    ///
    /// This bounds every exchange that waits for the server, such as the key exchange, each step
    /// of the authentication, opening a channel or a channel request. If the server does not
    /// reply in time, the operation fails with [`Error::Timeout`].
    pub response_timeout: Duration,

    /// How long the receive path waits to hand a packet over to the operation that expects it.
    ///
    /// If the operation does not take the packet in time, the connection fails, because we cannot
    /// read further packets while we hold this one.
    pub passing_timeout: Duration,

    /// Our identification string, sent to the server before anything else (RFC 4253, section
    /// 4.2). It must start with `SSH-2.0-`.
    pub client_ident: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            kex_algos: vec![
                &kex::CURVE25519_SHA256, &kex::CURVE25519_SHA256_LIBSSH,
                &kex::ECDH_SHA2_NISTP256, &kex::ECDH_SHA2_NISTP384,
                &kex::DIFFIE_HELLMAN_GROUP16_SHA512, &kex::DIFFIE_HELLMAN_GROUP18_SHA512,
                &kex::DIFFIE_HELLMAN_GROUP14_SHA256,
            ],
            server_pubkey_algos: vec![
                &pubkey::SSH_ED25519,
                &pubkey::ECDSA_SHA2_NISTP256, &pubkey::ECDSA_SHA2_NISTP384,
                &pubkey::RSA_SHA2_256, &pubkey::RSA_SHA2_512,
            ],
            cipher_algos: vec![
                &cipher::CHACHA20_POLY1305,
                &cipher::AES128_GCM, &cipher::AES256_GCM,
                &cipher::AES128_CTR, &cipher::AES192_CTR, &cipher::AES256_CTR,
            ],
            mac_algos: vec![
                &mac::HMAC_SHA2_256, &mac::HMAC_SHA2_512,
            ],
            rekey_after_bytes: 1 << 30,
            rekey_after_duration: Duration::from_secs(60 * 60),
            response_timeout: Duration::from_secs(10),
            passing_timeout: Duration::from_secs(1),
            client_ident: format!("SSH-2.0-sshmux_{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Default configuration with higher compatibility and lower security.
    ///
    /// Returns a configuration that includes support for outdated and potentially insecure crypto,
    /// notably SHA-1. **Use at your own risk!**.
    pub fn default_compatible_less_secure() -> ClientConfig {
        Self::default().with(|c| {
            c.kex_algos.push(&kex::DIFFIE_HELLMAN_GROUP14_SHA1);
            c.server_pubkey_algos.push(&pubkey::SSH_RSA_SHA1);
            c.cipher_algos.extend_from_slice(&[
                &cipher::AES128_CBC, &cipher::AES192_CBC, &cipher::AES256_CBC
            ]);
            c.mac_algos.push(&mac::HMAC_SHA1);
        })
    }

    /// Mutate `self` in a closure.
    ///
    /// This method applies your closure to `self` and returns the mutated configuration.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}
