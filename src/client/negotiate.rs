use bytes::Bytes;
use parking_lot::Mutex;
use rand::RngCore as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use crate::cipher::{CipherAlgo, CipherAlgoVariant, PacketDecrypt, PacketEncrypt};
use crate::codec::{Packet, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result, AlgoNegotiateError};
use crate::kex::{self, KexAlgo, KexInput};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{Pubkey, PubkeyAlgo};
use super::client::ClientConfig;
use super::client_event::{AcceptPubkey, ClientEvent};
use super::conn::Conn;
use super::interceptor::{BoxFuture, Interceptor, Verdict};
use super::rendezvous::Rendezvous;
use super::transport::SendKeys;

/// Phase of the key exchange (RFC 4253, sections 7 to 9).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) enum KexPhase {
    Idle,
    InitiatedByClient,
    InitiatedByServer,
    KexInitExchanged,
    WaitKexReply,
    WaitNewKeys,
    WaitCipherSwap,
    Failed,
    ConnectionClosed,
}

/// Drives the key exchange and swaps the keys of the connection.
///
/// The exchange runs in [`run_kex()`], which receives its packets from [`KexInterceptor`] through
/// a [`Rendezvous`]. The interceptor advances the phase as packets arrive, so that it can tell
/// which packets are expected even before the exchange task gets to them.
pub(super) struct KeyExchanger {
    phase: Mutex<KexPhase>,
    slot: Rendezvous<KexPacket>,
    start: Notify,
    requested: AtomicBool,
    guess_follows: AtomicBool,
    done_tx: watch::Sender<u64>,
    last_done: Mutex<Option<Instant>>,
    server_pubkey: Mutex<Option<Pubkey>>,
}

struct KexPacket {
    packet: Packet,
    installed_tx: Option<oneshot::Sender<()>>,
}

impl KeyExchanger {
    pub fn new() -> KeyExchanger {
        KeyExchanger {
            phase: Mutex::new(KexPhase::Idle),
            slot: Rendezvous::new(),
            start: Notify::new(),
            requested: AtomicBool::new(false),
            guess_follows: AtomicBool::new(false),
            done_tx: watch::channel(0).0,
            last_done: Mutex::new(None),
            server_pubkey: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> KexPhase {
        *self.phase.lock()
    }

    /// Number of finished key exchanges.
    pub fn done_count(&self) -> u64 {
        *self.done_tx.borrow()
    }

    /// Asks the exchange task to start a key exchange initiated by us.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.start.notify_one();
    }

    /// Starts an automatic rekey if the connection has transferred too many bytes with the
    /// current keys.
    pub fn check_rekey_bytes(&self, recv_bytes: u64, sent_bytes: u64, config: &ClientConfig) {
        if self.phase() != KexPhase::Idle || self.done_count() == 0 {
            return
        }
        if self.requested.load(Ordering::SeqCst) {
            return
        }
        if recv_bytes.max(sent_bytes) >= config.rekey_after_bytes {
            log::debug!("starting rekey after {} bytes received and {} bytes sent", recv_bytes, sent_bytes);
            self.request();
        }
    }

    /// Waits until more than `after` key exchanges have finished.
    pub async fn wait_done(&self, after: u64, closed: &CancellationToken) -> Result<()> {
        let mut done_rx = self.done_tx.subscribe();
        loop {
            if *done_rx.borrow_and_update() > after {
                return Ok(())
            }
            if closed.is_cancelled() {
                return Err(Error::ConnectionClosed)
            }
            tokio::select! {
                res = done_rx.changed() => res.map_err(|_| Error::ConnectionClosed)?,
                _ = closed.cancelled() => return Err(Error::ConnectionClosed),
            }
        }
    }

    pub fn close(&self) {
        {
            let mut phase = self.phase.lock();
            if *phase != KexPhase::Failed {
                *phase = KexPhase::ConnectionClosed;
            }
        }
        self.slot.close();
    }

    fn set_phase(&self, phase: KexPhase) {
        let mut current = self.phase.lock();
        if !matches!(*current, KexPhase::Failed | KexPhase::ConnectionClosed) {
            log::trace!("kex phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    fn finish(&self) {
        self.set_phase(KexPhase::Idle);
        self.requested.store(false, Ordering::SeqCst);
        *self.last_done.lock() = Some(Instant::now());
        self.done_tx.send_modify(|count| *count += 1);
    }

    fn rekey_deadline(&self, after: Duration) -> Option<Instant> {
        self.last_done.lock().map(|last_done| last_done + after)
    }
}

/// Claims `SSH_MSG_KEXINIT`, `SSH_MSG_NEWKEYS` and the kex method messages 30 to 49.
pub(super) struct KexInterceptor {
    pub kex: Arc<KeyExchanger>,
    pub closed: CancellationToken,
    pub passing_timeout: Duration,
}

impl Interceptor for KexInterceptor {
    fn offer<'a>(&'a self, packet: &'a Packet) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            let msg_id = packet.msg_id;
            if msg_id != msg::KEXINIT && msg_id != msg::NEWKEYS && !(30..=49).contains(&msg_id) {
                return Ok(Verdict::PassThrough)
            }

            // a guessed packet goes to the exchange task, which decides whether to use it
            let is_guess = if msg_id == msg::KEXINIT {
                self.kex.guess_follows.store(guessed_packet_follows(packet)?, Ordering::SeqCst);
                false
            } else {
                (30..=49).contains(&msg_id) && self.kex.guess_follows.swap(false, Ordering::SeqCst)
            };

            let (installed_tx, installed_rx) = {
                let mut phase = self.kex.phase.lock();
                match (msg_id, *phase) {
                    (msg::KEXINIT, KexPhase::Idle) => {
                        log::debug!("server initiated a key exchange");
                        *phase = KexPhase::InitiatedByServer;
                        self.kex.start.notify_one();
                        (None, None)
                    },
                    (msg::KEXINIT, KexPhase::InitiatedByClient) => {
                        *phase = KexPhase::KexInitExchanged;
                        (None, None)
                    },
                    (msg::KEXINIT, _) =>
                        return Err(Error::Protocol("received unexpected SSH_MSG_KEXINIT")),
                    (msg::NEWKEYS, KexPhase::WaitNewKeys) => {
                        *phase = KexPhase::WaitCipherSwap;
                        let (tx, rx) = oneshot::channel();
                        (Some(tx), Some(rx))
                    },
                    (msg::NEWKEYS, _) =>
                        return Err(Error::Protocol("received unexpected SSH_MSG_NEWKEYS")),
                    (_, KexPhase::InitiatedByServer | KexPhase::KexInitExchanged) if is_guess =>
                        (None, None),
                    (_, KexPhase::WaitKexReply) => {
                        *phase = KexPhase::WaitNewKeys;
                        (None, None)
                    },
                    (_, _) =>
                        return Err(Error::Protocol("received unexpected key exchange message")),
                }
            };

            let kex_packet = KexPacket { packet: packet.clone(), installed_tx };
            if !self.kex.slot.try_set(kex_packet, self.passing_timeout).await {
                if self.closed.is_cancelled() {
                    return Err(Error::ConnectionClosed)
                }
                return Err(Error::Protocol("key exchange did not accept a packet in time"))
            }

            // no packet after SSH_MSG_NEWKEYS may be decrypted before the new keys are installed
            if let Some(installed_rx) = installed_rx {
                tokio::select! {
                    res = installed_rx => res.map_err(|_| {
                        Error::Protocol("key exchange failed before new keys were installed")
                    })?,
                    _ = self.closed.cancelled() => return Err(Error::ConnectionClosed),
                }
            }
            Ok(Verdict::Consumed)
        })
    }

    fn on_close(&self) {
        self.kex.close();
    }
}

/// Runs key exchanges for the whole lifetime of the connection.
///
/// Returns only with an error, which is fatal for the connection.
pub(super) async fn run_kex(conn: &Arc<Conn>) -> Result<()> {
    let kex = &conn.kex;
    loop {
        let deadline = kex.rekey_deadline(conn.config.rekey_after_duration);
        tokio::select! {
            _ = kex.start.notified() => {},
            _ = sleep_until_opt(deadline) => {
                log::debug!("starting rekey after {:?}", conn.config.rekey_after_duration);
                kex.requested.store(true, Ordering::SeqCst);
            },
        }

        let by_server = {
            let mut phase = kex.phase.lock();
            match *phase {
                KexPhase::InitiatedByServer => true,
                KexPhase::Idle if kex.requested.swap(false, Ordering::SeqCst) => {
                    *phase = KexPhase::InitiatedByClient;
                    false
                },
                _ => continue,
            }
        };

        if let Err(err) = run_handshake(conn, by_server).await {
            log::debug!("key exchange failed: {}", err);
            kex.set_phase(KexPhase::Failed);
            return Err(err)
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn run_handshake(conn: &Arc<Conn>, by_server: bool) -> Result<()> {
    let kex = &conn.kex;
    let timeout = conn.config.response_timeout;
    let is_first = conn.session_id.get().is_none();

    let our_kex_init = send_kex_init(conn, is_first)?;
    let their_packet = kex.slot.try_get(timeout).await?.packet;
    let their_kex_init = recv_kex_init(&their_packet)?;
    if by_server {
        kex.set_phase(KexPhase::KexInitExchanged);
    }
    let algos = negotiate_algos(&our_kex_init, &their_kex_init)?;

    // RFC 4253, section 7
    if their_kex_init.first_kex_packet_follows {
        let guessed = kex.slot.try_get(timeout).await?.packet;
        if is_guess_right(&their_kex_init, &algos) {
            // all our methods start with a packet from the client, the server cannot guess one
            return Err(Error::Protocol("server sent a key exchange packet before the client"))
        }
        log::debug!("ignoring wrongly guessed key exchange packet {} from the server", guessed.msg_id);
    }

    let mut method = {
        let mut rng = conn.rng.lock();
        (algos.kex.make_kex)(&mut **rng)?
    };
    kex.set_phase(KexPhase::WaitKexReply);
    conn.transport.send(method.send_init()?)?;

    let reply = kex.slot.try_get(timeout).await?.packet;
    if reply.msg_id != msg::KEXDH_REPLY {
        return Err(Error::Protocol("received unexpected message instead of key exchange reply"))
    }

    let their_ident = conn.their_ident.get().ok_or(Error::Protocol("identification was not received"))?;
    let kex_input = KexInput {
        client_ident: &conn.our_ident,
        server_ident: their_ident,
        client_kex_init: &our_kex_init.payload,
        server_kex_init: &their_kex_init.payload,
    };
    let kex_output = method.recv_reply(&mut reply.decode(), kex_input)?;
    log::debug!("finished kex {:?}", algos.kex.name);

    let pubkey = Pubkey::decode(kex_output.server_pubkey.clone())?;
    (algos.server_pubkey.verify)(&pubkey, &kex_output.exchange_hash, kex_output.server_exchange_hash_sign.clone())?;
    log::debug!("verified signature of exchange hash with server pubkey {}", pubkey);

    if is_first {
        accept_pubkey(conn, pubkey.clone()).await?;
        *kex.server_pubkey.lock() = Some(pubkey);
    } else if kex.server_pubkey.lock().as_ref() != Some(&pubkey) {
        return Err(Error::Protocol("server presented a different host key when rekeying"))
    }

    let session_id = conn.session_id
        .get_or_init(|| Bytes::copy_from_slice(&kex_output.exchange_hash))
        .clone();

    let (send_keys, recv_keys) = {
        let compute_hash = |data: &[u8]| method.compute_hash(data);
        let derive = |key_type: u8, key_len: usize| kex::derive_key(
            &compute_hash,
            &kex_output.shared_secret_be,
            &kex_output.exchange_hash,
            key_type,
            &session_id,
            key_len,
        );
        let send_keys = make_send_keys(algos.cipher_cts, algos.mac_cts, &derive);
        let recv_keys = make_recv_keys(algos.cipher_stc, algos.mac_stc, &derive);
        (send_keys, recv_keys)
    };
    conn.transport.send_new_keys(send_keys)?;

    let new_keys = kex.slot.try_get(timeout).await?;
    let (decrypt, block_len, tag_len) = recv_keys;
    conn.recv_pipe.lock().set_decrypt(decrypt, block_len, tag_len);
    if let Some(installed_tx) = new_keys.installed_tx {
        let _ = installed_tx.send(());
    }
    log::debug!("received SSH_MSG_NEWKEYS and applied new keys");

    kex.finish();
    Ok(())
}

async fn accept_pubkey(conn: &Conn, pubkey: Pubkey) -> Result<()> {
    let (accept_tx, accept_rx) = oneshot::channel();
    let event = ClientEvent::ServerPubkey(pubkey, AcceptPubkey { accept_tx });
    // if the receiver is gone, `accept_tx` is dropped and we reject the key below
    let _ = conn.event_tx.send(event).await;
    accept_rx.await.map_err(|err| Error::PubkeyAccept(Box::new(err)))??;
    log::debug!("server pubkey was accepted");
    Ok(())
}

struct OurKexInit {
    payload: Bytes,
    kex_algos: Vec<&'static KexAlgo>,
    server_pubkey_algos: Vec<&'static PubkeyAlgo>,
    cipher_algos: Vec<&'static CipherAlgo>,
    mac_algos: Vec<&'static MacAlgo>,
}

#[derive(Debug)]
struct TheirKexInit {
    payload: Bytes,
    kex_algos: Vec<String>,
    server_pubkey_algos: Vec<String>,
    cipher_algos_cts: Vec<String>,
    cipher_algos_stc: Vec<String>,
    mac_algos_cts: Vec<String>,
    mac_algos_stc: Vec<String>,
    first_kex_packet_follows: bool,
}

struct Algos {
    kex: &'static KexAlgo,
    server_pubkey: &'static PubkeyAlgo,
    cipher_cts: &'static CipherAlgo,
    cipher_stc: &'static CipherAlgo,
    mac_cts: &'static MacAlgo,
    mac_stc: &'static MacAlgo,
}

fn send_kex_init(conn: &Conn, is_first: bool) -> Result<OurKexInit> {
    let config = &conn.config;
    let mut cookie = [0; 16];
    conn.rng.lock().try_fill_bytes(&mut cookie)
        .map_err(|_| Error::Random("could not generate random cookie"))?;

    let mut kex_names = get_algo_names(&config.kex_algos);
    if is_first {
        // RFC 8308: we want to receive SSH_MSG_EXT_INFO after the first key exchange
        kex_names.push("ext-info-c");
    }
    let cipher_names = get_algo_names(&config.cipher_algos);
    let mac_names = get_algo_names(&config.mac_algos);

    // RFC 4253, section 7.1
    let mut payload = PacketEncode::with_msg(msg::KEXINIT);
    payload.put_raw(&cookie);
    payload.put_name_list(&kex_names);
    payload.put_name_list(&get_algo_names(&config.server_pubkey_algos));
    payload.put_name_list(&cipher_names);
    payload.put_name_list(&cipher_names);
    payload.put_name_list(&mac_names);
    payload.put_name_list(&mac_names);
    payload.put_name_list(&["none"]);
    payload.put_name_list(&["none"]);
    payload.put_name_list::<&str>(&[]);
    payload.put_name_list::<&str>(&[]);
    payload.put_bool(false);
    payload.put_u32(0);
    let payload = payload.finish();
    conn.transport.send_kex_init(payload.clone())?;
    log::debug!("sending SSH_MSG_KEXINIT");

    Ok(OurKexInit {
        payload,
        kex_algos: config.kex_algos.clone(),
        server_pubkey_algos: config.server_pubkey_algos.clone(),
        cipher_algos: config.cipher_algos.clone(),
        mac_algos: config.mac_algos.clone(),
    })
}

fn recv_kex_init(packet: &Packet) -> Result<TheirKexInit> {
    if packet.msg_id != msg::KEXINIT {
        return Err(Error::Protocol("expected SSH_MSG_KEXINIT"))
    }

    // RFC 4253, section 7.1
    let mut payload = packet.decode();
    payload.skip(16)?; // cookie
    let kex_algos = payload.get_name_list()?;
    let server_pubkey_algos = payload.get_name_list()?;
    let cipher_algos_cts = payload.get_name_list()?;
    let cipher_algos_stc = payload.get_name_list()?;
    let mac_algos_cts = payload.get_name_list()?;
    let mac_algos_stc = payload.get_name_list()?;
    payload.get_name_list()?; // compression_algorithms_client_to_server
    payload.get_name_list()?; // compression_algorithms_server_to_client
    payload.get_name_list()?; // languages_client_to_server
    payload.get_name_list()?; // languages_server_to_client
    let first_kex_packet_follows = payload.get_bool()?;
    payload.get_u32()?; // reserved

    let kex_init = TheirKexInit {
        payload: packet.payload.clone(),
        kex_algos,
        server_pubkey_algos,
        cipher_algos_cts,
        cipher_algos_stc,
        mac_algos_cts,
        mac_algos_stc,
        first_kex_packet_follows,
    };
    log::debug!("received SSH_MSG_KEXINIT: {:?}", kex_init);
    Ok(kex_init)
}

/// Reads the `first_kex_packet_follows` flag of `SSH_MSG_KEXINIT`.
fn guessed_packet_follows(packet: &Packet) -> Result<bool> {
    let mut payload = packet.decode();
    payload.skip(16)?; // cookie
    for _ in 0..10 {
        payload.get_bytes()?; // name-lists
    }
    payload.get_bool()
}

/// The guess is wrong if the server's preferred kex or host key algorithm was not negotiated.
fn is_guess_right(their: &TheirKexInit, algos: &Algos) -> bool {
    their.kex_algos.first().map(String::as_str) == Some(algos.kex.name) &&
        their.server_pubkey_algos.first().map(String::as_str) == Some(algos.server_pubkey.name)
}

fn negotiate_algos(our: &OurKexInit, their: &TheirKexInit) -> Result<Algos> {
    let kex = negotiate_algo(&our.kex_algos, &their.kex_algos, "key exchange")?;
    let server_pubkey = negotiate_algo(
        &our.server_pubkey_algos, &their.server_pubkey_algos, "server public key")?;
    let cipher_cts = negotiate_algo(&our.cipher_algos, &their.cipher_algos_cts, "cipher client-to-server")?;
    let cipher_stc = negotiate_algo(&our.cipher_algos, &their.cipher_algos_stc, "cipher server-to-client")?;

    // AEAD ciphers authenticate the packets themselves
    let mac_cts = if cipher_cts.is_aead() {
        &mac::NONE
    } else {
        negotiate_algo(&our.mac_algos, &their.mac_algos_cts, "mac client-to-server")?
    };
    let mac_stc = if cipher_stc.is_aead() {
        &mac::NONE
    } else {
        negotiate_algo(&our.mac_algos, &their.mac_algos_stc, "mac server-to-client")?
    };

    Ok(Algos { kex, server_pubkey, cipher_cts, cipher_stc, mac_cts, mac_stc })
}

fn negotiate_algo<A: NamedAlgo + ?Sized>(
    our_algos: &[&'static A],
    their_algos: &[String],
    name: &'static str,
) -> Result<&'static A> {
    for our_algo in our_algos.iter() {
        if their_algos.iter().any(|their_algo| our_algo.name() == their_algo.as_str()) {
            log::debug!("negotiated algo {:?} for {}", our_algo.name(), name);
            return Ok(*our_algo)
        }
    }

    Err(Error::AlgoNegotiate(AlgoNegotiateError {
        algo_name: name.into(),
        our_algos: our_algos.iter().map(|a| a.name().into()).collect(),
        their_algos: their_algos.into(),
    }))
}

fn get_algo_names<A: NamedAlgo + ?Sized>(algos: &[&A]) -> Vec<&'static str> {
    algos.iter().map(|algo| algo.name()).collect()
}

trait NamedAlgo { fn name(&self) -> &'static str; }
impl NamedAlgo for KexAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CipherAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for MacAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for PubkeyAlgo { fn name(&self) -> &'static str { self.name } }

// RFC 4253, section 7.2: A/C/E are client-to-server, B/D/F are server-to-client
fn make_send_keys(cipher: &CipherAlgo, mac: &MacAlgo, derive: &dyn Fn(u8, usize) -> Vec<u8>) -> SendKeys {
    let key = derive(b'C', cipher.key_len);
    let iv = derive(b'A', cipher.iv_len);
    match cipher.variant {
        CipherAlgoVariant::Standard(ref algo) => {
            let mac_key = derive(b'E', mac.key_len);
            let encrypt = PacketEncrypt::EncryptAndMac((algo.make_encrypt)(&key, &iv), (mac.make_mac)(&mac_key));
            SendKeys { encrypt, block_len: cipher.block_len, tag_len: mac.tag_len }
        },
        CipherAlgoVariant::Aead(ref algo) => {
            let encrypt = PacketEncrypt::Aead((algo.make_encrypt)(&key, &iv));
            SendKeys { encrypt, block_len: cipher.block_len, tag_len: algo.tag_len }
        },
    }
}

fn make_recv_keys(
    cipher: &CipherAlgo,
    mac: &MacAlgo,
    derive: &dyn Fn(u8, usize) -> Vec<u8>,
) -> (PacketDecrypt, usize, usize) {
    let key = derive(b'D', cipher.key_len);
    let iv = derive(b'B', cipher.iv_len);
    match cipher.variant {
        CipherAlgoVariant::Standard(ref algo) => {
            let mac_key = derive(b'F', mac.key_len);
            let decrypt = PacketDecrypt::EncryptAndMac((algo.make_decrypt)(&key, &iv), (mac.make_mac)(&mac_key));
            (decrypt, cipher.block_len, mac.tag_len)
        },
        CipherAlgoVariant::Aead(ref algo) => {
            let decrypt = PacketDecrypt::Aead((algo.make_decrypt)(&key, &iv));
            (decrypt, cipher.block_len, algo.tag_len)
        },
    }
}
