//! Scripted SSH server that runs in the same process as the client.
//!
//! The peer speaks the transport protocol with one fixed set of algorithms (curve25519-sha256,
//! ssh-ed25519 and a cipher of the test's choice) and exposes the rest of the protocol as plain
//! packets, so that each test can script exactly what the server sends and check exactly what the
//! client sends.
use bytes::{Bytes, BytesMut};
use rand::{RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::cipher::{CipherAlgo, CipherAlgoVariant, PacketDecrypt, PacketEncrypt};
use crate::codec::{Packet, PacketDecode, PacketEncode, RecvPipe, SendPipe};
use crate::codes::msg;
use crate::error::Result;
use crate::kex::{self, KexInput};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{self, Privkey};
use super::{Channel, ChannelConfig, ChannelReceiver, Client, ClientConfig, ClientEvent};

const SERVER_IDENT: &[u8] = b"SSH-2.0-TestPeer_0.1";
const HOST_KEY_SEED: [u8; 32] = *b"host key of the scripted peer!!!";
const DUPLEX_LEN: usize = 256 << 10;
const READ_LEN: usize = 16 << 10;
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the peer listens to make sure that the client sends nothing.
pub(super) const SILENCE: Duration = Duration::from_millis(100);

/// Our channel id of channels opened by the client.
pub(super) const PEER_CHANNEL: u32 = 1000;

pub(super) struct TestClient {
    pub client: Client,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub future: JoinHandle<Result<()>>,
}

/// Starts a client connected to a new peer and runs the first key exchange.
///
/// The host key of the peer is accepted automatically, all other client events are forwarded to
/// [`TestClient::events`].
pub(super) async fn connect(cipher: &'static CipherAlgo) -> (TestClient, TestPeer) {
    let _ = env_logger::builder().is_test(true).try_init();

    let host_key = Privkey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&HOST_KEY_SEED).into());
    let host_pubkey = host_key.pubkey();

    let (client_stream, peer_stream) = tokio::io::duplex(DUPLEX_LEN);
    let (client, mut client_rx, client_fut) = Client::open(client_stream, ClientConfig::default()).unwrap();
    let future = tokio::spawn(client_fut);

    let (event_tx, events) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            match event {
                ClientEvent::ServerPubkey(pubkey, accept) => {
                    if pubkey == host_pubkey {
                        accept.accept();
                    }
                },
                event => { let _ = event_tx.send(event); },
            }
        }
    });

    let mut peer = TestPeer::new(peer_stream, host_key, cipher, &mac::HMAC_SHA2_256);
    peer.handshake().await;
    (TestClient { client, events, future }, peer)
}

pub(super) struct TestPeer {
    stream: DuplexStream,
    recv_pipe: RecvPipe,
    send_pipe: SendPipe,
    rng: ChaCha8Rng,
    host_key: Privkey,
    cipher: &'static CipherAlgo,
    mac: &'static MacAlgo,
    client_ident: Bytes,
    session_id: Option<Vec<u8>>,
    pending: VecDeque<Packet>,
}

/// Deviations from a plain key exchange in [`TestPeer::kex_with()`].
#[derive(Default)]
pub(super) struct KexScript {
    /// Key exchange packet sent right after our `SSH_MSG_KEXINIT` as a wrong guess.
    pub wrong_guess: Option<Bytes>,
    /// Packet sent under the new keys in the same write as our `SSH_MSG_NEWKEYS`.
    pub after_new_keys: Option<Bytes>,
}

/// `SSH_MSG_USERAUTH_REQUEST` with the common fields decoded.
pub(super) struct AuthRequest {
    pub packet: Packet,
    pub username: String,
    pub method: String,
    pub data: PacketDecode,
}

/// `SSH_MSG_CHANNEL_OPEN` with the common fields decoded.
pub(super) struct ChannelOpen {
    pub channel_type: String,
    pub client_id: u32,
    pub window: u32,
    pub max_packet: u32,
    pub data: PacketDecode,
}

/// `SSH_MSG_CHANNEL_REQUEST` with the common fields decoded.
pub(super) struct ChannelRequest {
    pub request_type: String,
    pub want_reply: bool,
    pub data: PacketDecode,
}

impl TestPeer {
    fn new(
        stream: DuplexStream,
        host_key: Privkey,
        cipher: &'static CipherAlgo,
        mac: &'static MacAlgo,
    ) -> TestPeer {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let send_pipe = SendPipe::new(&mut rng).unwrap();
        TestPeer {
            stream,
            recv_pipe: RecvPipe::new(),
            send_pipe,
            rng,
            host_key,
            cipher,
            mac,
            client_ident: Bytes::new(),
            session_id: None,
            pending: VecDeque::new(),
        }
    }

    async fn handshake(&mut self) {
        self.send_pipe.feed_ident(SERVER_IDENT);
        self.flush().await;

        self.client_ident = loop {
            if let Some(ident) = self.recv_pipe.consume_ident().unwrap() {
                break ident
            }
            self.read_more().await;
        };
        assert!(self.client_ident.starts_with(b"SSH-2.0-sshmux_"));

        self.kex().await;
    }

    pub fn session_id(&self) -> &[u8] {
        self.session_id.as_deref().unwrap()
    }

    /// Runs a key exchange, starting it if the client did not.
    ///
    /// Packets that the client sent before its `SSH_MSG_KEXINIT` are kept for
    /// [`recv_packet()`][Self::recv_packet()]. Between `SSH_MSG_KEXINIT` and `SSH_MSG_NEWKEYS`,
    /// the client must send only the key exchange messages.
    pub async fn kex(&mut self) {
        self.kex_with(KexScript::default()).await
    }

    pub async fn kex_with(&mut self, script: KexScript) {
        let our_kex_init = self.kex_init_payload(script.wrong_guess.is_some());
        self.send_pipe.feed_packet(&our_kex_init).unwrap();
        if let Some(guess) = script.wrong_guess {
            self.send_pipe.feed_packet(&guess).unwrap();
        }
        self.flush().await;

        let their_kex_init = loop {
            let packet = self.read_packet_timeout().await;
            if packet.msg_id == msg::KEXINIT {
                break packet
            }
            self.pending.push_back(packet);
        };

        let init = self.read_packet_timeout().await;
        assert_eq!(init.msg_id, msg::KEX_ECDH_INIT, "client sent {} during key exchange", init.msg_id);
        let their_eph_pubkey = init.decode().get_bytes().unwrap();
        let their_eph_pubkey = <[u8; 32]>::try_from(their_eph_pubkey.as_ref()).unwrap();

        let our_eph_privkey = x25519_dalek::EphemeralSecret::random_from_rng(&mut self.rng);
        let our_eph_pubkey = x25519_dalek::PublicKey::from(&our_eph_privkey);
        let shared_secret = our_eph_privkey.diffie_hellman(&x25519_dalek::PublicKey::from(their_eph_pubkey));
        let shared_secret_be = shared_secret.as_bytes().to_vec();

        let host_pubkey = self.host_key.pubkey().encode();
        let kex_input = KexInput {
            client_ident: &self.client_ident,
            server_ident: SERVER_IDENT,
            client_kex_init: &their_kex_init.payload,
            server_kex_init: &our_kex_init,
        };
        let mut exchange_data = kex_input.encode_prefix(&host_pubkey);
        exchange_data.put_bytes(&their_eph_pubkey);
        exchange_data.put_bytes(our_eph_pubkey.as_bytes());
        exchange_data.put_mpint_uint_be(&shared_secret_be);
        let exchange_hash = kex::compute_hash_sha256(&exchange_data.finish());
        let signature = (pubkey::SSH_ED25519.sign)(&self.host_key, &exchange_hash).unwrap();

        let mut reply = PacketEncode::with_msg(msg::KEX_ECDH_REPLY);
        reply.put_bytes(&host_pubkey);
        reply.put_bytes(our_eph_pubkey.as_bytes());
        reply.put_bytes(&signature);
        self.send(reply.finish()).await;
        self.send_pipe.feed_packet(&PacketEncode::with_msg(msg::NEWKEYS).finish()).unwrap();

        let session_id = self.session_id.get_or_insert_with(|| exchange_hash.clone()).clone();
        let derive = |key_type: u8, key_len: usize| kex::derive_key(
            &kex::compute_hash_sha256, &shared_secret_be, &exchange_hash, key_type, &session_id, key_len,
        );

        let (encrypt, block_len, tag_len) = make_encrypt(self.cipher, self.mac, &derive);
        self.send_pipe.set_encrypt(encrypt, block_len, tag_len);
        if let Some(payload) = script.after_new_keys {
            self.send_pipe.feed_packet(&payload).unwrap();
        }
        self.flush().await;

        let new_keys = self.read_packet_timeout().await;
        assert_eq!(new_keys.msg_id, msg::NEWKEYS, "client sent {} instead of SSH_MSG_NEWKEYS", new_keys.msg_id);
        let (decrypt, block_len, tag_len) = make_decrypt(self.cipher, self.mac, &derive);
        self.recv_pipe.set_decrypt(decrypt, block_len, tag_len);
    }

    fn kex_init_payload(&mut self, wrong_guess: bool) -> Bytes {
        let mut cookie = [0; 16];
        self.rng.fill_bytes(&mut cookie);

        // with a guess, we prefer a method that the client does not pick
        let kex_names: &[&str] = if wrong_guess {
            &["diffie-hellman-group14-sha256", "curve25519-sha256"]
        } else {
            &["curve25519-sha256"]
        };

        let mut payload = PacketEncode::with_msg(msg::KEXINIT);
        payload.put_raw(&cookie);
        payload.put_name_list(kex_names);
        payload.put_name_list(&["ssh-ed25519"]);
        payload.put_name_list(&[self.cipher.name]);
        payload.put_name_list(&[self.cipher.name]);
        payload.put_name_list(&[self.mac.name]);
        payload.put_name_list(&[self.mac.name]);
        payload.put_name_list(&["none"]);
        payload.put_name_list(&["none"]);
        payload.put_name_list::<&str>(&[]);
        payload.put_name_list::<&str>(&[]);
        payload.put_bool(wrong_guess);
        payload.put_u32(0);
        payload.finish()
    }

    /// Sends a packet and returns its sequence number.
    pub async fn send(&mut self, payload: Bytes) -> u32 {
        let packet_seq = self.send_pipe.feed_packet(&payload).unwrap();
        self.flush().await;
        packet_seq
    }

    async fn flush(&mut self) {
        while !self.send_pipe.is_empty() {
            let bytes = self.send_pipe.peek_bytes();
            self.stream.write_all(bytes).await.unwrap();
            let len = bytes.len();
            self.send_pipe.consume_bytes(len);
        }
    }

    async fn read_more(&mut self) {
        let buf = self.recv_pipe.feed_buf();
        buf.reserve(READ_LEN);
        let read_len = self.stream.read_buf(buf).await.unwrap();
        assert!(read_len > 0, "client closed the connection");
    }

    async fn read_packet(&mut self) -> Packet {
        loop {
            if let Some(packet) = self.recv_pipe.consume_packet().unwrap() {
                return packet
            }
            self.read_more().await;
        }
    }

    async fn read_packet_timeout(&mut self) -> Packet {
        tokio::time::timeout(RECV_TIMEOUT, self.read_packet()).await
            .expect("timed out waiting for a packet from the client")
    }

    pub async fn recv_packet(&mut self) -> Packet {
        match self.pending.pop_front() {
            Some(packet) => packet,
            None => self.read_packet_timeout().await,
        }
    }

    /// Returns the next packet, or `None` if the client does not send anything for `wait`.
    pub async fn try_recv_packet(&mut self, wait: Duration) -> Option<Packet> {
        if let Some(packet) = self.pending.pop_front() {
            return Some(packet)
        }
        tokio::time::timeout(wait, self.read_packet()).await.ok()
    }

    pub async fn recv_msg(&mut self, msg_id: u8) -> Packet {
        let packet = self.recv_packet().await;
        assert_eq!(packet.msg_id, msg_id, "expected message {}, received {}", msg_id, packet.msg_id);
        packet
    }

    /// Waits until the client closes the connection, skipping any packets.
    pub async fn recv_eof(&mut self) {
        let wait_eof = async {
            let mut buf = BytesMut::with_capacity(READ_LEN);
            loop {
                buf.clear();
                if self.stream.read_buf(&mut buf).await.unwrap() == 0 {
                    break
                }
            }
        };
        tokio::time::timeout(RECV_TIMEOUT, wait_eof).await
            .expect("timed out waiting for the client to close the connection");
    }

    pub async fn send_ext_info(&mut self, sig_algs: &[&str]) {
        let mut payload = PacketEncode::with_msg(msg::EXT_INFO);
        payload.put_u32(1);
        payload.put_str("server-sig-algs");
        payload.put_name_list(sig_algs);
        self.send(payload.finish()).await;
    }

    pub async fn send_disconnect(&mut self, reason_code: u32, description: &str) {
        let mut payload = PacketEncode::with_msg(msg::DISCONNECT);
        payload.put_u32(reason_code);
        payload.put_str(description);
        payload.put_str("");
        self.send(payload.finish()).await;
    }

    pub async fn accept_service(&mut self) {
        let packet = self.recv_msg(msg::SERVICE_REQUEST).await;
        assert_eq!(packet.decode().get_string().unwrap(), "ssh-userauth");
        let mut payload = PacketEncode::with_msg(msg::SERVICE_ACCEPT);
        payload.put_str("ssh-userauth");
        self.send(payload.finish()).await;
    }

    pub async fn recv_auth_request(&mut self) -> AuthRequest {
        let packet = self.recv_msg(msg::USERAUTH_REQUEST).await;
        let mut data = packet.decode();
        let username = data.get_string().unwrap();
        assert_eq!(data.get_string().unwrap(), "ssh-connection");
        let method = data.get_string().unwrap();
        AuthRequest { packet, username, method, data }
    }

    pub async fn send_auth_success(&mut self) {
        self.send(PacketEncode::with_msg(msg::USERAUTH_SUCCESS).finish()).await;
    }

    pub async fn send_auth_failure(&mut self, methods: &[&str], partial_success: bool) {
        let mut payload = PacketEncode::with_msg(msg::USERAUTH_FAILURE);
        payload.put_name_list(methods);
        payload.put_bool(partial_success);
        self.send(payload.finish()).await;
    }

    pub async fn recv_channel_open(&mut self) -> ChannelOpen {
        let packet = self.recv_msg(msg::CHANNEL_OPEN).await;
        let mut data = packet.decode();
        ChannelOpen {
            channel_type: data.get_string().unwrap(),
            client_id: data.get_u32().unwrap(),
            window: data.get_u32().unwrap(),
            max_packet: data.get_u32().unwrap(),
            data,
        }
    }

    pub async fn confirm_channel(&mut self, client_id: u32, peer_id: u32, window: u32, max_packet: u32) {
        let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_CONFIRMATION);
        payload.put_u32(client_id);
        payload.put_u32(peer_id);
        payload.put_u32(window);
        payload.put_u32(max_packet);
        self.send(payload.finish()).await;
    }

    /// Receives `SSH_MSG_CHANNEL_OPEN` of the given type and confirms it as [`PEER_CHANNEL`].
    ///
    /// Returns the client's id of the channel.
    pub async fn accept_channel(&mut self, channel_type: &str, window: u32, max_packet: u32) -> u32 {
        let open = self.recv_channel_open().await;
        assert_eq!(open.channel_type, channel_type);
        self.confirm_channel(open.client_id, PEER_CHANNEL, window, max_packet).await;
        open.client_id
    }

    /// Offers a channel to the client, sending `SSH_MSG_CHANNEL_OPEN`.
    pub async fn open_channel(&mut self, channel_type: &str, peer_id: u32, open_data: &[u8]) {
        let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN);
        payload.put_str(channel_type);
        payload.put_u32(peer_id);
        payload.put_u32(1 << 20);
        payload.put_u32(32 << 10);
        payload.put_raw(open_data);
        self.send(payload.finish()).await;
    }

    pub async fn recv_channel_request(&mut self) -> ChannelRequest {
        let packet = self.recv_msg(msg::CHANNEL_REQUEST).await;
        let mut data = packet.decode();
        assert_eq!(data.get_u32().unwrap(), PEER_CHANNEL);
        ChannelRequest {
            request_type: data.get_string().unwrap(),
            want_reply: data.get_bool().unwrap(),
            data,
        }
    }

    pub async fn send_channel_reply(&mut self, client_id: u32, success: bool) {
        let msg_id = if success { msg::CHANNEL_SUCCESS } else { msg::CHANNEL_FAILURE };
        let mut payload = PacketEncode::with_msg(msg_id);
        payload.put_u32(client_id);
        self.send(payload.finish()).await;
    }

    pub async fn send_channel_data(&mut self, client_id: u32, data: &[u8]) {
        let mut payload = PacketEncode::with_msg(msg::CHANNEL_DATA);
        payload.put_u32(client_id);
        payload.put_bytes(data);
        self.send(payload.finish()).await;
    }

    /// Receives `SSH_MSG_CHANNEL_DATA` for [`PEER_CHANNEL`] and returns the data.
    pub async fn recv_channel_data(&mut self) -> Bytes {
        let packet = self.recv_msg(msg::CHANNEL_DATA).await;
        let mut data = packet.decode();
        assert_eq!(data.get_u32().unwrap(), PEER_CHANNEL);
        data.get_bytes().unwrap()
    }

    pub async fn send_channel_msg(&mut self, msg_id: u8, client_id: u32) {
        let mut payload = PacketEncode::with_msg(msg_id);
        payload.put_u32(client_id);
        self.send(payload.finish()).await;
    }
}

// the peer encrypts with the server-to-client keys B/D/F and decrypts with A/C/E
fn make_encrypt(
    cipher: &CipherAlgo,
    mac: &MacAlgo,
    derive: &dyn Fn(u8, usize) -> Vec<u8>,
) -> (PacketEncrypt, usize, usize) {
    let iv = derive(b'B', cipher.iv_len);
    let key = derive(b'D', cipher.key_len);
    match cipher.variant {
        CipherAlgoVariant::Standard(ref algo) => {
            let mac_key = derive(b'F', mac.key_len);
            let encrypt = PacketEncrypt::EncryptAndMac((algo.make_encrypt)(&key, &iv), (mac.make_mac)(&mac_key));
            (encrypt, cipher.block_len, mac.tag_len)
        },
        CipherAlgoVariant::Aead(ref algo) =>
            (PacketEncrypt::Aead((algo.make_encrypt)(&key, &iv)), cipher.block_len, algo.tag_len),
    }
}

fn make_decrypt(
    cipher: &CipherAlgo,
    mac: &MacAlgo,
    derive: &dyn Fn(u8, usize) -> Vec<u8>,
) -> (PacketDecrypt, usize, usize) {
    let iv = derive(b'A', cipher.iv_len);
    let key = derive(b'C', cipher.key_len);
    match cipher.variant {
        CipherAlgoVariant::Standard(ref algo) => {
            let mac_key = derive(b'E', mac.key_len);
            let decrypt = PacketDecrypt::EncryptAndMac((algo.make_decrypt)(&key, &iv), (mac.make_mac)(&mac_key));
            (decrypt, cipher.block_len, mac.tag_len)
        },
        CipherAlgoVariant::Aead(ref algo) =>
            (PacketDecrypt::Aead((algo.make_decrypt)(&key, &iv)), cipher.block_len, algo.tag_len),
    }
}

/// Opens a session channel that the peer confirms with the given window.
pub(super) async fn open_session(
    client: &Client,
    peer: &mut TestPeer,
    config: ChannelConfig,
    peer_window: u32,
) -> (Channel, ChannelReceiver, u32) {
    let (res, client_id) = tokio::join!(
        client.open_session(config),
        peer.accept_channel("session", peer_window, 32 << 10),
    );
    let (channel, channel_rx) = res.unwrap();
    (channel, channel_rx, client_id)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;
    use crate::cipher;
    use crate::codec::PacketEncode;
    use crate::codes::{disconnect, msg, open};
    use crate::error::Error;
    use crate::pubkey::{self, Privkey, Pubkey};
    use super::super::{
        AuthResult, ChannelConfig, ChannelEvent, ChannelKind, ClientEvent, DataType, KeyboardPrompt,
        PtyRequest, WindowSize,
    };
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn authenticate(client: &Client, peer: &mut TestPeer) {
        let (res, ()) = tokio::join!(client.auth_password("alice".into(), "secret".into()), async {
            peer.accept_service().await;
            let req = peer.recv_auth_request().await;
            assert_eq!(req.method, "password");
            peer.send_auth_success().await;
        });
        assert!(res.unwrap().is_success());
    }

    async fn next_event(tc: &mut TestClient) -> ClientEvent {
        timeout(WAIT, tc.events.recv()).await.unwrap().unwrap()
    }

    async fn next_channel_event(channel_rx: &mut ChannelReceiver) -> Option<ChannelEvent> {
        timeout(WAIT, channel_rx.recv()).await.unwrap()
    }

    #[tokio::test]
    async fn test_password_auth() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        peer.send_ext_info(&["ssh-ed25519", "rsa-sha2-256"]).await;

        let (res, ()) = tokio::join!(tc.client.auth_password("alice".into(), "secret".into()), async {
            peer.accept_service().await;
            let mut req = peer.recv_auth_request().await;
            assert_eq!(req.username, "alice");
            assert_eq!(req.method, "password");
            assert!(!req.data.get_bool().unwrap());
            assert_eq!(req.data.get_string().unwrap(), "secret");
            peer.send_auth_success().await;
        });
        assert!(res.unwrap().is_success());
        assert!(tc.client.is_authenticated().unwrap());

        let session_id = tc.client.session_id().unwrap().unwrap();
        assert_eq!(session_id.len(), 32);
        assert_eq!(session_id.as_ref(), peer.session_id());
        assert_eq!(tc.client.server_sig_algs().unwrap(),
            Some(vec!["ssh-ed25519".to_string(), "rsa-sha2-256".to_string()]));

        // once authenticated, further attempts succeed without asking the server
        assert!(tc.client.auth_none("alice".into()).await.unwrap().is_success());
        assert!(peer.try_recv_packet(SILENCE).await.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure_with_banner() {
        let (mut tc, mut peer) = connect(&cipher::CHACHA20_POLY1305).await;

        let (res, ()) = tokio::join!(tc.client.auth_none("bob".into()), async {
            peer.accept_service().await;
            let req = peer.recv_auth_request().await;
            assert_eq!(req.method, "none");

            let mut banner = PacketEncode::with_msg(msg::USERAUTH_BANNER);
            banner.put_str("welcome\r\n");
            banner.put_str("");
            peer.send(banner.finish()).await;
            peer.send_auth_failure(&["publickey", "password"], false).await;
        });
        match res.unwrap() {
            AuthResult::Failure(failure) => {
                assert_eq!(failure.methods_can_continue, vec!["publickey", "password"]);
                assert!(!failure.partial_success);
            },
            res => panic!("unexpected auth result {:?}", res),
        }
        assert!(!tc.client.is_authenticated().unwrap());

        match next_event(&mut tc).await {
            ClientEvent::AuthBanner(banner) => assert_eq!(banner.message, "welcome\r\n"),
            event => panic!("unexpected event {:?}", event),
        }
    }

    #[tokio::test]
    async fn test_auth_is_exclusive() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let first = tokio::spawn({
            let client = tc.client.clone();
            async move { client.auth_none("bob".into()).await }
        });
        peer.accept_service().await;
        peer.recv_auth_request().await;

        assert!(matches!(tc.client.auth_password("bob".into(), "x".into()).await, Err(Error::AuthPending)));

        peer.send_auth_failure(&["password"], false).await;
        assert!(!first.await.unwrap().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_password_change() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(tc.client.auth_password("carol".into(), "old".into()), async {
            peer.accept_service().await;
            peer.recv_auth_request().await;
            let mut change = PacketEncode::with_msg(msg::USERAUTH_PASSWD_CHANGEREQ);
            change.put_str("password expired");
            change.put_str("");
            peer.send(change.finish()).await;
        });
        match res.unwrap() {
            AuthResult::ChangePassword(prompt) => assert_eq!(prompt.prompt, "password expired"),
            res => panic!("unexpected auth result {:?}", res),
        }

        let (res, ()) = tokio::join!(
            tc.client.auth_password_change("carol".into(), "old".into(), "new".into()),
            async {
                let mut req = peer.recv_auth_request().await;
                assert_eq!(req.method, "password");
                assert!(req.data.get_bool().unwrap());
                assert_eq!(req.data.get_string().unwrap(), "old");
                assert_eq!(req.data.get_string().unwrap(), "new");
                peer.send_auth_success().await;
            },
        );
        assert!(res.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_pubkey_auth() {
        let (tc, mut peer) = connect(&cipher::AES256_GCM).await;
        let user_key = Privkey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[0x42; 32]).into());
        let user_pubkey = user_key.pubkey();

        let (res, ()) = tokio::join!(
            tc.client.check_pubkey("dave".into(), &user_pubkey, &pubkey::SSH_ED25519),
            async {
                peer.accept_service().await;
                let mut req = peer.recv_auth_request().await;
                assert_eq!(req.method, "publickey");
                assert!(!req.data.get_bool().unwrap());
                let algo_name = req.data.get_string().unwrap();
                let pubkey_blob = req.data.get_bytes().unwrap();
                assert_eq!(algo_name, "ssh-ed25519");
                assert_eq!(pubkey_blob, user_pubkey.encode());

                let mut pk_ok = PacketEncode::with_msg(msg::USERAUTH_PK_OK);
                pk_ok.put_str(&algo_name);
                pk_ok.put_bytes(&pubkey_blob);
                peer.send(pk_ok.finish()).await;
            },
        );
        assert!(res.unwrap());

        let (res, ()) = tokio::join!(
            tc.client.auth_pubkey("dave".into(), user_key.clone(), &pubkey::SSH_ED25519),
            async {
                let mut req = peer.recv_auth_request().await;
                assert_eq!(req.method, "publickey");
                assert!(req.data.get_bool().unwrap());
                assert_eq!(req.data.get_string().unwrap(), "ssh-ed25519");
                let pubkey = Pubkey::decode(req.data.get_bytes().unwrap()).unwrap();
                let signature = req.data.get_bytes().unwrap();

                let payload = &req.packet.payload;
                let mut signed = PacketEncode::new();
                signed.put_bytes(peer.session_id());
                signed.put_raw(&payload[..payload.len() - 4 - signature.len()]);
                assert!((pubkey::SSH_ED25519.verify)(&pubkey, &signed.finish(), signature).is_ok());
                peer.send_auth_success().await;
            },
        );
        assert!(res.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_keyboard_interactive_auth() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let collector = |prompt: KeyboardPrompt| async move {
            assert_eq!(prompt.name, "otp");
            assert_eq!(prompt.prompts.len(), 2);
            assert!(!prompt.prompts[0].echo);
            vec!["123456".to_string(), "blue".to_string()]
        };
        let (res, ()) = tokio::join!(
            tc.client.auth_keyboard_interactive("erin".into(), Vec::new(), collector),
            async {
                peer.accept_service().await;
                let req = peer.recv_auth_request().await;
                assert_eq!(req.method, "keyboard-interactive");

                let mut info = PacketEncode::with_msg(msg::USERAUTH_INFO_REQUEST);
                info.put_str("otp");
                info.put_str("");
                info.put_str("");
                info.put_u32(2);
                info.put_str("Code: ");
                info.put_bool(false);
                info.put_str("Color: ");
                info.put_bool(true);
                peer.send(info.finish()).await;

                let response = peer.recv_msg(msg::USERAUTH_INFO_RESPONSE).await;
                let mut response = response.decode();
                assert_eq!(response.get_u32().unwrap(), 2);
                assert_eq!(response.get_string().unwrap(), "123456");
                assert_eq!(response.get_string().unwrap(), "blue");
                peer.send_auth_success().await;
            },
        );
        assert!(res.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_disconnect_while_prompt_is_pending() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (prompted_tx, prompted_rx) = tokio::sync::oneshot::channel();
        let mut prompted_tx = Some(prompted_tx);
        // the user never answers
        let collector = move |_: KeyboardPrompt| {
            if let Some(tx) = prompted_tx.take() {
                let _ = tx.send(());
            }
            std::future::pending::<Vec<String>>()
        };
        let auth = tokio::spawn({
            let client = tc.client.clone();
            async move { client.auth_keyboard_interactive("erin".into(), Vec::new(), collector).await }
        });

        peer.accept_service().await;
        peer.recv_auth_request().await;
        let mut info = PacketEncode::with_msg(msg::USERAUTH_INFO_REQUEST);
        info.put_str("");
        info.put_str("");
        info.put_str("");
        info.put_u32(1);
        info.put_str("Password: ");
        info.put_bool(false);
        peer.send(info.finish()).await;
        timeout(WAIT, prompted_rx).await.unwrap().unwrap();

        // the connection is still served while the user thinks
        let (res, ()) = tokio::join!(tc.client.keepalive(), async {
            peer.recv_msg(msg::GLOBAL_REQUEST).await;
            peer.send(PacketEncode::with_msg(msg::REQUEST_FAILURE).finish()).await;
        });
        res.unwrap();

        tc.client.disconnect(crate::DisconnectError::by_app()).unwrap();
        assert!(matches!(timeout(WAIT, auth).await.unwrap().unwrap(), Err(Error::ConnectionClosed)));
        timeout(WAIT, tc.future).await.unwrap().unwrap().unwrap();
        let disconnect = peer.recv_msg(msg::DISCONNECT).await;
        assert_eq!(disconnect.decode().get_u32().unwrap(), disconnect::BY_APPLICATION);
    }

    #[tokio::test]
    async fn test_bad_auth_packet_fails_connection() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(tc.client.auth_password("alice".into(), "secret".into()), async {
            peer.accept_service().await;
            peer.recv_auth_request().await;
            // SSH_MSG_USERAUTH_INFO_RESPONSE is never sent by a server
            peer.send(PacketEncode::with_msg(msg::USERAUTH_INFO_RESPONSE).finish()).await;
        });
        assert!(matches!(res, Err(Error::Protocol(_))));

        let res = timeout(WAIT, tc.future).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::Protocol(_))));
        let disconnect = peer.recv_msg(msg::DISCONNECT).await;
        assert_eq!(disconnect.decode().get_u32().unwrap(), disconnect::PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn test_truncated_open_confirmation_fails_connection() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(tc.client.open_session(ChannelConfig::default()), async {
            let open = peer.recv_channel_open().await;
            let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_CONFIRMATION);
            payload.put_u32(open.client_id);
            payload.put_u32(PEER_CHANNEL);
            peer.send(payload.finish()).await;
        });
        assert!(matches!(res, Err(Error::Decode(_))));

        let res = timeout(WAIT, tc.future).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::Decode(_))));
        let disconnect = peer.recv_msg(msg::DISCONNECT).await;
        assert_eq!(disconnect.decode().get_u32().unwrap(), disconnect::PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn test_exec() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        authenticate(&tc.client, &mut peer).await;

        let (res, client_id) = tokio::join!(
            tc.client.open_exec(Bytes::from_static(b"uname -a"), ChannelConfig::default()),
            async {
                let client_id = peer.accept_channel("session", 1 << 20, 32 << 10).await;
                let mut req = peer.recv_channel_request().await;
                assert_eq!(req.request_type, "exec");
                assert!(req.want_reply);
                assert_eq!(req.data.get_bytes().unwrap().as_ref(), b"uname -a");
                peer.send_channel_reply(client_id, true).await;
                client_id
            },
        );
        let (channel, mut channel_rx) = res.unwrap();

        let mut stderr = PacketEncode::with_msg(msg::CHANNEL_EXTENDED_DATA);
        stderr.put_u32(client_id);
        stderr.put_u32(1);
        stderr.put_bytes(b"warning");
        peer.send(stderr.finish()).await;
        peer.send_channel_data(client_id, b"Linux").await;

        let mut exit_status = PacketEncode::with_msg(msg::CHANNEL_REQUEST);
        exit_status.put_u32(client_id);
        exit_status.put_str("exit-status");
        exit_status.put_bool(false);
        exit_status.put_u32(0);
        peer.send(exit_status.finish()).await;
        peer.send_channel_msg(msg::CHANNEL_EOF, client_id).await;
        peer.send_channel_msg(msg::CHANNEL_CLOSE, client_id).await;

        match next_channel_event(&mut channel_rx).await {
            Some(ChannelEvent::Data(data, DataType::Extended(1))) => assert_eq!(data.as_ref(), b"warning"),
            event => panic!("unexpected event {:?}", event),
        }
        match next_channel_event(&mut channel_rx).await {
            Some(ChannelEvent::Data(data, DataType::Standard)) => assert_eq!(data.as_ref(), b"Linux"),
            event => panic!("unexpected event {:?}", event),
        }
        assert!(matches!(next_channel_event(&mut channel_rx).await, Some(ChannelEvent::ExitStatus(0))));
        assert!(matches!(next_channel_event(&mut channel_rx).await, Some(ChannelEvent::Eof)));
        assert!(next_channel_event(&mut channel_rx).await.is_none());

        let close = peer.recv_msg(msg::CHANNEL_CLOSE).await;
        assert_eq!(close.decode().get_u32().unwrap(), PEER_CHANNEL);
        timeout(WAIT, channel.wait_closed()).await.unwrap();
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_failed_setup_closes_channel() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(
            tc.client.open_subsystem("sftp".into(), ChannelConfig::default()),
            async {
                let client_id = peer.accept_channel("session", 1 << 20, 32 << 10).await;
                let mut req = peer.recv_channel_request().await;
                assert_eq!(req.request_type, "subsystem");
                assert_eq!(req.data.get_string().unwrap(), "sftp");
                peer.send_channel_reply(client_id, false).await;
            },
        );
        assert!(matches!(res, Err(Error::ChannelReq)));
        peer.recv_msg(msg::CHANNEL_CLOSE).await;
    }

    #[tokio::test]
    async fn test_open_failure() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(
            tc.client.open_direct_tcpip("db.internal".into(), 5432, "127.0.0.1".into(), 40000, ChannelConfig::default()),
            async {
                let mut open = peer.recv_channel_open().await;
                assert_eq!(open.channel_type, "direct-tcpip");
                assert_eq!(open.window, ChannelConfig::default().window_size);
                assert_eq!(open.max_packet, ChannelConfig::default().max_packet_size);
                assert_eq!(open.data.get_string().unwrap(), "db.internal");
                assert_eq!(open.data.get_u32().unwrap(), 5432);

                let mut failure = PacketEncode::with_msg(msg::CHANNEL_OPEN_FAILURE);
                failure.put_u32(open.client_id);
                failure.put_u32(open::CONNECT_FAILED);
                failure.put_str("connection refused");
                failure.put_str("");
                peer.send(failure.finish()).await;
            },
        );
        match res {
            Err(Error::ChannelOpen(err)) => {
                assert_eq!(err.reason_code, open::CONNECT_FAILED);
                assert_eq!(err.description, "connection refused");
            },
            res => panic!("unexpected result {:?}", res.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_shell_with_pty_and_agent() {
        let (mut tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let pty = PtyRequest {
            term: "xterm-256color".into(),
            size: WindowSize { width_chars: 80, height_rows: 24, width_px: 0, height_px: 0 },
            modes: Vec::new(),
        };

        // agent channels are refused before agent forwarding was requested
        peer.open_channel("auth-agent@openssh.com", 7, &[]).await;
        let failure = peer.recv_msg(msg::CHANNEL_OPEN_FAILURE).await;
        let mut failure = failure.decode();
        assert_eq!(failure.get_u32().unwrap(), 7);
        assert_eq!(failure.get_u32().unwrap(), open::ADMINISTRATIVELY_PROHIBITED);

        let (res, ()) = tokio::join!(
            tc.client.open_shell(Some(pty), true, ChannelConfig::default()),
            async {
                let client_id = peer.accept_channel("session", 1 << 20, 32 << 10).await;
                for expected in ["pty-req", "auth-agent-req@openssh.com", "shell"] {
                    let mut req = peer.recv_channel_request().await;
                    assert_eq!(req.request_type, expected);
                    assert!(req.want_reply);
                    if expected == "pty-req" {
                        assert_eq!(req.data.get_string().unwrap(), "xterm-256color");
                        assert_eq!(req.data.get_u32().unwrap(), 80);
                        assert_eq!(req.data.get_u32().unwrap(), 24);
                    }
                    peer.send_channel_reply(client_id, true).await;
                }
            },
        );
        let (channel, _channel_rx) = res.unwrap();

        channel.window_change(WindowSize { width_chars: 120, height_rows: 40, width_px: 0, height_px: 0 }).await.unwrap();
        let req = peer.recv_channel_request().await;
        assert_eq!(req.request_type, "window-change");
        assert!(!req.want_reply);

        peer.open_channel("auth-agent@openssh.com", 8, &[]).await;
        let accept = match next_event(&mut tc).await {
            ClientEvent::ChannelOpen(accept) => accept,
            event => panic!("unexpected event {:?}", event),
        };
        assert_eq!(accept.kind(), &ChannelKind::AuthAgent);
        let (_agent, _agent_rx) = accept.accept(ChannelConfig::default()).unwrap();

        let confirm = peer.recv_msg(msg::CHANNEL_OPEN_CONFIRMATION).await;
        assert_eq!(confirm.decode().get_u32().unwrap(), 8);
    }

    #[tokio::test]
    async fn test_window_replenish() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let config = ChannelConfig::default().with(|c| {
            c.window_size = 4096;
            c.max_packet_size = 2048;
        });
        let (_channel, mut channel_rx, client_id) = open_session(&tc.client, &mut peer, config, 1 << 20).await;

        // 2596 bytes of window are left, which is still more than a half
        peer.send_channel_data(client_id, &[1; 1500]).await;
        assert!(peer.try_recv_packet(SILENCE).await.is_none());

        peer.send_channel_data(client_id, &[2; 1500]).await;
        let adjust = peer.recv_msg(msg::CHANNEL_WINDOW_ADJUST).await;
        let mut adjust = adjust.decode();
        assert_eq!(adjust.get_u32().unwrap(), PEER_CHANNEL);
        assert_eq!(adjust.get_u32().unwrap(), 3000);

        // the window is full again
        peer.send_channel_data(client_id, &[3; 1500]).await;
        peer.send_channel_data(client_id, &[4; 1500]).await;

        let mut received = 0;
        while received < 6000 {
            match next_channel_event(&mut channel_rx).await {
                Some(ChannelEvent::Data(data, DataType::Standard)) => received += data.len(),
                event => panic!("unexpected event {:?}", event),
            }
        }
        assert_eq!(received, 6000);
    }

    #[tokio::test]
    async fn test_data_beyond_window_is_fatal() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let config = ChannelConfig::default().with(|c| c.window_size = 1000);
        let (_channel, _channel_rx, client_id) = open_session(&tc.client, &mut peer, config, 1 << 20).await;

        peer.send_channel_data(client_id, &[0; 1001]).await;
        let res = timeout(WAIT, tc.future).await.unwrap().unwrap();
        assert!(matches!(res, Err(Error::Protocol(_))));

        let disconnect = peer.recv_msg(msg::DISCONNECT).await;
        assert_eq!(disconnect.decode().get_u32().unwrap(), disconnect::PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn test_send_respects_window() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let (channel, _channel_rx, client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1000).await;

        let send = tokio::spawn({
            let channel = channel.clone();
            async move { channel.send_data(Bytes::from(vec![7; 2500]), DataType::Standard).await }
        });

        assert_eq!(peer.recv_channel_data().await.len(), 1000);
        assert!(peer.try_recv_packet(SILENCE).await.is_none());
        assert!(!send.is_finished());

        let mut adjust = PacketEncode::with_msg(msg::CHANNEL_WINDOW_ADJUST);
        adjust.put_u32(client_id);
        adjust.put_u32(5000);
        peer.send(adjust.finish()).await;

        assert_eq!(peer.recv_channel_data().await.len(), 1500);
        timeout(WAIT, send).await.unwrap().unwrap().unwrap();

        channel.send_eof().await.unwrap();
        channel.send_eof().await.unwrap();
        peer.recv_msg(msg::CHANNEL_EOF).await;
        assert!(matches!(channel.send_data(Bytes::from_static(b"late"), DataType::Standard).await,
            Err(Error::ChannelClosed)));
        assert!(peer.try_recv_packet(SILENCE).await.is_none());
    }

    #[tokio::test]
    async fn test_one_request_at_a_time() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let (channel, _channel_rx, client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1 << 20).await;

        let first = tokio::spawn({
            let channel = channel.clone();
            async move { channel.env("LANG", b"C").await }
        });
        let mut req = peer.recv_channel_request().await;
        assert_eq!(req.request_type, "env");
        assert_eq!(req.data.get_string().unwrap(), "LANG");

        let second = tokio::spawn({
            let channel = channel.clone();
            async move { channel.env("TZ", b"UTC").await }
        });
        // the second request waits for the reply to the first one
        assert!(peer.try_recv_packet(SILENCE).await.is_none());

        peer.send_channel_reply(client_id, true).await;
        timeout(WAIT, first).await.unwrap().unwrap().unwrap();

        let mut req = peer.recv_channel_request().await;
        assert_eq!(req.data.get_string().unwrap(), "TZ");
        peer.send_channel_reply(client_id, false).await;
        assert!(matches!(timeout(WAIT, second).await.unwrap().unwrap(), Err(Error::ChannelReq)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let (channel, _channel_rx, client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1 << 20).await;

        channel.close().unwrap();
        channel.close().unwrap();
        let close = peer.recv_msg(msg::CHANNEL_CLOSE).await;
        assert_eq!(close.decode().get_u32().unwrap(), PEER_CHANNEL);
        assert!(peer.try_recv_packet(SILENCE).await.is_none());
        assert!(!channel.is_closed());

        peer.send_channel_msg(msg::CHANNEL_CLOSE, client_id).await;
        timeout(WAIT, channel.wait_closed()).await.unwrap();
        assert!(channel.is_closed());
        channel.close().unwrap();
        assert!(matches!(channel.send_data(Bytes::from_static(b"x"), DataType::Standard).await,
            Err(Error::ChannelClosed)));
        assert!(peer.try_recv_packet(SILENCE).await.is_none());

        tc.client.disconnect(crate::DisconnectError::by_app()).unwrap();
        let disconnect = peer.recv_msg(msg::DISCONNECT).await;
        assert_eq!(disconnect.decode().get_u32().unwrap(), disconnect::BY_APPLICATION);
        timeout(WAIT, tc.future).await.unwrap().unwrap().unwrap();
        peer.recv_eof().await;
    }

    #[tokio::test]
    async fn test_disconnect_wakes_everybody() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let (channel, _channel_rx, _client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1 << 20).await;

        let request = tokio::spawn({
            let channel = channel.clone();
            async move { channel.env("LANG", b"C").await }
        });
        peer.recv_channel_request().await;

        let global = tokio::spawn({
            let client = tc.client.clone();
            async move { client.global_request("test@sshmux", &[]).await }
        });
        peer.recv_msg(msg::GLOBAL_REQUEST).await;

        peer.send_disconnect(disconnect::BY_APPLICATION, "maintenance").await;

        match timeout(WAIT, tc.future).await.unwrap().unwrap() {
            Err(Error::PeerDisconnected(err)) => {
                assert_eq!(err.reason_code, disconnect::BY_APPLICATION);
                assert_eq!(err.description, "maintenance");
            },
            res => panic!("unexpected result {:?}", res),
        }
        assert!(matches!(timeout(WAIT, request).await.unwrap().unwrap(), Err(Error::ConnectionClosed)));
        assert!(matches!(timeout(WAIT, global).await.unwrap().unwrap(), Err(Error::ConnectionClosed)));
        timeout(WAIT, channel.wait_closed()).await.unwrap();
        assert!(matches!(channel.env("A", b"B").await, Err(Error::ConnectionClosed)));
        assert!(matches!(tc.client.open_session(ChannelConfig::default()).await,
            Err(Error::ConnectionClosed | Error::ClientClosed)));
    }

    #[tokio::test]
    async fn test_unsolicited_messages() {
        let (mut tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let packet_seq = peer.send(Bytes::from_static(&[200, 1, 2, 3])).await;
        let unimplemented = peer.recv_msg(msg::UNIMPLEMENTED).await;
        assert_eq!(unimplemented.decode().get_u32().unwrap(), packet_seq);

        peer.send(PacketEncode::with_msg(msg::IGNORE).finish()).await;

        let mut request = PacketEncode::with_msg(msg::GLOBAL_REQUEST);
        request.put_str("hostkeys-00@openssh.com");
        request.put_bool(true);
        peer.send(request.finish()).await;
        peer.recv_msg(msg::REQUEST_FAILURE).await;

        let mut x11 = PacketEncode::new();
        x11.put_str("127.0.0.1");
        x11.put_u32(6010);
        peer.open_channel("x11", 5, &x11.finish()).await;
        let failure = peer.recv_msg(msg::CHANNEL_OPEN_FAILURE).await;
        let mut failure = failure.decode();
        assert_eq!(failure.get_u32().unwrap(), 5);
        assert_eq!(failure.get_u32().unwrap(), open::UNKNOWN_CHANNEL_TYPE);

        let mut debug = PacketEncode::with_msg(msg::DEBUG);
        debug.put_bool(true);
        debug.put_str("hello from the server");
        debug.put_str("");
        peer.send(debug.finish()).await;
        match next_event(&mut tc).await {
            ClientEvent::DebugMsg(debug) => {
                assert!(debug.always_display);
                assert_eq!(debug.message, "hello from the server");
            },
            event => panic!("unexpected event {:?}", event),
        }

        // replies that nobody waits for are ignored
        peer.send(PacketEncode::with_msg(msg::REQUEST_SUCCESS).finish()).await;
        peer.send_channel_msg(msg::CHANNEL_SUCCESS, 77).await;
        assert!(peer.try_recv_packet(SILENCE).await.is_none());
        assert!(!tc.future.is_finished());
    }

    #[tokio::test]
    async fn test_remote_forwarding() {
        let (mut tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let forward_data = |port: u32| {
            let mut data = PacketEncode::new();
            data.put_str("localhost");
            data.put_u32(port);
            data.put_str("10.0.0.1");
            data.put_u32(5555);
            data.finish()
        };

        // nothing is forwarded yet
        peer.open_channel("forwarded-tcpip", 3, &forward_data(40022)).await;
        let failure = peer.recv_msg(msg::CHANNEL_OPEN_FAILURE).await;
        let mut failure = failure.decode();
        assert_eq!(failure.get_u32().unwrap(), 3);
        assert_eq!(failure.get_u32().unwrap(), open::ADMINISTRATIVELY_PROHIBITED);

        let (res, ()) = tokio::join!(tc.client.tcpip_forward("localhost", 0), async {
            let request = peer.recv_msg(msg::GLOBAL_REQUEST).await;
            let mut request = request.decode();
            assert_eq!(request.get_string().unwrap(), "tcpip-forward");
            assert!(request.get_bool().unwrap());
            assert_eq!(request.get_string().unwrap(), "localhost");
            assert_eq!(request.get_u32().unwrap(), 0);

            let mut reply = PacketEncode::with_msg(msg::REQUEST_SUCCESS);
            reply.put_u32(40022);
            peer.send(reply.finish()).await;
        });
        assert_eq!(res.unwrap(), 40022);

        peer.open_channel("forwarded-tcpip", 9, &forward_data(40022)).await;
        let accept = match next_event(&mut tc).await {
            ClientEvent::ChannelOpen(accept) => accept,
            event => panic!("unexpected event {:?}", event),
        };
        match accept.kind() {
            ChannelKind::ForwardedTcpip { connected_port, originator_host, .. } => {
                assert_eq!(*connected_port, 40022);
                assert_eq!(originator_host, "10.0.0.1");
            },
            kind => panic!("unexpected channel kind {:?}", kind),
        }
        let (channel, mut channel_rx) = accept.accept(ChannelConfig::default()).unwrap();

        let confirm = peer.recv_msg(msg::CHANNEL_OPEN_CONFIRMATION).await;
        let mut confirm = confirm.decode();
        assert_eq!(confirm.get_u32().unwrap(), 9);
        let client_id = confirm.get_u32().unwrap();

        peer.send_channel_data(client_id, b"GET / HTTP/1.0\r\n\r\n").await;
        match next_channel_event(&mut channel_rx).await {
            Some(ChannelEvent::Data(data, DataType::Standard)) => assert_eq!(data.as_ref(), b"GET / HTTP/1.0\r\n\r\n"),
            event => panic!("unexpected event {:?}", event),
        }

        channel.send_data(Bytes::from_static(b"HTTP/1.0 200 OK\r\n"), DataType::Standard).await.unwrap();
        let data = peer.recv_msg(msg::CHANNEL_DATA).await;
        let mut data = data.decode();
        assert_eq!(data.get_u32().unwrap(), 9);
        assert_eq!(data.get_bytes().unwrap().as_ref(), b"HTTP/1.0 200 OK\r\n");

        let (res, ()) = tokio::join!(tc.client.cancel_tcpip_forward("localhost", 40022), async {
            let request = peer.recv_msg(msg::GLOBAL_REQUEST).await;
            assert_eq!(request.decode().get_string().unwrap(), "cancel-tcpip-forward");
            peer.send(PacketEncode::with_msg(msg::REQUEST_SUCCESS).finish()).await;
        });
        res.unwrap();

        peer.open_channel("forwarded-tcpip", 10, &forward_data(40022)).await;
        let failure = peer.recv_msg(msg::CHANNEL_OPEN_FAILURE).await;
        assert_eq!(failure.decode().get_u32().unwrap(), 10);
    }

    #[tokio::test]
    async fn test_keepalive() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;

        let (res, ()) = tokio::join!(tc.client.keepalive(), async {
            let request = peer.recv_msg(msg::GLOBAL_REQUEST).await;
            assert_eq!(request.decode().get_string().unwrap(), "keepalive@openssh.com");
            peer.send(PacketEncode::with_msg(msg::REQUEST_FAILURE).finish()).await;
        });
        res.unwrap();
    }

    #[tokio::test]
    async fn test_rekey_by_server_during_transfer() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        authenticate(&tc.client, &mut peer).await;
        let session_id = peer.session_id().to_vec();
        let (channel, _channel_rx, _client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1 << 20).await;

        let send = tokio::spawn({
            let channel = channel.clone();
            async move {
                for i in 0..50u8 {
                    channel.send_data(Bytes::from(vec![i; 100]), DataType::Standard).await?;
                    tokio::task::yield_now().await;
                }
                crate::Result::Ok(())
            }
        });

        // the peer checks that no data arrives between KEXINIT and NEWKEYS
        peer.kex().await;
        assert_eq!(peer.session_id(), &session_id[..]);

        let mut received = Vec::new();
        while received.len() < 50 * 100 {
            received.extend_from_slice(&peer.recv_channel_data().await);
        }
        for (i, chunk) in received.chunks(100).enumerate() {
            assert!(chunk.iter().all(|&b| b == i as u8));
        }
        timeout(WAIT, send).await.unwrap().unwrap().unwrap();
        assert_eq!(tc.client.session_id().unwrap().unwrap().as_ref(), &session_id[..]);
    }

    #[tokio::test]
    async fn test_rekey_by_client() {
        let (tc, mut peer) = connect(&cipher::CHACHA20_POLY1305).await;

        let (res, ()) = tokio::join!(tc.client.rekey(), peer.kex());
        res.unwrap();

        // the connection still works with the new keys
        let (res, ()) = tokio::join!(tc.client.keepalive(), async {
            peer.recv_msg(msg::GLOBAL_REQUEST).await;
            peer.send(PacketEncode::with_msg(msg::REQUEST_FAILURE).finish()).await;
        });
        res.unwrap();
    }

    #[tokio::test]
    async fn test_packet_right_after_new_keys() {
        let (tc, mut peer) = connect(&cipher::AES128_GCM).await;
        let (_channel, mut channel_rx, client_id) =
            open_session(&tc.client, &mut peer, ChannelConfig::default(), 1 << 20).await;

        // NEWKEYS and the data encrypted with the new keys arrive in a single write
        let mut data = PacketEncode::with_msg(msg::CHANNEL_DATA);
        data.put_u32(client_id);
        data.put_bytes(b"after-newkeys");
        peer.kex_with(KexScript { after_new_keys: Some(data.finish()), ..KexScript::default() }).await;

        match next_channel_event(&mut channel_rx).await {
            Some(ChannelEvent::Data(data, DataType::Standard)) => assert_eq!(data.as_ref(), b"after-newkeys"),
            event => panic!("unexpected event {:?}", event),
        }
    }

    #[tokio::test]
    async fn test_wrong_kex_guess_is_ignored() {
        let (tc, mut peer) = connect(&cipher::AES128_CTR).await;
        let session_id = peer.session_id().to_vec();

        let mut guess = PacketEncode::with_msg(msg::KEXDH_INIT);
        guess.put_bytes(b"a guess for diffie-hellman-group14-sha256");
        peer.kex_with(KexScript { wrong_guess: Some(guess.finish()), ..KexScript::default() }).await;
        assert_eq!(peer.session_id(), &session_id[..]);

        let (res, ()) = tokio::join!(tc.client.keepalive(), async {
            peer.recv_msg(msg::GLOBAL_REQUEST).await;
            peer.send(PacketEncode::with_msg(msg::REQUEST_FAILURE).finish()).await;
        });
        res.unwrap();
        assert_eq!(tc.client.session_id().unwrap().unwrap().as_ref(), &session_id[..]);
    }
}
