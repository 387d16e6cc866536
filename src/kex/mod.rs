//! Key exchange algorithms.
//!
//! The SSH protocol supports several key exchange (kex) algorithms, which are used to establish
//! the one-time keys used for message [encryption][crate::cipher] and
//! [authentication][crate::mac].
//!
//! The client and the server exchange lists of supported algorithms, and the first algorithm on
//! the client's list that is also supported by the server is used for the connection.
//!
//! # Supported algorithms
//!
//! - "curve25519-sha256" / "curve25519-sha256@libssh.org" ([`CURVE25519_SHA256`] /
//! [`CURVE25519_SHA256_LIBSSH`])
//! - "ecdh-sha2-nistp256" ([`ECDH_SHA2_NISTP256`])
//! - "ecdh-sha2-nistp384" ([`ECDH_SHA2_NISTP384`])
//! - "diffie-hellman-group14-sha256" ([`DIFFIE_HELLMAN_GROUP14_SHA256`])
//! - "diffie-hellman-group16-sha512" ([`DIFFIE_HELLMAN_GROUP16_SHA512`])
//! - "diffie-hellman-group18-sha512" ([`DIFFIE_HELLMAN_GROUP18_SHA512`])
//! - "diffie-hellman-group14-sha1" ([`DIFFIE_HELLMAN_GROUP14_SHA1`])
use bytes::Bytes;
use derivative::Derivative;
use crate::Result;
use crate::codec::{PacketDecode, PacketEncode};
use crate::util::CryptoRngCore;
pub use self::curve25519::{CURVE25519_SHA256, CURVE25519_SHA256_LIBSSH};
pub use self::dh::{
    DIFFIE_HELLMAN_GROUP14_SHA1, DIFFIE_HELLMAN_GROUP14_SHA256,
    DIFFIE_HELLMAN_GROUP16_SHA512, DIFFIE_HELLMAN_GROUP18_SHA512,
};
pub use self::ecdh::{ECDH_SHA2_NISTP256, ECDH_SHA2_NISTP384};

mod curve25519;
mod dh;
mod ecdh;

/// Algorithm for key exchange.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct KexAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_kex: fn(rng: &mut dyn CryptoRngCore) -> Result<Box<dyn Kex + Send>>,
}

/// Inputs of the exchange hash that are independent of the kex method.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KexInput<'a> {
    pub client_ident: &'a [u8],
    pub server_ident: &'a [u8],
    pub client_kex_init: &'a [u8],
    pub server_kex_init: &'a [u8],
}

pub(crate) struct KexOutput {
    pub shared_secret_be: Vec<u8>,
    pub exchange_hash: Vec<u8>,
    pub server_pubkey: Bytes,
    pub server_exchange_hash_sign: Bytes,
}

/// A single run of a key exchange method.
///
/// All methods that we support consist of one packet from the client (`SSH_MSG_KEXDH_INIT` or
/// `SSH_MSG_KEX_ECDH_INIT`) and one reply from the server (`SSH_MSG_KEXDH_REPLY` or
/// `SSH_MSG_KEX_ECDH_REPLY`), which share the message ids 30 and 31.
pub(crate) trait Kex {
    fn send_init(&mut self) -> Result<Bytes>;
    fn recv_reply(&mut self, payload: &mut PacketDecode, input: KexInput) -> Result<KexOutput>;
    fn compute_hash(&self, data: &[u8]) -> Vec<u8>;
}

impl KexInput<'_> {
    /// Starts encoding the exchange hash input `V_C || V_S || I_C || I_S || K_S`.
    pub fn encode_prefix(&self, server_pubkey: &[u8]) -> PacketEncode {
        let mut data = PacketEncode::new();
        data.put_bytes(self.client_ident);
        data.put_bytes(self.server_ident);
        data.put_bytes(self.client_kex_init);
        data.put_bytes(self.server_kex_init);
        data.put_bytes(server_pubkey);
        data
    }
}

/// Derives a key from the kex output (RFC 4253, section 7.2).
///
/// `HASH(K || H || key_type || session_id)` is extended with `HASH(K || H || key so far)` until
/// it is at least `key_len` bytes long.
pub(crate) fn derive_key(
    compute_hash: &dyn Fn(&[u8]) -> Vec<u8>,
    shared_secret_be: &[u8],
    exchange_hash: &[u8],
    key_type: u8,
    session_id: &[u8],
    key_len: usize,
) -> Vec<u8> {
    let mut to_hash_prefix = PacketEncode::new();
    to_hash_prefix.put_mpint_uint_be(shared_secret_be);
    to_hash_prefix.put_raw(exchange_hash);

    let mut key = {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_u8(key_type);
        to_hash.put_raw(session_id);
        compute_hash(&to_hash.finish())
    };

    while key.len() < key_len {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_raw(&key);
        key.extend_from_slice(&compute_hash(&to_hash.finish()));
    }

    key.truncate(key_len);
    key
}

pub(crate) fn compute_hash_sha1(data: &[u8]) -> Vec<u8> {
    use sha1::digest::Digest as _;
    sha1::Sha1::digest(data).to_vec()
}

pub(crate) fn compute_hash_sha256(data: &[u8]) -> Vec<u8> {
    use sha2::digest::Digest as _;
    sha2::Sha256::digest(data).to_vec()
}

pub(crate) fn compute_hash_sha384(data: &[u8]) -> Vec<u8> {
    use sha2::digest::Digest as _;
    sha2::Sha384::digest(data).to_vec()
}

pub(crate) fn compute_hash_sha512(data: &[u8]) -> Vec<u8> {
    use sha2::digest::Digest as _;
    sha2::Sha512::digest(data).to_vec()
}
