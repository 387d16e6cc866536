use bytes::Bytes;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, compute_hash_sha256};

/// "curve25519-sha256" key exchange from RFC 8731.
pub static CURVE25519_SHA256: KexAlgo = KexAlgo {
    name: "curve25519-sha256",
    make_kex: |rng| Ok(Box::new(Curve25519Kex::new(rng))),
};

/// "curve25519-sha256@libssh.org" key exchange, the same as [`CURVE25519_SHA256`] under the name
/// used before RFC 8731.
pub static CURVE25519_SHA256_LIBSSH: KexAlgo = KexAlgo {
    name: "curve25519-sha256@libssh.org",
    make_kex: |rng| Ok(Box::new(Curve25519Kex::new(rng))),
};

struct Curve25519Kex {
    our_eph_privkey: Option<x25519_dalek::EphemeralSecret>,
    our_eph_pubkey: x25519_dalek::PublicKey,
}

impl Curve25519Kex {
    fn new(mut rng: &mut dyn CryptoRngCore) -> Self {
        let our_eph_privkey = x25519_dalek::EphemeralSecret::random_from_rng(&mut rng);
        let our_eph_pubkey = x25519_dalek::PublicKey::from(&our_eph_privkey);
        log::debug!("initialized curve25519 kex");
        Curve25519Kex { our_eph_privkey: Some(our_eph_privkey), our_eph_pubkey }
    }
}

impl Kex for Curve25519Kex {
    fn send_init(&mut self) -> Result<Bytes> {
        // RFC 5656, section 4
        let mut payload = PacketEncode::with_msg(msg::KEX_ECDH_INIT);
        payload.put_bytes(self.our_eph_pubkey.as_bytes());
        log::debug!("sending SSH_MSG_KEX_ECDH_INIT");
        Ok(payload.finish())
    }

    fn recv_reply(&mut self, payload: &mut PacketDecode, input: KexInput) -> Result<KexOutput> {
        // RFC 5656, section 4 and RFC 8731, section 3.1
        let server_pubkey = payload.get_bytes()?;
        let server_eph_pubkey = payload.get_bytes()?;
        let server_exchange_hash_sign = payload.get_bytes()?;
        log::debug!("received SSH_MSG_KEX_ECDH_REPLY");

        let server_eph_pubkey = <[u8; 32]>::try_from(server_eph_pubkey.as_ref())
            .map_err(|_| Error::Protocol("server sent X25519 public key of invalid length"))?;
        let server_eph_pubkey = x25519_dalek::PublicKey::from(server_eph_pubkey);

        let our_eph_privkey = self.our_eph_privkey.take()
            .ok_or(Error::Protocol("received duplicate SSH_MSG_KEX_ECDH_REPLY"))?;
        let shared_secret = our_eph_privkey.diffie_hellman(&server_eph_pubkey);
        if !shared_secret.was_contributory() {
            return Err(Error::Crypto("X25519 shared secret is all zeros"))
        }
        let shared_secret_be = shared_secret.as_bytes().to_vec();

        let mut exchange_data = input.encode_prefix(&server_pubkey);
        exchange_data.put_bytes(self.our_eph_pubkey.as_bytes());
        exchange_data.put_bytes(server_eph_pubkey.as_bytes());
        exchange_data.put_mpint_uint_be(&shared_secret_be);
        let exchange_hash = compute_hash_sha256(&exchange_data.finish());

        Ok(KexOutput { shared_secret_be, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        compute_hash_sha256(data)
    }
}
