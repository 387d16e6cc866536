use bytes::Bytes;
use p256::elliptic_curve::sec1::ToEncodedPoint as _;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, compute_hash_sha256, compute_hash_sha384};

/// "ecdh-sha2-nistp256" key exchange from RFC 5656.
pub static ECDH_SHA2_NISTP256: KexAlgo = KexAlgo {
    name: "ecdh-sha2-nistp256",
    make_kex: |rng| Ok(Box::new(EcdhKex::new_p256(rng))),
};

/// "ecdh-sha2-nistp384" key exchange from RFC 5656.
pub static ECDH_SHA2_NISTP384: KexAlgo = KexAlgo {
    name: "ecdh-sha2-nistp384",
    make_kex: |rng| Ok(Box::new(EcdhKex::new_p384(rng))),
};

enum EcdhSecret {
    P256(p256::ecdh::EphemeralSecret),
    P384(p384::ecdh::EphemeralSecret),
}

struct EcdhKex {
    our_eph_privkey: Option<EcdhSecret>,
    our_eph_pubkey: Vec<u8>,
    compute_hash: fn(&[u8]) -> Vec<u8>,
}

impl EcdhKex {
    fn new_p256(mut rng: &mut dyn CryptoRngCore) -> Self {
        let privkey = p256::ecdh::EphemeralSecret::random(&mut rng);
        let our_eph_pubkey = privkey.public_key().to_encoded_point(false).as_bytes().to_vec();
        log::debug!("initialized ecdh nistp256 kex");
        EcdhKex {
            our_eph_privkey: Some(EcdhSecret::P256(privkey)),
            our_eph_pubkey,
            compute_hash: compute_hash_sha256,
        }
    }

    fn new_p384(mut rng: &mut dyn CryptoRngCore) -> Self {
        let privkey = p384::ecdh::EphemeralSecret::random(&mut rng);
        let our_eph_pubkey = privkey.public_key().to_encoded_point(false).as_bytes().to_vec();
        log::debug!("initialized ecdh nistp384 kex");
        EcdhKex {
            our_eph_privkey: Some(EcdhSecret::P384(privkey)),
            our_eph_pubkey,
            compute_hash: compute_hash_sha384,
        }
    }
}

impl EcdhSecret {
    fn diffie_hellman(self, their_pubkey: &[u8]) -> Result<Vec<u8>> {
        let invalid = |_| Error::Protocol("server sent invalid ECDH ephemeral public key");
        Ok(match self {
            EcdhSecret::P256(privkey) => {
                let pubkey = p256::PublicKey::from_sec1_bytes(their_pubkey).map_err(invalid)?;
                privkey.diffie_hellman(&pubkey).raw_secret_bytes().to_vec()
            },
            EcdhSecret::P384(privkey) => {
                let pubkey = p384::PublicKey::from_sec1_bytes(their_pubkey).map_err(invalid)?;
                privkey.diffie_hellman(&pubkey).raw_secret_bytes().to_vec()
            },
        })
    }
}

impl Kex for EcdhKex {
    fn send_init(&mut self) -> Result<Bytes> {
        // RFC 5656, section 4
        let mut payload = PacketEncode::with_msg(msg::KEX_ECDH_INIT);
        payload.put_bytes(&self.our_eph_pubkey);
        log::debug!("sending SSH_MSG_KEX_ECDH_INIT");
        Ok(payload.finish())
    }

    fn recv_reply(&mut self, payload: &mut PacketDecode, input: KexInput) -> Result<KexOutput> {
        let server_pubkey = payload.get_bytes()?;
        let server_eph_pubkey = payload.get_bytes()?;
        let server_exchange_hash_sign = payload.get_bytes()?;
        log::debug!("received SSH_MSG_KEX_ECDH_REPLY");

        let our_eph_privkey = self.our_eph_privkey.take()
            .ok_or(Error::Protocol("received duplicate SSH_MSG_KEX_ECDH_REPLY"))?;
        let shared_secret_be = our_eph_privkey.diffie_hellman(&server_eph_pubkey)?;

        let mut exchange_data = input.encode_prefix(&server_pubkey);
        exchange_data.put_bytes(&self.our_eph_pubkey);
        exchange_data.put_bytes(&server_eph_pubkey);
        exchange_data.put_mpint_uint_be(&shared_secret_be);
        let exchange_hash = (self.compute_hash)(&exchange_data.finish());

        Ok(KexOutput { shared_secret_be, exchange_hash, server_pubkey, server_exchange_hash_sign })
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        (self.compute_hash)(data)
    }
}
