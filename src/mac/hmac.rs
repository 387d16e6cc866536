use hmac::Hmac;
use hmac::digest::KeyInit;
use crate::{Error, Result};
use super::{MacAlgo, Mac, MacVerified};

/// "hmac-sha2-256" MAC from RFC 6668.
pub static HMAC_SHA2_256: MacAlgo = MacAlgo {
    name: "hmac-sha2-256",
    tag_len: 32,
    key_len: 32,
    make_mac: |key| Box::new(HmacMac::<Hmac<sha2::Sha256>>::new(key)),
};

/// "hmac-sha2-512" MAC from RFC 6668.
pub static HMAC_SHA2_512: MacAlgo = MacAlgo {
    name: "hmac-sha2-512",
    tag_len: 64,
    key_len: 64,
    make_mac: |key| Box::new(HmacMac::<Hmac<sha2::Sha512>>::new(key)),
};

/// "hmac-sha1" MAC from RFC 4253.
pub static HMAC_SHA1: MacAlgo = MacAlgo {
    name: "hmac-sha1",
    tag_len: 20,
    key_len: 20,
    make_mac: |key| Box::new(HmacMac::<Hmac<sha1::Sha1>>::new(key)),
};

struct HmacMac<M> {
    keyed: M,
}

impl<M: hmac::Mac + KeyInit + Clone> HmacMac<M> {
    fn new(key: &[u8]) -> Self {
        let keyed = <M as KeyInit>::new_from_slice(key).expect("hmac accepts keys of any length");
        HmacMac { keyed }
    }

    fn start(&self, packet_seq: u32, plaintext: &[u8]) -> M {
        let mut hmac = self.keyed.clone();
        hmac::Mac::update(&mut hmac, &packet_seq.to_be_bytes());
        hmac::Mac::update(&mut hmac, plaintext);
        hmac
    }
}

impl<M: hmac::Mac + KeyInit + Clone> Mac for HmacMac<M> {
    fn sign(&mut self, packet_seq: u32, plaintext: &[u8], tag: &mut [u8]) {
        let hmac = self.start(packet_seq, plaintext);
        tag.copy_from_slice(&hmac::Mac::finalize(hmac).into_bytes());
    }

    fn verify(&mut self, packet_seq: u32, plaintext: &[u8], tag: &[u8]) -> Result<MacVerified> {
        let hmac = self.start(packet_seq, plaintext);
        match hmac::Mac::verify_slice(hmac, tag) {
            Ok(()) => Ok(MacVerified::assertion()),
            Err(_) => Err(Error::Mac),
        }
    }
}
