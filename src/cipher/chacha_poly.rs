use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use poly1305::Poly1305;
use poly1305::universal_hash::KeyInit;
use subtle::ConstantTimeEq as _;
use crate::{Error, Result};
use crate::mac::MacVerified;
use super::{CipherAlgo, CipherAlgoVariant, AeadCipherAlgo, AeadEncrypt, AeadDecrypt};

/// "chacha20-poly1305@openssh.com" cipher.
///
/// This is an AEAD cipher, the MAC algorithm is ignored. The 64 byte key is split into two
/// ChaCha20 keys: the first one encrypts the packet and derives the Poly1305 key, the second one
/// encrypts only the packet length.
pub static CHACHA20_POLY1305: CipherAlgo = CipherAlgo {
    name: "chacha20-poly1305@openssh.com",
    block_len: 8,
    key_len: 64,
    iv_len: 0,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, _iv| Box::new(ChachaPoly::new(key)),
        make_decrypt: |key, _iv| Box::new(ChachaPoly::new(key)),
    }),
};

struct ChachaPoly {
    main_key: chacha20::Key,
    len_key: chacha20::Key,
}

impl ChachaPoly {
    fn new(key: &[u8]) -> Self {
        ChachaPoly {
            main_key: *chacha20::Key::from_slice(&key[..32]),
            len_key: *chacha20::Key::from_slice(&key[32..]),
        }
    }

    fn cipher(key: &chacha20::Key, packet_seq: u32) -> ChaCha20Legacy {
        let nonce = (packet_seq as u64).to_be_bytes();
        ChaCha20Legacy::new(key, chacha20::LegacyNonce::from_slice(&nonce))
    }

    /// Returns the cipher for the packet body, positioned at block 1, and the Poly1305 tag
    /// generator keyed from block 0.
    fn main_cipher(&self, packet_seq: u32) -> (ChaCha20Legacy, Poly1305) {
        let mut cipher = Self::cipher(&self.main_key, packet_seq);
        let mut poly_key = [0; 32];
        cipher.apply_keystream(&mut poly_key);
        cipher.seek(64u64);
        (cipher, Poly1305::new(poly1305::Key::from_slice(&poly_key)))
    }
}

impl AeadEncrypt for ChachaPoly {
    fn encrypt_and_sign(&mut self, packet_seq: u32, packet: &mut [u8], tag: &mut [u8]) -> Result<()> {
        Self::cipher(&self.len_key, packet_seq).apply_keystream(&mut packet[..4]);
        let (mut cipher, poly) = self.main_cipher(packet_seq);
        cipher.apply_keystream(&mut packet[4..]);
        tag.copy_from_slice(&poly.compute_unpadded(packet));
        Ok(())
    }
}

impl AeadDecrypt for ChachaPoly {
    fn decrypt_packet_len(&mut self, packet_seq: u32, ciphertext: &[u8], plaintext: &mut [u8]) {
        plaintext.copy_from_slice(ciphertext);
        Self::cipher(&self.len_key, packet_seq).apply_keystream(plaintext);
    }

    fn decrypt_and_verify(&mut self, packet_seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<MacVerified> {
        let (mut cipher, poly) = self.main_cipher(packet_seq);
        let computed_tag = poly.compute_unpadded(packet);
        if !bool::from(computed_tag.as_slice().ct_eq(tag)) {
            return Err(Error::Mac)
        }
        cipher.apply_keystream(&mut packet[4..]);
        Ok(MacVerified::assertion())
    }
}
