use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use crate::{Error, Result};
use crate::mac::MacVerified;
use super::{CipherAlgo, CipherAlgoVariant, AeadCipherAlgo, AeadEncrypt, AeadDecrypt};

/// "aes128-gcm@openssh.com" cipher (AES-GCM as described in RFC 5647, with OpenSSH changes).
///
/// This is an AEAD cipher, the MAC algorithm is ignored.
pub static AES128_GCM: CipherAlgo = CipherAlgo {
    name: "aes128-gcm@openssh.com",
    block_len: 16,
    key_len: 16,
    iv_len: 12,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, iv| Box::new(GcmCipher::<aes_gcm::Aes128Gcm>::new(key, iv)),
        make_decrypt: |key, iv| Box::new(GcmCipher::<aes_gcm::Aes128Gcm>::new(key, iv)),
    }),
};

/// "aes256-gcm@openssh.com" cipher.
///
/// This is an AEAD cipher, the MAC algorithm is ignored.
pub static AES256_GCM: CipherAlgo = CipherAlgo {
    name: "aes256-gcm@openssh.com",
    block_len: 16,
    key_len: 32,
    iv_len: 12,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, iv| Box::new(GcmCipher::<aes_gcm::Aes256Gcm>::new(key, iv)),
        make_decrypt: |key, iv| Box::new(GcmCipher::<aes_gcm::Aes256Gcm>::new(key, iv)),
    }),
};

// The packet length is sent in plaintext and used as additional authenticated data. The nonce is
// a 4 byte fixed field followed by a 8 byte invocation counter, which is incremented after every
// packet (RFC 5647, section 7.1).
struct GcmCipher<C> {
    gcm: C,
    fixed: [u8; 4],
    counter: u64,
}

impl<C: KeyInit> GcmCipher<C> {
    fn new(key: &[u8], iv: &[u8]) -> Self {
        let gcm = C::new_from_slice(key).expect("invalid key length for aes-gcm");
        let mut fixed = [0; 4];
        fixed.copy_from_slice(&iv[..4]);
        let mut counter = [0; 8];
        counter.copy_from_slice(&iv[4..12]);
        GcmCipher { gcm, fixed, counter: u64::from_be_bytes(counter) }
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0; 12];
        nonce[..4].copy_from_slice(&self.fixed);
        nonce[4..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.wrapping_add(1);
        nonce
    }
}

impl<C: KeyInit + AeadInPlace> AeadEncrypt for GcmCipher<C> {
    fn encrypt_and_sign(&mut self, _packet_seq: u32, packet: &mut [u8], tag: &mut [u8]) -> Result<()> {
        let nonce = self.next_nonce();
        let (len_data, body) = packet.split_at_mut(4);
        let computed_tag = self.gcm
            .encrypt_in_place_detached(Nonce::<C>::from_slice(&nonce), len_data, body)
            .map_err(|_| Error::Crypto("aes-gcm encryption failed"))?;
        tag.copy_from_slice(&computed_tag);
        Ok(())
    }
}

impl<C: KeyInit + AeadInPlace> AeadDecrypt for GcmCipher<C> {
    fn decrypt_packet_len(&mut self, _packet_seq: u32, ciphertext: &[u8], plaintext: &mut [u8]) {
        plaintext.copy_from_slice(ciphertext)
    }

    fn decrypt_and_verify(&mut self, _packet_seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<MacVerified> {
        let nonce = self.next_nonce();
        let (len_data, body) = packet.split_at_mut(4);
        self.gcm
            .decrypt_in_place_detached(Nonce::<C>::from_slice(&nonce), len_data, body, Tag::<C>::from_slice(tag))
            .map_err(|_| Error::Mac)?;
        Ok(MacVerified::assertion())
    }
}
