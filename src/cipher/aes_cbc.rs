use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::cipher::inout::InOutBuf;
use super::{CipherAlgo, CipherAlgoVariant, StandardCipherAlgo, Encrypt, Decrypt};

/// "aes128-cbc" cipher from RFC 4253.
///
/// CBC mode is vulnerable to some attacks on the SSH protocol, so this cipher is enabled only in
/// [`ClientConfig::default_compatible_less_secure()`][crate::ClientConfig::default_compatible_less_secure()].
pub static AES128_CBC: CipherAlgo = CipherAlgo {
    name: "aes128-cbc",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Box::new(new_encrypt::<cbc::Encryptor<aes::Aes128>>(key, iv)),
        make_decrypt: |key, iv| Box::new(new_decrypt::<cbc::Decryptor<aes::Aes128>>(key, iv)),
    }),
};

/// "aes192-cbc" cipher from RFC 4253.
pub static AES192_CBC: CipherAlgo = CipherAlgo {
    name: "aes192-cbc",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Box::new(new_encrypt::<cbc::Encryptor<aes::Aes192>>(key, iv)),
        make_decrypt: |key, iv| Box::new(new_decrypt::<cbc::Decryptor<aes::Aes192>>(key, iv)),
    }),
};

/// "aes256-cbc" cipher from RFC 4253.
pub static AES256_CBC: CipherAlgo = CipherAlgo {
    name: "aes256-cbc",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Box::new(new_encrypt::<cbc::Encryptor<aes::Aes256>>(key, iv)),
        make_decrypt: |key, iv| Box::new(new_decrypt::<cbc::Decryptor<aes::Aes256>>(key, iv)),
    }),
};

struct CbcEncrypt<T> {
    encrypt: T,
}

struct CbcDecrypt<T> {
    decrypt: T,
}

fn new_encrypt<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> CbcEncrypt<T> {
    let encrypt = T::new_from_slices(key, iv).expect("invalid key or iv length for cbc cipher");
    CbcEncrypt { encrypt }
}

fn new_decrypt<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> CbcDecrypt<T> {
    let decrypt = T::new_from_slices(key, iv).expect("invalid key or iv length for cbc cipher");
    CbcDecrypt { decrypt }
}

impl<T: BlockEncryptMut> Encrypt for CbcEncrypt<T> {
    fn encrypt(&mut self, data: &mut [u8]) {
        let (blocks, tail) = InOutBuf::from(data).into_chunks();
        debug_assert!(tail.is_empty(), "plaintext is not aligned to block");
        self.encrypt.encrypt_blocks_inout_mut(blocks)
    }
}

impl<T: BlockDecryptMut> Decrypt for CbcDecrypt<T> {
    fn decrypt(&mut self, data: &mut [u8]) {
        let (blocks, tail) = InOutBuf::from(data).into_chunks();
        debug_assert!(tail.is_empty(), "ciphertext is not aligned to block");
        self.decrypt.decrypt_blocks_inout_mut(blocks)
    }
}
