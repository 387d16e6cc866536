use bytes::Bytes;
use rsa::traits::PublicKeyParts as _;
use sha2::Digest as _;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, Privkey, SignatureVerified, decode_signature, encode_signature};

/// "ssh-rsa" public key algorithm using SHA-1 from RFC 4253.
///
/// SHA-1 signatures are deprecated, so this algorithm is enabled only in
/// [`ClientConfig::default_compatible_less_secure()`][crate::ClientConfig::default_compatible_less_secure()].
pub static SSH_RSA_SHA1: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-rsa",
    verify: |pubkey, message, signature| verify(RsaHash::Sha1, pubkey, message, signature),
    sign: |privkey, message| sign(RsaHash::Sha1, privkey, message),
};

/// "rsa-sha2-256" public key algorithm using SHA2-256 from RFC 8332.
pub static RSA_SHA2_256: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-256",
    verify: |pubkey, message, signature| verify(RsaHash::Sha256, pubkey, message, signature),
    sign: |privkey, message| sign(RsaHash::Sha256, privkey, message),
};

/// "rsa-sha2-512" public key algorithm using SHA2-512 from RFC 8332.
pub static RSA_SHA2_512: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-512",
    verify: |pubkey, message, signature| verify(RsaHash::Sha512, pubkey, message, signature),
    sign: |privkey, message| sign(RsaHash::Sha512, privkey, message),
};

/// RSA public key.
///
/// You can convert it to and from [`rsa::RsaPublicKey`] using `from()`/`into()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPubkey {
    pub(crate) pubkey: rsa::RsaPublicKey,
}

/// RSA private key.
///
/// You can convert it to and from [`rsa::RsaPrivateKey`] using `from()`/`into()`.
#[derive(Clone)]
#[cfg_attr(feature = "debug_less_secure", derive(Debug))]
pub struct RsaPrivkey {
    pub(crate) privkey: rsa::RsaPrivateKey,
}

impl RsaPrivkey {
    /// Get the public key associated with this private key.
    pub fn pubkey(&self) -> RsaPubkey {
        RsaPubkey { pubkey: self.privkey.to_public_key() }
    }
}

#[derive(Debug, Copy, Clone)]
enum RsaHash {
    Sha1,
    Sha256,
    Sha512,
}

impl RsaHash {
    fn signature_format(self) -> &'static str {
        match self {
            RsaHash::Sha1 => "ssh-rsa",
            RsaHash::Sha256 => "rsa-sha2-256",
            RsaHash::Sha512 => "rsa-sha2-512",
        }
    }

    fn hash(self, message: &[u8]) -> (Vec<u8>, rsa::Pkcs1v15Sign) {
        match self {
            RsaHash::Sha1 =>
                (sha1::Sha1::digest(message).to_vec(), rsa::Pkcs1v15Sign::new::<sha1::Sha1>()),
            RsaHash::Sha256 =>
                (sha2::Sha256::digest(message).to_vec(), rsa::Pkcs1v15Sign::new::<sha2::Sha256>()),
            RsaHash::Sha512 =>
                (sha2::Sha512::digest(message).to_vec(), rsa::Pkcs1v15Sign::new::<sha2::Sha512>()),
        }
    }
}

fn verify(hash: RsaHash, pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Rsa(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

    // RFC 4253, section 6.6 and RFC 8332, section 3
    let signature_data = decode_signature(signature, hash.signature_format())?;
    let (hashed, scheme) = hash.hash(message);
    match pubkey.pubkey.verify(scheme, &hashed, &signature_data) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

fn sign(hash: RsaHash, privkey: &Privkey, message: &[u8]) -> Result<Bytes> {
    let Privkey::Rsa(privkey) = privkey else { return Err(Error::PrivkeyFormat) };

    let (hashed, scheme) = hash.hash(message);
    let signature_data = privkey.privkey.sign(scheme, &hashed)
        .map_err(|_| Error::Crypto("could not sign with rsa"))?;
    Ok(encode_signature(hash.signature_format(), &signature_data))
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &RsaPubkey) {
    blob.put_str("ssh-rsa");
    blob.put_biguint(pubkey.pubkey.e());
    blob.put_biguint(pubkey.pubkey.n());
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<RsaPubkey> {
    let e = blob.get_biguint()?;
    let n = blob.get_biguint()?;
    let pubkey = rsa::RsaPublicKey::new(n, e)
        .map_err(|_| Error::Decode("decoded ssh-rsa pubkey is invalid"))?;
    Ok(RsaPubkey { pubkey })
}

impl From<rsa::RsaPublicKey> for RsaPubkey {
    fn from(pubkey: rsa::RsaPublicKey) -> Self { Self { pubkey } }
}

impl From<RsaPubkey> for rsa::RsaPublicKey {
    fn from(pubkey: RsaPubkey) -> Self { pubkey.pubkey }
}

impl From<rsa::RsaPrivateKey> for RsaPrivkey {
    fn from(privkey: rsa::RsaPrivateKey) -> Self { Self { privkey } }
}

impl From<RsaPrivkey> for rsa::RsaPrivateKey {
    fn from(privkey: RsaPrivkey) -> Self { privkey.privkey }
}

impl fmt::Display for RsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rsa {} bits, e {}", self.pubkey.n().bits(), self.pubkey.e())
    }
}
