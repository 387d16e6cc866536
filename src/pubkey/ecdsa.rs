use bytes::Bytes;
use ecdsa::signature::{Signer as _, Verifier as _};
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, Privkey, SignatureVerified, decode_signature, encode_signature};

// RFC 5656, section 3: the key is `string curve || string Q` (Q is an uncompressed SEC1 point)
// and the signature blob is `mpint r || mpint s`.
macro_rules! ecdsa_curve {
    (
        algo: $algo:ident, name: $name:literal, curve_name: $curve_name:literal,
        curve: $curve:ident, pubkey: $pubkey:ident, privkey: $privkey:ident,
        variant: $variant:ident, scalar_len: $scalar_len:literal,
        verify: $verify:ident, sign: $sign:ident,
        encode: $encode:ident, decode: $decode:ident,
    ) => {
        #[doc = concat!("\"", $name, "\" public key algorithm from RFC 5656.")]
        ///
        #[doc = concat!("This algorithm is compatible with [`", stringify!($pubkey), "`] and [`",
            stringify!($privkey), "`].")]
        pub static $algo: PubkeyAlgo = PubkeyAlgo {
            name: $name,
            verify: $verify,
            sign: $sign,
        };

        #[doc = concat!("ECDSA public key on curve ", $curve_name, ".")]
        ///
        #[doc = concat!("You can convert it to and from [`", stringify!($curve), "::ecdsa::VerifyingKey`] \
            using `from()`/`into()`.")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $pubkey {
            pub(crate) verifying: $curve::ecdsa::VerifyingKey,
        }

        #[doc = concat!("ECDSA private key on curve ", $curve_name, ".")]
        ///
        #[doc = concat!("You can convert it to and from [`", stringify!($curve), "::ecdsa::SigningKey`] \
            using `from()`/`into()`.")]
        #[derive(Clone)]
        #[cfg_attr(feature = "debug_less_secure", derive(Debug))]
        pub struct $privkey {
            pub(crate) signing: $curve::ecdsa::SigningKey,
        }

        impl $privkey {
            /// Get the public key associated with this private key.
            pub fn pubkey(&self) -> $pubkey {
                $pubkey { verifying: *self.signing.verifying_key() }
            }
        }

        fn $verify(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
            let Pubkey::$variant(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

            let mut signature_blob = PacketDecode::new(decode_signature(signature, $name)?);
            let r = signature_blob.get_scalar($scalar_len).map_err(|_| Error::Signature)?;
            let s = signature_blob.get_scalar($scalar_len).map_err(|_| Error::Signature)?;
            let ecdsa_signature = $curve::ecdsa::Signature::from_scalars(
                *$curve::FieldBytes::from_slice(&r),
                *$curve::FieldBytes::from_slice(&s),
            ).map_err(|_| Error::Signature)?;

            match pubkey.verifying.verify(message, &ecdsa_signature) {
                Ok(_) => Ok(SignatureVerified::assertion()),
                Err(_) => Err(Error::Signature),
            }
        }

        fn $sign(privkey: &Privkey, message: &[u8]) -> Result<Bytes> {
            let Privkey::$variant(privkey) = privkey else { return Err(Error::PrivkeyFormat) };

            let ecdsa_signature: $curve::ecdsa::Signature = privkey.signing.try_sign(message)
                .map_err(|_| Error::Crypto("could not sign with ecdsa"))?;
            let (r, s) = ecdsa_signature.split_bytes();

            let mut signature_blob = PacketEncode::new();
            signature_blob.put_mpint_uint_be(&r);
            signature_blob.put_mpint_uint_be(&s);
            Ok(encode_signature($name, &signature_blob.finish()))
        }

        pub(super) fn $encode(blob: &mut PacketEncode, pubkey: &$pubkey) {
            blob.put_str($name);
            blob.put_str($curve_name);
            blob.put_bytes(pubkey.verifying.to_encoded_point(false).as_bytes());
        }

        pub(super) fn $decode(blob: &mut PacketDecode) -> Result<$pubkey> {
            if blob.get_string()? != $curve_name {
                return Err(Error::Decode("ecdsa public key has unexpected curve"))
            }
            let point = blob.get_bytes()?;
            let verifying = $curve::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| Error::Crypto("ecdsa public key is not valid"))?;
            Ok($pubkey { verifying })
        }

        impl From<$curve::ecdsa::VerifyingKey> for $pubkey {
            fn from(verifying: $curve::ecdsa::VerifyingKey) -> Self { Self { verifying } }
        }

        impl From<$pubkey> for $curve::ecdsa::VerifyingKey {
            fn from(pubkey: $pubkey) -> Self { pubkey.verifying }
        }

        impl From<$curve::ecdsa::SigningKey> for $privkey {
            fn from(signing: $curve::ecdsa::SigningKey) -> Self { Self { signing } }
        }

        impl From<$privkey> for $curve::ecdsa::SigningKey {
            fn from(privkey: $privkey) -> Self { privkey.signing }
        }

        impl fmt::Display for $pubkey {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                let point = Bytes::copy_from_slice(self.verifying.to_encoded_point(true).as_bytes());
                write!(f, "ecdsa {} {:x}", $curve_name, point)
            }
        }
    };
}

ecdsa_curve! {
    algo: ECDSA_SHA2_NISTP256, name: "ecdsa-sha2-nistp256", curve_name: "nistp256",
    curve: p256, pubkey: EcdsaP256Pubkey, privkey: EcdsaP256Privkey,
    variant: EcdsaP256, scalar_len: 32,
    verify: verify_p256, sign: sign_p256,
    encode: encode_p256_pubkey, decode: decode_p256_pubkey,
}

ecdsa_curve! {
    algo: ECDSA_SHA2_NISTP384, name: "ecdsa-sha2-nistp384", curve_name: "nistp384",
    curve: p384, pubkey: EcdsaP384Pubkey, privkey: EcdsaP384Privkey,
    variant: EcdsaP384, scalar_len: 48,
    verify: verify_p384, sign: sign_p384,
    encode: encode_p384_pubkey, decode: decode_p384_pubkey,
}
