use bytes::Bytes;
use derivative::Derivative;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use crate::pubkey::{Privkey, Pubkey, PubkeyAlgo};
use super::super::auth::{AuthOutcome, encode_request};
use super::{AuthMethod, MethodStep};

/// The "publickey" method with a signature (RFC 4252, section 7).
#[derive(Derivative)]
#[derivative(Debug)]
pub(in super::super) struct AuthPubkey {
    pub username: String,
    #[derivative(Debug = "ignore")]
    pub privkey: Privkey,
    pub pubkey_algo: &'static PubkeyAlgo,
}

/// The "publickey" method without a signature, which only asks whether the key is acceptable.
#[derive(Debug)]
pub(in super::super) struct CheckPubkey {
    pub username: String,
    pub pubkey: Pubkey,
    pub pubkey_algo: &'static PubkeyAlgo,
}

impl AuthMethod for AuthPubkey {
    fn name(&self) -> &'static str { "publickey" }

    fn request(&mut self, session_id: &[u8]) -> Result<Bytes> {
        let pubkey_blob = self.privkey.pubkey().encode();
        let mut payload = encode_request(&self.username, "publickey");
        payload.put_bool(true);
        payload.put_str(self.pubkey_algo.name);
        payload.put_bytes(&pubkey_blob);

        // the signature covers the session id followed by the request without the signature
        let mut signed = PacketEncode::new();
        signed.put_bytes(session_id);
        signed.put_raw(&payload.clone().finish());
        let signature = (self.pubkey_algo.sign)(&self.privkey, &signed.finish())?;

        payload.put_bytes(&signature);
        Ok(payload.finish())
    }

    fn recv_method_packet(&mut self, _msg_id: u8, _payload: &mut PacketDecode) -> Result<MethodStep> {
        Err(Error::Protocol("received unexpected method-specific packet for method 'publickey'"))
    }
}

impl AuthMethod for CheckPubkey {
    fn name(&self) -> &'static str { "publickey" }

    fn request(&mut self, _session_id: &[u8]) -> Result<Bytes> {
        let mut payload = encode_request(&self.username, "publickey");
        payload.put_bool(false);
        payload.put_str(self.pubkey_algo.name);
        payload.put_bytes(&self.pubkey.encode());
        Ok(payload.finish())
    }

    fn recv_method_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<MethodStep> {
        if msg_id != msg::USERAUTH_PK_OK {
            return Err(Error::Protocol("received unexpected method-specific packet for method 'publickey'"))
        }

        let algo_name = payload.get_string()?;
        let pubkey_blob = payload.get_bytes()?;
        if algo_name != self.pubkey_algo.name || pubkey_blob != self.pubkey.encode() {
            return Err(Error::Protocol("received SSH_MSG_USERAUTH_PK_OK for a different key"))
        }
        log::debug!("received SSH_MSG_USERAUTH_PK_OK for {:?}", algo_name);
        Ok(MethodStep::Finish(AuthOutcome::PubkeyOk))
    }
}
