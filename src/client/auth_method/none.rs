use bytes::Bytes;
use crate::codec::PacketDecode;
use crate::error::{Result, Error};
use super::super::auth::encode_request;
use super::{AuthMethod, MethodStep};

/// The "none" method (RFC 4252, section 5.2), mostly useful to find out which methods the
/// server supports.
#[derive(Debug)]
pub(in super::super) struct AuthNone {
    pub username: String,
}

impl AuthMethod for AuthNone {
    fn name(&self) -> &'static str { "none" }

    fn request(&mut self, _session_id: &[u8]) -> Result<Bytes> {
        Ok(encode_request(&self.username, "none").finish())
    }

    fn recv_method_packet(&mut self, _msg_id: u8, _payload: &mut PacketDecode) -> Result<MethodStep> {
        Err(Error::Protocol("received unexpected method-specific packet for method 'none'"))
    }
}
