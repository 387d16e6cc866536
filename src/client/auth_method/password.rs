use bytes::Bytes;
use derivative::Derivative;
use crate::codec::PacketDecode;
use crate::codes::msg;
use crate::error::{Result, Error};
use super::super::auth::{AuthOutcome, AuthPasswordPrompt, encode_request};
use super::{AuthMethod, MethodStep};

#[derive(Derivative)]
#[derivative(Debug)]
pub(in super::super) struct AuthPassword {
    pub username: String,
    #[derivative(Debug = "ignore")]
    pub password: String,
    #[derivative(Debug = "ignore")]
    pub new_password: Option<String>,
}

impl AuthMethod for AuthPassword {
    fn name(&self) -> &'static str { "password" }

    fn request(&mut self, _session_id: &[u8]) -> Result<Bytes> {
        // RFC 4252, section 8
        let mut payload = encode_request(&self.username, "password");
        payload.put_bool(self.new_password.is_some());
        payload.put_str(&self.password);
        if let Some(new_password) = self.new_password.as_ref() {
            payload.put_str(new_password);
        }
        Ok(payload.finish())
    }

    fn recv_method_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<MethodStep> {
        if msg_id != msg::USERAUTH_PASSWD_CHANGEREQ {
            return Err(Error::Protocol("received unexpected method-specific packet for method 'password'"))
        }
        let prompt = AuthPasswordPrompt {
            prompt: payload.get_string()?,
            prompt_lang: payload.get_string()?,
        };
        log::debug!("received SSH_MSG_USERAUTH_PASSWD_CHANGEREQ: {:?}", prompt.prompt);
        Ok(MethodStep::Finish(AuthOutcome::ChangePassword(prompt)))
    }
}
