use bytes::Bytes;
use crate::codec::PacketDecode;
use crate::error::Result;
use super::auth::AuthOutcome;

pub(super) mod keyboard;
pub(super) mod none;
pub(super) mod password;
pub(super) mod pubkey;

/// One of the methods from RFC 4252 (and RFC 4256 for "keyboard-interactive").
///
/// The generic part of the sequence (service request, banners, success and failure) is handled
/// by [`run_auth()`][super::auth::run_auth()], the method only builds the request and handles
/// the method-specific messages 60 to 79.
pub(super) trait AuthMethod: Send {
    fn name(&self) -> &'static str;
    fn request(&mut self, session_id: &[u8]) -> Result<Bytes>;
    fn recv_method_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<MethodStep>;
}

pub(super) enum MethodStep {
    Respond(Bytes),
    /// Send the response once the user answers the prompts.
    Prompt(keyboard::PendingAnswers),
    Finish(AuthOutcome),
}
