use bytes::Bytes;
use derivative::Derivative;
use std::future::Future;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::super::auth::encode_request;
use super::super::interceptor::BoxFuture;
use super::{AuthMethod, MethodStep};

/// Prompts sent by the server in the "keyboard-interactive" method.
///
/// This corresponds to `SSH_MSG_USERAUTH_INFO_REQUEST` (RFC 4256, section 3.2).
#[derive(Debug, Clone)]
pub struct KeyboardPrompt {
    /// Name of the request, might be shown as a window title.
    pub name: String,
    /// Instructions for the user.
    pub instruction: String,
    /// Language tag (deprecated by the RFC, usually empty).
    pub lang: String,
    /// The individual prompts.
    pub prompts: Vec<KeyboardPromptItem>,
}

/// A single prompt in [`KeyboardPrompt`].
#[derive(Debug, Clone)]
pub struct KeyboardPromptItem {
    /// Text that should be shown to the user.
    pub prompt: String,
    /// True if the user input should be echoed (false for passwords).
    pub echo: bool,
}

/// Collects answers to [`KeyboardPrompt`]s from the user.
///
/// Return one answer per prompt. The server might send any number of requests (possibly with no
/// prompts at all) before the authentication finishes.
///
/// The answers are returned as a future, so the connection keeps running while the user types;
/// if the connection closes in the meantime, the future is dropped. Collectors that must block
/// (such as reading from a terminal) should run in [`tokio::task::spawn_blocking()`].
///
/// This is implemented for closures `FnMut(KeyboardPrompt) -> impl Future<Output = Vec<String>>`.
pub trait PromptCollector: Send + 'static {
    /// Answer the prompts.
    fn collect(&mut self, prompt: KeyboardPrompt) -> BoxFuture<'static, Vec<String>>;
}

impl<F, Fut> PromptCollector for F
    where F: FnMut(KeyboardPrompt) -> Fut + Send + 'static,
          Fut: Future<Output = Vec<String>> + Send + 'static,
{
    fn collect(&mut self, prompt: KeyboardPrompt) -> BoxFuture<'static, Vec<String>> {
        Box::pin(self(prompt))
    }
}

/// Answers to an `SSH_MSG_USERAUTH_INFO_REQUEST` that are still being collected.
pub(in super::super) struct PendingAnswers {
    answers: BoxFuture<'static, Vec<String>>,
    prompt_count: usize,
}

impl PendingAnswers {
    /// Waits for the answers and encodes `SSH_MSG_USERAUTH_INFO_RESPONSE` (RFC 4256, section 3.4).
    pub async fn into_response(self) -> Bytes {
        let mut answers = self.answers.await;
        if answers.len() != self.prompt_count {
            log::warn!("got {} answers to {} keyboard-interactive prompts", answers.len(), self.prompt_count);
            answers.resize(self.prompt_count, String::new());
        }

        let mut response = PacketEncode::with_msg(msg::USERAUTH_INFO_RESPONSE);
        response.put_u32(answers.len() as u32);
        for answer in answers.iter() {
            response.put_str(answer);
        }
        response.finish()
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(in super::super) struct AuthKeyboard {
    pub username: String,
    pub submethods: Vec<String>,
    #[derivative(Debug = "ignore")]
    pub collector: Box<dyn PromptCollector>,
}

impl AuthMethod for AuthKeyboard {
    fn name(&self) -> &'static str { "keyboard-interactive" }

    fn request(&mut self, _session_id: &[u8]) -> Result<Bytes> {
        // RFC 4256, section 3.1
        let mut payload = encode_request(&self.username, "keyboard-interactive");
        payload.put_str("");
        payload.put_name_list(&self.submethods);
        Ok(payload.finish())
    }

    fn recv_method_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<MethodStep> {
        if msg_id != msg::USERAUTH_INFO_REQUEST {
            return Err(Error::Protocol("received unexpected method-specific packet for method 'keyboard-interactive'"))
        }

        let prompt = decode_info_request(payload)?;
        log::debug!("received SSH_MSG_USERAUTH_INFO_REQUEST with {} prompts", prompt.prompts.len());

        let prompt_count = prompt.prompts.len();
        let answers = self.collector.collect(prompt);
        Ok(MethodStep::Prompt(PendingAnswers { answers, prompt_count }))
    }
}

fn decode_info_request(payload: &mut PacketDecode) -> Result<KeyboardPrompt> {
    let name = payload.get_string()?;
    let instruction = payload.get_string()?;
    let lang = payload.get_string()?;
    let num_prompts = payload.get_u32()? as usize;
    // every prompt takes at least 5 bytes, so this bounds the allocation
    if num_prompts > payload.remaining_len() / 5 {
        return Err(Error::Decode("too many prompts in SSH_MSG_USERAUTH_INFO_REQUEST"))
    }

    let mut prompts = Vec::with_capacity(num_prompts);
    for _ in 0..num_prompts {
        prompts.push(KeyboardPromptItem {
            prompt: payload.get_string()?,
            echo: payload.get_bool()?,
        });
    }
    Ok(KeyboardPrompt { name, instruction, lang, prompts })
}
