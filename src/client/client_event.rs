use tokio::sync::oneshot;
use crate::error::{Result, Error};
use crate::pubkey::Pubkey;
use super::channel::AcceptChannel;

/// An event returned from [`ClientReceiver`][super::ClientReceiver].
///
/// These are "global" events that are related to the SSH connection, not to a particular
/// channel. You can safely ignore all events except [`ServerPubkey`][Self::ServerPubkey], which
/// you must handle in order to accept or reject the server's public key (if you don't handle this
/// event, the key will be rejected and we will abort the connection).
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility. It should always be safe to ignore any events that you don't intend to
/// handle.
#[non_exhaustive]
#[derive(Debug)]
pub enum ClientEvent {
    /// Server presented its public key and you should verify it.
    ///
    /// This event is produced only during the first key exchange. When the connection is rekeyed
    /// later, the server must present the same key, otherwise we abort the connection.
    ///
    /// The SSH protocol does not provide any mechanism to verify the identity of the server, so it
    /// is up to you. Please read RFC 4251, section 4.1 for more details and suggestions on how to
    /// deal with this problem.
    ///
    /// We have already verified that the server owns the private key of this [`Pubkey`]. Use the
    /// [`AcceptPubkey`] object to either [`.accept()`][AcceptPubkey::accept()] or
    /// [`.reject()`][AcceptPubkey::reject()] the key.
    ServerPubkey(Pubkey, AcceptPubkey),

    /// Server sent us a debugging message (`SSH_MSG_DEBUG`, RFC 4253, section 11.3).
    DebugMsg(DebugMsg),

    /// Server sent a text that the user should see before authentication.
    ///
    /// This is the "banner message" (`SSH_MSG_USERAUTH_BANNER`) described in RFC 4252, section
    /// 5.2.
    AuthBanner(AuthBanner),

    /// Server wants to open a channel.
    ///
    /// We only offer channels that you asked for: `forwarded-tcpip` channels for ports that you
    /// forwarded with [`Client::tcpip_forward()`][super::Client::tcpip_forward()], and
    /// `auth-agent@openssh.com` channels after you requested agent forwarding on a session. If you
    /// drop the [`AcceptChannel`], the channel is rejected.
    ChannelOpen(AcceptChannel),
}

/// Debugging message sent by the SSH server.
///
/// You might receive this in [`ClientEvent::DebugMsg`]. Please consult RFC 4253, section 11.3 for
/// details.
#[derive(Debug, Clone)]
pub struct DebugMsg {
    /// If true, you should display this message.
    pub always_display: bool,
    /// The debugging message string.
    pub message: String,
    /// Language tag of the message (as in RFC 3066).
    pub message_lang: String,
}

/// Banner message sent by the SSH server.
#[derive(Debug, Clone)]
pub struct AuthBanner {
    /// The banner message string.
    pub message: String,
    /// Language tag of the message (per RFC 3066).
    pub message_lang: String,
}


/// Tell us whether the server public key is valid.
///
/// You receive this object in [`ClientEvent::ServerPubkey`]. If you drop this object, it is
/// treated as rejection.
#[derive(Debug)]
pub struct AcceptPubkey {
    pub(super) accept_tx: oneshot::Sender<Result<PubkeyAccepted>>,
}

/// A "witness" that the user has really called [`AcceptPubkey::accept()`].
#[derive(Debug)]
pub(super) struct PubkeyAccepted(());

impl AcceptPubkey {
    /// Accept the server public key.
    ///
    /// You assert that this public key really belongs to the server that you want to connect to.
    pub fn accept(self) {
        let _ = self.accept_tx.send(Ok(PubkeyAccepted(())));
    }

    /// Reject the server public key.
    ///
    /// The connection will be aborted with error `Error::PubkeyAccept(Box::new(err))`.
    pub fn reject<E: std::error::Error + Send + Sync + 'static>(self, err: E) {
        let _ = self.accept_tx.send(Err(Error::PubkeyAccept(Box::new(err))));
    }
}
