pub use self::auth::{AuthResult, AuthFailure, AuthPasswordPrompt};
pub use self::auth_method::keyboard::{KeyboardPrompt, KeyboardPromptItem, PromptCollector};
pub use self::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelConfig, AcceptChannel, ExitSignal,
    DataType, DATA_STANDARD, DATA_STDERR, PtyRequest, WindowSize,
};
pub use self::channel_kind::ChannelKind;
pub use self::client::{Client, ClientReceiver, ClientFuture, ClientConfig};
pub use self::client_event::{ClientEvent, AcceptPubkey, DebugMsg, AuthBanner};

mod auth;
mod auth_method;
mod channel;
mod channel_kind;
mod channel_state;
mod client;
mod client_event;
mod conn;
mod global;
mod interceptor;
mod negotiate;
mod recv;
mod registry;
mod rendezvous;
mod transport;
#[cfg(test)] mod test_peer;
