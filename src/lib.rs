//! Asynchronous SSH2 client transport and channel multiplexer in pure Rust.
//!
//! - Entry point for making SSH connections is the [`Client`].
//! - Channels (sessions, commands, forwarded ports) are opened with
//! [`Client::open_channel()`] and described by [`ChannelKind`].
//! - The cryptographic algorithms are in the [`cipher`], [`mac`], [`kex`] and [`pubkey`] modules
//! and you select them in the [`ClientConfig`].
//!
#![allow(clippy::box_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::unused_unit)]
#![allow(clippy::unit_arg)]
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

pub use crate::client::{AuthResult, AuthFailure, AuthPasswordPrompt};
pub use crate::client::{KeyboardPrompt, KeyboardPromptItem, PromptCollector};
pub use crate::client::{
    Channel, ChannelReceiver, ChannelEvent, ChannelConfig, ChannelKind, AcceptChannel, ExitSignal,
    DataType, DATA_STANDARD, DATA_STDERR, PtyRequest, WindowSize,
};
pub use crate::client::{Client, ClientFuture, ClientConfig};
pub use crate::client::{ClientReceiver, ClientEvent, AcceptPubkey, DebugMsg, AuthBanner};
pub use crate::codec::{PacketEncode, PacketDecode};
pub use crate::error::{Result, Error, AlgoNegotiateError, DisconnectError, ChannelOpenError};

pub use self::cipher::CipherAlgo;
pub use self::kex::KexAlgo;
pub use self::mac::MacAlgo;
pub use self::pubkey::{PubkeyAlgo, Pubkey, Privkey};

pub use bytes;
pub use ecdsa;
pub use ecdsa::elliptic_curve;
pub use ed25519_dalek;
pub use p256;
pub use p384;
pub use rsa;

pub mod cipher;
mod client;
mod codec;
pub mod codes;
mod error;
pub mod kex;
pub mod mac;
pub mod pubkey;
mod util;
