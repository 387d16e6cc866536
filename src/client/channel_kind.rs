use bytes::Bytes;
use std::sync::atomic::Ordering;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::Result;
use super::channel::{Channel, PtyRequest};
use super::conn::Conn;

/// Kind of an SSH channel, with the data that is specific to the kind.
///
/// Channels of all kinds share the same state machine, the kind decides the channel type in
/// `SSH_MSG_CHANNEL_OPEN`, the type-specific open data and the requests that we send after the
/// channel is opened and before it is handed over to you.
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelKind {
    /// Plain `"session"` channel without any requests (RFC 4254, section 6.1).
    Session,

    /// Session that runs the user's shell, optionally with a pseudo-terminal and agent
    /// forwarding: `pty-req`, `auth-agent-req@openssh.com` and `shell`.
    Shell {
        /// Pseudo-terminal to request before starting the shell.
        pty: Option<PtyRequest>,
        /// If true, request forwarding of the authentication agent.
        agent_forwarding: bool,
    },

    /// Session that executes a command with `exec`.
    Exec {
        /// The command line.
        command: Bytes,
    },

    /// Session that starts a subsystem with `subsystem`.
    Subsystem {
        /// Name of the subsystem, such as `"sftp"`.
        name: String,
    },

    /// Local port forwarding: `"direct-tcpip"` (RFC 4254, section 7.2).
    DirectTcpip {
        /// Host that the server should connect to.
        host: String,
        /// Port that the server should connect to.
        port: u32,
        /// Address of the machine where the connection originated.
        originator_host: String,
        /// Port on the machine where the connection originated.
        originator_port: u32,
    },

    /// Remote port forwarding: `"forwarded-tcpip"`, opened by the server for a port that you
    /// forwarded with [`Client::tcpip_forward()`][super::Client::tcpip_forward()].
    ForwardedTcpip {
        /// Address that was connected.
        connected_host: String,
        /// Port that was connected.
        connected_port: u32,
        /// Address of the machine where the connection originated.
        originator_host: String,
        /// Port on the machine where the connection originated.
        originator_port: u32,
    },

    /// Agent forwarding: `"auth-agent@openssh.com"`, opened by the server after you requested
    /// agent forwarding on a session. The channel carries the agent protocol as opaque bytes.
    AuthAgent,
}

impl ChannelKind {
    /// The channel type used in `SSH_MSG_CHANNEL_OPEN`.
    pub fn channel_type(&self) -> &'static str {
        match self {
            ChannelKind::Session | ChannelKind::Shell { .. } |
            ChannelKind::Exec { .. } | ChannelKind::Subsystem { .. } => "session",
            ChannelKind::DirectTcpip { .. } => "direct-tcpip",
            ChannelKind::ForwardedTcpip { .. } => "forwarded-tcpip",
            ChannelKind::AuthAgent => "auth-agent@openssh.com",
        }
    }

    pub(super) fn open_data(&self) -> Bytes {
        let mut payload = PacketEncode::new();
        match self {
            ChannelKind::DirectTcpip { host, port, originator_host, originator_port } => {
                payload.put_str(host);
                payload.put_u32(*port);
                payload.put_str(originator_host);
                payload.put_u32(*originator_port);
            },
            ChannelKind::ForwardedTcpip { connected_host, connected_port, originator_host, originator_port } => {
                payload.put_str(connected_host);
                payload.put_u32(*connected_port);
                payload.put_str(originator_host);
                payload.put_u32(*originator_port);
            },
            _ => {},
        }
        payload.finish()
    }

    /// Decodes a channel offered by the server.
    ///
    /// Returns `None` for channel types that we never accept.
    pub(super) fn decode_offer(channel_type: &str, payload: &mut PacketDecode) -> Result<Option<ChannelKind>> {
        Ok(match channel_type {
            "forwarded-tcpip" => Some(ChannelKind::ForwardedTcpip {
                connected_host: payload.get_string()?,
                connected_port: payload.get_u32()?,
                originator_host: payload.get_string()?,
                originator_port: payload.get_u32()?,
            }),
            "auth-agent@openssh.com" => Some(ChannelKind::AuthAgent),
            _ => None,
        })
    }

    /// Sends the requests that set up the channel after it was opened.
    ///
    /// If a request fails, the caller closes the channel.
    pub(super) async fn on_established(&self, conn: &Conn, channel: &Channel) -> Result<()> {
        match self {
            ChannelKind::Shell { pty, agent_forwarding } => {
                if let Some(pty) = pty {
                    channel.request_pty(pty).await?;
                }
                if *agent_forwarding {
                    channel.request_agent_forwarding().await?;
                    conn.agent_forwarding.store(true, Ordering::SeqCst);
                }
                channel.shell().await
            },
            ChannelKind::Exec { command } => channel.exec(command).await,
            ChannelKind::Subsystem { name } => channel.subsystem(name).await,
            _ => Ok(()),
        }
    }
}
