//! Encoding and decoding of SSH packets.
//!
//! [`PacketEncode`] and [`PacketDecode`] work with the payload of a single packet, while the
//! crate-private pipes handle framing, padding, encryption and MAC of whole packets.
use bytes::Bytes;
use crate::{Error, Result};
pub use self::packet_encode::PacketEncode;
pub use self::packet_decode::PacketDecode;
pub(crate) use self::recv_pipe::RecvPipe;
pub(crate) use self::send_pipe::SendPipe;

mod packet_encode;
mod packet_decode;
mod recv_pipe;
mod send_pipe;

/// A single packet received from the peer.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Message id (the first byte of the payload).
    pub msg_id: u8,
    /// Whole payload, including the message id.
    pub payload: Bytes,
    /// Sequence number of the packet in the receiving direction.
    pub packet_seq: u32,
}

impl Packet {
    pub(crate) fn new(payload: Bytes, packet_seq: u32) -> Result<Packet> {
        let msg_id = *payload.first().ok_or(Error::Decode("packet payload is empty"))?;
        Ok(Packet { msg_id, payload, packet_seq })
    }

    /// Returns a decoder positioned just after the message id.
    pub fn decode(&self) -> PacketDecode {
        PacketDecode::new(self.payload.slice(1..))
    }
}
