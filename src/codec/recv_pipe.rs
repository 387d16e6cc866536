use bytes::BytesMut;
use crate::{Error, Result};
use crate::cipher::{self, PacketDecrypt};
use crate::mac::{self, MacVerified};
use super::Packet;

/// Upper bound (exclusive) on `packet_length` that we accept.
const MAX_PACKET_LEN: usize = 0x80000;

/// Lower bound on `packet_length` for ciphers that align the length field with the rest of the
/// packet. AEAD ciphers keep the length out of the aligned part, so their smallest packet is 8.
const MIN_PACKET_LEN: usize = 12;
const MIN_AEAD_PACKET_LEN: usize = 8;

pub(crate) struct RecvPipe {
    buf: BytesMut,
    state: State,
    decrypt: PacketDecrypt,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    byte_count: u64,
}

#[derive(Debug, Copy, Clone)]
enum State {
    Ready,
    ScanningLine { pos: usize },
    DecryptedLen { packet_len: usize },
}

impl RecvPipe {
    pub fn new() -> RecvPipe {
        RecvPipe {
            buf: BytesMut::new(),
            state: State::Ready,
            decrypt: PacketDecrypt::EncryptAndMac(Box::new(cipher::Identity), Box::new(mac::Empty)),
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            byte_count: 0,
        }
    }

    pub fn feed_buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Consumes the identification line of the peer (RFC 4253, section 4.2), skipping any lines
    /// that precede it.
    pub fn consume_ident(&mut self) -> Result<Option<bytes::Bytes>> {
        loop {
            let line = match self.consume_line()? {
                Some(line) => line,
                None => return Ok(None),
            };

            if line.starts_with(&b"SSH-"[..]) {
                if line.len() > 255 {
                    return Err(Error::Protocol("received identification string is too long"))
                }
                return Ok(Some(line));
            }
        }
    }

    fn consume_line(&mut self) -> Result<Option<bytes::Bytes>> {
        let mut pos = match self.state {
            State::Ready => 0,
            State::ScanningLine { pos } => pos,
            State::DecryptedLen { .. } =>
                return Err(Error::Protocol("identification line requested in the middle of a packet")),
        };

        let mut line_len = None;
        while pos < self.buf.len() {
            if self.buf[pos] == b'\n' {
                line_len = Some(if pos > 0 && self.buf[pos - 1] == b'\r' { pos - 1 } else { pos });
                pos += 1;
                break;
            }
            pos += 1;
        }

        match line_len {
            Some(line_len) => {
                self.state = State::Ready;
                let mut line = self.buf.split_to(pos).freeze();
                line.truncate(line_len);
                Ok(Some(line))
            },
            None if self.buf.len() > 8 * 1024 =>
                Err(Error::Protocol("peer sent too long line before identification")),
            None => {
                self.state = State::ScanningLine { pos };
                Ok(None)
            },
        }
    }

    /// Decodes the next packet from the buffered bytes, or returns `None` if more bytes are
    /// needed.
    pub fn consume_packet(&mut self) -> Result<Option<Packet>> {
        let packet_len = match self.state {
            State::Ready => {
                let packet_len = match self.decrypt_packet_len()? {
                    Some(packet_len) => packet_len as usize,
                    None => return Ok(None),
                };

                let is_aead = self.decrypt.is_aead();
                let min_len = if is_aead { MIN_AEAD_PACKET_LEN } else { MIN_PACKET_LEN };
                if packet_len >= MAX_PACKET_LEN {
                    return Err(Error::Protocol("invalid packet length (too long)"));
                } else if packet_len < min_len {
                    return Err(Error::Protocol("invalid packet length (too short)"));
                }

                let aligned_len = if is_aead { packet_len } else { packet_len + 4 };
                if aligned_len % self.block_len != 0 {
                    return Err(Error::Protocol("invalid packet length (not aligned to cipher block length)"));
                }

                log::trace!("decrypted packet len {}", packet_len);
                self.state = State::DecryptedLen { packet_len };
                packet_len
            },
            State::DecryptedLen { packet_len } =>
                packet_len,
            State::ScanningLine { .. } =>
                return Err(Error::Protocol("packet requested in the middle of identification line")),
        };

        let total_packet_len = 4 + packet_len + self.tag_len;
        if self.buf.len() < total_packet_len {
            self.buf.reserve(total_packet_len - self.buf.len());
            return Ok(None)
        }

        let mut packet = self.buf.split_to(total_packet_len);
        // without AEAD, the padding length is in the first block, which is already decrypted
        let is_aead = self.decrypt.is_aead();
        if !is_aead {
            check_padding_len(packet_len, packet[4] as usize)?;
        }
        let _verified: MacVerified = self.decrypt_packet_body(&mut packet, packet_len)?;

        let padding_len = packet[4] as usize;
        if is_aead {
            check_padding_len(packet_len, padding_len)?;
        }

        let payload_len = packet_len - padding_len - 1;
        let payload = packet.freeze().slice(5..(5 + payload_len));
        let packet = Packet::new(payload, self.packet_seq)?;
        log::trace!("received packet {}, len {}, seq {}", packet.msg_id, payload_len, packet.packet_seq);

        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.byte_count += total_packet_len as u64;
        self.state = State::Ready;
        Ok(Some(packet))
    }

    fn decrypt_packet_len(&mut self) -> Result<Option<u32>> {
        let mut len_data = [0; 4];
        match self.decrypt {
            PacketDecrypt::EncryptAndMac(ref mut decrypt, _) => {
                if self.buf.len() < self.block_len { return Ok(None) }
                decrypt.decrypt(&mut self.buf[..self.block_len]);
                len_data.copy_from_slice(&self.buf[..4]);
            },
            PacketDecrypt::Aead(ref mut aead) => {
                if self.buf.len() < 4 { return Ok(None) }
                aead.decrypt_packet_len(self.packet_seq, &self.buf[..4], &mut len_data);
            },
        }
        Ok(Some(u32::from_be_bytes(len_data)))
    }

    fn decrypt_packet_body(&mut self, packet: &mut [u8], packet_len: usize) -> Result<MacVerified> {
        match self.decrypt {
            PacketDecrypt::EncryptAndMac(ref mut decrypt, ref mut mac) => {
                decrypt.decrypt(&mut packet[self.block_len..(4 + packet_len)]);
                let (plaintext, tag) = packet.split_at(4 + packet_len);
                mac.verify(self.packet_seq, plaintext, tag)
            },
            PacketDecrypt::Aead(ref mut aead) => {
                let (packet, tag) = packet.split_at_mut(4 + packet_len);
                aead.decrypt_and_verify(self.packet_seq, packet, tag)
            },
        }
    }

    /// Installs new decryption state. The sequence number is not reset (RFC 4253, section 6.4).
    pub fn set_decrypt(&mut self, decrypt: PacketDecrypt, block_len: usize, tag_len: usize) {
        self.decrypt = decrypt;
        self.block_len = block_len;
        self.tag_len = tag_len;
        self.byte_count = 0;
    }

    /// Number of bytes received since the last call to [`set_decrypt()`][Self::set_decrypt()].
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    #[cfg(test)]
    pub fn packet_seq(&self) -> u32 {
        self.packet_seq
    }

    #[cfg(test)]
    pub fn set_packet_seq(&mut self, packet_seq: u32) {
        self.packet_seq = packet_seq;
    }
}

fn check_padding_len(packet_len: usize, padding_len: usize) -> Result<()> {
    if padding_len < 4 {
        Err(Error::Protocol("invalid padding length (too short)"))
    } else if packet_len < 1 + padding_len {
        Err(Error::Protocol("invalid packet length (too short for given padding)"))
    } else {
        Ok(())
    }
}
