use bytes::{Buf as _, BufMut as _, BytesMut};
use rand::{RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use crate::{Error, Result};
use crate::cipher::{self, PacketEncrypt};
use crate::mac;
use crate::util::CryptoRngCore;

/// Outgoing half of the packet codec.
///
/// Packets are appended to a single reusable buffer, from which the writer takes the bytes that
/// should be written to the stream.
pub(crate) struct SendPipe {
    buf: BytesMut,
    encrypt: PacketEncrypt,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    byte_count: u64,
    padding_rng: ChaCha8Rng,
}

impl SendPipe {
    pub fn new(rng: &mut dyn CryptoRngCore) -> Result<SendPipe> {
        let padding_rng = ChaCha8Rng::from_rng(rng.as_rngcore())
            .map_err(|_| Error::Random("could not generate seed for padding generator"))?;
        Ok(SendPipe {
            buf: BytesMut::new(),
            encrypt: PacketEncrypt::EncryptAndMac(Box::new(cipher::Identity), Box::new(mac::Empty)),
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            byte_count: 0,
            padding_rng,
        })
    }

    pub fn feed_ident(&mut self, ident: &[u8]) {
        // RFC 4253, section 4.2
        self.buf.reserve(ident.len() + 2);
        self.buf.put_slice(ident);
        self.buf.put_slice(&b"\r\n"[..]);
    }

    /// Frames, pads, authenticates and encrypts a packet with the given payload. Returns the
    /// sequence number of the packet.
    pub fn feed_packet(&mut self, payload: &[u8]) -> Result<u32> {
        log::trace!("feed packet {}, len {}, seq {}",
            payload.first().cloned().unwrap_or(0), payload.len(), self.packet_seq);

        let padding_len = calculate_padding_len(payload.len(), self.block_len, self.encrypt.is_aead());

        // RFC 4253, section 6
        //
        // packet layout:
        // 4 bytes: `packet_len = 1 + payload_len + padding_len` (u32 big endian)
        // 1 byte: padding_len (u8)
        // `payload_len` bytes: payload
        // `padding_len` bytes: random padding
        // `tag_len` bytes: mac tag

        let packet_begin = self.buf.len();
        let total_len = 5 + payload.len() + padding_len + self.tag_len;
        self.buf.reserve(total_len);
        self.buf.put_u32((1 + payload.len() + padding_len) as u32);
        self.buf.put_u8(padding_len as u8);
        self.buf.put_slice(payload);
        self.buf.put_bytes(0, padding_len + self.tag_len);

        let packet = &mut self.buf[packet_begin..];
        self.padding_rng.fill_bytes(&mut packet[5 + payload.len()..][..padding_len]);

        let (plaintext, tag) = packet.split_at_mut(5 + payload.len() + padding_len);
        match self.encrypt {
            PacketEncrypt::EncryptAndMac(ref mut encrypt, ref mut mac) => {
                mac.sign(self.packet_seq, plaintext, tag);
                encrypt.encrypt(plaintext);
            },
            PacketEncrypt::Aead(ref mut aead) => {
                aead.encrypt_and_sign(self.packet_seq, plaintext, tag)?;
            },
        }

        let packet_seq = self.packet_seq;
        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.byte_count += total_len as u64;
        Ok(packet_seq)
    }

    /// Installs new encryption state. The sequence number is not reset (RFC 4253, section 6.4).
    pub fn set_encrypt(&mut self, encrypt: PacketEncrypt, block_len: usize, tag_len: usize) {
        self.encrypt = encrypt;
        self.block_len = block_len;
        self.tag_len = tag_len;
        self.byte_count = 0;
    }

    pub fn peek_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn consume_bytes(&mut self, len: usize) {
        self.buf.advance(len);
    }

    /// Number of bytes sent since the last call to [`set_encrypt()`][Self::set_encrypt()].
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

fn calculate_padding_len(payload_len: usize, block_len: usize, is_aead: bool) -> usize {
    // RFC 4253, section 6
    let header_len = if is_aead { 1 } else { 5 };
    let min_padded_len = header_len + payload_len + 4;
    let padded_len = (min_padded_len + block_len - 1) / block_len * block_len;
    padded_len - payload_len - header_len
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rand::SeedableRng as _;
    use rand_chacha::ChaCha8Rng;
    use crate::cipher::{CipherAlgo, CipherAlgoVariant, PacketDecrypt};
    use crate::codec::{PacketEncode, RecvPipe};
    use crate::mac::MacAlgo;
    use super::*;

    #[test]
    fn test_is_send() {
        fn assert_is_send<T: Send>() {}
        assert_is_send::<SendPipe>()
    }

    fn make_pipe() -> SendPipe {
        SendPipe::new(&mut ChaCha8Rng::seed_from_u64(42)).unwrap()
    }

    #[test]
    fn test_calculate_padding_len() {
        for &block_len in &[8, 16, 32] {
            for payload_len in 0..100 {
                let padding_len = calculate_padding_len(payload_len, block_len, false);
                assert_eq!((5 + payload_len + padding_len) % block_len, 0);
                assert!((4..=block_len + 3).contains(&padding_len));

                let padding_len = calculate_padding_len(payload_len, block_len, true);
                assert_eq!((1 + payload_len + padding_len) % block_len, 0);
                assert!((4..=block_len + 3).contains(&padding_len));
            }
        }
    }

    #[test]
    fn test_ignore_frame_without_cipher() {
        let mut payload = PacketEncode::with_msg(2);
        payload.put_str("A");
        let payload = payload.finish();
        assert_eq!(payload.len(), 6);

        let mut pipe = make_pipe();
        assert_eq!(pipe.feed_packet(&payload).unwrap(), 0);
        let frame = pipe.peek_bytes().to_vec();
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..4], &[0, 0, 0, 12]);
        assert_eq!(frame[4], 5);
        assert_eq!(&frame[5..11], payload.as_ref());

        let mut recv = RecvPipe::new();
        recv.feed_buf().extend_from_slice(&frame);
        let packet = recv.consume_packet().unwrap().unwrap();
        assert_eq!(packet.msg_id, 2);
        assert_eq!(packet.payload, payload);
        assert!(recv.consume_packet().unwrap().is_none());
    }

    #[test]
    fn test_packet_seq_counts_frames() {
        let mut pipe = make_pipe();
        for i in 0..10 {
            assert_eq!(pipe.feed_packet(&[2, 0, 0, 0, 0]).unwrap(), i);
        }
        assert_eq!(pipe.packet_seq(), 10);

        pipe.set_packet_seq(u32::MAX);
        assert_eq!(pipe.feed_packet(&[2, 0, 0, 0, 0]).unwrap(), u32::MAX);
        assert_eq!(pipe.packet_seq(), 0);
    }

    fn make_ciphers(
        cipher: &CipherAlgo,
        mac: &MacAlgo,
        key_seed: u8,
    ) -> (PacketEncrypt, PacketDecrypt, usize) {
        let key: Vec<u8> = (0..cipher.key_len).map(|i| i as u8 ^ key_seed).collect();
        let iv: Vec<u8> = (0..cipher.iv_len).map(|i| (i as u8).wrapping_mul(7)).collect();
        let mac_key: Vec<u8> = (0..mac.key_len).map(|i| i as u8 ^ 0x5a).collect();
        match cipher.variant {
            CipherAlgoVariant::Standard(ref algo) => (
                PacketEncrypt::EncryptAndMac((algo.make_encrypt)(&key, &iv), (mac.make_mac)(&mac_key)),
                PacketDecrypt::EncryptAndMac((algo.make_decrypt)(&key, &iv), (mac.make_mac)(&mac_key)),
                mac.tag_len,
            ),
            CipherAlgoVariant::Aead(ref algo) => (
                PacketEncrypt::Aead((algo.make_encrypt)(&key, &iv)),
                PacketDecrypt::Aead((algo.make_decrypt)(&key, &iv)),
                algo.tag_len,
            ),
        }
    }

    #[test]
    fn test_roundtrip_with_ciphers() {
        let ciphers = [
            &cipher::NONE, &cipher::AES128_CTR, &cipher::AES256_CTR, &cipher::AES128_CBC,
            &cipher::AES128_GCM, &cipher::AES256_GCM, &cipher::CHACHA20_POLY1305,
        ];
        let macs = [&mac::NONE, &mac::HMAC_SHA1, &mac::HMAC_SHA2_256, &mac::HMAC_SHA2_512];

        for cipher in ciphers.iter() {
            for mac in macs.iter() {
                if cipher.is_aead() && mac.name != "none" {
                    continue
                }

                let (encrypt, decrypt, tag_len) = make_ciphers(cipher, mac, 0x33);
                let mut send = make_pipe();
                let mut recv = RecvPipe::new();
                send.set_encrypt(encrypt, cipher.block_len, tag_len);
                recv.set_decrypt(decrypt, cipher.block_len, tag_len);

                let payloads: Vec<Bytes> = (0..40usize)
                    .map(|len| (0..len + 1).map(|i| (i * 13 + len) as u8).collect::<Vec<u8>>().into())
                    .collect();
                for payload in payloads.iter() {
                    send.feed_packet(payload).unwrap();
                }

                let wire = send.peek_bytes().to_vec();
                for chunk in wire.chunks(7) {
                    recv.feed_buf().extend_from_slice(chunk);
                }
                for (i, payload) in payloads.iter().enumerate() {
                    let packet = recv.consume_packet().unwrap()
                        .unwrap_or_else(|| panic!("{} + {}: missing packet", cipher.name, mac.name));
                    assert_eq!(packet.payload, payload, "{} + {}", cipher.name, mac.name);
                    assert_eq!(packet.packet_seq, i as u32);
                }
                assert!(recv.consume_packet().unwrap().is_none());
                assert_eq!(recv.byte_count(), send.byte_count());
            }
        }
    }

    #[test]
    fn test_tampered_frame_is_rejected() {
        for cipher in [&cipher::AES128_CTR, &cipher::AES128_GCM, &cipher::CHACHA20_POLY1305] {
            let mac = if cipher.is_aead() { &mac::NONE } else { &mac::HMAC_SHA2_256 };
            let (encrypt, decrypt, tag_len) = make_ciphers(cipher, mac, 0x11);
            let mut send = make_pipe();
            let mut recv = RecvPipe::new();
            send.set_encrypt(encrypt, cipher.block_len, tag_len);
            recv.set_decrypt(decrypt, cipher.block_len, tag_len);

            send.feed_packet(b"\x02\x00\x00\x00\x05hello").unwrap();
            let mut wire = send.peek_bytes().to_vec();
            let last = wire.len() - tag_len - 1;
            wire[last] ^= 1;
            recv.feed_buf().extend_from_slice(&wire);
            assert!(matches!(recv.consume_packet(), Err(Error::Mac)), "{}", cipher.name);
        }
    }
}
