use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;
use crate::cipher::PacketEncrypt;
use crate::codec::SendPipe;
use crate::codes::msg;
use crate::error::{Result, Error};

/// Handle to the single send path of the connection.
///
/// All packets are funneled through one writer task that owns the [`SendPipe`], so the sequence
/// numbers and the active cipher are always consistent with the order of the packets on the wire.
#[derive(Clone)]
pub(super) struct Transport {
    cmd_tx: mpsc::UnboundedSender<SendCmd>,
    sent_bytes: Arc<AtomicU64>,
}

pub(super) struct TransportWriter {
    cmd_rx: mpsc::UnboundedReceiver<SendCmd>,
    sent_bytes: Arc<AtomicU64>,
    pipe: SendPipe,
    ident: Bytes,
}

/// New keys for the client-to-server direction.
pub(super) struct SendKeys {
    pub encrypt: PacketEncrypt,
    pub block_len: usize,
    pub tag_len: usize,
}

enum SendCmd {
    Packet(Bytes),
    KexInit(Bytes),
    NewKeys(SendKeys),
    Close,
}

pub(super) fn new_transport(pipe: SendPipe, ident: Bytes) -> (Transport, TransportWriter) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let sent_bytes = Arc::new(AtomicU64::new(0));
    let transport = Transport { cmd_tx, sent_bytes: sent_bytes.clone() };
    let writer = TransportWriter { cmd_rx, sent_bytes, pipe, ident };
    (transport, writer)
}

impl Transport {
    /// Enqueues a packet with the given payload.
    ///
    /// Packets that are not allowed during a key exchange are held back until the exchange is
    /// finished.
    pub fn send(&self, payload: Bytes) -> Result<()> {
        self.send_cmd(SendCmd::Packet(payload))
    }

    /// Enqueues our `SSH_MSG_KEXINIT`, which starts holding back connection-layer packets.
    pub fn send_kex_init(&self, payload: Bytes) -> Result<()> {
        self.send_cmd(SendCmd::KexInit(payload))
    }

    /// Enqueues `SSH_MSG_NEWKEYS`, the following packets are sent with `keys`.
    pub fn send_new_keys(&self, keys: SendKeys) -> Result<()> {
        self.send_cmd(SendCmd::NewKeys(keys))
    }

    /// Asks the writer to flush all enqueued packets and shut down the stream.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(SendCmd::Close);
    }

    /// Number of bytes sent since the last change of keys.
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes.load(Ordering::Relaxed)
    }

    fn send_cmd(&self, cmd: SendCmd) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| Error::ConnectionClosed)
    }
}

impl TransportWriter {
    /// Runs the writer until it is closed with [`Transport::close()`] or until all [`Transport`]
    /// handles are dropped.
    pub async fn run<W: AsyncWrite + Unpin>(mut self, mut stream: W) -> Result<()> {
        self.pipe.feed_ident(&self.ident);
        log::debug!("sending ident {:?}", String::from_utf8_lossy(&self.ident));
        write_pipe(&mut self.pipe, &mut stream).await?;

        let mut in_kex = false;
        let mut held_back = VecDeque::new();
        while let Some(cmd) = self.cmd_rx.recv().await {
            let mut cmd = Some(cmd);
            // batch all commands that are ready before we touch the stream
            while let Some(next) = cmd.take() {
                match next {
                    SendCmd::Packet(payload) => {
                        let msg_id = payload.first().copied().unwrap_or(0);
                        if in_kex && !msg::is_kex_safe(msg_id) {
                            log::trace!("holding back packet {} until the key exchange is done", msg_id);
                            held_back.push_back(payload);
                        } else {
                            self.pipe.feed_packet(&payload)?;
                        }
                    },
                    SendCmd::KexInit(payload) => {
                        self.pipe.feed_packet(&payload)?;
                        in_kex = true;
                    },
                    SendCmd::NewKeys(keys) => {
                        self.pipe.feed_packet(&[msg::NEWKEYS])?;
                        self.pipe.set_encrypt(keys.encrypt, keys.block_len, keys.tag_len);
                        log::debug!("sent SSH_MSG_NEWKEYS and applied new keys");
                        in_kex = false;
                        for payload in held_back.drain(..) {
                            self.pipe.feed_packet(&payload)?;
                        }
                    },
                    SendCmd::Close => {
                        write_pipe(&mut self.pipe, &mut stream).await?;
                        stream.shutdown().await.map_err(Error::WriteIo)?;
                        log::debug!("transport closed");
                        return Ok(())
                    },
                }
                cmd = self.cmd_rx.try_recv().ok();
            }

            self.sent_bytes.store(self.pipe.byte_count(), Ordering::Relaxed);
            write_pipe(&mut self.pipe, &mut stream).await?;
        }
        Ok(())
    }
}

async fn write_pipe<W: AsyncWrite + Unpin>(pipe: &mut SendPipe, stream: &mut W) -> Result<()> {
    while !pipe.is_empty() {
        let written = stream.write(pipe.peek_bytes()).await.map_err(Error::WriteIo)?;
        if written == 0 {
            let err = std::io::Error::new(std::io::ErrorKind::WriteZero, "stream accepted no bytes");
            return Err(Error::WriteIo(err))
        }
        pipe.consume_bytes(written);
    }
    stream.flush().await.map_err(Error::WriteIo)
}
