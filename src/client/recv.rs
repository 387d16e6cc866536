use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt as _};
use crate::codec::Packet;
use crate::error::{Error, Result};
use super::conn::{self, Conn};

const READ_CHUNK_LEN: usize = 16 * 1024;

/// The single receive path of the connection.
///
/// Reads the identification of the server and then decodes packets one by one, offering each
/// packet to the interceptors and then to [`conn::dispatch()`]. A packet is fully handled before
/// the next one is decoded, so that the receive keys are always swapped at the right place in the
/// stream.
pub(super) async fn run_reader<R: AsyncRead + Unpin>(conn: &Arc<Conn>, mut stream: R) -> Result<()> {
    let mut read_buf = BytesMut::with_capacity(READ_CHUNK_LEN);

    let their_ident = loop {
        let ident = conn.recv_pipe.lock().consume_ident()?;
        match ident {
            Some(ident) => break ident,
            None => read_more(conn, &mut stream, &mut read_buf).await?,
        }
    };
    check_ident(&their_ident)?;
    log::debug!("received ident {:?}", String::from_utf8_lossy(&their_ident));
    let _ = conn.their_ident.set(their_ident);
    conn.kex.request();

    loop {
        let packet = conn.recv_pipe.lock().consume_packet()?;
        match packet {
            Some(packet) => recv_packet(conn, packet).await?,
            None => read_more(conn, &mut stream, &mut read_buf).await?,
        }
    }
}

async fn read_more<R: AsyncRead + Unpin>(conn: &Conn, stream: &mut R, read_buf: &mut BytesMut) -> Result<()> {
    read_buf.clear();
    read_buf.reserve(READ_CHUNK_LEN);
    let read_len = stream.read_buf(read_buf).await.map_err(Error::ReadIo)?;
    if read_len == 0 {
        return Err(Error::PeerClosed)
    }
    log::trace!("read {} bytes", read_len);
    conn.recv_pipe.lock().feed_buf().extend_from_slice(read_buf);
    Ok(())
}

async fn recv_packet(conn: &Arc<Conn>, packet: Packet) -> Result<()> {
    log::trace!("received packet {}, seq {}", packet.msg_id, packet.packet_seq);
    if !conn.interceptors.offer(&packet).await? {
        conn::dispatch(conn, packet).await?;
    }

    let recv_bytes = conn.recv_pipe.lock().byte_count();
    conn.kex.check_rekey_bytes(recv_bytes, conn.transport.sent_bytes(), &conn.config);
    Ok(())
}

// RFC 4253, section 4.2 and section 5.1 for "1.99"
fn check_ident(ident: &Bytes) -> Result<()> {
    if ident.starts_with(b"SSH-2.0-") || ident.starts_with(b"SSH-1.99-") {
        Ok(())
    } else {
        Err(Error::Protocol("server does not support SSH protocol version 2.0"))
    }
}
