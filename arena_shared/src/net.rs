//! Framed text transport.
//!
//! One TCP stream per client. Each frame is a big-endian `u32` length
//! followed by that many bytes of UTF-8 text (a protocol envelope).
//!
//! The stream can be split into a `FrameReader` and a `FrameWriter` so a
//! connection can receive and send from different tasks.

use std::net::SocketAddr;

use anyhow::{bail, Context};
use bytes::{Buf, BufMut, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    time,
};

/// Upper bound on any frame body. Large enough for a full world snapshot.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Upper bound the server applies to frames it reads from clients.
pub const MAX_REQUEST_FRAME_LEN: usize = 64 * 1024;

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, text: &str) -> anyhow::Result<()> {
    if text.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds limit {}", text.len(), MAX_FRAME_LEN);
    }
    let mut buf = BytesMut::with_capacity(4 + text.len());
    buf.put_u32(text.len() as u32);
    buf.extend_from_slice(text.as_bytes());
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one frame of at most `max_len` bytes into `buf`. `Ok(None)` means
/// the peer closed the stream cleanly between frames.
///
/// Cancel-safe: partial input stays in `buf` for the next call.
async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut BytesMut,
    max_len: usize,
) -> anyhow::Result<Option<String>> {
    loop {
        if buf.len() >= 4 {
            let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            if len > max_len {
                bail!("frame of {len} bytes exceeds limit {max_len}");
            }
            if buf.len() >= 4 + len {
                buf.advance(4);
                let payload = buf.split_to(len);
                let text = String::from_utf8(payload.to_vec()).context("frame is not utf-8")?;
                return Ok(Some(text));
            }
        }
        let n = r.read_buf(buf).await.context("tcp read")?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            bail!("connection closed mid-frame");
        }
    }
}

/// Bidirectional framed connection.
#[derive(Debug)]
pub struct FrameConn {
    stream: TcpStream,
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameConn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Lowers the limit on inbound frames. Outbound frames keep
    /// `MAX_FRAME_LEN`.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len.min(MAX_FRAME_LEN);
        self
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        write_frame(&mut self.stream, text).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Option<String>> {
        read_frame(&mut self.stream, &mut self.buf, self.max_frame_len).await
    }

    /// Receives a frame within the given timeout. `Ok(None)` on timeout or
    /// clean close. A frame cut by the timeout is completed on the next call.
    pub async fn recv_timeout(
        &mut self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<String>> {
        let read = read_frame(&mut self.stream, &mut self.buf, self.max_frame_len);
        match time::timeout(timeout, read).await {
            Ok(res) => res,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (r, w) = self.stream.into_split();
        (
            FrameReader {
                inner: r,
                buf: self.buf,
                max_frame_len: self.max_frame_len,
            },
            FrameWriter { inner: w },
        )
    }
}

/// Receiving half of a `FrameConn`.
#[derive(Debug)]
pub struct FrameReader {
    inner: OwnedReadHalf,
    buf: BytesMut,
    max_frame_len: usize,
}

impl FrameReader {
    /// Cancel-safe.
    pub async fn recv(&mut self) -> anyhow::Result<Option<String>> {
        read_frame(&mut self.inner, &mut self.buf, self.max_frame_len).await
    }
}

/// Sending half of a `FrameConn`.
#[derive(Debug)]
pub struct FrameWriter {
    inner: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send(&mut self, text: &str) -> anyhow::Result<()> {
        write_frame(&mut self.inner, text).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.inner.shutdown().await.context("tcp shutdown")
    }
}

/// TCP server listener.
pub struct FrameListener {
    listener: TcpListener,
}

impl FrameListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(FrameConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok((FrameConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
