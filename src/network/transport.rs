//! Frame-level I/O seams between a session and its socket.
//!
//! A session only needs to read one payload at a time and write one framed
//! buffer at a time; TCP streams and WebSocket connections both reduce to
//! that through [`FrameRead`] / [`FrameWrite`].

use crate::error::NetworkError;
use crate::network::packet::Framer;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::OwnedSemaphorePermit;

#[async_trait]
pub trait FrameRead: Send {
    /// Next payload, after the length prefix. Errors end the session.
    async fn read_frame(&mut self) -> Result<Bytes, NetworkError>;
}

#[async_trait]
pub trait FrameWrite: Send {
    /// Writes one already framed buffer.
    async fn write_frame(&mut self, frame: BytesMut) -> Result<(), NetworkError>;

    async fn shutdown(&mut self) -> Result<(), NetworkError>;
}

pub struct StreamFrameReader<R> {
    reader: R,
    framer: Framer,
}

impl<R> StreamFrameReader<R> {
    pub fn new(reader: R, framer: Framer) -> Self {
        Self { reader, framer }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameRead for StreamFrameReader<R> {
    async fn read_frame(&mut self) -> Result<Bytes, NetworkError> {
        Ok(self.framer.read_frame(&mut self.reader).await?)
    }
}

pub struct StreamFrameWriter<W> {
    writer: W,
}

impl<W> StreamFrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameWrite for StreamFrameWriter<W> {
    async fn write_frame(&mut self, frame: BytesMut) -> Result<(), NetworkError> {
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), NetworkError> {
        Ok(self.writer.shutdown().await?)
    }
}

/// An established connection, split for the session's reader and writer
/// tasks.
pub struct Connection {
    pub reader: Box<dyn FrameRead>,
    pub writer: Box<dyn FrameWrite>,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    /// Connection-limit slot of an accepted connection, held until the
    /// session built from it is dropped.
    pub(crate) slot: Option<OwnedSemaphorePermit>,
}

impl Connection {
    /// Wraps any byte stream (a TCP socket, a TLS stream, an in-memory duplex).
    pub fn from_stream<S>(
        stream: S,
        framer: Framer,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
        Self {
            reader: Box::new(StreamFrameReader::new(read, framer)),
            writer: Box::new(StreamFrameWriter::new(write)),
            local_addr,
            remote_addr,
            slot: None,
        }
    }
}
