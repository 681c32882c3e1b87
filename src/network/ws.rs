//! WebSocket listener and dialer, plain or over TLS.
//!
//! Each binary WebSocket message carries exactly one length-prefixed frame,
//! so the framer bounds apply the same way as on a TCP stream. Ping and pong
//! frames are answered by the protocol layer and never reach the session.

use crate::config::Protocol;
use crate::error::NetworkError;
use crate::network::packet::Framer;
use crate::network::service::{Dial, ServiceShared, Upgrade};
use crate::network::tcp::SocketOptions;
use crate::network::transport::{Connection, FrameRead, FrameWrite};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_native_tls::native_tls;
use tokio_native_tls::TlsAcceptor;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

fn ws_config(framer: &Framer) -> WebSocketConfig {
    let limit = framer.header_len() + framer.max_len() as usize;
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(limit);
    config.max_frame_size = Some(limit);
    config
}

pub(crate) struct WsFrameReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    framer: Framer,
}

#[async_trait]
impl<S> FrameRead for WsFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Bytes, NetworkError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(self.framer.decode(Bytes::from(data))?),
                Some(Ok(WsMessage::Close(_))) | None => return Err(NetworkError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

pub(crate) struct WsFrameWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S> FrameWrite for WsFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: BytesMut) -> Result<(), NetworkError> {
        self.sink.send(WsMessage::Binary(frame.to_vec())).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), NetworkError> {
        self.sink.close().await?;
        Ok(())
    }
}

fn ws_connection<S>(
    ws: WebSocketStream<S>,
    framer: Framer,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();
    Connection {
        reader: Box::new(WsFrameReader { stream, framer }),
        writer: Box::new(WsFrameWriter { sink }),
        local_addr,
        remote_addr,
        slot: None,
    }
}

async fn within<T, F>(limit: Duration, fut: F) -> Result<T, NetworkError>
where
    F: std::future::Future<Output = Result<T, NetworkError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NetworkError::Timeout(limit))?
}

/// Loads a PEM certificate chain and PKCS#8 key.
fn tls_acceptor(cert_file: &str, key_file: &str) -> Result<TlsAcceptor, NetworkError> {
    let cert = std::fs::read(cert_file)?;
    let key = std::fs::read(key_file)?;
    let identity = native_tls::Identity::from_pkcs8(&cert, &key)?;
    let acceptor = native_tls::TlsAcceptor::new(identity)?;
    Ok(TlsAcceptor::from(acceptor))
}

pub(crate) struct WsUpgrade {
    framer: Framer,
    options: SocketOptions,
    handshake_timeout: Duration,
    tls: Option<TlsAcceptor>,
}

impl WsUpgrade {
    pub(crate) fn new(shared: &ServiceShared) -> Result<Self, NetworkError> {
        let config = shared.config();
        let tls = match config.protocol {
            Protocol::Wss => Some(tls_acceptor(&config.cert_file, &config.key_file)?),
            _ => None,
        };
        Ok(Self {
            framer: shared.framer(),
            options: SocketOptions::from_config(config),
            handshake_timeout: config.http_timeout,
            tls,
        })
    }
}

#[async_trait]
impl Upgrade for WsUpgrade {
    async fn upgrade(&self, stream: TcpStream, remote: SocketAddr) -> Result<Connection, NetworkError> {
        self.options.apply(&stream)?;
        let local = stream.local_addr().ok();
        let config = ws_config(&self.framer);
        within(self.handshake_timeout, async {
            match &self.tls {
                Some(tls) => {
                    let stream = tls.accept(stream).await?;
                    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
                    Ok::<_, NetworkError>(ws_connection(ws, self.framer, local, Some(remote)))
                }
                None => {
                    let ws = tokio_tungstenite::accept_async_with_config(stream, Some(config)).await?;
                    Ok::<_, NetworkError>(ws_connection(ws, self.framer, local, Some(remote)))
                }
            }
        })
        .await
    }
}

pub(crate) struct WsDial {
    url: String,
    framer: Framer,
    options: SocketOptions,
    handshake_timeout: Duration,
}

impl WsDial {
    pub(crate) fn new(shared: &ServiceShared) -> Self {
        let config = shared.config();
        Self {
            url: config.url(),
            framer: shared.framer(),
            options: SocketOptions::from_config(config),
            handshake_timeout: config.http_timeout,
        }
    }
}

fn plain_tcp(stream: &MaybeTlsStream<TcpStream>) -> Option<&TcpStream> {
    match stream {
        MaybeTlsStream::Plain(tcp) => Some(tcp),
        _ => None,
    }
}

#[async_trait]
impl Dial for WsDial {
    async fn dial(&self) -> Result<Connection, NetworkError> {
        let config = ws_config(&self.framer);
        let (ws, _response) = within(self.handshake_timeout, async {
            Ok::<_, NetworkError>(
                tokio_tungstenite::connect_async_with_config(self.url.as_str(), Some(config), false).await?,
            )
        })
        .await?;

        let (mut local, mut remote) = (None, None);
        if let Some(tcp) = plain_tcp(ws.get_ref()) {
            self.options.apply(tcp)?;
            local = tcp.local_addr().ok();
            remote = tcp.peer_addr().ok();
        }
        Ok(ws_connection(ws, self.framer, local, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Endian;

    #[test]
    fn message_limit_follows_the_framer() {
        let config = ws_config(&Framer::new(2, 1, 1024, Endian::Little));
        assert_eq!(config.max_message_size, Some(1026));
    }

    #[tokio::test]
    async fn frames_cross_a_websocket() {
        let framer = Framer::default();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut conn = ws_connection(ws, framer, None, None);
            let payload = conn.reader.read_frame().await.unwrap();
            conn.writer.write_frame(framer.frame(&payload).unwrap()).await.unwrap();
            conn
        });

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/")).await.unwrap();
        let mut client = ws_connection(ws, framer, None, None);
        client.writer.write_frame(framer.frame(b"ping").unwrap()).await.unwrap();
        assert_eq!(&client.reader.read_frame().await.unwrap()[..], b"ping");

        client.writer.shutdown().await.unwrap();
        let mut server = server.await.unwrap();
        assert!(matches!(
            server.reader.read_frame().await,
            Err(NetworkError::ConnectionClosed)
        ));
    }
}
