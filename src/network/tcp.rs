//! TCP listener and dialer.

use crate::config::{ServerKey, ServiceConfig};
use crate::error::NetworkError;
use crate::network::packet::Framer;
use crate::network::service::{Dial, ServiceShared, Upgrade};
use crate::network::transport::Connection;
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

const FIRST_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Accept retry delay: 5 ms, doubling, capped at 1 s.
pub(crate) fn next_backoff(prev: Duration) -> Duration {
    if prev.is_zero() {
        FIRST_BACKOFF
    } else {
        (prev * 2).min(MAX_BACKOFF)
    }
}

/// Binds synchronously so an address in use fails [`Service::start`](crate::network::Service::start).
pub(crate) fn bind(addr: &str) -> Result<TcpListener, NetworkError> {
    let listen_err = |source| NetworkError::Listen {
        addr: addr.to_owned(),
        source,
    };
    let listener = std::net::TcpListener::bind(addr).map_err(listen_err)?;
    listener.set_nonblocking(true).map_err(listen_err)?;
    TcpListener::from_std(listener).map_err(listen_err)
}

/// Per-connection socket settings from a service config.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SocketOptions {
    linger: Duration,
    keep_alive: bool,
    keep_alive_period: Duration,
    read_buffer: usize,
    write_buffer: usize,
}

impl SocketOptions {
    pub(crate) fn from_config(config: &ServiceConfig) -> Self {
        Self {
            linger: config.linger,
            keep_alive: config.keep_alive,
            keep_alive_period: config.keep_alive_period,
            read_buffer: config.read_buffer_size,
            write_buffer: config.write_buffer_size,
        }
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        let socket = SockRef::from(stream);
        if !self.linger.is_zero() {
            socket.set_linger(Some(self.linger))?;
        }
        socket.set_keepalive(self.keep_alive)?;
        if self.keep_alive && !self.keep_alive_period.is_zero() {
            socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(self.keep_alive_period))?;
        }
        if self.read_buffer > 0 {
            socket.set_recv_buffer_size(self.read_buffer)?;
        }
        if self.write_buffer > 0 {
            socket.set_send_buffer_size(self.write_buffer)?;
        }
        Ok(())
    }
}

/// Accepts until `shutdown`; `stopped` fires when the loop exits.
///
/// Each accepted socket takes one of `slots` before its handshake starts and
/// keeps it inside the [`Connection`]. Sockets arriving with no slot left are
/// closed at once.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    upgrade: Arc<dyn Upgrade>,
    slots: Arc<Semaphore>,
    conns: mpsc::Sender<Connection>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    key: ServerKey,
) {
    let _stopped = stopped.drop_guard();
    let mut backoff = Duration::ZERO;
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote) = match accepted {
            Ok(pair) => {
                backoff = Duration::ZERO;
                pair
            }
            Err(err) => {
                backoff = next_backoff(backoff);
                warn!(service = %key, error = %err, retry_in = ?backoff, "Accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }
        };
        let Ok(slot) = Arc::clone(&slots).try_acquire_owned() else {
            warn!(service = %key, %remote, "Too many connections");
            drop(stream);
            continue;
        };
        trace!(service = %key, %remote, "Connection accepted");

        let upgrade = Arc::clone(&upgrade);
        let conns = conns.clone();
        tokio::spawn(async move {
            match upgrade.upgrade(stream, remote).await {
                Ok(mut conn) => {
                    conn.slot = Some(slot);
                    if conns.try_send(conn).is_err() {
                        warn!(service = %key, %remote, "Connection queue full");
                    }
                }
                Err(err) => warn!(service = %key, %remote, error = %err, "Connection setup failed"),
            }
        });
    }
    trace!(service = %key, "Accept loop stopped");
}

pub(crate) struct TcpUpgrade {
    framer: Framer,
    options: SocketOptions,
}

impl TcpUpgrade {
    pub(crate) fn new(shared: &ServiceShared) -> Self {
        Self {
            framer: shared.framer(),
            options: SocketOptions::from_config(shared.config()),
        }
    }
}

#[async_trait]
impl Upgrade for TcpUpgrade {
    async fn upgrade(&self, stream: TcpStream, remote: SocketAddr) -> Result<Connection, NetworkError> {
        self.options.apply(&stream)?;
        let local = stream.local_addr().ok();
        Ok(Connection::from_stream(stream, self.framer, local, Some(remote)))
    }
}

pub(crate) struct TcpDial {
    addr: String,
    framer: Framer,
    options: SocketOptions,
}

impl TcpDial {
    pub(crate) fn new(shared: &ServiceShared) -> Self {
        Self {
            addr: shared.config().addr(),
            framer: shared.framer(),
            options: SocketOptions::from_config(shared.config()),
        }
    }
}

#[async_trait]
impl Dial for TcpDial {
    async fn dial(&self) -> Result<Connection, NetworkError> {
        let stream = TcpStream::connect(&self.addr).await?;
        self.options.apply(&stream)?;
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Ok(Connection::from_stream(stream, self.framer, local, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_one_second() {
        let mut delay = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..10 {
            delay = next_backoff(delay);
            seen.push(delay.as_millis());
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let first = bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(bind(&addr), Err(NetworkError::Listen { .. })));
    }

    #[tokio::test]
    async fn socket_options_apply_to_live_sockets() {
        let listener = bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let options = SocketOptions {
            linger: Duration::from_secs(1),
            keep_alive: true,
            keep_alive_period: Duration::from_secs(30),
            read_buffer: 64 * 1024,
            write_buffer: 64 * 1024,
        };
        options.apply(&client).unwrap();
        assert!(SockRef::from(&client).keepalive().unwrap());
    }
}
