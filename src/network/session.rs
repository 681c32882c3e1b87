//! # Sessions
//!
//! One [`Session`] per live connection. The session value itself belongs to
//! the service that accepted or dialed it and is only touched on the network
//! module's task. Two background tasks move bytes:
//!
//! ```text
//!              send_tx (max_send)                 recv_tx (max_recv)
//! Session::send ──────────────▶ writer task    reader task ──────────────▶ Session::dispatch
//!                                   │               ▲
//!                                   ▼               │
//!                               FrameWrite      FrameRead
//! ```
//!
//! * `send` never blocks. A full outbound queue closes the session.
//! * Either task failing cancels the session's close token, which stops the
//!   other one. The reader reports [`SessionEvent::Closed`] to the service
//!   when it exits.
//! * `dispatch` handles at most `max_recv` queued payloads per call.

use crate::codec::Message;
use crate::config::{ServerKey, SessionKey};
use crate::error::NetworkError;
use crate::network::context::Context;
use crate::network::filter::Opportunity;
use crate::network::packet::Framer;
use crate::network::service::ServiceShared;
use crate::network::transport::{Connection, FrameRead, FrameWrite};
use bytes::{Bytes, BytesMut};
use cube_actor::guard;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Reports from a session's background tasks to its service.
#[derive(Debug)]
pub enum SessionEvent {
    /// A frame carrying `msg` reached the socket. Only produced when the
    /// service has `AfterSend` hooks.
    Sent {
        session: u32,
        msg_id: u16,
        msg: Box<dyn Message>,
    },
    /// The reader task has exited; the session is gone.
    Closed(u32),
}

struct SendPack {
    frame: BytesMut,
    msg_id: u16,
    msg: Option<Box<dyn Message>>,
}

pub struct Session {
    id: u32,
    key: SessionKey,
    service: Arc<ServiceShared>,
    send_tx: mpsc::Sender<Option<SendPack>>,
    recv_rx: mpsc::Receiver<Bytes>,
    close: CancellationToken,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    keys: HashMap<String, Box<dyn Any + Send>>,
    user_data: Option<Box<dyn Any + Send>>,
    _slot: Option<OwnedSemaphorePermit>,
}

impl Session {
    /// Wraps `conn` and spawns its reader and writer tasks.
    pub fn new(
        id: u32,
        service: Arc<ServiceShared>,
        conn: Connection,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let config = service.config();
        let (send_tx, send_rx) = mpsc::channel(config.max_send.max(1));
        let (recv_tx, recv_rx) = mpsc::channel(config.max_recv.max(1));
        let close = CancellationToken::new();
        let key = SessionKey::new(service.key(), id);

        tokio::spawn(read_loop(
            conn.reader,
            recv_tx,
            close.clone(),
            config.read_timeout,
            key,
            events.clone(),
        ));
        tokio::spawn(write_loop(
            conn.writer,
            send_rx,
            service.framer(),
            close.clone(),
            config.write_timeout,
            key,
            events,
        ));
        trace!(session = %key, remote = ?conn.remote_addr, "Session opened");

        Self {
            id,
            key,
            service,
            send_tx,
            recv_rx,
            close,
            local_addr: conn.local_addr,
            remote_addr: conn.remote_addr,
            keys: HashMap::new(),
            user_data: None,
            _slot: conn.slot,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn server_key(&self) -> ServerKey {
        self.service.key()
    }

    /// True for sessions opened by a client service.
    pub fn is_client(&self) -> bool {
        self.service.config().is_client
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Queues `msg` for sending under `msg_id`.
    ///
    /// A `BeforeSend` filter veto drops the message and still returns `Ok`.
    /// When the outbound queue is full the session is closed and
    /// [`NetworkError::SendQueueFull`] returned.
    pub fn send(&mut self, msg_id: u16, msg: impl Message) -> Result<(), NetworkError> {
        self.send_boxed(msg_id, Box::new(msg))
    }

    pub fn send_boxed(&mut self, msg_id: u16, msg: Box<dyn Message>) -> Result<(), NetworkError> {
        if self.is_closed() {
            trace!(session = %self.key, msg_id, "Send on closed session");
            return Err(NetworkError::SessionClosed);
        }
        let service = Arc::clone(&self.service);

        let (msg_id, msg) = {
            let mut ctx = Context::with_message(self, msg_id, msg);
            if !service.pipeline().fire(Opportunity::BeforeSend, &mut ctx) {
                return Ok(());
            }
            (ctx.msg_id, ctx.msg)
        };
        let Some(msg) = msg else {
            return Ok(());
        };

        let frame = service.parser().marshal(msg_id, msg.as_ref()).inspect_err(|err| {
            error!(session = %self.key, msg_id, error = %err, "Marshal failed");
        })?;
        let msg = service.pipeline().has(Opportunity::AfterSend).then_some(msg);

        match self.send_tx.try_send(Some(SendPack { frame, msg_id, msg })) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                error!(session = %self.key, msg_id, "Send queue full, closing session");
                self.close();
                Err(NetworkError::SendQueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(NetworkError::SessionClosed),
        }
    }

    /// Handles queued inbound payloads, at most `max_recv` of them. Returns
    /// how many were taken off the queue.
    pub fn dispatch(&mut self) -> usize {
        let service = Arc::clone(&self.service);
        let limit = service.config().max_recv;
        let mut handled = 0;
        while handled < limit {
            let Ok(payload) = self.recv_rx.try_recv() else {
                break;
            };
            handled += 1;
            self.handle_payload(&service, payload);
        }
        handled
    }

    fn handle_payload(&mut self, service: &ServiceShared, payload: Bytes) {
        let (msg_id, msg) = match service.parser().unmarshal(&payload, service.handlers()) {
            Ok(decoded) => decoded,
            Err(NetworkError::UnregisteredMsgId { msg_id }) => {
                trace!(session = %self.key, msg_id, "Unregistered message");
                let mut ctx = Context::with_packet(self, msg_id, payload);
                service.pipeline().fire(Opportunity::ErrorMsgId, &mut ctx);
                return;
            }
            Err(err) => {
                error!(session = %self.key, error = %err, "Message dropped");
                return;
            }
        };

        let Some(handler) = service.handlers().handler(msg_id) else {
            return;
        };
        let key = self.key;
        let mut ctx = Context::with_message(self, msg_id, msg);
        if !service.pipeline().fire(Opportunity::BeforeReceived, &mut ctx) {
            return;
        }
        guard("handler", format_args!("{key} msg {msg_id}"), || {
            handler.process(&mut ctx)
        });
        service.pipeline().fire(Opportunity::AfterReceived, &mut ctx);
    }

    /// Closes the session. Safe to call any number of times.
    pub fn close(&self) {
        if self.close.is_cancelled() {
            return;
        }
        trace!(session = %self.key, "Session closing");
        self.close.cancel();
        let _ = self.send_tx.try_send(None);
    }

    /// Fires a connection event on the service pipeline; `false` on veto.
    pub(crate) fn fire(&mut self, op: Opportunity) -> bool {
        let service = Arc::clone(&self.service);
        let mut ctx = Context::new(self);
        service.pipeline().fire(op, &mut ctx)
    }

    pub(crate) fn fire_after_send(&mut self, msg_id: u16, msg: Box<dyn Message>) {
        let service = Arc::clone(&self.service);
        let mut ctx = Context::with_message(self, msg_id, msg);
        service.pipeline().fire(Opportunity::AfterSend, &mut ctx);
    }

    pub fn set_key<T: Any + Send>(&mut self, name: impl Into<String>, value: T) {
        self.keys.insert(name.into(), Box::new(value));
    }

    pub fn get_key<T: Any>(&self, name: &str) -> Option<&T> {
        self.keys.get(name).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_key_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.keys.get_mut(name).and_then(|v| v.downcast_mut::<T>())
    }

    pub fn remove_key(&mut self, name: &str) -> bool {
        self.keys.remove(name).is_some()
    }

    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(|v| v.downcast_ref::<T>())
    }

    pub fn user_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.user_data.as_deref_mut().and_then(|v| v.downcast_mut::<T>())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close.cancel();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, NetworkError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| NetworkError::Timeout(limit))?
}

async fn read_loop(
    mut reader: Box<dyn FrameRead>,
    recv_tx: mpsc::Sender<Bytes>,
    close: CancellationToken,
    read_timeout: Duration,
    key: SessionKey,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let payload = tokio::select! {
            _ = close.cancelled() => break,
            read = with_timeout(read_timeout, reader.read_frame()) => match read {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(session = %key, error = %err, "Read failed");
                    break;
                }
            },
        };
        tokio::select! {
            _ = close.cancelled() => break,
            sent = recv_tx.send(payload) => if sent.is_err() { break },
        }
    }
    close.cancel();
    trace!(session = %key, "Reader stopped");
    let _ = events.send(SessionEvent::Closed(key.session_id()));
}

async fn write_loop(
    mut writer: Box<dyn FrameWrite>,
    mut send_rx: mpsc::Receiver<Option<SendPack>>,
    framer: Framer,
    close: CancellationToken,
    write_timeout: Duration,
    key: SessionKey,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        let pack = tokio::select! {
            biased;
            _ = close.cancelled() => break,
            pack = send_rx.recv() => match pack {
                Some(Some(pack)) => pack,
                _ => break,
            },
        };
        let SendPack { mut frame, msg_id, msg } = pack;
        if let Err(err) = framer.encode(&mut frame) {
            warn!(session = %key, msg_id, error = %err, "Frame rejected");
            break;
        }
        let written = tokio::select! {
            biased;
            _ = close.cancelled() => break,
            written = with_timeout(write_timeout, writer.write_frame(frame)) => written,
        };
        if let Err(err) = written {
            warn!(session = %key, msg_id, error = %err, "Write failed");
            break;
        }
        if let Some(msg) = msg {
            let _ = events.send(SessionEvent::Sent {
                session: key.session_id(),
                msg_id,
                msg,
            });
        }
    }
    close.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await;
    trace!(session = %key, "Writer stopped");
}
