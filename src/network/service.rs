//! # Service Supervisors
//!
//! A service is one configured listener or dialer together with the sessions
//! it owns. [`Supervisor`] implements both roles; the transport specific
//! parts plug in through [`Upgrade`] (turn an accepted socket into a
//! [`Connection`]) and [`Dial`] (open an outgoing one).
//!
//! Background tasks only feed channels. Everything that touches sessions
//! happens in [`Service::update`], called from the network module:
//!
//! 1. session events: `AfterSend` deliveries, closed sessions (`AfterClosed`,
//!    then redial for auto-reconnecting clients),
//! 2. a stopped accept/dial loop switches the service to closing and closes
//!    every session,
//! 3. new connections become sessions (`AfterConnected` may veto) unless the
//!    service is closing,
//! 4. every session [`dispatch`](Session::dispatch)es its inbound queue.
//!
//! A closing service reports [`ServiceStatus::Closed`] once its last session
//! is gone.

use crate::codec::Codec;
use crate::config::{Protocol, ServerKey, ServiceConfig};
use crate::error::NetworkError;
use crate::network::filter::{Opportunity, Pipeline};
use crate::network::handler::HandlerRegistry;
use crate::network::packet::Framer;
use crate::network::session::{Session, SessionEvent};
use crate::network::transport::Connection;
use crate::network::{envelope::Parser, tcp, ws};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Accepted connections waiting for the next update.
const CONN_QUEUE: usize = 1000;

/// Session id counter of one service key. Clones share the count, so a
/// restarted service keeps handing out fresh [`SessionKey`](crate::config::SessionKey)s.
#[derive(Debug, Clone, Default)]
pub struct SessionSeq(Arc<AtomicU32>);

impl SessionSeq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last id handed out, 0 before the first session.
    pub fn last(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Everything a session needs from its service. Immutable once built.
#[derive(Debug)]
pub struct ServiceShared {
    config: ServiceConfig,
    key: ServerKey,
    pipeline: Pipeline,
    handlers: Arc<HandlerRegistry>,
    framer: Framer,
    parser: Parser,
    seq: SessionSeq,
}

impl ServiceShared {
    pub fn new(
        config: ServiceConfig,
        pipeline: Pipeline,
        handlers: Arc<HandlerRegistry>,
        framer: Framer,
        codec: Codec,
    ) -> Self {
        Self {
            key: config.key(),
            parser: Parser::new(codec, framer.header_len()),
            config,
            pipeline,
            handlers,
            framer,
            seq: SessionSeq::new(),
        }
    }

    /// Continues numbering sessions from `seq` instead of from 1.
    pub fn with_seq(mut self, seq: SessionSeq) -> Self {
        self.seq = seq;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn key(&self) -> ServerKey {
        self.key
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn framer(&self) -> Framer {
        self.framer
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn seq(&self) -> &SessionSeq {
        &self.seq
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    /// Shut down and every session gone; the service can be dropped.
    Closed,
}

pub trait Service: Send {
    fn key(&self) -> ServerKey;

    fn config(&self) -> &ServiceConfig;

    /// Binds or begins dialing. Listen failures are returned here.
    fn start(&mut self) -> Result<(), NetworkError>;

    /// One non-blocking step, see the module docs.
    fn update(&mut self) -> ServiceStatus;

    /// Stops accepting or dialing. Sessions close on the next update.
    fn shutdown(&mut self);

    fn session_count(&self) -> usize;

    /// Bound address of a started server.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Server side: completes an accepted TCP connection (socket options, TLS,
/// WebSocket handshake).
#[async_trait]
pub trait Upgrade: Send + Sync + 'static {
    async fn upgrade(
        &self,
        stream: tokio::net::TcpStream,
        remote: SocketAddr,
    ) -> Result<Connection, NetworkError>;
}

/// Client side: opens one outgoing connection.
#[async_trait]
pub trait Dial: Send + Sync + 'static {
    async fn dial(&self) -> Result<Connection, NetworkError>;
}

enum Role {
    Server(Arc<dyn Upgrade>),
    Client(Arc<dyn Dial>),
}

/// Channels that outlive one start: the loop task feeds `conn_tx` and
/// cancels `stopped` when it exits for any reason.
struct Source {
    conn_rx: mpsc::Receiver<Connection>,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    redial: Option<mpsc::Sender<Duration>>,
}

pub struct Supervisor {
    shared: Arc<ServiceShared>,
    role: Role,
    source: Option<Source>,
    sessions: HashMap<u32, Session>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    closing: bool,
    local_addr: Option<SocketAddr>,
}

impl Supervisor {
    /// Picks the transport from `protocol` and `is_client`. A `wss` server
    /// loads its certificate here.
    pub fn new(shared: ServiceShared) -> Result<Self, NetworkError> {
        let shared = Arc::new(shared);
        let config = shared.config();
        let role = match (config.protocol, config.is_client) {
            (Protocol::Tcp, false) => Role::Server(Arc::new(tcp::TcpUpgrade::new(&shared))),
            (Protocol::Tcp, true) => Role::Client(Arc::new(tcp::TcpDial::new(&shared))),
            (Protocol::Ws | Protocol::Wss, false) => Role::Server(Arc::new(ws::WsUpgrade::new(&shared)?)),
            (Protocol::Ws | Protocol::Wss, true) => Role::Client(Arc::new(ws::WsDial::new(&shared))),
        };
        Ok(Self::with_role(shared, role))
    }

    fn with_role(shared: Arc<ServiceShared>, role: Role) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            role,
            source: None,
            sessions: HashMap::new(),
            events_tx,
            events_rx,
            closing: false,
            local_addr: None,
        }
    }

    pub fn shared(&self) -> &Arc<ServiceShared> {
        &self.shared
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SessionEvent::Sent {
                    session,
                    msg_id,
                    msg,
                } => {
                    if let Some(s) = self.sessions.get_mut(&session) {
                        s.fire_after_send(msg_id, msg);
                    }
                }
                SessionEvent::Closed(id) => self.on_closed(id),
            }
        }
    }

    fn on_closed(&mut self, id: u32) {
        let Some(mut session) = self.sessions.remove(&id) else {
            return;
        };
        session.fire(Opportunity::AfterClosed);
        trace!(session = %session.key(), "Session closed");
        if self.closing || !self.shared.config().auto_reconnect {
            return;
        }
        if let Some(redial) = self.source.as_ref().and_then(|s| s.redial.as_ref()) {
            if redial.try_send(self.shared.config().reconnect_interval).is_err() {
                warn!(service = %self.shared.key(), "Redial queue full");
            }
        }
    }

    /// Servers are already within `max_conn_num` here: the accept loop hands
    /// out one slot per connection and the session holds it until dropped.
    fn open(&mut self, conn: Connection) {
        let id = self.shared.seq().next();
        let mut session = Session::new(id, Arc::clone(&self.shared), conn, self.events_tx.clone());
        if !session.fire(Opportunity::AfterConnected) {
            debug!(session = %session.key(), "Connection refused by filter");
            session.close();
        }
        self.sessions.insert(id, session);
    }

    fn begin_closing(&mut self) {
        self.closing = true;
        debug!(
            service = %self.shared.key(),
            sessions = self.sessions.len(),
            "Service closing"
        );
        for session in self.sessions.values() {
            session.close();
        }
    }
}

impl Service for Supervisor {
    fn key(&self) -> ServerKey {
        self.shared.key()
    }

    fn config(&self) -> &ServiceConfig {
        self.shared.config()
    }

    fn start(&mut self) -> Result<(), NetworkError> {
        let config = self.shared.config();
        let key = self.shared.key();
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();

        let source = match &self.role {
            Role::Server(upgrade) => {
                let listener = tcp::bind(&config.addr())?;
                self.local_addr = listener.local_addr().ok();
                let (conn_tx, conn_rx) = mpsc::channel(CONN_QUEUE);
                let slots = Arc::new(Semaphore::new(config.max_conn_num.min(Semaphore::MAX_PERMITS)));
                tokio::spawn(tcp::accept_loop(
                    listener,
                    Arc::clone(upgrade),
                    slots,
                    conn_tx,
                    shutdown.clone(),
                    stopped.clone(),
                    key,
                ));
                Source {
                    conn_rx,
                    shutdown,
                    stopped,
                    redial: None,
                }
            }
            Role::Client(dial) => {
                let slots = config.client_num.max(1);
                let (conn_tx, conn_rx) = mpsc::channel(slots);
                let (redial_tx, redial_rx) = mpsc::channel(slots);
                for _ in 0..slots {
                    let _ = redial_tx.try_send(Duration::ZERO);
                }
                tokio::spawn(dial_loop(
                    Arc::clone(dial),
                    redial_rx,
                    conn_tx,
                    config.reconnect_interval,
                    shutdown.clone(),
                    stopped.clone(),
                    key,
                ));
                Source {
                    conn_rx,
                    shutdown,
                    stopped,
                    redial: Some(redial_tx),
                }
            }
        };
        info!(
            service = %key,
            protocol = %config.protocol,
            addr = %config.url(),
            client = config.is_client,
            "Service started"
        );
        self.source = Some(source);
        self.closing = false;
        Ok(())
    }

    fn update(&mut self) -> ServiceStatus {
        self.drain_events();

        let stopped = self.source.as_ref().map_or(true, |s| s.stopped.is_cancelled());
        if stopped && !self.closing {
            self.begin_closing();
        }

        if self.closing {
            if let Some(source) = self.source.as_mut() {
                while source.conn_rx.try_recv().is_ok() {}
            }
            if self.sessions.is_empty() {
                trace!(service = %self.shared.key(), "Service closed");
                return ServiceStatus::Closed;
            }
        } else {
            while let Some(conn) = self.source.as_mut().and_then(|s| s.conn_rx.try_recv().ok()) {
                self.open(conn);
            }
        }

        for session in self.sessions.values_mut() {
            session.dispatch();
        }
        ServiceStatus::Running
    }

    fn shutdown(&mut self) {
        trace!(service = %self.shared.key(), "Service shutdown");
        if let Some(source) = &self.source {
            source.shutdown.cancel();
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("key", &self.shared.key())
            .field("sessions", &self.sessions.len())
            .field("closing", &self.closing)
            .finish()
    }
}

/// Builds the service described by `config`, numbering its sessions from
/// `seq`.
pub fn new_service(
    config: ServiceConfig,
    pipeline: Pipeline,
    handlers: Arc<HandlerRegistry>,
    framer: Framer,
    codec: Codec,
    seq: SessionSeq,
) -> Result<Box<dyn Service>, NetworkError> {
    let shared = ServiceShared::new(config, pipeline, handlers, framer, codec).with_seq(seq);
    Ok(Box::new(Supervisor::new(shared)?))
}

/// One dial per slot. Each slot carries the delay to wait before dialing;
/// failed dials retry every `retry` until shutdown.
async fn dial_loop(
    dial: Arc<dyn Dial>,
    mut slots: mpsc::Receiver<Duration>,
    conns: mpsc::Sender<Connection>,
    retry: Duration,
    shutdown: CancellationToken,
    stopped: CancellationToken,
    key: ServerKey,
) {
    let _stopped = stopped.drop_guard();
    loop {
        let delay = tokio::select! {
            _ = shutdown.cancelled() => break,
            slot = slots.recv() => match slot {
                Some(delay) => delay,
                None => break,
            },
        };
        let conn = tokio::select! {
            _ = shutdown.cancelled() => break,
            conn = dial_until_connected(dial.as_ref(), delay, retry, key) => conn,
        };
        if conns.try_send(conn).is_err() {
            error!(service = %key, "Connection queue full");
        }
    }
    trace!(service = %key, "Dial loop stopped");
}

async fn dial_until_connected(dial: &dyn Dial, delay: Duration, retry: Duration, key: ServerKey) -> Connection {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    loop {
        match dial.dial().await {
            Ok(conn) => return conn,
            Err(err) => {
                warn!(service = %key, error = %err, retry_in = ?retry, "Connect failed");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::filter::{FilterRegistry, MiddleFunc};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, Instant};

    fn shared_for(mut config: ServiceConfig, filters: &FilterRegistry) -> ServiceShared {
        config.init().unwrap();
        let pipeline = filters.pipeline(&[], &[]).unwrap();
        ServiceShared::new(
            config,
            pipeline,
            Arc::new(HandlerRegistry::new()),
            Framer::default(),
            Codec::default(),
        )
    }

    async fn run_for(service: &mut Supervisor, period: Duration) {
        let end = Instant::now() + period;
        while Instant::now() < end {
            service.update();
            sleep(Duration::from_millis(50)).await;
        }
    }

    /// Every dial succeeds and the far end hangs up straight away.
    #[derive(Default)]
    struct HangUp(AtomicUsize);

    #[async_trait]
    impl Dial for HangUp {
        async fn dial(&self) -> Result<Connection, NetworkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let (near, _far) = tokio::io::duplex(64);
            Ok(Connection::from_stream(near, Framer::default(), None, None))
        }
    }

    /// Completes each handshake after `delay`.
    struct SlowUpgrade {
        started: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Upgrade for SlowUpgrade {
        async fn upgrade(&self, stream: TcpStream, remote: SocketAddr) -> Result<Connection, NetworkError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            sleep(self.delay).await;
            Ok(Connection::from_stream(stream, Framer::default(), None, Some(remote)))
        }
    }

    fn hang_up_client(auto_reconnect: bool, dial: Arc<HangUp>) -> Supervisor {
        let mut config = ServiceConfig::client(Protocol::Tcp, "127.0.0.1", 1);
        config.auto_reconnect = auto_reconnect;
        config.reconnect_interval = Duration::from_secs(3);
        let shared = shared_for(config, &FilterRegistry::new());
        Supervisor::with_role(Arc::new(shared), Role::Client(dial))
    }

    #[tokio::test(start_paused = true)]
    async fn auto_reconnect_redials_after_hangup() {
        let dial = Arc::new(HangUp::default());
        let mut service = hang_up_client(true, Arc::clone(&dial));
        service.start().unwrap();

        run_for(&mut service, Duration::from_secs(2)).await;
        assert_eq!(dial.0.load(Ordering::SeqCst), 1);

        // one redial per reconnect_interval
        run_for(&mut service, Duration::from_secs(6)).await;
        assert!(dial.0.load(Ordering::SeqCst) >= 3);

        service.shutdown();
        run_for(&mut service, Duration::from_secs(1)).await;
        assert_eq!(service.update(), ServiceStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn hangup_without_auto_reconnect_stays_down() {
        let dial = Arc::new(HangUp::default());
        let mut service = hang_up_client(false, Arc::clone(&dial));
        service.start().unwrap();

        run_for(&mut service, Duration::from_secs(10)).await;
        assert_eq!(dial.0.load(Ordering::SeqCst), 1);
        assert_eq!(service.session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_ids_continue_across_restarts() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let mut filters = FilterRegistry::new();
        let seen = Arc::clone(&ids);
        filters.add_middle(move || {
            let seen = Arc::clone(&seen);
            Box::new(MiddleFunc::new().on(Opportunity::AfterConnected, move |ctx| {
                seen.lock().push(ctx.session.key().session_id());
            }))
        });

        let seq = SessionSeq::new();
        for _ in 0..2 {
            let config = ServiceConfig::client(Protocol::Tcp, "127.0.0.1", 1);
            let shared = shared_for(config, &filters).with_seq(seq.clone());
            let mut service = Supervisor::with_role(Arc::new(shared), Role::Client(Arc::new(HangUp::default())));
            service.start().unwrap();
            run_for(&mut service, Duration::from_secs(1)).await;
            service.shutdown();
            run_for(&mut service, Duration::from_secs(1)).await;
            assert_eq!(service.update(), ServiceStatus::Closed);
        }
        assert_eq!(*ids.lock(), vec![1, 2]);
        assert_eq!(seq.last(), 2);
    }

    #[tokio::test]
    async fn pending_handshakes_count_against_max_conn_num() {
        let mut config = ServiceConfig::server(Protocol::Tcp, "127.0.0.1", 0);
        config.max_conn_num = 1;
        let upgrade = Arc::new(SlowUpgrade {
            started: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
        });
        let shared = shared_for(config, &FilterRegistry::new());
        let mut service = Supervisor::with_role(Arc::new(shared), Role::Server(upgrade.clone()));
        service.start().unwrap();
        let addr = service.local_addr().unwrap();

        let mut clients = Vec::new();
        for _ in 0..4 {
            clients.push(TcpStream::connect(addr).await.unwrap());
        }
        // only one handshake may run while the limit is taken
        sleep(Duration::from_millis(100)).await;
        assert_eq!(upgrade.started.load(Ordering::SeqCst), 1);
        run_for(&mut service, Duration::from_millis(300)).await;
        assert_eq!(service.session_count(), 1);
        assert_eq!(upgrade.started.load(Ordering::SeqCst), 1);

        // the slot comes back once the session is gone
        drop(clients);
        for _ in 0..100 {
            service.update();
            if service.session_count() == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.session_count(), 0);

        let _again = TcpStream::connect(addr).await.unwrap();
        run_for(&mut service, Duration::from_millis(500)).await;
        assert_eq!(upgrade.started.load(Ordering::SeqCst), 2);
        assert_eq!(service.session_count(), 1);
    }

    struct Refuse(AtomicUsize);

    #[async_trait]
    impl Dial for Refuse {
        async fn dial(&self) -> Result<Connection, NetworkError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(NetworkError::ConnectionClosed)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dial_retries_until_shutdown() {
        let dial = Arc::new(Refuse(AtomicUsize::new(0)));
        let (slot_tx, slot_rx) = mpsc::channel(1);
        let (conn_tx, _conn_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        slot_tx.send(Duration::ZERO).await.unwrap();

        let task = tokio::spawn(dial_loop(
            dial.clone(),
            slot_rx,
            conn_tx,
            Duration::from_secs(3),
            shutdown.clone(),
            stopped.clone(),
            ServerKey::default(),
        ));
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(dial.0.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        task.await.unwrap();
        assert!(stopped.is_cancelled());
    }

    #[tokio::test]
    async fn unstarted_service_closes_immediately() {
        let mut config = ServiceConfig::server(Protocol::Tcp, "127.0.0.1", 0);
        config.init().unwrap();
        let pipeline = FilterRegistry::new().pipeline(&[], &[]).unwrap();
        let mut service = new_service(
            config,
            pipeline,
            Arc::new(HandlerRegistry::new()),
            Framer::default(),
            Codec::default(),
            SessionSeq::new(),
        )
        .unwrap();
        assert_eq!(service.update(), ServiceStatus::Closed);
    }
}
