//! # Network Module
//!
//! [`Network`] is the module that owns every running service, keyed by
//! [`ServerKey`]. It starts the configured services in `init`, steps them in
//! `update`, and restarts any service that closes on its own after
//! [`TIME_RESTART`]. Closing the module shuts every service down and
//! releases the module once the last one reports closed.
//!
//! Other tasks ask for services through a cloneable [`NetworkHandle`]:
//!
//! ```rust,no_run
//! # async fn demo(network: cube::network::NetworkHandle) {
//! use cube::config::{Protocol, ServiceConfig};
//!
//! network.new_service(ServiceConfig::server(Protocol::Tcp, "0.0.0.0", 9100));
//! # }
//! ```

use crate::config::{NetworkConfig, ServerKey, ServiceConfig};
use crate::error::NetworkError;
use crate::network::filter::FilterRegistry;
use crate::network::handler::HandlerRegistry;
use crate::network::service::{self, Service, ServiceStatus, SessionSeq};
use cube_actor::{BoxError, Module, ModuleContext};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Delay before a closed service is started again, and before a request
/// that found the queue full is retried.
pub const TIME_RESTART: Duration = Duration::from_secs(5);

/// Capacity of the request queue.
pub const CAPACITY: usize = 10;

pub const MODULE_NAME: &str = "network";

#[derive(Debug)]
enum Request {
    Start(ServiceConfig),
    /// Shut down and start again after [`TIME_RESTART`].
    Restart(ServerKey),
    /// Shut down for good.
    Stop(ServerKey),
}

/// Thread-safe entry point for service requests.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    tx: mpsc::Sender<Request>,
}

impl NetworkHandle {
    /// Asks the network to start a service. A full queue is retried after
    /// [`TIME_RESTART`].
    pub fn new_service(&self, config: ServiceConfig) {
        self.request(Request::Start(config));
    }

    pub fn restart_service(&self, key: ServerKey) {
        self.request(Request::Restart(key));
    }

    pub fn stop_service(&self, key: ServerKey) {
        self.request(Request::Stop(key));
    }

    fn request(&self, request: Request) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                error!(?request, retry_in = ?TIME_RESTART, "Network request queue full");
                self.request_later(request);
            }
            Err(TrySendError::Closed(request)) => {
                warn!(?request, "Network is gone, request dropped");
            }
        }
    }

    fn request_later(&self, request: Request) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!(?request, "No runtime to schedule the request on");
            return;
        };
        let handle = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(TIME_RESTART).await;
            handle.request(request);
        });
    }
}

pub struct Network {
    config: NetworkConfig,
    filters: FilterRegistry,
    handlers: Arc<HandlerRegistry>,
    services: HashMap<ServerKey, Box<dyn Service>>,
    /// Outlives restarts so session keys stay unique per service key.
    sequences: HashMap<ServerKey, SessionSeq>,
    stopping: HashSet<ServerKey>,
    tx: mpsc::Sender<Request>,
    rx: mpsc::Receiver<Request>,
    closing: bool,
}

impl Network {
    pub fn new(config: NetworkConfig, handlers: HandlerRegistry, filters: FilterRegistry) -> Self {
        let (tx, rx) = mpsc::channel(CAPACITY);
        Self {
            config,
            filters,
            handlers: Arc::new(handlers),
            services: HashMap::new(),
            sequences: HashMap::new(),
            stopping: HashSet::new(),
            tx,
            rx,
            closing: false,
        }
    }

    pub fn handle(&self) -> NetworkHandle {
        NetworkHandle { tx: self.tx.clone() }
    }

    pub fn service_keys(&self) -> Vec<ServerKey> {
        self.services.keys().copied().collect()
    }

    pub fn local_addr(&self, key: ServerKey) -> Option<SocketAddr> {
        self.services.get(&key).and_then(|s| s.local_addr())
    }

    /// Builds and starts one service. Ignored while closing.
    pub fn start_service(&mut self, mut config: ServiceConfig) -> Result<(), NetworkError> {
        if self.closing {
            debug!(service = %config.key(), "Network closing, service not started");
            return Ok(());
        }
        config.init()?;
        let key = config.key();
        if self.services.contains_key(&key) {
            return Err(NetworkError::ServiceExists(key));
        }
        let pipeline = self.filters.pipeline(&config.filter_chain, &config.middle_chain)?;
        let seq = self.sequences.entry(key).or_default().clone();
        let mut service = service::new_service(
            config,
            pipeline,
            Arc::clone(&self.handlers),
            self.config.framer(),
            self.config.codec(),
            seq,
        )?;
        service.start()?;
        self.services.insert(key, service);
        Ok(())
    }

    fn handle_request(&mut self, request: Request) {
        match request {
            Request::Start(config) => {
                let key = config.key();
                if let Err(err) = self.start_service(config) {
                    error!(service = %key, error = %err, "Service start failed");
                }
            }
            Request::Restart(key) => match self.services.get_mut(&key) {
                Some(service) => service.shutdown(),
                None => warn!(service = %key, "Restart of unknown service"),
            },
            Request::Stop(key) => match self.services.get_mut(&key) {
                Some(service) => {
                    self.stopping.insert(key);
                    service.shutdown();
                }
                None => warn!(service = %key, "Stop of unknown service"),
            },
        }
    }

    fn step_services(&mut self) -> Vec<Box<dyn Service>> {
        let closed: Vec<ServerKey> = self
            .services
            .iter_mut()
            .filter_map(|(key, service)| (service.update() == ServiceStatus::Closed).then_some(*key))
            .collect();
        closed
            .into_iter()
            .filter_map(|key| self.services.remove(&key))
            .collect()
    }

    fn on_service_closed(&mut self, service: Box<dyn Service>) {
        let key = service.key();
        let stopped = self.stopping.remove(&key);
        info!(service = %key, "Service closed");
        if self.closing || stopped {
            return;
        }
        info!(service = %key, restart_in = ?TIME_RESTART, "Service restart scheduled");
        self.handle().request_later(Request::Start(service.config().clone()));
    }
}

impl Module for Network {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn init(&mut self, _ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        for config in self.config.services.clone() {
            let key = config.key();
            if let Err(err) = self.start_service(config) {
                error!(service = %key, error = %err, "Service start failed");
            }
        }
        Ok(())
    }

    fn update(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        while let Ok(request) = self.rx.try_recv() {
            self.handle_request(request);
        }
        for service in self.step_services() {
            self.on_service_closed(service);
        }
        if self.closing && self.services.is_empty() {
            ctx.release();
        }
        Ok(())
    }

    fn close(&mut self, ctx: &ModuleContext<'_>) -> Result<(), BoxError> {
        if self.closing {
            return Ok(());
        }
        self.closing = true;
        debug!(services = self.services.len(), "Network closing");
        if self.services.is_empty() {
            ctx.release();
            return Ok(());
        }
        for service in self.services.values_mut() {
            service.shutdown();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use tokio::time::Instant;

    fn local_server(id: u16) -> ServiceConfig {
        let mut config = ServiceConfig::server(Protocol::Tcp, "127.0.0.1", 0);
        config.info.id = id;
        config
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let mut network = Network::new(NetworkConfig::default(), HandlerRegistry::new(), FilterRegistry::new());
        network.start_service(local_server(1)).unwrap();
        assert!(matches!(
            network.start_service(local_server(1)),
            Err(NetworkError::ServiceExists(key)) if key == ServerKey::new(0, 0, 1)
        ));
        assert!(network.local_addr(ServerKey::new(0, 0, 1)).is_some());
    }

    #[tokio::test]
    async fn unknown_filter_names_fail_start() {
        let mut network = Network::new(NetworkConfig::default(), HandlerRegistry::new(), FilterRegistry::new());
        let mut config = local_server(2);
        config.filter_chain = vec!["missing".into()];
        assert!(matches!(
            network.start_service(config),
            Err(NetworkError::FilterNotFound(_))
        ));
        assert!(network.service_keys().is_empty());
    }

    fn network() -> Network {
        Network::new(NetworkConfig::default(), HandlerRegistry::new(), FilterRegistry::new())
    }

    /// One `update` without a module context.
    fn pump(network: &mut Network) {
        while let Ok(request) = network.rx.try_recv() {
            network.handle_request(request);
        }
        for service in network.step_services() {
            network.on_service_closed(service);
        }
    }

    /// Pumps for `period`, returning when `key` was first seen gone and when
    /// it was next seen running again.
    async fn watch(network: &mut Network, key: ServerKey, period: Duration) -> (Option<Instant>, Option<Instant>) {
        let end = Instant::now() + period;
        let (mut gone, mut back) = (None, None);
        while Instant::now() < end {
            pump(network);
            let running = network.service_keys().contains(&key);
            if !running && gone.is_none() {
                gone = Some(Instant::now());
            }
            if running && gone.is_some() && back.is_none() {
                back = Some(Instant::now());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        (gone, back)
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_service_returns_after_delay() {
        let mut network = network();
        let key = ServerKey::new(0, 0, 4);
        network.start_service(local_server(4)).unwrap();

        network.handle().restart_service(key);
        let (gone, back) = watch(&mut network, key, TIME_RESTART * 2).await;
        let gone = gone.expect("service shut down");
        let back = back.expect("service started again");
        assert!(back - gone >= TIME_RESTART);
        assert!(network.local_addr(key).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_service_stays_down() {
        let mut network = network();
        let key = ServerKey::new(0, 0, 5);
        network.start_service(local_server(5)).unwrap();

        network.handle().stop_service(key);
        let (gone, back) = watch(&mut network, key, TIME_RESTART * 2).await;
        assert!(gone.is_some());
        assert!(back.is_none());
        assert!(network.service_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_network_does_not_restart() {
        let mut network = network();
        let key = ServerKey::new(0, 0, 6);
        network.start_service(local_server(6)).unwrap();

        network.handle().restart_service(key);
        network.closing = true;
        let (gone, back) = watch(&mut network, key, TIME_RESTART * 2).await;
        assert!(gone.is_some());
        assert!(back.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_keeps_the_session_sequence() {
        let mut network = network();
        let key = ServerKey::new(0, 0, 7);
        network.start_service(local_server(7)).unwrap();
        let seq = network.sequences[&key].clone();
        for _ in 0..3 {
            seq.next();
        }

        network.handle().restart_service(key);
        let (_, back) = watch(&mut network, key, TIME_RESTART * 2).await;
        assert!(back.is_some());
        assert_eq!(network.sequences[&key].last(), 3);
    }

    #[tokio::test]
    async fn requests_through_the_handle() {
        let mut network = Network::new(NetworkConfig::default(), HandlerRegistry::new(), FilterRegistry::new());
        let handle = network.handle();
        handle.new_service(local_server(3));
        while let Ok(request) = network.rx.try_recv() {
            network.handle_request(request);
        }
        assert_eq!(network.service_keys(), vec![ServerKey::new(0, 0, 3)]);

        handle.stop_service(ServerKey::new(0, 0, 3));
        for _ in 0..100 {
            while let Ok(request) = network.rx.try_recv() {
                network.handle_request(request);
            }
            for service in network.step_services() {
                network.on_service_closed(service);
            }
            if network.service_keys().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(network.service_keys().is_empty());
        assert!(network.stopping.is_empty());
    }
}
