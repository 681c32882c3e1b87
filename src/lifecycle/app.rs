use crate::network::{Network, NetworkHandle};
use cube_actor::{
    BoxError, Handle, HookType, Module, ModuleManager, Object, Options, Timers, MIN_INTERVAL,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The network closes first and initializes last.
pub const NETWORK_PRIORITY: i32 = i32::MAX;

/// Zero: the network steps its services on every manager tick.
pub const NETWORK_INTERVAL: Duration = Duration::ZERO;

/// Collects modules and hooks before the module object starts.
///
/// ```rust,no_run
/// use cube::config::NetworkConfig;
/// use cube::lifecycle::AppBuilder;
/// use cube::network::{FilterRegistry, HandlerRegistry, Network};
///
/// # async fn run() -> std::io::Result<()> {
/// let network = Network::new(NetworkConfig::default(), HandlerRegistry::new(), FilterRegistry::new());
/// let app = AppBuilder::new("game").network(network).start();
/// app.run_until_ctrl_c().await
/// # }
/// ```
pub struct AppBuilder {
    name: String,
    options: Options,
    manager: ModuleManager,
    network: Option<NetworkHandle>,
}

impl AppBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: Options::with_interval(MIN_INTERVAL),
            manager: ModuleManager::new(),
            network: None,
        }
    }

    /// Object settings for the module object. A zero interval would never
    /// tick the manager, so it is raised to the minimum.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options.normalized();
        if self.options.interval.is_zero() {
            self.options.interval = MIN_INTERVAL;
        }
        self
    }

    pub fn module(mut self, module: impl Module, interval: Duration, priority: i32) -> Self {
        self.manager.register(module, interval, priority);
        self
    }

    pub fn hook<F>(mut self, hook: HookType, f: F) -> Self
    where
        F: FnMut() -> Result<(), BoxError> + Send + 'static,
    {
        self.manager.register_hook(hook, f);
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network.handle());
        self.module(network, NETWORK_INTERVAL, NETWORK_PRIORITY)
    }

    /// Spawns the module object and starts initializing modules. Must be
    /// called inside a tokio runtime.
    pub fn start(mut self) -> App {
        self.manager.start();
        let closed = self.manager.closed_signal();
        let (object, handle) = Object::new(self.name.clone(), self.options, self.manager);
        let task = tokio::spawn(object.run());
        info!(app = %self.name, interval = ?self.options.interval, "App started");
        App {
            name: self.name,
            handle,
            closed,
            task,
            timers: Timers::new(),
            network: self.network,
        }
    }
}

/// A running set of modules on one object.
pub struct App {
    name: String,
    handle: Handle<ModuleManager>,
    closed: CancellationToken,
    task: JoinHandle<()>,
    timers: Timers,
    network: Option<NetworkHandle>,
}

impl App {
    /// Handle to the module object; commands sent here run beside the modules.
    pub fn handle(&self) -> &Handle<ModuleManager> {
        &self.handle
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn network(&self) -> Option<&NetworkHandle> {
        self.network.as_ref()
    }

    /// Resolves once every module has released.
    pub async fn modules_closed(&self) {
        self.closed.cancelled().await
    }

    pub async fn run_until_ctrl_c(self) -> std::io::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!(app = %self.name, "Interrupt received");
        self.shutdown().await;
        Ok(())
    }

    /// Closes the manager, waits for every module to release, then drains
    /// and stops the object.
    pub async fn shutdown(self) {
        self.timers.stop_all();
        let closing = self.handle.send_fn(|manager: &mut ModuleManager, _| {
            manager.close();
            Ok(())
        });
        if let Err(err) = closing {
            warn!(app = %self.name, error = %err, "Module object already gone");
        } else {
            self.closed.cancelled().await;
        }
        self.handle.close();
        if let Err(err) = self.task.await {
            warn!(app = %self.name, error = %err, "Module object task failed");
        }
        info!(app = %self.name, "App stopped");
    }
}
