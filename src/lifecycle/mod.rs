//! Process wiring: the module object, its modules and logging.

mod app;
pub mod tracing;

pub use app::{App, AppBuilder, NETWORK_INTERVAL, NETWORK_PRIORITY};
pub use self::tracing::setup_tracing;
