//! # Cube Sample
//!
//! Starts the ping server and client on one network module and runs until
//! Ctrl-C.
//!
//! ```bash
//! RUST_LOG=info cargo run -p cube-sample
//!
//! # custom services from a JSON network config
//! RUST_LOG=debug cargo run -p cube-sample -- network.json
//! ```

use cube::lifecycle::{setup_tracing, AppBuilder};
use cube::NetworkError;
use cube_sample::{load_config, network, sample_config, Blacklist, SampleError, Stats};
use std::sync::Arc;
use tracing::info;

const DEFAULT_PORT: u16 = 7200;
const ROUNDS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), SampleError> {
    setup_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => sample_config(DEFAULT_PORT),
    };
    info!(services = config.services.len(), "Starting cube sample");

    let stats = Arc::new(Stats::default());
    let network = network(config, Blacklist::new(), Arc::clone(&stats), ROUNDS)?;
    let app = AppBuilder::new("cube-sample").network(network).start();

    app.run_until_ctrl_c().await.map_err(NetworkError::from)?;
    info!(pings = stats.pings(), pongs = stats.pongs(), "Cube sample stopped");
    Ok(())
}
