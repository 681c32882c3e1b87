//! # Observability & Tracing
//!
//! [`setup_tracing`] installs a compact `tracing-subscriber` formatter
//! filtered by `RUST_LOG`. Every layer logs with structured fields, so a
//! filter on a field value finds one service or one session:
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `object` | name of the actor object |
//! | `module` | module name inside the manager |
//! | `service` | [`ServerKey`](crate::config::ServerKey) as `area:type:id` |
//! | `session` | [`SessionKey`](crate::config::SessionKey) as `area:type:id#seq` |
//! | `msg_id` | envelope message id |
//! | `error` | display form of the fault |
//!
//! ## Levels
//!
//! - `trace`: plumbing (object run and close, sessions opening and closing,
//!   accept and dial loops)
//! - `debug`: service and network shutdown progress
//! - `info`: module init/close, services started, closed and restarted
//! - `warn`: transport errors, accept retries, modules still outstanding
//! - `error`: recovered faults (commands, handlers, modules), decode
//!   failures, send queue overflow
//!
//! ```bash
//! RUST_LOG=info cargo run -p cube-sample
//!
//! # one session's traffic and lifecycle
//! RUST_LOG=trace cargo run -p cube-sample 2>&1 | grep 'session=0:0:1#3'
//! ```
//!
//! After a clean shutdown the tail of an info log looks like:
//!
//! ```text
//! INFO Modules closing
//! INFO Service closed service=0:0:1
//! INFO Modules closed
//! ```
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // field names carry the context
        .compact()
        .init();
}
