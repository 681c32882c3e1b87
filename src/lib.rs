#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Cube
//!
//! > **Game-server networking on a single-threaded module core.**
//!
//! Application state lives in [`Module`](cube_actor::Module)s driven by one
//! [`Object`](cube_actor::Object). The network is just another module: it
//! owns TCP and WebSocket services, and every message handler, filter and
//! middleware runs on the same task as the rest of the game logic. Locks are
//! only needed at the socket boundary, where per-session reader and writer
//! tasks hand frames over through channels.
//!
//! ## 🏗️ Design Philosophy
//!
//! - **One thread of game logic**: handlers receive `&mut Session` and
//!   send replies directly; back-pressure closes slow sessions instead of
//!   growing queues.
//! - **Contained failures**: a faulty command, module, handler or message
//!   is logged and dropped at the smallest scope (one command, one message,
//!   one session, one service).
//! - **Acknowledged shutdown**: sessions report closed to their service,
//!   services to the network, the network releases its module, the manager
//!   fires its closed signal and only then does the object drain and stop.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Core ([`cube_actor`])
//! - **Role**: mailbox objects, module scheduling, hooks and timers.
//! - **Key items**: [`Object`](cube_actor::Object),
//!   [`ModuleManager`](cube_actor::ModuleManager).
//!
//! ### 2. The Wire ([`codec`], [`network::packet`], [`network::envelope`])
//! - **Role**: message encodings, the length-prefixed frame and the
//!   `[encode type][msg id]` envelope.
//! - **Key items**: [`Message`](codec::Message), [`Framer`](network::Framer),
//!   [`Parser`](network::Parser).
//!
//! ### 3. The Services ([`network`])
//! - **Role**: sessions, filters and middleware, TCP/WebSocket supervisors
//!   and the [`Network`](network::Network) module.
//!
//! ### 4. The Orchestrator ([`lifecycle`])
//! - **Role**: builds the module object, wires the network in and shuts
//!   everything down in order.
//! - **Key items**: [`AppBuilder`](lifecycle::AppBuilder),
//!   [`App::shutdown`](lifecycle::App::shutdown).
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # echo server and client on loopback, info logs
//! RUST_LOG=info cargo run -p cube-sample
//!
//! cargo test --workspace
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod network;

pub use codec::{Codec, EncodeType, Endian, Message};
pub use config::{NetworkConfig, Protocol, ServerInfo, ServerKey, ServiceConfig, SessionKey};
pub use cube_actor;
pub use error::{ErrorKind, FrameError, NetworkError};
