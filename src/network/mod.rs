//! # Networking
//!
//! Layers, bottom to top:
//!
//! | Layer | Item | Job |
//! |-------|------|-----|
//! | framing | [`Framer`] | length-prefixed packets on a byte stream |
//! | envelope | [`Parser`] | `[encode type][msg id][body]` inside each packet |
//! | routing | [`HandlerRegistry`] | msg id to message type and handler |
//! | hooks | [`FilterRegistry`], [`Pipeline`] | filters and middleware per [`Opportunity`] |
//! | connection | [`Session`] | queues plus reader/writer tasks for one socket |
//! | service | [`Supervisor`] | a listener or dialer and its sessions |
//! | module | [`Network`] | every service, restarts, shutdown acknowledgement |
//!
//! Only the reader and writer tasks of each session and the accept/dial
//! loop of each service run off the module task; they talk to it through
//! channels.

pub mod context;
pub mod envelope;
pub mod filter;
pub mod handler;
pub mod manager;
pub mod packet;
pub mod service;
pub mod session;
pub mod tcp;
pub mod transport;
pub mod ws;

pub use crate::error::FrameError;
pub use context::Context;
pub use envelope::{Parser, ENVELOPE_HEADER_LEN, UNREGISTERED_MSG_ID};
pub use filter::{
    Filter, FilterChain, FilterFunc, FilterRegistry, Middle, MiddleChain, MiddleFunc, Opportunity, Pipeline,
};
pub use handler::{Handler, HandlerRegistry};
pub use manager::{Network, NetworkHandle, TIME_RESTART};
pub use packet::{Framer, LenField};
pub use service::{
    new_service, Dial, Service, ServiceShared, ServiceStatus, SessionSeq, Supervisor, Upgrade,
};
pub use session::{Session, SessionEvent};
pub use transport::{Connection, FrameRead, FrameWrite, StreamFrameReader, StreamFrameWriter};
