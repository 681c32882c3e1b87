//! # Cube Sample
//!
//! A ping/pong pair on one network: a TCP server answers every [`Ping`]
//! with a [`Pong`], and a client service on the same process opens a
//! connection, sends the first ping from its `AfterConnected` hook and
//! keeps the rally going for a fixed number of rounds.
//!
//! ## 🧩 Pieces
//!
//! - **Messages**: [`Ping`] and [`Pong`], plain serde structs encoded with
//!   the network default.
//! - **Handlers**: [`handlers`] registers both ids.
//! - **Hooks**: [`filters`] names a `blacklist` filter, a `log` middleware
//!   and the client's `ping_on_connect` middleware.
//! - **Config**: [`sample_config`] wires a server and a client to one port.

use cube::config::{NetworkConfig, Protocol, ServerInfo, ServiceConfig};
use cube::cube_actor::BoxError;
use cube::network::{
    Context, FilterFunc, FilterRegistry, HandlerRegistry, MiddleFunc, Network, Opportunity,
};
use cube::NetworkError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PING: u16 = 1;
pub const PONG: u16 = 2;

pub const SERVER_ID: u16 = 1;
pub const CLIENT_ID: u16 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub seq: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub seq: u32,
    pub text: String,
}

cube::serde_message!(Ping, Pong);

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("read config {path}: {source}")]
    ReadConfig {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    ParseConfig {
        path: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Counters shared between the handlers and whoever started the sample.
#[derive(Debug, Default)]
pub struct Stats {
    pings: AtomicU64,
    pongs: AtomicU64,
    refused: AtomicU64,
}

impl Stats {
    pub fn pings(&self) -> u64 {
        self.pings.load(Ordering::Relaxed)
    }

    pub fn pongs(&self) -> u64 {
        self.pongs.load(Ordering::Relaxed)
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

/// Addresses the `blacklist` filter refuses.
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    ips: Arc<RwLock<HashSet<IpAddr>>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, ip: IpAddr) {
        self.ips.write().insert(ip);
    }

    pub fn unblock(&self, ip: IpAddr) -> bool {
        self.ips.write().remove(&ip)
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.ips.read().contains(ip)
    }
}

/// Server answers pings, client answers pongs until `rounds` is reached.
pub fn handlers(stats: Arc<Stats>, rounds: u32) -> Result<HandlerRegistry, NetworkError> {
    let mut registry = HandlerRegistry::new();

    let server_stats = Arc::clone(&stats);
    registry.register::<Ping, _>(PING, move |ctx: &mut Context<'_>, ping: &Ping| {
        server_stats.pings.fetch_add(1, Ordering::Relaxed);
        let pong = Pong {
            seq: ping.seq,
            text: ping.text.clone(),
        };
        ctx.session.send(PONG, pong).map_err(BoxError::from)
    })?;

    registry.register::<Pong, _>(PONG, move |ctx: &mut Context<'_>, pong: &Pong| {
        stats.pongs.fetch_add(1, Ordering::Relaxed);
        debug!(session = %ctx.session.key(), seq = pong.seq, "Pong");
        if pong.seq + 1 >= rounds {
            info!(session = %ctx.session.key(), rounds, "Rally finished");
            return Ok(());
        }
        let ping = Ping {
            seq: pong.seq + 1,
            text: pong.text.clone(),
        };
        ctx.session.send(PING, ping).map_err(BoxError::from)
    })?;

    Ok(registry)
}

pub fn filters(blacklist: Blacklist, stats: Arc<Stats>) -> FilterRegistry {
    let mut registry = FilterRegistry::new();

    registry.register_filter("blacklist", move || {
        let blacklist = blacklist.clone();
        let stats = Arc::clone(&stats);
        Box::new(FilterFunc::new().on(Opportunity::AfterConnected, move |ctx| {
            let Some(peer) = ctx.session.remote_addr() else {
                return true;
            };
            if blacklist.contains(&peer.ip()) {
                stats.refused.fetch_add(1, Ordering::Relaxed);
                warn!(session = %ctx.session.key(), peer = %peer, "Blacklisted peer refused");
                return false;
            }
            true
        }))
    });

    registry.register_middle("log", || {
        Box::new(
            MiddleFunc::new()
                .on(Opportunity::AfterConnected, |ctx| {
                    info!(session = %ctx.session.key(), peer = ?ctx.session.remote_addr(), "Connected");
                })
                .on(Opportunity::AfterClosed, |ctx| {
                    info!(session = %ctx.session.key(), "Disconnected");
                })
                .on(Opportunity::ErrorMsgId, |ctx| {
                    let len = ctx.packet.as_ref().map_or(0, |p| p.len());
                    warn!(session = %ctx.session.key(), msg_id = ctx.msg_id, len, "Unknown message");
                }),
        )
    });

    registry.register_middle("ping_on_connect", || {
        Box::new(MiddleFunc::new().on(Opportunity::AfterConnected, |ctx| {
            let ping = Ping {
                seq: 0,
                text: "hello".to_string(),
            };
            if let Err(err) = ctx.session.send(PING, ping) {
                warn!(session = %ctx.session.key(), error = %err, "First ping failed");
            }
        }))
    });

    registry
}

/// A TCP server on `port` and a client dialing it from loopback.
pub fn sample_config(port: u16) -> NetworkConfig {
    let mut server = ServiceConfig::server(Protocol::Tcp, "127.0.0.1", port);
    server.info = ServerInfo {
        id: SERVER_ID,
        name: "ping-server".to_string(),
        ..ServerInfo::default()
    };
    server.filter_chain = vec!["blacklist".to_string()];
    server.middle_chain = vec!["log".to_string()];

    let mut client = ServiceConfig::client(Protocol::Tcp, "127.0.0.1", port);
    client.info = ServerInfo {
        id: CLIENT_ID,
        name: "ping-client".to_string(),
        ..ServerInfo::default()
    };
    client.auto_reconnect = true;
    client.middle_chain = vec!["log".to_string(), "ping_on_connect".to_string()];

    NetworkConfig {
        services: vec![server, client],
        ..NetworkConfig::default()
    }
}

pub fn load_config(path: &str) -> Result<NetworkConfig, SampleError> {
    let text = std::fs::read_to_string(path).map_err(|source| SampleError::ReadConfig {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SampleError::ParseConfig {
        path: path.to_string(),
        source,
    })
}

/// The network module for `config` with the sample's handlers and hooks.
pub fn network(
    config: NetworkConfig,
    blacklist: Blacklist,
    stats: Arc<Stats>,
    rounds: u32,
) -> Result<Network, SampleError> {
    let handlers = handlers(Arc::clone(&stats), rounds)?;
    Ok(Network::new(config, handlers, filters(blacklist, stats)))
}
