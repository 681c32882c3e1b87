//! # Configuration
//!
//! Network and service settings as plain `serde` structs. Durations are
//! written as integer seconds. A [`ServiceConfig`] must go through
//! [`ServiceConfig::init`] before a service is built from it; `init` fills in
//! defaults and rejects settings that cannot work.
//!
//! ```rust
//! use cube::config::{Protocol, ServiceConfig};
//!
//! let mut cfg: ServiceConfig = serde_json::from_str(
//!     r#"{ "area": 1, "type": 2, "id": 7, "protocol": "tcp", "port": 9000, "reconnect_interval": 1 }"#,
//! ).unwrap();
//! cfg.init().unwrap();
//! assert_eq!(cfg.protocol, Protocol::Tcp);
//! assert_eq!(cfg.max_recv, 1000);
//! assert_eq!(cfg.reconnect_interval.as_secs(), 3);
//! assert_eq!(cfg.key().to_string(), "1:2:7");
//! ```

use crate::codec::{Codec, EncodeType, Endian};
use crate::error::NetworkError;
use crate::network::packet::Framer;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_MAX_RECV: usize = 1000;
pub const DEFAULT_MAX_SEND: usize = 1000;
pub const DEFAULT_MAX_CONN: usize = 5000;
pub const MIN_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
pub const MIN_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of one server process in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub area: u8,
    #[serde(default, rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub id: u16,
    #[serde(default)]
    pub name: String,
}

impl ServerInfo {
    pub fn key(&self) -> ServerKey {
        ServerKey::new(self.area, self.kind, self.id)
    }
}

/// `type << 24 | area << 16 | id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerKey(pub u32);

impl ServerKey {
    pub fn new(area: u8, kind: u8, id: u16) -> Self {
        Self(u32::from(id) | u32::from(area) << 16 | u32::from(kind) << 24)
    }

    /// Splits the key back into `(area, type, id)`.
    pub fn parse(self) -> (u8, u8, u16) {
        ((self.0 >> 16) as u8, (self.0 >> 24) as u8, self.0 as u16)
    }
}

impl fmt::Display for ServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (area, kind, id) = self.parse();
        write!(f, "{area}:{kind}:{id}")
    }
}

/// `server key << 32 | session id`: unique across every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub u64);

impl SessionKey {
    pub fn new(server: ServerKey, session_id: u32) -> Self {
        Self(u64::from(server.0) << 32 | u64::from(session_id))
    }

    pub fn server(self) -> ServerKey {
        ServerKey((self.0 >> 32) as u32)
    }

    pub fn session_id(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.server(), self.session_id())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Ws,
    Wss,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

mod secs {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }

    pub fn serialize<S: serde::Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }
}

/// One listener or dialer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub info: ServerInfo,
    /// PEM certificate chain, required by `wss` servers.
    pub cert_file: String,
    /// PEM PKCS#8 private key, required by `wss` servers.
    pub key_file: String,
    /// WebSocket URL path, e.g. `/ws`.
    pub path: String,
    pub protocol: Protocol,
    pub ip: String,
    pub port: u16,
    /// Inbound frames handled per session per update.
    pub max_recv: usize,
    /// Outbound queue capacity per session.
    pub max_send: usize,
    pub max_conn_num: usize,
    pub is_client: bool,
    pub auto_reconnect: bool,
    #[serde(with = "secs")]
    pub reconnect_interval: Duration,
    /// Parallel connections opened by a client service.
    pub client_num: usize,
    #[serde(with = "secs")]
    pub linger: Duration,
    pub keep_alive: bool,
    #[serde(with = "secs")]
    pub keep_alive_period: Duration,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    #[serde(with = "secs")]
    pub read_timeout: Duration,
    #[serde(with = "secs")]
    pub write_timeout: Duration,
    /// WebSocket handshake timeout.
    #[serde(with = "secs")]
    pub http_timeout: Duration,
    pub filter_chain: Vec<String>,
    pub middle_chain: Vec<String>,
}

impl ServiceConfig {
    pub fn server(protocol: Protocol, ip: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }

    pub fn client(protocol: Protocol, ip: impl Into<String>, port: u16) -> Self {
        Self {
            is_client: true,
            ..Self::server(protocol, ip, port)
        }
    }

    pub fn key(&self) -> ServerKey {
        self.info.key()
    }

    /// Applies defaults and validates. Zero limits take the defaults, short
    /// intervals are raised to their minimum and a client always opens at
    /// least one connection.
    pub fn init(&mut self) -> Result<(), NetworkError> {
        if self.max_recv == 0 {
            self.max_recv = DEFAULT_MAX_RECV;
        }
        if self.max_send == 0 {
            self.max_send = DEFAULT_MAX_SEND;
        }
        if self.max_conn_num == 0 {
            self.max_conn_num = DEFAULT_MAX_CONN;
        }
        self.reconnect_interval = self.reconnect_interval.max(MIN_RECONNECT_INTERVAL);
        self.http_timeout = self.http_timeout.max(MIN_HTTP_TIMEOUT);
        if self.is_client && self.client_num == 0 {
            self.client_num = 1;
        }
        if self.is_client && self.ip.is_empty() {
            return Err(NetworkError::InvalidConfig(format!(
                "{} client {} has no address",
                self.protocol,
                self.key()
            )));
        }
        if self.protocol == Protocol::Wss
            && !self.is_client
            && (self.cert_file.is_empty() || self.key_file.is_empty())
        {
            return Err(NetworkError::InvalidConfig(format!(
                "wss server {} needs cert_file and key_file",
                self.key()
            )));
        }
        Ok(())
    }

    /// `ip:port`, binding every interface when `ip` is empty.
    pub fn addr(&self) -> String {
        let ip = if self.ip.is_empty() { "0.0.0.0" } else { &self.ip };
        format!("{ip}:{}", self.port)
    }

    /// Address a client dials, `ws://host:port/path` for WebSocket.
    pub fn url(&self) -> String {
        match self.protocol {
            Protocol::Tcp => self.addr(),
            Protocol::Ws | Protocol::Wss => {
                format!("{}://{}{}", self.protocol, self.addr(), self.path)
            }
        }
    }
}

/// Settings shared by every service of one network: framing, byte order and
/// the default payload encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub big_endian: bool,
    /// Use JSON instead of bincode for messages without a fixed encoding.
    pub json_default: bool,
    /// Width of the frame length prefix: 1, 2 or 4 bytes.
    pub len_msg_len: u32,
    pub min_msg_len: u32,
    pub max_msg_len: u32,
    pub services: Vec<ServiceConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            big_endian: false,
            json_default: false,
            len_msg_len: 2,
            min_msg_len: 1,
            max_msg_len: 4096,
            services: Vec::new(),
        }
    }
}

impl NetworkConfig {
    pub fn endian(&self) -> Endian {
        if self.big_endian {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub fn framer(&self) -> Framer {
        Framer::new(self.len_msg_len, self.min_msg_len, self.max_msg_len, self.endian())
    }

    pub fn codec(&self) -> Codec {
        let default_type = if self.json_default {
            EncodeType::Json
        } else {
            EncodeType::Bincode
        };
        Codec::new(default_type, self.endian())
    }
}
