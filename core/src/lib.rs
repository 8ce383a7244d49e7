//! Rust IRC Client Core
//!
//! This crate provides the core functionality for a modular multi-network
//! IRC client: connection and protocol registries, dynamic command routing,
//! handshake sequencing, per-connection write throttling and event
//! dispatching. Protocol implementations plug in through the registry; the
//! default `irc` protocol lives in the companion protocols crate.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod router;
pub mod throttle;
pub mod transport;

pub use client::{Client, NetworkSpec};
pub use config::{
    ClientConfig, NetworkConfig, NickservConfig, SaslConfig, ThrottleSetting, DEFAULT_THROTTLE_MS,
};
pub use connection::{Connection, ConnectionRegistry, ReadyState};
pub use error::{Error, Result};
pub use events::{Event, EventDispatcher, EventKind, ListenerFn, ListenerId};
pub use handshake::{HandshakeSequencer, REQUESTED_CAPABILITIES};
pub use message::{reply_name, Message, MessageType, Prefix};
pub use protocol::{CommandFn, CommandFuture, Protocol, ProtocolRegistry, DEFAULT_PROTOCOL};
pub use router::{Arg, CommandArgs, CompletionFn};
pub use throttle::RateLimiter;
pub use transport::{Transport, TransportRead, TransportWrite};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use tracing::{debug, error, info, warn};
