//! Connection handling and management
//!
//! The registry is the single source of truth for open connections and
//! identifier assignment. Each connection owns its transport exclusively:
//! the write half lives in a writer task fed by an unbounded channel and
//! paced by the connection's rate limiter, the read half in the protocol's
//! read loop.

use crate::config::NetworkConfig;
use crate::protocol::DEFAULT_PROTOCOL;
use crate::router::CommandArgs;
use crate::throttle::RateLimiter;
use crate::transport::TransportWrite;
use crate::{Client, Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Registered, transport not yet open
    Configured,
    /// Transport dial in flight
    Connecting,
    /// Capability negotiation/authentication/registration in flight
    Handshaking,
    /// Registration complete, ordinary commands accepted
    Ready,
    /// Transport gone; reconnect re-enters `Configured`
    Closed,
}

/// One live transport session to a server
#[derive(Debug)]
pub struct Connection {
    id: String,
    protocol: String,
    config: NetworkConfig,
    state: RwLock<ReadyState>,
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Lines submitted while the connection was not yet ready
    pending: Mutex<Vec<String>>,
    /// Invocations deferred by the router until the connection is ready
    deferred: Mutex<Vec<(String, CommandArgs)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn new(id: String, protocol: String, config: NetworkConfig) -> Self {
        Self {
            id,
            protocol,
            config,
            state: RwLock::new(ReadyState::Configured),
            writer: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connection identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol name this connection speaks
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Resolved network configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReadyState {
        *self.state.read()
    }

    /// Set the lifecycle state
    pub fn set_state(&self, state: ReadyState) {
        *self.state.write() = state;
    }

    /// Whether ordinary invocations must be held back for the handshake
    pub fn is_gated(&self) -> bool {
        matches!(
            self.state(),
            ReadyState::Connecting | ReadyState::Handshaking
        )
    }

    /// Whether the transport is open or being opened
    pub fn is_open(&self) -> bool {
        matches!(
            self.state(),
            ReadyState::Connecting | ReadyState::Handshaking | ReadyState::Ready
        )
    }

    /// Attach the transport write half, spawning the paced writer task
    pub fn attach_writer(&self, write: Box<dyn TransportWrite>, limiter: RateLimiter) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.writer.lock() = Some(tx);
        let id = self.id.clone();
        self.track_task(tokio::spawn(write_loop(write, rx, limiter, id)));
    }

    /// Keep a task handle for cancellation on close
    pub fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Queue a line for the transport, holding it back until ready
    ///
    /// Lines queued before the connection reaches `Ready` are flushed, in
    /// order, ahead of any deferred invocations.
    pub fn enqueue(&self, line: &str) {
        match self.state() {
            ReadyState::Ready => self.enqueue_handshake(line),
            ReadyState::Closed => {
                tracing::warn!("[{}] dropping write to closed connection", self.id);
            }
            _ => self.pending.lock().push(line.to_string()),
        }
    }

    /// Queue a line for the transport regardless of handshake state
    ///
    /// Used by the handshake sequencer's own commands and by protocol
    /// housekeeping (PING replies) that must not wait for readiness.
    pub fn enqueue_handshake(&self, line: &str) {
        let writer = self.writer.lock();
        match writer.as_ref() {
            Some(tx) => {
                if tx.send(line.to_string()).is_err() {
                    tracing::warn!("[{}] writer task gone, dropping write", self.id);
                }
            }
            None => {
                tracing::warn!("[{}] no transport attached, dropping write", self.id);
            }
        }
    }

    /// Defer a router invocation until the connection is ready
    pub(crate) fn defer(&self, command: &str, args: CommandArgs) {
        self.deferred.lock().push((command.to_string(), args));
    }

    /// Transition to `Ready`, flushing pending lines and replaying deferred
    /// invocations in submission order
    pub fn mark_ready(&self, client: &Client) {
        {
            let mut state = self.state.write();
            if *state != ReadyState::Handshaking {
                return;
            }
            *state = ReadyState::Ready;
        }

        let pending: Vec<String> = std::mem::take(&mut *self.pending.lock());
        for line in pending {
            self.enqueue_handshake(&line);
        }

        let deferred: Vec<(String, CommandArgs)> = std::mem::take(&mut *self.deferred.lock());
        if !deferred.is_empty() {
            let client = client.clone();
            let id = self.id.clone();
            tokio::spawn(async move {
                for (command, args) in deferred {
                    if let Err(e) = client.invoke_direct(&command, args).await {
                        tracing::warn!("[{}] deferred '{}' failed: {}", id, command, e);
                    }
                }
            });
        }
    }

    /// Move to `Closed`; returns whether this call did the transition
    pub fn transition_closed(&self) -> bool {
        let mut state = self.state.write();
        if *state == ReadyState::Closed {
            false
        } else {
            *state = ReadyState::Closed;
            true
        }
    }

    /// Drop the writer, cancel tasks and clear pending state
    pub fn close(&self) {
        self.transition_closed();
        *self.writer.lock() = None;
        self.pending.lock().clear();
        self.deferred.lock().clear();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn write_loop(
    mut write: Box<dyn TransportWrite>,
    mut rx: mpsc::UnboundedReceiver<String>,
    mut limiter: RateLimiter,
    id: String,
) {
    while let Some(line) = rx.recv().await {
        limiter.acquire().await;
        tracing::debug!("[{}] -> {}", id, line);
        let framed = format!("{}\r\n", line);
        if let Err(e) = write.write_all(framed.as_bytes()).await {
            tracing::warn!("[{}] write failed: {}", id, e);
            break;
        }
    }
}

/// Single source of truth for open connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    /// Identifiers in registration order, for broadcasts
    order: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, assigning its identifier
    ///
    /// A caller-supplied `config.name` becomes the identifier and collides
    /// with a `DuplicateId` error; otherwise the next free sequential
    /// numeric string is assigned.
    pub fn register(&self, protocol: &str, config: NetworkConfig) -> Result<Arc<Connection>> {
        let id = match config.name.clone().filter(|name| !name.is_empty()) {
            Some(name) => {
                if self.connections.contains_key(&name) {
                    return Err(Error::DuplicateId(name));
                }
                name
            }
            None => loop {
                let candidate = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
                if !self.connections.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let conn = Arc::new(Connection::new(id.clone(), protocol.to_string(), config));
        match self.connections.entry(id.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(conn.clone());
            }
        }
        self.order.lock().push(id.clone());
        tracing::debug!("registered connection '{}' (protocol '{}')", id, protocol);
        Ok(conn)
    }

    /// Look up a connection by identifier
    pub fn lookup(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Protocol name of a connection, defaulting for unrecognized ids
    ///
    /// The fallback lets commands addressed to a not-yet-registered id
    /// still resolve a protocol; it must never be used to silently succeed
    /// on writes to a nonexistent connection.
    pub fn protocol_of(&self, id: Option<&str>) -> String {
        id.and_then(|id| self.lookup(id))
            .map(|conn| conn.protocol().to_string())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string())
    }

    /// Detach a connection; does not close its transport
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            self.order.lock().retain(|existing| existing != id);
        }
        removed
    }

    /// Identifiers in registration order
    pub fn ids(&self) -> Vec<String> {
        self.order.lock().clone()
    }

    /// Connections in registration order
    pub fn connections_in_order(&self) -> Vec<Arc<Connection>> {
        self.ids()
            .iter()
            .filter_map(|id| self.lookup(id))
            .collect()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn config_named(name: Option<&str>) -> NetworkConfig {
        NetworkConfig {
            host: "irc.example.org".to_string(),
            name: name.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_sequential_identifier_assignment() {
        let registry = ConnectionRegistry::new();
        for expected in ["0", "1", "2"] {
            let conn = registry.register("irc", config_named(None)).unwrap();
            assert_eq!(conn.id(), expected);
        }
        assert_eq!(registry.ids(), vec!["0", "1", "2"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let registry = ConnectionRegistry::new();
        registry.register("irc", config_named(Some("home"))).unwrap();
        let err = registry
            .register("irc", config_named(Some("home")))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateId(name) if name == "home"));
        // The original connection is untouched
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_auto_ids_skip_taken_names() {
        let registry = ConnectionRegistry::new();
        registry.register("irc", config_named(Some("0"))).unwrap();
        let conn = registry.register("irc", config_named(None)).unwrap();
        assert_eq!(conn.id(), "1");
    }

    #[test]
    fn test_protocol_of_defaults_for_unknown_ids() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.protocol_of(Some("nope")), "irc");
        assert_eq!(registry.protocol_of(None), "irc");

        registry
            .register("matrix", config_named(Some("m")))
            .unwrap();
        assert_eq!(registry.protocol_of(Some("m")), "matrix");
    }

    #[test]
    fn test_remove_detaches_only() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register("irc", config_named(None)).unwrap();
        conn.set_state(ReadyState::Ready);

        let removed = registry.remove("0").unwrap();
        assert_eq!(removed.state(), ReadyState::Ready);
        assert!(registry.lookup("0").is_none());
        assert!(registry.ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_frames_lines_with_crlf() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register("irc", config_named(None)).unwrap();
        let (local, mut remote) = tokio::io::duplex(1024);
        let (_, write) = tokio::io::split(local);
        conn.attach_writer(Box::new(write), RateLimiter::new(None));
        conn.set_state(ReadyState::Ready);

        conn.enqueue("NICK alice");
        conn.enqueue("USER alice 0 * :alice");

        let mut buf = vec![0u8; 64];
        let mut collected = String::new();
        while !collected.ends_with(":alice\r\n") {
            let n = remote.read(&mut buf).await.unwrap();
            collected.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        assert_eq!(collected, "NICK alice\r\nUSER alice 0 * :alice\r\n");
        conn.close();
    }

    #[test]
    fn test_pending_lines_buffer_while_gated() {
        let registry = ConnectionRegistry::new();
        let conn = registry.register("irc", config_named(None)).unwrap();
        conn.set_state(ReadyState::Handshaking);
        conn.enqueue("PRIVMSG #chan :early");
        assert_eq!(conn.pending.lock().len(), 1);

        conn.close();
        assert!(conn.pending.lock().is_empty());
        assert_eq!(conn.state(), ReadyState::Closed);
    }
}
