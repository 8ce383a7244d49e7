//! Multi-network client facade
//!
//! Owns the connection registry, protocol registry and event dispatcher by
//! composition and ties them together: adding networks, dynamic command
//! invocation, listener registration and the connection lifecycle
//! operations (disconnect, reconnect, remove).

use crate::config::{NetworkConfig, ThrottleSetting, DEFAULT_THROTTLE_MS};
use crate::connection::{Connection, ConnectionRegistry, ReadyState};
use crate::events::{Event, EventDispatcher, EventKind, ListenerId};
use crate::protocol::{Protocol, ProtocolRegistry, DEFAULT_PROTOCOL};
use crate::router::{self, CommandArgs};
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// A network to add: a plain host string or a full configuration
pub enum NetworkSpec {
    /// Host shorthand, optionally `protocol://host[:port]`
    Host(String),
    /// Full network configuration
    Config(NetworkConfig),
}

impl From<&str> for NetworkSpec {
    fn from(host: &str) -> Self {
        NetworkSpec::Host(host.to_string())
    }
}

impl From<String> for NetworkSpec {
    fn from(host: String) -> Self {
        NetworkSpec::Host(host)
    }
}

impl From<NetworkConfig> for NetworkSpec {
    fn from(config: NetworkConfig) -> Self {
        NetworkSpec::Config(config)
    }
}

fn split_scheme(s: &str) -> (Option<&str>, &str) {
    match s.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => (Some(scheme), rest),
        _ => (None, s),
    }
}

/// Multi-network chat client
///
/// Cheap to clone; clones share the same registries and dispatcher.
#[derive(Clone)]
pub struct Client {
    connections: Arc<ConnectionRegistry>,
    protocols: Arc<ProtocolRegistry>,
    events: Arc<EventDispatcher>,
    throttle_default: Option<Duration>,
}

impl Client {
    /// Create a client with default throttling enabled
    pub fn new() -> Self {
        Self::with_throttling(ThrottleSetting::Inherit)
    }

    /// Create a client with an explicit default throttle setting
    pub fn with_throttling(throttling: ThrottleSetting) -> Self {
        let base = Some(Duration::from_millis(DEFAULT_THROTTLE_MS));
        Self {
            connections: Arc::new(ConnectionRegistry::new()),
            protocols: Arc::new(ProtocolRegistry::new()),
            events: Arc::new(EventDispatcher::new()),
            throttle_default: throttling.resolve(base),
        }
    }

    /// Connection registry
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Protocol registry
    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    /// Event dispatcher
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Client-wide default throttle interval (`None` = disabled)
    pub fn throttle_default(&self) -> Option<Duration> {
        self.throttle_default
    }

    /// Register (or replace) a protocol descriptor
    pub fn register_protocol(&self, name: &str, protocol: Arc<dyn Protocol>) {
        self.protocols.register(name, protocol);
    }

    /// Register a command under a protocol; later registrations win
    pub fn define<F, Fut>(&self, protocol: &str, command: &str, f: F)
    where
        F: Fn(Client, CommandArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.protocols.define(
            protocol,
            command,
            Arc::new(move |client, args| {
                Box::pin(f(client, args)) as Pin<Box<dyn Future<Output = Result<()>> + Send>>
            }),
        );
    }

    /// Add a network and return its assigned connection identifier
    ///
    /// Accepts a host string (optionally `protocol://host[:port]`) or a
    /// configuration. The protocol's `parse` normalizes the configuration,
    /// then the connection is registered and its transport dialed in the
    /// background; readiness is signalled by the handshake completing.
    pub async fn add(&self, spec: impl Into<NetworkSpec>) -> Result<String> {
        let (config, short_form) = match spec.into() {
            NetworkSpec::Host(host) => {
                let (scheme, rest) = split_scheme(&host);
                let mut config = NetworkConfig::default();
                if let Some(scheme) = scheme {
                    config.protocol = scheme.to_string();
                }
                (config, Some(rest.to_string()))
            }
            NetworkSpec::Config(mut config) => {
                let host = config.host.clone();
                let (scheme, rest) = split_scheme(&host);
                if let Some(scheme) = scheme {
                    config.protocol = scheme.to_string();
                    config.host = rest.to_string();
                }
                (config, None)
            }
        };

        let protocol = if config.protocol.is_empty() {
            DEFAULT_PROTOCOL.to_string()
        } else {
            config.protocol.clone()
        };
        let descriptor = self.protocols.resolve_protocol(&protocol)?;
        let mut config = descriptor.parse(config, short_form.as_deref())?;
        config.protocol = protocol.clone();

        let conn = self.connections.register(&protocol, config)?;
        let id = conn.id().to_string();
        self.invoke("connect", CommandArgs::new().arg(&id)).await?;
        Ok(id)
    }

    /// Add several networks, returning their identifiers in order
    pub async fn add_many<I, S>(&self, specs: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<NetworkSpec>,
    {
        let mut ids = Vec::new();
        for spec in specs {
            ids.push(self.add(spec).await?);
        }
        Ok(ids)
    }

    /// Invoke a protocol command by name
    ///
    /// Routing follows the positional-argument convention described in
    /// [`CommandArgs`]; the command receives the arguments unchanged.
    pub async fn invoke(&self, command: &str, args: CommandArgs) -> Result<()> {
        router::dispatch(self, command, args, false).await
    }

    /// Invoke bypassing the handshake gate; sequencer use only
    pub(crate) async fn invoke_direct(&self, command: &str, args: CommandArgs) -> Result<()> {
        router::dispatch(self, command, args, true).await
    }

    /// Register a listener for events from every connection
    pub fn on<F, Fut>(&self, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.events.on(kind, f)
    }

    /// Register a listener scoped to one connection
    pub fn on_connection<F, Fut>(&self, connection: &str, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.events.on_connection(connection, kind, f)
    }

    /// Register a one-shot listener
    pub fn once<F, Fut>(&self, connection: Option<&str>, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.events.once(connection, kind, f)
    }

    /// Remove a listener
    pub fn off(&self, id: ListenerId) {
        self.events.off(id);
    }

    /// Wait for the first event matching a predicate
    pub fn wait_for<F>(
        &self,
        connection: Option<&str>,
        kind: EventKind,
        filter: F,
    ) -> oneshot::Receiver<Event>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.events.wait_for(connection, kind, filter)
    }

    /// Close a connection, cancelling its tasks and scoped listeners
    ///
    /// Emits a disconnect event if the connection was not already closed.
    /// The connection stays registered so it can be reconnected.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        let conn = self
            .connections
            .lookup(id)
            .ok_or_else(|| Error::Connection(format!("unknown connection '{}'", id)))?;
        if conn.transition_closed() {
            self.events.emit(Event::disconnect(id)).await;
        }
        self.events.remove_connection(id);
        conn.close();
        Ok(())
    }

    /// Close and re-open a connection, preserving its id and configuration
    pub async fn reconnect(&self, id: &str) -> Result<()> {
        let conn = self
            .connections
            .lookup(id)
            .ok_or_else(|| Error::Connection(format!("unknown connection '{}'", id)))?;
        self.disconnect(id).await?;
        conn.set_state(ReadyState::Configured);
        self.invoke("connect", CommandArgs::new().arg(id)).await
    }

    /// Detach a connection from the registry without closing its transport
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.remove(id)
    }

    /// Connection identifiers in registration order
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.ids()
    }

    /// Write a raw line; without an identifier it broadcasts to every open
    /// connection
    pub async fn write(&self, line: &str, connection: Option<&str>) -> Result<()> {
        let mut args = CommandArgs::new().arg(line);
        if let Some(id) = connection {
            args = args.arg(id);
        }
        self.invoke("write", args).await
    }

    /// Send a message to a channel or user
    pub async fn send(&self, target: &str, text: &str, connection: Option<&str>) -> Result<()> {
        let mut args = CommandArgs::new().arg(target).arg(text);
        if let Some(id) = connection {
            args = args.arg(id);
        }
        self.invoke("send", args).await
    }

    /// Join a channel
    pub async fn join(&self, channel: &str, connection: Option<&str>) -> Result<()> {
        let mut args = CommandArgs::new().arg(channel);
        if let Some(id) = connection {
            args = args.arg(id);
        }
        self.invoke("join", args).await
    }

    /// Reply to the channel or user an event came from
    pub async fn reply(&self, event: &Event, text: &str) -> Result<()> {
        self.reply_with("send", event, text).await
    }

    /// Reply with a notice
    pub async fn reply_notice(&self, event: &Event, text: &str) -> Result<()> {
        self.reply_with("notice", event, text).await
    }

    /// Reply with a CTCP action
    pub async fn reply_action(&self, event: &Event, text: &str) -> Result<()> {
        self.reply_with("action", event, text).await
    }

    async fn reply_with(&self, action: &str, event: &Event, text: &str) -> Result<()> {
        let target = event
            .channel
            .clone()
            .or_else(|| event.user.clone())
            .ok_or_else(|| Error::Config("event has no reply target".to_string()))?;
        self.invoke(
            action,
            CommandArgs::new()
                .arg(target)
                .arg(text)
                .arg(event.connection.clone()),
        )
        .await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("irc://host:6667"), (Some("irc"), "host:6667"));
        assert_eq!(split_scheme("host"), (None, "host"));
        assert_eq!(split_scheme("://host"), (None, "://host"));
    }

    #[tokio::test]
    async fn test_add_unknown_protocol_fails_synchronously() {
        let client = Client::new();
        let err = client.add("xmpp://irc.example.org").await.unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol(name) if name == "xmpp"));
        assert!(client.connections().is_empty());
    }

    #[test]
    fn test_throttle_defaults() {
        let client = Client::new();
        assert_eq!(
            client.throttle_default(),
            Some(Duration::from_millis(DEFAULT_THROTTLE_MS))
        );

        let client = Client::with_throttling(ThrottleSetting::Flag(false));
        assert_eq!(client.throttle_default(), None);

        let client = Client::with_throttling(ThrottleSetting::IntervalMs(100));
        assert_eq!(client.throttle_default(), Some(Duration::from_millis(100)));
    }
}
