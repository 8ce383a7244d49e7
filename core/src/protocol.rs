//! Protocol registry for pluggable protocol implementations
//!
//! A protocol contributes a configuration-normalization function, a
//! connection-setup function and a table of named commands. Command tables
//! are open: plugins register commands at load time and later registrations
//! silently replace earlier ones, which is what lets layered plugins
//! override built-in command implementations.

use crate::{Client, CommandArgs, Error, NetworkConfig, Result, Transport};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Name of the protocol used when none is specified
pub const DEFAULT_PROTOCOL: &str = "irc";

/// Boxed future returned by command executables
pub type CommandFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
/// A named command executable, bound to the owning client at call time
pub type CommandFn = Arc<dyn Fn(Client, CommandArgs) -> CommandFuture + Send + Sync>;

/// Configuration-normalization and connection-setup hooks of a protocol
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Normalize a network configuration, applying protocol defaults
    ///
    /// `short_form` carries the host part of a shorthand like
    /// `"irc://host:port"` when the network was added as a plain string.
    fn parse(&self, config: NetworkConfig, short_form: Option<&str>) -> Result<NetworkConfig>;

    /// Open a live transport for a parsed configuration
    async fn setup(&self, client: &Client, config: &NetworkConfig) -> Result<Transport>;
}

#[derive(Default)]
struct ProtocolEntry {
    handler: Option<Arc<dyn Protocol>>,
    commands: HashMap<String, CommandFn>,
}

/// Maps protocol names to their descriptors and command tables
#[derive(Default)]
pub struct ProtocolRegistry {
    protocols: RwLock<HashMap<String, ProtocolEntry>>,
}

impl ProtocolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a protocol descriptor
    pub fn register(&self, name: &str, protocol: Arc<dyn Protocol>) {
        let mut protocols = self.protocols.write();
        protocols.entry(name.to_string()).or_default().handler = Some(protocol);
    }

    /// Register a command under a protocol, creating the protocol entry on
    /// first use; re-registration overwrites silently
    pub fn define(&self, protocol: &str, command: &str, f: CommandFn) {
        let mut protocols = self.protocols.write();
        protocols
            .entry(protocol.to_string())
            .or_default()
            .commands
            .insert(command.to_string(), f);
    }

    /// Resolve a protocol descriptor
    pub fn resolve_protocol(&self, name: &str) -> Result<Arc<dyn Protocol>> {
        self.protocols
            .read()
            .get(name)
            .and_then(|entry| entry.handler.clone())
            .ok_or_else(|| Error::UnknownProtocol(name.to_string()))
    }

    /// Resolve a command executable for a protocol
    pub fn resolve_command(&self, protocol: &str, command: &str) -> Result<CommandFn> {
        let protocols = self.protocols.read();
        let entry = protocols
            .get(protocol)
            .ok_or_else(|| Error::UnknownProtocol(protocol.to_string()))?;
        entry
            .commands
            .get(command)
            .cloned()
            .ok_or_else(|| Error::UnknownCommand {
                protocol: protocol.to_string(),
                command: command.to_string(),
            })
    }

    /// Whether a protocol name has a registered descriptor
    pub fn is_registered(&self, name: &str) -> bool {
        self.protocols
            .read()
            .get(name)
            .map(|entry| entry.handler.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_command(counter: Arc<AtomicUsize>, amount: usize) -> CommandFn {
        Arc::new(move |_, _| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(amount, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_define_and_resolve() {
        let registry = ProtocolRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.define("irc", "ping", counting_command(counter.clone(), 1));

        let handler = registry.resolve_command("irc", "ping").unwrap();
        handler(Client::new(), CommandArgs::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redefine_overwrites_silently() {
        let registry = ProtocolRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        registry.define("irc", "ping", counting_command(counter.clone(), 1));
        registry.define("irc", "ping", counting_command(counter.clone(), 10));

        let handler = registry.resolve_command("irc", "ping").unwrap();
        handler(Client::new(), CommandArgs::new()).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_unknown_command_and_protocol() {
        let registry = ProtocolRegistry::new();
        registry.define("irc", "ping", Arc::new(|_, _| Box::pin(async { Ok(()) })));

        assert!(matches!(
            registry.resolve_command("irc", "nope"),
            Err(Error::UnknownCommand { .. })
        ));
        assert!(matches!(
            registry.resolve_command("xmpp", "ping"),
            Err(Error::UnknownProtocol(_))
        ));
        assert!(matches!(
            registry.resolve_protocol("irc"),
            Err(Error::UnknownProtocol(_))
        ));
    }
}
