//! Event dispatching for inbound occurrences
//!
//! Listeners can be registered for all connections or scoped to a single
//! connection identifier. Delivery is in registration order and a failing
//! listener never prevents delivery to the listeners after it.

use crate::Message;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Kind of an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Parsed inbound message
    Data,
    /// The read stream ended
    Disconnect,
    /// TLS certificate/authorization failure
    SslError,
    /// Server acknowledged a capability
    CapAck,
    /// Server rejected a capability
    CapNak,
    /// Asynchronous transport-level failure
    Error,
}

/// One inbound occurrence, tagged with its originating connection
#[derive(Debug, Clone)]
pub struct Event {
    /// Event kind
    pub kind: EventKind,
    /// Originating connection identifier
    pub connection: String,
    /// Parsed message payload, opaque to the router
    pub payload: Option<Message>,
    /// Capability named by a CAP ACK/NAK
    pub capability: Option<String>,
    /// Error description for ssl-error/error events
    pub error: Option<String>,
    /// Channel the payload addressed, for reply helpers
    pub channel: Option<String>,
    /// User the payload came from, for reply helpers
    pub user: Option<String>,
}

impl Event {
    fn bare(kind: EventKind, connection: &str) -> Self {
        Self {
            kind,
            connection: connection.to_string(),
            payload: None,
            capability: None,
            error: None,
            channel: None,
            user: None,
        }
    }

    /// Parsed inbound message event
    pub fn data(connection: &str, payload: Message) -> Self {
        Self {
            payload: Some(payload),
            ..Self::bare(EventKind::Data, connection)
        }
    }

    /// Connection closed event
    pub fn disconnect(connection: &str) -> Self {
        Self::bare(EventKind::Disconnect, connection)
    }

    /// TLS failure event
    pub fn ssl_error(connection: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(EventKind::SslError, connection)
        }
    }

    /// Capability acknowledgement event
    pub fn cap_ack(connection: &str, capability: impl Into<String>) -> Self {
        Self {
            capability: Some(capability.into()),
            ..Self::bare(EventKind::CapAck, connection)
        }
    }

    /// Capability rejection event
    pub fn cap_nak(connection: &str, capability: impl Into<String>) -> Self {
        Self {
            capability: Some(capability.into()),
            ..Self::bare(EventKind::CapNak, connection)
        }
    }

    /// Generic transport failure event
    pub fn error(connection: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(EventKind::Error, connection)
        }
    }
}

/// Boxed future returned by event listeners
pub type ListenerFuture = Pin<Box<dyn Future<Output = crate::Result<()>> + Send>>;
/// Boxed event listener
pub type ListenerFn = Arc<dyn Fn(Event) -> ListenerFuture + Send + Sync>;
type FilterFn = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Handle for unsubscribing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(Uuid);

struct ListenerEntry {
    id: ListenerId,
    scope: Option<String>,
    kind: EventKind,
    once: bool,
    fired: AtomicBool,
    filter: Option<FilterFn>,
    handler: ListenerFn,
}

/// Fans inbound events out to registered listeners
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(
        &self,
        scope: Option<String>,
        kind: EventKind,
        once: bool,
        filter: Option<FilterFn>,
        handler: ListenerFn,
    ) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.write().push(ListenerEntry {
            id,
            scope,
            kind,
            once,
            fired: AtomicBool::new(false),
            filter,
            handler,
        });
        id
    }

    /// Register a listener receiving events from every connection
    pub fn on<F, Fut>(&self, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.subscribe(None, kind, false, None, wrap(f))
    }

    /// Register a listener scoped to one connection identifier
    pub fn on_connection<F, Fut>(&self, connection: &str, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.subscribe(Some(connection.to_string()), kind, false, None, wrap(f))
    }

    /// Register a one-shot listener, removed after its first delivery
    pub fn once<F, Fut>(&self, connection: Option<&str>, kind: EventKind, f: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        self.subscribe(connection.map(str::to_string), kind, true, None, wrap(f))
    }

    /// Wait for the first matching event
    ///
    /// The subscription is removed after the first delivery. Dropping the
    /// subscription (for example when a connection closes and its scoped
    /// listeners are removed) makes the receiver resolve with an error.
    pub fn wait_for<F>(
        &self,
        connection: Option<&str>,
        kind: EventKind,
        filter: F,
    ) -> oneshot::Receiver<Event>
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let handler: ListenerFn = Arc::new(move |event| {
            let slot = slot.clone();
            Box::pin(async move {
                if let Some(tx) = slot.lock().take() {
                    let _ = tx.send(event);
                }
                Ok(())
            })
        });
        self.subscribe(
            connection.map(str::to_string),
            kind,
            true,
            Some(Arc::new(filter)),
            handler,
        );
        rx
    }

    /// Remove a listener by id
    pub fn off(&self, id: ListenerId) {
        self.listeners.write().retain(|entry| entry.id != id);
    }

    /// Remove every listener scoped to the given connection identifier
    pub fn remove_connection(&self, connection: &str) {
        self.listeners
            .write()
            .retain(|entry| entry.scope.as_deref() != Some(connection));
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every matching listener in registration order
    pub async fn emit(&self, event: Event) {
        let mut to_run: Vec<(ListenerId, ListenerFn)> = Vec::new();
        let mut fired_once: Vec<ListenerId> = Vec::new();
        {
            let listeners = self.listeners.read();
            for entry in listeners.iter() {
                if entry.kind != event.kind {
                    continue;
                }
                if let Some(scope) = &entry.scope {
                    if scope != &event.connection {
                        continue;
                    }
                }
                if let Some(filter) = &entry.filter {
                    if !filter(&event) {
                        continue;
                    }
                }
                if entry.once {
                    if entry.fired.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    fired_once.push(entry.id);
                }
                to_run.push((entry.id, entry.handler.clone()));
            }
        }

        for (id, handler) in to_run {
            if let Err(e) = handler(event.clone()).await {
                tracing::warn!("event listener {:?} failed: {}", id, e);
            }
        }

        if !fired_once.is_empty() {
            self.listeners
                .write()
                .retain(|entry| !fired_once.contains(&entry.id));
        }
    }
}

fn wrap<F, Fut>(f: F) -> ListenerFn
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)) as ListenerFuture)
}
