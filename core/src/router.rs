//! Dynamic command routing
//!
//! Callers invoke protocol commands by name with a positional argument
//! list. By convention the final argument may be a completion callback and
//! the second-to-last a connection identifier; when the final argument is
//! not a callback it is itself the identifier candidate. The router only
//! peeks at these positions to pick a (protocol, connection) pair — the
//! command implementation always receives the original argument list.

use crate::{Client, Result};
use std::fmt;
use std::sync::Arc;

/// Completion callback passed as the final positional argument
pub type CompletionFn = Arc<dyn Fn() + Send + Sync>;

/// One positional command argument
#[derive(Clone)]
pub enum Arg {
    /// Text argument (also used for connection identifiers)
    Text(String),
    /// List argument, e.g. a capability set
    List(Vec<String>),
    /// Completion callback
    Callback(CompletionFn),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => write!(f, "Text({:?})", s),
            Arg::List(items) => write!(f, "List({:?})", items),
            Arg::Callback(_) => write!(f, "Callback(..)"),
        }
    }
}

/// Positional argument list for a dynamic command invocation
#[derive(Debug, Clone, Default)]
pub struct CommandArgs {
    items: Vec<Arg>,
}

impl CommandArgs {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a text argument
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.items.push(Arg::Text(value.into()));
        self
    }

    /// Append a list argument
    pub fn arg_list<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.items
            .push(Arg::List(values.into_iter().map(Into::into).collect()));
        self
    }

    /// Append a completion callback
    pub fn arg_callback<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.items.push(Arg::Callback(Arc::new(f)));
        self
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Text argument at a position
    pub fn text_at(&self, index: usize) -> Option<&str> {
        match self.items.get(index) {
            Some(Arg::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// List argument at a position
    pub fn list_at(&self, index: usize) -> Option<&[String]> {
        match self.items.get(index) {
            Some(Arg::List(items)) => Some(items),
            _ => None,
        }
    }

    /// All text arguments, in order
    pub fn texts(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|arg| match arg {
                Arg::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Completion callback, when the final argument is one
    pub fn last_callback(&self) -> Option<CompletionFn> {
        match self.items.last() {
            Some(Arg::Callback(f)) => Some(f.clone()),
            _ => None,
        }
    }

    /// Connection identifier candidate per the routing convention
    ///
    /// The final argument, or the one before it when the final argument is
    /// a callback. A non-text candidate yields `None` (default protocol).
    pub fn connection_hint(&self) -> Option<&str> {
        let mut iter = self.items.iter().rev();
        let last = iter.next()?;
        let candidate = if matches!(last, Arg::Callback(_)) {
            iter.next()?
        } else {
            last
        };
        match candidate {
            Arg::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Resolve and run a command invocation
///
/// `direct` bypasses the handshake gate; it is reserved for the handshake
/// sequencer, whose commands must reach the transport while the connection
/// is still handshaking. Ordinary invocations addressed to a connection
/// that is connecting or handshaking are deferred and replayed, in order,
/// once the connection is ready.
pub(crate) async fn dispatch(
    client: &Client,
    command: &str,
    args: CommandArgs,
    direct: bool,
) -> Result<()> {
    let hint = args.connection_hint().map(str::to_string);
    let protocol = client.connections().protocol_of(hint.as_deref());
    let handler = client.protocols().resolve_command(&protocol, command)?;

    if !direct {
        if let Some(conn) = hint.as_deref().and_then(|id| client.connections().lookup(id)) {
            if conn.is_gated() {
                tracing::debug!(
                    "[{}] deferring '{}' until the connection is ready",
                    conn.id(),
                    command
                );
                conn.defer(command, args);
                return Ok(());
            }
        }
    }

    tracing::debug!("routing '{}' via protocol '{}'", command, protocol);
    handler(client.clone(), args).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_is_last_argument() {
        let args = CommandArgs::new().arg("hello world").arg("2");
        assert_eq!(args.connection_hint(), Some("2"));
        assert!(args.last_callback().is_none());
    }

    #[test]
    fn test_hint_skips_trailing_callback() {
        let args = CommandArgs::new().arg("hello").arg("7").arg_callback(|| {});
        assert_eq!(args.connection_hint(), Some("7"));
        assert!(args.last_callback().is_some());
    }

    #[test]
    fn test_non_text_candidate_yields_none() {
        let args = CommandArgs::new().arg_list(["sasl"]);
        assert_eq!(args.connection_hint(), None);

        let args = CommandArgs::new().arg_callback(|| {});
        assert_eq!(args.connection_hint(), None);

        assert_eq!(CommandArgs::new().connection_hint(), None);
    }

    #[test]
    fn test_positional_accessors() {
        let args = CommandArgs::new()
            .arg("a")
            .arg_list(["x", "y"])
            .arg("b")
            .arg_callback(|| {});
        assert_eq!(args.len(), 4);
        assert_eq!(args.text_at(0), Some("a"));
        assert_eq!(args.text_at(1), None);
        assert_eq!(args.list_at(1), Some(&["x".to_string(), "y".to_string()][..]));
        assert_eq!(args.texts(), vec!["a", "b"]);
    }
}
