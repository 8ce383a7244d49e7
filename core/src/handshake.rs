//! Connection handshake sequencing
//!
//! Drives a newly-connected session through capability negotiation,
//! optional SASL authentication and registration, then marks the
//! connection ready. Every step is a command dispatched through the
//! router, so protocol plugins supply the actual wire formats.

use crate::events::EventKind;
use crate::router::CommandArgs;
use crate::{Client, Error, ReadyState, Result};

/// Capability set requested on every connection
pub const REQUESTED_CAPABILITIES: [&str; 4] =
    ["account-notify", "away-notify", "extended-join", "sasl"];

/// Drives the post-connect command sequence for one connection
pub struct HandshakeSequencer {
    client: Client,
    id: String,
}

impl HandshakeSequencer {
    /// Create a sequencer for a registered connection
    pub fn new(client: Client, id: impl Into<String>) -> Self {
        Self {
            client,
            id: id.into(),
        }
    }

    /// Run the handshake to completion
    ///
    /// When SASL credentials are configured, execution suspends until the
    /// server acknowledges the `sasl` capability; no timeout is imposed
    /// here. No step is retried. Closing the connection drops the
    /// acknowledgement waiter, which ends the sequencer quietly.
    pub async fn run(self) -> Result<()> {
        let conn = self
            .client
            .connections()
            .lookup(&self.id)
            .ok_or_else(|| Error::Connection(format!("unknown connection '{}'", self.id)))?;
        conn.set_state(ReadyState::Handshaking);
        let config = conn.config().clone();
        let id = self.id.clone();

        if let Some(pass) = &config.password {
            self.command("pass", CommandArgs::new().arg(pass).arg(&id))
                .await?;
        }

        // The waiter must be in place before the request goes out, or a
        // fast acknowledgement could slip past it.
        let sasl_ack = config.sasl.as_ref().map(|_| {
            self.client
                .events()
                .wait_for(Some(id.as_str()), EventKind::CapAck, |event| {
                    event.capability.as_deref() == Some("sasl")
                })
        });

        tracing::debug!("[{}] negotiating capabilities", id);
        self.command(
            "cap_req",
            CommandArgs::new().arg_list(REQUESTED_CAPABILITIES).arg(&id),
        )
        .await?;

        if let (Some(ack), Some(sasl)) = (sasl_ack, config.sasl.as_ref()) {
            tracing::debug!("[{}] waiting for sasl acknowledgement", id);
            if ack.await.is_err() {
                tracing::debug!("[{}] closed during capability negotiation", id);
                return Ok(());
            }

            tracing::debug!("[{}] authenticating", id);
            self.command("sasl_mechanism", CommandArgs::new().arg("PLAIN").arg(&id))
                .await?;
            let login = match (sasl.account.as_deref(), sasl.password.as_deref()) {
                (Some(account), Some(password)) => {
                    CommandArgs::new().arg(account).arg(password).arg(&id)
                }
                (None, Some(password)) => CommandArgs::new()
                    .arg(&config.username)
                    .arg(password)
                    .arg(&id),
                _ => CommandArgs::new().arg(&id),
            };
            self.command("sasl_login", login).await?;
        }

        self.command("cap_end", CommandArgs::new().arg(&id)).await?;

        tracing::debug!("[{}] registering as '{}'", id, config.nick);
        self.command("nick", CommandArgs::new().arg(&config.nick).arg(&id))
            .await?;
        self.command(
            "user",
            CommandArgs::new()
                .arg(&config.username)
                .arg(&config.realname)
                .arg(&id),
        )
        .await?;

        if let Some(nickserv) = &config.nickserv {
            match (nickserv.username.as_deref(), nickserv.password.as_deref()) {
                (Some(username), Some(password)) => {
                    self.command(
                        "identify",
                        CommandArgs::new().arg(username).arg(password).arg(&id),
                    )
                    .await?;
                }
                (None, Some(password)) => {
                    self.command("identify", CommandArgs::new().arg(password).arg(&id))
                        .await?;
                }
                _ => {}
            }
        }

        conn.mark_ready(&self.client);
        tracing::info!("[{}] connection ready", id);
        Ok(())
    }

    async fn command(&self, name: &str, args: CommandArgs) -> Result<()> {
        self.client.invoke_direct(name, args).await
    }
}
