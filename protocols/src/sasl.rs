//! SASL authentication commands for the irc protocol
//!
//! Implements the client side of PLAIN: mechanism selection followed by a
//! single base64 credential payload (or `+` for an anonymous login).

use crate::irc::{deliver_handshake, trailing_id_consumed};
use base64::{engine::general_purpose, Engine as _};
use rustircc_core::{Client, CommandArgs, Error, Result, DEFAULT_PROTOCOL};

pub(crate) fn register(client: &Client) {
    client.define(DEFAULT_PROTOCOL, "sasl_mechanism", cmd_mechanism);
    client.define(DEFAULT_PROTOCOL, "sasl_login", cmd_login);
}

async fn cmd_mechanism(client: Client, args: CommandArgs) -> Result<()> {
    let mechanism = args
        .text_at(0)
        .ok_or_else(|| Error::Config("sasl_mechanism requires a mechanism".to_string()))?;
    let line = format!("AUTHENTICATE {}", mechanism);
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_login(client: Client, args: CommandArgs) -> Result<()> {
    let mut credentials = args.texts();
    if trailing_id_consumed(&client, &args) {
        credentials.pop();
    }
    let line = match credentials.as_slice() {
        [account, password] => format!("AUTHENTICATE {}", plain_payload(account, password)),
        [] => "AUTHENTICATE +".to_string(),
        _ => {
            return Err(Error::Config(
                "sasl_login requires an account and password".to_string(),
            ))
        }
    };
    deliver_handshake(&client, &args, &line);
    Ok(())
}

/// PLAIN payload: base64 of `authzid NUL authcid NUL password`
fn plain_payload(account: &str, password: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}\0{}\0{}", account, account, password))
}
