//! Default IRC protocol plugin
//!
//! Registers the `irc` protocol descriptor and its command table into a
//! client. The read loop parses inbound lines, answers PINGs, surfaces
//! capability acknowledgements and feeds data events to the dispatcher.

use rand::Rng;
use rustircc_core::transport::{connect_tcp, connect_tls};
use rustircc_core::{
    async_trait, Client, CommandArgs, Connection, Error, Event, HandshakeSequencer, Message,
    MessageType, NetworkConfig, Prefix, Protocol, RateLimiter, ReadyState, Result, Transport,
    TransportRead, DEFAULT_PROTOCOL,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// The default line-oriented chat protocol
pub struct IrcProtocol;

#[async_trait]
impl Protocol for IrcProtocol {
    fn parse(&self, mut config: NetworkConfig, short_form: Option<&str>) -> Result<NetworkConfig> {
        if let Some(short) = short_form {
            // host[:port] shorthand
            let with_port = short
                .rsplit_once(':')
                .and_then(|(host, port)| port.parse::<u16>().ok().map(|port| (host, port)));
            match with_port {
                Some((host, port)) => {
                    config.host = host.to_string();
                    config.port = port;
                }
                None => config.host = short.to_string(),
            }
        }

        if config.host.is_empty() {
            return Err(Error::Config("host is required".to_string()));
        }
        if config.nick.is_empty() {
            config.nick = format!("rustircc{}", rand::thread_rng().gen_range(0..100_000));
        }
        if config.port == 0 {
            config.port = if config.tls { 6697 } else { 6667 };
        }
        if config.username.is_empty() {
            config.username = config.nick.clone();
        }
        if config.realname.is_empty() {
            config.realname = config.nick.clone();
        }
        Ok(config)
    }

    async fn setup(&self, _client: &Client, config: &NetworkConfig) -> Result<Transport> {
        if config.tls {
            connect_tls(&config.host, config.port, config.tls_allow_invalid).await
        } else {
            connect_tcp(&config.host, config.port).await
        }
    }
}

/// Register the irc protocol and its commands into a client
pub fn register(client: &Client) {
    client.register_protocol(DEFAULT_PROTOCOL, Arc::new(IrcProtocol));

    client.define(DEFAULT_PROTOCOL, "connect", cmd_connect);
    client.define(DEFAULT_PROTOCOL, "write", cmd_write);
    client.define(DEFAULT_PROTOCOL, "pass", cmd_pass);
    client.define(DEFAULT_PROTOCOL, "nick", cmd_nick);
    client.define(DEFAULT_PROTOCOL, "user", cmd_user);
    client.define(DEFAULT_PROTOCOL, "cap_req", cmd_cap_req);
    client.define(DEFAULT_PROTOCOL, "cap_end", cmd_cap_end);
    client.define(DEFAULT_PROTOCOL, "identify", cmd_identify);
    client.define(DEFAULT_PROTOCOL, "send", cmd_send);
    client.define(DEFAULT_PROTOCOL, "notice", cmd_notice);
    client.define(DEFAULT_PROTOCOL, "action", cmd_action);
    client.define(DEFAULT_PROTOCOL, "join", cmd_join);
    client.define(DEFAULT_PROTOCOL, "part", cmd_part);
    client.define(DEFAULT_PROTOCOL, "quit", cmd_quit);

    crate::sasl::register(client);
    tracing::debug!("irc protocol registered");
}

/// Resolve the addressed connection, when the trailing identifier names one
fn route_target(client: &Client, args: &CommandArgs) -> Option<Arc<Connection>> {
    args.connection_hint()
        .and_then(|id| client.connections().lookup(id))
}

/// Queue a line on the addressed connection, or broadcast it to every open
/// connection when the identifier is omitted or unrecognized
fn deliver(client: &Client, args: &CommandArgs, line: &str) {
    match route_target(client, args) {
        Some(conn) => conn.enqueue(line),
        None => {
            for conn in client.connections().connections_in_order() {
                if conn.is_open() {
                    conn.enqueue(line);
                }
            }
        }
    }
    if let Some(done) = args.last_callback() {
        done();
    }
}

/// Like [`deliver`], but addressed sends skip the readiness gate
///
/// Handshake-era commands are dispatched by the sequencer while the
/// connection is still handshaking; their writes must reach the transport
/// immediately (still paced by the rate limiter).
pub(crate) fn deliver_handshake(client: &Client, args: &CommandArgs, line: &str) {
    match args
        .connection_hint()
        .and_then(|id| client.connections().lookup(id))
    {
        Some(conn) => conn.enqueue_handshake(line),
        None => {
            for conn in client.connections().connections_in_order() {
                if conn.is_open() {
                    conn.enqueue(line);
                }
            }
        }
    }
    if let Some(done) = args.last_callback() {
        done();
    }
}

/// Whether the trailing argument names a known connection (and is therefore
/// not a positional credential/parameter)
pub(crate) fn trailing_id_consumed(client: &Client, args: &CommandArgs) -> bool {
    args.connection_hint()
        .and_then(|id| client.connections().lookup(id))
        .is_some()
}

async fn cmd_connect(client: Client, args: CommandArgs) -> Result<()> {
    let id = args
        .text_at(0)
        .ok_or_else(|| Error::Config("connect requires a connection id".to_string()))?
        .to_string();
    let conn = client
        .connections()
        .lookup(&id)
        .ok_or_else(|| Error::Connection(format!("unknown connection '{}'", id)))?;
    conn.set_state(ReadyState::Connecting);

    let protocol = client.protocols().resolve_protocol(conn.protocol())?;
    let dial_conn = conn.clone();
    let task = tokio::spawn(async move {
        let config = dial_conn.config().clone();
        tracing::info!("[{}] connecting to {}:{}", dial_conn.id(), config.host, config.port);
        match protocol.setup(&client, &config).await {
            Ok(transport) => attach(client, dial_conn, transport),
            Err(err) => {
                dial_conn.transition_closed();
                let event = if config.tls {
                    Event::ssl_error(dial_conn.id(), err.to_string())
                } else {
                    Event::error(dial_conn.id(), err.to_string())
                };
                client.events().emit(event).await;
            }
        }
    });
    conn.track_task(task);
    Ok(())
}

fn attach(client: Client, conn: Arc<Connection>, transport: Transport) {
    let limiter = RateLimiter::new(conn.config().throttling.resolve(client.throttle_default()));
    conn.attach_writer(transport.write, limiter);

    let id = conn.id().to_string();
    let reader_client = client.clone();
    let reader_id = id.clone();
    conn.track_task(tokio::spawn(read_loop(
        reader_client,
        reader_id,
        transport.read,
    )));
    conn.track_task(tokio::spawn(async move {
        if let Err(e) = HandshakeSequencer::new(client, id.clone()).run().await {
            tracing::warn!("[{}] handshake failed: {}", id, e);
        }
    }));
}

async fn read_loop(client: Client, id: String, read: Box<dyn TransportRead>) {
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                tracing::debug!("[{}] <- {}", id, trimmed);
                match Message::parse(trimmed) {
                    Ok(message) => handle_message(&client, &id, message).await,
                    Err(e) => tracing::warn!("[{}] unparseable line: {}", id, e),
                }
            }
            Err(e) => {
                tracing::warn!("[{}] read failed: {}", id, e);
                break;
            }
        }
    }

    // the read stream ended; a disconnect always fires
    if let Some(conn) = client.connections().lookup(&id) {
        if conn.transition_closed() {
            client.events().emit(Event::disconnect(&id)).await;
            client.events().remove_connection(&id);
            conn.close();
        }
    } else {
        client.events().emit(Event::disconnect(&id)).await;
    }
}

async fn handle_message(client: &Client, id: &str, mut message: Message) {
    message.normalize_numeric();

    match &message.command {
        MessageType::Ping => {
            // keepalive; must not wait behind the readiness gate
            let token = message.params.first().cloned().unwrap_or_default();
            if let Some(conn) = client.connections().lookup(id) {
                let reply = if token.is_empty() {
                    "PONG".to_string()
                } else {
                    Message::new(MessageType::Pong, vec![token]).to_line()
                };
                conn.enqueue_handshake(&reply);
            }
        }
        MessageType::Cap => emit_cap_events(client, id, &message).await,
        _ => {}
    }

    let (channel, user) = reply_addressing(&message);
    let mut event = Event::data(id, message);
    event.channel = channel;
    event.user = user;
    client.events().emit(event).await;
}

async fn emit_cap_events(client: &Client, id: &str, message: &Message) {
    // :server CAP <nick|*> <ACK|NAK> :<capabilities>
    let subcommand = message.params.get(1).map(String::as_str);
    let capabilities = message
        .params
        .get(2)
        .map(String::as_str)
        .unwrap_or_default();
    match subcommand {
        Some("ACK") => {
            for capability in capabilities.split_whitespace() {
                client.events().emit(Event::cap_ack(id, capability)).await;
            }
        }
        Some("NAK") => {
            for capability in capabilities.split_whitespace() {
                client.events().emit(Event::cap_nak(id, capability)).await;
            }
        }
        _ => {}
    }
}

fn reply_addressing(message: &Message) -> (Option<String>, Option<String>) {
    if !matches!(message.command, MessageType::PrivMsg | MessageType::Notice) {
        return (None, None);
    }
    let channel = message
        .params
        .first()
        .filter(|target| target.starts_with('#') || target.starts_with('&'))
        .cloned();
    let user = match &message.prefix {
        Some(Prefix::User { nick, .. }) => Some(nick.clone()),
        _ => None,
    };
    (channel, user)
}

async fn cmd_write(client: Client, args: CommandArgs) -> Result<()> {
    let line = args
        .text_at(0)
        .ok_or_else(|| Error::Config("write requires a line".to_string()))?
        .to_string();
    deliver(&client, &args, &line);
    Ok(())
}

async fn cmd_pass(client: Client, args: CommandArgs) -> Result<()> {
    let password = args
        .text_at(0)
        .ok_or_else(|| Error::Config("pass requires a password".to_string()))?;
    let line = format!("PASS {}", password);
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_nick(client: Client, args: CommandArgs) -> Result<()> {
    let nick = args
        .text_at(0)
        .ok_or_else(|| Error::Config("nick requires a nickname".to_string()))?;
    let line = format!("NICK {}", nick);
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_user(client: Client, args: CommandArgs) -> Result<()> {
    let username = args
        .text_at(0)
        .ok_or_else(|| Error::Config("user requires a username".to_string()))?;
    let realname = args.text_at(1).unwrap_or(username);
    let line = format!("USER {} 0 * :{}", username, realname);
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_cap_req(client: Client, args: CommandArgs) -> Result<()> {
    let capabilities = args
        .list_at(0)
        .ok_or_else(|| Error::Config("cap_req requires a capability list".to_string()))?;
    let line = format!("CAP REQ :{}", capabilities.join(" "));
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_cap_end(client: Client, args: CommandArgs) -> Result<()> {
    deliver_handshake(&client, &args, "CAP END");
    Ok(())
}

async fn cmd_identify(client: Client, args: CommandArgs) -> Result<()> {
    let mut credentials = args.texts();
    if trailing_id_consumed(&client, &args) {
        credentials.pop();
    }
    let line = match credentials.as_slice() {
        [password] => format!("PRIVMSG NickServ :IDENTIFY {}", password),
        [username, password] => format!("PRIVMSG NickServ :IDENTIFY {} {}", username, password),
        _ => return Err(Error::Config("identify requires a password".to_string())),
    };
    deliver_handshake(&client, &args, &line);
    Ok(())
}

async fn cmd_send(client: Client, args: CommandArgs) -> Result<()> {
    let (target, text) = message_args(&args, "send")?;
    let line = format!("PRIVMSG {} :{}", target, text);
    deliver(&client, &args, &line);
    Ok(())
}

async fn cmd_notice(client: Client, args: CommandArgs) -> Result<()> {
    let (target, text) = message_args(&args, "notice")?;
    let line = format!("NOTICE {} :{}", target, text);
    deliver(&client, &args, &line);
    Ok(())
}

async fn cmd_action(client: Client, args: CommandArgs) -> Result<()> {
    let (target, text) = message_args(&args, "action")?;
    let line = format!("PRIVMSG {} :\u{1}ACTION {}\u{1}", target, text);
    deliver(&client, &args, &line);
    Ok(())
}

fn message_args<'a>(args: &'a CommandArgs, command: &str) -> Result<(&'a str, &'a str)> {
    let target = args
        .text_at(0)
        .ok_or_else(|| Error::Config(format!("{} requires a target", command)))?;
    let text = args
        .text_at(1)
        .ok_or_else(|| Error::Config(format!("{} requires a message", command)))?;
    Ok((target, text))
}

async fn cmd_join(client: Client, args: CommandArgs) -> Result<()> {
    let channel = args
        .text_at(0)
        .ok_or_else(|| Error::Config("join requires a channel".to_string()))?;
    let line = format!("JOIN {}", channel);
    deliver(&client, &args, &line);
    Ok(())
}

async fn cmd_part(client: Client, args: CommandArgs) -> Result<()> {
    let channel = args
        .text_at(0)
        .ok_or_else(|| Error::Config("part requires a channel".to_string()))?;
    let line = format!("PART {}", channel);
    deliver(&client, &args, &line);
    Ok(())
}

async fn cmd_quit(client: Client, args: CommandArgs) -> Result<()> {
    let mut texts = args.texts();
    if trailing_id_consumed(&client, &args) {
        texts.pop();
    }
    let line = match texts.as_slice() {
        [message] => format!("QUIT :{}", message),
        _ => "QUIT".to_string(),
    };
    deliver(&client, &args, &line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(config: NetworkConfig, short: Option<&str>) -> NetworkConfig {
        IrcProtocol.parse(config, short).unwrap()
    }

    #[test]
    fn test_parse_fills_defaults() {
        let config = parse(NetworkConfig::for_host("irc.example.org"), None);
        assert_eq!(config.port, 6667);
        assert!(config.nick.starts_with("rustircc"));
        assert_eq!(config.username, config.nick);
        assert_eq!(config.realname, config.nick);
    }

    #[test]
    fn test_parse_tls_port_default() {
        let mut base = NetworkConfig::for_host("irc.example.org");
        base.tls = true;
        let config = parse(base, None);
        assert_eq!(config.port, 6697);
    }

    #[test]
    fn test_parse_short_form_with_port() {
        let config = parse(NetworkConfig::default(), Some("irc.example.org:7000"));
        assert_eq!(config.host, "irc.example.org");
        assert_eq!(config.port, 7000);

        let config = parse(NetworkConfig::default(), Some("irc.example.org"));
        assert_eq!(config.host, "irc.example.org");
        assert_eq!(config.port, 6667);
    }

    #[test]
    fn test_parse_requires_host() {
        let err = IrcProtocol.parse(NetworkConfig::default(), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_keeps_explicit_values() {
        let mut base = NetworkConfig::for_host("irc.example.org");
        base.nick = "alice".to_string();
        base.port = 9999;
        let config = parse(base, None);
        assert_eq!(config.nick, "alice");
        assert_eq!(config.port, 9999);
        assert_eq!(config.username, "alice");
    }

    #[test]
    fn test_reply_addressing() {
        let msg = Message::parse(":alice!u@h PRIVMSG #chan :hi").unwrap();
        let (channel, user) = reply_addressing(&msg);
        assert_eq!(channel.as_deref(), Some("#chan"));
        assert_eq!(user.as_deref(), Some("alice"));

        let msg = Message::parse(":alice!u@h PRIVMSG mynick :hi").unwrap();
        let (channel, user) = reply_addressing(&msg);
        assert_eq!(channel, None);
        assert_eq!(user.as_deref(), Some("alice"));

        let msg = Message::parse("PING :token").unwrap();
        assert_eq!(reply_addressing(&msg), (None, None));
    }
}
