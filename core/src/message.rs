//! IRC message parsing and handling
//!
//! This module implements the client side of the IRC message format as
//! defined in RFC 1459. The line framing itself (CRLF termination) is the
//! transport's responsibility; this parser consumes single unframed lines.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// IRC message prefix (server or user)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prefix {
    /// Server name
    Server(String),
    /// User prefix (nick!user@host)
    User {
        nick: String,
        user: String,
        host: String,
    },
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::Server(name) => write!(f, "{}", name),
            Prefix::User { nick, user, host } => write!(f, "{}!{}@{}", nick, user, host),
        }
    }
}

/// IRC message types relevant to a client connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    // Connection registration
    Password,
    Nick,
    User,
    Quit,

    // Channel operations
    Join,
    Part,
    Mode,
    Topic,
    Invite,
    Kick,

    // Messaging
    PrivMsg,
    Notice,

    // Keepalive
    Ping,
    Pong,
    Error,
    Away,

    // IRCv3 extensions
    Cap,
    Authenticate,

    // Numeric replies, normalized names and anything else
    Custom(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::Password => "PASS",
            MessageType::Nick => "NICK",
            MessageType::User => "USER",
            MessageType::Quit => "QUIT",
            MessageType::Join => "JOIN",
            MessageType::Part => "PART",
            MessageType::Mode => "MODE",
            MessageType::Topic => "TOPIC",
            MessageType::Invite => "INVITE",
            MessageType::Kick => "KICK",
            MessageType::PrivMsg => "PRIVMSG",
            MessageType::Notice => "NOTICE",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Error => "ERROR",
            MessageType::Away => "AWAY",
            MessageType::Cap => "CAP",
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Custom(cmd) => cmd,
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "PASS" => MessageType::Password,
            "NICK" => MessageType::Nick,
            "USER" => MessageType::User,
            "QUIT" => MessageType::Quit,
            "JOIN" => MessageType::Join,
            "PART" => MessageType::Part,
            "MODE" => MessageType::Mode,
            "TOPIC" => MessageType::Topic,
            "INVITE" => MessageType::Invite,
            "KICK" => MessageType::Kick,
            "PRIVMSG" => MessageType::PrivMsg,
            "NOTICE" => MessageType::Notice,
            "PING" => MessageType::Ping,
            "PONG" => MessageType::Pong,
            "ERROR" => MessageType::Error,
            "AWAY" => MessageType::Away,
            "CAP" => MessageType::Cap,
            "AUTHENTICATE" => MessageType::Authenticate,
            _ => MessageType::Custom(s.to_string()),
        }
    }
}

lazy_static! {
    /// Numeric reply code to friendly name mapping
    ///
    /// Inbound numerics are rewritten to these names before data events are
    /// emitted, so consumers match on "welcome" rather than "001".
    static ref REPLY_NAMES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("001", "welcome");
        m.insert("002", "yourhost");
        m.insert("003", "created");
        m.insert("004", "myinfo");
        m.insert("005", "isupport");
        m.insert("251", "luserclient");
        m.insert("324", "channelmodeis");
        m.insert("331", "notopic");
        m.insert("332", "topic");
        m.insert("333", "topicwhotime");
        m.insert("353", "names");
        m.insert("366", "endofnames");
        m.insert("372", "motd");
        m.insert("375", "motdstart");
        m.insert("376", "endofmotd");
        m.insert("421", "unknowncommand");
        m.insert("433", "nicknameinuse");
        m.insert("900", "loggedin");
        m.insert("901", "loggedout");
        m.insert("902", "nicklocked");
        m.insert("903", "saslsuccess");
        m.insert("904", "saslfail");
        m.insert("905", "sasltoolong");
        m.insert("906", "saslaborted");
        m.insert("907", "saslalready");
        m
    };
}

/// Look up the friendly name for a numeric reply code
pub fn reply_name(code: &str) -> Option<&'static str> {
    REPLY_NAMES.get(code).copied()
}

/// IRC message as seen by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server or user)
    pub prefix: Option<Prefix>,
    /// Message command/type
    pub command: MessageType,
    /// Message parameters
    pub params: Vec<String>,
}

fn next_token(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn parse_prefix(prefix: &str) -> crate::Result<Prefix> {
    if let Some((nick, user_host)) = prefix.split_once('!') {
        let (user, host) = user_host
            .split_once('@')
            .ok_or_else(|| crate::Error::MessageParse("Invalid user prefix format".to_string()))?;
        Ok(Prefix::User {
            nick: nick.to_string(),
            user: user.to_string(),
            host: host.to_string(),
        })
    } else {
        Ok(Prefix::Server(prefix.to_string()))
    }
}

impl Message {
    /// Create a new message
    pub fn new(command: MessageType, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command,
            params,
        }
    }

    /// Parse an IRC message from a single line
    pub fn parse(input: &str) -> crate::Result<Self> {
        let mut rest = input.trim();
        if rest.is_empty() {
            return Err(crate::Error::MessageParse("Empty message".to_string()));
        }

        let prefix = if let Some(stripped) = rest.strip_prefix(':') {
            let (token, tail) = next_token(stripped);
            rest = tail;
            Some(parse_prefix(token)?)
        } else {
            None
        };

        let (command_str, tail) = next_token(rest);
        if command_str.is_empty() {
            return Err(crate::Error::MessageParse("No command found".to_string()));
        }
        rest = tail;

        let mut params = Vec::new();
        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                // Trailing parameter, may contain spaces
                params.push(trailing.to_string());
                break;
            }
            let (token, tail) = next_token(rest);
            params.push(token.to_string());
            rest = tail;
        }

        Ok(Message {
            prefix,
            command: MessageType::from(command_str),
            params,
        })
    }

    /// Rewrite a numeric command to its friendly reply name, when known
    pub fn normalize_numeric(&mut self) {
        if let MessageType::Custom(code) = &self.command {
            if code.chars().all(|c| c.is_ascii_digit()) {
                if let Some(name) = reply_name(code) {
                    self.command = MessageType::Custom(name.to_string());
                }
            }
        }
    }

    /// Serialize to a wire line, without the terminating CRLF
    pub fn to_line(&self) -> String {
        let mut result = String::new();

        if let Some(ref prefix) = self.prefix {
            result.push(':');
            result.push_str(&prefix.to_string());
            result.push(' ');
        }

        result.push_str(&self.command.to_string());

        for (i, param) in self.params.iter().enumerate() {
            result.push(' ');
            let last = i == self.params.len() - 1;
            if last && (param.contains(' ') || param.is_empty() || param.starts_with(':')) {
                result.push(':');
            }
            result.push_str(param);
        }

        result
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line())
    }
}
