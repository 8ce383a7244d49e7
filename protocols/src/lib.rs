//! Protocol plugins for the rustircc client
//!
//! Each plugin is a plain registration function over a client: it installs
//! a protocol descriptor and the commands the protocol contributes. The
//! default `irc` protocol is registered with [`register`].

pub mod irc;
mod sasl;

pub use irc::{register, IrcProtocol};
