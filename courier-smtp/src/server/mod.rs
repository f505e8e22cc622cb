//! Inbound SMTP protocol server.
//!
//! Parses client commands, enforces command ordering and message limits,
//! and forwards each transaction to a [`Session`](crate::backend::Session)
//! created by the configured [`Backend`](crate::backend::Backend).

mod command;
mod handler;
mod listener;

use std::net::SocketAddr;

use courier_common::config::ServerTimeouts;
use serde::{Deserialize, Serialize};

pub use command::{Command, CommandError};
pub use listener::{Listener, SmtpServer};

/// The `smtp` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SmtpConfig {
    /// Sockets to accept connections on.
    #[serde(default = "defaults::listeners")]
    pub listeners: Vec<SocketAddr>,

    /// Hostname announced in the greeting and EHLO reply.
    #[serde(default = "defaults::banner")]
    pub banner: String,

    #[serde(default)]
    pub timeouts: ServerTimeouts,

    /// Largest message body accepted, in bytes.
    #[serde(default = "defaults::max_message_bytes")]
    pub max_message_bytes: usize,

    /// Most recipients accepted in one transaction.
    #[serde(default = "defaults::max_recipients")]
    pub max_recipients: usize,

    /// Longest command line accepted, in bytes, including the terminator.
    #[serde(default = "defaults::max_line_length")]
    pub max_line_length: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listeners: defaults::listeners(),
            banner: defaults::banner(),
            timeouts: ServerTimeouts::default(),
            max_message_bytes: defaults::max_message_bytes(),
            max_recipients: defaults::max_recipients(),
            max_line_length: defaults::max_line_length(),
        }
    }
}

mod defaults {
    use std::net::{Ipv4Addr, SocketAddr};

    pub fn listeners() -> Vec<SocketAddr> {
        vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, 2525))]
    }

    pub fn banner() -> String {
        String::from("smtp.custom-server.com")
    }

    pub const fn max_message_bytes() -> usize {
        1024 * 1024
    }

    pub const fn max_recipients() -> usize {
        50
    }

    pub const fn max_line_length() -> usize {
        2000
    }
}
