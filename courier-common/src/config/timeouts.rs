use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Inbound connection timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerTimeouts {
    /// Maximum time to wait for the next line from a client.
    #[serde(default = "defaults::read")]
    pub read_secs: u64,

    /// Maximum time to spend writing a single reply.
    #[serde(default = "defaults::write")]
    pub write_secs: u64,
}

impl ServerTimeouts {
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub const fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            read_secs: defaults::read(),
            write_secs: defaults::write(),
        }
    }
}

/// Outbound SMTP client timeouts.
///
/// `command_secs` bounds every command/reply exchange (greeting, EHLO,
/// STARTTLS, MAIL, RCPT, the DATA command itself), while `data_secs` bounds
/// the transfer of message content up to the final acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientTimeouts {
    #[serde(default = "defaults::connect")]
    pub connect_secs: u64,

    #[serde(default = "defaults::command")]
    pub command_secs: u64,

    #[serde(default = "defaults::data")]
    pub data_secs: u64,

    #[serde(default = "defaults::quit")]
    pub quit_secs: u64,
}

impl ClientTimeouts {
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect(),
            command_secs: defaults::command(),
            data_secs: defaults::data(),
            quit_secs: defaults::quit(),
        }
    }
}

mod defaults {
    pub const fn read() -> u64 {
        60
    }

    pub const fn write() -> u64 {
        60
    }

    pub const fn connect() -> u64 {
        10
    }

    pub const fn command() -> u64 {
        60
    }

    pub const fn data() -> u64 {
        60
    }

    pub const fn quit() -> u64 {
        10
    }
}
