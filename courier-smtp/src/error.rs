//! Error types for the inbound protocol server.

use std::{io, time::Duration};

use thiserror::Error;

/// Errors that end an inbound connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error on the client connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The client stopped sending within the read timeout.
    #[error("Client idle for longer than {0:?}")]
    ReadTimeout(Duration),

    /// A reply couldn't be written within the write timeout.
    #[error("Writing to client took longer than {0:?}")]
    WriteTimeout(Duration),

    /// Connection was closed by peer.
    #[error("Connection closed by peer")]
    Closed,

    /// The session failed in a way the connection can't recover from.
    #[error("Session failed: {0}")]
    Session(#[source] SessionError),
}

/// Errors a [`Session`](crate::backend::Session) reports back to the
/// protocol server. Each maps onto an SMTP reply.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The command isn't valid in the session's current state.
    #[error("Bad sequence of commands: {0}")]
    BadSequence(String),

    /// The command's argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The message body couldn't be read. Fatal for the session.
    #[error("Failed to read message body: {0}")]
    BodyRead(#[from] io::Error),

    /// The session has already logged out.
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// The SMTP reply code this error is reported with.
    pub const fn code(&self) -> u16 {
        match self {
            Self::BadSequence(_) => 503,
            Self::InvalidArgument(_) => 501,
            Self::BodyRead(_) => 451,
            Self::Closed => 421,
        }
    }

    /// Whether the connection has to be closed after reporting this error.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::BodyRead(_) | Self::Closed)
    }
}
