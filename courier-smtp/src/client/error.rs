//! Error types for the outbound SMTP client.

use std::io;

use courier_common::error::TlsError;
use thiserror::Error;

/// Errors that can occur while talking to a remote mail server.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// The server answered with a code other than the one the exchange needs.
    #[error("Unexpected SMTP status code: {code} - {message}")]
    UnexpectedResponse { code: u16, message: String },

    /// TLS handshake or configuration failure.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The configured client identity could not be loaded.
    #[error(transparent)]
    Identity(#[from] TlsError),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    /// UTF-8 decoding error.
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl From<tokio_rustls::rustls::Error> for ClientError {
    fn from(err: tokio_rustls::rustls::Error) -> Self {
        Self::TlsError(err.to_string())
    }
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
