//! Capability traits the protocol server drives.
//!
//! The server calls [`Backend::new_session`] once per accepted connection
//! and then invokes the [`Session`] operations in protocol order. A session
//! must tolerate [`Session::reset`] at any point, and must not rely on
//! [`Session::logout`] being reached.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::SessionError;

/// Creates one [`Session`] per inbound connection.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    type Session: Session + 'static;

    /// # Errors
    ///
    /// An error refuses the connection.
    async fn new_session(&self, peer: SocketAddr) -> Result<Self::Session, SessionError>;
}

/// The per-connection state holder.
#[async_trait]
pub trait Session: Send {
    /// Credential check for `AUTH PLAIN`. Accepts everything unless
    /// overridden.
    ///
    /// # Errors
    ///
    /// An error rejects the credentials.
    async fn auth_plain(&mut self, _username: &str, _password: &str) -> Result<(), SessionError> {
        Ok(())
    }

    /// `MAIL FROM`.
    ///
    /// # Errors
    ///
    /// An error rejects the sender.
    async fn mail(&mut self, from: &str) -> Result<(), SessionError>;

    /// `RCPT TO`.
    ///
    /// # Errors
    ///
    /// An error rejects the recipient.
    async fn rcpt(&mut self, to: &str) -> Result<(), SessionError>;

    /// The message body, already unstuffed and without its terminator.
    ///
    /// # Errors
    ///
    /// An error is reported to the client; [`SessionError::BodyRead`]
    /// additionally ends the connection.
    async fn data(&mut self, body: &mut (dyn AsyncRead + Unpin + Send)) -> Result<(), SessionError>;

    /// Discard the current transaction.
    async fn reset(&mut self);

    /// Release the session. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Errors are logged by the server and otherwise ignored.
    async fn logout(&mut self) -> Result<(), SessionError>;
}
