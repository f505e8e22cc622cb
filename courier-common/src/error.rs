//! Error types shared between the relay crates.

use std::io;

use thiserror::Error;

/// Errors raised while loading or generating TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Failed to read a certificate file.
    #[error("Failed to load TLS certificate from {path}: {source}")]
    CertificateLoad {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The certificate file parsed, but held no certificates.
    #[error("No certificates found in {0}")]
    NoCertificates(String),

    /// Failed to read or recognise a private key file.
    #[error("Failed to load TLS private key from {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    /// Failed to generate an in-memory identity.
    #[error("Failed to generate self-signed certificate: {0}")]
    Generate(String),
}

impl From<rcgen::Error> for TlsError {
    fn from(err: rcgen::Error) -> Self {
        Self::Generate(err.to_string())
    }
}

/// Errors raised by a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to the configured socket address.
    #[error("Failed to bind to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("Failed to accept connection: {0}")]
    AcceptFailed(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn tls_error_display() {
        let err = TlsError::KeyLoad {
            path: "/path/to/key.pem".to_string(),
            reason: "invalid format".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load TLS private key from /path/to/key.pem: invalid format"
        );
    }

    #[test]
    fn bind_error_keeps_source() {
        let err = ListenerError::BindFailed {
            address: "0.0.0.0:2525".to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        };

        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Failed to bind to 0.0.0.0:2525: access denied"
        );
    }
}
