//! Delivery failure taxonomy.
//!
//! Failures are resolved at the smallest scope that can absorb them: a
//! route (host and tier) failure moves on to the next route, while a
//! recipient failure is recorded and the next recipient is attempted.

use thiserror::Error;

use crate::signer::SigningError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient address has no domain part.
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// MX lookup for the recipient domain failed.
    #[error("Resolution failure for {domain}: {cause}")]
    ResolutionFailure { domain: String, cause: String },

    /// The recipient domain publishes no usable mail exchangers.
    #[error("No MX records for {0}")]
    NoMxRecords(String),

    /// Couldn't establish a session on one route.
    #[error("Connect failure: {0}")]
    ConnectFailure(String),

    /// The message couldn't be signed.
    #[error("Signing failure: {0}")]
    SigningFailure(String),

    /// The envelope or the content was refused, or the transfer broke.
    #[error("Transfer failure: {0}")]
    TransferFailure(String),

    /// Every host and tier was tried without success.
    #[error("All {attempts} routes exhausted, last error: {last}")]
    AllRoutesExhausted { attempts: usize, last: String },
}

impl DeliveryError {
    /// Errors scoped to a single route: the next tier or host is tried.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self, Self::ConnectFailure(_) | Self::TransferFailure(_))
    }

    /// Errors that end the recipient's delivery outright.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_fallback()
    }
}

impl From<SigningError> for DeliveryError {
    fn from(error: SigningError) -> Self {
        Self::SigningFailure(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(DeliveryError::ConnectFailure("refused".into()).is_fallback());
        assert!(DeliveryError::TransferFailure("550".into()).is_fallback());

        for fatal in [
            DeliveryError::MalformedAddress("bad".into()),
            DeliveryError::NoMxRecords("dest.org".into()),
            DeliveryError::SigningFailure("no key".into()),
            DeliveryError::AllRoutesExhausted {
                attempts: 3,
                last: "refused".into(),
            },
        ] {
            assert!(fatal.is_fatal(), "{fatal} should be fatal");
        }
    }
}
