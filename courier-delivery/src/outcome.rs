//! Per-recipient delivery results.

use core::fmt::{self, Display, Formatter};

use crate::{error::DeliveryError, transport::Route};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(DeliveryError),
}

/// One route tried on behalf of a recipient, and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteAttempt {
    pub route: Route,
    /// `None` when this route delivered the message.
    pub error: Option<DeliveryError>,
}

/// The final word on one recipient. Produced exactly once per recipient and
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub recipient: String,
    pub status: DeliveryStatus,
    /// Every route tried, in order.
    pub attempts: Vec<RouteAttempt>,
}

impl DeliveryOutcome {
    pub const fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered)
    }

    pub const fn error(&self) -> Option<&DeliveryError> {
        match &self.status {
            DeliveryStatus::Delivered => None,
            DeliveryStatus::Failed(err) => Some(err),
        }
    }

    /// The ports tried, in order.
    pub fn ports(&self) -> Vec<u16> {
        self.attempts.iter().map(|a| a.route.tier.port).collect()
    }
}

impl Display for DeliveryOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.status {
            DeliveryStatus::Delivered => write!(
                f,
                "{}: delivered after {} attempt(s)",
                self.recipient,
                self.attempts.len()
            ),
            DeliveryStatus::Failed(err) => write!(f, "{}: {err}", self.recipient),
        }
    }
}
