//! The mail protocol layer of the courier relay.
//!
//! - [`client`]: an outbound SMTP client used by the delivery engine.
//! - [`server`]: the inbound protocol server, which drives the
//!   [`backend::Backend`] and [`backend::Session`] capability traits.

pub mod backend;
pub mod client;
pub mod error;
pub mod server;

pub use backend::{Backend, Session};
pub use error::{ServerError, SessionError};
pub use server::{SmtpConfig, SmtpServer};
