//! The courier relay: accepts mail over SMTP and delivers a DKIM signed
//! copy to every recipient's mail exchanger.

pub mod backend;
pub mod config;
pub mod controller;
pub mod session;

pub use backend::RelayBackend;
pub use config::Courier;
pub use controller::Controller;
pub use session::{Phase, RelaySession};
