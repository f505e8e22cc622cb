//! Configuration types shared between the inbound server and the outbound
//! delivery engine.
//!
//! Each crate owns the section it consumes; the pieces here are the ones
//! both sides need.

mod timeouts;
mod tls;

pub use timeouts::{ClientTimeouts, ServerTimeouts};
pub use tls::{IdentitySource, TlsConfig, TlsIdentity};
