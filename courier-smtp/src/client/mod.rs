//! Outbound SMTP client.
//!
//! Supports plain TCP sessions, in-band upgrade through `STARTTLS` and
//! sessions that are encrypted from the first byte. Timeouts are left to the
//! caller, which wraps each exchange in `tokio::time::timeout`.
//!
//! ```no_run
//! use courier_smtp::client::{ClientTls, SmtpClient};
//!
//! # async fn example(tls: ClientTls) -> courier_smtp::client::Result<()> {
//! let mut client = SmtpClient::connect("mx.example.com:25", "mx.example.com").await?;
//! client.read_greeting().await?;
//! let ehlo = client.ehlo("relay.example.com").await?;
//!
//! if ehlo.advertises("STARTTLS") {
//!     client.starttls(&tls).await?;
//!     client.ehlo("relay.example.com").await?;
//! }
//!
//! client.mail_from("a@example.com").await?;
//! client.rcpt_to("b@example.org").await?;
//! client.data().await?;
//! client.send_data(b"Subject: hi\r\n\r\nHello\r\n").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;
mod tls;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
pub use tls::ClientTls;
