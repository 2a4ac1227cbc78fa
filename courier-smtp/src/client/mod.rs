//! SMTP client used to hand finished messages to a relay.
//!
//! ```no_run
//! use courier_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let message = MessageBuilder::new()
//!     .from("news@example.com")
//!     .to("reader@example.org")
//!     .subject("Spring news")
//!     .text("Hello")
//!     .html("<p>Hello</p>")
//!     .build()?;
//!
//! let mut client = SmtpClient::connect("smtp.example.com:587", "smtp.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("courier.example.com").await?;
//! client.starttls().await?;
//! client.ehlo("courier.example.com").await?;
//! client.auth_plain("user", "secret").await?;
//! client.mail_from("news@example.com").await?;
//! client.rcpt_to("reader@example.org").await?;
//! client.data().await?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder, guess_content_type};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
