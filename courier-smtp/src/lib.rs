//! Outbound SMTP for courier.
//!
//! [`client::SmtpClient`] speaks submission SMTP to a relay (plain, `STARTTLS` or implicit
//! TLS, with `AUTH PLAIN`/`AUTH LOGIN`), and [`client::MessageBuilder`] produces the MIME
//! document handed to it.

pub mod client;
