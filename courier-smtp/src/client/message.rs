//! MIME document builder for newsletter messages.
//!
//! Produces `multipart/mixed` holding a `multipart/alternative` (text then HTML, both
//! quoted-printable UTF-8) followed by base64 attachments.

use std::fmt::Write;

use base64::{Engine, engine::general_purpose::STANDARD};

use super::error::{ClientError, Result};

/// Maximum encoded line length (RFC 2045 section 6.7).
const MAX_LINE: usize = 76;

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename to use in the MIME header.
    pub filename: String,
    /// The MIME content type (e.g., "application/pdf").
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Builder for a complete RFC 5322 message.
///
/// Headers are written in insertion order after `From`, `To`, `Reply-To` and `Subject`.
/// Values containing non-ASCII characters are encoded as RFC 2047 words.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    reply_to: Option<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    boundary: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    #[must_use]
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    #[must_use]
    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a header. Repeated names are all kept.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the `text/plain` alternative.
    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    /// Sets the `text/html` alternative.
    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Use a fixed boundary prefix instead of a generated one.
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Render the message with CRLF line endings.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .ok_or_else(|| ClientError::BuilderError("missing From".to_string()))?;
        if self.to.is_empty() {
            return Err(ClientError::BuilderError("missing To".to_string()));
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(ClientError::BuilderError("missing body".to_string()));
        }
        for (name, value) in &self.headers {
            if name.is_empty() || name.contains([':', ' ', '\r', '\n']) {
                return Err(ClientError::BuilderError(format!(
                    "invalid header name '{name}'"
                )));
            }
            if value.contains(['\r', '\n']) {
                return Err(ClientError::BuilderError(format!(
                    "header '{name}' contains a line break"
                )));
            }
        }

        let boundary = self
            .boundary
            .unwrap_or_else(|| format!("=_courier_{}", ulid::Ulid::new()));
        let mixed = format!("{boundary}_mixed");
        let alternative = format!("{boundary}_alt");

        let mut message = String::with_capacity(4096);

        write_header(&mut message, "From", &from);
        write_header(&mut message, "To", &self.to.join(", "));
        if let Some(reply_to) = &self.reply_to {
            write_header(&mut message, "Reply-To", reply_to);
        }
        if let Some(subject) = &self.subject {
            write_header(&mut message, "Subject", subject);
        }
        for (name, value) in &self.headers {
            write_header(&mut message, name, value);
        }
        message.push_str("MIME-Version: 1.0\r\n");
        let _ = write!(
            message,
            "Content-Type: multipart/mixed; boundary=\"{mixed}\"\r\n\r\n"
        );

        let _ = write!(message, "--{mixed}\r\n");
        let _ = write!(
            message,
            "Content-Type: multipart/alternative; boundary=\"{alternative}\"\r\n\r\n"
        );
        for (subtype, body) in [("plain", &self.text), ("html", &self.html)] {
            let Some(body) = body else {
                continue;
            };
            let _ = write!(message, "--{alternative}\r\n");
            let _ = write!(message, "Content-Type: text/{subtype}; charset=utf-8\r\n");
            message.push_str("Content-Transfer-Encoding: quoted-printable\r\n\r\n");
            message.push_str(&quoted_printable(body));
            message.push_str("\r\n");
        }
        let _ = write!(message, "--{alternative}--\r\n");

        for attachment in &self.attachments {
            let filename = encode_word(&attachment.filename);
            let _ = write!(message, "--{mixed}\r\n");
            let _ = write!(
                message,
                "Content-Type: {}; name=\"{filename}\"\r\n",
                attachment.content_type
            );
            message.push_str("Content-Transfer-Encoding: base64\r\n");
            let _ = write!(
                message,
                "Content-Disposition: attachment; filename=\"{filename}\"\r\n\r\n"
            );
            message.push_str(&base64_lines(&attachment.data));
        }

        let _ = write!(message, "--{mixed}--\r\n");

        Ok(message)
    }
}

fn write_header(message: &mut String, name: &str, value: &str) {
    let _ = write!(message, "{name}: {}\r\n", encode_word(value));
}

/// RFC 2047 `B` encoding for non-ASCII header values; ASCII passes through.
fn encode_word(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?utf-8?B?{}?=", STANDARD.encode(value))
    }
}

/// Base64 wrapped at 76 columns, each line CRLF terminated.
fn base64_lines(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE * 2 + 2);

    for chunk in encoded.as_bytes().chunks(MAX_LINE) {
        // Base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }

    out
}

/// Quoted-printable encoding (RFC 2045 section 6.7).
///
/// Line breaks in the input become CRLF hard breaks; lines longer than 76 columns get
/// soft breaks; trailing whitespace before a break is encoded.
pub(crate) fn quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        let bytes = line.as_bytes();
        let mut column = 0;

        for (position, &byte) in bytes.iter().enumerate() {
            let last = position + 1 == bytes.len();
            let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
                || (matches!(byte, b' ' | b'\t') && !last);

            let width = if literal { 1 } else { 3 };
            // Keep room for the soft break `=`
            if column + width > MAX_LINE - 1 {
                out.push_str("=\r\n");
                column = 0;
            }

            if literal {
                out.push(char::from(byte));
            } else {
                let _ = write!(out, "={byte:02X}");
            }
            column += width;
        }
    }

    out
}

/// Content type for an attachment, from its file extension.
pub fn guess_content_type(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "ics" => "text/calendar",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "eml" => "message/rfc822",
        "zip" => "application/zip",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from("news@example.com")
            .to("reader@example.org")
            .subject("Spring")
            .boundary("b")
    }

    #[test]
    fn test_structure() {
        let message = base()
            .header("List-Unsubscribe", "<https://example.com/u/1>")
            .text("Hello")
            .html("<p>Hello</p>")
            .attach(Attachment {
                filename: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                data: b"Hello World".to_vec(),
            })
            .build()
            .unwrap();

        let mixed = message.find("--b_mixed\r\n").unwrap();
        let plain = message.find("Content-Type: text/plain; charset=utf-8").unwrap();
        let html = message.find("Content-Type: text/html; charset=utf-8").unwrap();
        let alt_end = message.find("--b_alt--").unwrap();
        let attachment = message.find("filename=\"notes.txt\"").unwrap();

        assert!(mixed < plain && plain < html && html < alt_end && alt_end < attachment);
        assert!(message.starts_with("From: news@example.com\r\nTo: reader@example.org\r\n"));
        assert!(message.contains("List-Unsubscribe: <https://example.com/u/1>\r\n"));
        assert!(message.contains("SGVsbG8gV29ybGQ=\r\n"));
        assert!(message.ends_with("--b_mixed--\r\n"));
    }

    #[test]
    fn test_missing_fields() {
        assert!(MessageBuilder::new().to("a@b").text("x").build().is_err());
        assert!(MessageBuilder::new().from("a@b").text("x").build().is_err());
        assert!(base().build().is_err());
        assert!(base().text("x").header("Bad Name", "v").build().is_err());
        assert!(base().text("x").header("X-Inject", "a\r\nBcc: x").build().is_err());
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let message = base().subject("Café").text("x").build().unwrap();
        assert!(message.contains("Subject: =?utf-8?B?Q2Fmw6k=?=\r\n"));
    }

    #[test]
    fn test_quoted_printable() {
        assert_eq!(quoted_printable("a=b"), "a=3Db");
        assert_eq!(quoted_printable("café"), "caf=C3=A9");
        assert_eq!(quoted_printable("one \ntwo"), "one=20\r\ntwo");
        assert_eq!(quoted_printable("line\r\nnext"), "line\r\nnext");

        let long = "x".repeat(100);
        let encoded = quoted_printable(&long);
        assert!(encoded.lines().all(|line| line.len() <= MAX_LINE));
        assert_eq!(encoded.replace("=\r\n", ""), long);
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_content_type("song.mp3"), "audio/mpeg");
        assert_eq!(guess_content_type("fwd.eml"), "message/rfc822");
        assert_eq!(guess_content_type("README"), "application/octet-stream");
    }
}
