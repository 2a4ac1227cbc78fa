//! Message Builder: turns a campaign and a recipient into a message ready for a relay.
//!
//! A [`MessageRenderer`] is prepared once per expedition. Preparation reads the
//! campaign's attachments and the relay's custom headers; rendering is then a pure
//! function of the recipient plus a fresh `UNIQUE_KEY`.

pub mod attachment;
pub mod template;
pub mod text;
pub mod token;

use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use courier_common::{Campaign, Recipient, Relay, tracing};
use courier_smtp::client::{ClientError, MessageBuilder};
use serde_json::{Map, Value, json};
use thiserror::Error;

use self::{
    attachment::LoadedAttachment,
    template::{Markup, TemplateRenderer},
};
use crate::{
    config::DispatchConfig,
    error::{PermanentError, SendError, TemporaryError},
};

/// Headers the message builder writes itself; relay headers may not repeat them.
const RESERVED_HEADERS: [&str; 6] = [
    "from",
    "to",
    "subject",
    "reply-to",
    "mime-version",
    "content-type",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Unable to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Text conversion failed: {0}")]
    Text(String),

    #[error("Unable to assemble message: {0}")]
    Message(#[from] ClientError),
}

impl From<RenderError> for SendError {
    fn from(error: RenderError) -> Self {
        match error {
            RenderError::InvalidAddress { address, reason } => {
                Self::Permanent(PermanentError::InvalidAddress(format!("{address}: {reason}")))
            }
            other => Self::Temporary(TemporaryError::Render(other.to_string())),
        }
    }
}

/// A message personalised for one recipient.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    /// Envelope sender and `From`.
    pub from: String,
    /// Envelope recipient and `To`.
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    /// Every header besides `From`, `To`, `Reply-To` and `Subject`, in order.
    pub headers: Vec<(String, String)>,
    pub attachments: Arc<[LoadedAttachment]>,
}

impl RenderedMessage {
    /// The complete MIME document, CRLF terminated.
    pub fn to_mime(&self) -> Result<String, RenderError> {
        let mut builder = MessageBuilder::new()
            .from(&self.from)
            .to(&self.to)
            .subject(&self.subject)
            .text(&self.text_body)
            .html(&self.html_body);

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        for attachment in self.attachments.iter() {
            builder = builder.attach(attachment.to_part());
        }

        Ok(builder.build()?)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Per-expedition message builder for one campaign.
#[derive(Debug)]
pub struct MessageRenderer {
    campaign: Campaign,
    relay_headers: Vec<(String, String)>,
    attachments: Arc<[LoadedAttachment]>,
    unique_key_charset: Vec<char>,
    templates: Arc<dyn TemplateRenderer>,
    config: Arc<DispatchConfig>,
}

impl MessageRenderer {
    /// Read the attachments and resolve the relay headers for `campaign`.
    pub async fn prepare(
        campaign: Campaign,
        relay: &Relay,
        templates: Arc<dyn TemplateRenderer>,
        config: Arc<DispatchConfig>,
    ) -> Result<Self, RenderError> {
        validate_address(&campaign.sender)?;
        if let Some(reply_to) = &campaign.reply_to {
            validate_address(reply_to)?;
        }

        let mut attachments = Vec::with_capacity(campaign.attachments.len());
        for attachment in &campaign.attachments {
            attachments.push(LoadedAttachment::load(attachment).await?);
        }

        let relay_headers = relay
            .custom_headers()
            .into_iter()
            .filter(|(name, _)| {
                let reserved = RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str());
                if reserved {
                    tracing::warn!(relay = %relay.id, header = %name, "Ignoring relay header that would replace a message header");
                }
                !reserved
            })
            .collect();

        Ok(Self {
            unique_key_charset: config.unique_key_charset.chars().collect(),
            campaign,
            relay_headers,
            attachments: attachments.into(),
            templates,
            config,
        })
    }

    pub const fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    /// A random key drawn without replacement from the configured charset.
    fn unique_key(&self) -> String {
        let charset = &self.unique_key_charset;
        let length = self.config.unique_key_length.min(charset.len());

        rand::seq::index::sample(&mut rand::rng(), charset.len(), length)
            .into_iter()
            .map(|index| charset[index])
            .collect()
    }

    fn unsubscribe_link(&self, uid: &str, token: &str) -> String {
        format!(
            "https://{}/unsubscribe/{}/{uid}/{token}",
            self.config.site_domain, self.campaign.slug
        )
    }

    fn context(&self, recipient: &Recipient) -> Value {
        let (uid, token) = token::tokenize(&self.config.unsubscribe_secret, recipient);

        let mut person = Map::new();
        for (key, value) in &recipient.attributes {
            person.insert(key.clone(), Value::String(value.clone()));
        }
        person.insert("id".to_string(), json!(recipient.id.0));
        person.insert("address".to_string(), json!(recipient.address));

        let mut context = json!({
            "recipient": person,
            "campaign": {
                "id": self.campaign.id.0,
                "title": self.campaign.title,
                "slug": self.campaign.slug,
            },
            "domain": self.config.site_domain,
            "uid": uid,
            "token": token,
            "UNIQUE_KEY": self.unique_key(),
            "viewonsite": format!(
                "https://{}/newsletters/{}/{uid}/{token}",
                self.config.site_domain, self.campaign.slug
            ),
        });

        if self.config.include_unsubscribe
            && let Value::Object(map) = &mut context
        {
            map.insert(
                "unsubscribe".to_string(),
                Value::String(self.unsubscribe_link(&uid, &token)),
            );
        }

        context
    }

    /// Render only the subject line.
    pub fn render_title(&self, recipient: &Recipient) -> Result<String, RenderError> {
        let context = self.context(recipient);
        self.templates
            .render_template(&self.campaign.title, &context, Markup::Plain)
            .map(|title| single_line(&title))
    }

    pub fn render(
        &self,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<RenderedMessage, RenderError> {
        validate_address(&recipient.address)?;

        let context = self.context(recipient);
        let subject = single_line(&self.templates.render_template(
            &self.campaign.title,
            &context,
            Markup::Plain,
        )?);
        let html_body =
            self.templates
                .render_template(&self.campaign.content, &context, Markup::Html)?;
        let text_body = text::html_to_text(&html_body, self.config.text_wrap_width)?;

        let mut headers = vec![
            ("Date".to_string(), now.to_rfc2822()),
            (
                "Message-ID".to_string(),
                format!("<{}@{}>", ulid::Ulid::new(), self.config.site_domain),
            ),
        ];
        if self.config.include_unsubscribe {
            let (uid, token) = token::tokenize(&self.config.unsubscribe_secret, recipient);
            headers.push((
                "List-Unsubscribe".to_string(),
                format!("<{}>", self.unsubscribe_link(&uid, &token)),
            ));
            headers.push((
                "List-Unsubscribe-Post".to_string(),
                "List-Unsubscribe=One-Click".to_string(),
            ));
        }
        headers.extend(self.relay_headers.iter().cloned());

        Ok(RenderedMessage {
            from: self.campaign.sender.clone(),
            to: recipient.address.clone(),
            reply_to: self.campaign.reply_to.clone(),
            subject,
            html_body,
            text_body,
            headers,
            attachments: Arc::clone(&self.attachments),
        })
    }
}

/// Collapse line breaks so a rendered subject stays one header line.
fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Accept a single bare ASCII `local@domain` address, as the envelope requires.
pub fn validate_address(address: &str) -> Result<(), RenderError> {
    let invalid = |reason: &str| RenderError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    if address.is_empty() {
        return Err(invalid("empty address"));
    }
    if !address.is_ascii() {
        return Err(invalid("address is not ASCII"));
    }
    if address
        .chars()
        .any(|c| c.is_ascii_whitespace() || c.is_ascii_control() || c == '<' || c == '>')
    {
        return Err(invalid("address contains forbidden characters"));
    }

    let parsed = mailparse::addrparse(address).map_err(|e| invalid(&e.to_string()))?;
    match parsed.extract_single_info() {
        Some(info) if info.addr == address => {}
        _ => return Err(invalid("not a single address")),
    }

    let Some((local, domain)) = address.rsplit_once('@') else {
        return Err(invalid("missing '@'"));
    };
    if local.is_empty() || domain.is_empty() {
        return Err(invalid("empty local part or domain"));
    }
    if domain.starts_with('.') || domain.ends_with('.') || domain.contains("..") {
        return Err(invalid("malformed domain"));
    }

    Ok(())
}
