use std::path::Path;

use courier_common::CampaignAttachment;
use courier_smtp::client::{Attachment, guess_content_type};

use super::RenderError;

/// What an attached file is, decided once from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text,
    Image,
    Audio,
    /// An embedded `message/rfc822`.
    Message,
    Other,
}

impl AttachmentKind {
    pub fn of(content_type: &str) -> Self {
        match content_type.split_once('/').map_or(content_type, |(main, _)| main) {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" => Self::Audio,
            "message" => Self::Message,
            _ => Self::Other,
        }
    }
}

/// A campaign attachment read into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAttachment {
    pub kind: AttachmentKind,
    pub content_type: &'static str,
    /// Name presented to the reader.
    pub title: String,
    pub data: Vec<u8>,
}

impl LoadedAttachment {
    pub async fn load(attachment: &CampaignAttachment) -> Result<Self, RenderError> {
        let data = tokio::fs::read(&attachment.path)
            .await
            .map_err(|source| RenderError::Attachment {
                path: attachment.path.clone(),
                source,
            })?;

        let content_type = attachment
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or("application/octet-stream", guess_content_type);

        Ok(Self {
            kind: AttachmentKind::of(content_type),
            content_type,
            title: display_name(attachment),
            data,
        })
    }

    pub fn to_part(&self) -> Attachment {
        Attachment {
            filename: self.title.clone(),
            content_type: self.content_type.to_string(),
            data: self.data.clone(),
        }
    }
}

/// The attachment title, keeping the file's extension so mail clients open it sensibly.
fn display_name(attachment: &CampaignAttachment) -> String {
    let extension = attachment.path.extension().and_then(|e| e.to_str());
    let title = attachment.title.trim();

    match (title.is_empty(), extension) {
        (true, _) => attachment
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment")
            .to_string(),
        (false, Some(extension))
            if Path::new(title)
                .extension()
                .is_none_or(|current| !current.eq_ignore_ascii_case(extension)) =>
        {
            format!("{title}.{extension}")
        }
        (false, _) => title.to_string(),
    }
}
