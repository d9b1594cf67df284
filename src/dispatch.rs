//! Outbound messages.
//!
//! [`MessageDispatcher`] validates the recipient and hands one message to the
//! active socket. It never retries and never waits for a connection; a
//! session that is not connected fails fast.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::jid::{self, Jid};

/// MIME type audio is always sent with.
pub const AUDIO_MIME_TYPE: &str = "audio/mp4";

/// What gets sent. Serialized as the `content` object of a bridge send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Video {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Audio {
        url: String,
    },
    Sticker {
        url: String,
    },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Media message. Audio and stickers carry no caption, so one passed for
    /// them is dropped.
    pub fn media(kind: MediaKind, url: impl Into<String>, caption: Option<String>) -> Self {
        let url = url.into();
        match kind {
            MediaKind::Image => Self::Image { url, caption },
            MediaKind::Video => Self::Video { url, caption },
            MediaKind::Audio => Self::Audio { url },
            MediaKind::Sticker => Self::Sticker { url },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => MediaKind::Image.as_str(),
            Self::Video { .. } => MediaKind::Video.as_str(),
            Self::Audio { .. } => MediaKind::Audio.as_str(),
            Self::Sticker { .. } => MediaKind::Sticker.as_str(),
        }
    }

    pub fn mimetype(&self) -> Option<&'static str> {
        match self {
            Self::Audio { .. } => Some(AUDIO_MIME_TYPE),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Sticker,
}

impl MediaKind {
    pub const SUPPORTED: &'static str = "image, video, audio, sticker";

    /// Case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "sticker" => Some(Self::Sticker),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Sticker => "sticker",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaOptions {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Loose "one of" request shape. Exactly one field must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageOptions {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<MediaOptions>,
    #[serde(default)]
    pub video: Option<MediaOptions>,
    #[serde(default)]
    pub audio: Option<MediaOptions>,
    #[serde(default)]
    pub sticker: Option<MediaOptions>,
}

impl TryFrom<SendMessageOptions> for MessageContent {
    type Error = Error;

    fn try_from(options: SendMessageOptions) -> Result<Self> {
        let SendMessageOptions {
            text,
            image,
            video,
            audio,
            sticker,
        } = options;
        let media = [
            (MediaKind::Image, image),
            (MediaKind::Video, video),
            (MediaKind::Audio, audio),
            (MediaKind::Sticker, sticker),
        ];
        let set = usize::from(text.is_some()) + media.iter().filter(|(_, m)| m.is_some()).count();
        if set != 1 {
            return Err(Error::invalid(format!(
                "Exactly one of text, {} must be set (got {set})",
                MediaKind::SUPPORTED
            )));
        }

        if let Some(text) = text {
            return Ok(Self::text(text));
        }
        media
            .into_iter()
            .find_map(|(kind, m)| m.map(|m| Self::media(kind, m.url, m.caption)))
            .ok_or_else(|| Error::invalid("No message content"))
    }
}

/// Outcome of one successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub recipient: Jid,
    pub message_id: String,
}

#[derive(Clone)]
pub struct MessageDispatcher {
    manager: ConnectionManager,
}

impl MessageDispatcher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<SendReceipt> {
        self.send_message(recipient, &MessageContent::text(text))
            .await
    }

    /// One send through the active socket. Upstream errors are returned as-is.
    pub async fn send_message(
        &self,
        recipient: &str,
        content: &MessageContent,
    ) -> Result<SendReceipt> {
        let jid = jid::parse_recipient(recipient)?;
        let socket = self.manager.active_socket().await?;

        match socket.send(&jid, content).await {
            Ok(message_id) => {
                info!(
                    recipient = %jid,
                    kind = content.kind_name(),
                    message_id = %message_id,
                    "Message sent"
                );
                Ok(SendReceipt {
                    recipient: jid,
                    message_id,
                })
            }
            Err(e) => {
                warn!(recipient = %jid, kind = content.kind_name(), error = %e, "Send failed");
                Err(e.into())
            }
        }
    }
}
