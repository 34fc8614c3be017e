//! Wire protocol between clients, the relay and the AI backend.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.

use serde::{Deserialize, Serialize};

use crate::emotion::Emotion;
use crate::error::PlaybackError;

/// Path prefix under which the relay serves reply audio.
pub const AUDIO_PATH_PREFIX: &str = "/audio/";

/// Client → relay → backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// A user chat turn
    Message { content: String },
}

/// Backend/relay → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Reply(WireReply),
    /// Emitted by the relay itself, e.g. when the backend is unreachable
    Error { message: String },
    /// Anything else is forwarded by the relay but ignored by clients
    #[serde(other)]
    Other,
}

impl ServerFrame {
    pub fn decode(text: &str) -> Result<Self, PlaybackError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

/// A reply part exactly as the backend sends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_text: Option<String>,
    pub emotion: String,
    #[serde(default)]
    pub original_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub is_multi_part: bool,
    #[serde(default)]
    pub part_index: u32,
    #[serde(default = "default_total_parts")]
    pub total_parts: u32,
}

fn default_total_parts() -> u32 {
    1
}

/// A validated, playable reply part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyPart {
    pub message: String,
    pub motion_text: Option<String>,
    pub emotion: Emotion,
    pub original_tag: String,
    pub audio_file: Option<String>,
    pub audio_url: Option<String>,
    pub is_multi_part: bool,
    pub part_index: u32,
    pub total_parts: u32,
}

impl TryFrom<WireReply> for ReplyPart {
    type Error = PlaybackError;

    fn try_from(wire: WireReply) -> Result<Self, Self::Error> {
        let emotion: Emotion = wire.emotion.parse()?;
        if wire.total_parts == 0 || wire.part_index >= wire.total_parts {
            return Err(PlaybackError::InvalidPart {
                part_index: wire.part_index,
                total_parts: wire.total_parts,
            });
        }
        Ok(Self {
            message: wire.message,
            motion_text: wire.motion_text.filter(|m| !m.is_empty()),
            emotion,
            original_tag: wire.original_tag,
            audio_file: wire.audio_file.filter(|f| !f.is_empty()),
            audio_url: wire.audio_url.filter(|u| !u.is_empty()),
            is_multi_part: wire.is_multi_part,
            part_index: wire.part_index,
            total_parts: wire.total_parts,
        })
    }
}

impl ReplyPart {
    /// Text shown to the user: the message plus the stage direction, if any.
    pub fn display_text(&self) -> String {
        match &self.motion_text {
            Some(motion) => format!("{} （{}）", self.message, motion),
            None => self.message.clone(),
        }
    }

    /// Whether completing this part ends its reply.
    pub fn is_terminal(&self) -> bool {
        self.part_index + 1 == self.total_parts
    }

    /// URL to fetch the part's audio from, preferring the relay's annotation.
    pub fn audio_source(&self) -> Option<String> {
        self.audio_url.clone().or_else(|| {
            self.audio_file
                .as_ref()
                .map(|f| format!("{AUDIO_PATH_PREFIX}{f}"))
        })
    }

    /// Normalize a standalone reply to a one-part reply.
    pub(crate) fn into_single(mut self) -> Self {
        self.is_multi_part = false;
        self.part_index = 0;
        self.total_parts = 1;
        self
    }
}
