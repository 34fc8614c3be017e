//! Playback error types.

use crate::emotion::Emotion;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("unknown emotion: {0}")]
    UnknownEmotion(String),

    #[error("emotion table has no entry for {0}")]
    MissingEmotion(Emotion),

    #[error("emotion table has more than one entry for {0}")]
    DuplicateEmotion(Emotion),

    #[error("invalid reply part: index {part_index} of {total_parts}")]
    InvalidPart { part_index: u32, total_parts: u32 },

    #[error("message is empty")]
    EmptyMessage,

    #[error("not connected to the server")]
    NotConnected,

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl PlaybackError {
    /// Protocol errors affect a single inbound message; the session continues.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::UnknownEmotion(_) | Self::InvalidPart { .. } | Self::Decode(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_classification() {
        assert!(PlaybackError::UnknownEmotion("x".into()).is_protocol());
        assert!(
            PlaybackError::InvalidPart {
                part_index: 3,
                total_parts: 2
            }
            .is_protocol()
        );
        assert!(!PlaybackError::EmptyMessage.is_protocol());
        assert!(!PlaybackError::NotConnected.is_protocol());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            PlaybackError::UnknownEmotion("开心".into()).to_string(),
            "unknown emotion: 开心"
        );
        assert_eq!(
            PlaybackError::MissingEmotion(Emotion::Shy).to_string(),
            "emotion table has no entry for shy"
        );
    }
}
