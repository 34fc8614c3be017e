//! Playback State Types
//!
//! States, input events and output effects of the reply playback state machine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::emotion::{Bubble, Emotion};
use crate::protocol::{ClientMessage, ReplyPart};

/// Where the client is in the reply cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// No reply active; free-text input enabled
    #[default]
    Idle,
    /// User message sent, first part of the reply not yet received
    Sending,
    /// A part is being revealed and/or its audio is playing
    Playing,
    /// The current part finished; waiting for an advance trigger
    AwaitingAdvance,
}

/// Identifies one display of one part. Completion events carry it so that
/// late callbacks from a superseded display are ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ticket(pub(crate) u64);

/// Identifies one scheduled auto-read timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Named transition events fed into the controller.
#[derive(Clone, Debug)]
pub enum PlaybackInput {
    ConnectionOpened,
    ConnectionLost,
    /// Shared send/continue control
    Submit { text: String },
    /// Explicit new message, always supersedes the current reply
    Send { text: String },
    Advance,
    ReplyArrived(ReplyPart),
    ServerError { message: String },
    RevealFinished { ticket: Ticket },
    AudioEnded { ticket: Ticket },
    AudioFailed { ticket: Ticket, reason: String },
    AutoReadElapsed { timer: TimerId },
}

/// Avatar change applied when the emotion differs from the previous part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvatarChange {
    pub emotion: Emotion,
    pub image: Option<String>,
    pub animation: Option<String>,
}

/// User-visible status line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Connected,
    Disconnected,
    Thinking,
    PreparingAudio,
    AudioFailed(String),
    PressToContinue,
    PressToClear,
    Cleared,
    Server(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Connected => write!(f, "connected to server"),
            Status::Disconnected => write!(f, "connection lost"),
            Status::Thinking => write!(f, "thinking..."),
            Status::PreparingAudio => write!(f, "preparing audio..."),
            Status::AudioFailed(reason) => write!(f, "audio playback failed: {}", reason),
            Status::PressToContinue => write!(f, "press Enter to continue..."),
            Status::PressToClear => write!(f, "press Enter to clear the dialogue..."),
            Status::Cleared => Ok(()),
            Status::Server(message) => write!(f, "server: {}", message),
        }
    }
}

/// Conversation history for the in-memory session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryEntry {
    User(String),
    Character(String),
    TurnEnd,
}

/// Commands emitted by the controller for the driver to execute.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Transmit(ClientMessage),
    RevealText {
        text: String,
        delay: Duration,
        ticket: Ticket,
    },
    StopReveal,
    ClearText,
    SetEmotionLabel(Option<String>),
    ApplyAvatar(AvatarChange),
    ShowBubble(Bubble),
    PlayAudio {
        url: String,
        ticket: Ticket,
    },
    SetInputEnabled(bool),
    Status(Status),
    History(HistoryEntry),
    StartAutoRead {
        timer: TimerId,
        after: Duration,
    },
    CancelAutoRead {
        timer: TimerId,
    },
    /// Begin speech capture after the given delay
    StartCapture {
        after: Duration,
    },
    /// The terminal part of a reply was advanced past
    ReplyFinished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle() {
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::Cleared.to_string(), "");
        assert_eq!(
            Status::Server("backend down".into()).to_string(),
            "server: backend down"
        );
        assert_eq!(
            Status::AudioFailed("404".into()).to_string(),
            "audio playback failed: 404"
        );
    }
}
