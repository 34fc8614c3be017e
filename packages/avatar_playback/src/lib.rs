//! Segmented-reply playback for the avatar chat client.
//!
//! The backend may split one reply into ordered parts. This crate queues
//! those parts and plays them one at a time (text reveal, emotion, audio),
//! advancing only on an explicit trigger or the auto-read timer.
//!
//! # Example
//!
//! ```no_run
//! use avatar_playback::{EmotionTable, PlaybackController, Preferences};
//!
//! let mut controller = PlaybackController::new(EmotionTable::builtin(), Preferences::default());
//! controller.on_connection_opened();
//! let effects = controller.submit("你好").unwrap();
//! for effect in effects {
//!     println!("{:?}", effect);
//! }
//! ```

pub mod controller;
pub mod driver;
pub mod emotion;
pub mod error;
pub mod prefs;
pub mod protocol;
pub mod state;
pub mod typewriter;

pub use controller::{PlaybackController, Session};
pub use driver::{Completion, DriverEvent, PlaybackDriver, Presenter};
pub use emotion::{Bubble, Emotion, EmotionTable, Presentation};
pub use error::PlaybackError;
pub use prefs::Preferences;
pub use protocol::{AUDIO_PATH_PREFIX, ClientMessage, ReplyPart, ServerFrame, WireReply};
pub use state::{
    AvatarChange, Effect, HistoryEntry, PlaybackInput, PlaybackState, Status, Ticket, TimerId,
};
pub use typewriter::Typewriter;
