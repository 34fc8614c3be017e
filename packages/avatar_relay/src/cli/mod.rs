pub mod prefs;
pub mod talk;

pub use talk::{TalkOptions, TerminalPresenter, talk_command};
