//! Async playback driver
//!
//! Runs a [`PlaybackController`] on one task. External inputs (server frames,
//! user lines, settings changes), completion callbacks from the typewriter and
//! the presenter, and the controller's timers are all multiplexed onto a
//! single select loop, so the controller never sees two events at once.

use std::future::pending;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::PlaybackController;
use crate::emotion::Bubble;
use crate::error::PlaybackError;
use crate::prefs::Preferences;
use crate::protocol::{ClientMessage, ReplyPart, ServerFrame};
use crate::state::{AvatarChange, Effect, HistoryEntry, Status, Ticket, TimerId};
use crate::typewriter::Typewriter;

/// Rendering side of playback. Implementations only draw and play; the one
/// way back into the controller is the [`Completion`] handed to `play_audio`.
pub trait Presenter: Send {
    fn reveal_char(&mut self, ch: char);
    fn clear_text(&mut self);
    fn set_emotion_label(&mut self, label: Option<&str>);
    fn apply_avatar(&mut self, change: &AvatarChange);
    fn show_bubble(&mut self, bubble: &Bubble);
    /// Start the clip and resolve `done` when it ends or fails.
    fn play_audio(&mut self, url: &str, done: Completion);
    fn set_input_enabled(&mut self, enabled: bool);
    fn status(&mut self, status: &Status);
    fn history(&mut self, entry: &HistoryEntry);

    /// The displayed part was superseded; drop any audio still playing.
    fn interrupt(&mut self) {}
    /// Auto-record delay elapsed after a finished reply.
    fn start_capture(&mut self) {}
    fn reply_finished(&mut self) {}
}

/// Inputs from outside the driver.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    Connected,
    Disconnected,
    /// Raw text frame from the relay
    Frame(String),
    /// A line from the shared send/continue control
    Line(String),
    SetAutoRead(bool),
    SetAutoReadInterval(u64),
    SetAutoRecord(bool),
    SetTextSpeed(u64),
}

#[derive(Debug)]
enum Internal {
    Char { ticket: Ticket, ch: char },
    RevealDone(Ticket),
    AudioDone(Ticket),
    AudioFailed(Ticket, String),
}

/// Resolves one `play_audio` request. Dropping it unresolved counts as a
/// failure so playback cannot stall.
pub struct Completion {
    ticket: Ticket,
    tx: Option<mpsc::UnboundedSender<Internal>>,
}

impl Completion {
    pub fn finished(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Internal::AudioDone(self.ticket));
        }
    }

    pub fn failed(mut self, reason: impl Into<String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Internal::AudioFailed(self.ticket, reason.into()));
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Internal::AudioFailed(
                self.ticket,
                "playback abandoned".to_string(),
            ));
        }
    }
}

pub struct PlaybackDriver<P: Presenter> {
    controller: PlaybackController,
    presenter: P,
    typewriter: Typewriter,
    outbound: mpsc::Sender<ClientMessage>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    revealing: Option<Ticket>,
    auto_read: Option<(TimerId, Instant)>,
    capture: Option<Instant>,
    history: Vec<HistoryEntry>,
}

impl<P: Presenter> PlaybackDriver<P> {
    pub fn new(
        controller: PlaybackController,
        presenter: P,
        outbound: mpsc::Sender<ClientMessage>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            controller,
            presenter,
            typewriter: Typewriter::new(),
            outbound,
            internal_tx,
            internal_rx,
            revealing: None,
            auto_read: None,
            capture: None,
            history: Vec::new(),
        }
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn preferences(&self) -> &Preferences {
        self.controller.preferences()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Run until `cancel` fires or every input sender is gone. Inputs queued
    /// before cancellation are still applied.
    pub async fn run(&mut self, mut inputs: mpsc::Receiver<DriverEvent>, cancel: CancellationToken) {
        loop {
            let auto_read_at = self.auto_read.map(|(_, at)| at);
            let capture_at = self.capture;

            let effects = tokio::select! {
                biased;
                event = inputs.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => break,
                },
                _ = cancel.cancelled() => break,
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
                _ = wait_until(auto_read_at) => match self.auto_read.take() {
                    Some((timer, _)) => self.controller.on_auto_read_elapsed(timer),
                    None => vec![],
                },
                _ = wait_until(capture_at) => {
                    self.capture = None;
                    self.presenter.start_capture();
                    vec![]
                }
            };
            self.apply(effects).await;
        }

        self.typewriter.stop();
        debug!("playback driver stopped");
    }

    fn on_event(&mut self, event: DriverEvent) -> Vec<Effect> {
        match event {
            DriverEvent::Connected => self.controller.on_connection_opened(),
            DriverEvent::Disconnected => self.controller.on_connection_lost(),
            DriverEvent::Frame(text) => self.on_frame(&text),
            DriverEvent::Line(line) => match self.controller.submit(&line) {
                Ok(effects) => effects,
                Err(PlaybackError::EmptyMessage) => vec![],
                Err(PlaybackError::NotConnected) => {
                    warn!("not connected, message not sent");
                    vec![Effect::Status(Status::Disconnected)]
                }
                Err(e) => {
                    warn!("submit failed: {}", e);
                    vec![]
                }
            },
            DriverEvent::SetAutoRead(enabled) => self.controller.set_auto_read(enabled),
            DriverEvent::SetAutoReadInterval(ms) => self.controller.set_auto_read_interval(ms),
            DriverEvent::SetAutoRecord(enabled) => {
                self.controller.set_auto_record(enabled);
                vec![]
            }
            DriverEvent::SetTextSpeed(speed) => {
                self.controller.set_text_speed(speed);
                vec![]
            }
        }
    }

    /// Malformed frames and invalid parts are logged and skipped.
    fn on_frame(&mut self, text: &str) -> Vec<Effect> {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                error!("dropping malformed frame: {}", e);
                return vec![];
            }
        };
        match frame {
            ServerFrame::Reply(wire) => match ReplyPart::try_from(wire) {
                Ok(part) => self.controller.on_reply(part),
                Err(e) => {
                    error!("dropping reply part: {}", e);
                    vec![]
                }
            },
            ServerFrame::Error { message } => {
                info!("server error: {}", message);
                self.controller.on_server_error(message)
            }
            ServerFrame::Other => vec![],
        }
    }

    fn on_internal(&mut self, internal: Internal) -> Vec<Effect> {
        match internal {
            Internal::Char { ticket, ch } => {
                if self.revealing == Some(ticket) {
                    self.presenter.reveal_char(ch);
                }
                vec![]
            }
            Internal::RevealDone(ticket) => self.controller.on_reveal_finished(ticket),
            Internal::AudioDone(ticket) => self.controller.on_audio_ended(ticket),
            Internal::AudioFailed(ticket, reason) => {
                warn!("audio failed: {}", reason);
                self.controller.on_audio_failed(ticket, reason)
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Transmit(message) => {
                    if self.outbound.send(message).await.is_err() {
                        warn!("outbound channel closed, message dropped");
                    }
                }
                Effect::RevealText {
                    text,
                    delay,
                    ticket,
                } => self.reveal(text, delay, ticket),
                Effect::StopReveal => {
                    self.typewriter.stop();
                    self.revealing = None;
                    self.presenter.interrupt();
                }
                Effect::ClearText => self.presenter.clear_text(),
                Effect::SetEmotionLabel(label) => self.presenter.set_emotion_label(label.as_deref()),
                Effect::ApplyAvatar(change) => self.presenter.apply_avatar(&change),
                Effect::ShowBubble(bubble) => self.presenter.show_bubble(&bubble),
                Effect::PlayAudio { url, ticket } => {
                    let done = Completion {
                        ticket,
                        tx: Some(self.internal_tx.clone()),
                    };
                    self.presenter.play_audio(&url, done);
                }
                Effect::SetInputEnabled(enabled) => self.presenter.set_input_enabled(enabled),
                Effect::Status(status) => self.presenter.status(&status),
                Effect::History(entry) => {
                    self.presenter.history(&entry);
                    self.history.push(entry);
                }
                Effect::StartAutoRead { timer, after } => {
                    self.auto_read = Some((timer, Instant::now() + after));
                }
                Effect::CancelAutoRead { timer } => {
                    if self.auto_read.is_some_and(|(live, _)| live == timer) {
                        self.auto_read = None;
                    }
                }
                Effect::StartCapture { after } => self.capture = Some(Instant::now() + after),
                Effect::ReplyFinished => self.presenter.reply_finished(),
            }
        }
    }

    fn reveal(&mut self, text: String, delay: Duration, ticket: Ticket) {
        self.revealing = Some(ticket);
        let chars = self.internal_tx.clone();
        let done = self.internal_tx.clone();
        self.typewriter.start(
            text,
            delay,
            move |ch| {
                let _ = chars.send(Internal::Char { ticket, ch });
            },
            move || {
                let _ = done.send(Internal::RevealDone(ticket));
            },
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}
