//! Reply Queue & Playback Controller
//!
//! Owns the per-client session: the queue of parts of the reply being played,
//! the part currently on screen and the last emotion shown. Every operation
//! takes one input event and returns the effects the driver must execute; the
//! controller itself performs no I/O and keeps no clocks.
//!
//! ```text
//! Idle --send--> Sending --first part--> Playing --reveal+audio done--> AwaitingAdvance
//!   ^                                       ^                                 |
//!   |                                       +-------- advance (more parts) ---+
//!   +------------------------------- advance (terminal part) -----------------+
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, warn};

use crate::emotion::{Emotion, EmotionTable};
use crate::error::PlaybackError;
use crate::prefs::Preferences;
use crate::protocol::{ClientMessage, ReplyPart};
use crate::state::{
    AvatarChange, Effect, HistoryEntry, PlaybackInput, PlaybackState, Status, Ticket, TimerId,
};

/// Delay between the end of a reply and automatic speech capture.
pub const AUTO_RECORD_DELAY: Duration = Duration::from_millis(500);

/// Per-client session fields.
#[derive(Debug, Default)]
pub struct Session {
    queue: VecDeque<ReplyPart>,
    current_part: Option<ReplyPart>,
    waiting_for_response: bool,
    last_emotion: Option<Emotion>,
}

impl Session {
    /// A reply is active while a part is shown or parts are queued.
    pub fn is_processing(&self) -> bool {
        self.current_part.is_some() || !self.queue.is_empty()
    }

    pub fn is_waiting_for_response(&self) -> bool {
        self.waiting_for_response
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn current_part(&self) -> Option<&ReplyPart> {
        self.current_part.as_ref()
    }

    /// `None` is the neutral expression shown between replies.
    pub fn last_emotion(&self) -> Option<Emotion> {
        self.last_emotion
    }

    /// Insert keeping `part_index` order; returns false for duplicates and
    /// parts already played.
    fn enqueue(&mut self, part: ReplyPart) -> bool {
        if let Some(current) = &self.current_part {
            if part.part_index <= current.part_index {
                return false;
            }
        }
        match self
            .queue
            .binary_search_by_key(&part.part_index, |p| p.part_index)
        {
            Ok(_) => false,
            Err(pos) => {
                self.queue.insert(pos, part);
                true
            }
        }
    }
}

/// Progress of the part currently on screen.
#[derive(Debug, Clone, Copy)]
struct DisplayProgress {
    ticket: Ticket,
    reveal_done: bool,
    audio_done: bool,
}

impl DisplayProgress {
    fn is_complete(&self) -> bool {
        self.reveal_done && self.audio_done
    }
}

pub struct PlaybackController {
    state: PlaybackState,
    session: Session,
    table: EmotionTable,
    prefs: Preferences,
    connected: bool,
    display: Option<DisplayProgress>,
    auto_read: Option<TimerId>,
    /// Advance requested while the next part had not arrived yet
    advance_pending: bool,
    next_ticket: u64,
    next_timer: u64,
}

impl PlaybackController {
    pub fn new(table: EmotionTable, prefs: Preferences) -> Self {
        Self {
            state: PlaybackState::Idle,
            session: Session::default(),
            table,
            prefs,
            connected: false,
            display: None,
            auto_read: None,
            advance_pending: false,
            next_ticket: 0,
            next_timer: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Dispatch a named input event.
    pub fn handle(&mut self, input: PlaybackInput) -> Result<Vec<Effect>, PlaybackError> {
        Ok(match input {
            PlaybackInput::ConnectionOpened => self.on_connection_opened(),
            PlaybackInput::ConnectionLost => self.on_connection_lost(),
            PlaybackInput::Submit { text } => return self.submit(&text),
            PlaybackInput::Send { text } => return self.send(&text),
            PlaybackInput::Advance => self.advance(),
            PlaybackInput::ReplyArrived(part) => self.on_reply(part),
            PlaybackInput::ServerError { message } => self.on_server_error(message),
            PlaybackInput::RevealFinished { ticket } => self.on_reveal_finished(ticket),
            PlaybackInput::AudioEnded { ticket } => self.on_audio_ended(ticket),
            PlaybackInput::AudioFailed { ticket, reason } => self.on_audio_failed(ticket, reason),
            PlaybackInput::AutoReadElapsed { timer } => self.on_auto_read_elapsed(timer),
        })
    }

    pub fn on_connection_opened(&mut self) -> Vec<Effect> {
        self.connected = true;
        vec![
            Effect::Status(Status::Connected),
            Effect::SetInputEnabled(true),
        ]
    }

    /// Abandon whatever was in flight; nothing is resumed on reconnect.
    pub fn on_connection_lost(&mut self) -> Vec<Effect> {
        self.connected = false;
        let mut effects = self.clear_session();
        effects.push(Effect::SetInputEnabled(true));
        effects.push(Effect::Status(Status::Disconnected));
        effects
    }

    /// The shared send/continue control: continues the reply on screen, or
    /// sends a new message when nothing is on screen or playback is stalled
    /// waiting for a part that has not arrived.
    pub fn submit(&mut self, text: &str) -> Result<Vec<Effect>, PlaybackError> {
        let on_screen = matches!(
            self.state,
            PlaybackState::Playing | PlaybackState::AwaitingAdvance
        );
        if on_screen && !self.advance_pending {
            Ok(self.advance())
        } else {
            self.send(text)
        }
    }

    /// Send a new user message, superseding any unfinished reply.
    pub fn send(&mut self, text: &str) -> Result<Vec<Effect>, PlaybackError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(PlaybackError::EmptyMessage);
        }
        if !self.connected {
            return Err(PlaybackError::NotConnected);
        }

        if self.session.is_processing() {
            debug!(
                queued = self.session.queue.len(),
                "new message supersedes unfinished reply"
            );
        }
        let mut effects = self.clear_session();
        self.session.waiting_for_response = true;
        self.state = PlaybackState::Sending;

        effects.push(Effect::History(HistoryEntry::User(content.to_string())));
        effects.push(Effect::SetInputEnabled(false));
        effects.push(Effect::Status(Status::Thinking));
        if let Some(bubble) = &self.table.get(Emotion::Thinking).bubble {
            effects.push(Effect::ShowBubble(bubble.clone()));
        }
        effects.push(Effect::Transmit(ClientMessage::Message {
            content: content.to_string(),
        }));
        Ok(effects)
    }

    pub fn on_reply(&mut self, part: ReplyPart) -> Vec<Effect> {
        self.session.waiting_for_response = false;

        if !part.is_multi_part {
            let mut effects = self.clear_session();
            effects.extend(self.display(part.into_single()));
            return effects;
        }

        let index = part.part_index;
        let current = self.session.current_part.as_ref().map(|p| p.part_index);
        match current {
            None if index == 0 => return self.display(part),
            // Joined mid-reply, or a straggler from a finished one
            None if self.state == PlaybackState::Idle => {
                debug!(part_index = index, "ignoring part of a reply that was never started");
                return vec![];
            }
            // The first part of a new reply replaces the one on screen
            Some(shown) if index == 0 && shown > 0 => {
                let mut effects = self.clear_session();
                effects.extend(self.display(part));
                return effects;
            }
            _ => {}
        }

        if !self.session.enqueue(part) {
            warn!(part_index = index, "dropping duplicate or stale reply part");
            return vec![];
        }

        if self.advance_pending && self.state == PlaybackState::AwaitingAdvance {
            return self.show_next();
        }
        vec![]
    }

    pub fn on_server_error(&mut self, message: String) -> Vec<Effect> {
        let mut effects = vec![Effect::Status(Status::Server(message))];
        if self.state == PlaybackState::Sending {
            self.session.waiting_for_response = false;
            self.state = PlaybackState::Idle;
            effects.push(Effect::SetInputEnabled(true));
        }
        effects
    }

    pub fn on_reveal_finished(&mut self, ticket: Ticket) -> Vec<Effect> {
        match self.display.as_mut() {
            Some(progress) if progress.ticket == ticket => progress.reveal_done = true,
            _ => return vec![],
        }
        self.maybe_complete()
    }

    pub fn on_audio_ended(&mut self, ticket: Ticket) -> Vec<Effect> {
        match self.display.as_mut() {
            Some(progress) if progress.ticket == ticket => progress.audio_done = true,
            _ => return vec![],
        }
        self.maybe_complete()
    }

    /// A failed clip counts as finished so playback cannot stall on it.
    pub fn on_audio_failed(&mut self, ticket: Ticket, reason: String) -> Vec<Effect> {
        if !matches!(self.display, Some(p) if p.ticket == ticket) {
            return vec![];
        }
        let mut effects = vec![Effect::Status(Status::AudioFailed(reason))];
        effects.extend(self.on_audio_ended(ticket));
        effects
    }

    pub fn on_auto_read_elapsed(&mut self, timer: TimerId) -> Vec<Effect> {
        if self.auto_read != Some(timer) || self.state != PlaybackState::AwaitingAdvance {
            return vec![];
        }
        self.auto_read = None;
        self.advance()
    }

    /// Move past the current part: show the next one or end the reply.
    pub fn advance(&mut self) -> Vec<Effect> {
        if self.state != PlaybackState::AwaitingAdvance {
            return vec![];
        }
        let mut effects: Vec<Effect> = self.cancel_auto_read().into_iter().collect();

        let terminal = self
            .session
            .current_part
            .as_ref()
            .is_some_and(ReplyPart::is_terminal);
        if terminal {
            effects.extend(self.finish_reply());
        } else {
            effects.extend(self.show_next());
        }
        effects
    }

    pub fn set_auto_read(&mut self, enabled: bool) -> Vec<Effect> {
        self.prefs.auto_read_enabled = enabled;
        if enabled {
            if self.state == PlaybackState::AwaitingAdvance && self.auto_read.is_none() {
                return vec![self.schedule_auto_read()];
            }
            vec![]
        } else {
            self.cancel_auto_read().into_iter().collect()
        }
    }

    /// Restarts a pending auto-read timer with the new interval.
    pub fn set_auto_read_interval(&mut self, interval_ms: u64) -> Vec<Effect> {
        self.prefs.auto_read_interval_ms = interval_ms;
        match self.cancel_auto_read() {
            Some(cancel) => vec![cancel, self.schedule_auto_read()],
            None => vec![],
        }
    }

    pub fn set_auto_record(&mut self, enabled: bool) {
        self.prefs.auto_record_enabled = enabled;
    }

    /// Applies from the next displayed part.
    pub fn set_text_speed(&mut self, speed: u64) {
        self.prefs.text_speed = speed;
    }

    /// Back to a fresh session; the connection flag is kept.
    pub fn reset(&mut self) -> Vec<Effect> {
        let mut effects = self.clear_session();
        effects.push(Effect::ClearText);
        effects.push(Effect::SetEmotionLabel(None));
        effects.push(Effect::SetInputEnabled(true));
        self.session.last_emotion = None;
        effects
    }

    /// Show the part right after the current one, or remember the request
    /// until that exact part arrives.
    fn show_next(&mut self) -> Vec<Effect> {
        let expected = self
            .session
            .current_part
            .as_ref()
            .map_or(0, |p| p.part_index + 1);
        let next = if self
            .session
            .queue
            .front()
            .is_some_and(|p| p.part_index == expected)
        {
            self.session.queue.pop_front()
        } else {
            None
        };
        match next {
            Some(part) => {
                self.advance_pending = false;
                self.display(part)
            }
            None => {
                self.advance_pending = true;
                vec![]
            }
        }
    }

    fn display(&mut self, part: ReplyPart) -> Vec<Effect> {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;

        let text = part.display_text();
        let mut effects = vec![
            Effect::RevealText {
                text: text.clone(),
                delay: self.prefs.reveal_delay(),
                ticket,
            },
            Effect::SetEmotionLabel(Some(part.original_tag.clone())),
        ];

        // Repeating the emotion must not restart the animation or the bubble.
        if self.session.last_emotion != Some(part.emotion) {
            let presentation = self.table.get(part.emotion);
            effects.push(Effect::ApplyAvatar(AvatarChange {
                emotion: part.emotion,
                image: presentation.image.clone(),
                animation: presentation.animation.clone(),
            }));
            if let Some(bubble) = &presentation.bubble {
                effects.push(Effect::ShowBubble(bubble.clone()));
            }
        }
        self.session.last_emotion = Some(part.emotion);
        effects.push(Effect::History(HistoryEntry::Character(text)));

        let audio = part.audio_source();
        if let Some(url) = &audio {
            effects.push(Effect::Status(Status::PreparingAudio));
            effects.push(Effect::PlayAudio {
                url: url.clone(),
                ticket,
            });
        }

        debug!(
            part_index = part.part_index,
            total_parts = part.total_parts,
            emotion = %part.emotion,
            "displaying reply part"
        );
        self.display = Some(DisplayProgress {
            ticket,
            reveal_done: false,
            audio_done: audio.is_none(),
        });
        self.session.current_part = Some(part);
        self.state = PlaybackState::Playing;
        effects
    }

    fn maybe_complete(&mut self) -> Vec<Effect> {
        if self.state != PlaybackState::Playing
            || !self.display.is_some_and(|p| p.is_complete())
        {
            return vec![];
        }
        self.state = PlaybackState::AwaitingAdvance;
        self.session.waiting_for_response = false;

        let terminal = self
            .session
            .current_part
            .as_ref()
            .is_some_and(ReplyPart::is_terminal);
        let mut effects = vec![Effect::Status(if terminal {
            Status::PressToClear
        } else {
            Status::PressToContinue
        })];
        if self.prefs.auto_read_enabled {
            effects.push(self.schedule_auto_read());
        }
        effects
    }

    fn finish_reply(&mut self) -> Vec<Effect> {
        let mut effects = self.clear_session();
        self.session.last_emotion = None;
        effects.extend([
            Effect::ClearText,
            Effect::SetEmotionLabel(None),
            Effect::Status(Status::Cleared),
            Effect::History(HistoryEntry::TurnEnd),
            Effect::SetInputEnabled(true),
            Effect::ReplyFinished,
        ]);
        if self.prefs.auto_record_enabled {
            effects.push(Effect::StartCapture {
                after: AUTO_RECORD_DELAY,
            });
        }
        effects
    }

    /// Drop queued parts, the current display and any timer; back to Idle.
    fn clear_session(&mut self) -> Vec<Effect> {
        let mut effects: Vec<Effect> = self.cancel_auto_read().into_iter().collect();
        if self.display.take().is_some() {
            effects.push(Effect::StopReveal);
        }
        self.session.queue.clear();
        self.session.current_part = None;
        self.session.waiting_for_response = false;
        self.advance_pending = false;
        self.state = PlaybackState::Idle;
        effects
    }

    fn schedule_auto_read(&mut self) -> Effect {
        let timer = TimerId(self.next_timer);
        self.next_timer += 1;
        self.auto_read = Some(timer);
        Effect::StartAutoRead {
            timer,
            after: self.prefs.auto_read_interval(),
        }
    }

    fn cancel_auto_read(&mut self) -> Option<Effect> {
        self.auto_read
            .take()
            .map(|timer| Effect::CancelAutoRead { timer })
    }
}
