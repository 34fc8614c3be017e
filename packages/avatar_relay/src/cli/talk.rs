//! `avatar talk`: chat with the character from a terminal.
//!
//! Lines typed on stdin go to the shared send/continue control; an empty
//! line continues. Lines starting with `/` change playback settings.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use avatar_playback::{
    AvatarChange, Bubble, ClientMessage, Completion, DriverEvent, EmotionTable, HistoryEntry,
    PlaybackController, PlaybackDriver, Preferences, Presenter, Status,
};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::prefs::PrefsStore;

const HELP: &str = "\
commands:
  <text>             send a message (Enter on an empty line continues)
  /auto on|off       toggle auto-read
  /interval <ms>     auto-read delay
  /speed <n>         text speed (higher is faster)
  /record on|off     toggle auto-record
  /quit              leave";

/// Settings given on the command line; they override and update the stored
/// preferences.
#[derive(Debug, Default, Clone)]
pub struct TalkOptions {
    pub url: String,
    pub auto_read: Option<bool>,
    pub auto_read_interval_ms: Option<u64>,
    pub auto_record: Option<bool>,
    pub text_speed: Option<u64>,
    pub prefs_path: Option<PathBuf>,
}

impl TalkOptions {
    fn apply(&self, prefs: &mut Preferences) {
        if let Some(enabled) = self.auto_read {
            prefs.auto_read_enabled = enabled;
        }
        if let Some(ms) = self.auto_read_interval_ms {
            prefs.auto_read_interval_ms = ms;
        }
        if let Some(enabled) = self.auto_record {
            prefs.auto_record_enabled = enabled;
        }
        if let Some(speed) = self.text_speed {
            prefs.text_speed = speed;
        }
    }
}

#[derive(Debug)]
enum Command {
    Event(DriverEvent),
    Help,
    Quit,
}

fn parse_line(line: &str) -> Result<Command, String> {
    let Some(rest) = line.trim().strip_prefix('/') else {
        return Ok(Command::Event(DriverEvent::Line(line.to_string())));
    };
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next();

    let event = match (name, arg) {
        ("quit" | "exit", _) => return Ok(Command::Quit),
        ("help", _) => return Ok(Command::Help),
        ("auto", Some(v)) => DriverEvent::SetAutoRead(parse_switch(v)?),
        ("record", Some(v)) => DriverEvent::SetAutoRecord(parse_switch(v)?),
        ("interval", Some(v)) => DriverEvent::SetAutoReadInterval(parse_number(v)?),
        ("speed", Some(v)) => DriverEvent::SetTextSpeed(parse_number(v)?),
        ("auto" | "record" | "interval" | "speed", None) => {
            return Err(format!("/{} needs a value", name));
        }
        _ => return Err(format!("unknown command /{} (try /help)", name)),
    };
    Ok(Command::Event(event))
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got {:?}", other)),
    }
}

fn parse_number(value: &str) -> Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("expected a number, got {:?}", value))
}

/// `ws://host:port/ws` → `http://host:port`
fn http_base(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    let scheme = match scheme {
        "ws" => "http",
        "wss" => "https",
        _ => return None,
    };
    let authority = rest.split('/').next().filter(|a| !a.is_empty())?;
    Some(format!("{}://{}", scheme, authority))
}

/// Renders playback as plain text. Audio cannot play in a terminal, so clips
/// complete immediately.
pub struct TerminalPresenter<W: Write + Send> {
    out: W,
    http_base: Option<String>,
}

impl<W: Write + Send> TerminalPresenter<W> {
    pub fn new(out: W, http_base: Option<String>) -> Self {
        Self { out, http_base }
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> Presenter for TerminalPresenter<W> {
    fn reveal_char(&mut self, ch: char) {
        let mut buf = [0u8; 4];
        self.write(ch.encode_utf8(&mut buf));
    }

    fn clear_text(&mut self) {
        self.write("\n");
    }

    fn set_emotion_label(&mut self, label: Option<&str>) {
        if let Some(label) = label {
            self.write(&format!("\n[{}] ", label));
        }
    }

    fn apply_avatar(&mut self, change: &AvatarChange) {
        debug!(emotion = %change.emotion, image = ?change.image, "avatar changed");
    }

    fn show_bubble(&mut self, bubble: &Bubble) {
        debug!(image = %bubble.image, "bubble");
    }

    fn play_audio(&mut self, url: &str, done: Completion) {
        match &self.http_base {
            Some(base) if url.starts_with('/') => debug!("audio: {}{}", base, url),
            _ => debug!("audio: {}", url),
        }
        done.finished();
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        if enabled {
            self.write("\n> ");
        }
    }

    fn status(&mut self, status: &Status) {
        let text = status.to_string();
        if !text.is_empty() {
            self.write(&format!("\n({})", text));
        }
    }

    fn history(&mut self, _entry: &HistoryEntry) {}

    fn start_capture(&mut self) {
        debug!("speech capture is not available in the terminal");
    }
}

/// Feed relay frames to the driver. When the relay goes away the driver is
/// told so before it is stopped; returns whether that happened.
async fn forward_frames<S>(
    mut frames: S,
    events: mpsc::Sender<DriverEvent>,
    cancel: CancellationToken,
) -> bool
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    if events.send(DriverEvent::Connected).await.is_err() {
        return false;
    }
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let event = DriverEvent::Frame(text.as_str().to_owned());
                if events.send(event).await.is_err() {
                    return false;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Relay connection error: {}", e);
                break;
            }
        }
    }
    let _ = events.send(DriverEvent::Disconnected).await;
    cancel.cancel();
    true
}

pub async fn talk_command(options: TalkOptions) -> Result<()> {
    let store = options
        .prefs_path
        .clone()
        .map(PrefsStore::new)
        .or_else(PrefsStore::default_location);
    let mut prefs = store.as_ref().map(PrefsStore::load).unwrap_or_default();
    options.apply(&mut prefs);

    let (ws_stream, _) = tokio_tungstenite::connect_async(options.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", options.url))?;
    info!("Connected to {}", options.url);
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let (inputs_tx, inputs_rx) = mpsc::channel::<DriverEvent>(64);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(16);
    let cancel = CancellationToken::new();

    let presenter = TerminalPresenter::new(std::io::stdout(), http_base(&options.url));
    let controller = PlaybackController::new(EmotionTable::builtin(), prefs);
    let mut driver = PlaybackDriver::new(controller, presenter, outbound_tx);

    // Driver → relay
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_write.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    // Relay → driver
    let reader = tokio::spawn(forward_frames(ws_read, inputs_tx.clone(), cancel.clone()));

    // Stdin is read on a plain thread so a pending read never holds up exit.
    let stdin_tx = inputs_tx;
    let stdin_cancel = cancel.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_line(&line) {
                Ok(Command::Event(event)) => {
                    if stdin_tx.blocking_send(event).is_err() {
                        return;
                    }
                }
                Ok(Command::Help) => eprintln!("{}", HELP),
                Ok(Command::Quit) => break,
                Err(msg) => eprintln!("{}", msg),
            }
        }
        stdin_cancel.cancel();
    });

    driver.run(inputs_rx, cancel).await;

    reader.abort();
    if matches!(reader.await, Ok(true)) {
        eprintln!("\n[avatar: connection to relay lost]");
    }

    if let Some(store) = &store {
        store.save(driver.preferences())?;
        debug!("Preferences saved to {}", store.path().display());
    }

    drop(driver);
    let _ = writer.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_playback::Emotion;

    fn event(line: &str) -> DriverEvent {
        match parse_line(line).unwrap() {
            Command::Event(event) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn plain_lines_are_sent_untouched() {
        assert!(matches!(event("  你好 "), DriverEvent::Line(l) if l == "  你好 "));
        assert!(matches!(event(""), DriverEvent::Line(l) if l.is_empty()));
    }

    #[test]
    fn slash_commands() {
        assert!(matches!(event("/auto on"), DriverEvent::SetAutoRead(true)));
        assert!(matches!(event("/record off"), DriverEvent::SetAutoRecord(false)));
        assert!(matches!(
            event("/interval 3000"),
            DriverEvent::SetAutoReadInterval(3000)
        ));
        assert!(matches!(event("/speed 90"), DriverEvent::SetTextSpeed(90)));
        assert!(matches!(parse_line("/quit"), Ok(Command::Quit)));
        assert!(matches!(parse_line("/help"), Ok(Command::Help)));
    }

    #[test]
    fn bad_commands_are_rejected() {
        assert!(parse_line("/auto maybe").is_err());
        assert!(parse_line("/speed fast").is_err());
        assert!(parse_line("/interval").is_err());
        assert!(parse_line("/dance").is_err());
    }

    #[test]
    fn http_base_from_ws_url() {
        assert_eq!(
            http_base("ws://localhost:3000/ws").as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(
            http_base("wss://chat.example/ws").as_deref(),
            Some("https://chat.example")
        );
        assert_eq!(http_base("http://x/ws"), None);
        assert_eq!(http_base("ws://"), None);
    }

    #[test]
    fn options_override_stored_prefs() {
        let mut prefs = Preferences::default();
        let options = TalkOptions {
            auto_read: Some(true),
            text_speed: Some(100),
            ..Default::default()
        };
        options.apply(&mut prefs);
        assert!(prefs.auto_read_enabled);
        assert_eq!(prefs.text_speed, 100);
        assert_eq!(prefs.auto_read_interval_ms, 2000);
    }

    #[tokio::test]
    async fn relay_loss_reaches_driver_before_cancel() {
        let frames = futures::stream::iter(vec![
            Ok(Message::Text(r#"{"type":"pong"}"#.into())),
            Ok(Message::Ping(Vec::new().into())),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        assert!(forward_frames(frames, tx, cancel.clone()).await);
        assert!(matches!(rx.recv().await, Some(DriverEvent::Connected)));
        assert!(matches!(rx.recv().await, Some(DriverEvent::Frame(f)) if f == r#"{"type":"pong"}"#));
        assert!(matches!(rx.recv().await, Some(DriverEvent::Disconnected)));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn closed_driver_stops_forwarding_quietly() {
        let frames = futures::stream::iter(vec![Ok::<_, WsError>(Message::Text("x".into()))]);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let cancel = CancellationToken::new();

        assert!(!forward_frames(frames, tx, cancel.clone()).await);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn presenter_renders_label_text_and_prompt() {
        let mut presenter = TerminalPresenter::new(Vec::new(), None);
        presenter.set_emotion_label(Some("高兴"));
        for ch in "早上好".chars() {
            presenter.reveal_char(ch);
        }
        presenter.status(&Status::PressToClear);
        presenter.status(&Status::Cleared);
        presenter.apply_avatar(&AvatarChange {
            emotion: Emotion::Happy,
            image: None,
            animation: None,
        });
        presenter.set_input_enabled(true);

        let out = String::from_utf8(presenter.out).unwrap();
        assert_eq!(
            out,
            "\n[高兴] 早上好\n(press Enter to clear the dialogue...)\n> "
        );
    }
}
