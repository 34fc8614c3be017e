//! Backend Link
//!
//! Holds zero or one live upstream WebSocket to the AI backend. Connects on
//! spawn, sends the handshake, then pumps frames both ways until the
//! connection drops; after a fixed delay it dials again, forever, until
//! cancelled.
//!
//! The current upstream sender is published on a `watch` channel: `Some`
//! while connected, `None` otherwise. Only the link task writes it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    http::{HeaderValue, header::ORIGIN},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::metrics::RelayMetrics;
use crate::protocol;

type UpstreamSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// An established upstream connection, split into its two halves.
pub struct UpstreamConnection {
    sink: UpstreamSink,
    stream: UpstreamStream,
}

impl UpstreamConnection {
    pub fn new<S>(socket: S) -> Self
    where
        S: Sink<Message, Error = tungstenite::Error>
            + Stream<Item = Result<Message, tungstenite::Error>>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();
        Self::from_parts(sink, stream)
    }

    pub fn from_parts<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Message, Error = tungstenite::Error> + Send + 'static,
        St: Stream<Item = Result<Message, tungstenite::Error>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens upstream connections.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self) -> impl Future<Output = Result<UpstreamConnection, RelayError>> + Send;
}

/// Dials the backend over a real WebSocket.
#[derive(Clone, Debug)]
pub struct WsDialer {
    url: String,
    origin: Option<String>,
}

impl WsDialer {
    pub fn new(url: impl Into<String>, origin: Option<String>) -> Self {
        Self {
            url: url.into(),
            origin,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Dialer for WsDialer {
    async fn dial(&self) -> Result<UpstreamConnection, RelayError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(origin) = &self.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|_| RelayError::InvalidRequest(format!("bad origin {:?}", origin)))?;
            request.headers_mut().insert(ORIGIN, value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|source| RelayError::Connect {
                url: self.url.clone(),
                source,
            })?;
        Ok(UpstreamConnection::new(socket))
    }
}

#[derive(Clone, Debug)]
pub struct LinkSettings {
    pub reconnect_delay: Duration,
    pub send_queue_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            send_queue_capacity: 64,
        }
    }
}

type UpstreamRef = Option<mpsc::Sender<String>>;

/// Cheap handle used by the hub to reach the backend.
#[derive(Clone)]
pub struct BackendHandle {
    upstream: watch::Receiver<UpstreamRef>,
}

impl BackendHandle {
    pub fn is_available(&self) -> bool {
        self.upstream.borrow().is_some()
    }

    /// Forward one raw client frame. Nothing is queued while disconnected.
    pub async fn send(&self, raw: String) -> Result<(), RelayError> {
        let upstream = self.upstream.borrow().clone();
        match upstream {
            Some(tx) => tx
                .send(raw)
                .await
                .map_err(|_| RelayError::BackendUnavailable),
            None => Err(RelayError::BackendUnavailable),
        }
    }

    /// Resolves once availability equals `available`, or the link is gone.
    pub async fn wait_for_availability(&self, available: bool) {
        let mut rx = self.upstream.clone();
        let _ = rx.wait_for(|u| u.is_some() == available).await;
    }

    /// Availability changes as a watch channel of booleans.
    pub fn availability(&self) -> watch::Receiver<bool> {
        let mut upstream = self.upstream.clone();
        let (tx, rx) = watch::channel(upstream.borrow_and_update().is_some());
        tokio::spawn(async move {
            while upstream.changed().await.is_ok() {
                let available = upstream.borrow_and_update().is_some();
                tx.send_if_modified(|current| {
                    let changed = *current != available;
                    *current = available;
                    changed
                });
                if tx.is_closed() {
                    break;
                }
            }
        });
        rx
    }
}

pub struct BackendLink<D: Dialer> {
    dialer: D,
    settings: LinkSettings,
    upstream: watch::Sender<UpstreamRef>,
    frames: broadcast::Sender<String>,
    metrics: Arc<RelayMetrics>,
    cancel: CancellationToken,
}

/// Start the link task. Annotated backend frames are published on `frames`.
pub fn spawn<D: Dialer>(
    dialer: D,
    settings: LinkSettings,
    frames: broadcast::Sender<String>,
    metrics: Arc<RelayMetrics>,
    cancel: CancellationToken,
) -> (BackendHandle, JoinHandle<()>) {
    let (upstream, upstream_rx) = watch::channel(None);
    let link = BackendLink {
        dialer,
        settings,
        upstream,
        frames,
        metrics,
        cancel,
    };
    let task = tokio::spawn(link.run());
    (
        BackendHandle {
            upstream: upstream_rx,
        },
        task,
    )
}

impl<D: Dialer> BackendLink<D> {
    async fn run(self) {
        loop {
            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => break,
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(connection) => {
                    info!("Connected to backend");
                    self.metrics.backend_connected();
                    self.session(connection).await;
                    self.upstream.send_replace(None);
                    self.metrics.backend_disconnected();
                }
                Err(e) if e.is_refused() => {
                    self.metrics.backend_connect_failed();
                    warn!("Backend not reachable (connection refused)");
                }
                Err(e) => {
                    self.metrics.backend_connect_failed();
                    warn!("Backend connection failed: {}", e);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            info!(
                "Retrying backend connection in {} ms",
                self.settings.reconnect_delay.as_millis()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }

        self.upstream.send_replace(None);
        debug!("Backend link stopped");
    }

    /// Pump one connection until it closes, fails or the link is cancelled.
    async fn session(&self, connection: UpstreamConnection) {
        let UpstreamConnection {
            mut sink,
            mut stream,
        } = connection;

        if let Err(e) = sink.send(Message::Text(protocol::handshake().into())).await {
            warn!("Backend handshake failed: {}", e);
            return;
        }

        let (tx, mut rx) = mpsc::channel::<String>(self.settings.send_queue_capacity);
        self.upstream.send_replace(Some(tx));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(raw) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(raw.into())).await {
                        warn!("Failed to write to backend: {}", e);
                        break;
                    }
                    self.metrics.message_forwarded();
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.publish(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Backend closed the connection");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => debug!("Ignoring binary frame from backend"),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Backend connection error: {}", e);
                        break;
                    }
                },
            }
        }
    }

    fn publish(&self, text: &str) {
        match protocol::prepare_upstream_frame(text) {
            Ok(frame) => {
                self.metrics.frame_broadcast();
                if self.frames.send(frame).is_err() {
                    debug!("No clients connected, backend frame discarded");
                }
            }
            Err(e) => {
                self.metrics.malformed_frame();
                error!("Dropping backend frame: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Backend side of an in-memory connection.
    struct FakeBackend {
        received: fmpsc::UnboundedReceiver<Message>,
        frames: fmpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
    }

    impl FakeBackend {
        async fn next_text(&mut self) -> String {
            match self.received.next().await {
                Some(Message::Text(text)) => text.as_str().to_owned(),
                other => panic!("expected text frame, got {:?}", other),
            }
        }

        fn push(&self, text: &str) {
            self.frames
                .unbounded_send(Ok(Message::Text(text.to_owned().into())))
                .unwrap();
        }
    }

    fn pair() -> (UpstreamConnection, FakeBackend) {
        let (to_backend, received) = fmpsc::unbounded::<Message>();
        let (frames, from_backend) = fmpsc::unbounded();
        let sink = to_backend.sink_map_err(|_| tungstenite::Error::ConnectionClosed);
        (
            UpstreamConnection::from_parts(sink, from_backend),
            FakeBackend { received, frames },
        )
    }

    /// Hands out scripted connections, then refuses.
    #[derive(Clone, Default)]
    struct ScriptedDialer {
        script: Arc<Mutex<VecDeque<UpstreamConnection>>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedDialer {
        fn push(&self, connection: UpstreamConnection) {
            self.script.lock().unwrap().push_back(connection);
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Dialer for ScriptedDialer {
        fn dial(&self) -> impl Future<Output = Result<UpstreamConnection, RelayError>> + Send {
            self.attempts.lock().unwrap().push(Instant::now());
            let next = self.script.lock().unwrap().pop_front();
            async move { next.ok_or(RelayError::Transport(tungstenite::Error::ConnectionClosed)) }
        }
    }

    struct Running {
        handle: BackendHandle,
        frames: broadcast::Receiver<String>,
        metrics: Arc<RelayMetrics>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    fn start(dialer: ScriptedDialer) -> Running {
        let (frames_tx, frames) = broadcast::channel(16);
        let metrics = Arc::new(RelayMetrics::new());
        let cancel = CancellationToken::new();
        let (handle, task) = spawn(
            dialer,
            LinkSettings::default(),
            frames_tx,
            metrics.clone(),
            cancel.clone(),
        );
        Running {
            handle,
            frames,
            metrics,
            cancel,
            task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_attempts_are_spaced_by_delay() {
        let dialer = ScriptedDialer::default();
        let running = start(dialer.clone());

        tokio::time::sleep(Duration::from_millis(16_000)).await;
        let attempts = dialer.attempts();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
        assert!(!running.handle.is_available());
        assert_eq!(running.metrics.snapshot().backend.connect_failures, 4);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_precedes_availability() {
        let dialer = ScriptedDialer::default();
        let (conn, mut backend) = pair();
        dialer.push(conn);
        let running = start(dialer);

        running.handle.wait_for_availability(true).await;
        let first = backend.next_text().await;
        assert_eq!(first, protocol::handshake());

        running.cancel.cancel();
        running.task.await.unwrap();
        assert!(!running.handle.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn client_frames_are_forwarded_verbatim() {
        let dialer = ScriptedDialer::default();
        let (conn, mut backend) = pair();
        dialer.push(conn);
        let running = start(dialer);
        running.handle.wait_for_availability(true).await;
        backend.next_text().await;

        let raw = r#"{"content": "你好",   "type":"message"}"#;
        running.handle.send(raw.to_string()).await.unwrap();
        assert_eq!(backend.next_text().await, raw);
        assert_eq!(running.metrics.snapshot().messages.forwarded, 1);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backend_frames_are_annotated_and_published() {
        let dialer = ScriptedDialer::default();
        let (conn, backend) = pair();
        dialer.push(conn);
        let mut running = start(dialer);
        running.handle.wait_for_availability(true).await;

        backend.push("definitely not json");
        backend.push(r#"{"type":"reply","message":"a","audioFile":"p0.wav"}"#);
        backend.push(r#"{"type":"status","ok":true}"#);

        let first: serde_json::Value =
            serde_json::from_str(&running.frames.recv().await.unwrap()).unwrap();
        assert_eq!(first["audioUrl"], "/audio/p0.wav");
        let second: serde_json::Value =
            serde_json::from_str(&running.frames.recv().await.unwrap()).unwrap();
        assert_eq!(second, serde_json::json!({"type": "status", "ok": true}));
        assert_eq!(running.metrics.snapshot().messages.malformed, 1);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_fails_while_disconnected_then_recovers() {
        let dialer = ScriptedDialer::default();
        let (first_conn, first_backend) = pair();
        dialer.push(first_conn);
        let running = start(dialer.clone());
        running.handle.wait_for_availability(true).await;

        let (second_conn, mut second_backend) = pair();
        dialer.push(second_conn);
        drop(first_backend);
        running.handle.wait_for_availability(false).await;
        let lost_at = Instant::now();

        assert!(matches!(
            running.handle.send("{}".to_string()).await,
            Err(RelayError::BackendUnavailable)
        ));

        running.handle.wait_for_availability(true).await;
        assert_eq!(Instant::now() - lost_at, Duration::from_secs(5));
        assert_eq!(dialer.attempts().len(), 2);
        second_backend.next_text().await;
        running.handle.send("{}".to_string()).await.unwrap();
        assert_eq!(second_backend.next_text().await, "{}");

        let snapshot = running.metrics.snapshot();
        assert_eq!(snapshot.backend.connects, 2);
        assert_eq!(snapshot.backend.disconnects, 1);

        running.cancel.cancel();
        running.task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn availability_watch_tracks_link() {
        let dialer = ScriptedDialer::default();
        let (conn, backend) = pair();
        dialer.push(conn);
        let running = start(dialer);

        let mut availability = running.handle.availability();
        availability.wait_for(|up| *up).await.unwrap();
        drop(backend);
        availability.wait_for(|up| !*up).await.unwrap();

        running.cancel.cancel();
        running.task.await.unwrap();
    }
}
