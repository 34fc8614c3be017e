use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::backend_link::{self, Dialer, LinkSettings, WsDialer};
use crate::config::FileConfig;
use crate::handlers;
use crate::hub::{self, Hub};
use crate::metrics::RelayMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
pub struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: AppState, audio_dir: Option<&Path>) -> Router {
    let mut app: Router<AppState> = Router::new()
        .route("/ws", get(hub::ws_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler));

    if let Some(dir) = audio_dir {
        app = app.nest_service("/audio", ServeDir::new(dir));
    }

    app.layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A running backend link plus the state the HTTP side needs.
pub struct Relay {
    state: AppState,
    audio_dir: Option<PathBuf>,
    cancel: CancellationToken,
    link: JoinHandle<()>,
}

impl Relay {
    /// Start linking to the configured backend.
    pub fn start(config: &FileConfig) -> Self {
        let dialer = WsDialer::new(config.backend.url(), Some(config.server.origin()));
        Self::with_dialer(config, dialer)
    }

    pub fn with_dialer<D: Dialer>(config: &FileConfig, dialer: D) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let (frames, _) = broadcast::channel(config.hub.broadcast_capacity);
        let cancel = CancellationToken::new();

        let settings = LinkSettings {
            reconnect_delay: config.backend.reconnect_delay(),
            send_queue_capacity: config.backend.send_queue_capacity,
        };
        let (backend, link) = backend_link::spawn(
            dialer,
            settings,
            frames.clone(),
            metrics.clone(),
            cancel.child_token(),
        );
        let hub = Hub::new(
            frames,
            backend.clone(),
            metrics.clone(),
            config.hub.send_channel_capacity,
        );

        Self {
            state: AppState {
                hub,
                backend,
                metrics,
                backend_url: Arc::from(config.backend.url()),
            },
            audio_dir: config.server.audio_dir.clone(),
            cancel,
            link,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        router(self.state.clone(), self.audio_dir.as_deref())
    }

    /// Serve HTTP on `listener` until `shutdown` resolves, then stop the link.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(dir) = &self.audio_dir {
            info!("Serving audio from {}", dir.display());
        }
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;
        self.shutdown().await;
        result
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.link.await {
            warn!("Backend link task failed: {}", e);
        }
    }
}
