//! WebSocket server
//!
//! Binds TCP or a Unix domain socket, upgrades each accepted stream and
//! runs the per-session loop: route inbound frames in order, ping on the
//! keepalive cadence, close sessions whose pong never arrives. In-flight
//! jobs are independent tasks and keep running when a session closes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use clipsight_config::Settings;
use clipsight_pipeline::{AnalysisService, TranscriptionService};
use clipsight_plugins::{load_plugins, PluginSet};

use crate::connection::{ConnectionRegistry, Session};
use crate::handlers::MessageHandlers;
use crate::messages::RequestParser;
use crate::metrics::record_connections;
use crate::router::MessageRouter;
use crate::state::{ServiceState, ServiceStatus};
use crate::ServerError;

#[derive(Debug, Clone, Copy)]
struct Keepalive {
    ping_interval: Duration,
    ping_timeout: Duration,
    close_timeout: Duration,
}

pub struct WebSocketServer {
    settings: Settings,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    state: Arc<ServiceState>,
}

impl WebSocketServer {
    /// Wire up services, state and routing from settings.
    pub fn new(settings: Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let state = Arc::new(ServiceState::new(
            settings.server.max_concurrent_analyses,
            settings.server.max_concurrent_transcriptions,
        ));

        let plugin_set = PluginSet::new(
            load_plugins(&settings),
            settings.analysis.plugin_skip_interval.clone(),
        );
        let analysis = Arc::new(AnalysisService::new(&settings, plugin_set));
        let transcription = Arc::new(TranscriptionService::new(&settings));

        let handlers = Arc::new(MessageHandlers::new(
            registry.clone(),
            state.clone(),
            analysis,
            transcription,
            RequestParser::new(settings.server.external_host.clone()),
            settings.server.external_host.enabled,
        ));
        let router = Arc::new(MessageRouter::new(registry.clone(), handlers));

        state.set_status(ServiceStatus::Ready);
        tracing::info!(
            max_analyses = settings.server.max_concurrent_analyses,
            max_transcriptions = settings.server.max_concurrent_transcriptions,
            "Server initialized"
        );

        Self {
            settings,
            registry,
            router,
            state,
        }
    }

    pub fn state(&self) -> Arc<ServiceState> {
        self.state.clone()
    }

    fn keepalive(&self) -> Keepalive {
        Keepalive {
            ping_interval: Duration::from_secs(self.settings.server.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.settings.server.ping_timeout_secs),
            close_timeout: Duration::from_secs(self.settings.server.close_timeout_secs),
        }
    }

    /// Bind and serve until the task is cancelled.
    pub async fn run(&self) -> Result<(), ServerError> {
        match self.settings.server.socket_path.clone() {
            Some(socket_path) => self.serve_unix(&socket_path).await,
            None => self.serve_tcp().await,
        }
    }

    async fn serve_tcp(&self) -> Result<(), ServerError> {
        let addr = format!(
            "{}:{}",
            self.settings.server.host, self.settings.server.port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;
        tracing::info!(%addr, "Server listening");

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| ServerError::Transport(e.to_string()))?;
            self.spawn_session(stream, peer.to_string());
        }
    }

    async fn serve_unix(&self, socket_path: &str) -> Result<(), ServerError> {
        let path = Path::new(socket_path);
        if path.exists() {
            tracing::warn!(socket = socket_path, "Removing stale socket");
            std::fs::remove_file(path)
                .map_err(|e| ServerError::Bind(format!("{socket_path}: {e}")))?;
        }

        let listener = UnixListener::bind(path)
            .map_err(|e| ServerError::Bind(format!("{socket_path}: {e}")))?;
        tracing::info!(socket = socket_path, "Server listening");

        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| ServerError::Transport(e.to_string()))?;
            self.spawn_session(stream, socket_path.to_string());
        }
    }

    fn spawn_session<S>(&self, stream: S, remote: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let router = self.router.clone();
        let registry = self.registry.clone();
        let keepalive = self.keepalive();
        tokio::spawn(async move {
            handle_connection(stream, remote, router, registry, keepalive).await;
        });
    }
}

/// Per-session lifecycle: upgrade, register, read in order, keepalive,
/// close, unregister.
async fn handle_connection<S>(
    stream: S,
    remote: String,
    router: Arc<MessageRouter>,
    registry: Arc<ConnectionRegistry>,
    keepalive: Keepalive,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%remote, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (sink, mut inbound) = ws.split();
    let session = Arc::new(Session::new(remote.clone(), sink));
    registry.register(&session);
    record_connections(registry.connection_count());

    let mut ping_timer = tokio::time::interval_at(
        Instant::now() + keepalive.ping_interval,
        keepalive.ping_interval,
    );
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            message = inbound.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        router.route_message(&session, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        session.send_raw(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(%remote, "Client requested close");
                        break;
                    }
                    Some(Ok(_)) => {
                        tracing::warn!(%remote, "Received non-text message");
                    }
                    Some(Err(e)) => {
                        tracing::info!(%remote, error = %e, "Connection error");
                        break;
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > keepalive.ping_timeout {
                    tracing::info!(%remote, "Keepalive timeout, closing session");
                    break;
                }
                if !session.send_raw(Message::Ping(Vec::new())).await {
                    break;
                }
            }
        }
    }

    // Closed flag first: pending sends from in-flight jobs are dropped from
    // here on, while the jobs themselves run to completion.
    session.close();
    registry.unregister(&session);
    record_connections(registry.connection_count());
    let _ = tokio::time::timeout(keepalive.close_timeout, session.close_handshake()).await;
}
