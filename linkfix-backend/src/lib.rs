use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use linkfix_core::{
    AppConfig, BackendEvent, Command, ConversionEvent, CoreError, IpcMessage, MAX_FRAME_BYTES,
    Outcome, PlatformMetadata, PlatformSource, Response, decode_frame, encode_frame,
    validate_converter_choice,
};
use tokio::{
    net::TcpListener,
    sync::{RwLock, mpsc},
};
use tracing::{debug, error, info, warn};

type ConnectionId = u64;

#[derive(Debug)]
struct BackendInner {
    config: AppConfig,
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    next_connection_id: ConnectionId,
    clipboard_monitor_started: bool,
}

/// Authoritative platform configuration plus the set of connected clients.
#[derive(Debug, Clone)]
pub struct BackendState {
    inner: Arc<RwLock<BackendInner>>,
}

impl BackendState {
    #[must_use]
    pub fn new(mut config: AppConfig) -> Self {
        for issue in config.normalize() {
            warn!("initial config: {}", issue);
        }
        Self {
            inner: Arc::new(RwLock::new(BackendInner {
                config,
                connections: HashMap::new(),
                next_connection_id: 1,
                clipboard_monitor_started: false,
            })),
        }
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(default_config())
    }

    pub async fn config(&self) -> AppConfig {
        self.inner.read().await.config.clone()
    }

    pub async fn clipboard_monitor_started(&self) -> bool {
        self.inner.read().await.clipboard_monitor_started
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn toggle_platform(&self, platform: &str, enabled: bool) -> Result<(), CoreError> {
        let mut backend = self.inner.write().await;
        let source = backend
            .config
            .find_mut(platform)
            .ok_or_else(|| CoreError::UnknownPlatform(platform.to_owned()))?;
        source.enabled = enabled;
        info!(platform, enabled, "platform toggled");
        broadcast_state(&backend);
        Ok(())
    }

    pub async fn select_converter(&self, platform: &str, converter: &str) -> Result<(), CoreError> {
        let mut backend = self.inner.write().await;
        let source = backend
            .config
            .find_mut(platform)
            .ok_or_else(|| CoreError::UnknownPlatform(platform.to_owned()))?;
        validate_converter_choice(source, converter)?;
        source.selected = Some(converter.to_owned());
        info!(platform, converter, "converter selected");
        broadcast_state(&backend);
        Ok(())
    }

    /// Replaces the whole configuration and pushes it to every client.
    pub async fn replace_config(&self, mut config: AppConfig) {
        for issue in config.normalize() {
            warn!("replacement config: {}", issue);
        }
        let mut backend = self.inner.write().await;
        backend.config = config;
        broadcast_state(&backend);
    }

    pub async fn publish_conversion(&self, event: ConversionEvent) {
        let backend = self.inner.read().await;
        debug!(original = %event.original, converted = %event.converted, "link converted");
        broadcast(&backend, &BackendEvent::LinkConverted(event));
    }

    async fn handle_command(&self, command: Command) -> Outcome {
        let result = match command {
            Command::GetState => return Outcome::State(self.config().await),
            Command::TogglePlatform { platform, enabled } => {
                self.toggle_platform(&platform, enabled).await
            }
            Command::SelectConverter {
                platform,
                converter_name,
            } => self.select_converter(&platform, &converter_name).await,
            Command::StartClipboardMonitor => {
                let mut backend = self.inner.write().await;
                if !backend.clipboard_monitor_started {
                    backend.clipboard_monitor_started = true;
                    info!("clipboard monitor started");
                }
                Ok(())
            }
        };

        match result {
            Ok(()) => Outcome::Done,
            Err(err) => Outcome::Failed {
                message: err.to_string(),
            },
        }
    }

    async fn register(&self, tx: mpsc::UnboundedSender<Message>) -> ConnectionId {
        let mut backend = self.inner.write().await;
        let id = backend.next_connection_id;
        backend.next_connection_id += 1;
        backend.connections.insert(id, tx);
        id
    }

    async fn unregister(&self, id: ConnectionId) {
        self.inner.write().await.connections.remove(&id);
    }
}

impl Default for BackendState {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub fn default_config() -> AppConfig {
    fn source(
        platform: &str,
        title: &str,
        icon: &str,
        converters: &[&str],
        selected: &str,
    ) -> PlatformSource {
        PlatformSource {
            platform: platform.to_owned(),
            metadata: PlatformMetadata {
                title: title.to_owned(),
                icon: icon.to_owned(),
            },
            enabled: true,
            converters: converters.iter().map(|name| (*name).to_owned()).collect(),
            selected: Some(selected.to_owned()),
        }
    }

    AppConfig {
        sources: vec![
            source(
                "twitter",
                "Twitter",
                "x",
                &["fxtwitter", "vxtwitter", "fixupx", "fixvx"],
                "fxtwitter",
            ),
            source(
                "bluesky",
                "BlueSky",
                "bluesky",
                &["bsky", "fxbsky", "vxbsky", "bskye", "bskyx"],
                "bsky",
            ),
            source("tiktok", "TikTok", "tiktok", &["tfxktok", "tiktokez"], "tfxktok"),
            source(
                "instagram",
                "Instagram",
                "instagram",
                &["ddinstagram", "kkinstagram", "instagramez", "eeinstagram"],
                "kkinstagram",
            ),
        ],
    }
}

pub fn build_router(state: BackendState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz_handler))
        .route("/conversions", post(conversion_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: BackendState) -> Result<(), String> {
    info!(
        "backend listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn healthz_handler() -> impl IntoResponse {
    Json(serde_json::json!({"ok": true}))
}

async fn conversion_handler(
    State(state): State<BackendState>,
    Json(event): Json<ConversionEvent>,
) -> impl IntoResponse {
    state.publish_conversion(event).await;
    StatusCode::ACCEPTED
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BackendState>) -> impl IntoResponse {
    ws.max_frame_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| async move {
            if let Err(err) = handle_socket(state, socket).await {
                warn!("client session ended with error: {}", err);
            }
        })
}

async fn handle_socket(
    state: BackendState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Split sockets only flush queued pongs when the write half sends, so keep it busy.
    const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(KEEPALIVE_INTERVAL);
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if ws_sender.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let connection_id = state.register(outbound_tx.clone()).await;
    info!("client {} connected", connection_id);

    let mut session_result = Ok(());
    while let Some(next_message) = ws_receiver.next().await {
        let message = match next_message {
            Ok(message) => message,
            Err(err) => {
                session_result = Err(format!("websocket receive error: {err}"));
                break;
            }
        };

        match message {
            Message::Binary(data) => {
                let request = match decode_frame(&data) {
                    Ok(IpcMessage::Request(request)) => request,
                    Ok(_) => {
                        warn!("client {} sent a non-request frame", connection_id);
                        continue;
                    }
                    Err(err) => {
                        warn!("failed to decode frame from {}: {}", connection_id, err);
                        continue;
                    }
                };

                let outcome = state.handle_command(request.command).await;
                let reply = IpcMessage::Response(Response {
                    id: request.id,
                    outcome,
                });
                match encode_frame(&reply) {
                    Ok(frame) => {
                        let _ = outbound_tx.send(Message::Binary(frame.into()));
                    }
                    Err(err) => error!("failed to encode response: {}", err),
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Text(_) => {}
        }
    }

    state.unregister(connection_id).await;
    send_task.abort();
    info!("client {} disconnected", connection_id);
    session_result
}

// Callers hold the state lock so every client observes snapshots in mutation order.
fn broadcast_state(backend: &BackendInner) {
    broadcast(backend, &BackendEvent::StateChanged(backend.config.clone()));
}

fn broadcast(backend: &BackendInner, event: &BackendEvent) {
    let frame = match encode_frame(&IpcMessage::Event(event.clone())) {
        Ok(frame) => frame,
        Err(err) => {
            error!("failed to serialize backend event: {}", err);
            return;
        }
    };

    for tx in backend.connections.values() {
        let _ = tx.send(Message::Binary(frame.clone().into()));
    }
}
