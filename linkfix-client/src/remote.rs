use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::{
    SinkExt, StreamExt,
    future::BoxFuture,
    stream::{BoxStream, SplitSink, SplitStream},
};
use linkfix_core::{
    AppConfig, BackendEvent, Command, IpcMessage, Outcome, Request, RequestId, Response,
    decode_frame, encode_frame,
};
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 64;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    outbound: mpsc::UnboundedSender<IpcMessage>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Outcome>>>,
    next_id: AtomicU64,
    events: broadcast::Sender<BackendEvent>,
    closed: AtomicBool,
    request_timeout: Duration,
}

impl Connection {
    fn new(
        outbound: mpsc::UnboundedSender<IpcMessage>,
        events: broadcast::Sender<BackendEvent>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
            closed: AtomicBool::new(false),
            request_timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_request(
        &self,
        command: Command,
    ) -> Result<(RequestId, oneshot::Receiver<Outcome>), BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            // `close` flips the flag under this lock, so no entry outlives it.
            let mut pending = self.pending();
            if self.closed.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("connection closed".to_owned()));
            }
            pending.insert(id, reply_tx);
        }

        if self
            .outbound
            .send(IpcMessage::Request(Request { id, command }))
            .is_err()
        {
            self.pending().remove(&id);
            return Err(BackendError::Unavailable("connection closed".to_owned()));
        }
        Ok((id, reply_rx))
    }

    fn resolve(&self, response: Response) {
        match self.pending().remove(&response.id) {
            Some(reply_tx) => {
                let _ = reply_tx.send(response.outcome);
            }
            None => debug!(id = response.id, "reply for an unknown or expired request"),
        }
    }

    fn forget(&self, id: RequestId) {
        self.pending().remove(&id);
    }

    // Dropping the reply senders fails every waiting request.
    fn close(&self) {
        let mut pending = self.pending();
        self.closed.store(true, Ordering::SeqCst);
        pending.clear();
    }
}

pub struct RemoteBackend {
    connection: Arc<Connection>,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteBackend {
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        let (ws_stream, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
            .await
            .map_err(|_| BackendError::Timeout)?
            .map_err(|err| BackendError::Unavailable(format!("connect failed: {err}")))?;
        info!(backend_url = %url, "connected to backend");

        let (write_half, read_half) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let connection = Arc::new(Connection::new(outbound, events, request_timeout));

        let send_task = tokio::spawn(network_send_task(write_half, outbound_rx));
        let receive_task = tokio::spawn(network_receive_task(read_half, Arc::clone(&connection)));

        Ok(Self {
            connection,
            tasks: vec![send_task, receive_task],
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.connection.closed.load(Ordering::SeqCst)
    }

    /// Queues the frame immediately; the returned future only waits for the reply.
    fn request(&self, command: Command) -> BoxFuture<'static, Result<Outcome, BackendError>> {
        let sent = self.connection.send_request(command);
        let connection = Arc::clone(&self.connection);
        Box::pin(async move {
            let (id, reply_rx) = sent?;
            match timeout(connection.request_timeout, reply_rx).await {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(_)) => Err(BackendError::Unavailable(
                    "connection closed before reply".to_owned(),
                )),
                Err(_) => {
                    connection.forget(id);
                    Err(BackendError::Timeout)
                }
            }
        })
    }

    fn command(&self, command: Command) -> BoxFuture<'static, Result<(), BackendError>> {
        let reply = self.request(command);
        Box::pin(async move { expect_done(reply.await?) })
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.connection.close();
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn expect_done(outcome: Outcome) -> Result<(), BackendError> {
    match outcome {
        Outcome::Done => Ok(()),
        Outcome::Failed { message } => Err(BackendError::Rejected(message)),
        Outcome::State(_) => Err(BackendError::Protocol(
            "unexpected state reply to a command".to_owned(),
        )),
    }
}

impl Backend for RemoteBackend {
    fn fetch_state(&self) -> BoxFuture<'static, Result<AppConfig, BackendError>> {
        let reply = self.request(Command::GetState);
        Box::pin(async move {
            match reply.await? {
                Outcome::State(config) => Ok(config),
                Outcome::Failed { message } => Err(BackendError::Rejected(message)),
                Outcome::Done => Err(BackendError::Protocol(
                    "expected a state reply".to_owned(),
                )),
            }
        })
    }

    fn toggle_platform(
        &self,
        platform: &str,
        enabled: bool,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        self.command(Command::TogglePlatform {
            platform: platform.to_owned(),
            enabled,
        })
    }

    fn select_converter(
        &self,
        platform: &str,
        converter_name: &str,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        self.command(Command::SelectConverter {
            platform: platform.to_owned(),
            converter_name: converter_name.to_owned(),
        })
    }

    fn start_clipboard_monitor(&self) -> BoxFuture<'static, Result<(), BackendError>> {
        self.command(Command::StartClipboardMonitor)
    }

    fn events(&self) -> BoxStream<'static, BackendEvent> {
        BroadcastStream::new(self.connection.events.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "backend events lagged");
                        None
                    }
                }
            })
            .boxed()
    }
}

async fn network_send_task(
    mut ws_write: SplitSink<Socket, Message>,
    mut outgoing_rx: mpsc::UnboundedReceiver<IpcMessage>,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await;

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(message) = outgoing else {
                    break;
                };
                match encode_frame(&message) {
                    Ok(frame) => {
                        if ws_write.send(Message::Binary(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!("failed to encode outgoing frame: {}", err),
                }
            }
            _ = keepalive.tick() => {
                if ws_write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn network_receive_task(mut ws_read: SplitStream<Socket>, connection: Arc<Connection>) {
    while let Some(next) = ws_read.next().await {
        let message = match next {
            Ok(msg) => msg,
            Err(err) => {
                warn!("backend read failed: {}", err);
                break;
            }
        };

        match message {
            Message::Binary(data) => match decode_frame(&data) {
                Ok(IpcMessage::Response(response)) => connection.resolve(response),
                Ok(IpcMessage::Event(event)) => {
                    let _ = connection.events.send(event);
                }
                Ok(IpcMessage::Request(request)) => {
                    warn!(id = request.id, "backend sent a request frame; ignored");
                }
                Err(err) => warn!("decode frame failed: {}", err),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    connection.close();
    warn!("backend connection closed");
}
