use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::{StreamExt, stream::BoxStream};
use linkfix_core::{AppConfig, BackendEvent, ConversionEvent, PlatformSource};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendError};

const CONVERSION_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Enabled,
    Selected,
}

/// Lifecycle of one optimistic field: `Confirmed -> Optimistic -> {Confirmed | RolledBack}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPhase {
    #[default]
    Confirmed,
    Optimistic,
    RolledBack,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("configuration is still loading")]
    Loading,
    #[error("configuration unavailable: {0}")]
    Unavailable(String),
    #[error("platform not found: {0}")]
    NotFound(String),
    #[error("converter {converter} is not offered for {platform}")]
    InvalidArgument { platform: String, converter: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("store has been shut down")]
    Closed,
}

/// One accepted state of the store. Cheap to share: subscribers receive `Arc<Snapshot>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub status: LoadStatus,
    /// Last known good configuration; survives a later pull failure.
    pub config: Option<Arc<AppConfig>>,
    /// Set by the rollback of a failed mutation, cleared by the next authoritative snapshot.
    pub last_error: Option<String>,
    phases: BTreeMap<(String, Field), FieldPhase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformView {
    pub source: PlatformSource,
    pub enabled_phase: FieldPhase,
    pub selected_phase: FieldPhase,
}

impl Snapshot {
    fn loading() -> Self {
        Self {
            version: 0,
            status: LoadStatus::Loading,
            config: None,
            last_error: None,
            phases: BTreeMap::new(),
        }
    }

    pub fn phase(&self, platform: &str, field: Field) -> FieldPhase {
        self.phases
            .get(&(platform.to_owned(), field))
            .copied()
            .unwrap_or_default()
    }

    pub fn config(&self) -> Result<&Arc<AppConfig>, StoreError> {
        match (&self.config, &self.status) {
            (Some(config), _) => Ok(config),
            (None, LoadStatus::Failed(message)) => Err(StoreError::Unavailable(message.clone())),
            (None, _) => Err(StoreError::Loading),
        }
    }

    pub fn platform(&self, id: &str) -> Result<PlatformView, StoreError> {
        let source = self
            .config()?
            .find(id)
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;
        Ok(PlatformView {
            source: source.clone(),
            enabled_phase: self.phase(id, Field::Enabled),
            selected_phase: self.phase(id, Field::Selected),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Enabled(bool),
    Selected(Option<String>),
}

impl FieldValue {
    fn field(&self) -> Field {
        match self {
            FieldValue::Enabled(_) => Field::Enabled,
            FieldValue::Selected(_) => Field::Selected,
        }
    }

    fn read(source: &PlatformSource, field: Field) -> Self {
        match field {
            Field::Enabled => FieldValue::Enabled(source.enabled),
            Field::Selected => FieldValue::Selected(source.selected.clone()),
        }
    }

    fn write(&self, source: &mut PlatformSource) {
        match self {
            FieldValue::Enabled(enabled) => source.enabled = *enabled,
            FieldValue::Selected(selected) => source.selected = selected.clone(),
        }
    }
}

type FieldKey = (String, Field);

#[derive(Debug)]
struct PendingWrite {
    ticket: u64,
    /// Value to restore on failure: the last confirmed value, even across stacked writes.
    base: FieldValue,
}

#[derive(Debug)]
struct StagedWrite {
    key: FieldKey,
    ticket: u64,
}

struct StoreState {
    snapshot: Arc<Snapshot>,
    /// Count of authoritative applies; a pull only lands if this is unchanged since it was issued.
    epoch: u64,
    next_ticket: u64,
    pending: HashMap<FieldKey, PendingWrite>,
    listeners: HashMap<u64, mpsc::UnboundedSender<Arc<Snapshot>>>,
    next_listener_id: u64,
    tasks: Vec<JoinHandle<()>>,
    initialized: bool,
    closed: bool,
}

impl StoreState {
    // Sends happen under the state lock, which gives every listener the same order.
    fn publish(&mut self, mut next: Snapshot) {
        next.version = self.snapshot.version + 1;
        let next = Arc::new(next);
        self.snapshot = Arc::clone(&next);
        self.listeners
            .retain(|_, tx| tx.send(Arc::clone(&next)).is_ok());
    }

    fn apply_authoritative(&mut self, mut config: AppConfig, origin: &'static str) {
        for issue in config.normalize() {
            warn!(origin, "{}", issue);
        }
        self.epoch += 1;
        self.pending.clear();
        self.publish(Snapshot {
            version: 0,
            status: LoadStatus::Ready,
            config: Some(Arc::new(config)),
            last_error: None,
            phases: BTreeMap::new(),
        });
        debug!(origin, version = self.snapshot.version, "snapshot replaced");
    }
}

struct StoreShared {
    backend: Arc<dyn Backend>,
    state: Mutex<StoreState>,
    conversions: broadcast::Sender<ConversionEvent>,
}

impl StoreShared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_push(&self, config: AppConfig) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.apply_authoritative(config, "push");
    }

    fn apply_pull(
        &self,
        issued_at: u64,
        result: Result<AppConfig, BackendError>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StoreError::Closed);
        }
        if state.epoch != issued_at {
            debug!("pull result superseded by a newer snapshot; discarded");
            return result.map(|_| ()).map_err(StoreError::from);
        }

        match result {
            Ok(config) => {
                state.apply_authoritative(config, "pull");
                Ok(())
            }
            Err(err) => {
                warn!("configuration pull failed: {}", err);
                let mut next = (*state.snapshot).clone();
                next.status = LoadStatus::Failed(err.to_string());
                state.publish(next);
                Err(err.into())
            }
        }
    }

    fn stage(&self, platform: &str, value: FieldValue) -> Result<StagedWrite, StoreError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StoreError::Closed);
        }

        let snapshot = Arc::clone(&state.snapshot);
        let config = snapshot.config()?;
        let source = config
            .find(platform)
            .ok_or_else(|| StoreError::NotFound(platform.to_owned()))?;
        if let FieldValue::Selected(Some(name)) = &value {
            if !source.has_converter(name) {
                return Err(StoreError::InvalidArgument {
                    platform: platform.to_owned(),
                    converter: name.clone(),
                });
            }
        }

        let field = value.field();
        let key: FieldKey = (platform.to_owned(), field);
        let base = match state.pending.get(&key) {
            Some(previous) => previous.base.clone(),
            None => FieldValue::read(source, field),
        };
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending.insert(key.clone(), PendingWrite { ticket, base });

        let mut next_config = AppConfig::clone(config);
        if let Some(target) = next_config.find_mut(platform) {
            value.write(target);
        }
        let mut next = Snapshot::clone(&snapshot);
        next.config = Some(Arc::new(next_config));
        next.phases.insert(key.clone(), FieldPhase::Optimistic);
        state.publish(next);

        debug!(platform, ?field, ticket, "optimistic write staged");
        Ok(StagedWrite { key, ticket })
    }

    fn finish_write(
        &self,
        staged: StagedWrite,
        result: Result<(), BackendError>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let owns_field = state
            .pending
            .get(&staged.key)
            .is_some_and(|pending| pending.ticket == staged.ticket);

        let err = match result {
            Ok(()) => {
                // Stays Optimistic until the backend's confirmation push arrives.
                if owns_field {
                    state.pending.remove(&staged.key);
                }
                return Ok(());
            }
            Err(err) => err,
        };

        if state.closed || !owns_field {
            debug!(
                platform = %staged.key.0,
                ticket = staged.ticket,
                "command failed after the field was superseded; nothing to roll back"
            );
            return Err(err.into());
        }

        let Some(pending) = state.pending.remove(&staged.key) else {
            return Err(err.into());
        };
        let mut next = (*state.snapshot).clone();
        if let Some(mut restored) = next.config.as_deref().cloned() {
            if let Some(target) = restored.find_mut(&staged.key.0) {
                pending.base.write(target);
            }
            next.config = Some(Arc::new(restored));
        }
        next.phases
            .insert(staged.key.clone(), FieldPhase::RolledBack);
        next.last_error = Some(err.to_string());
        state.publish(next);

        warn!(platform = %staged.key.0, field = ?staged.key.1, "command failed, rolled back: {}", err);
        Err(err.into())
    }

    fn register_listener(&self) -> (u64, mpsc::UnboundedReceiver<Arc<Snapshot>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        // A closed store hands out a receiver whose sender is already gone.
        if !state.closed {
            state.listeners.insert(id, tx);
        }
        (id, rx)
    }
}

/// Handle to the shared platform store. Clones refer to the same store.
#[derive(Clone)]
pub struct PlatformStore {
    shared: Arc<StoreShared>,
}

impl PlatformStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (conversions, _) = broadcast::channel(CONVERSION_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(StoreShared {
                backend,
                state: Mutex::new(StoreState {
                    snapshot: Arc::new(Snapshot::loading()),
                    epoch: 0,
                    next_ticket: 1,
                    pending: HashMap::new(),
                    listeners: HashMap::new(),
                    next_listener_id: 1,
                    tasks: Vec::new(),
                    initialized: false,
                    closed: false,
                }),
                conversions,
            }),
        }
    }

    /// Subscribes to push events, then issues the initial pull. Must run inside a Tokio runtime.
    pub fn initialize(&self) {
        let issued_at = {
            let mut state = self.shared.lock();
            if state.initialized || state.closed {
                debug!("platform store already initialized");
                return;
            }
            state.initialized = true;
            state.epoch
        };

        let events = self.shared.backend.events();
        let pull = self.shared.backend.fetch_state();

        let pump = tokio::spawn(pump_events(Arc::downgrade(&self.shared), events));
        let weak = Arc::downgrade(&self.shared);
        let puller = tokio::spawn(async move {
            let result = pull.await;
            if let Some(shared) = weak.upgrade() {
                let _ = shared.apply_pull(issued_at, result);
            }
        });

        let mut state = self.shared.lock();
        if state.closed {
            pump.abort();
            puller.abort();
            return;
        }
        state.tasks.push(pump);
        state.tasks.push(puller);
        info!("platform store initializing");
    }

    /// Pulls the full configuration again. Dropped if a push lands while the pull is in flight.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let issued_at = {
            let state = self.shared.lock();
            if state.closed {
                return Err(StoreError::Closed);
            }
            state.epoch
        };
        let result = self.shared.backend.fetch_state().await;
        self.shared.apply_pull(issued_at, result)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.shared.lock().snapshot)
    }

    pub fn get_platform(&self, id: &str) -> Result<PlatformView, StoreError> {
        self.snapshot().platform(id)
    }

    /// Writes `enabled` locally right away, then sends the toggle command.
    ///
    /// The optimistic write happens when this method is called, not when the
    /// returned future is first polled. On command failure the field reverts to
    /// its last confirmed value, unless a newer write or snapshot owns it by then.
    pub fn set_enabled(
        &self,
        platform: &str,
        enabled: bool,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + use<> {
        let prepared = self
            .shared
            .stage(platform, FieldValue::Enabled(enabled))
            .map(|staged| {
                (
                    staged,
                    self.shared.backend.toggle_platform(platform, enabled),
                )
            });
        let shared = Arc::clone(&self.shared);
        async move {
            let (staged, command) = prepared?;
            let result = command.await;
            shared.finish_write(staged, result)
        }
    }

    /// Same contract as [`set_enabled`](Self::set_enabled). A converter that the
    /// platform does not offer is rejected before anything is written or sent.
    pub fn select_converter(
        &self,
        platform: &str,
        converter_name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + use<> {
        let prepared = self
            .shared
            .stage(
                platform,
                FieldValue::Selected(Some(converter_name.to_owned())),
            )
            .map(|staged| {
                (
                    staged,
                    self.shared
                        .backend
                        .select_converter(platform, converter_name),
                )
            });
        let shared = Arc::clone(&self.shared);
        async move {
            let (staged, command) = prepared?;
            let result = command.await;
            shared.finish_write(staged, result)
        }
    }

    /// Callback runs on its own task for every accepted snapshot, in store order.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + 'static,
    {
        let (id, mut rx) = self.shared.register_listener();
        let task = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                callback(&snapshot);
            }
        });
        Subscription {
            id,
            store: Arc::downgrade(&self.shared),
            task: Some(task.abort_handle()),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn subscribe_stream(&self) -> SnapshotStream {
        let (id, rx) = self.shared.register_listener();
        SnapshotStream {
            rx,
            subscription: Subscription {
                id,
                store: Arc::downgrade(&self.shared),
                task: None,
                cancelled: AtomicBool::new(false),
            },
        }
    }

    /// Conversion events forwarded from the backend's push channel.
    pub fn conversions(&self) -> broadcast::Receiver<ConversionEvent> {
        self.shared.conversions.subscribe()
    }

    pub fn start_clipboard_monitor(&self) {
        if self.shared.lock().closed {
            return;
        }
        let command = self.shared.backend.start_clipboard_monitor();
        tokio::spawn(async move {
            if let Err(err) = command.await {
                warn!("failed to start clipboard monitor: {}", err);
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.listeners.clear();
        state.pending.clear();
        info!("platform store shut down");
    }
}

async fn pump_events(shared: Weak<StoreShared>, mut events: BoxStream<'static, BackendEvent>) {
    while let Some(event) = events.next().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            BackendEvent::StateChanged(config) => shared.apply_push(config),
            BackendEvent::LinkConverted(conversion) => {
                // No receivers just means no scheduler is attached yet.
                let _ = shared.conversions.send(conversion);
            }
        }
    }
    debug!("backend event stream ended");
}

/// Keeps a store listener alive. Cancelling is idempotent and also happens on drop.
pub struct Subscription {
    id: u64,
    store: Weak<StoreShared>,
    task: Option<AbortHandle>,
    cancelled: AtomicBool,
}

impl Subscription {
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(shared) = self.store.upgrade() {
            shared.lock().listeners.remove(&self.id);
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Ordered receiver of accepted snapshots.
pub struct SnapshotStream {
    rx: mpsc::UnboundedReceiver<Arc<Snapshot>>,
    subscription: Subscription,
}

impl SnapshotStream {
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        self.rx.try_recv().ok()
    }

    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loading_snapshot_reports_loading() {
        let snapshot = Snapshot::loading();
        assert_eq!(snapshot.platform("twitter"), Err(StoreError::Loading));
    }

    #[test]
    fn failed_snapshot_without_config_is_unavailable() {
        let mut snapshot = Snapshot::loading();
        snapshot.status = LoadStatus::Failed("connection refused".to_owned());
        assert_eq!(
            snapshot.platform("twitter"),
            Err(StoreError::Unavailable("connection refused".to_owned()))
        );
    }

    #[test]
    fn untracked_fields_read_as_confirmed() {
        let snapshot = Snapshot::loading();
        assert_eq!(snapshot.phase("bluesky", Field::Enabled), FieldPhase::Confirmed);
    }
}
