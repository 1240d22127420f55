use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use linkfix_core::ConversionEvent;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;
use url::Url;

pub const DEFAULT_NOTIFICATION_DURATION: Duration = Duration::from_millis(3000);
pub const NOTIFICATION_TITLE: &str = "Link Converted!";
pub const GENERIC_DESCRIPTION: &str = "Link has been successfully converted";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationState {
    pub visible: bool,
    pub current: Option<ConversionEvent>,
    pub expires_at: Option<Instant>,
}

impl NotificationState {
    pub fn message(&self) -> Option<NotificationMessage> {
        if !self.visible {
            return None;
        }
        self.current.as_ref().map(describe_conversion)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub title: &'static str,
    pub description: String,
}

/// Hostnames of both sides of a conversion, if both parse as URLs with a host.
pub fn conversion_hosts(event: &ConversionEvent) -> Option<(String, String)> {
    let original = Url::parse(&event.original).ok()?;
    let converted = Url::parse(&event.converted).ok()?;
    Some((
        original.host_str()?.to_owned(),
        converted.host_str()?.to_owned(),
    ))
}

pub fn describe_conversion(event: &ConversionEvent) -> NotificationMessage {
    let description = match conversion_hosts(event) {
        Some((original, converted)) => format!("{original} → {converted}"),
        None => {
            debug!(original = %event.original, "conversion URLs did not parse; using generic text");
            GENERIC_DESCRIPTION.to_owned()
        }
    };
    NotificationMessage {
        title: NOTIFICATION_TITLE,
        description,
    }
}

struct SchedulerState {
    notification: NotificationState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    feed: Option<JoinHandle<()>>,
    listeners: Vec<mpsc::UnboundedSender<NotificationState>>,
    closed: bool,
}

impl SchedulerState {
    fn publish(&mut self) {
        let current = self.notification.clone();
        self.listeners.retain(|tx| tx.send(current.clone()).is_ok());
    }

    fn hide(&mut self) {
        self.notification = NotificationState::default();
        self.publish();
    }
}

struct SchedulerShared {
    duration: Duration,
    state: Mutex<SchedulerState>,
}

impl SchedulerShared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn show(self: &Arc<Self>, event: ConversionEvent) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        state.generation += 1;
        let generation = state.generation;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let expires_at = Instant::now() + self.duration;
        state.notification = NotificationState {
            visible: true,
            current: Some(event),
            expires_at: Some(expires_at),
        };

        let weak = Arc::downgrade(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(generation);
            }
        }));
        state.publish();
    }

    fn expire(&self, generation: u64) {
        let mut state = self.lock();
        // A newer show owns the notification now.
        if state.closed || state.generation != generation || !state.notification.visible {
            return;
        }
        state.timer = None;
        state.hide();
    }
}

/// Owns the single active notification. Clones share the same scheduler.
#[derive(Clone)]
pub struct NotificationScheduler {
    shared: Arc<SchedulerShared>,
}

impl NotificationScheduler {
    pub fn new(duration: Duration) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                duration,
                state: Mutex::new(SchedulerState {
                    notification: NotificationState::default(),
                    generation: 0,
                    timer: None,
                    feed: None,
                    listeners: Vec::new(),
                    closed: false,
                }),
            }),
        }
    }

    pub fn duration(&self) -> Duration {
        self.shared.duration
    }

    pub fn state(&self) -> NotificationState {
        self.shared.lock().notification.clone()
    }

    /// Every transition (shown, replaced, hidden) in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NotificationState> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.lock();
        if !state.closed {
            state.listeners.push(tx);
        }
        rx
    }

    /// Shows `event`, replacing whatever is visible and restarting the timer.
    pub fn show(&self, event: ConversionEvent) {
        self.shared.show(event);
    }

    pub fn dismiss(&self) {
        let mut state = self.shared.lock();
        if state.closed || !state.notification.visible {
            return;
        }
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.hide();
    }

    /// Feeds the scheduler from a conversion stream, replacing any previous feed.
    pub fn attach(&self, mut conversions: broadcast::Receiver<ConversionEvent>) {
        let weak = Arc::downgrade(&self.shared);
        let feed = tokio::spawn(async move {
            loop {
                match conversions.recv().await {
                    Ok(event) => {
                        let Some(shared) = weak.upgrade() else {
                            break;
                        };
                        shared.show(event);
                    }
                    // Skipped events were superseded anyway.
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "conversion feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let mut state = self.shared.lock();
        if state.closed {
            feed.abort();
            return;
        }
        if let Some(previous) = state.feed.replace(feed) {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if let Some(feed) = state.feed.take() {
            feed.abort();
        }
        if state.notification.visible {
            state.hide();
        }
        state.listeners.clear();
    }
}

impl Default for NotificationScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_DURATION)
    }
}
