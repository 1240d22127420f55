#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use linkfix_client::backend::{Backend, BackendError};
use linkfix_core::{AppConfig, BackendEvent, PlatformMetadata, PlatformSource};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchState,
    Toggle { platform: String, enabled: bool },
    Select { platform: String, converter: String },
    StartMonitor,
}

#[derive(Default)]
struct Script {
    calls: Vec<Call>,
    pulls: VecDeque<oneshot::Sender<Result<AppConfig, BackendError>>>,
    commands: VecDeque<oneshot::Sender<Result<(), BackendError>>>,
    auto_pull: Option<AppConfig>,
    auto_commands: bool,
}

/// In-memory backend whose replies are released by the test, one call at a time.
pub struct ScriptedBackend {
    script: Mutex<Script>,
    events: broadcast::Sender<BackendEvent>,
}

impl ScriptedBackend {
    pub fn gated() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            script: Mutex::new(Script::default()),
            events,
        })
    }

    /// Pulls answer `config` and commands succeed without waiting for the test.
    pub fn answering(config: AppConfig) -> Arc<Self> {
        let backend = Self::gated();
        {
            let mut script = backend.script.lock().expect("script lock");
            script.auto_pull = Some(config);
            script.auto_commands = true;
        }
        backend
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().expect("script lock").calls.clone()
    }

    pub fn pending_pulls(&self) -> usize {
        self.script.lock().expect("script lock").pulls.len()
    }

    pub fn pending_commands(&self) -> usize {
        self.script.lock().expect("script lock").commands.len()
    }

    /// Answers the oldest outstanding pull. A pull whose caller is gone is consumed silently.
    pub fn reply_pull(&self, result: Result<AppConfig, BackendError>) {
        let reply = self
            .script
            .lock()
            .expect("script lock")
            .pulls
            .pop_front()
            .expect("a pull is outstanding");
        let _ = reply.send(result);
    }

    pub fn reply_command(&self, result: Result<(), BackendError>) {
        let reply = self
            .script
            .lock()
            .expect("script lock")
            .commands
            .pop_front()
            .expect("a command is outstanding");
        let _ = reply.send(result);
    }

    pub fn push(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    fn record_command(&self, call: Call) -> BoxFuture<'static, Result<(), BackendError>> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push(call);
        if script.auto_commands {
            return Box::pin(async { Ok(()) });
        }
        let (tx, rx) = oneshot::channel();
        script.commands.push_back(tx);
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(BackendError::Unavailable("script dropped".to_owned())))
        })
    }
}

impl Backend for ScriptedBackend {
    fn fetch_state(&self) -> BoxFuture<'static, Result<AppConfig, BackendError>> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push(Call::FetchState);
        if let Some(config) = script.auto_pull.clone() {
            return Box::pin(async move { Ok(config) });
        }
        let (tx, rx) = oneshot::channel();
        script.pulls.push_back(tx);
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(BackendError::Unavailable("script dropped".to_owned())))
        })
    }

    fn toggle_platform(
        &self,
        platform: &str,
        enabled: bool,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        self.record_command(Call::Toggle {
            platform: platform.to_owned(),
            enabled,
        })
    }

    fn select_converter(
        &self,
        platform: &str,
        converter_name: &str,
    ) -> BoxFuture<'static, Result<(), BackendError>> {
        self.record_command(Call::Select {
            platform: platform.to_owned(),
            converter: converter_name.to_owned(),
        })
    }

    fn start_clipboard_monitor(&self) -> BoxFuture<'static, Result<(), BackendError>> {
        let mut script = self.script.lock().expect("script lock");
        script.calls.push(Call::StartMonitor);
        Box::pin(async { Ok(()) })
    }

    fn events(&self) -> BoxStream<'static, BackendEvent> {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|item| async move { item.ok() })
            .boxed()
    }
}

pub fn source(
    platform: &str,
    title: &str,
    enabled: bool,
    converters: &[&str],
    selected: Option<&str>,
) -> PlatformSource {
    PlatformSource {
        platform: platform.to_owned(),
        metadata: PlatformMetadata {
            title: title.to_owned(),
            icon: platform.to_owned(),
        },
        enabled,
        converters: converters.iter().map(|name| (*name).to_owned()).collect(),
        selected: selected.map(str::to_owned),
    }
}

pub fn sample_config() -> AppConfig {
    AppConfig {
        sources: vec![
            source(
                "twitter",
                "Twitter/X",
                true,
                &["fxtwitter", "vxtwitter"],
                Some("fxtwitter"),
            ),
            source("bluesky", "BlueSky", false, &["a", "b"], Some("a")),
        ],
    }
}

/// Lets spawned store and scheduler tasks run to quiescence on the current-thread runtime.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
