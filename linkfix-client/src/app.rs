use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    backend::Backend,
    icons::{IconCatalog, IconHandle, IconResolver},
    notify::NotificationScheduler,
    settings::ClientSettings,
    store::PlatformStore,
    views::{ViewContent, ViewId, dispatch},
};

pub struct ClientApp {
    store: PlatformStore,
    notifications: NotificationScheduler,
    icons: IconResolver,
    monitored: Mutex<HashSet<String>>,
    preload: Mutex<Option<JoinHandle<()>>>,
}

impl ClientApp {
    /// Must be called inside a Tokio runtime.
    pub fn start(
        backend: Arc<dyn Backend>,
        catalog: Arc<dyn IconCatalog>,
        settings: &ClientSettings,
    ) -> Self {
        let store = PlatformStore::new(backend);
        let notifications = NotificationScheduler::new(settings.notification_duration());
        // Attach before initializing so the first pushed conversion is not missed.
        notifications.attach(store.conversions());
        store.initialize();

        let icons = IconResolver::new(catalog);
        let preloader = icons.clone();
        let preload = tokio::spawn(async move {
            let loaded = preloader.preload().await;
            debug!(loaded, "brand icons preloaded");
        });

        info!("client started");
        Self {
            store,
            notifications,
            icons,
            monitored: Mutex::new(HashSet::new()),
            preload: Mutex::new(Some(preload)),
        }
    }

    pub fn store(&self) -> &PlatformStore {
        &self.store
    }

    pub fn notifications(&self) -> &NotificationScheduler {
        &self.notifications
    }

    pub fn icons(&self) -> &IconResolver {
        &self.icons
    }

    /// Platform views need live conversions, so the first open of each one
    /// asks the backend to start its clipboard monitor.
    pub fn open_view(&self, view: &ViewId) -> ViewContent {
        if let ViewId::Platform(platform) = view {
            let first_open = self
                .monitored
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(platform.clone());
            if first_open {
                self.store.start_clipboard_monitor();
            }
        }
        dispatch(&self.store.snapshot(), view)
    }

    /// Icon for a platform, by its metadata icon id when the platform is known.
    pub fn platform_icon(&self, platform: &str) -> IconHandle {
        match self.store.get_platform(platform) {
            Ok(view) => self.icons.resolve(&view.source.metadata.icon),
            Err(_) => self.icons.resolve(platform),
        }
    }

    pub fn shutdown(&self) {
        if let Some(preload) = self
            .preload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            preload.abort();
        }
        self.notifications.shutdown();
        self.store.shutdown();
        info!("client shut down");
    }
}
