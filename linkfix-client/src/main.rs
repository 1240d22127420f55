use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use linkfix_client::{
    app::ClientApp,
    icons::{DirCatalog, IconCatalog, MemoryCatalog},
    remote::RemoteBackend,
    settings::{load_settings_or_default, save_settings_to_path, settings_path},
    store::Snapshot,
    views::{ViewContent, ViewId, dispatch},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "linkfix")]
struct ClientArgs {
    /// Overrides the backend URL from the settings file.
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    icon_dir: Option<PathBuf>,
    #[arg(long)]
    notification_ms: Option<u64>,
    /// View to follow: "home" or a platform id.
    #[arg(long, default_value = "home")]
    view: String,
    /// Writes the effective settings back to the settings file.
    #[arg(long)]
    save_settings: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_view(snapshot: &Snapshot, view: &ViewId) {
    match dispatch(snapshot, view) {
        ViewContent::Loading => info!("loading configuration"),
        ViewContent::Unavailable { message } => warn!("configuration unavailable: {}", message),
        ViewContent::Home(home) => {
            for platform in home.platforms {
                info!(
                    platform = %platform.platform,
                    enabled = platform.enabled,
                    "{}",
                    platform.title
                );
            }
        }
        ViewContent::Service(service) => info!(
            platform = %service.platform,
            enabled = service.enabled,
            selected = service.selected.as_deref().unwrap_or("-"),
            pending = service.pending,
            "{}",
            service.description
        ),
        ViewContent::NotFound { view } => warn!("platform not found: {}", view),
    }
    if let Some(err) = &snapshot.last_error {
        warn!("last change was reverted: {}", err);
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = ClientArgs::parse();
    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_or_default(&path);
    if let Some(url) = args.backend_url {
        settings.backend_url = url;
    }
    if let Some(dir) = args.icon_dir {
        settings.icon_dir = Some(dir);
    }
    if let Some(ms) = args.notification_ms {
        settings.notification_ms = ms;
    }
    if let Err(err) = settings.validate() {
        error!("{}", err);
        std::process::exit(2);
    }
    if args.save_settings {
        if let Err(err) = save_settings_to_path(&path, &settings) {
            warn!(path = %path.display(), "failed to save settings: {}", err);
        }
    }

    let backend = match RemoteBackend::connect(&settings.backend_url, settings.request_timeout()).await
    {
        Ok(backend) => backend,
        Err(err) => {
            error!(backend_url = %settings.backend_url, "{}", err);
            std::process::exit(1);
        }
    };

    let catalog: Arc<dyn IconCatalog> = match &settings.icon_dir {
        Some(dir) => Arc::new(DirCatalog::new(dir)),
        None => Arc::new(MemoryCatalog::bundled()),
    };

    let app = ClientApp::start(Arc::new(backend), catalog, &settings);
    let view = ViewId::parse(&args.view);
    let followed = view.clone();
    let _subscription = app
        .store()
        .subscribe(move |snapshot| log_view(snapshot, &followed));
    app.open_view(&view);
    log_view(&app.store().snapshot(), &view);

    let mut notifications = app.notifications().subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            state = notifications.recv() => {
                let Some(state) = state else {
                    break;
                };
                if let Some(message) = state.message() {
                    info!("{}: {}", message.title, message.description);
                }
            }
        }
    }

    app.shutdown();
}
