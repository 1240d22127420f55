use linkfix_core::{KnownPlatform, PlatformSource};

use crate::store::{FieldPhase, Snapshot, StoreError};

const HOME_VIEW: &str = "home";

const COMMON_STEPS: [&str; 3] = [
    "The link will be automatically converted to your selected format",
    "Converted link replaces the original in your clipboard",
    "Paste your converted link into Discord, etc",
];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewId {
    Home,
    Platform(String),
}

impl ViewId {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(HOME_VIEW) {
            ViewId::Home
        } else {
            ViewId::Platform(raw.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ViewId::Home => HOME_VIEW,
            ViewId::Platform(platform) => platform,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewContent {
    Loading,
    Unavailable { message: String },
    Home(HomeView),
    Service(ServiceView),
    NotFound { view: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeView {
    pub platforms: Vec<PlatformSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSummary {
    pub platform: String,
    pub title: String,
    pub icon: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceView {
    pub platform: String,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub enabled: bool,
    pub converters: Vec<String>,
    pub selected: Option<String>,
    pub how_it_works: Vec<String>,
    /// A write to `enabled` or `selected` is awaiting backend confirmation.
    pub pending: bool,
    /// The last write to this platform failed and was reverted.
    pub rolled_back: bool,
}

pub fn dispatch(snapshot: &Snapshot, view: &ViewId) -> ViewContent {
    let config = match snapshot.config() {
        Ok(config) => config,
        Err(StoreError::Unavailable(message)) => return ViewContent::Unavailable { message },
        Err(_) => return ViewContent::Loading,
    };

    let platform = match view {
        ViewId::Home => {
            return ViewContent::Home(HomeView {
                platforms: config.sources.iter().map(summarize).collect(),
            });
        }
        ViewId::Platform(platform) => platform,
    };

    match snapshot.platform(platform) {
        Ok(platform_view) => {
            let phases = [platform_view.enabled_phase, platform_view.selected_phase];
            let mut service = service_view(&platform_view.source);
            service.pending = phases.contains(&FieldPhase::Optimistic);
            service.rolled_back = phases.contains(&FieldPhase::RolledBack);
            ViewContent::Service(service)
        }
        Err(_) => ViewContent::NotFound {
            view: platform.clone(),
        },
    }
}

fn summarize(source: &PlatformSource) -> PlatformSummary {
    PlatformSummary {
        platform: source.platform.clone(),
        title: source.metadata.title.clone(),
        icon: source.metadata.icon.clone(),
        enabled: source.enabled,
    }
}

fn service_view(source: &PlatformSource) -> ServiceView {
    let title = &source.metadata.title;
    ServiceView {
        platform: source.platform.clone(),
        title: title.clone(),
        description: format!("Convert {title} links"),
        icon: source.metadata.icon.clone(),
        enabled: source.enabled,
        converters: source.converters.clone(),
        selected: source.selected.clone(),
        how_it_works: how_it_works(source),
        pending: false,
        rolled_back: false,
    }
}

pub fn how_it_works(source: &PlatformSource) -> Vec<String> {
    let first = match KnownPlatform::from_id(&source.platform) {
        Some(KnownPlatform::Twitter) => {
            "Copy any Twitter or X link (twitter.com or x.com)".to_owned()
        }
        Some(KnownPlatform::Bluesky) => "Copy any BlueSky post link (bsky.app)".to_owned(),
        Some(KnownPlatform::Tiktok) => {
            "Copy any TikTok video link (tiktok.com/@username/video/id)".to_owned()
        }
        Some(KnownPlatform::Instagram) => {
            "Copy any Instagram reel link (instagram.com/username/reel/id)".to_owned()
        }
        Some(KnownPlatform::Reddit) => {
            "Copy any Reddit post link (reddit.com/r/subreddit/comments/id)".to_owned()
        }
        None => format!("Copy any {} link", source.metadata.title),
    };

    std::iter::once(first)
        .chain(COMMON_STEPS.iter().map(|step| (*step).to_owned()))
        .collect()
}
