mod common;

use common::{ScriptedBackend, sample_config, settle, source};
use linkfix_client::{
    backend::BackendError,
    store::PlatformStore,
    views::{ViewContent, ViewId, dispatch},
};
use linkfix_core::{AppConfig, BackendEvent};

async fn store_with(config: AppConfig) -> PlatformStore {
    let store = PlatformStore::new(ScriptedBackend::answering(config));
    store.initialize();
    settle().await;
    store
}

#[tokio::test]
async fn loading_snapshot_renders_loading() {
    let store = PlatformStore::new(ScriptedBackend::gated());
    store.initialize();

    assert_eq!(dispatch(&store.snapshot(), &ViewId::Home), ViewContent::Loading);
    assert_eq!(
        dispatch(&store.snapshot(), &ViewId::parse("twitter")),
        ViewContent::Loading
    );
}

#[tokio::test]
async fn failed_first_pull_renders_unavailable() {
    let backend = ScriptedBackend::gated();
    let store = PlatformStore::new(backend.clone());
    store.initialize();
    backend.reply_pull(Err(BackendError::Unavailable("down".to_owned())));
    settle().await;

    assert_eq!(
        dispatch(&store.snapshot(), &ViewId::Home),
        ViewContent::Unavailable {
            message: "backend unavailable: down".to_owned()
        }
    );
}

#[tokio::test]
async fn home_lists_every_platform() {
    let store = store_with(sample_config()).await;

    let ViewContent::Home(home) = dispatch(&store.snapshot(), &ViewId::Home) else {
        panic!("expected the home view");
    };
    let ids: Vec<_> = home.platforms.iter().map(|p| p.platform.as_str()).collect();
    assert_eq!(ids, vec!["twitter", "bluesky"]);
    assert!(home.platforms[0].enabled);
    assert_eq!(home.platforms[1].title, "BlueSky");
}

#[tokio::test]
async fn known_platform_gets_its_own_steps() {
    let store = store_with(sample_config()).await;

    let ViewContent::Service(service) = dispatch(&store.snapshot(), &ViewId::parse("twitter"))
    else {
        panic!("expected a service view");
    };
    assert_eq!(service.title, "Twitter/X");
    assert_eq!(service.description, "Convert Twitter/X links");
    assert_eq!(service.converters, vec!["fxtwitter", "vxtwitter"]);
    assert_eq!(service.selected.as_deref(), Some("fxtwitter"));
    assert_eq!(service.how_it_works.len(), 4);
    assert_eq!(
        service.how_it_works[0],
        "Copy any Twitter or X link (twitter.com or x.com)"
    );
    assert!(!service.pending);
}

#[tokio::test]
async fn unknown_platform_gets_generic_steps() {
    let mut config = sample_config();
    config
        .sources
        .push(source("mastodon", "Mastodon", true, &["fxmasto"], None));
    let store = store_with(config).await;

    let ViewContent::Service(service) = dispatch(&store.snapshot(), &ViewId::parse("mastodon"))
    else {
        panic!("expected a service view");
    };
    assert_eq!(service.how_it_works[0], "Copy any Mastodon link");
    assert_eq!(
        service.how_it_works[3],
        "Paste your converted link into Discord, etc"
    );
}

#[tokio::test]
async fn missing_platform_renders_not_found() {
    let store = store_with(sample_config()).await;
    assert_eq!(
        dispatch(&store.snapshot(), &ViewId::parse("myspace")),
        ViewContent::NotFound {
            view: "myspace".to_owned()
        }
    );
}

#[tokio::test]
async fn pending_write_is_flagged_until_confirmed() {
    let backend = ScriptedBackend::answering(sample_config());
    let store = PlatformStore::new(backend.clone());
    store.initialize();
    settle().await;

    store
        .set_enabled("bluesky", true)
        .await
        .expect("command accepted");
    let ViewContent::Service(service) = dispatch(&store.snapshot(), &ViewId::parse("bluesky"))
    else {
        panic!("expected a service view");
    };
    assert!(service.enabled);
    assert!(service.pending);

    let mut confirmed = sample_config();
    confirmed.find_mut("bluesky").expect("bluesky").enabled = true;
    backend.push(BackendEvent::StateChanged(confirmed));
    settle().await;

    let ViewContent::Service(service) = dispatch(&store.snapshot(), &ViewId::parse("bluesky"))
    else {
        panic!("expected a service view");
    };
    assert!(!service.pending);
}
