use std::time::Duration;

use linkfix_client::notify::{DEFAULT_NOTIFICATION_DURATION, NotificationScheduler};
use linkfix_core::ConversionEvent;
use tokio::{sync::broadcast, time::Instant};

fn event(path: &str) -> ConversionEvent {
    ConversionEvent {
        original: format!("https://x.com/{path}"),
        converted: format!("https://fxtwitter.com/{path}"),
    }
}

#[tokio::test(start_paused = true)]
async fn notification_hides_after_the_default_duration() {
    let scheduler = NotificationScheduler::new(DEFAULT_NOTIFICATION_DURATION);
    let mut states = scheduler.subscribe();
    let start = Instant::now();

    scheduler.show(event("1"));
    let shown = states.recv().await.expect("shown state");
    assert!(shown.visible);
    assert_eq!(shown.expires_at, Some(start + DEFAULT_NOTIFICATION_DURATION));

    let hidden = states.recv().await.expect("hidden state");
    assert!(!hidden.visible);
    assert_eq!(hidden.current, None);
    assert_eq!(start.elapsed(), DEFAULT_NOTIFICATION_DURATION);
}

#[tokio::test(start_paused = true)]
async fn newer_event_supersedes_with_a_single_hide() {
    let scheduler = NotificationScheduler::new(DEFAULT_NOTIFICATION_DURATION);
    let mut states = scheduler.subscribe();
    let start = Instant::now();

    scheduler.show(event("first"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.show(event("second"));

    assert_eq!(
        states.recv().await.expect("first shown").current,
        Some(event("first"))
    );
    assert_eq!(
        states.recv().await.expect("second shown").current,
        Some(event("second"))
    );

    let hidden = states.recv().await.expect("hide");
    assert!(!hidden.visible);
    assert_eq!(start.elapsed(), Duration::from_millis(3100));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(states.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn superseded_timer_does_not_hide_the_newer_event() {
    let scheduler = NotificationScheduler::new(DEFAULT_NOTIFICATION_DURATION);

    scheduler.show(event("first"));
    tokio::time::sleep(Duration::from_millis(2900)).await;
    scheduler.show(event("second"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let state = scheduler.state();
    assert!(state.visible);
    assert_eq!(state.current, Some(event("second")));

    tokio::time::sleep(Duration::from_millis(2801)).await;
    assert!(!scheduler.state().visible);
}

#[tokio::test(start_paused = true)]
async fn attached_feed_shows_conversions() {
    let scheduler = NotificationScheduler::new(Duration::from_millis(500));
    let (tx, rx) = broadcast::channel(8);
    scheduler.attach(rx);
    let mut states = scheduler.subscribe();

    tx.send(event("fed")).expect("feed receiver alive");
    let shown = states.recv().await.expect("shown state");

    assert_eq!(shown.current, Some(event("fed")));
    let message = shown.message().expect("visible message");
    assert_eq!(message.title, "Link Converted!");
    assert_eq!(message.description, "x.com → fxtwitter.com");
}

#[tokio::test(start_paused = true)]
async fn duplicate_events_keep_a_single_visible_notification() {
    let scheduler = NotificationScheduler::default();
    scheduler.show(event("dup"));
    scheduler.show(event("dup"));

    let state = scheduler.state();
    assert!(state.visible);
    assert_eq!(state.current, Some(event("dup")));
}

#[tokio::test(start_paused = true)]
async fn dismiss_hides_immediately() {
    let scheduler = NotificationScheduler::default();
    scheduler.show(event("1"));
    scheduler.dismiss();
    assert!(!scheduler.state().visible);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!scheduler.state().visible);
}

#[tokio::test(start_paused = true)]
async fn shutdown_hides_and_ignores_later_events() {
    let scheduler = NotificationScheduler::default();
    let (tx, rx) = broadcast::channel(8);
    scheduler.attach(rx);
    let mut states = scheduler.subscribe();

    scheduler.show(event("1"));
    scheduler.shutdown();
    scheduler.shutdown();
    scheduler.show(event("2"));
    let _ = tx.send(event("3"));
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!scheduler.state().visible);
    assert!(states.recv().await.expect("shown").visible);
    assert!(!states.recv().await.expect("hidden by shutdown").visible);
    assert!(states.recv().await.is_none());
}
