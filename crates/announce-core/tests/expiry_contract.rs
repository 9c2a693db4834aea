//! Expiry contract
//!
//! Without any caller action the current version is replaced once its
//! expiry passes, and the timer re-arms for the replacement. Both the wall
//! clock (`ManualClock`) and tokio's paused clock are advanced together.

mod common;

use announce_core::{AnnouncementEvent, Clock, ExpiryRotation, ManualClock, RotationReason};
use common::{WatchedStore, drain, minimal_config, morning, service_with};
use std::time::Duration;

const TTL: u64 = 60;

/// Move both clocks forward by `secs`
async fn elapse(clock: &ManualClock, secs: u64) {
    clock.advance(chrono::Duration::seconds(secs as i64));
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

fn rotations(events: &[AnnouncementEvent], wanted: RotationReason) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AnnouncementEvent::VersionRotated { reason, .. } if *reason == wanted))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_version_rotates_when_expiry_passes() {
    let store = WatchedStore::new();
    let clock = morning();
    let config = minimal_config(30).with_expire_seconds(TTL);
    let (service, mut rx) = service_with(&store, config, &clock);

    service.add_announcement("t", "c", None).await.unwrap();
    let before = service.get_version().await.unwrap().unwrap();
    let expiry = service.get_expire_time().await.unwrap();
    assert_eq!(service.pending_expiry().unwrap().expiry, expiry);
    drain(&mut rx);

    elapse(&clock, TTL - 1).await;
    assert_eq!(service.get_version().await.unwrap().unwrap(), before);

    elapse(&clock, 2).await;
    let after = service.get_version().await.unwrap().unwrap();
    assert_ne!(after, before);
    assert!(service.get_announcement().await.unwrap().announcements.is_empty());

    let new_expiry = service.get_expire_time().await.unwrap();
    assert_eq!(new_expiry, clock.now_secs() + TTL as i64);
    assert_eq!(service.pending_expiry().unwrap().expiry, new_expiry);
    assert_eq!(rotations(&drain(&mut rx), RotationReason::Expired), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_keeps_rotating() {
    let store = WatchedStore::new();
    let clock = morning();
    let (service, _rx) = service_with(&store, minimal_config(30).with_expire_seconds(TTL), &clock);

    service.change_version().await.unwrap();
    for expected in ["20261016_2", "20261016_3", "20261016_4"] {
        elapse(&clock, TTL + 1).await;
        assert_eq!(service.get_version().await.unwrap().as_deref(), Some(expected));
    }
}

#[tokio::test(start_paused = true)]
async fn test_start_arms_from_stored_version() {
    let store = WatchedStore::new();
    let clock = morning();
    let config = minimal_config(30).with_expire_seconds(TTL);

    let (writer, _rx) = service_with(&store, config.clone(), &clock);
    writer.add_announcement("t", "c", None).await.unwrap();
    let expiry = writer.get_expire_time().await.unwrap();
    drop(writer);

    let (service, _rx) = service_with(&store, config, &clock);
    assert!(service.pending_expiry().is_none());

    service.start().await.unwrap();
    let deadline = service.pending_expiry().unwrap();
    assert_eq!(deadline.expiry, expiry);
    assert_eq!(deadline.version_key, "ANNOUNCE:20261016_1");
}

#[tokio::test(start_paused = true)]
async fn test_start_on_empty_store_arms_nothing() {
    let store = WatchedStore::new();
    let (service, _rx) = service_with(&store, minimal_config(30), &morning());

    service.start().await.unwrap();
    assert!(service.pending_expiry().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expiry_already_past_at_start_fires_immediately() {
    let store = WatchedStore::new();
    let clock = morning();
    let config = minimal_config(30).with_expire_seconds(TTL);

    let (writer, _rx) = service_with(&store, config.clone(), &clock);
    writer.add_announcement("t", "c", None).await.unwrap();
    drop(writer);

    // The process was down while the version expired
    clock.advance(chrono::Duration::seconds(TTL as i64 * 10));

    let (service, _rx) = service_with(&store, config, &clock);
    service.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(service.get_version().await.unwrap().as_deref(), Some("20261016_2"));
}

#[tokio::test(start_paused = true)]
async fn test_manual_rotation_rearms_the_timer() {
    let store = WatchedStore::new();
    let clock = morning();
    let (service, _rx) = service_with(&store, minimal_config(30).with_expire_seconds(TTL), &clock);

    service.change_version().await.unwrap();
    elapse(&clock, TTL / 2).await;
    service.change_version().await.unwrap();
    let rearmed = service.get_expire_time().await.unwrap();
    assert_eq!(service.pending_expiry().unwrap().expiry, rearmed);

    // The first version's deadline passes without effect
    elapse(&clock, TTL / 2 + 1).await;
    assert_eq!(service.get_version().await.unwrap().as_deref(), Some("20261016_2"));

    elapse(&clock, TTL / 2).await;
    assert_eq!(service.get_version().await.unwrap().as_deref(), Some("20261016_3"));
}

#[tokio::test(start_paused = true)]
async fn test_redundant_timers_rotate_once_when_guarded() {
    let store = WatchedStore::new();
    let clock = morning();
    let config = minimal_config(30)
        .with_expire_seconds(TTL)
        .with_expiry_rotation(ExpiryRotation::IfUnchanged);

    let (a, mut rx_a) = service_with(&store, config.clone(), &clock);
    let (b, mut rx_b) = service_with(&store, config, &clock);
    a.add_announcement("t", "c", None).await.unwrap();
    b.start().await.unwrap();
    drain(&mut rx_a);

    elapse(&clock, TTL + 1).await;

    assert_eq!(a.get_version().await.unwrap().as_deref(), Some("20261016_2"));

    let mut events = drain(&mut rx_a);
    events.extend(drain(&mut rx_b));
    assert_eq!(rotations(&events, RotationReason::Expired), 1);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, AnnouncementEvent::ExpiryRotationSkipped { .. }))
    );

    // Both instances now wait for the same replacement
    assert_eq!(a.pending_expiry(), b.pending_expiry());
}

#[tokio::test(start_paused = true)]
async fn test_redundant_timers_rotate_twice_when_unconditional() {
    let store = WatchedStore::new();
    let clock = morning();
    let config = minimal_config(30)
        .with_expire_seconds(TTL)
        .with_expiry_rotation(ExpiryRotation::Unconditional);

    let (a, _rx_a) = service_with(&store, config.clone(), &clock);
    let (b, _rx_b) = service_with(&store, config, &clock);
    a.add_announcement("t", "c", None).await.unwrap();
    b.start().await.unwrap();

    elapse(&clock, TTL + 1).await;

    assert_eq!(a.get_version().await.unwrap().as_deref(), Some("20261016_3"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_expiry_rotation_is_retried() {
    let store = WatchedStore::new();
    let clock = morning();
    let (service, mut rx) =
        service_with(&store, minimal_config(30).with_expire_seconds(TTL), &clock);

    service.add_announcement("t", "c", None).await.unwrap();
    drain(&mut rx);

    store.fail_all(true);
    elapse(&clock, TTL + 1).await;
    store.fail_all(false);

    assert_eq!(service.get_version().await.unwrap().as_deref(), Some("20261016_1"));
    let retry = service.pending_expiry().unwrap();
    assert_eq!(retry.version_key, "ANNOUNCE:20261016_1");

    // Default retry delay is 30s
    elapse(&clock, 31).await;
    assert_eq!(service.get_version().await.unwrap().as_deref(), Some("20261016_2"));
    assert_eq!(rotations(&drain(&mut rx), RotationReason::Expired), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_the_timer() {
    let store = WatchedStore::new();
    let clock = morning();
    let (service, mut rx) =
        service_with(&store, minimal_config(30).with_expire_seconds(TTL), &clock);

    service.add_announcement("t", "c", None).await.unwrap();
    service.stop().await;
    let calls = store.calls();
    assert!(service.pending_expiry().is_none());

    elapse(&clock, TTL * 2).await;

    assert_eq!(store.calls(), calls);
    assert_eq!(rotations(&drain(&mut rx), RotationReason::Expired), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_service_ends_the_timer() {
    let store = WatchedStore::new();
    let clock = morning();
    let (service, _rx) = service_with(&store, minimal_config(30).with_expire_seconds(TTL), &clock);

    service.add_announcement("t", "c", None).await.unwrap();
    drop(service);
    let calls = store.calls();

    elapse(&clock, TTL * 2).await;
    assert_eq!(store.calls(), calls);
}
