//! End-to-end engine scenarios driven by the in-memory encoder and resolver.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast;

use common::{FakeLauncher, FakeResolver, POLL_INTERVAL_MS, test_config, test_engine, wait_for_snapshot};
use rust_restream::Error;
use rust_restream::config::DestinationConfig;
use rust_restream::events::EngineEvent;
use rust_restream::placeholder::{InputDescriptor, InputKind};
use rust_restream::publisher::PublisherState;
use rust_restream::snapshot::EngineSnapshot;

const U1: &str = "https://video-edge.example.net/v1/playlist/u1.m3u8";

fn all_in(snapshot: &EngineSnapshot, count: usize, state: PublisherState, input: InputKind) -> bool {
    snapshot.destinations.len() == count
        && snapshot
            .destinations
            .iter()
            .all(|d| d.state == state && d.input == input)
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn sleep_cycles(n: u64) {
    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS * n)).await;
}

#[tokio::test]
async fn online_source_runs_every_destination() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a", "b", "c"])).await.unwrap();

    let snapshot = wait_for_snapshot(&engine, |s| {
        all_in(s, 3, PublisherState::Running, InputKind::Source)
    })
    .await;

    assert!(snapshot.running);
    assert!(snapshot.source.as_ref().is_some_and(|s| s.is_online()));
    let ids: Vec<&str> = snapshot.destinations.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["a", "b", "c"]);

    assert_eq!(launcher.live_count(), 3);
    for launch in launcher.launches() {
        assert!(matches!(&launch.input, InputDescriptor::Source { url } if url == U1));
        assert!(launch.duration.is_none());
    }

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn offline_source_swaps_every_destination_once() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);
    let mut events = engine.subscribe();

    engine.start(test_config(&["a", "b", "c"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 3, PublisherState::Running, InputKind::Source)).await;

    resolver.set_offline();
    let snapshot = wait_for_snapshot(&engine, |s| {
        all_in(s, 3, PublisherState::Running, InputKind::Placeholder)
    })
    .await;
    assert!(snapshot.source.as_ref().is_some_and(|s| !s.is_online()));

    // Stay offline for a while: nothing else may happen.
    sleep_cycles(6).await;
    let snapshot = engine.snapshot();
    assert!(all_in(&snapshot, 3, PublisherState::Running, InputKind::Placeholder));
    assert_eq!(snapshot.total_restarts, 0);

    let mut swaps: HashMap<String, usize> = HashMap::new();
    let mut restarts = 0;
    for event in drain(&mut events) {
        match event {
            EngineEvent::InputSwapped {
                destination_id,
                from,
                to,
                ..
            } => {
                assert_eq!(from, InputKind::Source);
                assert_eq!(to, InputKind::Placeholder);
                *swaps.entry(destination_id).or_default() += 1;
            }
            EngineEvent::Restart { .. } => restarts += 1,
            _ => {}
        }
    }
    assert_eq!(swaps.len(), 3);
    assert!(swaps.values().all(|n| *n == 1), "swaps: {swaps:?}");
    assert_eq!(restarts, 0);

    // One encoder per destination, all on the placeholder.
    assert_eq!(launcher.live_count(), 3);
    for id in ["a", "b", "c"] {
        let launches = launcher.launches_for(id);
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[1].input.kind(), InputKind::Placeholder);
    }

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn source_returning_swaps_back_to_fresh_url() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::offline();
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 1, PublisherState::Running, InputKind::Placeholder)).await;

    let u2 = "https://video-edge.example.net/v1/playlist/u2.m3u8";
    resolver.set_online(u2);
    wait_for_snapshot(&engine, |s| all_in(s, 1, PublisherState::Running, InputKind::Source)).await;

    let launches = launcher.launches_for("a");
    let last = launches.last().unwrap();
    assert!(matches!(&last.input, InputDescriptor::Source { url } if url == u2));
    assert_eq!(engine.snapshot().destination("a").unwrap().restart_count, 0);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn exited_encoder_restarts_without_touching_others() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);
    let mut events = engine.subscribe();

    engine.start(test_config(&["a", "b", "c"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 3, PublisherState::Running, InputKind::Source)).await;
    drain(&mut events);

    assert_eq!(launcher.exit("b", 1), 1);

    let snapshot = wait_for_snapshot(&engine, |s| {
        s.destination("b")
            .is_some_and(|d| d.restart_count == 1 && d.state == PublisherState::Running)
    })
    .await;
    assert!(all_in(&snapshot, 3, PublisherState::Running, InputKind::Source));
    assert_eq!(snapshot.destination("a").unwrap().restart_count, 0);
    assert_eq!(snapshot.destination("c").unwrap().restart_count, 0);
    assert_eq!(snapshot.total_restarts, 1);
    assert!(
        snapshot
            .destination("b")
            .unwrap()
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("exited with code 1"))
    );

    let events = drain(&mut events);
    let touched: Vec<&str> = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PublisherTransition { .. } | EngineEvent::Restart { .. }))
        .filter_map(|e| e.destination_id())
        .collect();
    assert!(touched.iter().all(|id| *id == "b"), "touched: {touched:?}");

    let transitions: Vec<(PublisherState, PublisherState)> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PublisherTransition { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        [
            (PublisherState::Running, PublisherState::Failed),
            (PublisherState::Failed, PublisherState::Starting),
            (PublisherState::Starting, PublisherState::Running),
        ]
    );

    assert_eq!(launcher.live_count(), 3);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_is_isolated_and_retried() {
    let launcher = FakeLauncher::new();
    launcher.set_spawn_failing("b", true);
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a", "b"])).await.unwrap();

    let snapshot = wait_for_snapshot(&engine, |s| {
        s.destination("a").is_some_and(|d| d.state == PublisherState::Running)
            && s.destination("b").is_some_and(|d| {
                d.state == PublisherState::Failed && d.restart_count >= 1
            })
    })
    .await;
    let b = snapshot.destination("b").unwrap();
    assert!(b.failure_reason.as_deref().is_some_and(|r| r.contains("No such file")));
    assert_eq!(snapshot.destination("a").unwrap().restart_count, 0);

    launcher.set_spawn_failing("b", false);
    wait_for_snapshot(&engine, |s| all_in(s, 2, PublisherState::Running, InputKind::Source)).await;

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn stalled_output_is_detected_and_restarted() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a", "b"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 2, PublisherState::Running, InputKind::Source)).await;

    launcher.set_stalled("a", true);
    wait_for_snapshot(&engine, |s| {
        s.destination("a").is_some_and(|d| d.state == PublisherState::Stalled)
    })
    .await;

    let snapshot = wait_for_snapshot(&engine, |s| {
        s.destination("a").is_some_and(|d| d.restart_count >= 1)
    })
    .await;
    assert!(
        snapshot
            .destination("a")
            .unwrap()
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("No output progress from destination a"))
    );
    assert_eq!(snapshot.destination("b").unwrap().state, PublisherState::Running);

    launcher.set_stalled("a", false);
    wait_for_snapshot(&engine, |s| all_in(s, 2, PublisherState::Running, InputKind::Source)).await;

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn stop_leaves_no_process_behind() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);
    let mut events = engine.subscribe();

    engine.start(test_config(&["a", "b", "c"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 3, PublisherState::Running, InputKind::Source)).await;

    engine.stop().await.unwrap();

    assert_eq!(launcher.live_count(), 0);
    assert!(!engine.is_running().await);

    let snapshot = engine.snapshot();
    assert!(!snapshot.running);
    assert!(all_in(&snapshot, 3, PublisherState::Stopped, InputKind::Source));
    assert!(snapshot.destinations.iter().all(|d| d.pid.is_none()));

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(EngineEvent::EngineStarted { destinations: 3, .. })));
    assert!(matches!(events.last(), Some(EngineEvent::EngineStopped { .. })));

    assert!(matches!(engine.stop().await, Err(Error::NotRunning)));
}

#[tokio::test]
async fn start_is_idempotent() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);
    let config = test_config(&["a", "b"]);

    engine.start(config.clone()).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 2, PublisherState::Running, InputKind::Source)).await;

    engine.start(config).await.unwrap();
    sleep_cycles(4).await;

    assert_eq!(launcher.launches().len(), 2);
    assert_eq!(launcher.live_count(), 2);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn start_requires_an_enabled_destination() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    let mut config = test_config(&["a"]);
    config.destinations[0].enabled = false;
    assert!(matches!(engine.start(config).await, Err(Error::Configuration(_))));

    assert!(matches!(engine.start(test_config(&[])).await, Err(Error::Configuration(_))));
    assert!(!engine.is_running().await);
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn config_updates_reconcile_the_active_set() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    let mut config = test_config(&["a", "b", "c"]);
    engine.start(config.clone()).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 3, PublisherState::Running, InputKind::Source)).await;

    // Remove b, disable c, add d.
    config.destinations.retain(|d| d.id != "b");
    config.destinations[1].enabled = false;
    config
        .destinations
        .push(DestinationConfig::new("d", "rtmp://live.example.com/app/d-key"));
    engine.update_config(config.clone()).await.unwrap();

    let snapshot = wait_for_snapshot(&engine, |s| {
        all_in(s, 2, PublisherState::Running, InputKind::Source)
    })
    .await;
    let ids: Vec<&str> = snapshot.destinations.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["a", "d"]);
    assert_eq!(launcher.live_count(), 2);
    assert_eq!(launcher.live_for("b"), 0);
    assert_eq!(launcher.live_for("c"), 0);

    // A changed endpoint restarts the destination on the new URL.
    config.destinations[0].endpoint_url = "rtmp://backup.example.com/app/a-key".to_string();
    engine.update_config(config).await.unwrap();
    wait_for_snapshot(&engine, |s| {
        s.destination("a")
            .is_some_and(|d| d.endpoint.starts_with("rtmp://backup.example.com/") && d.state == PublisherState::Running)
    })
    .await;
    let launches = launcher.launches_for("a");
    assert_eq!(launches.last().unwrap().endpoint_url, "rtmp://backup.example.com/app/a-key");
    assert_eq!(launcher.live_for("a"), 1);

    engine.stop().await.unwrap();
    assert_eq!(launcher.live_count(), 0);
}

#[tokio::test]
async fn snapshot_never_exposes_stream_keys() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a"])).await.unwrap();
    let snapshot = wait_for_snapshot(&engine, |s| all_in(s, 1, PublisherState::Running, InputKind::Source)).await;

    let json = serde_json::to_string(&*snapshot).unwrap();
    assert!(!json.contains("a-key"));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_destination_reports_encoder_outcome() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    assert!(engine.test_destination("rtmp://live.example.com/app/good").await);

    launcher.set_unreachable("rtmp://unreachable.example.com/app/key");
    assert!(!engine.test_destination("rtmp://unreachable.example.com/app/key").await);

    assert!(!engine.test_destination("not a url").await);

    // Test publishes use the placeholder for a fixed duration, and never start the engine.
    let launches = launcher.launches();
    assert_eq!(launches.len(), 2);
    assert!(launches.iter().all(|l| l.input.kind() == InputKind::Placeholder));
    assert!(launches.iter().all(|l| l.duration == Some(rust_restream::engine::TEST_PUBLISH_DURATION)));
    assert!(!engine.is_running().await);
    assert_eq!(launcher.live_count(), 0);
}

#[tokio::test]
async fn test_destination_runs_beside_live_publishers() {
    let launcher = FakeLauncher::new();
    let resolver = FakeResolver::online(U1);
    let engine = test_engine(&launcher, &resolver);

    engine.start(test_config(&["a"])).await.unwrap();
    wait_for_snapshot(&engine, |s| all_in(s, 1, PublisherState::Running, InputKind::Source)).await;

    // Same endpoint as the live publisher: still an independent process.
    assert!(engine.test_destination("rtmp://live.example.com/app/a-key").await);

    // A sweep for the live marker must not catch the test publish.
    let launches = launcher.launches();
    let live = &launcher.launches_for("a")[0];
    let test = launches.iter().find(|l| l.destination_id != "a").unwrap();
    assert_eq!(live.owner_marker, "restream_owner=restream-test");
    assert_eq!(test.owner_marker, "restream_owner=restream-test-test");

    sleep_cycles(2).await;
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.destination("a").unwrap().restart_count, 0);
    assert_eq!(launcher.live_for("a"), 1);

    engine.stop().await.unwrap();
}
