//! End-to-end playback scenarios against mock transport and resolver
//!
//! Covers queue advancement, concurrent play requests, rate-limit retries,
//! stale cache rows, skip/clear semantics and session teardown.

mod helpers;

use helpers::*;
use std::time::Duration;
use tunebot_ap::error::{Error, ResolutionError, TransportError};
use tunebot_ap::playback::{LibrarySelection, PlayOutcome, SkipOutcome, TrackRequest};
use tunebot_common::events::SkipReason;
use tunebot_common::{PlayerEvent, SessionState};

const SESSION: &str = "guild-1";

fn queued_urls(entries: &[tunebot_common::db::QueueEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.url.as_str()).collect()
}

#[tokio::test]
async fn test_queue_advances_through_three_tracks() {
    let h = harness().await;
    let mut events = h.events.subscribe();

    let outcome = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PlayOutcome::Started {
            title: title_of("A"),
            url: "A".to_string()
        }
    );

    // Connecting happened before playing
    expect_event(&mut events, |e| {
        matches!(e, PlayerEvent::StateChanged { new_state: SessionState::Connecting, .. })
    })
    .await;

    let outcome = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("B")))
        .await
        .unwrap();
    assert!(matches!(outcome, PlayOutcome::Queued { position: 1, .. }));

    let outcome = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("C")))
        .await
        .unwrap();
    assert!(matches!(outcome, PlayOutcome::Queued { position: 2, .. }));

    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.state, SessionState::Playing);
    assert_eq!(status.queue_length, 2);

    // A completes: B plays, C waits
    assert!(h.transport.finish(CHANNEL));
    wait_for_track(&h.coordinator, SESSION, "B").await;
    let snapshot = h.coordinator.snapshot(SESSION).await.unwrap();
    assert_eq!(queued_urls(&snapshot), vec!["C"]);

    assert!(h.transport.finish(CHANNEL));
    wait_for_track(&h.coordinator, SESSION, "C").await;

    // C completes: queue exhausted, transport released once
    assert!(h.transport.finish(CHANNEL));
    wait_for_state(&h.coordinator, SESSION, SessionState::Empty).await;
    expect_event(&mut events, |e| matches!(e, PlayerEvent::QueueExhausted { .. })).await;

    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.transport.disconnect_count(), 1);
    assert_eq!(h.transport.played().len(), 3);
    assert!(h.coordinator.snapshot(SESSION).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_play_requests_connect_once() {
    let h = harness().await;
    h.transport.set_connect_delay(Duration::from_millis(100));

    let (first, second) = tokio::join!(
        h.coordinator.play(SESSION, channel(), Some(TrackRequest::new("A"))),
        h.coordinator.play(SESSION, channel(), Some(TrackRequest::new("B"))),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(h.transport.connect_count(), 1);
    let started = outcomes
        .iter()
        .filter(|o| matches!(o, PlayOutcome::Started { .. }))
        .count();
    let queued = outcomes
        .iter()
        .filter(|o| matches!(o, PlayOutcome::Queued { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(queued, 1);
    assert_eq!(h.coordinator.snapshot(SESSION).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rate_limited_twice_skips_track() {
    let h = harness().await;
    let mut events = h.events.subscribe();

    h.resolver.fail_next(
        "A",
        vec![
            ResolutionError::RateLimited("429".into()),
            ResolutionError::RateLimited("429".into()),
        ],
    );

    h.coordinator.enqueue(SESSION, TrackRequest::new("A")).await.unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();

    let outcome = h.coordinator.play(SESSION, channel(), None).await.unwrap();
    assert_eq!(
        outcome,
        PlayOutcome::Started {
            title: title_of("B"),
            url: "B".to_string()
        }
    );

    // One attempt plus one retry
    assert_eq!(h.resolver.calls_for("A"), 2);

    let skipped = expect_event(&mut events, |e| matches!(e, PlayerEvent::TrackSkipped { .. })).await;
    match skipped {
        PlayerEvent::TrackSkipped { url, reason, .. } => {
            assert_eq!(url, "A");
            assert_eq!(reason, SkipReason::RateLimited);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limited_once_recovers() {
    let h = harness().await;
    h.resolver
        .fail_next("A", vec![ResolutionError::RateLimited("429".into())]);

    let outcome = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();

    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    assert_eq!(h.resolver.calls_for("A"), 2);
}

#[tokio::test]
async fn test_forbidden_track_reported_and_queue_continues() {
    let h = harness().await;
    h.resolver
        .fail_next("A", vec![ResolutionError::Forbidden("403".into())]);
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();

    let result = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await;

    assert!(matches!(result, Err(Error::Resolution(ResolutionError::Forbidden(_)))));
    // Not retried
    assert_eq!(h.resolver.calls_for("A"), 1);
    wait_for_track(&h.coordinator, SESSION, "B").await;
}

#[tokio::test]
async fn test_all_tracks_failing_lands_in_empty() {
    let h = harness().await;
    for url in ["A", "B"] {
        h.resolver
            .fail_next(url, vec![ResolutionError::NotFound("gone".into())]);
        h.coordinator.enqueue(SESSION, TrackRequest::new(url)).await.unwrap();
    }

    let outcome = h.coordinator.play(SESSION, channel(), None).await.unwrap();
    assert_eq!(outcome, PlayOutcome::NothingToPlay);

    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.state, SessionState::Empty);
    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(h.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_bare_play_with_empty_queue_does_not_connect() {
    let h = harness().await;

    let outcome = h.coordinator.play(SESSION, channel(), None).await.unwrap();

    assert_eq!(outcome, PlayOutcome::NothingToPlay);
    assert_eq!(h.transport.connect_count(), 0);
}

#[tokio::test]
async fn test_cache_hit_reuses_artifact() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.transport.finish(CHANNEL);
    wait_for_state(&h.coordinator, SESSION, SessionState::Empty).await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();

    let status = wait_for_track(&h.coordinator, SESSION, "A").await;
    assert!(status.now_playing.unwrap().from_cache);
    assert_eq!(h.resolver.calls_for("A"), 1);
    assert_eq!(h.transport.connect_count(), 2);
}

#[tokio::test]
async fn test_stale_cache_row_is_refetched() {
    let h = harness().await;

    let missing = h.dir.path().join("songs").join("deleted.m4a");
    tunebot_ap::cache::ArtifactCache::new(h.pool.clone())
        .upsert("A", "Old Title", &missing)
        .await
        .unwrap();

    let outcome = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { .. }));
    assert_eq!(h.resolver.calls_for("A"), 1);

    let library = h.coordinator.library().await.unwrap();
    assert_eq!(library.len(), 1);
    assert_eq!(library[0].title, title_of("A"));
    assert_ne!(library[0].local_path, missing);
    assert!(library[0].local_path.exists());
}

#[tokio::test]
async fn test_skip_plays_next_and_ignores_late_completion() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("C")).await.unwrap();

    let outcome = h.coordinator.skip(SESSION).await.unwrap();
    assert_eq!(
        outcome,
        SkipOutcome::Skipped {
            title: title_of("A"),
            url: "A".to_string()
        }
    );
    wait_for_track(&h.coordinator, SESSION, "B").await;
    assert_eq!(h.transport.stop_count(), 1);

    // The stopped playback's completion must not advance past B
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.now_playing.unwrap().url, "B");
    assert_eq!(status.queue_length, 1);
}

#[tokio::test]
async fn test_skip_without_session() {
    let h = harness().await;
    assert_eq!(h.coordinator.skip(SESSION).await.unwrap(), SkipOutcome::NothingPlaying);
}

#[tokio::test]
async fn test_clear_keeps_current_track() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("C")).await.unwrap();

    assert_eq!(h.coordinator.clear(SESSION).await.unwrap(), 2);

    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.state, SessionState::Playing);
    assert_eq!(status.now_playing.unwrap().url, "A");

    h.transport.finish(CHANNEL);
    wait_for_state(&h.coordinator, SESSION, SessionState::Empty).await;
}

#[tokio::test]
async fn test_connect_failure_lands_disconnected() {
    let h = harness().await;
    h.transport.set_fail_connect(true);

    let result = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await;

    assert!(matches!(
        result,
        Err(Error::Transport(TransportError::ConnectFailed(_)))
    ));
    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.state, SessionState::Disconnected);
    assert_eq!(h.resolver.total_calls(), 0);
}

#[tokio::test]
async fn test_lost_connection_keeps_queue() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();

    h.transport.finish_with(
        CHANNEL,
        Some(TransportError::LostConnection("voice server went away".into())),
    );

    wait_for_state(&h.coordinator, SESSION, SessionState::Disconnected).await;
    let snapshot = h.coordinator.snapshot(SESSION).await.unwrap();
    assert_eq!(queued_urls(&snapshot), vec!["B"]);

    // A bare play reconnects and resumes the queue
    let outcome = h.coordinator.play(SESSION, channel(), None).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { ref url, .. } if url == "B"));
    assert_eq!(h.transport.connect_count(), 2);
}

#[tokio::test]
async fn test_disconnect_releases_transport_and_keeps_queue() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();

    assert!(h.coordinator.disconnect(SESSION).await);
    assert!(!h.coordinator.disconnect(SESSION).await);

    assert_eq!(h.transport.disconnect_count(), 1);
    assert!(h.coordinator.active_sessions().is_empty());

    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.state, SessionState::Disconnected);
    assert_eq!(status.queue_length, 1);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_download() {
    let h = harness().await;
    h.resolver.set_delay(Duration::from_secs(5));

    let coordinator = h.coordinator.clone();
    let pending = tokio::spawn(async move {
        coordinator
            .play(SESSION, channel(), Some(TrackRequest::new("A")))
            .await
    });

    // Connected and downloading: the channel is known, nothing plays yet
    let status = wait_for_status(&h.coordinator, SESSION, |s| {
        s.state == SessionState::Connecting && s.channel.is_some()
    })
    .await;
    assert_eq!(status.channel.as_deref(), Some(CHANNEL));
    assert!(status.now_playing.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.coordinator.disconnect(SESSION).await);

    let result = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // Nothing was recorded for the abandoned download
    assert!(h.coordinator.library().await.unwrap().is_empty());
    assert_eq!(h.transport.disconnect_count(), 1);
}

#[tokio::test]
async fn test_disconnect_while_advancing_keeps_queue_entry() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("B")).await.unwrap();
    h.coordinator.enqueue(SESSION, TrackRequest::new("C")).await.unwrap();

    // B is still downloading when the session goes away
    h.resolver.set_delay(Duration::from_secs(5));
    assert!(h.transport.finish(CHANNEL));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.resolver.calls_for("B"), 1);

    assert!(h.coordinator.disconnect(SESSION).await);

    let snapshot = h.coordinator.snapshot(SESSION).await.unwrap();
    assert_eq!(queued_urls(&snapshot), vec!["B", "C"]);
    assert_eq!(h.coordinator.library().await.unwrap().len(), 1);

    // Reconnecting picks up where it left off
    h.resolver.set_delay(Duration::ZERO);
    let outcome = h.coordinator.play(SESSION, channel(), None).await.unwrap();
    assert!(matches!(outcome, PlayOutcome::Started { ref url, .. } if url == "B"));
    let snapshot = h.coordinator.snapshot(SESSION).await.unwrap();
    assert_eq!(queued_urls(&snapshot), vec!["C"]);
}

#[tokio::test]
async fn test_queued_track_is_downloaded_at_request_time() {
    let h = harness().await;

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();

    // A request naming another channel still queues for the current one
    let other = tunebot_ap::transport::ChannelRef("voice-2".to_string());
    let outcome = h
        .coordinator
        .play(SESSION, other, Some(TrackRequest::new("B")))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        PlayOutcome::Queued {
            title: title_of("B"),
            url: "B".to_string(),
            position: 1,
            channel: CHANNEL.to_string(),
        }
    );
    assert_eq!(h.resolver.calls_for("B"), 1);

    let snapshot = h.coordinator.snapshot(SESSION).await.unwrap();
    assert_eq!(snapshot[0].title, title_of("B"));

    h.transport.finish(CHANNEL);
    let status = wait_for_track(&h.coordinator, SESSION, "B").await;
    assert!(status.now_playing.unwrap().from_cache);
    assert_eq!(h.resolver.calls_for("B"), 1);
    assert_eq!(h.transport.connect_count(), 1);
}

#[tokio::test]
async fn test_queued_track_that_cannot_download_is_dropped() {
    let h = harness().await;
    let mut events = h.events.subscribe();

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.resolver
        .fail_next("bad", vec![ResolutionError::NotFound("Video unavailable".into())]);

    let result = h
        .coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("bad")))
        .await;
    assert!(matches!(result, Err(Error::Resolution(ResolutionError::NotFound(_)))));

    expect_event(&mut events, |e| {
        matches!(e, PlayerEvent::TrackSkipped { reason: SkipReason::NotFound, .. })
    })
    .await;
    assert!(h.coordinator.snapshot(SESSION).await.unwrap().is_empty());

    let status = h.coordinator.status(SESSION).await.unwrap();
    assert_eq!(status.now_playing.unwrap().url, "A");
}

#[tokio::test]
async fn test_sessions_share_one_download() {
    let h = harness().await;
    h.resolver.set_delay(Duration::from_millis(100));

    let second_channel = tunebot_ap::transport::ChannelRef("voice-2".to_string());
    let (first, second) = tokio::join!(
        h.coordinator.play("guild-a", channel(), Some(TrackRequest::new("A"))),
        h.coordinator.play("guild-b", second_channel, Some(TrackRequest::new("A"))),
    );
    assert!(matches!(first.unwrap(), PlayOutcome::Started { .. }));
    assert!(matches!(second.unwrap(), PlayOutcome::Started { .. }));

    assert_eq!(h.resolver.calls_for("A"), 1);
    assert_eq!(h.coordinator.library().await.unwrap().len(), 1);

    let a = wait_for_track(&h.coordinator, "guild-a", "A").await;
    let b = wait_for_track(&h.coordinator, "guild-b", "A").await;
    let from_cache = [a, b]
        .iter()
        .filter(|s| s.now_playing.as_ref().unwrap().from_cache)
        .count();
    assert_eq!(from_cache, 1);

    let played = h.transport.played();
    assert_eq!(played.len(), 2);
    assert_eq!(played[0], played[1]);
}

#[tokio::test]
async fn test_concurrent_enqueue_and_dequeue_lose_nothing() {
    let h = harness().await;
    let queue = tunebot_ap::queue::SessionQueue::new(h.pool.clone());
    const TOTAL: usize = 40;

    let producer = {
        let queue = queue.clone();
        tokio::spawn(async move {
            for i in 0..TOTAL {
                let url = format!("track-{i:02}");
                queue.enqueue(SESSION, &url, &url).await.unwrap();
            }
        })
    };

    let taken = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            let taken = taken.clone();
            tokio::spawn(async move {
                let mut popped = Vec::new();
                let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
                while taken.load(std::sync::atomic::Ordering::SeqCst) < TOTAL {
                    assert!(tokio::time::Instant::now() < deadline, "queue never drained");
                    match queue.dequeue_front(SESSION).await.unwrap() {
                        Some(entry) => {
                            taken.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                            popped.push(entry.url);
                        }
                        None => tokio::task::yield_now().await,
                    }
                }
                popped
            })
        })
        .collect();

    producer.await.unwrap();
    let mut all = Vec::new();
    for consumer in consumers {
        let popped = consumer.await.unwrap();
        // Each consumer sees entries in queue order
        let mut sorted = popped.clone();
        sorted.sort();
        assert_eq!(popped, sorted);
        all.extend(popped);
    }

    all.sort();
    let expected: Vec<String> = (0..TOTAL).map(|i| format!("track-{i:02}")).collect();
    assert_eq!(all, expected);
    assert_eq!(queue.len(SESSION).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let h = harness().await;

    h.coordinator
        .play("guild-a", channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    h.coordinator
        .enqueue("guild-b", TrackRequest::new("B"))
        .await
        .unwrap();

    assert!(h.coordinator.snapshot("guild-a").await.unwrap().is_empty());
    assert_eq!(h.coordinator.snapshot("guild-b").await.unwrap().len(), 1);

    let status = h.coordinator.status("guild-b").await.unwrap();
    assert_eq!(status.state, SessionState::Disconnected);
}

#[tokio::test]
async fn test_queue_library_plays_cached_songs() {
    let h = harness().await;

    for url in ["A", "B"] {
        h.coordinator
            .play(SESSION, channel(), Some(TrackRequest::new(url)))
            .await
            .unwrap();
    }
    h.transport.finish(CHANNEL);
    wait_for_track(&h.coordinator, SESSION, "B").await;
    h.transport.finish(CHANNEL);
    wait_for_state(&h.coordinator, SESSION, SessionState::Empty).await;

    let library = h.coordinator.library().await.unwrap();
    assert_eq!(library.len(), 2);
    let ids: Vec<i64> = library.iter().rev().map(|a| a.id).collect();

    let outcome = h
        .coordinator
        .queue_library(SESSION, channel(), LibrarySelection::Ids(ids))
        .await
        .unwrap();

    assert_eq!(outcome.queued, 2);
    assert!(matches!(outcome.play, PlayOutcome::Started { .. }));
    assert_eq!(h.coordinator.snapshot(SESSION).await.unwrap().len(), 1);
    // Served from cache
    assert_eq!(h.resolver.total_calls(), 2);
}

#[tokio::test]
async fn test_idle_session_expires() {
    let mut options = fast_options();
    options.idle_timeout = Duration::from_millis(50);
    let h = harness_with(options).await;
    let mut events = h.events.subscribe();

    h.coordinator
        .play(SESSION, channel(), Some(TrackRequest::new("A")))
        .await
        .unwrap();
    assert_eq!(h.coordinator.active_sessions(), vec![SESSION.to_string()]);

    h.transport.finish(CHANNEL);
    expect_event(&mut events, |e| matches!(e, PlayerEvent::QueueExhausted { .. })).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !h.coordinator.active_sessions().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "session never expired");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.transport.disconnect_count(), 1);
}
