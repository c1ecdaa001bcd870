//! Dispatch loop behaviour: delivery, runtime registration, outages.
//!
//! All tests run on tokio's paused clock, so reserve timeouts and backoff
//! waits elapse instantly.

use std::collections::HashSet;
use std::time::Duration;

use bstk_butler::protocol::MemoryCommand;
use bstk_butler::{Error, Handler};
use bytes::Bytes;

use crate::helpers::*;

const BASE: Duration = Duration::from_secs(1);

/// put → register → start: the handler sees the job exactly once and the
/// tube is empty afterwards
#[tokio::test(start_paused = true)]
async fn test_put_register_dispatch() {
    let t = TestButler::new().await;
    t.butler.put_job("work", "payload-A").await.unwrap();

    let (handler, mut rx) = capture_handler();
    t.butler.register_handlers([("work", handler)]);
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    assert_eq!(recv_within(&mut rx, 5).await, Bytes::from_static(b"payload-A"));
    assert_quiet(&mut rx, 10).await;
    assert_eq!(t.ready("work").await, 0);
    assert_eq!(roulette.stats().dispatched, 1);

    roulette.shutdown().await;
}

/// Every job of every registered tube is delivered once
#[tokio::test(start_paused = true)]
async fn test_many_jobs_across_tubes() {
    let t = TestButler::new().await;
    let (handler, mut rx) = capture_handler();
    t.butler
        .register_handlers([("mail", handler.clone()), ("sms", handler)]);

    let mut expected = HashSet::new();
    for i in 0..10 {
        let tube = if i % 2 == 0 { "mail" } else { "sms" };
        let body = format!("{}-{}", tube, i);
        t.butler.put_job(tube, &body).await.unwrap();
        expected.insert(Bytes::from(body));
    }

    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();
    let mut seen = HashSet::new();
    for _ in 0..10 {
        seen.insert(recv_within(&mut rx, 30).await);
    }
    assert_eq!(seen, expected);
    assert_quiet(&mut rx, 5).await;

    roulette.shutdown().await;
}

/// A handler registered after start is picked up without a restart
#[tokio::test(start_paused = true)]
async fn test_runtime_registration() {
    let t = TestButler::new().await;
    let (first, mut first_rx) = capture_handler();
    t.butler.register_handlers([("first", first)]);
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    t.butler.put_job("late", "waiting for a handler").await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    // Nobody watches "late" yet, so the job stays put
    assert_eq!(t.ready("late").await, 1);

    let (late, mut late_rx) = capture_handler();
    t.butler.register_handlers([("late", late)]);
    assert_eq!(
        recv_within(&mut late_rx, 10).await,
        Bytes::from_static(b"waiting for a handler")
    );

    t.butler.put_job("first", "still served").await.unwrap();
    assert_eq!(
        recv_within(&mut first_rx, 10).await,
        Bytes::from_static(b"still served")
    );

    roulette.shutdown().await;
}

/// Idle reserves never count as faults or trigger a reconnect
#[tokio::test(start_paused = true)]
async fn test_timeouts_do_not_escalate() {
    let t = TestButler::new().await;
    let (handler, _rx) = capture_handler();
    t.butler.register_handlers([("quiet", handler)]);
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    let stats = roulette.stats();
    assert!(stats.reserve_timeouts >= 10, "{:?}", stats);
    assert_eq!(stats.faults, 0);
    assert_eq!(stats.connect_attempts, 1);
    assert_eq!(stats.connects, 1);
    // The pool was never used, so the roulette's is the only connection
    assert_eq!(t.server.connections_opened(), 1);

    roulette.shutdown().await;
}

/// A severed connection is rebuilt once the server is back, and jobs
/// queued meanwhile in any tube are still delivered
#[tokio::test(start_paused = true)]
async fn test_reconnect_after_outage() {
    let t = TestButler::new().await;
    let (handler, mut rx) = capture_handler();
    t.butler
        .register_handlers([("work", handler.clone()), ("other", handler)]);
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    t.butler.put_job("work", "before").await.unwrap();
    assert_eq!(recv_within(&mut rx, 10).await, Bytes::from_static(b"before"));

    t.server.set_available(false);
    t.server.kill_connections();
    t.server.enqueue("work", "during-work");
    t.server.enqueue("other", "during-other");

    tokio::time::sleep(Duration::from_secs(30)).await;
    let down = roulette.stats();
    assert_eq!(down.faults, 1);
    assert!(down.connect_attempts > 2, "{:?}", down);
    assert_eq!(down.connects, 1);

    t.server.set_available(true);
    let mut seen = HashSet::new();
    seen.insert(recv_within(&mut rx, 120).await);
    seen.insert(recv_within(&mut rx, 120).await);
    assert!(seen.contains(&Bytes::from_static(b"during-work")));
    assert!(seen.contains(&Bytes::from_static(b"during-other")));
    assert_eq!(roulette.stats().connects, 2);

    roulette.shutdown().await;
}

/// Inject one misbehaving command, then expect a single reconnect and the
/// job delivered exactly once on the fresh connection
async fn assert_recovers_after(command: MemoryCommand, stall: bool) {
    let t = TestButler::new().await;
    let (handler, mut rx) = capture_handler();
    t.butler.register_handlers([("work", handler)]);
    t.butler.put_job("work", "survivor").await.unwrap();

    if stall {
        t.server.stall_next(command);
    } else {
        t.server.fail_next(command);
    }
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    assert_eq!(recv_within(&mut rx, 60).await, Bytes::from_static(b"survivor"));
    assert_quiet(&mut rx, 10).await;

    let stats = roulette.stats();
    assert_eq!(stats.faults, 1, "{:?}", stats);
    assert_eq!(stats.connects, 2, "{:?}", stats);
    assert_eq!(stats.dispatched, 1, "{:?}", stats);
    assert_eq!(t.ready("work").await, 0);

    roulette.shutdown().await;
}

/// A stats-job error between reserve and delete forces a reconnect
#[tokio::test(start_paused = true)]
async fn test_stats_job_failure_reconnects() {
    assert_recovers_after(MemoryCommand::StatsJob, false).await;
}

/// A delete error forces a reconnect; the job is redelivered, not lost
#[tokio::test(start_paused = true)]
async fn test_delete_failure_reconnects() {
    assert_recovers_after(MemoryCommand::Delete, false).await;
}

/// A delete that never answers is given up after the command timeout
#[tokio::test(start_paused = true)]
async fn test_stalled_delete_reconnects() {
    assert_recovers_after(MemoryCommand::Delete, true).await;
}

/// A reserve silent past its timeout plus grace is a dead socket
#[tokio::test(start_paused = true)]
async fn test_stalled_reserve_reconnects() {
    assert_recovers_after(MemoryCommand::Reserve, true).await;
}

/// Registering a malformed tube name leaves the valid tubes dispatching
#[tokio::test(start_paused = true)]
async fn test_invalid_tube_name_does_not_starve_loop() {
    let t = TestButler::new().await;
    let (handler, mut rx) = capture_handler();
    t.butler.register_handlers([
        ("not a tube", Handler::new(|_| async {})),
        ("work", handler),
    ]);
    t.butler.put_job("work", "still-flows").await.unwrap();

    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();
    assert_eq!(recv_within(&mut rx, 10).await, Bytes::from_static(b"still-flows"));
    assert_eq!(roulette.stats().faults, 0);

    roulette.shutdown().await;
}

/// The job is gone from the server even when its handler panics
#[tokio::test(start_paused = true)]
async fn test_job_deleted_even_if_handler_panics() {
    let t = TestButler::new().await;
    let id = t.butler.put_job("fragile", "boom").await.unwrap();

    t.butler.register_handlers([(
        "fragile",
        Handler::new(|_| async {
            panic!("handler crashed");
        }),
    )]);
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(t.butler.peek(id).await.unwrap_err().is_not_found());
    assert!(t.butler.stats_job_by_id(id).await.unwrap_err().is_not_found());

    let stats = roulette.stats();
    assert_eq!(stats.handler_panics, 1);
    assert_eq!(stats.faults, 0);
    assert!(!roulette.is_finished());

    roulette.shutdown().await;
}

/// Blocking handlers run off the async workers (real clock: the paused
/// clock would race the blocking thread)
#[tokio::test]
async fn test_blocking_handler() {
    let t = TestButler::new().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    t.butler.register_handlers([(
        "sync",
        Handler::blocking(move |body| {
            let _ = tx.send(body);
        }),
    )]);
    t.butler.put_job("sync", "from a thread").await.unwrap();

    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();
    assert_eq!(
        recv_within(&mut rx, 10).await,
        Bytes::from_static(b"from a thread")
    );
    roulette.shutdown().await;
}

/// One roulette per butler; a stopped one can be restarted
#[tokio::test(start_paused = true)]
async fn test_single_roulette_per_butler() {
    let t = TestButler::new().await;
    let roulette = t.butler.start_roulette(BASE, BASE).unwrap();

    let clone = t.butler.clone();
    assert!(matches!(
        clone.start_roulette(BASE, BASE),
        Err(Error::RouletteRunning)
    ));

    roulette.shutdown().await;
    let again = t.butler.start_roulette(BASE, BASE).unwrap();
    again.shutdown().await;
}
