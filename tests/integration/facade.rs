//! Pool-mediated operations against the in-memory server.

use std::time::Duration;

use bstk_butler::butler::render_table;
use bstk_butler::config::PoolConfig;
use bstk_butler::pool::PoolError;
use bstk_butler::protocol::ProtocolError;
use bstk_butler::{Error, JobCategory, PutOptions};

use crate::helpers::*;

/// Bodies come back byte for byte, including CRLF and non-UTF-8 bytes
#[tokio::test]
async fn test_put_and_reserve_roundtrip() {
    let t = TestButler::new().await;
    let body: &[u8] = b"line one\r\nline two\xff\x00";

    let id = t.butler.put_job("binary", body).await.unwrap();
    assert_eq!(t.butler.peek(id).await.unwrap().as_ref(), body);

    let (reserved_id, reserved) = t
        .butler
        .reserve_job_by_tube("binary", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reserved_id, id);
    assert_eq!(reserved.as_ref(), body);
}

/// reserve → touch → bury → kick → delete-by-category
#[tokio::test]
async fn test_job_lifecycle() {
    let t = TestButler::new().await;
    let id = t.butler.put_job("mail", "hello").await.unwrap();

    let (reserved, _) = t
        .butler
        .reserve_job_by_tube("mail", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reserved, id);

    t.butler.touch(id).await.unwrap();
    t.butler.bury_job(id, 10).await.unwrap();

    let stats = t.butler.stats_for_tube("mail").await.unwrap();
    assert_eq!(stats.buried, "1");
    assert_eq!(stats.ready, "0");

    let job = t.butler.stats_job_by_id(id).await.unwrap();
    assert_eq!(job.get("state").map(String::as_str), Some("buried"));
    assert_eq!(job.get("tube").map(String::as_str), Some("mail"));

    assert_eq!(t.butler.kick_job("mail", 5).await.unwrap(), 1);
    assert_eq!(t.ready("mail").await, 1);

    let deleted = t
        .butler
        .delete_job_by_category("mail", JobCategory::Ready)
        .await
        .unwrap();
    assert_eq!(deleted, id);
    assert!(t.butler.peek(id).await.unwrap_err().is_not_found());
}

/// Deleting from an empty category reports NOT_FOUND
#[tokio::test]
async fn test_delete_by_category_not_found() {
    let t = TestButler::new().await;
    t.butler.put_job("mail", "ready one").await.unwrap();

    let err = t
        .butler
        .delete_job_by_category("mail", "buried".parse().unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(t.ready("mail").await, 1);
}

/// Delayed jobs are visible to the delayed category only
#[tokio::test]
async fn test_delete_delayed_job() {
    let t = TestButler::new().await;
    let options = PutOptions {
        priority: 5,
        delay: Duration::from_secs(3600),
        ttr: Duration::from_secs(60),
    };
    let id = t.butler.put_job_with("later", "soon", options).await.unwrap();

    let stats = t.butler.stats_for_tube("later").await.unwrap();
    assert_eq!(stats.delayed, "1");
    assert_eq!(stats.total, "1");

    let deleted = t
        .butler
        .delete_job_by_category("later", JobCategory::Delayed)
        .await
        .unwrap();
    assert_eq!(deleted, id);
}

/// Unknown category strings are rejected before touching the server
#[tokio::test]
async fn test_invalid_category() {
    let err = "reserved".parse::<JobCategory>().unwrap_err();
    assert!(matches!(err, Error::InvalidCategory(_)));
}

/// A successful call returns its connection, a failed one discards it
#[tokio::test]
async fn test_failed_operation_discards_connection() {
    let t = TestButler::new().await;

    t.butler.put_job("mail", "x").await.unwrap();
    assert_eq!(t.butler.idle_connections(), 1);
    assert_eq!(t.server.connections_opened(), 1);

    let err = t.butler.peek(999).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::NotFound)));
    assert_eq!(t.butler.idle_connections(), 0);

    // Next call has to dial again
    t.butler.tube_names().await.unwrap();
    assert_eq!(t.server.connections_opened(), 2);
    assert_eq!(t.butler.idle_connections(), 1);
}

/// Client-side validation surfaces as a protocol error
#[tokio::test]
async fn test_invalid_tube_name() {
    let t = TestButler::new().await;
    let err = t.butler.put_job("-leading-dash", "x").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::InvalidTubeName(_))
    ));
}

/// Stats for a tube that does not exist
#[tokio::test]
async fn test_stats_for_missing_tube() {
    let t = TestButler::new().await;
    let err = t.butler.stats_for_tube("nowhere").await.unwrap_err();
    assert!(err.is_not_found());
}

/// Reserve timeouts surface to facade callers
#[tokio::test(start_paused = true)]
async fn test_reserve_by_tube_times_out() {
    let t = TestButler::new().await;
    let err = t
        .butler
        .reserve_job_by_tube("empty", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

/// A pool with one connection fails fast while it is checked out
#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion() {
    let t = TestButler::with_pool(PoolConfig {
        initial_cap: 0,
        max_cap: 1,
        idle_timeout: None,
        acquire_timeout: Duration::from_secs(1),
    })
    .await;

    let (blocked, starved) = tokio::join!(
        t.butler
            .reserve_job_by_tube("empty", Duration::from_secs(5)),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            t.butler.put_job("mail", "x").await
        }
    );

    assert!(blocked.unwrap_err().is_timeout());
    match starved.unwrap_err() {
        Error::Pool(PoolError::Exhausted { capacity, .. }) => assert_eq!(capacity, 1),
        other => panic!("expected exhaustion, got {}", other),
    }
}

/// Closing the butler drains the pool
#[tokio::test]
async fn test_close_rejects_further_calls() {
    let t = TestButler::new().await;
    t.butler.put_job("mail", "x").await.unwrap();

    t.butler.close().await;
    let err = t.butler.put_job("mail", "y").await.unwrap_err();
    assert!(matches!(err, Error::Pool(PoolError::Closed)));
}

/// Tube listing and the stats table cover every tube
#[tokio::test]
async fn test_all_tube_stats_table() {
    let t = TestButler::new().await;
    t.butler.put_job("test", "hello world!").await.unwrap();

    let tubes = t.butler.tube_names().await.unwrap();
    assert_eq!(tubes, vec!["default", "test"]);

    let rows = t.butler.all_tube_stats().await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].name, "test");
    assert_eq!(rows[1].ready, "1");
    assert_eq!(rows[1].urgent, "1");

    let table = render_table(&rows);
    assert!(table.contains("| test    |      0 |       0 |     1 |"));
}

/// A call abandoned mid-command gives its pool slot back
#[tokio::test(start_paused = true)]
async fn test_cancelled_call_frees_its_connection() {
    let t = TestButler::with_pool(PoolConfig {
        initial_cap: 0,
        max_cap: 1,
        idle_timeout: None,
        acquire_timeout: Duration::from_secs(1),
    })
    .await;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        t.butler.reserve_job_by_tube("empty", Duration::from_secs(10)),
    )
    .await;
    assert!(cancelled.is_err());
    assert_eq!(t.butler.busy_connections(), 0);

    let id = t.butler.put_job("work", "after-cancel").await.unwrap();
    assert_eq!(t.butler.peek(id).await.unwrap().as_ref(), b"after-cancel");

    // The abandoned connection was closed, not parked for reuse
    assert_eq!(t.server.connections_opened(), 2);
    assert_eq!(t.butler.busy_connections(), 0);
}
