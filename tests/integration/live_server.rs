//! Smoke tests against a real beanstalkd.
//!
//! Skipped unless TEST_BSTK_ADDR is set.

use std::time::Duration;

use bstk_butler::config::{Config, PoolConfig};
use bstk_butler::{Butler, JobCategory};

use crate::helpers::*;

fn live_config() -> Option<Config> {
    let addr = std::env::var("TEST_BSTK_ADDR").ok()?;
    Some(Config {
        addr,
        pool: PoolConfig {
            initial_cap: 1,
            max_cap: 4,
            idle_timeout: Some(Duration::from_secs(15)),
            acquire_timeout: Duration::from_secs(2),
        },
        ..Config::default()
    })
}

/// Unique per run so parallel runs do not see each other's jobs
fn tube_name(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{}", prefix, nanos)
}

#[tokio::test]
async fn test_live_put_stats_delete() {
    let Some(config) = live_config() else {
        return;
    };
    let butler = Butler::connect(&config).await.expect("connect");
    let tube = tube_name("butler-live");

    let id = butler.put_job(&tube, "live payload").await.unwrap();
    assert_eq!(butler.peek(id).await.unwrap().as_ref(), b"live payload");

    let stats = butler.stats_for_tube(&tube).await.unwrap();
    assert_eq!(stats.ready, "1");
    assert!(butler.tube_names().await.unwrap().contains(&tube));

    let deleted = butler
        .delete_job_by_category(&tube, JobCategory::Ready)
        .await
        .unwrap();
    assert_eq!(deleted, id);
    butler.close().await;
}

#[tokio::test]
async fn test_live_roulette_dispatch() {
    let Some(config) = live_config() else {
        return;
    };
    let butler = Butler::connect(&config).await.expect("connect");
    let tube = tube_name("butler-roulette");

    let (handler, mut rx) = capture_handler();
    butler.register_handlers([(tube.clone(), handler)]);
    butler.put_job(&tube, "over the wire").await.unwrap();

    let roulette = butler
        .start_roulette(Duration::from_secs(1), Duration::from_secs(1))
        .unwrap();
    assert_eq!(recv_within(&mut rx, 10).await.as_ref(), b"over the wire");

    roulette.shutdown().await;
    butler.close().await;
}
