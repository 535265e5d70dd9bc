//! Credential leasing scenarios

use std::collections::HashMap;

use chrono::{Duration, TimeZone, Utc};

use agentfleet::pool::{PlatformLimits, PoolConfig, PoolError};

use super::fixtures;
use crate::common::{fleet, fleet_with_pool};

fn tight_limits() -> PoolConfig {
    PoolConfig::default().with_platform(
        "xhs",
        PlatformLimits {
            daily_limit: 3,
            min_interval_secs: 0,
            max_fail_count: 2,
            base_cooldown_secs: 60,
        },
    )
}

#[tokio::test]
async fn test_concurrent_acquires_respect_daily_limit() {
    let fleet = fleet_with_pool(tight_limits());
    for credential in fixtures::credentials("xhs", &["c1", "c2"]) {
        fleet.pool.add_credential(&credential).await.unwrap();
    }
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let pool = fleet.pool.clone();
        handles.push(tokio::spawn(async move {
            pool.acquire_at("xhs", now).await.unwrap().map(|c| c.id)
        }));
    }

    let mut leased: HashMap<String, u32> = HashMap::new();
    for handle in handles {
        if let Some(id) = handle.await.unwrap() {
            *leased.entry(id).or_default() += 1;
        }
    }
    // contention may turn a few acquires away; finish sequentially
    while let Some(credential) = fleet.pool.acquire_at("xhs", now).await.unwrap() {
        *leased.entry(credential.id).or_default() += 1;
    }

    assert_eq!(leased.get("c1"), Some(&3));
    assert_eq!(leased.get("c2"), Some(&3));
    for credential in fleet.pool.list_credentials("xhs").await.unwrap() {
        assert_eq!(credential.use_count_today, 3);
    }
}

#[tokio::test]
async fn test_failing_credential_cools_down_then_retires() {
    let fleet = fleet_with_pool(tight_limits());
    for credential in fixtures::credentials("xhs", &["c1", "c2"]) {
        fleet.pool.add_credential(&credential).await.unwrap();
    }
    let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let first = fleet.pool.acquire_at("xhs", t0).await.unwrap().unwrap();
    assert_eq!(first.id, "c1");
    let failed = fleet
        .pool
        .report_failure_at("c1", "login expired", t0)
        .await
        .unwrap();
    assert!(failed.is_active);
    assert_eq!(failed.cooldown_until, Some(t0 + Duration::seconds(60)));

    // c1 cools down, so c2 serves even though it is the more used one afterwards
    let during = t0 + Duration::seconds(30);
    assert_eq!(fleet.pool.acquire_at("xhs", during).await.unwrap().unwrap().id, "c2");
    assert_eq!(fleet.pool.acquire_at("xhs", during).await.unwrap().unwrap().id, "c2");

    let after = t0 + Duration::seconds(61);
    assert_eq!(fleet.pool.acquire_at("xhs", after).await.unwrap().unwrap().id, "c1");

    let retired = fleet
        .pool
        .report_failure_at("c1", "account banned", after)
        .await
        .unwrap();
    assert!(!retired.is_active);
    assert_eq!(retired.last_error.as_deref(), Some("account banned"));

    let much_later = after + Duration::hours(1);
    assert_eq!(fleet.pool.acquire_at("xhs", much_later).await.unwrap().unwrap().id, "c2");
    assert!(fleet.pool.acquire_at("xhs", much_later).await.unwrap().is_none());

    fleet.pool.reactivate("c1").await.unwrap();
    assert_eq!(fleet.pool.acquire_at("xhs", much_later).await.unwrap().unwrap().id, "c1");
}

#[tokio::test]
async fn test_counters_reset_on_new_utc_day() {
    let fleet = fleet_with_pool(tight_limits());
    for credential in fixtures::credentials("xhs", &["c1"]) {
        fleet.pool.add_credential(&credential).await.unwrap();
    }
    let evening = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
    for _ in 0..3 {
        assert!(fleet.pool.acquire_at("xhs", evening).await.unwrap().is_some());
    }
    assert!(fleet.pool.acquire_at("xhs", evening).await.unwrap().is_none());

    let after_midnight = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 1).unwrap();
    let credential = fleet
        .pool
        .acquire_at("xhs", after_midnight)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credential.use_count_today, 1);
    assert_eq!(credential.use_count_date, Some(after_midnight.date_naive()));
}

#[tokio::test]
async fn test_default_limits_apply_to_unconfigured_platform() {
    let fleet = fleet();
    for credential in fixtures::credentials("douyin", &["d1"]) {
        fleet.pool.add_credential(&credential).await.unwrap();
    }
    let now = Utc::now();

    assert!(fleet.pool.acquire_at("douyin", now).await.unwrap().is_some());
    // default min interval is five seconds
    assert!(fleet
        .pool
        .acquire_at("douyin", now + Duration::seconds(2))
        .await
        .unwrap()
        .is_none());
    assert!(fleet
        .pool
        .acquire_at("douyin", now + Duration::seconds(5))
        .await
        .unwrap()
        .is_some());

    assert!(fleet.pool.acquire_at("xhs", now).await.unwrap().is_none());
    assert!(matches!(
        fleet.pool.report_success("missing").await,
        Err(PoolError::CredentialNotFound(_))
    ));
}
