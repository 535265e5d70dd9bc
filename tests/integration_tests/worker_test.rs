//! Workers driving crawl tasks that lease credentials

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use agentfleet::heartbeat::WorkerStatus;
use agentfleet::models::{Task, TaskOutcome, TaskPriority, TaskStatus};
use agentfleet::pool::{CredentialPool, PlatformLimits, PoolConfig};
use agentfleet::worker::{RunOutcome, TaskHandler, Worker, WorkerConfig};

use super::fixtures::{self, CRAWLER_XHS};
use crate::common::{fleet_with_pool, labels, Fleet};

/// Leases a credential per task and parks the task when none is free
struct CrawlHandler {
    pool: CredentialPool,
}

#[async_trait]
impl TaskHandler for CrawlHandler {
    async fn handle(&self, task: &Task) -> TaskOutcome {
        let credential = match self.pool.acquire("xhs").await {
            Ok(Some(credential)) => credential,
            Ok(None) => return TaskOutcome::retry_later(600, "no xhs credential available"),
            Err(e) => return TaskOutcome::failed(e.to_string()),
        };

        if task.payload["keyword"] == "blocked" {
            let _ = self.pool.report_failure(&credential.id, "http 461").await;
            return TaskOutcome::failed("http 461");
        }

        let _ = self.pool.report_success(&credential.id).await;
        TaskOutcome::completed(json!({
            "keyword": task.payload["keyword"],
            "credential": credential.id,
        }))
    }
}

async fn crawl_fleet(daily_limit: u32) -> Fleet {
    let fleet = fleet_with_pool(PoolConfig::default().with_platform(
        "xhs",
        PlatformLimits {
            daily_limit,
            min_interval_secs: 0,
            max_fail_count: 3,
            base_cooldown_secs: 60,
        },
    ));
    for credential in fixtures::credentials("xhs", &["c1"]) {
        fleet.pool.add_credential(&credential).await.unwrap();
    }
    fleet
}

fn crawl_worker(fleet: &Fleet, name: &str) -> Worker {
    crawl_worker_with_backoff(fleet, name, WorkerConfig::default().max_backoff_secs)
}

fn crawl_worker_with_backoff(fleet: &Fleet, name: &str, max_backoff_secs: u64) -> Worker {
    let mut config = WorkerConfig::new(name, labels(&[CRAWLER_XHS]));
    config.max_backoff_secs = max_backoff_secs;
    Worker::new(
        fleet.queue.clone(),
        fleet.registry.clone(),
        Arc::new(CrawlHandler {
            pool: fleet.pool.clone(),
        }),
        config,
    )
}

#[tokio::test]
async fn test_credential_shortage_defers_without_spending_retries() {
    let fleet = crawl_fleet(2).await;
    let mut ids = Vec::new();
    for keyword in ["one", "two", "three"] {
        let mut task = fixtures::crawl_task(keyword, TaskPriority::Medium);
        fleet.queue.push(&mut task).await.unwrap();
        ids.push(task.id);
    }

    let worker = crawl_worker(&fleet, "crawler-1");
    assert!(matches!(worker.run_once().await.unwrap(), RunOutcome::Completed { .. }));
    assert!(matches!(worker.run_once().await.unwrap(), RunOutcome::Completed { .. }));

    match worker.run_once().await.unwrap() {
        RunOutcome::Deferred { task_id, delay } => {
            assert_eq!(task_id, ids[2]);
            assert_eq!(delay, Duration::from_secs(300));
        }
        other => panic!("expected deferral, got {other:?}"),
    }

    let status = fleet.queue.get_status(&ids[2]).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Pending);
    assert_eq!(status.retry_count, 0);
    assert_eq!(fleet.queue.get_queue_length(CRAWLER_XHS).await.unwrap(), 0);
    assert_eq!(fleet.queue.get_delayed_length(CRAWLER_XHS).await.unwrap(), 1);

    // the parked task stays out of reach for the rest of the fleet
    let other = crawl_worker(&fleet, "crawler-2");
    assert_eq!(other.run_once().await.unwrap(), RunOutcome::Idle);

    let result = fleet.queue.get_result(&ids[0]).await.unwrap().unwrap();
    assert_eq!(result["credential"], "c1");
}

#[tokio::test]
async fn test_failed_crawls_penalize_credential_and_dead_letter() {
    let fleet = crawl_fleet(50).await;
    let mut task = Task::new(CRAWLER_XHS, json!({"keyword": "blocked"})).with_max_retries(2);
    fleet.queue.push(&mut task).await.unwrap();

    // zero backoff so the parked retry is due again on the next poll
    let worker = crawl_worker_with_backoff(&fleet, "crawler-1", 0);
    assert_eq!(
        worker.run_once().await.unwrap(),
        RunOutcome::Retried {
            task_id: task.id.clone(),
            retry_count: 1
        }
    );

    // c1 is cooling down after the failure, so the retry is parked
    assert!(matches!(worker.run_once().await.unwrap(), RunOutcome::Deferred { .. }));

    fleet.pool.reactivate("c1").await.unwrap();
    assert_eq!(
        worker.run_once().await.unwrap(),
        RunOutcome::DeadLettered {
            task_id: task.id.clone()
        }
    );

    let credential = fleet.pool.get_credential("c1").await.unwrap().unwrap();
    assert_eq!(credential.fail_count, 1);
    assert_eq!(credential.last_error.as_deref(), Some("http 461"));

    let letters = fleet.queue.dead_letters(5).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].task.retry_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_running_workers_share_queue_and_report_liveness() {
    let fleet = crawl_fleet(100).await;
    for i in 0..10 {
        let mut task = fixtures::crawl_task(&format!("kw-{i}"), TaskPriority::Low);
        fleet.queue.push(&mut task).await.unwrap();
    }

    let first = crawl_worker(&fleet, "crawler-1").start();
    let second = crawl_worker(&fleet, "crawler-2").start();
    assert!(first.is_running());

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(fleet.queue.get_queue_length(CRAWLER_XHS).await.unwrap(), 0);

    let workers = fleet.registry.list().await.unwrap();
    assert_eq!(workers.len(), 2);
    assert!(workers.iter().all(|w| w.online));
    let completed: u64 = workers
        .iter()
        .filter_map(|w| w.record.as_ref())
        .map(|r| {
            assert_eq!(r.status, WorkerStatus::Idle);
            r.tasks_completed
        })
        .sum();
    assert_eq!(completed, 10);

    first.shutdown().await;
    second.shutdown().await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    let workers = fleet.registry.list().await.unwrap();
    assert!(workers.iter().all(|w| !w.online));
}
