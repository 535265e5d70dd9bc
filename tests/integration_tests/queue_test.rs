//! Queue ordering, retry and dead-letter scenarios

use std::collections::HashSet;

use chrono::{Duration, SubsecRound, Utc};

use agentfleet::models::{Task, TaskPriority, TaskStatus};
use agentfleet::queue::FailureDisposition;

use super::fixtures::{self, AI_ANALYZE, CRAWLER_DOUYIN, CRAWLER_XHS};
use crate::common::{fleet, labels};

#[tokio::test]
async fn test_high_priority_overtakes_older_backlog() {
    let fleet = fleet();
    let base = Utc::now() - Duration::minutes(10);

    for (i, keyword) in ["a", "b", "c"].iter().enumerate() {
        let mut task = fixtures::crawl_task(keyword, TaskPriority::Low)
            .with_created_at(base + Duration::seconds(i as i64));
        fleet.queue.push(&mut task).await.unwrap();
    }
    let mut medium = fixtures::crawl_task("m", TaskPriority::Medium);
    fleet.queue.push(&mut medium).await.unwrap();
    let mut urgent = fixtures::crawl_task("urgent", TaskPriority::High);
    fleet.queue.push(&mut urgent).await.unwrap();

    let served = labels(&[CRAWLER_XHS]);
    let mut order = Vec::new();
    while let Some(task) = fleet.queue.pop(&served).await.unwrap() {
        order.push(task.payload["keyword"].as_str().unwrap().to_string());
    }

    assert_eq!(order, vec!["urgent", "m", "a", "b", "c"]);
    assert_eq!(fleet.queue.get_queue_length(CRAWLER_XHS).await.unwrap(), 0);
}

#[tokio::test]
async fn test_same_millisecond_pushes_pop_in_creation_order() {
    let fleet = fleet();
    let base = Utc::now().trunc_subsecs(3);

    let mut later = fixtures::crawl_task("later", TaskPriority::Medium)
        .with_created_at(base + Duration::microseconds(700));
    let mut sooner = fixtures::crawl_task("sooner", TaskPriority::Medium)
        .with_created_at(base + Duration::microseconds(200));
    fleet.queue.push(&mut later).await.unwrap();
    fleet.queue.push(&mut sooner).await.unwrap();

    let served = labels(&[CRAWLER_XHS]);
    let first = fleet.queue.pop(&served).await.unwrap().unwrap();
    let second = fleet.queue.pop(&served).await.unwrap().unwrap();
    assert_eq!(first.id, sooner.id);
    assert_eq!(second.id, later.id);
}

#[tokio::test]
async fn test_worker_serving_several_labels() {
    let fleet = fleet();
    let base = Utc::now() - Duration::minutes(1);

    let mut crawl = Task::new(CRAWLER_DOUYIN, fixtures::search_payload("tea"))
        .with_created_at(base + Duration::seconds(2));
    let mut analyze = Task::new(AI_ANALYZE, fixtures::analyze_payload("topic-1"))
        .with_priority(TaskPriority::High)
        .with_created_at(base + Duration::seconds(5));
    let mut older = Task::new(CRAWLER_DOUYIN, fixtures::search_payload("milk"))
        .with_created_at(base);
    fleet.queue.push(&mut crawl).await.unwrap();
    fleet.queue.push(&mut analyze).await.unwrap();
    fleet.queue.push(&mut older).await.unwrap();

    let served = labels(&[CRAWLER_DOUYIN, AI_ANALYZE]);
    let first = fleet.queue.pop(&served).await.unwrap().unwrap();
    let second = fleet.queue.pop(&served).await.unwrap().unwrap();
    let third = fleet.queue.pop(&served).await.unwrap().unwrap();

    assert_eq!(first.id, analyze.id);
    assert_eq!(second.id, older.id);
    assert_eq!(third.id, crawl.id);
    assert!(fleet.queue.pop(&served).await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_follows_task_lifecycle() {
    let fleet = fleet();
    let mut task = fixtures::crawl_task("coffee", TaskPriority::Medium).with_parent_job("job-7");
    fleet.queue.push(&mut task).await.unwrap();

    let status = fleet.queue.get_status(&task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Pending);
    assert_eq!(status.parent_job_id.as_deref(), Some("job-7"));
    assert!(status.started_at.is_none());

    let mut popped = fleet.queue.pop(&labels(&[CRAWLER_XHS])).await.unwrap().unwrap();
    let status = fleet.queue.get_status(&task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Running);
    assert!(status.started_at.is_some());
    assert!(!status.is_stale(Duration::minutes(30), Utc::now()));
    assert!(status.is_stale(Duration::minutes(30), Utc::now() + Duration::hours(1)));

    let result = serde_json::json!({"notes": 12});
    fleet.queue.mark_done(&mut popped, Some(&result)).await.unwrap();
    let status = fleet.queue.get_status(&task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    assert!(status.completed_at.is_some());
    assert_eq!(fleet.queue.get_result(&task.id).await.unwrap(), Some(result));
}

#[tokio::test]
async fn test_failures_exhaust_budget_into_dead_letters() {
    let fleet = fleet();
    let mut task = fixtures::crawl_task("broken", TaskPriority::High);
    fleet.queue.push(&mut task).await.unwrap();
    let served = labels(&[CRAWLER_XHS]);

    let mut dispositions = Vec::new();
    while let Some(mut popped) = fleet.queue.pop(&served).await.unwrap() {
        assert_eq!(popped.priority, TaskPriority::High);
        assert_eq!(popped.created_at, task.created_at);
        dispositions.push(
            fleet
                .queue
                .mark_failed(&mut popped, "captcha wall")
                .await
                .unwrap(),
        );
    }

    assert_eq!(
        dispositions,
        vec![
            FailureDisposition::Retried { retry_count: 1 },
            FailureDisposition::Retried { retry_count: 2 },
            FailureDisposition::DeadLettered,
        ]
    );

    let status = fleet.queue.get_status(&task.id).await.unwrap().unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert_eq!(status.retry_count, 3);
    assert_eq!(status.error.as_deref(), Some("captcha wall"));

    assert_eq!(fleet.queue.dead_letter_count().await.unwrap(), 1);
    let letters = fleet.queue.dead_letters(10).await.unwrap();
    assert_eq!(letters[0].task.id, task.id);
    assert_eq!(letters[0].error, "captcha wall");
}

#[tokio::test]
async fn test_concurrent_consumers_never_share_a_task() {
    let fleet = fleet();
    for i in 0..40 {
        let priority = match i % 3 {
            0 => TaskPriority::High,
            1 => TaskPriority::Medium,
            _ => TaskPriority::Low,
        };
        let mut task = fixtures::crawl_task(&format!("kw-{i}"), priority);
        fleet.queue.push(&mut task).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let queue = fleet.queue.clone();
        handles.push(tokio::spawn(async move {
            let served = labels(&[CRAWLER_XHS]);
            let mut seen = Vec::new();
            while let Some(task) = queue.pop(&served).await.unwrap() {
                seen.push(task.id);
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().cloned().collect();
    assert_eq!(all.len(), 40);
    assert_eq!(unique.len(), 40);
}
