//! Topic pipeline: crawl fan-out followed by an analysis continuation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use agentfleet::models::{Task, TaskOutcome, TaskPriority};
use agentfleet::phase::{
    CompletionDescriptor, EntityRef, PhaseTracker, PhaseTransition, UnitProgress, PHASE_NONE,
};
use agentfleet::queue::TaskQueue;
use agentfleet::worker::{RunOutcome, TaskHandler, Worker, WorkerConfig};

use super::fixtures::{self, AI_ANALYZE, CRAWLER_XHS};
use crate::common::{fleet, labels};

/// Completes a crawl and reports it against the topic's fan-out
struct TopicCrawlHandler {
    phases: PhaseTracker,
    queue: TaskQueue,
}

#[async_trait]
impl TaskHandler for TopicCrawlHandler {
    async fn handle(&self, task: &Task) -> TaskOutcome {
        let Some(topic_id) = task.payload["topic_id"].as_str() else {
            return TaskOutcome::failed("missing topic_id");
        };
        let topic = EntityRef::new("topic", topic_id);

        match self.phases.complete_unit(&topic).await {
            Ok(UnitProgress::Drained(Some(descriptor))) => {
                if let Err(e) = self.phases.fire_completion(&topic, descriptor, &self.queue).await {
                    return TaskOutcome::failed(e.to_string());
                }
            }
            Ok(_) => {}
            Err(e) => return TaskOutcome::retry_later(5, e.to_string()),
        }
        TaskOutcome::completed(json!({"topic_id": topic_id}))
    }
}

fn start_topic_crawl(keywords: &[&str], topic_id: &str) -> Vec<Task> {
    keywords
        .iter()
        .map(|keyword| {
            Task::new(
                CRAWLER_XHS,
                json!({"action": "search", "keyword": keyword, "topic_id": topic_id}),
            )
            .with_parent_job(format!("topic:{topic_id}"))
        })
        .collect()
}

#[tokio::test]
async fn test_crawl_fan_out_hands_off_to_analysis_once() {
    let fleet = fleet();
    let topic = EntityRef::new("topic", "t-42");
    assert_eq!(fleet.phases.get_phase(&topic).await.unwrap(), None);

    let tasks = start_topic_crawl(&["latte", "mocha", "espresso"], "t-42");
    fleet
        .phases
        .set_phase(
            &topic,
            PhaseTransition::to("crawling")
                .expecting(tasks.len() as u64)
                .then(
                    CompletionDescriptor::new(AI_ANALYZE, fixtures::analyze_payload("t-42"), "analyzing")
                        .with_priority(TaskPriority::High),
                ),
        )
        .await
        .unwrap();
    for mut task in tasks {
        fleet.queue.push(&mut task).await.unwrap();
    }

    let worker = Worker::new(
        fleet.queue.clone(),
        fleet.registry.clone(),
        Arc::new(TopicCrawlHandler {
            phases: fleet.phases.clone(),
            queue: fleet.queue.clone(),
        }),
        WorkerConfig::new("crawler-1", labels(&[CRAWLER_XHS])),
    );

    for expected_pending in [2, 1] {
        assert!(matches!(worker.run_once().await.unwrap(), RunOutcome::Completed { .. }));
        assert_eq!(fleet.queue.get_queue_length(AI_ANALYZE).await.unwrap(), 0);
        assert_eq!(fleet.phases.pending(&topic).await.unwrap(), Some(expected_pending));
    }
    assert!(matches!(worker.run_once().await.unwrap(), RunOutcome::Completed { .. }));
    assert_eq!(worker.run_once().await.unwrap(), RunOutcome::Idle);

    let record = fleet.phases.get_phase(&topic).await.unwrap().unwrap();
    assert_eq!(record.phase, "analyzing");
    assert_eq!(fleet.phases.pending(&topic).await.unwrap(), None);

    let analysis = fleet
        .queue
        .pop(&labels(&[AI_ANALYZE]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(analysis.priority, TaskPriority::High);
    assert_eq!(analysis.parent_job_id.as_deref(), Some("topic:t-42"));
    assert_eq!(analysis.payload["topic_id"], "t-42");

    // a straggler reporting late must not fire again
    assert_eq!(
        fleet.phases.complete_unit(&topic).await.unwrap(),
        UnitProgress::Untracked
    );
    assert_eq!(fleet.queue.get_queue_length(AI_ANALYZE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_parallel_workers_drain_fan_out_exactly_once() {
    let fleet = fleet();
    let topic = EntityRef::new("topic", "t-7");
    let keywords: Vec<String> = (0..12).map(|i| format!("kw-{i}")).collect();
    let keyword_refs: Vec<&str> = keywords.iter().map(String::as_str).collect();
    let tasks = start_topic_crawl(&keyword_refs, "t-7");

    fleet
        .phases
        .set_phase(
            &topic,
            PhaseTransition::to("crawling")
                .expecting(tasks.len() as u64)
                .then(CompletionDescriptor::new(
                    AI_ANALYZE,
                    fixtures::analyze_payload("t-7"),
                    "analyzing",
                )),
        )
        .await
        .unwrap();
    for mut task in tasks {
        fleet.queue.push(&mut task).await.unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..4 {
        let worker = Worker::new(
            fleet.queue.clone(),
            fleet.registry.clone(),
            Arc::new(TopicCrawlHandler {
                phases: fleet.phases.clone(),
                queue: fleet.queue.clone(),
            }),
            WorkerConfig::new(format!("crawler-{i}"), labels(&[CRAWLER_XHS])),
        );
        handles.push(tokio::spawn(async move {
            while worker.run_once().await.unwrap() != RunOutcome::Idle {}
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(fleet.queue.get_queue_length(AI_ANALYZE).await.unwrap(), 1);
    let record = fleet.phases.get_phase(&topic).await.unwrap().unwrap();
    assert_eq!(record.phase, "analyzing");
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_pipeline_expires() {
    let fleet = fleet();
    let topic = EntityRef::new("topic", "t-9");
    fleet
        .phases
        .set_phase(&topic, PhaseTransition::to("crawling").expecting(4))
        .await
        .unwrap();
    fleet
        .phases
        .set_error(&topic, "crawler banned on every account")
        .await
        .unwrap();

    let record = fleet.phases.get_phase(&topic).await.unwrap().unwrap();
    assert_eq!(record.phase, "crawling");
    assert_eq!(record.error_msg.as_deref(), Some("crawler banned on every account"));
    assert_ne!(record.phase, PHASE_NONE);

    tokio::time::advance(Duration::from_secs(24 * 3600 + 1)).await;
    assert_eq!(fleet.phases.get_phase(&topic).await.unwrap(), None);
    assert_eq!(fleet.phases.pending(&topic).await.unwrap(), None);
}
