//! Test fixtures for integration tests
//!
//! Sample payloads and credentials shaped like what the crawler and
//! analysis agents exchange.

use agentfleet::pool::Credential;
use agentfleet::models::{Task, TaskPriority};
use serde_json::{json, Value};

pub const CRAWLER_XHS: &str = "crawler:xhs";
pub const CRAWLER_DOUYIN: &str = "crawler:douyin";
pub const AI_ANALYZE: &str = "ai:analyze";

/// Keyword search payload for a crawler task
pub fn search_payload(keyword: &str) -> Value {
    json!({
        "action": "search",
        "keyword": keyword,
        "max_notes": 20,
    })
}

/// Analysis payload referencing a topic
pub fn analyze_payload(topic_id: &str) -> Value {
    json!({
        "action": "summarize",
        "topic_id": topic_id,
    })
}

pub fn crawl_task(keyword: &str, priority: TaskPriority) -> Task {
    Task::new(CRAWLER_XHS, search_payload(keyword)).with_priority(priority)
}

/// Cookie-style credentials for one platform
pub fn credentials(platform: &str, ids: &[&str]) -> Vec<Credential> {
    ids.iter()
        .map(|id| Credential::new(*id, platform, format!("web_session={id}")))
        .collect()
}
