//! Chat history and analytics sink.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub session_id: String,
    pub role: ChatRole,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

/// Receives turns and outcomes. The engine logs and ignores failures here.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_turn(&self, session_id: &str, role: ChatRole, text: &str) -> Result<()>;

    async fn record_outcome(&self, success: bool, details: &Value) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsCounters {
    pub successful_operations: u64,
    pub total_operations: u64,
    /// Details of failed outcomes, oldest first.
    pub logs: Vec<Value>,
}

impl AnalyticsCounters {
    pub fn failed_operations(&self) -> u64 {
        self.total_operations - self.successful_operations
    }
}

/// Process-local sink, mostly for tests and the CLI.
#[derive(Default)]
pub struct InMemoryHistory {
    records: Mutex<Vec<ChatRecord>>,
    counters: Mutex<AnalyticsCounters>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns of one session in recording order.
    pub fn turns_for(&self, session_id: &str) -> Vec<ChatRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn counters(&self) -> AnalyticsCounters {
        self.counters.lock().clone()
    }
}

#[async_trait]
impl HistorySink for InMemoryHistory {
    async fn record_turn(&self, session_id: &str, role: ChatRole, text: &str) -> Result<()> {
        self.records.lock().push(ChatRecord {
            session_id: session_id.to_string(),
            role,
            text: text.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }

    async fn record_outcome(&self, success: bool, details: &Value) -> Result<()> {
        let mut counters = self.counters.lock();
        counters.total_operations += 1;
        if success {
            counters.successful_operations += 1;
        } else {
            counters.logs.push(details.clone());
        }
        Ok(())
    }
}
