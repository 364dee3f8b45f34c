//! Per-test execution history

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::state::ExecutionRecord;
use crate::error::Result;

/// Receives one record per finished test run
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, test_id: &str, record: ExecutionRecord) -> Result<()>;

    /// Records for `test_id`, oldest first
    async fn records(&self, test_id: &str) -> Result<Vec<ExecutionRecord>>;
}

/// Keeps the last `limit` records per test in memory
pub struct InMemoryHistory {
    limit: usize,
    records: Mutex<HashMap<String, VecDeque<ExecutionRecord>>>,
}

impl InMemoryHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            records: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, test_id: &str, record: ExecutionRecord) -> Result<()> {
        let mut records = self.records.lock().await;
        let entries = records.entry(test_id.to_string()).or_default();
        entries.push_back(record);
        while entries.len() > self.limit {
            entries.pop_front();
        }
        Ok(())
    }

    async fn records(&self, test_id: &str) -> Result<Vec<ExecutionRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .get(test_id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default())
    }
}
