//! Per-request step tracing and a bounded store of recent query logs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Step names recorded by the pipeline.
pub mod steps {
    pub const REFINE: &str = "query_refinement";
    pub const EMBEDDING: &str = "embedding";
    pub const CACHE_CHECK: &str = "cache_check";
    pub const RETRIEVAL: &str = "vector_retrieval";
    pub const RERANK: &str = "rerank";
    pub const CACHE_ADD: &str = "cache_add";
    pub const GENERATION: &str = "generation";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationStep {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds
    pub duration: Option<i64>,
    pub details: Option<serde_json::Value>,
}

/// Timing and outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLog {
    pub query_id: String,
    pub original_query: String,
    pub refined_query: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds
    pub total_duration: Option<i64>,
    pub steps: Vec<OperationStep>,
    pub cache_hit: bool,
    pub result_count: usize,
}

impl QueryLog {
    pub fn new(original_query: &str) -> Self {
        Self {
            query_id: Uuid::new_v4().to_string(),
            original_query: original_query.to_string(),
            refined_query: None,
            start_time: Utc::now(),
            end_time: None,
            total_duration: None,
            steps: Vec::new(),
            cache_hit: false,
            result_count: 0,
        }
    }

    pub fn start_step(&mut self, name: &str) {
        self.steps.push(OperationStep {
            name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
            details: None,
        });
    }

    /// Close the most recent open step with this name. A step that was never
    /// started is recorded with zero duration.
    pub fn end_step(&mut self, name: &str, details: Option<serde_json::Value>) {
        let now = Utc::now();
        let open = self
            .steps
            .iter_mut()
            .rev()
            .find(|s| s.name == name && s.end_time.is_none());

        match open {
            Some(step) => {
                let duration = (now - step.start_time).num_milliseconds();
                tracing::debug!(query_id = %self.query_id, step = name, duration_ms = duration, "step finished");
                step.end_time = Some(now);
                step.duration = Some(duration);
                step.details = details;
            }
            None => self.steps.push(OperationStep {
                name: name.to_string(),
                start_time: now,
                end_time: Some(now),
                duration: Some(0),
                details,
            }),
        }
    }

    /// Record a step timed elsewhere, e.g. one of several joined futures.
    pub fn record_step(
        &mut self,
        name: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        details: Option<serde_json::Value>,
    ) {
        let duration = (end_time - start_time).num_milliseconds().max(0);
        tracing::debug!(query_id = %self.query_id, step = name, duration_ms = duration, "step finished");
        self.steps.push(OperationStep {
            name: name.to_string(),
            start_time,
            end_time: Some(end_time),
            duration: Some(duration),
            details,
        });
    }

    pub fn finish(&mut self, result_count: usize) {
        let now = Utc::now();
        self.end_time = Some(now);
        self.total_duration = Some((now - self.start_time).num_milliseconds());
        self.result_count = result_count;
    }

    pub fn summary(&self) -> QueryLogSummary {
        QueryLogSummary {
            query_id: self.query_id.clone(),
            total_duration: self.total_duration.unwrap_or_default(),
            cache_hit: self.cache_hit,
            steps: self
                .steps
                .iter()
                .map(|s| StepSummary {
                    name: s.name.clone(),
                    duration: s.duration.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Response-facing projection of a [`QueryLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogSummary {
    pub query_id: String,
    pub total_duration: i64,
    pub cache_hit: bool,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub duration: i64,
}

/// Ring buffer of the most recent finished query logs.
pub struct QueryLogStore {
    logs: Mutex<VecDeque<QueryLog>>,
    capacity: usize,
}

impl QueryLogStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            logs: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn record(&self, log: QueryLog) {
        let mut logs = self.logs.lock();
        while logs.len() >= self.capacity {
            logs.pop_front();
        }
        logs.push_back(log);
    }

    /// Most recent logs first.
    pub fn recent(&self, limit: usize) -> Vec<QueryLog> {
        self.logs.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, query_id: &str) -> Option<QueryLog> {
        self.logs
            .lock()
            .iter()
            .find(|l| l.query_id == query_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.logs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
