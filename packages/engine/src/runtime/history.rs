// packages/engine/src/runtime/history.rs
//! Bounded execution history and per-engine statistics
//!
//! Both live inside the engine's state lock; nothing here synchronizes on
//! its own.

use crate::utils::ids::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Snapshot of one finished execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// 1-based position among all executions this engine has recorded
    pub sequence: u64,
    pub execution_id: ExecutionId,
    pub agent_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Ring buffer of execution records, oldest evicted first
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    next_sequence: u64,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
        }
    }

    /// Append a record, evicting the oldest when full
    pub fn push(
        &mut self,
        execution_id: ExecutionId,
        agent_name: &str,
        success: bool,
        duration_ms: u64,
    ) -> &ExecutionRecord {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }

        let record = ExecutionRecord {
            sequence: self.next_sequence,
            execution_id,
            agent_name: agent_name.to_string(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        };
        self.next_sequence += 1;
        self.records.push_back(record);

        // Just pushed, never empty here
        &self.records[self.records.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records from oldest to newest
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn oldest(&self) -> Option<&ExecutionRecord> {
        self.records.front()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.next_sequence = 1;
    }
}

/// Per-engine execution statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub concurrent_executions: u64,
    pub failed_executions: u64,
    pub dead_executions: u64,
    pub timeout_executions: u64,
    pub avg_queue_wait_ms: f64,
    pub max_queue_wait_ms: u64,
    pub avg_execution_ms: f64,
    pub max_execution_ms: u64,
}

/// How an execution ended, for statistics purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    TimedOut,
    Dead,
    Cancelled,
}

/// Running totals behind `ExecutionStats`
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    total_executions: u64,
    failed_executions: u64,
    dead_executions: u64,
    timeout_executions: u64,
    queue_wait_samples: u64,
    total_queue_wait_ms: u64,
    max_queue_wait_ms: u64,
    total_execution_ms: u64,
    max_execution_ms: u64,
}

impl StatsAccumulator {
    pub fn record_queue_wait(&mut self, wait: Duration) {
        let wait_ms = wait.as_millis() as u64;
        self.queue_wait_samples += 1;
        self.total_queue_wait_ms += wait_ms;
        self.max_queue_wait_ms = self.max_queue_wait_ms.max(wait_ms);
    }

    pub fn record_outcome(&mut self, outcome: Outcome, duration_ms: u64) {
        self.total_executions += 1;
        self.total_execution_ms += duration_ms;
        self.max_execution_ms = self.max_execution_ms.max(duration_ms);

        match outcome {
            Outcome::Completed => {}
            Outcome::Failed | Outcome::Cancelled => self.failed_executions += 1,
            Outcome::TimedOut => {
                self.timeout_executions += 1;
                self.failed_executions += 1;
            }
            Outcome::Dead => {
                self.dead_executions += 1;
                self.failed_executions += 1;
            }
        }
    }

    pub fn snapshot(&self, concurrent: usize) -> ExecutionStats {
        ExecutionStats {
            total_executions: self.total_executions,
            concurrent_executions: concurrent as u64,
            failed_executions: self.failed_executions,
            dead_executions: self.dead_executions,
            timeout_executions: self.timeout_executions,
            avg_queue_wait_ms: average(self.total_queue_wait_ms, self.queue_wait_samples),
            max_queue_wait_ms: self.max_queue_wait_ms,
            avg_execution_ms: average(self.total_execution_ms, self.total_executions),
            max_execution_ms: self.max_execution_ms,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn average(total: u64, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = ExecutionHistory::new(3);
        for i in 0..5 {
            history.push(ExecutionId::new(), &format!("agent_{}", i), true, i);
        }

        assert_eq!(history.len(), 3);
        let oldest = history.oldest().unwrap();
        assert_eq!(oldest.sequence, 3);
        assert_eq!(oldest.agent_name, "agent_2");
    }

    #[test]
    fn test_history_clear_resets_sequence() {
        let mut history = ExecutionHistory::new(2);
        history.push(ExecutionId::new(), "a", true, 1);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.push(ExecutionId::new(), "b", true, 1).sequence, 1);
    }

    #[test]
    fn test_stats_accounting() {
        let mut stats = StatsAccumulator::default();
        stats.record_queue_wait(Duration::from_millis(10));
        stats.record_queue_wait(Duration::from_millis(30));
        stats.record_outcome(Outcome::Completed, 100);
        stats.record_outcome(Outcome::TimedOut, 200);
        stats.record_outcome(Outcome::Dead, 60);

        let snapshot = stats.snapshot(2);
        assert_eq!(snapshot.total_executions, 3);
        assert_eq!(snapshot.concurrent_executions, 2);
        assert_eq!(snapshot.failed_executions, 2);
        assert_eq!(snapshot.timeout_executions, 1);
        assert_eq!(snapshot.dead_executions, 1);
        assert_eq!(snapshot.avg_queue_wait_ms, 20.0);
        assert_eq!(snapshot.max_queue_wait_ms, 30);
        assert_eq!(snapshot.avg_execution_ms, 120.0);
        assert_eq!(snapshot.max_execution_ms, 200);

        stats.reset();
        assert_eq!(stats.snapshot(0), ExecutionStats::default());
    }

    proptest! {
        #[test]
        fn prop_history_is_bounded(capacity in 1usize..50, executions in 0u64..300) {
            let mut history = ExecutionHistory::new(capacity);
            for i in 0..executions {
                history.push(ExecutionId::new(), "agent", i % 2 == 0, i);
            }

            let expected_len = (executions as usize).min(capacity);
            prop_assert_eq!(history.len(), expected_len);

            if executions as usize > capacity {
                let oldest = history.oldest().unwrap();
                prop_assert_eq!(oldest.sequence, executions - capacity as u64 + 1);
            }
        }
    }
}
