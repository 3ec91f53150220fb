//! # Binding Table
//!
//! Associates view-like consumers with their most recent retrieval so
//! results arriving for a superseded request are recognized and dropped.
//! The association lives in an explicit side-table owned by this module;
//! consumers only hold the opaque id the table hands out.
//!
//! Rebinding a consumer does NOT cancel the task it replaces: the old
//! task runs to completion (or explicit cancellation) and its deliveries
//! are filtered out by the identifier check instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::task::RetrievalTask;

/// Opaque identity of one consumer in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

#[derive(Debug, Default)]
struct BindingRecord {
    bound_identifier: Option<String>,
    current_task: Option<RetrievalTask>,
}

/// Side-table mapping consumers to their current retrieval.
#[derive(Debug, Default)]
pub struct BindingTable {
    records: Mutex<HashMap<ConsumerId, BindingRecord>>,
    next_id: AtomicU64,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out an identity for a new consumer.
    pub fn register(&self) -> ConsumerId {
        ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record `location` and `task` as the consumer's current retrieval.
    ///
    /// The previously bound task is left running; only the record is
    /// replaced.
    pub fn bind(&self, consumer: ConsumerId, location: &str, task: RetrievalTask) {
        let mut records = self.records.lock();
        let record = records.entry(consumer).or_default();
        record.bound_identifier = Some(location.to_owned());
        record.current_task = Some(task);
    }

    /// Delivery-time guard: does `location` still identify the consumer's
    /// current retrieval?
    pub fn is_current(&self, consumer: ConsumerId, location: &str) -> bool {
        self.records
            .lock()
            .get(&consumer)
            .and_then(|record| record.bound_identifier.as_deref())
            == Some(location)
    }

    /// The location the consumer is currently bound to.
    pub fn bound_identifier(&self, consumer: ConsumerId) -> Option<String> {
        self.records
            .lock()
            .get(&consumer)
            .and_then(|record| record.bound_identifier.clone())
    }

    /// The consumer's current task handle.
    pub fn task(&self, consumer: ConsumerId) -> Option<RetrievalTask> {
        self.records
            .lock()
            .get(&consumer)
            .and_then(|record| record.current_task.clone())
    }

    /// Cancel the consumer's current task.
    ///
    /// The bound identifier is kept: late deliveries escaping the
    /// cancelled task are still filtered by the identifier check.
    pub fn cancel(&self, consumer: ConsumerId) {
        let task = self.task(consumer);
        if let Some(task) = task {
            task.cancel();
        }
    }

    /// Drop the consumer's record entirely.
    pub fn unbind(&self, consumer: ConsumerId) {
        self.records.lock().remove(&consumer);
    }
}
