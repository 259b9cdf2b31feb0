use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use busrelay_protocol::TelemetryRecord;
use busrelay_protocol::constants::HISTORY_CAPACITY;

/// Fixed-capacity FIFO of recent records behind `GET /api/data`.
///
/// When full, each insert evicts the oldest record. Readers get a copy,
/// so a snapshot never changes under them.
#[derive(Debug)]
pub struct HistoryStore {
    records: Mutex<VecDeque<TelemetryRecord>>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TelemetryRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, record: TelemetryRecord) {
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Appends several records, oldest first, under one lock.
    pub fn extend(&self, batch: impl IntoIterator<Item = TelemetryRecord>) {
        let mut records = self.lock();
        for record in batch {
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(record);
        }
    }

    /// Snapshot of the contents, oldest → newest.
    pub fn all(&self) -> Vec<TelemetryRecord> {
        self.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.lock().back().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
