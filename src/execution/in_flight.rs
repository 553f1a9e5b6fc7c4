use super::task_runner::TaskRunnerError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
struct InFlightEntry {
    entry_id: u64,
    task_id: i64,
    started_at: Instant,
}

/// Bounded list of running tasks shared by the dispatchers.
///
/// Capacity check and insertion happen under one lock acquisition.
#[derive(Debug)]
pub(crate) struct InFlightSet {
    entries: Mutex<Vec<InFlightEntry>>,
    next_entry_id: AtomicU64,
    max_concurrency: usize,
}

impl InFlightSet {
    pub(crate) fn new(max_concurrency: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_entry_id: AtomicU64::new(1),
            max_concurrency,
        }
    }

    pub(crate) fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Claim a slot for `task_id`, failing fast at the ceiling
    pub(crate) fn try_reserve(&self, task_id: i64) -> Result<u64, TaskRunnerError> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_concurrency {
            return Err(TaskRunnerError::AtMaximumConcurrency {
                max_concurrency: self.max_concurrency,
                in_flight: entries.len(),
            });
        }
        let entry_id = self.next_entry_id.fetch_add(1, Ordering::Relaxed);
        entries.push(InFlightEntry {
            entry_id,
            task_id,
            started_at: Instant::now(),
        });
        Ok(entry_id)
    }

    /// Free a slot; returns how long the task ran. A missing entry is logged
    /// and otherwise ignored.
    pub(crate) fn release(&self, entry_id: u64) -> Option<Duration> {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.entry_id == entry_id) {
            Some(index) => Some(entries.remove(index).started_at.elapsed()),
            None => {
                warn!(entry_id, "In-flight entry already removed");
                None
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn task_ids(&self) -> Vec<i64> {
        self.entries.lock().iter().map(|e| e.task_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_fails_fast_at_ceiling() {
        let set = InFlightSet::new(2);
        let first = set.try_reserve(10).unwrap();
        set.try_reserve(11).unwrap();

        let err = set.try_reserve(12).unwrap_err();
        assert!(matches!(
            err,
            TaskRunnerError::AtMaximumConcurrency { max_concurrency: 2, in_flight: 2 }
        ));

        assert!(set.release(first).is_some());
        assert_eq!(set.task_ids(), vec![11]);
        set.try_reserve(12).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_double_release_is_a_noop() {
        let set = InFlightSet::new(1);
        let entry = set.try_reserve(1).unwrap();
        assert!(set.release(entry).is_some());
        assert!(set.release(entry).is_none());
        assert_eq!(set.len(), 0);
    }
}
