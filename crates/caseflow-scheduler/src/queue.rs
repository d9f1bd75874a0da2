//! Time-ordered queue of notification ids keyed by effective dispatch time.
//!
//! The queue holds ids only; the notification store stays authoritative. A
//! popped id whose stored record is no longer pending is simply dropped.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    dispatch_at: DateTime<Utc>,
    seq: u64,
    id: String,
}

#[derive(Default)]
pub struct DispatchQueue {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: &str, dispatch_at: DateTime<Utc>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        heap.push(Reverse(Entry {
            dispatch_at,
            seq,
            id: id.to_string(),
        }));
    }

    /// Remove and return every id due at or before `now`, earliest first.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(e)| e.dispatch_at <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry.id);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let heap = self.heap.lock().unwrap_or_else(|p| p.into_inner());
        heap.peek().map(|Reverse(e)| e.dispatch_at)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_pops_in_time_then_insertion_order() {
        let q = DispatchQueue::new();
        let now = Utc::now();
        q.push("late", now + Duration::minutes(5));
        q.push("b", now);
        q.push("a", now - Duration::minutes(1));
        q.push("c", now);

        assert_eq!(q.pop_due(now), vec!["a", "b", "c"]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.next_due(), Some(now + Duration::minutes(5)));
        assert!(q.pop_due(now).is_empty());
    }
}
