//! The timeout manager (C4): a priority queue of deadline-tagged callbacks,
//! driven by the reactor's event loop.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Opaque handle identifying a scheduled timeout, returned by
/// [`TimeoutManager::add`] and accepted by [`TimeoutManager::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

struct Task {
    id: TimeoutId,
    deadline: Instant,
    callback: Box<dyn FnOnce() + Send>,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so `BinaryHeap` (a max-heap) pops the earliest deadline.
        other.deadline.cmp(&self.deadline)
    }
}

/// Min-heap of `{tid, deadline, fn}`, as described in spec §4.7.
///
/// `update` fires every task whose deadline has passed; firing a task may
/// re-entrantly schedule more via `add`, since callbacks run outside of any
/// lock held by the manager itself - the caller (the reactor) owns
/// synchronization.
#[derive(Default)]
pub struct TimeoutManager {
    heap: BinaryHeap<Task>,
    next_id: u64,
    cancelled: std::collections::HashSet<TimeoutId>,
}

impl TimeoutManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 0,
            cancelled: std::collections::HashSet::new(),
        }
    }

    /// Schedule `f` to run at `deadline`, returning a handle usable with
    /// [`TimeoutManager::cancel`].
    pub fn add(&mut self, deadline: Instant, f: impl FnOnce() + Send + 'static) -> TimeoutId {
        let id = TimeoutId(self.next_id);
        self.next_id += 1;
        self.heap.push(Task {
            id,
            deadline,
            callback: Box::new(f),
        });
        id
    }

    /// Cancel a previously scheduled timeout. A no-op if it already fired or
    /// was already cancelled.
    pub fn cancel(&mut self, id: TimeoutId) {
        self.cancelled.insert(id);
    }

    /// Fire every task whose deadline is `<= now`, in deadline order.
    pub fn update(&mut self, now: Instant) {
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let task = self.heap.pop().expect("just peeked");
            if self.cancelled.remove(&task.id) {
                continue;
            }
            (task.callback)();
        }
    }

    /// The earliest pending deadline, ignoring already-cancelled tasks, or
    /// `None` if nothing is scheduled ("never" in spec §4.7).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap
            .iter()
            .filter(|t| !self.cancelled.contains(&t.id))
            .map(|t| t.deadline)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fires_exactly_once_when_due() {
        let mut mgr = TimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);

        let now = Instant::now();
        mgr.add(now, move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });

        mgr.update(now + Duration::from_millis(1));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);

        // Firing again must not re-invoke it.
        mgr.update(now + Duration::from_secs(10));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut mgr = TimeoutManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);

        let now = Instant::now();
        let id = mgr.add(now, move || {
            f.fetch_add(1, AtomicOrdering::SeqCst);
        });
        mgr.cancel(id);
        mgr.update(now + Duration::from_secs(1));
        assert_eq!(fired.load(AtomicOrdering::SeqCst), 0);
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut mgr = TimeoutManager::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let now = Instant::now();

        for (i, delay_ms) in [(1, 30), (2, 10), (3, 20)] {
            let order = Arc::clone(&order);
            mgr.add(now + Duration::from_millis(delay_ms), move || {
                order.lock().unwrap().push(i);
            });
        }

        mgr.update(now + Duration::from_secs(1));
        assert_eq!(*order.lock().unwrap(), vec![2, 3, 1]);
    }

    #[test]
    fn next_deadline_ignores_cancelled() {
        let mut mgr = TimeoutManager::new();
        let now = Instant::now();
        let id = mgr.add(now, || {});
        assert_eq!(mgr.next_deadline(), Some(now));
        mgr.cancel(id);
        assert_eq!(mgr.next_deadline(), None);
    }
}
