//! Timer core — an ordered multiset of `{fire_at, callback, interval?}`
//! entries, checked from the caller's own thread (SPEC_FULL.md §2 C4,
//! §4.4). No timer thread: every long-running component (`Context`,
//! network send/recv engines) calls `check_now` once per loop iteration to
//! post periodic duties like advertisement or purge.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

/// Opaque handle returned by [`TimerManager::schedule`], used to
/// [`TimerManager::cancel`] before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

struct Entry<F> {
    id: TimerId,
    fire_at: Instant,
    interval: Option<Duration>,
    callback: F,
}

impl<F> PartialEq for Entry<F> {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.id == other.id
    }
}
impl<F> Eq for Entry<F> {}
impl<F> PartialOrd for Entry<F> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl<F> Ord for Entry<F> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest `fire_at` sorts
        // to the top.
        other.fire_at.cmp(&self.fire_at).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// Single-threaded, not-thread-safe timer set. Each `Node`/engine owns its
/// own instance (spec.md §5: "Timer check ... Not thread-safe; each Node
/// owns its TimerManager").
pub struct TimerManager<F> {
    heap: BinaryHeap<Entry<F>>,
    cancelled: HashSet<TimerId>,
    next_id: u64,
}

impl<F> Default for TimerManager<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> TimerManager<F> {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new(), cancelled: HashSet::new(), next_id: 0 }
    }

    /// Schedules `callback` to fire at `fire_at`, optionally recurring
    /// every `interval` thereafter.
    pub fn schedule(&mut self, fire_at: Instant, interval: Option<Duration>, callback: F) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.heap.push(Entry { id, fire_at, interval, callback });
        id
    }

    pub fn schedule_after(&mut self, delay: Duration, interval: Option<Duration>, callback: F) -> TimerId {
        self.schedule(Instant::now() + delay, interval, callback)
    }

    /// Lazily cancels a timer: recorded in a side set so `check_now` skips
    /// it when the heap scan reaches it, rather than re-heapifying
    /// immediately.
    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<F: FnMut()> TimerManager<F> {
    /// Fires every timer with `fire_at <= now`, in order, rescheduling
    /// recurring ones by adding their interval. Returns the number fired.
    pub fn check_now(&mut self, now: Instant) -> usize {
        let mut fired = 0;
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.fire_at > now {
                break;
            }
            let mut entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            (entry.callback)();
            fired += 1;
            if let Some(interval) = entry.interval {
                entry.fire_at += interval;
                self.heap.push(entry);
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_due_timers_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut mgr: TimerManager<Box<dyn FnMut()>> = TimerManager::new();
        let base = Instant::now();

        let l2 = Rc::clone(&log);
        mgr.schedule(base, None, Box::new(move || l2.borrow_mut().push(2)));
        let l1 = Rc::clone(&log);
        mgr.schedule(base - Duration::from_millis(10), None, Box::new(move || l1.borrow_mut().push(1)));
        let l3 = Rc::clone(&log);
        mgr.schedule(base + Duration::from_secs(10), None, Box::new(move || l3.borrow_mut().push(3)));

        let fired = mgr.check_now(base);
        assert_eq!(fired, 2);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(mgr.len(), 1, "the future timer is still pending");
    }

    #[test]
    fn recurring_timer_reschedules_itself() {
        let count = Rc::new(RefCell::new(0));
        let mut mgr: TimerManager<Box<dyn FnMut()>> = TimerManager::new();
        let base = Instant::now();
        let c = Rc::clone(&count);
        mgr.schedule(base, Some(Duration::from_millis(1)), Box::new(move || *c.borrow_mut() += 1));

        mgr.check_now(base);
        assert_eq!(*count.borrow(), 1);
        mgr.check_now(base + Duration::from_millis(5));
        assert_eq!(*count.borrow(), 2, "fires once more despite missing several intervals");
    }

    #[test]
    fn cancelled_timer_is_skipped_lazily() {
        let fired = Rc::new(RefCell::new(false));
        let mut mgr: TimerManager<Box<dyn FnMut()>> = TimerManager::new();
        let base = Instant::now();
        let f = Rc::clone(&fired);
        let id = mgr.schedule(base, None, Box::new(move || *f.borrow_mut() = true));
        mgr.cancel(id);
        mgr.check_now(base);
        assert!(!*fired.borrow());
    }
}
