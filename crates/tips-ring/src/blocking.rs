//! Bounded blocking FIFO queue (SPEC_FULL.md §2 C2, §4.2).
//!
//! Used by `BlockingContext`, where each Node owns a dedicated OS thread and
//! blocks on OS condition variables instead of busy-waiting on a lock-free
//! ring — the right trade for a Node that would rather park than spin.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner<T> {
    queue: VecDeque<T>,
    capacity: usize,
}

/// A single-producer-friendly (any number of producers, single consumer per
/// instance), mutex-and-condvar bounded queue.
pub struct BlockingBuffer<T> {
    inner: Mutex<Inner<T>>,
    has_item: Condvar,
    has_slot: Condvar,
}

impl<T> BlockingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BlockingBuffer capacity must be non-zero");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                capacity,
            }),
            has_item: Condvar::new(),
            has_slot: Condvar::new(),
        }
    }

    /// Blocks until a slot is free, then enqueues `item`.
    pub fn put(&self, item: T) {
        let mut guard = self.inner.lock().unwrap();
        guard = self
            .has_slot
            .wait_while(guard, |inner| inner.queue.len() >= inner.capacity)
            .unwrap();
        guard.queue.push_back(item);
        drop(guard);
        self.has_item.notify_one();
    }

    /// Non-blocking put; `Some(item)` handed back if the queue is full.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut guard = self.inner.lock().unwrap();
        if guard.queue.len() >= guard.capacity {
            return Err(item);
        }
        guard.queue.push_back(item);
        drop(guard);
        self.has_item.notify_one();
        Ok(())
    }

    /// Put with a timeout; `Err(item)` if the deadline passes first.
    pub fn try_put_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.queue.len() < guard.capacity {
                guard.queue.push_back(item);
                drop(guard);
                self.has_item.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(item);
            }
            let (g, timed_out) = self.has_slot.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            if timed_out.timed_out() && guard.queue.len() >= guard.capacity {
                return Err(item);
            }
        }
    }

    /// Blocks until an item is available, then dequeues it.
    pub fn take(&self) -> T {
        let mut guard = self.inner.lock().unwrap();
        guard = self.has_item.wait_while(guard, |inner| inner.queue.is_empty()).unwrap();
        let item = guard.queue.pop_front().expect("non-empty by wait condition");
        drop(guard);
        self.has_slot.notify_one();
        item
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> Option<T> {
        let mut guard = self.inner.lock().unwrap();
        let item = guard.queue.pop_front();
        drop(guard);
        if item.is_some() {
            self.has_slot.notify_one();
        }
        item
    }

    /// Take with a timeout.
    pub fn try_take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.queue.pop_front() {
                drop(guard);
                self.has_slot.notify_one();
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (g, timed_out) = self.has_item.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
            if timed_out.timed_out() && guard.queue.is_empty() {
                return None;
            }
        }
    }

    /// Drains up to `max` items for batch handling, invoking `f` on each in
    /// FIFO order without removing them, then returns how many were peeked.
    /// Callers release with [`BlockingBuffer::waste_after_peek`].
    pub fn peek<F: FnMut(&T)>(&self, max: usize, mut f: F) -> usize {
        let guard = self.inner.lock().unwrap();
        let n = guard.queue.len().min(max);
        for item in guard.queue.iter().take(n) {
            f(item);
        }
        n
    }

    /// Removes the first `n` items already handled via [`BlockingBuffer::peek`].
    pub fn waste_after_peek(&self, n: usize) {
        let mut guard = self.inner.lock().unwrap();
        let n = n.min(guard.queue.len());
        guard.queue.drain(..n);
        drop(guard);
        if n > 0 {
            self.has_slot.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn put_take_fifo_order() {
        let q = BlockingBuffer::new(4);
        q.put(1);
        q.put(2);
        q.put(3);
        assert_eq!(q.take(), 1);
        assert_eq!(q.take(), 2);
        assert_eq!(q.take(), 3);
    }

    #[test]
    fn try_put_rejects_when_full() {
        let q = BlockingBuffer::new(2);
        q.try_put(1).unwrap();
        q.try_put(2).unwrap();
        assert_eq!(q.try_put(3), Err(3));
    }

    #[test]
    fn try_take_timeout_expires() {
        let q: BlockingBuffer<i32> = BlockingBuffer::new(2);
        let start = Instant::now();
        assert!(q.try_take_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn blocked_put_unblocks_on_take() {
        let q = Arc::new(BlockingBuffer::new(1));
        q.put(1);
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || {
            q2.put(2);
        });
        thread::sleep(Duration::from_millis(10));
        assert_eq!(q.take(), 1);
        handle.join().unwrap();
        assert_eq!(q.take(), 2);
    }

    #[test]
    fn peek_then_waste_batch() {
        let q = BlockingBuffer::new(8);
        for i in 0..5 {
            q.put(i);
        }
        let mut seen = Vec::new();
        let n = q.peek(3, |x| seen.push(*x));
        assert_eq!(n, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        q.waste_after_peek(n);
        assert_eq!(q.len(), 2);
        assert_eq!(q.take(), 3);
    }
}
