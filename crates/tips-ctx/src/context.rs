//! `Context` — the thread runner that powers `Node`s (SPEC_FULL.md §2 C5,
//! §4.5). A family of compile-time-selected variants rather than one
//! polymorphic type, matching the source's template-selected context
//! classes: [`BroadcastContext`] (every Node sees every message),
//! [`PartitionContext`] (messages load-shared across a Node group),
//! [`PoolContext`] (many Nodes, few OS threads, round-robin), and
//! [`BlockingContext`] (one OS thread per Node, `BlockingBuffer` instead of
//! the lock-free ring).
//!
//! Every variant's per-iteration loop order is the same, taken from
//! `hmbdc/pattern/PoolConsumer.hpp` / `ContextDetail.hpp`: check timers →
//! peek ring → dispatch range → waste → yield or sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tips_ring::{BlockingBuffer, RingBuffer};

use crate::affinity::{apply_sched_policy, pin_current_thread, CpuAffinityMask, SchedPolicy};
use crate::node::Node;
use crate::slot::Slot;

/// Per-Node scheduling hints a `Context::start` call applies to the Node's
/// thread before entering the dispatch loop (spec.md §4.5, §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSchedule {
    pub cpu_affinity_mask: CpuAffinityMask,
    pub sched_policy: SchedPolicy,
    pub sched_priority: i32,
    pub max_blocking_time: Duration,
}

fn run_dispatch_round<const S: usize>(node: &mut dyn Node, tag_matches: &dyn Fn(u16) -> bool, peeked: &[Slot<S>]) -> Result<usize, String> {
    let mut dispatched = 0;
    for slot in peeked {
        if tag_matches(slot.tag) {
            node.handle(slot.tag, slot.as_bytes())?;
            dispatched += 1;
        }
    }
    Ok(dispatched)
}

fn interest_matcher(node: &dyn Node) -> impl Fn(u16) -> bool {
    let interests = node.recv_interests();
    let just_bytes = node.wants_just_bytes();
    move |tag| just_bytes || interests.contains(&tag)
}

fn finish_node(node: &mut dyn Node, error: Option<String>) {
    node.stopped(error.as_deref());
    node.dropped();
}

/// Broadcast context: every started Node sees every message published into
/// the shared ring (spec.md §4.5). Backed by `RingBuffer<Slot<S>, N>`, `N`
/// the compile-time max concurrent subscriber count.
pub struct BroadcastContext<const S: usize, const N: usize> {
    ring: Arc<RingBuffer<Slot<S>, N>>,
    stopped: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl<const S: usize, const N: usize> BroadcastContext<S, N> {
    pub fn new(ring: Arc<RingBuffer<Slot<S>, N>>) -> Self {
        Self { ring, stopped: Arc::new(AtomicBool::new(false)), handles: Vec::new() }
    }

    pub fn ring(&self) -> &Arc<RingBuffer<Slot<S>, N>> {
        &self.ring
    }

    /// Registers `node`'s reader on the shared ring and spawns its
    /// dispatch thread.
    pub fn start(&mut self, mut node: Box<dyn Node>, schedule: NodeSchedule) {
        let Some(reader) = self.ring.register() else {
            tracing::error!("BroadcastContext ring has no free reader slots");
            finish_node(node.as_mut(), Some("no free reader slots".to_string()));
            return;
        };
        let ring = Arc::clone(&self.ring);
        let stopped = Arc::clone(&self.stopped);
        let handle = std::thread::spawn(move || {
            pin_current_thread(schedule.cpu_affinity_mask);
            apply_sched_policy(schedule.sched_policy, schedule.sched_priority);
            node.message_dispatching_started();
            let matches = interest_matcher(node.as_ref());
            tracing::info!(reader, "node dispatch loop started");

            let mut error: Option<String> = None;
            loop {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                node.on_loop_tick();
                let peek = ring.peek(reader);
                if peek.is_empty() {
                    drop(peek);
                    std::thread::sleep(schedule.max_blocking_time.min(Duration::from_millis(10)));
                    continue;
                }
                let n = peek.len();
                let mut batch = Vec::with_capacity(n);
                for i in 0..n {
                    batch.push(*peek.get(i));
                }
                peek.waste_all();
                match run_dispatch_round(node.as_mut(), &matches, &batch) {
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(reader, error = %e, "node callback failed");
                        error = Some(e);
                        break;
                    }
                }
            }
            ring.unregister(reader);
            tracing::info!(reader, "node dispatch loop stopped");
            finish_node(node.as_mut(), error);
        });
        self.handles.push(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn join(&mut self) {
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

/// Partition context: a Node *group* shares one reader; each peeked message
/// is handed to exactly one group member, round-robin, so the group
/// load-shares the stream rather than every member seeing every message
/// (spec.md §4.5 "Partition context").
pub struct PartitionContext<const S: usize, const N: usize> {
    ring: Arc<RingBuffer<Slot<S>, N>>,
    reader: usize,
    members: Arc<Mutex<Vec<Box<dyn Node>>>>,
    stopped: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl<const S: usize, const N: usize> PartitionContext<S, N> {
    pub fn new(ring: Arc<RingBuffer<Slot<S>, N>>) -> Option<Self> {
        let reader = ring.register()?;
        Some(Self { ring, reader, members: Arc::new(Mutex::new(Vec::new())), stopped: Arc::new(AtomicBool::new(false)), handle: None })
    }

    /// Adds a Node to the partition's load-sharing group. Must be called
    /// before [`PartitionContext::start`].
    pub fn add(&mut self, node: Box<dyn Node>) {
        self.members.lock().unwrap().push(node);
    }

    /// Spawns the single thread that peeks the shared reader and
    /// round-robins each ready message to the next group member whose
    /// interests match it.
    pub fn start(&mut self, schedule: NodeSchedule) {
        let ring = Arc::clone(&self.ring);
        let reader = self.reader;
        let members = Arc::clone(&self.members);
        let stopped = Arc::clone(&self.stopped);
        let handle = std::thread::spawn(move || {
            pin_current_thread(schedule.cpu_affinity_mask);
            apply_sched_policy(schedule.sched_policy, schedule.sched_priority);
            {
                let mut guard = members.lock().unwrap();
                for node in guard.iter_mut() {
                    node.message_dispatching_started();
                }
            }
            let mut next_member = 0usize;
            loop {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                let peek = ring.peek(reader);
                if peek.is_empty() {
                    drop(peek);
                    std::thread::sleep(schedule.max_blocking_time.min(Duration::from_millis(10)));
                    continue;
                }
                let n = peek.len();
                let batch: Vec<Slot<S>> = (0..n).map(|i| *peek.get(i)).collect();
                peek.waste_all();

                let mut guard = members.lock().unwrap();
                if guard.is_empty() {
                    continue;
                }
                for slot in batch {
                    let member_count = guard.len();
                    for attempt in 0..member_count {
                        let idx = (next_member + attempt) % member_count;
                        let interests = guard[idx].recv_interests();
                        if guard[idx].wants_just_bytes() || interests.contains(&slot.tag) {
                            if let Err(e) = guard[idx].handle(slot.tag, slot.as_bytes()) {
                                tracing::error!(member = idx, error = %e, "partition member callback failed");
                            }
                            next_member = (idx + 1) % member_count;
                            break;
                        }
                    }
                }
            }
            ring.unregister(reader);
            let mut guard = members.lock().unwrap();
            for node in guard.iter_mut() {
                finish_node(node.as_mut(), None);
            }
        });
        self.handle = Some(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn join(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Pool context: a fixed set of worker threads each round-robins over the
/// set of registered Nodes, running each Node's handler for up to
/// `max_batch_message_count` messages per visit — for domains with many
/// more Nodes than cores (spec.md §4.5).
pub struct PoolContext<const S: usize, const N: usize> {
    ring: Arc<RingBuffer<Slot<S>, N>>,
    nodes: Arc<Mutex<Vec<(usize, Box<dyn Node>)>>>, // (reader, node)
    workers: usize,
    max_batch_message_count: usize,
    stopped: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl<const S: usize, const N: usize> PoolContext<S, N> {
    pub fn new(ring: Arc<RingBuffer<Slot<S>, N>>, workers: usize, max_batch_message_count: usize) -> Self {
        assert!(workers > 0, "PoolContext needs at least one worker thread");
        Self {
            ring,
            nodes: Arc::new(Mutex::new(Vec::new())),
            workers,
            max_batch_message_count,
            stopped: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Registers `node`'s own reader; it will be visited round-robin by
    /// whichever pool worker reaches it next.
    pub fn add(&mut self, mut node: Box<dyn Node>) {
        let Some(reader) = self.ring.register() else {
            tracing::error!("PoolContext ring has no free reader slots");
            finish_node(node.as_mut(), Some("no free reader slots".to_string()));
            return;
        };
        node.message_dispatching_started();
        self.nodes.lock().unwrap().push((reader, node));
    }

    /// Spawns `workers` OS threads that share the Node set.
    pub fn start(&mut self, schedule: NodeSchedule) {
        for worker_id in 0..self.workers {
            let ring = Arc::clone(&self.ring);
            let nodes = Arc::clone(&self.nodes);
            let stopped = Arc::clone(&self.stopped);
            let max_batch = self.max_batch_message_count;
            let total_workers = self.workers;
            let handle = std::thread::spawn(move || {
                pin_current_thread(schedule.cpu_affinity_mask);
                apply_sched_policy(schedule.sched_policy, schedule.sched_priority);
                loop {
                    if stopped.load(Ordering::Acquire) {
                        break;
                    }
                    let mut guard = nodes.lock().unwrap();
                    let node_count = guard.len();
                    if node_count == 0 {
                        drop(guard);
                        std::thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    let mut did_work = false;
                    let mut idx = worker_id;
                    while idx < node_count {
                        let (reader, node) = &mut guard[idx];
                        node.on_loop_tick();
                        let peek = ring.peek(*reader);
                        let n = peek.len().min(max_batch);
                        if n > 0 {
                            let batch: Vec<Slot<S>> = (0..n).map(|i| *peek.get(i)).collect();
                            peek.waste(n);
                            let matches = interest_matcher(node.as_ref());
                            if let Err(e) = run_dispatch_round(node.as_mut(), &matches, &batch) {
                                tracing::error!(node = idx, error = %e, "pool node callback failed");
                            }
                            did_work = true;
                        } else {
                            drop(peek);
                        }
                        idx += total_workers;
                    }
                    drop(guard);
                    if !did_work {
                        std::thread::sleep(schedule.max_blocking_time.min(Duration::from_millis(5)));
                    }
                }
            });
            self.handles.push(handle);
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn join(&mut self) {
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
        let mut guard = self.nodes.lock().unwrap();
        for (reader, node) in guard.iter_mut() {
            self.ring.unregister(*reader);
            finish_node(node.as_mut(), None);
        }
        guard.clear();
    }
}

/// Blocking context: each Node owns a dedicated OS thread blocking on a
/// `BlockingBuffer` (OS condvars) rather than busy-waiting on the lock-free
/// ring (spec.md §4.5 "Blocking context").
pub struct BlockingContext<T: Send + 'static> {
    handles: Vec<JoinHandle<()>>,
    queues: Vec<Arc<BlockingBuffer<T>>>,
    stopped: Arc<AtomicBool>,
}

impl<T: Send + 'static> Default for BlockingContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> BlockingContext<T> {
    pub fn new() -> Self {
        Self { handles: Vec::new(), queues: Vec::new(), stopped: Arc::new(AtomicBool::new(false)) }
    }

    /// Creates a bounded queue for a new Node and returns a producer handle
    /// callers use to push items (typically the Domain's publish path).
    pub fn make_queue(&mut self, capacity: usize) -> Arc<BlockingBuffer<T>> {
        let q = Arc::new(BlockingBuffer::new(capacity));
        self.queues.push(Arc::clone(&q));
        q
    }

    /// Spawns a dedicated thread draining `queue` into `handler`, blocking
    /// on the queue's condvar when empty instead of spinning.
    pub fn start<F>(&mut self, queue: Arc<BlockingBuffer<T>>, schedule: NodeSchedule, mut on_start: impl FnMut() + Send + 'static, mut handler: F, mut on_stop: impl FnMut() + Send + 'static)
    where
        F: FnMut(T) + Send + 'static,
    {
        let stopped = Arc::clone(&self.stopped);
        let handle = std::thread::spawn(move || {
            pin_current_thread(schedule.cpu_affinity_mask);
            apply_sched_policy(schedule.sched_policy, schedule.sched_priority);
            on_start();
            loop {
                if stopped.load(Ordering::Acquire) {
                    break;
                }
                match queue.try_take_timeout(schedule.max_blocking_time.max(Duration::from_millis(1))) {
                    Some(item) => handler(item),
                    None => continue,
                }
            }
            on_stop();
        });
        self.handles.push(handle);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn join(&mut self) {
        for h in self.handles.drain(..) {
            let _ = h.join();
        }
    }
}

/// Fires `purge()` on `ring` every `interval`, from a dedicated watchdog
/// thread — the IPC owner's slow-reader purge duty (spec.md §4.6) and
/// equally applicable to any long-lived in-process ring.
pub fn spawn_purge_watchdog<const S: usize, const N: usize>(ring: Arc<RingBuffer<Slot<S>, N>>, interval: Duration, stopped: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut last = Instant::now();
        loop {
            if stopped.load(Ordering::Acquire) {
                break;
            }
            if last.elapsed() >= interval {
                let killed = ring.purge();
                if killed != 0 {
                    tracing::warn!(killed_mask = killed, "purge watchdog killed slow readers");
                }
                last = Instant::now();
            }
            std::thread::sleep(Duration::from_millis(50).min(interval));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tips_ring::RingConfig;

    struct Recorder {
        interests: Vec<u16>,
        tx: mpsc::Sender<(u16, Vec<u8>)>,
    }

    impl Node for Recorder {
        fn recv_interests(&self) -> Vec<u16> {
            self.interests.clone()
        }
        fn handle(&mut self, tag: u16, bytes: &[u8]) -> Result<(), String> {
            self.tx.send((tag, bytes.to_vec())).unwrap();
            Ok(())
        }
    }

    #[test]
    fn broadcast_context_delivers_to_every_node() {
        let ring: Arc<RingBuffer<Slot<32>, 4>> = Arc::new(RingBuffer::new(RingConfig::new(4, 32, 1)));
        let mut ctx = BroadcastContext::new(Arc::clone(&ring));

        let (tx1, rx1) = mpsc::channel();
        let (tx2, rx2) = mpsc::channel();
        ctx.start(Box::new(Recorder { interests: vec![1001], tx: tx1 }), NodeSchedule { max_blocking_time: Duration::from_millis(1), ..Default::default() });
        ctx.start(Box::new(Recorder { interests: vec![1001], tx: tx2 }), NodeSchedule { max_blocking_time: Duration::from_millis(1), ..Default::default() });

        // give readers a moment to register before publishing.
        std::thread::sleep(Duration::from_millis(20));
        let mut claim = ring.claim(1);
        claim.write(0, Slot::pack(1001, b"hi"));
        claim.commit();

        let (tag1, bytes1) = rx1.recv_timeout(Duration::from_secs(2)).unwrap();
        let (tag2, bytes2) = rx2.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(tag1, 1001);
        assert_eq!(bytes1, b"hi");
        assert_eq!(tag2, 1001);
        assert_eq!(bytes2, b"hi");

        ctx.stop();
        ctx.join();
    }

    #[test]
    fn broadcast_context_filters_by_interest() {
        let ring: Arc<RingBuffer<Slot<32>, 2>> = Arc::new(RingBuffer::new(RingConfig::new(4, 32, 1)));
        let mut ctx = BroadcastContext::new(Arc::clone(&ring));
        let (tx, rx) = mpsc::channel();
        ctx.start(Box::new(Recorder { interests: vec![2000], tx }), NodeSchedule { max_blocking_time: Duration::from_millis(1), ..Default::default() });
        std::thread::sleep(Duration::from_millis(20));

        let mut claim = ring.claim(2);
        claim.write(0, Slot::pack(1999, b"nope"));
        claim.write(1, Slot::pack(2000, b"yes"));
        claim.commit();

        let (tag, bytes) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(tag, 2000);
        assert_eq!(bytes, b"yes");
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "the unsubscribed tag must not be delivered");

        ctx.stop();
        ctx.join();
    }
}
