//! Lock-free multi-reader ring buffer — the spine of both intra-process and
//! shared-memory transport (SPEC_FULL.md §2 C1, §4.1).
//!
//! Unlike a classic SPSC/MPSC head-tail ring, every slot carries its own
//! sequence marker. A producer publishes a slot by storing its absolute
//! sequence number into that marker; a reader recognizes a ready slot by
//! comparing the marker against its own expected sequence. This lets
//! multiple independent readers progress at different rates off the same
//! backing array without a shared head pointer, and lets producers publish
//! out-of-arrival-order claims safely — the marker, not arrival order, is
//! what readers trust.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::backoff::Backoff;
use crate::config::RingConfig;
use crate::invariants::{debug_assert_monotonic, debug_assert_no_wrap, debug_assert_within_capacity};
use crate::metrics::Metrics;
use crate::reservation::{Claim, PeekRange};

/// Sentinel stored in `read_seq[r]` once a reader has been marked dead.
/// Per SPEC_FULL.md §3: "`0xFFFF…FFFE` sentinel means 'reader dead'".
pub const DEAD: u64 = u64::MAX - 1;

/// Sentinel a freshly constructed slot's sequence marker holds until its
/// first commit — "writable".
const WRITABLE: u64 = u64::MAX;

struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            seq: AtomicU64::new(WRITABLE),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Multi-reader, fixed-capacity, lock-free ring buffer.
///
/// `N` is the compile-time maximum number of concurrent readers (a Domain
/// sizes this to its maximum subscriber count, an IPC segment sizes it to
/// `IpcCapacity`). Readers attach/detach at runtime via [`RingBuffer::register`]
/// and [`RingBuffer::mark_dead`]; `N` only bounds how many can be live at once.
pub struct RingBuffer<T, const N: usize> {
    to_be_claimed_seq: CachePadded<AtomicU64>,
    read_seq: [CachePadded<AtomicU64>; N],
    last_purge_seq: [CachePadded<AtomicU64>; N],
    registered: [CachePadded<AtomicBool>; N],
    config: RingConfig,
    pub(crate) metrics: Metrics,
    pub(crate) slots: Box<[Slot<T>]>,
}

// SAFETY: all cross-thread access to `slots[i].value` is mediated by the
// sequence-marker protocol: a producer owns a slot from `claim` until
// `commit`, after which only readers whose expected sequence matches may
// read it, until the slowest such reader's `waste` permits a new claim.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T, const N: usize> RingBuffer<T, N> {
    pub fn new(config: RingConfig) -> Self {
        let capacity = config.capacity();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);

        Self {
            to_be_claimed_seq: CachePadded::new(AtomicU64::new(0)),
            read_seq: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(DEAD))),
            last_purge_seq: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
            registered: std::array::from_fn(|_| CachePadded::new(AtomicBool::new(false))),
            config,
            metrics: Metrics::new(),
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    #[inline]
    pub(crate) fn mask(&self) -> u64 {
        self.config.mask()
    }

    #[inline]
    pub fn max_readers(&self) -> usize {
        N
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // -------------------------------------------------------------------
    // READER LIFECYCLE
    // -------------------------------------------------------------------

    /// Attaches a new reader, returning its index in `[0, N)`. The reader
    /// starts from the current producer position — a late joiner receives
    /// only messages published after it attaches, matching a pub/sub
    /// subscriber's expectation (it never sees history it didn't ask for).
    pub fn register(&self) -> Option<usize> {
        for r in 0..N {
            if self.registered[r]
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let now = self.to_be_claimed_seq.load(Ordering::Acquire);
                self.read_seq[r].store(now, Ordering::Release);
                // `u64::MAX` marks "no purge snapshot taken yet" so the very
                // next `purge()` call only takes a baseline rather than
                // treating a freshly registered reader as already stalled.
                self.last_purge_seq[r].store(u64::MAX, Ordering::Release);
                return Some(r);
            }
        }
        None
    }

    /// Detaches a reader, freeing its slot for reuse by a future `register`.
    pub fn unregister(&self, r: usize) {
        self.mark_dead(r);
        self.registered[r].store(false, Ordering::Release);
    }

    /// Marks reader `r` dead; producers stop waiting on it. Idempotent.
    pub fn mark_dead(&self, r: usize) {
        let old = self.read_seq[r].swap(DEAD, Ordering::AcqRel);
        if old != DEAD {
            self.metrics.record_reader_killed();
            tracing::warn!(reader = r, "ring reader marked dead");
        }
    }

    #[inline]
    pub fn is_dead(&self, r: usize) -> bool {
        self.read_seq[r].load(Ordering::Acquire) == DEAD
    }

    #[inline]
    fn read_seq_of(&self, r: usize) -> u64 {
        self.read_seq[r].load(Ordering::Acquire)
    }

    /// `min(read_seq[r])` over live (registered, non-dead) readers, or the
    /// current producer position if there are none — in which case a
    /// producer is never gated.
    fn slowest_reader(&self) -> u64 {
        let mut slowest: Option<u64> = None;
        for r in 0..N {
            if !self.registered[r].load(Ordering::Acquire) {
                continue;
            }
            let seq = self.read_seq_of(r);
            if seq == DEAD {
                continue;
            }
            slowest = Some(match slowest {
                Some(s) => s.min(seq),
                None => seq,
            });
        }
        slowest.unwrap_or_else(|| self.to_be_claimed_seq.load(Ordering::Acquire))
    }

    /// The slowest live reader, tie-broken by lowest index — used by
    /// `kill_claim` and `purge` (SPEC_FULL.md §4.1 "Tie-break when killing
    /// slow reader").
    fn slowest_reader_index(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for r in 0..N {
            if !self.registered[r].load(Ordering::Acquire) {
                continue;
            }
            let seq = self.read_seq_of(r);
            if seq == DEAD {
                continue;
            }
            best = Some(match best {
                Some((_, bseq)) if bseq <= seq => best.unwrap(),
                _ => (r, seq),
            });
        }
        best
    }

    /// `true` once the slowest live reader has passed `begin + n - capacity`,
    /// i.e. `slowest_reader + capacity > begin + n` (SPEC_FULL.md §4.1).
    fn has_room(&self, begin: u64, n: usize) -> bool {
        let slowest = self.slowest_reader();
        slowest + self.capacity() as u64 > begin + n as u64
    }

    // -------------------------------------------------------------------
    // PRODUCER API
    // -------------------------------------------------------------------

    /// Blocking claim: reserves `n` contiguous sequence numbers, busy-waiting
    /// (with backoff) until the slowest live reader has room.
    pub fn claim(&self, n: usize) -> Claim<'_, T, N> {
        assert!(n > 0 && n <= self.capacity(), "claim size out of range");
        let begin = self.to_be_claimed_seq.fetch_add(n as u64, Ordering::AcqRel);
        debug_assert_no_wrap!("to_be_claimed_seq", begin, begin + n as u64);
        self.metrics.record_claim(n as u64);

        let mut backoff = Backoff::new();
        while !self.has_room(begin, n) {
            self.metrics.record_spin();
            backoff.snooze();
        }
        debug_assert_within_capacity!(begin + n as u64, self.slowest_reader(), self.capacity());

        Claim {
            ring: self,
            begin,
            count: n,
            committed: false,
        }
    }

    /// Non-blocking claim: returns `None` immediately if there isn't room,
    /// without consuming sequence numbers (so a failed call never leaves a
    /// hole for readers to wait on forever).
    pub fn try_claim(&self, n: usize) -> Option<Claim<'_, T, N>> {
        assert!(n > 0 && n <= self.capacity(), "claim size out of range");
        loop {
            let begin = self.to_be_claimed_seq.load(Ordering::Acquire);
            if !self.has_room(begin, n) {
                return None;
            }
            if self
                .to_be_claimed_seq
                .compare_exchange_weak(begin, begin + n as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.metrics.record_claim(n as u64);
                return Some(Claim {
                    ring: self,
                    begin,
                    count: n,
                    committed: false,
                });
            }
        }
    }

    /// Like [`RingBuffer::claim`], but preempts: once backoff is exhausted,
    /// forcibly marks the slowest live reader dead and continues waiting on
    /// whoever is slowest next. Used by the `waitForSlowReceivers=false`
    /// policy (SPEC_FULL.md §4.1).
    pub fn kill_claim(&self, n: usize) -> Claim<'_, T, N> {
        assert!(n > 0 && n <= self.capacity(), "claim size out of range");
        let begin = self.to_be_claimed_seq.fetch_add(n as u64, Ordering::AcqRel);
        self.metrics.record_claim(n as u64);

        let mut backoff = Backoff::new();
        while !self.has_room(begin, n) {
            if backoff.is_completed() {
                if let Some((victim, _)) = self.slowest_reader_index() {
                    self.mark_dead(victim);
                }
                backoff.reset();
            } else {
                self.metrics.record_spin();
                backoff.snooze();
            }
        }

        Claim {
            ring: self,
            begin,
            count: n,
            committed: false,
        }
    }

    // -------------------------------------------------------------------
    // READER API
    // -------------------------------------------------------------------

    /// Returns the contiguous prefix of slots ready for reader `r`, without
    /// advancing its position.
    pub fn peek(&self, r: usize) -> PeekRange<'_, T, N> {
        let begin = self.read_seq_of(r);
        if begin == DEAD {
            return PeekRange {
                ring: self,
                reader: r,
                begin,
                count: 0,
            };
        }
        let mask = self.mask();
        let cap = self.capacity();
        let mut count = 0usize;
        while count < cap {
            let seq = begin + count as u64;
            let idx = (seq & mask) as usize;
            if self.slots[idx].seq.load(Ordering::Acquire) == seq {
                count += 1;
            } else {
                break;
            }
        }
        if count == 0 {
            self.metrics.record_empty_peek();
        }
        PeekRange {
            ring: self,
            reader: r,
            begin,
            count,
        }
    }

    pub(crate) fn waste_after_peek(&self, r: usize, n: usize) {
        let old = self.read_seq_of(r);
        if old == DEAD {
            return;
        }
        let new = old + n as u64;
        debug_assert_monotonic!("read_seq", old, new);
        self.read_seq[r].store(new, Ordering::Release);
    }

    /// Producer-side watchdog. If the single overall-slowest live reader's
    /// sequence has not moved since the previous `purge()` call, it is
    /// marked dead. Returns a bitmask (bit `r` set iff reader `r` was newly
    /// killed by this call) — at most one bit per SPEC_FULL.md §8 scenario 3.
    pub fn purge(&self) -> u64 {
        let mut killed = 0u64;
        if let Some((slowest, seq)) = self.slowest_reader_index() {
            let last = self.last_purge_seq[slowest].load(Ordering::Acquire);
            if last != u64::MAX && last == seq {
                self.mark_dead(slowest);
                killed |= 1 << slowest;
            }
        }
        for r in 0..N {
            if self.registered[r].load(Ordering::Acquire) && !self.is_dead(r) {
                self.last_purge_seq[r].store(self.read_seq_of(r), Ordering::Release);
            }
        }
        killed
    }

    /// Current producer sequence — number of slots ever claimed.
    pub fn to_be_claimed(&self) -> u64 {
        self.to_be_claimed_seq.load(Ordering::Acquire)
    }

    /// Reader `r`'s current position, or `None` if dead/unregistered.
    pub fn reader_position(&self, r: usize) -> Option<u64> {
        if self.registered[r].load(Ordering::Acquire) && !self.is_dead(r) {
            Some(self.read_seq_of(r))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn cfg(bits: u8) -> RingConfig {
        RingConfig::new(bits, 8, 1)
    }

    #[test]
    fn single_reader_round_trip() {
        let ring: RingBuffer<u64, 1> = RingBuffer::new(cfg(4));
        let r = ring.register().unwrap();

        let mut c = ring.claim(3);
        c.write(0, 10);
        c.write(1, 20);
        c.write(2, 30);
        c.commit();

        let peek = ring.peek(r);
        assert_eq!(peek.len(), 3);
        assert_eq!(*peek.get(0), 10);
        assert_eq!(*peek.get(1), 20);
        assert_eq!(*peek.get(2), 30);
        peek.waste_all();

        assert_eq!(ring.peek(r).len(), 0);
    }

    #[test]
    fn ring_at_capacity_no_deadlock() {
        // Boundary property from SPEC_FULL.md §8: C producers each claiming
        // 1 slot, 1 reader reading 1 slot at a time.
        let ring: Arc<RingBuffer<u64, 1>> = Arc::new(RingBuffer::new(cfg(2))); // capacity 4
        let r = ring.register().unwrap();
        let capacity = ring.capacity() as u64;

        let producer_ring = Arc::clone(&ring);
        let producer = thread::spawn(move || {
            for i in 0..capacity {
                let mut c = producer_ring.claim(1);
                c.write(0, i);
                c.commit();
            }
        });

        let mut received = Vec::new();
        while (received.len() as u64) < capacity {
            let peek = ring.peek(r);
            for i in 0..peek.len() {
                received.push(*peek.get(i));
            }
            peek.waste_all();
        }
        producer.join().unwrap();
        assert_eq!(received, (0..capacity).collect::<Vec<_>>());
    }

    #[test]
    fn two_producers_one_reader_no_duplicates_no_holes() {
        let ring: Arc<RingBuffer<u64, 1>> = Arc::new(RingBuffer::new(cfg(6)));
        let r = ring.register().unwrap();
        const PER_PRODUCER: u64 = 20_000;

        let mut producers = Vec::new();
        for p in 0..2u64 {
            let ring = Arc::clone(&ring);
            producers.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut c = ring.claim(1);
                    c.write(0, p * PER_PRODUCER + i);
                    c.commit();
                }
            }));
        }

        let mut seen = std::collections::HashSet::new();
        while (seen.len() as u64) < 2 * PER_PRODUCER {
            let peek = ring.peek(r);
            let n = peek.len();
            for i in 0..n {
                assert!(seen.insert(*peek.get(i)), "duplicate delivery");
            }
            peek.waste(n);
        }
        for p in producers {
            p.join().unwrap();
        }
        assert_eq!(seen.len() as u64, 2 * PER_PRODUCER);
    }

    #[test]
    fn slow_reader_purge_kills_only_the_stalled_one() {
        // SPEC_FULL.md §8 scenario 3: three readers on a capacity-4 ring.
        // Readers 0 and 1 consume; reader 2 stops. purge() should return a
        // bitmask with only bit 2 set.
        let ring: RingBuffer<u64, 3> = RingBuffer::new(cfg(2));
        let r0 = ring.register().unwrap();
        let r1 = ring.register().unwrap();
        let r2 = ring.register().unwrap();
        assert_eq!((r0, r1, r2), (0, 1, 2));

        for i in 0..4u64 {
            let mut c = ring.try_claim(1).expect("room should exist before fill");
            c.write(0, i);
            c.commit();
        }

        // Readers 0 and 1 drain fully; reader 2 never does.
        for r in [r0, r1] {
            let peek = ring.peek(r);
            let n = peek.len();
            peek.waste(n);
        }

        assert_eq!(ring.purge(), 0, "reader 2 hasn't had a chance to stall yet");
        let killed = ring.purge();
        assert_eq!(killed, 0b100);
        assert!(ring.is_dead(r2));
    }

    #[test]
    fn mark_dead_unblocks_producer() {
        let ring: RingBuffer<u64, 1> = RingBuffer::new(cfg(2)); // capacity 4
        let r = ring.register().unwrap();
        for i in 0..4u64 {
            let mut c = ring.claim(1);
            c.write(0, i);
            c.commit();
        }
        assert!(ring.try_claim(1).is_none(), "ring should be full");
        ring.mark_dead(r);
        assert!(ring.try_claim(1).is_some(), "dead reader no longer gates producers");
    }

    #[test]
    fn late_joiner_does_not_see_history() {
        let ring: RingBuffer<u64, 2> = RingBuffer::new(cfg(4));
        let mut c = ring.claim(2);
        c.write(0, 1);
        c.write(1, 2);
        c.commit();

        let late = ring.register().unwrap();
        assert_eq!(ring.peek(late).len(), 0);

        let mut c = ring.claim(1);
        c.write(0, 3);
        c.commit();
        let peek = ring.peek(late);
        assert_eq!(peek.len(), 1);
        assert_eq!(*peek.get(0), 3);
    }
}
