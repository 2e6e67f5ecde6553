//! The IPC ring: the same multi-reader sequence-marker protocol as
//! `tips-ring::RingBuffer` (SPEC_FULL.md §4.1), re-expressed over a raw
//! byte region living in shared memory rather than a process-local `Box`
//! allocation — `tips-ring::RingBuffer<T, N>` owns its backing storage and
//! cannot be placed at an externally-mmapped address, so the IPC segment
//! hosts an independent implementation of the identical algorithm instead
//! of reusing that type directly (see DESIGN.md).
//!
//! Payloads here are raw bytes (`&[u8]`) rather than a generic `T`: shared
//! memory can only safely hold plain data shared across process
//! boundaries, matching spec.md §3's "Messages must be trivially
//! destructible when they cross a process or host boundary".

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

pub const DEAD: u64 = u64::MAX - 1;
const WRITABLE: u64 = u64::MAX;

/// A view over the ring region of a mapped segment. Does not own the
/// memory — the owning [`crate::segment::Segment`] keeps the mapping
/// alive for at least as long as any `IpcRingView` borrowed from it.
pub struct IpcRingView {
    base: *mut u8,
    capacity: usize,
    mask: u64,
    slot_size: usize,
    max_readers: usize,
}

// SAFETY: every field is either `Copy` metadata or a pointer into a shared
// memory mapping whose lifetime is managed by the owning `Segment`; all
// mutation below goes through atomics at fixed offsets per the same
// protocol as `tips-ring::RingBuffer`.
unsafe impl Send for IpcRingView {}
unsafe impl Sync for IpcRingView {}

impl IpcRingView {
    /// # Safety
    /// `base` must point to at least `ring_buffer_footprint(capacity,
    /// slot_size, max_readers)` bytes of memory, exclusively dedicated to
    /// this ring's region, for the lifetime of this view.
    pub unsafe fn new(base: *mut u8, capacity: usize, slot_size: usize, max_readers: usize) -> Self {
        Self { base, capacity, mask: (capacity - 1) as u64, slot_size, max_readers }
    }

    /// Initializes the region's atomics to their empty state. Only the
    /// segment's owner calls this, exactly once, before any attacher maps
    /// the segment (spec.md §4.6 "Ownership").
    pub fn init(&self) {
        self.to_be_claimed().store(0, Ordering::Release);
        for r in 0..self.max_readers {
            self.read_seq_cell(r).store(DEAD, Ordering::Release);
            self.last_purge_cell(r).store(u64::MAX, Ordering::Release);
            self.registered_cell(r).store(0, Ordering::Release);
        }
        for s in 0..self.capacity {
            self.slot_seq_cell(s).store(WRITABLE, Ordering::Release);
        }
    }

    fn to_be_claimed(&self) -> &AtomicU64 {
        // SAFETY: offset 0, within the caller-guaranteed region.
        unsafe { &*(self.base as *const AtomicU64) }
    }

    fn read_seq_cell(&self, r: usize) -> &AtomicU64 {
        let off = 8 + r * 8;
        unsafe { &*(self.base.add(off) as *const AtomicU64) }
    }

    fn last_purge_cell(&self, r: usize) -> &AtomicU64 {
        let off = 8 + self.max_readers * 8 + r * 8;
        unsafe { &*(self.base.add(off) as *const AtomicU64) }
    }

    fn registered_cell(&self, r: usize) -> &AtomicU8 {
        let off = 8 + self.max_readers * 16 + r;
        unsafe { &*(self.base.add(off) as *const AtomicU8) }
    }

    fn slots_base(&self) -> *mut u8 {
        let registered_region = (self.max_readers + 7) & !7;
        let off = 8 + self.max_readers * 16 + registered_region;
        unsafe { self.base.add(off) }
    }

    fn slot_seq_cell(&self, idx: usize) -> &AtomicU64 {
        let stride = 8 + self.slot_size;
        unsafe { &*(self.slots_base().add(idx * stride) as *const AtomicU64) }
    }

    fn slot_payload(&self, idx: usize) -> *mut u8 {
        let stride = 8 + self.slot_size;
        unsafe { self.slots_base().add(idx * stride + 8) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_readers(&self) -> usize {
        self.max_readers
    }

    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    // -- reader lifecycle ----------------------------------------------

    pub fn register(&self) -> Option<usize> {
        for r in 0..self.max_readers {
            if self.registered_cell(r).compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed).is_ok() {
                let now = self.to_be_claimed().load(Ordering::Acquire);
                self.read_seq_cell(r).store(now, Ordering::Release);
                self.last_purge_cell(r).store(u64::MAX, Ordering::Release);
                return Some(r);
            }
        }
        None
    }

    pub fn unregister(&self, r: usize) {
        self.mark_dead(r);
        self.registered_cell(r).store(0, Ordering::Release);
    }

    pub fn mark_dead(&self, r: usize) {
        let old = self.read_seq_cell(r).swap(DEAD, Ordering::AcqRel);
        if old != DEAD {
            tracing::warn!(reader = r, "ipc ring reader marked dead");
        }
    }

    pub fn is_dead(&self, r: usize) -> bool {
        self.read_seq_cell(r).load(Ordering::Acquire) == DEAD
    }

    fn slowest_reader(&self) -> u64 {
        let mut slowest: Option<u64> = None;
        for r in 0..self.max_readers {
            if self.registered_cell(r).load(Ordering::Acquire) == 0 {
                continue;
            }
            let seq = self.read_seq_cell(r).load(Ordering::Acquire);
            if seq == DEAD {
                continue;
            }
            slowest = Some(slowest.map_or(seq, |s: u64| s.min(seq)));
        }
        slowest.unwrap_or_else(|| self.to_be_claimed().load(Ordering::Acquire))
    }

    fn slowest_reader_index(&self) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        for r in 0..self.max_readers {
            if self.registered_cell(r).load(Ordering::Acquire) == 0 {
                continue;
            }
            let seq = self.read_seq_cell(r).load(Ordering::Acquire);
            if seq == DEAD {
                continue;
            }
            best = match best {
                Some((_, bseq)) if bseq <= seq => best,
                _ => Some((r, seq)),
            };
        }
        best
    }

    fn has_room(&self, begin: u64, n: usize) -> bool {
        self.slowest_reader() + self.capacity as u64 > begin + n as u64
    }

    // -- producer --------------------------------------------------------

    /// Blocking claim of `n` contiguous sequence numbers. `write_fn(offset,
    /// &mut [u8])` fills each slot's payload bytes before they're
    /// published by the returned closure being dropped — callers must call
    /// [`IpcRingView::commit`] explicitly (no RAII guard, since the view
    /// itself is `Copy`-free but trivially re-creatable from the segment).
    pub fn claim(&self, n: usize) -> u64 {
        assert!(n > 0 && n <= self.capacity);
        let begin = self.to_be_claimed().fetch_add(n as u64, Ordering::AcqRel);
        let mut spins = 0u32;
        while !self.has_room(begin, n) {
            spins += 1;
            if spins > 1000 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        begin
    }

    pub fn try_claim(&self, n: usize) -> Option<u64> {
        assert!(n > 0 && n <= self.capacity);
        loop {
            let begin = self.to_be_claimed().load(Ordering::Acquire);
            if !self.has_room(begin, n) {
                return None;
            }
            if self
                .to_be_claimed()
                .compare_exchange_weak(begin, begin + n as u64, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(begin);
            }
        }
    }

    pub fn kill_claim(&self, n: usize) -> u64 {
        assert!(n > 0 && n <= self.capacity);
        let begin = self.to_be_claimed().fetch_add(n as u64, Ordering::AcqRel);
        let mut spins = 0u32;
        while !self.has_room(begin, n) {
            spins += 1;
            if spins > 1000 {
                if let Some((victim, _)) = self.slowest_reader_index() {
                    self.mark_dead(victim);
                }
                spins = 0;
            } else {
                std::hint::spin_loop();
            }
        }
        begin
    }

    /// Writes `bytes` (must be `<= slot_size`) into the slot for `seq`
    /// within a claimed range `[begin, begin+n)`.
    ///
    /// # Safety
    /// `seq` must fall within a range this caller currently owns via
    /// `claim`/`try_claim`/`kill_claim` and not yet `commit`ted.
    pub unsafe fn write_slot(&self, seq: u64, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.slot_size);
        let idx = (seq & self.mask) as usize;
        let dst = self.slot_payload(idx);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
    }

    /// Publishes `[begin, begin+n)`, each slot marked with its own absolute
    /// sequence number (spec.md §4.1 `commit(it, count)`).
    pub fn commit(&self, begin: u64, n: usize) {
        for offset in 0..n {
            let seq = begin + offset as u64;
            let idx = (seq & self.mask) as usize;
            self.slot_seq_cell(idx).store(seq, Ordering::Release);
        }
    }

    // -- reader ------------------------------------------------------------

    /// Returns `(begin, count)` — the contiguous ready prefix for reader
    /// `r` — without advancing. Use [`IpcRingView::slot_bytes`] to read
    /// each slot and [`IpcRingView::waste_after_peek`] to release.
    pub fn peek(&self, r: usize) -> (u64, usize) {
        let begin = self.read_seq_cell(r).load(Ordering::Acquire);
        if begin == DEAD {
            return (begin, 0);
        }
        let mut count = 0usize;
        while count < self.capacity {
            let seq = begin + count as u64;
            let idx = (seq & self.mask) as usize;
            if self.slot_seq_cell(idx).load(Ordering::Acquire) == seq {
                count += 1;
            } else {
                break;
            }
        }
        (begin, count)
    }

    pub fn slot_bytes(&self, seq: u64) -> &[u8] {
        let idx = (seq & self.mask) as usize;
        unsafe { std::slice::from_raw_parts(self.slot_payload(idx), self.slot_size) }
    }

    pub fn waste_after_peek(&self, r: usize, n: usize) {
        let old = self.read_seq_cell(r).load(Ordering::Acquire);
        if old == DEAD {
            return;
        }
        self.read_seq_cell(r).store(old + n as u64, Ordering::Release);
    }

    pub fn purge(&self) -> u64 {
        let mut killed = 0u64;
        if let Some((slowest, seq)) = self.slowest_reader_index() {
            let last = self.last_purge_cell(slowest).load(Ordering::Acquire);
            if last != u64::MAX && last == seq {
                self.mark_dead(slowest);
                killed |= 1 << slowest;
            }
        }
        for r in 0..self.max_readers {
            if self.registered_cell(r).load(Ordering::Acquire) != 0 && !self.is_dead(r) {
                self.last_purge_cell(r).store(self.read_seq_cell(r).load(Ordering::Acquire), Ordering::Release);
            }
        }
        killed
    }

    pub fn to_be_claimed_seq(&self) -> u64 {
        self.to_be_claimed().load(Ordering::Acquire)
    }
}
