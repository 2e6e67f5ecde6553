//! Loom-based concurrency tests for the sequence-marker ring protocol.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`
//!
//! `RingBuffer` itself uses plain `std::sync::atomic`, which loom can't
//! instrument directly, so these tests model the same protocol — a per-slot
//! sequence marker, producer gated on the slowest reader, reader matching a
//! slot by comparing its marker to its own counter — against `loom`'s atomics
//! in isolation, the way the teacher's `loom_tests.rs` models its head/tail
//! SPSC protocol rather than running loom over the real `Ring` directly.

#![cfg(feature = "loom")]

use loom::sync::atomic::{AtomicU64, Ordering};
use loom::sync::Arc;
use loom::thread;
use std::cell::UnsafeCell;

/// Single-reader slice of `tips_ring::RingBuffer`'s protocol: each slot
/// carries its own sequence marker (`u64::MAX` = writable), the producer
/// publishes by storing its claimed index into the marker, and the reader
/// recognizes a ready slot by `marker == read_seq`.
struct LoomRing {
    capacity: usize,
    claimed: AtomicU64,
    read_seq: AtomicU64,
    markers: Box<[AtomicU64]>,
    slots: UnsafeCell<Box<[u64]>>,
}

const WRITABLE: u64 = u64::MAX;

unsafe impl Send for LoomRing {}
unsafe impl Sync for LoomRing {}

impl LoomRing {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            claimed: AtomicU64::new(0),
            read_seq: AtomicU64::new(0),
            markers: (0..capacity).map(|_| AtomicU64::new(WRITABLE)).collect(),
            slots: UnsafeCell::new(vec![0u64; capacity].into_boxed_slice()),
        }
    }

    fn mask(&self, seq: u64) -> usize {
        (seq as usize) & (self.capacity - 1)
    }

    /// Claims one slot if the reader has room, writes `value`, publishes.
    fn try_claim_and_commit(&self, value: u64) -> bool {
        let begin = self.claimed.load(Ordering::Relaxed);
        let read = self.read_seq.load(Ordering::Acquire);
        if read + self.capacity as u64 <= begin {
            return false;
        }
        self.claimed.store(begin + 1, Ordering::Relaxed);
        let idx = self.mask(begin);
        // SAFETY: the room check above guarantees no live reader still
        // expects this slot's previous occupant.
        unsafe { (*self.slots.get())[idx] = value };
        self.markers[idx].store(begin, Ordering::Release);
        true
    }

    /// Reads and releases the next ready slot, if any.
    fn try_take(&self) -> Option<u64> {
        let read = self.read_seq.load(Ordering::Relaxed);
        let idx = self.mask(read);
        if self.markers[idx].load(Ordering::Acquire) != read {
            return None;
        }
        // SAFETY: the marker matching `read` means the producer's write
        // happened-before this load via the Release/Acquire pair above.
        let value = unsafe { (*self.slots.get())[idx] };
        self.read_seq.store(read + 1, Ordering::Release);
        Some(value)
    }
}

#[test]
fn loom_marker_protocol_preserves_order() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new(2));
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            producer_ring.try_claim_and_commit(10);
            producer_ring.try_claim_and_commit(20);
        });

        let mut received = Vec::new();
        for _ in 0..6 {
            if let Some(v) = ring.try_take() {
                received.push(v);
            }
            if received.len() == 2 {
                break;
            }
            loom::thread::yield_now();
        }
        producer.join().unwrap();

        if received.len() >= 2 {
            assert_eq!(received[0], 10);
            assert_eq!(received[1], 20);
        }
    });
}

#[test]
fn loom_full_ring_blocks_claim_until_reader_advances() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new(2));
        assert!(ring.try_claim_and_commit(1));
        assert!(ring.try_claim_and_commit(2));
        assert!(!ring.try_claim_and_commit(3), "ring at capacity must reject a third claim");

        let consumer_ring = Arc::clone(&ring);
        let consumer = thread::spawn(move || consumer_ring.try_take());
        let taken = consumer.join().unwrap();
        assert_eq!(taken, Some(1));

        assert!(ring.try_claim_and_commit(3), "room freed by the reader must unblock a new claim");
    });
}

#[test]
fn loom_no_duplicate_no_hole_delivery() {
    loom::model(|| {
        let ring = Arc::new(LoomRing::new(4));
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            let mut sent = 0usize;
            for i in 0..3u64 {
                while !producer_ring.try_claim_and_commit(i) {
                    loom::thread::yield_now();
                }
                sent += 1;
            }
            sent
        });

        let mut received = Vec::new();
        while received.len() < 3 {
            if let Some(v) = ring.try_take() {
                received.push(v);
            } else {
                loom::thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(received, vec![0, 1, 2], "delivery must be in-order with no duplicates or holes");
    });
}
