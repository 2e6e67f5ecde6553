//! Per-reader-slot subscription bitmap replicated into shared memory so
//! that publishers can filter before copying into the ring (SPEC_FULL.md
//! §4.6, spec.md §6: "subscription_bitmaps(N × 8 KiB)").
//!
//! Each reader slot gets its own 8 KiB region — 65536 bits, one per tag —
//! so a publisher's `check` walks every attached reader's bitmap rather
//! than a single process-wide `TypeTagSet` (an attacher process only ever
//! writes its own slot; readers' slots are otherwise independent of one
//! another, unlike the in-process `TypeTagSet` which is a single shared
//! refcount map).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::layout::SUBSCRIPTION_BITMAP_BYTES_PER_READER;

const WORDS_PER_READER: usize = SUBSCRIPTION_BITMAP_BYTES_PER_READER / 8;

pub struct SubscriptionBitmapView {
    base: *mut u8,
    max_readers: usize,
}

unsafe impl Send for SubscriptionBitmapView {}
unsafe impl Sync for SubscriptionBitmapView {}

impl SubscriptionBitmapView {
    /// # Safety
    /// `base` must point to `max_readers * 8KiB` bytes dedicated to this
    /// region.
    pub unsafe fn new(base: *mut u8, max_readers: usize) -> Self {
        Self { base, max_readers }
    }

    pub fn init(&self) {
        for r in 0..self.max_readers {
            for w in 0..WORDS_PER_READER {
                self.word(r, w).store(0, Ordering::Release);
            }
        }
    }

    fn word(&self, reader: usize, word_idx: usize) -> &AtomicU64 {
        let off = reader * SUBSCRIPTION_BITMAP_BYTES_PER_READER + word_idx * 8;
        unsafe { &*(self.base.add(off) as *const AtomicU64) }
    }

    pub fn subscribe(&self, reader: usize, tag: u16) {
        let (w, bit) = Self::word_and_bit(tag);
        self.word(reader, w).fetch_or(bit, Ordering::AcqRel);
    }

    pub fn unsubscribe(&self, reader: usize, tag: u16) {
        let (w, bit) = Self::word_and_bit(tag);
        self.word(reader, w).fetch_and(!bit, Ordering::AcqRel);
    }

    fn word_and_bit(tag: u16) -> (usize, u64) {
        let t = tag as usize;
        (t >> 6, 1u64 << (t & 63))
    }

    /// `true` if any attached reader has subscribed to `tag` — the
    /// publish-side fast check before copying a message into the ring.
    pub fn any_subscriber(&self, tag: u16) -> bool {
        let (w, bit) = Self::word_and_bit(tag);
        for r in 0..self.max_readers {
            if self.word(r, w).load(Ordering::Acquire) & bit != 0 {
                return true;
            }
        }
        false
    }

    pub fn is_subscribed(&self, reader: usize, tag: u16) -> bool {
        let (w, bit) = Self::word_and_bit(tag);
        self.word(reader, w).load(Ordering::Acquire) & bit != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_unsubscribe_round_trip() {
        let mut buf = vec![0u8; 2 * SUBSCRIPTION_BITMAP_BYTES_PER_READER];
        let bm = unsafe { SubscriptionBitmapView::new(buf.as_mut_ptr(), 2) };
        bm.init();
        assert!(!bm.any_subscriber(42));
        bm.subscribe(0, 42);
        assert!(bm.any_subscriber(42));
        assert!(bm.is_subscribed(0, 42));
        assert!(!bm.is_subscribed(1, 42));
        bm.unsubscribe(0, 42);
        assert!(!bm.any_subscriber(42));
    }
}
