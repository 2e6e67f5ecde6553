//! Property-based tests for the invariants documented in SPEC_FULL.md §8.

use proptest::prelude::*;
use tips_ring::{RingBuffer, RingConfig};

proptest! {
    /// Every committed sequence is delivered to a single reader exactly
    /// once, in order, regardless of how the claims are batched.
    #[test]
    fn single_reader_sees_every_value_once_in_order(batch_sizes in prop::collection::vec(1usize..4, 1..50)) {
        let ring: RingBuffer<u32, 1> = RingBuffer::new(RingConfig::new(6, 8, 1));
        let r = ring.register().unwrap();

        let mut expected = Vec::new();
        let mut next = 0u32;
        for size in &batch_sizes {
            let size = (*size).min(ring.capacity());
            let mut claim = ring.claim(size);
            for i in 0..size {
                claim.write(i, next);
                expected.push(next);
                next += 1;
            }
            claim.commit();

            // Drain opportunistically, like a real reader would between claims.
            let peek = ring.peek(r);
            let n = peek.len();
            let mut got = Vec::with_capacity(n);
            for i in 0..n {
                got.push(*peek.get(i));
            }
            peek.waste(n);
            prop_assert_eq!(&got, &expected[expected.len() - got.len()..]);
        }

        // Drain whatever remains.
        loop {
            let peek = ring.peek(r);
            if peek.is_empty() {
                break;
            }
            let n = peek.len();
            peek.waste(n);
        }
    }

    /// `try_claim` never leaves a permanent hole: if it returns `None`, the
    /// producer sequence counter did not move.
    #[test]
    fn try_claim_failure_does_not_advance_sequence(n in 1usize..20) {
        let ring: RingBuffer<u32, 1> = RingBuffer::new(RingConfig::new(2, 8, 1)); // capacity 4
        let _r = ring.register().unwrap(); // never drained -> ring fills and stays full

        for i in 0..ring.capacity() {
            let mut c = ring.claim(1);
            c.write(0, i as u32);
            c.commit();
        }

        let before = ring.to_be_claimed();
        for _ in 0..n {
            prop_assert!(ring.try_claim(1).is_none());
        }
        prop_assert_eq!(ring.to_be_claimed(), before);
    }
}
