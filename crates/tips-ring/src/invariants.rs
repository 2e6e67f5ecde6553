//! Debug assertion macros for ring buffer invariants.
//!
//! These macros provide runtime checks for the invariants documented in
//! `SPEC_FULL.md` §4.1. They are only active in debug builds
//! (`#[cfg(debug_assertions)]`), so there is zero overhead in release builds.

// =============================================================================
// INV-SEQ-01: Slowest-reader gate
// =============================================================================

/// Assert that a producer never commits past the slowest live reader by more
/// than one capacity's worth of slots.
///
/// **Invariant**: `claimed_seq < slowest_reader + capacity`
macro_rules! debug_assert_within_capacity {
    ($claimed:expr, $slowest:expr, $capacity:expr) => {
        debug_assert!(
            $claimed < $slowest.saturating_add($capacity as u64),
            "INV-SEQ-01 violated: claimed seq {} outruns slowest reader {} by more than capacity {}",
            $claimed,
            $slowest,
            $capacity
        )
    };
}

// =============================================================================
// INV-SEQ-02: Monotonic per-reader progress
// =============================================================================

/// Assert that a reader's sequence only increases.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "INV-SEQ-02 violated: {} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-SEQ-03: No spurious wrap-around
// =============================================================================

/// Assert we have not wrapped the 64-bit sequence space (practically
/// unreachable, per SPEC_FULL.md §9 Open Questions, but cheap to catch bugs
/// that make a sequence jump backwards by billions).
macro_rules! debug_assert_no_wrap {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old || $old.wrapping_sub($new) > (1u64 << 40),
            "INV-SEQ-03 potential wrap detected: {} went from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

// =============================================================================
// INV-PEEK-01: Peek never advances
// =============================================================================

/// Assert peek returns a range that starts exactly at the reader's current
/// position (peek must be idempotent until `waste_after_peek` is called).
macro_rules! debug_assert_peek_starts_at_read_seq {
    ($begin:expr, $read_seq:expr) => {
        debug_assert_eq!(
            $begin, $read_seq,
            "INV-PEEK-01 violated: peek begin {} != reader position {}",
            $begin, $read_seq
        )
    };
}

pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_no_wrap;
pub(crate) use debug_assert_peek_starts_at_read_seq;
pub(crate) use debug_assert_within_capacity;
