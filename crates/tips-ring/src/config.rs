/// Configuration for a [`crate::RingBuffer`].
///
/// Slot size and capacity are both required to be powers of two per
/// SPEC_FULL.md §3 (`RingBuffer<N>` state): capacity so that index
/// computation is a mask, slot size so that the domain-level "max message
/// size across subscribed types" can be rounded up cheaply.
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    /// Ring buffer size as power of 2 slots.
    pub capacity_bits: u8,
    /// Byte size of a slot's payload region (excluding the 8-byte sequence
    /// marker), rounded by the caller to a power of two.
    pub slot_size: usize,
    /// Seconds between `purge()` invocations by the owning watchdog thread.
    pub seconds_between_purge: u64,
}

impl RingConfig {
    /// Creates a new configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity_bits` is 0 or greater than 24 (16M slots max, to
    /// prevent accidental multi-gigabyte allocations).
    pub const fn new(capacity_bits: u8, slot_size: usize, seconds_between_purge: u64) -> Self {
        assert!(
            capacity_bits > 0 && capacity_bits <= 24,
            "capacity_bits must be between 1 and 24 (max 16M slots)"
        );
        assert!(slot_size > 0, "slot_size must be non-zero");
        Self {
            capacity_bits,
            slot_size,
            seconds_between_purge,
        }
    }

    /// Returns the capacity of the ring buffer (slot count).
    #[inline]
    pub const fn capacity(&self) -> usize {
        1 << self.capacity_bits
    }

    /// Returns the mask for index wrapping.
    #[inline]
    pub const fn mask(&self) -> u64 {
        (self.capacity() - 1) as u64
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity_bits: 14, // 16K slots
            slot_size: 256,
            seconds_between_purge: 1,
        }
    }
}

/// Tuned for broadcast fan-out with many short-lived, small messages.
pub const LOW_LATENCY_CONFIG: RingConfig = RingConfig::new(12, 128, 1);

/// Tuned for IPC rings backing many attacher processes with larger payloads.
pub const HIGH_THROUGHPUT_CONFIG: RingConfig = RingConfig::new(18, 4096, 5);
