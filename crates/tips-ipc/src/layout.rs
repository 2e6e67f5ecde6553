//! Segment memory layout: `header + ring + attachment pool + subscription
//! bitmaps(N × 8 KiB)` (spec.md §6 "IPC segment layout").

pub const MAGIC: u32 = 0x5449_5053; // "TIPS"
pub const SUBSCRIPTION_BITMAP_BYTES_PER_READER: usize = 8 * 1024;

/// On-disk/in-segment header used to fail-fast on a version mismatch
/// between a segment's creator and a later attacher (spec.md §6: "Layout
/// is version-coupled to compile-time capacity; mismatched attachers must
/// fail-fast").
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SegmentHeader {
    pub magic: u32,
    pub capacity_bits: u8,
    pub _pad: [u8; 3],
    pub slot_size: u32,
    pub ipc_capacity: u32,
    pub pool_block_size: u32,
    pub pool_block_count: u32,
}

impl SegmentHeader {
    pub const WIRE_SIZE: usize = std::mem::size_of::<Self>();

    pub fn matches(&self, other: &SegmentHeader) -> bool {
        self.capacity_bits == other.capacity_bits
            && self.slot_size == other.slot_size
            && self.ipc_capacity == other.ipc_capacity
            && self.pool_block_size == other.pool_block_size
            && self.pool_block_count == other.pool_block_count
    }
}

/// Byte offsets/sizes of each region within a segment, computed once from
/// its header.
#[derive(Debug, Clone, Copy)]
pub struct SegmentLayout {
    pub header_size: usize,
    pub ring_offset: usize,
    pub ring_size: usize,
    pub pool_offset: usize,
    pub pool_size: usize,
    pub bitmap_offset: usize,
    pub bitmap_size: usize,
    pub total_size: usize,
}

impl SegmentLayout {
    pub fn compute(h: &SegmentHeader) -> Self {
        let header_size = align8(SegmentHeader::WIRE_SIZE);
        let capacity = 1usize << h.capacity_bits;
        let n = h.ipc_capacity as usize;
        let ring_size = ring_buffer_footprint(capacity, h.slot_size as usize, n);
        let pool_size = h.pool_block_size as usize * h.pool_block_count as usize;
        let bitmap_size = n * SUBSCRIPTION_BITMAP_BYTES_PER_READER;

        let ring_offset = header_size;
        let pool_offset = ring_offset + ring_size;
        let bitmap_offset = pool_offset + pool_size;
        let total_size = bitmap_offset + bitmap_size;

        Self { header_size, ring_offset, ring_size, pool_offset, pool_size, bitmap_offset, bitmap_size, total_size }
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// `ringbuffer_footprint(capacity, slot_size)` from spec.md §6: the
/// producer counter, per-reader sequence/purge-snapshot arrays, a
/// registered-reader byte per slot, and `capacity` slots each carrying an
/// 8-byte sequence marker plus `slot_size` payload bytes.
pub fn ring_buffer_footprint(capacity: usize, slot_size: usize, max_readers: usize) -> usize {
    let producer_seq = 8;
    let read_seq = max_readers * 8;
    let last_purge_seq = max_readers * 8;
    let registered = align8(max_readers);
    let slots = capacity * (8 + slot_size);
    producer_seq + read_seq + last_purge_seq + registered + slots
}
