//! Same-host IPC transport for TIPS: a named POSIX shared-memory segment
//! hosting a multi-reader ring, a fixed-block attachment pool, and a
//! per-reader subscription bitmap (SPEC_FULL.md §2 C6, §4.6).

mod error;
mod layout;
mod pool;
mod ring;
mod segment;
mod subscription;

pub use error::{IpcError, Result};
pub use layout::{ring_buffer_footprint, SegmentHeader, SegmentLayout, SUBSCRIPTION_BITMAP_BYTES_PER_READER};
pub use pool::PoolView;
pub use ring::IpcRingView;
pub use segment::{Ownership, Segment, SegmentConfig};
pub use subscription::SubscriptionBitmapView;
