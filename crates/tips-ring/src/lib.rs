//! tips-ring — lock-free multi-reader ring buffer and blocking bounded queue
//!
//! The spine of TIPS's intra-process and shared-memory transport. Every slot
//! carries its own sequence marker rather than relying on a shared head/tail
//! pair, which is what lets an arbitrary number of independent readers drain
//! the same backing array at their own pace while a producer is gated only
//! by whichever reader is currently slowest.
//!
//! # Example
//!
//! ```
//! use tips_ring::{RingBuffer, RingConfig};
//!
//! let ring: RingBuffer<u64, 2> = RingBuffer::new(RingConfig::new(4, 8, 1));
//! let reader = ring.register().unwrap();
//!
//! let mut claim = ring.claim(1);
//! claim.write(0, 42);
//! claim.commit();
//!
//! let peek = ring.peek(reader);
//! assert_eq!(*peek.get(0), 42);
//! peek.waste_all();
//! ```

mod backoff;
mod blocking;
mod config;
mod invariants;
mod metrics;
mod reservation;
mod ring;

pub use backoff::Backoff;
pub use blocking::BlockingBuffer;
pub use config::{RingConfig, HIGH_THROUGHPUT_CONFIG, LOW_LATENCY_CONFIG};
pub use metrics::{Metrics, MetricsSnapshot};
pub use reservation::{Claim, PeekRange};
pub use ring::{RingBuffer, DEAD};
