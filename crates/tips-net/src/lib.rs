//! Reliable network send/recv engines for TIPS (SPEC_FULL.md §2 C8/C9): an
//! unreliable UDP multicast fast channel backed by a TCP recovery channel,
//! tied together by periodic advertisement, a token-bucket rate limiter,
//! and attachment fragmentation for cross-host 0-copy.

mod advertise;
mod arbiter;
mod attachment;
mod command;
mod config;
mod error;
mod rater;
mod recv;
mod send;
mod session;
mod wire;

pub use advertise::{TypeTagBackupSource, MAX_TAGS_PER_RECORD};
pub use arbiter::{Arbiter, Channel, Disposition};
pub use attachment::{fragment, MemorySeg, StartMemorySegTrain, TrainReassembly};
pub use command::{Command, CommandReader};
pub use config::{recv_known_keys, reject_unknown_keys, send_known_keys, RecvConfig, SendConfig};
pub use error::{NetError, Result};
pub use rater::Rater;
pub use recv::{Delivery, RecvEngine};
pub use send::{SendEngine, SubscriberRegistry};
pub use session::{is_retryable, run_backup_session, ReplaySource};
pub use wire::{append_framed, Frame, FrameAccumulator, FrameIter, OwnedFrame, TransportMessageHeader, FLAG_LAST_IN_DATAGRAM, HEADER_SIZE};
