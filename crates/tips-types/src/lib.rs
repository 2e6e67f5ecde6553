//! tips-types — the shared data model every TIPS transport speaks:
//! message head/wrap, the `Attachment` 0-copy handle, the `TypeTagSet`
//! subscription bitmap, timers, and runtime dispatch (SPEC_FULL.md §2
//! C3/C4/C10).

mod attachment;
mod dispatch;
mod error;
mod message;
mod tag;
mod tagset;
mod timer;

pub use attachment::{Attachment, HasMemoryAttachment};
pub use dispatch::{DispatchMessage, Dispatcher};
pub use error::BoundaryError;
pub use message::{decode, encode, MessageHead, MessageWrap, WireSafe, NO_SEQUENCE};
pub use tag::{system, RangedTag, Tag, JUST_BYTES, SYSTEM_TAG_MAX};
pub use tagset::TypeTagSet;
pub use timer::{TimerId, TimerManager};
