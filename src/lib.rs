//! `tips` — Type-Inferred Pub/Sub middleware (spec.md).
//!
//! The public surface is [`Domain`]: a composition root that fans a
//! `publish` call out to whichever of the intra-process ring, the IPC
//! segment, and the reliable network engine actually has a subscriber for
//! the message's tag. Everything else (`tips-ring`, `tips-types`,
//! `tips-ctx`, `tips-ipc`, `tips-net`) is re-exported so a consumer can
//! build `Node`s and message types without depending on those crates
//! directly.

pub mod bag;
mod config;
mod domain;
mod error;

pub use config::{parse as parse_config, DomainConfig, GlobalConfig};
pub use domain::{Domain, DomainParams};
pub use error::{DomainError, Result};

pub use tips_ctx::{BlockingContext, BroadcastContext, Node, NodeSchedule, PartitionContext, PoolContext, SchedPolicy};
pub use tips_ipc::Ownership;
pub use tips_net::{RecvConfig, SendConfig};
pub use tips_ring::{RingBuffer, RingConfig};
pub use tips_types::{decode, encode, system, Attachment, MessageHead, MessageWrap, Tag, TypeTagSet, WireSafe, JUST_BYTES};
