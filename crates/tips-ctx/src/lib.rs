//! tips-ctx — the `Context` thread runner: owns a ring buffer (or, in
//! Blocking mode, per-Node `BlockingBuffer`s) and schedules `Node`s onto it
//! under one of four compile-time-selected variants (SPEC_FULL.md §2 C5,
//! §4.5).

mod affinity;
mod context;
mod node;
mod slot;

pub use affinity::{apply_sched_policy, pin_current_thread, CpuAffinityMask, SchedPolicy};
pub use context::{spawn_purge_watchdog, BlockingContext, BroadcastContext, NodeSchedule, PartitionContext, PoolContext};
pub use node::Node;
pub use slot::Slot;
