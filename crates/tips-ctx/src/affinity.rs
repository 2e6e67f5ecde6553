//! CPU affinity and scheduling class, applied from Node metadata at thread
//! start (spec.md §4.5, §6 `schedPolicy`/`schedPriority`).
//!
//! Grounded on `examples/aditya-git16-lithos/perf/src/bin/perf_report.rs`'s
//! `sched_setaffinity`/`CPU_SET` usage — the nearest pack repo that pins
//! worker threads to cores via `libc`. Linux-only; a no-op elsewhere.

/// Scheduling class, matching spec.md §6's `schedPolicy` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    #[default]
    Other,
    Rr,
    Fifo,
    Idle,
}

impl SchedPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHED_OTHER" => Some(Self::Other),
            "SCHED_RR" => Some(Self::Rr),
            "SCHED_FIFO" => Some(Self::Fifo),
            "SCHED_IDLE" => Some(Self::Idle),
            _ => None,
        }
    }
}

/// A bitmask of CPUs a Node's thread should be pinned to; `None` leaves the
/// OS scheduler free to migrate it.
pub type CpuAffinityMask = Option<u64>;

#[cfg(target_os = "linux")]
pub fn pin_current_thread(mask: CpuAffinityMask) {
    let Some(mask) = mask else { return };
    // SAFETY: `set` is zero-initialized then populated only via `CPU_SET`
    // for bits present in `mask`; `sched_setaffinity(0, ...)` targets the
    // calling thread and is always safe to call.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        for cpu in 0..64usize {
            if mask & (1 << cpu) != 0 {
                libc::CPU_SET(cpu, &mut set);
            }
        }
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            tracing::warn!(mask, "sched_setaffinity failed, continuing unpinned");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_mask: CpuAffinityMask) {}

#[cfg(target_os = "linux")]
pub fn apply_sched_policy(policy: SchedPolicy, priority: i32) {
    let (class, min_prio_policy) = match policy {
        SchedPolicy::Other => (libc::SCHED_OTHER, false),
        SchedPolicy::Idle => (libc::SCHED_IDLE, false),
        SchedPolicy::Rr => (libc::SCHED_RR, true),
        SchedPolicy::Fifo => (libc::SCHED_FIFO, true),
    };
    if !min_prio_policy {
        return; // SCHED_OTHER/IDLE do not take a realtime priority
    }
    // SAFETY: `param` only sets `sched_priority`; `sched_setscheduler(0,
    // ...)` targets the calling thread/process and fails safely (returns
    // -1) without side effects if the caller lacks CAP_SYS_NICE.
    unsafe {
        let param = libc::sched_param { sched_priority: priority };
        let rc = libc::sched_setscheduler(0, class, &param);
        if rc != 0 {
            tracing::warn!(?policy, priority, "sched_setscheduler failed, continuing with default class");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_sched_policy(_policy: SchedPolicy, _priority: i32) {}
