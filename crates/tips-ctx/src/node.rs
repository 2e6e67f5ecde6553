//! `Node` — the interface a consumer implements to be scheduled by a
//! `Context` (SPEC_FULL.md §4.5; DESIGN NOTES "CRTP Node pattern →
//! trait/interface with associated type list").

use tips_types::Tag;

/// A unit of work a `Context` schedules: declares the tags it wants
/// delivered, and is driven by `handle` once per matching message. The
/// CRTP base in the source is replaced here by an ordinary trait object —
/// the vtable cost is negligible next to a ring-buffer fence (DESIGN
/// NOTES).
pub trait Node: Send {
    /// Static + dynamic receive interests (tags this Node wants routed to
    /// it). Read once at registration; changing the return value after
    /// `Context::start` has no effect — use the domain's subscribe API for
    /// runtime changes.
    fn recv_interests(&self) -> Vec<Tag>;

    /// `true` if this Node also wants the `JustBytes` wildcard (spec.md
    /// §4.4) — every message not claimed by a more specific interest.
    fn wants_just_bytes(&self) -> bool {
        false
    }

    /// Invoked once per dispatched message matching `recv_interests` (or
    /// the `JustBytes` fallback). `tag` carries what a wire-crossing
    /// `MessageHead` would otherwise need to; `bytes` is the raw payload
    /// only, exactly as published (no head prefix — that framing is added
    /// only when a message actually crosses the IPC or network boundary).
    ///
    /// Returning `Err` is equivalent to the source's "throw to exit": the
    /// `Context` reports it via `stopped`, then drops this Node.
    fn handle(&mut self, tag: Tag, bytes: &[u8]) -> Result<(), String>;

    /// Runs once, in the Node's own thread, right before the dispatch loop
    /// begins.
    fn message_dispatching_started(&mut self) {}

    /// Runs once per loop iteration before the ring is peeked — the hook a
    /// Node uses to drive its own `TimerManager::check_now` (spec.md §4.5
    /// "check timers → peek ring → dispatch range → waste").
    fn on_loop_tick(&mut self) {}

    /// Runs exactly once, however the Node exited: normal `stop()`, or a
    /// `handle` error. `error` is `None` for a clean stop.
    fn stopped(&mut self, _error: Option<&str>) {}

    /// Runs exactly once after `stopped`, regardless of exit path — the
    /// Node's last chance to release resources (spec.md §4.5: "`drop`
    /// callback runs exactly once per node whether it exited via exception
    /// or stop").
    fn dropped(&mut self) {}
}
