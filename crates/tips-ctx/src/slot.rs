//! Fixed-size ring slot storage.
//!
//! spec.md §3 sizes a domain's ring slots to "the max of all subscribed
//! message sizes for that domain (compile-time deducible from the set of
//! subscribed types)". Rust's `tips-ring::RingBuffer<T, N>` needs a single
//! concrete `T`; `Slot<S>` is that `T` — a const-generic byte buffer a
//! `Context` monomorphizes per domain to the smallest `S` that fits every
//! message type it carries, tagged with its own length and message tag so
//! the producer side doesn't need a second out-of-band channel to tell
//! readers how much of the buffer is meaningful.
use tips_types::Tag;

#[derive(Clone, Copy)]
pub struct Slot<const S: usize> {
    pub tag: Tag,
    pub len: u16,
    pub bytes: [u8; S],
}

impl<const S: usize> Slot<S> {
    pub const fn empty() -> Self {
        Self { tag: 0, len: 0, bytes: [0u8; S] }
    }

    /// Packs `tag` and `payload` into a slot.
    ///
    /// # Panics
    /// Panics if `payload.len() > S` — the caller (`Context`/`Domain`) is
    /// responsible for sizing `S` to the domain's max message size at
    /// construction, so this indicates a configuration bug, not a runtime
    /// condition callers should recover from.
    pub fn pack(tag: Tag, payload: &[u8]) -> Self {
        assert!(payload.len() <= S, "message of {} bytes exceeds slot capacity {S}", payload.len());
        let mut bytes = [0u8; S];
        bytes[..payload.len()].copy_from_slice(payload);
        Self { tag, len: payload.len() as u16, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl<const S: usize> Default for Slot<S> {
    fn default() -> Self {
        Self::empty()
    }
}
