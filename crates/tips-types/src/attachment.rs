//! `hasMemoryAttachment` — the out-of-band byte region a message may carry
//! (SPEC_FULL.md §2 C10, §3, §4.10).
//!
//! An [`Attachment`] is an explicit ref-counted handle with a registered
//! cleanup closure (DESIGN NOTES: "Shared-pointer attachment → explicit
//! ref-counted handle with registered cleanup closure"), standing in for
//! the source's placement-constructed shared pointer. The cleanup runs
//! exactly once, when the last clone is dropped — which is also "the last
//! in-process holder and the last outbound transmission have both
//! released" it, since every transport route that needs to keep the bytes
//! alive past `publish()` returning holds its own clone.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A region of memory backing an attachment, plus the means to free it.
///
/// `ptr`/`len` describe the live byte range. The pointer may address a
/// heap allocation, a shared-memory segment offset (see `tips-ipc`), or an
/// mmapped file region — `Attachment` itself is agnostic; only `cleanup`
/// knows how to release it.
struct Inner {
    ptr: *const u8,
    len: usize,
    cleanup: Box<dyn FnOnce() + Send>,
    /// Free-form scratch area transports use to stash routing metadata
    /// (e.g. an IPC pool block index) alongside the attachment itself,
    /// mirroring the source's `client_scratchpad[16]`.
    client_scratchpad: [u8; 16],
    live: AtomicUsize,
}

// SAFETY: `ptr` is never dereferenced by `Attachment` itself; callers that
// read the bytes via `as_slice` do so only while at least one clone (hence
// this `Inner`) is alive, and the byte range is immutable for the lifetime
// of the attachment.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Drop for Inner {
    fn drop(&mut self) {
        // Arc guarantees this runs exactly once, when the last clone across
        // every holder (in-process consumers, outbound transmissions that
        // cloned an Attachment to keep it alive) is gone.
        let cleanup = std::mem::replace(&mut self.cleanup, Box::new(|| {}));
        cleanup();
    }
}

/// Explicit ref-counted handle to an out-of-band attachment. Cheap to
/// clone (bumps an `Arc` strong count); the backing bytes are freed via
/// `cleanup` when the last clone drops.
#[derive(Clone)]
pub struct Attachment {
    inner: Arc<Inner>,
}

impl Attachment {
    /// Wraps a byte range with a cleanup closure run on last release.
    ///
    /// # Safety
    /// `ptr` must remain valid for `len` bytes until `cleanup` is invoked,
    /// and must not be mutated for the lifetime of this attachment (readers
    /// may observe it concurrently from any transport route).
    pub unsafe fn new(ptr: *const u8, len: usize, cleanup: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ptr,
                len,
                cleanup,
                client_scratchpad: [0u8; 16],
                live: AtomicUsize::new(1),
            }),
        }
    }

    /// Convenience constructor over a heap-allocated `Vec<u8>`: the vec's
    /// own allocation becomes the cleanup target.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let boxed = bytes.into_boxed_slice();
        let ptr = boxed.as_ptr();
        let raw = Box::into_raw(boxed);
        // SAFETY: `raw` is a valid, uniquely-owned allocation of `len`
        // bytes; the cleanup closure reclaims it via `Box::from_raw` and
        // nothing else aliases it until then.
        unsafe {
            Self::new(
                ptr,
                len,
                Box::new(move || {
                    drop(Box::from_raw(raw));
                }),
            )
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Borrows the attachment's bytes. Valid as long as `self` (or any
    /// clone) is alive.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the constructor's contract guarantees the range is valid
        // for the lifetime of any outstanding Attachment clone, and this
        // borrow is tied to `&self`.
        unsafe { std::slice::from_raw_parts(self.inner.ptr, self.inner.len) }
    }

    pub fn scratchpad(&self) -> &[u8; 16] {
        &self.inner.client_scratchpad
    }

    /// Number of live holders (clones) of this attachment right now.
    pub fn live_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Marks one more outstanding release expected before cleanup — used by
    /// a transport route (IPC ring slot, network send queue) that needs to
    /// track its own release independent of Rust's `Drop`, e.g. when the
    /// "holder" is a raw handle replicated into shared memory rather than
    /// a `clone()`'d `Attachment` value. Pairs with [`Attachment::release`].
    pub fn acquire(&self) -> usize {
        self.inner.live.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Releases one `acquire()`d reference. Does not itself run cleanup —
    /// cleanup is tied to the last `Attachment` clone dropping; `live`
    /// is bookkeeping for transports (like `tips-ipc`'s pool handle) that
    /// want to know when every non-`Attachment` consumer has finished too.
    pub fn release(&self) -> usize {
        self.inner.live.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("len", &self.inner.len)
            .field("live_clones", &self.live_count())
            .finish()
    }
}

/// Trait a message payload implements to declare it carries an
/// [`Attachment`] (GLOSSARY: `hasMemoryAttachment`).
pub trait HasMemoryAttachment {
    fn attachment(&self) -> &Attachment;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn cleanup_runs_exactly_once_on_last_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        let data = vec![1u8, 2, 3];
        let ptr = data.as_ptr();
        let len = data.len();
        let leaked: Box<[u8]> = data.into_boxed_slice();
        let raw = Box::into_raw(leaked);
        let att = unsafe {
            Attachment::new(
                ptr,
                len,
                Box::new(move || {
                    fired2.store(true, Ordering::SeqCst);
                    drop(Box::from_raw(raw));
                }),
            )
        };
        let clone1 = att.clone();
        let clone2 = att.clone();
        assert_eq!(att.as_slice(), &[1, 2, 3]);
        drop(att);
        assert!(!fired.load(Ordering::SeqCst));
        drop(clone1);
        assert!(!fired.load(Ordering::SeqCst));
        drop(clone2);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn from_vec_round_trips() {
        let att = Attachment::from_vec(vec![9, 8, 7]);
        assert_eq!(att.as_slice(), &[9, 8, 7]);
        assert_eq!(att.len(), 3);
    }
}
