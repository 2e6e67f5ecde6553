//! Named shared-memory segment hosting a ring buffer, attachment pool, and
//! subscription bitmap (SPEC_FULL.md §2 C6, §4.6).
//!
//! POSIX `shm_open`/`mmap`/`ftruncate` usage is grounded on
//! `examples/natyamatsya-cpp-ipc/rust/libipc/src/platform/posix.rs`'s
//! `PlatformShm::acquire`, adapted from a generic byte-size shm wrapper to
//! one that lays out and owns the three TIPS-specific regions.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{IpcError, Result};
use crate::layout::{SegmentHeader, SegmentLayout, MAGIC};
use crate::pool::PoolView;
use crate::ring::IpcRingView;
use crate::subscription::SubscriptionBitmapView;

/// Matches spec.md §6's `ipcTransportOwnership` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Own,
    Attach,
    Auto,
}

/// Sizing parameters a `Domain` picks at construction (spec.md §4.6: sized
/// by compile-time `IpcCapacity`, e.g. 64 max reader processes).
#[derive(Debug, Clone, Copy)]
pub struct SegmentConfig {
    pub capacity_bits: u8,
    pub slot_size: usize,
    pub max_readers: usize,
    pub pool_block_size: usize,
    pub pool_block_count: usize,
}

impl SegmentConfig {
    fn header(&self) -> SegmentHeader {
        SegmentHeader {
            magic: MAGIC,
            capacity_bits: self.capacity_bits,
            _pad: [0; 3],
            slot_size: self.slot_size as u32,
            ipc_capacity: self.max_readers as u32,
            pool_block_size: self.pool_block_size as u32,
            pool_block_count: self.pool_block_count as u32,
        }
    }
}

/// A mapped TIPS IPC segment: owner or attacher, per the POSIX
/// `shm_open`/`mmap` pair.
pub struct Segment {
    mem: *mut u8,
    mapped_size: usize,
    name: String,
    is_owner: bool,
    layout: SegmentLayout,
    unlinked_on_drop: Arc<AtomicBool>,
}

unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

impl Segment {
    /// Creates or attaches to a named segment per `ownership` (spec.md §4.6
    /// "Ownership": `own`, `attach`, `auto` / "first process wins creation
    /// race"). `Auto` reproduces the source's exact race behavior (DESIGN
    /// NOTES open question): try an exclusive create, and on `EEXIST` fall
    /// back to the attach path rather than erroring.
    pub fn open(name: &str, cfg: SegmentConfig, ownership: Ownership) -> Result<Self> {
        let header = cfg.header();
        let layout = SegmentLayout::compute(&header);

        let (fd, created) = match ownership {
            Ownership::Own => (shm_create_excl(name)?, true),
            Ownership::Attach => (shm_open_existing(name)?, false),
            Ownership::Auto => match shm_create_excl(name) {
                Ok(fd) => (fd, true),
                Err(IpcError::AlreadyExists(_)) => (shm_open_existing(name)?, false),
                Err(e) => return Err(e),
            },
        };

        if created {
            let rc = unsafe { libc::ftruncate(fd, layout.total_size as libc::off_t) };
            if rc != 0 {
                unsafe { libc::close(fd) };
                return Err(IpcError::Os(std::io::Error::last_os_error()));
            }
        }

        let mem = unsafe {
            libc::mmap(std::ptr::null_mut(), layout.total_size, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0)
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(IpcError::Os(std::io::Error::last_os_error()));
        }
        let mem = mem as *mut u8;

        let segment = Self {
            mem,
            mapped_size: layout.total_size,
            name: name.to_string(),
            is_owner: created,
            layout,
            unlinked_on_drop: Arc::new(AtomicBool::new(false)),
        };

        if created {
            segment.write_header(&header);
            segment.ring_view().init();
            segment.pool_view().init();
            segment.subscription_view().init();
            tracing::info!(segment = name, "created and owns IPC segment");
        } else {
            let on_disk = segment.read_header();
            if on_disk.magic != MAGIC || !on_disk.matches(&header) {
                tracing::error!(segment = name, "IPC segment version mismatch");
                return Err(IpcError::VersionMismatch {
                    name: name.to_string(),
                    local_capacity_bits: header.capacity_bits,
                    local_slot_size: header.slot_size as usize,
                    disk_capacity_bits: on_disk.capacity_bits,
                    disk_slot_size: on_disk.slot_size as usize,
                });
            }
            tracing::info!(segment = name, "attached to existing IPC segment");
        }

        Ok(segment)
    }

    fn write_header(&self, header: &SegmentHeader) {
        unsafe { std::ptr::write(self.mem as *mut SegmentHeader, *header) };
    }

    fn read_header(&self) -> SegmentHeader {
        unsafe { std::ptr::read(self.mem as *const SegmentHeader) }
    }

    pub fn is_owner(&self) -> bool {
        self.is_owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ring_view(&self) -> IpcRingView {
        let base = unsafe { self.mem.add(self.layout.ring_offset) };
        let capacity = 1usize << self.read_header().capacity_bits;
        unsafe { IpcRingView::new(base, capacity, self.layout_slot_size(), self.layout_max_readers()) }
    }

    pub fn pool_view(&self) -> PoolView {
        let base = unsafe { self.mem.add(self.layout.pool_offset) };
        let h = self.read_header();
        unsafe { PoolView::new(base, h.pool_block_size as usize, h.pool_block_count as usize) }
    }

    pub fn subscription_view(&self) -> SubscriptionBitmapView {
        let base = unsafe { self.mem.add(self.layout.bitmap_offset) };
        unsafe { SubscriptionBitmapView::new(base, self.layout_max_readers()) }
    }

    fn layout_slot_size(&self) -> usize {
        self.read_header().slot_size as usize
    }

    fn layout_max_readers(&self) -> usize {
        self.read_header().ipc_capacity as usize
    }

    /// Explicitly unlinks the segment's backing file. Only meaningful for
    /// the owner; attachers calling this just race the owner's own
    /// cleanup. Exposed for tests and for an owner that wants to retire a
    /// segment deliberately rather than on process exit.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(posix_name(&self.name)) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
        self.unlinked_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.mapped_size) };
        if self.is_owner && !self.unlinked_on_drop.load(Ordering::Acquire) {
            self.unlink();
        }
    }
}

fn posix_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/tips-{name}")
    }
}

fn shm_create_excl(name: &str) -> Result<i32> {
    let c_name = CString::new(posix_name(name)).map_err(|_| IpcError::Os(std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul in name")))?;
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, 0o666) };
    if fd == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EEXIST) {
            return Err(IpcError::AlreadyExists(name.to_string()));
        }
        return Err(IpcError::Os(err));
    }
    Ok(fd)
}

fn shm_open_existing(name: &str) -> Result<i32> {
    let c_name = CString::new(posix_name(name)).map_err(|_| IpcError::Os(std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul in name")))?;
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o666) };
    if fd == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Err(IpcError::NoSuchSegment(name.to_string()));
        }
        return Err(IpcError::Os(err));
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SegmentConfig {
        SegmentConfig { capacity_bits: 4, slot_size: 64, max_readers: 4, pool_block_size: 128, pool_block_count: 4 }
    }

    #[test]
    fn owner_creates_attacher_joins() {
        let name = format!("tips-test-{}", std::process::id());
        let owner = Segment::open(&name, cfg(), Ownership::Own).unwrap();
        assert!(owner.is_owner());

        let attacher = Segment::open(&name, cfg(), Ownership::Attach).unwrap();
        assert!(!attacher.is_owner());

        let owner_ring = owner.ring_view();
        let attacher_ring = attacher.ring_view();
        let r = attacher_ring.register().unwrap();

        let begin = owner_ring.claim(1);
        unsafe { owner_ring.write_slot(begin, b"hello") };
        owner_ring.commit(begin, 1);

        let (peek_begin, count) = attacher_ring.peek(r);
        assert_eq!(count, 1);
        assert_eq!(&attacher_ring.slot_bytes(peek_begin)[..5], b"hello");
        attacher_ring.waste_after_peek(r, 1);

        drop(attacher);
        owner.unlink();
    }

    #[test]
    fn own_fails_if_already_exists() {
        let name = format!("tips-test-own-{}", std::process::id());
        let _owner = Segment::open(&name, cfg(), Ownership::Own).unwrap();
        let second = Segment::open(&name, cfg(), Ownership::Own);
        assert!(matches!(second, Err(IpcError::AlreadyExists(_))));
    }

    #[test]
    fn auto_falls_back_to_attach_on_race() {
        let name = format!("tips-test-auto-{}", std::process::id());
        let first = Segment::open(&name, cfg(), Ownership::Auto).unwrap();
        assert!(first.is_owner());
        let second = Segment::open(&name, cfg(), Ownership::Auto).unwrap();
        assert!(!second.is_owner(), "loser of the creation race attaches instead");
    }
}
