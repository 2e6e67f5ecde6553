//! `MessageHead` / `MessageWrap<T>` — the fixed 8-byte wire header every
//! TIPS message carries, and the generic wrapper around a payload that the
//! ring buffer stores (SPEC_FULL.md §3).
//!
//! The 6-byte `reserved` region is a scratchpad reused for three mutually
//! exclusive purposes, never at the same time for the same message:
//! a 48-bit sequence number (network wire protocol), a `{source_pid,
//! inband_underlying_tag}` pair (in-band attachment framing), or a flags
//! byte plus padding. Callers pick the accessor matching their context;
//! nothing prevents misuse at the type level, matching the source's use of
//! a raw scratchpad.

use crate::tag::Tag;

/// Sentinel for "no sequence" in the 48-bit scratchpad encoding — all 48
/// bits set (spec.md §6: "sentinel `0xFFFFFFFFFFFF` means 'no sequence'").
pub const NO_SEQUENCE: u64 = 0x0000_FFFF_FFFF_FFFF;

const SEQ48_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Fixed 8-byte message header (spec.md §3: `{reserved2:u32, reserved:u16,
/// type_tag:u16}`, little-endian on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MessageHead {
    reserved2: u32,
    reserved: u16,
    pub type_tag: Tag,
}

impl MessageHead {
    pub const WIRE_SIZE: usize = 8;

    pub const fn new(type_tag: Tag) -> Self {
        Self { reserved2: 0, reserved: 0, type_tag }
    }

    // -- scratchpad interpretation: 48-bit sequence number ------------------

    /// Reads the scratchpad as a 48-bit sequence number.
    pub fn seq48(&self) -> u64 {
        (u64::from(self.reserved2)) | (u64::from(self.reserved) << 32)
    }

    /// Sets the scratchpad to hold a 48-bit sequence number.
    ///
    /// # Panics
    /// Panics if `seq` doesn't fit in 48 bits (it may legitimately equal
    /// [`NO_SEQUENCE`], which does fit).
    pub fn set_seq48(&mut self, seq: u64) {
        assert!(seq & !SEQ48_MASK == 0, "sequence {seq} does not fit in 48 bits");
        self.reserved2 = (seq & 0xFFFF_FFFF) as u32;
        self.reserved = ((seq >> 32) & 0xFFFF) as u16;
    }

    // -- scratchpad interpretation: {source_pid, inband_underlying_tag} -----

    /// Reads the scratchpad as `(source_pid, inband_underlying_tag)`, used
    /// by in-band attachment framing (spec.md §4.10, §6 tags 5-8).
    pub fn source_pid_and_inband_tag(&self) -> (u32, u16) {
        (self.reserved2, self.reserved)
    }

    pub fn set_source_pid_and_inband_tag(&mut self, pid: u32, inband_tag: Tag) {
        self.reserved2 = pid;
        self.reserved = inband_tag;
    }

    // -- scratchpad interpretation: flags byte + padding --------------------

    pub fn flags(&self) -> u8 {
        (self.reserved2 & 0xFF) as u8
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.reserved2 = u32::from(flags);
    }

    /// Serializes to the 8-byte little-endian wire form.
    pub fn to_wire(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.reserved2.to_le_bytes());
        buf[4..6].copy_from_slice(&self.reserved.to_le_bytes());
        buf[6..8].copy_from_slice(&self.type_tag.to_le_bytes());
        buf
    }

    /// Parses the 8-byte little-endian wire form.
    pub fn from_wire(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            reserved2: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            reserved: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            type_tag: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
        }
    }
}

/// A [`MessageHead`] immediately followed by a `T` payload — what the ring
/// buffer actually stores in a slot (spec.md §3).
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MessageWrap<T> {
    pub head: MessageHead,
    pub payload: T,
}

impl<T> MessageWrap<T> {
    pub const fn new(type_tag: Tag, payload: T) -> Self {
        Self { head: MessageHead::new(type_tag), payload }
    }

    pub fn tag(&self) -> Tag {
        self.head.type_tag
    }
}

/// Marker for types that are safe to copy across a process or host boundary
/// (spec.md §3: "Messages must be trivially destructible when they cross a
/// process or host boundary"). Implemented for `T: Copy` via the blanket
/// impl below; non-`Copy` in-process-only message types simply don't
/// implement it, and `Domain::publish` routes them to intra-process
/// delivery only (spec.md §7 "Unsupported-message-at-boundary").
pub trait WireSafe: Copy + Send + Sync + 'static {}
impl<T: Copy + Send + Sync + 'static> WireSafe for T {}

/// Encodes a [`MessageWrap<T>`] for `T: WireSafe` to its wire bytes:
/// 8-byte head followed by the raw payload bytes.
///
/// # Safety
/// `T` must have no padding bytes that matter for round-tripping and must
/// be `WireSafe` (trivially copyable); the caller picks `T` to be a
/// `#[repr(C)]` plain-data type as spec.md §3 requires of wire messages.
pub fn encode<T: WireSafe>(wrap: &MessageWrap<T>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MessageHead::WIRE_SIZE + std::mem::size_of::<T>());
    buf.extend_from_slice(&wrap.head.to_wire());
    // SAFETY: T: WireSafe guarantees Copy + 'static plain data; we read its
    // raw bytes for transmission only, never interpret them as another type.
    let payload_bytes = unsafe {
        std::slice::from_raw_parts((&wrap.payload as *const T).cast::<u8>(), std::mem::size_of::<T>())
    };
    buf.extend_from_slice(payload_bytes);
    buf
}

/// Inverse of [`encode`]. Returns `None` if `bytes` is shorter than a
/// `MessageWrap<T>` or the tag doesn't match what the caller expects to
/// decode (callers typically check `tag` before calling this).
pub fn decode<T: WireSafe>(bytes: &[u8]) -> Option<MessageWrap<T>> {
    let total = MessageHead::WIRE_SIZE + std::mem::size_of::<T>();
    if bytes.len() < total {
        return None;
    }
    let head = MessageHead::from_wire(bytes[0..8].try_into().ok()?);
    let mut payload = std::mem::MaybeUninit::<T>::uninit();
    // SAFETY: `total` bytes are available and T is WireSafe plain data.
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes[8..total].as_ptr(),
            payload.as_mut_ptr().cast::<u8>(),
            std::mem::size_of::<T>(),
        );
    }
    Some(MessageWrap { head, payload: unsafe { payload.assume_init() } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_round_trips_over_wire() {
        let mut head = MessageHead::new(1042);
        head.set_seq48(0x1122_3344_5566);
        let wire = head.to_wire();
        let back = MessageHead::from_wire(&wire);
        assert_eq!(back, head);
        assert_eq!(back.seq48(), 0x1122_3344_5566);
    }

    #[test]
    fn no_sequence_sentinel_fits_48_bits() {
        let mut head = MessageHead::new(1);
        head.set_seq48(NO_SEQUENCE);
        assert_eq!(head.seq48(), NO_SEQUENCE);
    }

    #[test]
    fn message_wrap_round_trip_for_copy_type() {
        #[derive(Debug, Clone, Copy, PartialEq)]
        #[repr(C)]
        struct Ping {
            a: u32,
            b: u64,
        }
        let wrap = MessageWrap::new(1500, Ping { a: 7, b: 99 });
        let bytes = encode(&wrap);
        let back: MessageWrap<Ping> = decode(&bytes).unwrap();
        assert_eq!(back.tag(), 1500);
        assert_eq!(back.payload, Ping { a: 7, b: 99 });
    }
}
