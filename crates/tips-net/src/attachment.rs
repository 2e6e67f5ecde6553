//! Cross-host attachment fragmentation (spec.md §4.8 "Attachment
//! fragmentation", §4.10 path 3): an attachment larger than one datagram
//! is sent as a train — `StartMemorySegTrain`, then *N* `MemorySeg`
//! fragments, then one `InBandHasMemoryAttachment` carrying the message
//! body with a flag saying its attachment arrived separately.

use tips_types::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartMemorySegTrain {
    pub inband_underlying_tag: Tag,
    pub total_attachment_len: u32,
    pub segment_count: u32,
    /// Byte size of every fragment but the last (spec.md §4.8). Carried on
    /// the wire rather than assumed from the local MTU, since the sender
    /// and receiver's configured MTUs need not match.
    pub fragment_size: u32,
}

impl StartMemorySegTrain {
    pub const WIRE_SIZE: usize = 2 + 4 + 4 + 4;

    pub fn to_wire(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..2].copy_from_slice(&self.inband_underlying_tag.to_le_bytes());
        buf[2..6].copy_from_slice(&self.total_attachment_len.to_le_bytes());
        buf[6..10].copy_from_slice(&self.segment_count.to_le_bytes());
        buf[10..14].copy_from_slice(&self.fragment_size.to_le_bytes());
        buf
    }

    pub fn from_wire(buf: &[u8; Self::WIRE_SIZE]) -> Self {
        Self {
            inband_underlying_tag: u16::from_le_bytes([buf[0], buf[1]]),
            total_attachment_len: u32::from_le_bytes(buf[2..6].try_into().unwrap()),
            segment_count: u32::from_le_bytes(buf[6..10].try_into().unwrap()),
            fragment_size: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
        }
    }
}

/// One fragment of an in-flight train; `seg_index` lets the receiver place
/// out-of-order fragments (UDP delivery is unordered) into the correct
/// offset of its reassembly buffer without waiting on the recovery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySeg {
    pub inband_underlying_tag: Tag,
    pub seg_index: u32,
    pub bytes: Vec<u8>,
}

impl MemorySeg {
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 4 + 4 + self.bytes.len());
        buf.extend_from_slice(&self.inband_underlying_tag.to_le_bytes());
        buf.extend_from_slice(&self.seg_index.to_le_bytes());
        buf.extend_from_slice(&(self.bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.bytes);
        buf
    }

    pub fn from_wire(buf: &[u8]) -> Option<Self> {
        if buf.len() < 10 {
            return None;
        }
        let inband_underlying_tag = u16::from_le_bytes([buf[0], buf[1]]);
        let seg_index = u32::from_le_bytes(buf[2..6].try_into().ok()?);
        let len = u32::from_le_bytes(buf[6..10].try_into().ok()?) as usize;
        if buf.len() < 10 + len {
            return None;
        }
        Some(Self { inband_underlying_tag, seg_index, bytes: buf[10..10 + len].to_vec() })
    }
}

/// Fragments `attachment` into `max_fragment` sized pieces, returning the
/// train header plus the ordered fragments (spec.md §4.8). A train is
/// skipped entirely (empty `Vec`) for attachments that fit in a single
/// in-band frame — callers check `attachment.len() > max_fragment` first.
pub fn fragment(inband_underlying_tag: Tag, attachment: &[u8], max_fragment: usize) -> (StartMemorySegTrain, Vec<MemorySeg>) {
    assert!(max_fragment > 0);
    let segments: Vec<MemorySeg> = attachment
        .chunks(max_fragment)
        .enumerate()
        .map(|(i, chunk)| MemorySeg { inband_underlying_tag, seg_index: i as u32, bytes: chunk.to_vec() })
        .collect();
    let header = StartMemorySegTrain {
        inband_underlying_tag,
        total_attachment_len: attachment.len() as u32,
        segment_count: segments.len() as u32,
        fragment_size: max_fragment as u32,
    };
    (header, segments)
}

/// Reassembles a train's fragments in receipt order (which may not be
/// `seg_index` order, since the fast channel is UDP) into a single
/// contiguous buffer sized by the train header's `total_attachment_len`.
pub struct TrainReassembly {
    header: StartMemorySegTrain,
    buf: Vec<u8>,
    received: Vec<bool>,
    fragment_size: usize,
}

impl TrainReassembly {
    pub fn start(header: StartMemorySegTrain) -> Self {
        let fragment_size = header.fragment_size as usize;
        Self {
            header,
            buf: vec![0u8; header.total_attachment_len as usize],
            received: vec![false; header.segment_count as usize],
            fragment_size,
        }
    }

    pub fn header(&self) -> StartMemorySegTrain {
        self.header
    }

    /// Places `seg` at its offset. Ignores a fragment whose index falls
    /// outside `segment_count` (a stray fragment from an aborted prior
    /// train racing this one).
    pub fn accept(&mut self, seg: &MemorySeg) {
        let idx = seg.seg_index as usize;
        if idx >= self.received.len() {
            return;
        }
        let offset = idx * self.fragment_size;
        let end = (offset + seg.bytes.len()).min(self.buf.len());
        self.buf[offset..end].copy_from_slice(&seg.bytes[..end - offset]);
        self.received[idx] = true;
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|&r| r)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_and_reassembles_out_of_order() {
        let payload: Vec<u8> = (0..250u32).map(|i| (i % 251) as u8).collect();
        let (header, segs) = fragment(1500, &payload, 64);
        assert_eq!(segs.len(), 4);

        let mut reasm = TrainReassembly::start(header);
        for seg in segs.iter().rev() {
            reasm.accept(seg);
        }
        assert!(reasm.is_complete());
        assert_eq!(reasm.into_bytes(), payload);
    }

    #[test]
    fn train_header_round_trips() {
        let h = StartMemorySegTrain { inband_underlying_tag: 99, total_attachment_len: 4096, segment_count: 8, fragment_size: 512 };
        assert_eq!(StartMemorySegTrain::from_wire(&h.to_wire()), h);
    }

    #[test]
    fn segment_round_trips() {
        let seg = MemorySeg { inband_underlying_tag: 1, seg_index: 3, bytes: vec![1, 2, 3, 4] };
        let wire = seg.to_wire();
        assert_eq!(MemorySeg::from_wire(&wire).unwrap(), seg);
    }
}
