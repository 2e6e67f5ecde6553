//! Datagram framing: `TransportMessageHeader{flag, payload_len} ||
//! MessageWrap{head || payload}`, packed back-to-back until the MTU is
//! filled (spec.md §6 "Wire protocol").

use tips_types::MessageHead;

/// Set on the last `TransportMessageHeader` in a datagram, letting a reader
/// stop scanning without depending on an exact byte count (mirrors the
/// source's single-flag byte per framed message).
pub const FLAG_LAST_IN_DATAGRAM: u8 = 0x01;

pub const HEADER_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportMessageHeader {
    pub flag: u8,
    pub payload_len: u16,
}

impl TransportMessageHeader {
    pub fn to_wire(self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.flag;
        buf[1..3].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    pub fn from_wire(buf: &[u8; HEADER_SIZE]) -> Self {
        Self { flag: buf[0], payload_len: u16::from_le_bytes([buf[1], buf[2]]) }
    }
}

/// Appends one framed message (header + `MessageHead` + raw payload bytes)
/// to `datagram` if it still fits within `mtu`. Returns `false` (and leaves
/// `datagram` untouched) when the message would overflow the MTU, the
/// signal the send engine's batching loop uses to flush and start a fresh
/// datagram.
pub fn append_framed(datagram: &mut Vec<u8>, mtu: usize, head: MessageHead, payload: &[u8], last: bool) -> bool {
    let framed_len = HEADER_SIZE + MessageHead::WIRE_SIZE + payload.len();
    if datagram.len() + framed_len > mtu {
        return false;
    }
    let header = TransportMessageHeader {
        flag: if last { FLAG_LAST_IN_DATAGRAM } else { 0 },
        payload_len: (MessageHead::WIRE_SIZE + payload.len()) as u16,
    };
    datagram.extend_from_slice(&header.to_wire());
    datagram.extend_from_slice(&head.to_wire());
    datagram.extend_from_slice(payload);
    true
}

/// One decoded frame from a received datagram.
pub struct Frame<'a> {
    pub head: MessageHead,
    pub payload: &'a [u8],
    pub last: bool,
}

/// Iterates the framed messages in a received datagram in order.
pub struct FrameIter<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Frame<'a>> {
        if self.pos + HEADER_SIZE > self.buf.len() {
            return None;
        }
        let header_bytes: [u8; HEADER_SIZE] = self.buf[self.pos..self.pos + HEADER_SIZE].try_into().ok()?;
        let header = TransportMessageHeader::from_wire(&header_bytes);
        self.pos += HEADER_SIZE;
        let end = self.pos + header.payload_len as usize;
        if end > self.buf.len() || header.payload_len as usize < MessageHead::WIRE_SIZE {
            return None;
        }
        let head_bytes: [u8; MessageHead::WIRE_SIZE] = self.buf[self.pos..self.pos + MessageHead::WIRE_SIZE].try_into().ok()?;
        let head = MessageHead::from_wire(&head_bytes);
        let payload = &self.buf[self.pos + MessageHead::WIRE_SIZE..end];
        self.pos = end;
        Some(Frame { head, payload, last: header.flag & FLAG_LAST_IN_DATAGRAM != 0 })
    }
}

/// One fully decoded frame with an owned payload, for callers (like the
/// TCP recovery channel) that can't tie a borrow to a single read buffer.
pub struct OwnedFrame {
    pub head: MessageHead,
    pub payload: Vec<u8>,
    pub last: bool,
}

/// Buffers TCP reads and yields complete frames as they become available,
/// unlike [`FrameIter`] (which assumes one whole datagram). A stream read
/// may split a frame across two `TcpStream::read` calls; `feed` retains any
/// trailing partial frame for the next call.
#[derive(Default)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<OwnedFrame> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        let mut consumed = 0usize;
        loop {
            let remaining = &self.buf[consumed..];
            if remaining.len() < HEADER_SIZE {
                break;
            }
            let header_bytes: [u8; HEADER_SIZE] = remaining[..HEADER_SIZE].try_into().unwrap();
            let header = TransportMessageHeader::from_wire(&header_bytes);
            let frame_total = HEADER_SIZE + header.payload_len as usize;
            if remaining.len() < frame_total || (header.payload_len as usize) < MessageHead::WIRE_SIZE {
                break;
            }
            let head_bytes: [u8; MessageHead::WIRE_SIZE] =
                remaining[HEADER_SIZE..HEADER_SIZE + MessageHead::WIRE_SIZE].try_into().unwrap();
            let head = MessageHead::from_wire(&head_bytes);
            let payload = remaining[HEADER_SIZE + MessageHead::WIRE_SIZE..frame_total].to_vec();
            out.push(OwnedFrame { head, payload, last: header.flag & FLAG_LAST_IN_DATAGRAM != 0 });
            consumed += frame_total;
        }
        self.buf.drain(..consumed);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_until_mtu_then_refuses() {
        let mut dg = Vec::new();
        let head = MessageHead::new(42);
        let payload = vec![7u8; 10];
        assert!(append_framed(&mut dg, 64, head, &payload, false));
        assert!(append_framed(&mut dg, 64, head, &payload, true));
        assert!(!append_framed(&mut dg, 64, head, &payload, true), "third message would overflow the mtu");
    }

    #[test]
    fn frame_iter_recovers_each_message_in_order() {
        let mut dg = Vec::new();
        append_framed(&mut dg, 1024, MessageHead::new(1), b"one", false);
        append_framed(&mut dg, 1024, MessageHead::new(2), b"two", true);

        let frames: Vec<_> = FrameIter::new(&dg).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].head.type_tag, 1);
        assert_eq!(frames[0].payload, b"one");
        assert!(!frames[0].last);
        assert_eq!(frames[1].head.type_tag, 2);
        assert_eq!(frames[1].payload, b"two");
        assert!(frames[1].last);
    }

    #[test]
    fn accumulator_handles_a_frame_split_across_reads() {
        let mut dg = Vec::new();
        append_framed(&mut dg, 1024, MessageHead::new(7), b"hello world", true);

        let mut acc = FrameAccumulator::new();
        let split = dg.len() / 2;
        assert!(acc.feed(&dg[..split]).is_empty());
        let frames = acc.feed(&dg[split..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].head.type_tag, 7);
        assert_eq!(frames[0].payload, b"hello world");
    }
}
