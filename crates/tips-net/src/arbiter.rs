//! Per-session 2-participant arbiter (spec.md §4.9 "Per-session arbiter"):
//! reconciles the unreliable UDP fast channel against the reliable TCP
//! recovery channel for a single advertised peer, tracking `expected_seq`
//! and gap state.
//!
//! A multicast frame that arrives ahead of `expected_seq` is held, not
//! discarded: the frame itself already carries the data a replay would
//! otherwise have to re-deliver, so only the genuinely missing range is
//! requested. Buffering it is what lets the final message of a burst
//! (which has no successor to re-trigger a request) still get delivered
//! once the gap in front of it fills.

use std::collections::BTreeMap;

use tips_types::MessageHead;

use crate::command::Command;

type HeldFrame = (MessageHead, Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver to the application, in order: the triggering frame followed
    /// by any previously-held frames the arrival made contiguous.
    Deliver(Vec<HeldFrame>),
    /// Already delivered (seq below `expected_seq`), or a frame already
    /// held for the same seq — discard silently.
    Duplicate,
    /// Buffered pending the gap in front of it closing; no new replay
    /// request is needed (one is already outstanding).
    Held,
    /// Opens a gap; the caller should request a replay of exactly
    /// `[request_seq, request_seq + request_len)`. The frame that revealed
    /// the gap is itself held, not included in the request.
    Gap { request_seq: u64, request_len: u64 },
}

/// Which channel a sequenced message arrived on — only a multicast arrival
/// opens a fresh replay request; a TCP (replay) arrival that's still ahead
/// of `expected_seq` just means the replay hasn't caught up yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Multicast,
    TcpBackup,
}

pub struct Arbiter {
    expected_seq: u64,
    held: BTreeMap<u64, HeldFrame>,
}

impl Arbiter {
    pub fn new(expected_seq: u64) -> Self {
        Self { expected_seq, held: BTreeMap::new() }
    }

    pub fn expected_seq(&self) -> u64 {
        self.expected_seq
    }

    pub fn has_pending_gap(&self) -> bool {
        !self.held.is_empty()
    }

    /// Processes one arriving sequenced message; returns what the caller
    /// should do with it.
    pub fn on_message(&mut self, head: MessageHead, payload: &[u8], channel: Channel) -> Disposition {
        let seq = head.seq48();
        if seq < self.expected_seq {
            return Disposition::Duplicate;
        }
        if seq == self.expected_seq {
            let mut delivered = vec![(head, payload.to_vec())];
            self.expected_seq += 1;
            while let Some(frame) = self.held.remove(&self.expected_seq) {
                delivered.push(frame);
                self.expected_seq += 1;
            }
            return Disposition::Deliver(delivered);
        }
        // seq > expected_seq: a gap, or a fragment of one already open.
        if self.held.contains_key(&seq) {
            return Disposition::Duplicate;
        }
        let gap_already_open = !self.held.is_empty();
        self.held.insert(seq, (head, payload.to_vec()));
        match channel {
            Channel::Multicast if !gap_already_open => Disposition::Gap { request_seq: self.expected_seq, request_len: seq - self.expected_seq },
            _ => Disposition::Held,
        }
    }

    /// A `SeqAlert{expect_seq}` system message (spec.md §4.9) fast-forwards
    /// `expected_seq` when the sender attests no data exists in between.
    /// Returns any held frames the fast-forward makes immediately
    /// deliverable.
    pub fn apply_seq_alert(&mut self, expect_seq: u64) -> Vec<HeldFrame> {
        if expect_seq <= self.expected_seq {
            return Vec::new();
        }
        self.expected_seq = expect_seq;
        self.held.retain(|&seq, _| seq >= self.expected_seq);
        let mut delivered = Vec::new();
        while let Some(frame) = self.held.remove(&self.expected_seq) {
            delivered.push(frame);
            self.expected_seq += 1;
        }
        delivered
    }

    pub fn gap_request_command(&self, len_hint: u64) -> Command {
        Command::Replay { seq: self.expected_seq, len: len_hint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_at(seq: u64) -> MessageHead {
        let mut head = MessageHead::new(1);
        head.set_seq48(seq);
        head
    }

    #[test]
    fn in_order_delivery_advances_expected_seq() {
        let mut a = Arbiter::new(0);
        assert_eq!(a.on_message(head_at(0), b"a", Channel::Multicast), Disposition::Deliver(vec![(head_at(0), b"a".to_vec())]));
        assert_eq!(a.on_message(head_at(1), b"b", Channel::Multicast), Disposition::Deliver(vec![(head_at(1), b"b".to_vec())]));
        assert_eq!(a.expected_seq(), 2);
    }

    #[test]
    fn duplicate_below_expected_is_discarded() {
        let mut a = Arbiter::new(5);
        assert_eq!(a.on_message(head_at(3), b"x", Channel::Multicast), Disposition::Duplicate);
    }

    #[test]
    fn gap_opens_replay_request_and_closes_on_fill() {
        let mut a = Arbiter::new(10);
        let d = a.on_message(head_at(13), b"late", Channel::Multicast);
        assert_eq!(d, Disposition::Gap { request_seq: 10, request_len: 3 });
        assert!(a.has_pending_gap());

        // Replay fills the gap in order on the TCP channel; the
        // already-held seq-13 frame gets folded into the final delivery.
        assert_eq!(a.on_message(head_at(10), b"r10", Channel::TcpBackup), Disposition::Deliver(vec![(head_at(10), b"r10".to_vec())]));
        assert_eq!(a.on_message(head_at(11), b"r11", Channel::TcpBackup), Disposition::Deliver(vec![(head_at(11), b"r11".to_vec())]));
        let d = a.on_message(head_at(12), b"r12", Channel::TcpBackup);
        assert_eq!(d, Disposition::Deliver(vec![(head_at(12), b"r12".to_vec()), (head_at(13), b"late".to_vec())]));
        assert!(!a.has_pending_gap());
        assert_eq!(a.expected_seq(), 14);
    }

    #[test]
    fn trailing_burst_message_is_held_and_delivered_without_a_retrigger() {
        // Reproduces spec.md §8 scenario 4: 130-134 dropped, 135 arrives
        // (opening the gap) with nothing behind it to re-request the
        // final message. 135 must survive purely by being held.
        let mut a = Arbiter::new(130);
        assert_eq!(a.on_message(head_at(135), b"m135", Channel::Multicast), Disposition::Gap { request_seq: 130, request_len: 5 });
        assert_eq!(a.on_message(head_at(135), b"dup", Channel::Multicast), Disposition::Duplicate);

        for seq in 130..135u64 {
            let d = a.on_message(head_at(seq), b"r", Channel::TcpBackup);
            if seq < 134 {
                assert_eq!(d, Disposition::Deliver(vec![(head_at(seq), b"r".to_vec())]));
            } else {
                assert_eq!(d, Disposition::Deliver(vec![(head_at(134), b"r".to_vec()), (head_at(135), b"m135".to_vec())]));
            }
        }
        assert_eq!(a.expected_seq(), 136);
        assert!(!a.has_pending_gap());
    }

    #[test]
    fn seq_alert_fast_forwards_past_a_quiescent_hole() {
        let mut a = Arbiter::new(10);
        let _ = a.on_message(head_at(15), b"x", Channel::Multicast);
        assert!(a.has_pending_gap());
        assert_eq!(a.apply_seq_alert(15), Vec::new());
        assert_eq!(a.expected_seq(), 15);
        assert!(!a.has_pending_gap());
    }

    #[test]
    fn seq_alert_releases_held_frames_it_makes_contiguous() {
        let mut a = Arbiter::new(10);
        let _ = a.on_message(head_at(12), b"x", Channel::Multicast);
        let delivered = a.apply_seq_alert(12);
        assert_eq!(delivered, vec![(head_at(12), b"x".to_vec())]);
        assert_eq!(a.expected_seq(), 13);
        assert!(!a.has_pending_gap());
    }
}
