//! The recovery channel's server side: one TCP connection per backup
//! subscriber (spec.md §4.8 "Recovery channel"), grounded on
//! `examples/original_source/hmbdc/tips/reliable/BackupSendServerT.hpp`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use tips_types::{system, MessageHead, Tag};

use crate::command::{Command, CommandReader};
use crate::error::{NetError, Result};
use crate::wire::append_framed;

/// Read-only view the send engine gives a backup session over the
/// in-memory ring it replays from, so `tips-net` never needs to depend on
/// `tips-ring`/`tips-ctx` directly.
pub trait ReplaySource: Send + Sync {
    /// The oldest sequence number still available for replay — sent as the
    /// first 8 bytes of every new backup connection.
    fn min_seq(&self) -> u64;

    /// Every message in `[seq, seq+len)`, in order, regardless of the
    /// requesting session's subscriptions — substitution for
    /// non-subscribed tags happens in [`run_backup_session`].
    fn replay(&self, seq: u64, len: u64) -> Vec<(MessageHead, Vec<u8>)>;

    /// Whether the outgoing ring (spec.md §2 "the network send engine's
    /// internal ring") is currently at capacity — drives the
    /// `waitForSlowReceivers` gate and the slow-subscriber eviction policy
    /// (spec.md §4.8 "Slow-subscriber policy").
    fn is_full(&self) -> bool;

    /// The sequence number that will be assigned to the next published
    /// message — the live tip of the ring, used instead of `min_seq` when
    /// `replayHistoryForNewRecv` is false (spec.md §6): a new subscriber
    /// then starts receiving only what's published from here on, skipping
    /// whatever history is still buffered.
    fn latest_seq(&self) -> u64;
}

/// Services one backup TCP connection until it closes or a protocol
/// violation occurs (logged, not fatal to the engine — spec.md §7). Replay
/// batches are framed the same way as fast-channel datagrams but without an
/// MTU cap — this is a reliable byte stream, not a single UDP datagram.
pub async fn run_backup_session(
    mut stream: TcpStream,
    replay: Arc<dyn ReplaySource>,
    last_known_seq: Arc<AtomicU64>,
    replay_history_for_new_recv: bool,
) -> Result<()> {
    let initial_seq = if replay_history_for_new_recv { replay.min_seq() } else { replay.latest_seq() };
    stream.write_all(&initial_seq.to_le_bytes()).await?;
    last_known_seq.store(initial_seq, Ordering::Release);

    let mut subscribed: HashSet<Tag> = HashSet::new();
    let mut reader = CommandReader::new();
    let mut read_buf = vec![0u8; 4096];

    loop {
        let n = stream.read(&mut read_buf).await?;
        if n == 0 {
            tracing::info!("backup session closed by peer");
            return Ok(());
        }
        let commands = match reader.feed(&read_buf[..n]) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "protocol violation on backup session, dropping connection");
                return Err(e);
            }
        };

        for cmd in commands {
            match cmd {
                Command::Subscribe(tag) => {
                    subscribed.insert(tag);
                }
                Command::Unsubscribe(tag) => {
                    subscribed.remove(&tag);
                }
                Command::Done => {}
                Command::Replay { seq, len } => {
                    // Every `=<seq>,<len>` — including the `len == 0`
                    // heartbeat/gap-probe — reports how far this subscriber
                    // has gotten, which is what the eviction policy in
                    // `SubscriberRegistry::evict_slowest` ranks sessions by.
                    last_known_seq.store(seq, Ordering::Release);
                    if len == 0 {
                        continue; // heartbeat/gap-probe, nothing to send back
                    }
                    let batch = replay.replay(seq, len);
                    let datagram = build_replay_datagram(&batch, &subscribed);
                    stream.write_all(&datagram).await?;
                }
            }
        }
    }
}

/// Builds the replayed frame stream for one `Replay` request: messages the
/// session is subscribed to pass through unchanged; everything else is
/// replaced with a zero-payload `FLUSH` record so sequencing is preserved
/// for the requester without leaking unsubscribed payload bytes (spec.md
/// §4.8: "substitutes a flush record for tags the subscriber didn't ask
/// for").
fn build_replay_datagram(batch: &[(MessageHead, Vec<u8>)], subscribed: &HashSet<Tag>) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, (head, payload)) in batch.iter().enumerate() {
        let last = i + 1 == batch.len();
        if subscribed.contains(&head.type_tag) {
            let _ = append_framed(&mut out, usize::MAX, *head, payload, last);
        } else {
            let flush = MessageHead::new(system::FLUSH);
            let _ = append_framed(&mut out, usize::MAX, flush, &[], last);
        }
    }
    out
}

/// The recv-side error surface for a failed session attempt, distinguished
/// from a clean disconnect so callers can decide whether to retry.
pub fn is_retryable(err: &NetError) -> bool {
    matches!(err, NetError::Io(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        msgs: Vec<(MessageHead, Vec<u8>)>,
    }

    impl ReplaySource for FakeSource {
        fn min_seq(&self) -> u64 {
            0
        }

        fn replay(&self, seq: u64, len: u64) -> Vec<(MessageHead, Vec<u8>)> {
            let start = seq as usize;
            let end = (start + len as usize).min(self.msgs.len());
            self.msgs[start..end].to_vec()
        }

        fn is_full(&self) -> bool {
            false
        }

        fn latest_seq(&self) -> u64 {
            self.msgs.len() as u64
        }
    }

    #[test]
    fn substitutes_flush_for_unsubscribed_tags() {
        let source = FakeSource {
            msgs: vec![(MessageHead::new(1000), b"a".to_vec()), (MessageHead::new(2000), b"bb".to_vec())],
        };
        let batch = source.replay(0, 2);
        let mut subscribed = HashSet::new();
        subscribed.insert(1000u16);

        let datagram = build_replay_datagram(&batch, &subscribed);
        let frames: Vec<_> = crate::wire::FrameIter::new(&datagram).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].head.type_tag, 1000);
        assert_eq!(frames[0].payload, b"a");
        assert_eq!(frames[1].head.type_tag, system::FLUSH);
        assert!(frames[1].payload.is_empty());
    }
}
