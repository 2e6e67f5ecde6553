//! Reliable network recv engine (spec.md §4.9): listens on the UDP
//! multicast fast channel for both data and `TypeTagBackupSource`
//! advertisements, opens a recovery TCP session per advertised peer whose
//! tags intersect local interests, and reconciles the two channels through
//! a per-session [`Arbiter`].
//!
//! A peer's attachment train (spec.md §4.8/§4.9/§4.10 path 3) is session
//! state alongside the arbiter, not a message that flows through it: a
//! `StartMemorySegTrain`/`MemorySeg` carries `NO_SEQUENCE` and is fed
//! straight into the held [`TrainReassembly`], while the train's
//! `InBandHasMemoryAttachment` terminator is the real sequenced message —
//! it goes through the arbiter like any other tag, and only on its
//! delivery is the held train drained into a local [`Attachment`].

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};

use tips_types::{system, Attachment, MessageHead, Tag, NO_SEQUENCE};

use crate::advertise::TypeTagBackupSource;
use crate::arbiter::{Arbiter, Channel, Disposition};
use crate::attachment::{MemorySeg, StartMemorySegTrain, TrainReassembly};
use crate::command::Command;
use crate::config::RecvConfig;
use crate::error::Result;
use crate::wire::{FrameAccumulator, FrameIter};

/// Receives decoded, arbitrated messages off either channel. Implemented
/// by the root `tips` crate's Domain to route into the intra-process ring.
/// `attachment` is `Some` only when `head` is the real, reconstructed
/// message that terminated an attachment train.
pub trait Delivery: Send + Sync {
    fn deliver(&self, head: MessageHead, payload: &[u8], attachment: Option<Attachment>);
}

struct PeerSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

/// Everything a `RecvEngine` tracks per advertised peer: the reliable
/// sequencing arbiter (created lazily, seeded by whichever data frame or
/// session handshake reaches it first) and at most one in-flight
/// attachment train (spec.md §4.9 "the session holds at most one
/// in-flight train").
#[derive(Default)]
struct PeerState {
    arbiter: Option<Arbiter>,
    train: Option<TrainReassembly>,
}

pub struct RecvEngine {
    fast_channel: Arc<UdpSocket>,
    group: SocketAddrV4,
    local_ip: Ipv4Addr,
    local_pid: u32,
    loopback: bool,
    local_interests: Arc<Mutex<HashSet<Tag>>>,
    peers: Arc<Mutex<HashMap<Ipv4Addr, PeerState>>>,
    sessions: Arc<Mutex<HashMap<Ipv4Addr, PeerSession>>>,
    delivery: Mutex<Option<Arc<dyn Delivery>>>,
    cfg: RecvConfig,
}

impl RecvEngine {
    pub async fn bind(iface: Ipv4Addr, group: Ipv4Addr, port: u16, local_pid: u32, loopback: bool, cfg: RecvConfig) -> Result<Self> {
        let socket = UdpSocket::bind((iface, port)).await?;
        socket.join_multicast_v4(group, iface)?;
        Ok(Self {
            fast_channel: Arc::new(socket),
            group: SocketAddrV4::new(group, port),
            local_ip: iface,
            local_pid,
            loopback,
            local_interests: Arc::new(Mutex::new(HashSet::new())),
            peers: Arc::new(Mutex::new(HashMap::new())),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            delivery: Mutex::new(None),
            cfg,
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    pub async fn subscribe(&self, tag: Tag) {
        self.local_interests.lock().await.insert(tag);
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let _ = session.cmd_tx.send(Command::Subscribe(tag));
        }
    }

    pub async fn unsubscribe(&self, tag: Tag) {
        self.local_interests.lock().await.remove(&tag);
        let sessions = self.sessions.lock().await;
        for session in sessions.values() {
            let _ = session.cmd_tx.send(Command::Unsubscribe(tag));
        }
    }

    /// Runs forever: reads the fast channel, routing data frames through
    /// the peer's arbiter and advertisement frames into session
    /// establishment.
    pub async fn run(self: Arc<Self>, delivery: Arc<dyn Delivery>) -> Result<()> {
        *self.delivery.lock().await = Some(delivery.clone());
        let mut buf = vec![0u8; self.cfg.udp_recv_buffer_bytes.min(64 * 1024)];
        loop {
            let (n, from) = self.fast_channel.recv_from(&mut buf).await?;
            let peer_ip = match from.ip() {
                std::net::IpAddr::V4(v4) => v4,
                std::net::IpAddr::V6(_) => continue,
            };
            for frame in FrameIter::new(&buf[..n]) {
                if frame.head.type_tag == system::TYPE_TAG_BACKUP_SOURCE_UDP {
                    if let Some(record) = TypeTagBackupSource::from_wire(frame.payload) {
                        self.clone().on_advertisement(record).await;
                    }
                    continue;
                }
                self.process_frame(peer_ip, frame.head, frame.payload, Channel::Multicast, delivery.as_ref()).await;
            }
        }
    }

    /// Dispatches one incoming frame: attachment train control frames
    /// update session state directly; every other tag flows through the
    /// peer's arbiter, with multi-gram gap-fill deliveries and attachment
    /// terminator synthesis handled uniformly for both the multicast and
    /// TCP backup channels.
    async fn process_frame(&self, peer_ip: Ipv4Addr, head: MessageHead, payload: &[u8], channel: Channel, delivery: &dyn Delivery) {
        match head.type_tag {
            system::START_MEMORY_SEG_TRAIN => {
                self.on_train_start(peer_ip, payload).await;
                return;
            }
            system::MEMORY_SEG => {
                self.on_train_segment(peer_ip, payload).await;
                return;
            }
            _ => {}
        }

        let seq = head.seq48();
        if seq == NO_SEQUENCE {
            delivery.deliver(head, payload, None);
            return;
        }

        let disposition = {
            let mut peers = self.peers.lock().await;
            let peer = peers.entry(peer_ip).or_default();
            let arbiter = peer.arbiter.get_or_insert_with(|| Arbiter::new(seq));
            arbiter.on_message(head, payload, channel)
        };

        match disposition {
            Disposition::Deliver(frames) => self.deliver_frames(peer_ip, frames, delivery).await,
            Disposition::Duplicate | Disposition::Held => {}
            Disposition::Gap { request_seq, request_len } => {
                tracing::warn!(%peer_ip, request_seq, request_len, "gap detected on fast channel");
                let sessions = self.sessions.lock().await;
                if let Some(session) = sessions.get(&peer_ip) {
                    let _ = session.cmd_tx.send(Command::Replay { seq: request_seq, len: request_len });
                }
            }
        }
    }

    /// Delivers a run of arbiter-released frames in order, synthesizing a
    /// local attachment for any `IN_BAND_ATTACHMENT` terminator among them.
    async fn deliver_frames(&self, peer_ip: Ipv4Addr, frames: Vec<(MessageHead, Vec<u8>)>, delivery: &dyn Delivery) {
        for (head, payload) in frames {
            if head.type_tag == system::IN_BAND_ATTACHMENT {
                self.deliver_attachment_terminator(peer_ip, payload, delivery).await;
            } else {
                delivery.deliver(head, &payload, None);
            }
        }
    }

    /// `payload` is `[real_tag: u16 LE][message body]` (the scratchpad
    /// can't carry both the sequence number and the underlying tag at
    /// once, so the tag rides in the body instead, spec.md §3).
    async fn deliver_attachment_terminator(&self, peer_ip: Ipv4Addr, payload: Vec<u8>, delivery: &dyn Delivery) {
        if payload.len() < 2 {
            tracing::warn!(%peer_ip, "malformed attachment terminator, dropping");
            return;
        }
        let real_tag = u16::from_le_bytes([payload[0], payload[1]]);
        let body = payload[2..].to_vec();

        let train = {
            let mut peers = self.peers.lock().await;
            peers.get_mut(&peer_ip).and_then(|p| p.train.take())
        };
        let attachment = match train {
            Some(train) if train.is_complete() => Some(Attachment::from_vec(train.into_bytes())),
            Some(_) => {
                tracing::warn!(%peer_ip, real_tag, "attachment train incomplete at terminator, delivering without attachment");
                None
            }
            None => {
                tracing::warn!(%peer_ip, real_tag, "attachment terminator with no in-flight train, delivering without attachment");
                None
            }
        };
        delivery.deliver(MessageHead::new(real_tag), &body, attachment);
    }

    async fn on_train_start(&self, peer_ip: Ipv4Addr, payload: &[u8]) {
        let Ok(buf) = <[u8; StartMemorySegTrain::WIRE_SIZE]>::try_from(payload) else {
            tracing::warn!(%peer_ip, "malformed StartMemorySegTrain frame, dropping");
            return;
        };
        let header = StartMemorySegTrain::from_wire(&buf);
        let mut peers = self.peers.lock().await;
        peers.entry(peer_ip).or_default().train = Some(TrainReassembly::start(header));
    }

    async fn on_train_segment(&self, peer_ip: Ipv4Addr, payload: &[u8]) {
        let Some(seg) = MemorySeg::from_wire(payload) else {
            tracing::warn!(%peer_ip, "malformed MemorySeg frame, dropping");
            return;
        };
        let mut peers = self.peers.lock().await;
        if let Some(train) = peers.get_mut(&peer_ip).and_then(|p| p.train.as_mut()) {
            train.accept(&seg);
        }
    }

    async fn on_advertisement(self: Arc<Self>, record: TypeTagBackupSource) {
        if !self.loopback && record.is_self(self.local_ip, self.local_pid) {
            return;
        }
        let interests = self.local_interests.lock().await.clone();
        if interests.is_empty() || !record.intersects(&interests.iter().copied().collect::<Vec<_>>()) {
            return;
        }
        {
            let sessions = self.sessions.lock().await;
            if sessions.contains_key(&record.source_ip) {
                return;
            }
        }
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.open_session(record.endpoint(), interests).await {
                tracing::warn!(error = %e, "failed to open backup session");
            }
        });
    }

    async fn open_session(self: Arc<Self>, endpoint: SocketAddrV4, interests: HashSet<Tag>) -> Result<()> {
        let mut stream = TcpStream::connect(endpoint).await?;
        let mut min_seq_buf = [0u8; 8];
        stream.read_exact(&mut min_seq_buf).await?;
        let min_seq = u64::from_le_bytes(min_seq_buf);
        tracing::info!(%endpoint, min_seq, "backup session started");

        {
            let mut peers = self.peers.lock().await;
            peers.entry(*endpoint.ip()).or_default().arbiter.get_or_insert_with(|| Arbiter::new(min_seq));
        }

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        for tag in &interests {
            let _ = cmd_tx.send(Command::Subscribe(*tag));
        }
        let _ = cmd_tx.send(Command::Done);

        self.sessions.lock().await.insert(*endpoint.ip(), PeerSession { cmd_tx: cmd_tx.clone() });

        let (mut read_half, mut write_half) = stream.into_split();
        let report_delay = self.cfg.recv_report_delay;
        let heartbeat_tx = cmd_tx.clone();
        let heartbeat_peers = self.peers.clone();
        let heartbeat_ip = *endpoint.ip();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(report_delay.max(Duration::from_millis(1)));
            loop {
                interval.tick().await;
                let expected =
                    heartbeat_peers.lock().await.get(&heartbeat_ip).and_then(|p| p.arbiter.as_ref()).map(Arbiter::expected_seq).unwrap_or(0);
                if heartbeat_tx.send(Command::Replay { seq: expected, len: 0 }).is_err() {
                    break;
                }
            }
        });

        let writer = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                if write_half.write_all(cmd.to_wire().as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut accumulator = FrameAccumulator::new();
        let mut buf = vec![0u8; self.cfg.max_tcp_read_bytes.min(64 * 1024)];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for frame in accumulator.feed(&buf[..n]) {
                let delivery = self.delivery.lock().await.clone();
                if let Some(d) = delivery {
                    self.process_frame(*endpoint.ip(), frame.head, &frame.payload, Channel::TcpBackup, d.as_ref()).await;
                }
            }
        }

        self.sessions.lock().await.remove(endpoint.ip());
        writer.abort();
        tracing::info!(%endpoint, "backup session dropped");
        Ok(())
    }
}
