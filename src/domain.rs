//! `Domain` — the composition root (spec.md §4.7): one `publish` call that
//! fans a message out across up to three routes (intra-process ring,
//! same-host IPC segment, reliable network engine) depending on who is
//! actually subscribed.
//!
//! The source's `Domain<RecvMessageTuple, IpcProperty, NetProperty>`
//! chooses its ring slot size and IPC/network message tuples entirely at
//! compile time via template parameters. Rust has no variadic template
//! equivalent, so this collapses to two const generics: `S`, the largest
//! payload any message type published through this `Domain` will carry,
//! and `N`, the maximum number of concurrent local readers (one per added
//! `Node`). Everything else the C++ constructor takes as `IpcProperty`/
//! `NetProperty` template arguments becomes [`DomainParams`], an ordinary
//! runtime value.

use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;

use tips_ctx::{BroadcastContext, Node, NodeSchedule, Slot};
use tips_ipc::{Ownership, Segment, SegmentConfig};
use tips_net::{append_framed, fragment, Delivery, RecvEngine, ReplaySource, SendEngine, SubscriberRegistry, HEADER_SIZE};
use tips_ring::{RingBuffer, RingConfig};
use tips_types::{system, Attachment, MessageHead, Tag, WireSafe, NO_SEQUENCE};

use crate::config::DomainConfig;
use crate::error::{DomainError, Result};

/// Runtime construction parameters a `Domain` needs beyond what
/// [`DomainConfig`] loads from JSON — the compile-time-collapsed
/// equivalents of the source's `IpcProperty`/`NetProperty` template
/// arguments (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct DomainParams {
    /// Power-of-two slot count for both the intra-process ring and (if
    /// enabled) the IPC ring.
    pub ring_capacity_bits: u8,
    /// `Some(name)` creates or attaches the named IPC segment (spec.md
    /// §4.6); `None` runs intra-process (+ optionally network) only.
    pub ipc_segment_name: Option<String>,
    pub ipc_max_readers: usize,
    pub ipc_pool_block_size: usize,
    pub ipc_pool_block_count: usize,
    /// `true` instantiates the send/recv network engines (spec.md §4.7
    /// "If `NetProperty` names a real protocol").
    pub net_enabled: bool,
    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub net_mtu_override: Option<usize>,
    /// How many network-eligible messages the recovery channel can replay
    /// on request before the oldest ones age out.
    pub replay_log_capacity: usize,
}

impl Default for DomainParams {
    fn default() -> Self {
        Self {
            ring_capacity_bits: 14,
            ipc_segment_name: None,
            ipc_max_readers: 64,
            ipc_pool_block_size: 4096,
            ipc_pool_block_count: 256,
            net_enabled: false,
            multicast_group: Ipv4Addr::new(239, 42, 0, 1),
            multicast_port: 23456,
            net_mtu_override: None,
            replay_log_capacity: 4096,
        }
    }
}

struct IpcBridge {
    segment: Arc<Segment>,
    local_reader: usize,
}

struct ReplayEntry {
    head: MessageHead,
    payload: Vec<u8>,
}

/// The network-facing half of a `Domain`: the two engines plus the
/// outbound datagram queue and replay log a `Domain` needs to act as
/// both [`Delivery`]'s consumer and a [`ReplaySource`] for the recovery
/// channel, without `tips-net` needing to know about rings at all.
struct NetBridge {
    send: Arc<SendEngine>,
    registry: Arc<SubscriberRegistry>,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    next_seq: AtomicU64,
    replay_log: StdMutex<VecDeque<ReplayEntry>>,
    replay_base_seq: StdMutex<u64>,
    replay_capacity: usize,
}

impl NetBridge {
    fn push_replay(&self, head: MessageHead, payload: Vec<u8>) {
        let mut log = self.replay_log.lock().unwrap();
        log.push_back(ReplayEntry { head, payload });
        while log.len() > self.replay_capacity {
            log.pop_front();
            *self.replay_base_seq.lock().unwrap() += 1;
        }
    }
}

impl ReplaySource for NetBridge {
    fn min_seq(&self) -> u64 {
        *self.replay_base_seq.lock().unwrap()
    }

    fn replay(&self, seq: u64, len: u64) -> Vec<(MessageHead, Vec<u8>)> {
        let base = *self.replay_base_seq.lock().unwrap();
        let log = self.replay_log.lock().unwrap();
        let start = seq.saturating_sub(base) as usize;
        log.iter().skip(start).take(len as usize).map(|e| (e.head, e.payload.clone())).collect()
    }

    fn is_full(&self) -> bool {
        self.replay_log.lock().unwrap().len() >= self.replay_capacity
    }

    fn latest_seq(&self) -> u64 {
        self.next_seq.load(Ordering::Acquire)
    }
}

/// The composition root: an intra-process `RingBuffer<Slot<S>, N>`
/// fronted by a `BroadcastContext`, plus an optional IPC segment and an
/// optional pair of network engines layered behind the same `publish`
/// call (spec.md §4.7).
pub struct Domain<const S: usize, const N: usize> {
    ring: Arc<RingBuffer<Slot<S>, N>>,
    context: StdMutex<BroadcastContext<S, N>>,
    pending: StdMutex<Vec<Box<dyn Node>>>,
    local_interests: StdMutex<HashSet<Tag>>,
    wants_just_bytes: AtomicBool,
    config: DomainConfig,
    params: DomainParams,
    ipc: Option<IpcBridge>,
    net: StdMutex<Option<Arc<NetBridge>>>,
    pump_stop: Arc<AtomicBool>,
    pump_handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl<const S: usize, const N: usize> Domain<S, N> {
    /// Parses `config`, opens (or attaches to) the IPC segment named in
    /// `params` if any, and creates the intra-process ring. Network
    /// engines and the IPC pump thread aren't started yet — call
    /// [`Domain::start_pumping`] once subscriptions are known (or after
    /// every [`Domain::add`] call for a non-aggregator process).
    pub fn new(config: DomainConfig, params: DomainParams) -> Result<Arc<Self>> {
        let ring_cfg = RingConfig::new(params.ring_capacity_bits, S, 1);
        let ring = Arc::new(RingBuffer::new(ring_cfg));

        let ipc = match &params.ipc_segment_name {
            Some(name) => Some(Self::open_ipc(name, &config, &params)?),
            None => None,
        };

        Ok(Arc::new(Self {
            context: StdMutex::new(BroadcastContext::new(Arc::clone(&ring))),
            ring,
            pending: StdMutex::new(Vec::new()),
            local_interests: StdMutex::new(HashSet::new()),
            wants_just_bytes: AtomicBool::new(false),
            config,
            params,
            ipc,
            net: StdMutex::new(None),
            pump_stop: Arc::new(AtomicBool::new(false)),
            pump_handles: StdMutex::new(Vec::new()),
        }))
    }

    fn open_ipc(name: &str, config: &DomainConfig, params: &DomainParams) -> Result<IpcBridge> {
        let seg_cfg = SegmentConfig {
            capacity_bits: params.ring_capacity_bits,
            slot_size: S,
            max_readers: params.ipc_max_readers,
            pool_block_size: params.ipc_pool_block_size,
            pool_block_count: params.ipc_pool_block_count,
        };
        let ownership: Ownership = config.global.ipc_transport_ownership;
        let segment = Arc::new(Segment::open(name, seg_cfg, ownership)?);
        let local_reader = segment.ring_view().register().ok_or(DomainError::RingExhausted)?;
        Ok(IpcBridge { segment, local_reader })
    }

    /// Registers `node`'s receive interests into the domain's subscription
    /// set — process-local and, for IPC, the shared subscription bitmap —
    /// and queues it to be started by the next [`Domain::start`] call
    /// (spec.md §4.7 "`add(node)`... Returns self for chaining").
    pub fn add(self: &Arc<Self>, node: Box<dyn Node>) -> Arc<Self> {
        let interests = node.recv_interests();
        {
            let mut local = self.local_interests.lock().unwrap();
            local.extend(interests.iter().copied());
        }
        if node.wants_just_bytes() {
            self.wants_just_bytes.store(true, Ordering::Release);
        }
        if let Some(ipc) = &self.ipc {
            let bitmap = ipc.segment.subscription_view();
            for tag in &interests {
                bitmap.subscribe(ipc.local_reader, *tag);
            }
        }
        self.pending.lock().unwrap().push(node);
        Arc::clone(self)
    }

    /// Starts every `Node` queued by [`Domain::add`] since the last call,
    /// each on its own thread under the domain's `BroadcastContext`
    /// (spec.md §4.5 `Context::start`).
    pub fn start(self: &Arc<Self>, schedule: NodeSchedule) -> Arc<Self> {
        let mut pending = self.pending.lock().unwrap();
        let mut ctx = self.context.lock().unwrap();
        for node in pending.drain(..) {
            ctx.start(node, schedule);
        }
        Arc::clone(self)
    }

    /// Starts the IPC pump thread (if an IPC segment is configured) and
    /// the network send/recv engines (if `params.net_enabled`) without
    /// requiring any `Node` to have been added — the aggregator use case
    /// from spec.md §4.7.
    pub fn start_pumping(self: &Arc<Self>) {
        if let Some(ipc) = &self.ipc {
            self.spawn_ipc_pump(ipc);
        }
        if self.params.net_enabled {
            self.spawn_net();
        }
    }

    /// Signals the IPC pump thread and every started `Node` to stop, then
    /// joins them. The network engine's background runtime (if any) is
    /// left running — it owns no per-Node state to clean up and outlives
    /// `stop()` until the process exits, matching how the C++ leans on
    /// process teardown for its socket fds.
    pub fn stop(&self) {
        self.pump_stop.store(true, Ordering::Release);
        self.context.lock().unwrap().stop();
    }

    pub fn join(&self) {
        self.context.lock().unwrap().join();
        for h in self.pump_handles.lock().unwrap().drain(..) {
            let _ = h.join();
        }
    }

    /// Number of backup (TCP recovery channel) subscribers currently
    /// connected, or 0 if the network engine isn't running — the
    /// `connected_count` behind `Domain::publish`'s minimum-receiver gate,
    /// surfaced for diagnostics (console/perf demos).
    pub fn connected_network_subscribers(&self) -> usize {
        self.net.lock().unwrap().as_ref().map(|n| n.registry.connected_count()).unwrap_or(0)
    }

    /// Publishes a `WireSafe` (trivially copyable) message, routed to
    /// whichever of the three transports actually has a subscriber
    /// (spec.md §4.7 `publish`). Non-`WireSafe` payloads are intra-process
    /// only — use `tips_ctx`'s `Node`/ring access directly for those, or
    /// see [`Domain::publish_just_bytes`] for the runtime-tag variant.
    pub fn publish<T: WireSafe>(&self, tag: Tag, payload: &T) -> Result<()> {
        // SAFETY: `T: WireSafe` (blanket `Copy + Send + Sync + 'static`)
        // guarantees plain, padding-irrelevant data; this mirrors
        // `tips_types::encode`'s reading of `T`'s raw bytes.
        let bytes = unsafe { std::slice::from_raw_parts((payload as *const T).cast::<u8>(), std::mem::size_of::<T>()) };
        self.publish_just_bytes(tag, bytes)
    }

    /// Runtime-tag publish used by the console and bag-replay tools
    /// (spec.md §4.7): bypasses compile-time type dispatch but still
    /// respects every subscription bitmap along the way.
    pub fn publish_just_bytes(&self, tag: Tag, bytes: &[u8]) -> Result<()> {
        self.publish_bytes(tag, bytes, None)
    }

    /// Runtime-tag publish carrying an out-of-band attachment (spec.md §4.7
    /// `att?` parameter; §4.10 "three attachment paths"). The attachment
    /// rides the IPC segment's shared-memory pool or the network's
    /// fragment train instead of being inlined into `bytes`, so its size
    /// isn't bounded by this domain's slot capacity `S`.
    pub fn publish_with_attachment(&self, tag: Tag, bytes: &[u8], attachment: &Attachment) -> Result<()> {
        self.publish_bytes(tag, bytes, Some(attachment))
    }

    fn publish_bytes(&self, tag: Tag, bytes: &[u8], att: Option<&Attachment>) -> Result<()> {
        self.deliver_locally(tag, bytes);

        if let Some(ipc) = &self.ipc {
            let any = ipc.segment.subscription_view().any_subscriber(tag);
            if any {
                self.publish_to_ipc(ipc, tag, bytes, att);
            }
        }

        if let Some(net) = self.net.lock().unwrap().clone() {
            if net.send.publish_gate_open() {
                self.publish_to_net(&net, tag, bytes, att);
            }
        }

        Ok(())
    }

    /// Writes into the intra-process ring if a local `Node` wants `tag`
    /// (or any added `Node` asked for `JustBytes`). Returns whether it
    /// delivered.
    fn deliver_locally(&self, tag: Tag, payload: &[u8]) -> bool {
        let interested = self.wants_just_bytes.load(Ordering::Acquire) || self.local_interests.lock().unwrap().contains(&tag);
        if !interested {
            return false;
        }
        if payload.len() > S {
            tracing::warn!(tag, len = payload.len(), "dropping message exceeding this domain's slot capacity ({S} bytes)");
            return false;
        }
        let mut claim = self.ring.claim(1);
        claim.write(0, Slot::pack(tag, payload));
        claim.commit();
        true
    }

    /// Frames `{total_len, MessageHead, has_attachment, payload}` into the
    /// IPC slot format: a `u32` length prefix (the ring stores fixed
    /// `S`-byte slots, so the actual message length must travel with it),
    /// the 8-byte head (carrying this process's pid in the scratchpad so
    /// the pump thread can skip its own writes), a one-byte attachment
    /// flag, and either the plain message bytes or a pool handle
    /// (spec.md §4.10 "Same-host IPC": "the ring slot carries a pool
    /// handle + 64-bit ref count" — here a `{block_idx, len}` pair backed
    /// by the pool's own refcount) followed by the message bytes. Routing
    /// the attachment through `Segment::pool_view` rather than inlining it
    /// keeps a large attachment off the bounded-size ring slot entirely.
    fn publish_to_ipc(&self, ipc: &IpcBridge, tag: Tag, bytes: &[u8], att: Option<&Attachment>) {
        let mut head = MessageHead::new(tag);
        head.set_source_pid_and_inband_tag(std::process::id(), 0);

        let mut buf = Vec::new();
        match att {
            Some(attachment) => {
                let pool = ipc.segment.pool_view();
                let data = attachment.as_slice();
                let idx = match pool.allocate(data.len()) {
                    Ok(idx) => idx,
                    Err(e) => {
                        tracing::warn!(tag, len = data.len(), error = %e, "IPC attachment pool exhausted, dropping IPC route");
                        return;
                    }
                };
                pool.write(idx, data);
                let total = MessageHead::WIRE_SIZE + 1 + 4 + 4 + bytes.len();
                buf.reserve(4 + total);
                buf.extend_from_slice(&(total as u32).to_le_bytes());
                buf.extend_from_slice(&head.to_wire());
                buf.push(1);
                buf.extend_from_slice(&(idx as u32).to_le_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(bytes);
                // Hand the block off: this process's hold (from
                // `allocate`) is released now that the slot referencing it
                // is about to be queued. A reading pump thread brackets its
                // own `acquire`/`release` around the read, the same
                // best-effort freshness the ring itself already gives a
                // reader racing a fast wraparound (DESIGN.md).
                pool.release(idx);
            }
            None => {
                let total = MessageHead::WIRE_SIZE + 1 + bytes.len();
                buf.reserve(4 + total);
                buf.extend_from_slice(&(total as u32).to_le_bytes());
                buf.extend_from_slice(&head.to_wire());
                buf.push(0);
                buf.extend_from_slice(bytes);
            }
        }

        if buf.len() > S {
            tracing::warn!(tag, len = buf.len(), "message too large for the IPC segment's slot size ({S} bytes), dropping IPC route");
            return;
        }
        let ring = ipc.segment.ring_view();
        let begin = ring.claim(1);
        // SAFETY: `begin` was just returned by `claim(1)` on this same
        // view and hasn't been committed yet.
        unsafe { ring.write_slot(begin, &buf) };
        ring.commit(begin, 1);
    }

    /// Spec.md §4.8 "Slow-subscriber policy": `waitForSlowReceivers` gates
    /// whether a full outgoing ring blocks the publisher or is left for the
    /// send engine's per-advertisement-cycle eviction to relieve (spec.md
    /// §9, `SendEngine::run_advertisement_loop`).
    fn publish_to_net(&self, net: &Arc<NetBridge>, tag: Tag, bytes: &[u8], att: Option<&Attachment>) {
        if self.config.tx.wait_for_slow_receivers {
            let mut spins = 0u32;
            while net.is_full() {
                std::thread::sleep(Duration::from_micros(200));
                spins += 1;
                if spins % 500 == 0 {
                    tracing::warn!(tag, "publish blocked: network outgoing ring full, waitForSlowReceivers=true");
                }
            }
        }
        let mtu = self.params.net_mtu_override.unwrap_or(self.config.global.mtu);

        if let Some(attachment) = att {
            self.publish_attachment_train_to_net(net, tag, bytes, attachment, mtu);
            return;
        }

        let seq = net.next_seq.fetch_add(1, Ordering::AcqRel);
        let mut head = MessageHead::new(tag);
        head.set_seq48(seq);
        let mut datagram = Vec::new();
        if !append_framed(&mut datagram, mtu, head, bytes, true) {
            tracing::warn!(tag, len = bytes.len(), "message exceeds network mtu, dropping network route");
            return;
        }
        net.push_replay(head, bytes.to_vec());
        if net.outbound_tx.send(datagram).is_err() {
            tracing::warn!("network outbound queue is closed");
        }
    }

    /// Sends an attachment as a train instead of dropping oversized
    /// payloads (spec.md §4.8 "Attachment fragmentation", §4.10 path 3): a
    /// `StartMemorySegTrain` announcing its shape, one `MemorySeg` datagram
    /// per fragment — both carrying `NO_SEQUENCE`, since they're session
    /// state rather than part of the ordered stream — then a sequenced
    /// `InBandHasMemoryAttachment` terminator carrying the message body,
    /// which is the frame the receiving arbiter actually orders and
    /// replays (spec.md §4.9).
    fn publish_attachment_train_to_net(&self, net: &Arc<NetBridge>, tag: Tag, bytes: &[u8], attachment: &Attachment, mtu: usize) {
        const MEMORY_SEG_FIXED_HEADER: usize = 10; // inband_underlying_tag(2) + seg_index(4) + len(4)
        let control_overhead = HEADER_SIZE + MessageHead::WIRE_SIZE + MEMORY_SEG_FIXED_HEADER;
        let Some(max_fragment) = mtu.checked_sub(control_overhead).filter(|&n| n > 0) else {
            tracing::warn!(tag, mtu, "mtu too small to carry an attachment train, dropping network route");
            return;
        };

        let (train_header, segments) = fragment(tag, attachment.as_slice(), max_fragment);

        let mut start_head = MessageHead::new(system::START_MEMORY_SEG_TRAIN);
        start_head.set_seq48(NO_SEQUENCE);
        let mut datagram = Vec::new();
        if append_framed(&mut datagram, mtu, start_head, &train_header.to_wire(), true) {
            let _ = net.outbound_tx.send(datagram);
        } else {
            tracing::warn!(tag, "attachment train header exceeds mtu, dropping network route");
            return;
        }

        for seg in &segments {
            let mut seg_head = MessageHead::new(system::MEMORY_SEG);
            seg_head.set_seq48(NO_SEQUENCE);
            let wire = seg.to_wire();
            let mut datagram = Vec::new();
            if append_framed(&mut datagram, mtu, seg_head, &wire, true) {
                let _ = net.outbound_tx.send(datagram);
            } else {
                tracing::warn!(tag, seg_index = seg.seg_index, "attachment fragment exceeds mtu, dropping fragment");
            }
        }

        let seq = net.next_seq.fetch_add(1, Ordering::AcqRel);
        let mut term_head = MessageHead::new(system::IN_BAND_ATTACHMENT);
        term_head.set_seq48(seq);
        let mut term_payload = Vec::with_capacity(2 + bytes.len());
        term_payload.extend_from_slice(&tag.to_le_bytes());
        term_payload.extend_from_slice(bytes);
        let mut datagram = Vec::new();
        if !append_framed(&mut datagram, mtu, term_head, &term_payload, true) {
            tracing::warn!(tag, "attachment terminator exceeds mtu, dropping network route");
            return;
        }
        net.push_replay(term_head, term_payload);
        if net.outbound_tx.send(datagram).is_err() {
            tracing::warn!("network outbound queue is closed");
        }
    }

    fn spawn_ipc_pump(self: &Arc<Self>, ipc: &IpcBridge) {
        let domain = Arc::clone(self);
        let segment = Arc::clone(&ipc.segment);
        let reader = ipc.local_reader;
        let stop = Arc::clone(&self.pump_stop);
        let local_pid = std::process::id();
        let handle = std::thread::spawn(move || {
            let ring = segment.ring_view();
            loop {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                let (begin, count) = ring.peek(reader);
                if count == 0 {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                for i in 0..count {
                    let seq = begin + i as u64;
                    let slot = ring.slot_bytes(seq);
                    if slot.len() < 4 + MessageHead::WIRE_SIZE + 1 {
                        continue;
                    }
                    let total = u32::from_le_bytes(slot[0..4].try_into().unwrap()) as usize;
                    if total < MessageHead::WIRE_SIZE + 1 || 4 + total > slot.len() {
                        tracing::warn!("malformed IPC slot, skipping");
                        continue;
                    }
                    let head_bytes: [u8; MessageHead::WIRE_SIZE] = slot[4..4 + MessageHead::WIRE_SIZE].try_into().unwrap();
                    let head = MessageHead::from_wire(&head_bytes);
                    let (origin_pid, _) = head.source_pid_and_inband_tag();
                    if origin_pid == local_pid {
                        continue; // this process's own write, already delivered locally at publish time
                    }
                    let has_attachment = slot[4 + MessageHead::WIRE_SIZE];
                    let rest = &slot[4 + MessageHead::WIRE_SIZE + 1..4 + total];
                    if has_attachment == 1 {
                        if rest.len() < 8 {
                            tracing::warn!("malformed IPC attachment slot, skipping");
                            continue;
                        }
                        let pool_idx = u32::from_le_bytes(rest[0..4].try_into().unwrap()) as usize;
                        let att_len = u32::from_le_bytes(rest[4..8].try_into().unwrap()) as usize;
                        let payload = &rest[8..];
                        let pool = segment.pool_view();
                        pool.acquire(pool_idx);
                        let _attachment_bytes = pool.read(pool_idx, att_len);
                        domain.deliver_locally(head.type_tag, payload);
                        pool.release(pool_idx);
                    } else {
                        domain.deliver_locally(head.type_tag, rest);
                    }
                }
                ring.waste_after_peek(reader, count);
            }
            ring.unregister(reader);
            tracing::info!("IPC pump thread stopped");
        });
        self.pump_handles.lock().unwrap().push(handle);
    }

    fn spawn_net(self: &Arc<Self>) {
        let domain = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "failed to start the network engine's runtime");
                    return;
                }
            };
            rt.block_on(async move {
                if let Err(e) = domain.run_net_forever().await {
                    tracing::error!(error = %e, "network engine stopped with an error");
                }
            });
        });
        self.pump_handles.lock().unwrap().push(handle);
    }

    async fn run_net_forever(self: Arc<Self>) -> tips_net::Result<()> {
        let global = &self.config.global;
        let mtu = self.params.net_mtu_override.unwrap_or(global.mtu);
        let local_pid = std::process::id();

        let send = Arc::new(SendEngine::bind(global.iface_addr, self.params.multicast_group, self.params.multicast_port, mtu, self.config.tx.clone()).await?);
        let recv = Arc::new(RecvEngine::bind(global.iface_addr, self.params.multicast_group, self.params.multicast_port, local_pid, global.loopback, self.config.rx.clone()).await?);

        for tag in self.local_interests.lock().unwrap().iter().copied().collect::<Vec<_>>() {
            recv.subscribe(tag).await;
        }

        let listener = TcpListener::bind((global.iface_addr, self.config.tx.tcp_port)).await?;
        let local_tcp_port = listener.local_addr()?.port();

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let bridge = Arc::new(NetBridge {
            registry: send.registry(),
            send: Arc::clone(&send),
            outbound_tx: tx,
            next_seq: AtomicU64::new(0),
            replay_log: StdMutex::new(VecDeque::new()),
            replay_base_seq: StdMutex::new(0),
            replay_capacity: self.params.replay_log_capacity,
        });
        *self.net.lock().unwrap() = Some(Arc::clone(&bridge));

        let advertise = {
            let send = Arc::clone(&send);
            let domain = Arc::clone(&self);
            let local_ip = global.iface_addr;
            let replay: Arc<dyn ReplaySource> = Arc::clone(&bridge);
            tokio::spawn(async move {
                let current_tags = move || domain.local_interests.lock().unwrap().iter().copied().collect::<Vec<_>>();
                if let Err(e) = send.run_advertisement_loop(local_ip, local_pid, local_tcp_port, current_tags, replay).await {
                    tracing::warn!(error = %e, "advertisement loop ended");
                }
            })
        };

        let backup = {
            let send = Arc::clone(&send);
            let replay: Arc<dyn ReplaySource> = Arc::clone(&bridge);
            tokio::spawn(async move {
                if let Err(e) = send.run_backup_server(listener, replay).await {
                    tracing::warn!(error = %e, "backup server ended");
                }
            })
        };

        let outbound = {
            let send = Arc::clone(&send);
            tokio::spawn(async move {
                while let Some(datagram) = rx.recv().await {
                    if let Err(e) = send.send_datagram(&datagram).await {
                        tracing::warn!(error = %e, "send_datagram failed");
                    }
                }
            })
        };

        let recv_task = {
            let delivery: Arc<dyn Delivery> = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = recv.run(delivery).await {
                    tracing::warn!(error = %e, "recv engine ended");
                }
            })
        };

        let _ = tokio::join!(advertise, backup, outbound, recv_task);
        Ok(())
    }
}

impl<const S: usize, const N: usize> Delivery for Domain<S, N> {
    fn deliver(&self, head: MessageHead, payload: &[u8], attachment: Option<Attachment>) {
        self.deliver_locally(head.type_tag, payload);
        if let Some(ipc) = &self.ipc {
            if ipc.segment.subscription_view().any_subscriber(head.type_tag) {
                self.publish_to_ipc(ipc, head.type_tag, payload, attachment.as_ref());
            }
        }
    }
}
