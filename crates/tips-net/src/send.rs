//! Reliable network send engine (spec.md §4.8): an unreliable UDP
//! multicast fast channel plus a TCP recovery channel, tied together by
//! periodic `TypeTagBackupSource` advertisement.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use tips_types::{system, MessageHead, Tag};

use crate::advertise::TypeTagBackupSource;
use crate::config::SendConfig;
use crate::error::Result;
use crate::rater::Rater;
use crate::session::{run_backup_session, ReplaySource};
use crate::wire::append_framed;

struct SessionEntry {
    last_known_seq: Arc<AtomicU64>,
    abort: AbortHandle,
}

/// Tracks connected backup subscribers for the minimum-receiver gate and
/// the slow-subscriber kill policy (spec.md §4.8).
#[derive(Default)]
pub struct SubscriberRegistry {
    connected: AtomicUsize,
    next_id: AtomicU64,
    sessions: StdMutex<HashMap<u64, SessionEntry>>,
}

impl SubscriberRegistry {
    pub fn connected_count(&self) -> usize {
        self.connected.load(Ordering::Acquire)
    }

    fn on_connect(&self, abort: AbortHandle, last_known_seq: Arc<AtomicU64>) -> u64 {
        self.connected.fetch_add(1, Ordering::AcqRel);
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.sessions.lock().unwrap().insert(id, SessionEntry { last_known_seq, abort });
        id
    }

    fn on_disconnect(&self, id: u64) {
        self.connected.fetch_sub(1, Ordering::AcqRel);
        self.sessions.lock().unwrap().remove(&id);
    }

    /// Force-disconnects the subscriber whose last-reported sequence is
    /// furthest behind (spec.md §9: preserve the "kill the single slowest
    /// per advertisement cycle" cadence, not an immediate-on-fullness
    /// kill). Returns whether a session was actually evicted.
    fn evict_slowest(&self) -> bool {
        let sessions = self.sessions.lock().unwrap();
        let slowest = sessions.iter().min_by_key(|(_, e)| e.last_known_seq.load(Ordering::Acquire));
        if let Some((id, entry)) = slowest {
            tracing::warn!(session = id, "evicting slowest backup subscriber: outgoing ring full and waitForSlowReceivers=false");
            entry.abort.abort();
            true
        } else {
            false
        }
    }
}

pub struct SendEngine {
    multicast: UdpSocket,
    group: SocketAddrV4,
    mtu: usize,
    rater: Mutex<Rater>,
    registry: Arc<SubscriberRegistry>,
    cfg: SendConfig,
}

impl SendEngine {
    /// Binds the multicast socket on `iface`, joins `group`, and sets the
    /// outgoing TTL. Does not yet start the TCP listener or advertisement
    /// loop — call [`SendEngine::spawn_backup_server`] and
    /// [`SendEngine::spawn_advertisement_loop`] once subscriber interests
    /// are known.
    pub async fn bind(iface: Ipv4Addr, group: Ipv4Addr, port: u16, mtu: usize, cfg: SendConfig) -> Result<Self> {
        let socket = UdpSocket::bind((iface, 0)).await?;
        socket.join_multicast_v4(group, iface)?;
        socket.set_multicast_ttl_v4(cfg.ttl)?;
        Ok(Self {
            multicast: socket,
            group: SocketAddrV4::new(group, port),
            mtu,
            rater: Mutex::new(Rater::new(cfg.send_bytes_per_sec, cfg.send_bytes_burst)),
            registry: Arc::new(SubscriberRegistry::default()),
            cfg,
        })
    }

    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        self.registry.clone()
    }

    /// Sends one already-framed datagram, respecting the rate limiter.
    /// Blocks (sleeping, not spinning) until the bucket admits it.
    pub async fn send_datagram(&self, datagram: &[u8]) -> Result<()> {
        loop {
            let mut rater = self.rater.lock().await;
            if rater.check(datagram.len() as u64) {
                rater.commit(datagram.len() as u64);
                drop(rater);
                self.multicast.send_to(datagram, self.group).await?;
                return Ok(());
            }
            let wait = rater.wait_hint(datagram.len() as u64);
            drop(rater);
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// `true` once at least `minRecvToStart` backup subscribers are
    /// connected (spec.md §4.8 "Minimum-receiver gate").
    pub fn publish_gate_open(&self) -> bool {
        self.registry.connected_count() >= self.cfg.min_recv_to_start
    }

    /// Listens for backup TCP connections and services each with
    /// [`run_backup_session`] on its own task. Runs until the listener
    /// errors or the process exits; `Context::stop` semantics at this layer
    /// are left to the caller wrapping the returned `JoinHandle` the way
    /// `tips-ctx::Context` wraps Node threads.
    pub async fn run_backup_server(self: Arc<Self>, listener: TcpListener, replay: Arc<dyn ReplaySource>) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let registry = self.registry.clone();
            let replay = replay.clone();
            let last_known_seq = Arc::new(AtomicU64::new(0));
            let session_last_known_seq = last_known_seq.clone();
            let replay_history = self.cfg.replay_history_for_new_recv;
            if let Err(e) = stream.set_nodelay(!self.cfg.nagling) {
                tracing::warn!(%peer, error = %e, "failed to set TCP_NODELAY on backup session");
            }
            let handle = tokio::spawn(async move {
                tracing::info!(%peer, "backup session started");
                if let Err(e) = run_backup_session(stream, replay, session_last_known_seq, replay_history).await {
                    tracing::warn!(%peer, error = %e, "backup session ended with error");
                }
            });
            let id = registry.on_connect(handle.abort_handle(), last_known_seq);
            let registry = registry.clone();
            tokio::spawn(async move {
                let _ = handle.await;
                registry.on_disconnect(id);
                tracing::info!(%peer, "backup session dropped");
            });
        }
    }

    /// Runs forever, multicasting `TypeTagBackupSource` records every
    /// `typeTagAdvertisePeriodSeconds` (spec.md §4.8 "Advertisement").
    /// `tags` is re-read each cycle via the supplied closure so a changing
    /// subscription set is picked up without restarting the loop.
    ///
    /// Also the home of the "kill slow subscriber" cadence (spec.md §9): if
    /// `waitForSlowReceivers` is false and the outgoing ring is still full
    /// at advertisement time, the single slowest connected backup
    /// subscriber is evicted — never more than one per cycle, and never
    /// outside this cycle boundary.
    pub async fn run_advertisement_loop(
        &self,
        local_ip: Ipv4Addr,
        local_pid: u32,
        tcp_port: u16,
        current_tags: impl Fn() -> Vec<Tag>,
        replay: Arc<dyn ReplaySource>,
    ) -> Result<()> {
        let mut interval = tokio::time::interval(self.cfg.type_tag_advertise_period);
        loop {
            interval.tick().await;
            let tags = current_tags();
            let records = TypeTagBackupSource::records_for(local_ip, local_pid, tcp_port, self.cfg.net_roundtrip_latency.as_micros() as u32, &tags);
            for record in records {
                let mut datagram = Vec::new();
                let head = MessageHead::new(system::TYPE_TAG_BACKUP_SOURCE_UDP);
                append_framed(&mut datagram, self.mtu, head, &record.to_wire(), true);
                if let Err(e) = self.multicast.send_to(&datagram, self.group).await {
                    tracing::warn!(error = %e, "advertisement send failed");
                }
            }
            if !self.cfg.wait_for_slow_receivers && replay.is_full() {
                self.registry.evict_slowest();
            }
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.multicast.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_session() -> (AbortHandle, Arc<AtomicU64>) {
        let handle = tokio::spawn(std::future::pending::<()>());
        (handle.abort_handle(), Arc::new(AtomicU64::new(0)))
    }

    #[tokio::test]
    async fn min_receiver_gate_closed_until_threshold() {
        let registry = SubscriberRegistry::default();
        assert_eq!(registry.connected_count(), 0);
        let (a1, seq1) = dummy_session();
        let (a2, seq2) = dummy_session();
        let id1 = registry.on_connect(a1, seq1);
        registry.on_connect(a2, seq2);
        assert_eq!(registry.connected_count(), 2);
        registry.on_disconnect(id1);
        assert_eq!(registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn evict_slowest_picks_the_lowest_reported_sequence() {
        let registry = SubscriberRegistry::default();
        let (a1, seq1) = dummy_session();
        let (a2, seq2) = dummy_session();
        seq1.store(100, Ordering::Release);
        seq2.store(10, Ordering::Release);
        let id1 = registry.on_connect(a1, seq1);
        let id2 = registry.on_connect(a2, seq2);

        assert!(registry.evict_slowest());
        assert!(registry.sessions.lock().unwrap().contains_key(&id1));
        assert!(!registry.sessions.lock().unwrap().contains_key(&id2));
    }

    #[tokio::test]
    async fn evict_slowest_is_noop_with_no_sessions() {
        let registry = SubscriberRegistry::default();
        assert!(!registry.evict_slowest());
    }
}
