//! Throughput/latency harness, in the shape of the teacher's
//! `benches/bench_final.rs`/`benches/throughput.rs`: a plain `main` that
//! prints a scaling table rather than a `criterion` benchmark, so it can be
//! run ad hoc against a single build instead of under the full benchmark
//! harness.
//!
//! Two scenarios:
//! - raw ring throughput, N producer threads against one reader thread,
//!   bypassing `Domain`/`Context` entirely;
//! - end-to-end publish latency through a one-`Node` `Domain`, round-tripped
//!   over an `mpsc` channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tips::{Domain, DomainConfig, DomainParams, Node, NodeSchedule, RingBuffer, RingConfig};

const MSG_PER_PRODUCER: u64 = 2_000_000;
const BATCH_SIZE: usize = 1024;

fn run_ring_scenario(num_producers: usize) {
    let config = RingConfig::new(20, std::mem::size_of::<u64>(), 1);
    let ring: Arc<RingBuffer<u64, 1_048_576>> = Arc::new(RingBuffer::new(config));
    let reader = ring.register().expect("reader slot");

    let total = MSG_PER_PRODUCER * num_producers as u64;
    let produced = Arc::new(AtomicU64::new(0));

    let start = Instant::now();

    let mut handles = Vec::with_capacity(num_producers);
    for _ in 0..num_producers {
        let ring = Arc::clone(&ring);
        let produced = Arc::clone(&produced);
        handles.push(thread::spawn(move || {
            let mut sent = 0u64;
            while sent < MSG_PER_PRODUCER {
                let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                let mut claim = ring.claim(want);
                for offset in 0..claim.len() {
                    claim.write(offset, sent + offset as u64);
                }
                let n = claim.len() as u64;
                claim.commit();
                sent += n;
                produced.fetch_add(n, Ordering::Relaxed);
            }
        }));
    }

    let mut received = 0u64;
    while received < total {
        let range = ring.peek(reader);
        let n = range.len();
        if n == 0 {
            thread::yield_now();
            continue;
        }
        range.waste_all();
        received += n as u64;
    }

    for h in handles {
        h.join().unwrap();
    }

    let elapsed = start.elapsed();
    let throughput = total as f64 / elapsed.as_secs_f64();
    println!("| {:4} | {:12.1} M/s |", format!("{num_producers}P1C"), throughput / 1_000_000.0);
}

struct Echo {
    events: mpsc::Sender<Instant>,
}

impl Node for Echo {
    fn recv_interests(&self) -> Vec<u16> {
        vec![1]
    }
    fn handle(&mut self, _tag: u16, _bytes: &[u8]) -> Result<(), String> {
        let _ = self.events.send(Instant::now());
        Ok(())
    }
}

fn run_latency_scenario(samples: usize) {
    let domain = Domain::<64, 4>::new(DomainConfig::default(), DomainParams::default()).expect("domain construction");
    let (tx, rx) = mpsc::channel();
    domain.add(Box::new(Echo { events: tx }));
    domain.start(NodeSchedule { max_blocking_time: Duration::from_micros(100), ..Default::default() });
    thread::sleep(Duration::from_millis(20));

    let mut latencies = Vec::with_capacity(samples);
    for _ in 0..samples {
        let sent_at = Instant::now();
        domain.publish(1u16, &sent_at).expect("publish timestamp");
        if let Ok(received_at) = rx.recv_timeout(Duration::from_secs(1)) {
            latencies.push(received_at.saturating_duration_since(sent_at));
        }
    }
    domain.stop();
    domain.join();

    latencies.sort();
    if latencies.is_empty() {
        println!("no latency samples observed");
        return;
    }
    let p50 = latencies[latencies.len() / 2];
    let p99 = latencies[latencies.len() * 99 / 100];
    println!("publish-to-handle latency over {} samples: p50={p50:?} p99={p99:?}", latencies.len());
}

fn main() {
    println!("\nRing throughput (N producers, 1 consumer)");
    println!("| prod |    throughput |");
    for producers in [1, 2, 4, 8] {
        run_ring_scenario(producers);
    }

    println!("\nDomain publish latency (single Node, intra-process)");
    run_latency_scenario(10_000);
}
