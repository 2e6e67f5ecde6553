//! Throughput benchmarks for `RingBuffer` — grounded on the teacher's
//! `benches/throughput.rs` (SPSC/MPSC/batch-size/contention shape), adapted
//! to this ring's multi-reader `peek`/`waste` API in place of the teacher's
//! single-consumer `consume_all`.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tips_ring::{RingBuffer, RingConfig};

const MSG_PER_PRODUCER: u64 = 2_000_000;
const BATCH_SIZE: usize = 1024;

fn drain_one<const N: usize>(ring: &RingBuffer<u64, N>, reader: usize) -> u64 {
    let peek = ring.peek(reader);
    let n = peek.len() as u64;
    for i in 0..peek.len() {
        black_box(*peek.get(i));
    }
    peek.waste_all();
    n
}

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    group.bench_function("single_producer_consumer", |b| {
        b.iter(|| {
            let ring: Arc<RingBuffer<u64, 1>> = Arc::new(RingBuffer::new(RingConfig::new(16, 8, 1)));
            let reader = ring.register().unwrap();

            let producer_ring = Arc::clone(&ring);
            let producer = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < MSG_PER_PRODUCER {
                    let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                    let mut claim = producer_ring.claim(want);
                    for i in 0..want {
                        claim.write(i, sent + i as u64);
                    }
                    claim.commit();
                    sent += want as u64;
                }
            });

            let mut received = 0u64;
            while received < MSG_PER_PRODUCER {
                received += drain_one(&ring, reader);
                if received < MSG_PER_PRODUCER {
                    std::hint::spin_loop();
                }
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc");

    for num_producers in [2, 4, 8].iter() {
        let total_msgs = MSG_PER_PRODUCER * (*num_producers as u64);
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}P_3R", n = num_producers)), num_producers, |b, &n| {
            b.iter(|| {
                let ring: Arc<RingBuffer<u64, 3>> = Arc::new(RingBuffer::new(RingConfig::new(16, 8, 1)));
                let readers: Vec<usize> = (0..3).map(|_| ring.register().unwrap()).collect();
                let target = MSG_PER_PRODUCER * (n as u64);

                let mut producer_handles = vec![];
                for _ in 0..n {
                    let ring = Arc::clone(&ring);
                    producer_handles.push(thread::spawn(move || {
                        let mut sent = 0u64;
                        while sent < MSG_PER_PRODUCER {
                            let want = BATCH_SIZE.min((MSG_PER_PRODUCER - sent) as usize);
                            let mut claim = ring.claim(want);
                            for i in 0..want {
                                claim.write(i, sent + i as u64);
                            }
                            claim.commit();
                            sent += want as u64;
                        }
                    }));
                }

                let mut consumer_handles = vec![];
                for &r in &readers {
                    let ring = Arc::clone(&ring);
                    consumer_handles.push(thread::spawn(move || {
                        let mut count = 0u64;
                        while count < target {
                            count += drain_one(&ring, r);
                            if count < target {
                                std::hint::spin_loop();
                            }
                        }
                    }));
                }

                for h in producer_handles {
                    h.join().unwrap();
                }
                for h in consumer_handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_batch_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_sizes");
    group.throughput(Throughput::Elements(MSG_PER_PRODUCER));

    for batch_size in [256usize, 1024, 4096, 16384].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(format!("batch_{batch_size}")), batch_size, |b, &batch| {
            b.iter(|| {
                let ring: Arc<RingBuffer<u64, 1>> = Arc::new(RingBuffer::new(RingConfig::new(16, 8, 1)));
                let reader = ring.register().unwrap();

                let producer_ring = Arc::clone(&ring);
                let producer = thread::spawn(move || {
                    let mut sent = 0u64;
                    while sent < MSG_PER_PRODUCER {
                        let want = batch.min((MSG_PER_PRODUCER - sent) as usize);
                        let mut claim = producer_ring.claim(want);
                        for i in 0..want {
                            claim.write(i, sent + i as u64);
                        }
                        claim.commit();
                        sent += want as u64;
                    }
                });

                let mut received = 0u64;
                while received < MSG_PER_PRODUCER {
                    received += drain_one(&ring, reader);
                    if received < MSG_PER_PRODUCER {
                        std::hint::spin_loop();
                    }
                }
                producer.join().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");

    let msgs = 50_000u64;
    for num_producers in [4u64, 8].iter() {
        let total = msgs * num_producers;
        group.throughput(Throughput::Elements(total));

        group.bench_with_input(BenchmarkId::from_parameter(format!("{n}P_small_ring", n = num_producers)), num_producers, |b, &n| {
            b.iter(|| {
                let ring: Arc<RingBuffer<u64, 1>> = Arc::new(RingBuffer::new(RingConfig::new(10, 8, 1)));
                let reader = ring.register().unwrap();
                let counter = Arc::new(AtomicU64::new(0));
                let target = msgs * n;

                let mut handles = vec![];
                for _ in 0..n {
                    let ring = Arc::clone(&ring);
                    handles.push(thread::spawn(move || {
                        for i in 0..msgs {
                            let mut claim = ring.claim(1);
                            claim.write(0, i);
                            claim.commit();
                        }
                    }));
                }

                let cnt = Arc::clone(&counter);
                let ring_c = Arc::clone(&ring);
                let consumer = thread::spawn(move || {
                    while cnt.load(Ordering::Relaxed) < target {
                        let n = drain_one(&ring_c, reader);
                        cnt.fetch_add(n, Ordering::Relaxed);
                        if n == 0 {
                            std::hint::spin_loop();
                        }
                    }
                });

                for h in handles {
                    h.join().unwrap();
                }
                consumer.join().unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpmc, bench_batch_sizes, bench_contention);
criterion_main!(benches);
