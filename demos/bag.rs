//! Standalone bag file inspector: `tips-bag dump <file>` prints every
//! frame's tag, relative timestamp, and payload length; `tips-bag record
//! <file> <seconds>` and `tips-bag play <file>` mirror the console tool's
//! `record`/`play` commands but run without a domain attached to anything
//! but `tag 1` — useful for exercising `tips::bag` on its own.

use std::env;
use std::path::Path;
use std::time::Duration;

use tips::bag::{Reader, Writer};
use tips::{Domain, DomainConfig, DomainParams, Node, NodeSchedule};

fn dump(path: &str) {
    let mut reader = match Reader::open(Path::new(path)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to open {path}: {e}");
            std::process::exit(1);
        }
    };
    println!("buffer_width={}", reader.buffer_width);
    let mut count = 0u64;
    loop {
        match reader.next_frame() {
            Ok(Some(frame)) => {
                println!("[{count:>6}] t={:?} tag={} msg_len={} att_len={}", frame.relative_timestamp, frame.tag, frame.msg.len(), frame.attachment.len());
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("error at frame {count}: {e}");
                std::process::exit(1);
            }
        }
    }
    println!("{count} frame(s)");
}

struct Capture {
    writer: Writer<std::fs::File>,
}

impl Node for Capture {
    fn recv_interests(&self) -> Vec<u16> {
        vec![1]
    }
    fn handle(&mut self, tag: u16, bytes: &[u8]) -> Result<(), String> {
        self.writer.record(tag, bytes, &[]).map_err(|e| e.to_string())
    }
}

fn record(path: &str, seconds: u64) {
    let writer = match Writer::create(Path::new(path), 1024) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("failed to create {path}: {e}");
            std::process::exit(1);
        }
    };
    let domain = Domain::<1024, 4>::new(DomainConfig::default(), DomainParams::default()).expect("domain construction");
    domain.add(Box::new(Capture { writer }));
    domain.start(NodeSchedule::default());
    println!("recording tag 1 to {path} for {seconds}s");
    std::thread::sleep(Duration::from_secs(seconds));
    domain.stop();
    domain.join();
}

fn play(path: &str) {
    let domain = Domain::<1024, 4>::new(DomainConfig::default(), DomainParams::default()).expect("domain construction");
    domain.start(NodeSchedule::default());

    let mut reader = match Reader::open(Path::new(path)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("failed to open {path}: {e}");
            std::process::exit(1);
        }
    };
    let mut last = Duration::ZERO;
    while let Ok(Some(frame)) = reader.next_frame() {
        if frame.relative_timestamp > last {
            std::thread::sleep(frame.relative_timestamp - last);
        }
        last = frame.relative_timestamp;
        let _ = domain.publish_just_bytes(frame.tag, &frame.msg);
    }
    domain.stop();
    domain.join();
}

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("dump") => match args.get(2) {
            Some(path) => dump(path),
            None => {
                eprintln!("usage: tips-bag dump <file>");
                std::process::exit(1);
            }
        },
        Some("record") => match (args.get(2), args.get(3).and_then(|s| s.parse::<u64>().ok())) {
            (Some(path), Some(seconds)) => record(path, seconds),
            _ => {
                eprintln!("usage: tips-bag record <file> <seconds>");
                std::process::exit(1);
            }
        },
        Some("play") => match args.get(2) {
            Some(path) => play(path),
            None => {
                eprintln!("usage: tips-bag play <file>");
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("usage: tips-bag <dump|record|play> <file> [seconds]");
            std::process::exit(1);
        }
    }
}
