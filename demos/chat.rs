//! End-to-end scenario 1 from spec.md §8: an Admin, statically subscribed
//! to `ChatMessage` offsets 0-99 (tags 1002-1101), and three Chatters
//! subscribed to `Announcement` (1001) plus one `ChatMessage` offset each
//! (0/1/2), all on one intra-process `Domain`.

use std::sync::mpsc;
use std::time::Duration;

use tips::{Domain, DomainConfig, DomainParams, Node, NodeSchedule};

const ANNOUNCEMENT: u16 = 1001;
const CHAT_MESSAGE_BASE: u16 = 1002;

/// Local (in-process) delivery carries the raw payload with no
/// `MessageHead` prefix — the tag already travels alongside it as
/// `Node::handle`'s first argument, so there's nothing to strip.
fn read_payload<T: Copy>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < std::mem::size_of::<T>() {
        return None;
    }
    let mut value = std::mem::MaybeUninit::<T>::uninit();
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), value.as_mut_ptr().cast::<u8>(), std::mem::size_of::<T>());
        Some(value.assume_init())
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Announcement {
    len: u8,
    text: [u8; 63],
}

impl Announcement {
    fn new(msg: &str) -> Self {
        let mut text = [0u8; 63];
        let bytes = msg.as_bytes();
        let len = bytes.len().min(63);
        text[..len].copy_from_slice(&bytes[..len]);
        Self { len: len as u8, text }
    }

    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.text[..self.len as usize]).unwrap_or("<invalid utf8>")
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ChatMessage {
    group_id: u32,
    len: u8,
    text: [u8; 55],
}

impl ChatMessage {
    fn new(group_id: u32, msg: &str) -> Self {
        let mut text = [0u8; 55];
        let bytes = msg.as_bytes();
        let len = bytes.len().min(55);
        text[..len].copy_from_slice(&bytes[..len]);
        Self { group_id, len: len as u8, text }
    }

    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.text[..self.len as usize]).unwrap_or("<invalid utf8>")
    }
}

struct Admin {
    events: mpsc::Sender<String>,
}

impl Node for Admin {
    fn recv_interests(&self) -> Vec<u16> {
        (0..100).map(|offset| CHAT_MESSAGE_BASE + offset).collect()
    }

    fn handle(&mut self, tag: u16, bytes: &[u8]) -> Result<(), String> {
        let msg: ChatMessage = read_payload(bytes).ok_or("short ChatMessage")?;
        let _ = self.events.send(format!("admin observed tag {tag}: group {} says '{}'", msg.group_id, msg.as_str()));
        Ok(())
    }
}

struct Chatter {
    offset: u16,
    events: mpsc::Sender<String>,
}

impl Node for Chatter {
    fn recv_interests(&self) -> Vec<u16> {
        vec![ANNOUNCEMENT, CHAT_MESSAGE_BASE + self.offset]
    }

    fn handle(&mut self, tag: u16, bytes: &[u8]) -> Result<(), String> {
        if tag == ANNOUNCEMENT {
            let msg: Announcement = read_payload(bytes).ok_or("short Announcement")?;
            let _ = self.events.send(format!("chatter[{}] ADMIN ANNOUCEMENT: {}", self.offset, msg.as_str()));
        } else {
            let msg: ChatMessage = read_payload(bytes).ok_or("short ChatMessage")?;
            let _ = self.events.send(format!("chatter[{}] received: {}", self.offset, msg.as_str()));
        }
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let domain = Domain::<64, 8>::new(DomainConfig::default(), DomainParams::default()).expect("domain construction");

    let (tx, rx) = mpsc::channel();
    domain.add(Box::new(Admin { events: tx.clone() }));
    for offset in 0..3u16 {
        domain.add(Box::new(Chatter { offset, events: tx.clone() }));
    }
    domain.start(NodeSchedule { max_blocking_time: Duration::from_millis(1), ..Default::default() });

    // give every Node's reader thread a moment to register before publishing.
    std::thread::sleep(Duration::from_millis(50));

    domain.publish(ANNOUNCEMENT, &Announcement::new("hi")).expect("publish announcement");
    domain.publish(CHAT_MESSAGE_BASE + 1, &ChatMessage::new(1, "x")).expect("publish chat message");

    // 3 chatters observe the announcement, plus chatter[1] and the admin
    // both observe the chat message (admin's static range covers every
    // offset) — 5 events total.
    for _ in 0..5 {
        match rx.recv_timeout(Duration::from_secs(2)) {
            Ok(line) => println!("{line}"),
            Err(_) => break,
        }
    }

    domain.stop();
    domain.join();
}
