//! The recovery channel's ASCII command grammar (spec.md §4.8/§4.9),
//! grounded on `examples/original_source/hmbdc/tips/reliable/
//! BackupSendServerT.hpp` / `BackupRecvSessionT.hpp`: `+<tag>\t` subscribe,
//! `-<tag>\t` unsubscribe, `=<seq>,<len>\t` replay request (`len == 0` is a
//! quiescent heartbeat/gap-probe), `+\t` ends the initial subscription
//! burst ("done").

use tips_types::Tag;

use crate::error::{NetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Subscribe(Tag),
    Unsubscribe(Tag),
    Replay { seq: u64, len: u64 },
    Done,
}

impl Command {
    pub fn to_wire(self) -> String {
        match self {
            Command::Subscribe(tag) => format!("+{tag}\t"),
            Command::Unsubscribe(tag) => format!("-{tag}\t"),
            Command::Replay { seq, len } => format!("={seq},{len}\t"),
            Command::Done => "+\t".to_string(),
        }
    }
}

/// Incrementally parses `\t`-terminated commands out of a byte stream
/// accumulated from TCP reads; `feed` may be called with partial reads and
/// returns every command completed so far, retaining any trailing partial
/// command for the next call.
#[derive(Default)]
pub struct CommandReader {
    buf: Vec<u8>,
}

impl CommandReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Command>> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\t') else { break };
            let raw = self.buf[..pos].to_vec();
            self.buf.drain(..=pos);
            out.push(parse_one(&raw)?);
        }
        Ok(out)
    }
}

fn parse_one(raw: &[u8]) -> Result<Command> {
    let text = std::str::from_utf8(raw).map_err(|_| NetError::ProtocolViolation("non-UTF8 command".into()))?;
    if text == "+" {
        return Ok(Command::Done);
    }
    if let Some(rest) = text.strip_prefix('+') {
        let tag: Tag = rest.parse().map_err(|_| NetError::ProtocolViolation(format!("bad subscribe tag: {text}")))?;
        return Ok(Command::Subscribe(tag));
    }
    if let Some(rest) = text.strip_prefix('-') {
        let tag: Tag = rest.parse().map_err(|_| NetError::ProtocolViolation(format!("bad unsubscribe tag: {text}")))?;
        return Ok(Command::Unsubscribe(tag));
    }
    if let Some(rest) = text.strip_prefix('=') {
        let (seq_s, len_s) = rest.split_once(',').ok_or_else(|| NetError::ProtocolViolation(format!("malformed replay: {text}")))?;
        let seq: u64 = seq_s.parse().map_err(|_| NetError::ProtocolViolation(format!("bad replay seq: {text}")))?;
        let len: u64 = len_s.parse().map_err(|_| NetError::ProtocolViolation(format!("bad replay len: {text}")))?;
        return Ok(Command::Replay { seq, len });
    }
    Err(NetError::ProtocolViolation(format!("unrecognized command: {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_command_kind() {
        let mut r = CommandReader::new();
        let cmds = r.feed(b"+1000\t-1001\t=42,5\t+\t").unwrap();
        assert_eq!(cmds, vec![Command::Subscribe(1000), Command::Unsubscribe(1001), Command::Replay { seq: 42, len: 5 }, Command::Done]);
    }

    #[test]
    fn handles_split_reads() {
        let mut r = CommandReader::new();
        assert!(r.feed(b"+10").unwrap().is_empty());
        let cmds = r.feed(b"00\t").unwrap();
        assert_eq!(cmds, vec![Command::Subscribe(1000)]);
    }

    #[test]
    fn malformed_command_is_protocol_violation() {
        let mut r = CommandReader::new();
        assert!(r.feed(b"?garbage\t").is_err());
    }

    #[test]
    fn round_trips_to_wire() {
        assert_eq!(Command::Subscribe(42).to_wire(), "+42\t");
        assert_eq!(Command::Replay { seq: 1, len: 2 }.to_wire(), "=1,2\t");
        assert_eq!(Command::Done.to_wire(), "+\t");
    }
}
