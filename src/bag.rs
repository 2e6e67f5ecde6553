//! Bag file recorder/player (spec.md §6 "Bag file format", SPEC_FULL.md
//! §12): an opaque binary recording of published messages, read back
//! sequentially with no random access. Used by the console demo's
//! `record`/`play` commands and the standalone `tips-bag` tool.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const MAGIC: [u8; 4] = *b"TBAG";
const VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u16,
    created_at_unix_micros: u64,
    buffer_width: u32,
}

/// One recorded `{relative_timestamp, tag, msg_len, att_len, msg_bytes,
/// att_bytes}` entry (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub relative_timestamp: Duration,
    pub tag: u16,
    pub msg: Vec<u8>,
    pub attachment: Vec<u8>,
}

/// Appends frames to a bag file, stamping each with its offset from the
/// recorder's start time.
pub struct Writer<W: Write> {
    out: BufWriter<W>,
    start: std::time::Instant,
}

impl Writer<std::fs::File> {
    pub fn create(path: &std::path::Path, buffer_width: u32) -> io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Self::new(file, buffer_width)
    }
}

impl<W: Write> Writer<W> {
    pub fn new(w: W, buffer_width: u32) -> io::Result<Self> {
        let mut out = BufWriter::new(w);
        let header = Header {
            magic: MAGIC,
            version: VERSION,
            created_at_unix_micros: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as u64,
            buffer_width,
        };
        write_framed(&mut out, &header)?;
        Ok(Self { out, start: std::time::Instant::now() })
    }

    /// Records one message, timestamped relative to [`Writer::new`].
    pub fn record(&mut self, tag: u16, msg: &[u8], attachment: &[u8]) -> io::Result<()> {
        let frame = Frame { relative_timestamp: self.start.elapsed(), tag, msg: msg.to_vec(), attachment: attachment.to_vec() };
        write_framed(&mut self.out, &frame)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Reads a bag file's frames back sequentially (spec.md §6: "no random
/// access").
pub struct Reader<R: Read> {
    input: BufReader<R>,
    pub buffer_width: u32,
}

impl Reader<std::fs::File> {
    pub fn open(path: &std::path::Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::new(file)
    }
}

impl<R: Read> Reader<R> {
    pub fn new(r: R) -> io::Result<Self> {
        let mut input = BufReader::new(r);
        let header: Header = read_framed(&mut input)?;
        if header.magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a TIPS bag file"));
        }
        if header.version != VERSION {
            return Err(io::Error::new(io::ErrorKind::InvalidData, format!("unsupported bag version {}", header.version)));
        }
        Ok(Self { input, buffer_width: header.buffer_width })
    }

    /// Returns the next frame, or `None` at end of file.
    pub fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        match read_framed::<Frame, _>(&mut self.input) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Frame-on-disk shape: `u32 len || u32 crc32(payload) || payload`
/// (bincode-serialized `T`). The checksum lets a reader fail fast on a
/// truncated/corrupted recording instead of silently misparsing the next
/// frame.
fn write_framed<T: Serialize, W: Write>(w: &mut W, value: &T) -> io::Result<()> {
    let payload = bincode::serialize(value).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let crc = crc32fast::hash(&payload);
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&crc.to_le_bytes())?;
    w.write_all(&payload)?;
    Ok(())
}

fn read_framed<T: for<'de> Deserialize<'de>, R: Read>(r: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut crc_buf = [0u8; 4];
    r.read_exact(&mut crc_buf)?;
    let expected_crc = u32::from_le_bytes(crc_buf);
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    let actual_crc = crc32fast::hash(&payload);
    if actual_crc != expected_crc {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bag frame checksum mismatch"));
    }
    bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_frames_in_order() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, 256).unwrap();
            w.record(1001, b"hello", &[]).unwrap();
            w.record(1002, b"world", b"attachment-bytes").unwrap();
            w.flush().unwrap();
        }

        let mut r = Reader::new(buf.as_slice()).unwrap();
        assert_eq!(r.buffer_width, 256);
        let f1 = r.next_frame().unwrap().unwrap();
        assert_eq!(f1.tag, 1001);
        assert_eq!(f1.msg, b"hello");
        let f2 = r.next_frame().unwrap().unwrap();
        assert_eq!(f2.tag, 1002);
        assert_eq!(f2.attachment, b"attachment-bytes");
        assert!(r.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_truncated_file() {
        let mut buf = Vec::new();
        {
            let mut w = Writer::new(&mut buf, 64).unwrap();
            w.record(1, b"x", &[]).unwrap();
            w.flush().unwrap();
        }
        buf.truncate(buf.len() - 2);
        let mut r = Reader::new(buf.as_slice()).unwrap();
        assert!(r.next_frame().is_err());
    }
}
