//! `TypeTagBackupSource` advertisement records (spec.md §4.8
//! "Advertisement", §6 tags 453/553): periodically multicast by a send
//! engine to announce its TCP recovery endpoint and the type tags it
//! currently carries subscribers for.

use std::net::{Ipv4Addr, SocketAddrV4};

use tips_types::Tag;

/// At most 64 tags per record (spec.md §4.8); a source with more splits
/// across multiple records sharing the same endpoint.
pub const MAX_TAGS_PER_RECORD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeTagBackupSource {
    pub source_ip: Ipv4Addr,
    pub source_pid: u32,
    pub tcp_port: u16,
    pub report_delay_micros: u32,
    pub tags: Vec<Tag>,
}

impl TypeTagBackupSource {
    pub fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.source_ip, self.tcp_port)
    }

    /// Splits `tags` into one or more records of at most
    /// [`MAX_TAGS_PER_RECORD`] each, all sharing the same endpoint.
    pub fn records_for(source_ip: Ipv4Addr, source_pid: u32, tcp_port: u16, report_delay_micros: u32, tags: &[Tag]) -> Vec<Self> {
        if tags.is_empty() {
            return vec![Self { source_ip, source_pid, tcp_port, report_delay_micros, tags: Vec::new() }];
        }
        tags.chunks(MAX_TAGS_PER_RECORD)
            .map(|chunk| Self { source_ip, source_pid, tcp_port, report_delay_micros, tags: chunk.to_vec() })
            .collect()
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + 2 + 4 + 2 + self.tags.len() * 2);
        buf.extend_from_slice(&self.source_ip.octets());
        buf.extend_from_slice(&self.source_pid.to_le_bytes());
        buf.extend_from_slice(&self.tcp_port.to_le_bytes());
        buf.extend_from_slice(&self.report_delay_micros.to_le_bytes());
        buf.extend_from_slice(&(self.tags.len() as u16).to_le_bytes());
        for t in &self.tags {
            buf.extend_from_slice(&t.to_le_bytes());
        }
        buf
    }

    pub fn from_wire(buf: &[u8]) -> Option<Self> {
        if buf.len() < 16 {
            return None;
        }
        let source_ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        let source_pid = u32::from_le_bytes(buf[4..8].try_into().ok()?);
        let tcp_port = u16::from_le_bytes(buf[8..10].try_into().ok()?);
        let report_delay_micros = u32::from_le_bytes(buf[10..14].try_into().ok()?);
        let count = u16::from_le_bytes(buf[14..16].try_into().ok()?) as usize;
        if buf.len() < 16 + count * 2 {
            return None;
        }
        let mut tags = Vec::with_capacity(count);
        for i in 0..count {
            let off = 16 + i * 2;
            tags.push(u16::from_le_bytes(buf[off..off + 2].try_into().ok()?));
        }
        Some(Self { source_ip, source_pid, tcp_port, report_delay_micros, tags })
    }

    /// `true` if this source is not itself (used for loopback suppression,
    /// spec.md §4.9 "Loopback suppression").
    pub fn is_self(&self, local_ip: Ipv4Addr, local_pid: u32) -> bool {
        self.source_ip == local_ip && self.source_pid == local_pid
    }

    pub fn intersects(&self, local_interests: &[Tag]) -> bool {
        self.tags.iter().any(|t| local_interests.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_over_wire() {
        let rec = TypeTagBackupSource {
            source_ip: Ipv4Addr::new(10, 0, 0, 5),
            source_pid: 4242,
            tcp_port: 9100,
            report_delay_micros: 5000,
            tags: vec![1000, 1001, 1002],
        };
        let wire = rec.to_wire();
        let back = TypeTagBackupSource::from_wire(&wire).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn splits_large_tag_sets_across_records() {
        let tags: Vec<Tag> = (1000..1200).collect();
        let recs = TypeTagBackupSource::records_for(Ipv4Addr::LOCALHOST, 1, 9000, 1000, &tags);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].tags.len(), MAX_TAGS_PER_RECORD);
        assert_eq!(recs[1].tags.len(), 200 - MAX_TAGS_PER_RECORD);
    }

    #[test]
    fn loopback_detection() {
        let rec = TypeTagBackupSource { source_ip: Ipv4Addr::LOCALHOST, source_pid: 77, tcp_port: 1, report_delay_micros: 0, tags: vec![] };
        assert!(rec.is_self(Ipv4Addr::LOCALHOST, 77));
        assert!(!rec.is_self(Ipv4Addr::LOCALHOST, 78));
    }
}
