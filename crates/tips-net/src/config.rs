//! Send/recv engine configuration (SPEC_FULL.md §13, spec.md §6 "External
//! interfaces"). Parsed from the `tx`/`rx` sections of the Domain's JSON
//! configuration object by the root `tips` crate; this crate only owns the
//! typed, validated shape and its defaults.

use std::time::Duration;

use crate::error::{NetError, Result};

#[derive(Debug, Clone)]
pub struct SendConfig {
    pub out_buffer_size_power2: u8,
    pub max_send_batch: usize,
    pub send_bytes_per_sec: u64,
    pub send_bytes_burst: u64,
    pub ttl: u32,
    pub type_tag_advertise_period: Duration,
    pub min_recv_to_start: usize,
    pub wait_for_slow_receivers: bool,
    pub replay_history_for_new_recv: bool,
    pub net_roundtrip_latency: Duration,
    pub tcp_port: u16,
    pub nagling: bool,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            out_buffer_size_power2: 16,
            max_send_batch: 64,
            send_bytes_per_sec: 0,
            send_bytes_burst: 0,
            ttl: 1,
            type_tag_advertise_period: Duration::from_secs(1),
            min_recv_to_start: 0,
            wait_for_slow_receivers: false,
            replay_history_for_new_recv: true,
            net_roundtrip_latency: Duration::from_millis(50),
            tcp_port: 0,
            nagling: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecvConfig {
    pub cmd_buffer_size_power2: u8,
    pub max_tcp_read_bytes: usize,
    pub allow_recv_within_process: bool,
    pub recv_report_delay: Duration,
    pub udp_recv_buffer_bytes: usize,
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            cmd_buffer_size_power2: 12,
            max_tcp_read_bytes: 64 * 1024,
            allow_recv_within_process: false,
            recv_report_delay: Duration::from_millis(100),
            udp_recv_buffer_bytes: 1 << 20,
        }
    }
}

const SEND_KEYS: &[&str] = &[
    "outBufferSizePower2",
    "maxSendBatch",
    "sendBytesPerSec",
    "sendBytesBurst",
    "ttl",
    "typeTagAdvertisePeriodSeconds",
    "minRecvToStart",
    "waitForSlowReceivers",
    "replayHistoryForNewRecv",
    "netRoundtripLatencyMicrosec",
    "tcpPort",
    "nagling",
];

const RECV_KEYS: &[&str] =
    &["cmdBufferSizePower2", "maxTcpReadBytes", "allowRecvWithinProcess", "recvReportDelayMicrosec", "udpRecvBufferBytes"];

/// Rejects a `tx`/`rx` JSON object containing any key not named in spec.md
/// §6 (spec.md §7 "Configuration error").
pub fn reject_unknown_keys(section: &serde_json::Map<String, serde_json::Value>, known: &[&str]) -> Result<()> {
    for key in section.keys() {
        if !known.contains(&key.as_str()) {
            return Err(NetError::UnknownConfigKey(key.clone()));
        }
    }
    Ok(())
}

pub fn send_known_keys() -> &'static [&'static str] {
    SEND_KEYS
}

pub fn recv_known_keys() -> &'static [&'static str] {
    RECV_KEYS
}
