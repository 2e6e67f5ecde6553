//! Domain JSON configuration (SPEC_FULL.md §13, spec.md §6): a root object
//! with optional `global`/`tx`/`rx` sections. Any key a section omits falls
//! back to that section's built-in default; sections themselves are
//! optional and default entirely. Unknown keys anywhere are rejected
//! (spec.md §7 "Configuration error").

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tips_ctx::SchedPolicy;
use tips_ipc::Ownership;
use tips_net::{RecvConfig, SendConfig};

use crate::error::{DomainError, Result};

const GLOBAL_KEYS: &[&str] = &["ifaceAddr", "mtu", "schedPolicy", "schedPriority", "loopback", "ipcTransportOwnership"];

#[derive(Debug, Clone)]
pub struct GlobalConfig {
    pub iface_addr: Ipv4Addr,
    pub mtu: usize,
    pub sched_policy: SchedPolicy,
    pub sched_priority: i32,
    pub loopback: bool,
    pub ipc_transport_ownership: Ownership,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            iface_addr: Ipv4Addr::UNSPECIFIED,
            mtu: 1500,
            sched_policy: SchedPolicy::Other,
            sched_priority: 0,
            loopback: false,
            ipc_transport_ownership: Ownership::Auto,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DomainConfig {
    pub global: GlobalConfig,
    pub tx: SendConfig,
    pub rx: RecvConfig,
}

/// Parses the Domain's configuration object. `None`/absent sections take
/// every field from their defaults; keys present but not recognized by
/// spec.md §6 fail construction rather than being silently ignored.
pub fn parse(value: &Value) -> Result<DomainConfig> {
    let obj = value.as_object().ok_or_else(|| DomainError::Configuration("root configuration must be a JSON object".into()))?;

    for key in obj.keys() {
        if !["global", "tx", "rx"].contains(&key.as_str()) {
            return Err(DomainError::Configuration(format!("unrecognized top-level section '{key}'")));
        }
    }

    let global = match obj.get("global") {
        Some(v) => parse_global(v)?,
        None => GlobalConfig::default(),
    };
    let tx = match obj.get("tx") {
        Some(v) => parse_tx(v)?,
        None => SendConfig::default(),
    };
    let rx = match obj.get("rx") {
        Some(v) => parse_rx(v)?,
        None => RecvConfig::default(),
    };

    Ok(DomainConfig { global, tx, rx })
}

fn parse_global(value: &Value) -> Result<GlobalConfig> {
    let obj = value.as_object().ok_or_else(|| DomainError::Configuration("'global' must be an object".into()))?;
    tips_net::reject_unknown_keys(obj, GLOBAL_KEYS).map_err(|e| DomainError::Configuration(e.to_string()))?;

    let mut cfg = GlobalConfig::default();
    if let Some(v) = obj.get("ifaceAddr").and_then(Value::as_str) {
        cfg.iface_addr = Ipv4Addr::from_str(v).map_err(|_| DomainError::Configuration(format!("invalid ifaceAddr '{v}'")))?;
    }
    if let Some(v) = obj.get("mtu").and_then(Value::as_u64) {
        cfg.mtu = v as usize;
    }
    if let Some(v) = obj.get("schedPolicy").and_then(Value::as_str) {
        cfg.sched_policy = SchedPolicy::parse(v).ok_or_else(|| DomainError::Configuration(format!("invalid schedPolicy '{v}'")))?;
    }
    if let Some(v) = obj.get("schedPriority").and_then(Value::as_i64) {
        cfg.sched_priority = v as i32;
    }
    if let Some(v) = obj.get("loopback").and_then(Value::as_bool) {
        cfg.loopback = v;
    }
    if let Some(v) = obj.get("ipcTransportOwnership").and_then(Value::as_str) {
        cfg.ipc_transport_ownership = match v {
            "own" => Ownership::Own,
            "attach" => Ownership::Attach,
            "auto" => Ownership::Auto,
            other => return Err(DomainError::Configuration(format!("invalid ipcTransportOwnership '{other}'"))),
        };
    }
    Ok(cfg)
}

fn parse_tx(value: &Value) -> Result<SendConfig> {
    let obj = value.as_object().ok_or_else(|| DomainError::Configuration("'tx' must be an object".into()))?;
    tips_net::reject_unknown_keys(obj, tips_net::send_known_keys()).map_err(|e| DomainError::Configuration(e.to_string()))?;

    let mut cfg = SendConfig::default();
    if let Some(v) = obj.get("outBufferSizePower2").and_then(Value::as_u64) {
        cfg.out_buffer_size_power2 = v as u8;
    }
    if let Some(v) = obj.get("maxSendBatch").and_then(Value::as_u64) {
        cfg.max_send_batch = v as usize;
    }
    if let Some(v) = obj.get("sendBytesPerSec").and_then(Value::as_u64) {
        cfg.send_bytes_per_sec = v;
    }
    if let Some(v) = obj.get("sendBytesBurst").and_then(Value::as_u64) {
        cfg.send_bytes_burst = v;
    }
    if let Some(v) = obj.get("ttl").and_then(Value::as_u64) {
        cfg.ttl = v as u32;
    }
    if let Some(v) = obj.get("typeTagAdvertisePeriodSeconds").and_then(Value::as_u64) {
        cfg.type_tag_advertise_period = Duration::from_secs(v);
    }
    if let Some(v) = obj.get("minRecvToStart").and_then(Value::as_u64) {
        cfg.min_recv_to_start = v as usize;
    }
    if let Some(v) = obj.get("waitForSlowReceivers").and_then(Value::as_bool) {
        cfg.wait_for_slow_receivers = v;
    }
    if let Some(v) = obj.get("replayHistoryForNewRecv").and_then(Value::as_bool) {
        cfg.replay_history_for_new_recv = v;
    }
    if let Some(v) = obj.get("netRoundtripLatencyMicrosec").and_then(Value::as_u64) {
        cfg.net_roundtrip_latency = Duration::from_micros(v);
    }
    if let Some(v) = obj.get("tcpPort").and_then(Value::as_u64) {
        cfg.tcp_port = v as u16;
    }
    if let Some(v) = obj.get("nagling").and_then(Value::as_bool) {
        cfg.nagling = v;
    }
    Ok(cfg)
}

fn parse_rx(value: &Value) -> Result<RecvConfig> {
    let obj = value.as_object().ok_or_else(|| DomainError::Configuration("'rx' must be an object".into()))?;
    tips_net::reject_unknown_keys(obj, tips_net::recv_known_keys()).map_err(|e| DomainError::Configuration(e.to_string()))?;

    let mut cfg = RecvConfig::default();
    if let Some(v) = obj.get("cmdBufferSizePower2").and_then(Value::as_u64) {
        cfg.cmd_buffer_size_power2 = v as u8;
    }
    if let Some(v) = obj.get("maxTcpReadBytes").and_then(Value::as_u64) {
        cfg.max_tcp_read_bytes = v as usize;
    }
    if let Some(v) = obj.get("allowRecvWithinProcess").and_then(Value::as_bool) {
        cfg.allow_recv_within_process = v;
    }
    if let Some(v) = obj.get("recvReportDelayMicrosec").and_then(Value::as_u64) {
        cfg.recv_report_delay = Duration::from_micros(v);
    }
    if let Some(v) = obj.get("udpRecvBufferBytes").and_then(Value::as_u64) {
        cfg.udp_recv_buffer_bytes = v as usize;
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_uses_all_defaults() {
        let cfg = parse(&json!({})).unwrap();
        assert_eq!(cfg.global.mtu, 1500);
        assert_eq!(cfg.tx.tcp_port, 0);
    }

    #[test]
    fn fallback_layering_overrides_only_named_keys() {
        let cfg = parse(&json!({"tx": {"tcpPort": 9100}})).unwrap();
        assert_eq!(cfg.tx.tcp_port, 9100);
        assert_eq!(cfg.tx.max_send_batch, SendConfig::default().max_send_batch);
    }

    #[test]
    fn unknown_top_level_section_is_rejected() {
        assert!(parse(&json!({"bogus": {}})).is_err());
    }

    #[test]
    fn unknown_key_within_a_section_is_rejected() {
        assert!(parse(&json!({"global": {"notAKey": 1}})).is_err());
    }
}
