//! Decoded flow records.

use std::net::IpAddr;
use std::sync::Arc;

/// One decoded netflow summary record.
///
/// Timestamps are milliseconds since the Unix epoch (UTC). `flowsrc` is not
/// part of the capture file; it is injected by the decoder from the exporter
/// name the file was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecord {
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub router_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub tcp_flags: u8,
    pub direction: u8,
    pub in_packets: u64,
    pub in_bytes: u64,
    pub out_packets: u64,
    pub out_bytes: u64,
    pub exporter_id: u16,
    pub flowsrc: Arc<str>,
}

impl FlowRecord {
    /// Flow duration in seconds, as nfdump reports it in its `td` column.
    pub fn duration_secs(&self) -> f64 {
        self.last_seen_ms.saturating_sub(self.first_seen_ms) as f64 / 1000.0
    }

    pub fn is_ipv6(&self) -> bool {
        self.src_addr.is_ipv6()
    }
}

/// Protocol name in nfdump's text output style.
pub fn protocol_name(protocol: u8) -> String {
    match protocol {
        1 => "ICMP".to_string(),
        2 => "IGMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        47 => "GRE".to_string(),
        50 => "ESP".to_string(),
        51 => "AH".to_string(),
        58 => "ICMP6".to_string(),
        132 => "SCTP".to_string(),
        other => other.to_string(),
    }
}

/// TCP flags rendered like nfdump: `CEUAPRSF`, with `.` for unset bits.
pub fn tcp_flags_string(flags: u8) -> String {
    const NAMES: [char; 8] = ['C', 'E', 'U', 'A', 'P', 'R', 'S', 'F'];
    NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| {
            if flags & (0x80 >> i) != 0 {
                *name
            } else {
                '.'
            }
        })
        .collect()
}
