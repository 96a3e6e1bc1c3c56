// Synthetic capture files for demos and load tests
//
// Output is a pure function of the arguments, so two runs with the same
// parameters produce byte-identical files.

use std::fs::File;
use std::io::BufWriter;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nfcap2parquet_core::{CaptureWriter, FlowRecord};

const PROTOCOLS: [u8; 4] = [6, 17, 1, 58];
const WELL_KNOWN_PORTS: [u16; 6] = [53, 80, 123, 443, 22, 8080];

/// Parameters for one synthetic file
#[derive(Debug, Clone)]
pub struct DemoSpec {
    pub ident: String,
    pub records: u64,
    pub start: DateTime<Utc>,
    /// Flow start times are spread evenly over this many minutes
    pub span_minutes: u64,
}

/// Build `workload.records` flows, first-seen times evenly spread over the span.
pub fn generate_records(workload: &DemoSpec) -> Vec<FlowRecord> {
    let flowsrc: Arc<str> = Arc::from(workload.ident.as_str());
    let start_ms = u64::try_from(workload.start.timestamp_millis()).unwrap_or(0);
    let span_ms = workload.span_minutes.saturating_mul(60_000);

    (0..workload.records)
        .map(|i| {
            let offset = if workload.records == 0 {
                0
            } else {
                (u128::from(span_ms) * u128::from(i) / u128::from(workload.records)) as u64
            };
            synthetic_flow(i, start_ms + offset, Arc::clone(&flowsrc))
        })
        .collect()
}

fn synthetic_flow(i: u64, first_seen_ms: u64, flowsrc: Arc<str>) -> FlowRecord {
    let protocol = PROTOCOLS[(i % PROTOCOLS.len() as u64) as usize];
    let host = (i % 250) as u8 + 1;
    let (src_addr, dst_addr) = if protocol == 58 {
        (
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 1, 0, 0, 0, u16::from(host))),
            IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 2, 0, 0, 0, 1)),
        )
    } else {
        (
            IpAddr::V4(Ipv4Addr::new(10, (i / 250 % 250) as u8, 0, host)),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, (i % 7) as u8 + 1)),
        )
    };
    let in_packets = i % 97 + 1;

    FlowRecord {
        first_seen_ms,
        last_seen_ms: first_seen_ms + (i % 30) * 1_000,
        src_addr,
        dst_addr,
        router_addr: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)),
        src_port: 1024 + (i % 60_000) as u16,
        dst_port: WELL_KNOWN_PORTS[(i % WELL_KNOWN_PORTS.len() as u64) as usize],
        protocol,
        tcp_flags: if protocol == 6 { 0x1b } else { 0 },
        direction: (i % 2) as u8,
        in_packets,
        in_bytes: in_packets * 576,
        out_packets: in_packets / 2,
        out_bytes: in_packets / 2 * 576,
        exporter_id: 1,
        flowsrc,
    }
}

/// Write a synthetic capture file. Returns the number of records written.
pub fn write_demo_file(path: &Path, workload: &DemoSpec) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;

    let mut writer = CaptureWriter::new(BufWriter::new(file), &workload.ident)?;
    for record in generate_records(workload) {
        writer.write_record(&record)?;
    }
    let written = writer.records_written();
    let inner = writer.finish()?;
    inner
        .into_inner()
        .map_err(|e| e.into_error())?
        .sync_all()
        .with_context(|| format!("failed to sync {}", path.display()))?;

    Ok(written)
}
