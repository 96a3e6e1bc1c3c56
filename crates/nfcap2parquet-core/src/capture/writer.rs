// Capture file encoder
//
// Produces files the reader accepts. Used to generate fixtures and demo data;
// exporters in production write these files themselves.

use std::io::{self, Write};
use std::net::IpAddr;

use super::{
    FLOW_V4_RECORD_SIZE, FLOW_V6_RECORD_SIZE, HEADER_SIZE, IDENT_SIZE, LAYOUT_VERSION, MAGIC,
    RECORD_TYPE_FLOW_V4, RECORD_TYPE_FLOW_V6,
};
use crate::record::FlowRecord;

/// Writes a capture header followed by flow records.
///
/// A record is written as IPv6 when any of its three addresses is IPv6; IPv4
/// addresses inside such a record are stored IPv4-mapped.
pub struct CaptureWriter<W: Write> {
    inner: W,
    records_written: u64,
}

impl<W: Write> CaptureWriter<W> {
    pub fn new(mut inner: W, ident: &str) -> io::Result<Self> {
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        header[2..4].copy_from_slice(&LAYOUT_VERSION.to_le_bytes());
        // flags and record_count stay zero: uncompressed, count unknown
        let ident = ident.as_bytes();
        let len = ident.len().min(IDENT_SIZE - 1);
        header[12..12 + len].copy_from_slice(&ident[..len]);
        inner.write_all(&header)?;

        Ok(Self {
            inner,
            records_written: 0,
        })
    }

    pub fn write_record(&mut self, record: &FlowRecord) -> io::Result<()> {
        let ipv6 = record.src_addr.is_ipv6()
            || record.dst_addr.is_ipv6()
            || record.router_addr.is_ipv6();
        let (record_type, size) = if ipv6 {
            (RECORD_TYPE_FLOW_V6, FLOW_V6_RECORD_SIZE)
        } else {
            (RECORD_TYPE_FLOW_V4, FLOW_V4_RECORD_SIZE)
        };

        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&record_type.to_le_bytes());
        buf.extend_from_slice(&(size as u16).to_le_bytes());
        buf.extend_from_slice(&record.first_seen_ms.to_le_bytes());
        buf.extend_from_slice(&record.last_seen_ms.to_le_bytes());
        buf.extend_from_slice(&record.src_port.to_le_bytes());
        buf.extend_from_slice(&record.dst_port.to_le_bytes());
        buf.push(record.protocol);
        buf.push(record.tcp_flags);
        buf.push(record.direction);
        buf.push(0);
        buf.extend_from_slice(&record.in_packets.to_le_bytes());
        buf.extend_from_slice(&record.in_bytes.to_le_bytes());
        buf.extend_from_slice(&record.out_packets.to_le_bytes());
        buf.extend_from_slice(&record.out_bytes.to_le_bytes());
        buf.extend_from_slice(&record.exporter_id.to_le_bytes());
        buf.extend_from_slice(&[0, 0]);
        for addr in [record.router_addr, record.src_addr, record.dst_addr] {
            push_addr(&mut buf, addr, ipv6);
        }
        debug_assert_eq!(buf.len(), size);

        self.inner.write_all(&buf)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn push_addr(buf: &mut Vec<u8>, addr: IpAddr, ipv6: bool) {
    match (addr, ipv6) {
        (IpAddr::V4(v4), false) => buf.extend_from_slice(&v4.octets()),
        (IpAddr::V4(v4), true) => buf.extend_from_slice(&v4.to_ipv6_mapped().octets()),
        (IpAddr::V6(v6), _) => buf.extend_from_slice(&v6.octets()),
    }
}

/// Encode a complete capture file in memory.
pub fn encode_records(records: &[FlowRecord], ident: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + records.len() * FLOW_V4_RECORD_SIZE);
    // Writing into a Vec cannot fail
    if let Ok(mut writer) = CaptureWriter::new(&mut buf, ident) {
        for record in records {
            let _ = writer.write_record(record);
        }
    }
    buf
}
