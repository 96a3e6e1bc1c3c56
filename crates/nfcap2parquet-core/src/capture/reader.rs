// Streaming capture decoder
//
// Pulls one record at a time from any byte source and yields one FlowRecord
// per flow record. Only the current record body is buffered, so memory does
// not grow with the file. Decoding can resume from any record boundary
// previously reported via `offset()`.

use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use super::{
    le_u16, le_u64, FileHeader, FLOW_FIXED_SIZE, FLOW_V4_RECORD_SIZE, FLOW_V6_RECORD_SIZE,
    HEADER_SIZE, RECORD_HEADER_SIZE, RECORD_TYPE_FLOW_V4, RECORD_TYPE_FLOW_V6,
};
use crate::error::DecodeError;
use crate::record::FlowRecord;

/// Lazy, finite decoder over one capture file.
///
/// Wrap files in a `BufReader`; the decoder issues one small read per
/// record header and one per body.
pub struct CaptureReader<R> {
    inner: R,
    offset: u64,
    header: FileHeader,
    flowsrc: Arc<str>,
    body: Vec<u8>,
    finished: bool,
}

impl<R: Read> CaptureReader<R> {
    /// Read the header and start at the first record.
    pub fn new(mut inner: R, flowsrc: Arc<str>) -> Result<Self, DecodeError> {
        let mut raw = [0u8; HEADER_SIZE];
        let got = read_full(&mut inner, &mut raw)?;
        let header = FileHeader::parse(&raw[..got])?;

        Ok(Self {
            inner,
            offset: HEADER_SIZE as u64,
            header,
            flowsrc,
            body: Vec::with_capacity(FLOW_V6_RECORD_SIZE),
            finished: false,
        })
    }
}

impl<R: Read + Seek> CaptureReader<R> {
    /// Start decoding at `offset`, a record boundary reported by a previous reader.
    ///
    /// Offsets inside the header are treated as "from the beginning".
    pub fn resume(inner: R, flowsrc: Arc<str>, offset: u64) -> Result<Self, DecodeError> {
        let mut reader = Self::new(inner, flowsrc)?;
        if offset <= reader.offset {
            return Ok(reader);
        }

        let len = reader.inner.seek(SeekFrom::End(0))?;
        if offset > len {
            return Err(DecodeError::CorruptRecord {
                offset,
                reason: format!("resume offset beyond end of file ({} bytes)", len),
            });
        }
        reader.inner.seek(SeekFrom::Start(offset))?;
        reader.offset = offset;
        Ok(reader)
    }
}

impl<R> CaptureReader<R> {
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Byte offset just past the last complete record consumed.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fail(&mut self, err: DecodeError) -> Option<Result<FlowRecord, DecodeError>> {
        self.finished = true;
        Some(Err(err))
    }

    fn truncated(&mut self, available: usize, needed: usize) -> Option<Result<FlowRecord, DecodeError>> {
        let offset = self.offset;
        self.fail(DecodeError::TruncatedRecord {
            offset,
            available,
            needed,
        })
    }
}

impl<R: Read> Iterator for CaptureReader<R> {
    type Item = Result<FlowRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            let mut head = [0u8; RECORD_HEADER_SIZE];
            let got = match read_full(&mut self.inner, &mut head) {
                Ok(got) => got,
                Err(e) => return self.fail(e.into()),
            };
            if got == 0 {
                self.finished = true;
                return None;
            }
            if got < RECORD_HEADER_SIZE {
                return self.truncated(got, RECORD_HEADER_SIZE);
            }

            let record_type = le_u16(&head, 0);
            let size = le_u16(&head, 2) as usize;

            if size < RECORD_HEADER_SIZE {
                let err = DecodeError::CorruptRecord {
                    offset: self.offset,
                    reason: format!("record size {} smaller than record header", size),
                };
                return self.fail(err);
            }

            let ipv6 = match record_type {
                RECORD_TYPE_FLOW_V4 => Some((false, FLOW_V4_RECORD_SIZE)),
                RECORD_TYPE_FLOW_V6 => Some((true, FLOW_V6_RECORD_SIZE)),
                _ => None,
            };
            let body_len = size - RECORD_HEADER_SIZE;

            let Some((ipv6, expected)) = ipv6 else {
                let skipped = match io::copy(
                    &mut (&mut self.inner).take(body_len as u64),
                    &mut io::sink(),
                ) {
                    Ok(n) => n as usize,
                    Err(e) => return self.fail(e.into()),
                };
                if skipped < body_len {
                    return self.truncated(RECORD_HEADER_SIZE + skipped, size);
                }
                self.offset += size as u64;
                tracing::trace!(record_type, size, "skipping non-flow record");
                continue;
            };

            if size != expected {
                let err = DecodeError::CorruptRecord {
                    offset: self.offset,
                    reason: format!(
                        "flow record type {} has size {}, expected {}",
                        record_type, size, expected
                    ),
                };
                return self.fail(err);
            }

            self.body.resize(body_len, 0);
            let got = match read_full(&mut self.inner, &mut self.body) {
                Ok(got) => got,
                Err(e) => return self.fail(e.into()),
            };
            if got < body_len {
                return self.truncated(RECORD_HEADER_SIZE + got, size);
            }

            self.offset += size as u64;
            return Some(Ok(parse_flow(&self.body, ipv6, &self.flowsrc)));
        }
    }
}

/// Fill `buf` unless the stream ends first. Returns the bytes read.
fn read_full<R: Read + ?Sized>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn parse_flow(body: &[u8], ipv6: bool, flowsrc: &Arc<str>) -> FlowRecord {
    let addr_size = if ipv6 { 16 } else { 4 };
    let addr_at = |index: usize| read_addr(body, FLOW_FIXED_SIZE + index * addr_size, ipv6);

    FlowRecord {
        first_seen_ms: le_u64(body, 0),
        last_seen_ms: le_u64(body, 8),
        src_port: le_u16(body, 16),
        dst_port: le_u16(body, 18),
        protocol: body[20],
        tcp_flags: body[21],
        direction: body[22],
        in_packets: le_u64(body, 24),
        in_bytes: le_u64(body, 32),
        out_packets: le_u64(body, 40),
        out_bytes: le_u64(body, 48),
        exporter_id: le_u16(body, 56),
        router_addr: addr_at(0),
        src_addr: addr_at(1),
        dst_addr: addr_at(2),
        flowsrc: Arc::clone(flowsrc),
    }
}

fn read_addr(body: &[u8], at: usize, ipv6: bool) -> IpAddr {
    if ipv6 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&body[at..at + 16]);
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&body[at..at + 4]);
        IpAddr::V4(Ipv4Addr::from(octets))
    }
}
