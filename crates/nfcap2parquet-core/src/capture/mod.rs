// Capture file format
//
// A capture file is a fixed 140-byte header followed by length-prefixed
// records. All integers are little-endian, addresses are in network order.
//
//   header:  magic u16 | version u16 | flags u32 | record_count u32 | ident [u8; 128]
//   record:  type u16 | size u16 | body[size - 4]
//
// Record types 1 (IPv4 flow) and 2 (IPv6 flow) carry flows; anything else is
// skipped by size so newer exporters can add record types.

mod reader;
mod writer;

pub use reader::CaptureReader;
pub use writer::{encode_records, CaptureWriter};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::record::FlowRecord;

pub const MAGIC: u16 = 0xA50C;
pub const LAYOUT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 140;
pub const IDENT_SIZE: usize = 128;
pub const RECORD_HEADER_SIZE: usize = 4;

/// Header flag: block compression (not supported by this decoder)
pub const FLAG_COMPRESSED: u32 = 0x1;

pub const RECORD_TYPE_FLOW_V4: u16 = 1;
pub const RECORD_TYPE_FLOW_V6: u16 = 2;

/// Fixed part of a flow body, before the three addresses.
pub(crate) const FLOW_FIXED_SIZE: usize = 60;
pub const FLOW_V4_RECORD_SIZE: usize = RECORD_HEADER_SIZE + FLOW_FIXED_SIZE + 3 * 4;
pub const FLOW_V6_RECORD_SIZE: usize = RECORD_HEADER_SIZE + FLOW_FIXED_SIZE + 3 * 16;

/// Parsed capture file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    pub flags: u32,
    /// Record count declared by the exporter, 0 when unknown. Informational only.
    pub record_count: u32,
    pub ident: String,
}

impl FileHeader {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::CorruptHeader {
                reason: format!(
                    "header needs {} bytes, file has {}",
                    HEADER_SIZE,
                    data.len()
                ),
            });
        }

        let magic = le_u16(data, 0);
        if magic != MAGIC {
            return Err(DecodeError::CorruptHeader {
                reason: format!("bad magic 0x{:04X}", magic),
            });
        }

        let version = le_u16(data, 2);
        if version != LAYOUT_VERSION {
            return Err(DecodeError::CorruptHeader {
                reason: format!("unsupported layout version {}", version),
            });
        }

        let flags = le_u32(data, 4);
        if flags & FLAG_COMPRESSED != 0 {
            return Err(DecodeError::CorruptHeader {
                reason: "compressed capture files are not supported".to_string(),
            });
        }

        let ident_bytes = &data[12..12 + IDENT_SIZE];
        let ident_len = ident_bytes
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(IDENT_SIZE);
        let ident = String::from_utf8_lossy(&ident_bytes[..ident_len]).into_owned();

        Ok(Self {
            version,
            flags,
            record_count: le_u32(data, 8),
            ident,
        })
    }
}

/// Records decoded from one capture file in a single pass.
#[derive(Debug)]
pub struct DecodedCapture {
    pub header: FileHeader,
    pub records: Vec<FlowRecord>,
    /// Offset decoding started from
    pub start_offset: u64,
    /// Offset just past the last complete record
    pub end_offset: u64,
    /// Total bytes in the file at read time
    pub file_len: u64,
    /// Set when the final record was cut short
    pub truncated: bool,
}

impl DecodedCapture {
    pub fn is_complete(&self) -> bool {
        !self.truncated && self.end_offset == self.file_len
    }
}

/// Decode every complete record of a capture file from `offset` onwards.
///
/// The file is streamed; only the decoded records are kept. Truncation is
/// reported through [`DecodedCapture::truncated`]; terminal decode errors
/// are returned as `Err`.
pub fn decode_file(
    path: impl AsRef<Path>,
    flowsrc: &str,
    offset: u64,
) -> Result<DecodedCapture, DecodeError> {
    let file = File::open(path.as_ref())?;
    let file_len = file.metadata()?.len();
    let mut reader = CaptureReader::resume(BufReader::new(file), Arc::from(flowsrc), offset)?;
    let start_offset = reader.offset();
    let mut records = Vec::new();
    let mut truncated = false;

    for item in reader.by_ref() {
        match item {
            Ok(record) => records.push(record),
            Err(DecodeError::TruncatedRecord { .. }) => {
                truncated = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(DecodedCapture {
        header: reader.header().clone(),
        records,
        start_offset,
        end_offset: reader.offset(),
        file_len,
        truncated,
    })
}

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    let mut bytes = [0u8; 2];
    bytes.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(bytes)
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
