// nfcap2parquet-core - Platform-agnostic core logic
//
// This crate contains the PURE processing logic for turning netflow capture
// files into Parquet: capture decoding, partition assignment, Arrow
// conversion and Parquet encoding. No directory watching, no async.

pub mod capture;
pub mod error;
pub mod parquet;
pub mod partition;
pub mod record;
pub mod schema;
pub mod to_arrow;

// Re-export commonly used types
pub use capture::{
    decode_file, encode_records, CaptureReader, CaptureWriter, DecodedCapture, FileHeader,
};
pub use error::DecodeError;
pub use partition::{resolve, PartitionKey};
pub use crate::parquet::{
    encode_batch, set_parquet_row_group_size, writer_properties, EncodedParquet,
    DEFAULT_ROW_GROUP_SIZE,
};
pub use record::FlowRecord;
pub use schema::flow_schema_arc;
pub use to_arrow::records_to_batch;
