// Parquet encoding
//
// Turns Arrow RecordBatches into Parquet bytes in memory. Putting those bytes
// on disk atomically is the writer crate's job.

pub mod writer;

pub use writer::{
    encode_batch, encode_record_batches, set_parquet_row_group_size, writer_properties,
    EncodedParquet, DEFAULT_ROW_GROUP_SIZE,
};
