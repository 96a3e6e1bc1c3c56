use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;

pub const DEFAULT_ROW_GROUP_SIZE: usize = 128 * 1024;

/// Rows per row group for every file this process writes
static ROW_GROUP_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_ROW_GROUP_SIZE);

/// Change the row group size used from now on. Zero is ignored.
pub fn set_parquet_row_group_size(rows: usize) {
    if rows > 0 {
        ROW_GROUP_SIZE.store(rows, Ordering::Relaxed);
    }
}

/// Writer properties for the current row group size
///
/// - ZSTD level 2
/// - Dictionary encoding enabled (addresses and protocol names repeat a lot)
/// - Page level statistics
/// - Converter version embedded in file metadata
pub fn writer_properties() -> WriterProperties {
    properties_for(ROW_GROUP_SIZE.load(Ordering::Relaxed))
}

fn properties_for(row_group_size: usize) -> WriterProperties {
    let metadata = vec![
        KeyValue {
            key: "nfcap2parquet.version".to_string(),
            value: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
        KeyValue {
            key: "schema.source".to_string(),
            value: Some("nfdump csv columns".to_string()),
        },
    ];
    let zstd = ZstdLevel::try_new(2).unwrap_or_default();

    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(Compression::ZSTD(zstd))
        .set_data_page_size_limit(256 * 1024)
        .set_write_batch_size(32 * 1024)
        .set_max_row_group_size(row_group_size)
        .set_dictionary_page_size_limit(128 * 1024)
        .set_key_value_metadata(Some(metadata))
        .build()
}

/// Result of encoding Arrow record batches into Parquet bytes.
pub struct EncodedParquet {
    pub bytes: Vec<u8>,
    /// blake3 of `bytes`
    pub hash: blake3::Hash,
    pub schema: SchemaRef,
    pub row_count: usize,
}

/// Encode one or more record batches into Parquet bytes.
///
/// `extra_metadata` is appended to the file footer after the shared key/value
/// metadata from [`writer_properties`].
pub fn encode_record_batches(
    batches: &[RecordBatch],
    properties: &WriterProperties,
    extra_metadata: &[(&str, String)],
) -> Result<EncodedParquet, ParquetError> {
    let Some(first) = batches.first() else {
        return Err(ParquetError::General(
            "cannot encode empty batch list".to_string(),
        ));
    };

    let mut bytes = Vec::new();
    let schema: SchemaRef = first.schema();
    let mut row_count = 0usize;

    {
        let mut writer = ArrowWriter::try_new(&mut bytes, schema.clone(), Some(properties.clone()))?;

        for batch in batches {
            if batch.schema() != schema {
                return Err(ParquetError::General(
                    "all batches must share the same schema".to_string(),
                ));
            }
            writer.write(batch)?;
            row_count += batch.num_rows();
        }

        for (key, value) in extra_metadata {
            writer.append_key_value_metadata(KeyValue::new(key.to_string(), value.clone()));
        }

        writer.close()?;
    }

    let hash = blake3::hash(&bytes);

    Ok(EncodedParquet {
        bytes,
        hash,
        schema,
        row_count,
    })
}

/// Encode a single batch with the shared writer properties.
pub fn encode_batch(
    batch: &RecordBatch,
    extra_metadata: &[(&str, String)],
) -> Result<EncodedParquet, ParquetError> {
    encode_record_batches(
        std::slice::from_ref(batch),
        &writer_properties(),
        extra_metadata,
    )
}
