//! Row batch accumulation.
//!
//! Decoded records are buffered per [`PartitionKey`] until either the row
//! ceiling is reached or the capture file they came from has been fully
//! decoded. The accumulator is owned by exactly one exporter's watcher, so it
//! takes `&mut self` everywhere and never locks.

use std::collections::BTreeMap;

use nfcap2parquet_core::{partition, FlowRecord, PartitionKey};

/// Default row ceiling per partition batch.
pub const DEFAULT_MAX_ROWS: usize = 250_000;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Rows a single partition may buffer before it is handed out early.
    pub max_rows: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
}

impl BatchConfig {
    pub fn with_max_rows(max_rows: usize) -> Self {
        Self { max_rows }
    }
}

/// Records sharing one partition key, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    pub key: PartitionKey,
    pub records: Vec<FlowRecord>,
    /// Unique per exporter, never reused across restarts once committed.
    pub sequence: u64,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
struct BufferedBatch {
    records: Vec<FlowRecord>,
}

impl BufferedBatch {
    fn should_flush(&self, cfg: &BatchConfig) -> bool {
        self.records.len() >= cfg.max_rows.max(1)
    }
}

/// Buffers records per partition and hands out [`RowBatch`]es.
#[derive(Debug)]
pub struct BatchAccumulator {
    config: BatchConfig,
    batches: BTreeMap<PartitionKey, BufferedBatch>,
    pending_rows: usize,
    next_sequence: u64,
}

impl BatchAccumulator {
    /// `next_sequence` is the first sequence number to hand out, normally
    /// loaded from the exporter's ledger.
    pub fn new(config: BatchConfig, next_sequence: u64) -> Self {
        Self {
            config,
            batches: BTreeMap::new(),
            pending_rows: 0,
            next_sequence,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Append a record to its partition's batch.
    ///
    /// Returns the full batch when this record brought it to the row ceiling.
    pub fn add(&mut self, record: FlowRecord) -> Option<RowBatch> {
        let key = partition::resolve(&record);
        let batch = self.batches.entry(key.clone()).or_default();
        batch.records.push(record);
        self.pending_rows += 1;

        if batch.should_flush(&self.config) {
            tracing::debug!(partition = %key, rows = batch.records.len(), "row ceiling reached");
            return self.flush(&key);
        }
        None
    }

    /// Remove and return the batch for `key`, if any rows are buffered.
    pub fn flush(&mut self, key: &PartitionKey) -> Option<RowBatch> {
        let batch = self.batches.remove(key)?;
        self.pending_rows -= batch.records.len();
        Some(self.hand_out(key.clone(), batch))
    }

    /// Drain every buffered batch in partition key order.
    pub fn flush_all(&mut self) -> Vec<RowBatch> {
        let batches = std::mem::take(&mut self.batches);
        self.pending_rows = 0;
        batches
            .into_iter()
            .map(|(key, batch)| self.hand_out(key, batch))
            .collect()
    }

    /// Drop everything buffered and restart numbering at `next_sequence`.
    ///
    /// Used when the batches handed out for a file were rolled back. Returns
    /// the number of buffered rows discarded.
    pub fn reset(&mut self, next_sequence: u64) -> usize {
        let dropped = self.pending_rows;
        self.batches.clear();
        self.pending_rows = 0;
        self.next_sequence = next_sequence;
        dropped
    }

    pub fn pending_rows(&self) -> usize {
        self.pending_rows
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Sequence number the next handed-out batch will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn hand_out(&mut self, key: PartitionKey, batch: BufferedBatch) -> RowBatch {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        RowBatch {
            key,
            records: batch.records,
            sequence,
        }
    }
}
