// Convert flow records to an Arrow RecordBatch
//
// One builder per column, filled in record order so row N of the batch is
// record N of the input slice.

use arrow::array::{
    ArrayRef, Float64Builder, RecordBatch, StringBuilder, TimestampMillisecondBuilder,
    UInt16Builder, UInt64Builder, UInt8Builder,
};
use arrow::error::ArrowError;
use std::sync::Arc;

use crate::partition::clamp_timestamp_ms;
use crate::record::{protocol_name, tcp_flags_string, FlowRecord};
use crate::schema::flow_schema_arc;

/// Converts flow records into Arrow columns
pub struct FlowBatchBuilder {
    ts: TimestampMillisecondBuilder,
    te: TimestampMillisecondBuilder,
    td: Float64Builder,
    sa: StringBuilder,
    da: StringBuilder,
    sp: UInt16Builder,
    dp: UInt16Builder,
    pr: StringBuilder,
    flg: StringBuilder,
    ipkt: UInt64Builder,
    ibyt: UInt64Builder,
    opkt: UInt64Builder,
    obyt: UInt64Builder,
    dir: UInt8Builder,
    ra: StringBuilder,
    exid: UInt16Builder,
    flowsrc: StringBuilder,
}

impl FlowBatchBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ts: TimestampMillisecondBuilder::with_capacity(capacity).with_timezone("UTC"),
            te: TimestampMillisecondBuilder::with_capacity(capacity).with_timezone("UTC"),
            td: Float64Builder::with_capacity(capacity),
            sa: StringBuilder::with_capacity(capacity, capacity * 16),
            da: StringBuilder::with_capacity(capacity, capacity * 16),
            sp: UInt16Builder::with_capacity(capacity),
            dp: UInt16Builder::with_capacity(capacity),
            pr: StringBuilder::with_capacity(capacity, capacity * 4),
            flg: StringBuilder::with_capacity(capacity, capacity * 8),
            ipkt: UInt64Builder::with_capacity(capacity),
            ibyt: UInt64Builder::with_capacity(capacity),
            opkt: UInt64Builder::with_capacity(capacity),
            obyt: UInt64Builder::with_capacity(capacity),
            dir: UInt8Builder::with_capacity(capacity),
            ra: StringBuilder::with_capacity(capacity, capacity * 16),
            exid: UInt16Builder::with_capacity(capacity),
            flowsrc: StringBuilder::with_capacity(capacity, capacity * 8),
        }
    }

    pub fn append(&mut self, record: &FlowRecord) {
        self.ts.append_value(clamp_timestamp_ms(record.first_seen_ms));
        self.te.append_value(clamp_timestamp_ms(record.last_seen_ms));
        self.td.append_value(record.duration_secs());
        self.sa.append_value(record.src_addr.to_string());
        self.da.append_value(record.dst_addr.to_string());
        self.sp.append_value(record.src_port);
        self.dp.append_value(record.dst_port);
        self.pr.append_value(protocol_name(record.protocol));
        self.flg.append_value(tcp_flags_string(record.tcp_flags));
        self.ipkt.append_value(record.in_packets);
        self.ibyt.append_value(record.in_bytes);
        self.opkt.append_value(record.out_packets);
        self.obyt.append_value(record.out_bytes);
        self.dir.append_value(record.direction);
        self.ra.append_value(record.router_addr.to_string());
        self.exid.append_value(record.exporter_id);
        self.flowsrc.append_value(&*record.flowsrc);
    }

    pub fn finish(mut self) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(self.ts.finish()),
            Arc::new(self.te.finish()),
            Arc::new(self.td.finish()),
            Arc::new(self.sa.finish()),
            Arc::new(self.da.finish()),
            Arc::new(self.sp.finish()),
            Arc::new(self.dp.finish()),
            Arc::new(self.pr.finish()),
            Arc::new(self.flg.finish()),
            Arc::new(self.ipkt.finish()),
            Arc::new(self.ibyt.finish()),
            Arc::new(self.opkt.finish()),
            Arc::new(self.obyt.finish()),
            Arc::new(self.dir.finish()),
            Arc::new(self.ra.finish()),
            Arc::new(self.exid.finish()),
            Arc::new(self.flowsrc.finish()),
        ];

        RecordBatch::try_new(flow_schema_arc(), columns)
    }
}

/// Build a RecordBatch from a slice of records.
pub fn records_to_batch(records: &[FlowRecord]) -> Result<RecordBatch, ArrowError> {
    let mut builder = FlowBatchBuilder::with_capacity(records.len());
    for record in records {
        builder.append(record);
    }
    builder.finish()
}
