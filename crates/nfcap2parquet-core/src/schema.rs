// Arrow schema for flow records
//
// Column names follow nfdump's CSV output so datasets written by earlier
// converters and by this one can be queried side by side.

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use std::sync::{Arc, OnceLock};

/// Column name constants
pub mod field {
    pub const TS: &str = "ts";
    pub const TE: &str = "te";
    pub const TD: &str = "td";
    pub const SA: &str = "sa";
    pub const DA: &str = "da";
    pub const SP: &str = "sp";
    pub const DP: &str = "dp";
    pub const PR: &str = "pr";
    pub const FLG: &str = "flg";
    pub const IPKT: &str = "ipkt";
    pub const IBYT: &str = "ibyt";
    pub const OPKT: &str = "opkt";
    pub const OBYT: &str = "obyt";
    pub const DIR: &str = "dir";
    pub const RA: &str = "ra";
    pub const EXID: &str = "exid";
    pub const FLOWSRC: &str = "flowsrc";
}

/// Returns a cached `Arc<Schema>` for flow records.
pub fn flow_schema_arc() -> Arc<Schema> {
    static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
    Arc::clone(SCHEMA.get_or_init(|| Arc::new(build_schema())))
}

fn build_schema() -> Schema {
    let timestamp = DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()));

    Schema::new(vec![
        Field::new(field::TS, timestamp.clone(), false),
        Field::new(field::TE, timestamp, false),
        Field::new(field::TD, DataType::Float64, false),
        Field::new(field::SA, DataType::Utf8, false),
        Field::new(field::DA, DataType::Utf8, false),
        Field::new(field::SP, DataType::UInt16, false),
        Field::new(field::DP, DataType::UInt16, false),
        Field::new(field::PR, DataType::Utf8, false),
        Field::new(field::FLG, DataType::Utf8, false),
        Field::new(field::IPKT, DataType::UInt64, false),
        Field::new(field::IBYT, DataType::UInt64, false),
        Field::new(field::OPKT, DataType::UInt64, false),
        Field::new(field::OBYT, DataType::UInt64, false),
        Field::new(field::DIR, DataType::UInt8, false),
        Field::new(field::RA, DataType::Utf8, false),
        Field::new(field::EXID, DataType::UInt16, false),
        Field::new(field::FLOWSRC, DataType::Utf8, false),
    ])
}
