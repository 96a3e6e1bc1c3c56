// Shared fixtures for the pipeline tests
#![allow(dead_code)]

use std::fs::File;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, StringArray};
use nfcap2parquet::watcher::DirectoryWatcher;
use nfcap2parquet_config::ExporterConfig;
use nfcap2parquet_core::{encode_records, FlowRecord};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::{FileReader, SerializedFileReader};
use tokio_util::sync::CancellationToken;

/// 2022-11-06T02:00:00Z
pub const HOUR_02: u64 = 1_667_700_000_000;
pub const HOUR_MS: u64 = 3_600_000;

pub fn flow(i: u64, first_seen_ms: u64) -> FlowRecord {
    FlowRecord {
        first_seen_ms,
        last_seen_ms: first_seen_ms + 1_500,
        src_addr: IpAddr::V4(Ipv4Addr::new(10, 1, (i / 250 % 250) as u8, (i % 250) as u8)),
        dst_addr: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        router_addr: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)),
        src_port: 1024 + (i % 50_000) as u16,
        dst_port: 443,
        protocol: 6,
        tcp_flags: 0x1b,
        direction: 0,
        in_packets: i + 1,
        in_bytes: (i + 1) * 100,
        out_packets: 1,
        out_bytes: 60,
        exporter_id: 1,
        flowsrc: Arc::from("from-file"),
    }
}

/// `count` flows spread evenly from 02:00 to 04:00.
pub fn two_hour_flows(count: u64) -> Vec<FlowRecord> {
    (0..count)
        .map(|i| flow(i, HOUR_02 + i * 2 * HOUR_MS / count))
        .collect()
}

pub fn write_capture(path: &Path, records: &[FlowRecord]) {
    std::fs::write(path, encode_records(records, "fixture")).unwrap();
}

/// Exporter that settles after one unchanged scan and retries writes at once.
pub fn exporter(name: &str, watchdir: &Path, outputdir: &Path) -> ExporterConfig {
    let mut config = ExporterConfig::new(name, watchdir, outputdir);
    config.stable_scans = 1;
    config.poll_interval = Duration::from_millis(10);
    config.write_backoff = Duration::ZERO;
    config
}

pub fn tick_n(watcher: &mut DirectoryWatcher, n: usize) {
    let cancel = CancellationToken::new();
    for _ in 0..n {
        watcher.tick(&cancel).unwrap();
    }
}

/// Every visible `.parquet` file below `dir`, sorted.
pub fn parquet_files(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else {
            continue;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|e| e == "parquet") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

pub fn row_count(path: &Path) -> u64 {
    let reader = SerializedFileReader::new(File::open(path).unwrap()).unwrap();
    reader.metadata().file_metadata().num_rows() as u64
}

pub fn total_rows(dir: &Path) -> u64 {
    parquet_files(dir).iter().map(|p| row_count(p)).sum()
}

/// Values of a string column across all row groups.
pub fn string_column(path: &Path, column: &str) -> Vec<String> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap();

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let array = batch
            .column_by_name(column)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        values.extend((0..array.len()).map(|i| array.value(i).to_string()));
    }
    values
}

/// Partition directory of a parquet file relative to `root`.
pub fn partition_of(root: &Path, file: &Path) -> String {
    file.parent()
        .unwrap()
        .strip_prefix(root)
        .unwrap()
        .to_string_lossy()
        .into_owned()
}
