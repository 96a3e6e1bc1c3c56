// End-to-end tests for one exporter's watcher
//
// Capture files in a temp watchdir -> DirectoryWatcher::tick -> Parquet tree

mod common;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::{Duration, SystemTime};

use arrow::array::Array;
use common::*;
use filetime::FileTime;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use nfcap2parquet::ledger::{Ledger, LEDGER_FILE_NAME};
use nfcap2parquet::watcher::{DirectoryWatcher, FileStage, WatcherError, QUARANTINE_DIR};
use nfcap2parquet_config::SourcePolicy;
use nfcap2parquet_core::capture::{FLOW_V4_RECORD_SIZE, HEADER_SIZE};
use nfcap2parquet_core::encode_records;
use tokio_util::sync::CancellationToken;

#[test]
fn test_ten_thousand_records_land_in_two_hour_partitions() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &two_hour_flows(10_000));

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();

    // First scan only detects the file
    tick_n(&mut watcher, 1);
    assert!(parquet_files(out.path()).is_empty());
    assert_eq!(
        watcher.file_state(&source).map(|s| s.stage),
        Some(FileStage::Detected)
    );

    tick_n(&mut watcher, 1);
    let files = parquet_files(out.path());
    assert_eq!(files.len(), 2);
    assert_eq!(
        partition_of(out.path(), &files[0]),
        "router1/date=2022-11-06/hour=02"
    );
    assert_eq!(
        partition_of(out.path(), &files[1]),
        "router1/date=2022-11-06/hour=03"
    );
    assert_eq!(row_count(&files[0]) + row_count(&files[1]), 10_000);

    // flowsrc is the exporter name, not the header ident
    assert!(string_column(&files[0], "flowsrc")
        .iter()
        .all(|v| v == "router1"));

    // Source consumed and forgotten
    assert!(!source.exists());
    assert!(watcher.file_state(&source).is_none());
    assert!(watcher.ledger().state().files.is_empty());
    assert!(watcher.ledger().pending().is_none());

    let stats = watcher.stats();
    assert_eq!(stats.files_consumed, 1);
    assert_eq!(stats.files_written, 2);
    assert_eq!(stats.rows_written, 10_000);
}

#[test]
fn test_row_ceiling_splits_partition() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..25).map(|i| flow(i, HOUR_02 + i)).collect();
    write_capture(&watch.path().join("nfcapd.202211060200"), &records);

    let mut config = exporter("router1", watch.path(), out.path());
    config.max_batch_rows = 10;
    let mut watcher = DirectoryWatcher::new(config).unwrap();
    tick_n(&mut watcher, 2);

    let files = parquet_files(out.path());
    let rows: Vec<_> = files.iter().map(|f| row_count(f)).collect();
    assert_eq!(rows, vec![10, 10, 5]);
    // Sequence numbers never repeat within the exporter
    let names: std::collections::HashSet<_> = files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy()[21..].to_string())
        .collect();
    assert_eq!(names.len(), 3);
}

#[test]
fn test_growing_file_is_never_processed() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &[flow(0, HOUR_02)]);

    let mut config = exporter("router1", watch.path(), out.path());
    config.stable_scans = 2;
    let mut watcher = DirectoryWatcher::new(config).unwrap();

    let extra = encode_records(&[flow(1, HOUR_02 + 1)], "fixture");
    for _ in 0..6 {
        tick_n(&mut watcher, 1);
        let mut file = OpenOptions::new().append(true).open(&source).unwrap();
        file.write_all(&extra[HEADER_SIZE..]).unwrap();
        assert_ne!(
            watcher.file_state(&source).unwrap().stage,
            FileStage::Stable
        );
    }
    assert!(parquet_files(out.path()).is_empty());

    // Writer stopped: change seen, then two unchanged scans
    tick_n(&mut watcher, 3);
    assert_eq!(total_rows(out.path()), 7);
    assert!(!source.exists());
}

#[test]
fn test_touched_file_is_not_stable() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &[flow(0, HOUR_02)]);

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 1);

    // Same size, newer mtime
    let later = SystemTime::now() + Duration::from_secs(60);
    filetime::set_file_mtime(&source, FileTime::from_system_time(later)).unwrap();
    tick_n(&mut watcher, 1);
    assert_eq!(
        watcher.file_state(&source).unwrap().stage,
        FileStage::Detected
    );
    assert!(parquet_files(out.path()).is_empty());

    tick_n(&mut watcher, 1);
    assert_eq!(total_rows(out.path()), 1);
}

#[test]
fn test_truncated_file_resumes_once_completed() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");

    let records: Vec<_> = (0..5).map(|i| flow(i, HOUR_02 + i)).collect();
    let full = encode_records(&records, "fixture");
    let cut = HEADER_SIZE + 3 * FLOW_V4_RECORD_SIZE + 20;
    std::fs::write(&source, &full[..cut]).unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 2);

    // The three complete records are already committed
    assert_eq!(total_rows(out.path()), 3);
    let state = watcher.file_state(&source).unwrap();
    assert_eq!(state.stage, FileStage::Detected);
    assert_eq!(state.truncation_retries, 1);
    assert_eq!(
        watcher
            .ledger()
            .committed_offset("nfcapd.202211060200"),
        (HEADER_SIZE + 3 * FLOW_V4_RECORD_SIZE) as u64
    );

    // Exporter finishes the file
    let mut file = OpenOptions::new().append(true).open(&source).unwrap();
    file.write_all(&full[cut..]).unwrap();
    drop(file);

    tick_n(&mut watcher, 2);
    assert_eq!(total_rows(out.path()), 5);
    assert!(!source.exists());
    assert!(watcher.ledger().state().files.is_empty());

    // Every record exactly once
    let mut ipkt_values: Vec<u64> = Vec::new();
    for file in parquet_files(out.path()) {
        let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(
            std::fs::File::open(&file).unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
        for batch in reader {
            let batch = batch.unwrap();
            let ipkt = batch
                .column_by_name("ipkt")
                .unwrap()
                .as_any()
                .downcast_ref::<arrow::array::UInt64Array>()
                .unwrap();
            ipkt_values.extend(ipkt.values().iter().copied());
        }
    }
    ipkt_values.sort();
    assert_eq!(ipkt_values, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_truncated_file_quarantined_after_retry_limit() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");

    let records: Vec<_> = (0..3).map(|i| flow(i, HOUR_02 + i)).collect();
    let full = encode_records(&records, "fixture");
    std::fs::write(&source, &full[..full.len() - 10]).unwrap();

    let mut config = exporter("router1", watch.path(), out.path());
    config.truncation_retries = 2;
    let mut watcher = DirectoryWatcher::new(config).unwrap();

    tick_n(&mut watcher, 2);
    assert_eq!(total_rows(out.path()), 2);
    assert!(source.exists());

    // Unchanged: stable again on the next scan, still truncated
    tick_n(&mut watcher, 1);
    assert!(!source.exists());
    assert!(watch
        .path()
        .join(QUARANTINE_DIR)
        .join("nfcapd.202211060200")
        .exists());
    assert_eq!(total_rows(out.path()), 2);
    assert_eq!(watcher.stats().files_quarantined, 1);
    assert!(watcher.ledger().state().files.is_empty());
}

#[test]
fn test_zero_truncation_retries_waits_forever() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    let full = encode_records(&[flow(0, HOUR_02)], "fixture");
    std::fs::write(&source, &full[..full.len() - 1]).unwrap();

    let mut config = exporter("router1", watch.path(), out.path());
    config.truncation_retries = 0;
    let mut watcher = DirectoryWatcher::new(config).unwrap();

    tick_n(&mut watcher, 12);
    assert!(source.exists());
    assert_eq!(watcher.stats().files_quarantined, 0);
    assert!(watcher.file_state(&source).unwrap().truncation_retries >= 5);
}

#[test]
fn test_corrupt_header_is_quarantined() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    std::fs::write(&source, vec![0xEE; 400]).unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 2);

    assert!(!source.exists());
    assert!(watch
        .path()
        .join(QUARANTINE_DIR)
        .join("nfcapd.202211060200")
        .exists());
    assert!(parquet_files(out.path()).is_empty());
    assert_eq!(watcher.stats().files_quarantined, 1);

    // Quarantine directory is never rescanned
    tick_n(&mut watcher, 3);
    assert_eq!(watcher.stats().files_quarantined, 1);
}

#[test]
fn test_corrupt_record_rolls_back_early_flushes() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");

    let records: Vec<_> = (0..6).map(|i| flow(i, HOUR_02 + i)).collect();
    let mut bytes = encode_records(&records, "fixture");
    // Flow record claiming a zero size
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&0u16.to_le_bytes());
    std::fs::write(&source, &bytes).unwrap();

    let mut config = exporter("router1", watch.path(), out.path());
    config.max_batch_rows = 2;
    let mut watcher = DirectoryWatcher::new(config).unwrap();
    tick_n(&mut watcher, 2);

    assert!(parquet_files(out.path()).is_empty());
    assert!(watcher.ledger().pending().is_none());
    assert!(watch
        .path()
        .join(QUARANTINE_DIR)
        .join("nfcapd.202211060200")
        .exists());
}

#[test]
fn test_pattern_and_dot_files_are_ignored() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_capture(&watch.path().join("nfcapd.current.4711"), &[flow(0, HOUR_02)]);
    write_capture(&watch.path().join(".nfcapd.202211060200"), &[flow(0, HOUR_02)]);
    std::fs::write(watch.path().join("notes.txt"), b"hello").unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 3);

    assert!(parquet_files(out.path()).is_empty());
    assert!(watch.path().join("nfcapd.current.4711").exists());
}

#[test]
fn test_recursive_watch_and_archive_policy() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let archive = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(watch.path().join("2022/11/06")).unwrap();
    let source = watch.path().join("2022/11/06/nfcapd.202211060200");
    write_capture(&source, &[flow(0, HOUR_02), flow(1, HOUR_02 + HOUR_MS)]);

    let mut config = exporter("core router", watch.path(), out.path());
    config.recursive = true;
    config.source_policy = SourcePolicy::Archive(archive.path().to_path_buf());
    let mut watcher = DirectoryWatcher::new(config).unwrap();
    tick_n(&mut watcher, 2);

    assert_eq!(total_rows(out.path()), 2);
    assert!(!source.exists());
    assert!(archive
        .path()
        .join("core_router/2022/11/06/nfcapd.202211060200")
        .exists());
    // Sanitized exporter directory
    assert!(out.path().join("core_router/date=2022-11-06/hour=03").is_dir());
}

#[test]
fn test_files_processed_in_name_order() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    // Both files map to the same partition; sequences follow name order
    write_capture(&watch.path().join("nfcapd.202211060205"), &[flow(5, HOUR_02)]);
    write_capture(&watch.path().join("nfcapd.202211060200"), &[flow(0, HOUR_02)]);

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 2);

    let files = parquet_files(out.path());
    assert_eq!(files.len(), 2);
    let by_sequence: Vec<_> = {
        let mut named: Vec<_> = files
            .iter()
            .map(|f| {
                let name = f.file_name().unwrap().to_string_lossy().into_owned();
                (name[21..27].to_string(), f.clone())
            })
            .collect();
        named.sort();
        named.into_iter().map(|(_, f)| f).collect()
    };
    let first_ipkt = {
        let reader = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(
            std::fs::File::open(&by_sequence[0]).unwrap(),
        )
        .unwrap()
        .build()
        .unwrap();
        let batch = reader.into_iter().next().unwrap().unwrap();
        batch
            .column_by_name("ipkt")
            .unwrap()
            .as_any()
            .downcast_ref::<arrow::array::UInt64Array>()
            .unwrap()
            .value(0)
    };
    assert_eq!(first_ipkt, 1);
}

#[test]
fn test_pending_outputs_rolled_back_on_restart() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &two_hour_flows(100));

    // Previous run crashed after renaming one output into place
    let exporter_dir = out.path().join("router1");
    let partition = exporter_dir.join("date=2022-11-06/hour=02");
    std::fs::create_dir_all(&partition).unwrap();
    let orphan = partition.join("20221106020000000000-000000.parquet");
    std::fs::write(&orphan, b"half a run").unwrap();
    let stale_tmp = partition.join(".20221106020000000000-000001.parquet.1234.tmp");
    std::fs::write(&stale_tmp, b"partial").unwrap();

    let mut ledger = Ledger::load(&exporter_dir).unwrap();
    ledger
        .record_pending_output("nfcapd.202211060200", &orphan, 0)
        .unwrap();
    drop(ledger);

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    assert!(!orphan.exists());
    assert!(!stale_tmp.exists());
    assert!(watcher.ledger().pending().is_none());
    // Reserved sequence is not reused
    assert_eq!(watcher.ledger().next_sequence(), 1);

    tick_n(&mut watcher, 2);
    assert_eq!(total_rows(out.path()), 100);
    assert!(!source.exists());
}

#[test]
fn test_committed_source_is_disposed_without_reprocessing() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &two_hour_flows(50));

    // Previous run committed every record, then died before deleting the source
    let exporter_dir = out.path().join("router1");
    std::fs::create_dir_all(&exporter_dir).unwrap();
    let mut ledger = Ledger::load(&exporter_dir).unwrap();
    ledger
        .commit("nfcapd.202211060200", 9_999, true, 50, 2)
        .unwrap();
    drop(ledger);

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    assert!(!source.exists());
    assert!(watcher.ledger().state().files.is_empty());

    tick_n(&mut watcher, 3);
    assert!(parquet_files(out.path()).is_empty());
    assert!(exporter_dir.join(LEDGER_FILE_NAME).exists());
}

#[test]
fn test_restart_after_partial_commit_emits_no_duplicates() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");

    let records: Vec<_> = (0..4).map(|i| flow(i, HOUR_02 + i)).collect();
    let full = encode_records(&records, "fixture");
    let cut = HEADER_SIZE + 2 * FLOW_V4_RECORD_SIZE + 3;
    std::fs::write(&source, &full[..cut]).unwrap();

    {
        let mut watcher =
            DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
        tick_n(&mut watcher, 2);
        assert_eq!(total_rows(out.path()), 2);
    }

    // File completed while the process was down
    std::fs::write(&source, &full).unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 2);
    assert_eq!(total_rows(out.path()), 4);
    assert!(!source.exists());
}

#[test]
fn test_write_failure_retried_then_succeeds() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &[flow(0, HOUR_02), flow(1, HOUR_02 + HOUR_MS)]);

    // A plain file where the hour=02 partition's parent directory must go
    let blocker = out.path().join("router1/date=2022-11-06");
    std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
    std::fs::write(&blocker, b"in the way").unwrap();

    let mut config = exporter("router1", watch.path(), out.path());
    config.write_max_attempts = 3;
    let mut watcher = DirectoryWatcher::new(config).unwrap();
    tick_n(&mut watcher, 2);

    let state = watcher.file_state(&source).unwrap();
    assert_eq!(state.stage, FileStage::Stable);
    assert_eq!(state.write_attempts, 1);
    assert!(source.exists());
    assert!(watcher.ledger().pending().is_none());

    std::fs::remove_file(&blocker).unwrap();
    tick_n(&mut watcher, 1);
    assert_eq!(total_rows(out.path()), 2);
    assert!(!source.exists());
}

#[test]
fn test_persistent_write_failure_is_fatal() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_capture(&watch.path().join("nfcapd.202211060200"), &[flow(0, HOUR_02)]);

    let blocker = out.path().join("router1/date=2022-11-06");
    std::fs::create_dir_all(blocker.parent().unwrap()).unwrap();
    std::fs::write(&blocker, b"in the way").unwrap();

    let mut config = exporter("router1", watch.path(), out.path());
    config.write_max_attempts = 2;
    let mut watcher = DirectoryWatcher::new(config).unwrap();

    let cancel = CancellationToken::new();
    watcher.tick(&cancel).unwrap();
    watcher.tick(&cancel).unwrap();
    let err = watcher.tick(&cancel).unwrap_err();
    assert!(matches!(err, WatcherError::Fatal { ref exporter, .. } if exporter == "router1"));
}

#[test]
fn test_output_root_replaced_by_file_fails_without_retrying() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");
    write_capture(&source, &[flow(0, HOUR_02)]);

    let outputdir = out.path().join("parquet");
    std::fs::create_dir(&outputdir).unwrap();
    let mut config = exporter("router1", watch.path(), &outputdir);
    config.write_max_attempts = 5;
    let mut watcher = DirectoryWatcher::new(config).unwrap();

    std::fs::remove_dir_all(&outputdir).unwrap();
    std::fs::write(&outputdir, b"not a directory").unwrap();

    let cancel = CancellationToken::new();
    watcher.tick(&cancel).unwrap();
    // First attempt is final even though five are allowed
    let err = watcher.tick(&cancel).unwrap_err();
    assert!(matches!(err, WatcherError::Fatal { ref reason, .. } if reason.contains("[E004]")));
    assert!(source.exists());
}

#[test]
fn test_vanished_truncated_file_is_forgotten() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let source = watch.path().join("nfcapd.202211060200");

    let records: Vec<_> = (0..3).map(|i| flow(i, HOUR_02 + i)).collect();
    let full = encode_records(&records, "fixture");
    std::fs::write(&source, &full[..full.len() - 10]).unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    tick_n(&mut watcher, 2);
    assert!(watcher.ledger().progress("nfcapd.202211060200").is_some());

    std::fs::remove_file(&source).unwrap();
    tick_n(&mut watcher, 1);
    assert!(watcher.ledger().state().files.is_empty());

    let reloaded = Ledger::load(&out.path().join("router1")).unwrap();
    assert!(reloaded.state().files.is_empty());
}

#[test]
fn test_counters_track_consumed_and_quarantined_files() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_capture(&watch.path().join("nfcapd.202211060200"), &two_hour_flows(10));
    std::fs::write(watch.path().join("nfcapd.202211060300"), b"garbage").unwrap();

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    metrics::with_local_recorder(&recorder, || tick_n(&mut watcher, 2));

    let counters: HashMap<String, u64> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter_map(|(key, _, _, value)| match value {
            DebugValue::Counter(n) => {
                assert!(key
                    .key()
                    .labels()
                    .any(|l| l.key() == "exporter" && l.value() == "router1"));
                Some((key.key().name().to_string(), n))
            }
            _ => None,
        })
        .collect();

    assert_eq!(counters.get("nfcap2parquet.files.consumed"), Some(&1));
    assert_eq!(counters.get("nfcap2parquet.files.quarantined"), Some(&1));
    assert_eq!(counters.get("nfcap2parquet.parquet.files_written"), Some(&2));
    assert_eq!(counters.get("nfcap2parquet.rows.written"), Some(&10));
    assert!(!counters.contains_key("nfcap2parquet.write.failures"));
}

#[test]
fn test_cancellation_checked_between_files() {
    let watch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_capture(&watch.path().join("nfcapd.202211060200"), &[flow(0, HOUR_02)]);

    let mut watcher = DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
    let cancel = CancellationToken::new();
    watcher.tick(&cancel).unwrap();
    cancel.cancel();
    watcher.tick(&cancel).unwrap();
    assert!(parquet_files(out.path()).is_empty());
}

#[test]
fn test_partitioning_is_deterministic() {
    let records = two_hour_flows(1_000);

    let mut layouts = Vec::new();
    for _ in 0..2 {
        let watch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_capture(&watch.path().join("nfcapd.202211060200"), &records);

        let mut watcher =
            DirectoryWatcher::new(exporter("router1", watch.path(), out.path())).unwrap();
        tick_n(&mut watcher, 2);

        let layout: Vec<_> = parquet_files(out.path())
            .iter()
            .map(|f| (partition_of(out.path(), f), row_count(f)))
            .collect();
        layouts.push(layout);
    }
    assert_eq!(layouts[0], layouts[1]);
    assert_eq!(layouts[0].len(), 2);
}
