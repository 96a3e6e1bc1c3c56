use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use nfcap2parquet::convert::{convert_path, ConvertOptions};
use nfcap2parquet::demo::{write_demo_file, DemoSpec};
use nfcap2parquet_batch::DEFAULT_MAX_ROWS;
use tracing::{error, info};

/// Watches netflow capture directories and rewrites them as hive-partitioned Parquet
#[derive(Parser)]
#[command(name = "nfcap2parquet")]
#[command(version)]
#[command(about = "Netflow capture files to hive-partitioned Parquet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch every configured exporter until SIGINT/SIGTERM
    Run {
        /// Path to the INI configuration file
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Log filter, e.g. `info` or `nfcap2parquet=debug` (overrides config)
        #[arg(short = 'v', long, value_name = "LEVEL")]
        log_level: Option<String>,

        /// Shorthand for --log-level debug
        #[arg(long)]
        debug: bool,
    },
    /// Convert a capture file, or a directory of them, once
    Convert {
        /// Capture file or directory containing capture files
        source: PathBuf,

        /// Directory receiving the Parquet tree
        parquetdir: PathBuf,

        /// flowsrc tag (defaults to the ident in each file header)
        #[arg(short = 'f', value_name = "FLOWSRC")]
        flowsrc: Option<String>,

        /// Search subdirectories when SOURCE is a directory
        #[arg(short, long)]
        recursive: bool,

        /// Rows per Parquet file before a partition is split
        #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_ROWS)]
        max_rows: usize,

        /// Show debug output
        #[arg(long)]
        debug: bool,
    },
    /// Write a synthetic capture file
    Demo {
        /// Capture file to create
        file: PathBuf,

        /// Number of flow records
        #[arg(long, default_value_t = 10_000)]
        records: u64,

        /// First flow start time (RFC 3339)
        #[arg(long, value_name = "RFC3339")]
        start: DateTime<Utc>,

        /// Minutes the flow start times are spread over
        #[arg(long, default_value_t = 120)]
        span_minutes: u64,

        /// Ident stored in the file header
        #[arg(long, default_value = "demo")]
        ident: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            log_level,
            debug,
        } => run_pipeline(config, log_level, debug),
        Commands::Convert {
            source,
            parquetdir,
            flowsrc,
            recursive,
            max_rows,
            debug,
        } => run_convert(
            source,
            parquetdir,
            ConvertOptions {
                flowsrc,
                recursive,
                max_rows,
            },
            debug,
        ),
        Commands::Demo {
            file,
            records,
            start,
            span_minutes,
            ident,
        } => run_demo(
            file,
            DemoSpec {
                ident,
                records,
                start,
                span_minutes,
            },
        ),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_pipeline(config_path: PathBuf, log_level: Option<String>, debug: bool) -> Result<ExitCode> {
    let config = nfcap2parquet_config::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let cli_directive = if debug {
        Some("debug".to_string())
    } else {
        log_level
    };
    nfcap2parquet::init_tracing(
        cli_directive.as_deref(),
        config.log_level.as_deref(),
        config.logfile.as_deref(),
    )?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        exporters = config.exporters.len(),
        "starting nfcap2parquet"
    );
    for exporter in &config.exporters {
        info!(
            exporter = %exporter.name,
            watchdir = %exporter.watchdir.display(),
            outputdir = %exporter.outputdir.display(),
            "exporter configured"
        );
    }

    let summary = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(nfcap2parquet::run(config))?;

    info!(rows_written = summary.rows_written(), "shutdown complete");
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn run_convert(
    source: PathBuf,
    parquetdir: PathBuf,
    options: ConvertOptions,
    debug: bool,
) -> Result<ExitCode> {
    nfcap2parquet::init_tracing(debug.then_some("debug"), None, None)?;

    let summary = convert_path(&source, &parquetdir, &options)?;
    info!(
        files_converted = summary.files_converted,
        files_failed = summary.files_failed,
        parquet_files = summary.parquet_files,
        rows = summary.rows,
        "conversion finished"
    );

    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run_demo(file: PathBuf, workload: DemoSpec) -> Result<ExitCode> {
    nfcap2parquet::init_tracing(None, None, None)?;

    let written = write_demo_file(&file, &workload)?;
    info!(
        file = %file.display(),
        records = written,
        start = %workload.start,
        span_minutes = workload.span_minutes,
        "wrote demo capture file"
    );
    Ok(ExitCode::SUCCESS)
}
