use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};

use crate::backend::ledger::LedgerBackend;
use crate::backend::s3::S3Store;
use crate::backend::store::{FileStore, LocalStore};
use crate::config::Config;
use crate::context::{read_exclusions, RunContext, RunRequest};
use crate::mode::Mode;

mod assemble;
mod backend;
mod config;
mod context;
mod dispatch;
mod error;
mod exclusion;
mod locate;
mod manifest;
mod mode;
mod panel;
mod resolve;
mod summary;

/// Where upstream files are listed from
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Local,
    S3,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreKind::Local => write!(f, "local"),
            StoreKind::S3 => write!(f, "s3"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "assay-dispatch", version, about = "Resolve manifests into report jobs and launch them")]
struct Args {
    /// Assay config (JSON)
    #[arg(long)]
    config: PathBuf,
    /// Folder holding the upstream outputs of the sequencing run
    #[arg(long)]
    input_root: String,
    /// Modes to launch, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    modes: Vec<Mode>,
    /// Sample manifest (TSV), repeatable
    #[arg(long = "manifest")]
    manifests: Vec<PathBuf>,
    /// Panel table (TSV)
    #[arg(long)]
    panels: Option<PathBuf>,
    /// Sample id to leave out, repeatable
    #[arg(long)]
    exclude: Vec<String>,
    /// File of sample ids to leave out, one per line
    #[arg(long)]
    exclude_file: Option<PathBuf>,
    /// Only report on these manifest samples, comma separated
    #[arg(long, value_delimiter = ',')]
    subset: Vec<String>,
    /// Only launch the first N samples
    #[arg(long)]
    limit: Option<usize>,
    /// One report job per test instead of one per sample
    #[arg(long)]
    split_tests: bool,
    /// Terminate every job right after it's launched
    #[arg(long)]
    test_mode: bool,
    /// Record nothing in the job ledger
    #[arg(long)]
    dry_run: bool,
    /// Ask for archived inputs to be restored
    #[arg(long)]
    unarchive: bool,
    /// Existing calling job to report on
    #[arg(long)]
    cnv_call_job: Option<String>,
    /// QC status file id handed to aggregation
    #[arg(long)]
    qc_file: Option<String>,
    /// Seconds to wait for a job other jobs depend on
    #[arg(long, default_value_t = 21600)]
    timeout: u64,
    /// Seconds between job ledger polls while waiting
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,
    /// SQLite job ledger
    #[arg(long, default_value = "assay-dispatch.db")]
    ledger: PathBuf,
    #[arg(long, value_enum, default_value_t = StoreKind::Local)]
    store: StoreKind,
    /// Bucket for --store s3
    #[arg(long)]
    bucket: Option<String>,
    #[arg(long, default_value = "eu-west-2")]
    region: String,
    /// Where the run summary and job id list are written
    #[arg(long, default_value = ".")]
    summary_dir: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    info!("assay-dispatch starting up");
    let args = Args::parse();

    match launch(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the run failed after jobs were launched
fn launch(args: Args) -> anyhow::Result<bool> {
    let config = Config::load(&args.config)?;

    let mut excluded: BTreeSet<String> = args.exclude.into_iter().collect();
    if let Some(path) = &args.exclude_file {
        excluded.extend(read_exclusions(path)?);
    }

    let request = RunRequest {
        modes: args.modes.into_iter().collect(),
        input_root: args.input_root,
        manifests: args.manifests,
        panels: args.panels,
        excluded,
        subset: args.subset.into_iter().map(|name| name.trim().to_string()).filter(|name| !name.is_empty()).collect(),
        limit: args.limit,
        split_tests: args.split_tests,
        test_mode: args.test_mode,
        dry_run: args.dry_run,
        unarchive: args.unarchive,
        call_job: args.cnv_call_job,
        qc_file: args.qc_file,
        timeout: Duration::from_secs(args.timeout),
    };
    let context = RunContext::new(config, request, Local::now());

    let store: Box<dyn FileStore> = match args.store {
        StoreKind::Local => Box::new(LocalStore::new(&std::env::current_dir()?)),
        StoreKind::S3 => {
            let bucket = args.bucket.as_deref().ok_or_else(|| anyhow!("--store s3 needs --bucket"))?;
            Box::new(S3Store::new(bucket, &args.region)?)
        }
    };
    let backend = LedgerBackend::open(&args.ledger, store, context.request.dry_run)?
        .poll_every(Duration::from_secs(args.poll_interval));

    let summary = dispatch::run(&context, &backend)?;
    backend.finish()?;

    println!("{}", summary.render()?);
    summary.write(&args.summary_dir, &context.run_name)?;
    println!("{}", summary.job_ids());

    Ok(!summary.is_failed())
}
