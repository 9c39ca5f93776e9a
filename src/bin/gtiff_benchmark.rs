//! gtiff_benchmark - GeoTIFF compression benchmark driven by gdal_translate and perf stat.

use anyhow::{Context, Result};
use clap::Parser;
use gtiff_benchmark_rs::benchmark::{Benchmark, BenchmarkSettings};
use gtiff_benchmark_rs::benchmark_utils::print_summary;
use gtiff_benchmark_rs::config::OptionSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Benchmark lossless GeoTIFF compression options.
///
/// Every `*.tif` in the input directory is copied to an uncompressed baseline,
/// then compressed (write trial) and decompressed (read trial) once per
/// section of the config file, each timed with `perf stat`.
#[derive(Parser, Debug)]
#[command(name = "gtiff_benchmark")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file with one section of creation options per compression profile.
    #[arg(short = 'c', long, default_value = "config.ini")]
    config: PathBuf,

    /// Number of repetitions perf stat averages over.
    #[arg(
        short = 'r',
        long,
        default_value = "10",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    repetitions: u32,

    /// Directory with input rasters.
    #[arg(short = 'i', long, default_value = "input_rasters")]
    input: PathBuf,

    /// Where to write the semicolon-delimited results.
    #[arg(long, default_value = "results.csv")]
    results: PathBuf,

    /// Also export the results as JSON.
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,

    /// Parent directory for per-raster scratch files (defaults to the system temp dir).
    #[arg(long, value_name = "DIR")]
    work_dir: Option<PathBuf>,

    /// Raster conversion program.
    #[arg(long, env = "GTIFF_BENCH_TRANSLATE", default_value = "gdal_translate")]
    translate_bin: PathBuf,

    /// perf executable.
    #[arg(long, env = "GTIFF_BENCH_PERF", default_value = "perf")]
    perf_bin: PathBuf,

    /// Verbose output.
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> BenchmarkSettings {
        BenchmarkSettings {
            input_dir: self.input.clone(),
            repetitions: self.repetitions,
            translate_bin: self.translate_bin.clone(),
            perf_bin: self.perf_bin.clone(),
            work_dir: self.work_dir.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    println!("Loading config file '{}'", cli.config.display());
    let options = OptionSet::load(&cli.config)
        .with_context(|| format!("Failed to load config file '{}'", cli.config.display()))?;
    tracing::info!(options = options.len(), "loaded compression profiles");

    // Ctrl+C stops the run between trials so scratch directories are removed
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted, cleaning up...");
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!("Failed to install signal handler: {}", e);
    }

    let settings = cli.settings();
    let benchmark = Benchmark::new(&settings, &options).with_shutdown(shutdown);

    println!("Testing that perf stat works...");
    if let Err(e) = benchmark.perf().self_check() {
        tracing::error!("{}", e);
        println!(
            "Something went wrong testing out a perf stat command! \
             Without perf stat this is not going to work..."
        );
        return Ok(ExitCode::FAILURE);
    }
    println!("Looks good!");

    let report = benchmark.run().context("Benchmark execution failed")?;
    if benchmark.interrupted() {
        eprintln!("Benchmark interrupted. No results written.");
        return Ok(ExitCode::from(130));
    }

    report
        .write_delimited(&cli.results)
        .with_context(|| format!("Failed to write results to '{}'", cli.results.display()))?;
    report.print();
    print_summary(&report.summarize());

    if let Some(path) = &cli.json {
        report
            .write_json(path)
            .with_context(|| format!("Failed to export JSON to '{}'", path.display()))?;
        println!("Results exported to: {}", path.display());
    }

    Ok(ExitCode::SUCCESS)
}
