use crate::benchmark_utils::{bytes_to_mb, Report, TestKind, TrialResult};
use crate::config::{OptionProfile, OptionSet};
use crate::dataset::{discover_rasters, Raster};
use crate::perf::{MeasurementError, PerfStat};
use crate::translate::Translator;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;

const BASELINE_FILE: &str = "base.tif";
const SCRATCH_FILE: &str = "scratch.tif";

/// Everything the driver needs to know about one run.
#[derive(Debug, Clone)]
pub struct BenchmarkSettings {
    pub input_dir: PathBuf,
    pub repetitions: u32,
    pub translate_bin: PathBuf,
    pub perf_bin: PathBuf,
    /// Parent of the per-raster scratch directories (system temp dir if unset).
    pub work_dir: Option<PathBuf>,
}

impl Default for BenchmarkSettings {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input_rasters"),
            repetitions: 10,
            translate_bin: PathBuf::from("gdal_translate"),
            perf_bin: PathBuf::from("perf"),
            work_dir: None,
        }
    }
}

#[derive(Error, Debug)]
enum TrialError {
    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("no output at '{path}': {source}")]
    Output {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("output at '{0}' is empty")]
    EmptyOutput(String),

    #[error("perf reported no elapsed time ({0}s)")]
    NoElapsedTime(f64),
}

#[derive(Error, Debug)]
enum BaselineError {
    #[error("could not create a scratch directory: {0}")]
    Workspace(#[source] io::Error),

    #[error(transparent)]
    Convert(#[from] crate::translate::ConvertError),

    #[error("baseline was not written: {0}")]
    Missing(#[source] io::Error),

    #[error("baseline is empty")]
    Empty,
}

fn file_size_mb(path: &Path) -> Result<f64, TrialError> {
    fs::metadata(path)
        .map(|m| bytes_to_mb(m.len()))
        .map_err(|source| TrialError::Output { path: path.display().to_string(), source })
}

/// Size of a trial output that ratios are computed against.
fn nonempty_size_mb(path: &Path) -> Result<f64, TrialError> {
    match file_size_mb(path)? {
        mb if mb > 0.0 => Ok(mb),
        _ => Err(TrialError::EmptyOutput(path.display().to_string())),
    }
}

fn positive_elapsed(elapsed: f64) -> Result<f64, TrialError> {
    if elapsed > 0.0 {
        Ok(elapsed)
    } else {
        Err(TrialError::NoElapsedTime(elapsed))
    }
}

/// Runs write and read trials for every raster and option.
pub struct Benchmark<'a> {
    settings: &'a BenchmarkSettings,
    options: &'a OptionSet,
    translator: Translator,
    perf: PerfStat,
    shutdown: Arc<AtomicBool>,
}

impl<'a> Benchmark<'a> {
    pub fn new(settings: &'a BenchmarkSettings, options: &'a OptionSet) -> Self {
        Self {
            settings,
            options,
            translator: Translator::new(&settings.translate_bin),
            perf: PerfStat::new(&settings.perf_bin, settings.repetitions),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the run between trials once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = flag;
        self
    }

    pub fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn perf(&self) -> &PerfStat {
        &self.perf
    }

    pub fn run(&self) -> Result<Report> {
        let rasters = discover_rasters(&self.settings.input_dir).with_context(|| {
            format!("Failed to list rasters in '{}'", self.settings.input_dir.display())
        })?;
        tracing::info!(rasters = rasters.len(), options = self.options.len(), "starting benchmark");

        let mut report = Report::new();
        for (i, raster) in rasters.iter().enumerate() {
            if self.interrupted() {
                tracing::warn!("benchmark interrupted, {} rows collected", report.len());
                break;
            }
            println!("({}/{}) Processing raster \"{}\"", i + 1, rasters.len(), raster.name);
            self.bench_raster(raster, &mut report);
        }

        Ok(report)
    }

    fn workspace(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("gtiff-bench-");
        match &self.settings.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    fn prepare_baseline(
        &self,
        raster: &Raster,
        workspace: &Path,
    ) -> Result<(PathBuf, f64), BaselineError> {
        let baseline = workspace.join(BASELINE_FILE);
        let cmd = self.translator.baseline_command(&raster.path, &baseline);
        self.translator.run(&cmd)?;
        let size = fs::metadata(&baseline).map_err(BaselineError::Missing)?.len();
        if size == 0 {
            return Err(BaselineError::Empty);
        }
        Ok((baseline, bytes_to_mb(size)))
    }

    /// Benchmarks one raster. The scratch directory is removed when this
    /// returns, including when the run is interrupted.
    fn bench_raster(&self, raster: &Raster, report: &mut Report) {
        let prepared = self
            .workspace()
            .map_err(BaselineError::Workspace)
            .and_then(|ws| self.prepare_baseline(raster, ws.path()).map(|b| (ws, b)));

        let (workspace, (baseline, baseline_mb)) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(raster = %raster.name, "baseline preparation failed: {}", e);
                println!("Failed while preparing '{}'. Skipping.", raster.name);
                for profile in self.options.iter() {
                    report.push(TrialResult::failed(TestKind::Write, &raster.name, &profile.name));
                    report.push(TrialResult::failed(TestKind::Read, &raster.name, &profile.name));
                }
                return;
            }
        };
        println!("Prepared base version of '{}' ({:.1}Mb)", raster.name, baseline_mb);

        let scratch = workspace.path().join(SCRATCH_FILE);
        for (i, profile) in self.options.iter().enumerate() {
            let candidate = workspace.path().join(format!("candidate_{}.tif", i));

            if self.interrupted() {
                break;
            }
            report.push(self.write_trial(raster, profile, &baseline, baseline_mb, &candidate));

            if !self.interrupted() {
                report.push(self.read_trial(raster, profile, &candidate, baseline_mb, &scratch));
            }

            let _ = fs::remove_file(&candidate);
            let _ = fs::remove_file(&scratch);
        }
    }

    fn write_trial(
        &self,
        raster: &Raster,
        profile: &OptionProfile,
        baseline: &Path,
        baseline_mb: f64,
        candidate: &Path,
    ) -> TrialResult {
        let cmd = self.translator.write_command(baseline, candidate, &profile.args);
        println!("Running benchmark ({}x): {}", self.perf.repetitions(), cmd);

        let outcome = self
            .perf
            .measure(&cmd)
            .map_err(TrialError::from)
            .and_then(positive_elapsed)
            .and_then(|elapsed| Ok((elapsed, nonempty_size_mb(candidate)?)));

        match outcome {
            Ok((elapsed, candidate_mb)) => {
                println!(
                    "Completed {} repetitions. Average time: {:.2}s File size: {:.1}Mb",
                    self.perf.repetitions(),
                    elapsed,
                    candidate_mb
                );
                TrialResult::write(&raster.name, &profile.name, elapsed, baseline_mb, candidate_mb)
            }
            Err(e) => {
                println!("Failed to run benchmark: {}", e);
                tracing::warn!(raster = %raster.name, option = %profile.name, "write trial failed");
                let _ = fs::remove_file(candidate);
                TrialResult::failed(TestKind::Write, &raster.name, &profile.name)
            }
        }
    }

    fn read_trial(
        &self,
        raster: &Raster,
        profile: &OptionProfile,
        candidate: &Path,
        baseline_mb: f64,
        scratch: &Path,
    ) -> TrialResult {
        let cmd = self.translator.read_command(candidate, scratch);
        println!("Running benchmark ({}x): {}", self.perf.repetitions(), cmd);

        // perf can exit zero even when the wrapped command did not, so the
        // scratch output has to exist as well.
        let outcome = self
            .perf
            .measure(&cmd)
            .map_err(TrialError::from)
            .and_then(positive_elapsed)
            .and_then(|elapsed| file_size_mb(scratch).map(|_| elapsed));

        match outcome {
            Ok(elapsed) => {
                println!(
                    "Completed {} repetitions. Average time: {:.2}s",
                    self.perf.repetitions(),
                    elapsed
                );
                TrialResult::read(&raster.name, &profile.name, elapsed, baseline_mb)
            }
            Err(e) => {
                println!("Failed to run benchmark: {}", e);
                tracing::warn!(raster = %raster.name, option = %profile.name, "read trial failed");
                TrialResult::failed(TestKind::Read, &raster.name, &profile.name)
            }
        }
    }
}

/// Discovers the input rasters and benchmarks every configured option on each.
pub fn run_benchmark(settings: &BenchmarkSettings, options: &OptionSet) -> Result<Report> {
    Benchmark::new(settings, options).run()
}
