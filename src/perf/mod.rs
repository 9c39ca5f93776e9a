//! Timed execution of external commands through `perf stat`.
//!
//! `perf stat -x ^ -r N <cmd>` runs `<cmd>` N times and writes one line per
//! counted event to stderr, fields separated by `^`. The first field of the
//! `task-clock` line is the mean CPU time in milliseconds.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Field separator requested from `perf stat -x`.
pub const FIELD_SEPARATOR: char = '^';

/// Event whose statistic is reported.
pub const TASK_CLOCK_EVENT: &str = "task-clock";

#[derive(Error, Debug)]
pub enum MeasurementError {
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("perf returned a non-zero exit status ({status}). Hints from perf's stderr: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },

    #[error("could not parse a timing statistic from perf's stderr: {stderr}")]
    Unparseable { stderr: String },
}

/// The measurement utility could not be used at all.
#[derive(Error, Debug)]
#[error("perf stat self-check failed: {0}")]
pub struct StartupError(#[from] pub MeasurementError);

/// A program and its arguments, run as-is without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self { program: program.as_ref().to_os_string(), args: Vec::new() }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Wraps commands in `perf stat` and extracts the task-clock statistic.
#[derive(Debug, Clone)]
pub struct PerfStat {
    program: PathBuf,
    repetitions: u32,
}

impl PerfStat {
    pub fn new<P: Into<PathBuf>>(program: P, repetitions: u32) -> Self {
        Self { program: program.into(), repetitions: repetitions.max(1) }
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Builds the full `perf stat` command line around `inner`.
    pub fn wrap(&self, inner: &ToolCommand, repetitions: u32) -> ToolCommand {
        ToolCommand::new(&self.program)
            .args(["stat", "-x"])
            .arg(FIELD_SEPARATOR.to_string())
            .arg("-r")
            .arg(repetitions.to_string())
            .arg(&inner.program)
            .args(&inner.args)
    }

    /// Runs `inner` the configured number of times and returns the mean
    /// task-clock time in seconds.
    pub fn measure(&self, inner: &ToolCommand) -> Result<f64, MeasurementError> {
        self.measure_with(inner, self.repetitions)
    }

    fn measure_with(&self, inner: &ToolCommand, repetitions: u32) -> Result<f64, MeasurementError> {
        let wrapped = self.wrap(inner, repetitions);
        tracing::debug!(command = %wrapped, "running perf stat");

        let output = wrapped.to_command().output().map_err(|source| MeasurementError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(MeasurementError::NonZeroExit { status: output.status, stderr });
        }

        let millis = parse_task_clock(&stderr)?;
        Ok(millis / 1000.0)
    }

    /// Checks that `perf stat` works by timing a trivial command once.
    pub fn self_check(&self) -> Result<f64, StartupError> {
        let trivial = ToolCommand::new("true");
        Ok(self.measure_with(&trivial, 1)?)
    }
}

/// Extracts the task-clock value (milliseconds) from `perf stat -x ^` output.
///
/// The `task-clock` line is preferred. Without one, the first line carrying
/// a separator is used, so unrelated diagnostics printed before perf's own
/// lines are ignored.
pub fn parse_task_clock(stderr: &str) -> Result<f64, MeasurementError> {
    let unparseable = || MeasurementError::Unparseable { stderr: stderr.to_string() };

    let lines: Vec<&str> = stderr.lines().filter(|l| l.contains(FIELD_SEPARATOR)).collect();
    let line = lines
        .iter()
        .find(|l| {
            l.split(FIELD_SEPARATOR)
                .any(|field| field.trim().starts_with(TASK_CLOCK_EVENT))
        })
        .or_else(|| lines.first())
        .ok_or_else(unparseable)?;

    let value = line.split(FIELD_SEPARATOR).next().unwrap_or_default().trim();
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(unparseable()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERF_OUTPUT: &str = "\
1523.45^msec^task-clock^1523450000^100.00^0.998^CPUs utilized\n\
12^^context-switches^1523450000^100.00^0.008^K/sec\n\
0^^cpu-migrations^1523450000^100.00^0.000^K/sec\n";

    #[test]
    fn test_parse_task_clock_line() {
        let ms = parse_task_clock(PERF_OUTPUT).unwrap();
        assert!((ms - 1523.45).abs() < 1e-9);
    }

    #[test]
    fn test_parse_skips_leading_diagnostics() {
        let stderr = format!(
            "Warning 1: PREDICTOR=2 is only supported with 8, 16, 32 and 64 bit data.\n{}",
            PERF_OUTPUT
        );
        let ms = parse_task_clock(&stderr).unwrap();
        assert!((ms - 1523.45).abs() < 1e-9);
    }

    #[test]
    fn test_parse_user_only_task_clock() {
        // Modifier suffix when only user-space time is counted.
        let stderr = "4^^context-switches:u^900000^100.00^^\n\
                      912.5^msec^task-clock:u^912500000^100.00^0.997^CPUs utilized\n";
        let ms = parse_task_clock(stderr).unwrap();
        assert!((ms - 912.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_falls_back_to_first_separated_line() {
        let ms = parse_task_clock("87.5^msec^cpu-clock^^\n").unwrap();
        assert!((ms - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_without_separator_fails() {
        let err = parse_task_clock("1523.45 msec task-clock\n").unwrap_err();
        assert!(matches!(err, MeasurementError::Unparseable { .. }));
    }

    #[test]
    fn test_parse_not_counted_fails() {
        let err = parse_task_clock("<not counted>^msec^task-clock^0^0.00^^\n").unwrap_err();
        assert!(matches!(
            err,
            MeasurementError::Unparseable { ref stderr } if stderr.contains("not counted")
        ));
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(parse_task_clock("").is_err());
    }

    #[test]
    fn test_wrap_builds_perf_command_line() {
        let perf = PerfStat::new("perf", 5);
        let inner = ToolCommand::new("gdal_translate").args(["-q", "a.tif", "b.tif"]);
        let wrapped = perf.wrap(&inner, perf.repetitions());
        assert_eq!(
            wrapped.to_string(),
            "perf stat -x ^ -r 5 gdal_translate -q a.tif b.tif"
        );
    }

    #[test]
    fn test_repetitions_at_least_one() {
        assert_eq!(PerfStat::new("perf", 0).repetitions(), 1);
    }

    #[test]
    fn test_missing_perf_binary_is_spawn_error() {
        let perf = PerfStat::new("/nonexistent/perf-binary", 1);
        let err = perf.measure(&ToolCommand::new("true")).unwrap_err();
        assert!(matches!(err, MeasurementError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_keeps_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("perf");
        let body = "#!/bin/sh\necho 'error: event not supported' >&2\nexit 1\n";
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let perf = PerfStat::new(&script, 3);
        let err = perf.measure(&ToolCommand::new("true")).unwrap_err();
        match err {
            MeasurementError::NonZeroExit { stderr, .. } => {
                assert!(stderr.contains("error: event not supported"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(perf.self_check().is_err());
    }
}
