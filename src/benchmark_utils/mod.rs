use prettytable::{row, Table};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

pub const REPORT_DELIMITER: char = ';';
pub const REPORT_HEADER: &str = "test;file;option;time;size;ratio;savings;speed";
const BANNER: &str = "===========================================================";
const RULE: &str = "-----------------------------------------------------------";

/// Converts a byte count to binary megabytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Write,
    Read,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKind::Write => f.write_str("write"),
            TestKind::Read => f.write_str("read"),
        }
    }
}

/// One row of the report. `None` marks a value that was not measured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialResult {
    pub test: TestKind,
    pub file: String,
    pub option: String,
    pub time: Option<f64>,    // Seconds
    pub size: Option<f64>,    // MB
    pub ratio: Option<f64>,   // Baseline size / candidate size
    pub savings: Option<f64>, // 1 - candidate size / baseline size
    pub speed: Option<f64>,   // Baseline MB per second
}

impl TrialResult {
    /// A successful write trial.
    pub fn write(
        file: &str,
        option: &str,
        elapsed: f64,
        baseline_mb: f64,
        candidate_mb: f64,
    ) -> Self {
        Self {
            test: TestKind::Write,
            file: file.to_string(),
            option: option.to_string(),
            time: Some(elapsed),
            size: Some(candidate_mb),
            ratio: Some(baseline_mb / candidate_mb),
            savings: Some(1.0 - candidate_mb / baseline_mb),
            speed: Some(baseline_mb / elapsed),
        }
    }

    /// A successful read trial. Size, ratio and savings are never recomputed.
    pub fn read(file: &str, option: &str, elapsed: f64, baseline_mb: f64) -> Self {
        Self {
            time: Some(elapsed),
            speed: Some(baseline_mb / elapsed),
            ..Self::failed(TestKind::Read, file, option)
        }
    }

    /// A trial that produced no measurement.
    pub fn failed(test: TestKind, file: &str, option: &str) -> Self {
        Self {
            test,
            file: file.to_string(),
            option: option.to_string(),
            time: None,
            size: None,
            ratio: None,
            savings: None,
            speed: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.time.is_none()
    }
}

fn field(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

impl fmt::Display for TrialResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = REPORT_DELIMITER;
        write!(
            f,
            "{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}{d}{}",
            self.test,
            self.file,
            self.option,
            field(self.time),
            field(self.size),
            field(self.ratio),
            field(self.savings),
            field(self.speed),
        )
    }
}

/// All trial results of one run, in the order they completed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    rows: Vec<TrialResult>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: TrialResult) {
        self.rows.push(row);
    }

    pub fn rows(&self) -> &[TrialResult] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Delimited text: header row first, one line per trial.
    pub fn to_delimited(&self) -> String {
        let mut out = String::from(REPORT_HEADER);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.to_string());
            out.push('\n');
        }
        out
    }

    /// Writes the delimited report, replacing any existing file.
    pub fn write_delimited(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_delimited())
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.rows)?;
        fs::write(path, json)
    }

    /// Prints the delimited report between separator banners.
    pub fn print(&self) {
        println!("{}", BANNER);
        println!("Benchmark complete! Results:");
        println!("{}", RULE);
        print!("{}", self.to_delimited());
        println!("{}", BANNER);
    }

    /// Per-option averages over the successful trials, in first-seen order.
    pub fn summarize(&self) -> Vec<OptionSummary> {
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: FxHashMap<&str, Vec<&TrialResult>> = FxHashMap::default();
        for row in &self.rows {
            grouped
                .entry(row.option.as_str())
                .or_insert_with(|| {
                    order.push(row.option.as_str());
                    Vec::new()
                })
                .push(row);
        }

        order
            .into_iter()
            .map(|option| {
                let group = &grouped[option];
                let (writes, reads): (Vec<&TrialResult>, Vec<&TrialResult>) =
                    group.iter().copied().partition(|r| r.test == TestKind::Write);

                OptionSummary {
                    option: option.to_string(),
                    size: mean(writes.iter().filter_map(|r| r.size)),
                    ratio: mean(writes.iter().filter_map(|r| r.ratio)),
                    savings: mean(writes.iter().filter_map(|r| r.savings)),
                    write_speed: mean(writes.iter().filter_map(|r| r.speed)),
                    read_speed: mean(reads.iter().filter_map(|r| r.speed)),
                    failed: group.iter().filter(|r| r.is_failed()).count(),
                    trials: group.len(),
                }
            })
            .collect()
    }
}

fn mean<I: Iterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Averages of one option across all rasters.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSummary {
    pub option: String,
    pub size: Option<f64>,
    pub ratio: Option<f64>,
    pub savings: Option<f64>,
    pub write_speed: Option<f64>,
    pub read_speed: Option<f64>,
    pub failed: usize,
    pub trials: usize,
}

fn cell(value: Option<f64>, precision: usize) -> String {
    value.map(|v| format!("{:.*}", precision, v)).unwrap_or_else(|| "-".to_string())
}

/// Print per-option averages in a human-readable table
pub fn print_summary(summaries: &[OptionSummary]) {
    if summaries.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.add_row(row![
        "Option",
        "Avg Size (MB)",
        "Avg Ratio",
        "Avg Savings (%)",
        "Write Speed (MB/s)",
        "Read Speed (MB/s)",
        "Failed"
    ]);

    for s in summaries {
        table.add_row(row![
            &s.option,
            cell(s.size, 1),
            cell(s.ratio, 3),
            cell(s.savings.map(|v| v * 100.0), 1),
            cell(s.write_speed, 2),
            cell(s.read_speed, 2),
            format!("{}/{}", s.failed, s.trials),
        ]);
    }

    println!();
    table.printstd();
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_write_metrics() {
        let r = TrialResult::write("a.tif", "lzw", 2.0, 100.0, 25.0);
        assert!(close(r.ratio.unwrap(), 4.0));
        assert!(close(r.savings.unwrap(), 0.75));
        assert!(close(r.speed.unwrap(), 50.0));
        assert!(close(r.size.unwrap(), 25.0));
        assert!(close(r.time.unwrap(), 2.0));
    }

    #[test]
    fn test_read_leaves_size_fields_empty() {
        let r = TrialResult::read("a.tif", "lzw", 0.5, 100.0);
        assert_eq!(r.to_string(), "read;a.tif;lzw;0.5;;;;200");
    }

    #[test]
    fn test_failed_rows_are_empty_not_zero() {
        let w = TrialResult::failed(TestKind::Write, "a.tif", "bad");
        assert_eq!(w.to_string(), "write;a.tif;bad;;;;;");
        assert!(w.is_failed());
    }

    #[test]
    fn test_delimited_output() {
        let mut report = Report::new();
        report.push(TrialResult::write("a.tif", "lzw", 1.0, 8.0, 2.0));
        report.push(TrialResult::failed(TestKind::Read, "a.tif", "lzw"));

        let text = report.to_delimited();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], REPORT_HEADER);
        assert_eq!(lines[1], "write;a.tif;lzw;1;2;4;0.75;8");
        assert_eq!(lines[2], "read;a.tif;lzw;;;;;");
        assert!(lines.iter().all(|l| l.split(REPORT_DELIMITER).count() == 8));
    }

    #[test]
    fn test_write_delimited_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "stale content that is longer than the new report\n".repeat(10)).unwrap();

        let report = Report::new();
        report.write_delimited(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{}\n", REPORT_HEADER));
    }

    #[test]
    fn test_json_uses_null_for_missing_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");

        let mut report = Report::new();
        report.push(TrialResult::failed(TestKind::Write, "a.tif", "bad"));
        report.write_json(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let rows: Vec<TrialResult> = serde_json::from_str(&text).unwrap();
        assert_eq!(rows, report.rows());
        let raw: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw[0]["test"], "write");
        assert!(raw[0]["time"].is_null());
    }

    #[test]
    fn test_summarize_groups_by_option() {
        let mut report = Report::new();
        report.push(TrialResult::write("a.tif", "lzw", 1.0, 10.0, 5.0));
        report.push(TrialResult::read("a.tif", "lzw", 0.5, 10.0));
        report.push(TrialResult::write("b.tif", "lzw", 1.0, 30.0, 10.0));
        report.push(TrialResult::failed(TestKind::Read, "b.tif", "lzw"));
        report.push(TrialResult::failed(TestKind::Write, "a.tif", "broken"));
        report.push(TrialResult::failed(TestKind::Read, "a.tif", "broken"));

        let summary = report.summarize();
        assert_eq!(summary.len(), 2);

        let lzw = &summary[0];
        assert_eq!(lzw.option, "lzw");
        assert!(close(lzw.ratio.unwrap(), 2.5));
        assert!(close(lzw.write_speed.unwrap(), 20.0));
        assert!(close(lzw.read_speed.unwrap(), 20.0));
        assert_eq!((lzw.failed, lzw.trials), (1, 4));

        let broken = &summary[1];
        assert_eq!(broken.option, "broken");
        assert!(broken.ratio.is_none());
        assert_eq!((broken.failed, broken.trials), (2, 2));
    }

    #[test]
    fn test_bytes_to_mb() {
        assert!(close(bytes_to_mb(1024 * 1024), 1.0));
        assert!(close(bytes_to_mb(512 * 1024), 0.5));
    }
}
