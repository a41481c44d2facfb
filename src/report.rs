//! Read counters and the end-of-run report.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::Params;
use crate::read::{PassStatus, ReadClass};

/// Timestamp format used in reports.
pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d-%H:%M:%S";

/// Per-batch read counts, merged after all batches finish.
///
/// Every read handled is either skipped or counted in exactly one
/// class/status cell, so `total == skipped + sum(cells)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total: u64,
    pub skipped: u64,
    table: [[u64; 2]; 3],
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, class: ReadClass, status: PassStatus) {
        self.total += 1;
        self.table[class.index()][status.index()] += 1;
    }

    pub fn skip(&mut self) {
        self.total += 1;
        self.skipped += 1;
    }

    pub fn get(&self, class: ReadClass, status: PassStatus) -> u64 {
        self.table[class.index()][status.index()]
    }

    pub fn class_total(&self, class: ReadClass) -> u64 {
        self.table[class.index()].iter().sum()
    }

    pub fn merge(&mut self, other: &Counters) {
        self.total += other.total;
        self.skipped += other.skipped;
        for (row, other_row) in self.table.iter_mut().zip(other.table.iter()) {
            for (cell, other_cell) in row.iter_mut().zip(other_row.iter()) {
                *cell += other_cell;
            }
        }
    }

    /// Human-readable summary, one line per class.
    pub fn write_summary(&self, output: &mut dyn Write) -> std::io::Result<()> {
        let percent = |n: u64| {
            if self.total > 0 {
                100.0 * n as f64 / self.total as f64
            } else {
                0.0
            }
        };

        writeln!(output, "\nRead Statistics:")?;
        writeln!(output, "  Total reads processed: {}", self.total)?;
        writeln!(output, "  Skipped: {} ({:.2}%)", self.skipped, percent(self.skipped))?;
        for class in ReadClass::ALL {
            let n = self.class_total(class);
            writeln!(
                output,
                "  {}: {} ({:.2}%), passed {}, filtered {}",
                class,
                n,
                percent(n),
                self.get(class, PassStatus::Passed),
                self.get(class, PassStatus::Filtered),
            )?;
        }
        Ok(())
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, other: Self) {
        self.merge(&other);
    }
}

impl std::iter::Sum for Counters {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Counters::new(), |mut acc, c| {
            acc += c;
            acc
        })
    }
}

/// Machine-readable summary of a run, written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub start_time: String,
    pub stop_time: String,
    pub input: PathBuf,
    pub total_reads: u64,
    pub skipped: u64,
    /// class name -> status name -> count
    pub counts: BTreeMap<&'static str, BTreeMap<&'static str, u64>>,
    pub params: Params,
}

impl Report {
    pub fn new(
        start: DateTime<Local>,
        stop: DateTime<Local>,
        input: &Path,
        counters: &Counters,
        params: &Params,
    ) -> Self {
        let counts = ReadClass::ALL
            .iter()
            .map(|&class| {
                let by_status = PassStatus::ALL
                    .iter()
                    .map(|&status| (status.name(), counters.get(class, status)))
                    .collect();
                (class.name(), by_status)
            })
            .collect();

        Self {
            start_time: start.format(TIMESTAMP_FORMAT).to_string(),
            stop_time: stop.format(TIMESTAMP_FORMAT).to_string(),
            input: input.to_path_buf(),
            total_reads: counters.total,
            skipped: counters.skipped,
            counts,
            params: params.clone(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create report directory {:?}", parent))?;
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report file {:?}", path))?;
        let mut writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .with_context(|| format!("Failed to write report {:?}", path))?;
        writer.flush().with_context(|| format!("Failed to write report {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn sample() -> Counters {
        let mut c = Counters::new();
        c.record(ReadClass::FullLength, PassStatus::Passed);
        c.record(ReadClass::FullLength, PassStatus::Passed);
        c.record(ReadClass::Fusion, PassStatus::Filtered);
        c.record(ReadClass::Truncated, PassStatus::Passed);
        c.skip();
        c
    }

    fn assert_balanced(c: &Counters) {
        let cells: u64 = ReadClass::ALL.iter().map(|&class| c.class_total(class)).sum();
        assert_eq!(c.total, c.skipped + cells);
    }

    #[test]
    fn test_counters_record_and_skip() {
        let c = sample();
        assert_eq!(c.total, 5);
        assert_eq!(c.skipped, 1);
        assert_eq!(c.get(ReadClass::FullLength, PassStatus::Passed), 2);
        assert_eq!(c.get(ReadClass::Fusion, PassStatus::Filtered), 1);
        assert_eq!(c.class_total(ReadClass::Truncated), 1);
        assert_balanced(&c);
    }

    #[test]
    fn test_merge_is_additive_and_commutative() {
        let a = sample();
        let mut b = Counters::new();
        b.record(ReadClass::Truncated, PassStatus::Filtered);
        b.skip();

        let mut ab = a;
        ab += b;
        let mut ba = b;
        ba += a;
        assert_eq!(ab, ba);
        assert_eq!(ab.total, 7);
        assert_eq!(ab.skipped, 2);
        assert_balanced(&ab);

        let summed: Counters = vec![a, b, Counters::new()].into_iter().sum();
        assert_eq!(summed, ab);
    }

    #[test]
    fn test_summary_text() {
        let mut out = Vec::new();
        sample().write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Total reads processed: 5"));
        assert!(text.contains("Skipped: 1 (20.00%)"));
        assert!(text.contains("full-length: 2 (40.00%), passed 2, filtered 0"));
    }

    #[test]
    fn test_summary_with_no_reads() {
        let mut out = Vec::new();
        Counters::new().write_summary(&mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Skipped: 0 (0.00%)"));
    }

    #[test]
    fn test_report_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let start = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 0).unwrap();
        let stop = Local.with_ymd_and_hms(2024, 3, 1, 9, 6, 30).unwrap();
        let params = Params { disable_annot: true, threads: 1, ..Params::default() };

        Report::new(start, stop, Path::new("reads.fq"), &sample(), &params)
            .write_json(&path)
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["start_time"], "2024/03/01-09:05:00");
        assert_eq!(json["stop_time"], "2024/03/01-09:06:30");
        assert_eq!(json["total_reads"], 5);
        assert_eq!(json["skipped"], 1);
        assert_eq!(json["counts"]["full-length"]["passed"], 2);
        assert_eq!(json["counts"]["fusion"]["filtered"], 1);
        assert_eq!(json["params"]["disable_annot"], true);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_report_write_failure_is_reported() {
        let now = Local::now();
        let report = Report::new(now, now, Path::new("reads.fq"), &sample(), &Params::default());
        // writes to /dev/full fail with ENOSPC once the buffer is flushed
        assert!(report.write_json(Path::new("/dev/full")).is_err());
    }
}
