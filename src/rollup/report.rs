//! CSV report output for fluctuation indexes and observed outliers
//!
//! Both reports append to timestamped files in the configured report
//! directory, so repeated passes within the same minute accumulate into one
//! file while later runs start fresh files.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn report_file_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}.csv", prefix, now.format("%m%d%Y_%H%M"))
}

/// Appending writer for the per-pass fluctuation index report
pub struct FluctuationReport {
    path: PathBuf,
}

impl FluctuationReport {
    pub fn new(dir: &Path, now: DateTime<Utc>) -> Self {
        Self {
            path: dir.join(report_file_name("FluctuationIndexReport", now)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one header plus the given rows, sorted by the caller
    pub fn append(&self, rows: &[(String, f64)]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "Name, Fluctuation Index")?;
        for (name, value) in rows {
            writeln!(file, "{}, {}", name, value)?;
        }
        Ok(())
    }
}

/// Appending writer for outlier observations
///
/// Outlier events arrive from concurrent consumers, so appends are
/// serialized under a lock to keep lines whole.
pub struct OutlierReporter {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl OutlierReporter {
    pub fn new(dir: &Path, now: DateTime<Utc>) -> Self {
        Self {
            path: dir.join(report_file_name("BranchOutlierReport", now)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, name: &str, timestamp: DateTime<Utc>) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "Found outlier in Branch element {} at {}",
            name,
            timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_fluctuation_report_appends_header_per_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let report = FluctuationReport::new(dir.path(), now());
        assert!(report
            .path()
            .to_string_lossy()
            .ends_with("FluctuationIndexReport_03052024_1430.csv"));

        report
            .append(&[("Branch00000001".to_string(), 1.0)])
            .unwrap();
        report
            .append(&[("Branch00000002".to_string(), 0.5)])
            .unwrap();

        let contents = std::fs::read_to_string(report.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Name, Fluctuation Index",
                "Branch00000001, 1",
                "Name, Fluctuation Index",
                "Branch00000002, 0.5",
            ]
        );
    }

    #[test]
    fn test_outlier_reporter_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = OutlierReporter::new(dir.path(), now());
        assert!(reporter
            .path()
            .to_string_lossy()
            .ends_with("BranchOutlierReport_03052024_1430.csv"));

        reporter.record("Branch00000003", now()).unwrap();
        let contents = std::fs::read_to_string(reporter.path()).unwrap();
        assert_eq!(
            contents,
            "Found outlier in Branch element Branch00000003 at 2024-03-05 14:30:00\n"
        );
    }
}
