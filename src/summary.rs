//! Post-session summary of a call-graph artifact
//!
//! Loads an artifact, orders its functions by one [`SortKey`] and keeps the
//! top rows. Purely diagnostic: nothing here is needed for profiling to work.

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use crate::artifact::{self, FunctionRecord};
use crate::config::SortKey;
use crate::error::Result;

/// One function in a summary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub function_id: String,
    pub call_count: u64,
    pub recursive_call_count: u64,
    /// Internal time, sub-calls excluded
    pub total_time: Duration,
    /// Time including sub-calls
    pub cumulative_time: Duration,
}

impl Row {
    /// Internal time per call
    pub fn per_call(&self) -> Duration {
        if self.call_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total_time.as_nanos() / u128::from(self.call_count)) as u64)
    }

    fn metric(&self, key: SortKey) -> u128 {
        match key {
            SortKey::Cumulative => self.cumulative_time.as_nanos(),
            SortKey::InternalTime | SortKey::TotalTime => self.total_time.as_nanos(),
            SortKey::CallCount => u128::from(self.call_count),
            SortKey::RecursiveCallCount => u128::from(self.recursive_call_count),
            SortKey::PerCall => self.per_call().as_nanos(),
        }
    }
}

impl From<FunctionRecord> for Row {
    fn from(record: FunctionRecord) -> Self {
        Row {
            function_id: record.id,
            call_count: record.call_count,
            recursive_call_count: record.recursive_call_count,
            total_time: Duration::from_nanos(record.total_time_ns),
            cumulative_time: Duration::from_nanos(record.cumulative_time_ns),
        }
    }
}

/// Load `path` and return its top `max_results` rows, descending by `sort_by`
///
/// Ties are broken by function id so the output is deterministic.
pub fn summarize(path: &Path, sort_by: SortKey, max_results: usize) -> Result<Vec<Row>> {
    let graph = artifact::read_artifact(path)?;
    let rows = graph.functions.into_iter().map(Row::from).collect();
    Ok(top_rows(rows, sort_by, max_results))
}

/// Sort and truncate already-loaded rows
pub fn top_rows(mut rows: Vec<Row>, sort_by: SortKey, max_results: usize) -> Vec<Row> {
    rows.sort_by(|a, b| {
        b.metric(sort_by)
            .cmp(&a.metric(sort_by))
            .then_with(|| a.function_id.cmp(&b.function_id))
    });
    rows.truncate(max_results);
    rows
}

/// Render rows as a fixed-width table
pub fn write_table<W: Write>(out: &mut W, rows: &[Row], sort_by: SortKey) -> io::Result<()> {
    writeln!(out, "Call-graph summary (sorted by {sort_by}, {} rows)", rows.len())?;
    writeln!(
        out,
        "{:>10} {:>10} {:>12} {:>12} {:>12}  {}",
        "ncalls", "recursive", "tottime", "percall", "cumtime", "function"
    )?;
    writeln!(out, "{}", "─".repeat(88))?;
    for row in rows {
        writeln!(
            out,
            "{:>10} {:>10} {:>11.6}s {:>11.6}s {:>11.6}s  {}",
            row.call_count,
            row.recursive_call_count,
            row.total_time.as_secs_f64(),
            row.per_call().as_secs_f64(),
            row.cumulative_time.as_secs_f64(),
            row.function_id
        )?;
    }
    writeln!(out, "{}", "─".repeat(88))
}

/// Print rows to stderr
pub fn print_summary(rows: &[Row], sort_by: SortKey) {
    if rows.is_empty() {
        eprintln!("\nNo call-graph data recorded.");
        return;
    }
    let mut stderr = io::stderr().lock();
    if let Err(e) = write_table(&mut stderr, rows, sort_by) {
        tracing::warn!(error = %e, "failed to print call-graph summary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{CallGraph, FORMAT_VERSION};
    use crate::error::ProfilingError;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(id: &str, calls: u64, recursive: u64, total_ms: u64, cum_ms: u64) -> FunctionRecord {
        FunctionRecord {
            id: id.to_string(),
            call_count: calls,
            recursive_call_count: recursive,
            total_time_ns: total_ms * 1_000_000,
            cumulative_time_ns: cum_ms * 1_000_000,
            callers: BTreeMap::new(),
        }
    }

    fn write_sample(dir: &Path) -> std::path::PathBuf {
        let graph = CallGraph {
            format_version: FORMAT_VERSION,
            session: "unit".to_string(),
            started_at: 1,
            wall_time_ns: 200_000_000,
            functions: vec![
                record("parse", 10, 0, 40, 60),
                record("load", 1, 0, 90, 150),
                record("walk", 30, 20, 20, 25),
                record("emit", 2, 0, 50, 50),
            ],
        };
        artifact::write_artifact(dir, &graph).unwrap()
    }

    fn ids(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|r| r.function_id.as_str()).collect()
    }

    #[test]
    fn test_summarize_truncates_and_orders() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write_sample(tmp_dir.path());

        let rows = summarize(&path, SortKey::Cumulative, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(ids(&rows), ["load", "parse"]);
        assert!(rows[0].cumulative_time >= rows[1].cumulative_time);
    }

    #[test]
    fn test_each_sort_key() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write_sample(tmp_dir.path());

        let first = |key| summarize(&path, key, 1).unwrap()[0].function_id.clone();
        assert_eq!(first(SortKey::Cumulative), "load");
        assert_eq!(first(SortKey::InternalTime), "load");
        assert_eq!(first(SortKey::TotalTime), "load");
        assert_eq!(first(SortKey::CallCount), "walk");
        assert_eq!(first(SortKey::RecursiveCallCount), "walk");
        // load: 90ms/1, emit: 25ms, parse: 4ms
        assert_eq!(first(SortKey::PerCall), "load");
    }

    #[test]
    fn test_ties_break_by_function_id() {
        let rows = vec![
            Row::from(record("b", 1, 0, 5, 5)),
            Row::from(record("a", 1, 0, 5, 5)),
        ];
        assert_eq!(ids(&top_rows(rows, SortKey::CallCount, 10)), ["a", "b"]);
    }

    #[test]
    fn test_max_results_larger_than_rows() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write_sample(tmp_dir.path());
        assert_eq!(summarize(&path, SortKey::CallCount, 50).unwrap().len(), 4);
    }

    #[test]
    fn test_missing_artifact_is_read_error() {
        let tmp_dir = TempDir::new().unwrap();
        let err = summarize(&tmp_dir.path().join("gone.prof"), SortKey::Cumulative, 5).unwrap_err();
        assert!(matches!(err, ProfilingError::ArtifactRead { .. }));
    }

    #[test]
    fn test_per_call_zero_calls() {
        let row = Row::from(record("never", 0, 0, 0, 0));
        assert_eq!(row.per_call(), Duration::ZERO);
    }

    #[test]
    fn test_write_table() {
        let rows = vec![Row::from(record("load", 3, 1, 30, 45))];
        let mut out = Vec::new();
        write_table(&mut out, &rows, SortKey::Cumulative).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("sorted by cumulative"));
        assert!(text.contains("ncalls"));
        assert!(text.contains("load"));
        assert!(text.contains("0.010000s"));
    }

    #[test]
    fn test_print_summary_does_not_panic() {
        print_summary(&[], SortKey::Cumulative);
        print_summary(&[Row::from(record("load", 1, 0, 1, 1))], SortKey::PerCall);
    }
}
