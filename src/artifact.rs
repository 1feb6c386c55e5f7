//! Call-graph artifact format and persistence
//!
//! One artifact is written per completed session, at
//! `{output_dir}/{label}_{started_at}.prof`, as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, IntoInnerError, Write};
use std::path::{Path, PathBuf};

use crate::error::{ProfilingError, Result};
use crate::recorder::RecordedGraph;

/// File extension of call-graph artifacts
pub const ARTIFACT_EXTENSION: &str = "prof";

/// Artifact layout version
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on `_N` suffixes tried when a filename is already taken
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Serialized output of one completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    pub format_version: u32,
    /// Session label the artifact was written under
    pub session: String,
    /// Unix seconds at session start
    pub started_at: u64,
    /// Wall time of the whole session in nanoseconds
    pub wall_time_ns: u64,
    pub functions: Vec<FunctionRecord>,
}

/// Statistics for one function in an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: String,
    pub call_count: u64,
    pub recursive_call_count: u64,
    /// Internal time in nanoseconds, sub-calls excluded
    pub total_time_ns: u64,
    /// Time including sub-calls in nanoseconds
    pub cumulative_time_ns: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callers: BTreeMap<String, u64>,
}

impl CallGraph {
    /// Build an artifact from a recorder snapshot.
    ///
    /// The session itself becomes a synthetic root row named
    /// `<session:{label}>`; its internal time is wall time not covered by any
    /// top-level instrumented frame.
    pub fn from_recorded(label: &str, started_at: u64, recorded: RecordedGraph) -> Self {
        let wall_ns = nanos(recorded.wall_time);
        let mut functions = Vec::with_capacity(recorded.functions.len() + 1);
        functions.push(FunctionRecord {
            id: format!("<session:{label}>"),
            call_count: 1,
            recursive_call_count: 0,
            total_time_ns: wall_ns.saturating_sub(nanos(recorded.top_level_time)),
            cumulative_time_ns: wall_ns,
            callers: BTreeMap::new(),
        });
        functions.extend(
            recorded
                .functions
                .into_iter()
                .map(|(id, stats)| FunctionRecord {
                    id,
                    call_count: stats.call_count,
                    recursive_call_count: stats.recursive_call_count,
                    total_time_ns: nanos(stats.internal_time),
                    cumulative_time_ns: nanos(stats.cumulative_time),
                    callers: stats.callers,
                }),
        );

        Self {
            format_version: FORMAT_VERSION,
            session: label.to_string(),
            started_at,
            wall_time_ns: wall_ns,
            functions,
        }
    }
}

fn nanos(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Make a session label safe to embed in a filename
pub fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `{label}_{started_at}.prof`
pub fn artifact_file_name(label: &str, started_at: u64) -> String {
    format!(
        "{}_{}.{}",
        sanitize_label(label),
        started_at,
        ARTIFACT_EXTENSION
    )
}

/// Durably write `graph` into `dir`, returning the path written.
///
/// Never overwrites: if the canonical name exists, `_1`, `_2`, ... is appended
/// to the stem. A file that could not be written completely is removed.
pub fn write_artifact(dir: &Path, graph: &CallGraph) -> Result<PathBuf> {
    write_artifact_with(dir, graph, |file, graph| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, graph)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()
    })
}

fn write_artifact_with(
    dir: &Path,
    graph: &CallGraph,
    persist: impl FnOnce(File, &CallGraph) -> io::Result<()>,
) -> Result<PathBuf> {
    let file_name = artifact_file_name(&graph.session, graph.started_at);
    let (path, file) = create_unique(dir, &file_name)?;

    if let Err(source) = persist(file, graph) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial artifact");
        }
        return Err(ProfilingError::ArtifactWrite { path, source });
    }
    Ok(path)
}

fn create_unique(dir: &Path, file_name: &str) -> Result<(PathBuf, File)> {
    let stem = file_name
        .strip_suffix(&format!(".{ARTIFACT_EXTENSION}"))
        .unwrap_or(file_name);
    let mut suffix = 0;
    loop {
        let path = if suffix == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{stem}_{suffix}.{ARTIFACT_EXTENSION}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists && suffix < MAX_COLLISION_SUFFIX => {
                suffix += 1;
            }
            Err(source) => return Err(ProfilingError::ArtifactWrite { path, source }),
        }
    }
}

/// Load an artifact written by [`write_artifact`]
pub fn read_artifact(path: &Path) -> Result<CallGraph> {
    let read_err = |reason: String| ProfilingError::ArtifactRead {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| read_err(e.to_string()))?;
    let graph: CallGraph =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| read_err(e.to_string()))?;
    if graph.format_version != FORMAT_VERSION {
        return Err(read_err(format!(
            "unsupported format version {} (expected {FORMAT_VERSION})",
            graph.format_version
        )));
    }
    Ok(graph)
}
