//! Profiling session lifecycle
//!
//! A [`Session`] wraps one span of work: `Idle -> Running -> Stopped`, nothing
//! else. Starting engages the process-wide recorder and stopping persists the
//! recorded call graph as one artifact. A stopped session cannot be restarted.
//!
//! With profiling disabled the session still walks the state machine, but
//! never touches the recorder, the clock or the filesystem.
//!
//! # Example
//! ```no_run
//! use perfil::config::{ConfigResolver, PartialConfig};
//! use perfil::session::Session;
//!
//! let config = ConfigResolver::new()
//!     .resolve(&PartialConfig::new().enabled(true))
//!     .unwrap();
//! let mut session = Session::new("nightly_load", &config);
//! session.start().unwrap();
//! // ... work ...
//! let artifact = session.stop(None).unwrap();
//! println!("wrote {:?}", artifact);
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::artifact::{self, CallGraph};
use crate::config::EffectiveConfig;
use crate::error::{ProfilingError, Result};
use crate::recorder::{Recorder, RecorderHandle};

/// Source of artifact timestamps
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch
    fn unix_seconds(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_seconds(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// Lifecycle state of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One start/stop span of profiling bound to at most one artifact
pub struct Session {
    name: String,
    config: EffectiveConfig,
    clock: Arc<dyn Clock>,
    state: SessionState,
    started_at: Option<u64>,
    started: Option<Instant>,
    elapsed: Duration,
    artifact_path: Option<PathBuf>,
    recorder: Option<RecorderHandle>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("started_at", &self.started_at)
            .field("elapsed", &self.elapsed)
            .field("artifact_path", &self.artifact_path)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an idle session using the system clock
    pub fn new(name: impl Into<String>, config: &EffectiveConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create an idle session with an explicit timestamp source
    pub fn with_clock(
        name: impl Into<String>,
        config: &EffectiveConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config: config.clone(),
            clock,
            state: SessionState::Idle,
            started_at: None,
            started: None,
            elapsed: Duration::ZERO,
            artifact_path: None,
            recorder: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// Unix seconds at start; `None` before start or when disabled
    pub fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Set only after a successful stop
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Wall time accumulated so far (frozen once stopped)
    pub fn elapsed(&self) -> Duration {
        match (self.state, self.started) {
            (SessionState::Running, Some(started)) => started.elapsed(),
            _ => self.elapsed,
        }
    }

    /// Begin the span
    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(ProfilingError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        if !self.config.enabled() {
            self.state = SessionState::Running;
            return Ok(());
        }

        let handle = Recorder::engage()?;
        let output_dir = self.config.output_dir();
        if let Err(source) = std::fs::create_dir_all(output_dir) {
            // handle drops here, releasing the recorder
            return Err(ProfilingError::ArtifactWrite {
                path: output_dir.to_path_buf(),
                source,
            });
        }

        let started_at = self.clock.unix_seconds();
        tracing::debug!(
            session = %self.name,
            started_at,
            output_dir = %output_dir.display(),
            "profiling session started"
        );
        self.recorder = Some(handle);
        self.started_at = Some(started_at);
        self.started = Some(Instant::now());
        self.state = SessionState::Running;
        Ok(())
    }

    /// End the span and persist the artifact.
    ///
    /// Returns the artifact path, or `None` when profiling is disabled. The
    /// session is `Stopped` afterwards even if writing fails.
    pub fn stop(&mut self, label: Option<&str>) -> Result<Option<PathBuf>> {
        if self.state != SessionState::Running {
            return Err(ProfilingError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }

        self.state = SessionState::Stopped;
        if let Some(started) = self.started {
            self.elapsed = started.elapsed();
        }

        let Some(handle) = self.recorder.take() else {
            return Ok(None);
        };
        let recorded = handle.finish();

        let label = label.unwrap_or(&self.name);
        let started_at = self.started_at.unwrap_or_default();
        let graph = CallGraph::from_recorded(label, started_at, recorded);
        let path = artifact::write_artifact(self.config.output_dir(), &graph)?;

        tracing::info!(
            session = %self.name,
            artifact = %path.display(),
            functions = graph.functions.len(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "profiling artifact written"
        );
        self.artifact_path = Some(path.clone());
        Ok(Some(path))
    }
}
