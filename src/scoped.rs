//! Scoped profiling of arbitrary blocks
//!
//! [`SessionGuard`] starts a session on entry and stops it exactly once:
//! explicitly through [`SessionGuard::finish`], or on drop, including while a
//! panic unwinds. [`TimedGuard`] is the timing-only sibling that never
//! touches the recorder or the output directory.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::session::{Clock, Session, SystemClock};
use crate::summary;

/// Collects artifact paths written by guards
pub(crate) type ArtifactSink = Arc<Mutex<Vec<PathBuf>>>;

/// A running session that is stopped when the guard goes away
#[must_use = "the session stops as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SessionGuard {
    session: Option<Session>,
    print_summary: bool,
    sink: Option<ArtifactSink>,
}

impl SessionGuard {
    /// Create and start a session named `name`
    pub fn enter(config: &EffectiveConfig, name: impl Into<String>) -> Result<Self> {
        Self::enter_with_clock(config, name, Arc::new(SystemClock))
    }

    /// Like [`SessionGuard::enter`] with an explicit timestamp source
    pub fn enter_with_clock(
        config: &EffectiveConfig,
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut session = Session::with_clock(name, config, clock);
        session.start()?;
        Ok(Self {
            session: Some(session),
            print_summary: false,
            sink: None,
        })
    }

    /// Print a summary of the artifact to stderr once it is written
    pub fn with_summary(mut self, print_summary: bool) -> Self {
        self.print_summary = print_summary;
        self
    }

    pub(crate) fn with_sink(mut self, sink: ArtifactSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The guarded session, `None` once stopped
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Stop now and return the artifact path (`None` when disabled)
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.stop()
    }

    fn stop(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };
        let path = session.stop(None)?;

        if let Some(path) = &path {
            if let Some(sink) = &self.sink {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(path.clone());
            }
            if self.print_summary {
                let config = session.config();
                match summary::summarize(path, config.sort_by(), config.max_results()) {
                    Ok(rows) => summary::print_summary(&rows, config.sort_by()),
                    Err(e) => tracing::warn!(error = %e, "failed to summarize artifact"),
                }
            }
        }
        Ok(path)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.is_none() {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop profiling session");
        }
    }
}

/// Wall-clock measurement of a block; logs the elapsed time when it ends
#[must_use = "the measurement ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct TimedGuard {
    name: String,
    started: Option<Instant>,
}

impl TimedGuard {
    /// Start measuring; inert when profiling is disabled
    pub fn enter(config: &EffectiveConfig, name: impl Into<String>) -> Self {
        if !config.enabled() {
            return Self {
                name: String::new(),
                started: None,
            };
        }
        Self {
            name: name.into(),
            started: Some(Instant::now()),
        }
    }

    /// Stop measuring and return the elapsed time (`None` when disabled)
    pub fn finish(mut self) -> Option<Duration> {
        self.stop()
    }

    fn stop(&mut self) -> Option<Duration> {
        let elapsed = self.started.take()?.elapsed();
        tracing::info!(
            name = %self.name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "timed block finished"
        );
        Some(elapsed)
    }
}

impl Drop for TimedGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `f` inside a session and return its value with the artifact path.
///
/// Profiling failures are logged and yield `None`; they never change what
/// `f` returns.
pub fn profile_block<R>(
    config: &EffectiveConfig,
    name: impl Into<String>,
    f: impl FnOnce() -> R,
) -> (R, Option<PathBuf>) {
    if !config.enabled() {
        return (f(), None);
    }

    let guard = match SessionGuard::enter(config, name) {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "profiling session not started");
            None
        }
    };
    let value = f();
    let artifact = guard.and_then(|guard| match guard.finish() {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(error = %e, "failed to stop profiling session");
            None
        }
    });
    (value, artifact)
}

/// Run `f` and measure its wall time (`None` when disabled)
pub fn time_block<R>(
    config: &EffectiveConfig,
    name: impl Into<String>,
    f: impl FnOnce() -> R,
) -> (R, Option<Duration>) {
    if !config.enabled() {
        return (f(), None);
    }

    let guard = TimedGuard::enter(config, name);
    let value = f();
    (value, guard.finish())
}
