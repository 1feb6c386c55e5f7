//! Higher-order wrappers that profile every invocation of a callable
//!
//! [`profiled`] runs each call inside a fresh session, so repeated calls
//! produce one artifact each. [`timed`] only measures wall time. Neither
//! wrapper ever alters what the callable returns: an `Err` comes back as the
//! same `Err`, and a panic keeps unwinding after the session has been
//! stopped and its artifact written.
//!
//! # Example
//! ```no_run
//! use perfil::config::{ConfigResolver, PartialConfig};
//! use perfil::decorators::profiled;
//!
//! fn load_partition(id: u32) -> Result<usize, String> {
//!     perfil::frame!();
//!     Ok(id as usize * 10)
//! }
//!
//! let config = ConfigResolver::new()
//!     .resolve(&PartialConfig::new().enabled(true))
//!     .unwrap();
//! let load = profiled(&config, None, load_partition);
//! assert_eq!(load.call(4), Ok(40));
//! assert_eq!(load.artifacts().len(), 1);
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::EffectiveConfig;
use crate::recorder::{self, trim_closure_suffix};
use crate::scoped::{ArtifactSink, SessionGuard, TimedGuard};
use crate::session::{Clock, SystemClock};

/// Name used when a callable's type has no path, e.g. `fn(u32) -> u32`
const UNNAMED_CALLABLE: &str = "session";

/// Short name of a callable type: `module::load` -> `load`; closures are
/// named after the function that defines them
pub fn callable_name<F>() -> &'static str {
    let full = trim_closure_suffix(std::any::type_name::<F>());
    let path = full.split('<').next().unwrap_or(full);
    let last = path.rsplit("::").next().unwrap_or(path);
    let is_ident = last.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && last.chars().all(|c| c.is_alphanumeric() || c == '_');
    if is_ident {
        last
    } else {
        UNNAMED_CALLABLE
    }
}

/// A callable whose every invocation is profiled as one session
pub struct Profiled<F> {
    func: F,
    name: String,
    config: EffectiveConfig,
    clock: Arc<dyn Clock>,
    print_summary: bool,
    artifacts: ArtifactSink,
}

/// Wrap `func` so each call is recorded into its own artifact
///
/// `name` defaults to the callable's own name.
pub fn profiled<F>(config: &EffectiveConfig, name: Option<&str>, func: F) -> Profiled<F> {
    Profiled {
        name: name.unwrap_or_else(|| callable_name::<F>()).to_string(),
        func,
        config: config.clone(),
        clock: Arc::new(SystemClock),
        print_summary: false,
        artifacts: ArtifactSink::default(),
    }
}

impl<F> Profiled<F> {
    /// Use an explicit timestamp source for artifact names
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Print a summary to stderr after every profiled call
    pub fn with_summary(mut self, print_summary: bool) -> Self {
        self.print_summary = print_summary;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifacts written so far, oldest first
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.artifacts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invoke a one-argument callable (use a tuple for several arguments)
    pub fn call<A, R>(&self, arg: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.scoped(|| (self.func)(arg))
    }

    /// Invoke a callable that takes no arguments
    pub fn run<R>(&self) -> R
    where
        F: Fn() -> R,
    {
        self.scoped(|| (self.func)())
    }

    fn scoped<R>(&self, body: impl FnOnce() -> R) -> R {
        if !self.config.enabled() {
            return body();
        }

        let _guard =
            match SessionGuard::enter_with_clock(&self.config, self.name.as_str(), self.clock.clone()) {
                Ok(guard) => guard
                    .with_summary(self.print_summary)
                    .with_sink(self.artifacts.clone()),
                Err(e) => {
                    tracing::warn!(name = %self.name, error = %e, "profiling session not started");
                    return body();
                }
            };
        recorder::record(self.name.clone(), body)
    }
}

/// A callable whose every invocation is timed and logged
pub struct Timed<F> {
    func: F,
    name: String,
    config: EffectiveConfig,
    last_elapsed: Mutex<Option<Duration>>,
}

/// Wrap `func` so each call's wall time is logged
pub fn timed<F>(config: &EffectiveConfig, name: Option<&str>, func: F) -> Timed<F> {
    Timed {
        name: name.unwrap_or_else(|| callable_name::<F>()).to_string(),
        func,
        config: config.clone(),
        last_elapsed: Mutex::new(None),
    }
}

impl<F> Timed<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Elapsed time of the most recent completed call (`None` when disabled)
    pub fn last_elapsed(&self) -> Option<Duration> {
        *self
            .last_elapsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke a one-argument callable (use a tuple for several arguments)
    pub fn call<A, R>(&self, arg: A) -> R
    where
        F: Fn(A) -> R,
    {
        self.measured(|| (self.func)(arg))
    }

    /// Invoke a callable that takes no arguments
    pub fn run<R>(&self) -> R
    where
        F: Fn() -> R,
    {
        self.measured(|| (self.func)())
    }

    fn measured<R>(&self, body: impl FnOnce() -> R) -> R {
        if !self.config.enabled() {
            return body();
        }

        let guard = TimedGuard::enter(&self.config, self.name.as_str());
        let value = body();
        if let Some(elapsed) = guard.finish() {
            *self
                .last_elapsed
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(elapsed);
        }
        value
    }
}
