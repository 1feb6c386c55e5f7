//! Profiling configuration resolution
//!
//! Merges three sources into one immutable [`EffectiveConfig`], highest wins:
//!
//! 1. explicit overrides supplied by the caller ([`PartialConfig`], usually
//!    built from CLI flags),
//! 2. one environment variable per field (`{PREFIX}_PROFILING_*`),
//! 3. built-in defaults.
//!
//! Only absence falls through to the next source. A malformed value is a
//! [`ProfilingError::ConfigParse`], never a silent default.
//!
//! # Example
//! ```
//! use std::collections::HashMap;
//! use perfil::config::{ConfigResolver, PartialConfig, SortKey};
//!
//! let env = HashMap::from([("PERFIL_PROFILING_SORT_BY".to_string(), "calls".to_string())]);
//! let config = ConfigResolver::with_env(env)
//!     .resolve(&PartialConfig::new().enabled(true))
//!     .unwrap();
//! assert!(config.enabled());
//! assert_eq!(config.sort_by(), SortKey::CallCount);
//! assert_eq!(config.max_results(), 50);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ProfilingError, Result};

/// Environment variable prefix used when the host does not supply its own
pub const DEFAULT_ENV_PREFIX: &str = "PERFIL";

/// Default artifact directory, relative to the working directory
pub const DEFAULT_OUTPUT_DIR: &str = "./profiling_output";

/// Default cap on summary rows
pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Metric used to order summary rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    /// Time spent in a function including everything it called
    #[default]
    Cumulative,
    /// Time spent in a function body, excluding sub-calls
    InternalTime,
    /// Number of calls
    CallCount,
    /// Number of calls made while the function was already on the stack
    RecursiveCallCount,
    /// Total internal time (same metric as `InternalTime`, kept for the classic `tottime` key)
    TotalTime,
    /// Internal time divided by call count
    PerCall,
}

impl SortKey {
    /// All sort keys, in documentation order
    pub const ALL: [SortKey; 6] = [
        SortKey::Cumulative,
        SortKey::InternalTime,
        SortKey::CallCount,
        SortKey::RecursiveCallCount,
        SortKey::TotalTime,
        SortKey::PerCall,
    ];

    /// Canonical token, as accepted on the command line and in the environment
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Cumulative => "cumulative",
            SortKey::InternalTime => "internal-time",
            SortKey::CallCount => "call-count",
            SortKey::RecursiveCallCount => "recursive-call-count",
            SortKey::TotalTime => "total-time",
            SortKey::PerCall => "per-call",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized sort key token
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort key {0:?} (expected one of: cumulative, internal-time, call-count, recursive-call-count, total-time, per-call)")]
pub struct UnknownSortKey(pub String);

impl FromStr for SortKey {
    type Err = UnknownSortKey;

    /// Accepts kebab, snake and camel spellings plus the classic short keys
    /// (`cumtime`, `time`, `calls`, `ncalls`, `tottime`, `percall`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        match normalized.as_str() {
            "cumulative" | "cumtime" | "cum" => Ok(SortKey::Cumulative),
            "internaltime" | "time" => Ok(SortKey::InternalTime),
            "callcount" | "calls" | "ncalls" => Ok(SortKey::CallCount),
            "recursivecallcount" | "recursive" => Ok(SortKey::RecursiveCallCount),
            "totaltime" | "tottime" => Ok(SortKey::TotalTime),
            "percall" => Ok(SortKey::PerCall),
            _ => Err(UnknownSortKey(s.to_string())),
        }
    }
}

/// Identifies one configuration field in errors and environment lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    Enabled,
    OutputDir,
    SortBy,
    MaxResults,
}

impl ConfigField {
    /// Suffix appended to `{PREFIX}_PROFILING_` to form the environment variable
    pub fn env_suffix(&self) -> &'static str {
        match self {
            ConfigField::Enabled => "ENABLED",
            ConfigField::OutputDir => "OUTPUT_DIR",
            ConfigField::SortBy => "SORT_BY",
            ConfigField::MaxResults => "MAX_RESULTS",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigField::Enabled => "enabled",
            ConfigField::OutputDir => "output_dir",
            ConfigField::SortBy => "sort_by",
            ConfigField::MaxResults => "max_results",
        };
        f.write_str(name)
    }
}

/// Fully resolved, immutable profiling policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    enabled: bool,
    output_dir: PathBuf,
    sort_by: SortKey,
    max_results: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            sort_by: SortKey::Cumulative,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl EffectiveConfig {
    /// Master switch; when false every profiling operation is a no-op
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Directory artifacts are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Metric used when summarizing
    pub fn sort_by(&self) -> SortKey {
        self.sort_by
    }

    /// Row cap for summaries (always at least 1)
    pub fn max_results(&self) -> usize {
        self.max_results
    }
}

/// Caller-supplied overrides; `None` falls through to the environment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialConfig {
    pub enabled: Option<bool>,
    pub output_dir: Option<PathBuf>,
    pub sort_by: Option<SortKey>,
    pub max_results: Option<usize>,
}

impl PartialConfig {
    /// Empty override set
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn sort_by(mut self, key: SortKey) -> Self {
        self.sort_by = Some(key);
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }
}

/// Read-only view of an environment
///
/// Injected into [`ConfigResolver`] so nothing downstream reads process
/// state directly. Values are raw so paths survive untouched.
pub trait EnvSource {
    /// Value of `key`, or `None` if unset
    fn var(&self, key: &str) -> Option<OsString>;
}

/// The real process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<OsString> {
        self.get(key).map(OsString::from)
    }
}

impl EnvSource for HashMap<String, OsString> {
    fn var(&self, key: &str) -> Option<OsString> {
        self.get(key).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, key: &str) -> Option<OsString> {
        (**self).var(key)
    }
}

/// Merges overrides, environment and defaults into an [`EffectiveConfig`]
#[derive(Debug, Clone)]
pub struct ConfigResolver<E = ProcessEnv> {
    env: E,
    prefix: String,
}

impl ConfigResolver<ProcessEnv> {
    /// Resolver over the process environment with the default prefix
    pub fn new() -> Self {
        Self::with_env(ProcessEnv)
    }
}

impl Default for ConfigResolver<ProcessEnv> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EnvSource> ConfigResolver<E> {
    /// Resolver over an arbitrary environment source
    pub fn with_env(env: E) -> Self {
        Self {
            env,
            prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// Use `{prefix}_PROFILING_*` variables instead of `PERFIL_PROFILING_*`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Environment variable consulted for `field`
    pub fn env_var(&self, field: ConfigField) -> String {
        format!("{}_PROFILING_{}", self.prefix, field.env_suffix())
    }

    /// Resolve the effective configuration
    pub fn resolve(&self, overrides: &PartialConfig) -> Result<EffectiveConfig> {
        let defaults = EffectiveConfig::default();

        let enabled = match overrides.enabled {
            Some(enabled) => enabled,
            None => self
                .lookup(ConfigField::Enabled, parse_bool)?
                .unwrap_or(defaults.enabled),
        };

        let output_dir = match &overrides.output_dir {
            Some(dir) => dir.clone(),
            None => self
                .lookup_raw(ConfigField::OutputDir)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        };

        let sort_by = match overrides.sort_by {
            Some(key) => key,
            None => self
                .lookup(ConfigField::SortBy, |raw| raw.parse().ok())?
                .unwrap_or(defaults.sort_by),
        };

        let max_results = match overrides.max_results {
            Some(0) => {
                return Err(ProfilingError::ConfigParse {
                    field: ConfigField::MaxResults,
                    value: "0".to_string(),
                })
            }
            Some(max) => max,
            None => self
                .lookup(ConfigField::MaxResults, parse_positive)?
                .unwrap_or(defaults.max_results),
        };

        Ok(EffectiveConfig {
            enabled,
            output_dir,
            sort_by,
            max_results,
        })
    }

    /// Raw value of one field; unset and blank variables yield `None`
    fn lookup_raw(&self, field: ConfigField) -> Option<OsString> {
        let raw = self.env.var(&self.env_var(field))?;
        let blank = match raw.to_str() {
            Some(text) => text.trim().is_empty(),
            None => false,
        };
        (!blank).then_some(raw)
    }

    /// Read and parse one field from the environment.
    ///
    /// Unset and blank variables yield `Ok(None)`; values that are not
    /// valid UTF-8 are malformed.
    fn lookup<T>(&self, field: ConfigField, parse: impl Fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(raw) = self.lookup_raw(field) else {
            return Ok(None);
        };
        let parsed = raw.to_str().and_then(|text| parse(text.trim()));
        match parsed {
            Some(value) => Ok(Some(value)),
            None => Err(ProfilingError::ConfigParse {
                field,
                value: raw.to_string_lossy().into_owned(),
            }),
        }
    }
}

/// Resolve against the process environment with the default prefix
pub fn resolve(overrides: &PartialConfig) -> Result<EffectiveConfig> {
    ConfigResolver::new().resolve(overrides)
}

/// Parse a boolean the way shells and job schedulers spell them
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a strictly positive integer
pub fn parse_positive(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}
