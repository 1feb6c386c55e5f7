//! CLI argument parsing for perfil
//!
//! [`ProfilingArgs`] can be flattened into any host job's clap parser; its
//! flags become explicit overrides, the highest-precedence configuration
//! source.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{PartialConfig, SortKey};

/// Profiling flags shared by every command that runs work
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilingArgs {
    /// Enable call-graph profiling (overrides *_PROFILING_ENABLED)
    #[arg(long = "profile", conflicts_with = "no_profile")]
    pub profile: bool,

    /// Disable call-graph profiling even if the environment enables it
    #[arg(long = "no-profile")]
    pub no_profile: bool,

    /// Directory for call-graph artifacts
    #[arg(long = "profile-output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Metric used to order summaries
    #[arg(long = "profile-sort-by", value_name = "KEY")]
    pub sort_by: Option<SortKey>,

    /// Maximum number of summary rows
    #[arg(long = "profile-max-results", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_results: Option<u64>,
}

impl ProfilingArgs {
    /// Flags that were actually given, as configuration overrides
    pub fn overrides(&self) -> PartialConfig {
        let enabled = match (self.profile, self.no_profile) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        };
        PartialConfig {
            enabled,
            output_dir: self.output_dir.clone(),
            sort_by: self.sort_by,
            max_results: self
                .max_results
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "perfil")]
#[command(version)]
#[command(about = "Session-scoped call-graph profiling", long_about = None)]
pub struct Cli {
    /// Emit debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Environment variable prefix ({PREFIX}_PROFILING_*)
    #[arg(long = "env-prefix", value_name = "PREFIX", global = true, default_value = crate::config::DEFAULT_ENV_PREFIX)]
    pub env_prefix: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective profiling configuration as JSON
    Config {
        #[command(flatten)]
        profiling: ProfilingArgs,
    },

    /// Print the top entries of a call-graph artifact
    Summarize {
        /// Artifact written by a profiling session
        artifact: PathBuf,

        /// Metric to sort by (defaults to the configured one)
        #[arg(long = "sort-by", value_name = "KEY")]
        sort_by: Option<SortKey>,

        /// Number of rows to show (defaults to the configured one)
        #[arg(long = "max-results", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        max_results: Option<u64>,
    },

    /// Profile a small built-in workload and print the artifact path
    Demo {
        /// Number of workload rounds
        #[arg(long, default_value = "3")]
        iterations: u32,

        /// Session name used in the artifact filename
        #[arg(long, default_value = "demo")]
        name: String,

        /// Print a summary after the artifact is written
        #[arg(long)]
        summary: bool,

        #[command(flatten)]
        profiling: ProfilingArgs,
    },
}
