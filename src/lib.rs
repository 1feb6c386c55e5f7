//! Perfil - session-scoped deterministic call-graph profiling
//!
//! This library lets a long-running job record which instrumented functions
//! consumed time, how often, and via which call paths, and persist that call
//! graph as one artifact per profiling session.
//!
//! - [`config`] resolves overrides, environment and defaults into an
//!   [`EffectiveConfig`](config::EffectiveConfig)
//! - [`session`] drives one start/stop span and writes the artifact
//! - [`decorators`] and [`scoped`] wrap callables and blocks in sessions
//! - [`summary`] prints the top entries of an artifact
//!
//! Functions take part in the call graph through [`frame!`] or
//! [`recorder::record`]; with no session running these cost one atomic load.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod decorators;
pub mod error;
pub mod recorder;
pub mod scoped;
pub mod session;
pub mod summary;

pub use config::{ConfigResolver, EffectiveConfig, PartialConfig, SortKey};
pub use decorators::{profiled, timed, Profiled, Timed};
pub use error::{ProfilingError, Result};
pub use scoped::{profile_block, time_block, SessionGuard, TimedGuard};
pub use session::{Session, SessionState};
pub use summary::{summarize, Row};
