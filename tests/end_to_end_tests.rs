// End-to-end profiling flows through the public API
//
// Every test here engages the process-wide recorder, so all of them run
// under #[serial].

use perfil::config::{ConfigResolver, EffectiveConfig, PartialConfig, SortKey};
use perfil::decorators::profiled;
use perfil::recorder::{self, Recorder};
use perfil::session::{Clock, Session, SessionState};
use perfil::{summarize, ProfilingError, SessionGuard};
use serial_test::serial;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct SteppingClock(AtomicU64);

impl Clock for SteppingClock {
    fn unix_seconds(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

fn enabled_config(dir: &Path) -> EffectiveConfig {
    let env = HashMap::from([
        ("PERFIL_PROFILING_ENABLED".to_string(), "true".to_string()),
        (
            "PERFIL_PROFILING_OUTPUT_DIR".to_string(),
            dir.display().to_string(),
        ),
    ]);
    ConfigResolver::with_env(env)
        .resolve(&PartialConfig::new())
        .unwrap()
}

fn artifacts_in(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    paths.sort();
    paths
}

fn transform(rows: u64) -> u64 {
    perfil::frame!();
    (0..rows).map(checksum).sum()
}

fn checksum(row: u64) -> u64 {
    perfil::frame!();
    row.wrapping_mul(31) % 7
}

#[test]
#[serial]
fn test_decorated_function_twice_yields_two_artifacts() {
    let tmp_dir = TempDir::new().unwrap();
    let out = tmp_dir.path().join("p");
    let config = enabled_config(&out);

    let job = profiled(&config, Some("nightly"), transform)
        .with_clock(Arc::new(SteppingClock(AtomicU64::new(1_700_000_000))));
    let first = job.call(50);
    let second = job.call(50);
    assert_eq!(first, second);

    let files = artifacts_in(&out);
    assert_eq!(files.len(), 2);
    assert_ne!(files[0], files[1]);
    assert_eq!(files[0].file_name().unwrap(), "nightly_1700000000.prof");
    assert_eq!(files[1].file_name().unwrap(), "nightly_1700000001.prof");
}

#[test]
#[serial]
fn test_same_second_sessions_do_not_collide() {
    let tmp_dir = TempDir::new().unwrap();
    let config = enabled_config(tmp_dir.path());

    let job = profiled(&config, Some("burst"), transform);
    job.call(5);
    job.call(5);

    // Same name, possibly the same second: both artifacts must survive.
    assert_eq!(artifacts_in(tmp_dir.path()).len(), 2);
    assert_eq!(job.artifacts().len(), 2);
}

#[test]
#[serial]
fn test_summary_of_fresh_artifact() {
    let tmp_dir = TempDir::new().unwrap();
    let config = enabled_config(tmp_dir.path());

    let mut session = Session::new("unit", &config);
    session.start().unwrap();
    transform(100);
    let path = session.stop(None).unwrap().unwrap();

    let rows = summarize(&path, SortKey::CallCount, 2).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].call_count >= rows[1].call_count);
    assert!(rows[0].function_id.ends_with("checksum"));
    assert_eq!(rows[0].call_count, 100);

    let rows = summarize(&path, SortKey::Cumulative, 2).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].cumulative_time >= rows[1].cumulative_time);
    assert_eq!(rows[0].function_id, "<session:unit>");
}

#[test]
#[serial]
fn test_call_edges_are_recorded() {
    let tmp_dir = TempDir::new().unwrap();
    let config = enabled_config(tmp_dir.path());

    let guard = SessionGuard::enter(&config, "edges").unwrap();
    transform(3);
    let path = guard.finish().unwrap().unwrap();

    let graph = perfil::artifact::read_artifact(&path).unwrap();
    let checksum = graph
        .functions
        .iter()
        .find(|f| f.id.ends_with("::checksum"))
        .unwrap();
    let (caller, count) = checksum.callers.iter().next().unwrap();
    assert!(caller.ends_with("::transform"));
    assert_eq!(*count, 3);
}

#[test]
#[serial]
fn test_parallel_session_attempt_fails_fast() {
    let tmp_dir = TempDir::new().unwrap();
    let config = enabled_config(tmp_dir.path());

    let mut owner = Session::new("owner", &config);
    owner.start().unwrap();

    let config_for_thread = config.clone();
    let contender = std::thread::spawn(move || {
        let mut session = Session::new("contender", &config_for_thread);
        let result = session.start();
        (result, session.state())
    });
    let (result, state) = contender.join().unwrap();
    assert!(matches!(result, Err(ProfilingError::RecorderBusy)));
    assert_eq!(state, SessionState::Idle);

    owner.stop(None).unwrap();
    assert!(!Recorder::is_engaged());
    assert_eq!(artifacts_in(tmp_dir.path()).len(), 1);
}

#[test]
#[serial]
fn test_worker_threads_join_the_session() {
    let tmp_dir = TempDir::new().unwrap();
    let config = enabled_config(tmp_dir.path());

    let guard = SessionGuard::enter(&config, "workers").unwrap();
    let handles: Vec<_> = (0..3)
        .map(|_| std::thread::spawn(|| recorder::record("partition", || transform(10))))
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let path = guard.finish().unwrap().unwrap();

    let rows = summarize(&path, SortKey::CallCount, 50).unwrap();
    let partition = rows.iter().find(|r| r.function_id == "partition").unwrap();
    assert_eq!(partition.call_count, 3);
}
