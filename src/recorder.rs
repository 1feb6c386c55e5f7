//! Process-wide deterministic call-graph recorder
//!
//! The recorder is a single exclusive resource. [`Recorder::engage`] hands out
//! at most one [`RecorderHandle`] at a time and fails fast with
//! [`ProfilingError::RecorderBusy`] otherwise; it never queues.
//!
//! Instrumentation points ([`enter`], [`record`], [`frame!`](crate::frame))
//! push frames on a thread-local call stack. When a frame closes, its elapsed
//! time is split into internal time (excluding child frames) and cumulative
//! time, and folded into the shared statistics together with the caller edge.
//! While no handle is engaged an instrumentation point costs one atomic
//! load.
//!
//! Every engagement gets a new generation number. Frames remember the
//! generation they were opened under, so a frame that outlives its
//! engagement is discarded instead of leaking into the next session.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{ProfilingError, Result};

/// Held by the single engaged handle
static LOCKED: AtomicBool = AtomicBool::new(false);
/// Published once the graph for the current generation is installed
static ENGAGED: AtomicBool = AtomicBool::new(false);
static GENERATION: AtomicU64 = AtomicU64::new(0);
static GRAPH: Mutex<Option<GraphState>> = Mutex::new(None);

thread_local! {
    static STACK: RefCell<Vec<ActiveFrame>> = const { RefCell::new(Vec::new()) };
}

/// Aggregated statistics for one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionStats {
    /// Total number of calls, recursive ones included
    pub call_count: u64,
    /// Calls made while the function was already on the same thread's stack
    pub recursive_call_count: u64,
    /// Time spent in the function body itself
    pub internal_time: Duration,
    /// Time spent in the function including callees; recursive re-entries
    /// are not counted twice
    pub cumulative_time: Duration,
    /// Caller id -> number of calls made from that caller
    pub callers: BTreeMap<String, u64>,
}

/// Snapshot taken when a handle is finished
#[derive(Debug, Clone, Default)]
pub struct RecordedGraph {
    /// Per-function statistics, keyed by function id
    pub functions: BTreeMap<String, FunctionStats>,
    /// Sum of cumulative time of frames that had no instrumented caller
    pub top_level_time: Duration,
    /// Wall time between engagement and finish
    pub wall_time: Duration,
}

#[derive(Debug)]
struct GraphState {
    generation: u64,
    engaged_at: Instant,
    functions: HashMap<String, FunctionStats>,
    top_level_time: Duration,
}

#[derive(Debug)]
struct ActiveFrame {
    id: Cow<'static, str>,
    generation: u64,
    started: Instant,
    child_time: Duration,
    recursive: bool,
}

fn graph() -> MutexGuard<'static, Option<GraphState>> {
    GRAPH.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for engaging the process-wide recorder
pub struct Recorder;

impl Recorder {
    /// Take exclusive ownership of the recorder
    pub fn engage() -> Result<RecorderHandle> {
        if LOCKED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ProfilingError::RecorderBusy);
        }

        let generation = GENERATION.fetch_add(1, Ordering::AcqRel) + 1;
        *graph() = Some(GraphState {
            generation,
            engaged_at: Instant::now(),
            functions: HashMap::new(),
            top_level_time: Duration::ZERO,
        });
        ENGAGED.store(true, Ordering::Release);
        tracing::trace!(generation, "call-graph recorder engaged");

        Ok(RecorderHandle {
            generation,
            released: false,
        })
    }

    /// Whether some session currently holds the recorder
    pub fn is_engaged() -> bool {
        LOCKED.load(Ordering::Acquire)
    }
}

/// Exclusive ownership of the recorder; dropping it releases the recorder
/// and discards whatever was recorded
#[derive(Debug)]
pub struct RecorderHandle {
    generation: u64,
    released: bool,
}

impl RecorderHandle {
    /// Disengage the recorder and take everything it collected
    pub fn finish(mut self) -> RecordedGraph {
        let state = self.release();
        match state {
            Some(state) => RecordedGraph {
                wall_time: state.engaged_at.elapsed(),
                top_level_time: state.top_level_time,
                functions: state.functions.into_iter().collect(),
            },
            None => RecordedGraph::default(),
        }
    }

    fn release(&mut self) -> Option<GraphState> {
        if self.released {
            return None;
        }
        self.released = true;

        ENGAGED.store(false, Ordering::Release);
        let state = {
            let mut guard = graph();
            let ours = guard
                .as_ref()
                .is_some_and(|state| state.generation == self.generation);
            if ours {
                guard.take()
            } else {
                None
            }
        };
        LOCKED.store(false, Ordering::Release);
        tracing::trace!(generation = self.generation, "call-graph recorder released");
        state
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open frame; closing it (on drop) records the call
///
/// Frames are tied to the thread that opened them.
#[must_use = "the call is recorded when the frame guard is dropped"]
pub struct FrameGuard {
    active: bool,
    _not_send: PhantomData<*const ()>,
}

/// Open an instrumentation frame named `id`
pub fn enter(id: impl Into<Cow<'static, str>>) -> FrameGuard {
    if !ENGAGED.load(Ordering::Acquire) {
        return FrameGuard {
            active: false,
            _not_send: PhantomData,
        };
    }

    let id = id.into();
    let generation = GENERATION.load(Ordering::Acquire);
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let recursive = stack
            .iter()
            .any(|frame| frame.generation == generation && frame.id == id);
        stack.push(ActiveFrame {
            id,
            generation,
            started: Instant::now(),
            child_time: Duration::ZERO,
            recursive,
        });
    });

    FrameGuard {
        active: true,
        _not_send: PhantomData,
    }
}

/// Run `f` inside a frame named `id`
pub fn record<R>(id: impl Into<Cow<'static, str>>, f: impl FnOnce() -> R) -> R {
    let _frame = enter(id);
    f()
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }

        let closed = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.pop()?;
            let elapsed = frame.started.elapsed();
            let caller = match stack.last_mut() {
                Some(parent) if parent.generation == frame.generation => {
                    parent.child_time += elapsed;
                    Some(parent.id.to_string())
                }
                _ => None,
            };
            Some((frame, elapsed, caller))
        });
        let Some((frame, elapsed, caller)) = closed else {
            return;
        };

        let mut guard = graph();
        let Some(state) = guard.as_mut() else {
            return;
        };
        if state.generation != frame.generation {
            return;
        }

        let stats = state.functions.entry(frame.id.into_owned()).or_default();
        stats.call_count += 1;
        stats.internal_time += elapsed.saturating_sub(frame.child_time);
        if frame.recursive {
            stats.recursive_call_count += 1;
        } else {
            stats.cumulative_time += elapsed;
        }
        match caller {
            Some(caller) => *stats.callers.entry(caller).or_insert(0) += 1,
            None => state.top_level_time += elapsed,
        }
    }
}

/// Path of the enclosing function, e.g. `my_crate::jobs::load`
#[doc(hidden)]
#[macro_export]
macro_rules! __function_path {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        let name = name.strip_suffix("::__here").unwrap_or(name);
        $crate::recorder::trim_closure_suffix(name)
    }};
}

/// Open a recorder frame until the end of the enclosing scope
///
/// Without arguments the frame is named after the enclosing function; with a
/// string literal it is named `module::literal`.
///
/// ```
/// fn load_batch() {
///     perfil::frame!();
///     // ...
/// }
///
/// fn transform() {
///     perfil::frame!("transform_rows");
///     // ...
/// }
/// # load_batch();
/// # transform();
/// ```
#[macro_export]
macro_rules! frame {
    () => {
        let _perfil_frame = $crate::recorder::enter($crate::__function_path!());
    };
    ($name:literal) => {
        let _perfil_frame = $crate::recorder::enter(concat!(module_path!(), "::", $name));
    };
}

/// Strip trailing `::{{closure}}` segments from a type path
#[doc(hidden)]
pub fn trim_closure_suffix(mut name: &str) -> &str {
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::thread;

    fn recurse(depth: u32) {
        let _frame = enter("recurse");
        if depth > 0 {
            recurse(depth - 1);
        }
    }

    #[test]
    #[serial]
    fn test_engage_is_exclusive() {
        let handle = Recorder::engage().unwrap();
        assert!(Recorder::is_engaged());
        assert!(matches!(
            Recorder::engage(),
            Err(ProfilingError::RecorderBusy)
        ));
        drop(handle);
        assert!(!Recorder::is_engaged());
        let again = Recorder::engage().unwrap();
        again.finish();
    }

    #[test]
    #[serial]
    fn test_frames_without_engagement_record_nothing() {
        {
            let _frame = enter("idle");
        }
        let handle = Recorder::engage().unwrap();
        let graph = handle.finish();
        assert!(graph.functions.is_empty());
    }

    #[test]
    #[serial]
    fn test_nested_frames_split_internal_and_cumulative() {
        let handle = Recorder::engage().unwrap();
        {
            let _outer = enter("outer");
            thread::sleep(Duration::from_millis(5));
            {
                let _inner = enter("inner");
                thread::sleep(Duration::from_millis(10));
            }
        }
        let graph = handle.finish();

        let outer = &graph.functions["outer"];
        let inner = &graph.functions["inner"];
        assert_eq!(outer.call_count, 1);
        assert_eq!(inner.call_count, 1);
        assert!(inner.cumulative_time >= Duration::from_millis(10));
        assert!(outer.cumulative_time >= inner.cumulative_time + Duration::from_millis(5));
        assert!(outer.internal_time < outer.cumulative_time);
        assert_eq!(inner.callers.get("outer"), Some(&1));
        assert!(outer.callers.is_empty());
        assert_eq!(graph.top_level_time, outer.cumulative_time);
    }

    #[test]
    #[serial]
    fn test_recursion_is_counted() {
        let handle = Recorder::engage().unwrap();
        recurse(3);
        let graph = handle.finish();

        let stats = &graph.functions["recurse"];
        assert_eq!(stats.call_count, 4);
        assert_eq!(stats.recursive_call_count, 3);
        assert_eq!(stats.callers.get("recurse"), Some(&3));
        // Only the outermost call contributes cumulative time.
        assert!(stats.cumulative_time <= graph.wall_time);
    }

    #[test]
    #[serial]
    fn test_frames_from_other_threads_are_merged() {
        let handle = Recorder::engage().unwrap();
        let workers: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| record("worker", || thread::sleep(Duration::from_millis(1)))))
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let graph = handle.finish();
        assert_eq!(graph.functions["worker"].call_count, 4);
    }

    #[test]
    #[serial]
    fn test_frame_opened_as_soon_as_engaged_is_kept() {
        let worker = thread::spawn(|| {
            while !ENGAGED.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            record("early", || ());
        });
        let handle = Recorder::engage().unwrap();
        worker.join().unwrap();
        let graph = handle.finish();
        assert_eq!(graph.functions["early"].call_count, 1);
    }

    #[test]
    #[serial]
    fn test_stale_frame_is_discarded() {
        let first = Recorder::engage().unwrap();
        let stale = enter("stale");
        first.finish();

        let second = Recorder::engage().unwrap();
        drop(stale);
        let graph = second.finish();
        assert!(!graph.functions.contains_key("stale"));
    }

    #[test]
    #[serial]
    fn test_record_returns_value() {
        let handle = Recorder::engage().unwrap();
        let value = record("answer", || 42);
        assert_eq!(value, 42);
        let graph = handle.finish();
        assert_eq!(graph.functions["answer"].call_count, 1);
    }

    #[test]
    #[serial]
    fn test_frame_macro_names() {
        fn named_after_fn() {
            crate::frame!();
        }
        fn named_by_literal() {
            crate::frame!("custom");
        }

        let handle = Recorder::engage().unwrap();
        named_after_fn();
        named_by_literal();
        let graph = handle.finish();

        assert!(graph
            .functions
            .keys()
            .any(|id| id.ends_with("named_after_fn")));
        assert!(graph
            .functions
            .contains_key(concat!(module_path!(), "::custom")));
    }

    #[test]
    fn test_trim_closure_suffix() {
        assert_eq!(trim_closure_suffix("a::b::{{closure}}::{{closure}}"), "a::b");
        assert_eq!(trim_closure_suffix("a::b"), "a::b");
    }
}
