//! Per-thread observation counters
//!
//! Every counter is thread-local so tests running in parallel observe only
//! the engine traffic their own thread produced.

use std::cell::{Cell, RefCell};

/// Snapshot of the engine-side counters for the current thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub objects_constructed: u64,
    pub objects_destroyed: u64,
    pub ref_increments: u64,
    pub ref_decrements: u64,
    pub ptrcalls: u64,
    pub varcalls: u64,
    /// Pointer calls that received a null argument array
    pub null_arg_ptrcalls: u64,
    pub callables_created: u64,
    pub callables_freed: u64,
    pub errors: u64,
    pub warnings: u64,
}

/// Severity of a message sent to one of the print sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    ScriptError,
}

/// A message received by the engine's print sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reported {
    pub severity: Severity,
    pub description: String,
    pub message: String,
    pub function: String,
    pub file: String,
    pub line: i32,
}

impl Reported {
    /// Whether description or message mention `needle`
    pub fn mentions(&self, needle: &str) -> bool {
        self.description.contains(needle) || self.message.contains(needle)
    }
}

thread_local! {
    static STATS: Cell<Stats> = Cell::new(Stats::default());
    static REPORTS: RefCell<Vec<Reported>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn bump(f: impl FnOnce(&mut Stats)) {
    STATS.with(|cell| {
        let mut stats = cell.get();
        f(&mut stats);
        cell.set(stats);
    });
}

pub(crate) fn record(report: Reported) {
    bump(|s| match report.severity {
        Severity::Warning => s.warnings += 1,
        _ => s.errors += 1,
    });
    REPORTS.with(|r| r.borrow_mut().push(report));
}

/// Counters for the current thread
pub fn stats() -> Stats {
    STATS.with(Cell::get)
}

/// Reset counters and reported messages for the current thread
pub fn reset_stats() {
    STATS.with(|cell| cell.set(Stats::default()));
    REPORTS.with(|r| r.borrow_mut().clear());
}

/// Messages reported on the current thread, oldest first
pub fn reports() -> Vec<Reported> {
    REPORTS.with(|r| r.borrow().clone())
}

/// Error messages reported on the current thread
pub fn errors() -> Vec<Reported> {
    reports()
        .into_iter()
        .filter(|r| r.severity != Severity::Warning)
        .collect()
}
