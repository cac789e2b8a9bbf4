//! Process-wide error reporting sink.
//!
//! `ErrorHandler` is a passive observer: sessions and servers call
//! [`ErrorHandler::report`] at every recoverable and fatal error; it never
//! drives behavior itself. Subscribers (the `Logger` collaborator among
//! them) are invoked synchronously from `report`, matching spec.md §4.6.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

const GLOBAL_RING_CAPACITY: usize = 1_000;
const COMPONENT_RING_CAPACITY: usize = 100;

/// Severity of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorLevel {
    /// Informational, no action needed.
    Info,
    /// Recoverable condition worth noting.
    Warning,
    /// Recoverable error; the affected session keeps running or retries.
    Error,
    /// Non-recoverable; the affected session has been or will be torn down.
    Critical,
}

/// Subject-matter classification of a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connect/accept/bind/teardown failures.
    Connection,
    /// Read/write failures on an established stream.
    Communication,
    /// Builder validation failures.
    Configuration,
    /// Memory pool allocation failures.
    Memory,
    /// OS- or reactor-level failures not attributable to one endpoint.
    System,
    /// Anything uncategorized.
    Unknown,
}

/// One error report, as described by spec.md §3's `ErrorInfo`.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Severity of the report.
    pub level: ErrorLevel,
    /// Subject-matter category.
    pub category: ErrorCategory,
    /// Component that raised the error (e.g. `"session"`, `"server"`, `"pool"`).
    pub component: String,
    /// Operation in progress when the error occurred (e.g. `"connect"`, `"read"`).
    pub operation: String,
    /// Human-readable description.
    pub message: String,
    /// OS error code, when the error originated from a syscall.
    pub system_code: Option<i32>,
    /// Whether the condition is expected to clear on retry.
    pub retryable: bool,
    /// Milliseconds since the Unix epoch when the report was created.
    pub timestamp_ms: u64,
}

impl ErrorInfo {
    /// Build a report, stamping the current time.
    pub fn new(
        level: ErrorLevel,
        category: ErrorCategory,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            system_code: None,
            retryable: false,
            timestamp_ms: now_ms(),
        }
    }

    /// Attach an OS error code.
    pub fn with_system_code(mut self, code: i32) -> Self {
        self.system_code = Some(code);
        self
    }

    /// Mark the report as retryable.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Aggregate counters maintained by the handler.
#[derive(Debug, Default, Clone)]
pub struct ErrorStats {
    /// Total reports accepted (level >= min_level, handler enabled).
    pub total_reports: u64,
    /// Reports at each level, indexed by `ErrorLevel as usize`.
    pub by_level: [u64; 4],
}

type Subscriber = Box<dyn Fn(&ErrorInfo) + Send + Sync>;

struct Inner {
    min_level: Mutex<ErrorLevel>,
    enabled: AtomicBool,
    global_ring: Mutex<VecDeque<ErrorInfo>>,
    by_component: Mutex<HashMap<String, VecDeque<ErrorInfo>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    total_reports: AtomicU64,
    by_level: [AtomicU64; 4],
}

impl Inner {
    fn new() -> Self {
        Self {
            min_level: Mutex::new(ErrorLevel::Info),
            enabled: AtomicBool::new(true),
            global_ring: Mutex::new(VecDeque::with_capacity(GLOBAL_RING_CAPACITY)),
            by_component: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            total_reports: AtomicU64::new(0),
            by_level: Default::default(),
        }
    }
}

/// Process-wide error sink: records, ranks, and fans out [`ErrorInfo`] reports.
///
/// `ErrorHandler::global()` is a process singleton; tests that need
/// isolation should prefer constructing a [`crate::reactor::Reactor::create_independent`]
/// reactor (which reports to the same global handler but scopes its own
/// sessions) or call [`ErrorHandler::reset_stats`]/[`ErrorHandler::clear_subscribers`]
/// between cases.
pub struct ErrorHandler {
    inner: Inner,
}

impl ErrorHandler {
    /// The process-wide singleton.
    pub fn global() -> &'static ErrorHandler {
        static HANDLER: OnceLock<ErrorHandler> = OnceLock::new();
        HANDLER.get_or_init(|| ErrorHandler { inner: Inner::new() })
    }

    /// Report an error. No-op if the handler is disabled or `info.level`
    /// is below the configured minimum.
    pub fn report(&self, info: ErrorInfo) {
        if !self.inner.enabled.load(Ordering::Relaxed) {
            return;
        }
        let min_level = *self.inner.min_level.lock().unwrap();
        if info.level < min_level {
            return;
        }

        self.inner.total_reports.fetch_add(1, Ordering::Relaxed);
        self.inner.by_level[info.level as usize].fetch_add(1, Ordering::Relaxed);

        {
            let mut ring = self.inner.global_ring.lock().unwrap();
            if ring.len() == GLOBAL_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(info.clone());
        }
        {
            let mut by_component = self.inner.by_component.lock().unwrap();
            let ring = by_component.entry(info.component.clone()).or_default();
            if ring.len() == COMPONENT_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(info.clone());
        }

        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.iter() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber(&info)));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                eprintln!("conduit: error handler subscriber panicked: {message}");
            }
        }
    }

    /// Register a subscriber, invoked synchronously on every accepted report.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&ErrorInfo) + Send + Sync + 'static,
    {
        self.inner.subscribers.lock().unwrap().push(Box::new(f));
    }

    /// Remove all subscribers.
    pub fn clear_subscribers(&self) {
        self.inner.subscribers.lock().unwrap().clear();
    }

    /// Set the minimum level a report must meet to be recorded/dispatched.
    pub fn set_min_level(&self, level: ErrorLevel) {
        *self.inner.min_level.lock().unwrap() = level;
    }

    /// Enable or disable reporting entirely.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Clear aggregate counters (rings and subscribers are untouched).
    pub fn reset_stats(&self) {
        self.inner.total_reports.store(0, Ordering::Relaxed);
        for counter in &self.inner.by_level {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Snapshot of aggregate counters.
    pub fn stats(&self) -> ErrorStats {
        ErrorStats {
            total_reports: self.inner.total_reports.load(Ordering::Relaxed),
            by_level: [
                self.inner.by_level[0].load(Ordering::Relaxed),
                self.inner.by_level[1].load(Ordering::Relaxed),
                self.inner.by_level[2].load(Ordering::Relaxed),
                self.inner.by_level[3].load(Ordering::Relaxed),
            ],
        }
    }

    /// The most recent `count` reports across all components, newest last.
    pub fn recent(&self, count: usize) -> Vec<ErrorInfo> {
        let ring = self.inner.global_ring.lock().unwrap();
        ring.iter().rev().take(count).rev().cloned().collect()
    }

    /// The retained reports for one component, newest last.
    pub fn errors_by_component(&self, name: &str) -> Vec<ErrorInfo> {
        self.inner
            .by_component
            .lock()
            .unwrap()
            .get(name)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any report has ever been retained for `name`.
    pub fn has_errors(&self, name: &str) -> bool {
        self.inner
            .by_component
            .lock()
            .unwrap()
            .get(name)
            .map(|ring| !ring.is_empty())
            .unwrap_or(false)
    }

    /// Count of retained reports for `name` at exactly `level`.
    pub fn count(&self, name: &str, level: ErrorLevel) -> usize {
        self.inner
            .by_component
            .lock()
            .unwrap()
            .get(name)
            .map(|ring| ring.iter().filter(|info| info.level == level).count())
            .unwrap_or(0)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn fresh_handler() -> ErrorHandler {
        ErrorHandler { inner: Inner::new() }
    }

    #[test]
    fn below_min_level_is_dropped() {
        let handler = fresh_handler();
        handler.set_min_level(ErrorLevel::Error);
        handler.report(ErrorInfo::new(
            ErrorLevel::Warning,
            ErrorCategory::System,
            "test",
            "op",
            "msg",
        ));
        assert_eq!(handler.stats().total_reports, 0);
    }

    #[test]
    fn disabled_handler_drops_everything() {
        let handler = fresh_handler();
        handler.set_enabled(false);
        handler.report(ErrorInfo::new(
            ErrorLevel::Critical,
            ErrorCategory::Memory,
            "pool",
            "acquire",
            "oom",
        ));
        assert_eq!(handler.stats().total_reports, 0);
    }

    #[test]
    fn subscribers_are_invoked_synchronously() {
        let handler = fresh_handler();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        handler.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        handler.report(ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::Connection,
            "session",
            "connect",
            "refused",
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_abort_dispatch() {
        let handler = fresh_handler();
        handler.subscribe(|_| panic!("boom"));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        handler.subscribe(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        handler.report(ErrorInfo::new(
            ErrorLevel::Error,
            ErrorCategory::Unknown,
            "x",
            "y",
            "z",
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn component_ring_is_bounded() {
        let handler = fresh_handler();
        for i in 0..(COMPONENT_RING_CAPACITY + 10) {
            handler.report(ErrorInfo::new(
                ErrorLevel::Info,
                ErrorCategory::Unknown,
                "comp",
                "op",
                format!("msg {i}"),
            ));
        }
        assert_eq!(handler.errors_by_component("comp").len(), COMPONENT_RING_CAPACITY);
    }

    #[test]
    fn count_filters_by_level() {
        let handler = fresh_handler();
        handler.report(ErrorInfo::new(ErrorLevel::Warning, ErrorCategory::Unknown, "c", "o", "a"));
        handler.report(ErrorInfo::new(ErrorLevel::Error, ErrorCategory::Unknown, "c", "o", "b"));
        assert_eq!(handler.count("c", ErrorLevel::Warning), 1);
        assert_eq!(handler.count("c", ErrorLevel::Error), 1);
        assert_eq!(handler.count("c", ErrorLevel::Critical), 0);
    }
}
