//! Progress callback used by long-running searches.

/// Receives `(percent, message)` updates from extraction and optimizer runs.
///
/// Implemented for any `Fn(f64, &str)` closure, so callers can pass a plain
/// closure or a reporter type from the application layer.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, percent: f64, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(f64, &str) + Send + Sync,
{
    fn progress(&self, percent: f64, message: &str) {
        self(percent, message)
    }
}

/// A sink that discards every update.
pub struct Silent;

impl ProgressSink for Silent {
    fn progress(&self, _percent: f64, _message: &str) {}
}
