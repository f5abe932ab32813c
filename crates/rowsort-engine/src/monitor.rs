//! Progress reporting and cooperative cancellation.
//!
//! An [`ExecutionMonitor`] maps the local `[0, 1]` progress of one phase
//! onto its share of the overall progress and forwards it to a
//! [`ProgressSink`]. Sub-monitors carve consecutive slices out of their
//! parent, so phases can report independently without knowing about each
//! other.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rowsort_types::error::{Result, SortError};

/// Row-progress messages are formatted at most once per this many rows.
pub const MESSAGE_INTERVAL: u64 = 1024;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Running sorts stop at their next check.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// `Err(SortError::Canceled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(SortError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Receives overall progress in `[0, 1]` and optional status messages.
pub trait ProgressSink: Send + Sync {
    /// `progress` is `None` when only the message changed.
    fn report(&self, progress: Option<f64>, message: Option<&str>);
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: Option<f64>, _message: Option<&str>) {}
}

/// Progress of one phase plus the cancellation token of the whole sort.
pub struct ExecutionMonitor<'a> {
    sink: &'a dyn ProgressSink,
    token: CancellationToken,
    offset: f64,
    span: f64,
    /// Share of `span` already handed out to sub-monitors.
    allocated: Cell<f64>,
}

impl<'a> ExecutionMonitor<'a> {
    /// Root monitor covering the full `[0, 1]` range.
    pub fn new(sink: &'a dyn ProgressSink, token: CancellationToken) -> Self {
        ExecutionMonitor {
            sink,
            token,
            offset: 0.0,
            span: 1.0,
            allocated: Cell::new(0.0),
        }
    }

    /// Monitor for the next `fraction` of this monitor's range.
    pub fn sub_progress(&self, fraction: f64) -> ExecutionMonitor<'a> {
        let start = self.allocated.get();
        let width = fraction.clamp(0.0, 1.0 - start.min(1.0));
        self.allocated.set(start + width);
        ExecutionMonitor {
            sink: self.sink,
            token: self.token.clone(),
            offset: self.offset + self.span * start,
            span: self.span * width,
            allocated: Cell::new(0.0),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn check_canceled(&self) -> Result<()> {
        self.token.check()
    }

    fn absolute(&self, fraction: f64) -> f64 {
        self.offset + self.span * fraction.clamp(0.0, 1.0)
    }

    /// Set this phase's progress; `fraction` is clamped to `[0, 1]`.
    pub fn set_progress(&self, fraction: f64) {
        self.sink.report(Some(self.absolute(fraction)), None);
    }

    pub fn set_progress_with_message(&self, fraction: f64, message: &str) {
        self.sink.report(Some(self.absolute(fraction)), Some(message));
    }

    pub fn set_message(&self, message: &str) {
        self.sink.report(None, Some(message));
    }

    /// Progress of a row-by-row pass: `done` out of `total` rows, with a
    /// `"<label> (row done/total)"` message on the first, last, and every
    /// [`MESSAGE_INTERVAL`]-th row. Without a total only the message is sent.
    pub fn set_row_progress(&self, label: &str, done: u64, total: Option<u64>) {
        let with_message =
            done == 1 || done % MESSAGE_INTERVAL == 0 || Some(done) == total;
        match total {
            Some(n) if n > 0 => {
                let fraction = done as f64 / n as f64;
                if with_message {
                    let message = format!("{} (row {}/{})", label, done, n);
                    self.set_progress_with_message(fraction, &message);
                } else {
                    self.set_progress(fraction);
                }
            }
            _ => {
                if with_message {
                    self.set_message(&format!("{} (row {})", label, done));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>, Mutex<Vec<String>>);

    impl ProgressSink for Recorder {
        fn report(&self, progress: Option<f64>, message: Option<&str>) {
            if let Some(p) = progress {
                self.0.lock().unwrap().push(p);
            }
            if let Some(m) = message {
                self.1.lock().unwrap().push(m.to_string());
            }
        }
    }

    #[test]
    fn test_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());
        token.cancel();
        assert!(clone.is_canceled());
        assert!(matches!(clone.check(), Err(SortError::Canceled)));
    }

    #[test]
    fn test_sub_progress_slices() {
        let rec = Recorder::default();
        let root = ExecutionMonitor::new(&rec, CancellationToken::new());
        let first = root.sub_progress(0.5);
        first.set_progress(1.0);
        let second = root.sub_progress(0.5);
        second.set_progress(0.5);
        let nested = second.sub_progress(0.5);
        nested.set_progress(1.0);
        root.set_progress(2.0);

        let seen = rec.0.lock().unwrap().clone();
        assert_eq!(seen, vec![0.5, 0.75, 0.75, 1.0]);
    }

    #[test]
    fn test_sub_progress_never_exceeds_parent() {
        let rec = Recorder::default();
        let root = ExecutionMonitor::new(&rec, CancellationToken::new());
        let _a = root.sub_progress(0.8);
        let b = root.sub_progress(0.8);
        b.set_progress(1.0);
        assert_eq!(*rec.0.lock().unwrap().last().unwrap(), 1.0);
    }

    #[test]
    fn test_row_progress_messages() {
        let rec = Recorder::default();
        let root = ExecutionMonitor::new(&rec, CancellationToken::new());
        for i in 1..=3 {
            root.set_row_progress("Reading data", i, Some(3));
        }
        root.set_row_progress("Reading data", 1, None);
        assert_eq!(rec.0.lock().unwrap().len(), 3);
        assert_eq!(
            *rec.1.lock().unwrap(),
            vec![
                "Reading data (row 1/3)".to_string(),
                "Reading data (row 3/3)".to_string(),
                "Reading data (row 1)".to_string(),
            ]
        );
    }
}
