pub mod scheduler;
pub mod scope;
pub mod retry;
pub mod batch;
pub mod logging;
pub mod meter;
pub mod observe;
pub mod ops;

#[cfg(test)]
mod testing;

pub use scheduler::{Scheduler, TokioScheduler};
pub use scope::ExecScope;
pub use retry::{BackoffConfig, RetryPolicy};
pub use batch::BatchResult;
pub use logging::{EventLogger, LogFields, TracingLogger, log_fields, log_success_or_error};
pub use meter::{MeterRegistry, MetricsError, MetricsRegistry};
pub use observe::{Disposition, ObservabilityConfig, Observer};
pub use ops::{maybe_time, next_op_if, on_error_and_throw};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type ExecResult<T> = Result<T, ScopeError>;

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("{source}")]
    Task {
        source: BoxError,
        suppressed: Vec<ScopeError>,
    },
    #[error("Retry policy failed: {source}")]
    Policy {
        source: BoxError,
        suppressed: Vec<ScopeError>,
    },
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        reason: String,
        suppressed: Vec<ScopeError>,
    },
    #[error("Batch member aborted: {0}")]
    Aborted(String),
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),
}

impl ScopeError {
    /// Wraps any error as a task failure without altering it.
    pub fn task(source: impl Into<BoxError>) -> Self {
        ScopeError::Task {
            source: source.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        ScopeError::Cancelled {
            reason: reason.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScopeError::Cancelled { .. })
    }

    /// Secondary causes recorded alongside this error, oldest first.
    pub fn suppressed(&self) -> &[ScopeError] {
        match self {
            ScopeError::Task { suppressed, .. }
            | ScopeError::Policy { suppressed, .. }
            | ScopeError::Cancelled { suppressed, .. } => suppressed,
            ScopeError::Aborted(_) | ScopeError::InvalidBatch(_) => &[],
        }
    }

    /// Attaches `other` as a secondary cause.
    ///
    /// Variants that carry no suppressed list are first wrapped into a
    /// `Task` whose source is the original error, so it stays reachable
    /// through `source()`.
    pub fn add_suppressed(&mut self, other: ScopeError) {
        let original = match &mut *self {
            ScopeError::Task { suppressed, .. }
            | ScopeError::Policy { suppressed, .. }
            | ScopeError::Cancelled { suppressed, .. } => {
                suppressed.push(other);
                return;
            }
            ScopeError::Aborted(detail) => ScopeError::Aborted(std::mem::take(detail)),
            ScopeError::InvalidBatch(detail) => ScopeError::InvalidBatch(std::mem::take(detail)),
        };
        *self = ScopeError::Task {
            source: Box::new(original),
            suppressed: vec![other],
        };
    }

    pub fn with_suppressed(mut self, others: impl IntoIterator<Item = ScopeError>) -> Self {
        for other in others {
            self.add_suppressed(other);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn task_error_displays_original_cause() {
        let err = ScopeError::task("disk full");
        assert_eq!(err.to_string(), "disk full");
        assert!(err.source().is_some());
        assert!(err.suppressed().is_empty());
    }

    #[test]
    fn suppressed_causes_keep_insertion_order() {
        let err = ScopeError::task("first")
            .with_suppressed([ScopeError::task("second"), ScopeError::task("third")]);
        let names: Vec<String> = err.suppressed().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["second", "third"]);
    }

    #[test]
    fn aborted_is_wrapped_when_suppressing() {
        let mut err = ScopeError::Aborted("worker panicked".to_string());
        err.add_suppressed(ScopeError::task("late"));

        assert_eq!(err.suppressed().len(), 1);
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("Batch member aborted: worker panicked"));
    }

    #[test]
    fn invalid_batch_keeps_its_detail_when_suppressing() {
        let err = ScopeError::InvalidBatch("duplicate key \"a\"".to_string())
            .with_suppressed([ScopeError::task("one"), ScopeError::task("two")]);

        assert!(matches!(err, ScopeError::Task { .. }));
        assert_eq!(err.to_string(), "Invalid batch: duplicate key \"a\"");
        let names: Vec<String> = err.suppressed().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["one", "two"]);
    }
}
