use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Failed to increment {name}: {reason}")]
    Backend { name: String, reason: String },
}

/// Counter registry used by the observer.
///
/// Increments are best-effort: an `Err` is logged by the caller and never
/// replaces the outcome being observed.
pub trait MeterRegistry: Send + Sync {
    fn increment(&self, name: &str) -> Result<(), MetricsError>;
}

/// Forwards increments to whatever recorder is installed behind the
/// `metrics` facade. Without a recorder the increments are no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRegistry;

impl MeterRegistry for MetricsRegistry {
    fn increment(&self, name: &str) -> Result<(), MetricsError> {
        metrics::counter!(name.to_owned()).increment(1);
        Ok(())
    }
}
