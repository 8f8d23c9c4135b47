//! Key/value event logging.
//!
//! Every event carries a stable log key plus a structured field map. The map
//! is rendered as one JSON field so callers can attach arbitrary values
//! without a fixed tracing field set.

use serde_json::{Map, Value};
use std::error::Error;
use std::future::Future;
use tracing::Level;

pub type LogFields = Map<String, Value>;

/// Builds a [`LogFields`] map from key/value pairs.
pub fn log_fields<K, V, I>(pairs: I) -> LogFields
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

pub trait EventLogger: Send + Sync {
    fn log(
        &self,
        level: Level,
        key: &str,
        fields: &LogFields,
        cause: Option<&(dyn Error + 'static)>,
    );
}

/// Emits events through the `tracing` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl EventLogger for TracingLogger {
    fn log(
        &self,
        level: Level,
        key: &str,
        fields: &LogFields,
        cause: Option<&(dyn Error + 'static)>,
    ) {
        let fields = Value::Object(fields.clone());
        let cause = cause.map(ToString::to_string).unwrap_or_default();

        if level == Level::ERROR {
            tracing::error!(key, %fields, %cause, "{key}");
        } else if level == Level::WARN {
            tracing::warn!(key, %fields, %cause, "{key}");
        } else if level == Level::INFO {
            tracing::info!(key, %fields, %cause, "{key}");
        } else if level == Level::DEBUG {
            tracing::debug!(key, %fields, %cause, "{key}");
        } else {
            tracing::trace!(key, %fields, %cause, "{key}");
        }
    }
}

/// Awaits `operation`, logging INFO under `key` when it succeeds and ERROR
/// with the cause when it fails. The result is forwarded untouched.
pub async fn log_success_or_error<T, E, Fut>(
    logger: &dyn EventLogger,
    key: &str,
    fields: &LogFields,
    operation: Fut,
) -> Result<T, E>
where
    E: Error + 'static,
    Fut: Future<Output = Result<T, E>>,
{
    let result = operation.await;
    match &result {
        Ok(_) => logger.log(Level::INFO, key, fields, None),
        Err(err) => logger.log(Level::ERROR, key, fields, Some(err)),
    }
    result
}
