//! Logging plus success/failure counters around a block of work.
//!
//! Every path logs first and increments its counter second. Counter
//! increments are best-effort: a registry error is logged under
//! `<meter_prefix>-metrics-error` and never replaces the observed outcome.
//!
//! Meters are named `<meter_prefix>.success` and `<meter_prefix>.error`.

use crate::logging::{EventLogger, LogFields, TracingLogger};
use crate::meter::{MeterRegistry, MetricsRegistry};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tracing::Level;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub meter_prefix: String,
    pub success_key: String,
    /// Defaults to `"<success_key>-error"`.
    pub failure_key: Option<String>,
}

impl ObservabilityConfig {
    pub fn new(meter_prefix: impl Into<String>, success_key: impl Into<String>) -> Self {
        Self {
            meter_prefix: meter_prefix.into(),
            success_key: success_key.into(),
            failure_key: None,
        }
    }

    pub fn failure_key(&self) -> String {
        match &self.failure_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => format!("{}-error", self.success_key),
        }
    }
}

/// What to do with a failure once it has been observed.
pub enum Disposition<T> {
    /// Log at WARN, count the failure and return the dummy value instead.
    Bury(Box<dyn FnOnce() -> T + Send>),
    /// Log at ERROR, count the failure and return the original error.
    Rethrow,
}

impl<T> Disposition<T> {
    pub fn bury(dummy: impl FnOnce() -> T + Send + 'static) -> Self {
        Disposition::Bury(Box::new(dummy))
    }
}

#[derive(Clone)]
pub struct Observer {
    meter_prefix: String,
    success_key: String,
    failure_key: String,
    logger: Arc<dyn EventLogger>,
    meters: Arc<dyn MeterRegistry>,
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("meter_prefix", &self.meter_prefix)
            .field("success_key", &self.success_key)
            .field("failure_key", &self.failure_key)
            .finish_non_exhaustive()
    }
}

impl Observer {
    /// Logs through `tracing` and counts through the `metrics` facade.
    pub fn new(config: &ObservabilityConfig) -> Self {
        Self::with_backends(config, Arc::new(TracingLogger), Arc::new(MetricsRegistry))
    }

    pub fn with_backends(
        config: &ObservabilityConfig,
        logger: Arc<dyn EventLogger>,
        meters: Arc<dyn MeterRegistry>,
    ) -> Self {
        Self {
            meter_prefix: config.meter_prefix.clone(),
            success_key: config.success_key.clone(),
            failure_key: config.failure_key(),
            logger,
            meters,
        }
    }

    /// Same backends and meters, new log keys. The failure key becomes
    /// `"<success_key>-error"`.
    pub fn with_success_key(&self, success_key: impl Into<String>) -> Self {
        let success_key = success_key.into();
        Self {
            failure_key: format!("{success_key}-error"),
            success_key,
            ..self.clone()
        }
    }

    pub fn success_key(&self) -> &str {
        &self.success_key
    }

    pub fn failure_key(&self) -> &str {
        &self.failure_key
    }

    pub fn success_meter(&self) -> String {
        format!("{}.success", self.meter_prefix)
    }

    pub fn failure_meter(&self) -> String {
        format!("{}.error", self.meter_prefix)
    }

    fn mark(&self, meter: String) {
        if let Err(err) = self.meters.increment(&meter) {
            let fields = crate::log_fields([("meter", meter)]);
            let key = format!("{}-metrics-error", self.meter_prefix);
            self.logger.log(Level::WARN, &key, &fields, Some(&err));
        }
    }

    fn record(
        &self,
        level: Level,
        key: &str,
        fields: &LogFields,
        cause: Option<&(dyn Error + 'static)>,
        meter: String,
    ) {
        self.logger.log(level, key, fields, cause);
        self.mark(meter);
    }

    /// Records a success without running anything: INFO under the success
    /// key, then the success meter.
    pub fn observe_success(&self, fields: &LogFields) {
        self.observe_at_info(fields);
    }

    /// Records a failure without running anything: ERROR under the failure
    /// key, then the failure meter.
    pub fn observe_failure(&self, cause: &(dyn Error + 'static), fields: &LogFields) {
        self.observe_at_error(cause, fields);
    }

    pub fn observe_at_debug(&self, fields: &LogFields) {
        self.record(Level::DEBUG, &self.success_key, fields, None, self.success_meter());
    }

    pub fn observe_at_info(&self, fields: &LogFields) {
        self.record(Level::INFO, &self.success_key, fields, None, self.success_meter());
    }

    pub fn observe_at_warn(&self, cause: Option<&(dyn Error + 'static)>, fields: &LogFields) {
        self.record(Level::WARN, &self.failure_key, fields, cause, self.failure_meter());
    }

    pub fn observe_at_error(&self, cause: &(dyn Error + 'static), fields: &LogFields) {
        self.record(Level::ERROR, &self.failure_key, fields, Some(cause), self.failure_meter());
    }

    pub fn observe_just_mark_success(&self) {
        self.mark(self.success_meter());
    }

    /// Records `err` as a failure and hands it back, for call sites that
    /// propagate it themselves: `return Err(observer.observe_and_throw_error(err, &fields))`.
    pub fn observe_and_throw_error<E>(&self, err: E, fields: &LogFields) -> E
    where
        E: Error + 'static,
    {
        self.observe_at_error(&err, fields);
        err
    }

    fn settle<T, E, M>(&self, disposition: Disposition<T>, fields: M, result: Result<T, E>) -> Result<T, E>
    where
        E: Error + 'static,
        M: FnOnce(Option<&T>) -> LogFields,
    {
        match result {
            Ok(value) => Ok(self.settle_success(fields, value)),
            Err(err) => match disposition {
                Disposition::Bury(dummy) => Ok(self.settle_buried(fields, err, dummy)),
                Disposition::Rethrow => Err(self.observe_and_throw_error(err, &fields(None))),
            },
        }
    }

    fn settle_success<T, M>(&self, fields: M, value: T) -> T
    where
        M: FnOnce(Option<&T>) -> LogFields,
    {
        self.observe_at_info(&fields(Some(&value)));
        value
    }

    fn settle_buried<T, E, D, M>(&self, fields: M, err: E, dummy: D) -> T
    where
        E: Error + 'static,
        D: FnOnce() -> T,
        M: FnOnce(Option<&T>) -> LogFields,
    {
        self.observe_at_warn(Some(&err), &fields(None));
        dummy()
    }

    /// Runs `block` and observes its outcome. `fields` builds the log map
    /// from the produced value, or from `None` on failure.
    pub fn observe<T, E, M, B>(&self, disposition: Disposition<T>, fields: M, block: B) -> Result<T, E>
    where
        E: Error + 'static,
        M: FnOnce(Option<&T>) -> LogFields,
        B: FnOnce() -> Result<T, E>,
    {
        self.settle(disposition, fields, block())
    }

    pub async fn observe_async<T, E, M, Fut>(
        &self,
        disposition: Disposition<T>,
        fields: M,
        block: Fut,
    ) -> Result<T, E>
    where
        E: Error + 'static,
        M: FnOnce(Option<&T>) -> LogFields,
        Fut: Future<Output = Result<T, E>>,
    {
        self.settle(disposition, fields, block.await)
    }

    /// Runs `block`; a failure is logged at WARN, counted and replaced by
    /// `dummy()`.
    pub fn observe_and_bury<T, E, D, M, B>(&self, dummy: D, fields: M, block: B) -> T
    where
        E: Error + 'static,
        D: FnOnce() -> T,
        M: FnOnce(Option<&T>) -> LogFields,
        B: FnOnce() -> Result<T, E>,
    {
        self.bury(dummy, fields, block())
    }

    pub async fn observe_and_bury_async<T, E, D, M, Fut>(&self, dummy: D, fields: M, block: Fut) -> T
    where
        E: Error + 'static,
        D: FnOnce() -> T,
        M: FnOnce(Option<&T>) -> LogFields,
        Fut: Future<Output = Result<T, E>>,
    {
        self.bury(dummy, fields, block.await)
    }

    fn bury<T, E, D, M>(&self, dummy: D, fields: M, result: Result<T, E>) -> T
    where
        E: Error + 'static,
        D: FnOnce() -> T,
        M: FnOnce(Option<&T>) -> LogFields,
    {
        match result {
            Ok(value) => self.settle_success(fields, value),
            Err(err) => self.settle_buried(fields, err, dummy),
        }
    }

    /// Runs `block`; a failure is logged at ERROR, counted and returned
    /// unchanged.
    pub fn observe_and_throw<T, E, M, B>(&self, fields: M, block: B) -> Result<T, E>
    where
        E: Error + 'static,
        M: FnOnce(Option<&T>) -> LogFields,
        B: FnOnce() -> Result<T, E>,
    {
        self.settle(Disposition::Rethrow, fields, block())
    }

    pub async fn observe_and_throw_async<T, E, M, Fut>(&self, fields: M, block: Fut) -> Result<T, E>
    where
        E: Error + 'static,
        M: FnOnce(Option<&T>) -> LogFields,
        Fut: Future<Output = Result<T, E>>,
    {
        self.settle(Disposition::Rethrow, fields, block.await)
    }

    /// Rethrows a failure when `throw_on_failure` holds. Otherwise the
    /// failure is logged at ERROR under `"<failure_key>-ignored"`, counted,
    /// and replaced by `dummy()`.
    pub async fn observe_or_ignore<T, E, D, Fut>(
        &self,
        throw_on_failure: bool,
        dummy: D,
        fields: &LogFields,
        block: Fut,
    ) -> Result<T, E>
    where
        E: Error + 'static,
        D: FnOnce() -> T,
        Fut: Future<Output = Result<T, E>>,
    {
        match block.await {
            Ok(value) => {
                self.observe_at_info(fields);
                Ok(value)
            }
            Err(err) if throw_on_failure => Err(self.observe_and_throw_error(err, fields)),
            Err(err) => {
                let key = format!("{}-ignored", self.failure_key);
                self.record(Level::ERROR, &key, fields, Some(&err), self.failure_meter());
                Ok(dummy())
            }
        }
    }
}
