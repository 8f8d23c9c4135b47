use crate::logging::{EventLogger, LogFields, TracingLogger};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::ExecResult;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Context every combinator runs against.
///
/// Holds the scheduler used for delays and fan-out, the cancellation token
/// shared by everything started from this scope, and the logger used for
/// retry warnings and detached failures.
#[derive(Clone)]
pub struct ExecScope {
    scheduler: Arc<dyn Scheduler>,
    ctx: CancellationToken,
    logger: Arc<dyn EventLogger>,
}

impl Default for ExecScope {
    fn default() -> Self {
        Self::new(Arc::new(TokioScheduler))
    }
}

impl ExecScope {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            ctx: CancellationToken::new(),
            logger: Arc::new(TracingLogger),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_cancellation(mut self, ctx: CancellationToken) -> Self {
        self.ctx = ctx;
        self
    }

    /// A scope whose token is a child of this one: cancelling the parent
    /// cancels the child, not the other way round.
    pub fn child(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            ctx: self.ctx.child_token(),
            logger: Arc::clone(&self.logger),
        }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn logger(&self) -> &dyn EventLogger {
        self.logger.as_ref()
    }

    pub(crate) fn logger_handle(&self) -> Arc<dyn EventLogger> {
        Arc::clone(&self.logger)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.ctx
    }

    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.is_cancelled()
    }

    /// Starts `operation` detached from the caller. A failure is logged
    /// under `forked-operation-error`; cancelling the scope stops it.
    pub fn fork<Fut>(&self, operation: Fut) -> JoinHandle<()>
    where
        Fut: Future<Output = ExecResult<()>> + Send + 'static,
    {
        let ctx = self.ctx.clone();
        let logger = Arc::clone(&self.logger);
        self.scheduler.spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {
                        logger.log(Level::DEBUG, "forked-operation-cancelled", &LogFields::new(), None);
                    }
                    result = operation => {
                        if let Err(err) = result {
                            logger.log(Level::ERROR, "forked-operation-error", &LogFields::new(), Some(&err));
                        }
                    }
                }
            }
            .boxed(),
        )
    }

    /// Forks `operation` when `condition` holds, otherwise runs it inline
    /// and forwards its result.
    pub async fn optionally_fork<Fut>(&self, condition: bool, operation: Fut) -> ExecResult<()>
    where
        Fut: Future<Output = ExecResult<()>> + Send + 'static,
    {
        if condition {
            self.fork(operation);
            Ok(())
        } else {
            operation.await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeError;
    use crate::testing::{CountingScheduler, RecordingLogger};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn fork_logs_failure_of_detached_operation() {
        let logger = RecordingLogger::default();
        let scope = ExecScope::default().with_logger(Arc::new(logger.clone()));

        let handle = scope.fork(async { Err(ScopeError::task("lost connection")) });
        handle.await.unwrap();

        let events = logger.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "forked-operation-error");
        assert_eq!(events[0].cause.as_deref(), Some("lost connection"));
    }

    #[tokio::test]
    async fn optionally_fork_runs_inline_when_condition_is_false() {
        let scheduler = CountingScheduler::default();
        let scope = ExecScope::new(Arc::new(scheduler.clone()));

        let result = scope
            .optionally_fork(false, async { Err(ScopeError::task("inline")) })
            .await;

        assert_eq!(result.unwrap_err().to_string(), "inline");
        assert_eq!(scheduler.spawns(), 0);
    }

    #[tokio::test]
    async fn optionally_fork_detaches_when_condition_is_true() {
        let scheduler = CountingScheduler::default();
        let scope = ExecScope::new(Arc::new(scheduler.clone()));
        let (tx, rx) = oneshot::channel();

        let result = scope
            .optionally_fork(true, async move {
                let _ = tx.send(42);
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(scheduler.spawns(), 1);
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_scope_stops_forked_operation() {
        let logger = RecordingLogger::default();
        let scope = ExecScope::default().with_logger(Arc::new(logger.clone()));

        let handle = scope.fork(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        scope.cancel();
        handle.await.unwrap();

        assert_eq!(logger.events()[0].key, "forked-operation-cancelled");
    }

    #[tokio::test]
    async fn fork_on_cancelled_scope_never_runs_the_operation() {
        let logger = RecordingLogger::default();
        let scope = ExecScope::default().with_logger(Arc::new(logger.clone()));
        scope.cancel();

        for _ in 0..20 {
            scope
                .fork(async { Err(ScopeError::task("too late")) })
                .await
                .unwrap();
        }

        let events = logger.events();
        assert_eq!(events.len(), 20);
        assert!(events.iter().all(|e| e.key == "forked-operation-cancelled"));
    }

    #[test]
    fn child_scope_follows_parent_cancellation() {
        let parent = ExecScope::default();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }
}
