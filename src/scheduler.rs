use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Execution runtime the scope delegates to.
///
/// The scope never creates threads of its own: delayed retries go through
/// [`Scheduler::delay`] and batch members through [`Scheduler::spawn`].
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn delay(&self, duration: Duration);

    fn spawn(&self, task: BoxFuture<'static, ()>) -> JoinHandle<()>;
}

/// Runs everything on the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> JoinHandle<()> {
        tokio::spawn(task)
    }
}
