use batchscope::*;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// Fails its first two attempts, then returns a profile.
fn fetch_profile(user: &'static str, calls: Arc<AtomicU32>) -> BoxFuture<'static, ExecResult<String>> {
    async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(ScopeError::task(format!("profile service busy for {user}")));
        }
        Ok(format!("profile:{user}"))
    }
    .boxed()
}

fn fetch_avatar(user: &'static str) -> BoxFuture<'static, ExecResult<String>> {
    async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if user == "mallory" {
            return Err(ScopeError::task(format!("no avatar for {user}")));
        }
        Ok(format!("avatar:{user}"))
    }
    .boxed()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let scope = ExecScope::default();
    let observer = Observer::new(&ObservabilityConfig::new("demo.users", "load-users"));

    println!("=== retry with linear backoff ===");
    let calls = Arc::new(AtomicU32::new(0));
    let profile = scope
        .backoff_retry_with_warnings(
            BackoffConfig::default(),
            "fetch-profile-retry",
            &log_fields([("user", "alice")]),
            |_| fetch_profile("alice", Arc::clone(&calls)),
        )
        .await?;
    println!("{profile} after {} attempts", calls.load(Ordering::SeqCst));

    println!("=== keyed parallel batch ===");
    let users = ["alice", "bob", "mallory"];
    let start = std::time::Instant::now();
    let batch = scope
        .parallel_batch_keyed(users.into_iter().map(|user| (user, fetch_avatar(user))))
        .await?;
    println!("elapsed: {:?}", start.elapsed());
    println!("successes: {:?}", batch.successes);
    for (user, err) in &batch.failures {
        println!("failed {user}: {err}");
    }

    println!("=== observed batch ===");
    let avatars = observer
        .observe_and_bury_async(
            Vec::new,
            |avatars: Option<&Vec<String>>| log_fields([("count", json!(avatars.map(Vec::len)))]),
            scope.parallel_batch_or_throw(users.into_iter().map(fetch_avatar)),
        )
        .await;
    println!("avatars (buried on failure): {avatars:?}");

    let filtered = scope
        .parallel_batch_filter(users.into_iter().map(fetch_avatar))
        .await?;
    println!("avatars (filtered): {filtered:?}");

    Ok(())
}
