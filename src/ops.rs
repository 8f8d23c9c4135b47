use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Lets `handler` see a failure, then re-raises it unchanged.
pub async fn on_error_and_throw<T, E, Fut, H>(operation: Fut, handler: H) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    H: FnOnce(&E),
{
    let result = operation.await;
    if let Err(err) = &result {
        handler(err);
    }
    result
}

/// Runs `on_true` or `on_false` after `operation` succeeds, depending on
/// `predicate`, and forwards the original value. A failing follow-up fails
/// the whole chain.
pub async fn next_op_if<T, E, Fut, P, A, FutA, B, FutB>(
    operation: Fut,
    predicate: P,
    on_true: A,
    on_false: B,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    P: FnOnce(&T) -> bool,
    A: FnOnce(&T) -> FutA,
    FutA: Future<Output = Result<(), E>>,
    B: FnOnce(&T) -> FutB,
    FutB: Future<Output = Result<(), E>>,
{
    let value = operation.await?;
    if predicate(&value) {
        on_true(&value).await?;
    } else {
        on_false(&value).await?;
    }
    Ok(value)
}

/// Reports the elapsed time of `operation` to `timer`, when there is one.
pub async fn maybe_time<Fut, Timer>(operation: Fut, timer: Option<Timer>) -> Fut::Output
where
    Fut: Future,
    Timer: FnOnce(Duration),
{
    match timer {
        Some(timer) => {
            let start = Instant::now();
            let output = operation.await;
            timer(start.elapsed());
            output
        }
        None => operation.await,
    }
}
