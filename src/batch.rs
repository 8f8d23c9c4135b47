use crate::{ExecResult, ExecScope, ScopeError};
use futures::FutureExt;
use futures::future::{join_all, try_join_all};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Outcome of a keyed batch: the values of the members that succeeded, in
/// input order, and the failure of every other member under its key.
#[derive(Debug)]
pub struct BatchResult<O, K> {
    pub successes: Vec<O>,
    pub failures: HashMap<K, ScopeError>,
}

impl<O, K> BatchResult<O, K> {
    fn empty() -> Self {
        Self {
            successes: Vec::new(),
            failures: HashMap::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_parts(self) -> (Vec<O>, HashMap<K, ScopeError>) {
        (self.successes, self.failures)
    }
}

/// Handles of the spawned members. Dropping the batch future drops this,
/// which aborts every member still running.
struct Members(Vec<JoinHandle<()>>);

impl Drop for Members {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

type Slot<T> = oneshot::Receiver<ExecResult<T>>;

fn collect_slot<T>(index: usize, received: Result<ExecResult<T>, oneshot::error::RecvError>) -> ExecResult<T> {
    received.unwrap_or_else(|_| {
        Err(ScopeError::Aborted(format!(
            "member {index} ended without producing a result"
        )))
    })
}

impl ExecScope {
    /// Spawns every operation without waiting for any other. Each member
    /// writes its result exactly once into its own slot.
    fn launch<T, F>(&self, operations: Vec<F>) -> (Members, Vec<Slot<T>>)
    where
        T: Send + 'static,
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        let mut handles = Vec::with_capacity(operations.len());
        let mut slots = Vec::with_capacity(operations.len());

        for operation in operations {
            let (slot, receiver) = oneshot::channel();
            let handle = self.scheduler().spawn(
                async move {
                    let _ = slot.send(operation.await);
                }
                .boxed(),
            );
            handles.push(handle);
            slots.push(receiver);
        }

        (Members(handles), slots)
    }

    /// Runs all operations concurrently and waits for every one of them.
    ///
    /// Yields one result per input in input order, whatever the completion
    /// order. An empty input returns immediately without touching the
    /// scheduler. Cancelling the scope aborts the members still running.
    pub async fn parallel_batch<T, I, F>(&self, operations: I) -> ExecResult<Vec<ExecResult<T>>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = F>,
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        let operations: Vec<F> = operations.into_iter().collect();
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let (_members, slots) = self.launch(operations);

        tokio::select! {
            biased;
            _ = self.cancellation_token().cancelled() => {
                Err(ScopeError::cancelled("parallel batch cancelled"))
            }
            received = join_all(slots) => {
                Ok(received
                    .into_iter()
                    .enumerate()
                    .map(|(index, result)| collect_slot(index, result))
                    .collect())
            }
        }
    }

    /// Succeeds with every value when all members succeed. Otherwise fails
    /// with the first failure in input order, carrying every other failure
    /// as a suppressed cause.
    pub async fn parallel_batch_or_throw<T, I, F>(&self, operations: I) -> ExecResult<Vec<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = F>,
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        let results = self.parallel_batch(operations).await?;

        let mut values = Vec::with_capacity(results.len());
        let mut first_failure: Option<ScopeError> = None;
        for result in results {
            match result {
                Ok(value) => values.push(value),
                Err(err) => match first_failure.as_mut() {
                    Some(first) => first.add_suppressed(err),
                    None => first_failure = Some(err),
                },
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }

    /// Values of the members that succeeded, in input order. Failures are
    /// dropped.
    pub async fn parallel_batch_filter<T, I, F>(&self, operations: I) -> ExecResult<Vec<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = F>,
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        let results = self.parallel_batch(operations).await?;
        Ok(results.into_iter().filter_map(Result::ok).collect())
    }

    /// Runs keyed operations concurrently and files each failure under the
    /// key of the operation that produced it. Keys must be unique.
    pub async fn parallel_batch_keyed<K, O, I, F>(&self, operations: I) -> ExecResult<BatchResult<O, K>>
    where
        K: Eq + Hash + Debug,
        O: Send + 'static,
        I: IntoIterator<Item = (K, F)>,
        F: Future<Output = ExecResult<O>> + Send + 'static,
    {
        let entries: Vec<(K, F)> = operations.into_iter().collect();
        {
            let mut seen = HashSet::with_capacity(entries.len());
            if let Some((key, _)) = entries.iter().find(|(key, _)| !seen.insert(key)) {
                return Err(ScopeError::InvalidBatch(format!("duplicate key {key:?}")));
            }
        }

        let (keys, operations): (Vec<K>, Vec<F>) = entries.into_iter().unzip();
        let results = self.parallel_batch(operations).await?;

        let mut batch = BatchResult::empty();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(value) => batch.successes.push(value),
                Err(err) => {
                    batch.failures.insert(key, err);
                }
            }
        }
        Ok(batch)
    }

    /// Like [`ExecScope::parallel_batch_or_throw`] but stops at the first
    /// failure to complete, aborting the members still running.
    pub async fn parallel_batch_fail_fast<T, I, F>(&self, operations: I) -> ExecResult<Vec<T>>
    where
        T: Send + 'static,
        I: IntoIterator<Item = F>,
        F: Future<Output = ExecResult<T>> + Send + 'static,
    {
        let operations: Vec<F> = operations.into_iter().collect();
        if operations.is_empty() {
            return Ok(Vec::new());
        }

        let (_members, slots) = self.launch(operations);
        let pending = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| slot.map(move |received| collect_slot(index, received)));

        tokio::select! {
            biased;
            _ = self.cancellation_token().cancelled() => {
                Err(ScopeError::cancelled("parallel batch cancelled"))
            }
            values = try_join_all(pending) => values,
        }
    }
}
