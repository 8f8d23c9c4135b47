//! Spy collaborators shared by the unit tests.

use crate::logging::{EventLogger, LogFields};
use crate::meter::{MeterRegistry, MetricsError};
use crate::scheduler::{Scheduler, TokioScheduler};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::Level;

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    pub level: Level,
    pub key: String,
    pub fields: LogFields,
    pub cause: Option<String>,
}

/// Journal shared by a logger and a meter registry, so tests can assert on
/// the relative order of log lines and increments.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Default, Clone)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LoggedEvent>>>,
    journal: Option<Journal>,
}

impl RecordingLogger {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            events: Arc::default(),
            journal: Some(journal),
        }
    }

    pub fn events(&self) -> Vec<LoggedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventLogger for RecordingLogger {
    fn log(
        &self,
        level: Level,
        key: &str,
        fields: &LogFields,
        cause: Option<&(dyn Error + 'static)>,
    ) {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("log:{key}"));
        }
        self.events.lock().unwrap().push(LoggedEvent {
            level,
            key: key.to_string(),
            fields: fields.clone(),
            cause: cause.map(ToString::to_string),
        });
    }
}

#[derive(Default, Clone)]
pub struct RecordingMeters {
    marks: Arc<Mutex<Vec<String>>>,
    journal: Option<Journal>,
    failing: bool,
}

impl RecordingMeters {
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    /// A registry whose every increment is recorded and then reported as a
    /// backend failure.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.marks.lock().unwrap().iter().filter(|m| *m == name).count()
    }

    pub fn total(&self) -> usize {
        self.marks.lock().unwrap().len()
    }
}

impl MeterRegistry for RecordingMeters {
    fn increment(&self, name: &str) -> Result<(), MetricsError> {
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("mark:{name}"));
        }
        self.marks.lock().unwrap().push(name.to_string());
        if self.failing {
            return Err(MetricsError::Backend {
                name: name.to_string(),
                reason: "registry offline".to_string(),
            });
        }
        Ok(())
    }
}

/// Delegates to tokio while counting every call.
#[derive(Default, Clone)]
pub struct CountingScheduler {
    delays: Arc<Mutex<Vec<Duration>>>,
    spawns: Arc<AtomicUsize>,
    immediate: bool,
}

impl CountingScheduler {
    /// Delays complete on their first poll instead of sleeping.
    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Self::default()
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.delays.lock().unwrap().len() + self.spawns()
    }
}

#[async_trait]
impl Scheduler for CountingScheduler {
    async fn delay(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
        if !self.immediate {
            TokioScheduler.delay(duration).await;
        }
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) -> JoinHandle<()> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        TokioScheduler.spawn(task)
    }
}
