use std::fmt::Debug;

/// Why a scheduled action did not complete.
#[derive(Debug)]
pub enum JobFailure {
    Error(anyhow::Error),
    Panicked(String),
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Error(error) => write!(f, "{error:#}"),
            JobFailure::Panicked(message) => write!(f, "panicked: {message}"),
        }
    }
}

/// Receives failures of fire-and-forget actions.
pub trait FailureSink<K>: Send + Sync {
    fn report(&self, key: &K, failure: &JobFailure);
}

/// Reports failures as `tracing` errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl<K: Debug> FailureSink<K> for LogSink {
    fn report(&self, key: &K, failure: &JobFailure) {
        tracing::error!(?key, %failure, "Scheduled job failed");
    }
}
