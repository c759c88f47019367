//! The per-variant executor contract.
//!
//! Each job variant registers exactly one executor. The runner invokes
//! [`JobExecutor::run`] and folds the returned outcome into durable state;
//! because the runner awaits the single outcome and processes it before
//! touching the job again, an executor's success and failure handling can
//! never interleave for one run.

use async_trait::async_trait;
use veil_db::queries::jobs::JobRecord;

/// What one execution of a job produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job completed. `should_stop` asks a recurring job to delete
    /// itself instead of rescheduling.
    Success { should_stop: bool },
    /// The job failed. Permanent failures delete the job and its
    /// dependants; transient ones reschedule on the backoff curve.
    Failure { error: String, permanent: bool },
    /// The job cannot make progress yet. It is NOT re-queued: the executor
    /// must have arranged for something (a dependency completing, a timer)
    /// to cause a later queue pass to pick it up.
    Deferred,
}

impl JobOutcome {
    /// Plain success.
    pub fn success() -> Self {
        JobOutcome::Success { should_stop: false }
    }

    /// Transient failure.
    pub fn failure(error: impl Into<String>) -> Self {
        JobOutcome::Failure {
            error: error.into(),
            permanent: false,
        }
    }

    /// Permanent failure.
    pub fn permanent_failure(error: impl Into<String>) -> Self {
        JobOutcome::Failure {
            error: error.into(),
            permanent: true,
        }
    }
}

/// One job variant's execution logic.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Failures tolerated before the job is deleted; `-1` means unlimited
    /// (acceptable for ingress paths that must keep retrying).
    fn max_failure_count(&self) -> i64 {
        10
    }

    /// Whether jobs of this variant must carry a thread id.
    fn requires_thread_id(&self) -> bool {
        false
    }

    /// Whether jobs of this variant must carry an interaction id.
    fn requires_interaction_id(&self) -> bool {
        false
    }

    /// Execute the job once.
    async fn run(&self, job: &JobRecord) -> JobOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(
            JobOutcome::success(),
            JobOutcome::Success { should_stop: false }
        );
        assert_eq!(
            JobOutcome::failure("network"),
            JobOutcome::Failure {
                error: "network".to_string(),
                permanent: false
            }
        );
        assert!(matches!(
            JobOutcome::permanent_failure("bad payload"),
            JobOutcome::Failure { permanent: true, .. }
        ));
    }
}
