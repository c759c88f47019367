//! # veil-jobs
//!
//! The persistent job scheduler.
//!
//! - [`executor`] - the per-variant executor contract
//! - [`queue`] - the fixed queue topology and variant routing
//! - [`runner`] - the multi-queue runner: lifecycle, admission, execution
//!
//! The durable job table is the sole authority: every transition (insert,
//! failure count, next-run update, delete) commits to the database before
//! the corresponding in-memory effect. The runner never crashes on a job
//! failure; failures are values, recorded and retried on a backoff curve.

pub mod executor;
pub mod queue;
pub mod runner;

pub use executor::{JobExecutor, JobOutcome};
pub use queue::QueueKind;
pub use runner::{JobInfo, JobResult, JobRunner};
pub use veil_db::queries::jobs::JobRecord;

/// Deferrals inside the detection window before a job is classified as a
/// deferral loop.
pub const DEFERRAL_THRESHOLD: usize = 3;

/// Width of the deferral-loop detection window, in seconds per deferral.
pub const DEFERRAL_WINDOW_SECS_PER_COUNT: f64 = 1.0;

/// Bounded wait for running jobs during `stop_and_clear_pending`, in
/// seconds.
pub const STOP_WAIT_WINDOW_SECS: u64 = 5;

/// Retry delay after `failure_count` failures:
/// `0.25 x min(600, 2^failure_count)` seconds. The first retry lands at
/// half a second.
pub fn retry_backoff_secs(failure_count: u32) -> f64 {
    let exp = if failure_count >= 32 {
        600.0
    } else {
        (1u64 << failure_count) as f64
    };
    0.25 * exp.min(600.0)
}

/// Error types for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No executor is registered for the job's variant.
    #[error("no executor registered for variant {0}")]
    ExecutorMissing(String),

    /// The executor requires a thread id the job does not carry.
    #[error("job requires a thread id")]
    RequiredThreadIdMissing,

    /// The executor requires an interaction id the job does not carry.
    #[error("job requires an interaction id")]
    RequiredInteractionIdMissing,

    /// The job reached the runner without a persisted id.
    #[error("job has no persisted id")]
    JobIdMissing,

    /// A dependency row points at a job that no longer exists.
    #[error("job dependencies are missing")]
    MissingDependencies,

    /// The job deferred itself repeatedly without making progress.
    #[error("possible deferral loop")]
    PossibleDeferralLoop,

    /// Admission was rejected (wrong behavior for the entry point).
    #[error("invalid admission: {0}")]
    InvalidAdmission(String),

    /// Database failure.
    #[error("database error: {0}")]
    Db(#[from] veil_db::DbError),

    /// Anything else.
    #[error("{0}")]
    Generic(String),
}

pub type Result<T> = std::result::Result<T, JobError>;
