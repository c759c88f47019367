//! The multi-queue job runner.
//!
//! ## Lifecycle
//!
//! `app_did_finish_launching` loads persisted launch jobs and starts only
//! the blocking queue; `app_did_become_active` loads the on-active jobs and
//! starts the non-blocking queues once the blocking queue has drained. The
//! blocking queue's drain fires the registered after-blocking callbacks
//! exactly once per drain and releases the other queues.
//!
//! ## Execution
//!
//! Serial queues run one job at a time; concurrent queues spawn an extra
//! worker whenever they pop with more work pending. A worker validates the
//! job (executor present, required ids present, not scheduled in the
//! future), resolves dependencies (re-queueing non-running dependencies at
//! the head and deferring itself), then awaits the executor and folds the
//! outcome into the database before any in-memory effect.
//!
//! Deferred jobs are NOT re-queued; the executor must have arranged a later
//! trigger. A job deferring [`DEFERRAL_THRESHOLD`] times inside the
//! detection window is failed with `PossibleDeferralLoop` instead of
//! spinning.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use veil_db::queries::jobs::{self, JobRecord};
use veil_db::SharedDb;
use veil_types::job::{JobBehavior, JobVariant};

use crate::executor::{JobExecutor, JobOutcome};
use crate::queue::QueueKind;
use crate::{
    retry_backoff_secs, JobError, Result, DEFERRAL_THRESHOLD, DEFERRAL_WINDOW_SECS_PER_COUNT,
    STOP_WAIT_WINDOW_SECS,
};

/// A job's terminal (or deferral) outcome, delivered to observers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobResult {
    Succeeded,
    Failed { error: String, permanent: bool },
    Deferred,
}

/// The caller-visible snapshot of a stored job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobInfo {
    pub variant: JobVariant,
    pub thread_id: Option<String>,
    pub interaction_id: Option<i64>,
    pub details: Option<Vec<u8>>,
}

type ResultCallback = Box<dyn FnOnce(&JobResult) + Send>;
type DrainCallback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct DeferralTracker {
    times: Vec<f64>,
}

struct QueueState {
    pending: VecDeque<JobRecord>,
    running: HashMap<i64, JobRecord>,
    started: bool,
    workers: usize,
    deferrals: HashMap<i64, DeferralTracker>,
    timer_generation: u64,
}

struct Queue {
    state: std::sync::Mutex<QueueState>,
}

impl Queue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: std::sync::Mutex::new(QueueState {
                pending: VecDeque::new(),
                running: HashMap::new(),
                started: false,
                workers: 0,
                deferrals: HashMap::new(),
                timer_generation: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct Queues {
    blocking: Arc<Queue>,
    message_send: Arc<Queue>,
    message_receive: Arc<Queue>,
    attachment_download: Arc<Queue>,
    expiration_update: Arc<Queue>,
    general: Arc<Queue>,
}

impl Queues {
    fn get(&self, kind: QueueKind) -> &Arc<Queue> {
        match kind {
            QueueKind::Blocking => &self.blocking,
            QueueKind::MessageSend => &self.message_send,
            QueueKind::MessageReceive => &self.message_receive,
            QueueKind::AttachmentDownload => &self.attachment_download,
            QueueKind::ExpirationUpdate => &self.expiration_update,
            QueueKind::General => &self.general,
        }
    }
}

struct RunnerInner {
    db: SharedDb,
    executors: std::sync::RwLock<HashMap<JobVariant, Arc<dyn JobExecutor>>>,
    queues: Queues,
    stopped: AtomicBool,
    blocking_drained: AtomicBool,
    has_activated: AtomicBool,
    after_blocking: std::sync::Mutex<Vec<DrainCallback>>,
    callbacks: std::sync::Mutex<HashMap<i64, Vec<ResultCallback>>>,
}

impl RunnerInner {
    fn queue(&self, kind: QueueKind) -> &Arc<Queue> {
        self.queues.get(kind)
    }

    fn is_running(&self, id: i64) -> bool {
        QueueKind::all()
            .into_iter()
            .any(|kind| self.queue(kind).lock().running.contains_key(&id))
    }

    fn lock_callbacks(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Vec<ResultCallback>>> {
        match self.callbacks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_after_blocking(&self) -> std::sync::MutexGuard<'_, Vec<DrainCallback>> {
        match self.after_blocking.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The durable, multi-queue scheduler.
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_secs_f64() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl JobRunner {
    pub fn new(db: SharedDb) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                db,
                executors: std::sync::RwLock::new(HashMap::new()),
                queues: Queues {
                    blocking: Queue::new(),
                    message_send: Queue::new(),
                    message_receive: Queue::new(),
                    attachment_download: Queue::new(),
                    expiration_update: Queue::new(),
                    general: Queue::new(),
                },
                stopped: AtomicBool::new(false),
                blocking_drained: AtomicBool::new(false),
                has_activated: AtomicBool::new(false),
                after_blocking: std::sync::Mutex::new(Vec::new()),
                callbacks: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register the single executor for a variant.
    pub fn register_executor(&self, variant: JobVariant, executor: Arc<dyn JobExecutor>) {
        match self.inner.executors.write() {
            Ok(mut map) => {
                map.insert(variant, executor);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(variant, executor);
            }
        }
    }

    /// Register a callback fired once the blocking queue drains. Fires
    /// immediately when that has already happened.
    pub fn on_blocking_queue_drained(&self, callback: impl FnOnce() + Send + 'static) {
        if self.inner.blocking_drained.load(Ordering::SeqCst) {
            callback();
        } else {
            self.inner.lock_after_blocking().push(Box::new(callback));
        }
    }

    /// Observe the next result of a pending or running job.
    pub fn after_currently_running(
        &self,
        id: i64,
        callback: impl FnOnce(&JobResult) + Send + 'static,
    ) {
        self.inner
            .lock_callbacks()
            .entry(id)
            .or_default()
            .push(Box::new(callback));
    }

    /// Persist a new job and, when its queue is live and it is due, enqueue
    /// it for immediate execution.
    pub async fn add(&self, mut job: JobRecord) -> Result<i64> {
        let id = {
            let conn = self.inner.db.lock().await;
            jobs::insert(&conn, &job)?
        };
        job.id = Some(id);
        debug!(id, variant = %job.variant, "Job added");
        self.enqueue_if_due(job);
        Ok(id)
    }

    /// Replace a pending job in place, or admit it like [`JobRunner::add`].
    /// A job that is currently running is left untouched in memory; only its
    /// stored row is updated.
    pub async fn upsert(&self, job: JobRecord) -> Result<i64> {
        let Some(id) = job.id else {
            return self.add(job).await;
        };
        {
            let conn = self.inner.db.lock().await;
            jobs::update(&conn, &job)?;
        }
        if self.inner.is_running(id) {
            return Ok(id);
        }

        let kind = QueueKind::for_variant(job.variant);
        let replaced = {
            let mut state = self.inner.queue(kind).lock();
            match state.pending.iter_mut().find(|pending| pending.id == Some(id)) {
                Some(slot) => {
                    *slot = job.clone();
                    true
                }
                None => false,
            }
        };
        if !replaced {
            self.enqueue_if_due(job);
        }
        Ok(id)
    }

    /// Persist a new job and splice it into the pending list immediately
    /// before `before_id` (re-inserting that job at the front first when it
    /// was not queued). Launch/active behaviors are not admissible here.
    pub async fn insert_before(&self, mut job: JobRecord, before_id: i64) -> Result<i64> {
        if job.behavior.is_lifecycle() {
            return Err(JobError::InvalidAdmission(format!(
                "behavior {} cannot be spliced",
                job.behavior
            )));
        }

        let (id, before) = {
            let conn = self.inner.db.lock().await;
            let id = jobs::insert(&conn, &job)?;
            let before = jobs::get(&conn, before_id)?;
            (id, before)
        };
        job.id = Some(id);

        let kind = QueueKind::for_variant(job.variant);
        let mut state = self.inner.queue(kind).lock();
        match state
            .pending
            .iter()
            .position(|pending| pending.id == Some(before_id))
        {
            Some(position) => state.pending.insert(position, job),
            None => {
                if let Some(before) = before {
                    state.pending.push_front(before);
                }
                state.pending.push_front(job);
            }
        }
        Ok(id)
    }

    /// Drop a job from its queue's pending list (the stored row stays).
    pub fn remove_pending(&self, id: i64) {
        for kind in QueueKind::all() {
            let mut state = self.inner.queue(kind).lock();
            state.pending.retain(|job| job.id != Some(id));
        }
    }

    /// Whether a job is executing right now.
    pub fn is_currently_running(&self, id: i64) -> bool {
        self.inner.is_running(id)
    }

    /// Stored snapshots for every job of the given variants.
    pub async fn job_info_for(
        &self,
        variants: &[JobVariant],
    ) -> Result<HashMap<i64, JobInfo>> {
        let conn = self.inner.db.lock().await;
        let records = jobs::jobs_with_variants(&conn, variants)?;
        Ok(records
            .into_iter()
            .filter_map(|job| {
                job.id.map(|id| {
                    (
                        id,
                        JobInfo {
                            variant: job.variant,
                            thread_id: job.thread_id,
                            interaction_id: job.interaction_id,
                            details: job.details,
                        },
                    )
                })
            })
            .collect())
    }

    /// Load persisted launch jobs and start the blocking queue; non-blocking
    /// jobs are queued but held until the app becomes active.
    pub async fn app_did_finish_launching(&self) -> Result<()> {
        let launch_jobs = {
            let conn = self.inner.db.lock().await;
            jobs::jobs_with_behaviors(
                &conn,
                &[JobBehavior::RecurringOnLaunch, JobBehavior::RunOnceNextLaunch],
            )?
        };

        let (blocking, non_blocking): (Vec<JobRecord>, Vec<JobRecord>) =
            launch_jobs.into_iter().partition(|job| job.should_block);
        info!(
            blocking = blocking.len(),
            non_blocking = non_blocking.len(),
            "Loaded launch jobs"
        );

        {
            let mut state = self.inner.queue(QueueKind::Blocking).lock();
            state.pending.extend(blocking);
        }
        for job in non_blocking {
            let kind = QueueKind::for_variant(job.variant);
            let mut state = self.inner.queue(kind).lock();
            if !state.pending.iter().any(|pending| pending.id == job.id) {
                state.pending.push_back(job);
            }
        }

        start_queue(&self.inner, QueueKind::Blocking);
        Ok(())
    }

    /// Load on-active jobs and start the non-blocking queues (immediately if
    /// the blocking queue already drained, otherwise on its drain).
    pub async fn app_did_become_active(&self) -> Result<()> {
        let first_activation = !self.inner.has_activated.swap(true, Ordering::SeqCst);

        let active_jobs = {
            let conn = self.inner.db.lock().await;
            jobs::jobs_with_behaviors(&conn, &[JobBehavior::RecurringOnActive])?
        };
        for job in active_jobs {
            if first_activation && job.should_skip_launch_become_active {
                continue;
            }
            let kind = QueueKind::for_variant(job.variant);
            let mut state = self.inner.queue(kind).lock();
            let queued = state.pending.iter().any(|pending| pending.id == job.id);
            let running = job.id.map(|id| state.running.contains_key(&id)).unwrap_or(false);
            if !queued && !running {
                state.pending.push_back(job);
            }
        }

        let blocking_done = self.inner.blocking_drained.load(Ordering::SeqCst) || {
            let state = self.inner.queue(QueueKind::Blocking).lock();
            state.pending.is_empty() && state.running.is_empty()
        };
        if blocking_done {
            for kind in QueueKind::non_blocking() {
                start_queue(&self.inner, kind);
            }
        }
        Ok(())
    }

    /// Stop scheduling and clear every queue's pending list except the one
    /// owning `except_variant`; wait a bounded window for that queue's
    /// running jobs, then return regardless.
    pub async fn stop_and_clear_pending(&self, except_variant: Option<JobVariant>) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let except_kind = except_variant.map(QueueKind::for_variant);

        for kind in QueueKind::all() {
            if Some(kind) == except_kind {
                continue;
            }
            let mut state = self.inner.queue(kind).lock();
            state.pending.clear();
            state.started = false;
            state.timer_generation += 1;
        }

        if let Some(kind) = except_kind {
            let deadline =
                tokio::time::Instant::now() + Duration::from_secs(STOP_WAIT_WINDOW_SECS);
            while tokio::time::Instant::now() < deadline {
                let idle = {
                    let state = self.inner.queue(kind).lock();
                    state.running.is_empty()
                };
                if idle {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        info!("Job runner stopped and pending work cleared");
    }

    fn enqueue_if_due(&self, job: JobRecord) {
        if job.next_run_timestamp > unix_now() {
            return;
        }
        let kind = QueueKind::for_variant(job.variant);
        {
            let mut state = self.inner.queue(kind).lock();
            if state.pending.iter().any(|pending| pending.id == job.id) {
                return;
            }
            state.pending.push_back(job);
        }
        ensure_worker(&self.inner, kind);
    }
}

/// Type-erased worker future; breaks the type recursion of workers that
/// spawn further workers.
fn boxed_worker(
    inner: Arc<RunnerInner>,
    kind: QueueKind,
    fetch: bool,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(worker(inner, kind, fetch))
}

/// Mark a queue live and make sure a worker is draining it.
fn start_queue(inner: &Arc<RunnerInner>, kind: QueueKind) {
    if inner.stopped.load(Ordering::SeqCst) {
        return;
    }
    let spawn = {
        let mut state = inner.queue(kind).lock();
        state.started = true;
        state.timer_generation += 1;
        if state.workers == 0 {
            state.workers = 1;
            true
        } else {
            false
        }
    };
    if spawn {
        tokio::spawn(boxed_worker(Arc::clone(inner), kind, true));
    }
}

/// Spawn a worker for a queue that already started, without refetching.
fn ensure_worker(inner: &Arc<RunnerInner>, kind: QueueKind) {
    let spawn = {
        let mut state = inner.queue(kind).lock();
        if !state.started {
            return;
        }
        state.timer_generation += 1;
        if state.workers == 0 {
            state.workers = 1;
            true
        } else {
            false
        }
    };
    if spawn {
        tokio::spawn(boxed_worker(Arc::clone(inner), kind, false));
    }
}

/// Pull due jobs for a queue from the store, excluding everything already
/// queued or running anywhere, then order pending by priority (stable, so
/// explicit splices survive).
async fn fetch_due(inner: &Arc<RunnerInner>, kind: QueueKind) {
    let variants = kind.variants();
    if variants.is_empty() {
        return;
    }
    let exclude: Vec<i64> = {
        let mut ids = Vec::new();
        for k in QueueKind::all() {
            let state = inner.queue(k).lock();
            ids.extend(state.pending.iter().filter_map(|job| job.id));
            ids.extend(state.running.keys().copied());
        }
        ids
    };

    let due = {
        let conn = inner.db.lock().await;
        jobs::due_jobs(&conn, &variants, unix_now(), &exclude, false)
    };
    match due {
        Ok(found) => {
            let mut state = inner.queue(kind).lock();
            for job in found {
                if !state.pending.iter().any(|pending| pending.id == job.id) {
                    state.pending.push_back(job);
                }
            }
            let mut ordered: Vec<JobRecord> = state.pending.drain(..).collect();
            ordered.sort_by(|a, b| b.priority.cmp(&a.priority));
            state.pending = ordered.into();
        }
        Err(e) => warn!(queue = %kind, error = %e, "Failed to load due jobs"),
    }
}

async fn worker(inner: Arc<RunnerInner>, kind: QueueKind, fetch: bool) {
    if fetch && kind != QueueKind::Blocking {
        fetch_due(&inner, kind).await;
    }

    loop {
        let next = {
            let mut state = inner.queue(kind).lock();
            if !state.started {
                state.workers -= 1;
                return;
            }
            match state.pending.pop_front() {
                Some(job) => {
                    if !kind.is_serial() && !state.pending.is_empty() {
                        state.workers += 1;
                        tokio::spawn(boxed_worker(Arc::clone(&inner), kind, false));
                    }
                    if let Some(id) = job.id {
                        state.running.insert(id, job.clone());
                    }
                    Some(job)
                }
                None => None,
            }
        };

        match next {
            Some(job) => process_one(&inner, kind, job).await,
            None => {
                let drained = {
                    let mut state = inner.queue(kind).lock();
                    state.workers -= 1;
                    state.workers == 0
                        && state.pending.is_empty()
                        && state.running.is_empty()
                };
                if drained {
                    on_drained(&inner, kind).await;
                }
                return;
            }
        }
    }
}

async fn process_one(inner: &Arc<RunnerInner>, kind: QueueKind, job: JobRecord) {
    let result = run_validated(inner, kind, &job).await;
    if let Err(e) = result {
        warn!(queue = %kind, error = %e, "Job processing error");
    }
    if let Some(id) = job.id {
        let mut state = inner.queue(kind).lock();
        state.running.remove(&id);
    }
}

async fn run_validated(
    inner: &Arc<RunnerInner>,
    kind: QueueKind,
    job: &JobRecord,
) -> Result<()> {
    let Some(id) = job.id else {
        return handle_failure(inner, kind, job, JobError::JobIdMissing, true, 0).await;
    };

    let executor = {
        let map = match inner.executors.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&job.variant).cloned()
    };
    let Some(executor) = executor else {
        return handle_failure(
            inner,
            kind,
            job,
            JobError::ExecutorMissing(job.variant.to_string()),
            true,
            0,
        )
        .await;
    };
    let max_failures = executor.max_failure_count();

    if executor.requires_thread_id() && job.thread_id.is_none() {
        return handle_failure(
            inner,
            kind,
            job,
            JobError::RequiredThreadIdMissing,
            true,
            max_failures,
        )
        .await;
    }
    if executor.requires_interaction_id() && job.interaction_id.is_none() {
        return handle_failure(
            inner,
            kind,
            job,
            JobError::RequiredInteractionIdMissing,
            true,
            max_failures,
        )
        .await;
    }
    if job.next_run_timestamp > unix_now() {
        return handle_deferred(inner, kind, job, max_failures).await;
    }

    // Dependency resolution.
    let dependency_ids = {
        let conn = inner.db.lock().await;
        jobs::dependency_ids(&conn, id)?
    };
    if !dependency_ids.is_empty() {
        let mut dependencies = Vec::with_capacity(dependency_ids.len());
        let mut missing = false;
        {
            let conn = inner.db.lock().await;
            for dep_id in &dependency_ids {
                match jobs::get(&conn, *dep_id)? {
                    Some(dep) => dependencies.push(dep),
                    None => {
                        missing = true;
                        break;
                    }
                }
            }
        }
        if missing {
            return handle_failure(
                inner,
                kind,
                job,
                JobError::MissingDependencies,
                true,
                max_failures,
            )
            .await;
        }

        let to_requeue: Vec<JobRecord> = dependencies
            .into_iter()
            .filter(|dep| dep.id.map(|dep_id| !inner.is_running(dep_id)).unwrap_or(true))
            .collect();
        {
            let mut state = inner.queue(kind).lock();
            // Reverse order keeps ascending job ids at the head.
            for dep in to_requeue.into_iter().rev() {
                if !state.pending.iter().any(|pending| pending.id == dep.id) {
                    state.pending.push_front(dep);
                }
            }
        }
        debug!(id, "Deferring job until its dependencies complete");
        return handle_deferred(inner, kind, job, max_failures).await;
    }

    debug!(id, variant = %job.variant, queue = %kind, "Running job");
    match executor.run(job).await {
        JobOutcome::Success { should_stop } => {
            handle_success(inner, kind, job, should_stop).await
        }
        JobOutcome::Failure { error, permanent } => {
            handle_failure(inner, kind, job, JobError::Generic(error), permanent, max_failures)
                .await
        }
        JobOutcome::Deferred => handle_deferred(inner, kind, job, max_failures).await,
    }
}

async fn handle_success(
    inner: &Arc<RunnerInner>,
    kind: QueueKind,
    job: &JobRecord,
    should_stop: bool,
) -> Result<()> {
    let Some(id) = job.id else {
        return Err(JobError::JobIdMissing);
    };

    let dependants: Vec<JobRecord> = {
        let conn = inner.db.lock().await;
        let dependant_ids = jobs::dependant_ids(&conn, id)?;
        let mut dependants = Vec::with_capacity(dependant_ids.len());
        for dependant_id in dependant_ids {
            if let Some(dependant) = jobs::get(&conn, dependant_id)? {
                dependants.push(dependant);
            }
        }
        jobs::clear_dependencies_on(&conn, id)?;

        match job.behavior {
            JobBehavior::RunOnce | JobBehavior::RunOnceNextLaunch => {
                jobs::delete(&conn, id)?;
            }
            JobBehavior::Recurring if should_stop => {
                jobs::delete(&conn, id)?;
            }
            JobBehavior::Recurring => {
                let now = unix_now();
                if job.next_run_timestamp <= now {
                    jobs::reset_failure(&conn, id, now + 1)?;
                } else if job.failure_count > 0 {
                    jobs::reset_failure(&conn, id, job.next_run_timestamp)?;
                }
            }
            JobBehavior::RecurringOnLaunch | JobBehavior::RecurringOnActive => {
                if job.failure_count > 0 {
                    jobs::reset_failure(&conn, id, 0)?;
                }
            }
        }
        dependants
    };

    // Unblocked dependants go to the head, ascending id order preserved.
    {
        let mut state = inner.queue(kind).lock();
        state.deferrals.remove(&id);
        for dependant in dependants.into_iter().rev() {
            let running = dependant
                .id
                .map(|dependant_id| inner.is_running(dependant_id))
                .unwrap_or(false);
            if !running && !state.pending.iter().any(|pending| pending.id == dependant.id) {
                state.pending.push_front(dependant);
            }
        }
    }

    debug!(id, "Job succeeded");
    fire_callbacks(inner, id, JobResult::Succeeded);
    Ok(())
}

async fn handle_failure(
    inner: &Arc<RunnerInner>,
    kind: QueueKind,
    job: &JobRecord,
    error: JobError,
    permanent: bool,
    max_failures: i64,
) -> Result<()> {
    let Some(id) = job.id else {
        return Err(JobError::JobIdMissing);
    };

    // A row deleted mid-flight (e.g. the conversation went away) is dropped
    // silently.
    {
        let conn = inner.db.lock().await;
        if jobs::get(&conn, id)?.is_none() {
            debug!(id, "Job row vanished; dropping result");
            return Ok(());
        }
    }

    // Blocking launch jobs retry in place without burning retries, except
    // when the failure IS the deferral loop guard.
    if kind == QueueKind::Blocking
        && job.should_block
        && !matches!(error, JobError::PossibleDeferralLoop)
    {
        warn!(id, error = %error, "Blocking job failed; retrying immediately");
        let mut state = inner.queue(kind).lock();
        state.pending.push_front(job.clone());
        return Ok(());
    }

    let new_count = job.failure_count + 1;
    let exhausted = max_failures >= 0 && i64::from(new_count) > max_failures;

    if permanent || exhausted {
        let removed = {
            let conn = inner.db.lock().await;
            jobs::delete_with_dependants(&conn, id)?
        };
        warn!(id, error = %error, removed = removed.len(), "Job failed permanently");
        fire_callbacks(
            inner,
            id,
            JobResult::Failed {
                error: error.to_string(),
                permanent: true,
            },
        );
        return Ok(());
    }

    let now = unix_now();
    let next_run = now + retry_backoff_secs(new_count).ceil() as i64;
    {
        let conn = inner.db.lock().await;
        jobs::record_failure(&conn, id, new_count, next_run)?;
        let dependant_ids = jobs::dependant_ids(&conn, id)?;
        jobs::mirror_failure_to_dependants(&conn, &dependant_ids, new_count, next_run + 1)?;
    }
    debug!(id, failure_count = new_count, next_run, error = %error, "Job failed; rescheduled");
    fire_callbacks(
        inner,
        id,
        JobResult::Failed {
            error: error.to_string(),
            permanent: false,
        },
    );
    Ok(())
}

async fn handle_deferred(
    inner: &Arc<RunnerInner>,
    kind: QueueKind,
    job: &JobRecord,
    max_failures: i64,
) -> Result<()> {
    let Some(id) = job.id else {
        return Err(JobError::JobIdMissing);
    };

    let now = now_secs_f64();
    let loop_detected = {
        let mut state = inner.queue(kind).lock();
        let tracker = state.deferrals.entry(id).or_default();
        tracker.times.push(now);
        let count = tracker.times.len();
        count >= DEFERRAL_THRESHOLD && {
            let window_start = tracker.times[count - DEFERRAL_THRESHOLD];
            now - window_start <= DEFERRAL_THRESHOLD as f64 * DEFERRAL_WINDOW_SECS_PER_COUNT
        }
    };

    if loop_detected {
        warn!(id, "Deferral loop detected");
        {
            let mut state = inner.queue(kind).lock();
            state.deferrals.remove(&id);
        }
        return handle_failure(
            inner,
            kind,
            job,
            JobError::PossibleDeferralLoop,
            false,
            max_failures,
        )
        .await;
    }

    debug!(id, "Job deferred");
    fire_callbacks(inner, id, JobResult::Deferred);
    Ok(())
}

fn fire_callbacks(inner: &Arc<RunnerInner>, id: i64, result: JobResult) {
    let callbacks = inner.lock_callbacks().remove(&id).unwrap_or_default();
    for callback in callbacks {
        callback(&result);
    }
}

async fn on_drained(inner: &Arc<RunnerInner>, kind: QueueKind) {
    debug!(queue = %kind, "Queue drained");
    if inner.stopped.load(Ordering::SeqCst) {
        return;
    }

    if kind == QueueKind::Blocking {
        inner.blocking_drained.store(true, Ordering::SeqCst);
        let callbacks: Vec<DrainCallback> = inner.lock_after_blocking().drain(..).collect();
        for callback in callbacks {
            callback();
        }
        if inner.has_activated.load(Ordering::SeqCst) {
            for non_blocking in QueueKind::non_blocking() {
                start_queue(inner, non_blocking);
            }
        }
        return;
    }

    // One single-shot timer wakes the queue for its soonest future job; any
    // reschedule bumps the generation and orphans stale timers.
    let soonest = {
        let conn = inner.db.lock().await;
        jobs::soonest_next_run(&conn, &kind.variants(), unix_now()).ok().flatten()
    };
    let Some(at) = soonest else {
        return;
    };

    let generation = {
        let mut state = inner.queue(kind).lock();
        state.timer_generation += 1;
        state.timer_generation
    };
    let delay = (at - unix_now()).max(0) as u64;
    let timer_inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(delay)).await;
        let spawn = {
            let mut state = timer_inner.queue(kind).lock();
            let live = state.started && state.timer_generation == generation;
            if live && state.workers == 0 {
                state.workers = 1;
                true
            } else {
                false
            }
        };
        if spawn {
            tokio::spawn(boxed_worker(timer_inner, kind, true));
        }
    });
}
