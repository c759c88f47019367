//! Integration test: scheduler flows across the store and runner.
//!
//! 1. A dependency chain executes in order and cleans up after itself
//! 2. A transient failure mirrors onto dependants and respects the
//!    backoff curve
//! 3. Durable jobs survive a "restart" (a fresh runner over the same
//!    database) and run at the next lifecycle event

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use veil_db::queries::jobs;
use veil_db::SharedDb;
use veil_jobs::{JobExecutor, JobOutcome, JobRecord, JobRunner};
use veil_types::job::{JobBehavior, JobVariant};

struct ScriptedExecutor {
    order: Arc<Mutex<Vec<i64>>>,
    outcomes: Mutex<HashMap<i64, JobOutcome>>,
}

impl ScriptedExecutor {
    fn new(order: Arc<Mutex<Vec<i64>>>) -> Arc<Self> {
        Arc::new(Self {
            order,
            outcomes: Mutex::new(HashMap::new()),
        })
    }

    fn script(&self, id: i64, outcome: JobOutcome) {
        if let Ok(mut outcomes) = self.outcomes.lock() {
            outcomes.insert(id, outcome);
        }
    }
}

#[async_trait]
impl JobExecutor for ScriptedExecutor {
    fn max_failure_count(&self) -> i64 {
        5
    }

    async fn run(&self, job: &JobRecord) -> JobOutcome {
        let id = job.id.unwrap_or(-1);
        if let Ok(mut order) = self.order.lock() {
            order.push(id);
        }
        self.outcomes
            .lock()
            .ok()
            .and_then(|outcomes| outcomes.get(&id).cloned())
            .unwrap_or_else(JobOutcome::success)
    }
}

fn new_db() -> SharedDb {
    veil_db::into_shared(veil_db::open_memory().expect("open db"))
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn row_gone(db: &SharedDb, id: i64) -> bool {
    db.try_lock()
        .ok()
        .map(|conn| jobs::get(&conn, id).ok().flatten().is_none())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_dependency_chain_runs_in_order() {
    let db = new_db();
    let runner = JobRunner::new(db.clone());
    let order = Arc::new(Mutex::new(Vec::new()));
    runner.register_executor(
        JobVariant::MessageSend,
        ScriptedExecutor::new(order.clone()),
    );

    // C depends on B depends on A; all persisted before the app starts.
    let (a, b, c) = {
        let conn = db.lock().await;
        let a = jobs::insert(
            &conn,
            &JobRecord::new(JobVariant::MessageSend, JobBehavior::RunOnce),
        )
        .expect("insert a");
        let b = jobs::insert(
            &conn,
            &JobRecord::new(JobVariant::MessageSend, JobBehavior::RunOnce),
        )
        .expect("insert b");
        let c = jobs::insert(
            &conn,
            &JobRecord::new(JobVariant::MessageSend, JobBehavior::RunOnce),
        )
        .expect("insert c");
        jobs::add_dependency(&conn, b, a).expect("dep b->a");
        jobs::add_dependency(&conn, c, b).expect("dep c->b");
        (a, b, c)
    };

    runner.app_did_finish_launching().await.expect("launch");
    runner.app_did_become_active().await.expect("active");

    wait_until(|| order.lock().map(|o| o.len() == 3).unwrap_or(false)).await;
    assert_eq!(order.lock().expect("order").as_slice(), &[a, b, c]);

    wait_until(|| row_gone(&db, c)).await;
    let conn = db.lock().await;
    for id in [a, b, c] {
        assert!(jobs::get(&conn, id).expect("get").is_none());
        assert!(jobs::dependant_ids(&conn, id).expect("deps").is_empty());
    }
}

#[tokio::test]
async fn test_failure_mirrors_to_dependants() {
    let db = new_db();
    let runner = JobRunner::new(db.clone());
    let order = Arc::new(Mutex::new(Vec::new()));
    let executor = ScriptedExecutor::new(order.clone());
    runner.register_executor(JobVariant::ConfigSync, executor.clone());

    let (parent, child) = {
        let conn = db.lock().await;
        let parent = jobs::insert(
            &conn,
            &JobRecord::new(JobVariant::ConfigSync, JobBehavior::RunOnce),
        )
        .expect("insert parent");
        let child = jobs::insert(
            &conn,
            &JobRecord::new(JobVariant::ConfigSync, JobBehavior::RunOnce),
        )
        .expect("insert child");
        jobs::add_dependency(&conn, child, parent).expect("dep");
        (parent, child)
    };
    executor.script(parent, JobOutcome::failure("swarm unreachable"));

    runner.app_did_finish_launching().await.expect("launch");
    runner.app_did_become_active().await.expect("active");

    wait_until(|| {
        db.try_lock()
            .ok()
            .map(|conn| {
                jobs::get(&conn, parent)
                    .ok()
                    .flatten()
                    .map(|job| job.failure_count == 1)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    })
    .await;

    let conn = db.lock().await;
    let parent_row = jobs::get(&conn, parent).expect("get").expect("parent row");
    let child_row = jobs::get(&conn, child).expect("get").expect("child row");
    assert_eq!(parent_row.failure_count, 1);
    // The dependant mirrors the failure count, scheduled just after.
    assert_eq!(child_row.failure_count, 1);
    assert_eq!(child_row.next_run_timestamp, parent_row.next_run_timestamp + 1);
    // The dependency row is intact; the child still waits for the parent.
    assert_eq!(jobs::dependency_ids(&conn, child).expect("deps"), vec![parent]);
}

#[tokio::test]
async fn test_durable_jobs_survive_restart() {
    let db = new_db();

    // First session: persist a job but never start the queues.
    {
        let runner = JobRunner::new(db.clone());
        runner
            .add(JobRecord::new(JobVariant::MessageSend, JobBehavior::RunOnce))
            .await
            .expect("add");
    }

    // Second session over the same database.
    let runner = JobRunner::new(db.clone());
    let order = Arc::new(Mutex::new(Vec::new()));
    runner.register_executor(
        JobVariant::MessageSend,
        ScriptedExecutor::new(order.clone()),
    );
    runner.app_did_finish_launching().await.expect("launch");
    runner.app_did_become_active().await.expect("active");

    wait_until(|| order.lock().map(|o| o.len() == 1).unwrap_or(false)).await;
}
