//! Durable job store.
//!
//! The job table is the sole authority for scheduler state: the runner
//! commits every transition here before applying it in memory. Job ids are
//! assigned by SQLite AUTOINCREMENT and never reissued after deletion.

use rusqlite::{Connection, Row};
use veil_types::job::{JobBehavior, JobVariant};

use crate::{DbError, Result};

/// A persisted job record. `id` is `None` until the record is inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRecord {
    pub id: Option<i64>,
    pub variant: JobVariant,
    pub behavior: JobBehavior,
    pub should_block: bool,
    pub priority: i64,
    pub failure_count: u32,
    /// Unix seconds; the job is not eligible to run before this.
    pub next_run_timestamp: i64,
    pub thread_id: Option<String>,
    pub interaction_id: Option<i64>,
    pub details: Option<Vec<u8>>,
    pub should_skip_launch_become_active: bool,
}

impl JobRecord {
    /// A minimal record for the given variant and behavior, runnable now.
    pub fn new(variant: JobVariant, behavior: JobBehavior) -> Self {
        Self {
            id: None,
            variant,
            behavior,
            should_block: false,
            priority: 0,
            failure_count: 0,
            next_run_timestamp: 0,
            thread_id: None,
            interaction_id: None,
            details: None,
            should_skip_launch_become_active: false,
        }
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let variant_str: String = row.get(1)?;
    let behavior_str: String = row.get(2)?;
    let variant = JobVariant::parse(&variant_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown job variant '{variant_str}'").into(),
        )
    })?;
    let behavior = JobBehavior::parse(&behavior_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown job behavior '{behavior_str}'").into(),
        )
    })?;
    Ok(JobRecord {
        id: Some(row.get(0)?),
        variant,
        behavior,
        should_block: row.get(3)?,
        priority: row.get(4)?,
        failure_count: row.get::<_, i64>(5)? as u32,
        next_run_timestamp: row.get(6)?,
        thread_id: row.get(7)?,
        interaction_id: row.get(8)?,
        details: row.get(9)?,
        should_skip_launch_become_active: row.get(10)?,
    })
}

const JOB_COLUMNS: &str = "id, variant, behavior, should_block, priority, failure_count, \
                           next_run_timestamp, thread_id, interaction_id, details, \
                           should_skip_launch_become_active";

/// Insert a job, returning its assigned id.
pub fn insert(conn: &Connection, job: &JobRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO job (variant, behavior, should_block, priority, failure_count,
                          next_run_timestamp, thread_id, interaction_id, details,
                          should_skip_launch_become_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            job.variant.as_str(),
            job.behavior.as_str(),
            job.should_block,
            job.priority,
            job.failure_count as i64,
            job.next_run_timestamp,
            job.thread_id,
            job.interaction_id,
            job.details,
            job.should_skip_launch_become_active,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Fetch a job by id.
pub fn get(conn: &Connection, id: i64) -> Result<Option<JobRecord>> {
    let result = conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM job WHERE id = ?1"),
        [id],
        record_from_row,
    );
    match result {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Delete a job. Dependency rows referencing it cascade away.
pub fn delete(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM job WHERE id = ?1", [id])?;
    Ok(())
}

/// Delete a job together with every job that (transitively) depends on it.
pub fn delete_with_dependants(conn: &Connection, id: i64) -> Result<Vec<i64>> {
    let mut to_delete = vec![id];
    let mut frontier = vec![id];
    while let Some(current) = frontier.pop() {
        for dep in dependant_ids(conn, current)? {
            if !to_delete.contains(&dep) {
                to_delete.push(dep);
                frontier.push(dep);
            }
        }
    }
    for job_id in &to_delete {
        conn.execute("DELETE FROM job WHERE id = ?1", [job_id])?;
    }
    Ok(to_delete)
}

/// Persist a failure: increment the stored failure count and push back the
/// next-run timestamp.
pub fn record_failure(
    conn: &Connection,
    id: i64,
    failure_count: u32,
    next_run_timestamp: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE job SET failure_count = ?2, next_run_timestamp = ?3 WHERE id = ?1",
        rusqlite::params![id, failure_count as i64, next_run_timestamp],
    )?;
    Ok(())
}

/// Reset failure state, optionally moving the next-run timestamp.
pub fn reset_failure(conn: &Connection, id: i64, next_run_timestamp: i64) -> Result<()> {
    conn.execute(
        "UPDATE job SET failure_count = 0, next_run_timestamp = ?2 WHERE id = ?1",
        rusqlite::params![id, next_run_timestamp],
    )?;
    Ok(())
}

/// Replace the stored payload columns of an existing job (upsert path).
pub fn update(conn: &Connection, job: &JobRecord) -> Result<()> {
    let id = job.id.ok_or_else(|| DbError::NotFound("job id".into()))?;
    conn.execute(
        "UPDATE job SET variant = ?2, behavior = ?3, should_block = ?4, priority = ?5,
                        failure_count = ?6, next_run_timestamp = ?7, thread_id = ?8,
                        interaction_id = ?9, details = ?10,
                        should_skip_launch_become_active = ?11
         WHERE id = ?1",
        rusqlite::params![
            id,
            job.variant.as_str(),
            job.behavior.as_str(),
            job.should_block,
            job.priority,
            job.failure_count as i64,
            job.next_run_timestamp,
            job.thread_id,
            job.interaction_id,
            job.details,
            job.should_skip_launch_become_active,
        ],
    )?;
    Ok(())
}

/// Jobs of the given variants due at or before `now`, ordered by
/// `priority DESC, id ASC`, excluding `exclude_ids` (already queued or
/// running) and, unless `include_blocked`, jobs with unresolved dependencies.
///
/// Lifecycle-behavior jobs never appear here; they are loaded exclusively by
/// their launch/active event so flags like skip-on-first-activation hold.
pub fn due_jobs(
    conn: &Connection,
    variants: &[JobVariant],
    now: i64,
    exclude_ids: &[i64],
    include_blocked: bool,
) -> Result<Vec<JobRecord>> {
    let variant_list = sql_string_list(variants.iter().map(|v| v.as_str()));
    let exclude_list = sql_int_list(exclude_ids);
    let blocked_filter = if include_blocked {
        ""
    } else {
        "AND id NOT IN (SELECT job_id FROM job_dependency)"
    };

    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job
         WHERE variant IN ({variant_list})
           AND next_run_timestamp <= ?1
           AND id NOT IN ({exclude_list})
           AND behavior IN ('runOnce', 'recurring')
           {blocked_filter}
         ORDER BY priority DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map([now], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Every stored job of the given variants, ordered by `priority DESC,
/// id ASC`, regardless of behavior or schedule.
pub fn jobs_with_variants(conn: &Connection, variants: &[JobVariant]) -> Result<Vec<JobRecord>> {
    let variant_list = sql_string_list(variants.iter().map(|v| v.as_str()));
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job
         WHERE variant IN ({variant_list})
         ORDER BY priority DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map([], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// Jobs with any of the given behaviors, ordered by `priority DESC, id ASC`,
/// excluding jobs with unresolved dependencies.
pub fn jobs_with_behaviors(
    conn: &Connection,
    behaviors: &[JobBehavior],
) -> Result<Vec<JobRecord>> {
    let behavior_list = sql_string_list(behaviors.iter().map(|b| b.as_str()));
    let sql = format!(
        "SELECT {JOB_COLUMNS} FROM job
         WHERE behavior IN ({behavior_list})
           AND id NOT IN (SELECT job_id FROM job_dependency)
         ORDER BY priority DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt
        .query_map([], record_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

/// The soonest future `next_run_timestamp` among the given variants, strictly
/// after `now`.
pub fn soonest_next_run(
    conn: &Connection,
    variants: &[JobVariant],
    now: i64,
) -> Result<Option<i64>> {
    let variant_list = sql_string_list(variants.iter().map(|v| v.as_str()));
    let sql = format!(
        "SELECT MIN(next_run_timestamp) FROM job
         WHERE variant IN ({variant_list}) AND next_run_timestamp > ?1"
    );
    let soonest: Option<i64> = conn.query_row(&sql, [now], |row| row.get(0))?;
    Ok(soonest)
}

/// Register that `job_id` must not run until `depends_on_id` has completed.
pub fn add_dependency(conn: &Connection, job_id: i64, depends_on_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO job_dependency (job_id, depends_on_id) VALUES (?1, ?2)",
        rusqlite::params![job_id, depends_on_id],
    )?;
    Ok(())
}

/// Ids of jobs `job_id` still depends on.
pub fn dependency_ids(conn: &Connection, job_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT depends_on_id FROM job_dependency WHERE job_id = ?1")?;
    let ids = stmt
        .query_map([job_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Ids of jobs that depend on `job_id`.
pub fn dependant_ids(conn: &Connection, job_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT job_id FROM job_dependency WHERE depends_on_id = ?1 ORDER BY job_id ASC")?;
    let ids = stmt
        .query_map([job_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Delete the dependency rows pointing at a completed job.
pub fn clear_dependencies_on(conn: &Connection, depends_on_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM job_dependency WHERE depends_on_id = ?1",
        [depends_on_id],
    )?;
    Ok(())
}

/// Mirror a failure onto dependant rows: same failure count, next run one
/// millisecond-equivalent step after the failed job's.
pub fn mirror_failure_to_dependants(
    conn: &Connection,
    dependant_ids: &[i64],
    failure_count: u32,
    next_run_timestamp: i64,
) -> Result<()> {
    for id in dependant_ids {
        conn.execute(
            "UPDATE job SET failure_count = ?2, next_run_timestamp = ?3 WHERE id = ?1",
            rusqlite::params![id, failure_count as i64, next_run_timestamp],
        )?;
    }
    Ok(())
}

fn sql_string_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = items.map(|s| format!("'{s}'")).collect();
    if quoted.is_empty() {
        "''".to_string()
    } else {
        quoted.join(", ")
    }
}

fn sql_int_list(items: &[i64]) -> String {
    if items.is_empty() {
        "-1".to_string()
    } else {
        items
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(variant: JobVariant) -> JobRecord {
        JobRecord::new(variant, JobBehavior::RunOnce)
    }

    #[test]
    fn test_insert_assigns_monotonic_ids() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        assert!(b > a);
    }

    #[test]
    fn test_ids_never_reissued() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        delete(&conn, a).expect("delete");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        assert!(b > a);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let conn = crate::open_memory().expect("open");
        let mut job = test_job(JobVariant::AttachmentDownload);
        job.thread_id = Some("thread-7".to_string());
        job.interaction_id = Some(42);
        job.details = Some(vec![1, 2, 3, 4]);
        job.priority = 5;
        job.next_run_timestamp = 1_700_000_000;

        let id = insert(&conn, &job).expect("insert");
        let loaded = get(&conn, id).expect("get").expect("exists");
        assert_eq!(loaded.variant, JobVariant::AttachmentDownload);
        assert_eq!(loaded.thread_id.as_deref(), Some("thread-7"));
        assert_eq!(loaded.interaction_id, Some(42));
        assert_eq!(loaded.details.as_deref(), Some([1, 2, 3, 4].as_slice()));
        assert_eq!(loaded.priority, 5);
        assert_eq!(loaded.next_run_timestamp, 1_700_000_000);
    }

    #[test]
    fn test_due_jobs_ordering_and_filters() {
        let conn = crate::open_memory().expect("open");
        let mut low = test_job(JobVariant::MessageSend);
        low.priority = 0;
        let mut high = test_job(JobVariant::MessageSend);
        high.priority = 10;
        let mut future = test_job(JobVariant::MessageSend);
        future.next_run_timestamp = i64::MAX;

        let low_id = insert(&conn, &low).expect("insert");
        let high_id = insert(&conn, &high).expect("insert");
        insert(&conn, &future).expect("insert");

        let due = due_jobs(&conn, &[JobVariant::MessageSend], 100, &[], false).expect("due");
        let ids: Vec<i64> = due.iter().filter_map(|j| j.id).collect();
        assert_eq!(ids, vec![high_id, low_id]);
    }

    #[test]
    fn test_due_jobs_excludes_snapshot() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");

        let due = due_jobs(&conn, &[JobVariant::MessageSend], 100, &[a], false).expect("due");
        let ids: Vec<i64> = due.iter().filter_map(|j| j.id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn test_due_jobs_hides_blocked() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        add_dependency(&conn, b, a).expect("dep");

        let due = due_jobs(&conn, &[JobVariant::MessageSend], 100, &[], false).expect("due");
        let ids: Vec<i64> = due.iter().filter_map(|j| j.id).collect();
        assert_eq!(ids, vec![a]);

        let all = due_jobs(&conn, &[JobVariant::MessageSend], 100, &[], true).expect("due");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_dependency_cascade_on_delete() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        add_dependency(&conn, b, a).expect("dep");

        delete(&conn, a).expect("delete");
        assert!(dependency_ids(&conn, b).expect("deps").is_empty());
    }

    #[test]
    fn test_delete_with_dependants_transitive() {
        let conn = crate::open_memory().expect("open");
        let a = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let b = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        let c = insert(&conn, &test_job(JobVariant::MessageSend)).expect("insert");
        add_dependency(&conn, b, a).expect("dep");
        add_dependency(&conn, c, b).expect("dep");

        let deleted = delete_with_dependants(&conn, a).expect("delete");
        assert_eq!(deleted.len(), 3);
        assert!(get(&conn, b).expect("get").is_none());
        assert!(get(&conn, c).expect("get").is_none());
    }

    #[test]
    fn test_soonest_next_run() {
        let conn = crate::open_memory().expect("open");
        let mut job = test_job(JobVariant::MessageSend);
        job.next_run_timestamp = 500;
        insert(&conn, &job).expect("insert");
        job.next_run_timestamp = 300;
        insert(&conn, &job).expect("insert");

        let soonest =
            soonest_next_run(&conn, &[JobVariant::MessageSend], 100).expect("soonest");
        assert_eq!(soonest, Some(300));

        let none = soonest_next_run(&conn, &[JobVariant::MessageSend], 600).expect("soonest");
        assert_eq!(none, None);
    }

    #[test]
    fn test_record_and_reset_failure() {
        let conn = crate::open_memory().expect("open");
        let id = insert(&conn, &test_job(JobVariant::ConfigSync)).expect("insert");
        record_failure(&conn, id, 3, 9_999).expect("fail");

        let loaded = get(&conn, id).expect("get").expect("exists");
        assert_eq!(loaded.failure_count, 3);
        assert_eq!(loaded.next_run_timestamp, 9_999);

        reset_failure(&conn, id, 0).expect("reset");
        let loaded = get(&conn, id).expect("get").expect("exists");
        assert_eq!(loaded.failure_count, 0);
    }
}
