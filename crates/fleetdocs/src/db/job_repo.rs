//! Job repository — queue operations for the `jobs` table.
//!
//! `claim_next` is the concurrency-critical operation: a single
//! `UPDATE ... RETURNING` statement so exactly one caller wins a given
//! job even when many workers poll at once.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::worker::job::{DocumentType, ExtractionJob, JobStatus};

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub document_type: Option<DocumentType>,
    pub document_ref: Option<String>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Queue depth by status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

/// What happened to a job that reported a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Retries remained: back to the queue with a delayed schedule.
    Requeued { scheduled_at: DateTime<Utc> },
    /// Retries exhausted (or error non-retryable): terminal until an
    /// operator intervenes.
    PermanentlyFailed,
}

/// Exponential backoff delay for the next attempt: `base * 2^retry_count`,
/// where `retry_count` is the count before the failed attempt is recorded.
pub fn backoff_delay(base_secs: u64, retry_count: u32) -> Duration {
    let exp = retry_count.min(16); // keep the shift well-defined
    Duration::seconds((base_secs as i64).saturating_mul(1i64 << exp))
}

fn from_row(row: &Row<'_>) -> Result<ExtractionJob, rusqlite::Error> {
    fn decode_err(reason: String) -> rusqlite::Error {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            reason.into(),
        )
    }

    let parse_ts = |s: String| {
        parse_timestamp(&s).map_err(|e| decode_err(format!("bad timestamp '{}': {}", s, e)))
    };
    let parse_opt_ts = |s: Option<String>| match s {
        Some(s) => parse_ts(s).map(Some),
        None => Ok(None),
    };

    let document_type: String = row.get("document_type")?;
    let status: String = row.get("status")?;

    Ok(ExtractionJob {
        id: row.get("id")?,
        document_ref: row.get("document_ref")?,
        document_type: DocumentType::from_str(&document_type)
            .ok_or_else(|| decode_err(format!("unknown document type '{}'", document_type)))?,
        file_path: row.get("file_path")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        mime_claimed: row.get("mime_claimed")?,
        status: JobStatus::from_str(&status)
            .ok_or_else(|| decode_err(format!("unknown job status '{}'", status)))?,
        priority: row.get("priority")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        max_retries: row.get::<_, i64>("max_retries")? as u32,
        error: row.get("error")?,
        template_version: row.get("template_version")?,
        current_phase: row.get("current_phase")?,
        created_at: parse_ts(row.get("created_at")?)?,
        updated_at: parse_ts(row.get("updated_at")?)?,
        scheduled_at: parse_ts(row.get("scheduled_at")?)?,
        started_at: parse_opt_ts(row.get("started_at")?)?,
        completed_at: parse_opt_ts(row.get("completed_at")?)?,
    })
}

fn get_by_id(conn: &Connection, id: &str) -> Result<Option<ExtractionJob>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &ExtractionJob) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, document_ref, document_type, file_path, file_size,
             mime_claimed, status, priority, retry_count, max_retries, error,
             template_version, current_phase, created_at, updated_at, scheduled_at,
             started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                job.id,
                job.document_ref,
                job.document_type.as_str(),
                job.file_path,
                job.file_size as i64,
                job.mime_claimed,
                job.status.as_str(),
                job.priority,
                job.retry_count as i64,
                job.max_retries as i64,
                job.error,
                job.template_version,
                job.current_phase,
                format_timestamp(job.created_at),
                format_timestamp(job.updated_at),
                format_timestamp(job.scheduled_at),
                job.started_at.map(format_timestamp),
                job.completed_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ExtractionJob>, DatabaseError> {
    db.with_conn(|conn| get_by_id(conn, id))
}

/// Atomically claims the next eligible queued job.
///
/// Eligible means `status = queued` and `scheduled_at` has passed.
/// Ordering is priority (higher first), then age. The update and the
/// selection happen in one statement; under concurrent claim attempts
/// each job is handed to exactly one caller.
pub fn claim_next(db: &Database) -> Result<Option<ExtractionJob>, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "UPDATE jobs
             SET status = 'processing', started_at = ?1, updated_at = ?1,
                 current_phase = 'claimed'
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status = 'queued' AND scheduled_at <= ?1
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )?;
        let mut rows = stmt.query_map(params![now], from_row)?;
        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Records the template version a processing job is being parsed with.
pub fn set_template_version(
    db: &Database,
    id: &str,
    version: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET template_version = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, version, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

/// Updates the coarse progress phase of a processing job.
pub fn set_phase(db: &Database, id: &str, phase: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET current_phase = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, phase, format_timestamp(Utc::now())],
        )?;
        Ok(())
    })
}

/// Marks a processing job completed. Clears any error from earlier
/// failed attempts.
pub fn mark_completed(db: &Database, id: &str) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = 'completed', error = NULL, current_phase = NULL,
             completed_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    })
}

/// Records a failed attempt: requeues with exponential backoff while
/// retries remain (and the error was retryable), otherwise marks the
/// job permanently failed.
pub fn record_failure(
    db: &Database,
    id: &str,
    error: &str,
    retryable: bool,
    backoff_base_secs: u64,
) -> Result<FailureDisposition, DatabaseError> {
    let now = Utc::now();
    db.with_conn(|conn| {
        let job = get_by_id(conn, id)?.ok_or_else(|| DatabaseError::Decode {
            table: "jobs",
            reason: format!("record_failure on unknown job '{}'", id),
        })?;

        if retryable && job.retry_count < job.max_retries {
            let scheduled_at = now + backoff_delay(backoff_base_secs, job.retry_count);
            conn.execute(
                "UPDATE jobs SET status = 'queued', retry_count = retry_count + 1,
                 error = ?2, current_phase = NULL, started_at = NULL,
                 scheduled_at = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    id,
                    error,
                    format_timestamp(scheduled_at),
                    format_timestamp(now)
                ],
            )?;
            Ok(FailureDisposition::Requeued { scheduled_at })
        } else {
            conn.execute(
                "UPDATE jobs SET status = 'failed', error = ?2, current_phase = NULL,
                 completed_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![id, error, format_timestamp(now)],
            )?;
            Ok(FailureDisposition::PermanentlyFailed)
        }
    })
}

/// Operator retry of a single failed job. Distinct from the automatic
/// requeue path: resets the retry counter so even a job past
/// `max_retries` runs again. Returns false when the job is not failed.
pub fn retry_job(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', retry_count = 0, error = NULL,
             started_at = NULL, completed_at = NULL, scheduled_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'failed'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Bulk operator retry of all failed jobs that still have retries left.
/// Returns the number of jobs requeued.
pub fn retry_all_eligible(db: &Database) -> Result<u64, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', started_at = NULL, completed_at = NULL,
             scheduled_at = ?1, updated_at = ?1
             WHERE status = 'failed' AND retry_count < max_retries",
            params![now],
        )?;
        Ok(changed as u64)
    })
}

/// Forces a queued or processing job to failed with a canceled reason.
/// Jobs already terminal are never affected. Returns false if nothing
/// changed.
pub fn cancel_job(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'failed', error = 'canceled by operator',
             current_phase = NULL, completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status IN ('queued', 'processing')",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

/// Returns jobs stuck in `processing` longer than `stale_after` to the
/// queue (a crashed worker never released them). Returns the number
/// reset.
pub fn reset_stuck(db: &Database, stale_after: Duration) -> Result<u64, DatabaseError> {
    let now = Utc::now();
    let cutoff = format_timestamp(now - stale_after);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'queued', current_phase = NULL, started_at = NULL,
             scheduled_at = ?2, updated_at = ?2
             WHERE status = 'processing' AND started_at IS NOT NULL AND started_at < ?1",
            params![cutoff, format_timestamp(now)],
        )?;
        Ok(changed as u64)
    })
}

/// Permanently deletes failed jobs (and, via cascade, their results)
/// older than the retention window. Returns the number deleted.
pub fn purge_failed(db: &Database, retention: Duration) -> Result<u64, DatabaseError> {
    let cutoff = format_timestamp(Utc::now() - retention);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM jobs WHERE status = 'failed' AND updated_at < ?1",
            params![cutoff],
        )?;
        Ok(changed as u64)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<ExtractionJob>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str().to_string()));
        }
        if let Some(document_type) = filter.document_type {
            conditions.push(format!("document_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(document_type.as_str().to_string()));
        }
        if let Some(ref document_ref) = filter.document_ref {
            conditions.push(format!("document_ref = ?{}", param_values.len() + 1));
            param_values.push(Box::new(document_ref.clone()));
        }
        if let Some(from_date) = filter.from_date {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(format_timestamp(from_date)));
        }
        if let Some(to_date) = filter.to_date {
            conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(format_timestamp(to_date)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results.
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ExtractionJob> = stmt
            .query_map(params_ref.as_slice(), from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Counts pending work eligible to run now, used for completion
/// estimates at submit time.
pub fn eligible_queue_depth(db: &Database) -> Result<u64, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing') AND scheduled_at <= ?1",
            params![now],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Queue depth by status in one pass.
pub fn stats(db: &Database) -> Result<QueueStats, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut stats = QueueStats::default();
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "queued" => stats.queued = count,
                "processing" => stats.processing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    })
}
