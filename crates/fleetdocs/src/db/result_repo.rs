//! Result repository. Persists the one-to-one extraction result owned
//! by each job.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Row};

use super::{format_timestamp, Database, DatabaseError};
use crate::extractor::ExtractionMethod;
use crate::worker::job::{DocumentType, ExtractionResult, FieldValue};

fn decode_err(reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, reason.into())
}

fn from_row(row: &Row<'_>) -> Result<ExtractionResult, rusqlite::Error> {
    let document_type: String = row.get("document_type")?;
    let method: Option<String> = row.get("method")?;

    let extracted_data: BTreeMap<String, FieldValue> =
        serde_json::from_str(&row.get::<_, String>("extracted_data")?)
            .map_err(|e| decode_err(format!("bad extracted_data JSON: {}", e)))?;
    let parse_list = |column: &'static str, raw: String| {
        serde_json::from_str::<Vec<String>>(&raw)
            .map_err(|e| decode_err(format!("bad {} JSON: {}", column, e)))
    };

    Ok(ExtractionResult {
        job_id: row.get("job_id")?,
        document_ref: row.get("document_ref")?,
        document_type: DocumentType::from_str(&document_type)
            .ok_or_else(|| decode_err(format!("unknown document type '{}'", document_type)))?,
        file_path: row.get("file_path")?,
        extracted_data,
        confidence: row.get("confidence")?,
        raw_text: row.get("raw_text")?,
        method: match method {
            Some(m) => Some(
                ExtractionMethod::from_str(&m)
                    .ok_or_else(|| decode_err(format!("unknown method '{}'", m)))?,
            ),
            None => None,
        },
        fields_found: parse_list("fields_found", row.get("fields_found")?)?,
        fields_missing: parse_list("fields_missing", row.get("fields_missing")?)?,
        errors: parse_list("errors", row.get("errors")?)?,
        warnings: parse_list("warnings", row.get("warnings")?)?,
        template_version: row.get("template_version")?,
        needs_review: row.get::<_, i64>("needs_review")? != 0,
    })
}

/// Inserts or replaces the result for a job. Called as partial progress
/// becomes known and again when the job reaches its terminal state.
pub fn upsert(db: &Database, result: &ExtractionResult) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    let extracted_data = serde_json::to_string(&result.extracted_data)
        .map_err(|e| DatabaseError::Decode {
            table: "extraction_results",
            reason: format!("encode extracted_data: {}", e),
        })?;
    let encode_list = |list: &[String]| -> Result<String, DatabaseError> {
        serde_json::to_string(list).map_err(|e| DatabaseError::Decode {
            table: "extraction_results",
            reason: format!("encode list: {}", e),
        })
    };
    let fields_found = encode_list(&result.fields_found)?;
    let fields_missing = encode_list(&result.fields_missing)?;
    let errors = encode_list(&result.errors)?;
    let warnings = encode_list(&result.warnings)?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO extraction_results (job_id, document_ref, document_type, file_path,
             extracted_data, confidence, raw_text, method, fields_found, fields_missing,
             errors, warnings, template_version, needs_review, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
             ON CONFLICT(job_id) DO UPDATE SET
                 extracted_data = excluded.extracted_data,
                 confidence = excluded.confidence,
                 raw_text = excluded.raw_text,
                 method = excluded.method,
                 fields_found = excluded.fields_found,
                 fields_missing = excluded.fields_missing,
                 errors = excluded.errors,
                 warnings = excluded.warnings,
                 template_version = excluded.template_version,
                 needs_review = excluded.needs_review,
                 updated_at = excluded.updated_at",
            params![
                result.job_id,
                result.document_ref,
                result.document_type.as_str(),
                result.file_path,
                extracted_data,
                result.confidence,
                result.raw_text,
                result.method.map(|m| m.as_str()),
                fields_found,
                fields_missing,
                errors,
                warnings,
                result.template_version,
                result.needs_review as i64,
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds the result for a job.
pub fn find_by_job_id(db: &Database, job_id: &str) -> Result<Option<ExtractionResult>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM extraction_results WHERE job_id = ?1")?;
        let mut rows = stmt.query_map(params![job_id], from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Deletes the result for a job, if any. Used when an operator retry
/// restarts a permanently failed job from scratch.
pub fn delete_by_job_id(db: &Database, job_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM extraction_results WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(changed > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo;
    use crate::worker::job::{ExtractionJob, SubmitRequest};
    use chrono::NaiveDate;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn stored_job(db: &Database) -> ExtractionJob {
        let job = ExtractionJob::from_submit(
            SubmitRequest::new("/tmp/license.pdf", DocumentType::License),
            3,
        );
        job_repo::insert(db, &job).unwrap();
        job
    }

    fn sample_result(job: &ExtractionJob) -> ExtractionResult {
        let mut result = ExtractionResult::new(job);
        result.extracted_data.insert(
            "licenseNumber".to_string(),
            FieldValue::Text("DL4471202".to_string()),
        );
        result.extracted_data.insert(
            "expirationDate".to_string(),
            FieldValue::Date(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()),
        );
        result.confidence = 0.92;
        result.raw_text = "LIC# DL4471202 EXP 12/31/2026".to_string();
        result.method = Some(ExtractionMethod::DirectText);
        result.fields_found = vec!["licenseNumber".into(), "expirationDate".into()];
        result.template_version = Some("1".to_string());
        result
    }

    #[test]
    fn test_upsert_and_find_round_trip() {
        let db = test_db();
        let job = stored_job(&db);
        let result = sample_result(&job);
        upsert(&db, &result).unwrap();

        let found = find_by_job_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.job_id, job.id);
        assert_eq!(found.confidence, 0.92);
        assert_eq!(found.method, Some(ExtractionMethod::DirectText));
        assert_eq!(
            found.extracted_data.get("licenseNumber"),
            Some(&FieldValue::Text("DL4471202".to_string()))
        );
        assert_eq!(
            found.extracted_data.get("expirationDate"),
            Some(&FieldValue::Date(
                NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()
            ))
        );
        assert_eq!(found.fields_found.len(), 2);
        assert!(found.fields_missing.is_empty());
    }

    #[test]
    fn test_upsert_twice_updates_in_place() {
        let db = test_db();
        let job = stored_job(&db);
        let mut result = sample_result(&job);
        upsert(&db, &result).unwrap();

        result.confidence = 0.45;
        result.needs_review = true;
        result.warnings.push("value not found in source text".into());
        upsert(&db, &result).unwrap();

        let found = find_by_job_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.confidence, 0.45);
        assert!(found.needs_review);
        assert_eq!(found.warnings.len(), 1);
    }

    #[test]
    fn test_find_missing_is_none() {
        let db = test_db();
        assert!(find_by_job_id(&db, "ghost").unwrap().is_none());
    }

    #[test]
    fn test_delete_by_job_id() {
        let db = test_db();
        let job = stored_job(&db);
        upsert(&db, &sample_result(&job)).unwrap();

        assert!(delete_by_job_id(&db, &job.id).unwrap());
        assert!(!delete_by_job_id(&db, &job.id).unwrap());
        assert!(find_by_job_id(&db, &job.id).unwrap().is_none());
    }
}
