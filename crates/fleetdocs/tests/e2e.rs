//! End-to-end tests through the public service surface: submit a real
//! file, let the worker pool claim it, poll for the outcome.

mod common;

use common::{license_pdf, make_text_pdf, ServiceHarness};

use fleetdocs::config::schema::{Config, ParserConfig};
use fleetdocs::db::Database;
use fleetdocs::extractor::ExtractionMethod;
use fleetdocs::service::ExtractionService;
use fleetdocs::worker::job::{DocumentType, FieldValue, JobStatus, SubmitRequest};
use serial_test::serial;

#[test]
fn license_pdf_extracts_structured_fields() {
    let harness = ServiceHarness::new(3);
    harness.service.start().unwrap();

    let path = harness.write_file("license.pdf", &license_pdf());
    let receipt = harness
        .service
        .submit(
            SubmitRequest::new(path.to_string_lossy(), DocumentType::License)
                .with_document_ref("driver-42"),
        )
        .unwrap();

    let view = harness.wait_for_status(&receipt.job_id, JobStatus::Completed);
    let result = view.result.expect("completed job has a result");

    assert_eq!(
        result.extracted_data.get("licenseNumber"),
        Some(&FieldValue::Text("DL4471202".to_string()))
    );
    assert_eq!(
        result.extracted_data.get("expirationDate"),
        Some(&FieldValue::Date(
            chrono::NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()
        ))
    );
    assert_eq!(
        result.extracted_data.get("dateOfBirth"),
        Some(&FieldValue::Date(
            chrono::NaiveDate::from_ymd_opt(1985, 6, 15).unwrap()
        ))
    );
    assert!(result.fields_missing.is_empty());

    // No parser endpoint configured: the pattern strategy did the
    // parsing, and says so with its capped confidence.
    assert_eq!(result.method, Some(ExtractionMethod::PatternFallback));
    assert!(result.confidence <= 0.5);
    assert!(result.needs_review);

    harness.service.stop();
}

#[test]
fn unsupported_file_fails_terminally_without_retries() {
    let harness = ServiceHarness::new(3);
    harness.service.start().unwrap();

    let path = harness.write_file("archive.zip", b"PK\x03\x04 not a document");
    let receipt = harness
        .service
        .submit(SubmitRequest::new(
            path.to_string_lossy(),
            DocumentType::CarrierCert,
        ))
        .unwrap();

    let view = harness.wait_for_status(&receipt.job_id, JobStatus::Failed);
    // Classification errors skip the retry cycle entirely.
    assert_eq!(view.retry_count, 0);
    assert!(view
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("Unsupported"));
    assert!(view.result.is_none());

    harness.service.stop();
}

#[test]
fn missing_file_retries_then_fails() {
    let harness = ServiceHarness::new(1);
    harness.service.start().unwrap();

    let receipt = harness
        .service
        .submit(SubmitRequest::new(
            "/nowhere/vanished.pdf",
            DocumentType::Insurance,
        ))
        .unwrap();

    // Infrastructure errors are retryable: with max_retries 1 and zero
    // backoff, one requeue happens before the permanent failure.
    let view = harness.wait_for_status(&receipt.job_id, JobStatus::Failed);
    assert_eq!(view.retry_count, 1);
    assert!(view.error.is_some());

    harness.service.stop();
}

#[test]
fn insurance_pdf_with_number_canonicalization() {
    let harness = ServiceHarness::new(3);
    harness.service.start().unwrap();

    let pdf = make_text_pdf(&[
        "CERTIFICATE OF LIABILITY INSURANCE ISSUED TO BLUE RIDGE FREIGHT LLC",
        "POLICY NO: INS-2207-4415 INSURER: GRANITE STATE INSURANCE CO",
        "EFFECTIVE 01/01/2025 EXPIRATION DATE: 01/01/2026",
        "EACH OCCURRENCE LIMIT: $1,000,000",
    ]);
    let path = harness.write_file("insurance.pdf", &pdf);

    let receipt = harness
        .service
        .submit(SubmitRequest::new(
            path.to_string_lossy(),
            DocumentType::Insurance,
        ))
        .unwrap();

    let view = harness.wait_for_status(&receipt.job_id, JobStatus::Completed);
    let result = view.result.unwrap();

    assert_eq!(
        result.extracted_data.get("policyNumber"),
        Some(&FieldValue::Text("INS-2207-4415".to_string()))
    );
    // "$1,000,000" canonicalized to a plain number before validation.
    assert_eq!(
        result.extracted_data.get("coverageAmount"),
        Some(&FieldValue::Number(1_000_000.0))
    );
    assert_eq!(
        result.extracted_data.get("expirationDate"),
        Some(&FieldValue::Date(
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        ))
    );

    harness.service.stop();
}

#[test]
fn cancel_mid_queue_prevents_processing() {
    // No workers running: the job stays claimable until canceled.
    let harness = ServiceHarness::new(3);

    let path = harness.write_file("license.pdf", &license_pdf());
    let receipt = harness
        .service
        .submit(SubmitRequest::new(
            path.to_string_lossy(),
            DocumentType::License,
        ))
        .unwrap();

    assert!(harness.service.cancel_job(&receipt.job_id).unwrap());

    // Starting workers afterwards must not resurrect the canceled job.
    harness.service.start().unwrap();
    std::thread::sleep(std::time::Duration::from_millis(200));

    let view = harness.service.status(&receipt.job_id).unwrap().unwrap();
    assert_eq!(view.status, JobStatus::Failed);
    assert_eq!(view.error.as_deref(), Some("canceled by operator"));
    assert!(view.result.is_none());

    harness.service.stop();
}

#[test]
fn push_events_arrive_for_submitted_jobs() {
    let harness = ServiceHarness::new(3);
    let mut events = harness.service.subscribe();
    harness.service.start().unwrap();

    let path = harness.write_file("license.pdf", &license_pdf());
    let receipt = harness
        .service
        .submit(SubmitRequest::new(
            path.to_string_lossy(),
            DocumentType::License,
        ))
        .unwrap();

    harness.wait_for_status(&receipt.job_id, JobStatus::Completed);
    harness.service.stop();

    let mut phases = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.job_id == receipt.job_id {
            phases.push(event.phase.as_str().to_string());
        }
    }

    // Advisory stream saw the queued announcement and the terminal
    // completion; the poll endpoint stays the source of truth.
    assert_eq!(phases.first().map(String::as_str), Some("queued"));
    assert_eq!(phases.last().map(String::as_str), Some("completed"));
}

#[test]
#[serial]
fn parser_endpoint_config_builds_service() {
    // An endpoint plus an API key in the configured env var builds the
    // HTTP-backed parser; nothing is called until a job runs.
    std::env::set_var("FLEETDOCS_PARSER_API_KEY", "test-key");

    let config = Config {
        parser: ParserConfig {
            endpoint: Some("https://api.example.com/v1/chat/completions".to_string()),
            ..ParserConfig::default()
        },
        ..Config::default()
    };
    let db = Database::open_in_memory().unwrap();
    let service = ExtractionService::with_database(config, db);
    assert!(service.is_ok());

    std::env::remove_var("FLEETDOCS_PARSER_API_KEY");
}
