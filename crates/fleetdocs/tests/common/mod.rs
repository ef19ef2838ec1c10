//! Test harness for isolated end-to-end runs.
//!
//! `ServiceHarness` wires a real `ExtractionService` (production
//! pipeline, in-memory database, temp-dir file storage) with the
//! language-model parser left unconfigured, so parsing exercises the
//! pattern-fallback strategy deterministically. Text-layer PDFs keep
//! the whole run free of external OCR dependencies.

#![allow(dead_code)]

use std::path::PathBuf;

use assert_fs::fixture::{FileWriteBin, PathChild};
use assert_fs::TempDir;

use fleetdocs::config::schema::{Config, WorkerConfig};
use fleetdocs::db::Database;
use fleetdocs::service::{ExtractionService, JobStatusView};
use fleetdocs::worker::job::JobStatus;

/// Isolated service + scratch directory for input documents.
pub struct ServiceHarness {
    temp_dir: TempDir,
    pub service: ExtractionService,
}

impl ServiceHarness {
    /// Harness with default worker settings (fast polling, immediate
    /// retry backoff, `max_retries` as given).
    pub fn new(max_retries: u32) -> Self {
        Self::with_workers(2, max_retries)
    }

    pub fn with_workers(count: usize, max_retries: u32) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");

        let config = Config {
            worker: WorkerConfig {
                count,
                poll_interval_ms: 20,
                retry_base_secs: 0,
                max_retries,
                ..WorkerConfig::default()
            },
            ..Config::default()
        };

        let db = Database::open_in_memory().expect("in-memory database");
        let service = ExtractionService::with_database(config, db).expect("service");

        Self { temp_dir, service }
    }

    /// Writes a document into the scratch directory and returns its
    /// absolute path for submission.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let child = self.temp_dir.child(name);
        child.write_binary(bytes).expect("write fixture");
        child.path().to_path_buf()
    }

    /// Polls until the job reaches the wanted status, up to 10 seconds.
    pub fn wait_for_status(&self, job_id: &str, status: JobStatus) -> JobStatusView {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let view = self
                .service
                .status(job_id)
                .expect("status query")
                .expect("job exists");
            if view.status == status {
                return view;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "job {} stuck in {:?} waiting for {:?} (error: {:?})",
                job_id,
                view.status,
                status,
                view.error
            );
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}

/// Builds a single-page PDF whose text layer contains `lines`, padded
/// so the classifier sees a usable text layer (the density probe wants
/// at least 100 characters per page).
pub fn make_text_pdf(lines: &[&str]) -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut content = String::from("BT /F1 12 Tf 50 750 Td 14 TL\n");
    for line in lines {
        let escaped = line.replace('\\', "\\\\").replace('(', "\\(").replace(')', "\\)");
        content.push_str(&format!("({}) Tj T*\n", escaped));
    }
    content.push_str("ET");

    let content_id = doc.add_object(Object::Stream(Stream::new(
        dictionary! {},
        content.into_bytes(),
    )));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut pdf_bytes = Vec::new();
    doc.save_to(&mut pdf_bytes).expect("serialize PDF");
    pdf_bytes
}

/// A license document with a healthy text layer: the key line plus
/// padding prose to clear the density threshold.
pub fn license_pdf() -> Vec<u8> {
    make_text_pdf(&[
        "STATE OF MONTANA DEPARTMENT OF JUSTICE MOTOR VEHICLE DIVISION",
        "COMMERCIAL DRIVER LICENSE",
        "LIC# DL4471202 EXP 12/31/2026 DOB 06/15/1985 JOHN DOE",
        "CLASS A ENDORSEMENTS NONE RESTRICTIONS CORRECTIVE LENSES",
    ])
}
