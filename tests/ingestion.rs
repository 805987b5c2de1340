//! Integration tests for the ingestion pipeline.
//!
//! Drive and the generation backend are replaced by in-memory fakes that
//! count their calls, so the tests can assert not only what ends up in the
//! cache but also what work a run did (or, for unchanged files, did not do).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use drive_brain::cache::CacheStore;
use drive_brain::config::Config;
use drive_brain::error::IngestError;
use drive_brain::extract::{ExtractError, Extractor, MIME_DOCX, MIME_PDF};
use drive_brain::generation::{GenerationRequest, TextGenerator};
use drive_brain::ingest::{resolve_folder, Collaborators, Ingestor};
use drive_brain::models::{
    DocumentCache, FilePage, FolderRef, IngestionProgress, RemoteFile, RunPhase,
};
use drive_brain::persist;
use drive_brain::progress::ProgressTracker;
use drive_brain::service::{IngestionService, TriggerOutcome};
use drive_brain::summarize::FAILED_SUMMARY_PLACEHOLDER;
use drive_brain::traits::{ContentFetcher, FileLister};
use tempfile::TempDir;
use tokio::sync::Notify;

// ─── Fakes ──────────────────────────────────────────────────────────

/// In-memory folder. Page tokens are start offsets into the file list.
#[derive(Default)]
struct FakeDrive {
    files: Mutex<Vec<RemoteFile>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    folders: Mutex<HashMap<String, Vec<String>>>,
    page_size: usize,
    fail_listing: AtomicBool,
    broken_downloads: Mutex<HashSet<String>>,
    /// When set, every listing call waits for a permit.
    gate: Option<Arc<Notify>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeDrive {
    fn put(&self, file: RemoteFile, content: &[u8]) {
        self.contents
            .lock()
            .unwrap()
            .insert(file.id.clone(), content.to_vec());
        let mut files = self.files.lock().unwrap();
        files.retain(|f| f.id != file.id);
        files.push(file);
    }

    fn remove(&self, id: &str) {
        self.files.lock().unwrap().retain(|f| f.id != id);
    }

    fn touch(&self, id: &str, day: u32, content: &[u8]) {
        let mut files = self.files.lock().unwrap();
        let f = files.iter_mut().find(|f| f.id == id).unwrap();
        f.modified_time = at(day);
        self.contents
            .lock()
            .unwrap()
            .insert(id.to_string(), content.to_vec());
    }

    fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileLister for FakeDrive {
    async fn list_page(&self, _folder_id: &str, page_token: Option<&str>) -> Result<FilePage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("Drive API error (HTTP 500): backend error");
        }
        let files = self.files.lock().unwrap().clone();
        let start = page_token.map(|t| t.parse::<usize>()).transpose()?.unwrap_or(0);
        let size = if self.page_size == 0 {
            files.len().max(1)
        } else {
            self.page_size
        };
        let end = (start + size).min(files.len());
        Ok(FilePage {
            files: files[start..end].to_vec(),
            next_page_token: (end < files.len()).then(|| end.to_string()),
        })
    }

    async fn resolve_folder(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .folders
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContentFetcher for FakeDrive {
    async fn fetch_content(&self, file: &RemoteFile) -> Result<Vec<u8>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_downloads.lock().unwrap().contains(&file.id) {
            bail!("connection reset by peer");
        }
        self.contents
            .lock()
            .unwrap()
            .get(&file.id)
            .cloned()
            .ok_or_else(|| anyhow!("no content for {}", file.id))
    }
}

/// Echoes its input back, failing for documents named in `fail_on`.
#[derive(Default)]
struct EchoGenerator {
    calls: AtomicUsize,
    longest_input: AtomicUsize,
    fail_on: Mutex<HashSet<String>>,
}

impl EchoGenerator {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.longest_input
            .fetch_max(request.content.chars().count(), Ordering::SeqCst);
        let failing = self.fail_on.lock().unwrap().contains(&request.subject);
        if failing {
            bail!("model overloaded");
        }
        Ok(request.content.clone())
    }
}

// ─── Harness ────────────────────────────────────────────────────────

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

fn file(id: &str, name: &str, content_type: &str, day: u32, size: Option<u64>) -> RemoteFile {
    RemoteFile {
        id: id.to_string(),
        name: name.to_string(),
        content_type: content_type.to_string(),
        modified_time: at(day),
        size_bytes: size,
    }
}

/// Default extractor, except PDFs are read as UTF-8 so most fixtures can be
/// plain text. `single_pdf_end_to_end` covers the real PDF backend.
fn test_extractor() -> Extractor {
    let mut extractor = Extractor::default();
    extractor.register(MIME_PDF, |bytes: &[u8]| {
        Ok::<_, ExtractError>(String::from_utf8_lossy(bytes).into_owned())
    });
    extractor
}

fn docx_with_text(text: &str) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            text
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// One-page PDF showing `text` in Courier.
fn pdf_with_text(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
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
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

struct Harness {
    _tmp: TempDir,
    config: Config,
    drive: Arc<FakeDrive>,
    generator: Arc<EchoGenerator>,
}

impl Harness {
    fn new(drive: FakeDrive) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.cache_path = tmp.path().join("data").join("brain_cache.json");
        config.storage.progress_path = tmp.path().join("data").join("drive_progress.json");
        config.ingest.fetch_retry_delay_ms = 0;
        Self {
            _tmp: tmp,
            config,
            drive: Arc::new(drive),
            generator: Arc::new(EchoGenerator::default()),
        }
    }

    fn ingestor(&self) -> Ingestor {
        self.ingestor_with(test_extractor())
    }

    fn ingestor_with(&self, extractor: Extractor) -> Ingestor {
        let collaborators = Collaborators {
            lister: self.drive.clone(),
            fetcher: self.drive.clone(),
            generator: self.generator.clone(),
            extractor,
        };
        Ingestor::new(&self.config, collaborators, Arc::new(self.tracker()))
    }

    fn service(&self) -> IngestionService {
        IngestionService::new(self.ingestor(), &self.config.ingest)
    }

    fn tracker(&self) -> ProgressTracker {
        ProgressTracker::new(self.config.storage.progress_path.clone())
    }

    fn cache(&self) -> DocumentCache {
        CacheStore::new(self.config.storage.cache_path.clone())
            .load()
            .unwrap()
    }

    fn progress(&self) -> IngestionProgress {
        self.tracker().get().unwrap().expect("progress record")
    }
}

fn folder() -> FolderRef {
    FolderRef::Id("folder-1".to_string())
}

fn three_pdfs() -> FakeDrive {
    let drive = FakeDrive::default();
    drive.put(file("a", "a.pdf", MIME_PDF, 1, Some(100)), b"Alpha plans. More text.");
    drive.put(file("b", "b.pdf", MIME_PDF, 1, Some(200)), b"Beta budget for the year.");
    drive.put(file("c", "c.pdf", MIME_PDF, 1, Some(300)), b"Gamma minutes of the meeting.");
    drive
}

// ─── Scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn single_pdf_end_to_end() {
    let pdf = pdf_with_text("Quarterly results improved.");
    let drive = FakeDrive::default();
    drive.put(
        file("f1", "report.pdf", MIME_PDF, 1, Some(pdf.len() as u64)),
        &pdf,
    );
    let h = Harness::new(drive);

    let report = h
        .ingestor_with(Extractor::default())
        .run(&folder())
        .await
        .unwrap();
    assert_eq!(report.listed, 1);
    assert_eq!(report.summarized, 1);

    let cache = h.cache();
    assert_eq!(cache.total_files, 1);
    assert!(cache.last_updated.is_some());
    let doc = &cache.documents["f1"];
    assert_eq!(doc.filename, "report.pdf");
    assert_eq!(doc.modified_time, at(1));
    assert_eq!(doc.summary, "Quarterly results improved.");
    assert_eq!(doc.size_bytes, Some(pdf.len() as u64));
    assert!(doc.summary.chars().count() <= 1000);

    let progress = h.progress();
    assert_eq!(progress.total, 1);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.last_file.as_deref(), Some("report.pdf"));
    assert!(progress.done);
    assert_eq!(progress.phase, RunPhase::Done);
    assert!(progress.error.is_none());
}

#[tokio::test]
async fn rerun_over_unchanged_folder_does_no_work() {
    let h = Harness::new(three_pdfs());
    h.ingestor().run(&folder()).await.unwrap();
    let first = h.cache();
    let fetches = h.drive.fetches();
    let generations = h.generator.calls();

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(report.unchanged, 3);
    assert_eq!(h.drive.fetches(), fetches);
    assert_eq!(h.generator.calls(), generations);

    let second = h.cache();
    assert_eq!(second.documents, first.documents);
    assert_eq!(second.total_files, 3);

    let progress = h.progress();
    assert_eq!((progress.total, progress.completed, progress.skipped), (0, 0, 3));
    assert!(progress.done);
}

#[tokio::test]
async fn only_modified_and_new_files_are_processed() {
    let h = Harness::new(FakeDrive::default());
    h.drive
        .put(file("a", "a.pdf", MIME_PDF, 1, Some(10)), b"Old alpha.");
    h.drive
        .put(file("b", "b.pdf", MIME_PDF, 1, Some(20)), b"Beta.");
    h.ingestor().run(&folder()).await.unwrap();
    let before = h.cache();

    h.drive.touch("a", 2, b"New alpha.");
    h.drive
        .put(file("c", "c.pdf", MIME_PDF, 1, Some(30)), b"Gamma.");
    let fetches = h.drive.fetches();

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!((report.changed, report.unchanged), (2, 1));
    assert_eq!(h.drive.fetches() - fetches, 2);

    let after = h.cache();
    assert_eq!(after.total_files, 3);
    assert_eq!(after.total_size_bytes, 60);
    assert!(after.documents["a"].summary.contains("New alpha."));
    assert_eq!(after.documents["a"].modified_time, at(2));
    assert_eq!(after.documents["b"], before.documents["b"]);
    assert!(after.documents["c"].summary.contains("Gamma."));
}

#[tokio::test]
async fn unreadable_file_gets_metadata_summary() {
    let drive = FakeDrive::default();
    drive.put(
        file("img", "holiday.png", "image/png", 1, Some(4)),
        &[0x89, 0x50, 0x4e, 0x47],
    );
    let h = Harness::new(drive);

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.soft_failures, 0);

    let doc = &h.cache().documents["img"];
    assert!(!doc.summary.is_empty());
    assert!(doc.summary.contains("holiday.png"));
    assert_eq!(doc.content_type, "image/png");
}

#[tokio::test]
async fn huge_document_is_bounded_on_both_sides() {
    let text = "lorem ipsum dolor sit amet ".repeat(20_000);
    assert!(text.len() > 500_000);
    let drive = FakeDrive::default();
    drive.put(file("big", "big.pdf", MIME_PDF, 1, None), text.as_bytes());
    let h = Harness::new(drive);

    h.ingestor().run(&folder()).await.unwrap();

    assert!(h.generator.longest_input.load(Ordering::SeqCst) <= h.config.summarizer.max_input_chars);

    let doc = &h.cache().documents["big"];
    assert!(doc.summary.chars().count() <= h.config.summarizer.max_summary_chars);
    assert_eq!(doc.size_bytes, Some(text.len() as u64));
}

#[tokio::test]
async fn generation_failure_is_contained_and_not_retried() {
    let h = Harness::new(three_pdfs());
    h.generator.fail_on.lock().unwrap().insert("b.pdf".to_string());

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.summarized, 3);
    assert_eq!(report.soft_failures, 1);

    let cache = h.cache();
    assert_eq!(cache.total_files, 3);
    assert_eq!(cache.documents["b"].summary, FAILED_SUMMARY_PLACEHOLDER);
    assert!(cache.documents["a"].summary.contains("Alpha"));
    assert_eq!(h.progress().failed, 1);

    // The file has not changed, so its placeholder stands.
    h.generator.fail_on.lock().unwrap().clear();
    let calls = h.generator.calls();
    h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(h.generator.calls(), calls);
    assert_eq!(h.cache().documents["b"].summary, FAILED_SUMMARY_PLACEHOLDER);
}

#[tokio::test]
async fn failed_download_keeps_previous_entry_and_retries_next_run() {
    let h = Harness::new(three_pdfs());
    h.ingestor().run(&folder()).await.unwrap();
    let old = h.cache().documents["a"].clone();

    h.drive.touch("a", 3, b"Alpha revised.");
    h.drive
        .broken_downloads
        .lock()
        .unwrap()
        .insert("a".to_string());
    let fetches = h.drive.fetches();

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.summarized, 0);
    // One attempt plus one retry.
    assert_eq!(h.drive.fetches() - fetches, 2);
    assert_eq!(h.cache().documents["a"], old);
    assert_eq!(h.progress().failed, 1);

    h.drive.broken_downloads.lock().unwrap().clear();
    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.summarized, 1);
    assert!(h.cache().documents["a"].summary.contains("Alpha revised."));
}

#[tokio::test]
async fn listing_follows_every_page() {
    let drive = FakeDrive {
        page_size: 2,
        ..Default::default()
    };
    for i in 0..5 {
        drive.put(
            file(&format!("f{}", i), &format!("f{}.pdf", i), MIME_PDF, 1, Some(1)),
            b"Text.",
        );
    }
    let h = Harness::new(drive);

    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.listed, 5);
    assert_eq!(h.drive.list_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.cache().total_files, 5);
    assert_eq!(h.progress().current_page, 3);
}

#[tokio::test]
async fn listing_failure_leaves_cache_untouched() {
    let h = Harness::new(three_pdfs());
    h.ingestor().run(&folder()).await.unwrap();
    let before = std::fs::read(&h.config.storage.cache_path).unwrap();

    h.drive.fail_listing.store(true, Ordering::SeqCst);
    let err = h.ingestor().run(&folder()).await.unwrap_err();
    assert!(matches!(err, IngestError::Upstream(_)));

    let after = std::fs::read(&h.config.storage.cache_path).unwrap();
    assert_eq!(before, after);

    let progress = h.progress();
    assert!(progress.done);
    assert_eq!(progress.phase, RunPhase::Failed);
    assert!(progress.error.unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn missing_files_are_kept_unless_pruning() {
    let mut h = Harness::new(three_pdfs());
    h.ingestor().run(&folder()).await.unwrap();

    h.drive.remove("c");
    h.ingestor().run(&folder()).await.unwrap();
    assert!(h.cache().documents.contains_key("c"));

    h.config.ingest.prune_missing = true;
    let report = h.ingestor().run(&folder()).await.unwrap();
    assert_eq!(report.pruned, 1);
    let cache = h.cache();
    assert!(!cache.documents.contains_key("c"));
    assert_eq!(cache.total_files, 2);
    assert_eq!(cache.total_size_bytes, 300);
}

#[tokio::test]
async fn docx_text_is_extracted() {
    let drive = FakeDrive::default();
    drive.put(
        file("d1", "notes.docx", MIME_DOCX, 1, None),
        &docx_with_text("office test phrase"),
    );
    let h = Harness::new(drive);

    h.ingestor().run(&folder()).await.unwrap();
    let doc = &h.cache().documents["d1"];
    assert!(doc.summary.contains("office test phrase"));
    assert!(doc.size_bytes.unwrap() > 0);
}

#[tokio::test]
async fn folder_name_must_match_exactly_one_folder() {
    let drive = FakeDrive::default();
    drive
        .folders
        .lock()
        .unwrap()
        .insert("Brain".to_string(), vec!["folder-1".to_string()]);
    drive.folders.lock().unwrap().insert(
        "Shared".to_string(),
        vec!["folder-2".to_string(), "folder-3".to_string()],
    );
    let h = Harness::new(drive);
    let lister = h.drive.as_ref();

    let id = resolve_folder(lister, &FolderRef::Name("Brain".to_string()))
        .await
        .unwrap();
    assert_eq!(id, "folder-1");

    let err = resolve_folder(lister, &FolderRef::Name("Shared".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));

    let err = h
        .ingestor()
        .run(&FolderRef::Name("Missing".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));
    assert_eq!(h.progress().phase, RunPhase::Failed);
    assert!(!h.config.storage.cache_path.exists());
}

// ─── Service ────────────────────────────────────────────────────────

#[tokio::test]
async fn second_trigger_while_running_is_rejected() {
    let gate = Arc::new(Notify::new());
    let drive = FakeDrive {
        gate: Some(gate.clone()),
        ..three_pdfs()
    };
    let h = Harness::new(drive);
    let service = h.service();

    let TriggerOutcome::Accepted(handle) = service.trigger(folder()).unwrap() else {
        panic!("first trigger should start a run");
    };
    assert!(service.is_running());
    assert!(matches!(
        service.trigger(folder()).unwrap(),
        TriggerOutcome::AlreadyRunning
    ));

    gate.notify_one();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.summarized, 3);
    assert!(!service.is_running());

    let cache = service.get_cache().unwrap().unwrap();
    assert_eq!(cache.total_files, 3);
    let progress = service.get_progress().unwrap().unwrap();
    assert_eq!(progress.run_id, report.run_id);
    assert!(progress.done);

    gate.notify_one();
    let TriggerOutcome::Accepted(handle) = service.trigger(folder()).unwrap() else {
        panic!("guard should be released after the run");
    };
    handle.wait().await.unwrap();
}

#[tokio::test]
async fn in_flight_record_from_another_process_blocks_until_stale() {
    let h = Harness::new(three_pdfs());
    let service = h.service();

    // Another process is mid-run and still refreshing its record.
    h.tracker().begin_run("other-run", "id:folder-1").unwrap();
    assert!(matches!(
        service.trigger(folder()).unwrap(),
        TriggerOutcome::AlreadyRunning
    ));
    assert!(matches!(
        service.run_blocking(&folder(), false).await,
        Err(IngestError::AlreadyRunning)
    ));

    // The same record, silent for an hour, belongs to a dead process.
    let mut record = h.progress();
    record.updated_at = Utc::now() - Duration::hours(1);
    persist::write_json_atomic(&h.config.storage.progress_path, &record).unwrap();

    let report = service.run_blocking(&folder(), false).await.unwrap();
    assert_eq!(report.summarized, 3);
    assert_ne!(h.progress().run_id, "other-run");
}

#[tokio::test]
async fn force_overrides_a_live_record() {
    let h = Harness::new(three_pdfs());
    let service = h.service();
    h.tracker().begin_run("other-run", "id:folder-1").unwrap();

    let report = service.run_blocking(&folder(), true).await.unwrap();
    assert_eq!(report.listed, 3);
    assert!(h.progress().done);
}

#[tokio::test]
async fn oversized_stale_window_does_not_panic() {
    let mut h = Harness::new(three_pdfs());
    h.config.ingest.stale_after_secs = u64::MAX;
    let service = h.service();

    h.tracker().begin_run("other-run", "id:folder-1").unwrap();
    assert!(matches!(
        service.trigger(folder()).unwrap(),
        TriggerOutcome::AlreadyRunning
    ));
}

#[tokio::test]
async fn reads_before_any_run_are_empty() {
    let h = Harness::new(FakeDrive::default());
    let service = h.service();
    assert!(service.get_cache().unwrap().is_none());
    assert!(service.get_progress().unwrap().is_none());
    assert!(!service.is_running());
}
