//! End-to-end tests of the sync pipeline.
//!
//! Everything runs against the in-memory storage and search adapters with a
//! counting embedding provider, so the whole flow (discovery, hash records,
//! splitting, fan-out upload, ACL patching, removal) is exercised without
//! network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use corpus_sync::embedding::EmbeddingProvider;
use corpus_sync::ingest::{uploaded_file, IngestReport, Ingester};
use corpus_sync::manager::{RemovalPolicy, SearchManager};
use corpus_sync::models::{AccessControl, FileContent, Page, Section, SourceFile};
use corpus_sync::progress::NullObserver;
use corpus_sync::schema::{IndexSchemaManager, SchemaOptions};
use corpus_sync::search::memory::InMemorySearchService;
use corpus_sync::search::{odata_eq, SearchIndexService, SearchRequest};
use corpus_sync::source::{FileSource, StorageFileSource};
use corpus_sync::splitter::ExtractingSplitter;
use corpus_sync::storage::memory::InMemoryStorage;
use corpus_sync::storage::StorageProvider;
use corpus_sync::Result;

const INDEX: &str = "gptkbindex";

// ─── Test doubles ───────────────────────────────────────────────────

#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, 0.5, -0.5])
            .collect())
    }
}

struct Harness {
    storage: Arc<InMemoryStorage>,
    search: Arc<InMemorySearchService>,
    embedder: Arc<CountingEmbedder>,
}

impl Harness {
    fn new(storage: InMemoryStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            search: Arc::new(InMemorySearchService::new()),
            embedder: Arc::new(CountingEmbedder::default()),
        }
    }

    fn manager(&self) -> SearchManager {
        SearchManager::new(self.search.clone(), INDEX, Arc::new(NullObserver))
            .with_embeddings(Some(self.embedder.clone()))
            .with_acls(true)
            .with_removal_policy(RemovalPolicy {
                max_passes: 10,
                retry_delay: Duration::from_millis(1),
                timeout: Duration::from_secs(5),
            })
    }

    fn ingester(&self, index_names: &[&str]) -> Ingester {
        let schema = IndexSchemaManager::new(
            self.search.clone(),
            SchemaOptions {
                embedding_dims: 3,
                use_acls: true,
                ..SchemaOptions::default()
            },
            Arc::new(NullObserver),
        );
        let source = StorageFileSource::new(self.storage.clone(), "", Arc::new(NullObserver));
        Ingester::new(
            Arc::new(source),
            schema,
            self.manager(),
            Arc::new(ExtractingSplitter::new(500)),
            index_names.iter().map(|s| s.to_string()).collect(),
            Arc::new(NullObserver),
        )
        .unwrap()
        .with_storage(self.storage.clone())
    }

    fn ids(&self, index: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .search
            .documents(index)
            .iter()
            .filter_map(|d| d["id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn corpus() -> InMemoryStorage {
    let storage = InMemoryStorage::new();
    storage.put_file(
        "hr/plan.txt",
        b"Benefits enrollment opens in March.",
        "user::rwx,user:u1:r--,other::---",
        t(10),
    );
    storage.put_file(
        "eng/design.md",
        b"# Design\n\nThe service is stateless.",
        "group:g1:r-x",
        t(20),
    );
    storage
}

fn expected_id(path: &str, acls: AccessControl, page: usize) -> String {
    let file = SourceFile::new(path, FileContent::InMemory(Vec::new())).with_acls(acls);
    format!("{}-page-{}", file.id(), page)
}

// ─── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_corpus_uploads_nothing_on_second_pass() {
    let h = Harness::new(corpus());
    let ingester = h.ingester(&[INDEX]);

    let first = ingester.run().await.unwrap();
    assert_eq!(first.files_ingested, 2);
    assert_eq!(first.files_failed, 0);
    assert_eq!(first.sections_uploaded, 2);
    let batches_after_first = h.search.batches().len();
    let embeds_after_first = h.embedder.calls.load(Ordering::SeqCst);

    let second = ingester.run().await.unwrap();
    assert_eq!(second, IngestReport::default());
    assert_eq!(h.search.batches().len(), batches_after_first);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds_after_first);
}

#[tokio::test]
async fn document_ids_are_stable_across_runs() {
    let first = Harness::new(corpus());
    first.ingester(&[INDEX]).run().await.unwrap();
    let second = Harness::new(corpus());
    second.ingester(&[INDEX]).run().await.unwrap();

    assert_eq!(first.ids(INDEX), second.ids(INDEX));
    assert!(first
        .ids(INDEX)
        .contains(&expected_id("hr/plan.txt", AccessControl::owner("u1"), 0)));
}

#[tokio::test]
async fn acls_round_trip_through_the_index() {
    let h = Harness::new(corpus());
    h.ingester(&[INDEX]).run().await.unwrap();

    let page = h
        .search
        .search(
            INDEX,
            &SearchRequest::filtered(Some(odata_eq("sourcefile", "plan.txt"))),
        )
        .await
        .unwrap();
    assert_eq!(page.documents.len(), 1);
    let doc = &page.documents[0];
    assert_eq!(doc["oids"], json!(["u1"]));
    assert_eq!(doc["groups"], json!([]));
    assert_eq!(doc["storageUrl"], json!("memory://content/hr/plan.txt"));
    assert_eq!(doc["content"], json!("Benefits enrollment opens in March."));
}

#[tokio::test]
async fn acl_only_resync_leaves_content_and_vectors_alone() {
    let h = Harness::new(corpus());
    let ingester = h.ingester(&[INDEX]);
    ingester.run().await.unwrap();

    let id = expected_id("hr/plan.txt", AccessControl::owner("u1"), 0);
    let before = h.search.document(INDEX, &id).unwrap();
    let embeds = h.embedder.calls.load(Ordering::SeqCst);

    h.storage.set_acl("hr/plan.txt", "user:u2:r--,group:g7:r--");
    let report = ingester.run_acl_only().await.unwrap();
    assert_eq!(report.files_ingested, 2);

    let after = h.search.document(INDEX, &id).unwrap();
    assert_eq!(after["oids"], json!(["u2"]));
    assert_eq!(after["groups"], json!(["g7"]));
    assert_eq!(after["content"], before["content"]);
    assert_eq!(after["embedding"], before["embedding"]);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embeds);
}

#[tokio::test]
async fn removing_for_one_user_spares_shared_documents() {
    let storage = InMemoryStorage::new();
    storage.put_file("a/plan.txt", b"private copy", "user:u1:r--", t(1));
    storage.put_file("b/plan.txt", b"shared copy", "user:u1:r--,user:u2:r--", t(2));
    let h = Harness::new(storage);
    let ingester = h.ingester(&[INDEX]);
    ingester.run().await.unwrap();
    assert_eq!(h.ids(INDEX).len(), 2);

    let removed = ingester.remove_file("a/plan.txt", Some("u1")).await.unwrap();
    assert_eq!(removed, 1);

    let remaining = h.search.documents(INDEX);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["oids"], json!(["u1", "u2"]));
    // storage is untouched when removing on behalf of a single user
    assert!(h.storage.contains("a/plan.txt"));
}

#[tokio::test]
async fn folders_are_ordered_by_newest_activity() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.put_file("A/x.txt", b"x", "", t(3));
    storage.put_file("B/y.txt", b"y", "", t(1));
    storage.put_file("C/z.txt", b"z", "", t(2));
    let source = StorageFileSource::new(storage, "", Arc::new(NullObserver));

    assert_eq!(source.list_folders().await.unwrap(), vec!["B", "C", "A"]);
}

#[tokio::test]
async fn large_uploads_are_split_into_bounded_batches() {
    let h = Harness::new(InMemoryStorage::new());
    h.ingester(&[INDEX]).run().await.unwrap();
    let file = SourceFile::new("big.txt", FileContent::InMemory(Vec::new()));
    let sections: Vec<Section> = (0..2500)
        .map(|i| {
            Section::new(
                Page {
                    page_num: 0,
                    offset: i,
                    text: format!("section {}", i),
                },
                &file,
                None,
            )
        })
        .collect();

    let written = h
        .manager()
        .update_content(INDEX, &sections, None, None)
        .await
        .unwrap();
    assert_eq!(written, 2500);

    let sizes: Vec<usize> = h.search.batches().into_iter().map(|(_, n)| n).collect();
    assert_eq!(sizes, vec![1000, 1000, 500]);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.embedder.texts.load(Ordering::SeqCst), 2500);
}

// ─── Orchestration ──────────────────────────────────────────────────

#[tokio::test]
async fn every_configured_index_receives_the_documents() {
    let h = Harness::new(corpus());
    let report = h.ingester(&[INDEX, "mirror"]).run().await.unwrap();

    assert_eq!(report.files_ingested, 2);
    assert_eq!(report.sections_uploaded, 4);
    assert_eq!(h.ids(INDEX), h.ids("mirror"));
}

#[tokio::test]
async fn populated_index_is_left_alone_when_asked() {
    let h = Harness::new(corpus());
    h.ingester(&[INDEX]).run().await.unwrap();
    let batches = h.search.batches().len();

    h.storage.put_file("new/notes.txt", b"fresh", "", t(30));
    let report = h
        .ingester(&[INDEX])
        .skip_if_populated(true)
        .run()
        .await
        .unwrap();
    assert!(report.skipped_populated);
    assert_eq!(h.search.batches().len(), batches);
}

#[tokio::test]
async fn skip_if_populated_ingests_into_a_missing_index() {
    let h = Harness::new(corpus());
    let report = h
        .ingester(&[INDEX])
        .skip_if_populated(true)
        .run()
        .await
        .unwrap();
    assert!(!report.skipped_populated);
    assert_eq!(report.files_ingested, 2);
}

#[tokio::test]
async fn unsupported_files_fail_alone() {
    let storage = corpus();
    storage.put_file("bin/blob.exe", &[0, 1, 2, 3], "", t(5));
    let h = Harness::new(storage);

    let report = h.ingester(&[INDEX]).run().await.unwrap();
    assert_eq!(report.files_ingested, 2);
    assert_eq!(report.files_failed, 1);
}

#[tokio::test]
async fn unreadable_files_are_skipped_during_discovery() {
    let storage = corpus();
    storage.fail_download("hr/plan.txt");
    let h = Harness::new(storage);

    let report = h.ingester(&[INDEX]).run().await.unwrap();
    assert_eq!(report.files_ingested, 1);
    assert!(!h.storage.contains("hr/plan.txt.md5"));
}

#[tokio::test]
async fn failed_batch_aborts_the_run() {
    let h = Harness::new(corpus());
    h.ingester(&[INDEX]).run().await.unwrap();
    h.storage.put_file("new/notes.txt", b"fresh", "", t(30));
    h.search.fail_uploads(true);

    let err = h.ingester(&[INDEX]).run().await.unwrap_err();
    assert!(matches!(err, corpus_sync::SyncError::BatchUpload { .. }));
}

#[tokio::test]
async fn files_that_failed_to_upload_are_retried_next_run() {
    let h = Harness::new(corpus());
    h.ingester(&[INDEX]).run().await.unwrap();
    h.storage.put_file("new/notes.txt", b"fresh", "", t(30));
    h.search.fail_uploads(true);
    assert!(h.ingester(&[INDEX]).run().await.is_err());
    assert!(!h.storage.contains("new/notes.txt.md5"));

    h.search.fail_uploads(false);
    let report = h.ingester(&[INDEX]).run().await.unwrap();
    assert_eq!(report.files_ingested, 1);
    assert!(h.storage.contains("new/notes.txt.md5"));
    let doc = h
        .search
        .document(INDEX, &expected_id("new/notes.txt", AccessControl::default(), 0))
        .unwrap();
    assert_eq!(doc["content"], json!("fresh"));
}

#[tokio::test]
async fn acl_patch_covers_every_page_of_matches() {
    let h = Harness::new(InMemoryStorage::new());
    h.ingester(&[INDEX]).run().await.unwrap();
    let original = SourceFile::new("docs/big.txt", FileContent::InMemory(Vec::new()))
        .with_acls(AccessControl::owner("u1"));
    let sections: Vec<Section> = (0..1200)
        .map(|i| {
            Section::new(
                Page {
                    page_num: 0,
                    offset: i,
                    text: format!("chunk {}", i),
                },
                &original,
                None,
            )
        })
        .collect();
    let manager = h.manager();
    manager.update_content(INDEX, &sections, None, None).await.unwrap();

    let regranted = SourceFile::new("docs/big.txt", FileContent::InMemory(Vec::new()))
        .with_acls(AccessControl::owner("u2"));
    let patch = vec![Section::new(
        Page {
            page_num: 0,
            offset: 0,
            text: String::new(),
        },
        &regranted,
        None,
    )];
    let patched = manager
        .update_partial_content(INDEX, &patch, None)
        .await
        .unwrap();
    assert_eq!(patched, 1200);

    let docs = h.search.documents(INDEX);
    assert_eq!(docs.len(), 1200);
    assert!(docs.iter().all(|d| d["oids"] == json!(["u2"])));
}

#[tokio::test]
async fn added_files_are_stored_hashed_and_indexed() {
    let h = Harness::new(InMemoryStorage::new());
    let ingester = h.ingester(&[INDEX]);
    ingester.run().await.unwrap();

    let file = uploaded_file("uploads/memo.txt", b"Quarterly memo".to_vec())
        .with_acls(AccessControl::owner("u9"));
    let written = ingester.add_file(file).await.unwrap();
    assert_eq!(written, 1);

    assert_eq!(h.storage.read("uploads/memo.txt").unwrap(), b"Quarterly memo");
    assert!(h.storage.contains("uploads/memo.txt.md5"));
    let doc = h
        .search
        .document(INDEX, &expected_id("uploads/memo.txt", AccessControl::owner("u9"), 0))
        .unwrap();
    assert_eq!(doc["storageUrl"], json!("memory://content/uploads/memo.txt"));
    assert_eq!(doc["oids"], json!(["u9"]));
}

#[tokio::test]
async fn removed_files_leave_storage_and_every_index() {
    let h = Harness::new(corpus());
    let ingester = h.ingester(&[INDEX, "mirror"]);
    ingester.run().await.unwrap();

    let removed = ingester.remove_file("hr/plan.txt", None).await.unwrap();
    assert_eq!(removed, 2);
    assert!(!h.storage.contains("hr/plan.txt"));
    assert!(!h.storage.contains("hr/plan.txt.md5"));
    assert_eq!(h.search.documents(INDEX).len(), 1);
    assert_eq!(h.search.documents("mirror").len(), 1);

    // a second removal finds nothing and tolerates the missing blobs
    assert_eq!(ingester.remove_file("hr/plan.txt", None).await.unwrap(), 0);
}

#[tokio::test]
async fn listing_skips_hash_records() {
    let h = Harness::new(corpus());
    h.ingester(&[INDEX]).run().await.unwrap();
    assert!(h.storage.contains("hr/plan.txt.md5"));

    let source = StorageFileSource::new(h.storage.clone(), "", Arc::new(NullObserver));
    let mut paths: Vec<String> = futures::TryStreamExt::try_collect(source.list_paths())
        .await
        .unwrap();
    paths.sort();
    assert!(paths.iter().all(|p| !p.ends_with(".md5")));
    assert!(h.storage.download("hr/plan.txt.md5").await.is_ok());
}
