//! HTTP-level tests of the Azure AI Search REST adapter.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use corpus_sync::progress::NullObserver;
use corpus_sync::schema::{IndexSchemaManager, SchemaOptions};
use corpus_sync::search::azure::AzureSearchService;
use corpus_sync::search::{IndexAction, SearchIndexService, SearchRequest};
use corpus_sync::SyncError;

fn service(server: &MockServer) -> AzureSearchService {
    AzureSearchService::new(&server.uri(), "admin-key")
}

fn doc(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn missing_index_reads_as_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/idx"))
        .and(query_param("api-version", "2023-11-01"))
        .and(header("api-key", "admin-key"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    assert!(service(&server).get_index("idx").await.unwrap().is_none());
}

#[tokio::test]
async fn existing_index_keeps_unknown_properties() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/idx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "idx",
            "fields": [{"name": "id", "type": "Edm.String", "key": true, "retrievable": true}],
            "scoringProfiles": [],
            "@odata.etag": "\"0x1\"",
        })))
        .mount(&server)
        .await;

    let index = service(&server).get_index("idx").await.unwrap().unwrap();
    assert_eq!(index.field("id").unwrap().key, Some(true));
    assert_eq!(index.field("id").unwrap().other["retrievable"], json!(true));
    assert_eq!(index.other["scoringProfiles"], json!([]));
}

#[tokio::test]
async fn schema_manager_creates_a_missing_index() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/idx"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/indexes"))
        .and(body_partial_json(json!({"name": "idx"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "idx"})))
        .expect(1)
        .mount(&server)
        .await;

    let manager = IndexSchemaManager::new(
        Arc::new(service(&server)),
        SchemaOptions::default(),
        Arc::new(NullObserver),
    );
    manager.ensure_indexes(&["idx".to_string()]).await.unwrap();
}

#[tokio::test]
async fn document_batches_carry_search_actions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/idx/docs/index"))
        .and(body_partial_json(json!({
            "value": [
                {"@search.action": "upload", "id": "a", "content": "hello"},
                {"@search.action": "merge", "id": "b", "oids": ["u1"]},
                {"@search.action": "delete", "id": "c"},
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {"key": "a", "status": true, "statusCode": 201},
                {"key": "b", "status": true, "statusCode": 200},
                {"key": "c", "status": true, "statusCode": 200},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    service(&server)
        .index_documents(
            "idx",
            vec![
                IndexAction::Upload(doc(json!({"id": "a", "content": "hello"}))),
                IndexAction::Merge(doc(json!({"id": "b", "oids": ["u1"]}))),
                IndexAction::Delete("c".to_string()),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn partial_batch_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/idx/docs/index"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!({
            "value": [
                {"key": "a", "status": true, "statusCode": 201},
                {"key": "b", "status": false, "statusCode": 404, "errorMessage": "Document not found."},
            ]
        })))
        .mount(&server)
        .await;

    let err = service(&server)
        .index_documents(
            "idx",
            vec![
                IndexAction::Upload(doc(json!({"id": "a"}))),
                IndexAction::Merge(doc(json!({"id": "b"}))),
            ],
        )
        .await
        .unwrap_err();
    match err {
        SyncError::TransientProvider { message, .. } => {
            assert!(message.contains("Document not found."));
            assert!(message.contains("1 of 2"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn search_sends_filter_top_and_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/idx/docs/search"))
        .and(body_partial_json(json!({
            "search": "*",
            "filter": "sourcefile eq 'a.pdf'",
            "top": 1000,
            "count": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.count": 2,
            "value": [
                {"@search.score": 1.0, "id": "x", "oids": ["u1"]},
                {"@search.score": 1.0, "id": "y", "oids": []},
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = SearchRequest::filtered(Some("sourcefile eq 'a.pdf'".to_string()))
        .top(1000)
        .with_total_count();
    let page = service(&server).search("idx", &request).await.unwrap();
    assert_eq!(page.count, Some(2));
    assert_eq!(page.documents.len(), 2);
    assert_eq!(page.documents[0]["id"], json!("x"));
}

#[tokio::test]
async fn document_count_tolerates_a_byte_order_mark() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/idx/docs/$count"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\u{feff}42"))
        .mount(&server)
        .await;

    assert_eq!(service(&server).document_count("idx").await.unwrap(), 42);
}

#[tokio::test]
async fn counting_a_missing_index_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/indexes/gone/docs/$count"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = service(&server).document_count("gone").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

#[tokio::test]
async fn later_pages_send_a_skip_offset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/indexes/idx/docs/search"))
        .and(body_partial_json(json!({"top": 1000, "skip": 1000})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"@search.score": 1.0, "id": "z"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = SearchRequest::filtered(None).top(1000).skip(1000);
    let page = service(&server).search("idx", &request).await.unwrap();
    assert_eq!(page.documents.len(), 1);
}
