use std::sync::Arc;

use bytes::Bytes;
use config::{AppConfig, RagProfile};
use core_orchestrator::{
    AdapterRegistry, BackendResolver, CreateDataset, DatasetOrchestrator, DocumentOrchestrator,
    RetrievalTest, UpdateDataset,
};
use core_types::{
    BackendConfig, DocumentStatus, KbError, KnowledgeBaseStore, Pagination, Principal,
    UploadOptions, UploadSource,
};
use provider_ragflow::RagflowAdapter;
use serde_json::json;
use storage_sqlite::SqliteStorage;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "ragflow-e2e-key";

struct Harness {
    store: Arc<dyn KnowledgeBaseStore>,
    datasets: DatasetOrchestrator,
    documents: DocumentOrchestrator,
}

async fn harness(server: &MockServer) -> Harness {
    let mut config = AppConfig::default();
    config.rag.default_profile = Some("ragflow-e2e".to_string());
    config.rag.profiles = vec![RagProfile {
        id: "ragflow-e2e".to_string(),
        name: "Test RAGFlow".to_string(),
        adapter_type: provider_ragflow::ADAPTER_TYPE.to_string(),
        enabled: true,
        is_default: true,
        config: BackendConfig::new(server.uri(), API_KEY),
    }];

    let registry = AdapterRegistry::builder()
        .register(provider_ragflow::ADAPTER_TYPE, RagflowAdapter::boxed)
        .build();
    let resolver = BackendResolver::new(Arc::new(registry), Arc::new(config));
    let store: Arc<dyn KnowledgeBaseStore> =
        Arc::new(SqliteStorage::in_memory().await.expect("sqlite"));

    Harness {
        datasets: DatasetOrchestrator::new(store.clone(), resolver.clone()),
        documents: DocumentOrchestrator::new(store.clone(), resolver),
        store,
    }
}

fn alice() -> Principal {
    Principal::new(1, "alice")
}

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": data}))
}

async fn mount_create(server: &MockServer, remote_name: &str, dataset_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/datasets"))
        .and(header("authorization", "Bearer ragflow-e2e-key"))
        .and(body_json(json!({"name": remote_name})))
        .respond_with(envelope(json!({"id": dataset_id, "name": remote_name})))
        .expect(1)
        .mount(server)
        .await;
}

async fn create_manuals(h: &Harness) -> String {
    h.datasets
        .create(
            &alice(),
            CreateDataset {
                name: "Manuals".to_string(),
                ..CreateDataset::default()
            },
        )
        .await
        .expect("create Manuals")
        .dataset_id
}

fn document_page(status: &str) -> ResponseTemplate {
    envelope(json!({
        "docs": [{
            "id": "doc-456",
            "dataset_id": "ds-123",
            "name": "report.pdf",
            "size": 2_097_152,
            "run": status,
            "chunk_count": if status == "DONE" { 12 } else { 0 },
            "progress": if status == "DONE" { 1.0 } else { 0.4 }
        }],
        "total": 1
    }))
}

#[tokio::test]
async fn dataset_lifecycle_against_ragflow() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    mount_create(&server, "alice_Manuals", "ds-123").await;
    let dataset_id = create_manuals(&h).await;
    assert_eq!(dataset_id, "ds-123");
    let row = h.datasets.find_by_dataset_id("ds-123").await.expect("row");
    assert_eq!(row.name, "Manuals");
    assert_eq!(row.creator, 1);
    assert_eq!(row.rag_config_ref.as_deref(), Some("ragflow-e2e"));

    Mock::given(method("POST"))
        .and(path("/api/v1/datasets/ds-123/documents"))
        .and(body_string_contains("filename=\"report.pdf\""))
        .respond_with(envelope(json!([{
            "id": "doc-456",
            "dataset_id": "ds-123",
            "name": "report.pdf",
            "size": 2_097_152,
            "run": "UNSTART"
        }])))
        .expect(1)
        .mount(&server)
        .await;
    let payload = Bytes::from(vec![b'%'; 2_097_152]);
    let document = h
        .documents
        .upload(
            &alice(),
            "ds-123",
            UploadSource::from_bytes("report.pdf", payload),
            &UploadOptions::default(),
        )
        .await
        .expect("upload");
    assert_eq!(document.document_id, "doc-456");
    assert_eq!(document.status, DocumentStatus::Unstart);
    assert_eq!(document.file_size, 2_097_152);

    Mock::given(method("POST"))
        .and(path("/api/v1/datasets/ds-123/chunks"))
        .and(body_json(json!({"document_ids": ["doc-456"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .expect(1)
        .mount(&server)
        .await;
    h.documents
        .parse(&alice(), "ds-123", &["doc-456".to_string()])
        .await
        .expect("parse accepted");

    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/ds-123/documents"))
        .and(query_param("id", "doc-456"))
        .respond_with(document_page("RUNNING"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/datasets/ds-123/documents"))
        .and(query_param("id", "doc-456"))
        .respond_with(document_page("DONE"))
        .mount(&server)
        .await;
    let first = h
        .documents
        .get(&alice(), "ds-123", "doc-456")
        .await
        .expect("first poll");
    assert_eq!(first.status, DocumentStatus::Running);
    let second = h
        .documents
        .get(&alice(), "ds-123", "doc-456")
        .await
        .expect("second poll");
    assert_eq!(second.status, DocumentStatus::Done);
    assert_eq!(second.chunk_count, 12);

    Mock::given(method("POST"))
        .and(path("/api/v1/retrieval"))
        .and(body_json(json!({
            "question": "warranty period",
            "dataset_ids": ["ds-123"]
        })))
        .respond_with(envelope(json!({
            "chunks": [
                {"id": "c1", "content": "Warranty lasts 24 months.", "document_id": "doc-456", "similarity": 0.91},
                {"id": "c2", "content": "Extended warranty is optional.", "document_id": "doc-456", "similarity": 0.74},
                {"id": "c3", "content": "Claims need proof of purchase.", "document_id": "doc-456", "similarity": 0.52}
            ],
            "doc_aggs": [{"doc_id": "doc-456", "doc_name": "report.pdf", "count": 3}],
            "total": 3
        })))
        .expect(1)
        .mount(&server)
        .await;
    let result = h
        .documents
        .retrieval_test(
            &alice(),
            "ds-123",
            RetrievalTest {
                question: "warranty period".to_string(),
                dataset_ids: vec!["ds-123".to_string()],
                ..RetrievalTest::default()
            },
        )
        .await
        .expect("retrieval");
    assert_eq!(result.total, 3);
    assert_eq!(result.chunks.len(), 3);
    assert_eq!(result.chunks[0].content, "Warranty lasts 24 months.");

    Mock::given(method("DELETE"))
        .and(path("/api/v1/datasets"))
        .and(body_json(json!({"ids": ["ds-123"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .expect(1)
        .mount(&server)
        .await;
    h.datasets.delete(&alice(), "ds-123").await.expect("delete");
    let err = h
        .datasets
        .find_by_dataset_id("ds-123")
        .await
        .expect_err("row removed");
    assert!(matches!(err, KbError::RecordNotFound(_)));
}

#[tokio::test]
async fn reused_remote_id_is_compensated() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    mount_create(&server, "alice_Manuals", "ds-123").await;
    create_manuals(&h).await;

    mount_create(&server, "alice_Guides", "ds-123").await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/datasets"))
        .and(body_json(json!({"ids": ["ds-123"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let err = h
        .datasets
        .create(
            &alice(),
            CreateDataset {
                name: "Guides".to_string(),
                ..CreateDataset::default()
            },
        )
        .await
        .expect_err("duplicate remote id");
    assert!(matches!(err, KbError::DuplicateRecord(_)));

    let rows = h
        .store
        .list_for_creator(1, None, Pagination::default())
        .await
        .expect("rows");
    assert_eq!(rows.total, 1);
    assert_eq!(rows.list[0].name, "Manuals");
}

#[tokio::test]
async fn rejected_remote_update_restores_local_row() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    mount_create(&server, "alice_Manuals", "ds-123").await;
    create_manuals(&h).await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/datasets/ds-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 102,
            "message": "Dataset name 'alice_Handbook' already exists"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = h
        .datasets
        .update(
            &alice(),
            "ds-123",
            UpdateDataset {
                name: Some("Handbook".to_string()),
                ..UpdateDataset::default()
            },
        )
        .await
        .expect_err("remote rejects");
    assert!(matches!(
        err,
        KbError::UpstreamApplicationError { code: 102, .. }
    ));

    let row = h.datasets.find_by_dataset_id("ds-123").await.expect("row");
    assert_eq!(row.name, "Manuals");
}

#[tokio::test]
async fn failed_remote_delete_keeps_local_row() {
    let server = MockServer::start().await;
    let h = harness(&server).await;

    mount_create(&server, "alice_Manuals", "ds-123").await;
    create_manuals(&h).await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/datasets"))
        .respond_with(ResponseTemplate::new(500).set_body_string("gateway exploded"))
        .mount(&server)
        .await;

    let err = h
        .datasets
        .delete(&alice(), "ds-123")
        .await
        .expect_err("remote failure");
    assert!(matches!(err, KbError::UpstreamHttpError { status: 500, .. }));
    assert!(h.datasets.find_by_dataset_id("ds-123").await.is_ok());
}
