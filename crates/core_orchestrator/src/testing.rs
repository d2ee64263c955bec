use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    AdapterStatus, BackendConfig, BackendProfile, ChunkPage, ChunkQuery, ConfigField, ConfigRef,
    ConfigSource, DatasetParams, Document, DocumentFilter, DocumentStatus, FileType, KbError,
    KbResult, KnowledgeBase, KnowledgeBaseAdapter, KnowledgeBaseStore, PageData, Pagination,
    ProfileSummary, RetrievalRequest, RetrievalResult, UploadOptions, UploadSource,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::registry::AdapterRegistry;

/// Remote side shared by every fake adapter built from one constructor.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub constructed: AtomicUsize,
    pub next_dataset_id: Mutex<Option<String>>,
    pub datasets: Mutex<HashMap<String, DatasetParams>>,
    pub deleted_datasets: Mutex<Vec<String>>,
    pub documents: Mutex<Vec<Document>>,
    pub parsed: Mutex<Vec<String>>,
    pub last_retrieval: Mutex<Option<RetrievalRequest>>,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_reads: AtomicBool,
}

impl FakeBackend {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn upstream_down() -> KbError {
        KbError::UpstreamUnreachable("fake backend is down".to_string())
    }
}

pub(crate) struct FakeAdapter {
    backend: Arc<FakeBackend>,
    config: Option<BackendConfig>,
}

pub(crate) fn constructor(
    backend: &Arc<FakeBackend>,
) -> impl Fn() -> Box<dyn KnowledgeBaseAdapter> + Send + Sync + 'static {
    let backend = Arc::clone(backend);
    move || {
        backend.constructed.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeAdapter {
            backend: Arc::clone(&backend),
            config: None,
        })
    }
}

pub(crate) fn fake_registry(backend: &Arc<FakeBackend>) -> AdapterRegistry {
    AdapterRegistry::builder()
        .register("fake", constructor(backend))
        .build()
}

#[async_trait]
impl KnowledgeBaseAdapter for FakeAdapter {
    fn adapter_type(&self) -> &'static str {
        "fake"
    }

    fn initialize(&mut self, config: BackendConfig) -> KbResult<()> {
        self.config = Some(config);
        Ok(())
    }

    fn validate_config(&self, config: &BackendConfig) -> KbResult<()> {
        config.validate()
    }

    fn supported_config(&self) -> IndexMap<String, ConfigField> {
        IndexMap::new()
    }

    fn default_config(&self) -> IndexMap<String, Value> {
        IndexMap::from([("base_url".to_string(), Value::from("http://fake"))])
    }

    async fn create_dataset(&self, params: &DatasetParams) -> KbResult<String> {
        let id = self
            .backend
            .next_dataset_id
            .lock()
            .take()
            .unwrap_or_else(|| format!("ds-{}", Uuid::new_v4()));
        self.backend.datasets.lock().insert(id.clone(), params.clone());
        Ok(id)
    }

    async fn update_dataset(&self, dataset_id: &str, params: &DatasetParams) -> KbResult<()> {
        if self.backend.fail_update.load(Ordering::SeqCst) {
            return Err(KbError::UpstreamApplicationError {
                code: 102,
                message: "update rejected".to_string(),
            });
        }
        self.backend
            .datasets
            .lock()
            .insert(dataset_id.to_string(), params.clone());
        Ok(())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> KbResult<()> {
        if self.backend.fail_delete.load(Ordering::SeqCst) {
            return Err(FakeBackend::upstream_down());
        }
        self.backend.datasets.lock().remove(dataset_id);
        self.backend
            .deleted_datasets
            .lock()
            .push(dataset_id.to_string());
        Ok(())
    }

    async fn document_count(&self, dataset_id: &str) -> u64 {
        if self.backend.fail_reads.load(Ordering::SeqCst) {
            return 0;
        }
        self.backend
            .documents
            .lock()
            .iter()
            .filter(|doc| doc.dataset_id == dataset_id)
            .count() as u64
    }

    async fn list_documents(
        &self,
        dataset_id: &str,
        filter: &DocumentFilter,
        page: Pagination,
    ) -> KbResult<PageData<Document>> {
        if self.backend.fail_reads.load(Ordering::SeqCst) {
            return Err(FakeBackend::upstream_down());
        }
        let matching: Vec<Document> = self
            .backend
            .documents
            .lock()
            .iter()
            .filter(|doc| doc.dataset_id == dataset_id)
            .filter(|doc| filter.id.as_ref().is_none_or(|id| &doc.document_id == id))
            .filter(|doc| {
                filter.run_statuses.is_empty()
                    || filter
                        .run_statuses
                        .iter()
                        .any(|status| status == doc.status.as_upstream())
            })
            .cloned()
            .collect();
        let total = matching.len() as u64;
        let list = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok(PageData::new(list, total))
    }

    async fn get_document(
        &self,
        dataset_id: &str,
        document_id: &str,
    ) -> KbResult<Option<Document>> {
        let page = self
            .list_documents(dataset_id, &DocumentFilter::by_id(document_id), Pagination::new(1, 1))
            .await?;
        Ok(page.list.into_iter().next())
    }

    async fn upload_document(
        &self,
        dataset_id: &str,
        source: UploadSource,
        options: &UploadOptions,
    ) -> KbResult<Document> {
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| source.file_name().to_string());
        let document = Document {
            document_id: format!("doc-{}", self.backend.documents.lock().len() + 1),
            dataset_id: dataset_id.to_string(),
            file_type: FileType::from_file_name(&name),
            name,
            file_size: source.content_length(),
            status: DocumentStatus::Unstart,
            ..Document::default()
        };
        self.backend.documents.lock().push(document.clone());
        Ok(document)
    }

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> KbResult<()> {
        let mut documents = self.backend.documents.lock();
        let before = documents.len();
        documents.retain(|doc| !(doc.dataset_id == dataset_id && doc.document_id == document_id));
        if documents.len() == before {
            return Err(KbError::UpstreamApplicationError {
                code: 102,
                message: format!("document {document_id} not found"),
            });
        }
        Ok(())
    }

    async fn parse_documents(&self, _dataset_id: &str, document_ids: &[String]) -> KbResult<()> {
        self.backend.parsed.lock().extend(document_ids.iter().cloned());
        for doc in self.backend.documents.lock().iter_mut() {
            if document_ids.contains(&doc.document_id) {
                doc.status = DocumentStatus::Running;
            }
        }
        Ok(())
    }

    async fn list_chunks(
        &self,
        _dataset_id: &str,
        _document_id: &str,
        _query: &ChunkQuery,
        _page: Pagination,
    ) -> KbResult<ChunkPage> {
        Ok(ChunkPage::default())
    }

    async fn retrieval_test(&self, request: &RetrievalRequest) -> KbResult<RetrievalResult> {
        *self.backend.last_retrieval.lock() = Some(request.clone());
        Ok(RetrievalResult::default())
    }

    async fn test_connection(&self) -> bool {
        !self.backend.fail_reads.load(Ordering::SeqCst)
    }

    async fn status(&self) -> AdapterStatus {
        AdapterStatus {
            adapter_type: "fake".to_string(),
            config_keys: self
                .config
                .as_ref()
                .map(BackendConfig::keys)
                .unwrap_or_default(),
            connected: self.test_connection().await,
            last_checked: Utc::now(),
        }
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    rows: Mutex<Vec<KnowledgeBase>>,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self) -> Vec<KnowledgeBase> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl KnowledgeBaseStore for MemoryStore {
    async fn get(&self, id: Uuid) -> KbResult<Option<KnowledgeBase>> {
        Ok(self.rows.lock().iter().find(|row| row.id == id).cloned())
    }

    async fn insert(&self, record: &KnowledgeBase) -> KbResult<()> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(KbError::Storage("disk full".to_string()));
        }
        let mut rows = self.rows.lock();
        if rows.iter().any(|row| row.dataset_id == record.dataset_id) {
            return Err(KbError::DuplicateRecord(record.dataset_id.clone()));
        }
        rows.push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &KnowledgeBase) -> KbResult<()> {
        let mut rows = self.rows.lock();
        let row = rows
            .iter_mut()
            .find(|row| row.id == record.id)
            .ok_or_else(|| KbError::RecordNotFound(record.id.to_string()))?;
        *row = record.clone();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> KbResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(KbError::Storage("database is locked".to_string()));
        }
        self.rows.lock().retain(|row| row.id != id);
        Ok(())
    }

    async fn find_by_dataset_id(&self, dataset_id: &str) -> KbResult<Option<KnowledgeBase>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|row| row.dataset_id == dataset_id)
            .cloned())
    }

    async fn find_by_name_for_creator(
        &self,
        name: &str,
        creator: i64,
        exclude: Option<Uuid>,
    ) -> KbResult<Option<KnowledgeBase>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|row| row.name == name && row.creator == creator && Some(row.id) != exclude)
            .cloned())
    }

    async fn list_for_creator(
        &self,
        creator: i64,
        name_filter: Option<&str>,
        page: Pagination,
    ) -> KbResult<PageData<KnowledgeBase>> {
        let mut matching: Vec<KnowledgeBase> = self
            .rows
            .lock()
            .iter()
            .filter(|row| row.creator == creator)
            .filter(|row| name_filter.is_none_or(|needle| row.name.contains(needle)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len() as u64;
        let list = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.page_size as usize)
            .collect();
        Ok(PageData::new(list, total))
    }
}

pub(crate) struct StaticConfigs {
    pub profiles: Vec<BackendProfile>,
}

impl StaticConfigs {
    pub fn single(key: &str) -> Arc<Self> {
        Arc::new(Self {
            profiles: vec![BackendProfile {
                id: "fake-main".to_string(),
                name: "Fake".to_string(),
                adapter_type: "fake".to_string(),
                config: BackendConfig::new("http://rag.local", key),
            }],
        })
    }
}

impl ConfigSource for StaticConfigs {
    fn resolve_config(&self, reference: ConfigRef<'_>) -> KbResult<BackendProfile> {
        match reference {
            ConfigRef::Profile(id) => self
                .profiles
                .iter()
                .find(|profile| profile.id == id)
                .cloned()
                .ok_or_else(|| KbError::ConfigNotFound(id.to_string())),
            ConfigRef::PlatformDefault => self
                .profiles
                .first()
                .cloned()
                .ok_or_else(|| KbError::ConfigNotFound("no default profile".to_string())),
        }
    }

    fn list_profiles(&self) -> Vec<ProfileSummary> {
        self.profiles
            .iter()
            .enumerate()
            .map(|(index, profile)| ProfileSummary {
                id: profile.id.clone(),
                name: profile.name.clone(),
                is_default: index == 0,
            })
            .collect()
    }
}
