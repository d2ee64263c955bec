use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::backend::{BackendConfig, BackendProfile, ConfigField, ConfigRef, ProfileSummary};
use crate::error::KbResult;
use crate::model::{
    AdapterStatus, ChunkPage, ChunkQuery, DatasetParams, Document, DocumentFilter, KnowledgeBase,
    RetrievalRequest, RetrievalResult, UploadOptions,
};
use crate::paging::{PageData, Pagination};
use crate::upload::UploadSource;

/// Everything a knowledge-base backend has to provide.
///
/// Mutating calls always surface failures. `document_count` and `status` are allowed to
/// degrade to zero or a disconnected status so listing pages keep rendering.
#[async_trait]
pub trait KnowledgeBaseAdapter: Send + Sync {
    fn adapter_type(&self) -> &'static str;

    /// Installs the configuration. Called once, before the instance is shared.
    fn initialize(&mut self, config: BackendConfig) -> KbResult<()>;

    fn validate_config(&self, config: &BackendConfig) -> KbResult<()>;

    fn supported_config(&self) -> IndexMap<String, ConfigField>;

    fn default_config(&self) -> IndexMap<String, Value>;

    async fn create_dataset(&self, params: &DatasetParams) -> KbResult<String>;

    async fn update_dataset(&self, dataset_id: &str, params: &DatasetParams) -> KbResult<()>;

    async fn delete_dataset(&self, dataset_id: &str) -> KbResult<()>;

    async fn document_count(&self, dataset_id: &str) -> u64;

    async fn list_documents(
        &self,
        dataset_id: &str,
        filter: &DocumentFilter,
        page: Pagination,
    ) -> KbResult<PageData<Document>>;

    async fn list_documents_by_status(
        &self,
        dataset_id: &str,
        status_code: i32,
        page: Pagination,
    ) -> KbResult<PageData<Document>> {
        self.list_documents(dataset_id, &DocumentFilter::by_status(status_code), page)
            .await
    }

    /// `None` when the backend does not know the document.
    async fn get_document(
        &self,
        dataset_id: &str,
        document_id: &str,
    ) -> KbResult<Option<Document>>;

    async fn upload_document(
        &self,
        dataset_id: &str,
        source: UploadSource,
        options: &UploadOptions,
    ) -> KbResult<Document>;

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> KbResult<()>;

    async fn parse_documents(&self, dataset_id: &str, document_ids: &[String]) -> KbResult<()>;

    async fn list_chunks(
        &self,
        dataset_id: &str,
        document_id: &str,
        query: &ChunkQuery,
        page: Pagination,
    ) -> KbResult<ChunkPage>;

    async fn retrieval_test(&self, request: &RetrievalRequest) -> KbResult<RetrievalResult>;

    /// Never fails; an unreachable backend reports `false`.
    async fn test_connection(&self) -> bool;

    async fn status(&self) -> AdapterStatus;
}

/// Builds a fresh, unconfigured adapter.
pub type AdapterConstructor = Box<dyn Fn() -> Box<dyn KnowledgeBaseAdapter> + Send + Sync>;

/// Persistence for local knowledge-base rows.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    async fn get(&self, id: Uuid) -> KbResult<Option<KnowledgeBase>>;

    async fn insert(&self, record: &KnowledgeBase) -> KbResult<()>;

    async fn update(&self, record: &KnowledgeBase) -> KbResult<()>;

    async fn delete(&self, id: Uuid) -> KbResult<()>;

    async fn find_by_dataset_id(&self, dataset_id: &str) -> KbResult<Option<KnowledgeBase>>;

    /// Rows owned by `creator` with exactly `name`, optionally ignoring one row.
    async fn find_by_name_for_creator(
        &self,
        name: &str,
        creator: i64,
        exclude: Option<Uuid>,
    ) -> KbResult<Option<KnowledgeBase>>;

    /// Newest first.
    async fn list_for_creator(
        &self,
        creator: i64,
        name_filter: Option<&str>,
        page: Pagination,
    ) -> KbResult<PageData<KnowledgeBase>>;
}

pub trait ConfigSource: Send + Sync {
    fn resolve_config(&self, reference: ConfigRef<'_>) -> KbResult<BackendProfile>;

    /// Enabled profiles, default first.
    fn list_profiles(&self) -> Vec<ProfileSummary>;
}
