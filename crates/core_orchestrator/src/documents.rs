use std::sync::Arc;

use core_types::{
    ChunkPage, ChunkQuery, Document, DocumentFilter, KbError, KbResult, KnowledgeBaseStore,
    PageData, Pagination, Principal, RetrievalParams, RetrievalRequest, RetrievalResult,
    UploadOptions, UploadSource,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::{BackendResolver, ResolvedBackend};
use crate::dataset::owned_record;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalTest {
    pub question: String,
    /// Falls back to the dataset the test is run from.
    #[serde(default)]
    pub dataset_ids: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    #[serde(flatten)]
    pub params: RetrievalParams,
}

/// Document, chunk and retrieval operations inside one of the caller's datasets.
pub struct DocumentOrchestrator {
    store: Arc<dyn KnowledgeBaseStore>,
    backends: BackendResolver,
}

impl DocumentOrchestrator {
    pub fn new(store: Arc<dyn KnowledgeBaseStore>, backends: BackendResolver) -> Self {
        Self { store, backends }
    }

    async fn backend_for(
        &self,
        principal: &Principal,
        dataset_id: &str,
    ) -> KbResult<ResolvedBackend> {
        let record = owned_record(self.store.as_ref(), principal, dataset_id).await?;
        self.backends.for_record(&record)
    }

    pub async fn list(
        &self,
        principal: &Principal,
        dataset_id: &str,
        filter: &DocumentFilter,
        page: Pagination,
    ) -> KbResult<PageData<Document>> {
        let backend = self.backend_for(principal, dataset_id).await?;
        backend.adapter.list_documents(dataset_id, filter, page).await
    }

    pub async fn list_by_status(
        &self,
        principal: &Principal,
        dataset_id: &str,
        status_code: i32,
        page: Pagination,
    ) -> KbResult<PageData<Document>> {
        let backend = self.backend_for(principal, dataset_id).await?;
        backend
            .adapter
            .list_documents_by_status(dataset_id, status_code, page)
            .await
    }

    pub async fn get(
        &self,
        principal: &Principal,
        dataset_id: &str,
        document_id: &str,
    ) -> KbResult<Document> {
        require(document_id, "document id")?;
        let backend = self.backend_for(principal, dataset_id).await?;
        backend
            .adapter
            .get_document(dataset_id, document_id)
            .await?
            .ok_or_else(|| KbError::RecordNotFound(format!("document `{document_id}`")))
    }

    pub async fn upload(
        &self,
        principal: &Principal,
        dataset_id: &str,
        source: UploadSource,
        options: &UploadOptions,
    ) -> KbResult<Document> {
        require(dataset_id, "dataset id")?;
        let file_name = options.name.as_deref().unwrap_or(source.file_name());
        require(file_name, "file name")?;
        if source.content_length() == 0 {
            return Err(KbError::InvalidArgument(format!("`{file_name}` is empty")));
        }

        let backend = self.backend_for(principal, dataset_id).await?;
        let document = backend
            .adapter
            .upload_document(dataset_id, source, options)
            .await?;
        info!(
            dataset_id = %dataset_id,
            document_id = %document.document_id,
            status = document.status.as_upstream(),
            "document accepted"
        );
        Ok(document)
    }

    pub async fn delete(
        &self,
        principal: &Principal,
        dataset_id: &str,
        document_id: &str,
    ) -> KbResult<()> {
        require(document_id, "document id")?;
        let backend = self.backend_for(principal, dataset_id).await?;
        backend.adapter.delete_document(dataset_id, document_id).await?;
        info!(dataset_id = %dataset_id, document_id = %document_id, "document deleted");
        Ok(())
    }

    /// Accepts the batch or fails as a whole. Progress has to be polled afterwards.
    pub async fn parse(
        &self,
        principal: &Principal,
        dataset_id: &str,
        document_ids: &[String],
    ) -> KbResult<()> {
        let mut ids: Vec<String> = Vec::with_capacity(document_ids.len());
        for id in document_ids.iter().map(|id| id.trim()) {
            if !id.is_empty() && !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        if ids.is_empty() {
            return Err(KbError::InvalidArgument(
                "at least one document id is required".to_string(),
            ));
        }

        let backend = self.backend_for(principal, dataset_id).await?;
        backend.adapter.parse_documents(dataset_id, &ids).await
    }

    pub async fn chunks(
        &self,
        principal: &Principal,
        dataset_id: &str,
        document_id: &str,
        query: &ChunkQuery,
        page: Pagination,
    ) -> KbResult<ChunkPage> {
        require(document_id, "document id")?;
        let backend = self.backend_for(principal, dataset_id).await?;
        backend
            .adapter
            .list_chunks(dataset_id, document_id, query, page)
            .await
    }

    /// Every dataset searched has to belong to the caller.
    pub async fn retrieval_test(
        &self,
        principal: &Principal,
        dataset_id: &str,
        test: RetrievalTest,
    ) -> KbResult<RetrievalResult> {
        let question = test.question.trim();
        if question.is_empty() {
            return Err(KbError::InvalidArgument("question is required".to_string()));
        }
        let mut dataset_ids: Vec<String> = test
            .dataset_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if dataset_ids.is_empty() {
            dataset_ids.push(dataset_id.to_string());
        }

        let backend = self.backend_for(principal, dataset_id).await?;
        for other in dataset_ids.iter().filter(|id| id.as_str() != dataset_id) {
            owned_record(self.store.as_ref(), principal, other).await?;
        }
        let request = RetrievalRequest {
            question: question.to_string(),
            dataset_ids,
            document_ids: test.document_ids,
            params: test.params,
        };
        debug!(dataset_id = %dataset_id, datasets = request.dataset_ids.len(), "retrieval test");
        backend.adapter.retrieval_test(&request).await
    }
}

fn require(value: &str, what: &str) -> KbResult<()> {
    if value.trim().is_empty() {
        return Err(KbError::InvalidArgument(format!("{what} is required")));
    }
    Ok(())
}
