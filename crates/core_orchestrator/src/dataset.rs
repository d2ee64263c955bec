use std::sync::Arc;

use chrono::Utc;
use core_types::{
    ConfigRef, DatasetParams, KbError, KbResult, KnowledgeBase, KnowledgeBaseAdapter,
    KnowledgeBaseStatus, KnowledgeBaseStore, KnowledgeBaseSummary, PageData, Pagination,
    Principal, ProfileSummary,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::BackendResolver;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDataset {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Backend profile id; the platform default when absent.
    #[serde(default)]
    pub rag_config_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDataset {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<KnowledgeBaseStatus>,
}

/// Keeps local knowledge-base rows and remote datasets paired.
pub struct DatasetOrchestrator {
    store: Arc<dyn KnowledgeBaseStore>,
    backends: BackendResolver,
}

impl DatasetOrchestrator {
    pub fn new(store: Arc<dyn KnowledgeBaseStore>, backends: BackendResolver) -> Self {
        Self { store, backends }
    }

    pub fn profiles(&self) -> Vec<ProfileSummary> {
        self.backends.profiles()
    }

    /// Creates the remote dataset, then the local row.
    ///
    /// If the returned remote id is already tracked locally, or the row cannot be stored,
    /// the new remote dataset is deleted again before the error is returned.
    pub async fn create(
        &self,
        principal: &Principal,
        request: CreateDataset,
    ) -> KbResult<KnowledgeBase> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(KbError::InvalidArgument("dataset name is required".to_string()));
        }
        if self
            .store
            .find_by_name_for_creator(&name, principal.id, None)
            .await?
            .is_some()
        {
            return Err(KbError::DuplicateRecord(format!(
                "dataset name `{name}` is already in use"
            )));
        }

        let backend = self
            .backends
            .resolve(ConfigRef::from_option(request.rag_config_ref.as_deref()))?;
        let description = clean_description(request.description);
        let params = DatasetParams {
            name: remote_name(principal, &name),
            description: description.clone(),
        };
        let dataset_id = backend.adapter.create_dataset(&params).await?;

        match self.store.find_by_dataset_id(&dataset_id).await {
            Ok(Some(existing)) => {
                compensate_remote_create(backend.adapter.as_ref(), &dataset_id).await;
                return Err(KbError::DuplicateRecord(format!(
                    "dataset `{dataset_id}` is already tracked by knowledge base {}",
                    existing.id
                )));
            }
            Ok(None) => {}
            Err(err) => {
                compensate_remote_create(backend.adapter.as_ref(), &dataset_id).await;
                return Err(err);
            }
        }

        let now = Utc::now();
        let record = KnowledgeBase {
            id: Uuid::new_v4(),
            dataset_id,
            rag_config_ref: Some(backend.profile_id),
            name,
            description,
            status: KnowledgeBaseStatus::Enabled,
            creator: principal.id,
            created_at: now,
            updater: principal.id,
            updated_at: now,
        };
        if let Err(err) = self.store.insert(&record).await {
            compensate_remote_create(backend.adapter.as_ref(), &record.dataset_id).await;
            return Err(err);
        }

        info!(
            knowledge_base_id = %record.id,
            dataset_id = %record.dataset_id,
            creator = principal.id,
            "knowledge base created"
        );
        Ok(record)
    }

    /// Applies the change locally, then remotely. A remote failure restores the old row.
    pub async fn update(
        &self,
        principal: &Principal,
        dataset_id: &str,
        request: UpdateDataset,
    ) -> KbResult<KnowledgeBase> {
        let snapshot = self.owned(principal, dataset_id).await?;
        let mut updated = snapshot.clone();

        if let Some(name) = request.name.map(|name| name.trim().to_string()) {
            if name.is_empty() {
                return Err(KbError::InvalidArgument("dataset name is required".to_string()));
            }
            if name != snapshot.name
                && self
                    .store
                    .find_by_name_for_creator(&name, principal.id, Some(snapshot.id))
                    .await?
                    .is_some()
            {
                return Err(KbError::DuplicateRecord(format!(
                    "dataset name `{name}` is already in use"
                )));
            }
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = clean_description(Some(description));
        }
        if let Some(status) = request.status {
            updated.status = status;
        }
        updated.updater = principal.id;
        updated.updated_at = Utc::now();

        self.store.update(&updated).await?;

        let params = DatasetParams {
            name: remote_name(principal, &updated.name),
            description: updated.description.clone(),
        };
        let remote = match self.backends.for_record(&updated) {
            Ok(backend) => backend.adapter.update_dataset(dataset_id, &params).await,
            Err(err) => Err(err),
        };
        if let Err(err) = remote {
            error!(dataset_id = %dataset_id, error = %err, "remote update failed, rolling back");
            if let Err(rollback) = self.store.update(&snapshot).await {
                error!(dataset_id = %dataset_id, error = %rollback, "rollback of local update failed");
            }
            return Err(err);
        }

        info!(dataset_id = %dataset_id, "knowledge base updated");
        Ok(updated)
    }

    /// Deletes the remote dataset first; the local row is only removed once that succeeds.
    pub async fn delete(&self, principal: &Principal, dataset_id: &str) -> KbResult<()> {
        let record = self.owned(principal, dataset_id).await?;
        let backend = self.backends.for_record(&record)?;

        if let Err(err) = backend.adapter.delete_dataset(dataset_id).await {
            error!(dataset_id = %dataset_id, error = %err, "remote dataset delete failed");
            return Err(err);
        }
        if let Err(err) = self.store.delete(record.id).await {
            error!(
                knowledge_base_id = %record.id,
                dataset_id = %dataset_id,
                error = %err,
                "remote dataset deleted but local row remains"
            );
            return Err(err);
        }

        info!(knowledge_base_id = %record.id, dataset_id = %dataset_id, "knowledge base deleted");
        Ok(())
    }

    /// Deletes in order and stops at the first failure. Returns how many were deleted.
    pub async fn delete_batch(
        &self,
        principal: &Principal,
        dataset_ids: &[String],
    ) -> KbResult<usize> {
        if dataset_ids.is_empty() {
            return Err(KbError::InvalidArgument("no dataset ids given".to_string()));
        }
        for (deleted, dataset_id) in dataset_ids.iter().enumerate() {
            if let Err(err) = self.delete(principal, dataset_id).await {
                warn!(deleted, dataset_id = %dataset_id, "batch delete stopped");
                return Err(err);
            }
        }
        Ok(dataset_ids.len())
    }

    pub async fn find_by_dataset_id(&self, dataset_id: &str) -> KbResult<KnowledgeBase> {
        self.store
            .find_by_dataset_id(dataset_id)
            .await?
            .ok_or_else(|| KbError::RecordNotFound(format!("dataset `{dataset_id}`")))
    }

    pub async fn get(
        &self,
        principal: &Principal,
        dataset_id: &str,
    ) -> KbResult<KnowledgeBaseSummary> {
        let record = self.owned(principal, dataset_id).await?;
        Ok(self.summarize(record).await)
    }

    pub async fn list(
        &self,
        principal: &Principal,
        name_filter: Option<&str>,
        page: Pagination,
    ) -> KbResult<PageData<KnowledgeBaseSummary>> {
        let name_filter = name_filter.map(str::trim).filter(|name| !name.is_empty());
        let records = self
            .store
            .list_for_creator(principal.id, name_filter, page)
            .await?;

        let mut list = Vec::with_capacity(records.list.len());
        for record in records.list {
            list.push(self.summarize(record).await);
        }
        Ok(PageData::new(list, records.total))
    }

    pub(crate) async fn owned(
        &self,
        principal: &Principal,
        dataset_id: &str,
    ) -> KbResult<KnowledgeBase> {
        owned_record(self.store.as_ref(), principal, dataset_id).await
    }

    async fn summarize(&self, record: KnowledgeBase) -> KnowledgeBaseSummary {
        let document_count = match self.backends.for_record(&record) {
            Ok(backend) => backend.adapter.document_count(&record.dataset_id).await,
            Err(err) => {
                warn!(dataset_id = %record.dataset_id, error = %err, "no backend for document count");
                0
            }
        };
        KnowledgeBaseSummary {
            record,
            document_count,
        }
    }
}

pub(crate) async fn owned_record(
    store: &dyn KnowledgeBaseStore,
    principal: &Principal,
    dataset_id: &str,
) -> KbResult<KnowledgeBase> {
    if dataset_id.trim().is_empty() {
        return Err(KbError::InvalidArgument("dataset id is required".to_string()));
    }
    let record = store
        .find_by_dataset_id(dataset_id)
        .await?
        .ok_or_else(|| KbError::RecordNotFound(format!("dataset `{dataset_id}`")))?;
    if record.creator != principal.id {
        return Err(KbError::PermissionDenied(format!(
            "dataset `{dataset_id}` belongs to another user"
        )));
    }
    Ok(record)
}

fn remote_name(principal: &Principal, name: &str) -> String {
    format!("{}_{name}", principal.username)
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

async fn compensate_remote_create(adapter: &dyn KnowledgeBaseAdapter, dataset_id: &str) {
    match adapter.delete_dataset(dataset_id).await {
        Ok(()) => warn!(dataset_id = %dataset_id, "remote dataset removed after failed local create"),
        Err(err) => error!(
            dataset_id = %dataset_id,
            error = %err,
            "could not remove remote dataset after failed local create"
        ),
    }
}
