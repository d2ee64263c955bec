mod normalize;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    AdapterStatus, BackendConfig, ChunkPage, ChunkQuery, ConfigField, ConfigFieldKind,
    DEFAULT_TIMEOUT_MS, DEFAULT_UPLOAD_CHUNK_SIZE, DatasetParams, Document, DocumentFilter,
    KbError, KbResult, KnowledgeBaseAdapter, PageData, Pagination, RetrievalRequest,
    RetrievalResult, UploadOptions, UploadSource,
};
use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, multipart};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

pub const ADAPTER_TYPE: &str = "ragflow";
const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Serialize)]
struct DatasetBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

impl<'a> From<&'a DatasetParams> for DatasetBody<'a> {
    fn from(params: &'a DatasetParams) -> Self {
        Self {
            name: params.name.as_str(),
            description: params.description.as_deref(),
        }
    }
}

/// Talks to a RAGFlow server over its `/api/v1` HTTP API.
pub struct RagflowAdapter {
    client: reqwest::Client,
    config: Option<BackendConfig>,
}

impl Default for RagflowAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RagflowAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            config: None,
        }
    }

    pub fn boxed() -> Box<dyn KnowledgeBaseAdapter> {
        Box::new(Self::new())
    }

    /// Initialized and validated in one step.
    pub fn with_config(config: BackendConfig) -> KbResult<Self> {
        let mut adapter = Self::new();
        adapter.validate_config(&config)?;
        adapter.initialize(config)?;
        Ok(adapter)
    }

    fn active_config(&self) -> KbResult<&BackendConfig> {
        let config = self.config.as_ref().ok_or_else(|| {
            KbError::ConfigInvalid("ragflow adapter has no configuration".to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    fn request(&self, method: Method, path: &str) -> KbResult<RequestBuilder> {
        let config = self.active_config()?;
        let url = format!(
            "{}{API_PREFIX}{path}",
            config.base_url.trim().trim_end_matches('/')
        );
        debug!(%method, %url, "ragflow request");

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
                .map_err(|_| KbError::ConfigInvalid("api_key is not a valid header value".into()))?,
        );
        Ok(self.client.request(method, url).headers(headers))
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> KbResult<Value> {
        let response = request
            .send()
            .await
            .map_err(|err| KbError::UpstreamUnreachable(format!("{action}: {err}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| KbError::UpstreamUnreachable(format!("{action}: {err}")))?;
        if !status.is_success() {
            return Err(KbError::UpstreamHttpError {
                status: status.as_u16(),
                detail: format!("{action}: {}", normalize::error_detail(&text)),
            });
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|err| KbError::MalformedResponse(format!("{action}: {err}")))?;
        normalize::unwrap_envelope(body, action)
    }

    async fn send_json<B: Serialize + Sync + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        action: &str,
    ) -> KbResult<Value> {
        let request = self.request(method, path)?.json(body);
        self.send(request, action).await
    }

    async fn get(&self, path: &str, query: &[(String, String)], action: &str) -> KbResult<Value> {
        let request = self.request(Method::GET, path)?.query(query);
        self.send(request, action).await
    }
}

fn require_id(value: &str, what: &str) -> KbResult<()> {
    if value.trim().is_empty() {
        return Err(KbError::InvalidArgument(format!("{what} is required")));
    }
    Ok(())
}

fn json_text(map: &serde_json::Map<String, Value>) -> String {
    Value::Object(map.clone()).to_string()
}

#[async_trait]
impl KnowledgeBaseAdapter for RagflowAdapter {
    fn adapter_type(&self) -> &'static str {
        ADAPTER_TYPE
    }

    fn initialize(&mut self, config: BackendConfig) -> KbResult<()> {
        let timeout = Duration::from_millis(config.timeout_ms.max(1));
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| KbError::ConfigInvalid(format!("cannot build http client: {err}")))?;
        self.config = Some(config);
        Ok(())
    }

    fn validate_config(&self, config: &BackendConfig) -> KbResult<()> {
        config.validate()
    }

    fn supported_config(&self) -> IndexMap<String, ConfigField> {
        let field = |label: &str, kind, required| ConfigField {
            label: label.to_string(),
            kind,
            required,
        };
        IndexMap::from([
            (
                "base_url".to_string(),
                field("RAGFlow server URL", ConfigFieldKind::Url, true),
            ),
            (
                "api_key".to_string(),
                field("RAGFlow API key", ConfigFieldKind::Secret, true),
            ),
            (
                "timeout_ms".to_string(),
                field("Request timeout (ms)", ConfigFieldKind::Integer, false),
            ),
        ])
    }

    fn default_config(&self) -> IndexMap<String, Value> {
        IndexMap::from([
            ("base_url".to_string(), json!("http://localhost:9380")),
            ("api_key".to_string(), json!("")),
            ("timeout_ms".to_string(), json!(DEFAULT_TIMEOUT_MS)),
        ])
    }

    async fn create_dataset(&self, params: &DatasetParams) -> KbResult<String> {
        require_id(&params.name, "dataset name")?;
        let data = self
            .send_json(
                Method::POST,
                "/datasets",
                &DatasetBody::from(params),
                "create dataset",
            )
            .await?;
        let dataset_id = normalize::dataset_id(&data).ok_or_else(|| {
            KbError::MalformedResponse("create dataset: response has no dataset id".to_string())
        })?;
        info!(dataset_id = %dataset_id, name = %params.name, "ragflow dataset created");
        Ok(dataset_id)
    }

    async fn update_dataset(&self, dataset_id: &str, params: &DatasetParams) -> KbResult<()> {
        require_id(dataset_id, "dataset id")?;
        self.send_json(
            Method::PUT,
            &format!("/datasets/{dataset_id}"),
            &DatasetBody::from(params),
            "update dataset",
        )
        .await?;
        Ok(())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> KbResult<()> {
        require_id(dataset_id, "dataset id")?;
        self.send_json(
            Method::DELETE,
            "/datasets",
            &json!({ "ids": [dataset_id] }),
            "delete dataset",
        )
        .await?;
        info!(dataset_id = %dataset_id, "ragflow dataset deleted");
        Ok(())
    }

    async fn document_count(&self, dataset_id: &str) -> u64 {
        match self
            .list_documents(dataset_id, &DocumentFilter::default(), Pagination::new(1, 1))
            .await
        {
            Ok(page) => page.total,
            Err(err) => {
                warn!(dataset_id = %dataset_id, error = %err, "document count unavailable, reporting 0");
                0
            }
        }
    }

    async fn list_documents(
        &self,
        dataset_id: &str,
        filter: &DocumentFilter,
        page: Pagination,
    ) -> KbResult<PageData<Document>> {
        require_id(dataset_id, "dataset id")?;
        let data = self
            .get(
                &format!("/datasets/{dataset_id}/documents"),
                &filter.to_query(page),
                "list documents",
            )
            .await?;
        Ok(normalize::document_page(&data, dataset_id))
    }

    async fn get_document(
        &self,
        dataset_id: &str,
        document_id: &str,
    ) -> KbResult<Option<Document>> {
        require_id(document_id, "document id")?;
        let page = self
            .list_documents(
                dataset_id,
                &DocumentFilter::by_id(document_id),
                Pagination::new(1, 1),
            )
            .await?;
        Ok(page
            .list
            .into_iter()
            .find(|doc| doc.document_id == document_id))
    }

    async fn upload_document(
        &self,
        dataset_id: &str,
        source: UploadSource,
        options: &UploadOptions,
    ) -> KbResult<Document> {
        require_id(dataset_id, "dataset id")?;
        let file_name = options
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(source.file_name())
            .to_string();
        let content_length = source.content_length();

        let body = reqwest::Body::wrap_stream(source.into_stream(DEFAULT_UPLOAD_CHUNK_SIZE));
        let file_part =
            multipart::Part::stream_with_length(body, content_length).file_name(file_name.clone());
        let mut form = multipart::Form::new()
            .part("file", file_part)
            .text("name", file_name.clone());
        if let Some(meta_fields) = &options.meta_fields {
            form = form.text("meta_fields", json_text(meta_fields));
        }
        if let Some(chunk_method) = options.chunk_method.as_deref().filter(|m| !m.is_empty()) {
            form = form.text("chunk_method", chunk_method.to_string());
        }
        if let Some(parser_config) = &options.parser_config {
            form = form.text("parser_config", json_text(parser_config));
        }

        let request = self
            .request(Method::POST, &format!("/datasets/{dataset_id}/documents"))?
            .multipart(form);
        let data = self.send(request, "upload document").await?;
        let document = normalize::uploaded_document(&data, dataset_id).ok_or_else(|| {
            KbError::MalformedResponse("upload document: response has no document id".to_string())
        })?;
        info!(
            dataset_id = %dataset_id,
            document_id = %document.document_id,
            bytes = content_length,
            "document uploaded"
        );
        Ok(document)
    }

    async fn delete_document(&self, dataset_id: &str, document_id: &str) -> KbResult<()> {
        require_id(dataset_id, "dataset id")?;
        require_id(document_id, "document id")?;
        self.send_json(
            Method::DELETE,
            &format!("/datasets/{dataset_id}/documents"),
            &json!({ "ids": [document_id] }),
            "delete document",
        )
        .await?;
        Ok(())
    }

    async fn parse_documents(&self, dataset_id: &str, document_ids: &[String]) -> KbResult<()> {
        require_id(dataset_id, "dataset id")?;
        if document_ids.is_empty() {
            return Err(KbError::InvalidArgument(
                "at least one document id is required".to_string(),
            ));
        }
        self.send_json(
            Method::POST,
            &format!("/datasets/{dataset_id}/chunks"),
            &json!({ "document_ids": document_ids }),
            "parse documents",
        )
        .await?;
        info!(dataset_id = %dataset_id, count = document_ids.len(), "parse triggered");
        Ok(())
    }

    async fn list_chunks(
        &self,
        dataset_id: &str,
        document_id: &str,
        query: &ChunkQuery,
        page: Pagination,
    ) -> KbResult<ChunkPage> {
        require_id(dataset_id, "dataset id")?;
        require_id(document_id, "document id")?;
        let page = page.clamped();
        let mut params = vec![
            ("page".to_string(), page.page.to_string()),
            ("page_size".to_string(), page.page_size.to_string()),
        ];
        if let Some(keywords) = query.keywords.as_deref().filter(|k| !k.trim().is_empty()) {
            params.push(("keywords".to_string(), keywords.trim().to_string()));
        }
        if let Some(chunk_id) = query.chunk_id.as_deref().filter(|id| !id.trim().is_empty()) {
            params.push(("id".to_string(), chunk_id.trim().to_string()));
        }

        let data = self
            .get(
                &format!("/datasets/{dataset_id}/documents/{document_id}/chunks"),
                &params,
                "list chunks",
            )
            .await?;
        Ok(normalize::chunk_page(&data, dataset_id))
    }

    async fn retrieval_test(&self, request: &RetrievalRequest) -> KbResult<RetrievalResult> {
        let data = self
            .send_json(Method::POST, "/retrieval", request, "retrieval test")
            .await?;
        Ok(normalize::retrieval_result(&data))
    }

    async fn test_connection(&self) -> bool {
        let query = [
            ("page".to_string(), "1".to_string()),
            ("page_size".to_string(), "1".to_string()),
        ];
        match self.get("/datasets", &query, "connection test").await {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "ragflow connection test failed");
                false
            }
        }
    }

    async fn status(&self) -> AdapterStatus {
        AdapterStatus {
            adapter_type: ADAPTER_TYPE.to_string(),
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
