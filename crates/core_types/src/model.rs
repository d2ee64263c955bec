use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::paging::Pagination;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
}

impl Principal {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBaseStatus {
    #[default]
    Enabled,
    Disabled,
}

impl KnowledgeBaseStatus {
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::Enabled => 1,
            Self::Disabled => 0,
        }
    }

    pub const fn from_i64(value: i64) -> Self {
        if value == 0 {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }
}

/// Local record paired with exactly one remote dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub dataset_id: String,
    pub rag_config_ref: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub status: KnowledgeBaseStatus,
    pub creator: i64,
    pub created_at: DateTime<Utc>,
    pub updater: i64,
    pub updated_at: DateTime<Utc>,
}

/// A knowledge base together with its live document count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    #[serde(flatten)]
    pub record: KnowledgeBase,
    pub document_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetParams {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Processing state of a remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    #[default]
    Unstart,
    Running,
    Cancel,
    Done,
    Fail,
}

impl DocumentStatus {
    pub const ALL: [Self; 5] = [
        Self::Unstart,
        Self::Running,
        Self::Cancel,
        Self::Done,
        Self::Fail,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Self::Unstart => 0,
            Self::Running => 1,
            Self::Cancel => 2,
            Self::Done => 3,
            Self::Fail => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.code() == code)
    }

    pub const fn as_upstream(self) -> &'static str {
        match self {
            Self::Unstart => "UNSTART",
            Self::Running => "RUNNING",
            Self::Cancel => "CANCEL",
            Self::Done => "DONE",
            Self::Fail => "FAIL",
        }
    }

    /// Maps whatever the backend reported. Unrecognized input is `Unstart`.
    pub fn from_upstream(raw: &Value) -> Self {
        let parsed = match raw {
            Value::String(text) => Self::parse_label(text),
            Value::Number(number) => number
                .as_i64()
                .and_then(|code| i32::try_from(code).ok())
                .and_then(Self::from_code),
            _ => None,
        };

        parsed.unwrap_or_else(|| {
            if !raw.is_null() {
                warn!(status = %raw, "unrecognized document status, treating as UNSTART");
            }
            Self::Unstart
        })
    }

    fn parse_label(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if let Ok(code) = trimmed.parse::<i32>() {
            return Self::from_code(code);
        }
        Self::ALL
            .into_iter()
            .find(|status| status.as_upstream().eq_ignore_ascii_case(trimmed))
    }

    /// Filter value for a local status code. Codes outside the enum are sent verbatim.
    pub fn upstream_filter(code: i32) -> String {
        Self::from_code(code)
            .map(|status| status.as_upstream().to_string())
            .unwrap_or_else(|| code.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Document,
    Spreadsheet,
    Presentation,
    Image,
    #[default]
    Other,
}

impl FileType {
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "pdf" | "doc" | "docx" | "txt" | "md" | "mdx" | "html" | "json" => Self::Document,
            "csv" | "xls" | "xlsx" => Self::Spreadsheet,
            "ppt" | "pptx" => Self::Presentation,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "tif" | "tiff" => Self::Image,
            _ => Self::Other,
        }
    }

    pub fn from_file_name(file_name: &str) -> Self {
        file_name
            .rsplit_once('.')
            .map(|(_, extension)| Self::from_extension(extension))
            .unwrap_or_default()
    }
}

/// A document as the backend currently reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub dataset_id: String,
    pub name: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub meta_fields: Map<String, Value>,
    pub chunk_method: Option<String>,
    pub parser_config: Map<String, Value>,
    pub status: DocumentStatus,
    pub chunk_count: u64,
    pub progress: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentOrder {
    CreateTime,
    UpdateTime,
}

impl DocumentOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTime => "create_time",
            Self::UpdateTime => "update_time",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilter {
    pub keywords: Option<String>,
    pub order_by: Option<DocumentOrder>,
    pub desc: Option<bool>,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Milliseconds since the epoch.
    pub create_time_from: Option<i64>,
    pub create_time_to: Option<i64>,
    #[serde(default)]
    pub suffixes: Vec<String>,
    #[serde(default)]
    pub run_statuses: Vec<String>,
}

impl DocumentFilter {
    pub fn by_id(document_id: impl Into<String>) -> Self {
        Self {
            id: Some(document_id.into()),
            ..Self::default()
        }
    }

    pub fn by_status(code: i32) -> Self {
        Self {
            run_statuses: vec![DocumentStatus::upstream_filter(code)],
            ..Self::default()
        }
    }

    /// Query pairs for the list endpoint. Blank values are left out.
    pub fn to_query(&self, page: Pagination) -> Vec<(String, String)> {
        let page = page.clamped();
        let mut query = vec![
            ("page".to_string(), page.page.to_string()),
            ("page_size".to_string(), page.page_size.to_string()),
        ];

        let mut push_text = |key: &str, value: &Option<String>| {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                query.push((key.to_string(), value.to_string()));
            }
        };
        push_text("keywords", &self.keywords);
        push_text("id", &self.id);
        push_text("name", &self.name);

        if let Some(order) = self.order_by {
            query.push(("orderby".to_string(), order.as_str().to_string()));
        }
        if let Some(desc) = self.desc {
            query.push(("desc".to_string(), desc.to_string()));
        }
        if let Some(from) = self.create_time_from.filter(|value| *value > 0) {
            query.push(("create_time_from".to_string(), from.to_string()));
        }
        if let Some(to) = self.create_time_to.filter(|value| *value > 0) {
            query.push(("create_time_to".to_string(), to.to_string()));
        }
        if let Some(joined) = join_non_blank(&self.suffixes) {
            query.push(("suffix".to_string(), joined));
        }
        if let Some(joined) = join_non_blank(&self.run_statuses) {
            query.push(("run".to_string(), joined));
        }
        query
    }
}

fn join_non_blank(values: &[String]) -> Option<String> {
    let kept: Vec<&str> = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    (!kept.is_empty()).then(|| kept.join(","))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadOptions {
    /// Overrides the file name reported by the source.
    pub name: Option<String>,
    pub meta_fields: Option<Map<String, Value>>,
    pub chunk_method: Option<String>,
    pub parser_config: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub important_keywords: Vec<String>,
    pub questions: Vec<String>,
    pub create_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub keywords: Option<String>,
    pub chunk_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkPage {
    pub chunks: Vec<Chunk>,
    pub total: u64,
    pub document: Option<Document>,
}

/// Optional knobs for a retrieval test. Unset fields never reach the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_similarity_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_languages: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_condition: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub question: String,
    pub dataset_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub document_ids: Vec<String>,
    #[serde(flatten)]
    pub params: RetrievalParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub content: String,
    pub document_id: Option<String>,
    pub document_name: Option<String>,
    pub dataset_id: Option<String>,
    pub similarity: Option<f64>,
    pub vector_similarity: Option<f64>,
    pub term_similarity: Option<f64>,
    pub highlight: Option<String>,
    pub important_keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    pub doc_aggs: Vec<Value>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterStatus {
    pub adapter_type: String,
    pub config_keys: Vec<String>,
    pub connected: bool,
    pub last_checked: DateTime<Utc>,
}
