//! Tolerant field lookup for loosely typed upstream JSON.
//!
//! Each logical field owns an ordered alias list. Lookups take the first alias that is
//! present and non-null, and coercion helpers never fail: unparsable input falls back to a
//! neutral default.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    DatasetKey,
    DocumentId,
    ParentDocumentId,
    Name,
    DatasetId,
    FileType,
    Size,
    MetaFields,
    ParserConfig,
    ChunkMethod,
    ChunkCount,
    Progress,
    CreateTime,
    UpdateTime,
    RunStatus,
    DocumentList,
    Total,
    ChunkList,
    ChunkId,
    ChunkContent,
    Keywords,
    Questions,
    ChunkTime,
    Similarity,
    VectorSimilarity,
    TermSimilarity,
    Highlight,
    DocumentName,
    DocAggs,
}

impl Field {
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::DatasetKey => &["id", "dataset_id", "datasetId", "kb_id"],
            Self::DocumentId => &["id", "document_id", "documentId", "doc_id"],
            Self::ParentDocumentId => &["document_id", "doc_id", "documentId"],
            Self::Name => &["name", "filename", "file_name", "title"],
            Self::DatasetId => &["dataset_id", "dataset", "knowledge_base_id", "kb_id"],
            Self::FileType => &["file_type", "type", "format", "extension"],
            Self::Size => &["size", "file_size", "size_bytes"],
            Self::MetaFields => &["meta_fields", "metadata", "meta", "properties"],
            Self::ParserConfig => &["parser_config", "parser", "parse_config", "config"],
            Self::ChunkMethod => &["chunk_method", "chunking", "chunk_strategy"],
            Self::ChunkCount => &["chunk_count", "chunk_num", "chunks_count"],
            Self::Progress => &["progress", "process_percent"],
            Self::CreateTime => &["create_time", "created_at", "creation_time", "created"],
            Self::UpdateTime => &["update_time", "updated_at", "modified_time", "modified"],
            Self::RunStatus => &["run", "status", "parse_status"],
            Self::DocumentList => &["docs", "documents", "items", "list", "data"],
            Self::Total => &["total", "totalCount", "total_count", "count"],
            Self::ChunkList => &["chunks", "items", "list", "data", "docs"],
            Self::ChunkId => &["id", "chunk_id", "chunkId"],
            Self::ChunkContent => &["content", "text", "chunk_content", "chunkContent"],
            Self::Keywords => &[
                "important_keywords",
                "keywords",
                "importantKeywords",
                "key_words",
            ],
            Self::Questions => &["questions", "question_list", "questionList", "qas"],
            Self::ChunkTime => &["create_time", "created_at", "createTime", "timestamp"],
            Self::Similarity => &["similarity", "score"],
            Self::VectorSimilarity => &["vector_similarity", "vectorSimilarity"],
            Self::TermSimilarity => &["term_similarity", "termSimilarity"],
            Self::Highlight => &["highlight", "highlighted_content"],
            Self::DocumentName => &["document_keyword", "document_name", "docnm_kwd", "doc_name"],
            Self::DocAggs => &["doc_aggs", "docAggs", "document_aggregations"],
        }
    }
}

/// First present, non-null alias of `field`.
pub fn extract(value: &Value, field: Field) -> Option<&Value> {
    let object = value.as_object()?;
    field
        .aliases()
        .iter()
        .filter_map(|alias| object.get(*alias))
        .find(|candidate| !candidate.is_null())
}

pub fn string(value: &Value, field: Field) -> Option<String> {
    match extract(value, field)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub fn string_or(value: &Value, field: Field, default: &str) -> String {
    string(value, field).unwrap_or_else(|| default.to_string())
}

pub fn u64_or_zero(value: &Value, field: Field) -> u64 {
    extract(value, field).and_then(coerce_u64).unwrap_or(0)
}

pub fn f64_value(value: &Value, field: Field) -> Option<f64> {
    match extract(value, field)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub fn coerce_u64(raw: &Value) -> Option<u64> {
    match raw {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<u64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
        }
        _ => None,
    }
}

/// Object-valued field. A string holding a JSON object is parsed; anything else is empty.
pub fn object(value: &Value, field: Field) -> Map<String, Value> {
    match extract(value, field) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

/// List of strings from a JSON array or a comma separated string. Order is preserved.
pub fn string_list(value: &Value, field: Field) -> Vec<String> {
    match extract(value, field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect(),
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Epoch seconds or milliseconds, RFC 3339, RFC 2822 or `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn timestamp(value: &Value, field: Field) -> Option<DateTime<Utc>> {
    match extract(value, field)? {
        Value::Number(number) => number.as_i64().and_then(epoch_to_datetime),
        Value::String(text) => parse_time_text(text.trim()),
        _ => None,
    }
}

fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    if raw <= 0 {
        return None;
    }
    if raw >= 100_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn parse_time_text(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(raw) = text.parse::<i64>() {
        return epoch_to_datetime(raw);
    }
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_rfc2822(text))
        .map(|parsed| parsed.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Array-valued field. When no alias holds an array, the first field holding a list of
/// objects is used instead and a warning is logged.
pub fn list(value: &Value, field: Field) -> Option<&Vec<Value>> {
    if let Value::Array(items) = value {
        return Some(items);
    }
    let object = value.as_object()?;

    let by_alias = field
        .aliases()
        .iter()
        .filter_map(|alias| object.get(*alias))
        .find_map(Value::as_array);
    if by_alias.is_some() {
        return by_alias;
    }

    let (key, items) = object.iter().find_map(|(key, candidate)| {
        candidate
            .as_array()
            .filter(|items| items.first().is_some_and(Value::is_object))
            .map(|items| (key, items))
    })?;
    warn!(
        field = ?field,
        fallback_key = %key,
        "no known alias for list field, using first list of objects"
    );
    Some(items)
}
