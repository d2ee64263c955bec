use core_types::fields::{self, Field};
use core_types::{
    Chunk, ChunkPage, Document, DocumentStatus, FileType, KbError, KbResult, PageData,
    RetrievalResult, RetrievedChunk,
};
use serde_json::Value;

const MAX_DETAIL_LEN: usize = 512;

/// Checks the `{code, message, data}` envelope and hands back `data`.
pub(crate) fn unwrap_envelope(body: Value, action: &str) -> KbResult<Value> {
    let Value::Object(mut envelope) = body else {
        return Err(KbError::MalformedResponse(format!(
            "{action}: response is not a JSON object"
        )));
    };

    let code = envelope.get("code").and_then(envelope_code);
    let message = envelope
        .get("message")
        .or_else(|| envelope.get("msg"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match code {
        Some(0) => Ok(envelope.remove("data").unwrap_or(Value::Null)),
        Some(code) => Err(KbError::UpstreamApplicationError {
            code,
            message: describe(action, &message),
        }),
        None => Err(KbError::UpstreamApplicationError {
            code: -1,
            message: describe(action, "response carries no code field"),
        }),
    }
}

fn envelope_code(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn describe(action: &str, message: &str) -> String {
    if message.is_empty() {
        action.to_string()
    } else {
        format!("{action}: {message}")
    }
}

/// Best effort detail for a failed HTTP exchange.
pub(crate) fn error_detail(text: &str) -> String {
    let from_body = serde_json::from_str::<Value>(text).ok().and_then(|body| {
        body.get("message")
            .or_else(|| body.get("msg"))
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let detail = from_body.unwrap_or_else(|| text.trim().to_string());
    if detail.chars().count() > MAX_DETAIL_LEN {
        detail.chars().take(MAX_DETAIL_LEN).collect()
    } else {
        detail
    }
}

pub(crate) fn dataset_id(data: &Value) -> Option<String> {
    fields::string(data, Field::DatasetKey).filter(|id| !id.trim().is_empty())
}

pub(crate) fn document(raw: &Value, dataset_id: &str) -> Document {
    let name = fields::string_or(raw, Field::Name, "unknown");
    let file_type = match FileType::from_file_name(&name) {
        FileType::Other => fields::string(raw, Field::FileType)
            .map(|kind| FileType::from_extension(&kind))
            .unwrap_or_default(),
        known => known,
    };
    let status = fields::extract(raw, Field::RunStatus)
        .map(DocumentStatus::from_upstream)
        .unwrap_or_default();

    Document {
        document_id: fields::string_or(raw, Field::DocumentId, ""),
        dataset_id: fields::string(raw, Field::DatasetId).unwrap_or_else(|| dataset_id.to_string()),
        name,
        file_type,
        file_size: fields::u64_or_zero(raw, Field::Size),
        meta_fields: fields::object(raw, Field::MetaFields),
        chunk_method: fields::string(raw, Field::ChunkMethod),
        parser_config: fields::object(raw, Field::ParserConfig),
        status,
        chunk_count: fields::u64_or_zero(raw, Field::ChunkCount),
        progress: fields::f64_value(raw, Field::Progress),
        created_at: fields::timestamp(raw, Field::CreateTime),
        updated_at: fields::timestamp(raw, Field::UpdateTime),
    }
}

pub(crate) fn document_page(data: &Value, dataset_id: &str) -> PageData<Document> {
    let list: Vec<Document> = fields::list(data, Field::DocumentList)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| document(item, dataset_id))
                .collect()
        })
        .unwrap_or_default();
    let total = total_or(data, list.len());
    PageData::new(list, total)
}

/// Upload responses carry either a bare document, a list of them, or a wrapped list.
pub(crate) fn uploaded_document(data: &Value, dataset_id: &str) -> Option<Document> {
    let raw = match data {
        Value::Array(items) => items.first()?,
        Value::Object(_) if fields::extract(data, Field::DocumentId).is_some() => data,
        Value::Object(_) => fields::list(data, Field::DocumentList)?.first()?,
        _ => return None,
    };
    let parsed = document(raw, dataset_id);
    (!parsed.document_id.is_empty()).then_some(parsed)
}

pub(crate) fn chunk(raw: &Value) -> Chunk {
    Chunk {
        id: fields::string_or(raw, Field::ChunkId, ""),
        content: fields::string_or(raw, Field::ChunkContent, ""),
        important_keywords: fields::string_list(raw, Field::Keywords),
        questions: fields::string_list(raw, Field::Questions),
        create_time: fields::string(raw, Field::ChunkTime),
    }
}

pub(crate) fn chunk_page(data: &Value, dataset_id: &str) -> ChunkPage {
    let chunks: Vec<Chunk> = fields::list(data, Field::ChunkList)
        .map(|items| items.iter().filter(|item| item.is_object()).map(chunk).collect())
        .unwrap_or_default();
    let document = data
        .get("doc")
        .or_else(|| data.get("document"))
        .filter(|doc| doc.is_object())
        .map(|doc| document(doc, dataset_id));

    ChunkPage {
        total: total_or(data, chunks.len()),
        chunks,
        document,
    }
}

pub(crate) fn retrieved_chunk(raw: &Value) -> RetrievedChunk {
    RetrievedChunk {
        id: fields::string_or(raw, Field::ChunkId, ""),
        content: fields::string_or(raw, Field::ChunkContent, ""),
        document_id: fields::string(raw, Field::ParentDocumentId),
        document_name: fields::string(raw, Field::DocumentName),
        dataset_id: fields::string(raw, Field::DatasetId),
        similarity: fields::f64_value(raw, Field::Similarity),
        vector_similarity: fields::f64_value(raw, Field::VectorSimilarity),
        term_similarity: fields::f64_value(raw, Field::TermSimilarity),
        highlight: fields::string(raw, Field::Highlight),
        important_keywords: fields::string_list(raw, Field::Keywords),
    }
}

pub(crate) fn retrieval_result(data: &Value) -> RetrievalResult {
    let chunks: Vec<RetrievedChunk> = fields::list(data, Field::ChunkList)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(retrieved_chunk)
                .collect()
        })
        .unwrap_or_default();
    let doc_aggs = fields::extract(data, Field::DocAggs)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    RetrievalResult {
        total: total_or(data, chunks.len()),
        chunks,
        doc_aggs,
    }
}

fn total_or(data: &Value, fallback: usize) -> u64 {
    fields::extract(data, Field::Total)
        .and_then(fields::coerce_u64)
        .unwrap_or(fallback as u64)
}
