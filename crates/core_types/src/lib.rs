pub mod adapter;
pub mod backend;
pub mod error;
pub mod fields;
pub mod model;
pub mod paging;
pub mod upload;

pub use adapter::{AdapterConstructor, ConfigSource, KnowledgeBaseAdapter, KnowledgeBaseStore};
pub use backend::{
    BackendConfig, BackendProfile, ConfigField, ConfigFieldKind, ConfigRef, DEFAULT_FINGERPRINT,
    DEFAULT_TIMEOUT_MS, ProfileSummary,
};
pub use error::{KbError, KbResult};
pub use model::{
    AdapterStatus, Chunk, ChunkPage, ChunkQuery, DatasetParams, Document, DocumentFilter,
    DocumentOrder, DocumentStatus, FileType, KnowledgeBase, KnowledgeBaseStatus,
    KnowledgeBaseSummary, Principal, RetrievalParams, RetrievalRequest, RetrievalResult,
    RetrievedChunk, UploadOptions,
};
pub use paging::{DEFAULT_PAGE_SIZE, PageData, Pagination};
pub use upload::{ChunkedReader, DEFAULT_UPLOAD_CHUNK_SIZE, UploadSource};
