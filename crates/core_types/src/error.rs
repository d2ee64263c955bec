use thiserror::Error;

pub type KbResult<T> = std::result::Result<T, KbError>;

/// Every failure surfaced by adapters, stores and orchestrators.
///
/// `code()` is stable and meant for machines; `Display` carries the operator-facing detail,
/// including the upstream `message` whenever the backend supplied one.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KbError {
    #[error("no backend configuration could be resolved: {0}")]
    ConfigNotFound(String),

    #[error("backend configuration is invalid: {0}")]
    ConfigInvalid(String),

    #[error("adapter type `{0}` is not registered")]
    UnsupportedAdapter(String),

    #[error("backend is unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("backend returned HTTP {status}: {detail}")]
    UpstreamHttpError { status: u16, detail: String },

    #[error("backend rejected the request (code {code}): {message}")]
    UpstreamApplicationError { code: i64, message: String },

    #[error("backend response could not be understood: {0}")]
    MalformedResponse(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("record already exists: {0}")]
    DuplicateRecord(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("local store failure: {0}")]
    Storage(String),
}

impl KbError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "config_not_found",
            Self::ConfigInvalid(_) => "config_invalid",
            Self::UnsupportedAdapter(_) => "unsupported_adapter",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::UpstreamHttpError { .. } => "upstream_http_error",
            Self::UpstreamApplicationError { .. } => "upstream_application_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RecordNotFound(_) => "record_not_found",
            Self::DuplicateRecord(_) => "duplicate_record",
            Self::PermissionDenied(_) => "permission_denied",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Configuration problems are never worth another round trip.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigInvalid(_) | Self::UnsupportedAdapter(_)
        )
    }

    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnreachable(_)
                | Self::UpstreamHttpError { .. }
                | Self::UpstreamApplicationError { .. }
                | Self::MalformedResponse(_)
        )
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}
