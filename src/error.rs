use thiserror::Error;

/// Why a retrieval produced no usable context.
///
/// Every variant degrades to "no context injected"; the variants only
/// differ in how loudly they are reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    #[error("retrieval is not configured (missing api key or dataset id)")]
    Unconfigured,
    #[error("network error: {0}")]
    Network(String),
    #[error("retrieval backend returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("retrieval backend rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("retrieval timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("no relevant context found")]
    EmptyResult,
}

/// Telemetry class of a [`RetrievalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unconfigured,
    NetworkError,
    HttpError(u16),
    Timeout,
    EmptyResult,
}

/// Something the host may show the user after a failed retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalNotice {
    /// Backend unreachable or unhappy; retried on the next user turn.
    Warning(String),
    /// The fetch ran out of time; the user may want a larger budget.
    TimedOut { timeout_ms: u64 },
}

impl RetrievalError {
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Unconfigured => FailureKind::Unconfigured,
            Self::Network(_) | Self::Rejected { .. } | Self::InvalidResponse(_) => {
                FailureKind::NetworkError
            }
            Self::HttpStatus { status, .. } => FailureKind::HttpError(*status),
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::EmptyResult => FailureKind::EmptyResult,
        }
    }

    /// User-facing notice, or `None` for the silent classes.
    #[must_use]
    pub fn notice(&self) -> Option<RetrievalNotice> {
        match self {
            Self::Unconfigured | Self::EmptyResult => None,
            Self::Timeout { timeout_ms } => Some(RetrievalNotice::TimedOut {
                timeout_ms: *timeout_ms,
            }),
            Self::Network(_)
            | Self::HttpStatus { .. }
            | Self::Rejected { .. }
            | Self::InvalidResponse(_) => {
                Some(RetrievalNotice::Warning(format!("Lore retrieval failed: {}", self)))
            }
        }
    }

    /// Emits the failure at the level its class deserves.
    pub fn log(&self, query: &str) {
        match self.kind() {
            FailureKind::Unconfigured => {
                tracing::debug!(query, "retrieval skipped: not configured");
            }
            FailureKind::EmptyResult => {
                tracing::info!(query, "retrieval returned no relevant chunks");
            }
            FailureKind::Timeout => {
                tracing::warn!(query, error = %self, "retrieval timed out; consider raising timeout_ms");
            }
            FailureKind::NetworkError | FailureKind::HttpError(_) => {
                tracing::warn!(query, error = %self, "retrieval failed");
            }
        }
    }
}

impl From<reqwest::Error> for RetrievalError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl std::fmt::Display for RetrievalNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning(message) => write!(f, "{}", message),
            Self::TimedOut { timeout_ms } => write!(
                f,
                "Lore retrieval timed out after {}ms (raise timeout_ms to wait longer)",
                timeout_ms
            ),
        }
    }
}
