use thiserror::Error;

/// Failures reported by an external collaborator.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        BackendError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    /// The grade has no ledger record to attach a conversion to yet.
    #[error("subject {subject_id} has no ledger record; create one before applying a conversion")]
    NotPersistable { subject_id: String },
    #[error(transparent)]
    Upstream(#[from] BackendError),
    #[error("conversion rule {rule_code} is malformed: {reason}")]
    MalformedRule { rule_code: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
