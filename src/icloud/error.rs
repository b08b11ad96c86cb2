use thiserror::Error;

#[derive(Error, Debug)]
pub enum ICloudError {
    #[error("API response error: {reason} (code: {code})")]
    Api { reason: String, code: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Photo library not finished indexing")]
    IndexingNotFinished,

    #[error("Account has no {0} web service")]
    MissingService(&'static str),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ICloudError {
    /// Rate limiting, server errors and network failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Request(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}
