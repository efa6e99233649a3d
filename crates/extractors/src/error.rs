use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("unexpected response schema: {0}")]
    UnexpectedSchema(String),
    #[error("login required")]
    LoginRequired,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("login expired")]
    LoginExpired,
    #[error("content unavailable: {0}")]
    ContentUnavailable(String),
    #[error("no streams found")]
    NoStreamsFound,
    #[error("search not supported")]
    SearchNotSupported,
    #[error("other: {0}")]
    Other(String),
}

impl ExtractorError {
    /// Reason string attached to a leaf's `skip_reason` when extraction of
    /// that leaf fails non-fatally.
    pub fn skip_reason(&self) -> String {
        self.to_string()
    }
}
