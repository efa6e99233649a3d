use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum PenguinError {
    #[error("download cancelled")]
    Cancelled,

    #[error("no protocol handler for `{url}`")]
    IncompatibleStream { url: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("manifest error: {reason}")]
    Manifest { reason: String },

    #[error("segment fetch error: {reason}")]
    SegmentFetch { reason: String, retryable: bool },

    #[error("state file error: {reason}")]
    State { reason: String },

    #[error("multiplexer exited with {status}")]
    MuxFailed { status: String },

    #[error("decryption tool exited with {status}")]
    DecryptFailed { status: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PenguinError {
    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::Manifest {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::IncompatibleStream { .. } => false,
            Self::HttpStatus { status, .. } => retryable_status(*status),
            Self::SegmentFetch { retryable, .. } => *retryable,
            Self::Network { .. } | Self::Io { .. } => true,
            _ => false,
        }
    }
}

/// Status codes worth another attempt. 403/404 are included: CDNs behind
/// these sites intermittently return both for segments that exist.
pub fn retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 502 | 503 | 504 | 403 | 404)
}
