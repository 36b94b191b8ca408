//! Errors and status codes

use std::fmt;

pub type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T = (), E = ChunkedError> = std::result::Result<T, E>;

/// Errors raised while building or streaming a chunked upload body
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ChunkedError {
    /// The data producer failed
    #[error("ChunkedError: Producer: {}", .0)]
    Producer(StdError),

    /// The trailer producer failed
    #[error("ChunkedError: TrailerProducer: {}", .0)]
    TrailerProducer(StdError),

    /// The data producer reported a byte count that cannot be framed
    #[error("ChunkedError: ProducerContract: returned {returned} bytes for a buffer of {capacity}")]
    ProducerContract { returned: usize, capacity: usize },

    /// A previous pull failed and the body is poisoned
    #[error("ChunkedError: Aborted")]
    Aborted,

    /// Serialized trailer block exceeds its capacity
    #[error("ChunkedError: TrailersTooLarge: size {0} exceeds limit {1}")]
    TrailersTooLarge(usize, usize),

    /// Trailer producer returned more entries than it was allowed
    #[error("ChunkedError: TooManyTrailers: count {0} exceeds limit {1}")]
    TooManyTrailers(usize, usize),

    /// A trailer name or value cannot be put on the wire
    #[error("ChunkedError: InvalidTrailer: {name:?}")]
    InvalidTrailer { name: String },

    /// A trailer signature was required but no signing context was set
    #[error("ChunkedError: MissingSignatureContext")]
    MissingSignatureContext,

    /// Signature info supplied by the signer is malformed
    #[error("ChunkedError: InvalidSignatureInfo: {0}")]
    InvalidSignatureInfo(&'static str),

    /// The staging buffer could not be allocated
    #[error("ChunkedError: OutOfMemory: staging buffer of {0} bytes")]
    OutOfMemory(usize),

    /// No data producer was supplied
    #[error("ChunkedError: InvalidCallback")]
    InvalidCallback,

    /// The transport cannot send trailing headers
    #[error("ChunkedError: TrailersUnsupported")]
    TrailersUnsupported,
}

impl ChunkedError {
    /// Returns the status code reported to completion callbacks for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Producer(_)
            | Self::TrailerProducer(_)
            | Self::ProducerContract { .. }
            | Self::Aborted
            | Self::TrailersTooLarge(..)
            | Self::TooManyTrailers(..)
            | Self::InvalidTrailer { .. } => Status::ChunkEncodingError,
            Self::MissingSignatureContext | Self::InvalidSignatureInfo(_) => Status::InternalError,
            Self::OutOfMemory(_) => Status::OutOfMemory,
            Self::InvalidCallback => Status::InvalidChunkCallback,
            Self::TrailersUnsupported => Status::TrailingHeadersError,
        }
    }
}

/// Outcome of an upload request, as seen by a [`ResponseHandler`](crate::upload::ResponseHandler)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Status {
    Ok,
    InternalError,
    OutOfMemory,
    /// The producer aborted or the body could not be framed
    ChunkEncodingError,
    /// Trailers were requested but the transport cannot send them
    TrailingHeadersError,
    /// Missing producer or invalid request arguments
    InvalidChunkCallback,
    FailedToInitializeRequest,
    ConnectionFailed,
    AbortedByCallback,
    /// The server answered with a non-success status code
    ErrorResponse(http::StatusCode),
}

impl Status {
    #[must_use]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Whether a retry with a fresh producer may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        match self {
            Self::ChunkEncodingError | Self::ConnectionFailed => true,
            Self::ErrorResponse(code) => code.is_server_error(),
            _ => false,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::InternalError => f.write_str("InternalError"),
            Self::OutOfMemory => f.write_str("OutOfMemory"),
            Self::ChunkEncodingError => f.write_str("ChunkEncodingError"),
            Self::TrailingHeadersError => f.write_str("TrailingHeadersError"),
            Self::InvalidChunkCallback => f.write_str("InvalidChunkCallback"),
            Self::FailedToInitializeRequest => f.write_str("FailedToInitializeRequest"),
            Self::ConnectionFailed => f.write_str("ConnectionFailed"),
            Self::AbortedByCallback => f.write_str("AbortedByCallback"),
            Self::ErrorResponse(code) => write!(f, "ErrorResponse({})", code.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ChunkedError::Aborted.status(), Status::ChunkEncodingError);
        assert_eq!(ChunkedError::TrailersTooLarge(2000, 1024).status(), Status::ChunkEncodingError);
        assert_eq!(ChunkedError::MissingSignatureContext.status(), Status::InternalError);
        assert_eq!(ChunkedError::InvalidSignatureInfo("seed").status(), Status::InternalError);
        assert_eq!(ChunkedError::OutOfMemory(1).status(), Status::OutOfMemory);
        assert_eq!(ChunkedError::InvalidCallback.status(), Status::InvalidChunkCallback);
        assert_eq!(ChunkedError::TrailersUnsupported.status(), Status::TrailingHeadersError);
    }

    #[test]
    fn retryable() {
        assert!(Status::ChunkEncodingError.is_retryable());
        assert!(Status::ErrorResponse(http::StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(!Status::ErrorResponse(http::StatusCode::FORBIDDEN).is_retryable());
        assert!(!Status::InvalidChunkCallback.is_retryable());
        assert!(!Status::Ok.is_retryable());
    }

    #[test]
    fn display() {
        assert_eq!(ChunkedError::TrailersTooLarge(2000, 1024).to_string(), "ChunkedError: TrailersTooLarge: size 2000 exceeds limit 1024");
        assert_eq!(Status::ErrorResponse(http::StatusCode::NOT_FOUND).to_string(), "ErrorResponse(404)");
    }
}
