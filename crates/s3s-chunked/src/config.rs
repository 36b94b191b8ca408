//! Chunked upload configuration
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use s3s_chunked::config::{ChunkedConfig, ChunkedConfigProvider, HotReloadConfigProvider, TrailerSignaturePolicy};
//!
//! let provider = Arc::new(HotReloadConfigProvider::default());
//! assert_eq!(provider.snapshot().chunk_buffer_size, 64 * 1024);
//!
//! let mut config = ChunkedConfig::default();
//! config.trailer_signature = TrailerSignaturePolicy::Transmit;
//! provider.update(Arc::new(config));
//! assert_eq!(provider.snapshot().trailer_signature, TrailerSignaturePolicy::Transmit);
//! ```

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Default staging buffer capacity
pub const DEFAULT_CHUNK_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum number of user metadata entries on a request.
///
/// 2 KiB of metadata divided by the shortest possible entry, `x-amz-meta-nv`.
pub const MAX_METADATA_COUNT: usize = 2048 / "x-amz-meta-nv".len();

/// Default serialized trailer block capacity
pub const DEFAULT_MAX_TRAILER_SIZE: usize = 1024;

const DEFAULT_BODY_FRAME_SIZE: usize = 16 * 1024;

/// Returns a snapshot of the current configuration.
pub trait ChunkedConfigProvider: Send + Sync + 'static {
    fn snapshot(&self) -> Arc<ChunkedConfig>;
}

/// Whether a computed trailer signature goes on the wire
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailerSignaturePolicy {
    /// Compute the signature when a signing context is present, but do not send it.
    ///
    /// This is the `STREAMING-UNSIGNED-PAYLOAD-TRAILER` mode.
    #[default]
    Omit,

    /// Append `x-amz-trailer-signature` to the trailer block.
    ///
    /// A missing signing context fails the upload.
    Transmit,
}

/// Chunked upload configuration.
///
/// Snapshotted once per request; updates never affect an upload in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ChunkedConfig {
    /// Staging buffer capacity in bytes. Every data chunk is at most this large.
    ///
    /// `0` selects the default.
    ///
    /// Default: 64 KiB
    pub chunk_buffer_size: usize,

    /// Maximum number of entries a trailer producer may return.
    ///
    /// Default: [`MAX_METADATA_COUNT`]
    pub max_trailer_entries: usize,

    /// Capacity of the serialized trailer block in bytes, including the closing CRLF.
    ///
    /// Default: 1 KiB
    pub max_trailer_size: usize,

    /// Trailer signature policy.
    ///
    /// Default: [`TrailerSignaturePolicy::Omit`]
    pub trailer_signature: TrailerSignaturePolicy,

    /// Bytes pulled per frame by [`ChunkedBody`](crate::body::ChunkedBody).
    ///
    /// Default: 16 KiB
    pub body_frame_size: usize,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_buffer_size: DEFAULT_CHUNK_BUFFER_SIZE,
            max_trailer_entries: MAX_METADATA_COUNT,
            max_trailer_size: DEFAULT_MAX_TRAILER_SIZE,
            trailer_signature: TrailerSignaturePolicy::Omit,
            body_frame_size: DEFAULT_BODY_FRAME_SIZE,
        }
    }
}

impl ChunkedConfig {
    pub(crate) fn effective_chunk_buffer_size(&self) -> usize {
        if self.chunk_buffer_size == 0 {
            DEFAULT_CHUNK_BUFFER_SIZE
        } else {
            self.chunk_buffer_size
        }
    }

    pub(crate) fn effective_body_frame_size(&self) -> usize {
        if self.body_frame_size == 0 {
            DEFAULT_BODY_FRAME_SIZE
        } else {
            self.body_frame_size
        }
    }
}

/// Immutable configuration
#[derive(Debug)]
pub struct StaticConfigProvider {
    inner: Arc<ChunkedConfig>,
}

impl StaticConfigProvider {
    #[must_use]
    pub fn new(config: Arc<ChunkedConfig>) -> Self {
        Self { inner: config }
    }
}

impl Default for StaticConfigProvider {
    fn default() -> Self {
        Self::new(Arc::new(ChunkedConfig::default()))
    }
}

impl ChunkedConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> Arc<ChunkedConfig> {
        Arc::clone(&self.inner)
    }
}

/// Runtime-updatable configuration backed by `ArcSwap`
#[derive(Debug)]
pub struct HotReloadConfigProvider {
    inner: ArcSwap<ChunkedConfig>,
}

impl HotReloadConfigProvider {
    #[must_use]
    pub fn new(config: Arc<ChunkedConfig>) -> Self {
        Self {
            inner: ArcSwap::from(config),
        }
    }

    /// Replaces the whole configuration atomically.
    pub fn update(&self, config: Arc<ChunkedConfig>) {
        self.inner.store(config);
    }
}

impl Default for HotReloadConfigProvider {
    fn default() -> Self {
        Self::new(Arc::new(ChunkedConfig::default()))
    }
}

impl ChunkedConfigProvider for HotReloadConfigProvider {
    fn snapshot(&self) -> Arc<ChunkedConfig> {
        self.inner.load_full()
    }
}
