//! Streaming aws-chunked upload engine
//!
//! `s3s-chunked` encodes an upload body of unknown length as HTTP/1.1 chunked
//! transfer coding, pulling data from a [`Producer`](producer::Producer) and
//! finishing with a block of trailing headers. When the request was signed with
//! `STREAMING-UNSIGNED-PAYLOAD-TRAILER`, the trailer block can be covered by an
//! `AWS4-HMAC-SHA256-TRAILER` signature chained from the seed signature.
//!
//! # Wire format
//!
//! ```text
//! <hex-size>\r\n<data>\r\n      repeated, one per non-empty producer call
//! 0\r\n
//! <name>:<value>\r\n            repeated, one per trailer entry
//! \r\n
//! ```
//!
//! # Example
//!
//! ```
//! use s3s_chunked::ChunkedRequestState;
//! use s3s_chunked::producer::{SegmentsProducer, StaticTrailers};
//! use s3s_chunked::trailer::TrailerEntry;
//!
//! let producer = SegmentsProducer::new([&b"hello"[..]]);
//! let trailers = StaticTrailers::new(vec![TrailerEntry::new("x-amz-checksum-crc32", "NhCmhg==")]);
//! let mut state = ChunkedRequestState::new(Box::new(producer), Some(Box::new(trailers))).unwrap();
//!
//! let mut body = Vec::new();
//! let mut buf = [0u8; 7];
//! loop {
//!     let n = state.pull(&mut buf).unwrap();
//!     if n == 0 {
//!         break;
//!     }
//!     body.extend_from_slice(&buf[..n]);
//! }
//! assert_eq!(body, b"5\r\nhello\r\n0\r\nx-amz-checksum-crc32:NhCmhg==\r\n\r\n");
//! ```
//!
//! # Modules
//!
//! - [`producer`]: Data and trailer producers
//! - [`state`]: The streaming state machine
//! - [`trailer`]: Trailer entries and the compiled block
//! - [`sig`]: Trailer signatures
//! - [`checksum`]: `x-amz-checksum-*` trailers
//! - [`body`]: `Read`, `Stream` and `http_body::Body` adapters
//! - [`upload`]: Chunked PUT and upload-part requests
//! - [`config`]: Engine configuration with hot-reload support
//! - [`crypto`]: Hash and HMAC primitives

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::bool_assert_comparison,  // I don't like `assert!(!expression)`. It's very misleading.
    clippy::multiple_crate_versions, // Sometimes not fixable
    clippy::module_name_repetitions,
    clippy::single_match_else,
    clippy::missing_errors_doc,
)]

mod error;
mod framer;

pub mod body;
pub mod checksum;
pub mod config;
pub mod crypto;
pub mod producer;
pub mod sig;
pub mod state;
pub mod trailer;
pub mod upload;

pub use self::error::*;

pub use self::body::ChunkedBody;
pub use self::state::ChunkedRequestState;
