//! Streaming state machine
//!
//! ```text
//! HEADER ──refill──▶ DATA ──data drained──▶ DATA_END ──"\r\n"──▶ HEADER
//!    │
//!    └──EOF──▶ FINAL ──"0\r\n"──▶ TRAILERS ──block drained──▶ DONE
//! ```
//!
//! Every piece of output keeps its own cursor, so a pull may stop at any byte
//! and the next pull resumes there.

use crate::config::ChunkedConfig;
use crate::error::{ChunkedError, Result};
use crate::framer::{ChunkHeader, StagingBuffer, drain_into};
use crate::producer::{Producer, TrailerProducer};
use crate::sig::SigningContext;
use crate::trailer::{self, CompiledTrailer, TrailerEntry, TrailerLimits};

use std::fmt;

const CRLF: &[u8] = b"\r\n";
const LAST_CHUNK: &[u8] = b"0\r\n";

#[derive(Debug)]
enum Phase {
    /// Next pull refills the staging buffer
    Header,
    /// Emitting the chunk header, then the staged data
    Data(ChunkHeader),
    /// Emitting the CRLF after chunk data
    DataEnd(usize),
    /// Emitting the last chunk
    Final(usize),
    /// Emitting the trailer block
    Trailers(usize),
    Done,
}

/// State of one chunked upload.
///
/// Owned by exactly one request. Dropping it wipes the staged data, the trailer
/// block and the signing key.
pub struct ChunkedRequestState {
    producer: Box<dyn Producer>,
    trailer_producer: Option<Box<dyn TrailerProducer>>,
    staging: StagingBuffer,
    phase: Phase,
    trailer: Option<CompiledTrailer>,
    trailer_generated: bool,
    limits: TrailerLimits,
    signing: Option<SigningContext>,
    bytes_sent: u64,
    error: bool,
}

impl fmt::Debug for ChunkedRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedRequestState")
            .field("phase", &self.phase)
            .field("bytes_sent", &self.bytes_sent)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl ChunkedRequestState {
    /// Creates a state with the default configuration.
    ///
    /// # Errors
    /// Returns [`ChunkedError::OutOfMemory`] if the staging buffer cannot be allocated.
    pub fn new(producer: Box<dyn Producer>, trailer_producer: Option<Box<dyn TrailerProducer>>) -> Result<Self> {
        Self::with_config(producer, trailer_producer, &ChunkedConfig::default())
    }

    /// # Errors
    /// Returns [`ChunkedError::OutOfMemory`] if the staging buffer cannot be allocated.
    pub fn with_config(
        producer: Box<dyn Producer>,
        trailer_producer: Option<Box<dyn TrailerProducer>>,
        config: &ChunkedConfig,
    ) -> Result<Self> {
        let staging = StagingBuffer::with_capacity(config.effective_chunk_buffer_size())?;
        Ok(Self {
            producer,
            trailer_producer,
            staging,
            phase: Phase::Header,
            trailer: None,
            trailer_generated: false,
            limits: TrailerLimits {
                max_entries: config.max_trailer_entries,
                max_size: config.max_trailer_size,
                policy: config.trailer_signature,
            },
            signing: None,
            bytes_sent: 0,
            error: false,
        })
    }

    /// Supplies the context for the trailer signature.
    ///
    /// Called by the signer once the seed signature of the request is known.
    /// The signing key is copied.
    ///
    /// # Errors
    /// Returns [`ChunkedError::InvalidSignatureInfo`] if an input is malformed
    /// or the trailer block has already been compiled.
    pub fn set_signature_info(
        &mut self,
        seed_signature: &str,
        timestamp: &str,
        credential_scope: &str,
        signing_key: &[u8; 32],
    ) -> Result {
        if self.trailer_generated {
            return Err(ChunkedError::InvalidSignatureInfo("trailer block already compiled"));
        }
        self.signing = Some(SigningContext::new(seed_signature, timestamp, credential_scope, signing_key)?);
        Ok(())
    }

    /// Writes up to `out.len()` bytes of the encoded body.
    ///
    /// Returns `0` once the whole body has been emitted (or if `out` is empty).
    ///
    /// # Errors
    /// Producer failures, contract violations, trailer compilation errors.
    /// The first error poisons the state: every later call returns [`ChunkedError::Aborted`].
    pub fn pull(&mut self, out: &mut [u8]) -> Result<usize> {
        if self.error {
            return Err(ChunkedError::Aborted);
        }
        match self.fill(out) {
            Ok(n) => {
                tracing::trace!(requested = out.len(), written = n, "pull");
                Ok(n)
            }
            Err(e) => {
                self.error = true;
                tracing::warn!(error = %e, bytes_sent = self.bytes_sent, "chunked upload aborted");
                Err(e)
            }
        }
    }

    fn fill(&mut self, out: &mut [u8]) -> Result<usize> {
        let mut written = 0;

        while written < out.len() {
            match &mut self.phase {
                Phase::Header => match self.staging.refill(self.producer.as_mut())? {
                    Some(header) => {
                        tracing::trace!(header = ?String::from_utf8_lossy(header.as_bytes()), "chunk");
                        self.phase = Phase::Data(header);
                    }
                    None => {
                        tracing::debug!(bytes_sent = self.bytes_sent, "end of payload");
                        self.generate_trailer()?;
                        self.phase = Phase::Final(0);
                    }
                },
                Phase::Data(header) => {
                    written += header.drain_into(&mut out[written..]);
                    if !header.is_exhausted() {
                        continue;
                    }

                    let n = self.staging.drain_into(&mut out[written..]);
                    written += n;
                    self.bytes_sent += n as u64;

                    if self.staging.is_exhausted() {
                        self.phase = Phase::DataEnd(0);
                    }
                }
                Phase::DataEnd(offset) => {
                    written += drain_into(CRLF, offset, &mut out[written..]);
                    if *offset == CRLF.len() {
                        self.phase = Phase::Header;
                    }
                }
                Phase::Final(offset) => {
                    written += drain_into(LAST_CHUNK, offset, &mut out[written..]);
                    if *offset == LAST_CHUNK.len() {
                        self.generate_trailer()?;
                        self.phase = Phase::Trailers(0);
                    }
                }
                Phase::Trailers(offset) => {
                    let wire = self.trailer.as_ref().map_or(CRLF, CompiledTrailer::wire);
                    written += drain_into(wire, offset, &mut out[written..]);
                    if *offset == wire.len() {
                        self.phase = Phase::Done;
                    }
                }
                Phase::Done => break,
            }
        }

        Ok(written)
    }

    /// Runs the trailer producer at most once per state, even on failure.
    fn generate_trailer(&mut self) -> Result {
        if self.trailer_generated {
            return Ok(());
        }
        self.trailer_generated = true;

        let compiled = match self.trailer_producer.as_mut() {
            Some(producer) => {
                let entries = producer
                    .produce_trailers(self.limits.max_entries)
                    .map_err(ChunkedError::TrailerProducer)?;
                trailer::compile(entries, self.limits, self.signing.as_ref())?
            }
            None => CompiledTrailer::empty(),
        };
        self.trailer = Some(compiled);
        Ok(())
    }

    /// Whether a pull has failed. Sticky.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Whether the whole body has been emitted
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(self.phase, Phase::Done)
    }

    #[must_use]
    pub fn has_trailer_producer(&self) -> bool {
        self.trailer_producer.is_some()
    }

    #[must_use]
    pub fn has_signature_info(&self) -> bool {
        self.signing.is_some()
    }

    /// Payload bytes handed to the transport, framing excluded
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    #[must_use]
    pub fn chunk_buffer_size(&self) -> usize {
        self.staging.capacity()
    }

    /// Trailer signature, available once the trailer block is compiled and a
    /// signing context was set
    #[must_use]
    pub fn trailer_signature(&self) -> Option<&str> {
        self.trailer.as_ref().and_then(CompiledTrailer::signature)
    }

    /// Compiled trailer entries
    #[must_use]
    pub fn trailers(&self) -> Option<&[TrailerEntry]> {
        self.trailer.as_ref().map(CompiledTrailer::entries)
    }
}

impl Drop for ChunkedRequestState {
    fn drop(&mut self) {
        self.staging.wipe();
        if let Some(trailer) = self.trailer.as_mut() {
            trailer.wipe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrailerSignaturePolicy;
    use crate::producer::{Produced, SegmentsProducer, StaticTrailers, from_fn, trailers_from_fn};

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn segments(parts: &[&'static [u8]]) -> Box<dyn Producer> {
        Box::new(SegmentsProducer::new(parts.iter().copied()))
    }

    fn drain(state: &mut ChunkedRequestState, step: usize) -> Vec<u8> {
        let mut body = Vec::new();
        let mut buf = vec![0u8; step];
        loop {
            let n = state.pull(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
        }
        body
    }

    #[test]
    fn hello() {
        let mut state = ChunkedRequestState::new(segments(&[b"hello"]), None).unwrap();
        assert_eq!(drain(&mut state, 4096), b"5\r\nhello\r\n0\r\n\r\n");
        assert!(state.is_done());
        assert_eq!(state.bytes_sent(), 5);
        assert_eq!(state.pull(&mut [0u8; 16]).unwrap(), 0);
    }

    #[test]
    fn abc_with_trailer() {
        let trailers = StaticTrailers::new(vec![TrailerEntry::new("x-checksum", "deadbeef")]);
        let mut state = ChunkedRequestState::new(segments(&[b"abc"]), Some(Box::new(trailers))).unwrap();
        assert_eq!(drain(&mut state, 4096), b"3\r\nabc\r\n0\r\nx-checksum:deadbeef\r\n\r\n");
        assert_eq!(state.trailers().unwrap().len(), 1);
    }

    #[test]
    fn empty_upload() {
        let mut state = ChunkedRequestState::new(segments(&[]), None).unwrap();
        assert_eq!(drain(&mut state, 1), b"0\r\n\r\n");
        assert_eq!(state.bytes_sent(), 0);
    }

    #[test]
    fn one_byte_pulls() {
        let trailers = StaticTrailers::new(vec![TrailerEntry::new("x-checksum", "deadbeef")]);
        let mut state = ChunkedRequestState::new(segments(&[b"hello", b"world!"]), Some(Box::new(trailers))).unwrap();
        assert_eq!(drain(&mut state, 1), b"5\r\nhello\r\n6\r\nworld!\r\n0\r\nx-checksum:deadbeef\r\n\r\n");
    }

    #[test]
    fn chunks_bounded_by_buffer_size() {
        let config = ChunkedConfig {
            chunk_buffer_size: 4,
            ..Default::default()
        };
        let mut state = ChunkedRequestState::with_config(segments(&[b"abcdefghij"]), None, &config).unwrap();
        assert_eq!(state.chunk_buffer_size(), 4);
        assert_eq!(drain(&mut state, 7), b"4\r\nabcd\r\n4\r\nefgh\r\n2\r\nij\r\n0\r\n\r\n");
    }

    #[test]
    fn error_is_sticky() {
        let mut calls = 0;
        let producer = from_fn(move |buf| {
            calls += 1;
            if calls == 1 {
                buf[..2].copy_from_slice(b"ok");
                Ok(Produced::Data(2))
            } else {
                Err("boom".into())
            }
        });
        let mut state = ChunkedRequestState::new(Box::new(producer), None).unwrap();
        let mut buf = [0u8; 64];

        let err = state.pull(&mut buf).unwrap_err();
        assert!(matches!(err, ChunkedError::Producer(_)));
        assert!(state.has_error());

        for _ in 0..3 {
            assert!(matches!(state.pull(&mut buf), Err(ChunkedError::Aborted)));
        }
    }

    #[test]
    fn trailer_producer_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let trailers = trailers_from_fn(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![TrailerEntry::new("x-a", "1")])
        });

        let mut state = ChunkedRequestState::new(segments(&[b"z"]), Some(Box::new(trailers))).unwrap();
        let body = drain(&mut state, 1);
        assert_eq!(body, b"1\r\nz\r\n0\r\nx-a:1\r\n\r\n");

        state.generate_trailer().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn trailer_producer_failure() {
        let trailers = trailers_from_fn(|_| Err("checksum unavailable".into()));
        let mut state = ChunkedRequestState::new(segments(&[b"z"]), Some(Box::new(trailers))).unwrap();
        let mut buf = [0u8; 64];
        let err = state.pull(&mut buf).unwrap_err();
        assert!(matches!(err, ChunkedError::TrailerProducer(_)));
        assert!(matches!(state.pull(&mut buf), Err(ChunkedError::Aborted)));
    }

    #[test]
    fn trailer_producer_gets_bound() {
        let config = ChunkedConfig {
            max_trailer_entries: 2,
            ..Default::default()
        };
        let trailers = trailers_from_fn(|max| Ok((0..=max).map(|i| TrailerEntry::new(format!("x-{i}"), "v")).collect()));
        let mut state = ChunkedRequestState::with_config(segments(&[]), Some(Box::new(trailers)), &config).unwrap();
        let err = state.pull(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, ChunkedError::TooManyTrailers(3, 2)));
    }

    #[test]
    fn signature_computed_whenever_context_present() {
        let trailers = StaticTrailers::new(vec![TrailerEntry::new("x-checksum", "deadbeef")]);
        let mut state = ChunkedRequestState::new(segments(&[b"abc"]), Some(Box::new(trailers))).unwrap();

        let seed = "f".repeat(64);
        let scope = "20240101/us-east-1/s3/aws4_request";
        let key = [9u8; 32];
        state.set_signature_info(&seed, "20240101T000000Z", scope, &key).unwrap();

        let body = drain(&mut state, 3);
        assert_eq!(body, b"3\r\nabc\r\n0\r\nx-checksum:deadbeef\r\n\r\n");

        let expected = SigningContext::new(&seed, "20240101T000000Z", scope, &key)
            .unwrap()
            .sign_trailer(b"x-checksum:deadbeef\n");
        assert_eq!(state.trailer_signature(), Some(expected.as_str()));

        let err = state.set_signature_info(&seed, "20240101T000000Z", scope, &key).unwrap_err();
        assert!(matches!(err, ChunkedError::InvalidSignatureInfo(_)));
    }

    #[test]
    fn transmit_policy_requires_context() {
        let config = ChunkedConfig {
            trailer_signature: TrailerSignaturePolicy::Transmit,
            ..Default::default()
        };
        let trailers = StaticTrailers::new(vec![TrailerEntry::new("x-checksum", "deadbeef")]);
        let mut state = ChunkedRequestState::with_config(segments(&[b"abc"]), Some(Box::new(trailers)), &config).unwrap();

        let err = state.pull(&mut [0u8; 64]).unwrap_err();
        assert!(matches!(err, ChunkedError::MissingSignatureContext));
        assert_eq!(err.status(), crate::Status::InternalError);
    }

    #[test]
    fn zero_capacity_pull_makes_no_progress() {
        let mut state = ChunkedRequestState::new(segments(&[b"abc"]), None).unwrap();
        assert_eq!(state.pull(&mut []).unwrap(), 0);
        assert!(!state.is_done());
        assert_eq!(drain(&mut state, 5), b"3\r\nabc\r\n0\r\n\r\n");
    }
}
