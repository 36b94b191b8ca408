//! Trailer block compilation

use crate::config::TrailerSignaturePolicy;
use crate::error::{ChunkedError, Result};
use crate::sig::{self, SigningContext};

use http::{HeaderName, HeaderValue};

pub const TRAILER_SIGNATURE_HEADER: &str = "x-amz-trailer-signature";

const CRLF: &[u8] = b"\r\n";

/// A trailing header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailerEntry {
    name: String,
    value: String,
}

impl TrailerEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

/// The serialized trailer block, built once per upload
#[derive(Debug, Clone)]
pub struct CompiledTrailer {
    /// `(name ":" value CRLF)* CRLF`
    wire: Vec<u8>,
    entries: Vec<TrailerEntry>,
    signature: Option<String>,
}

impl CompiledTrailer {
    /// The block sent when no trailer producer was supplied: a lone CRLF.
    pub(crate) fn empty() -> Self {
        Self {
            wire: CRLF.to_vec(),
            entries: Vec::new(),
            signature: None,
        }
    }

    #[must_use]
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Entries with normalized (lowercase) names, in producer order
    #[must_use]
    pub fn entries(&self) -> &[TrailerEntry] {
        &self.entries
    }

    /// Trailer signature, if a signing context was present
    #[must_use]
    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub(crate) fn wipe(&mut self) {
        use zeroize::Zeroize;
        self.wire.zeroize();
        if let Some(sig) = self.signature.as_mut() {
            sig.zeroize();
        }
    }
}

/// Bounds applied while compiling
#[derive(Debug, Clone, Copy)]
pub(crate) struct TrailerLimits {
    pub max_entries: usize,
    pub max_size: usize,
    pub policy: TrailerSignaturePolicy,
}

/// Bounded output buffer. Overflow is an error, never a truncation.
struct Block {
    buf: Vec<u8>,
    limit: usize,
}

impl Block {
    fn push(&mut self, parts: &[&[u8]]) -> Result {
        let len = parts.iter().fold(self.buf.len(), |acc, p| acc.saturating_add(p.len()));
        if len > self.limit {
            return Err(ChunkedError::TrailersTooLarge(len, self.limit));
        }
        for p in parts {
            self.buf.extend_from_slice(p);
        }
        Ok(())
    }
}

fn normalize(entry: TrailerEntry) -> Result<TrailerEntry> {
    let invalid = || ChunkedError::InvalidTrailer {
        name: entry.name.clone(),
    };

    let name = HeaderName::from_bytes(entry.name.as_bytes()).map_err(|_| invalid())?;
    if name.as_str() == TRAILER_SIGNATURE_HEADER {
        return Err(invalid());
    }
    if HeaderValue::from_str(&entry.value).is_err() {
        return Err(invalid());
    }

    Ok(TrailerEntry {
        name: name.as_str().to_owned(),
        value: entry.value,
    })
}

/// Serializes `entries` into the wire block and signs them when a context is present.
///
/// The canonical string `name:value\n...` is only hashed, never transmitted.
pub(crate) fn compile(entries: Vec<TrailerEntry>, limits: TrailerLimits, ctx: Option<&SigningContext>) -> Result<CompiledTrailer> {
    if entries.len() > limits.max_entries {
        return Err(ChunkedError::TooManyTrailers(entries.len(), limits.max_entries));
    }

    let entries = entries.into_iter().map(normalize).collect::<Result<Vec<_>>>()?;

    let mut wire = Block {
        buf: Vec::new(),
        limit: limits.max_size,
    };
    let mut canonical = Vec::new();

    for e in &entries {
        wire.push(&[e.name.as_bytes(), b":", e.value.as_bytes(), CRLF])?;

        canonical.extend_from_slice(e.name.as_bytes());
        canonical.push(b':');
        canonical.extend_from_slice(e.value.as_bytes());
        canonical.push(b'\n');
    }

    let signature = match (ctx, limits.policy) {
        (None, TrailerSignaturePolicy::Omit) => None,
        (ctx, _) => Some(sig::calculate_trailer_signature(ctx, &canonical)?),
    };

    if let (Some(sig), TrailerSignaturePolicy::Transmit) = (signature.as_deref(), limits.policy) {
        wire.push(&[TRAILER_SIGNATURE_HEADER.as_bytes(), b":", sig.as_bytes(), CRLF])?;
    }

    wire.push(&[CRLF])?;

    tracing::debug!(
        entries = entries.len(),
        size = wire.buf.len(),
        signed = signature.is_some(),
        "compiled trailer block"
    );

    Ok(CompiledTrailer {
        wire: wire.buf,
        entries,
        signature,
    })
}
