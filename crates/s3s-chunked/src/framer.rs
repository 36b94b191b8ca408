//! Chunk staging and framing

use crate::error::{ChunkedError, Result};
use crate::producer::{Produced, Producer};

use arrayvec::ArrayVec;
use zeroize::Zeroize;

/// `usize` in hex plus CRLF
const MAX_CHUNK_HEADER_LEN: usize = 2 * std::mem::size_of::<usize>() + 2;

/// Copies `src[*offset..]` into `out` as far as it fits and advances `offset`.
pub(crate) fn drain_into(src: &[u8], offset: &mut usize, out: &mut [u8]) -> usize {
    let remaining = &src[*offset..];
    let n = remaining.len().min(out.len());
    out[..n].copy_from_slice(&remaining[..n]);
    *offset += n;
    n
}

/// `<hex-size>\r\n` with a read cursor
#[derive(Debug)]
pub(crate) struct ChunkHeader {
    text: ArrayVec<u8, MAX_CHUNK_HEADER_LEN>,
    offset: usize,
}

impl ChunkHeader {
    /// Lowercase hex without leading zeros
    pub fn new(size: usize) -> Self {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        let digits = (usize::BITS - size.leading_zeros()).div_ceil(4).max(1);
        let mut text = ArrayVec::new();
        for i in (0..digits).rev() {
            let nibble = (size >> (i * 4)) & 0xf;
            text.push(HEX[nibble]);
        }
        text.push(b'\r');
        text.push(b'\n');

        Self { text, offset: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.text
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.text.len()
    }

    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        drain_into(&self.text, &mut self.offset, out)
    }
}

/// Fixed-capacity staging buffer.
///
/// Invariant: `offset <= used <= buf.len()`
pub(crate) struct StagingBuffer {
    buf: Vec<u8>,
    used: usize,
    offset: usize,
}

impl StagingBuffer {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity).map_err(|_| ChunkedError::OutOfMemory(capacity))?;
        buf.resize(capacity, 0);
        Ok(Self { buf, used: 0, offset: 0 })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset >= self.used
    }

    /// Offers the whole buffer to the producer.
    ///
    /// Returns the header of the new chunk, or `None` at end of stream.
    pub fn refill(&mut self, producer: &mut dyn Producer) -> Result<Option<ChunkHeader>> {
        let capacity = self.buf.len();
        match producer.produce(&mut self.buf).map_err(ChunkedError::Producer)? {
            Produced::Eof => Ok(None),
            Produced::Data(n) if n == 0 || n > capacity => Err(ChunkedError::ProducerContract { returned: n, capacity }),
            Produced::Data(n) => {
                self.used = n;
                self.offset = 0;
                Ok(Some(ChunkHeader::new(n)))
            }
        }
    }

    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        drain_into(&self.buf[..self.used], &mut self.offset, out)
    }

    pub fn wipe(&mut self) {
        self.buf.zeroize();
        self.used = 0;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{SegmentsProducer, from_fn};

    #[test]
    fn header_hex() {
        assert_eq!(ChunkHeader::new(0).as_bytes(), b"0\r\n");
        assert_eq!(ChunkHeader::new(5).as_bytes(), b"5\r\n");
        assert_eq!(ChunkHeader::new(0xf).as_bytes(), b"f\r\n");
        assert_eq!(ChunkHeader::new(0x10).as_bytes(), b"10\r\n");
        assert_eq!(ChunkHeader::new(0x10000).as_bytes(), b"10000\r\n");
        assert_eq!(ChunkHeader::new(0xabc).as_bytes(), b"abc\r\n");
        assert_eq!(ChunkHeader::new(usize::MAX).as_bytes().len(), MAX_CHUNK_HEADER_LEN);
    }

    #[test]
    fn header_resumes_byte_by_byte() {
        let mut header = ChunkHeader::new(0x400);
        let mut out = Vec::new();
        while !header.is_exhausted() {
            let mut one = [0u8; 1];
            assert_eq!(header.drain_into(&mut one), 1);
            out.push(one[0]);
        }
        assert_eq!(out, b"400\r\n");
        assert_eq!(header.drain_into(&mut [0u8; 4]), 0);
    }

    #[test]
    fn refill_and_drain() {
        let mut staging = StagingBuffer::with_capacity(4).unwrap();
        let mut producer = SegmentsProducer::new([&b"abcdef"[..]]);

        let header = staging.refill(&mut producer).unwrap().unwrap();
        assert_eq!(header.as_bytes(), b"4\r\n");

        let mut out = [0u8; 3];
        assert_eq!(staging.drain_into(&mut out), 3);
        assert!(!staging.is_exhausted());
        assert_eq!(staging.drain_into(&mut out), 1);
        assert!(staging.is_exhausted());

        let header = staging.refill(&mut producer).unwrap().unwrap();
        assert_eq!(header.as_bytes(), b"2\r\n");
        assert_eq!(staging.drain_into(&mut out), 2);
        assert_eq!(&out[..2], b"ef");

        assert!(staging.refill(&mut producer).unwrap().is_none());
    }

    #[test]
    fn producer_contract() {
        let mut staging = StagingBuffer::with_capacity(8).unwrap();

        let mut zero = from_fn(|_| Ok(Produced::Data(0)));
        let err = staging.refill(&mut zero).unwrap_err();
        assert!(matches!(err, ChunkedError::ProducerContract { returned: 0, capacity: 8 }));

        let mut overflow = from_fn(|_| Ok(Produced::Data(9)));
        let err = staging.refill(&mut overflow).unwrap_err();
        assert!(matches!(err, ChunkedError::ProducerContract { returned: 9, capacity: 8 }));
    }

    #[test]
    fn producer_failure() {
        let mut staging = StagingBuffer::with_capacity(8).unwrap();
        let mut failing = from_fn(|_| Err("disk on fire".into()));
        let err = staging.refill(&mut failing).unwrap_err();
        assert!(matches!(err, ChunkedError::Producer(_)));
    }
}
