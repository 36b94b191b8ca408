//! Data and trailer producers

use crate::error::StdError;
use crate::trailer::TrailerEntry;

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes};

/// What a [`Producer`] put into the offered buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Produced {
    /// `n` bytes were written to the front of the buffer. `n` must be in `1..=buf.len()`.
    Data(usize),
    /// End of stream
    Eof,
}

/// Supplies the upload payload, one buffer at a time.
///
/// Returning an error aborts the upload. It is the only cancellation channel.
pub trait Producer: Send {
    fn produce(&mut self, buf: &mut [u8]) -> Result<Produced, StdError>;
}

/// Supplies trailing headers once the payload has been fully produced.
pub trait TrailerProducer: Send {
    /// Returns at most `max_entries` entries.
    fn produce_trailers(&mut self, max_entries: usize) -> Result<Vec<TrailerEntry>, StdError>;
}

/// Creates a [`Producer`] from a closure.
pub fn from_fn<F>(f: F) -> FnProducer<F>
where
    F: FnMut(&mut [u8]) -> Result<Produced, StdError> + Send,
{
    FnProducer(f)
}

/// Creates a [`TrailerProducer`] from a closure.
pub fn trailers_from_fn<F>(f: F) -> FnTrailerProducer<F>
where
    F: FnMut(usize) -> Result<Vec<TrailerEntry>, StdError> + Send,
{
    FnTrailerProducer(f)
}

/// See [`from_fn`]
pub struct FnProducer<F>(F);

impl<F> Producer for FnProducer<F>
where
    F: FnMut(&mut [u8]) -> Result<Produced, StdError> + Send,
{
    fn produce(&mut self, buf: &mut [u8]) -> Result<Produced, StdError> {
        (self.0)(buf)
    }
}

/// See [`trailers_from_fn`]
pub struct FnTrailerProducer<F>(F);

impl<F> TrailerProducer for FnTrailerProducer<F>
where
    F: FnMut(usize) -> Result<Vec<TrailerEntry>, StdError> + Send,
{
    fn produce_trailers(&mut self, max_entries: usize) -> Result<Vec<TrailerEntry>, StdError> {
        (self.0)(max_entries)
    }
}

/// Reads the payload from an [`io::Read`]
#[derive(Debug)]
pub struct ReaderProducer<R> {
    reader: R,
}

impl<R> ReaderProducer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: io::Read + Send> Producer for ReaderProducer<R> {
    fn produce(&mut self, buf: &mut [u8]) -> Result<Produced, StdError> {
        loop {
            match self.reader.read(buf) {
                Ok(0) => return Ok(Produced::Eof),
                Ok(n) => return Ok(Produced::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(Box::new(e)),
            }
        }
    }
}

/// Replays a sequence of byte segments.
///
/// A segment larger than the offered buffer is split across calls.
#[derive(Debug, Default)]
pub struct SegmentsProducer {
    segments: VecDeque<Bytes>,
}

impl SegmentsProducer {
    pub fn new<I>(segments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let segments = segments.into_iter().map(Into::into).filter(|b: &Bytes| !b.is_empty()).collect();
        Self { segments }
    }
}

impl Producer for SegmentsProducer {
    fn produce(&mut self, buf: &mut [u8]) -> Result<Produced, StdError> {
        let Some(front) = self.segments.front_mut() else {
            return Ok(Produced::Eof);
        };
        let n = front.len().min(buf.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.advance(n);
        if front.is_empty() {
            self.segments.pop_front();
        }
        Ok(Produced::Data(n))
    }
}

/// Returns a fixed list of trailers.
#[derive(Debug, Clone, Default)]
pub struct StaticTrailers(Vec<TrailerEntry>);

impl StaticTrailers {
    #[must_use]
    pub fn new(entries: Vec<TrailerEntry>) -> Self {
        Self(entries)
    }
}

impl TrailerProducer for StaticTrailers {
    fn produce_trailers(&mut self, _max_entries: usize) -> Result<Vec<TrailerEntry>, StdError> {
        Ok(std::mem::take(&mut self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_producer() {
        let mut p = ReaderProducer::new(&b"hello"[..]);
        let mut buf = [0u8; 3];
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(3));
        assert_eq!(&buf, b"hel");
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(2));
        assert_eq!(&buf[..2], b"lo");
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Eof);
    }

    #[test]
    fn segments_split_across_calls() {
        let mut p = SegmentsProducer::new([&b"abcdef"[..], b"", b"g"]);
        let mut buf = [0u8; 4];
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(1));
        assert_eq!(&buf[..1], b"g");
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Eof);
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Eof);
    }

    #[test]
    fn closures() {
        let mut calls = 0;
        let mut p = from_fn(move |buf| {
            calls += 1;
            if calls > 1 {
                return Ok(Produced::Eof);
            }
            buf[0] = b'x';
            Ok(Produced::Data(1))
        });
        let mut buf = [0u8; 8];
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Data(1));
        assert_eq!(p.produce(&mut buf).unwrap(), Produced::Eof);

        let mut t = trailers_from_fn(|max| Ok(vec![TrailerEntry::new("x-max", max.to_string())]));
        let entries = t.produce_trailers(3).unwrap();
        assert_eq!(entries[0].value(), "3");
    }

    #[test]
    fn static_trailers_taken_once() {
        let mut t = StaticTrailers::new(vec![TrailerEntry::new("a", "1")]);
        assert_eq!(t.produce_trailers(10).unwrap().len(), 1);
        assert!(t.produce_trailers(10).unwrap().is_empty());
    }
}
