//! Checksum trailers
//!
//! [`checksum_source`] splits into a producer half, which hashes the payload as it is
//! streamed, and a trailer half, which turns the final digest into an
//! `x-amz-checksum-*` trailer.

use crate::crypto::{self, Checksum, Crc32, Crc32c, Crc64Nvme, Sha1, Sha256};
use crate::error::StdError;
use crate::producer::{Produced, Producer, TrailerProducer};
use crate::trailer::TrailerEntry;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Crc64Nvme,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Crc64Nvme => "CRC64NVME",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Header carrying the base64 digest
    #[must_use]
    pub fn trailer_name(self) -> &'static str {
        match self {
            Self::Crc32 => "x-amz-checksum-crc32",
            Self::Crc32c => "x-amz-checksum-crc32c",
            Self::Crc64Nvme => "x-amz-checksum-crc64nvme",
            Self::Sha1 => "x-amz-checksum-sha1",
            Self::Sha256 => "x-amz-checksum-sha256",
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            Self::Crc32 => Hasher::Crc32(Crc32::new()),
            Self::Crc32c => Hasher::Crc32c(Crc32c::new()),
            Self::Crc64Nvme => Hasher::Crc64Nvme(Crc64Nvme::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown checksum algorithm: {0:?}")]
pub struct ParseChecksumAlgorithmError(String);

impl FromStr for ChecksumAlgorithm {
    type Err = ParseChecksumAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let algorithm = match s.to_ascii_uppercase().as_str() {
            "CRC32" => Self::Crc32,
            "CRC32C" => Self::Crc32c,
            "CRC64NVME" => Self::Crc64Nvme,
            "SHA1" => Self::Sha1,
            "SHA256" => Self::Sha256,
            _ => return Err(ParseChecksumAlgorithmError(s.to_owned())),
        };
        Ok(algorithm)
    }
}

enum Hasher {
    Crc32(Crc32),
    Crc32c(Crc32c),
    Crc64Nvme(Crc64Nvme),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Crc32(h) => h.update(data),
            Self::Crc32c(h) => h.update(data),
            Self::Crc64Nvme(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    fn finalize_base64(self) -> String {
        match self {
            Self::Crc32(h) => crypto::base64(h.finalize()),
            Self::Crc32c(h) => crypto::base64(h.finalize()),
            Self::Crc64Nvme(h) => crypto::base64(h.finalize()),
            Self::Sha1(h) => crypto::base64(h.finalize()),
            Self::Sha256(h) => crypto::base64(h.finalize()),
        }
    }
}

type Shared = Arc<Mutex<Option<Hasher>>>;

/// Forwards the inner producer's data and hashes it
pub struct ChecksumProducer<P> {
    inner: P,
    hasher: Shared,
}

/// Emits the digest of everything [`ChecksumProducer`] forwarded
pub struct ChecksumTrailer {
    algorithm: ChecksumAlgorithm,
    hasher: Shared,
}

pub fn checksum_source<P: Producer>(producer: P, algorithm: ChecksumAlgorithm) -> (ChecksumProducer<P>, ChecksumTrailer) {
    let hasher = Arc::new(Mutex::new(Some(algorithm.hasher())));
    let trailer = ChecksumTrailer {
        algorithm,
        hasher: Arc::clone(&hasher),
    };
    (ChecksumProducer { inner: producer, hasher }, trailer)
}

impl<P: Producer> Producer for ChecksumProducer<P> {
    fn produce(&mut self, buf: &mut [u8]) -> Result<Produced, StdError> {
        let produced = self.inner.produce(buf)?;
        if let Produced::Data(n) = produced
            && let Some(data) = buf.get(..n)
        {
            let mut guard = self.hasher.lock().map_err(|_| "checksum state poisoned")?;
            match guard.as_mut() {
                Some(hasher) => hasher.update(data),
                None => return Err("checksum already finalized".into()),
            }
        }
        Ok(produced)
    }
}

impl TrailerProducer for ChecksumTrailer {
    fn produce_trailers(&mut self, max_entries: usize) -> Result<Vec<TrailerEntry>, StdError> {
        if max_entries == 0 {
            return Err("no room for checksum trailer".into());
        }
        let hasher = self
            .hasher
            .lock()
            .map_err(|_| "checksum state poisoned")?
            .take()
            .ok_or("checksum already finalized")?;
        let value = hasher.finalize_base64();
        tracing::debug!(algorithm = %self.algorithm, %value, "checksum trailer");
        Ok(vec![TrailerEntry::new(self.algorithm.trailer_name(), value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::SegmentsProducer;

    fn run(algorithm: ChecksumAlgorithm, data: &'static [u8]) -> TrailerEntry {
        let (mut producer, mut trailer) = checksum_source(SegmentsProducer::new([data]), algorithm);
        let mut buf = vec![0u8; 1000];
        while let Produced::Data(_) = producer.produce(&mut buf).unwrap() {}
        trailer.produce_trailers(1).unwrap().remove(0)
    }

    #[test]
    fn crc32c_of_aws_example_object() {
        // 66560 bytes of 'a': https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-streaming-trailers.html
        let data: &'static [u8] = Box::leak(vec![b'a'; 66560].into_boxed_slice());
        let entry = run(ChecksumAlgorithm::Crc32c, data);
        assert_eq!(entry.name(), "x-amz-checksum-crc32c");
        assert_eq!(entry.value(), "sOO8/Q==");
    }

    #[test]
    fn sha256_of_empty_payload() {
        let entry = run(ChecksumAlgorithm::Sha256, b"");
        assert_eq!(entry.name(), "x-amz-checksum-sha256");
        assert_eq!(entry.value(), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn crc32_check_value() {
        let entry = run(ChecksumAlgorithm::Crc32, b"123456789");
        assert_eq!(entry.value(), crypto::base64(0xcbf4_3926_u32.to_be_bytes()));
    }

    #[test]
    fn finalized_once() {
        let (_producer, mut trailer) = checksum_source(SegmentsProducer::default(), ChecksumAlgorithm::Sha1);
        assert!(trailer.produce_trailers(1).is_ok());
        assert!(trailer.produce_trailers(1).is_err());
    }

    #[test]
    fn parse_algorithm() {
        assert_eq!("crc64nvme".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Crc64Nvme);
        assert_eq!("SHA256".parse::<ChecksumAlgorithm>().unwrap(), ChecksumAlgorithm::Sha256);
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
        assert_eq!(ChecksumAlgorithm::Crc32c.to_string(), "CRC32C");
    }
}
