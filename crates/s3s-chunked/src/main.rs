use s3s_chunked::ChunkedRequestState;
use s3s_chunked::checksum::{ChecksumAlgorithm, checksum_source};
use s3s_chunked::config::{ChunkedConfig, TrailerSignaturePolicy};
use s3s_chunked::producer::{Producer, ReaderProducer, TrailerProducer};
use s3s_chunked::sig::{CredentialScope, derive_signing_key};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

/// Encodes a file as an aws-chunked body with trailing headers
#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Input file. Reads stdin if omitted.
    input: Option<PathBuf>,

    /// Output file. Writes stdout if omitted.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Largest chunk in bytes
    #[arg(long, default_value_t = 65536)]
    chunk_size: usize,

    /// Bytes requested per pull
    #[arg(long, default_value_t = 16384)]
    pull_size: usize,

    /// Checksum trailer: crc32, crc32c, crc64nvme, sha1, sha256
    #[arg(long)]
    checksum: Option<ChecksumAlgorithm>,

    /// Seed signature of the request, enables the trailer signature
    #[arg(long, requires_all = ["timestamp", "secret_key"])]
    seed_signature: Option<String>,

    /// Request timestamp, `YYYYMMDDTHHMMSSZ`
    #[arg(long)]
    timestamp: Option<String>,

    #[arg(long, default_value = "us-east-1")]
    region: String,

    #[arg(long, default_value = "s3")]
    service: String,

    /// Secret access key used to derive the signing key
    #[arg(long)]
    secret_key: Option<String>,

    /// Send the trailer signature as `x-amz-trailer-signature`
    #[arg(long)]
    transmit_signature: bool,
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let opt = Opt::parse();
    setup_tracing();

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "encoding failed");
            ExitCode::FAILURE
        }
    }
}

fn run(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let input: Box<dyn Read + Send> = match &opt.input {
        Some(path) => Box::new(File::open(path)?),
        None => Box::new(io::stdin()),
    };
    let mut output: Box<dyn Write> = match &opt.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };

    let reader = ReaderProducer::new(input);
    let (producer, trailers): (Box<dyn Producer>, Option<Box<dyn TrailerProducer>>) = match opt.checksum {
        Some(algorithm) => {
            let (producer, trailer) = checksum_source(reader, algorithm);
            (Box::new(producer), Some(Box::new(trailer)))
        }
        None => (Box::new(reader), None),
    };

    let mut config = ChunkedConfig::default();
    config.chunk_buffer_size = opt.chunk_size;
    if opt.transmit_signature {
        config.trailer_signature = TrailerSignaturePolicy::Transmit;
    }

    let mut state = ChunkedRequestState::with_config(producer, trailers, &config)?;

    if let (Some(seed), Some(timestamp), Some(secret)) = (&opt.seed_signature, &opt.timestamp, &opt.secret_key) {
        let date = timestamp.get(..8).ok_or("timestamp too short")?;
        let key = derive_signing_key(secret, date, &opt.region, &opt.service);
        let scope = CredentialScope {
            date,
            region: &opt.region,
            service: &opt.service,
        };
        state.set_signature_info(seed, timestamp, &scope.to_string(), key.as_bytes())?;
    }

    let mut buf = vec![0u8; opt.pull_size.max(1)];
    loop {
        let n = state.pull(&mut buf)?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n])?;
    }
    output.flush()?;

    info!(bytes_sent = state.bytes_sent(), "body encoded");
    if let Some(signature) = state.trailer_signature() {
        info!(%signature, "trailer signature");
    }
    if let Some(entries) = state.trailers() {
        for entry in entries {
            info!(name = entry.name(), value = entry.value(), "trailer");
        }
    }
    Ok(())
}
