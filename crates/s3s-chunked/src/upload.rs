//! Chunked object uploads
//!
//! [`ChunkedClient`] turns a producer (and an optional trailer producer) into a
//! [`RequestParams`] with [`ContentLength::Chunked`], hands it to a [`Transport`],
//! and reports the outcome to a [`ResponseHandler`].
//!
//! Argument errors are reported to the handler before any I/O. A producer abort is
//! reported as [`Status::ChunkEncodingError`] whatever the transport says.

use crate::config::{ChunkedConfigProvider, StaticConfigProvider};
use crate::error::Status;
use crate::producer::{Producer, TrailerProducer};
use crate::state::ChunkedRequestState;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};

/// Largest part number accepted by multipart uploads
pub const MAX_PART_NUMBER: u32 = 10_000;

const X_AMZ_TRAILER: HeaderName = HeaderName::from_static("x-amz-trailer");
const X_AMZ_SECURITY_TOKEN: HeaderName = HeaderName::from_static("x-amz-security-token");

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum UriStyle {
    /// `bucket.host/key`
    #[default]
    VirtualHost,
    /// `host/bucket/key`
    Path,
}

/// Where and as whom a request is sent
#[derive(Clone, Default)]
pub struct BucketContext {
    pub host_name: String,
    pub bucket_name: String,
    pub protocol: Protocol,
    pub uri_style: UriStyle,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub security_token: Option<String>,
    pub auth_region: Option<String>,
}

impl fmt::Debug for BucketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketContext")
            .field("host_name", &self.host_name)
            .field("bucket_name", &self.bucket_name)
            .field("protocol", &self.protocol)
            .field("uri_style", &self.uri_style)
            .field("access_key_id", &self.access_key_id)
            .field("auth_region", &self.auth_region)
            .finish_non_exhaustive()
    }
}

/// Object properties sent with a PUT
#[derive(Debug, Clone, Default)]
pub struct PutProperties {
    pub content_type: Option<String>,
    /// User metadata, sent as `x-amz-meta-<name>`
    pub metadata: Vec<(String, String)>,
    /// Trailer names declared up front in `x-amz-trailer`
    pub trailers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentLength {
    Known(u64),
    /// Length unknown, body is chunk-encoded
    Chunked,
}

/// Everything a transport needs to perform one request
#[derive(Debug)]
pub struct RequestParams<'a> {
    pub method: Method,
    pub bucket: &'a BucketContext,
    pub key: &'a str,
    pub query: Option<String>,
    pub put_properties: Option<&'a PutProperties>,
    pub content_length: ContentLength,
    /// Body source when `content_length` is [`ContentLength::Chunked`].
    ///
    /// The signer calls [`ChunkedRequestState::set_signature_info`] on it once the
    /// seed signature is known, then the transport pulls until it returns `0`.
    pub chunked: Option<&'a mut ChunkedRequestState>,
    pub timeout: Option<Duration>,
}

impl RequestParams<'_> {
    #[must_use]
    pub fn uri(&self) -> String {
        let scheme = self.bucket.protocol.scheme();
        let host = &self.bucket.host_name;
        let bucket = &self.bucket.bucket_name;

        let key = self
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut uri = match self.bucket.uri_style {
            UriStyle::VirtualHost => format!("{scheme}://{bucket}.{host}/{key}"),
            UriStyle::Path => format!("{scheme}://{host}/{bucket}/{key}"),
        };
        if let Some(query) = self.query.as_deref() {
            uri.push('?');
            uri.push_str(query);
        }
        uri
    }

    /// Headers derived from the request, excluding authorization.
    ///
    /// # Errors
    /// Returns an error if a metadata name or any value is not a valid header.
    pub fn headers(&self) -> Result<HeaderMap, http::Error> {
        let mut headers = HeaderMap::new();

        match self.content_length {
            ContentLength::Known(len) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            ContentLength::Chunked => {
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }

        if let Some(token) = self.bucket.security_token.as_deref() {
            headers.insert(X_AMZ_SECURITY_TOKEN, HeaderValue::from_str(token)?);
        }

        let Some(props) = self.put_properties else {
            return Ok(headers);
        };

        if let Some(content_type) = props.content_type.as_deref() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type)?);
        }

        for (name, value) in &props.metadata {
            let name = HeaderName::from_bytes(format!("x-amz-meta-{name}").as_bytes())?;
            headers.append(name, HeaderValue::from_str(value)?);
        }

        if !props.trailers.is_empty() && self.content_length == ContentLength::Chunked {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("aws-chunked"));
            headers.insert(X_AMZ_TRAILER, HeaderValue::from_str(&props.trailers.join(","))?);
        }

        Ok(headers)
    }
}

/// Response headers, delivered before completion
#[derive(Debug, Clone)]
pub struct ResponseProperties {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseProperties {
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.headers.get("x-amz-request-id").and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(http::header::ETAG).and_then(|v| v.to_str().ok())
    }
}

/// Parsed S3 error response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetails {
    pub code: Option<String>,
    pub message: Option<String>,
    pub resource: Option<String>,
}

/// What a transport reports when a request finishes
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: Status,
    pub error: Option<ErrorDetails>,
}

impl Completion {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(status: Status) -> Self {
        Self { status, error: None }
    }
}

pub trait ResponseHandler {
    /// Called when response headers arrive. A status other than [`Status::Ok`] aborts the request.
    fn properties(&mut self, properties: &ResponseProperties) -> Status {
        let _ = properties;
        Status::Ok
    }

    /// Called exactly once per request.
    fn complete(&mut self, status: Status, error: Option<&ErrorDetails>);
}

/// Sends requests. Connection handling, TLS, signing and retries live behind this trait.
pub trait Transport {
    /// Whether trailing headers can be sent after a chunked body
    fn supports_trailers(&self) -> bool {
        true
    }

    fn perform(&mut self, request: RequestParams<'_>, properties: &mut dyn FnMut(&ResponseProperties) -> Status) -> Completion;
}

/// Callbacks of a chunked PUT
pub struct ChunkedPutHandler<'h> {
    pub response: &'h mut dyn ResponseHandler,
    pub data: Option<Box<dyn Producer>>,
    pub trailers: Option<Box<dyn TrailerProducer>>,
}

impl fmt::Debug for ChunkedPutHandler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedPutHandler")
            .field("data", &self.data.is_some())
            .field("trailers", &self.trailers.is_some())
            .finish_non_exhaustive()
    }
}

/// Status seen by the caller: a producer abort overrides whatever the transport reported.
fn final_status(transport_status: Status, chunk_error: bool) -> Status {
    if chunk_error { Status::ChunkEncodingError } else { transport_status }
}

pub struct ChunkedClient<T> {
    transport: T,
    config: Arc<dyn ChunkedConfigProvider>,
}

impl<T: fmt::Debug> fmt::Debug for ChunkedClient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedClient").field("transport", &self.transport).finish_non_exhaustive()
    }
}

impl<T: Transport> ChunkedClient<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config_provider(transport, Arc::new(StaticConfigProvider::default()))
    }

    pub fn with_config_provider(transport: T, config: Arc<dyn ChunkedConfigProvider>) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Uploads an object whose length is not known in advance.
    pub fn put_object_chunked(
        &mut self,
        bucket: &BucketContext,
        key: &str,
        put_properties: Option<&PutProperties>,
        timeout: Option<Duration>,
        handler: ChunkedPutHandler<'_>,
    ) {
        self.perform_chunked(bucket, key, None, put_properties, timeout, handler);
    }

    /// Uploads one part of a multipart upload.
    ///
    /// `part_number` must be in `1..=10000` and `upload_id` must not be empty.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_part_chunked(
        &mut self,
        bucket: &BucketContext,
        key: &str,
        put_properties: Option<&PutProperties>,
        part_number: u32,
        upload_id: &str,
        timeout: Option<Duration>,
        handler: ChunkedPutHandler<'_>,
    ) {
        if upload_id.is_empty() || !(1..=MAX_PART_NUMBER).contains(&part_number) {
            tracing::debug!(part_number, "invalid multipart arguments");
            handler.response.complete(Status::InvalidChunkCallback, None);
            return;
        }
        let query = format!("partNumber={part_number}&uploadId={}", urlencoding::encode(upload_id));
        self.perform_chunked(bucket, key, Some(query), put_properties, timeout, handler);
    }

    fn perform_chunked(
        &mut self,
        bucket: &BucketContext,
        key: &str,
        query: Option<String>,
        put_properties: Option<&PutProperties>,
        timeout: Option<Duration>,
        handler: ChunkedPutHandler<'_>,
    ) {
        let ChunkedPutHandler { response, data, trailers } = handler;

        let Some(data) = data else {
            response.complete(Status::InvalidChunkCallback, None);
            return;
        };
        if key.is_empty() || bucket.bucket_name.is_empty() {
            response.complete(Status::InvalidChunkCallback, None);
            return;
        }

        let config = self.config.snapshot();
        let mut state = match ChunkedRequestState::with_config(data, trailers, &config) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "failed to create chunked state");
                response.complete(e.status(), None);
                return;
            }
        };

        if state.has_trailer_producer() && !self.transport.supports_trailers() {
            response.complete(Status::TrailingHeadersError, None);
            return;
        }

        let params = RequestParams {
            method: Method::PUT,
            bucket,
            key,
            query,
            put_properties,
            content_length: ContentLength::Chunked,
            chunked: Some(&mut state),
            timeout,
        };

        let mut on_properties = |properties: &ResponseProperties| response.properties(properties);
        let completion = self.transport.perform(params, &mut on_properties);

        let status = final_status(completion.status, state.has_error());
        tracing::debug!(
            %status,
            transport_status = %completion.status,
            bytes_sent = state.bytes_sent(),
            "chunked upload finished"
        );

        response.complete(status, completion.error.as_ref());
        drop(state);
    }
}
