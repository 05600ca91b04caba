//! HTTP capability
//!
//! The manager never talks to the network directly. Everything goes through
//! an [`HttpTransport`], which performs exactly one request per call and never
//! follows redirects on its own; redirects and authentication are the
//! [`RedirectFollower`](crate::downloader::RedirectFollower)'s job.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, StatusCode};
use std::fmt;
use std::pin::Pin;
use tracing::debug;
use url::Url;

use crate::downloader::config::ManagerConfig;
use crate::downloader::core::{Credential, DownloadError, Result, TransportError};

/// Response body as a stream of chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, TransportError>> + Send>>;

/// A connected response: status, headers and (for GET) the body
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

impl HttpResponse {
    /// Response with the given status and an empty body
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            content_length: None,
            body: Box::pin(stream::empty()),
        }
    }

    /// Attach an in-memory body; sets the content length
    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        let body = body.into();
        self.content_length = Some(body.len() as u64);
        self.body = Box::pin(stream::once(async move { Ok(body) }));
        self
    }

    pub fn with_stream(mut self, body: ByteStream, content_length: Option<u64>) -> Self {
        self.body = body;
        self.content_length = content_length;
        self
    }

    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    /// All `Location` header values, in order
    pub fn locations(&self) -> Vec<&str> {
        self.headers
            .get_all(LOCATION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// Total size announced by a `Content-Range: bytes a-b/total` header
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.headers.get(CONTENT_RANGE)?.to_str().ok()?;
        let (_, total) = value.rsplit_once('/')?;
        total.trim().parse().ok()
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// One-request-per-call HTTP capability consumed by the manager
///
/// Implementations must not follow redirects, must not add credentials on
/// their own and must report any failure to obtain a response as a
/// [`TransportError`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a HEAD request
    async fn head(
        &self,
        credential: Option<&Credential>,
        uri: &Url,
    ) -> std::result::Result<HttpResponse, TransportError>;

    /// Issue a GET request, asking for bytes from `offset` onwards when it is non-zero
    async fn get(
        &self,
        credential: Option<&Credential>,
        uri: &Url,
        offset: u64,
    ) -> std::result::Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport from the manager configuration
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DownloadError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing client; it should be built with redirects disabled
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        credential: Option<&Credential>,
        uri: &Url,
    ) -> reqwest::RequestBuilder {
        let request = self.client.request(method, uri.clone());
        match credential {
            Some(credential) => {
                request.basic_auth(&credential.username, Some(&credential.password))
            }
            None => request,
        }
    }

    fn convert(response: reqwest::Response) -> HttpResponse {
        let status = response.status();
        let headers = response.headers().clone();
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .or_else(|| response.content_length());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();

        HttpResponse {
            status,
            headers,
            content_length,
            body,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn head(
        &self,
        credential: Option<&Credential>,
        uri: &Url,
    ) -> std::result::Result<HttpResponse, TransportError> {
        debug!("HEAD {} (credential: {})", uri, credential.is_some());
        let response = self
            .request(reqwest::Method::HEAD, credential, uri)
            .send()
            .await?;
        Ok(Self::convert(response))
    }

    async fn get(
        &self,
        credential: Option<&Credential>,
        uri: &Url,
        offset: u64,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let mut request = self.request(reqwest::Method::GET, credential, uri);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
            debug!("Requesting range: bytes={}-", offset);
        }
        debug!("GET {} (credential: {})", uri, credential.is_some());
        let response = request.send().await?;
        Ok(Self::convert(response))
    }
}
