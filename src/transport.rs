//! The HTTP transport the dispatcher sends requests through.
//!
//! [`ReqwestTransport`] is the default. Anything implementing [`Transport`]
//! can be plugged in instead, e.g. to route requests through a proxy
//! service or to script responses in tests.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use reqwest::multipart::{Form, Part};
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

use crate::ratelimit::{PoolConfig, RestConfig};
use crate::types::{FormPart, RequestBody};
use crate::{ErrorKind, Result};

/// A fully resolved request, ready to be sent
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute request URL
    pub url: Url,
    /// All request headers, including authorization
    pub headers: HeaderMap,
    /// Encoded body
    pub body: RequestBody,
}

/// The raw outcome of a request
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Status code
    pub status: StatusCode,
    /// Raw response headers
    pub headers: HeaderMap,
    /// Raw response body
    pub body: Bytes,
}

/// Sends requests over the wire
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Send a request and read the complete response.
    ///
    /// # Errors
    ///
    /// Returns an error if no response could be received. HTTP error
    /// statuses are *not* errors at this level.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// A [`Transport`] backed by a [`reqwest::Client`].
///
/// The client, and with it the connection pool, is created on first use
/// and then reused for the lifetime of the transport.
#[derive(Debug)]
pub struct ReqwestTransport {
    timeout: Duration,
    pool: PoolConfig,
    client: OnceCell<reqwest::Client>,
}

impl ReqwestTransport {
    /// Create a transport with the timeout and pool options from `config`
    #[must_use]
    pub fn new(config: &RestConfig) -> Self {
        Self {
            timeout: config.timeout,
            pool: config.pool,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .get_or_try_init(|| async {
                reqwest::ClientBuilder::new()
                    .gzip(true)
                    .timeout(self.timeout)
                    .pool_idle_timeout(self.pool.idle_timeout)
                    .pool_max_idle_per_host(self.pool.max_idle_per_host)
                    .build()
                    .map_err(ErrorKind::BuildRequestClient)
            })
            .await
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let client = self.client().await?;
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let builder = client.request(method, url).headers(headers);
        let builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Multipart(parts) => builder.multipart(into_form(parts)?),
        };

        let response = builder.send().await.map_err(ErrorKind::NetworkRequest)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ErrorKind::NetworkRequest)?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn into_form(parts: Vec<FormPart>) -> Result<Form> {
    parts.into_iter().try_fold(Form::new(), |form, part| match part {
        FormPart::Text { name, value } => Ok(form.text(name, value)),
        FormPart::File {
            name,
            file_name,
            data,
            content_type,
        } => {
            let length = data.len() as u64;
            let file = Part::stream_with_length(data, length).file_name(file_name);
            let file = match content_type {
                Some(content_type) => file
                    .mime_str(&content_type)
                    .map_err(ErrorKind::NetworkRequest)?,
                None => file,
            };
            Ok(form.part(name, file))
        }
    })
}
