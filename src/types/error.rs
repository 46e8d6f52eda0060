use http::{Method, StatusCode};
use std::time::Duration;
use thiserror::Error;

use crate::ratelimit::RateLimitData;
use crate::types::ApiError;

/// Possible errors when dispatching requests with `rest_ratelimit`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request requires authorization, but no credential was configured
    #[error("Expected a token for an authorized request, but none was configured. Use `Dispatcher::set_credential`")]
    MissingCredential,

    /// A sweep interval exceeds the allowed maximum
    #[error("Cannot set {name} to {interval:?}, it must be at most 4 hours")]
    InvalidSweepInterval {
        /// The name of the offending option
        name: &'static str,
        /// The configured interval
        interval: Duration,
    },

    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// The request URL could not be composed from the configured API base
    #[error("Cannot build request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Network error while sending a request via reqwest
    #[error("Network error while sending request: {0}")]
    NetworkRequest(#[source] reqwest::Error),

    /// A transport other than reqwest failed to deliver the request
    #[error("Transport error: {0}")]
    Transport(String),

    /// The HTTP client could not be built
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The server kept answering with 5xx after all retries
    #[error("{method} {route} failed with {status} after retrying")]
    Server {
        /// Last status code returned by the server
        status: StatusCode,
        /// Method of the failed request
        method: Method,
        /// Route of the failed request
        route: String,
    },

    /// The request was rate limited and could not be retried
    #[error("Rate limited on {} {} for {:?} (global: {})", .0.method, .0.route, .0.time_to_reset, .0.global)]
    RateLimited(RateLimitData),

    /// The API rejected the request with a client error
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A successful response claimed to be JSON but was not
    #[error("Cannot decode JSON response body: {0}")]
    InvalidResponseBody(#[source] serde_json::Error),

    /// The JSON payload of a request could not be serialized
    #[error("Cannot encode JSON request body: {0}")]
    EncodeBody(#[source] serde_json::Error),

    /// The bucket worker stopped before answering this request
    #[error("Request handler stopped before the request completed")]
    HandlerClosed,
}

impl ErrorKind {
    /// The HTTP status associated with this error, if the server answered
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Api(e) => Some(e.status),
            Self::RateLimited(_) => Some(StatusCode::TOO_MANY_REQUESTS),
            Self::NetworkRequest(e) => e.status(),
            _ => None,
        }
    }
}

/// The result type used throughout this crate
pub type Result<T> = std::result::Result<T, ErrorKind>;
