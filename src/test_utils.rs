use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::route::{ClassifiedRoute, classify};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::types::RequestBody;
use crate::{ErrorKind, Result};

#[macro_export]
/// Creates a mock web server, which responds with a predefined status when
/// handling a matching request
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(template)
            .mount(&mock_server)
            .await;
        mock_server
    }};
}

/// A transport call as observed by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub(crate) request: TransportRequest,
    pub(crate) started: Instant,
    pub(crate) finished: Instant,
}

/// A transport answering from a script of canned responses.
///
/// Once the script runs out, every request gets an empty `200 OK`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<VecDeque<Result<TransportResponse>>>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Result<TransportResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Let every call take `delay`
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        let next = self.script.lock().unwrap().pop_front();
        self.calls.lock().unwrap().push(Call {
            request,
            started,
            finished: Instant::now(),
        });
        next.unwrap_or_else(|| Ok(response(StatusCode::OK, &[], "")))
    }
}

/// Build a canned response
pub(crate) fn response(
    status: StatusCode,
    headers: &[(&'static str, &str)],
    body: &str,
) -> TransportResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    TransportResponse {
        status,
        headers: map,
        body: Bytes::from(body.to_string()),
    }
}

/// Build a canned JSON response
pub(crate) fn json_response(status: StatusCode, body: &str) -> TransportResponse {
    response(status, &[("content-type", "application/json")], body)
}

/// A canned transport failure
pub(crate) fn connection_error() -> Result<TransportResponse> {
    Err(ErrorKind::Transport("connection reset".into()))
}

/// Build a bare transport request for `route`
pub(crate) fn transport_request(
    method: Method,
    route: &str,
) -> (TransportRequest, ClassifiedRoute) {
    let request = TransportRequest {
        method: method.clone(),
        url: format!("https://api.test/v10{route}").parse().unwrap(),
        headers: HeaderMap::new(),
        body: RequestBody::Empty,
    };
    (request, classify(route, &method))
}
