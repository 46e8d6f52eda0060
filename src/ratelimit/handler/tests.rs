use http::{Method, StatusCode};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::*;
use crate::notify::recording::RecordingNotifier;
use crate::ratelimit::RestConfig;
use crate::test_utils::{
    ScriptedTransport, connection_error, json_response, response, transport_request,
};

const ROUTE: &str = "/channels/123456789012345678/messages";

struct Setup {
    handler: SequentialHandler,
    context: Arc<HandlerContext>,
    transport: Arc<ScriptedTransport>,
    notifier: Arc<RecordingNotifier>,
}

fn setup_with(config: &RestConfig, transport: ScriptedTransport) -> Setup {
    let transport = Arc::new(transport);
    let notifier = Arc::new(RecordingNotifier::default());
    let context = Arc::new(HandlerContext::new(
        config,
        transport.clone(),
        notifier.clone(),
    ));
    let handler = SequentialHandler::new(
        HandlerKey::new("bucket", "123456789012345678"),
        context.clone(),
    );
    Setup {
        handler,
        context,
        transport,
        notifier,
    }
}

fn setup(transport: ScriptedTransport) -> Setup {
    setup_with(&RestConfig::default(), transport)
}

impl Setup {
    async fn send(&self, method: Method, route: &str) -> Result<ApiResponse> {
        let (request, route) = transport_request(method, route);
        self.handler
            .enqueue(self.handler.reserve(), request, route)
            .await
    }

    fn rate_limit_events(&self) -> Vec<RateLimitData> {
        self.notifier
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::RateLimited(data) => Some(data),
                _ => None,
            })
            .collect()
    }
}

fn throttled(retry_after: &str) -> Result<TransportResponse> {
    Ok(response(
        StatusCode::TOO_MANY_REQUESTS,
        &[("retry-after", retry_after), ("x-ratelimit-scope", "user")],
        "",
    ))
}

#[tokio::test(start_paused = true)]
async fn test_success() {
    let setup = setup(ScriptedTransport::new(vec![Ok(json_response(
        StatusCode::OK,
        r#"{"id":"1"}"#,
    ))]));

    let response = setup.send(Method::GET, ROUTE).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_json().unwrap()["id"], "1");
    assert_eq!(setup.transport.calls().len(), 1);
    assert!(setup.rate_limit_events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_rate_limit() {
    let setup = setup(ScriptedTransport::new(vec![throttled("0.05")]));
    let start = Instant::now();

    let response = setup.send(Method::GET, ROUTE).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(setup.transport.calls().len(), 2);

    let events = setup.rate_limit_events();
    assert_eq!(events.len(), 1);
    assert!(!events[0].global);
    assert_eq!(events[0].scope, RateLimitScope::User);
    assert_eq!(events[0].route, "/channels/:id/messages");
    assert_eq!(events[0].major_parameter, "123456789012345678");
}

#[tokio::test(start_paused = true)]
async fn test_global_rate_limit_blocks_limiter() {
    let setup = setup(ScriptedTransport::new(vec![Ok(response(
        StatusCode::TOO_MANY_REQUESTS,
        &[("retry-after", "0.2"), ("x-ratelimit-global", "true")],
        "",
    ))]));
    let start = Instant::now();

    setup.send(Method::GET, ROUTE).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(setup.transport.calls().len(), 2);
    assert_eq!(setup.context.global.time_to_reset(), None);

    let events = setup.rate_limit_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].global);
    assert_eq!(events[0].scope, RateLimitScope::Global);
}

#[tokio::test(start_paused = true)]
async fn test_global_scope_without_global_flag_blocks_limiter() {
    let setup = Arc::new(setup(ScriptedTransport::new(vec![Ok(response(
        StatusCode::TOO_MANY_REQUESTS,
        &[("retry-after", "0.2"), ("x-ratelimit-scope", "global")],
        "",
    ))])));
    let start = Instant::now();

    let request = tokio::spawn({
        let setup = setup.clone();
        async move { setup.send(Method::GET, ROUTE).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The whole account is blocked, not just this bucket
    assert!(setup.context.global.time_to_reset().is_some());
    let state = setup.context.states.get(setup.handler.key());
    assert_eq!(state.time_to_reset(Instant::now()), None);

    request.await.unwrap().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(setup.transport.calls().len(), 2);

    let events = setup.rate_limit_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].global);
    assert_eq!(events[0].scope, RateLimitScope::Global);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_are_retried() {
    let setup = setup(ScriptedTransport::new(vec![
        Ok(response(StatusCode::INTERNAL_SERVER_ERROR, &[], "")),
        Ok(response(StatusCode::BAD_GATEWAY, &[], "")),
    ]));
    let start = Instant::now();

    let response = setup.send(Method::GET, ROUTE).await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(setup.transport.calls().len(), 3);
    // Backoff grows with every attempt
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_exhaust_retries() {
    let config = RestConfig {
        retries: 2,
        ..RestConfig::default()
    };
    let setup = setup_with(
        &config,
        ScriptedTransport::new(vec![
            Ok(response(StatusCode::SERVICE_UNAVAILABLE, &[], "")),
            Ok(response(StatusCode::SERVICE_UNAVAILABLE, &[], "")),
            Ok(response(StatusCode::SERVICE_UNAVAILABLE, &[], "")),
        ]),
    );

    let error = setup.send(Method::GET, ROUTE).await.unwrap_err();

    assert!(matches!(
        error,
        ErrorKind::Server {
            status: StatusCode::SERVICE_UNAVAILABLE,
            ..
        }
    ));
    assert_eq!(setup.transport.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_client_errors_are_not_retried() {
    let setup = setup(ScriptedTransport::new(vec![Ok(json_response(
        StatusCode::NOT_FOUND,
        r#"{"code":10003,"message":"Unknown Channel"}"#,
    ))]));

    let error = setup.send(Method::GET, ROUTE).await.unwrap_err();

    let ErrorKind::Api(error) = error else {
        panic!("expected an API error, got {error:?}");
    };
    assert_eq!(error.status, StatusCode::NOT_FOUND);
    assert_eq!(error.code, Some(10003));
    assert_eq!(error.message.as_deref(), Some("Unknown Channel"));
    assert_eq!(setup.transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_errors_are_retried() {
    let setup = setup(ScriptedTransport::new(vec![connection_error()]));

    setup.send(Method::GET, ROUTE).await.unwrap();

    assert_eq!(setup.transport.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retries_are_capped() {
    let config = RestConfig {
        rate_limit_retries: 1,
        ..RestConfig::default()
    };
    let setup = setup_with(
        &config,
        ScriptedTransport::new(vec![throttled("0.01"), throttled("0.01")]),
    );

    let error = setup.send(Method::GET, ROUTE).await.unwrap_err();

    assert!(matches!(error, ErrorKind::RateLimited(_)));
    assert_eq!(setup.transport.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reject_on_rate_limit() {
    let config = RestConfig {
        reject_on_rate_limit: vec!["/channels".into()],
        ..RestConfig::default()
    };
    let setup = setup_with(&config, ScriptedTransport::new(vec![throttled("1")]));

    let error = setup.send(Method::GET, ROUTE).await.unwrap_err();

    let ErrorKind::RateLimited(data) = error else {
        panic!("expected a rate limit error, got {error:?}");
    };
    assert_eq!(data.method, Method::GET);
    assert_eq!(setup.transport.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_requests_run_one_at_a_time_in_order() {
    let setup = setup(ScriptedTransport::default().with_delay(Duration::from_millis(10)));

    let requests = (0..5).map(|n| {
        let (request, route) = transport_request(Method::POST, &format!("{ROUTE}?n={n}"));
        setup.handler.enqueue(setup.handler.reserve(), request, route)
    });
    for result in futures::future::join_all(requests).await {
        result.unwrap();
    }

    let calls = setup.transport.calls();
    assert_eq!(calls.len(), 5);
    for (n, call) in calls.iter().enumerate() {
        assert_eq!(call.request.url.query(), Some(format!("n={n}").as_str()));
    }
    for pair in calls.windows(2) {
        assert!(pair[1].started >= pair[0].finished);
    }
}

#[tokio::test(start_paused = true)]
async fn test_bucket_discovery_is_recorded() {
    let setup = setup(ScriptedTransport::new(vec![Ok(response(
        StatusCode::OK,
        &[("x-ratelimit-bucket", "abc123")],
        "",
    ))]));

    setup.send(Method::GET, ROUTE).await.unwrap();

    let entry = setup
        .context
        .buckets
        .get(&Method::GET, "/channels/:id/messages")
        .unwrap();
    assert_eq!(entry.id, "abc123");
}

#[tokio::test(start_paused = true)]
async fn test_discovered_bucket_inherits_state() {
    let setup = setup(ScriptedTransport::new(vec![Ok(response(
        StatusCode::OK,
        &[
            ("x-ratelimit-bucket", "abc123"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "1"),
        ],
        "",
    ))]));

    setup.send(Method::GET, ROUTE).await.unwrap();

    let discovered = HandlerKey::new("abc123", "123456789012345678");
    let state = setup.context.states.get(&discovered);
    assert_eq!(state.remaining, 0);
    assert!(state.time_to_reset(Instant::now()).is_some());
    assert_eq!(state, setup.context.states.get(setup.handler.key()));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_bucket_waits_for_reset() {
    let setup = setup(ScriptedTransport::new(vec![Ok(response(
        StatusCode::OK,
        &[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "0"),
            ("x-ratelimit-reset-after", "0.2"),
        ],
        "",
    ))]));

    setup.send(Method::GET, ROUTE).await.unwrap();
    setup.send(Method::GET, ROUTE).await.unwrap();

    let calls = setup.transport.calls();
    assert_eq!(calls.len(), 2);
    // Reset plus the default offset
    assert!(calls[1].started - calls[0].finished >= Duration::from_millis(250));

    let events = setup.rate_limit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].limit, Some(5));
    assert!(!events[0].global);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_request_warning() {
    let config = RestConfig {
        invalid_request_warning_interval: 2,
        ..RestConfig::default()
    };
    let setup = setup_with(
        &config,
        ScriptedTransport::new(vec![
            Ok(response(StatusCode::UNAUTHORIZED, &[], "")),
            Ok(response(StatusCode::FORBIDDEN, &[], "")),
        ]),
    );

    assert!(setup.send(Method::GET, ROUTE).await.is_err());
    assert!(setup.send(Method::GET, ROUTE).await.is_err());

    let warnings: Vec<_> = setup
        .notifier
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::InvalidRequestWarning { count, .. } => Some(count),
            _ => None,
        })
        .collect();
    assert_eq!(warnings, vec![2]);
}

#[tokio::test(start_paused = true)]
async fn test_reservation_keeps_handler_active() {
    let setup = setup(ScriptedTransport::default());
    assert!(setup.handler.is_inactive());

    let reservation = setup.handler.reserve();
    assert_eq!(setup.handler.queued(), 1);
    assert!(!setup.handler.is_inactive());

    drop(reservation);
    assert_eq!(setup.handler.queued(), 0);
    assert!(setup.handler.is_inactive());
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_request_is_still_sent() {
    let setup = setup(ScriptedTransport::default().with_delay(Duration::from_millis(100)));
    let (request, route) = transport_request(Method::DELETE, ROUTE);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        setup.handler.enqueue(setup.handler.reserve(), request, route),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(setup.transport.calls().len(), 1);
    assert!(setup.handler.is_inactive());
}
