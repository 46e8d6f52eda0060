use http::Method;
use http::header::{self, HeaderName, HeaderValue};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use secrecy::{ExposeSecret, SecretString};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use typed_builder::TypedBuilder;
use url::Url;

use crate::encoder::{BodyEncoder, FormEncoder};
use crate::notify::{Event, LogNotifier, Notifier};
use crate::ratelimit::{
    BucketEntry, HandlerContext, HandlerKey, HandlerRegistry, RestConfig, SequentialHandler,
};
use crate::route::{ClassifiedRoute, classify};
use crate::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::types::{ApiRequest, ApiResponse, RequestBody};
use crate::{ErrorKind, Result};

/// Default user agent, `rest-ratelimit/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("rest-ratelimit/", env!("CARGO_PKG_VERSION"));

/// Header carrying the audit log reason of a request
const AUDIT_LOG_REASON: HeaderName = HeaderName::from_static("x-audit-log-reason");

/// Characters left alone when encoding an audit log reason, matching
/// what browsers leave alone in URI components
const REASON_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Builder for [`Dispatcher`].
///
/// Every collaborator is optional. By default requests go out through a
/// [`ReqwestTransport`], bodies are encoded by [`FormEncoder`] and events
/// end up in the log via [`LogNotifier`].
///
/// ```
/// use rest_ratelimit::{DispatcherBuilder, RestConfig};
///
/// # #[tokio::main]
/// # async fn main() -> rest_ratelimit::Result<()> {
/// let dispatcher = DispatcherBuilder::builder()
///     .config(RestConfig::default())
///     .build()
///     .dispatcher()?;
/// dispatcher.set_credential("my-token");
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder, Debug, Clone, Default)]
#[builder(builder_method(doc = "
Create a builder for building `DispatcherBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `DispatcherBuilder`.
"))]
pub struct DispatcherBuilder {
    /// Dispatcher configuration
    #[builder(default)]
    config: RestConfig,

    /// Sends the requests. Defaults to a [`ReqwestTransport`].
    #[builder(default, setter(strip_option))]
    transport: Option<Arc<dyn Transport>>,

    /// Receives events. Defaults to [`LogNotifier`].
    #[builder(default, setter(strip_option))]
    notifier: Option<Arc<dyn Notifier>>,

    /// Encodes request bodies. Defaults to [`FormEncoder`].
    #[builder(default, setter(strip_option))]
    encoder: Option<Arc<dyn BodyEncoder>>,
}

impl DispatcherBuilder {
    /// Instantiates a [`Dispatcher`].
    ///
    /// When called from within a Tokio runtime, the bucket and handler
    /// sweepers are started right away.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if a sweep interval exceeds
    /// [`MAX_SWEEP_INTERVAL`](crate::ratelimit::MAX_SWEEP_INTERVAL).
    pub fn dispatcher(self) -> Result<Dispatcher> {
        let Self {
            config,
            transport,
            notifier,
            encoder,
        } = self;

        let hash_sweep =
            RestConfig::sweep_interval("hash_sweep_interval", config.hash_sweep_interval)?;
        let handler_sweep =
            RestConfig::sweep_interval("handler_sweep_interval", config.handler_sweep_interval)?;

        let transport = transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new(&config)));
        let notifier = notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let encoder = encoder.unwrap_or_else(|| Arc::new(FormEncoder));

        let shared = Arc::new(Shared {
            context: Arc::new(HandlerContext::new(&config, transport, notifier)),
            handlers: HandlerRegistry::new(),
            encoder,
            token: RwLock::new(config.token.clone()),
            bucket_sweeper: Mutex::new(None),
            handler_sweeper: Mutex::new(None),
            config,
        });

        if tokio::runtime::Handle::try_current().is_ok() {
            if let Some(period) = hash_sweep {
                *lock(&shared.bucket_sweeper) =
                    Some(spawn_sweeper(&shared, period, Shared::sweep_buckets));
            }
            if let Some(period) = handler_sweep {
                *lock(&shared.handler_sweeper) =
                    Some(spawn_sweeper(&shared, period, Shared::sweep_handlers));
            }
        } else {
            log::debug!("No Tokio runtime available, sweeping is disabled");
        }

        Ok(Dispatcher { shared })
    }
}

/// Sends API requests while respecting the server's rate limits.
///
/// Requests are grouped by the bucket the server assigns to their route.
/// Requests of the same bucket and major resource run one after another in
/// submission order; everything else runs concurrently, bounded only by the
/// global request ceiling.
///
/// Cloning a dispatcher is cheap and yields a handle to the same state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Submit a request and wait for its outcome.
    ///
    /// Dropping the returned future does not cancel the request once it
    /// is queued.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::MissingCredential`] if the request needs a credential
    ///   and none is set. Nothing is sent in that case.
    /// - [`ErrorKind::Api`] for client errors, which are never retried.
    /// - [`ErrorKind::Server`] or a transport error once retries ran out.
    /// - [`ErrorKind::RateLimited`] if the request was throttled too often
    ///   or its route is configured to reject on rate limits.
    pub async fn submit(&self, request: ApiRequest) -> Result<ApiResponse> {
        let route = classify(&request.route, &request.method);
        let outbound = self.shared.build_request(request)?;

        let key = self.shared.handler_key(&outbound.method, &route);
        let (handler, reservation) = self.shared.handlers.get_or_create(key, |key| {
            SequentialHandler::new(key.clone(), self.shared.context.clone())
        });

        handler.enqueue(reservation, outbound, route).await
    }

    /// Replace the credential used for authorized requests.
    ///
    /// Requests that are already queued keep the credential they were
    /// built with.
    pub fn set_credential(&self, token: impl Into<String>) {
        let token = SecretString::from(token.into());
        *self
            .shared
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// Stop sweeping stale bucket mappings. Does nothing if not sweeping.
    pub fn stop_bucket_sweep(&self) {
        if let Some(sweeper) = lock(&self.shared.bucket_sweeper).take() {
            sweeper.abort();
        }
    }

    /// Stop sweeping idle handlers. Does nothing if not sweeping.
    pub fn stop_handler_sweep(&self) {
        if let Some(sweeper) = lock(&self.shared.handler_sweeper).take() {
            sweeper.abort();
        }
    }

    /// Number of known bucket mappings
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.shared.context.buckets.len()
    }

    /// Number of live handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.shared.handlers.len()
    }

    /// The configuration this dispatcher was built with
    #[must_use]
    pub fn config(&self) -> &RestConfig {
        &self.shared.config
    }
}

#[derive(Debug)]
struct Shared {
    config: RestConfig,
    context: Arc<HandlerContext>,
    handlers: HandlerRegistry,
    encoder: Arc<dyn BodyEncoder>,
    token: RwLock<Option<SecretString>>,
    bucket_sweeper: Mutex<Option<JoinHandle<()>>>,
    handler_sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    /// Turn a logical request into what goes over the wire
    fn build_request(&self, request: ApiRequest) -> Result<TransportRequest> {
        let ApiRequest {
            method,
            route,
            query,
            json,
            files,
            append_to_form,
            raw_body,
            auth,
            auth_prefix,
            reason,
            headers: extra_headers,
            versioned,
        } = request;

        let mut headers = self.config.headers.clone();
        headers.insert(header::USER_AGENT, self.user_agent()?);

        if auth {
            let token = self.token.read().unwrap_or_else(PoisonError::into_inner);
            let Some(token) = token.as_ref() else {
                return Err(ErrorKind::MissingCredential);
            };
            let prefix = auth_prefix.unwrap_or(self.config.auth_prefix);
            let mut value = HeaderValue::from_str(&format!("{prefix} {}", token.expose_secret()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        if let Some(reason) = reason.filter(|reason| !reason.is_empty()) {
            let encoded = utf8_percent_encode(&reason, REASON_ENCODE_SET).to_string();
            headers.insert(AUDIT_LOG_REASON, HeaderValue::from_str(&encoded)?);
        }

        let body = match raw_body {
            Some(raw) => RequestBody::Bytes(raw),
            None => {
                let (body, content_headers) =
                    self.encoder.encode(json.as_ref(), &files, append_to_form)?;
                headers.extend(content_headers);
                body
            }
        };

        // Per-request headers win over everything else
        headers.extend(extra_headers);

        Ok(TransportRequest {
            method,
            url: self.url(&route, &query, versioned)?,
            headers,
            body,
        })
    }

    fn url(&self, route: &str, query: &[(String, String)], versioned: bool) -> Result<Url> {
        let api = self.config.api.trim_end_matches('/');
        let mut url = if versioned {
            Url::parse(&format!("{api}/v{}{route}", self.config.version))?
        } else {
            Url::parse(&format!("{api}{route}"))?
        };
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn user_agent(&self) -> Result<HeaderValue> {
        let mut user_agent = String::from(DEFAULT_USER_AGENT);
        for suffix in &self.config.user_agent_suffix {
            user_agent.push(' ');
            user_agent.push_str(suffix);
        }
        Ok(HeaderValue::from_str(&user_agent)?)
    }

    fn sweep_buckets(&self) {
        let swept = panic::catch_unwind(AssertUnwindSafe(|| {
            self.context.buckets.sweep(self.config.hash_lifetime)
        }));
        match swept {
            Ok(removed) if removed.is_empty() => {}
            Ok(removed) => {
                for (key, entry) in &removed {
                    self.context
                        .debug(format!("Swept bucket {} of {key}", entry.id));
                }
                self.context.notifier.notify(Event::BucketSweep(removed));
            }
            Err(_) => self.context.debug("Bucket sweep panicked".to_string()),
        }
    }

    /// Pick the handler for a route.
    ///
    /// Until the placeholder handler of a route has drained, it keeps
    /// serving the route even if the server already reported the real
    /// bucket. Otherwise a new request could overtake queued ones.
    fn handler_key(&self, method: &Method, route: &ClassifiedRoute) -> HandlerKey {
        let bucket = self.context.buckets.resolve(method, &route.bucket_route);
        if bucket.is_local() {
            return HandlerKey::new(bucket.id, route.partition_key.clone());
        }
        let key = HandlerKey::new(bucket.id, route.partition_key.clone());
        let local = HandlerKey::new(
            BucketEntry::local(method, &route.bucket_route).id,
            route.partition_key.clone(),
        );
        match self.handlers.get(&local) {
            Some(handler) if !handler.is_inactive() => local,
            _ => key,
        }
    }

    fn sweep_handlers(&self) {
        let swept = panic::catch_unwind(AssertUnwindSafe(|| {
            let removed = self.handlers.sweep();
            let now = Instant::now();
            self.context.states.retain(|key, state| {
                self.handlers.get(key).is_some() || state.time_to_reset(now).is_some()
            });
            removed
        }));
        match swept {
            Ok(removed) if removed.is_empty() => {}
            Ok(removed) => {
                for key in &removed {
                    self.context.debug(format!("Swept idle handler {key}"));
                }
                self.context.notifier.notify(Event::HandlerSweep(removed));
            }
            Err(_) => self.context.debug("Handler sweep panicked".to_string()),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for sweeper in [&mut self.bucket_sweeper, &mut self.handler_sweeper] {
            let sweeper = sweeper.get_mut().unwrap_or_else(PoisonError::into_inner);
            if let Some(sweeper) = sweeper.take() {
                sweeper.abort();
            }
        }
    }
}

/// Run `sweep` every `period` for as long as the dispatcher is alive
fn spawn_sweeper(
    shared: &Arc<Shared>,
    period: Duration,
    sweep: fn(&Shared),
) -> JoinHandle<()> {
    let shared: Weak<Shared> = Arc::downgrade(shared);
    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        loop {
            ticks.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            sweep(&shared);
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
