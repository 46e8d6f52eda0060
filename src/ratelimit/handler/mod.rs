//! Sequential execution of the requests of one bucket.
//!
//! Every active `(bucket, partition)` pair gets a [`SequentialHandler`].
//! The handler owns a queue and a worker task which takes one request at a
//! time off the queue. A request is only done once it succeeded or failed
//! for good, including all retries, so requests of one partition never race
//! each other and always complete in the order they were submitted.

mod context;
mod invalid;
mod state;

pub(crate) use context::HandlerContext;

use http::StatusCode;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};

use crate::notify::Event;
use crate::ratelimit::headers::{RateLimitHeaders, RateLimitScope};
use crate::ratelimit::{BucketRegistry, RateLimitData};
use crate::retryable::RetryExt;
use crate::route::ClassifiedRoute;
use crate::transport::{TransportRequest, TransportResponse};
use crate::types::{ApiError, ApiResponse, ResponseBody};
use crate::{ErrorKind, Result};

/// Wait used when a 429 carries no usable timing information
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Identifies a handler: the bucket it serves and the partition within it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    /// Bucket ID, possibly a local placeholder
    pub bucket: String,
    /// Partition key of the route
    pub partition: String,
}

impl HandlerKey {
    /// Create a key from a bucket ID and a partition key
    #[must_use]
    pub fn new(bucket: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            partition: partition.into(),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.bucket, self.partition)
    }
}

/// Queue bookkeeping, used to tell whether a handler is idle
#[derive(Debug, Default)]
struct Activity {
    queued: AtomicUsize,
    executing: AtomicBool,
}

/// A claim on a place in a handler's queue.
///
/// Taking the claim marks the handler as busy before the request is
/// actually queued, so a concurrent sweep cannot retire the handler in
/// between. Dropping an unused reservation releases the claim.
#[derive(Debug)]
pub struct Reservation {
    activity: Arc<Activity>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.activity.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Marks the worker as executing for as long as it is alive
struct Executing<'a>(&'a Activity);

impl<'a> Executing<'a> {
    fn start(activity: &'a Activity) -> Self {
        activity.executing.store(true, Ordering::SeqCst);
        Self(activity)
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.0.executing.store(false, Ordering::SeqCst);
    }
}

struct Job {
    request: TransportRequest,
    route: ClassifiedRoute,
    reply: oneshot::Sender<Result<ApiResponse>>,
    reservation: Reservation,
}

/// Executes the requests of one `(bucket, partition)` pair in order
#[derive(Debug)]
pub struct SequentialHandler {
    key: HandlerKey,
    queue: mpsc::UnboundedSender<Job>,
    activity: Arc<Activity>,
}

impl SequentialHandler {
    /// Create a handler and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime. The worker stops once the
    /// handler is dropped and its queue has drained.
    pub(crate) fn new(key: HandlerKey, context: Arc<HandlerContext>) -> Self {
        let (queue, jobs) = mpsc::unbounded_channel();
        let activity = Arc::new(Activity::default());
        let worker = Worker {
            key: key.clone(),
            context,
            activity: activity.clone(),
        };
        tokio::spawn(worker.run(jobs));
        Self {
            key,
            queue,
            activity,
        }
    }

    /// The key this handler is registered under
    #[must_use]
    pub fn key(&self) -> &HandlerKey {
        &self.key
    }

    /// Claim a place in the queue
    #[must_use]
    pub fn reserve(&self) -> Reservation {
        self.activity.queued.fetch_add(1, Ordering::SeqCst);
        Reservation {
            activity: self.activity.clone(),
        }
    }

    /// Queue a request and wait for its outcome.
    ///
    /// Dropping the returned future does not remove the request from the
    /// queue; it will still be sent once its turn comes.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of the request, see [`ErrorKind`]
    pub async fn enqueue(
        &self,
        reservation: Reservation,
        request: TransportRequest,
        route: ClassifiedRoute,
    ) -> Result<ApiResponse> {
        let (reply, outcome) = oneshot::channel();
        self.queue
            .send(Job {
                request,
                route,
                reply,
                reservation,
            })
            .map_err(|_| ErrorKind::HandlerClosed)?;
        outcome.await.map_err(|_| ErrorKind::HandlerClosed)?
    }

    /// Number of requests waiting for their turn
    #[must_use]
    pub fn queued(&self) -> usize {
        self.activity.queued.load(Ordering::SeqCst)
    }

    /// `true` if nothing is queued or executing
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        // Check the queue first: a job is only dequeued after the worker
        // has flagged itself as executing.
        self.activity.queued.load(Ordering::SeqCst) == 0
            && !self.activity.executing.load(Ordering::SeqCst)
    }
}

/// The task draining a handler's queue
struct Worker {
    key: HandlerKey,
    context: Arc<HandlerContext>,
    activity: Arc<Activity>,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        while let Some(job) = jobs.recv().await {
            let activity = self.activity.clone();
            let executing = Executing::start(&activity);
            let Job {
                request,
                route,
                reply,
                reservation,
            } = job;
            drop(reservation);

            let result = self.execute(&request, &route).await;
            drop(executing);
            // The caller may have stopped waiting
            let _ = reply.send(result);
        }
        log::debug!("Handler {} stopped", self.key);
    }

    /// Run a request to completion, retrying as needed
    async fn execute(
        &self,
        request: &TransportRequest,
        route: &ClassifiedRoute,
    ) -> Result<ApiResponse> {
        let mut server_retries = 0;
        let mut rate_limit_retries = 0;
        // Set when a 429 already announced the upcoming wait
        let mut announced = false;

        loop {
            if let Some(wait) = self.context.global.time_to_reset()
                && !announced
            {
                self.rate_limited(request, route, wait, true, None)?;
            }
            self.context.global.acquire().await;

            let state = self.context.states.get(&self.key);
            if let Some(wait) = state.time_to_reset(Instant::now()) {
                if !announced {
                    self.rate_limited(request, route, wait, false, None)?;
                }
                sleep(wait).await;
            }
            announced = false;

            let response = match self.context.transport.send(request.clone()).await {
                Ok(response) => response,
                Err(e) if e.should_retry() && server_retries < self.context.policy.retries => {
                    server_retries += 1;
                    self.retry_later(request, &e.to_string(), server_retries).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let headers = RateLimitHeaders::parse(&response.headers);
            let offset = self.context.policy.offset;
            let discovered = self.discovered(&headers);
            self.context
                .states
                .modify(&self.key, discovered.as_ref(), |state| {
                    state.update(&headers, offset, Instant::now());
                });
            self.record_bucket(request, route, &headers);
            // The scope header alone can announce an account wide limit
            let global = headers.global || headers.scope == RateLimitScope::Global;

            let status = response.status;
            if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || (status == StatusCode::TOO_MANY_REQUESTS
                    && headers.scope != RateLimitScope::Shared)
            {
                if let Some(warning) = self.context.invalid_requests.record() {
                    self.context.notifier.notify(warning);
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = headers
                    .retry_after
                    .or(headers.reset_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                if global {
                    self.context.global.on_global_limit(retry_after);
                } else {
                    let reset_at = Instant::now() + retry_after + offset;
                    self.context
                        .states
                        .modify(&self.key, discovered.as_ref(), |state| {
                            state.throttle(reset_at);
                        });
                }

                if rate_limit_retries >= self.context.policy.rate_limit_retries {
                    return Err(ErrorKind::RateLimited(self.rate_limit_data(
                        request,
                        route,
                        retry_after,
                        global,
                        Some(headers.scope),
                    )));
                }
                rate_limit_retries += 1;
                self.rate_limited(
                    request,
                    route,
                    retry_after + offset,
                    global,
                    Some(headers.scope),
                )?;
                announced = true;
                continue;
            }

            if status.should_retry() {
                if server_retries < self.context.policy.retries {
                    server_retries += 1;
                    self.retry_later(request, &status.to_string(), server_retries)
                        .await;
                    continue;
                }
                return Err(ErrorKind::Server {
                    status,
                    method: request.method.clone(),
                    route: route.original_route.clone(),
                });
            }

            return finish(request, route, response);
        }
    }

    /// The key of the bucket the server reported, if it differs from ours
    fn discovered(&self, headers: &RateLimitHeaders) -> Option<HandlerKey> {
        headers
            .bucket
            .as_ref()
            .filter(|bucket| **bucket != self.key.bucket)
            .map(|bucket| HandlerKey::new(bucket.clone(), self.key.partition.clone()))
    }

    /// Report the bucket the server assigned to this route
    fn record_bucket(
        &self,
        request: &TransportRequest,
        route: &ClassifiedRoute,
        headers: &RateLimitHeaders,
    ) {
        let Some(bucket) = &headers.bucket else {
            return;
        };
        if *bucket == self.key.bucket {
            return;
        }
        let buckets: &BucketRegistry = &self.context.buckets;
        if let Some(previous) =
            buckets.record_discovery(&request.method, &route.bucket_route, bucket)
        {
            self.context.debug(format!(
                "Bucket of {} {} changed from {previous} to {bucket}",
                request.method, route.bucket_route
            ));
        }
    }

    async fn retry_later(&self, request: &TransportRequest, reason: &str, attempt: u32) {
        let wait = self.context.policy.retry_backoff * attempt;
        log::debug!(
            "{} {} failed with {reason}, retry {attempt}/{} in {}ms",
            request.method,
            request.url,
            self.context.policy.retries,
            wait.as_millis()
        );
        self.context.debug(format!(
            "Retrying {} {} after {reason} (attempt {attempt})",
            request.method, request.url
        ));
        sleep(wait).await;
    }

    /// Announce a wait, or fail if the route must not wait
    fn rate_limited(
        &self,
        request: &TransportRequest,
        route: &ClassifiedRoute,
        wait: Duration,
        global: bool,
        scope: Option<RateLimitScope>,
    ) -> Result<()> {
        let data = self.rate_limit_data(request, route, wait, global, scope);
        self.context.notifier.notify(Event::RateLimited(data.clone()));
        if self.context.policy.rejects(&route.original_route) {
            return Err(ErrorKind::RateLimited(data));
        }
        Ok(())
    }

    fn rate_limit_data(
        &self,
        request: &TransportRequest,
        route: &ClassifiedRoute,
        time_to_reset: Duration,
        global: bool,
        scope: Option<RateLimitScope>,
    ) -> RateLimitData {
        RateLimitData {
            time_to_reset,
            limit: self.context.states.get(&self.key).limit,
            method: request.method.clone(),
            bucket: self.key.bucket.clone(),
            url: request.url.to_string(),
            route: route.bucket_route.clone(),
            major_parameter: route.partition_key.clone(),
            global,
            scope: scope.unwrap_or(if global {
                RateLimitScope::Global
            } else {
                RateLimitScope::User
            }),
        }
    }
}

/// Turn a final response into the caller's result
fn finish(
    request: &TransportRequest,
    route: &ClassifiedRoute,
    response: TransportResponse,
) -> Result<ApiResponse> {
    let TransportResponse {
        status,
        headers,
        body,
    } = response;

    if status.is_client_error() {
        let body =
            ResponseBody::decode(&headers, body.clone()).unwrap_or(ResponseBody::Raw(body));
        return Err(ApiError::new(
            status,
            request.method.clone(),
            route.original_route.clone(),
            body,
        )
        .into());
    }

    let body = ResponseBody::decode(&headers, body).map_err(ErrorKind::InvalidResponseBody)?;
    Ok(ApiResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests;
