//! `rest_ratelimit` sends requests to a bucketed REST API without running
//! into its rate limits.
//!
//! The server groups routes into buckets, each with its own quota, and
//! reports the state of a bucket in the headers of every response. The
//! [`Dispatcher`] learns these buckets as it goes, queues the requests of
//! every bucket and major resource, and retries requests that were throttled
//! anyway.
//!
//! "Hello world" example:
//! ```no_run
//! use http::Method;
//! use rest_ratelimit::{ApiRequest, DispatcherBuilder, RestConfig, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let dispatcher = DispatcherBuilder::builder()
//!       .config(RestConfig::default())
//!       .build()
//!       .dispatcher()?;
//!   dispatcher.set_credential("my-token");
//!
//!   let request = ApiRequest::builder()
//!       .method(Method::POST)
//!       .route("/channels/123456789012345678/messages")
//!       .json(json!({ "content": "Hello, world!" }))
//!       .build();
//!   let response = dispatcher.submit(request).await?;
//!   println!("{:?}", response.body);
//!   Ok(())
//! }
//! ```

#[cfg(test)]
#[macro_use]
pub(crate) mod test_utils;

mod dispatcher;
mod encoder;
mod notify;
mod retryable;
mod transport;
mod types;

pub mod ratelimit;
pub mod route;

pub use dispatcher::{DEFAULT_USER_AGENT, Dispatcher, DispatcherBuilder};
pub use encoder::{BodyEncoder, FormEncoder};
pub use notify::{Event, LogNotifier, Notifier};
pub use ratelimit::{AuthPrefix, PoolConfig, RateLimitData, RateLimitScope, RestConfig};
pub use route::ClassifiedRoute;
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
pub use types::*;
