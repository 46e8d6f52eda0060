use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Length of the window the global ceiling applies to
const WINDOW: Duration = Duration::from_secs(1);

type Delay = Shared<BoxFuture<'static, ()>>;

#[derive(Debug)]
struct GlobalState {
    remaining: u32,
    reset_at: Instant,
    /// The wait every blocked caller shares until `reset_at`
    delay: Option<(Instant, Delay)>,
}

/// Tracks the account-wide request quota shared by all buckets.
///
/// Every outbound request takes a slot with [`GlobalLimiter::acquire`].
/// When the slots of the current window are used up, all callers wait on a
/// single shared timer and resume together once the window resets.
#[derive(Debug)]
pub struct GlobalLimiter {
    ceiling: u32,
    offset: Duration,
    state: Mutex<GlobalState>,
}

impl GlobalLimiter {
    /// Create a limiter allowing `ceiling` requests per second.
    ///
    /// `offset` is added to resets reported by the server.
    #[must_use]
    pub fn new(ceiling: u32, offset: Duration) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            ceiling,
            offset,
            state: Mutex::new(GlobalState {
                remaining: ceiling,
                reset_at: Instant::now(),
                delay: None,
            }),
        }
    }

    /// Wait until a global slot is available and take it
    pub async fn acquire(&self) {
        loop {
            let delay = {
                let mut state = self.lock();
                let now = Instant::now();
                if now >= state.reset_at {
                    if state.remaining == 0 || state.delay.is_some() {
                        log::debug!("Global rate limit window reset");
                    }
                    state.remaining = self.ceiling;
                    state.reset_at = now + WINDOW;
                    state.delay = None;
                }
                if state.remaining > 0 {
                    state.remaining -= 1;
                    return;
                }
                let reset_at = state.reset_at;
                match &state.delay {
                    Some((until, delay)) if *until == reset_at => delay.clone(),
                    _ => {
                        let delay = sleep_until(reset_at).boxed().shared();
                        state.delay = Some((reset_at, delay.clone()));
                        delay
                    }
                }
            };
            delay.await;
        }
    }

    /// Record that the server throttled us globally.
    ///
    /// The server's view wins over local accounting: no slot is handed out
    /// until `retry_after` (plus the configured offset) has passed.
    pub fn on_global_limit(&self, retry_after: Duration) {
        let mut state = self.lock();
        state.remaining = 0;
        state.reset_at = Instant::now() + retry_after + self.offset;
        log::debug!(
            "Global rate limit hit, blocking all requests for {}ms",
            (retry_after + self.offset).as_millis()
        );
    }

    /// Time until the current global block lifts, if requests are blocked
    #[must_use]
    pub fn time_to_reset(&self) -> Option<Duration> {
        let state = self.lock();
        let now = Instant::now();
        (state.remaining == 0 && state.reset_at > now).then(|| state.reset_at - now)
    }

    /// Number of slots left in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let state = self.lock();
        if Instant::now() >= state.reset_at {
            self.ceiling
        } else {
            state.remaining
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GlobalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
