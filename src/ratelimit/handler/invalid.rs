use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::notify::Event;

/// Length of the window invalid requests are counted in
const INVALID_REQUEST_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Counts responses the API considers invalid (401, 403, and 429 outside
/// of shared scopes). Too many of them get a client banned temporarily,
/// so we warn every `interval` invalid requests.
#[derive(Debug)]
pub(crate) struct InvalidRequestTracker {
    interval: u32,
    window: Mutex<Window>,
}

impl InvalidRequestTracker {
    pub(crate) fn new(interval: u32) -> Self {
        Self {
            interval,
            window: Mutex::new(Window {
                count: 0,
                reset_at: Instant::now() + INVALID_REQUEST_WINDOW,
            }),
        }
    }

    /// Count an invalid request, returning a warning if one is due
    pub(crate) fn record(&self) -> Option<Event> {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now >= window.reset_at {
            window.count = 0;
            window.reset_at = now + INVALID_REQUEST_WINDOW;
        }
        window.count += 1;

        (self.interval > 0 && window.count % self.interval == 0).then(|| {
            Event::InvalidRequestWarning {
                count: window.count,
                remaining_time: window.reset_at - now,
            }
        })
    }
}
