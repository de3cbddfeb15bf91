//! Blackout-window schedule adjustment
//!
//! Pure time arithmetic: given a notification's desired send time and an
//! optional do-not-disturb window, compute the effective send time. `now`
//! is passed in rather than read from the clock so callers and tests get
//! deterministic results.

use crate::config::BlackoutWindow;
use chrono::{DateTime, Duration, Local, TimeZone};
use tracing::debug;

/// Minimum lead time given to the scheduler when no send time was requested
pub fn epsilon() -> Duration {
    Duration::seconds(1)
}

/// Compute the effective send time for a desired time and blackout window.
///
/// - No window: the desired time (or `now` + epsilon when unset).
/// - Desired time inside the window: deferred to the next occurrence of
///   the window's end after the desired time. Midnight-wrapping windows
///   (end before start) are handled by rolling the end date forward, not
///   by naive time-of-day comparison.
/// - Desired time outside the window: unchanged.
pub fn effective_send_time(
    when: Option<DateTime<Local>>,
    window: Option<&BlackoutWindow>,
    now: DateTime<Local>,
) -> DateTime<Local> {
    let desired = when.unwrap_or(now + epsilon());

    let Some(window) = window else {
        return desired;
    };

    if !window.contains(desired.time()) {
        return desired;
    }

    let deferred = next_window_end(desired, window);
    debug!(
        "deferring send from {} to blackout end {}",
        desired, deferred
    );
    deferred
}

/// Next occurrence of the window's end time-of-day strictly after `base`
fn next_window_end(base: DateTime<Local>, window: &BlackoutWindow) -> DateTime<Local> {
    let mut date = base.date_naive();
    // At most two calendar days need checking; the loop bound covers DST
    // gaps where a local time does not exist.
    for _ in 0..4 {
        if let Some(candidate) = Local
            .from_local_datetime(&date.and_time(window.end))
            .earliest()
        {
            if candidate > base {
                return candidate;
            }
        }
        match date.checked_add_days(chrono::Days::new(1)) {
            Some(next) => date = next,
            None => break,
        }
    }
    base + epsilon()
}
