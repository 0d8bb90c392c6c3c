//! Adaptive rate limiter with two states, Open and Blocked.
//!
//! Open: requests are spaced at least `60s / threshold` apart.
//! Blocked: every caller of `wait` parks on a condition variable until the
//! cooldown thread reopens the gate and wakes them all.
//!
//! A trigger after a recovery tightens the threshold by 10% (floor 10 RPM);
//! a trigger with no recovery in between doubles the backoff (cap 50 min).
//! The threshold is never raised again.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use super::Throttle;

pub const MAX_BACKOFF: Duration = Duration::from_secs(50 * 60);
pub const MIN_THRESHOLD: u32 = 10;
const REDUCTION_FACTOR: f64 = 0.9;

struct ThrottleState {
    blocked: bool,
    last_request: Option<Instant>,
    last_trigger: Option<Instant>,
    window_start: Instant,
    request_count: u64,
    threshold: u32,
    backoff: Duration,
    recovered_since_trigger: bool,
    episodes: u64,
}

/// Point-in-time copy of the throttle state.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleSnapshot {
    pub blocked: bool,
    pub threshold: u32,
    pub backoff: Duration,
    pub recovered_since_trigger: bool,
    pub request_count: u64,
    pub episodes: u64,
    pub last_trigger: Option<Instant>,
}

struct Shared {
    state: Mutex<ThrottleState>,
    unblocked: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct StandardThrottle {
    shared: Arc<Shared>,
}

impl StandardThrottle {
    /// `threshold` is the starting requests-per-minute ceiling; 0 disables spacing.
    pub fn new(threshold: u32, initial_backoff: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ThrottleState {
                    blocked: false,
                    last_request: None,
                    last_trigger: None,
                    window_start: Instant::now(),
                    request_count: 0,
                    threshold,
                    backoff: initial_backoff.min(MAX_BACKOFF),
                    recovered_since_trigger: true,
                    episodes: 0,
                }),
                unblocked: Condvar::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> ThrottleSnapshot {
        let state = self.shared.lock();
        ThrottleSnapshot {
            blocked: state.blocked,
            threshold: state.threshold,
            backoff: state.backoff,
            recovered_since_trigger: state.recovered_since_trigger,
            request_count: state.request_count,
            episodes: state.episodes,
            last_trigger: state.last_trigger,
        }
    }
}

/// Reserves the next send slot and returns how long the caller must sleep for it.
fn reserve_slot(state: &mut ThrottleState, now: Instant) -> Duration {
    if state.threshold == 0 {
        return Duration::ZERO;
    }
    let interval = Duration::from_secs(60) / state.threshold;
    let slot = match state.last_request {
        Some(last) => (last + interval).max(now),
        None => now,
    };
    state.last_request = Some(slot);
    slot.saturating_duration_since(now)
}

/// Requests per minute seen since the window opened. Windows shorter than a
/// second count as one second.
fn observed_rpm(state: &ThrottleState, now: Instant) -> u32 {
    let secs = now.duration_since(state.window_start).as_secs_f64().max(1.0);
    (state.request_count as f64 * 60.0 / secs).min(u32::MAX as f64) as u32
}

impl Throttle for StandardThrottle {
    fn wait(&self) {
        let mut state = self.shared.lock();
        loop {
            while state.blocked {
                state = self
                    .shared
                    .unblocked
                    .wait(state)
                    .unwrap_or_else(|e| e.into_inner());
            }

            let delay = reserve_slot(&mut state, Instant::now());
            if delay.is_zero() {
                break;
            }

            let episode = state.episodes;
            drop(state);
            thread::sleep(delay);
            state = self.shared.lock();

            // A trigger during the sleep voids the booked slot.
            if !state.blocked && state.episodes == episode {
                break;
            }
        }
        state.request_count += 1;
    }

    fn trigger(&self) {
        let backoff = {
            let mut state = self.shared.lock();
            if state.blocked {
                return;
            }

            let now = Instant::now();
            state.blocked = true;
            state.last_trigger = Some(now);
            state.episodes += 1;

            let rpm = observed_rpm(&state, now);
            warn!(
                "[Throttle] Triggered after {} request(s), estimated {} RPM",
                state.request_count, rpm
            );

            if state.recovered_since_trigger {
                let ceiling = if state.threshold == 0 { u32::MAX } else { state.threshold };
                let reduced = ((rpm.min(ceiling) as f64 * REDUCTION_FACTOR) as u32).max(MIN_THRESHOLD);
                if reduced < ceiling {
                    state.threshold = reduced;
                    warn!("[Throttle] Threshold reduced to {} RPM", reduced);
                }
                state.recovered_since_trigger = false;
            } else {
                state.backoff = (state.backoff * 2).min(MAX_BACKOFF);
                warn!("[Throttle] Throttled again before recovering, backoff raised to {:?}", state.backoff);
            }
            state.backoff
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("throttle-cooldown".to_string())
            .spawn(move || cooldown(shared, backoff));

        if let Err(e) = spawned {
            // Without a cooldown thread nothing would ever reopen the gate.
            error!("[Throttle] Failed to start cooldown, resuming immediately: {}", e);
            reopen(&self.shared);
        }
    }

    fn mark_recovered(&self) {
        self.shared.lock().recovered_since_trigger = true;
    }

    fn is_blocked(&self) -> bool {
        self.shared.lock().blocked
    }

    fn episodes(&self) -> u64 {
        self.shared.lock().episodes
    }
}

fn cooldown(shared: Arc<Shared>, duration: Duration) {
    warn!("[Throttle] Cooling down for {:?}", duration);
    thread::sleep(duration);
    reopen(&shared);
    info!("[Throttle] Cooldown complete, resuming operations");
}

fn reopen(shared: &Shared) {
    {
        let mut state = shared.lock();
        state.blocked = false;
        state.request_count = 0;
        state.window_start = Instant::now();
        state.last_request = None;
    }
    shared.unblocked.notify_all();
}
