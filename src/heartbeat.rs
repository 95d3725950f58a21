use std::time::{Duration, Instant};

use crossbeam_channel::{tick, Receiver};

pub const FAST_TICK: Duration = Duration::from_millis(500);
pub const SLOW_TICK: Duration = Duration::from_secs(2);

/// Pair of periodic wake sources for the control loop. Both tickers start
/// together and keep their own phase, so flipping between them never
/// resynchronizes the one left unselected.
pub struct Heartbeat {
    fast: Receiver<Instant>,
    slow: Receiver<Instant>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Heartbeat {
            fast: tick(FAST_TICK),
            slow: tick(SLOW_TICK),
        }
    }

    pub fn fast(&self) -> &Receiver<Instant> {
        &self.fast
    }

    pub fn slow(&self) -> &Receiver<Instant> {
        &self.slow
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Heartbeat::new()
    }
}
