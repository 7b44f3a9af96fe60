//! Device-side collaborators of the cycle loop.

use std::io::Write;
use std::time::Instant;

/// Devices and process control surrounding the core.
pub trait Platform {
    /// Services emulated devices (console, timers, input).
    fn poll_event(&mut self);

    /// Monotonic time in milliseconds.
    fn uptime(&self) -> u64;

    /// Whether the guest or a device requested the run to stop.
    fn is_finish(&self) -> bool;

    /// Marks the run as aborted. Called once, after cleanup, on a fatal error.
    fn set_abort(&mut self);
}

/// Platform for runs on the host: wall-clock uptime and stdout console.
pub struct HostPlatform {
    epoch: Instant,
    finished: bool,
    aborted: bool,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            finished: false,
            aborted: false,
        }
    }

    /// Requests the cycle loop to stop at the next iteration.
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn poll_event(&mut self) {
        std::io::stdout().flush().ok();
    }

    fn uptime(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_finish(&self) -> bool {
        self.finished
    }

    fn set_abort(&mut self) {
        self.aborted = true;
    }
}

/// Calls [`Platform::poll_event`] at most once per `interval` of uptime.
#[derive(Debug, Clone)]
pub struct EventPump {
    interval: u64,
    last_poll: u64,
}

impl EventPump {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            last_poll: 0,
        }
    }

    /// Returns whether the platform was polled.
    pub fn tick<P: Platform + ?Sized>(&mut self, platform: &mut P) -> bool {
        let now = platform.uptime();
        if now.wrapping_sub(self.last_poll) > self.interval {
            platform.poll_event();
            self.last_poll = now;
            return true;
        }
        false
    }
}
