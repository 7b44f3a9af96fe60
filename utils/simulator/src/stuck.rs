/// Forward-progress watchdog.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    threshold: u64,
    last_commit: u64,
}

/// Returned by [`StuckDetector::check`] when the core stopped committing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    pub cycle: u64,
    pub last_commit: u64,
    pub threshold: u64,
}

impl StuckDetector {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            last_commit: 0,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn last_commit(&self) -> u64 {
        self.last_commit
    }

    /// Moves the baseline to `cycle`, e.g. at the start of a run or on commit.
    pub fn record_commit(&mut self, cycle: u64) {
        self.last_commit = cycle;
    }

    /// Fails once more than `threshold` cycles passed since the last commit.
    /// Never fails before execution has started.
    pub fn check(&self, cycle: u64, started: bool) -> Result<(), Stall> {
        if started && cycle.saturating_sub(self.last_commit) > self.threshold {
            return Err(Stall {
                cycle,
                last_commit: self.last_commit,
                threshold: self.threshold,
            });
        }
        Ok(())
    }
}
