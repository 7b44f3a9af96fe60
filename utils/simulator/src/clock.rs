use crate::error::Result;
use crate::model::HardwareModel;
use crate::trace::Trace;

/// Drives the model's clock and reset and counts cycles.
pub struct ClockDriver<M: HardwareModel> {
    model: M,
    trace: Option<Trace<M>>,
    cycles: u64,
}

impl<M: HardwareModel> ClockDriver<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            trace: None,
            cycles: 0,
        }
    }

    pub fn with_trace(mut self, trace: Trace<M>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Holds reset for `n` full clock pulses, then releases it.
    ///
    /// Reset pulses are neither traced nor counted as cycles.
    pub fn reset_for(&mut self, n: u64) {
        for _ in 0..n {
            self.model.set_reset(true);
            self.model.set_clock(false);
            self.model.eval();
            self.model.set_clock(true);
            self.model.eval();
            self.model.set_reset(false);
        }
    }

    /// One clock cycle: evaluate low, then high.
    pub fn step(&mut self) -> Result<()> {
        if let Some(trace) = self.trace.as_mut() {
            trace.prime(&self.model)?;
        }

        self.model.set_clock(false);
        self.model.eval();
        if let Some(trace) = self.trace.as_mut() {
            trace.advance(&self.model)?;
        }

        self.model.set_clock(true);
        self.model.eval();
        if let Some(trace) = self.trace.as_mut() {
            trace.advance(&self.model)?;
        }

        self.cycles += 1;
        Ok(())
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn is_tracing(&self) -> bool {
        self.trace.as_ref().is_some_and(|t| !t.is_closed())
    }

    /// Closes the trace, if one is open. Safe to call repeatedly.
    pub fn close_trace(&mut self) -> Result<()> {
        if let Some(trace) = self.trace.as_mut() {
            trace.close()?;
        }
        Ok(())
    }

    pub fn into_model(mut self) -> M {
        if let Err(err) = self.close_trace() {
            tracing::warn!(%err, "failed to close trace");
        }
        self.model
    }
}
