use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::commit::CommitEvent;
use crate::reference::MismatchReport;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Fatal and setup-time failures of a co-simulation run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(
        "no instruction commits for {threshold} cycles at cycle {cycle} \
         (last progress at cycle {last_commit}, pc=0x{pc:010x}, inst=0x{inst:08x}), \
         maybe get stuck\n\
         (please also check whether a fence.i instruction requires more than \
         {threshold} cycles to flush the icache)"
    )]
    Stuck {
        cycle: u64,
        last_commit: u64,
        threshold: u64,
        pc: u64,
        inst: u32,
    },

    #[error(
        "difftest mismatch at cycle {cycle}, pc=0x{pc:010x}, inst=0x{:08x}\n{report}",
        .event.inst
    )]
    Mismatch {
        cycle: u64,
        pc: u64,
        event: CommitEvent,
        report: Box<MismatchReport>,
    },

    #[error("run was already aborted")]
    Aborted,

    #[error("trace recorder failed: {0}")]
    Trace(#[from] io::Error),

    #[error("failed to load library {path}: {reason}")]
    Library { path: Utf8PathBuf, reason: String },

    #[error("model has no signal named `{0}`")]
    MissingSignal(String),

    #[error("invalid model description: {0}")]
    ModelDescription(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    /// Whether this error ends a run that had already started cycling.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Stuck { .. } | Self::Mismatch { .. })
    }
}
