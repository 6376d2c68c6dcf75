//! All kinds of errors in this crate, plus the terminal state a finished run reports.

use thiserror::Error;

/// Errors surfaced by simulation setup and execution.  None of these are recovered silently; a
/// failure mid-run sets the sink to not-running and finalizes it before bubbling up.
#[derive(Debug, Error)]
pub enum Error {
    /// `start` or `resume` was called while the sink's running flag was set.
    #[error("simulation is already running on this sink")]
    AlreadyRunning,

    /// Neither the ruleset nor the start options supplied an initial grid.
    #[error("no initial grid supplied by either the ruleset or the start options")]
    NoInit,

    /// `resume` was called on a sink with no stored frames.
    #[error("cannot resume: the sink holds no frames")]
    NoHistory,

    /// The sink refused the transition of its running flag.
    #[error("the sink rejected the start of the run")]
    SinkRejectedStart,

    /// A mask, aux array, named grid, or rule grid disagrees with the init grid's shape.
    #[error("{what} has shape {found:?} but the run's grids have shape {expected:?}")]
    GridShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    /// A rule declared a read or write grid name that no grid in the run carries.
    #[error("rule references unknown grid {0:?}")]
    UnknownGrid(String),

    /// The ruleset holds no rules.
    #[error("the ruleset contains no rules")]
    EmptyRuleset,

    /// The timespan is empty, reversed, or the timestep is not positive.
    #[error("invalid timespan: the frame range is empty or the timestep is not positive")]
    BadTimespan,

    /// A chain was built from (or pre-computed into) a rule that cannot be fused.
    #[error("invalid chain: {0}")]
    InvalidChain(&'static str),

    /// GIF encoding failed while a `GifSink` was writing a frame.
    #[error("gif encoding failed: {0}")]
    Gif(#[from] gif::EncodingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How a run ended.  Cancellation is a normal terminal state, not an error: the final frame has
/// been delivered and the sink finalized either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The full frame range was swept.
    Finished,
    /// The sink's running flag was cleared mid-run and the driver stopped at a frame boundary.
    Cancelled,
}
