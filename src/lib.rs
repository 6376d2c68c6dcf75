//! Lattica Simulation Engine
//!
//! A generic engine for grid-based cellular-automata and spatial simulations.  Users supply an
//! initial grid (or several named grids), a timespan, and an ordered sequence of rules; the
//! engine advances the grids frame by frame over double-buffered storage, fusing chained rules
//! into single sweeps, and delivers each completed frame to a pluggable output sink (in-memory
//! store, terminal display, or GIF writer).

pub mod cell;
pub mod driver;
pub mod engine;
pub mod error;
pub mod grid;
pub mod neighborhood;
pub mod overflow;
pub mod rule;
pub mod ruleset;
pub mod simdata;
pub mod util;

pub mod prelude {
    //! Utility module for re-exporting the commonly used types and traits
    pub use crate::cell::CellState;
    pub use crate::driver::sink::{GifSink, MemorySink, Sink, SinkControl, TerminalDisplayer};
    pub use crate::driver::{BasicDriver, ResumeOptions, SimHandle, SimOptions, ThreadedDriver};
    pub use crate::engine::{Engine, ParallelEngine, SerialEngine};
    pub use crate::error::{Error, Termination};
    pub use crate::grid::{Grid, Mask, DEFAULT_GRID};
    pub use crate::neighborhood::{Neighborhood, Reduction};
    pub use crate::overflow::Overflow;
    pub use crate::rule::{Chain, DestView, PrecomputeCtx, Rule, RuleContext};
    pub use crate::ruleset::Ruleset;
    pub use crate::simdata::{ReplicateReduce, SimData};
    pub use crate::util::*;
}
