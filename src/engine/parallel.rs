//! An engine that spreads cell and neighborhood sweeps across worker threads.  Each worker gets
//! a disjoint chunk of destination rows, so the sweep stays observationally identical to the
//! serial engine: shared reads of the source buffer, exclusive writes to the destination.

use crate::cell::CellState;
use crate::error::Error;
use crate::simdata::SimData;

use super::{step_frame, Engine};

pub struct ParallelEngine {
    worker_count: usize,
}

impl ParallelEngine {
    /// One worker per logical CPU.
    pub fn new() -> ParallelEngine {
        ParallelEngine {
            worker_count: num_cpus::get(),
        }
    }

    pub fn with_workers(worker_count: usize) -> ParallelEngine {
        ParallelEngine {
            worker_count: worker_count.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

impl Default for ParallelEngine {
    fn default() -> ParallelEngine {
        ParallelEngine::new()
    }
}

impl<C: CellState> Engine<C> for ParallelEngine {
    fn step(&mut self, data: &mut SimData<C>) -> Result<(), Error> {
        step_frame(data, self.worker_count)
    }
}
