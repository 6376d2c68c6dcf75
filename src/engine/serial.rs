//! An engine that runs every sweep on the calling thread.  The simplest engine; also the
//! reference the parallel engine must agree with.

use crate::cell::CellState;
use crate::error::Error;
use crate::simdata::SimData;

use super::{step_frame, Engine};

#[derive(Debug, Default, Clone, Copy)]
pub struct SerialEngine;

impl SerialEngine {
    pub fn new() -> SerialEngine {
        SerialEngine
    }
}

impl<C: CellState> Engine<C> for SerialEngine {
    fn step(&mut self, data: &mut SimData<C>) -> Result<(), Error> {
        step_frame(data, 1)
    }
}
