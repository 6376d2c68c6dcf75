//! Advances the simulation by exactly one frame per `step()` call: every top-level ruleset
//! entry gets one sweep over every replicate, with a source/destination swap between sweeps.

use crate::cell::CellState;
use crate::error::Error;
use crate::rule::Rule;
use crate::simdata::{ReplicateState, SimData};

pub mod parallel;
pub mod serial;
pub(crate) mod sweep;

pub use self::parallel::ParallelEngine;
pub use self::serial::SerialEngine;

/// One frame of simulation work.  The driver owns the clock and the sink; the engine owns the
/// sweeps.
pub trait Engine<C: CellState> {
    fn step(&mut self, data: &mut SimData<C>) -> Result<(), Error>;
}

/// Shared frame body for both engines: rules in ruleset order, each swept over every replicate,
/// destination promoted to source after each sweep.  `workers > 1` row-chunks cell and
/// neighborhood sweeps; manual rules and chains always run sequentially.
pub(crate) fn step_frame<C: CellState>(data: &mut SimData<C>, workers: usize) -> Result<(), Error> {
    let SimData {
        replicates,
        aux,
        ruleset,
        shape: _,
        t,
        frame,
    } = data;

    let rules: Vec<Rule<C>> = ruleset.rules().to_vec();
    let env = sweep::SweepEnv {
        t: *t,
        dt: ruleset.dt(),
        frame: *frame,
        overflow: ruleset.overflow(),
        aux,
    };

    for rule in &rules {
        for replicate in replicates.iter_mut() {
            sweep_rule(rule, replicate, &env, workers)?;
            replicate.swap(rule.write_grid())?;
        }
    }
    Ok(())
}

fn sweep_rule<C: CellState>(
    rule: &Rule<C>,
    replicate: &mut ReplicateState<C>,
    env: &sweep::SweepEnv<'_, C>,
    workers: usize,
) -> Result<(), Error> {
    match rule {
        Rule::Cell(cell_rule) => {
            let grids = replicate.rw(&cell_rule.read_grid, &cell_rule.write_grid)?;
            let (read_src, write_src, mask) = (grids.read_src, grids.write_src, grids.mask);
            sweep::dispatch_rows(grids.dst, workers, |y_range, dst_rows| {
                sweep::sweep_cell_rows(cell_rule, env, read_src, write_src, mask, y_range, dst_rows)
            });
        }
        Rule::Neighborhood(hood_rule) => {
            let grids = replicate.rw(&hood_rule.read_grid, &hood_rule.write_grid)?;
            let (read_src, write_src, mask) = (grids.read_src, grids.write_src, grids.mask);
            sweep::dispatch_rows(grids.dst, workers, |y_range, dst_rows| {
                sweep::sweep_neighborhood_rows(hood_rule, env, read_src, write_src, mask, y_range, dst_rows)
            });
        }
        Rule::Manual(manual_rule) => {
            // missing writes default to the write grid's pre-sweep values
            replicate.copy_source_to_dest(&manual_rule.write_grid)?;
            let grids = replicate.rw(&manual_rule.read_grid, &manual_rule.write_grid)?;
            sweep::sweep_manual(manual_rule, env, grids.read_src, grids.dst, grids.mask);
        }
        Rule::Chain(chain) => {
            let read = rule.read_grid().to_owned();
            let grids = replicate.rw(&read, &read)?;
            let height = grids.read_src.height();
            let (read_src, mask) = (grids.read_src, grids.mask);
            sweep::sweep_chain_rows(chain, env, read_src, mask, 0..height, grids.dst.cells_mut());
        }
    }
    Ok(())
}
