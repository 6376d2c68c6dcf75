//! Per-run mutable state: the named double-buffered grids (one set per replicate), auxiliary
//! read-only arrays, the possibly pre-computed ruleset, and the time/frame counters the driver
//! advances between frames.

use std::collections::BTreeMap;
use std::ops::{Add, Div};

use num_traits::{FromPrimitive, Zero};

use crate::cell::CellState;
use crate::error::Error;
use crate::grid::{Grid, GridPair, Mask, DEFAULT_GRID};
use crate::rule::{PrecomputeCtx, Rule};
use crate::ruleset::Ruleset;

fn sum_cells<C: CellState + Add<Output = C>>(acc: C, cell: &C) -> C {
    acc + cell.clone()
}

fn mean_finish<C: CellState + Div<Output = C> + FromPrimitive>(acc: C, n: usize) -> C {
    match C::from_usize(n) {
        Some(divisor) => acc / divisor,
        None => acc,
    }
}

fn first_finish<C: CellState>(acc: C, _n: usize) -> C {
    acc
}

/// How the per-frame aggregate over replicates is formed before delivery to the sink.
#[derive(Clone)]
pub struct ReplicateReduce<C: CellState> {
    combine: fn(C, &C) -> C,
    finish: fn(C, usize) -> C,
}

impl<C: CellState> ReplicateReduce<C> {
    /// Cellwise mean across replicates.  The default for stochastic runs.
    pub fn mean() -> ReplicateReduce<C>
    where
        C: Zero + Add<Output = C> + Div<Output = C> + FromPrimitive,
    {
        ReplicateReduce {
            combine: sum_cells::<C>,
            finish: mean_finish::<C>,
        }
    }

    /// Passes replicate 0 through unchanged.
    pub fn first() -> ReplicateReduce<C> {
        fn keep_acc<C: CellState>(acc: C, _cell: &C) -> C {
            acc
        }
        ReplicateReduce {
            combine: keep_acc::<C>,
            finish: first_finish::<C>,
        }
    }

    /// Custom cellwise fold: `combine` accumulates over replicates starting from replicate 0's
    /// value, `finish` receives the accumulator and the replicate count.
    pub fn custom(combine: fn(C, &C) -> C, finish: fn(C, usize) -> C) -> ReplicateReduce<C> {
        ReplicateReduce { combine, finish }
    }

    fn reduce(&self, grids: &[&Grid<C>]) -> Grid<C> {
        debug_assert!(!grids.is_empty());
        let shape = grids[0].shape();
        Grid::from_fn(shape.0, shape.1, |x, y| {
            let acc = grids
                .iter()
                .skip(1)
                .fold(grids[0].get(x, y).clone(), |acc, grid| (self.combine)(acc, grid.get(x, y)));
            (self.finish)(acc, grids.len())
        })
    }
}

/// One replicate's named grid pairs.  Replicates never share storage.
#[derive(Clone)]
pub(crate) struct ReplicateState<C: CellState> {
    pub(crate) grids: Vec<(String, GridPair<C>)>,
}

impl<C: CellState> ReplicateState<C> {
    fn index_of(&self, name: &str) -> Result<usize, Error> {
        self.grids
            .iter()
            .position(|(grid_name, _)| grid_name == name)
            .ok_or_else(|| Error::UnknownGrid(name.to_owned()))
    }

    pub(crate) fn pair(&self, name: &str) -> Result<&GridPair<C>, Error> {
        self.index_of(name).map(move |index| &self.grids[index].1)
    }

    /// Splits out the views one sweep needs: the read grid's source, the write grid's source
    /// (masked destination cells copy from it), the write grid's destination, and the write
    /// grid's mask.  Read and write may be the same pair; source and destination buffers are
    /// still disjoint thanks to double buffering.
    pub(crate) fn rw(
        &mut self,
        read: &str,
        write: &str,
    ) -> Result<SweepGrids<'_, C>, Error> {
        let read_index = self.index_of(read)?;
        let write_index = self.index_of(write)?;
        if read_index == write_index {
            let pair = &mut self.grids[read_index].1;
            return Ok(SweepGrids {
                read_src: &pair.source,
                write_src: &pair.source,
                dst: &mut pair.dest,
                mask: pair.mask.as_ref(),
            });
        }
        let (read_pair, write_pair) = if read_index < write_index {
            let (left, right) = self.grids.split_at_mut(write_index);
            (&left[read_index].1, &mut right[0].1)
        } else {
            let (left, right) = self.grids.split_at_mut(read_index);
            let (write_slot, read_slot) = (&mut left[write_index].1, &right[0].1);
            (read_slot, write_slot)
        };
        Ok(SweepGrids {
            read_src: &read_pair.source,
            write_src: &write_pair.source,
            dst: &mut write_pair.dest,
            mask: write_pair.mask.as_ref(),
        })
    }

    /// Pre-initialises a grid's destination from its source, so a manual rule's missing writes
    /// default to pre-sweep values.
    pub(crate) fn copy_source_to_dest(&mut self, name: &str) -> Result<(), Error> {
        let index = self.index_of(name)?;
        let pair = &mut self.grids[index].1;
        pair.dest.cells_mut().clone_from_slice(pair.source.cells());
        Ok(())
    }

    pub(crate) fn swap(&mut self, name: &str) -> Result<(), Error> {
        let index = self.index_of(name)?;
        self.grids[index].1.swap();
        Ok(())
    }
}

/// The grid views backing one sweep.
pub(crate) struct SweepGrids<'a, C: CellState> {
    pub(crate) read_src: &'a Grid<C>,
    pub(crate) write_src: &'a Grid<C>,
    pub(crate) dst: &'a mut Grid<C>,
    pub(crate) mask: Option<&'a Mask>,
}

/// The per-run state container.  Constructed at simulation start, mutated by the driver between
/// frames, dropped when the run terminates.
pub struct SimData<C: CellState> {
    pub(crate) replicates: Vec<ReplicateState<C>>,
    pub(crate) aux: BTreeMap<String, Grid<C>>,
    pub(crate) ruleset: Ruleset<C>,
    pub(crate) shape: (usize, usize),
    pub(crate) t: f64,
    pub(crate) frame: usize,
}

impl<C: CellState> SimData<C> {
    /// Builds the run state: the init grid lands under `_default_`, extra named grids beside it,
    /// all replicated `replicates` times.  Every shape and every rule grid name is validated
    /// here so sweeps can assume congruence.
    pub fn new(
        ruleset: Ruleset<C>,
        init: Grid<C>,
        mask: Option<Mask>,
        named_grids: BTreeMap<String, Grid<C>>,
        aux: BTreeMap<String, Grid<C>>,
        replicates: usize,
    ) -> Result<SimData<C>, Error> {
        if ruleset.rules().is_empty() {
            return Err(Error::EmptyRuleset);
        }
        let replicates = replicates.max(1);
        let shape = init.shape();

        for (_, grid) in &named_grids {
            if grid.shape() != shape {
                return Err(Error::GridShapeMismatch {
                    what: "named grid",
                    expected: shape,
                    found: grid.shape(),
                });
            }
        }
        for (_, grid) in &aux {
            if grid.shape() != shape {
                return Err(Error::GridShapeMismatch {
                    what: "aux array",
                    expected: shape,
                    found: grid.shape(),
                });
            }
        }

        let mut grids = Vec::with_capacity(1 + named_grids.len());
        grids.push((DEFAULT_GRID.to_owned(), GridPair::new(init, mask)?));
        for (name, grid) in named_grids {
            grids.push((name, GridPair::new(grid, None)?));
        }
        let template = ReplicateState { grids };

        for rule in ruleset.rules() {
            template.index_of(rule.read_grid())?;
            template.index_of(rule.write_grid())?;
        }

        Ok(SimData {
            replicates: vec![template; replicates],
            aux,
            ruleset,
            shape,
            t: 0.0,
            frame: 1,
        })
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn dt(&self) -> f64 {
        self.ruleset.dt()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn replicate_count(&self) -> usize {
        self.replicates.len()
    }

    pub fn ruleset(&self) -> &Ruleset<C> {
        &self.ruleset
    }

    /// Moves the clock to the given frame.  Called by the driver before each frame's sweeps.
    pub(crate) fn advance(&mut self, t: f64, frame: usize) {
        self.t = t;
        self.frame = frame;
    }

    /// Asks every rule for its pre-computed replacement and swaps the replacements into this
    /// run's ruleset.  The caller's ruleset is untouched; replacements carry their hooks so the
    /// next frame re-derives them.
    pub(crate) fn precompute_rules(&mut self) -> Result<(), Error> {
        let dt = self.ruleset.dt();
        let ctx = PrecomputeCtx {
            t: self.t,
            dt,
            frame: self.frame,
            shape: self.shape,
            aux: &self.aux,
        };
        let mut replacements: Vec<Rule<C>> = Vec::with_capacity(self.ruleset.rules().len());
        for rule in self.ruleset.rules() {
            replacements.push(rule.precomputed(&ctx)?);
        }
        *self.ruleset.rules_mut() = replacements;
        Ok(())
    }

    /// The current source buffer of a named grid in replicate 0.
    pub fn grid(&self, name: &str) -> Result<&Grid<C>, Error> {
        Ok(&self.replicates[0].pair(name)?.source)
    }

    /// Reuses this run state for a fresh run: the init overwrites the default grid's source in
    /// every replicate, the ruleset is replaced, and the clock resets.  Extra named grids and
    /// aux arrays are kept as-is.
    pub(crate) fn reinit(
        &mut self,
        ruleset: Ruleset<C>,
        init: Grid<C>,
        mask: Option<Mask>,
    ) -> Result<(), Error> {
        if ruleset.rules().is_empty() {
            return Err(Error::EmptyRuleset);
        }
        if init.shape() != self.shape {
            return Err(Error::GridShapeMismatch {
                what: "reused simdata",
                expected: self.shape,
                found: init.shape(),
            });
        }
        for rule in ruleset.rules() {
            self.replicates[0].index_of(rule.read_grid())?;
            self.replicates[0].index_of(rule.write_grid())?;
        }
        for replicate in &mut self.replicates {
            for (name, pair) in &mut replicate.grids {
                if name.as_str() == DEFAULT_GRID {
                    pair.source.cells_mut().clone_from_slice(init.cells());
                    pair.mask = mask.clone();
                }
            }
        }
        self.ruleset = ruleset;
        self.t = 0.0;
        self.frame = 1;
        Ok(())
    }

    /// The frame to deliver to the sink: the default grid's current source buffer, aggregated
    /// across replicates.
    pub(crate) fn frame_grid(&self, reduce: &ReplicateReduce<C>) -> Result<Grid<C>, Error> {
        let mut sources = Vec::with_capacity(self.replicates.len());
        for replicate in &self.replicates {
            sources.push(&replicate.pair(DEFAULT_GRID)?.source);
        }
        if sources.len() == 1 {
            return Ok(sources[0].clone());
        }
        Ok(reduce.reduce(&sources))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;

    #[test]
    fn rejects_mismatched_aux_shape() {
        let ruleset = Ruleset::new(vec![Rule::cell(|_, v: u8| v)]);
        let init = Grid::filled(3, 3, 0u8);
        let mut aux = BTreeMap::new();
        aux.insert("wind".to_owned(), Grid::filled(2, 3, 0u8));
        let result = SimData::new(ruleset, init, None, BTreeMap::new(), aux, 1);
        assert!(matches!(result, Err(Error::GridShapeMismatch { .. })));
    }

    #[test]
    fn rejects_unknown_rule_grid() {
        let ruleset = Ruleset::new(vec![Rule::cell(|_, v: u8| v).with_grids("missing", "missing")]);
        let init = Grid::filled(3, 3, 0u8);
        let result = SimData::new(ruleset, init, None, BTreeMap::new(), BTreeMap::new(), 1);
        assert!(matches!(result, Err(Error::UnknownGrid(_))));
    }

    #[test]
    fn mean_reduce_averages_cellwise() {
        let a = Grid::filled(2, 2, 2.0f64);
        let b = Grid::filled(2, 2, 4.0f64);
        let reduce = ReplicateReduce::mean();
        let out = reduce.reduce(&[&a, &b]);
        assert_eq!(*out.get(0, 0), 3.0);
        assert_eq!(*out.get(1, 1), 3.0);
    }
}
