//! Stencils and reductions.  A neighborhood names which offsets around a cell count as neighbors
//! and how their values are folded into the single reduction result handed to a rule.

use num_traits::{One, Zero};
use std::ops::{Add, Sub};

use crate::cell::CellState;

fn clone_cell<C: CellState>(cell: &C) -> C {
    cell.clone()
}

fn add_acc<C: CellState + Add<Output = C>>(acc: C, other: &C) -> C {
    acc + other.clone()
}

fn sub_acc<C: CellState + Sub<Output = C>>(acc: C, other: &C) -> C {
    acc - other.clone()
}

fn one_if_nonzero<C: CellState + Zero + One + PartialEq>(cell: &C) -> C {
    if *cell == C::zero() {
        C::zero()
    } else {
        C::one()
    }
}

/// A reduction kernel over neighborhood cells.
///
/// Kernels fold present cells only: under `Skip` overflow an out-of-bounds neighbor is never
/// folded in, so count-style kernels see it as absent rather than as a zero.
///
/// An `Invertible` kernel is expressed as a cell-to-accumulator `map` plus an associative
/// `merge` with inverse `unmerge` over accumulators; that decomposition is what lets the
/// buffered sweep keep per-column partial reductions and update a moving window instead of
/// refolding the whole stencil per cell.
#[derive(Clone)]
pub enum Reduction<C: CellState> {
    Invertible {
        identity: C,
        map: fn(&C) -> C,
        merge: fn(C, &C) -> C,
        unmerge: fn(C, &C) -> C,
    },
    Fold {
        identity: C,
        combine: fn(C, &C) -> C,
    },
}

impl<C: CellState> Reduction<C> {
    /// Sum of neighbor values.  Invertible.
    pub fn sum() -> Reduction<C>
    where
        C: Add<Output = C> + Sub<Output = C> + Zero,
    {
        Reduction::Invertible {
            identity: C::zero(),
            map: clone_cell::<C>,
            merge: add_acc::<C>,
            unmerge: sub_acc::<C>,
        }
    }

    /// Count of non-zero neighbor values.  Invertible: partial counts merge by addition.
    pub fn count() -> Reduction<C>
    where
        C: Add<Output = C> + Sub<Output = C> + Zero + One + PartialEq,
    {
        Reduction::Invertible {
            identity: C::zero(),
            map: one_if_nonzero::<C>,
            merge: add_acc::<C>,
            unmerge: sub_acc::<C>,
        }
    }

    /// Custom fold re-evaluated from `identity` for every cell.  Never uses the moving-window
    /// update.
    pub fn fold(identity: C, combine: fn(C, &C) -> C) -> Reduction<C> {
        Reduction::Fold { identity, combine }
    }

    /// Custom associative-with-inverse kernel, eligible for the moving-window update.
    /// `merge(acc, &map(cell))` must equal folding the cell in directly.
    pub fn invertible(identity: C, map: fn(&C) -> C, merge: fn(C, &C) -> C, unmerge: fn(C, &C) -> C) -> Reduction<C> {
        Reduction::Invertible {
            identity,
            map,
            merge,
            unmerge,
        }
    }

    pub fn is_invertible(&self) -> bool {
        matches!(self, Reduction::Invertible { .. })
    }

    pub(crate) fn identity(&self) -> C {
        match self {
            Reduction::Invertible { identity, .. } => identity.clone(),
            Reduction::Fold { identity, .. } => identity.clone(),
        }
    }

    /// Folds one neighbor cell into the accumulator.
    #[inline]
    pub(crate) fn fold_cell(&self, acc: C, cell: &C) -> C {
        match self {
            Reduction::Invertible { map, merge, .. } => merge(acc, &map(cell)),
            Reduction::Fold { combine, .. } => combine(acc, cell),
        }
    }

    /// Folds an iterator of present cells.
    pub(crate) fn reduce<'a>(&self, cells: impl Iterator<Item = &'a C>) -> C
    where
        C: 'a,
    {
        cells.fold(self.identity(), |acc, cell| self.fold_cell(acc, cell))
    }
}

/// An immutable stencil of `(dx, dy)` offsets around a center cell plus a reduction kernel.
#[derive(Clone)]
pub struct Neighborhood<C: CellState> {
    offsets: Vec<(isize, isize)>,
    /// `Some(r)` when the stencil is exactly the Chebyshev-radius-r box minus the center, the
    /// shape the box-sum fast path understands.
    radial: Option<usize>,
    reduction: Reduction<C>,
}

impl<C: CellState> Neighborhood<C> {
    /// All offsets within Chebyshev distance `r` of the center, excluding `(0, 0)`.
    pub fn radial(radius: usize, reduction: Reduction<C>) -> Neighborhood<C> {
        assert!(radius > 0, "a radial neighborhood needs a positive radius");
        let r = radius as isize;
        let mut offsets = Vec::with_capacity((2 * radius + 1) * (2 * radius + 1) - 1);
        for dy in -r..=r {
            for dx in -r..=r {
                if dx != 0 || dy != 0 {
                    offsets.push((dx, dy));
                }
            }
        }
        Neighborhood {
            offsets,
            radial: Some(radius),
            reduction,
        }
    }

    /// The classic Moore neighborhood: `radial(1)`.
    pub fn moore(reduction: Reduction<C>) -> Neighborhood<C> {
        Neighborhood::radial(1, reduction)
    }

    /// An arbitrary stencil.  Including the center offset is permitted but unusual.
    pub fn custom(offsets: Vec<(isize, isize)>, reduction: Reduction<C>) -> Neighborhood<C> {
        assert!(!offsets.is_empty(), "a stencil needs at least one offset");
        Neighborhood {
            offsets,
            radial: None,
            reduction,
        }
    }

    pub fn offsets(&self) -> &[(isize, isize)] {
        &self.offsets
    }

    pub fn reduction(&self) -> &Reduction<C> {
        &self.reduction
    }

    pub(crate) fn radial_radius(&self) -> Option<usize> {
        self.radial
    }

    /// Largest Chebyshev distance any offset reaches; sizes the row window of a buffered sweep.
    pub(crate) fn radius_bound(&self) -> usize {
        self.offsets
            .iter()
            .map(|&(dx, dy)| dx.abs().max(dy.abs()) as usize)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radial_excludes_center_and_counts_offsets() {
        let hood: Neighborhood<u8> = Neighborhood::radial(2, Reduction::sum());
        assert_eq!(hood.offsets().len(), 24);
        assert!(!hood.offsets().contains(&(0, 0)));
        assert_eq!(hood.radius_bound(), 2);
    }

    #[test]
    fn count_ignores_zero_cells() {
        let red: Reduction<u8> = Reduction::count();
        let cells = [0u8, 3, 0, 1];
        assert_eq!(red.reduce(cells.iter()), 2);
    }

    #[test]
    fn count_partials_merge_by_addition() {
        let red: Reduction<u8> = Reduction::count();
        match &red {
            Reduction::Invertible { map, merge, unmerge, identity } => {
                let left = merge(identity.clone(), &map(&5));
                let right = merge(identity.clone(), &map(&1));
                let both = merge(left.clone(), &right);
                assert_eq!(both, 2);
                assert_eq!(unmerge(both, &right), left);
            }
            Reduction::Fold { .. } => panic!("count must be invertible"),
        }
    }
}
