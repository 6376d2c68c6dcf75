//! The sweep kernels: one traversal of all cells applying a single rule (or chain).  Cell and
//! neighborhood kernels write row ranges so the parallel engine can hand disjoint destination
//! chunks to worker threads; the serial engine calls them with the full range.

use std::collections::BTreeMap;
use std::ops::Range;
use std::thread;

use crate::cell::CellState;
use crate::grid::{Grid, Mask};
use crate::neighborhood::{Neighborhood, Reduction};
use crate::overflow::Overflow;
use crate::rule::{CellRule, Chain, DestView, ManualRule, NeighborhoodRule, Rule, RuleContext};
use crate::util::wrap_coord;

/// Read-only per-sweep state shared by every cell application.
pub(crate) struct SweepEnv<'a, C: CellState> {
    pub t: f64,
    pub dt: f64,
    pub frame: usize,
    pub overflow: Overflow,
    pub aux: &'a BTreeMap<String, Grid<C>>,
}

impl<'a, C: CellState> SweepEnv<'a, C> {
    #[inline]
    fn ctx<'b>(&'b self, source: &'b Grid<C>, index: (usize, usize)) -> RuleContext<'b, C> {
        RuleContext {
            t: self.t,
            dt: self.dt,
            frame: self.frame,
            index,
            source,
            aux: self.aux,
            overflow: self.overflow,
        }
    }
}

/// Runs `kernel` over the destination rows, either whole (serial) or split into per-worker row
/// chunks backed by disjoint `&mut` slices of the destination buffer.
pub(crate) fn dispatch_rows<C, F>(dst: &mut Grid<C>, workers: usize, kernel: F)
where
    C: CellState,
    F: Fn(Range<usize>, &mut [C]) + Sync,
{
    let width = dst.width();
    let height = dst.height();
    let workers = workers.max(1).min(height);
    if workers == 1 {
        kernel(0..height, dst.cells_mut());
        return;
    }

    let rows_per_chunk = (height + workers - 1) / workers;
    let kernel = &kernel;
    thread::scope(|scope| {
        for (chunk_index, chunk) in dst.cells_mut().chunks_mut(rows_per_chunk * width).enumerate() {
            let y_start = chunk_index * rows_per_chunk;
            let rows = chunk.len() / width;
            scope.spawn(move || kernel(y_start..y_start + rows, chunk));
        }
    });
}

/// Sweep of a cell rule over a row range.
pub(crate) fn sweep_cell_rows<C: CellState>(
    rule: &CellRule<C>,
    env: &SweepEnv<'_, C>,
    read_src: &Grid<C>,
    write_src: &Grid<C>,
    mask: Option<&Mask>,
    y_range: Range<usize>,
    dst_rows: &mut [C],
) {
    let width = read_src.width();
    let y_start = y_range.start;
    for y in y_range {
        for x in 0..width {
            let out = if is_masked(mask, x, y) {
                write_src.get(x, y).clone()
            } else {
                (rule.apply)(&env.ctx(read_src, (x, y)), read_src.get(x, y).clone())
            };
            dst_rows[(y - y_start) * width + x] = out;
        }
    }
}

/// Sweep of a neighborhood rule over a row range.  Under `Wrap` the sweep keeps a sliding window
/// of overflow-resolved source rows so the hot loop never touches modulo arithmetic; invertible
/// kernels over radial stencils additionally get the moving box-reduction update.  Under `Skip`
/// every cell folds its present neighbors directly.
pub(crate) fn sweep_neighborhood_rows<C: CellState>(
    rule: &NeighborhoodRule<C>,
    env: &SweepEnv<'_, C>,
    read_src: &Grid<C>,
    write_src: &Grid<C>,
    mask: Option<&Mask>,
    y_range: Range<usize>,
    dst_rows: &mut [C],
) {
    match env.overflow {
        Overflow::Wrap => {
            sweep_neighborhood_wrapped(rule, env, read_src, write_src, mask, y_range, dst_rows)
        }
        Overflow::Skip => {
            let width = read_src.width();
            let y_start = y_range.start;
            for y in y_range {
                for x in 0..width {
                    let out = if is_masked(mask, x, y) {
                        write_src.get(x, y).clone()
                    } else {
                        let reduction = reduce_at(&rule.neighborhood, env.overflow, read_src, x, y);
                        (rule.apply)(&env.ctx(read_src, (x, y)), reduction, read_src.get(x, y).clone())
                    };
                    dst_rows[(y - y_start) * width + x] = out;
                }
            }
        }
    }
}

fn sweep_neighborhood_wrapped<C: CellState>(
    rule: &NeighborhoodRule<C>,
    env: &SweepEnv<'_, C>,
    read_src: &Grid<C>,
    write_src: &Grid<C>,
    mask: Option<&Mask>,
    y_range: Range<usize>,
    dst_rows: &mut [C],
) {
    let hood = &rule.neighborhood;
    let radius = hood.radius_bound().max(1);
    let width = read_src.width();
    let padded = width + 2 * radius;
    let y_start = y_range.start;

    // sliding window of 2r+1 source rows with wrap resolved once per row
    let mut window: Vec<Vec<C>> = Vec::with_capacity(2 * radius + 1);
    for dy in -(radius as isize)..=(radius as isize) {
        let mut row = Vec::with_capacity(padded);
        fill_wrapped_row(read_src, y_start as isize + dy, radius, &mut row);
        window.push(row);
    }

    let fast = hood.radial_radius().is_some() && hood.reduction().is_invertible();

    for y in y_range {
        if y != y_start {
            // recycle the outgoing top row's buffer as the incoming bottom row
            window.rotate_left(1);
            if let Some(row) = window.last_mut() {
                fill_wrapped_row(read_src, y as isize + radius as isize, radius, row);
            }
        }

        if fast {
            if let Reduction::Invertible {
                identity,
                map,
                merge,
                unmerge,
            } = hood.reduction()
            {
                // per-column partial reductions across the window rows
                let mut colsums: Vec<C> = Vec::with_capacity(padded);
                for k in 0..padded {
                    let mut acc = identity.clone();
                    for row in &window {
                        acc = merge(acc, &map(&row[k]));
                    }
                    colsums.push(acc);
                }
                // box reduction for x = 0, then slide: add the incoming column, drop the outgoing
                let mut acc = identity.clone();
                for colsum in colsums.iter().take(2 * radius + 1) {
                    acc = merge(acc, colsum);
                }
                for x in 0..width {
                    if x > 0 {
                        acc = unmerge(acc, &colsums[x - 1]);
                        acc = merge(acc, &colsums[x + 2 * radius]);
                    }
                    let center = &window[radius][x + radius];
                    let out = if is_masked(mask, x, y) {
                        write_src.get(x, y).clone()
                    } else {
                        let reduction = unmerge(acc.clone(), &map(center));
                        (rule.apply)(&env.ctx(read_src, (x, y)), reduction, center.clone())
                    };
                    dst_rows[(y - y_start) * width + x] = out;
                }
            }
        } else {
            let red = hood.reduction();
            for x in 0..width {
                let out = if is_masked(mask, x, y) {
                    write_src.get(x, y).clone()
                } else {
                    let mut acc = red.identity();
                    for &(dx, dy) in hood.offsets() {
                        let row = &window[(dy + radius as isize) as usize];
                        acc = red.fold_cell(acc, &row[(x as isize + radius as isize + dx) as usize]);
                    }
                    let center = &window[radius][x + radius];
                    (rule.apply)(&env.ctx(read_src, (x, y)), acc, center.clone())
                };
                dst_rows[(y - y_start) * width + x] = out;
            }
        }
    }
}

/// Sweep of a chain over a row range: the cell value threads through the links in a register;
/// every neighborhood reduction comes from the unmodified source grid.
pub(crate) fn sweep_chain_rows<C: CellState>(
    chain: &Chain<C>,
    env: &SweepEnv<'_, C>,
    src: &Grid<C>,
    mask: Option<&Mask>,
    y_range: Range<usize>,
    dst_rows: &mut [C],
) {
    let width = src.width();
    let y_start = y_range.start;
    for y in y_range {
        for x in 0..width {
            let out = if is_masked(mask, x, y) {
                src.get(x, y).clone()
            } else {
                let ctx = env.ctx(src, (x, y));
                let mut value = src.get(x, y).clone();
                for link in chain.links() {
                    value = match link {
                        Rule::Cell(rule) => (rule.apply)(&ctx, value),
                        Rule::Neighborhood(rule) => {
                            let reduction = reduce_at(&rule.neighborhood, env.overflow, src, x, y);
                            (rule.apply)(&ctx, reduction, value)
                        }
                        // rejected at chain construction and after pre-compute
                        Rule::Manual(_) | Rule::Chain(_) => value,
                    };
                }
                value
            };
            dst_rows[(y - y_start) * width + x] = out;
        }
    }
}

/// Sweep of a manual rule.  The caller has already pre-initialised the destination from the
/// write grid's source; this pass only runs the rule's own writes.
pub(crate) fn sweep_manual<C: CellState>(
    rule: &ManualRule<C>,
    env: &SweepEnv<'_, C>,
    read_src: &Grid<C>,
    dst: &mut Grid<C>,
    mask: Option<&Mask>,
) {
    let (width, height) = read_src.shape();
    let mut view = DestView { grid: dst, mask };
    for y in 0..height {
        for x in 0..width {
            if is_masked(mask, x, y) {
                continue;
            }
            (rule.apply)(&env.ctx(read_src, (x, y)), &mut view);
        }
    }
}

#[inline]
fn is_masked(mask: Option<&Mask>, x: usize, y: usize) -> bool {
    match mask {
        Some(mask) => !mask.active(x, y),
        None => false,
    }
}

/// Per-cell neighborhood reduction through the overflow policy.  The generic path: used under
/// `Skip`, inside chains, and anywhere the window machinery does not apply.
fn reduce_at<C: CellState>(
    hood: &Neighborhood<C>,
    overflow: Overflow,
    src: &Grid<C>,
    x: usize,
    y: usize,
) -> C {
    hood.reduction().reduce(hood.offsets().iter().filter_map(|&(dx, dy)| {
        overflow
            .resolve(x as isize + dx, y as isize + dy, src.width(), src.height())
            .map(|(rx, ry)| src.get(rx, ry))
    }))
}

fn fill_wrapped_row<C: CellState>(src: &Grid<C>, y: isize, radius: usize, row: &mut Vec<C>) {
    row.clear();
    let wy = wrap_coord(y, src.height());
    let padded = src.width() + 2 * radius;
    for k in 0..padded {
        let wx = wrap_coord(k as isize - radius as isize, src.width());
        row.push(src.get(wx, wy).clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a, C: CellState>(
        overflow: Overflow,
        aux: &'a BTreeMap<String, Grid<C>>,
    ) -> SweepEnv<'a, C> {
        SweepEnv {
            t: 0.0,
            dt: 1.0,
            frame: 1,
            overflow,
            aux,
        }
    }

    fn sum_rule(radius: usize) -> NeighborhoodRule<u32> {
        match Rule::neighborhood(
            Neighborhood::radial(radius, Reduction::sum()),
            |_, reduction, _| reduction,
        ) {
            Rule::Neighborhood(rule) => rule,
            _ => unreachable!(),
        }
    }

    /// The wrapped window/box fast path must agree with the per-cell fold, bit for bit.
    #[test]
    fn wrapped_fast_path_matches_generic_fold() {
        let src = Grid::from_fn(7, 5, |x, y| (x * 31 + y * 7) as u32 % 11);
        let aux = BTreeMap::new();
        let env = env(Overflow::Wrap, &aux);
        let rule = sum_rule(2);

        let mut fast = vec![0u32; src.len()];
        sweep_neighborhood_rows(&rule, &env, &src, &src, None, 0..src.height(), &mut fast);

        for ((x, y), _) in src.iter() {
            let expected = reduce_at(&rule.neighborhood, Overflow::Wrap, &src, x, y);
            assert_eq!(fast[y * src.width() + x], expected, "mismatch at ({}, {})", x, y);
        }
    }

    /// Custom stencils and non-invertible kernels take the window fold; it must agree with the
    /// direct per-cell reduction too.
    #[test]
    fn wrapped_window_fold_matches_generic_fold_for_custom_stencils() {
        fn max_cell(acc: u32, cell: &u32) -> u32 {
            acc.max(*cell)
        }
        let src = Grid::from_fn(6, 4, |x, y| (x * 13 + y * 5) as u32 % 17);
        let hood = Neighborhood::custom(vec![(-2, 0), (1, -1), (0, 2)], Reduction::fold(0, max_cell));
        let rule = match Rule::neighborhood(hood, |_, reduction, _| reduction) {
            Rule::Neighborhood(rule) => rule,
            _ => unreachable!(),
        };
        let aux = BTreeMap::new();
        let env = env(Overflow::Wrap, &aux);

        let mut out = vec![0u32; src.len()];
        sweep_neighborhood_rows(&rule, &env, &src, &src, None, 0..src.height(), &mut out);

        for ((x, y), _) in src.iter() {
            let expected = reduce_at(&rule.neighborhood, Overflow::Wrap, &src, x, y);
            assert_eq!(out[y * src.width() + x], expected, "mismatch at ({}, {})", x, y);
        }
    }

    #[test]
    fn skip_reduction_leaves_absent_neighbors_out() {
        let src = Grid::filled(3, 3, 1u32);
        let hood = Neighborhood::moore(Reduction::count());
        // corner cell has only 3 in-bounds neighbors
        assert_eq!(reduce_at(&hood, Overflow::Skip, &src, 0, 0), 3);
        // center sees all 8
        assert_eq!(reduce_at(&hood, Overflow::Skip, &src, 1, 1), 8);
    }

    #[test]
    fn chunked_dispatch_matches_serial_sweep() {
        let src = Grid::from_fn(6, 9, |x, y| (x + y) as u32);
        let rule = sum_rule(1);
        let aux = BTreeMap::new();
        let env = env(Overflow::Wrap, &aux);

        let mut serial = Grid::filled(6, 9, 0u32);
        sweep_neighborhood_rows(&rule, &env, &src, &src, None, 0..9, serial.cells_mut());

        let mut chunked = Grid::filled(6, 9, 0u32);
        dispatch_rows(&mut chunked, 4, |y_range, dst_rows| {
            sweep_neighborhood_rows(&rule, &env, &src, &src, None, y_range, dst_rows)
        });

        assert_eq!(serial, chunked);
    }

    #[test]
    fn manual_sweep_respects_mask_writes() {
        let src = Grid::filled(3, 3, 1u8);
        let mut dst = src.clone();
        let mask = Mask::from_fn(3, 3, |x, y| !(x == 2 && y == 2));
        let aux = BTreeMap::new();
        let env = env(Overflow::Skip, &aux);
        let rule = match Rule::manual(|ctx: &RuleContext<'_, u8>, dest: &mut DestView<'_, u8>| {
            let (x, y) = ctx.index;
            dest.write(x, y, 0);
            dest.write(2, 2, 0);
        }) {
            Rule::Manual(rule) => rule,
            _ => unreachable!(),
        };
        sweep_manual(&rule, &env, &src, &mut dst, Some(&mask));
        assert_eq!(*dst.get(0, 0), 0);
        assert_eq!(*dst.get(2, 2), 1, "masked cell must survive manual writes");
    }
}
