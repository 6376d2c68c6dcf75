//! Rules are the units of simulation logic: immutable values tagged by capability, holding their
//! parameters and a function value.  The engine switches on the capability and runs the matching
//! sweep kernel; a `Chain` is itself a rule whose payload is a list of fusable inner rules.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cell::CellState;
use crate::error::Error;
use crate::grid::{Grid, Mask, DEFAULT_GRID};
use crate::neighborhood::Neighborhood;
use crate::overflow::Overflow;

/// Read-only per-cell view handed to every rule application.
pub struct RuleContext<'a, C: CellState> {
    /// Current simulation time.
    pub t: f64,
    /// Ruleset timestep.
    pub dt: f64,
    /// Current frame index (1-based; frame 1 is the init).
    pub frame: usize,
    /// The cell this application is for.
    pub index: (usize, usize),
    pub(crate) source: &'a Grid<C>,
    pub(crate) aux: &'a BTreeMap<String, Grid<C>>,
    pub(crate) overflow: Overflow,
}

impl<'a, C: CellState> RuleContext<'a, C> {
    /// Reads the source grid at an arbitrary coordinate through the run's overflow policy.
    /// `None` means the read fell outside the grid under `Skip`.
    pub fn read(&self, x: isize, y: isize) -> Option<&'a C> {
        self.overflow
            .resolve(x, y, self.source.width(), self.source.height())
            .map(|(rx, ry)| self.source.get(rx, ry))
    }

    /// The value of a named auxiliary array at this cell's index.
    pub fn aux(&self, name: &str) -> Option<&'a C> {
        self.aux.get(name).map(|grid| grid.get(self.index.0, self.index.1))
    }

    /// A whole named auxiliary array.
    pub fn aux_grid(&self, name: &str) -> Option<&'a Grid<C>> {
        self.aux.get(name)
    }

    /// Shape of the grids in this run.
    pub fn shape(&self) -> (usize, usize) {
        self.source.shape()
    }
}

/// Write handle a manual rule uses to touch arbitrary destination cells.  Out-of-bounds writes
/// are dropped; writes to masked cells are dropped so masked values survive the frame untouched.
pub struct DestView<'a, C: CellState> {
    pub(crate) grid: &'a mut Grid<C>,
    pub(crate) mask: Option<&'a Mask>,
}

impl<'a, C: CellState> DestView<'a, C> {
    pub fn write(&mut self, x: usize, y: usize, value: C) {
        if x >= self.grid.width() || y >= self.grid.height() {
            return;
        }
        if let Some(mask) = self.mask {
            if !mask.active(x, y) {
                return;
            }
        }
        self.grid.set(x, y, value);
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }
}

/// Context handed to a pre-compute hook: the time-dependent data a rule may bake per-run state
/// out of.  Hooks are referentially transparent; they return a replacement rule value and leave
/// the original untouched.
pub struct PrecomputeCtx<'a, C: CellState> {
    pub t: f64,
    pub dt: f64,
    pub frame: usize,
    pub shape: (usize, usize),
    pub aux: &'a BTreeMap<String, Grid<C>>,
}

pub type CellFn<C> = Arc<dyn Fn(&RuleContext<'_, C>, C) -> C + Send + Sync>;
pub type NeighborhoodFn<C> = Arc<dyn Fn(&RuleContext<'_, C>, C, C) -> C + Send + Sync>;
pub type ManualFn<C> = Arc<dyn Fn(&RuleContext<'_, C>, &mut DestView<'_, C>) + Send + Sync>;
pub type PrecomputeFn<C> = Arc<dyn Fn(&PrecomputeCtx<'_, C>) -> Rule<C> + Send + Sync>;

/// A rule reading only its own cell: `(ctx, cell) -> cell`.
#[derive(Clone)]
pub struct CellRule<C: CellState> {
    pub(crate) read_grid: String,
    pub(crate) write_grid: String,
    pub(crate) apply: CellFn<C>,
    pub(crate) precompute: Option<PrecomputeFn<C>>,
}

/// A rule reading its cell plus a stencil reduction: `(ctx, reduction, cell) -> cell`.
#[derive(Clone)]
pub struct NeighborhoodRule<C: CellState> {
    pub(crate) read_grid: String,
    pub(crate) write_grid: String,
    pub(crate) neighborhood: Neighborhood<C>,
    pub(crate) apply: NeighborhoodFn<C>,
    pub(crate) precompute: Option<PrecomputeFn<C>>,
}

/// A rule that writes zero or more arbitrary destination cells itself.  The destination is
/// pre-initialised from the source before the sweep, so missing writes default to source values;
/// overlapping writes resolve last-writer-wins.
#[derive(Clone)]
pub struct ManualRule<C: CellState> {
    pub(crate) read_grid: String,
    pub(crate) write_grid: String,
    pub(crate) apply: ManualFn<C>,
    pub(crate) precompute: Option<PrecomputeFn<C>>,
}

/// An ordered sequence of cell/neighborhood rules fused to share one sweep.  The intermediate
/// cell value of link k feeds link k+1 through a register, never the grid; every neighborhood
/// reduction inside the chain is computed from the unmodified source grid.
#[derive(Clone)]
pub struct Chain<C: CellState> {
    pub(crate) links: Vec<Rule<C>>,
}

impl<C: CellState> Chain<C> {
    /// Builds a chain, rejecting links that cannot be fused (manual rules, nested chains, or
    /// links that do not read and write the same single grid).
    pub fn new(links: Vec<Rule<C>>) -> Result<Chain<C>, Error> {
        if links.is_empty() {
            return Err(Error::InvalidChain("a chain needs at least one link"));
        }
        for link in &links {
            Chain::check_link(link)?;
        }
        let read = links[0].read_grid();
        if links.iter().any(|link| link.read_grid() != read) {
            return Err(Error::InvalidChain("all links must share one grid"));
        }
        Ok(Chain { links })
    }

    pub(crate) fn check_link(link: &Rule<C>) -> Result<(), Error> {
        match link {
            Rule::Cell(rule) if rule.read_grid == rule.write_grid => Ok(()),
            Rule::Neighborhood(rule) if rule.read_grid == rule.write_grid => Ok(()),
            Rule::Cell(_) | Rule::Neighborhood(_) => {
                Err(Error::InvalidChain("links must read and write the same grid"))
            }
            Rule::Manual(_) => Err(Error::InvalidChain("manual rules cannot be fused")),
            Rule::Chain(_) => Err(Error::InvalidChain("chains cannot nest")),
        }
    }

    pub fn links(&self) -> &[Rule<C>] {
        &self.links
    }
}

/// A rule, tagged by capability.
#[derive(Clone)]
pub enum Rule<C: CellState> {
    Cell(CellRule<C>),
    Neighborhood(NeighborhoodRule<C>),
    Manual(ManualRule<C>),
    Chain(Chain<C>),
}

impl<C: CellState> Rule<C> {
    /// A cell rule on the default grid.
    pub fn cell(apply: impl Fn(&RuleContext<'_, C>, C) -> C + Send + Sync + 'static) -> Rule<C> {
        Rule::Cell(CellRule {
            read_grid: DEFAULT_GRID.to_owned(),
            write_grid: DEFAULT_GRID.to_owned(),
            apply: Arc::new(apply),
            precompute: None,
        })
    }

    /// A neighborhood rule on the default grid.
    pub fn neighborhood(
        neighborhood: Neighborhood<C>,
        apply: impl Fn(&RuleContext<'_, C>, C, C) -> C + Send + Sync + 'static,
    ) -> Rule<C> {
        Rule::Neighborhood(NeighborhoodRule {
            read_grid: DEFAULT_GRID.to_owned(),
            write_grid: DEFAULT_GRID.to_owned(),
            neighborhood,
            apply: Arc::new(apply),
            precompute: None,
        })
    }

    /// A manual rule on the default grid.
    pub fn manual(apply: impl Fn(&RuleContext<'_, C>, &mut DestView<'_, C>) + Send + Sync + 'static) -> Rule<C> {
        Rule::Manual(ManualRule {
            read_grid: DEFAULT_GRID.to_owned(),
            write_grid: DEFAULT_GRID.to_owned(),
            apply: Arc::new(apply),
            precompute: None,
        })
    }

    /// A chain of fusable rules.
    pub fn chain(links: Vec<Rule<C>>) -> Result<Rule<C>, Error> {
        Chain::new(links).map(Rule::Chain)
    }

    /// Redirects the rule to read from `read` and write to `write` instead of the default grid.
    /// Chains keep their single shared grid and reject redirection.
    pub fn with_grids(mut self, read: &str, write: &str) -> Rule<C> {
        match &mut self {
            Rule::Cell(rule) => {
                rule.read_grid = read.to_owned();
                rule.write_grid = write.to_owned();
            }
            Rule::Neighborhood(rule) => {
                rule.read_grid = read.to_owned();
                rule.write_grid = write.to_owned();
            }
            Rule::Manual(rule) => {
                rule.read_grid = read.to_owned();
                rule.write_grid = write.to_owned();
            }
            Rule::Chain(_) => {}
        }
        self
    }

    /// Attaches a pre-compute hook.  Before the first sweep and again whenever the simulation
    /// time advances, the driver calls the hook and swaps the returned replacement rule into the
    /// ruleset; the hook travels with the replacement so later frames re-derive it.
    pub fn with_precompute(
        mut self,
        hook: impl Fn(&PrecomputeCtx<'_, C>) -> Rule<C> + Send + Sync + 'static,
    ) -> Rule<C> {
        let hook: PrecomputeFn<C> = Arc::new(hook);
        match &mut self {
            Rule::Cell(rule) => rule.precompute = Some(hook),
            Rule::Neighborhood(rule) => rule.precompute = Some(hook),
            Rule::Manual(rule) => rule.precompute = Some(hook),
            Rule::Chain(_) => {}
        }
        self
    }

    /// Name of the grid this rule reads.
    pub fn read_grid(&self) -> &str {
        match self {
            Rule::Cell(rule) => &rule.read_grid,
            Rule::Neighborhood(rule) => &rule.read_grid,
            Rule::Manual(rule) => &rule.read_grid,
            Rule::Chain(chain) => chain.links[0].read_grid(),
        }
    }

    /// Name of the grid this rule writes.
    pub fn write_grid(&self) -> &str {
        match self {
            Rule::Cell(rule) => &rule.write_grid,
            Rule::Neighborhood(rule) => &rule.write_grid,
            Rule::Manual(rule) => &rule.write_grid,
            Rule::Chain(chain) => chain.links[0].write_grid(),
        }
    }

    pub(crate) fn precompute_hook(&self) -> Option<&PrecomputeFn<C>> {
        match self {
            Rule::Cell(rule) => rule.precompute.as_ref(),
            Rule::Neighborhood(rule) => rule.precompute.as_ref(),
            Rule::Manual(rule) => rule.precompute.as_ref(),
            Rule::Chain(_) => None,
        }
    }

    /// Runs this rule's pre-compute hook (and those of chain links) against the current
    /// simulation state, returning the replacement rule.  The hook is re-attached to the
    /// replacement, so a hook that is a pure function of its context makes pre-computation
    /// idempotent: applying it twice at the same time yields the same rule value.
    pub fn precomputed(&self, ctx: &PrecomputeCtx<'_, C>) -> Result<Rule<C>, Error> {
        match self {
            Rule::Chain(chain) => {
                let mut links = Vec::with_capacity(chain.links.len());
                for link in &chain.links {
                    let replacement = link.precomputed(ctx)?;
                    Chain::check_link(&replacement)?;
                    links.push(replacement);
                }
                Ok(Rule::Chain(Chain { links }))
            }
            _ => match self.precompute_hook() {
                Some(hook) => {
                    let mut replacement = hook(ctx);
                    replacement.attach_precompute(Arc::clone(hook));
                    Ok(replacement)
                }
                None => Ok(self.clone()),
            },
        }
    }

    /// Re-attaches the originating hook unless the replacement brought its own.
    fn attach_precompute(&mut self, hook: PrecomputeFn<C>) {
        let slot = match self {
            Rule::Cell(rule) => &mut rule.precompute,
            Rule::Neighborhood(rule) => &mut rule.precompute,
            Rule::Manual(rule) => &mut rule.precompute,
            Rule::Chain(_) => return,
        };
        if slot.is_none() {
            *slot = Some(hook);
        }
    }
}
