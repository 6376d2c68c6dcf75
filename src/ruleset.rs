//! The ordered sequence of rules applied per time step, together with the run parameters they
//! share: timestep size, boundary overflow, and optionally a carried init grid and mask.

use crate::cell::CellState;
use crate::grid::{Grid, Mask};
use crate::overflow::Overflow;
use crate::rule::Rule;

/// Immutable run configuration.  Built once, cloned into the `SimData` at simulation start;
/// pre-computation replaces individual rules inside the SimData's copy, never in the original.
#[derive(Clone)]
pub struct Ruleset<C: CellState> {
    rules: Vec<Rule<C>>,
    dt: f64,
    overflow: Overflow,
    init: Option<Grid<C>>,
    mask: Option<Mask>,
}

impl<C: CellState> Ruleset<C> {
    pub fn new(rules: Vec<Rule<C>>) -> Ruleset<C> {
        Ruleset {
            rules,
            dt: 1.0,
            overflow: Overflow::default(),
            init: None,
            mask: None,
        }
    }

    /// Sets the timestep; frame f runs at `t_start + (f - 1) * dt`.
    pub fn with_dt(mut self, dt: f64) -> Ruleset<C> {
        self.dt = dt;
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Ruleset<C> {
        self.overflow = overflow;
        self
    }

    /// Carries an init grid with the ruleset.  An init passed to `Driver::start` takes
    /// precedence over this one.
    pub fn with_init(mut self, init: Grid<C>) -> Ruleset<C> {
        self.init = Some(init);
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> Ruleset<C> {
        self.mask = Some(mask);
        self
    }

    pub fn rules(&self) -> &[Rule<C>] {
        &self.rules
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Vec<Rule<C>> {
        &mut self.rules
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }

    pub fn init(&self) -> Option<&Grid<C>> {
        self.init.as_ref()
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }
}
