//! Shared fixtures for the integration suite.

use lattica::prelude::*;

/// Conway Life, B3/S23, over a count reduction.
pub fn life() -> Rule<u8> {
    Rule::neighborhood(
        Neighborhood::moore(Reduction::count()),
        |_, neighbors: u8, cell: u8| match (cell != 0, neighbors) {
            (true, 2) | (true, 3) | (false, 3) => 1,
            _ => 0,
        },
    )
}

/// A grid of zeros with the listed `(x, y)` cells set to 1.
pub fn grid_with_live(width: usize, height: usize, live: &[(usize, usize)]) -> Grid<u8> {
    Grid::from_fn(width, height, |x, y| u8::from(live.contains(&(x, y))))
}

/// Runs a ruleset over `tspan = (0, t_end)` into a fresh memory sink and returns the frames.
pub fn run(ruleset: &Ruleset<u8>, init: Grid<u8>, t_end: f64) -> Vec<Grid<u8>> {
    let mut sink = MemorySink::new();
    BasicDriver::start(&mut sink, ruleset, SimOptions::new((0.0, t_end)).with_init(init))
        .expect("simulation failed");
    sink.into_frames()
}
