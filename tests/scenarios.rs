//! End-to-end scenarios: whole runs through the driver, checked frame by frame.

mod common;

use common::{grid_with_live, life, run};
use lattica::prelude::*;

#[test]
fn life_blinker_oscillates_on_the_torus() {
    let init = grid_with_live(5, 5, &[(2, 1), (2, 2), (2, 3)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Wrap);

    let frames = run(&ruleset, init.clone(), 2.0);

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], init);
    assert_eq!(frames[1], grid_with_live(5, 5, &[(1, 2), (2, 2), (3, 2)]));
    assert_eq!(frames[2], init);
}

#[test]
fn life_block_is_a_still_life_under_skip() {
    let init = grid_with_live(4, 4, &[(1, 1), (2, 1), (1, 2), (2, 2)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Skip);

    let frames = run(&ruleset, init.clone(), 4.0);

    assert_eq!(frames.len(), 5);
    for frame in &frames {
        assert_eq!(*frame, init);
    }
}

#[test]
fn copy_rule_is_the_identity() {
    let init = Grid::from_fn(6, 4, |x, y| ((x * 3 + y * 5) % 7) as u8);
    let ruleset = Ruleset::new(vec![Rule::cell(|_, cell| cell)]);

    let frames = run(&ruleset, init.clone(), 5.0);

    assert_eq!(frames.len(), 6);
    for frame in &frames {
        assert_eq!(*frame, init);
    }
}

#[test]
fn masked_cell_survives_a_clearing_rule() {
    let init = Grid::filled(3, 3, 1u8);
    let mask = Mask::from_fn(3, 3, |x, y| !(x == 1 && y == 1));
    let ruleset = Ruleset::new(vec![Rule::cell(|_, _| 0u8)]);

    let mut sink = MemorySink::new();
    BasicDriver::start(
        &mut sink,
        &ruleset,
        SimOptions::new((0.0, 1.0)).with_init(init).with_mask(mask),
    )
    .unwrap();

    let frame = sink.at(1).unwrap();
    for ((x, y), cell) in frame.iter() {
        let expected = u8::from(x == 1 && y == 1);
        assert_eq!(*cell, expected, "cell ({}, {})", x, y);
    }
}

#[test]
fn chain_fusion_matches_the_unfused_ruleset() {
    let init = Grid::from_fn(4, 4, |x, y| (x + y) as u32);
    let bump = || Rule::cell(|_, v: u32| v + 1);
    let double = || Rule::cell(|_, v: u32| v * 2);

    let sequential = Ruleset::new(vec![bump(), double()]);
    let chained = Ruleset::new(vec![Rule::chain(vec![bump(), double()]).unwrap()]);

    let mut seq_sink = MemorySink::new();
    BasicDriver::start(&mut seq_sink, &sequential, SimOptions::new((0.0, 3.0)).with_init(init.clone())).unwrap();
    let mut chain_sink = MemorySink::new();
    BasicDriver::start(&mut chain_sink, &chained, SimOptions::new((0.0, 3.0)).with_init(init.clone())).unwrap();

    assert_eq!(seq_sink.frames(), chain_sink.frames());

    // closed form: one frame maps v to 2 * (v + 1)
    let after_one = seq_sink.at(1).unwrap();
    for ((x, y), cell) in after_one.iter() {
        assert_eq!(*cell, 2 * (*init.get(x, y) + 1));
    }
}

#[test]
fn resume_continues_the_interrupted_run_exactly() {
    let init = grid_with_live(5, 5, &[(2, 1), (2, 2), (2, 3)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Wrap);

    let full = run(&ruleset, init.clone(), 5.0);
    assert_eq!(full.len(), 6);

    let mut sink = MemorySink::new();
    BasicDriver::start(&mut sink, &ruleset, SimOptions::new((0.0, 3.0)).with_init(init)).unwrap();
    assert_eq!(sink.len(), 4);
    BasicDriver::resume(&mut sink, &ruleset, ResumeOptions::new(5.0)).unwrap();

    assert_eq!(sink.len(), full.len());
    assert_eq!(sink.frames(), &full[..]);
}

#[test]
fn manual_rule_defaults_missing_writes_to_source() {
    // shift every cell one column right; column 0 keeps its pre-sweep value
    let init = Grid::from_rows(vec![vec![1u8, 2, 3]]).unwrap();
    let shift = Rule::manual(|ctx: &RuleContext<'_, u8>, dest: &mut DestView<'_, u8>| {
        let (x, y) = ctx.index;
        if let Some(cell) = ctx.read(x as isize, y as isize) {
            dest.write(x + 1, y, *cell);
        }
    });
    let ruleset = Ruleset::new(vec![shift]);

    let frames = run(&ruleset, init, 1.0);
    assert_eq!(frames[1], Grid::from_rows(vec![vec![1u8, 1, 2]]).unwrap());
}

#[test]
fn aux_arrays_reach_rules_through_the_context() {
    let init = Grid::filled(3, 3, 0u32);
    let bias = Grid::from_fn(3, 3, |x, _| x as u32);
    let add_bias = Rule::cell(|ctx: &RuleContext<'_, u32>, v: u32| {
        v + ctx.aux("bias").copied().unwrap_or(0)
    });
    let ruleset = Ruleset::new(vec![add_bias]);

    let mut sink = MemorySink::new();
    BasicDriver::start(
        &mut sink,
        &ruleset,
        SimOptions::new((0.0, 2.0)).with_init(init).with_aux("bias", bias),
    )
    .unwrap();

    let last = sink.at(2).unwrap();
    for ((x, _), cell) in last.iter() {
        assert_eq!(*cell, 2 * x as u32);
    }
}

#[test]
fn rules_route_between_named_grids() {
    // rule 1 doubles the default grid into "shadow"; rule 2 copies shadow back plus one
    let init = Grid::filled(2, 2, 1u32);
    let double_out = Rule::cell(|_, v: u32| v * 2).with_grids(DEFAULT_GRID, "shadow");
    let copy_back = Rule::cell(|_, v: u32| v + 1).with_grids("shadow", DEFAULT_GRID);
    let ruleset = Ruleset::new(vec![double_out, copy_back]);

    let mut sink = MemorySink::new();
    BasicDriver::start(
        &mut sink,
        &ruleset,
        SimOptions::new((0.0, 2.0))
            .with_init(init)
            .with_grid("shadow", Grid::filled(2, 2, 0u32)),
    )
    .unwrap();

    // v -> 2v + 1 per frame: 1, 3, 7
    assert_eq!(*sink.at(0).unwrap().get(0, 0), 1);
    assert_eq!(*sink.at(1).unwrap().get(0, 0), 3);
    assert_eq!(*sink.at(2).unwrap().get(0, 0), 7);
}

#[test]
fn threaded_driver_returns_the_sink_through_join() {
    let init = grid_with_live(5, 5, &[(2, 1), (2, 2), (2, 3)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Wrap);

    let sink: MemorySink<u8> = MemorySink::asynchronous();
    let handle = ThreadedDriver::start(sink, ruleset, SimOptions::new((0.0, 4.0)).with_init(init.clone()));
    let (sink, result) = handle.join();

    assert_eq!(result.unwrap(), Termination::Finished);
    assert_eq!(sink.len(), 5);
    assert_eq!(*sink.at(0).unwrap(), init);
    assert_eq!(*sink.at(2).unwrap(), init);
}

#[test]
fn gif_sink_encodes_every_frame() {
    let path = std::env::temp_dir().join("lattica_blinker.gif");
    let init = grid_with_live(5, 5, &[(2, 1), (2, 2), (2, 3)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Wrap);

    let mut sink: GifSink<u8> =
        GifSink::new(&path, 5, 5, |cell| if *cell == 0 { [0, 0, 0] } else { [255, 255, 255] }).unwrap();
    BasicDriver::start(&mut sink, &ruleset, SimOptions::new((0.0, 3.0)).with_init(init)).unwrap();

    assert_eq!(sink.len(), 4);
    let written = std::fs::metadata(&path).unwrap().len();
    assert!(written > 0, "gif file should not be empty");
    let _ = std::fs::remove_file(&path);
}

/// A sink that cancels itself after a fixed number of frames.
struct StopAfter {
    inner: MemorySink<u8>,
    remaining: usize,
}

impl Sink<u8> for StopAfter {
    fn push_frame(&mut self, frame: &Grid<u8>, t: f64) -> Result<(), Error> {
        self.inner.push_frame(frame, t)?;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.inner.set_running(false);
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn at(&self, index: usize) -> Option<&Grid<u8>> {
        self.inner.at(index)
    }

    fn clear_frames(&mut self) {
        self.inner.clear_frames();
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn set_running(&mut self, running: bool) {
        self.inner.set_running(running);
    }

    fn start_time(&self) -> f64 {
        self.inner.start_time()
    }

    fn set_start_time(&mut self, t: f64) {
        self.inner.set_start_time(t);
    }

    fn stop_time(&self) -> f64 {
        self.inner.stop_time()
    }

    fn set_stop_time(&mut self, t: f64) {
        self.inner.set_stop_time(t);
    }

    fn fps(&self) -> f64 {
        self.inner.fps()
    }

    fn set_fps(&mut self, fps: f64) {
        self.inner.set_fps(fps);
    }
}

#[test]
fn clearing_the_running_flag_cancels_at_a_frame_boundary() {
    let init = grid_with_live(5, 5, &[(2, 1), (2, 2), (2, 3)]);
    let ruleset = Ruleset::new(vec![life()]).with_overflow(Overflow::Wrap);

    let mut sink = StopAfter {
        inner: MemorySink::new(),
        remaining: 4,
    };
    let result = BasicDriver::start(&mut sink, &ruleset, SimOptions::new((0.0, 100.0)).with_init(init));

    assert_eq!(result.unwrap(), Termination::Cancelled);
    assert_eq!(sink.len(), 4);
    assert!(!sink.is_running());
}
