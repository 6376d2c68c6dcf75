//! Executes the simulation, driving progress forward frame by frame: advance the clock,
//! pre-compute rules, sweep the ruleset, deliver the frame to the sink, pace, check for
//! cancellation.  `BasicDriver` runs the loop on the calling thread; `ThreadedDriver` runs it
//! on a background thread with a cooperative yield per frame for asynchronous sinks.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::cell::CellState;
use crate::engine::{Engine, SerialEngine};
use crate::error::{Error, Termination};
use crate::grid::{Grid, Mask};
use crate::ruleset::Ruleset;
use crate::simdata::{ReplicateReduce, SimData};

pub mod sink;

use self::sink::Sink;

/// Per-run options for `start`.
pub struct SimOptions<C: CellState> {
    /// Initial grid.  Takes precedence over a ruleset-carried init.
    pub init: Option<Grid<C>>,
    /// Mask for the default grid.  Takes precedence over a ruleset-carried mask.
    pub mask: Option<Mask>,
    /// `(t_start, t_end)`, converted to the frame range `1..=floor((t_end - t_start) / dt) + 1`.
    pub tspan: (f64, f64),
    /// Target frames per second; `0` disables pacing.
    pub fps: f64,
    /// Number of independent grid-pair sets.  `1` for deterministic runs.
    pub replicates: usize,
    /// How replicate frames aggregate before delivery to the sink.
    pub reduce: ReplicateReduce<C>,
    /// Additional named grids beside `_default_`.
    pub grids: BTreeMap<String, Grid<C>>,
    /// Named read-only arrays exposed to rules through the context.
    pub aux: BTreeMap<String, Grid<C>>,
    /// Run state left over from an earlier run, reused instead of allocating fresh buffers.
    /// When set, `replicates`, `grids`, and `aux` are taken from the reused state.
    pub simdata: Option<SimData<C>>,
}

impl<C: CellState> SimOptions<C> {
    pub fn new(tspan: (f64, f64)) -> SimOptions<C> {
        SimOptions {
            init: None,
            mask: None,
            tspan,
            fps: 0.0,
            replicates: 1,
            reduce: ReplicateReduce::first(),
            grids: BTreeMap::new(),
            aux: BTreeMap::new(),
            simdata: None,
        }
    }

    pub fn with_simdata(mut self, simdata: SimData<C>) -> SimOptions<C> {
        self.simdata = Some(simdata);
        self
    }

    pub fn with_init(mut self, init: Grid<C>) -> SimOptions<C> {
        self.init = Some(init);
        self
    }

    pub fn with_mask(mut self, mask: Mask) -> SimOptions<C> {
        self.mask = Some(mask);
        self
    }

    pub fn with_fps(mut self, fps: f64) -> SimOptions<C> {
        self.fps = fps;
        self
    }

    pub fn with_replicates(mut self, replicates: usize, reduce: ReplicateReduce<C>) -> SimOptions<C> {
        self.replicates = replicates;
        self.reduce = reduce;
        self
    }

    pub fn with_grid(mut self, name: &str, grid: Grid<C>) -> SimOptions<C> {
        self.grids.insert(name.to_owned(), grid);
        self
    }

    pub fn with_aux(mut self, name: &str, grid: Grid<C>) -> SimOptions<C> {
        self.aux.insert(name.to_owned(), grid);
        self
    }
}

/// Options for `resume`; everything not listed here is taken from the sink and the ruleset.
pub struct ResumeOptions<C: CellState> {
    /// New stop time.  The resumed frames run at `stop_time + dt, ..., tstop`.
    pub tstop: f64,
    /// Replaces the sink's stored fps when set.
    pub fps: Option<f64>,
    /// Additional named grids, for rulesets that read or write beside `_default_`.
    pub grids: BTreeMap<String, Grid<C>>,
    /// Named read-only arrays exposed to rules through the context.
    pub aux: BTreeMap<String, Grid<C>>,
}

impl<C: CellState> ResumeOptions<C> {
    pub fn new(tstop: f64) -> ResumeOptions<C> {
        ResumeOptions {
            tstop,
            fps: None,
            grids: BTreeMap::new(),
            aux: BTreeMap::new(),
        }
    }

    pub fn with_fps(mut self, fps: f64) -> ResumeOptions<C> {
        self.fps = Some(fps);
        self
    }

    pub fn with_grid(mut self, name: &str, grid: Grid<C>) -> ResumeOptions<C> {
        self.grids.insert(name.to_owned(), grid);
        self
    }

    pub fn with_aux(mut self, name: &str, grid: Grid<C>) -> ResumeOptions<C> {
        self.aux.insert(name.to_owned(), grid);
        self
    }
}

/// Runs the simulation loop on the calling thread.
pub struct BasicDriver;

impl BasicDriver {
    /// Starts a fresh run with the default serial engine.
    pub fn start<C: CellState, S: Sink<C>>(
        sink: &mut S,
        ruleset: &Ruleset<C>,
        opts: SimOptions<C>,
    ) -> Result<Termination, Error> {
        BasicDriver::start_with(sink, ruleset, opts, &mut SerialEngine::new())
    }

    /// Starts a fresh run on a caller-supplied engine.
    pub fn start_with<C: CellState, S: Sink<C>, E: Engine<C>>(
        sink: &mut S,
        ruleset: &Ruleset<C>,
        opts: SimOptions<C>,
        engine: &mut E,
    ) -> Result<Termination, Error> {
        run_start(sink, ruleset, opts, engine, false)
    }

    /// Continues a finished run from the sink's last stored frame.
    pub fn resume<C: CellState, S: Sink<C>>(
        sink: &mut S,
        ruleset: &Ruleset<C>,
        opts: ResumeOptions<C>,
    ) -> Result<Termination, Error> {
        BasicDriver::resume_with(sink, ruleset, opts, &mut SerialEngine::new())
    }

    pub fn resume_with<C: CellState, S: Sink<C>, E: Engine<C>>(
        sink: &mut S,
        ruleset: &Ruleset<C>,
        opts: ResumeOptions<C>,
        engine: &mut E,
    ) -> Result<Termination, Error> {
        run_resume(sink, ruleset, opts, engine, false)
    }
}

/// Runs the simulation loop on a background thread, yielding after every frame so interactive
/// sinks can service input.  The sink travels with the thread and comes back through `join`.
pub struct ThreadedDriver;

impl ThreadedDriver {
    pub fn start<C, S>(sink: S, ruleset: Ruleset<C>, opts: SimOptions<C>) -> SimHandle<S>
    where
        C: CellState,
        S: Sink<C> + Send + 'static,
    {
        ThreadedDriver::start_with(sink, ruleset, opts, SerialEngine::new())
    }

    pub fn start_with<C, S, E>(mut sink: S, ruleset: Ruleset<C>, opts: SimOptions<C>, mut engine: E) -> SimHandle<S>
    where
        C: CellState,
        S: Sink<C> + Send + 'static,
        E: Engine<C> + Send + 'static,
    {
        if !sink.is_async() {
            debug!("threaded driver started on a synchronous sink");
        }
        let handle = thread::spawn(move || {
            let result = run_start(&mut sink, &ruleset, opts, &mut engine, true);
            (sink, result)
        });
        SimHandle { handle }
    }

    pub fn resume<C, S>(sink: S, ruleset: Ruleset<C>, opts: ResumeOptions<C>) -> SimHandle<S>
    where
        C: CellState,
        S: Sink<C> + Send + 'static,
    {
        let handle = thread::spawn(move || {
            let mut sink = sink;
            let result = run_resume(&mut sink, &ruleset, opts, &mut SerialEngine::new(), true);
            (sink, result)
        });
        SimHandle { handle }
    }
}

/// Join handle for a `ThreadedDriver` run.
pub struct SimHandle<S> {
    handle: thread::JoinHandle<(S, Result<Termination, Error>)>,
}

impl<S> SimHandle<S> {
    /// Blocks until the run terminates, returning the sink and the terminal state.  A panic on
    /// the driver thread is re-raised here.
    pub fn join(self) -> (S, Result<Termination, Error>) {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sleeps out the remainder of each frame's 1/fps budget, measured from the start of the run so
/// slow frames borrow from fast ones instead of accumulating drift.
struct Pacer {
    started: Instant,
    frame_budget: Option<Duration>,
}

impl Pacer {
    fn new(fps: f64) -> Pacer {
        Pacer {
            started: Instant::now(),
            frame_budget: if fps > 0.0 {
                Some(Duration::from_secs_f64(1.0 / fps))
            } else {
                None
            },
        }
    }

    fn pace(&self, frames_elapsed: u32) {
        if let Some(budget) = self.frame_budget {
            let deadline = self.started + budget * frames_elapsed;
            let now = Instant::now();
            if now < deadline {
                thread::sleep(deadline - now);
            }
        }
    }
}

/// `tspan` to frame count: `floor((t_end - t_start) / dt) + 1` frames, frame 1 at `t_start`.
fn frame_count(t_start: f64, t_end: f64, dt: f64) -> Result<usize, Error> {
    if !(dt > 0.0) || t_end < t_start {
        return Err(Error::BadTimespan);
    }
    let steps = ((t_end - t_start) / dt + 1e-9).floor();
    if steps < 0.0 {
        return Err(Error::BadTimespan);
    }
    Ok(steps as usize + 1)
}

fn run_start<C, S, E>(
    sink: &mut S,
    ruleset: &Ruleset<C>,
    opts: SimOptions<C>,
    engine: &mut E,
    yield_frames: bool,
) -> Result<Termination, Error>
where
    C: CellState,
    S: Sink<C>,
    E: Engine<C>,
{
    if sink.is_running() {
        return Err(Error::AlreadyRunning);
    }

    let SimOptions {
        init,
        mask,
        tspan,
        fps,
        replicates,
        reduce,
        grids,
        aux,
        simdata,
    } = opts;

    let init = match (init, ruleset.init()) {
        (Some(explicit), Some(carried)) => {
            if explicit.shape() != carried.shape() {
                warn!(
                    "explicit init {:?} overrides a ruleset-carried init of different shape {:?}",
                    explicit.shape(),
                    carried.shape()
                );
            }
            explicit
        }
        (Some(explicit), None) => explicit,
        (None, Some(carried)) => carried.clone(),
        (None, None) => return Err(Error::NoInit),
    };
    let mask = mask.or_else(|| ruleset.mask().cloned());

    let (t_start, t_end) = tspan;
    let last_frame = frame_count(t_start, t_end, ruleset.dt())?;

    let mut data = match simdata {
        Some(mut reused) => {
            reused.reinit(ruleset.clone(), init, mask)?;
            reused
        }
        None => SimData::new(ruleset.clone(), init, mask, grids, aux, replicates)?,
    };
    data.advance(t_start, 1);

    sink.clear_frames();
    sink.set_fps(fps);
    sink.set_start_time(t_start);
    sink.set_stop_time(t_start);
    sink.set_running(true);
    if !sink.is_running() {
        return Err(Error::SinkRejectedStart);
    }

    info!(
        "starting simulation driver: {} frames over t = [{}, {}], {} replicate(s)",
        last_frame,
        t_start,
        t_end,
        data.replicate_count()
    );

    // frame 1 is the init itself
    let first = data.frame_grid(&reduce)?;
    let outcome = match sink.push_frame(&first, t_start) {
        Ok(()) => run_loop(sink, engine, &mut data, &reduce, 1, t_start, last_frame, fps, yield_frames),
        Err(err) => Err(err),
    };
    fail_sink_on_error(sink, &outcome);
    outcome
}

fn run_resume<C, S, E>(
    sink: &mut S,
    ruleset: &Ruleset<C>,
    opts: ResumeOptions<C>,
    engine: &mut E,
    yield_frames: bool,
) -> Result<Termination, Error>
where
    C: CellState,
    S: Sink<C>,
    E: Engine<C>,
{
    if sink.is_running() {
        return Err(Error::AlreadyRunning);
    }
    if sink.len() == 0 {
        return Err(Error::NoHistory);
    }

    let ResumeOptions { tstop, fps, grids, aux } = opts;

    let base_frame = sink.len();
    let init = match sink.at(base_frame - 1) {
        Some(frame) => frame.clone(),
        None => return Err(Error::NoHistory),
    };
    let t_base = sink.stop_time();
    let dt = ruleset.dt();
    if !(dt > 0.0) || tstop <= t_base {
        return Err(Error::BadTimespan);
    }
    let added_frames = (((tstop - t_base) / dt) + 1e-9).floor() as usize;
    if added_frames == 0 {
        return Err(Error::BadTimespan);
    }
    let last_frame = base_frame + added_frames;

    let mask = ruleset.mask().cloned();
    let mut data = SimData::new(ruleset.clone(), init, mask, grids, aux, 1)?;
    data.advance(t_base, base_frame);

    let fps = fps.unwrap_or_else(|| sink.fps());
    sink.set_fps(fps);
    sink.set_running(true);
    if !sink.is_running() {
        return Err(Error::SinkRejectedStart);
    }

    info!(
        "resuming simulation driver: frames {}..={} over t = ({}, {}]",
        base_frame + 1,
        last_frame,
        t_base,
        tstop
    );

    let reduce = ReplicateReduce::first();
    let outcome = run_loop(sink, engine, &mut data, &reduce, base_frame, t_base, last_frame, fps, yield_frames);
    fail_sink_on_error(sink, &outcome);
    outcome
}

/// The per-frame loop shared by start and resume.  `base_frame` is the already-delivered frame
/// the clock counts from; the loop runs frames `base_frame + 1 ..= last_frame`.
fn run_loop<C, S, E>(
    sink: &mut S,
    engine: &mut E,
    data: &mut SimData<C>,
    reduce: &ReplicateReduce<C>,
    base_frame: usize,
    t_base: f64,
    last_frame: usize,
    fps: f64,
    yield_frames: bool,
) -> Result<Termination, Error>
where
    C: CellState,
    S: Sink<C>,
    E: Engine<C>,
{
    let dt = data.dt();
    let pacer = Pacer::new(fps);

    for frame in (base_frame + 1)..=last_frame {
        let t = t_base + (frame - base_frame) as f64 * dt;
        data.advance(t, frame);
        data.precompute_rules()?;
        engine.step(data)?;

        let grid = data.frame_grid(reduce)?;
        sink.push_frame(&grid, t)?;
        sink.set_stop_time(t);

        pacer.pace((frame - base_frame) as u32);

        if !sink.is_running() {
            info!("simulation cancelled at frame {} (t = {})", frame, t);
            sink.finalize()?;
            return Ok(Termination::Cancelled);
        }

        if yield_frames {
            thread::yield_now();
        }
    }

    sink.set_running(false);
    sink.finalize()?;
    info!("simulation finished: {} frames delivered", sink.len());
    Ok(Termination::Finished)
}

/// After a failed run the sink must be left not-running and finalized; the original error wins
/// over any finalize failure.
fn fail_sink_on_error<C, S>(sink: &mut S, outcome: &Result<Termination, Error>)
where
    C: CellState,
    S: Sink<C>,
{
    if outcome.is_err() {
        sink.set_running(false);
        if let Err(finalize_err) = sink.finalize() {
            warn!("sink finalize after a failed run also failed: {}", finalize_err);
        }
    }
}
