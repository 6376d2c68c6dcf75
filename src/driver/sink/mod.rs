//! Output sinks: passive collaborators that receive every completed frame.  A sink stores or
//! renders frames and carries the run's pacing state (running flag, fps, start/stop times) on
//! the driver's behalf.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cell::CellState;
use crate::error::Error;
use crate::grid::Grid;

pub mod gif_renderer;

pub use self::gif_renderer::GifSink;

/// Contract between the driver and an output sink.
///
/// `start_time`/`stop_time` are simulation timestamps of the first and last delivered frame;
/// `resume` picks the run back up from them.  The running flag doubles as the cancellation
/// channel: clearing it stops the driver at the next frame boundary.
pub trait Sink<C: CellState> {
    /// Store or render one completed frame at simulation time `t`.
    fn push_frame(&mut self, frame: &Grid<C>, t: f64) -> Result<(), Error>;

    /// Number of stored frames.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The i-th stored frame, if retained.
    fn at(&self, index: usize) -> Option<&Grid<C>>;

    /// Drop all stored frames; called by the driver when a fresh run starts.
    fn clear_frames(&mut self);

    fn is_running(&self) -> bool;
    fn set_running(&mut self, running: bool);

    fn start_time(&self) -> f64;
    fn set_start_time(&mut self, t: f64);
    fn stop_time(&self) -> f64;
    fn set_stop_time(&mut self, t: f64);

    fn fps(&self) -> f64;
    fn set_fps(&mut self, fps: f64);

    /// Asynchronous sinks get the loop on a background thread with a yield after every frame.
    fn is_async(&self) -> bool {
        false
    }

    /// Called once after the final frame, on both normal completion and cancellation.
    fn finalize(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Frame storage plus pacing state shared by the reference sinks.
#[derive(Debug, Clone)]
pub(crate) struct SinkCore<C: CellState> {
    frames: Vec<Grid<C>>,
    running: Arc<AtomicBool>,
    start_time: f64,
    stop_time: f64,
    fps: f64,
}

impl<C: CellState> SinkCore<C> {
    fn new() -> SinkCore<C> {
        SinkCore {
            frames: Vec::new(),
            running: Arc::new(AtomicBool::new(false)),
            start_time: 0.0,
            stop_time: 0.0,
            fps: 0.0,
        }
    }

    pub(crate) fn control(&self) -> SinkControl {
        SinkControl {
            running: Arc::clone(&self.running),
        }
    }
}

/// Clonable handle onto a sink's running flag, for cancelling a run from outside the driver
/// (typically from another thread while a `ThreadedDriver` owns the sink).
#[derive(Debug, Clone)]
pub struct SinkControl {
    running: Arc<AtomicBool>,
}

impl SinkControl {
    /// Requests a graceful stop: the driver delivers the current frame, finalizes the sink, and
    /// reports `Termination::Cancelled`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

macro_rules! delegate_sink_core {
    () => {
        fn len(&self) -> usize {
            self.core.frames.len()
        }

        fn at(&self, index: usize) -> Option<&Grid<C>> {
            self.core.frames.get(index)
        }

        fn clear_frames(&mut self) {
            self.core.frames.clear();
        }

        fn is_running(&self) -> bool {
            self.core.running.load(std::sync::atomic::Ordering::SeqCst)
        }

        fn set_running(&mut self, running: bool) {
            self.core.running.store(running, std::sync::atomic::Ordering::SeqCst);
        }

        fn start_time(&self) -> f64 {
            self.core.start_time
        }

        fn set_start_time(&mut self, t: f64) {
            self.core.start_time = t;
        }

        fn stop_time(&self) -> f64 {
            self.core.stop_time
        }

        fn set_stop_time(&mut self, t: f64) {
            self.core.stop_time = t;
        }

        fn fps(&self) -> f64 {
            self.core.fps
        }

        fn set_fps(&mut self, fps: f64) {
            self.core.fps = fps;
        }
    };
}

pub(crate) use delegate_sink_core;

/// Stores every frame in memory.  The workhorse for tests, resume sources, and post-run
/// analysis.
#[derive(Debug, Clone)]
pub struct MemorySink<C: CellState> {
    core: SinkCore<C>,
    asynchronous: bool,
}

impl<C: CellState> MemorySink<C> {
    pub fn new() -> MemorySink<C> {
        MemorySink {
            core: SinkCore::new(),
            asynchronous: false,
        }
    }

    /// A memory sink that asks the driver for the background-thread loop.
    pub fn asynchronous() -> MemorySink<C> {
        MemorySink {
            core: SinkCore::new(),
            asynchronous: true,
        }
    }

    /// Handle for cancelling the run from outside the driver.
    pub fn control(&self) -> SinkControl {
        self.core.control()
    }

    pub fn frames(&self) -> &[Grid<C>] {
        &self.core.frames
    }

    pub fn into_frames(self) -> Vec<Grid<C>> {
        self.core.frames
    }
}

impl<C: CellState> Default for MemorySink<C> {
    fn default() -> MemorySink<C> {
        MemorySink::new()
    }
}

impl<C: CellState> Sink<C> for MemorySink<C> {
    fn push_frame(&mut self, frame: &Grid<C>, _t: f64) -> Result<(), Error> {
        self.core.frames.push(frame.clone());
        Ok(())
    }

    fn is_async(&self) -> bool {
        self.asynchronous
    }

    delegate_sink_core!();
}

/// Renders each frame to stdout as block art through a per-cell glyph function, and keeps the
/// frames for resume.
pub struct TerminalDisplayer<C: CellState> {
    core: SinkCore<C>,
    glyph: fn(&C) -> char,
}

impl<C: CellState> TerminalDisplayer<C> {
    pub fn new(glyph: fn(&C) -> char) -> TerminalDisplayer<C> {
        TerminalDisplayer {
            core: SinkCore::new(),
            glyph,
        }
    }

    pub fn control(&self) -> SinkControl {
        self.core.control()
    }
}

impl<C: CellState> Sink<C> for TerminalDisplayer<C> {
    fn push_frame(&mut self, frame: &Grid<C>, t: f64) -> Result<(), Error> {
        let mut out = String::with_capacity((frame.width() + 1) * frame.height() + 32);
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                out.push((self.glyph)(frame.get(x, y)));
            }
            out.push('\n');
        }
        let _ = write!(out, "t = {}", t);
        println!("{}", out);
        self.core.frames.push(frame.clone());
        Ok(())
    }

    delegate_sink_core!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_stores_and_clears_frames() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        sink.push_frame(&Grid::filled(2, 2, 1), 0.0).unwrap();
        sink.push_frame(&Grid::filled(2, 2, 2), 1.0).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(*sink.at(1).unwrap().get(0, 0), 2);
        sink.clear_frames();
        assert!(sink.is_empty());
    }

    #[test]
    fn control_handle_clears_running_flag() {
        let mut sink: MemorySink<u8> = MemorySink::new();
        sink.set_running(true);
        let control = sink.control();
        assert!(control.is_running());
        control.stop();
        assert!(!sink.is_running());
    }
}
