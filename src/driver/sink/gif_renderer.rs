//! Writes a GIF image with a new frame for each step of the simulation.

use std::fs::File;
use std::path::Path;

use gif::{Encoder, Frame, Repeat};
use log::debug;

use crate::cell::CellState;
use crate::error::Error;
use crate::grid::Grid;

use super::{delegate_sink_core, Sink, SinkControl, SinkCore};

/// Maps one cell value to an RGB pixel.
pub type ColorCalculator<C> = fn(&C) -> [u8; 3];

/// Streams every pushed frame into a GIF file and keeps the frames in memory so the run can be
/// resumed from it.
pub struct GifSink<C: CellState> {
    core: SinkCore<C>,
    encoder: Encoder<File>,
    width: u16,
    height: u16,
    colorfn: ColorCalculator<C>,
}

impl<C: CellState> GifSink<C> {
    pub fn new(
        output_path: impl AsRef<Path>,
        width: usize,
        height: usize,
        colorfn: ColorCalculator<C>,
    ) -> Result<GifSink<C>, Error> {
        let image = File::create(output_path)?;
        let mut encoder = Encoder::new(image, width as u16, height as u16, &[])?;
        encoder.set_repeat(Repeat::Infinite)?;

        Ok(GifSink {
            core: SinkCore::new(),
            encoder,
            width: width as u16,
            height: height as u16,
            colorfn,
        })
    }

    pub fn control(&self) -> SinkControl {
        self.core.control()
    }
}

impl<C: CellState> Sink<C> for GifSink<C> {
    fn push_frame(&mut self, frame: &Grid<C>, _t: f64) -> Result<(), Error> {
        // map the grid into the flat RGB layout the encoder expects
        let mut pixels: Vec<u8> = Vec::with_capacity(frame.len() * 3);
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let color = (self.colorfn)(frame.get(x, y));
                pixels.extend_from_slice(&color);
            }
        }

        let gif_frame = Frame::from_rgb(self.width, self.height, &pixels);
        self.encoder.write_frame(&gif_frame)?;
        self.core.frames.push(frame.clone());
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), Error> {
        debug!("gif sink finalized after {} frames", self.core.frames.len());
        Ok(())
    }

    delegate_sink_core!();
}
