//! Boundary-overflow policy applied whenever a neighbor read lands outside the grid.

use crate::util::wrap_coord;

/// What happens to reads outside `[0, width) x [0, height)`.
///
/// `Wrap` folds the index back modulo the dimensions, turning the grid into a torus.  `Skip`
/// reports the read as absent: neighborhood reductions must leave the cell out entirely rather
/// than substitute a zero, which matters for count-style kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Overflow {
    Wrap,
    Skip,
}

impl Overflow {
    /// Resolves a possibly out-of-bounds coordinate to an in-bounds one, or `None` when the
    /// policy declares the read absent.
    #[inline]
    pub fn resolve(self, x: isize, y: isize, width: usize, height: usize) -> Option<(usize, usize)> {
        match self {
            Overflow::Wrap => Some((wrap_coord(x, width), wrap_coord(y, height))),
            Overflow::Skip => {
                if x >= 0 && (x as usize) < width && y >= 0 && (y as usize) < height {
                    Some((x as usize, y as usize))
                } else {
                    None
                }
            }
        }
    }
}

impl Default for Overflow {
    fn default() -> Overflow {
        Overflow::Skip
    }
}
