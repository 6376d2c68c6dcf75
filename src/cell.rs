//! Declares the bound placed on the element type held in a grid's cells.  Cell values are plain
//! data: they are cloned when buffers are copied, shared read-only across worker threads during a
//! sweep, and carried across frames unchanged when a mask excludes their cell.

#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Serialize};

#[cfg(feature = "serde")]
pub trait CellState: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

#[cfg(not(feature = "serde"))]
pub trait CellState: Clone + Send + Sync + 'static {}

#[cfg(feature = "serde")]
impl<T> CellState for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

#[cfg(not(feature = "serde"))]
impl<T> CellState for T where T: Clone + Send + Sync + 'static {}
