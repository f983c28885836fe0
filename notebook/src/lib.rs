pub mod document;
pub mod extract;
pub mod loader;

pub use document::{Cell, CellKind, Document, Output};
pub use extract::{extract, mask_magics};
pub use loader::{LoadError, load, parse};
