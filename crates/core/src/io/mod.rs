//! File formats
//!
//! Binary PGM (P5 greyscale in, P5/P6 out) for images and visualisations,
//! and the little-endian Middlebury `.flo` format for flow fields. Parsing
//! failures surface as [`crate::FlowError::MalformedFile`]; everything else
//! is a plain I/O error.

mod flo;
mod pgm;

pub use flo::{read_flo, write_flo, FLO_TAG};
pub use pgm::{read_pgm, write_pgm, write_pgm_with_boundaries, write_ppm};
