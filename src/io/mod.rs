//! Lookup table loading.  Level-1 band and ancillary readers live with the
//! host application; the engine consumes their arrays directly.

pub mod lut;

pub use lut::{AtmosLut, LutDims, LutFiles};
