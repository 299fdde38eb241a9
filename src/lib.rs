//! clearsky: a Landsat 8/9 surface reflectance correction engine
//!
//! The crate inverts atmospheric effects (Rayleigh scattering, aerosols,
//! ozone, water vapor, other gases) out of calibrated top-of-atmosphere
//! reflectance, producing per-band surface reflectance and a per-pixel
//! aerosol QA byte.  The aerosol load is retrieved per window from the
//! imagery itself by minimizing a multi-band residual under a climatological
//! band-ratio model, then interpolated to every pixel.
//!
//! Level-1 readers, ancillary readers, and product writers live with the
//! host application; the engine consumes typed arrays and a geolocation
//! mapping, and returns arrays.

pub mod core;
pub mod io;
pub mod types;

// Re-export the main entry points for easier access
pub use crate::core::surface::{compute_surface_reflectance, scale_for_output, SurfaceReflOutput};
pub use crate::core::toa::{brightness_temp_band, toa_reflectance_band};
pub use crate::core::{AtmCoefficients, CmgGrids, RatioGrids, SceneCenter};
pub use crate::io::lut::AtmosLut;
pub use crate::types::{
    CorrectionParams, Geolocation, LatLonGrid, Satellite, SceneGeometry, SceneMetadata, SrError,
    SrResult,
};
