//! Core processing modules of the surface reflectance correction

pub mod aero_interp;
pub mod aerosol;
pub mod ancillary;
pub mod atmosphere;
pub mod coefficients;
pub mod surface;
pub mod toa;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export main types and functions
pub use aero_interp::{fix_invalid_aerosols, interp_aerosols, AerosolDefaults};
pub use aerosol::{invert_aerosols, AeroBands};
pub use ancillary::{CmgGrids, GridIndex, RatioGrids, RatioSample, SceneCenter};
pub use atmosphere::{atmcorlamb2, AtmosTerms};
pub use coefficients::AtmCoefficients;
pub use surface::{compute_surface_reflectance, scale_for_output, SurfaceReflOutput};
pub use toa::{brightness_temp_band, toa_reflectance_band};
