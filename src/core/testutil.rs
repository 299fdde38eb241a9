//! Shared fixtures for the unit tests: synthetic lookup tables and
//! ancillary grids small enough to build inline.

use crate::core::ancillary::{CmgGrids, RatioGrids};
use crate::io::lut::{self, AtmosLut};
use ndarray::{Array2, Array3, Array4};

/// A flat lookup table: every interpolation collapses to the cell value.
pub(crate) fn flat_lut(roatm: f32, trans: f32, sphalb: f32, normext: f32) -> AtmosLut {
    let nb = 8;
    let nsol = 16;
    let (nvz, nsz) = (2, lut::NSUNANGLE_VALS);
    AtmosLut::from_parts(
        Array4::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS, nsol), roatm),
        Array4::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS, lut::NSUNANGLE_VALS), trans),
        Array3::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS), sphalb),
        Array3::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS), normext),
        Array2::from_elem((nvz, nsz), 180.0),
        Array2::zeros((nvz, nsz)),
        Array2::from_shape_fn((nvz, nsz), |(v, _)| v as f32 * 4.0),
        Array2::from_elem((nvz, nsz), 4.0),
        Array2::from_elem((nvz, nsz), 4.0),
        (0..lut::NSUNANGLE_VALS).map(|i| i as f32 * 4.0).collect(),
        vec![0; lut::NSUNANGLE_VALS],
        0.0,
        4.0,
        0.0,
        4.0,
    )
    .unwrap()
}

/// A lookup table whose intrinsic reflectance grows linearly with the AOT
/// sample index, so the aerosol inversion has a well-behaved monotone
/// forward model.  `slope` is the reflectance increase per unit AOT.
pub(crate) fn ramp_lut(base: f32, slope: f32, trans: f32, sphalb: f32, normext: f32) -> AtmosLut {
    let nb = 8;
    let nsol = 16;
    let (nvz, nsz) = (2, lut::NSUNANGLE_VALS);
    let rolutt = Array4::from_shape_fn((nb, lut::NPRES_VALS, lut::NAOT_VALS, nsol), |(_, _, ia, _)| {
        base + slope * lut::AOT550_GRID[ia]
    });
    AtmosLut::from_parts(
        rolutt,
        Array4::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS, lut::NSUNANGLE_VALS), trans),
        Array3::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS), sphalb),
        Array3::from_elem((nb, lut::NPRES_VALS, lut::NAOT_VALS), normext),
        Array2::from_elem((nvz, nsz), 180.0),
        Array2::zeros((nvz, nsz)),
        Array2::from_shape_fn((nvz, nsz), |(v, _)| v as f32 * 4.0),
        Array2::from_elem((nvz, nsz), 4.0),
        Array2::from_elem((nvz, nsz), 4.0),
        (0..lut::NSUNANGLE_VALS).map(|i| i as f32 * 4.0).collect(),
        vec![0; lut::NSUNANGLE_VALS],
        0.0,
        4.0,
        0.0,
        4.0,
    )
    .unwrap()
}

/// CMG ancillary grids at a coarse cell size, filled with sea-level
/// defaults (DEM 0 m, water vapor 400 -> 2.0 g/cm2, ozone 75 -> 0.1875).
pub(crate) fn coarse_cmg(nblat: usize, nblon: usize) -> CmgGrids {
    CmgGrids::from_parts(
        Array2::zeros((nblat, nblon)),
        Array2::from_elem((nblat, nblon), 400u16),
        Array2::from_elem((nblat, nblon), 75u8),
    )
    .unwrap()
}

/// Ratio grids with uniform land climatology: healthy band ratios, a wide
/// NDWI spread, and flat slopes.
pub(crate) fn uniform_ratio(nblat: usize, nblon: usize) -> RatioGrids {
    RatioGrids::from_parts(
        Array2::from_elem((nblat, nblon), 100i16),  // andwi
        Array2::from_elem((nblat, nblon), 300i16),  // sndwi
        Array2::from_elem((nblat, nblon), 550i16),  // ratiob1
        Array2::from_elem((nblat, nblon), 600i16),  // ratiob2
        Array2::from_elem((nblat, nblon), 2000i16), // ratiob7
        Array2::from_elem((nblat, nblon), 550i16),  // intratiob1
        Array2::from_elem((nblat, nblon), 600i16),  // intratiob2
        Array2::from_elem((nblat, nblon), 2000i16), // intratiob7
        Array2::zeros((nblat, nblon)),              // slpratiob1
        Array2::zeros((nblat, nblon)),              // slpratiob2
        Array2::zeros((nblat, nblon)),              // slpratiob7
    )
    .unwrap()
}
