use crate::core::ancillary::RatioGrids;
use crate::core::coefficients::AtmCoefficients;
use crate::io::lut::{AOT550_GRID, NAOT_VALS};
use crate::types::{
    level1_is_fill, CorrectionParams, Geolocation, SceneGeometry, SrResult, B1, B2, B4, B5, B7,
    HIGH_EPS, IPFLAG_CLEAR, IPFLAG_WATER, LOW_EPS, MOD_EPS, NSR_BANDS, RAD2DEG,
};
use ndarray::Array2;
use rayon::prelude::*;

/// Angstrom exponent used for the water-specific retrieval
const WATER_EPS: f32 = 1.5;

/// Acceptance threshold of the land retrieval; grows with the aerosol
/// impact and the observed SWIR brightness.
#[inline]
fn land_threshold(corf: f32, troatm_b7: f32) -> f32 {
    0.015 + 0.005 * corf + 0.10 * troatm_b7
}

/// Acceptance threshold of the water retrieval.
#[inline]
fn water_threshold(corf: f32) -> f32 {
    0.010 + 0.005 * corf
}

/// TOA reflectance snapshots of the bands consumed by the aerosol
/// inversion, captured before the climatology correction overwrites the
/// band arrays.
#[derive(Debug, Clone)]
pub struct AeroBands {
    pub b1: Array2<f32>,
    pub b2: Array2<f32>,
    pub b4: Array2<f32>,
    pub b5: Array2<f32>,
    pub b7: Array2<f32>,
}

/// The constrained inversion model for one retrieval location: observed
/// TOA reflectances plus the expected surface reflectance ratios against
/// the reference band.
struct RetrievalModel<'a> {
    coeffs: &'a AtmCoefficients,
    erelc: [f32; NSR_BANDS],
    troatm: [f32; NSR_BANDS],
    iband1: usize,
}

impl RetrievalModel<'_> {
    /// Residual of the band-ratio model at a trial AOT: correct the
    /// reference band, spread its surface reflectance through the expected
    /// ratios, forward-model each participating band, and take the RMS
    /// misfit against the observed TOA reflectances.
    fn residual_at(&self, raot: f32, eps: f32) -> f32 {
        let ros_ref = self
            .coeffs
            .correct(self.iband1, self.troatm[self.iband1], raot, eps);
        let mut sum = 0.0f64;
        let mut nbands = 0u32;
        for ib in 0..NSR_BANDS {
            if self.erelc[ib] <= 0.0 {
                continue;
            }
            let pred_toa = self.coeffs.predict_toa(ib, ros_ref * self.erelc[ib], raot, eps);
            sum += ((pred_toa - self.troatm[ib]) as f64).powi(2);
            nbands += 1;
        }
        (sum.sqrt() / nbands as f64) as f32
    }
}

/// Vertex abscissa of the parabola through three (x, r) samples, solved in
/// double precision.  Returns `None` when the points are collinear.
pub(crate) fn parabola_vertex(
    x1: f64,
    r1: f64,
    x2: f64,
    r2: f64,
    x3: f64,
    r3: f64,
) -> Option<f64> {
    let xa = (r1 - r3) * (x2 - x3);
    let xb = (r2 - r3) * (x1 - x3);
    let den = xa - xb;
    if den.abs() < 1e-12 {
        return None;
    }
    Some(0.5 * (xa * (x2 + x3) - xb * (x1 + x3)) / den)
}

/// Monotone bracket-and-interpolate search for the AOT minimizing the
/// model residual.
///
/// The search walks the AOT sample grid from the shared warm-start index
/// `iaots` while the residual improves, then refines between the
/// bracketing samples with a parabola.  The warm start is advanced so the
/// next Angstrom trial at this location resumes near the minimum.
fn subaeroret(model: &RetrievalModel, iaots: &mut usize, eps: f32) -> (f32, f32) {
    let start = (*iaots).min(NAOT_VALS - 1);
    let mut ia_min = start;
    let mut r_min = model.residual_at(AOT550_GRID[start], eps);

    let mut ia = start;
    while ia + 1 < NAOT_VALS {
        let r = model.residual_at(AOT550_GRID[ia + 1], eps);
        if r < r_min {
            ia += 1;
            ia_min = ia;
            r_min = r;
        } else {
            break;
        }
    }

    // the warm start can overshoot the minimum of a later trial
    if ia_min == start {
        let mut ia = start;
        while ia > 0 {
            let r = model.residual_at(AOT550_GRID[ia - 1], eps);
            if r < r_min {
                ia -= 1;
                ia_min = ia;
                r_min = r;
            } else {
                break;
            }
        }
    }

    let mut raot = AOT550_GRID[ia_min];
    let mut residual = r_min;
    if ia_min > 0 && ia_min + 1 < NAOT_VALS {
        let x1 = AOT550_GRID[ia_min - 1];
        let x3 = AOT550_GRID[ia_min + 1];
        let r1 = model.residual_at(x1, eps);
        let r3 = model.residual_at(x3, eps);
        if let Some(vertex) = parabola_vertex(
            x1 as f64,
            r1 as f64,
            raot as f64,
            r_min as f64,
            x3 as f64,
            r3 as f64,
        ) {
            let candidate = (vertex as f32).clamp(x1, x3);
            let r = model.residual_at(candidate, eps);
            if r < residual {
                raot = candidate;
                residual = r;
            }
        }
    }

    *iaots = ia_min.saturating_sub(1);
    (raot, residual)
}

/// Result of one aerosol window retrieval, written back at the window
/// center.
#[derive(Debug, Clone, Copy)]
struct CenterResult {
    line: usize,
    samp: usize,
    taero: f32,
    teps: f32,
    /// ipflag bits at the center; zero marks a failed retrieval
    flag: u8,
}

/// Nearest non-fill pixel within the aerosol window around the center,
/// searched over expanding rings.
fn nearest_non_fill(
    qaband: &Array2<u16>,
    center_line: usize,
    center_samp: usize,
    half: usize,
) -> Option<(usize, usize)> {
    let (nlines, nsamps) = qaband.dim();
    for radius in 1..=half {
        let l0 = center_line.saturating_sub(radius);
        let l1 = (center_line + radius).min(nlines - 1);
        let s0 = center_samp.saturating_sub(radius);
        let s1 = (center_samp + radius).min(nsamps - 1);
        for l in l0..=l1 {
            for s in s0..=s1 {
                // only the ring at this radius
                let dl = l.abs_diff(center_line);
                let ds = s.abs_diff(center_samp);
                if dl.max(ds) != radius {
                    continue;
                }
                if !level1_is_fill(qaband[(l, s)]) {
                    return Some((l, s));
                }
            }
        }
    }
    None
}

/// Invert (AOT, Angstrom exponent) for every aerosol window center.
///
/// Each center is an independent work unit; the lattice is processed with
/// a parallel-for and every worker writes to its own disjoint output
/// cells.  Fill centers borrow the radiometry of the nearest non-fill
/// pixel in the window but still write to the center; windows with no
/// usable pixel stay fill.
#[allow(clippy::too_many_arguments)]
pub fn invert_aerosols<G: Geolocation>(
    qaband: &Array2<u16>,
    aerob: &AeroBands,
    ratio: &RatioGrids,
    coeffs: &AtmCoefficients,
    geom: &SceneGeometry,
    geoloc: &G,
    params: &CorrectionParams,
    ipflag: &mut Array2<u8>,
    taero: &mut Array2<f32>,
    teps: &mut Array2<f32>,
) -> SrResult<()> {
    let (nlines, nsamps) = qaband.dim();
    let window = params.aero_window;
    let half = params.half_window();

    let centers: Vec<(usize, usize)> = (half..nlines)
        .step_by(window)
        .flat_map(|i| (half..nsamps).step_by(window).map(move |j| (i, j)))
        .collect();
    log::info!(
        "Aerosol inversion over {} window centers ({window} x {window} windows)",
        centers.len()
    );

    let results: Vec<Option<CenterResult>> = centers
        .par_iter()
        .map(|&(i, j)| retrieve_center(qaband, aerob, ratio, coeffs, geom, geoloc, half, i, j))
        .collect::<SrResult<Vec<_>>>()?;

    for result in results.into_iter().flatten() {
        let at = (result.line, result.samp);
        taero[at] = result.taero;
        teps[at] = result.teps;
        if result.flag == 0 {
            // failed retrieval, left for the fill pass
            ipflag[at] = 0;
        } else {
            ipflag[at] |= result.flag;
        }
    }
    Ok(())
}

/// Run the full retrieval for one window center.
#[allow(clippy::too_many_arguments)]
fn retrieve_center<G: Geolocation>(
    qaband: &Array2<u16>,
    aerob: &AeroBands,
    ratio: &RatioGrids,
    coeffs: &AtmCoefficients,
    geom: &SceneGeometry,
    geoloc: &G,
    half: usize,
    center_line: usize,
    center_samp: usize,
) -> SrResult<Option<CenterResult>> {
    // Fill centers substitute the nearest usable pixel for radiometry
    let (line, samp) = if level1_is_fill(qaband[(center_line, center_samp)]) {
        match nearest_non_fill(qaband, center_line, center_samp, half) {
            Some(found) => found,
            None => return Ok(None),
        }
    } else {
        (center_line, center_samp)
    };
    let at = (line, samp);

    let (lat, lon) = geoloc.to_latlon(line as f64 - 0.5, samp as f64 + 0.5)?;
    let sample = ratio.resample(lat * RAD2DEG, lon * RAD2DEG);

    let b5 = aerob.b5[at];
    let b7 = aerob.b7[at];
    let xndwi = {
        let raw = (b5 as f64 - 0.5 * b7 as f64) / (b5 as f64 + 0.5 * b7 as f64);
        (raw as f32).clamp(sample.ndwi_th2, sample.ndwi_th1)
    };

    // Land band-ratio model against the red band
    let mut erelc = [-1.0f32; NSR_BANDS];
    let mut troatm = [0.0f32; NSR_BANDS];
    erelc[B1] = xndwi * sample.slprb1 + sample.intrb1;
    erelc[B2] = xndwi * sample.slprb2 + sample.intrb2;
    erelc[B4] = 1.0;
    erelc[B7] = xndwi * sample.slprb7 + sample.intrb7;
    troatm[B1] = aerob.b1[at];
    troatm[B2] = aerob.b2[at];
    troatm[B4] = aerob.b4[at];
    troatm[B7] = aerob.b7[at];

    let model = RetrievalModel {
        coeffs,
        erelc,
        troatm,
        iband1: B4,
    };

    // Three Angstrom trials sharing the AOT grid warm start
    let mut iaots = 0;
    let (raot1, residual1) = subaeroret(&model, &mut iaots, LOW_EPS);
    let (_raot2, residual2) = subaeroret(&model, &mut iaots, MOD_EPS);
    let (raot3, residual3) = subaeroret(&model, &mut iaots, HIGH_EPS);

    let epsmin = parabola_vertex(
        LOW_EPS as f64,
        residual1 as f64,
        MOD_EPS as f64,
        residual2 as f64,
        HIGH_EPS as f64,
        residual3 as f64,
    )
    .map(|v| v as f32)
    .unwrap_or(MOD_EPS);

    let (mut eps, mut raot, mut residual);
    if epsmin > LOW_EPS && epsmin < HIGH_EPS {
        eps = epsmin;
        let refined = subaeroret(&model, &mut iaots, epsmin);
        raot = refined.0;
        residual = refined.1;
    } else if epsmin <= LOW_EPS {
        eps = LOW_EPS;
        raot = raot1;
        residual = residual1;
    } else {
        eps = HIGH_EPS;
        raot = raot3;
        residual = residual3;
    }

    let corf = raot / geom.xmus;
    let mut flag: u8;
    if residual < land_threshold(corf, troatm[B7]) {
        // NDVI sanity check between NIR and red
        let ros5 = coeffs.correct(B5, aerob.b5[at], raot, eps);
        let ros4 = coeffs.correct(B4, aerob.b4[at], raot, eps);
        if ros5 > 0.1 && (ros5 - ros4) / (ros5 + ros4) > 0.0 {
            flag = 1 << IPFLAG_CLEAR;
        } else {
            flag = 1 << IPFLAG_WATER;
        }
    } else {
        flag = 1 << IPFLAG_WATER;
    }

    // Water pixels re-run the retrieval with equal expected reflectances
    if flag & (1 << IPFLAG_WATER) != 0 {
        let mut erelc = [-1.0f32; NSR_BANDS];
        let mut troatm = [0.0f32; NSR_BANDS];
        erelc[B1] = 1.0;
        erelc[B4] = 1.0;
        erelc[B5] = 1.0;
        erelc[B7] = 1.0;
        troatm[B1] = aerob.b1[at];
        troatm[B4] = aerob.b4[at];
        troatm[B5] = aerob.b5[at];
        troatm[B7] = aerob.b7[at];
        let model = RetrievalModel {
            coeffs,
            erelc,
            troatm,
            iband1: B4,
        };

        let mut iaots = 0;
        let retrieved = subaeroret(&model, &mut iaots, WATER_EPS);
        eps = WATER_EPS;
        raot = retrieved.0;
        residual = retrieved.1;
        let corf = raot / geom.xmus;

        let ros1 = coeffs.correct(B1, aerob.b1[at], raot, eps);
        if residual > water_threshold(corf) || ros1 < 0.0 {
            // invalid retrieval, likely urban; filled from neighbors later
            flag = 0;
        } else {
            flag = (1 << IPFLAG_CLEAR) | (1 << IPFLAG_WATER);
        }
    }

    Ok(Some(CenterResult {
        line: center_line,
        samp: center_samp,
        taero: raot,
        teps: eps,
        flag,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::{ramp_lut, uniform_ratio};
    use crate::types::{LatLonGrid, Satellite};

    fn build_coeffs() -> AtmCoefficients {
        let atmos_lut = ramp_lut(0.02, 0.03, 0.9, 0.1, 1.0);
        let geom = SceneGeometry::nadir(30.0);
        AtmCoefficients::build(Satellite::Landsat8, &geom, 1013.0, 0.3, 2.0, &atmos_lut).unwrap()
    }

    #[test]
    fn test_parabola_vertex_known_minimum() {
        // r = (x - 1.85)^2 has its vertex at 1.85
        let f = |x: f64| (x - 1.85) * (x - 1.85);
        let v = parabola_vertex(1.0, f(1.0), 1.75, f(1.75), 2.5, f(2.5)).unwrap();
        assert!((v - 1.85).abs() < 1e-9);
    }

    #[test]
    fn test_parabola_vertex_of_residual_triplet() {
        // the documented residual triplet lands between the middle and
        // upper Angstrom trials
        let v = parabola_vertex(1.0, 0.04, 1.75, 0.01, 2.5, 0.03).unwrap();
        assert!(v > 1.75 && v < 2.0, "vertex {v}");
        assert!((v - 1.825).abs() < 1e-6);
    }

    #[test]
    fn test_land_threshold_components() {
        // residual 0.004 against corf 1.0 and a SWIR TOA of 0.01 passes
        let threshold = land_threshold(1.0, 0.01);
        assert!((threshold - 0.021).abs() < 1e-7);
        assert!(0.004 < threshold);
        assert!((water_threshold(1.0) - 0.015).abs() < 1e-7);
    }

    #[test]
    fn test_parabola_vertex_collinear() {
        assert!(parabola_vertex(1.0, 0.1, 2.0, 0.2, 3.0, 0.3).is_none());
    }

    #[test]
    fn test_subaeroret_recovers_forward_modeled_aot() {
        let coeffs = build_coeffs();
        let truth_aot = 0.35;
        let eps = HIGH_EPS;

        // Build consistent TOA observations from a common surface spectrum
        let ros4 = 0.12f32;
        let erelc_in = [0.55f32, 0.6, -1.0, 1.0, -1.0, -1.0, 2.0];
        let mut erelc = [-1.0f32; NSR_BANDS];
        let mut troatm = [0.0f32; NSR_BANDS];
        for ib in 0..NSR_BANDS {
            if erelc_in[ib] > 0.0 {
                erelc[ib] = erelc_in[ib];
                troatm[ib] = coeffs.predict_toa(ib, ros4 * erelc_in[ib], truth_aot, eps);
            }
        }
        let model = RetrievalModel {
            coeffs: &coeffs,
            erelc,
            troatm,
            iband1: B4,
        };

        let mut iaots = 0;
        let (raot, residual) = subaeroret(&model, &mut iaots, eps);
        assert!(
            (raot - truth_aot).abs() < 0.02,
            "retrieved {raot} vs truth {truth_aot}"
        );
        assert!(residual < 1e-4, "residual {residual}");
    }

    #[test]
    fn test_subaeroret_warm_start_walks_down() {
        let coeffs = build_coeffs();
        let eps = HIGH_EPS;
        let ros4 = 0.12f32;
        let mut erelc = [-1.0f32; NSR_BANDS];
        let mut troatm = [0.0f32; NSR_BANDS];
        for (ib, ratio) in [(B1, 0.55f32), (B2, 0.6), (B4, 1.0), (B7, 2.0)] {
            erelc[ib] = ratio;
            troatm[ib] = coeffs.predict_toa(ib, ros4 * ratio, 0.1, eps);
        }
        let model = RetrievalModel {
            coeffs: &coeffs,
            erelc,
            troatm,
            iband1: B4,
        };

        // warm start far above the true minimum of 0.1
        let mut iaots = 12;
        let (raot, _) = subaeroret(&model, &mut iaots, eps);
        assert!((raot - 0.1).abs() < 0.02, "retrieved {raot}");
        assert!(iaots < 12);
    }

    #[test]
    fn test_nearest_non_fill_ring_search() {
        let mut qa = Array2::from_elem((9, 9), 1u16); // all fill
        qa[(6, 2)] = 0;
        let found = nearest_non_fill(&qa, 4, 4, 4);
        assert_eq!(found, Some((6, 2)));
        // all-fill window finds nothing
        let qa = Array2::from_elem((9, 9), 1u16);
        assert_eq!(nearest_non_fill(&qa, 4, 4, 4), None);
    }

    #[test]
    fn test_invert_aerosols_clear_land_scene() {
        let coeffs = build_coeffs();
        let geom = SceneGeometry::nadir(30.0);
        let params = CorrectionParams::default();
        let ratio = uniform_ratio(18, 36).guarded();
        let geoloc = LatLonGrid {
            ul_lat: 45.0,
            ul_lon: -120.0,
            lat_step: 0.0003,
            lon_step: 0.0003,
        };

        let (nlines, nsamps) = (18, 18);
        let truth_aot = 0.2;

        // Vegetated land: bright NIR, consistent with the climatology
        // ratios and a positive NDVI after correction
        let surf = |ib: usize| -> f32 {
            match ib {
                B1 => 0.12 * 0.55,
                B2 => 0.12 * 0.6,
                B4 => 0.12,
                B5 => 0.35,
                B7 => 0.12 * 2.0,
                _ => 0.1,
            }
        };
        let toa = |ib: usize| coeffs.predict_toa(ib, surf(ib), truth_aot, HIGH_EPS);
        let aerob = AeroBands {
            b1: Array2::from_elem((nlines, nsamps), toa(B1)),
            b2: Array2::from_elem((nlines, nsamps), toa(B2)),
            b4: Array2::from_elem((nlines, nsamps), toa(B4)),
            b5: Array2::from_elem((nlines, nsamps), toa(B5)),
            b7: Array2::from_elem((nlines, nsamps), toa(B7)),
        };

        let qaband = Array2::zeros((nlines, nsamps));
        let mut ipflag = Array2::zeros((nlines, nsamps));
        let mut taero = Array2::from_elem((nlines, nsamps), 0.05f32);
        let mut teps = Array2::from_elem((nlines, nsamps), 1.5f32);

        invert_aerosols(
            &qaband, &aerob, &ratio, &coeffs, &geom, &geoloc, &params, &mut ipflag, &mut taero,
            &mut teps,
        )
        .unwrap();

        // centers at 4 and 13 in both axes
        for &(i, j) in &[(4usize, 4usize), (4, 13), (13, 4), (13, 13)] {
            assert!(
                crate::types::ipflag_is_clear(ipflag[(i, j)]),
                "center ({i}, {j}) not clear: flag {}",
                ipflag[(i, j)]
            );
            assert!(
                (taero[(i, j)] - truth_aot).abs() < 0.05,
                "taero {} at ({i}, {j})",
                taero[(i, j)]
            );
            assert!(teps[(i, j)] >= LOW_EPS && teps[(i, j)] <= HIGH_EPS);
        }
    }

    #[test]
    fn test_all_fill_window_stays_fill() {
        let coeffs = build_coeffs();
        let geom = SceneGeometry::nadir(30.0);
        let params = CorrectionParams::default();
        let ratio = uniform_ratio(18, 36).guarded();
        let geoloc = LatLonGrid {
            ul_lat: 45.0,
            ul_lon: -120.0,
            lat_step: 0.0003,
            lon_step: 0.0003,
        };
        let (nlines, nsamps) = (9, 9);
        let aerob = AeroBands {
            b1: Array2::zeros((nlines, nsamps)),
            b2: Array2::zeros((nlines, nsamps)),
            b4: Array2::zeros((nlines, nsamps)),
            b5: Array2::zeros((nlines, nsamps)),
            b7: Array2::zeros((nlines, nsamps)),
        };
        let qaband = Array2::from_elem((nlines, nsamps), 1u16);
        let mut ipflag = Array2::from_elem((nlines, nsamps), 1u8); // fill bit
        let mut taero = Array2::from_elem((nlines, nsamps), 0.05f32);
        let mut teps = Array2::from_elem((nlines, nsamps), 1.5f32);

        invert_aerosols(
            &qaband, &aerob, &ratio, &coeffs, &geom, &geoloc, &params, &mut ipflag, &mut taero,
            &mut teps,
        )
        .unwrap();

        assert_eq!(ipflag[(4, 4)], 1);
        assert!((taero[(4, 4)] - 0.05).abs() < 1e-6);
    }
}
