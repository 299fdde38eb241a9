use crate::core::atmosphere::{atmcorlamb2, scale_aot_for_eps, AtmosTerms};
use crate::io::lut::{AtmosLut, AOT550_GRID, NAOT_VALS};
use crate::types::{Satellite, SceneGeometry, SrResult, HIGH_EPS, NSR_BANDS};

/// Number of cubic polynomial coefficients
pub const NCOEF: usize = 4;

/// Smallest increase of the reflectance-vs-AOT curve that still counts as
/// monotone when locating `ia_max`
const MONOTONE_EPS: f32 = 1e-6;

/// Per-band polynomial fits of the atmospheric quantities as functions of
/// the AOT at 550 nm, evaluated once per scene at the scene-center
/// geometry, pressure, ozone, and water vapor.
///
/// The per-pixel correction evaluates these cubics instead of walking the
/// lookup tables, which is what makes the windowed aerosol inversion
/// affordable.
#[derive(Debug, Clone, PartialEq)]
pub struct AtmCoefficients {
    /// Other gaseous transmittance per band (AOT independent)
    pub tgo: [f32; NSR_BANDS],
    /// Cubic coefficients of the intrinsic atmospheric reflectance
    pub roatm_coef: [[f32; NCOEF]; NSR_BANDS],
    /// Cubic coefficients of the total transmission
    pub ttatmg_coef: [[f32; NCOEF]; NSR_BANDS],
    /// Cubic coefficients of the spherical albedo
    pub satm_coef: [[f32; NCOEF]; NSR_BANDS],
    /// Band extinction ratio `normext[ib][0][3]`
    pub normext_p0a3: [f32; NSR_BANDS],
    /// Largest AOT grid index with a monotonically increasing reflectance
    pub ia_max: [usize; NSR_BANDS],
    /// AOT value at `ia_max`, the upper clamp for polynomial evaluation
    pub aot_max: [f32; NSR_BANDS],
    /// Raw reflectance samples per band, kept for diagnostics
    pub roatm_arr: [[f32; NAOT_VALS]; NSR_BANDS],
}

impl AtmCoefficients {
    /// Evaluate the kernel at every AOT grid sample and fit the cubics.
    ///
    /// The reflectance fit stops at `ia_max`, the last grid index before
    /// the reflectance-vs-AOT curve flattens; transmission and spherical
    /// albedo are fit over the full grid.
    pub fn build(
        sat: Satellite,
        geom: &SceneGeometry,
        pres: f32,
        uoz: f32,
        uwv: f32,
        atmos_lut: &AtmosLut,
    ) -> SrResult<Self> {
        log::info!("Fitting atmospheric coefficient polynomials for {NSR_BANDS} bands");

        let mut coeffs = Self {
            tgo: [0.0; NSR_BANDS],
            roatm_coef: [[0.0; NCOEF]; NSR_BANDS],
            ttatmg_coef: [[0.0; NCOEF]; NSR_BANDS],
            satm_coef: [[0.0; NCOEF]; NSR_BANDS],
            normext_p0a3: [0.0; NSR_BANDS],
            ia_max: [0; NSR_BANDS],
            aot_max: [0.0; NSR_BANDS],
            roatm_arr: [[0.0; NAOT_VALS]; NSR_BANDS],
        };

        for ib in 0..NSR_BANDS {
            let mut ttatmg_arr = [0.0f32; NAOT_VALS];
            let mut satm_arr = [0.0f32; NAOT_VALS];

            for ia in 0..NAOT_VALS {
                let terms = atmcorlamb2(
                    sat,
                    geom,
                    pres,
                    AOT550_GRID[ia],
                    ib,
                    HIGH_EPS,
                    uoz,
                    uwv,
                    atmos_lut,
                )?;
                coeffs.roatm_arr[ib][ia] = terms.roatm;
                ttatmg_arr[ia] = terms.ttatmg;
                satm_arr[ia] = terms.satm;
                // tgo does not depend on the AOT; keep the last
                coeffs.tgo[ib] = terms.tgo;
            }

            // Find the last index before the reflectance curve flattens
            let mut ia_max = NAOT_VALS - 1;
            for ia in 1..NAOT_VALS {
                if coeffs.roatm_arr[ib][ia] - coeffs.roatm_arr[ib][ia - 1] <= MONOTONE_EPS {
                    ia_max = ia - 1;
                    break;
                }
            }
            coeffs.ia_max[ib] = ia_max;
            coeffs.aot_max[ib] = AOT550_GRID[ia_max];

            coeffs.roatm_coef[ib] =
                poly_fit_cubic(&AOT550_GRID[..=ia_max], &coeffs.roatm_arr[ib][..=ia_max]);
            coeffs.ttatmg_coef[ib] = poly_fit_cubic(&AOT550_GRID, &ttatmg_arr);
            coeffs.satm_coef[ib] = poly_fit_cubic(&AOT550_GRID, &satm_arr);
            coeffs.normext_p0a3[ib] = atmos_lut.normext[(ib, 0, 3)];

            log::debug!(
                "band {}: ia_max = {}, tgo = {:.5}",
                ib + 1,
                ia_max,
                coeffs.tgo[ib]
            );
        }

        Ok(coeffs)
    }

    /// Evaluate the fitted quantities at an AOT and Angstrom exponent.
    ///
    /// The Angstrom exponent rescales the AOT seen by the reflectance and
    /// spherical albedo polynomials through the band extinction ratio;
    /// evaluation clamps at the monotone bound `aot_max`.
    pub fn evaluate(&self, ib: usize, raot550nm: f32, eps: f32) -> AtmosTerms {
        let raot_eps =
            scale_aot_for_eps(raot550nm, eps, self.normext_p0a3[ib]).min(self.aot_max[ib]);
        let raot = raot550nm.min(self.aot_max[ib]);
        AtmosTerms {
            tgo: self.tgo[ib],
            roatm: poly_eval(&self.roatm_coef[ib], raot_eps),
            ttatmg: poly_eval(&self.ttatmg_coef[ib], raot),
            satm: poly_eval(&self.satm_coef[ib], raot_eps),
            xrorayp: 0.0,
        }
    }

    /// Fast Lambertian correction of one TOA reflectance.
    pub fn correct(&self, ib: usize, rotoa: f32, raot550nm: f32, eps: f32) -> f32 {
        self.evaluate(ib, raot550nm, eps).surface_reflectance(rotoa)
    }

    /// Forward model: predict the TOA reflectance of a surface reflectance.
    pub fn predict_toa(&self, ib: usize, roslamb: f32, raot550nm: f32, eps: f32) -> f32 {
        self.evaluate(ib, raot550nm, eps).toa_reflectance(roslamb)
    }
}

/// Evaluate a cubic with Horner's scheme.
#[inline]
pub fn poly_eval(coef: &[f32; NCOEF], x: f32) -> f32 {
    ((coef[3] * x + coef[2]) * x + coef[1]) * x + coef[0]
}

/// Least-squares fit of a 3rd-order polynomial through the sample points.
///
/// Accumulation and the normal-equation solve run in double precision;
/// the result truncates to single precision on storage.  Fewer than four
/// points reduce the fitted degree so the system stays determined.
pub fn poly_fit_cubic(xs: &[f32], ys: &[f32]) -> [f32; NCOEF] {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(!xs.is_empty());
    let degree = xs.len().saturating_sub(1).min(3);
    let n = degree + 1;

    // normal equations: sum of powers and moments
    let mut spow = [0.0f64; 2 * NCOEF - 1];
    let mut moment = [0.0f64; NCOEF];
    for (&x, &y) in xs.iter().zip(ys) {
        let x = x as f64;
        let y = y as f64;
        let mut xp = 1.0;
        for (k, s) in spow.iter_mut().enumerate().take(2 * n - 1) {
            *s += xp;
            if k < n {
                moment[k] += xp * y;
            }
            xp *= x;
        }
    }

    let mut a = [[0.0f64; NCOEF + 1]; NCOEF];
    for (r, row) in a.iter_mut().enumerate().take(n) {
        for c in 0..n {
            row[c] = spow[r + c];
        }
        row[n] = moment[r];
    }

    // Gaussian elimination with partial pivoting on the n x n system
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap();
        a.swap(col, pivot);
        if a[col][col].abs() < 1e-30 {
            continue;
        }
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for c in col..=n {
                a[row][c] -= factor * a[col][c];
            }
        }
    }
    let mut solution = [0.0f64; NCOEF];
    for row in (0..n).rev() {
        let mut acc = a[row][n];
        for c in row + 1..n {
            acc -= a[row][c] * solution[c];
        }
        solution[row] = if a[row][row].abs() < 1e-30 {
            0.0
        } else {
            acc / a[row][row]
        };
    }

    let mut coef = [0.0f32; NCOEF];
    for k in 0..n {
        coef[k] = solution[k] as f32;
    }
    coef
}
