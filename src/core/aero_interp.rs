use crate::types::{ipflag_is_clear, ipflag_is_fill, ipflag_is_water, CorrectionParams};
use ndarray::{Array2, Zip};

/// Scene-wide aerosol defaults derived from the retrieved clear centers,
/// used when an invalid center has no valid neighbor at any radius and for
/// the fill pixels during interpolation.
#[derive(Debug, Clone, Copy)]
pub struct AerosolDefaults {
    pub taero: f32,
    pub teps: f32,
}

/// Fallback when a scene has no clear retrieval at all
const FALLBACK_TAERO: f32 = 0.05;
const FALLBACK_TEPS: f32 = 1.5;

fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}

fn window_centers(
    nlines: usize,
    nsamps: usize,
    params: &CorrectionParams,
) -> Vec<(usize, usize)> {
    let half = params.half_window();
    (half..nlines)
        .step_by(params.aero_window)
        .flat_map(|i| {
            (half..nsamps)
                .step_by(params.aero_window)
                .map(move |j| (i, j))
        })
        .collect()
}

/// Replace failed window-center retrievals with the mean over valid
/// neighboring centers, searched over an expanding box in the center
/// lattice.  All means read the pre-fill snapshot, so the pass is
/// deterministic regardless of center order.
///
/// Returns the scene-wide defaults computed from the clear-center
/// population (or the hard fallback when that population is empty).
pub fn fix_invalid_aerosols(
    ipflag: &Array2<u8>,
    taero: &mut Array2<f32>,
    teps: &mut Array2<f32>,
    params: &CorrectionParams,
) -> AerosolDefaults {
    let (nlines, nsamps) = ipflag.dim();
    let centers = window_centers(nlines, nsamps, params);

    let valid = |flag: u8| !ipflag_is_fill(flag) && (ipflag_is_clear(flag) || ipflag_is_water(flag));

    // scene medians from the clear population
    let mut clear_taero: Vec<f32> = centers
        .iter()
        .filter(|&&c| ipflag_is_clear(ipflag[c]) && !ipflag_is_fill(ipflag[c]))
        .map(|&c| taero[c])
        .collect();
    let mut clear_teps: Vec<f32> = centers
        .iter()
        .filter(|&&c| ipflag_is_clear(ipflag[c]) && !ipflag_is_fill(ipflag[c]))
        .map(|&c| teps[c])
        .collect();
    let defaults = AerosolDefaults {
        taero: median(&mut clear_taero).unwrap_or(FALLBACK_TAERO),
        teps: median(&mut clear_teps).unwrap_or(FALLBACK_TEPS),
    };

    let invalid: Vec<(usize, usize)> = centers
        .iter()
        .copied()
        .filter(|&c| ipflag[c] == 0)
        .collect();
    if invalid.is_empty() {
        return defaults;
    }
    log::info!(
        "Filling {} invalid aerosol retrievals from their neighbors",
        invalid.len()
    );

    // snapshot of the values the means draw from
    let taero_snap = taero.clone();
    let teps_snap = teps.clone();
    let window = params.aero_window as isize;
    let max_radius = (nlines.max(nsamps) / params.aero_window + 1) as isize;

    for (line, samp) in invalid {
        let mut filled = false;
        for radius in 1..=max_radius {
            let mut sum_taero = 0.0f64;
            let mut sum_teps = 0.0f64;
            let mut count = 0u32;
            for dl in -radius..=radius {
                for ds in -radius..=radius {
                    if dl == 0 && ds == 0 {
                        continue;
                    }
                    let l = line as isize + dl * window;
                    let s = samp as isize + ds * window;
                    if l < 0 || s < 0 || l as usize >= nlines || s as usize >= nsamps {
                        continue;
                    }
                    let at = (l as usize, s as usize);
                    if valid(ipflag[at]) {
                        sum_taero += taero_snap[at] as f64;
                        sum_teps += teps_snap[at] as f64;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                taero[(line, samp)] = (sum_taero / count as f64) as f32;
                teps[(line, samp)] = (sum_teps / count as f64) as f32;
                filled = true;
                break;
            }
        }
        if !filled {
            taero[(line, samp)] = defaults.taero;
            teps[(line, samp)] = defaults.teps;
        }
    }

    defaults
}

/// Bilinearly interpolate the window-center (AOT, Angstrom exponent) to
/// every non-fill pixel.  Edge pixels beyond the outermost centers
/// extrapolate from the nearest center; fill pixels take the scene
/// defaults.
pub fn interp_aerosols(
    ipflag: &Array2<u8>,
    taero: &Array2<f32>,
    teps: &Array2<f32>,
    params: &CorrectionParams,
    defaults: &AerosolDefaults,
) -> (Array2<f32>, Array2<f32>) {
    let (nlines, nsamps) = ipflag.dim();
    let half = params.half_window();
    let window = params.aero_window;

    let mut taero_out = Array2::from_elem((nlines, nsamps), defaults.taero);
    let mut teps_out = Array2::from_elem((nlines, nsamps), defaults.teps);

    // a scene narrower than the half window has no centers to draw from
    if half >= nlines || half >= nsamps {
        return (taero_out, teps_out);
    }
    let last_center_line = half + (nlines - 1 - half) / window * window;
    let last_center_samp = half + (nsamps - 1 - half) / window * window;

    Zip::indexed(&mut taero_out)
        .and(&mut teps_out)
        .and(ipflag)
        .par_for_each(|(l, s), taero_px, teps_px, &flag| {
            if ipflag_is_fill(flag) {
                return;
            }

            let c0l = (half + l.saturating_sub(half) / window * window).min(last_center_line);
            let c0s = (half + s.saturating_sub(half) / window * window).min(last_center_samp);
            let c1l = if c0l + window <= last_center_line {
                c0l + window
            } else {
                c0l
            };
            let c1s = if c0s + window <= last_center_samp {
                c0s + window
            } else {
                c0s
            };

            let u = if c1l > c0l {
                ((l as f32 - c0l as f32) / window as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let v = if c1s > c0s {
                ((s as f32 - c0s as f32) / window as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };

            let blend = |grid: &Array2<f32>| -> f32 {
                grid[(c0l, c0s)] * (1.0 - u) * (1.0 - v)
                    + grid[(c0l, c1s)] * (1.0 - u) * v
                    + grid[(c1l, c0s)] * u * (1.0 - v)
                    + grid[(c1l, c1s)] * u * v
            };
            *taero_px = blend(taero);
            *teps_px = blend(teps);
        });

    (taero_out, teps_out)
}
