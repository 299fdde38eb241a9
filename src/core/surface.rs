use crate::core::aero_interp::{fix_invalid_aerosols, interp_aerosols};
use crate::core::aerosol::{invert_aerosols, AeroBands};
use crate::core::ancillary::{CmgGrids, RatioGrids, SceneCenter};
use crate::core::atmosphere::atmcorlamb2;
use crate::core::coefficients::AtmCoefficients;
use crate::io::lut::{AtmosLut, AOT550_GRID};
use crate::types::{
    level1_is_fill, BandImage, CorrectionParams, Geolocation, QaImage, SceneGeometry,
    SceneMetadata, SrError, SrResult, B1, B2, B4, B5, B7, HIGH_EPS, IPFLAG_AERO1, IPFLAG_AERO2,
    IPFLAG_FILL, NSR_BANDS,
};
use ndarray::{Array2, Zip};

/// Product scaling of the 16-bit surface reflectance output
pub const SR_SCALE: f32 = 2.75e-5;
pub const SR_OFFSET: f32 = -0.2;
pub const SR_FILL_DN: u16 = 0;

/// Aerosol products of the surface reflectance correction.
#[derive(Debug, Clone)]
pub struct SurfaceReflOutput {
    /// Per-pixel aerosol QA byte
    pub aerosol_qa: Array2<u8>,
    /// Interpolated AOT at 550 nm per pixel
    pub taero: Array2<f32>,
    /// Interpolated Angstrom exponent per pixel
    pub teps: Array2<f32>,
}

/// Scene-center coefficients of the climatology correction, kept to
/// reconstruct the TOA reflectance during the final correction.
struct ClimatologyCoeffs {
    btgo: [f32; NSR_BANDS],
    broatm: [f32; NSR_BANDS],
    bttatmg: [f32; NSR_BANDS],
    bsatm: [f32; NSR_BANDS],
}

/// Full surface reflectance correction of a scene.
///
/// `sband` holds the unscaled TOA reflectance of bands 1-7 on input and
/// the unscaled surface reflectance on output.  The stages run in their
/// data-dependency order: coefficient fitting, climatology correction,
/// windowed aerosol inversion, invalid-retrieval filling, window
/// interpolation, final per-pixel correction.
#[allow(clippy::too_many_arguments)]
pub fn compute_surface_reflectance<G: Geolocation>(
    sband: &mut [BandImage],
    qaband: &QaImage,
    meta: &SceneMetadata,
    geom: &SceneGeometry,
    atmos_lut: &AtmosLut,
    cmg: &CmgGrids,
    ratio: RatioGrids,
    geoloc: &G,
    params: &CorrectionParams,
) -> SrResult<SurfaceReflOutput> {
    let dims = (meta.nlines, meta.nsamps);
    if sband.len() != NSR_BANDS {
        return Err(SrError::InvalidInput(format!(
            "expected {NSR_BANDS} reflectance bands, got {}",
            sband.len()
        )));
    }
    if qaband.dim() != dims || sband.iter().any(|b| b.dim() != dims) {
        return Err(SrError::InvalidInput(format!(
            "band rasters do not match the scene dimensions {dims:?}"
        )));
    }

    log::info!(
        "Surface reflectance correction for a {} x {} {} scene",
        meta.nlines,
        meta.nsamps,
        meta.satellite
    );

    let center = SceneCenter::from_scene(cmg, geoloc, meta.nlines, meta.nsamps)?;
    let coeffs = AtmCoefficients::build(
        meta.satellite,
        geom,
        center.pres,
        center.uoz,
        center.uwv,
        atmos_lut,
    )?;

    let mut ipflag: Array2<u8> = Array2::zeros(dims);
    let mut taero = Array2::from_elem(dims, 0.05f32);
    let mut teps = Array2::from_elem(dims, 1.5f32);

    let (clim, aerob) = apply_climatology_correction(
        sband, qaband, meta, geom, &center, atmos_lut, params, &mut ipflag,
    )?;

    log::info!("Guarding ratio climatology and inverting aerosols");
    let ratio = ratio.guarded();
    invert_aerosols(
        qaband, &aerob, &ratio, &coeffs, geom, geoloc, params, &mut ipflag, &mut taero, &mut teps,
    )?;
    drop(aerob);

    let defaults = fix_invalid_aerosols(&ipflag, &mut taero, &mut teps, params);
    let (taero, teps) = interp_aerosols(&ipflag, &taero, &teps, params, &defaults);

    apply_final_correction(sband, qaband, &clim, &coeffs, &taero, &teps, params, &mut ipflag);

    Ok(SurfaceReflOutput {
        aerosol_qa: ipflag,
        taero,
        teps,
    })
}

/// First-pass correction with the scene-wide climatology aerosol.
///
/// Snapshots the TOA reflectance of the inversion bands before the band
/// arrays are overwritten, flags fill pixels in the QA plane, and applies
/// the simplified Lambertian inversion with the scene-center coefficients
/// at the climatology AOT.
#[allow(clippy::too_many_arguments)]
fn apply_climatology_correction(
    sband: &mut [BandImage],
    qaband: &QaImage,
    meta: &SceneMetadata,
    geom: &SceneGeometry,
    center: &SceneCenter,
    atmos_lut: &AtmosLut,
    params: &CorrectionParams,
    ipflag: &mut Array2<u8>,
) -> SrResult<(ClimatologyCoeffs, AeroBands)> {
    log::info!("Climatology-based atmospheric correction of {NSR_BANDS} bands");
    let mut clim = ClimatologyCoeffs {
        btgo: [0.0; NSR_BANDS],
        broatm: [0.0; NSR_BANDS],
        bttatmg: [0.0; NSR_BANDS],
        bsatm: [0.0; NSR_BANDS],
    };

    // TOA snapshots for the aerosol inversion, taken before correcting
    let aerob = AeroBands {
        b1: sband[B1].clone(),
        b2: sband[B2].clone(),
        b4: sband[B4].clone(),
        b5: sband[B5].clone(),
        b7: sband[B7].clone(),
    };

    for ib in 0..NSR_BANDS {
        let terms = atmcorlamb2(
            meta.satellite,
            geom,
            center.pres,
            AOT550_GRID[1],
            ib,
            HIGH_EPS,
            center.uoz,
            center.uwv,
            atmos_lut,
        )?;
        clim.btgo[ib] = terms.tgo;
        clim.broatm[ib] = terms.roatm;
        clim.bttatmg[ib] = terms.ttatmg;
        clim.bsatm[ib] = terms.satm;

        let tgo_x_roatm = terms.tgo * terms.roatm;
        let tgo_x_ttatmg = terms.tgo * terms.ttatmg;
        let satm = terms.satm;

        if ib == B1 {
            // the fill flag only needs to be raised once
            Zip::from(&mut sband[ib])
                .and(qaband)
                .and(&mut *ipflag)
                .par_for_each(|px, &qa, flag| {
                    if level1_is_fill(qa) {
                        *flag = 1 << IPFLAG_FILL;
                        return;
                    }
                    let rho = *px - tgo_x_roatm;
                    let roslamb = rho / (tgo_x_ttatmg + satm * rho);
                    *px = roslamb.clamp(params.min_valid_refl, params.max_valid_refl);
                });
        } else {
            Zip::from(&mut sband[ib])
                .and(qaband)
                .par_for_each(|px, &qa| {
                    if level1_is_fill(qa) {
                        return;
                    }
                    let rho = *px - tgo_x_roatm;
                    let roslamb = rho / (tgo_x_ttatmg + satm * rho);
                    *px = roslamb.clamp(params.min_valid_refl, params.max_valid_refl);
                });
        }
    }

    Ok((clim, aerob))
}

/// Final per-pixel Lambertian correction with the retrieved aerosol.
///
/// Reconstructs the TOA reflectance from the climatology-corrected value,
/// re-corrects with the pixel's (AOT, Angstrom exponent), and sets the
/// aerosol QA bits from the band 1 correction delta.
#[allow(clippy::too_many_arguments)]
fn apply_final_correction(
    sband: &mut [BandImage],
    qaband: &QaImage,
    clim: &ClimatologyCoeffs,
    coeffs: &AtmCoefficients,
    taero: &Array2<f32>,
    teps: &Array2<f32>,
    params: &CorrectionParams,
    ipflag: &mut Array2<u8>,
) {
    log::info!("Final aerosol-based atmospheric correction");
    for ib in 0..NSR_BANDS {
        let btgo = clim.btgo[ib];
        let broatm = clim.broatm[ib];
        let bttatmg = clim.bttatmg[ib];
        let bsatm = clim.bsatm[ib];

        if ib == B1 {
            Zip::from(&mut sband[ib])
                .and(qaband)
                .and(taero)
                .and(teps)
                .and(&mut *ipflag)
                .par_for_each(|px, &qa, &raot, &eps, flag| {
                    if level1_is_fill(qa) {
                        return;
                    }
                    let rsurf = *px;
                    let rotoa = (rsurf * bttatmg / (1.0 - bsatm * rsurf) + broatm) * btgo;
                    let roslamb = coeffs.correct(ib, rotoa, raot, eps);

                    let delta = (rsurf - roslamb).abs();
                    if delta <= params.low_aero_thresh {
                        *flag |= 1 << IPFLAG_AERO1;
                    } else if delta < params.avg_aero_thresh {
                        *flag |= 1 << IPFLAG_AERO2;
                    } else {
                        *flag |= (1 << IPFLAG_AERO1) | (1 << IPFLAG_AERO2);
                    }

                    *px = roslamb.clamp(params.min_valid_refl, params.max_valid_refl);
                });
        } else {
            Zip::from(&mut sband[ib])
                .and(qaband)
                .and(taero)
                .and(teps)
                .par_for_each(|px, &qa, &raot, &eps| {
                    if level1_is_fill(qa) {
                        return;
                    }
                    let rsurf = *px;
                    let rotoa = (rsurf * bttatmg / (1.0 - bsatm * rsurf) + broatm) * btgo;
                    let roslamb = coeffs.correct(ib, rotoa, raot, eps);
                    *px = roslamb.clamp(params.min_valid_refl, params.max_valid_refl);
                });
        }
    }
}

/// Scale an unscaled surface reflectance band to the 16-bit product
/// range.  Fill pixels map to the fill DN.
pub fn scale_for_output(band: &BandImage, qaband: &QaImage) -> Array2<u16> {
    let mut out = Array2::zeros(band.dim());
    Zip::from(&mut out)
        .and(band)
        .and(qaband)
        .par_for_each(|dn, &refl, &qa| {
            *dn = if level1_is_fill(qa) {
                SR_FILL_DN
            } else {
                ((refl - SR_OFFSET) / SR_SCALE)
                    .round()
                    .clamp(1.0, u16::MAX as f32) as u16
            };
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_climatology_round_trip() {
        // the final-correction TOA reconstruction must invert the
        // climatology correction
        let (tgo, roatm, ttatmg, satm) = (0.97f32, 0.06, 0.88, 0.11);
        for &rotoa in &[0.05f32, 0.2, 0.6] {
            let rho = rotoa - tgo * roatm;
            let rsurf = rho / (tgo * ttatmg + satm * rho);
            let back = (rsurf * ttatmg / (1.0 - satm * rsurf) + roatm) * tgo;
            assert!((back - rotoa).abs() < 1e-5, "round trip at {rotoa}");
        }
    }

    #[test]
    fn test_scale_for_output() {
        let band = Array2::from_elem((1, 2), 0.35f32);
        let mut qa = Array2::zeros((1, 2));
        qa[(0, 1)] = 1;
        let dn = scale_for_output(&band, &qa);
        let expected = ((0.35 - SR_OFFSET) / SR_SCALE).round() as u16;
        assert_eq!(dn[(0, 0)], expected);
        assert_eq!(dn[(0, 1)], SR_FILL_DN);
    }

    #[test]
    fn test_scale_clamps_below_range() {
        let band = Array2::from_elem((1, 1), -0.5f32);
        let qa = Array2::zeros((1, 1));
        let dn = scale_for_output(&band, &qa);
        assert_eq!(dn[(0, 0)], 1);
    }
}
