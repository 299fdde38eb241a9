use crate::types::{level1_is_fill, CorrectionParams, SrError, SrResult};
use ndarray::{Array2, Zip};

/// TOA reflectance for one reflective band, corrected for the per-pixel
/// sun angle.
///
/// The digital numbers unscale through the band gain/bias from the
/// product metadata; the packed per-pixel solar zenith angles unscale
/// through `sza_mult`/`sza_add`.  Values clamp to the valid reflectance
/// range since they feed the surface reflectance inversion; fill pixels
/// carry the fill value.
pub fn toa_reflectance_band(
    dn: &Array2<u16>,
    qaband: &Array2<u16>,
    sza: &Array2<i16>,
    gain: f32,
    bias: f32,
    sza_mult: f32,
    sza_add: f32,
    params: &CorrectionParams,
) -> SrResult<Array2<f32>> {
    if dn.dim() != qaband.dim() || dn.dim() != sza.dim() {
        return Err(SrError::InvalidInput(format!(
            "band {:?}, QA {:?}, and SZA {:?} rasters disagree on dimensions",
            dn.dim(),
            qaband.dim(),
            sza.dim()
        )));
    }

    let mut toa = Array2::zeros(dn.dim());
    Zip::from(&mut toa)
        .and(dn)
        .and(qaband)
        .and(sza)
        .par_for_each(|out, &dn, &qa, &sza| {
            if level1_is_fill(qa) {
                *out = params.fill_value;
                return;
            }
            let xmus = ((sza as f32 * sza_mult + sza_add).to_radians()).cos();
            let rotoa = (dn as f32 * gain + bias) / xmus;
            *out = rotoa.clamp(params.min_valid_refl, params.max_valid_refl);
        });
    Ok(toa)
}

/// TOA brightness temperature (K) for one thermal band.
pub fn brightness_temp_band(
    dn: &Array2<u16>,
    qaband: &Array2<u16>,
    gain_th: f32,
    bias_th: f32,
    k1: f32,
    k2: f32,
    params: &CorrectionParams,
) -> SrResult<Array2<f32>> {
    if dn.dim() != qaband.dim() {
        return Err(SrError::InvalidInput(format!(
            "thermal band {:?} and QA {:?} rasters disagree on dimensions",
            dn.dim(),
            qaband.dim()
        )));
    }

    let mut bt = Array2::zeros(dn.dim());
    Zip::from(&mut bt)
        .and(dn)
        .and(qaband)
        .par_for_each(|out, &dn, &qa| {
            if level1_is_fill(qa) {
                *out = params.fill_value;
                return;
            }
            let radiance = dn as f32 * gain_th + bias_th;
            let temp = k2 / (k1 / radiance + 1.0).ln();
            *out = temp.clamp(params.min_valid_th, params.max_valid_th);
        });
    Ok(bt)
}
