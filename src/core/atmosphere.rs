use crate::io::lut::{self, AtmosLut};
use crate::types::{Satellite, SceneGeometry, SrError, SrResult, HIGH_EPS, RAD2DEG};

/// Atmospheric quantities produced by the radiative transfer kernel for one
/// (band, geometry, pressure, AOT, ozone, water vapor) combination.
#[derive(Debug, Clone, Copy)]
pub struct AtmosTerms {
    /// Other gaseous transmittance (tgog * tgoz)
    pub tgo: f32,
    /// Intrinsic atmospheric reflectance
    pub roatm: f32,
    /// Total atmospheric transmission including water vapor
    pub ttatmg: f32,
    /// Atmosphere spherical albedo
    pub satm: f32,
    /// Reflectance of the atmosphere due to molecular scattering
    pub xrorayp: f32,
}

impl AtmosTerms {
    /// Lambertian inversion: TOA reflectance to surface reflectance.
    #[inline]
    pub fn surface_reflectance(&self, rotoa: f32) -> f32 {
        let rho = rotoa / self.tgo - self.roatm;
        rho / (self.ttatmg + self.satm * rho)
    }

    /// Forward model: surface reflectance to TOA reflectance.
    #[inline]
    pub fn toa_reflectance(&self, roslamb: f32) -> f32 {
        (self.roatm + self.ttatmg * roslamb / (1.0 - self.satm * roslamb)) * self.tgo
    }
}

/// Lambertian atmospheric correction kernel.
///
/// Interpolates the 6S lookup tables at the requested pressure and AOT
/// (bilinear, clamped at the grid ends), resolves the solar dimension of
/// the intrinsic reflectance table through the scattering-angle envelope
/// tables, and evaluates the analytic gas transmissions.  The Angstrom
/// exponent enters through the band extinction ratio, which rescales the
/// AOT seen by this band's table entries.
///
/// The only typed failure is an invalid band index; out-of-grid values
/// clamp silently.
#[allow(clippy::too_many_arguments)]
pub fn atmcorlamb2(
    sat: Satellite,
    geom: &SceneGeometry,
    pres: f32,
    raot550nm: f32,
    ib: usize,
    eps: f32,
    uoz: f32,
    uwv: f32,
    atmos_lut: &AtmosLut,
) -> SrResult<AtmosTerms> {
    if ib >= atmos_lut.nbands() || ib >= lut::NLUT_BANDS {
        return Err(SrError::InvalidInput(format!(
            "band index {ib} out of range for the {sat} lookup tables"
        )));
    }

    let normext_ref = atmos_lut.normext[(ib, 0, 3)];
    let raot_band = scale_aot_for_eps(raot550nm, eps, normext_ref);

    let (ip, wp) = AtmosLut::pressure_bracket(pres);
    let (ia, wa) = AtmosLut::aot_bracket(raot_band);

    let mut roatm = 0.0f32;
    let mut ttatm = 0.0f32;
    let mut satm = 0.0f32;
    for (dp, fp) in [(0usize, 1.0 - wp), (1, wp)] {
        if fp == 0.0 {
            continue;
        }
        for (da, fa) in [(0usize, 1.0 - wa), (1, wa)] {
            if fa == 0.0 {
                continue;
            }
            let w = fp * fa;
            roatm += w * solar_interp(atmos_lut, ib, ip + dp, ia + da, geom);
            ttatm += w * two_way_transmission(atmos_lut, ib, ip + dp, ia + da, geom);
            satm += w * atmos_lut.sphalbt[(ib, ip + dp, ia + da)];
        }
    }

    let (tgoz, tgwv, tgog) = gas_transmissions(ib, geom, pres, uoz, uwv);
    Ok(AtmosTerms {
        tgo: (tgog * tgoz) as f32,
        roatm,
        ttatmg: ttatm * tgwv as f32,
        satm,
        xrorayp: rayleigh_reflectance(ib, geom),
    })
}

/// Rescale an AOT at 550 nm so that the band extinction matches the
/// requested Angstrom exponent.  The tables are built at eps = 2.5, for
/// which the band extinction ratio is `normext[ib][0][3]`; for another
/// eps the ratio is that value raised to eps/2.5.
#[inline]
pub(crate) fn scale_aot_for_eps(raot550: f32, eps: f32, normext_ref: f32) -> f32 {
    if normext_ref > 0.0 {
        raot550 * normext_ref.powf(eps / HIGH_EPS - 1.0)
    } else {
        raot550
    }
}

/// Scattering angle (degrees) for the sun/view geometry.
fn scattering_angle(geom: &SceneGeometry) -> f32 {
    (cos_scattering_angle(geom).acos() * RAD2DEG) as f32
}

fn cos_scattering_angle(geom: &SceneGeometry) -> f64 {
    let xmus = geom.xmus as f64;
    let xmuv = geom.xmuv as f64;
    let csca = -xmus * xmuv
        - geom.cosxfi as f64 * ((1.0 - xmus * xmus).sqrt() * (1.0 - xmuv * xmuv).sqrt());
    csca.clamp(-1.0, 1.0)
}

/// Resolve the solar dimension of the intrinsic reflectance table for one
/// (band, pressure, AOT) cell.
///
/// Each sun-angle block of the solar axis starts at `indts` and holds the
/// azimuth samples counted by `nbfi`/`nbfic` for the view-zenith row; the
/// sample position within a block follows the scattering angle between the
/// `tsmin`/`tsmax` envelope.  The result is linear in the sun angle between
/// the bracketing `tts` entries and in the view angle between the
/// bracketing `ttv` rows.
fn solar_interp(atmos_lut: &AtmosLut, ib: usize, ip: usize, ia: usize, geom: &SceneGeometry) -> f32 {
    let (nvz, nsz) = atmos_lut.tsmax.dim();
    let nsol = atmos_lut.rolutt.dim().3;
    let nts = atmos_lut.tts.len();
    let scaa = scattering_angle(geom);

    // sun angle bracket in the coarse table
    let mut its = 0;
    while its < nts.saturating_sub(2) && geom.xts >= atmos_lut.tts[its + 1] {
        its += 1;
    }
    let its1 = (its + 1).min(nts - 1);
    let span = atmos_lut.tts[its1] - atmos_lut.tts[its];
    let wts = if span > 0.0 {
        ((geom.xts - atmos_lut.tts[its]) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };

    // view zenith bracket rows
    let ivf = ((geom.xtv - atmos_lut.xtvmin) / atmos_lut.xtvstep).max(0.0);
    let iv = (ivf as usize).min(nvz - 1);
    let iv1 = (iv + 1).min(nvz - 1);

    let mut acc = 0.0f32;
    for (k, wk) in [(its, 1.0 - wts), (its1, wts)] {
        if wk == 0.0 {
            continue;
        }
        let kg = k.min(nsz - 1);

        // view-angle weight from the tabulated view angles of this column
        let tv0 = atmos_lut.ttv[(iv, kg)];
        let tv1 = atmos_lut.ttv[(iv1, kg)];
        let wv = if tv1 > tv0 {
            ((geom.xtv - tv0) / (tv1 - tv0)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        for (v, wvk) in [(iv, 1.0 - wv), (iv1, wv)] {
            if wvk == 0.0 {
                continue;
            }
            let nb = (atmos_lut.nbfi[(v, kg)].max(1.0)) as usize;
            let row_offset = (atmos_lut.nbfic[(v, kg)] - atmos_lut.nbfi[(v, kg)]).max(0.0) as usize;
            let base = (atmos_lut.indts[kg].max(0) as usize + row_offset).min(nsol - 1);

            let tmin = atmos_lut.tsmin[(v, kg)];
            let tmax = atmos_lut.tsmax[(v, kg)];
            let f = if tmax > tmin {
                ((scaa - tmin) / (tmax - tmin)).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let pos = f * (nb - 1) as f32;
            let j0 = (base + pos as usize).min(nsol - 1);
            let j1 = (j0 + 1).min(base + nb - 1).min(nsol - 1);
            let wj = pos - pos.floor();

            acc += wk
                * wvk
                * (atmos_lut.rolutt[(ib, ip, ia, j0)] * (1.0 - wj)
                    + atmos_lut.rolutt[(ib, ip, ia, j1)] * wj);
        }
    }
    acc
}

/// Total two-way atmospheric transmission: the tabulated one-way
/// transmission evaluated at the solar and the view zenith angle.
fn two_way_transmission(
    atmos_lut: &AtmosLut,
    ib: usize,
    ip: usize,
    ia: usize,
    geom: &SceneGeometry,
) -> f32 {
    transmission_at(atmos_lut, ib, ip, ia, geom.xts) * transmission_at(atmos_lut, ib, ip, ia, geom.xtv)
}

fn transmission_at(atmos_lut: &AtmosLut, ib: usize, ip: usize, ia: usize, angle: f32) -> f32 {
    let nsun = atmos_lut.transt.dim().3;
    let pos = ((angle - atmos_lut.xtsmin) / atmos_lut.xtsstep).max(0.0);
    let i0 = (pos as usize).min(nsun - 1);
    let i1 = (i0 + 1).min(nsun - 1);
    let w = (pos - i0 as f32).clamp(0.0, 1.0);
    atmos_lut.transt[(ib, ip, ia, i0)] * (1.0 - w) + atmos_lut.transt[(ib, ip, ia, i1)] * w
}

/// Analytic 6S gas transmissions: ozone, water vapor, and the remaining
/// gases, for the two-path air mass of the geometry.
fn gas_transmissions(
    ib: usize,
    geom: &SceneGeometry,
    pres: f32,
    uoz: f32,
    uwv: f32,
) -> (f64, f64, f64) {
    let m = 1.0 / geom.xmus as f64 + 1.0 / geom.xmuv as f64;

    let tgoz = (lut::OZTRANSA[ib] * m * uoz as f64).exp();

    let x = m * uwv as f64;
    let tgwv = if x > 1e-6 {
        (-lut::WVTRANSA[ib] * x.powf(lut::WVTRANSB[ib])).exp()
    } else {
        1.0
    };

    let p_atm = pres as f64 / 1013.0;
    let tgog =
        (-(lut::OGTRANSA1[ib] * p_atm) * m.powf((lut::OGTRANSB0[ib] + lut::OGTRANSB1[ib] * p_atm).exp()))
            .exp();

    (tgoz, tgwv, tgog)
}

/// Single-scattering molecular reflectance from the Rayleigh optical depth.
fn rayleigh_reflectance(ib: usize, geom: &SceneGeometry) -> f32 {
    let csca = cos_scattering_angle(geom);
    let phase = 0.75 * (1.0 + csca * csca);
    (lut::TAURAY[ib] as f64 * phase / (4.0 * geom.xmus as f64 * geom.xmuv as f64)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil::flat_lut;

    #[test]
    fn test_lambertian_inversion_closed_form() {
        let terms = AtmosTerms {
            tgo: 0.98,
            roatm: 0.05,
            ttatmg: 0.9,
            satm: 0.1,
            xrorayp: 0.0,
        };
        let ros = terms.surface_reflectance(0.2);
        let expected = (0.2 / 0.98 - 0.05) / (0.9 + 0.1 * (0.2f32 / 0.98 - 0.05));
        assert!((ros - expected).abs() < 1e-6);
        assert!((ros - 0.168).abs() < 1e-3);
    }

    #[test]
    fn test_forward_inverts_surface_reflectance() {
        let terms = AtmosTerms {
            tgo: 0.95,
            roatm: 0.08,
            ttatmg: 0.85,
            satm: 0.12,
            xrorayp: 0.0,
        };
        for &ros in &[0.0, 0.05, 0.3, 0.9] {
            let rotoa = terms.toa_reflectance(ros);
            let back = terms.surface_reflectance(rotoa);
            assert!((back - ros).abs() < 1e-5, "round trip failed at {ros}");
        }
    }

    #[test]
    fn test_flat_lut_interpolation() {
        let atmos_lut = flat_lut(0.05, 0.95, 0.1, 1.0);
        let geom = SceneGeometry::nadir(30.0);
        let terms = atmcorlamb2(
            Satellite::Landsat8,
            &geom,
            1013.0,
            0.1,
            3,
            HIGH_EPS,
            0.3,
            2.0,
            &atmos_lut,
        )
        .unwrap();
        assert!((terms.roatm - 0.05).abs() < 1e-6);
        // two-way transmission of a flat one-way table
        assert!((terms.ttatmg - 0.95 * 0.95 * gas_wv(3, &geom)).abs() < 1e-4);
        assert!((terms.satm - 0.1).abs() < 1e-6);
        assert!(terms.tgo > 0.0 && terms.tgo <= 1.0);
    }

    fn gas_wv(ib: usize, geom: &SceneGeometry) -> f32 {
        let (_, tgwv, _) = gas_transmissions(ib, geom, 1013.0, 0.3, 2.0);
        tgwv as f32
    }

    #[test]
    fn test_invalid_band_errors() {
        let atmos_lut = flat_lut(0.05, 0.95, 0.1, 1.0);
        let geom = SceneGeometry::nadir(30.0);
        let result = atmcorlamb2(
            Satellite::Landsat8,
            &geom,
            1013.0,
            0.1,
            99,
            HIGH_EPS,
            0.3,
            2.0,
            &atmos_lut,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_scattering_angle_at_nadir() {
        // Nadir view: the scattering angle is the backscatter complement
        let geom = SceneGeometry::nadir(40.0);
        let scaa = scattering_angle(&geom);
        assert!((scaa - 140.0).abs() < 1e-3);
    }

    #[test]
    fn test_gas_transmissions_in_range() {
        let geom = SceneGeometry::nadir(45.0);
        for ib in 0..lut::NLUT_BANDS {
            let (tgoz, tgwv, tgog) = gas_transmissions(ib, &geom, 1013.0, 0.3, 2.0);
            // the NIR/SWIR ozone coefficient is a tiny positive filler, so
            // tgoz may sit marginally above one there
            assert!(tgoz > 0.0 && tgoz <= 1.001, "tgoz out of range for band {ib}");
            assert!(tgwv > 0.0 && tgwv <= 1.0, "tgwv out of range for band {ib}");
            assert!(tgog > 0.0 && tgog <= 1.0, "tgog out of range for band {ib}");
        }
    }

    #[test]
    fn test_eps_scaling_identity_at_reference() {
        assert!((scale_aot_for_eps(0.4, HIGH_EPS, 0.7) - 0.4).abs() < 1e-7);
        // With an extinction ratio below one, a smaller eps raises the
        // equivalent 550 nm AOT seen by the tables
        assert!(scale_aot_for_eps(0.4, 1.0, 0.7) > 0.4);
    }
}
