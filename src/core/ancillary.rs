use crate::types::{Geolocation, SrError, SrResult, RAD2DEG};
use ndarray::Array2;

/// Rows/columns of the 0.05 x 0.05 degree Climate Modeling Grid products
pub const CMG_NBLAT: usize = 3600;
pub const CMG_NBLON: usize = 7200;
pub const RATIO_NBLAT: usize = 3600;
pub const RATIO_NBLON: usize = 7200;

/// Unscaling factor for the ratio and NDWI grids (stored x1000)
const RATIO_SCALE: f32 = 0.001;
/// Ozone DN to total column ozone in cm-atm
const OZONE_SCALE: f32 = 1.0 / 400.0;
/// Water vapor DN to precipitable water vapor in g/cm2
const WV_SCALE: f32 = 1.0 / 200.0;

/// Bilinear lookup position within a global lat/lon grid.
///
/// The longitude neighbor wraps around the dateline; the latitude
/// neighbor clamps at the poles.
#[derive(Debug, Clone, Copy)]
pub struct GridIndex {
    pub lcmg: usize,
    pub scmg: usize,
    pub lcmg1: usize,
    pub scmg1: usize,
    pub u: f32,
    pub v: f32,
}

impl GridIndex {
    /// Locate a latitude/longitude (degrees) in a grid of the given
    /// dimensions, using the center of the upper-left cell as the origin.
    pub fn locate(lat: f64, lon: f64, nblat: usize, nblon: usize) -> Self {
        let cell_lat = 180.0 / nblat as f64;
        let cell_lon = 360.0 / nblon as f64;
        let ycmg = (90.0 - 0.5 * cell_lat - lat) / cell_lat;
        let xcmg = (180.0 - 0.5 * cell_lon + lon) / cell_lon;

        let lcmg = (ycmg.floor() as isize).clamp(0, nblat as isize - 1) as usize;
        let scmg = (xcmg.floor() as isize).clamp(0, nblon as isize - 1) as usize;

        // longitude wraps at the dateline, latitude clamps at the pole
        let scmg1 = if scmg >= nblon - 1 { 0 } else { scmg + 1 };
        let lcmg1 = if lcmg >= nblat - 1 { lcmg } else { lcmg + 1 };

        let u = ((ycmg - lcmg as f64).clamp(0.0, 1.0)) as f32;
        let v = ((xcmg - scmg as f64).clamp(0.0, 1.0)) as f32;

        Self {
            lcmg,
            scmg,
            lcmg1,
            scmg1,
            u,
            v,
        }
    }

    /// Bilinear weights for the (11, 12, 21, 22) neighbors.
    #[inline]
    pub fn weights(&self) -> [f32; 4] {
        let one_minus_u = 1.0 - self.u;
        let one_minus_v = 1.0 - self.v;
        [
            one_minus_u * one_minus_v,
            one_minus_u * self.v,
            self.u * one_minus_v,
            self.u * self.v,
        ]
    }

    /// The four neighbor coordinates in (11, 12, 21, 22) order.
    #[inline]
    pub fn neighbors(&self) -> [(usize, usize); 4] {
        [
            (self.lcmg, self.scmg),
            (self.lcmg, self.scmg1),
            (self.lcmg1, self.scmg),
            (self.lcmg1, self.scmg1),
        ]
    }
}

fn bilinear<T: Copy + Into<f32>>(grid: &Array2<T>, idx: &GridIndex) -> f32 {
    let w = idx.weights();
    idx.neighbors()
        .iter()
        .zip(w)
        .map(|(&(l, s), wk)| grid[(l, s)].into() * wk)
        .sum()
}

/// Climate Modeling Grid ancillary data: DEM, water vapor, and ozone.
#[derive(Debug, Clone)]
pub struct CmgGrids {
    /// Elevation in meters
    pub dem: Array2<i16>,
    /// Scaled precipitable water vapor
    pub wv: Array2<u16>,
    /// Scaled total column ozone
    pub oz: Array2<u8>,
}

impl CmgGrids {
    pub fn from_parts(dem: Array2<i16>, wv: Array2<u16>, oz: Array2<u8>) -> SrResult<Self> {
        if dem.dim() != wv.dim() || dem.dim() != oz.dim() {
            return Err(SrError::InvalidInput(format!(
                "CMG grids disagree on dimensions: dem {:?}, wv {:?}, oz {:?}",
                dem.dim(),
                wv.dim(),
                oz.dim()
            )));
        }
        Ok(Self { dem, wv, oz })
    }

    pub fn dims(&self) -> (usize, usize) {
        self.dem.dim()
    }

    fn index(&self, lat: f64, lon: f64) -> GridIndex {
        let (nblat, nblon) = self.dims();
        GridIndex::locate(lat, lon, nblat, nblon)
    }

    /// Bilinear DEM elevation in meters; ocean fill cells count as sea level.
    pub fn height_at(&self, lat: f64, lon: f64) -> f32 {
        let idx = self.index(lat, lon);
        let w = idx.weights();
        idx.neighbors()
            .iter()
            .zip(w)
            .map(|(&(l, s), wk)| {
                let h = self.dem[(l, s)];
                if h <= -500 {
                    0.0
                } else {
                    h as f32 * wk
                }
            })
            .sum()
    }

    /// Bilinear total column ozone in cm-atm.
    pub fn ozone_at(&self, lat: f64, lon: f64) -> f32 {
        bilinear(&self.oz.mapv(|v| v as f32), &self.index(lat, lon)) * OZONE_SCALE
    }

    /// Bilinear precipitable water vapor in g/cm2.
    pub fn water_vapor_at(&self, lat: f64, lon: f64) -> f32 {
        bilinear(&self.wv.mapv(|v| v as f32), &self.index(lat, lon)) * WV_SCALE
    }

    /// Surface pressure (hPa) from the DEM elevation through the
    /// barometric formula.
    pub fn surface_pressure_at(&self, lat: f64, lon: f64) -> f32 {
        let height = self.height_at(lat, lon);
        1013.0 * (1.0 - 0.0065 * height / 288.15).powf(5.255)
    }
}

/// Scene-center atmospheric state used to build the coefficient
/// polynomials.
#[derive(Debug, Clone, Copy)]
pub struct SceneCenter {
    /// Surface pressure (hPa)
    pub pres: f32,
    /// Total column ozone (cm-atm)
    pub uoz: f32,
    /// Precipitable water vapor (g/cm2)
    pub uwv: f32,
}

impl SceneCenter {
    /// Resolve the scene center through the geolocation mapping and
    /// resample the CMG grids there.
    pub fn from_scene(
        cmg: &CmgGrids,
        geoloc: &dyn Geolocation,
        nlines: usize,
        nsamps: usize,
    ) -> SrResult<Self> {
        let (lat, lon) = geoloc.to_latlon(nlines as f64 / 2.0, nsamps as f64 / 2.0)?;
        let lat = lat * RAD2DEG;
        let lon = lon * RAD2DEG;
        let center = Self {
            pres: cmg.surface_pressure_at(lat, lon),
            uoz: cmg.ozone_at(lat, lon),
            uwv: cmg.water_vapor_at(lat, lon),
        };
        log::debug!(
            "scene center ({lat:.4}, {lon:.4}): pres = {:.1} hPa, uoz = {:.3}, uwv = {:.3}",
            center.pres,
            center.uoz,
            center.uwv
        );
        Ok(center)
    }
}

/// Climatological band-ratio grids: mean/sigma NDWI plus the
/// slope/intercept of the band 1, 2, and 7 ratios against NDWI, all
/// stored as scaled integers.
#[derive(Debug, Clone)]
pub struct RatioGrids {
    pub andwi: Array2<i16>,
    pub sndwi: Array2<i16>,
    pub ratiob1: Array2<i16>,
    pub ratiob2: Array2<i16>,
    pub ratiob7: Array2<i16>,
    pub intratiob1: Array2<i16>,
    pub intratiob2: Array2<i16>,
    pub intratiob7: Array2<i16>,
    pub slpratiob1: Array2<i16>,
    pub slpratiob2: Array2<i16>,
    pub slpratiob7: Array2<i16>,
}

/// Ratio climatology resampled to one retrieval location.
#[derive(Debug, Clone, Copy)]
pub struct RatioSample {
    pub slprb1: f32,
    pub slprb2: f32,
    pub slprb7: f32,
    pub intrb1: f32,
    pub intrb2: f32,
    pub intrb7: f32,
    /// Upper NDWI clamp (mean + 2 sigma)
    pub ndwi_th1: f32,
    /// Lower NDWI clamp (mean - 2 sigma)
    pub ndwi_th2: f32,
}

impl RatioGrids {
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        andwi: Array2<i16>,
        sndwi: Array2<i16>,
        ratiob1: Array2<i16>,
        ratiob2: Array2<i16>,
        ratiob7: Array2<i16>,
        intratiob1: Array2<i16>,
        intratiob2: Array2<i16>,
        intratiob7: Array2<i16>,
        slpratiob1: Array2<i16>,
        slpratiob2: Array2<i16>,
        slpratiob7: Array2<i16>,
    ) -> SrResult<Self> {
        let dim = andwi.dim();
        for (name, arr) in [
            ("sndwi", &sndwi),
            ("ratiob1", &ratiob1),
            ("ratiob2", &ratiob2),
            ("ratiob7", &ratiob7),
            ("intratiob1", &intratiob1),
            ("intratiob2", &intratiob2),
            ("intratiob7", &intratiob7),
            ("slpratiob1", &slpratiob1),
            ("slpratiob2", &slpratiob2),
            ("slpratiob7", &slpratiob7),
        ] {
            if arr.dim() != dim {
                return Err(SrError::InvalidInput(format!(
                    "ratio grid {name} is {:?}, expected {dim:?}",
                    arr.dim()
                )));
            }
        }
        Ok(Self {
            andwi,
            sndwi,
            ratiob1,
            ratiob2,
            ratiob7,
            intratiob1,
            intratiob2,
            intratiob7,
            slpratiob1,
            slpratiob2,
            slpratiob7,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        self.andwi.dim()
    }

    /// Apply the per-cell climatology fix-ups once, over the whole grid,
    /// so the aerosol inversion reads a frozen grid.
    ///
    /// Cells whose mean band ratios fall outside [0.1, 1.0] get the
    /// default land climatology (flat slopes, intercepts 0.55/0.6/2.0);
    /// cells with a weak NDWI spread get flat slopes with the mean ratio
    /// as intercept.  The fix-up is idempotent: guarding a guarded grid
    /// changes nothing.
    pub fn guarded(mut self) -> Self {
        let (nblat, nblon) = self.dims();
        log::info!("Guarding the {nblat}x{nblon} band ratio climatology");
        for l in 0..nblat {
            for s in 0..nblon {
                let rb1 = self.ratiob1[(l, s)] as f32 * RATIO_SCALE;
                let rb2 = self.ratiob2[(l, s)] as f32 * RATIO_SCALE;
                if !(0.1..=1.0).contains(&rb1) || !(0.1..=1.0).contains(&rb2) {
                    self.slpratiob1[(l, s)] = 0;
                    self.slpratiob2[(l, s)] = 0;
                    self.slpratiob7[(l, s)] = 0;
                    self.intratiob1[(l, s)] = 550;
                    self.intratiob2[(l, s)] = 600;
                    self.intratiob7[(l, s)] = 2000;
                } else if self.sndwi[(l, s)] < 200 {
                    self.slpratiob1[(l, s)] = 0;
                    self.slpratiob2[(l, s)] = 0;
                    self.slpratiob7[(l, s)] = 0;
                    self.intratiob1[(l, s)] = self.ratiob1[(l, s)];
                    self.intratiob2[(l, s)] = self.ratiob2[(l, s)];
                    self.intratiob7[(l, s)] = self.ratiob7[(l, s)];
                }
            }
        }
        self
    }

    /// Resample the slopes, intercepts, and NDWI thresholds for a
    /// retrieval location.  The NDWI thresholds come from the upper-left
    /// neighbor; slopes and intercepts blend bilinearly.
    pub fn resample(&self, lat: f64, lon: f64) -> RatioSample {
        let (nblat, nblon) = self.dims();
        let idx = GridIndex::locate(lat, lon, nblat, nblon);
        let w = idx.weights();
        let nb = idx.neighbors();

        let blend = |grid: &Array2<i16>| -> f32 {
            nb.iter()
                .zip(w)
                .map(|(&(l, s), wk)| grid[(l, s)] as f32 * RATIO_SCALE * wk)
                .sum()
        };

        let pix11 = (idx.lcmg, idx.scmg);
        RatioSample {
            slprb1: blend(&self.slpratiob1),
            slprb2: blend(&self.slpratiob2),
            slprb7: blend(&self.slpratiob7),
            intrb1: blend(&self.intratiob1),
            intrb2: blend(&self.intratiob2),
            intrb7: blend(&self.intratiob7),
            ndwi_th1: (self.andwi[pix11] as f32 + 2.0 * self.sndwi[pix11] as f32) * RATIO_SCALE,
            ndwi_th2: (self.andwi[pix11] as f32 - 2.0 * self.sndwi[pix11] as f32) * RATIO_SCALE,
        }
    }
}
