use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued band raster (lines x samples)
pub type BandImage = Array2<f32>;

/// Level-1 QA raster (lines x samples)
pub type QaImage = Array2<u16>;

/// Degrees per radian
pub const RAD2DEG: f64 = 57.295_779_513_082_32;

/// Zero-based indices of the reflective bands within `sband`
pub const B1: usize = 0;
pub const B2: usize = 1;
pub const B3: usize = 2;
pub const B4: usize = 3;
pub const B5: usize = 4;
pub const B6: usize = 5;
pub const B7: usize = 6;

/// Number of reflective bands carried through the surface reflectance path
/// (bands 1-7; the pan band is never processed)
pub const NSR_BANDS: usize = 7;

/// Number of thermal bands (10 and 11)
pub const NTHERMAL_BANDS: usize = 2;

/// Satellite platforms supported by the correction engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Satellite {
    Landsat8,
    Landsat9,
}

impl std::fmt::Display for Satellite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Satellite::Landsat8 => write!(f, "LANDSAT_8"),
            Satellite::Landsat9 => write!(f, "LANDSAT_9"),
        }
    }
}

/// Scene-wide observation geometry, fixed for a scene.
///
/// Landsat acquires at nadir, so the view zenith is zero and the sun/view
/// azimuth difference collapses to zero as well.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SceneGeometry {
    /// Scene-center solar zenith angle (degrees)
    pub xts: f32,
    /// Cosine of the solar zenith angle
    pub xmus: f32,
    /// Observation zenith angle (degrees)
    pub xtv: f32,
    /// Cosine of the observation zenith angle
    pub xmuv: f32,
    /// Azimuthal difference between sun and observation (degrees)
    pub xfi: f32,
    /// Cosine of the azimuthal difference
    pub cosxfi: f32,
}

impl SceneGeometry {
    /// Nadir-view geometry for a scene-center solar zenith angle in degrees.
    pub fn nadir(xts: f32) -> Self {
        Self {
            xts,
            xmus: (xts as f64).to_radians().cos() as f32,
            xtv: 0.0,
            xmuv: 1.0,
            xfi: 0.0,
            cosxfi: 1.0,
        }
    }
}

/// Per-scene metadata consumed by the correction engine.  The Level-1
/// reader supplies this from the product XML; the engine never touches
/// the files itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub satellite: Satellite,
    /// Instrument string, e.g. "OLI_TIRS" or "OLI"
    pub instrument: String,
    pub acquisition_time: DateTime<Utc>,
    pub nlines: usize,
    pub nsamps: usize,
    /// Pixel size of the reflectance bands (meters)
    pub pixel_size: f32,
    /// Reflectance gain per band 1-9 (pan slot unused)
    pub gain: [f32; 9],
    /// Reflectance bias per band 1-9
    pub bias: [f32; 9],
    /// Radiance gain for thermal bands 10-11
    pub gain_th: [f32; NTHERMAL_BANDS],
    /// Radiance bias for thermal bands 10-11
    pub bias_th: [f32; NTHERMAL_BANDS],
    /// K1 thermal constant for bands 10-11
    pub k1_const: [f32; NTHERMAL_BANDS],
    /// K2 thermal constant for bands 10-11
    pub k2_const: [f32; NTHERMAL_BANDS],
    /// Scale applied to the packed per-pixel solar zenith angles
    pub sza_mult: f32,
    /// Offset applied to the packed per-pixel solar zenith angles
    pub sza_add: f32,
}

impl SceneMetadata {
    pub fn npixels(&self) -> usize {
        self.nlines * self.nsamps
    }

    /// Thermal bands are absent on OLI-only acquisitions.
    pub fn has_thermal(&self) -> bool {
        self.instrument != "OLI"
    }
}

/// Bit positions within the per-pixel aerosol QA byte
pub const IPFLAG_FILL: u8 = 0;
pub const IPFLAG_CLEAR: u8 = 1;
pub const IPFLAG_WATER: u8 = 2;
pub const IPFLAG_AERO1: u8 = 6;
pub const IPFLAG_AERO2: u8 = 7;

/// Fill pixel, never processed
#[inline]
pub fn ipflag_is_fill(flag: u8) -> bool {
    flag & (1 << IPFLAG_FILL) != 0
}

/// Valid aerosol retrieval over land
#[inline]
pub fn ipflag_is_clear(flag: u8) -> bool {
    flag & (1 << IPFLAG_CLEAR) != 0
}

/// Pixel classified as water during the retrieval
#[inline]
pub fn ipflag_is_water(flag: u8) -> bool {
    flag & (1 << IPFLAG_WATER) != 0
}

/// Neither fill nor a successful retrieval; filled from neighbors later
#[inline]
pub fn ipflag_retrieval_failed(flag: u8) -> bool {
    flag == 0
}

/// Level-1 QA designated fill bit
const L1_QA_FILL_BIT: u16 = 0;

/// True when the Level-1 QA word marks the pixel as fill.
#[inline]
pub fn level1_is_fill(qa: u16) -> bool {
    qa & (1 << L1_QA_FILL_BIT) != 0
}

/// Tunable parameters of the correction.  The defaults reproduce the
/// operational Landsat 8/9 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionParams {
    /// Side of the square aerosol retrieval window (pixels)
    pub aero_window: usize,
    /// Aerosol QA threshold for the low-aerosol bit
    pub low_aero_thresh: f32,
    /// Aerosol QA threshold for the average-aerosol bit
    pub avg_aero_thresh: f32,
    /// Lower clamp for surface reflectance on write
    pub min_valid_refl: f32,
    /// Upper clamp for surface reflectance on write
    pub max_valid_refl: f32,
    /// Lower clamp for brightness temperature (K)
    pub min_valid_th: f32,
    /// Upper clamp for brightness temperature (K)
    pub max_valid_th: f32,
    /// Value stored at fill pixels in the unscaled band arrays
    pub fill_value: f32,
}

impl CorrectionParams {
    /// Half-size of the aerosol window; window centers sit at
    /// `half + k * aero_window`.
    pub fn half_window(&self) -> usize {
        self.aero_window / 2
    }
}

impl Default for CorrectionParams {
    fn default() -> Self {
        Self {
            aero_window: 9,
            low_aero_thresh: 0.01,
            avg_aero_thresh: 0.03,
            min_valid_refl: -0.2,
            max_valid_refl: 1.6,
            min_valid_th: 150.0,
            max_valid_th: 373.0,
            fill_value: -9999.0,
        }
    }
}

/// Angstrom exponent search range of the aerosol inversion
pub const LOW_EPS: f32 = 1.0;
pub const MOD_EPS: f32 = 1.75;
pub const HIGH_EPS: f32 = 2.5;

/// Error types for the surface reflectance processing
#[derive(Debug, thiserror::Error)]
pub enum SrError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("lookup table error: {0}")]
    Lut(String),

    #[error("geolocation error: {0}")]
    Geolocation(String),

    #[error("processing error: {0}")]
    Processing(String),
}

/// Result type for surface reflectance operations
pub type SrResult<T> = Result<T, SrError>;

/// Forward mapping from image space to geographic space.
///
/// Implementations wrap the projection library of the host; a scene is
/// aborted on the first failure since it signals corrupt metadata.
pub trait Geolocation: Sync {
    /// Map an image (line, sample) coordinate to (latitude, longitude)
    /// in radians.
    fn to_latlon(&self, line: f64, samp: f64) -> SrResult<(f64, f64)>;
}

/// North-up geographic grid described by its upper-left corner and pixel
/// size in degrees.  Sufficient for resampled products and for tests;
/// projected scenes plug their own `Geolocation` in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatLonGrid {
    /// Latitude of the upper-left corner of the upper-left pixel (degrees)
    pub ul_lat: f64,
    /// Longitude of the upper-left corner of the upper-left pixel (degrees)
    pub ul_lon: f64,
    /// Pixel height in degrees (positive)
    pub lat_step: f64,
    /// Pixel width in degrees (positive)
    pub lon_step: f64,
}

impl Geolocation for LatLonGrid {
    fn to_latlon(&self, line: f64, samp: f64) -> SrResult<(f64, f64)> {
        let lat = self.ul_lat - line * self.lat_step;
        let lon = self.ul_lon + samp * self.lon_step;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(SrError::Geolocation(format!(
                "line/sample ({line:.1}, {samp:.1}) maps outside the globe"
            )));
        }
        Ok((lat.to_radians(), lon.to_radians()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nadir_geometry() {
        let geom = SceneGeometry::nadir(0.0);
        assert!((geom.xmus - 1.0).abs() < 1e-6);
        assert_eq!(geom.xtv, 0.0);
        assert_eq!(geom.xmuv, 1.0);

        let geom = SceneGeometry::nadir(60.0);
        assert!((geom.xmus - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ipflag_predicates() {
        assert!(ipflag_is_fill(1 << IPFLAG_FILL));
        assert!(ipflag_is_clear(1 << IPFLAG_CLEAR));
        assert!(ipflag_is_water(1 << IPFLAG_WATER));
        assert!(ipflag_is_clear((1 << IPFLAG_CLEAR) | (1 << IPFLAG_WATER)));
        assert!(ipflag_retrieval_failed(0));
        assert!(!ipflag_retrieval_failed(1 << IPFLAG_CLEAR));
    }

    #[test]
    fn test_level1_fill() {
        assert!(level1_is_fill(1));
        assert!(!level1_is_fill(0));
        assert!(!level1_is_fill(2));
    }

    #[test]
    fn test_latlon_grid() {
        let grid = LatLonGrid {
            ul_lat: 45.0,
            ul_lon: -120.0,
            lat_step: 0.001,
            lon_step: 0.001,
        };
        let (lat, lon) = grid.to_latlon(0.0, 0.0).unwrap();
        assert!((lat.to_degrees() - 45.0).abs() < 1e-9);
        assert!((lon.to_degrees() + 120.0).abs() < 1e-9);

        // A thousand lines south moves one degree
        let (lat, _) = grid.to_latlon(1000.0, 0.0).unwrap();
        assert!((lat.to_degrees() - 44.0).abs() < 1e-9);
    }
}
