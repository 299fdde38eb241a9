use crate::types::{SrError, SrResult};
use ndarray::{Array2, Array3, Array4};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Number of surface pressure levels in the lookup tables
pub const NPRES_VALS: usize = 7;
/// Number of aerosol optical thickness samples in the lookup tables
pub const NAOT_VALS: usize = 22;
/// Number of sun angle entries in the coarse sun angle table
pub const NSUNANGLE_VALS: usize = 22;
/// Number of band rows carried by the analytic constant tables
/// (reflective bands 1-7 plus the pan slot)
pub const NLUT_BANDS: usize = 8;

/// AOT sample grid at 550 nm, strictly increasing
pub const AOT550_GRID: [f32; NAOT_VALS] = [
    0.01, 0.05, 0.10, 0.15, 0.20, 0.30, 0.40, 0.60, 0.80, 1.00, 1.20, 1.40, 1.60, 1.80, 2.00,
    2.30, 2.60, 3.00, 3.50, 4.00, 4.50, 5.00,
];

/// Surface pressure grid (hPa), strictly decreasing
pub const PRES_GRID: [f32; NPRES_VALS] = [1050.0, 1013.0, 900.0, 800.0, 700.0, 600.0, 500.0];

/// Molecular (Rayleigh) optical thickness per band, produced by 6S
pub const TAURAY: [f32; NLUT_BANDS] = [
    0.23638, 0.16933, 0.09070, 0.04827, 0.01563, 0.00129, 0.00037, 0.07984,
];

/// Ozone transmission coefficient per band
pub const OZTRANSA: [f64; NLUT_BANDS] = [
    -0.00255649,
    -0.0177861,
    -0.0969872,
    -0.0611428,
    0.0001,
    0.0001,
    0.0001,
    -0.0834061,
];

/// Water vapor transmission coefficients per band
pub const WVTRANSA: [f64; NLUT_BANDS] = [
    2.29849e-27, 2.29849e-27, 0.00194772, 0.00404159, 0.000729136, 0.00067324, 0.0177533,
    0.00279738,
];
pub const WVTRANSB: [f64; NLUT_BANDS] = [
    0.999742, 0.999742, 0.775024, 0.774482, 0.893085, 0.939669, 0.65094, 0.759952,
];

/// Other-gas transmission coefficients per band
pub const OGTRANSA1: [f64; NLUT_BANDS] = [
    4.91586e-20, 4.91586e-20, 4.91586e-20, 1.04801e-05, 1.35216e-05, 0.0205425, 0.0256526,
    0.000214329,
];
pub const OGTRANSB0: [f64; NLUT_BANDS] = [
    0.000197019, 0.000197019, 0.000197019, 0.640215, -0.195998, 0.326577, 0.243961, 0.396322,
];
pub const OGTRANSB1: [f64; NLUT_BANDS] = [
    9.57011e-16, 9.57011e-16, 9.57011e-16, -0.348785, 0.275239, 0.0117192, 0.0616101, 0.04728,
];

/// Atmospheric lookup tables precomputed by a 6S-style radiative transfer
/// model, plus the scattering-geometry tables used to resolve the solar
/// dimension of the intrinsic reflectance table.
///
/// All tables are immutable after loading and are shared read-only across
/// worker threads.
#[derive(Debug, Clone)]
pub struct AtmosLut {
    /// Intrinsic atmospheric reflectance [band][pressure][aot][solar]
    pub rolutt: Array4<f32>,
    /// Total atmospheric transmission [band][pressure][aot][sun angle]
    pub transt: Array4<f32>,
    /// Atmosphere spherical albedo [band][pressure][aot]
    pub sphalbt: Array3<f32>,
    /// Aerosol extinction normalized at 550 nm [band][pressure][aot]
    pub normext: Array3<f32>,
    /// Maximum scattering angle [view zenith][solar zenith]
    pub tsmax: Array2<f32>,
    /// Minimum scattering angle [view zenith][solar zenith]
    pub tsmin: Array2<f32>,
    /// View angle table [view zenith][solar zenith]
    pub ttv: Array2<f32>,
    /// Azimuth sample count per geometry cell [view zenith][solar zenith]
    pub nbfi: Array2<f32>,
    /// Cumulative azimuth sample count [view zenith][solar zenith]
    pub nbfic: Array2<f32>,
    /// Sun angle table (degrees)
    pub tts: Vec<f32>,
    /// Start index of each sun angle block within the solar dimension
    pub indts: Vec<i32>,
    /// Solar zenith grid origin and step (degrees)
    pub xtsmin: f32,
    pub xtsstep: f32,
    /// View zenith grid origin and step (degrees)
    pub xtvmin: f32,
    pub xtvstep: f32,
}

impl AtmosLut {
    /// Assemble the lookup table store from preloaded arrays, validating
    /// the dimensions against each other and the fixed AOT/pressure grids.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        rolutt: Array4<f32>,
        transt: Array4<f32>,
        sphalbt: Array3<f32>,
        normext: Array3<f32>,
        tsmax: Array2<f32>,
        tsmin: Array2<f32>,
        ttv: Array2<f32>,
        nbfi: Array2<f32>,
        nbfic: Array2<f32>,
        tts: Vec<f32>,
        indts: Vec<i32>,
        xtsmin: f32,
        xtsstep: f32,
        xtvmin: f32,
        xtvstep: f32,
    ) -> SrResult<Self> {
        let (nb, npres, naot, nsol) = rolutt.dim();
        if npres != NPRES_VALS || naot != NAOT_VALS {
            return Err(SrError::Lut(format!(
                "intrinsic reflectance table is {nb}x{npres}x{naot}x{nsol}, expected \
                 {NPRES_VALS} pressure levels and {NAOT_VALS} AOT samples"
            )));
        }
        if transt.dim().0 != nb || transt.dim().1 != npres || transt.dim().2 != naot {
            return Err(SrError::Lut(
                "transmission table does not match the reflectance table layout".to_string(),
            ));
        }
        if sphalbt.dim() != (nb, npres, naot) || normext.dim() != (nb, npres, naot) {
            return Err(SrError::Lut(
                "spherical albedo / extinction tables do not match the reflectance table layout"
                    .to_string(),
            ));
        }
        let geom_dim = tsmax.dim();
        for (name, arr) in [
            ("tsmin", &tsmin),
            ("ttv", &ttv),
            ("nbfi", &nbfi),
            ("nbfic", &nbfic),
        ] {
            if arr.dim() != geom_dim {
                return Err(SrError::Lut(format!(
                    "geometry table {name} is {:?}, expected {:?}",
                    arr.dim(),
                    geom_dim
                )));
            }
        }
        if tts.len() != indts.len() || tts.is_empty() {
            return Err(SrError::Lut(
                "sun angle table and its index table must have the same nonzero length"
                    .to_string(),
            ));
        }
        if xtsstep <= 0.0 || xtvstep <= 0.0 {
            return Err(SrError::Lut("angle grid steps must be positive".to_string()));
        }
        debug_assert!(AOT550_GRID.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(PRES_GRID.windows(2).all(|w| w[0] > w[1]));

        Ok(Self {
            rolutt,
            transt,
            sphalbt,
            normext,
            tsmax,
            tsmin,
            ttv,
            nbfi,
            nbfic,
            tts,
            indts,
            xtsmin,
            xtsstep,
            xtvmin,
            xtvstep,
        })
    }

    /// Number of band rows in the tables.
    pub fn nbands(&self) -> usize {
        self.rolutt.dim().0
    }

    /// Bracketing pressure index and interpolation fraction for a surface
    /// pressure in hPa.  Out-of-grid values clamp to the nearest endpoint.
    pub fn pressure_bracket(pres: f32) -> (usize, f32) {
        if pres >= PRES_GRID[0] {
            return (0, 0.0);
        }
        if pres <= PRES_GRID[NPRES_VALS - 1] {
            return (NPRES_VALS - 2, 1.0);
        }
        // grid is decreasing
        let mut ip = 0;
        while ip < NPRES_VALS - 2 && pres < PRES_GRID[ip + 1] {
            ip += 1;
        }
        let frac = (PRES_GRID[ip] - pres) / (PRES_GRID[ip] - PRES_GRID[ip + 1]);
        (ip, frac)
    }

    /// Bracketing AOT index and interpolation fraction for an AOT at
    /// 550 nm.  Out-of-grid values clamp to the nearest endpoint.
    pub fn aot_bracket(aot: f32) -> (usize, f32) {
        if aot <= AOT550_GRID[0] {
            return (0, 0.0);
        }
        if aot >= AOT550_GRID[NAOT_VALS - 1] {
            return (NAOT_VALS - 2, 1.0);
        }
        let mut ia = 0;
        while ia < NAOT_VALS - 2 && aot >= AOT550_GRID[ia + 1] {
            ia += 1;
        }
        let frac = (aot - AOT550_GRID[ia]) / (AOT550_GRID[ia + 1] - AOT550_GRID[ia]);
        (ia, frac)
    }
}

/// File set for the ASCII form of the lookup tables, one whitespace
/// separated value stream per table.
#[derive(Debug, Clone)]
pub struct LutFiles<'a> {
    pub intrinsic_refl: &'a Path,
    pub transmission: &'a Path,
    pub spherical_albedo: &'a Path,
    pub extinction: &'a Path,
    pub geometry: &'a Path,
}

/// Dimensions of the solar axes, which vary with the table generation run.
#[derive(Debug, Clone, Copy)]
pub struct LutDims {
    pub nbands: usize,
    pub nsolar: usize,
    pub nview_zen: usize,
    pub nsolar_zen: usize,
}

impl AtmosLut {
    /// Load the tables from their ASCII exports.  The geometry file
    /// concatenates tsmax, tsmin, ttv, nbfi, nbfic, tts, and indts in
    /// that order.
    pub fn from_ascii_files(files: &LutFiles, dims: LutDims) -> SrResult<Self> {
        log::info!(
            "Loading atmospheric lookup tables ({} bands, {} solar samples)",
            dims.nbands,
            dims.nsolar
        );

        let rolutt = read_values(files.intrinsic_refl)?;
        let rolutt = Array4::from_shape_vec(
            (dims.nbands, NPRES_VALS, NAOT_VALS, dims.nsolar),
            rolutt,
        )
        .map_err(|e| SrError::Lut(format!("intrinsic reflectance table: {e}")))?;

        let transt = read_values(files.transmission)?;
        let transt = Array4::from_shape_vec(
            (dims.nbands, NPRES_VALS, NAOT_VALS, NSUNANGLE_VALS),
            transt,
        )
        .map_err(|e| SrError::Lut(format!("transmission table: {e}")))?;

        let sphalbt = read_values(files.spherical_albedo)?;
        let sphalbt = Array3::from_shape_vec((dims.nbands, NPRES_VALS, NAOT_VALS), sphalbt)
            .map_err(|e| SrError::Lut(format!("spherical albedo table: {e}")))?;

        let normext = read_values(files.extinction)?;
        let normext = Array3::from_shape_vec((dims.nbands, NPRES_VALS, NAOT_VALS), normext)
            .map_err(|e| SrError::Lut(format!("extinction table: {e}")))?;

        let geom = read_values(files.geometry)?;
        let cell = dims.nview_zen * dims.nsolar_zen;
        let expected = 5 * cell + 2 * NSUNANGLE_VALS;
        if geom.len() != expected {
            return Err(SrError::Lut(format!(
                "geometry file holds {} values, expected {expected}",
                geom.len()
            )));
        }
        let shape = (dims.nview_zen, dims.nsolar_zen);
        let slice2 = |k: usize| {
            Array2::from_shape_vec(shape, geom[k * cell..(k + 1) * cell].to_vec())
                .map_err(|e| SrError::Lut(format!("geometry table: {e}")))
        };
        let tsmax = slice2(0)?;
        let tsmin = slice2(1)?;
        let ttv = slice2(2)?;
        let nbfi = slice2(3)?;
        let nbfic = slice2(4)?;
        let tts = geom[5 * cell..5 * cell + NSUNANGLE_VALS].to_vec();
        let indts = geom[5 * cell + NSUNANGLE_VALS..]
            .iter()
            .map(|&v| v as i32)
            .collect();

        Self::from_parts(
            rolutt, transt, sphalbt, normext, tsmax, tsmin, ttv, nbfi, nbfic, tts, indts, 0.0,
            4.0, 0.0, 4.0,
        )
    }
}

/// Read every whitespace-separated float from a file.
fn read_values(path: &Path) -> SrResult<Vec<f32>> {
    let file = File::open(path)
        .map_err(|e| SrError::Lut(format!("cannot open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    let mut values = Vec::new();
    for line in reader.lines() {
        let line = line?;
        for token in line.split_whitespace() {
            let value = token
                .parse::<f32>()
                .map_err(|e| SrError::Lut(format!("bad value {token:?} in {}: {e}", path.display())))?;
            values.push(value);
        }
    }
    Ok(values)
}
