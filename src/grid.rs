//! Hexagonal world grid.
//!
//! Coordinates are projected with the sinusoidal equal-area projection and
//! bucketed into a pointy-top axial hex lattice. The hex size at each level
//! shrinks by a factor of sqrt(7), so level 8 cells are roughly 230 m across
//! their circumradius.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::GridConfig;
use crate::error::{Result, TerritoryError};
use crate::geo::{LatLng, EARTH_RADIUS_METERS};

pub const MAX_LEVEL: u8 = 15;
const BASE_EDGE_METERS: f64 = 1_107_712.591;
const AXIS_BITS: u32 = 30;
const AXIS_MASK: u64 = (1 << AXIS_BITS) - 1;
const SQRT_3: f64 = 1.732_050_807_568_877_2;

const DIRECTIONS: [(i64, i64); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellId(u64);

impl CellId {
    fn pack(level: u8, q: i64, r: i64) -> Self {
        let level_bits = (level as u64) << (2 * AXIS_BITS);
        let q_bits = ((q as u64) & AXIS_MASK) << AXIS_BITS;
        let r_bits = (r as u64) & AXIS_MASK;
        CellId(level_bits | q_bits | r_bits)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn level(self) -> u8 {
        (self.0 >> (2 * AXIS_BITS)) as u8
    }

    fn axial(self) -> (i64, i64) {
        let shift = 64 - AXIS_BITS;
        let q = (((self.0 >> AXIS_BITS) & AXIS_MASK) << shift) as i64 >> shift;
        let r = ((self.0 & AXIS_MASK) << shift) as i64 >> shift;
        (q, r)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for CellId {
    type Err = TerritoryError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 {
            return Err(TerritoryError::InvalidCellId(s.to_string()));
        }
        let raw =
            u64::from_str_radix(s, 16).map_err(|_| TerritoryError::InvalidCellId(s.to_string()))?;
        if raw >> (2 * AXIS_BITS) > MAX_LEVEL as u64 {
            return Err(TerritoryError::InvalidCellId(s.to_string()));
        }
        Ok(CellId(raw))
    }
}

impl TryFrom<String> for CellId {
    type Error = TerritoryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CellId> for String {
    fn from(value: CellId) -> Self {
        value.to_string()
    }
}

/// Edge length (and circumradius) of a cell at `level`, in metres.
pub fn edge_length_meters(level: u8) -> f64 {
    BASE_EDGE_METERS / 7f64.sqrt().powi(level as i32)
}

/// Picks the level whose approximate cell radius (half the edge length) is
/// closest to the target. Larger targets give coarser levels.
pub fn resolution_for_radius(target_radius_meters: f64) -> u8 {
    (0..=MAX_LEVEL)
        .min_by(|a, b| {
            let da = (edge_length_meters(*a) / 2.0 - target_radius_meters).abs();
            let db = (edge_length_meters(*b) / 2.0 - target_radius_meters).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(8)
}

#[derive(Debug, Clone, Copy)]
pub struct GridIndexer {
    level: u8,
    size: f64,
}

impl GridIndexer {
    pub fn new(level: u8) -> Result<Self> {
        if level > MAX_LEVEL {
            return Err(TerritoryError::InvalidCellId(format!(
                "resolution level {level} above {MAX_LEVEL}"
            )));
        }
        Ok(Self {
            level,
            size: edge_length_meters(level),
        })
    }

    pub fn from_config(config: &GridConfig) -> Result<Self> {
        let level = config
            .resolution
            .unwrap_or_else(|| resolution_for_radius(config.target_cell_radius_meters));
        Self::new(level)
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn edge_length_meters(&self) -> f64 {
        self.size
    }

    pub fn cell_id(&self, lat: f64, lng: f64) -> Result<CellId> {
        let point = LatLng::new(lat, lng).validated()?;
        let (x, y) = project(point);
        let fq = (SQRT_3 / 3.0 * x - y / 3.0) / self.size;
        let fr = (2.0 / 3.0 * y) / self.size;
        let (q, r) = axial_round(fq, fr);
        Ok(CellId::pack(self.level, q, r))
    }

    pub fn cell_for(&self, point: LatLng) -> Result<CellId> {
        self.cell_id(point.lat, point.lng)
    }

    pub fn cell_center(&self, cell: CellId) -> Result<LatLng> {
        let (x, y) = self.center_xy(cell)?;
        Ok(clamp(unproject(x, y)))
    }

    pub fn cell_boundary(&self, cell: CellId) -> Result<Vec<LatLng>> {
        let (cx, cy) = self.center_xy(cell)?;
        let boundary = (0..6)
            .map(|corner| {
                let angle = (60.0 * corner as f64 - 30.0).to_radians();
                let x = cx + self.size * angle.cos();
                let y = cy + self.size * angle.sin();
                clamp(unproject(x, y))
            })
            .collect();
        Ok(boundary)
    }

    pub fn neighbors(&self, cell: CellId) -> Result<BTreeSet<CellId>> {
        self.check_level(cell)?;
        let (q, r) = cell.axial();
        let neighbors = DIRECTIONS
            .iter()
            .map(|(dq, dr)| CellId::pack(self.level, q + dq, r + dr))
            .filter(|candidate| {
                self.center_xy(*candidate)
                    .map(|(x, y)| unproject(x, y).is_valid())
                    .unwrap_or(false)
            })
            .collect();
        Ok(neighbors)
    }

    pub fn are_adjacent(&self, a: CellId, b: CellId) -> Result<bool> {
        Ok(self.neighbors(a)?.contains(&b))
    }

    /// Number of cell steps between two cells of this grid.
    pub fn grid_distance(&self, a: CellId, b: CellId) -> Result<u64> {
        self.check_level(a)?;
        self.check_level(b)?;
        let (aq, ar) = a.axial();
        let (bq, br) = b.axial();
        let dq = aq - bq;
        let dr = ar - br;
        Ok((dq.unsigned_abs() + dr.unsigned_abs() + (dq + dr).unsigned_abs()) / 2)
    }

    fn check_level(&self, cell: CellId) -> Result<()> {
        if cell.level() == self.level {
            Ok(())
        } else {
            Err(TerritoryError::InvalidCellId(cell.to_string()))
        }
    }

    fn center_xy(&self, cell: CellId) -> Result<(f64, f64)> {
        self.check_level(cell)?;
        let (q, r) = cell.axial();
        let x = self.size * SQRT_3 * (q as f64 + r as f64 / 2.0);
        let y = self.size * 1.5 * r as f64;
        Ok((x, y))
    }
}

fn project(point: LatLng) -> (f64, f64) {
    let phi = point.lat.to_radians();
    let lambda = point.lng.to_radians();
    (
        EARTH_RADIUS_METERS * lambda * phi.cos(),
        EARTH_RADIUS_METERS * phi,
    )
}

fn unproject(x: f64, y: f64) -> LatLng {
    let phi = y / EARTH_RADIUS_METERS;
    let cos_phi = phi.cos();
    // at or past a pole the longitude is meaningless; the latitude already
    // marks points beyond it as invalid
    let lambda = if cos_phi < 1e-12 {
        0.0
    } else {
        x / (EARTH_RADIUS_METERS * cos_phi)
    };
    LatLng::new(phi.to_degrees(), lambda.to_degrees())
}

fn clamp(point: LatLng) -> LatLng {
    LatLng::new(point.lat.clamp(-90.0, 90.0), point.lng.clamp(-180.0, 180.0))
}

fn axial_round(fq: f64, fr: f64) -> (i64, i64) {
    let fs = -fq - fr;
    let mut q = fq.round();
    let mut r = fr.round();
    let s = fs.round();

    let dq = (q - fq).abs();
    let dr = (r - fr).abs();
    let ds = (s - fs).abs();

    if dq > dr && dq > ds {
        q = -r - s;
    } else if dr > ds {
        r = -q - s;
    }
    (q as i64, r as i64)
}
