//! Track-to-cell coverage.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerritoryError};
use crate::geo::LatLng;
use crate::grid::{CellId, GridIndexer};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub total_points: usize,
    pub cells: BTreeMap<CellId, CellVisits>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellVisits {
    pub points: usize,
    pub fraction: f64,
}

impl CoverageResult {
    /// Fraction of the track inside `cell`, zero for untouched cells.
    pub fn fraction(&self, cell: CellId) -> f64 {
        self.cells.get(&cell).map_or(0.0, |visits| visits.fraction)
    }

    pub fn touched(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.keys().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryCell {
    pub cell_id: CellId,
    pub coverage: f64,
    pub points: usize,
    pub boundary: Vec<LatLng>,
}

#[derive(Debug, Clone, Copy)]
pub struct CoverageAnalyzer {
    grid: GridIndexer,
}

impl CoverageAnalyzer {
    pub fn new(grid: GridIndexer) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &GridIndexer {
        &self.grid
    }

    pub fn coverage(&self, track: &[LatLng]) -> Result<CoverageResult> {
        if track.is_empty() {
            return Err(TerritoryError::EmptyTrack);
        }
        let mut counts: BTreeMap<CellId, usize> = BTreeMap::new();
        for point in track {
            *counts.entry(self.grid.cell_for(*point)?).or_default() += 1;
        }
        let total = track.len();
        let cells = counts
            .into_iter()
            .map(|(cell, points)| {
                let visits = CellVisits {
                    points,
                    fraction: points as f64 / total as f64,
                };
                (cell, visits)
            })
            .collect();
        Ok(CoverageResult {
            total_points: total,
            cells,
        })
    }

    /// The cell the run contests. Ties on coverage go to the cell with more
    /// points, then to the cell holding the first point, then to the lower id.
    pub fn primary_cell(&self, track: &[LatLng]) -> Result<Option<PrimaryCell>> {
        let Some(first) = track.first() else {
            return Ok(None);
        };
        let coverage = self.coverage(track)?;
        let first_cell = self.grid.cell_for(*first)?;

        let best = coverage.cells.iter().max_by(|(id_a, a), (id_b, b)| {
            a.fraction
                .total_cmp(&b.fraction)
                .then(a.points.cmp(&b.points))
                .then_with(|| match (**id_a == first_cell, **id_b == first_cell) {
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => id_b.cmp(id_a),
                })
        });

        match best {
            Some((cell, visits)) => Ok(Some(PrimaryCell {
                cell_id: *cell,
                coverage: visits.fraction,
                points: visits.points,
                boundary: self.grid.cell_boundary(*cell)?,
            })),
            None => Ok(None),
        }
    }
}
