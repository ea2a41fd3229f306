//! Cell & binning (spec §2 component 2, §4.1).
//!
//! A cell is an entry in the spatial index: a square tile of space of
//! side `cell_size`, addressed by integer lattice coordinates. Binning
//! assigns particle rows to cells by floor-dividing their coordinates by
//! `cell_size`. The map is always rebuilt, never incrementally patched,
//! across the four points in the lifecycle spec §3 names.

use std::hash::{Hash, Hasher};

use hashbrown::HashMap;

use crate::error::{ManagerError, Result};
use crate::particle_array::ParticleArrayAccess;

/// A large prime used to fold the two lattice coordinates into one hash,
/// per spec §9's suggestion (`x * P + y`).
const CELL_HASH_PRIME: i64 = 2_147_483_647;

/// Discrete lattice coordinate identifying one cell. 2D only: binning
/// pins the z-bin to 0 (spec §9 open question, resolved as 2D-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellId(pub i32, pub i32);

impl Hash for CellId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let folded = self.0 as i64 * CELL_HASH_PRIME + self.1 as i64;
        folded.hash(state);
    }
}

/// Computes the lattice cell containing `(x, y)` at the given cell size.
/// The z-coordinate is accepted (it lives on every particle) but does not
/// participate: this core indexes space in two dimensions only.
pub fn find_cell_id(x: f64, y: f64, cell_size: f64) -> CellId {
    CellId((x / cell_size).floor() as i32, (y / cell_size).floor() as i32)
}

/// An entry in the spatial index.
#[derive(Debug, Clone)]
pub struct Cell {
    pub cid: CellId,
    pub cell_size: f64,
    pub centroid: [f64; 2],
    pub boxmin: [f64; 2],
    pub boxmax: [f64; 2],
    /// Per-array ordered local row indices.
    pub lindices: Vec<Vec<usize>>,
    /// Per-array global ids, parallel to `lindices`.
    pub gindices: Vec<Vec<u32>>,
    pub is_boundary: bool,
    pub nbrprocs: Vec<i32>,
}

impl Cell {
    pub fn new(cid: CellId, cell_size: f64, ghost_layers: i32, narrays: usize) -> Self {
        let cx = (cid.0 as f64 + 0.5) * cell_size;
        let cy = (cid.1 as f64 + 0.5) * cell_size;
        let inflate = (ghost_layers as f64 + 0.5) * cell_size;
        Cell {
            cid,
            cell_size,
            centroid: [cx, cy],
            boxmin: [cx - inflate, cy - inflate],
            boxmax: [cx + inflate, cy + inflate],
            lindices: vec![Vec::new(); narrays],
            gindices: vec![Vec::new(); narrays],
            is_boundary: false,
            nbrprocs: Vec::new(),
        }
    }

    /// Appends one row to array `k`'s index lists.
    pub fn push(&mut self, k: usize, local_id: usize, global_id: u32) {
        self.lindices[k].push(local_id);
        self.gindices[k].push(global_id);
    }

    pub fn boxes_overlap(&self, other_min: [f64; 2], other_max: [f64; 2]) -> bool {
        self.boxmin[0] <= other_max[0]
            && self.boxmax[0] >= other_min[0]
            && self.boxmin[1] <= other_max[1]
            && self.boxmax[1] >= other_min[1]
    }

    /// Cell-content consistency check (spec §8 property 1). Verifies, for
    /// array `k`, that every bound row's coordinates still map to this
    /// cell's id and that the parallel gid list agrees with the array.
    pub fn check_consistency(
        &self,
        k: usize,
        arr: &dyn ParticleArrayAccess,
    ) -> Result<()> {
        let x = arr.get_f64("x")?;
        let y = arr.get_f64("y")?;
        let gid = arr.get_u32("gid")?;
        if self.lindices[k].len() != self.gindices[k].len() {
            return Err(ManagerError::InvariantViolation(format!(
                "cell {:?} array {k}: lindices/gindices length mismatch",
                self.cid
            )));
        }
        for (i, &r) in self.lindices[k].iter().enumerate() {
            let computed = find_cell_id(x[r], y[r], self.cell_size);
            if computed != self.cid {
                return Err(ManagerError::InvariantViolation(format!(
                    "row {r} of array {k} belongs in cell {:?}, found in {:?}",
                    computed, self.cid
                )));
            }
            if self.gindices[k][i] != gid[r] {
                return Err(ManagerError::InvariantViolation(format!(
                    "row {r} of array {k}: gid mismatch in cell {:?}",
                    self.cid
                )));
            }
        }
        Ok(())
    }
}

/// Mapping from `cid` to `Cell`, non-empty cells only. Rebuilt wholesale,
/// never incrementally mutated, at the four points spec §3 names.
pub type CellMap = HashMap<CellId, Cell>;

/// Bins rows `rows` of array `k` into `map`, creating cells on demand.
pub fn bin_rows(
    map: &mut CellMap,
    k: usize,
    narrays: usize,
    rows: &[usize],
    x: &[f64],
    y: &[f64],
    gid: &[u32],
    cell_size: f64,
    ghost_layers: i32,
) {
    for &r in rows {
        let cid = find_cell_id(x[r], y[r], cell_size);
        let cell = map
            .entry(cid)
            .or_insert_with(|| Cell::new(cid, cell_size, ghost_layers, narrays));
        cell.push(k, r, gid[r]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle_array::CArray;

    #[test]
    fn find_cell_id_floors_per_axis() {
        assert_eq!(find_cell_id(0.1, 0.1, 1.0), CellId(0, 0));
        assert_eq!(find_cell_id(1.2, 0.2, 1.0), CellId(1, 0));
        assert_eq!(find_cell_id(0.3, 1.1, 1.0), CellId(0, 1));
        assert_eq!(find_cell_id(-0.1, 0.0, 1.0), CellId(-1, 0));
    }

    #[test]
    fn scenario_a_occupancy() {
        // spec.md §8 Scenario A
        let x = [0.1, 0.4, 1.2, 0.3];
        let y = [0.1, 0.2, 0.2, 1.1];
        let gid = [0u32, 1, 2, 3];
        let mut map = CellMap::default();
        bin_rows(&mut map, 0, 1, &[0, 1, 2, 3], &x, &y, &gid, 1.0, 2);

        assert_eq!(map.len(), 3);
        assert_eq!(map[&CellId(0, 0)].lindices[0], vec![0, 1]);
        assert_eq!(map[&CellId(1, 0)].lindices[0], vec![2]);
        assert_eq!(map[&CellId(0, 1)].lindices[0], vec![3]);
    }

    #[test]
    fn consistency_check_passes_for_freshly_bound_cells() {
        let arr = CArray::new()
            .with_f64("x", vec![0.1, 0.4, 1.2, 0.3])
            .with_f64("y", vec![0.1, 0.2, 0.2, 1.1])
            .with_u32("gid", vec![0, 1, 2, 3]);
        let x = arr.get_f64("x").unwrap().to_vec();
        let y = arr.get_f64("y").unwrap().to_vec();
        let gid = arr.get_u32("gid").unwrap().to_vec();

        let mut map = CellMap::default();
        bin_rows(&mut map, 0, 1, &[0, 1, 2, 3], &x, &y, &gid, 1.0, 2);

        for cell in map.values() {
            cell.check_consistency(0, &arr).unwrap();
        }
    }

    #[test]
    fn consistency_check_fails_on_tampered_gid() {
        let arr = CArray::new()
            .with_f64("x", vec![0.1])
            .with_f64("y", vec![0.1])
            .with_u32("gid", vec![99]);
        let mut map = CellMap::default();
        bin_rows(&mut map, 0, 1, &[0], &[0.1], &[0.1], &[0], 1.0, 2);

        let cid = CellId(0, 0);
        let err = map[&cid].check_consistency(0, &arr).unwrap_err();
        assert!(matches!(err, ManagerError::InvariantViolation(_)));
    }

    #[test]
    fn empty_map_neighbor_lookup_is_empty_and_untouched() {
        // spec.md §8 Scenario E
        let x = [0.1];
        let y = [0.1];
        let gid = [0u32];
        let mut map = CellMap::default();
        bin_rows(&mut map, 0, 1, &[0], &x, &y, &gid, 1.0, 2);
        assert_eq!(map.len(), 1);
        assert!(map.get(&CellId(5, 5)).is_none());
    }
}
