//! Parallel manager (spec §2 component 4, §4.2) — the coordinator.
//!
//! Binds several particle arrays, maintains the cell map, drives the
//! global-bound reduction, computes cell size, requests a partition from
//! the geometric partitioner, constructs particle-level export lists
//! from cell-level export lists, triggers exchanges in sequence, rebinds,
//! and answers neighbor queries.

use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::{Communicator, SystemCommunicator};
use mpi::traits::*;
use rayon::prelude::*;

use crate::cell::{bin_rows, find_cell_id, CellId, CellMap};
use crate::config::ManagerConfig;
use crate::error::{ManagerError, Result};
use crate::exchange::ParticleArrayExchange;
use crate::particle_array::{ParticleArrayAccess, Tag};
use crate::partitioner::{allgather_prefix_offsets, ExportLists, Partitioner, RcbPartitioner, StubPartitioner};

/// Six-scalar global bounding box plus the global maximum smoothing
/// length, maintained as process-local aggregates and reduced globally
/// (spec §3 "Global bounds").
#[derive(Debug, Clone, Copy)]
struct GlobalBounds {
    mx: f64,
    my: f64,
    mz: f64,
    bx: f64,
    by: f64,
    bz: f64,
    mh: f64,
}

/// Local (min, max) over one property's column, as the per-rank
/// aggregate `compute_global_bounds` feeds into its `Allreduce`s. Mirrors
/// the teacher's `Balancer::work_local` shape (`par_iter().map(..)`
/// followed by a fold) rather than a plain sequential scan.
fn par_min_max(values: &[f64]) -> (f64, f64) {
    values
        .par_iter()
        .fold(
            || (f64::INFINITY, f64::NEG_INFINITY),
            |(lo, hi), &v| (lo.min(v), hi.max(v)),
        )
        .reduce(
            || (f64::INFINITY, f64::NEG_INFINITY),
            |(lo1, hi1), (lo2, hi2)| (lo1.min(lo2), hi1.max(hi2)),
        )
}

pub struct ParallelManager {
    // Owns MPI's teardown (`MPI_Finalize` on drop); only held to keep it
    // alive, never touched again after construction.
    #[allow(unused)]
    universe: Option<Universe>,
    world: SystemCommunicator,
    pub rank: i32,
    pub size: i32,
    in_parallel: bool,

    config: ManagerConfig,
    arrays: Vec<Box<dyn ParticleArrayAccess>>,
    cell_map: CellMap,
    cell_size: f64,
    partitioner: Box<dyn Partitioner>,
    exchange: ParticleArrayExchange,
}

impl ParallelManager {
    /// Initializes MPI and constructs a manager bound to `world`, the
    /// default communicator.
    pub fn new(config: ManagerConfig, arrays: Vec<Box<dyn ParticleArrayAccess>>) -> Result<Self> {
        config.validate()?;

        let universe = mpi::initialize()
            .ok_or_else(|| ManagerError::Transport("MPI already initialized in this process".into()))?;
        let world = universe.world();
        let rank = world.rank();
        let size = world.size();

        if rank == 0 {
            tracing::info!(nodes = size, ghost_layers = config.ghost_layers, radius_scale = config.radius_scale, "parallel manager activated");
        }

        Self::build(Some(universe), world, rank, size, config, arrays)
    }

    fn build(
        universe: Option<Universe>,
        world: SystemCommunicator,
        rank: i32,
        size: i32,
        config: ManagerConfig,
        arrays: Vec<Box<dyn ParticleArrayAccess>>,
    ) -> Result<Self> {
        let in_parallel = size > 1;
        let partitioner: Box<dyn Partitioner> = if in_parallel && config.lb_method == "rcb" {
            Box::new(RcbPartitioner::new(world))
        } else {
            Box::new(StubPartitioner::new(rank))
        };
        let exchange = ParticleArrayExchange::new(world, config.lb_props.clone());

        Ok(ParallelManager {
            universe,
            world,
            rank,
            size,
            in_parallel,
            config,
            arrays,
            cell_map: CellMap::default(),
            cell_size: 1.0,
            partitioner,
            exchange,
        })
    }

    pub fn narrays(&self) -> usize {
        self.arrays.len()
    }

    pub fn in_parallel(&self) -> bool {
        self.in_parallel
    }

    pub fn array(&self, k: usize) -> &dyn ParticleArrayAccess {
        self.arrays[k].as_ref()
    }

    pub fn array_mut(&mut self, k: usize) -> &mut dyn ParticleArrayAccess {
        self.arrays[k].as_mut()
    }

    pub fn cell_map(&self) -> &CellMap {
        &self.cell_map
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Drives one full cycle (spec §4.2). `initial` is accepted for
    /// parity with the documented contract but does not change the
    /// control flow: every phase below is idempotent on a fresh manager,
    /// so the first call behaves identically whether or not halo rows or
    /// prior gids exist yet.
    pub fn update(&mut self, initial: bool) -> Result<()> {
        let span = tracing::info_span!("update", rank = self.rank, initial);
        let _enter = span.enter();

        self.drop_halo()?;
        self.renumber_particle_gids()?;
        self.rebuild_local_bins()?;

        let (cell_ids, cell_gids) = self.numerate_cells()?;

        // `StubPartitioner` turns steps 5a-5e into no-ops when
        // `in_parallel` is false, so this single code path runs
        // unconditionally regardless of rank count (see DESIGN.md).
        self.partition_and_migrate(&cell_ids, &cell_gids)?;
        self.exchange_halo()?;

        self.compact_all()?;
        Ok(())
    }

    fn drop_halo(&mut self) -> Result<()> {
        for arr in self.arrays.iter_mut() {
            let tag = arr.get_i32("tag")?;
            let drop_rows: Vec<usize> = tag
                .iter()
                .enumerate()
                .filter(|(_, &t)| Tag::from_i32(t) != Tag::Local)
                .map(|(i, _)| i)
                .collect();
            if !drop_rows.is_empty() {
                arr.remove_particles(&drop_rows)?;
            }
        }
        Ok(())
    }

    fn renumber_particle_gids(&mut self) -> Result<()> {
        for arr in self.arrays.iter_mut() {
            let local_count = arr.length();
            let (offsets, _total) = allgather_prefix_offsets(&self.world, local_count)?;
            let my_offset = offsets[self.rank as usize] as u32;
            let gid = arr.get_u32_mut("gid")?;
            for (i, g) in gid.iter_mut().enumerate() {
                *g = my_offset + i as u32;
            }
        }
        Ok(())
    }

    fn compute_global_bounds(&self) -> Result<GlobalBounds> {
        let (mut mx, mut my, mut mz) = (f64::INFINITY, f64::INFINITY, f64::INFINITY);
        let (mut bx, mut by, mut bz) = (f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        let mut mh = f64::NEG_INFINITY;

        for arr in &self.arrays {
            if arr.length() == 0 {
                continue;
            }
            let (lmx, lbx) = par_min_max(arr.get_f64("x")?);
            mx = mx.min(lmx);
            bx = bx.max(lbx);
            let (lmy, lby) = par_min_max(arr.get_f64("y")?);
            my = my.min(lmy);
            by = by.max(lby);
            let (lmz, lbz) = par_min_max(arr.get_f64("z")?);
            mz = mz.min(lmz);
            bz = bz.max(lbz);
            let (_, lmh) = par_min_max(arr.get_f64("h")?);
            mh = mh.max(lmh);
        }

        let reduce_min = |local: f64| -> f64 {
            let mut global = 0.0;
            self.world.all_reduce_into(&local, &mut global, SystemOperation::min());
            global
        };
        let reduce_max = |local: f64| -> f64 {
            let mut global = 0.0;
            self.world.all_reduce_into(&local, &mut global, SystemOperation::max());
            global
        };

        Ok(GlobalBounds {
            mx: reduce_min(mx),
            my: reduce_min(my),
            mz: reduce_min(mz),
            bx: reduce_max(bx),
            by: reduce_max(by),
            bz: reduce_max(bz),
            mh: reduce_max(mh),
        })
    }

    fn rebuild_local_bins(&mut self) -> Result<()> {
        let bounds = self.compute_global_bounds()?;
        let raw = self.config.radius_scale * bounds.mh;
        self.cell_size = if raw < 1.0 {
            tracing::warn!(mh = bounds.mh, raw_cell_size = raw, "degenerate cell size, clamping to 1.0");
            1.0
        } else {
            raw
        };

        self.cell_map.clear();
        let narrays = self.arrays.len();
        for k in 0..narrays {
            let len = self.arrays[k].length();
            let rows: Vec<usize> = (0..len).collect();
            let x = self.arrays[k].get_f64("x")?.to_vec();
            let y = self.arrays[k].get_f64("y")?.to_vec();
            let gid = self.arrays[k].get_u32("gid")?.to_vec();
            bin_rows(&mut self.cell_map, k, narrays, &rows, &x, &y, &gid, self.cell_size, self.config.ghost_layers);
        }
        Ok(())
    }

    /// Assigns unique global ids to cells using the same prefix-sum
    /// scheme as particle gids (spec §4.2 step 4). Returns the cells in a
    /// fixed, sorted order together with their freshly assigned gids, for
    /// use as the partitioner's object list.
    fn numerate_cells(&mut self) -> Result<(Vec<CellId>, Vec<u32>)> {
        let mut cell_ids: Vec<CellId> = self.cell_map.keys().copied().collect();
        cell_ids.sort_by_key(|c| (c.0, c.1));
        let mut gids = vec![0u32; cell_ids.len()];
        self.partitioner.update_global_ids(cell_ids.len(), &mut gids)?;
        Ok((cell_ids, gids))
    }

    fn partition_and_migrate(&mut self, cell_ids: &[CellId], cell_gids: &[u32]) -> Result<()> {
        let centroids: Vec<[f64; 2]> = cell_ids
            .iter()
            .map(|cid| self.cell_map[cid].centroid)
            .collect();

        let (cell_export, _cell_import) = self.partitioner.balance(&centroids, cell_gids)?;

        let narrays = self.arrays.len();
        for k in 0..narrays {
            let mut particle_export = ExportLists::default();
            for (i, &cell_local_id) in cell_export.local_ids.iter().enumerate() {
                let cid = cell_ids[cell_local_id];
                let dest = cell_export.dest_procs[i];
                let cell = &self.cell_map[&cid];
                for (&row, &gid) in cell.lindices[k].iter().zip(cell.gindices[k].iter()) {
                    particle_export.local_ids.push(row);
                    particle_export.global_ids.push(gid);
                    particle_export.dest_procs.push(dest);
                }
            }
            let particle_import = self.partitioner.invert_lists(&particle_export)?;
            self.exchange
                .lb_exchange_data(self.arrays[k].as_mut(), &particle_export, &particle_import)?;
        }

        self.rebuild_local_bins()
    }

    fn exchange_halo(&mut self) -> Result<()> {
        let mut nbrprocs: Vec<(CellId, Vec<i32>)> = Vec::new();
        for (&cid, cell) in self.cell_map.iter() {
            let hits = self.partitioner.box_assign(cell.boxmin, cell.boxmax)?;
            let others: Vec<i32> = hits.into_iter().filter(|&r| r != self.rank).collect();
            nbrprocs.push((cid, others));
        }
        for (cid, others) in &nbrprocs {
            if let Some(cell) = self.cell_map.get_mut(cid) {
                cell.is_boundary = !others.is_empty();
                cell.nbrprocs = others.clone();
            }
        }

        let narrays = self.arrays.len();
        for k in 0..narrays {
            let mut halo_export = ExportLists::default();
            for (cid, others) in &nbrprocs {
                if others.is_empty() {
                    continue;
                }
                let cell = &self.cell_map[cid];
                for &dest in others {
                    for (&row, &gid) in cell.lindices[k].iter().zip(cell.gindices[k].iter()) {
                        halo_export.local_ids.push(row);
                        halo_export.global_ids.push(gid);
                        halo_export.dest_procs.push(dest);
                    }
                }
            }
            let halo_import = self.partitioner.invert_lists(&halo_export)?;
            let imported_range = self
                .exchange
                .remote_exchange_data(self.arrays[k].as_mut(), &halo_export, &halo_import)?;

            // Bind the newly arrived Remote rows into the cell map,
            // appended rather than replacing the Local bindings already
            // there (spec §4.2 step 5e).
            let x = self.arrays[k].get_f64("x")?.to_vec();
            let y = self.arrays[k].get_f64("y")?.to_vec();
            let gid = self.arrays[k].get_u32("gid")?.to_vec();
            let rows: Vec<usize> = imported_range.collect();
            bin_rows(&mut self.cell_map, k, narrays, &rows, &x, &y, &gid, self.cell_size, self.config.ghost_layers);
        }
        Ok(())
    }

    /// Compacts every particle array (Local before Remote before Ghost)
    /// and remaps the cell map's row indices to match, since row indices
    /// are not stable across compaction (spec §3).
    fn compact_all(&mut self) -> Result<()> {
        let narrays = self.arrays.len();
        for k in 0..narrays {
            let len = self.arrays[k].length();
            let order = self.arrays[k].align_particles()?;
            if order.len() != len {
                return Err(ManagerError::InvariantViolation(
                    "align_particles returned a permutation of the wrong length".into(),
                ));
            }
            let mut old_to_new = vec![0usize; len];
            for (new_pos, &old_pos) in order.iter().enumerate() {
                old_to_new[old_pos] = new_pos;
            }
            for cell in self.cell_map.values_mut() {
                for row in cell.lindices[k].iter_mut() {
                    *row = old_to_new[*row];
                }
            }
        }
        Ok(())
    }

    /// Neighbor query (spec §4.6). Valid only between the end of the halo
    /// bind (step 5e) and the next `update()` call.
    pub fn get_nearest_particles(
        &self,
        src_k: usize,
        dst_k: usize,
        i: usize,
        out: &mut Vec<usize>,
    ) -> Result<()> {
        let dst_x = self.arrays[dst_k].get_f64("x")?;
        let dst_y = self.arrays[dst_k].get_f64("y")?;
        let dst_h = self.arrays[dst_k].get_f64("h")?;
        let src_x = self.arrays[src_k].get_f64("x")?;
        let src_y = self.arrays[src_k].get_f64("y")?;
        let src_h = self.arrays[src_k].get_f64("h")?;

        let xi = dst_x[i];
        let yi = dst_y[i];
        let hi = self.config.radius_scale * dst_h[i];
        let center = find_cell_id(xi, yi, self.cell_size);

        for dx in -1..=1i32 {
            for dy in -1..=1i32 {
                let cid = CellId(center.0 + dx, center.1 + dy);
                let cell = match self.cell_map.get(&cid) {
                    Some(c) => c,
                    None => continue,
                };
                for &j in &cell.lindices[src_k] {
                    let xj = src_x[j];
                    let yj = src_y[j];
                    let hj = self.config.radius_scale * src_h[j];
                    let d = ((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt();
                    if d < hi || d < hj {
                        if out.len() == out.capacity() {
                            out.reserve(50);
                        }
                        out.push(j);
                    }
                }
            }
        }
        Ok(())
    }
}
