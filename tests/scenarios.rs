//! Single-rank end-to-end scenarios from spec.md §8. `cargo test` runs
//! this file as its own process with no `mpirun`, so MPI's world is
//! exactly one rank — precisely the single-rank scenarios A and B. The
//! literal Scenario E (empty-cell lookup against an untouched map) is
//! exercised at the cell-map level in `cell.rs`'s own tests; here we
//! extend the same idea through the manager with a second `update()`,
//! checking that a far-away neighborhood stays otherwise unoccupied.
//! Only one test function touches `ParallelManager::new` (which calls
//! `mpi::initialize()`, succeeding exactly once per process) so the
//! whole walk is kept in one test to avoid a second, failing init.

use parmanager::{CArray, CellId, ManagerConfig, ParallelManager};

fn four_particle_array() -> CArray {
    let n = 4;
    CArray::new()
        .with_f64("x", vec![0.1, 0.4, 1.2, 0.3])
        .with_f64("y", vec![0.1, 0.2, 0.2, 1.1])
        .with_f64("z", vec![0.0; n])
        .with_f64("u", vec![0.0; n])
        .with_f64("v", vec![0.0; n])
        .with_f64("w", vec![0.0; n])
        .with_f64("au", vec![0.0; n])
        .with_f64("av", vec![0.0; n])
        .with_f64("aw", vec![0.0; n])
        .with_f64("rho", vec![1000.0; n])
        .with_f64("arho", vec![0.0; n])
        .with_f64("h", vec![0.5; n])
        .with_f64("m", vec![1.0; n])
        .with_i32("tag", vec![0; n])
        .with_u32("gid", vec![0; n])
}

#[test]
fn scenarios_a_b_e_single_rank() {
    let config = ManagerConfig::default();
    assert_eq!(config.radius_scale, 2.0);
    assert_eq!(config.ghost_layers, 2);

    let mut manager =
        ParallelManager::new(config, vec![Box::new(four_particle_array())]).expect("manager construction");
    assert_eq!(manager.size, 1);
    assert!(!manager.in_parallel());

    manager.update(true).expect("update");

    // Scenario A: cell_size = radius_scale * max(h) = 2.0 * 0.5 = 1.0,
    // four particles land in three cells.
    assert_eq!(manager.cell_size(), 1.0);
    let map = manager.cell_map();
    assert_eq!(map.len(), 3);
    assert_eq!(map[&CellId(0, 0)].lindices[0].len(), 2);
    assert_eq!(map[&CellId(1, 0)].lindices[0].len(), 1);
    assert_eq!(map[&CellId(0, 1)].lindices[0].len(), 1);

    // gid density: single rank, four Locals -> gids {0,1,2,3}.
    let mut gids = manager.array(0).get_u32("gid").unwrap().to_vec();
    gids.sort_unstable();
    assert_eq!(gids, vec![0, 1, 2, 3]);

    // Scenario B: the 3x3 block around row 0's cell (0,0) covers rows 0, 1
    // (same cell), 2 (cell (1,0)) and 3 (cell (0,1)). With h=0.5 and
    // radius_scale=2.0, both cutoffs are 1.0: row 1 is within it
    // (d = sqrt(0.3^2 + 0.1^2) ~= 0.316), but rows 2 and 3 sit just
    // outside both kernels' reach (d ~= 1.1045 and d ~= 1.0198
    // respectively), so only {0, 1} qualify.
    let mut neighbors = Vec::new();
    manager.get_nearest_particles(0, 0, 0, &mut neighbors).unwrap();
    neighbors.sort_unstable();
    neighbors.dedup();
    assert_eq!(neighbors, vec![0, 1]);

    // Extends Scenario E through the manager: appending a fifth particle
    // far from the rest and querying its neighbors sees only itself, and
    // the 3x3 neighborhood around it is otherwise entirely absent from
    // the map both before and after the query.
    manager.array_mut(0).resize(5);
    manager.array_mut(0).get_f64_mut("x").unwrap()[4] = 9.3;
    manager.array_mut(0).get_f64_mut("y").unwrap()[4] = 9.3;
    manager.array_mut(0).get_f64_mut("h").unwrap()[4] = 0.5;
    manager.array_mut(0).get_f64_mut("m").unwrap()[4] = 1.0;
    manager.array_mut(0).get_f64_mut("rho").unwrap()[4] = 1000.0;
    manager.update(false).expect("second update");

    let far_center = CellId(9, 9);
    assert!(manager.cell_map().contains_key(&far_center));
    let cells_before = manager.cell_map().len();

    let far_row = {
        let gid = manager.array(0).get_u32("gid").unwrap();
        let x = manager.array(0).get_f64("x").unwrap();
        (0..gid.len()).find(|&i| x[i] > 9.0).expect("far particle present")
    };
    let mut far_neighbors = Vec::new();
    manager.get_nearest_particles(0, 0, far_row, &mut far_neighbors).unwrap();
    assert_eq!(far_neighbors, vec![far_row]);
    assert_eq!(manager.cell_map().len(), cells_before);
}
