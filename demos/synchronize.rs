//! Two-rank halo exchange walkthrough. Run with `mpirun -n 2 cargo run
//! --example synchronize`. Particles sit on either side of x=1; after
//! `update()`, each rank's cell map should show boundary cells whose
//! `nbrprocs` names the other rank, and a neighbor query near the seam
//! should see rows that only exist as Remote copies.

use parmanager::{CArray, ManagerConfig, ParallelManager};

fn main() {
    tracing_subscriber::fmt::init();

    let (x, y): (Vec<f64>, Vec<f64>) = {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..4 {
            x.push(0.5 + i as f64 * 0.2);
            y.push(0.5);
        }
        for i in 0..4 {
            x.push(1.5 + i as f64 * 0.2);
            y.push(0.5);
        }
        (x, y)
    };
    let n = x.len();
    let array = CArray::new()
        .with_f64("x", x)
        .with_f64("y", y)
        .with_f64("z", vec![0.0; n])
        .with_f64("u", vec![0.0; n])
        .with_f64("v", vec![0.0; n])
        .with_f64("w", vec![0.0; n])
        .with_f64("au", vec![0.0; n])
        .with_f64("av", vec![0.0; n])
        .with_f64("aw", vec![0.0; n])
        .with_f64("rho", vec![1000.0; n])
        .with_f64("arho", vec![0.0; n])
        .with_f64("h", vec![0.2; n])
        .with_f64("m", vec![1.0; n])
        .with_i32("tag", vec![0; n])
        .with_u32("gid", vec![0; n]);

    let config = ManagerConfig::default();
    let mut manager = ParallelManager::new(config, vec![Box::new(array)]).expect("manager construction");

    if manager.rank == 0 {
        // Rank 0 starts with everything; rank 1 starts empty so the
        // first update distributes ownership by x-coordinate.
    } else {
        manager.array_mut(0).resize(0);
    }

    manager.update(true).expect("update");

    let boundary_cells = manager
        .cell_map()
        .values()
        .filter(|c| c.is_boundary)
        .count();
    println!(
        "rank {}: {} local, {} boundary cell(s)",
        manager.rank,
        manager.array(0).length(),
        boundary_cells
    );
}
