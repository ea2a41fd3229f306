//! Single-rank smoke run: bin four particles, run one `update`, and
//! print the resulting cell occupancy and a neighbor query. Mirrors
//! spec.md's scenarios A and B.

use parmanager::{CArray, ManagerConfig, ParallelManager};

fn main() {
    tracing_subscriber::fmt::init();

    let narticles = 4;
    let array = CArray::new()
        .with_f64("x", vec![0.1, 0.4, 1.2, 0.3])
        .with_f64("y", vec![0.1, 0.2, 0.2, 1.1])
        .with_f64("z", vec![0.0; narticles])
        .with_f64("u", vec![0.0; narticles])
        .with_f64("v", vec![0.0; narticles])
        .with_f64("w", vec![0.0; narticles])
        .with_f64("au", vec![0.0; narticles])
        .with_f64("av", vec![0.0; narticles])
        .with_f64("aw", vec![0.0; narticles])
        .with_f64("rho", vec![1000.0; narticles])
        .with_f64("arho", vec![0.0; narticles])
        .with_f64("h", vec![0.5; narticles])
        .with_f64("m", vec![1.0; narticles])
        .with_i32("tag", vec![0; narticles])
        .with_u32("gid", vec![0; narticles]);

    let config = ManagerConfig::default();
    let mut manager = ParallelManager::new(config, vec![Box::new(array)]).expect("manager construction");

    manager.update(true).expect("update");

    println!("rank {} cell_size = {}", manager.rank, manager.cell_size());
    for (cid, cell) in manager.cell_map() {
        println!(
            "  cell {:?}: {} local particle(s)",
            cid,
            cell.lindices[0].len()
        );
    }

    let mut neighbors = Vec::new();
    manager
        .get_nearest_particles(0, 0, 0, &mut neighbors)
        .expect("neighbor query");
    neighbors.sort_unstable();
    println!("neighbors of particle 0: {neighbors:?}");
}
