//! Particle-array wrapper (spec §2 component 1): a thin accessor that
//! caches typed references to the coordinate, velocity, acceleration,
//! density, smoothing-length, mass, tag and global-id columns of one
//! particle array. No logic beyond that — a naming convenience used by
//! the cell binner, the exchange protocols and the neighbor query.

use crate::error::Result;
use crate::particle_array::ParticleArrayAccess;

/// Read-only cached view over one particle array's standard SPH columns.
pub struct ParticleArrayView<'a> {
    pub x: &'a [f64],
    pub y: &'a [f64],
    pub z: &'a [f64],
    pub vx: &'a [f64],
    pub vy: &'a [f64],
    pub vz: &'a [f64],
    pub ax: &'a [f64],
    pub ay: &'a [f64],
    pub az: &'a [f64],
    pub rho: &'a [f64],
    pub arho: &'a [f64],
    pub h: &'a [f64],
    pub m: &'a [f64],
    pub tag: &'a [i32],
    pub gid: &'a [u32],
}

impl<'a> ParticleArrayView<'a> {
    pub fn new(arr: &'a dyn ParticleArrayAccess) -> Result<Self> {
        Ok(ParticleArrayView {
            x: arr.get_f64("x")?,
            y: arr.get_f64("y")?,
            z: arr.get_f64("z")?,
            vx: arr.get_f64("u")?,
            vy: arr.get_f64("v")?,
            vz: arr.get_f64("w")?,
            ax: arr.get_f64("au")?,
            ay: arr.get_f64("av")?,
            az: arr.get_f64("aw")?,
            rho: arr.get_f64("rho")?,
            arho: arr.get_f64("arho")?,
            h: arr.get_f64("h")?,
            m: arr.get_f64("m")?,
            tag: arr.get_i32("tag")?,
            gid: arr.get_u32("gid")?,
        })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle_array::CArray;

    fn sample() -> CArray {
        let n = 2;
        CArray::new()
            .with_f64("x", vec![1.0, 2.0])
            .with_f64("y", vec![0.0; n])
            .with_f64("z", vec![0.0; n])
            .with_f64("u", vec![0.0; n])
            .with_f64("v", vec![0.0; n])
            .with_f64("w", vec![0.0; n])
            .with_f64("au", vec![0.0; n])
            .with_f64("av", vec![0.0; n])
            .with_f64("aw", vec![0.0; n])
            .with_f64("rho", vec![1000.0; n])
            .with_f64("arho", vec![0.0; n])
            .with_f64("h", vec![0.1; n])
            .with_f64("m", vec![1.0; n])
            .with_i32("tag", vec![0; n])
            .with_u32("gid", vec![0, 1])
    }

    #[test]
    fn view_caches_every_standard_column() {
        let arr = sample();
        let view = ParticleArrayView::new(&arr).unwrap();
        assert_eq!(view.len(), 2);
        assert!(!view.is_empty());
        assert_eq!(view.x, &[1.0, 2.0]);
        assert_eq!(view.gid, &[0, 1]);
    }

    #[test]
    fn view_construction_fails_fast_on_a_missing_column() {
        let arr = CArray::new().with_f64("x", vec![1.0]);
        assert!(ParticleArrayView::new(&arr).is_err());
    }
}
