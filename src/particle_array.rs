//! The `ParticleArray` contract consumed by the core (spec §6).
//!
//! This is deliberately the *external collaborator*: the manager and the
//! exchange protocols only ever talk to `dyn ParticleArrayAccess`. `CArray`
//! is one concrete, dependency-free implementation (a named map of
//! homogeneous columns) good enough to drive the demos and the tests; a
//! host simulation is free to swap in its own as long as it upholds the
//! same contract.

use hashbrown::HashMap;

use crate::error::{ManagerError, Result};

/// Element kind of one named column, as introspected by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Double,
    UnsignedInt,
    Int,
    Long,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Double => "double",
            ElementKind::UnsignedInt => "unsigned int",
            ElementKind::Int => "int",
            ElementKind::Long => "long",
        }
    }
}

/// Particle classification carried by the `tag` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Tag {
    Local = 0,
    Remote = 1,
    Ghost = 2,
}

impl Tag {
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => Tag::Local,
            1 => Tag::Remote,
            _ => Tag::Ghost,
        }
    }
}

/// One homogeneous, dense column. All columns in a `CArray` share length N.
#[derive(Debug, Clone)]
pub enum Column {
    Double(Vec<f64>),
    UnsignedInt(Vec<u32>),
    Int(Vec<i32>),
    Long(Vec<i64>),
}

impl Column {
    pub fn kind(&self) -> ElementKind {
        match self {
            Column::Double(_) => ElementKind::Double,
            Column::UnsignedInt(_) => ElementKind::UnsignedInt,
            Column::Int(_) => ElementKind::Int,
            Column::Long(_) => ElementKind::Long,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Double(v) => v.len(),
            Column::UnsignedInt(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Long(v) => v.len(),
        }
    }
}

/// Contract consumed by the core from a particle array (spec §6).
pub trait ParticleArrayAccess {
    fn length(&self) -> usize;
    fn property_names(&self) -> Vec<String>;
    fn element_kind(&self, name: &str) -> Result<ElementKind>;

    fn get_f64(&self, name: &str) -> Result<&[f64]>;
    fn get_f64_mut(&mut self, name: &str) -> Result<&mut [f64]>;
    fn get_u32(&self, name: &str) -> Result<&[u32]>;
    fn get_u32_mut(&mut self, name: &str) -> Result<&mut [u32]>;
    fn get_i32(&self, name: &str) -> Result<&[i32]>;
    fn get_i32_mut(&mut self, name: &str) -> Result<&mut [i32]>;
    fn get_i64(&self, name: &str) -> Result<&[i64]>;
    fn get_i64_mut(&mut self, name: &str) -> Result<&mut [i64]>;

    /// Preserves existing rows in place; new rows are left uninitialized
    /// (zero-valued for `CArray`, since Rust has no true uninit `Vec` push
    /// without `unsafe`).
    fn resize(&mut self, new_len: usize);

    /// Removes rows in one pass. `rows` must be sorted ascending and unique.
    fn remove_particles(&mut self, rows: &[usize]) -> Result<()>;

    /// Stable partition into `[Local | Remote | Ghost]` by the `tag`
    /// column. Returns the permutation applied, `order`, such that row
    /// `order[new_pos]` held the particle now at `new_pos` — callers that
    /// keep their own row-indexed side state (the cell map) use it to
    /// remap old indices to new ones.
    fn align_particles(&mut self) -> Result<Vec<usize>>;
}

/// A concrete, in-memory `ParticleArrayAccess`: a named map of columns.
#[derive(Debug, Clone, Default)]
pub struct CArray {
    columns: HashMap<String, Column>,
    len: usize,
}

impl CArray {
    pub fn new() -> Self {
        CArray { columns: HashMap::new(), len: 0 }
    }

    pub fn with_f64(mut self, name: &str, values: Vec<f64>) -> Self {
        self.len = self.len.max(values.len());
        self.columns.insert(name.to_string(), Column::Double(values));
        self
    }

    pub fn with_u32(mut self, name: &str, values: Vec<u32>) -> Self {
        self.len = self.len.max(values.len());
        self.columns.insert(name.to_string(), Column::UnsignedInt(values));
        self
    }

    pub fn with_i32(mut self, name: &str, values: Vec<i32>) -> Self {
        self.len = self.len.max(values.len());
        self.columns.insert(name.to_string(), Column::Int(values));
        self
    }

    pub fn with_i64(mut self, name: &str, values: Vec<i64>) -> Self {
        self.len = self.len.max(values.len());
        self.columns.insert(name.to_string(), Column::Long(values));
        self
    }

    fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| ManagerError::Config(format!("unknown property '{name}'")))
    }

    fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        self.columns
            .get_mut(name)
            .ok_or_else(|| ManagerError::Config(format!("unknown property '{name}'")))
    }
}

macro_rules! typed_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        fn $get(&self, name: &str) -> Result<&[$ty]> {
            match self.column(name)? {
                Column::$variant(v) => Ok(v.as_slice()),
                other => Err(ManagerError::Config(format!(
                    "property '{name}' is {}, not {}",
                    other.kind().as_str(),
                    stringify!($variant)
                ))),
            }
        }

        fn $get_mut(&mut self, name: &str) -> Result<&mut [$ty]> {
            match self.column_mut(name)? {
                Column::$variant(v) => Ok(v.as_mut_slice()),
                other => Err(ManagerError::Config(format!(
                    "property '{name}' is {}, not {}",
                    other.kind().as_str(),
                    stringify!($variant)
                ))),
            }
        }
    };
}

impl ParticleArrayAccess for CArray {
    fn length(&self) -> usize {
        self.len
    }

    fn property_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    fn element_kind(&self, name: &str) -> Result<ElementKind> {
        Ok(self.column(name)?.kind())
    }

    typed_accessors!(get_f64, get_f64_mut, Double, f64);
    typed_accessors!(get_u32, get_u32_mut, UnsignedInt, u32);
    typed_accessors!(get_i32, get_i32_mut, Int, i32);
    typed_accessors!(get_i64, get_i64_mut, Long, i64);

    fn resize(&mut self, new_len: usize) {
        for column in self.columns.values_mut() {
            match column {
                Column::Double(v) => v.resize(new_len, 0.0),
                Column::UnsignedInt(v) => v.resize(new_len, 0),
                Column::Int(v) => v.resize(new_len, 0),
                Column::Long(v) => v.resize(new_len, 0),
            }
        }
        self.len = new_len;
    }

    fn remove_particles(&mut self, rows: &[usize]) -> Result<()> {
        if rows.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ManagerError::InvariantViolation(
                "remove_particles requires a sorted, duplicate-free row list".into(),
            ));
        }
        let keep = |len: usize| -> Vec<bool> {
            let mut mask = vec![true; len];
            for &r in rows {
                if r < len {
                    mask[r] = false;
                }
            }
            mask
        };
        let mask = keep(self.len);
        for column in self.columns.values_mut() {
            macro_rules! compact {
                ($v:expr) => {{
                    let mut out = Vec::with_capacity($v.len().saturating_sub(rows.len()));
                    for (i, value) in $v.iter().enumerate() {
                        if mask[i] {
                            out.push(*value);
                        }
                    }
                    *$v = out;
                }};
            }
            match column {
                Column::Double(v) => compact!(v),
                Column::UnsignedInt(v) => compact!(v),
                Column::Int(v) => compact!(v),
                Column::Long(v) => compact!(v),
            }
        }
        self.len -= rows.len();
        Ok(())
    }

    fn align_particles(&mut self) -> Result<Vec<usize>> {
        let tag = self.get_i32("tag")?.to_vec();
        let mut order: Vec<usize> = (0..self.len).collect();
        order.sort_by_key(|&i| Tag::from_i32(tag[i]) as i32);

        for column in self.columns.values_mut() {
            macro_rules! reorder {
                ($v:expr) => {{
                    let reordered: Vec<_> = order.iter().map(|&i| $v[i]).collect();
                    *$v = reordered;
                }};
            }
            match column {
                Column::Double(v) => reorder!(v),
                Column::UnsignedInt(v) => reorder!(v),
                Column::Int(v) => reorder!(v),
                Column::Long(v) => reorder!(v),
            }
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CArray {
        CArray::new()
            .with_f64("x", vec![0.0, 1.0, 2.0, 3.0])
            .with_i32("tag", vec![0, 2, 0, 1])
            .with_u32("gid", vec![10, 11, 12, 13])
    }

    #[test]
    fn resize_grows_and_zero_fills() {
        let mut arr = sample();
        arr.resize(6);
        assert_eq!(arr.length(), 6);
        assert_eq!(arr.get_f64("x").unwrap(), &[0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(arr.get_i32("tag").unwrap(), &[0, 2, 0, 1, 0, 0]);
    }

    #[test]
    fn resize_shrinks() {
        let mut arr = sample();
        arr.resize(2);
        assert_eq!(arr.length(), 2);
        assert_eq!(arr.get_f64("x").unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn remove_particles_drops_sorted_rows() {
        let mut arr = sample();
        arr.remove_particles(&[1, 3]).unwrap();
        assert_eq!(arr.length(), 2);
        assert_eq!(arr.get_f64("x").unwrap(), &[0.0, 2.0]);
        assert_eq!(arr.get_u32("gid").unwrap(), &[10, 12]);
    }

    #[test]
    fn remove_particles_rejects_unsorted_input() {
        let mut arr = sample();
        let err = arr.remove_particles(&[3, 1]).unwrap_err();
        assert!(matches!(err, ManagerError::InvariantViolation(_)));
    }

    #[test]
    fn align_particles_orders_local_remote_ghost_and_returns_permutation() {
        let mut arr = sample();
        let order = arr.align_particles().unwrap();
        // tags were [Local, Ghost, Local, Remote] -> stable sort by tag
        // value groups the two Local rows (0, 2) first, then Remote (3),
        // then Ghost (1).
        assert_eq!(order, vec![0, 2, 3, 1]);
        assert_eq!(arr.get_i32("tag").unwrap(), &[0, 0, 1, 2]);
        assert_eq!(arr.get_u32("gid").unwrap(), &[10, 12, 13, 11]);
    }

    #[test]
    fn unknown_property_is_a_config_error() {
        let arr = sample();
        let err = arr.get_f64("nonexistent").unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
    }
}
