//! Manager configuration (spec §6 "Configuration").
//!
//! The core owns no CLI and no on-disk format, but ships `serde::Deserialize`
//! on `ManagerConfig` so an embedding driver can layer TOML/env config on
//! top the way `core-config` does in a text editor's crate family — the
//! core itself only ever receives an already-built `ManagerConfig`.

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, Result};

/// One of the standard SPH property names the load-balance exchange
/// (spec §4.3) may carry between ranks.
pub const DEFAULT_LB_PROPS: &[&str] = &[
    "x", "y", "z", "ax", "ay", "az", "u", "v", "w", "au", "av", "aw", "rho", "arho", "m", "h",
    "gid", "tag",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DomainLimits {
    pub mx: f64,
    pub my: f64,
    pub mz: f64,
    pub bx: f64,
    pub by: f64,
    pub bz: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Accepted but only 2 is honored; binning pins the z-bin to 0.
    pub dimension: usize,
    pub radius_scale: f64,
    pub ghost_layers: i32,
    pub domain_limits: Option<DomainLimits>,
    pub lb_props: Vec<String>,
    pub lb_method: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            dimension: 2,
            radius_scale: 2.0,
            ghost_layers: 2,
            domain_limits: None,
            lb_props: DEFAULT_LB_PROPS.iter().map(|s| s.to_string()).collect(),
            lb_method: "rcb".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Validates `lb_props` names and `lb_method`; fatal `ConfigError`
    /// kind failures surface here, at construction, rather than mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.ghost_layers < 0 {
            return Err(ManagerError::Config(
                "ghost_layers must be non-negative".into(),
            ));
        }
        if self.radius_scale <= 0.0 {
            return Err(ManagerError::Config("radius_scale must be positive".into()));
        }
        for prop in &self.lb_props {
            if !DEFAULT_LB_PROPS.contains(&prop.as_str()) {
                return Err(ManagerError::Config(format!(
                    "unknown lb_props entry '{prop}'"
                )));
            }
        }
        match self.lb_method.as_str() {
            "rcb" | "stub" => {}
            other => {
                return Err(ManagerError::Config(format!(
                    "unknown lb_method '{other}'; this build only ships 'rcb' and 'stub'"
                )))
            }
        }
        if let Some(d) = self.domain_limits {
            if d.bx < d.mx || d.by < d.my || d.bz < d.mz {
                return Err(ManagerError::Config("invalid domain_limits: max < min".into()));
            }
        }
        Ok(())
    }
}
