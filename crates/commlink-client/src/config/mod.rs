//! Client config loader (strict parsing).

pub mod schema;

use std::fs;

use commlink_core::error::{CommsError, Result};

pub use schema::{
    ClientSection, CommsConfig, CommsSection, IdentitySection, OpsSection, ProfileSection,
};

pub fn load_from_file(path: &str) -> Result<CommsConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| CommsError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<CommsConfig> {
    let cfg: CommsConfig = serde_yaml::from_str(s)
        .map_err(|e| CommsError::Construction(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
