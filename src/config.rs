//! Configuration loading for the fam model.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`FAMEMU_FAM_ATOMIC_LATENCY`, etc.)
//! 2. The file named by `FAMEMU_CONFIG`
//! 3. Project-local config file (`./fam-emu.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! [fam]
//! enable = true
//! atomic_parallelism = 4
//! atomic_latency = 1000      # ns
//! persist = true
//! persist_latency = 500      # ns
//! invalidate = false
//! invalidate_latency = 0     # ns
//! read_latency = 800         # ns
//! # cpu_speed_mhz = 2400     # detected when absent
//! ```

use crate::error::{FamError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "FAMEMU";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "FAMEMU_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "fam-emu.toml";

/// Every recognized key, in dotted form.
pub const KEYS: &[&str] = &[
    "fam.enable",
    "fam.parallelism",
    "fam.atomic_parallelism",
    "fam.atomic_latency",
    "fam.invalidate",
    "fam.invalidate_latency",
    "fam.persist",
    "fam.persist_latency",
    "fam.read_latency",
    "fam.cpu_speed_mhz",
];

/// Raw configuration as read from files and the environment.
///
/// Every field is optional so sources can be layered; resolution to
/// concrete values happens in [`crate::model::FamModel::from_config`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamConfig {
    pub fam: FamSection,
}

/// The `[fam]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamSection {
    /// Master enable for latency emulation.
    pub enable: Option<bool>,
    /// Outstanding requests per thread.
    pub parallelism: Option<i64>,
    /// Alias of `parallelism`; wins when both are set.
    pub atomic_parallelism: Option<i64>,
    /// Round trip of one atomic, in ns.
    pub atomic_latency: Option<i64>,
    pub invalidate: Option<bool>,
    pub invalidate_latency: Option<i64>,
    pub persist: Option<bool>,
    pub persist_latency: Option<i64>,
    /// Per cache line, in ns. Charged by bulk range access.
    pub read_latency: Option<i64>,
    pub cpu_speed_mhz: Option<u64>,
}

impl FamConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.is_file() {
            config.merge(Self::from_file(local)?);
        }

        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            config.merge(Self::from_file(Path::new(&path))?);
        }

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| FamError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| FamError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded fam config file");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|source| FamError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    /// Overlay `other` on top of `self`: values set in `other` win.
    pub fn merge(&mut self, other: Self) {
        let (dst, src) = (&mut self.fam, other.fam);
        dst.enable = src.enable.or(dst.enable);
        dst.parallelism = src.parallelism.or(dst.parallelism);
        dst.atomic_parallelism = src.atomic_parallelism.or(dst.atomic_parallelism);
        dst.atomic_latency = src.atomic_latency.or(dst.atomic_latency);
        dst.invalidate = src.invalidate.or(dst.invalidate);
        dst.invalidate_latency = src.invalidate_latency.or(dst.invalidate_latency);
        dst.persist = src.persist.or(dst.persist);
        dst.persist_latency = src.persist_latency.or(dst.persist_latency);
        dst.read_latency = src.read_latency.or(dst.read_latency);
        dst.cpu_speed_mhz = src.cpu_speed_mhz.or(dst.cpu_speed_mhz);
    }

    /// Set one dotted key from its textual value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let fam = &mut self.fam;
        match key {
            "fam.enable" => fam.enable = Some(parse_bool(key, value)?),
            "fam.parallelism" => fam.parallelism = Some(parse_int(key, value)?),
            "fam.atomic_parallelism" => fam.atomic_parallelism = Some(parse_int(key, value)?),
            "fam.atomic_latency" => fam.atomic_latency = Some(parse_int(key, value)?),
            "fam.invalidate" => fam.invalidate = Some(parse_bool(key, value)?),
            "fam.invalidate_latency" => fam.invalidate_latency = Some(parse_int(key, value)?),
            "fam.persist" => fam.persist = Some(parse_bool(key, value)?),
            "fam.persist_latency" => fam.persist_latency = Some(parse_int(key, value)?),
            "fam.read_latency" => fam.read_latency = Some(parse_int(key, value)?),
            "fam.cpu_speed_mhz" => {
                fam.cpu_speed_mhz = Some(value.trim().parse().map_err(|_| invalid(key, value))?)
            }
            _ => return Err(FamError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Apply `FAMEMU_*` environment variables. Values that do not parse
    /// are reported and skipped.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for key in KEYS {
            let name = env_name(key);
            if let Some(value) = lookup(&name) {
                if let Err(err) = self.set(key, &value) {
                    tracing::warn!(%name, %err, "ignoring environment override");
                }
            }
        }
    }
}

/// `fam.atomic_latency` -> `FAMEMU_FAM_ATOMIC_LATENCY`
pub fn env_name(key: &str) -> String {
    format!("{}_{}", ENV_PREFIX, key.replace('.', "_").to_uppercase())
}

fn invalid(key: &str, value: &str) -> FamError {
    FamError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_int(key: &str, value: &str) -> Result<i64> {
    value.trim().parse().map_err(|_| invalid(key, value))
}
