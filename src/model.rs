//! The process-wide fam model.
//!
//! Populated once, before the first emulated operation, and read-only
//! afterwards. Threads copy it into their own emulator when they create it.

use crate::config::FamConfig;
use crate::error::{FamError, Result};
use crate::utils::cycles::CpuFrequency;
use std::sync::OnceLock;

static FAM_MODEL: OnceLock<FamModel> = OnceLock::new();

/// Latency and parallelism parameters of the emulated fabric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FamModel {
    /// When false, operations keep their hardware semantics but record no latency.
    pub enabled: bool,
    /// Outstanding requests per thread. Always at least 1.
    pub parallelism: usize,
    pub invalidate_enabled: bool,
    pub invalidate_latency_ns: u64,
    pub persist_enabled: bool,
    pub persist_latency_ns: u64,
    pub read_latency_ns: u64,
    pub atomic_latency_ns: u64,
    pub cpu: CpuFrequency,
}

impl Default for FamModel {
    fn default() -> Self {
        Self {
            enabled: true,
            parallelism: 1,
            invalidate_enabled: false,
            invalidate_latency_ns: 0,
            persist_enabled: false,
            persist_latency_ns: 0,
            read_latency_ns: 0,
            atomic_latency_ns: 0,
            cpu: CpuFrequency::from_mhz(1000),
        }
    }
}

impl FamModel {
    /// Resolve a layered config into concrete parameters.
    ///
    /// Nothing is rejected: out-of-range values are clamped so emulation
    /// degrades instead of failing. The CPU frequency is detected when the
    /// config does not pin it.
    pub fn from_config(config: &FamConfig) -> Self {
        let fam = &config.fam;
        let defaults = Self::default();

        let parallelism = fam
            .atomic_parallelism
            .or(fam.parallelism)
            .unwrap_or(defaults.parallelism as i64);
        let parallelism = if parallelism < 1 {
            tracing::warn!(parallelism, "fam parallelism below 1, using 1");
            1
        } else {
            parallelism as usize
        };

        let cpu = fam
            .cpu_speed_mhz
            .map(CpuFrequency::from_mhz)
            .unwrap_or_else(CpuFrequency::detect);

        Self {
            enabled: fam.enable.unwrap_or(defaults.enabled),
            parallelism,
            invalidate_enabled: fam.invalidate.unwrap_or(defaults.invalidate_enabled),
            invalidate_latency_ns: latency("fam.invalidate_latency", fam.invalidate_latency),
            persist_enabled: fam.persist.unwrap_or(defaults.persist_enabled),
            persist_latency_ns: latency("fam.persist_latency", fam.persist_latency),
            read_latency_ns: latency("fam.read_latency", fam.read_latency),
            atomic_latency_ns: latency("fam.atomic_latency", fam.atomic_latency),
            cpu,
        }
    }

    #[inline]
    pub fn atomic_latency_cycles(&self) -> u64 {
        self.cpu.ns_to_cycles(self.atomic_latency_ns)
    }

    #[inline]
    pub fn read_latency_cycles(&self) -> u64 {
        self.cpu.ns_to_cycles(self.read_latency_ns)
    }
}

fn latency(key: &str, value: Option<i64>) -> u64 {
    match value {
        Some(ns) if ns < 0 => {
            tracing::warn!(key, ns, "negative latency, using 0");
            0
        }
        Some(ns) => ns as u64,
        None => 0,
    }
}

/// Install the process-wide model. Fails if one is already installed,
/// including one that was loaded implicitly by [`get`].
pub fn init(model: FamModel) -> Result<&'static FamModel> {
    FAM_MODEL
        .set(model)
        .map_err(|_| FamError::AlreadyInitialized)?;
    let model = get();
    log_model(model);
    Ok(model)
}

/// Load the configuration from its sources and install the result.
pub fn init_from_env() -> Result<&'static FamModel> {
    init(FamModel::from_config(&FamConfig::load()?))
}

/// The process-wide model.
///
/// If nothing was installed, the configuration sources are read on first
/// use; a broken config file falls back to defaults.
pub fn get() -> &'static FamModel {
    FAM_MODEL.get_or_init(|| {
        let config = FamConfig::load().unwrap_or_else(|err| {
            tracing::warn!(%err, "fam config unusable, using defaults");
            FamConfig::default()
        });
        let model = FamModel::from_config(&config);
        log_model(&model);
        model
    })
}

fn log_model(model: &FamModel) {
    tracing::info!(
        enabled = model.enabled,
        parallelism = model.parallelism,
        atomic_latency_ns = model.atomic_latency_ns,
        persist = model.persist_enabled,
        persist_latency_ns = model.persist_latency_ns,
        invalidate = model.invalidate_enabled,
        invalidate_latency_ns = model.invalidate_latency_ns,
        read_latency_ns = model.read_latency_ns,
        cpu_mhz = model.cpu.mhz(),
        "fam model installed"
    );
}
