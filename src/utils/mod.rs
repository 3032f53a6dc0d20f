//! Utility modules: the cycle clock, CPU pinning and benchmarking.

pub mod bench;
pub mod cpu_affinity;
pub mod cycles;

// Re-export commonly used items
pub use bench::{measure_scenarios, BenchConfig, Scenario, ScenarioResult, Summary};
pub use cpu_affinity::CpuPinGuard;
pub use cycles::{measure_cycles, read_cycles, CpuFrequency, CycleClock, Tsc};
