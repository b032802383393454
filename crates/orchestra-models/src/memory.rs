//! Memory ceiling detection

use orchestra_core::RegistryConfig;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Total physical memory in bytes
#[must_use]
pub fn total_system_memory() -> u64 {
    let mut sys =
        System::new_with_specifics(RefreshKind::new().with_memory(MemoryRefreshKind::everything()));
    sys.refresh_memory();
    sys.total_memory()
}

/// Resolve the registry ceiling: the configured value, else a fraction of system memory
#[must_use]
pub fn resolve_ceiling(config: &RegistryConfig) -> u64 {
    match config.max_memory_bytes {
        Some(bytes) => bytes,
        None => fraction_of(total_system_memory(), config.memory_ceiling_fraction),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn fraction_of(total: u64, fraction: f64) -> u64 {
    (total as f64 * fraction.clamp(0.0, 1.0)) as u64
}
