// Fixed sandbox limits shared by the engine, the API and the CLI.
// These are part of the execution contract, not runtime flags.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall-clock bound for every command (compile and each run)
pub const EXECUTION_TIMEOUT_MS: u64 = 5000;

/// Memory ceiling per environment (100 MB)
pub const MEMORY_LIMIT_BYTES: i64 = 100 * 1000 * 1000;

/// One full CPU, expressed in Docker nano-CPUs
pub const CPU_LIMIT_NANOS: i64 = 1_000_000_000;

/// Mount point of the host workspace inside the environment
pub const CONTAINER_WORKDIR: &str = "/app";

/// Per-stream capture ceiling for a single command
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Request guards, checked before anything is provisioned
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_INPUTS: usize = 64;
pub const MAX_INPUT_BYTES: usize = 64 * 1024;

/// Resource ceiling applied to one isolated environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub network_disabled: bool,
    pub readonly_rootfs: bool,
    pub timeout_ms: u64,
}

impl SandboxLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Swap limit equal to the memory limit leaves no room for swap
    pub fn memory_swap_bytes(&self) -> i64 {
        self.memory_bytes
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: MEMORY_LIMIT_BYTES,
            nano_cpus: CPU_LIMIT_NANOS,
            network_disabled: true,
            readonly_rootfs: true,
            timeout_ms: EXECUTION_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_match_contract() {
        let limits = SandboxLimits::default();
        assert_eq!(limits.memory_bytes, 100_000_000);
        assert_eq!(limits.memory_swap_bytes(), limits.memory_bytes);
        assert_eq!(limits.nano_cpus, 1_000_000_000);
        assert!(limits.network_disabled);
        assert!(limits.readonly_rootfs);
        assert_eq!(limits.timeout(), Duration::from_millis(5000));
    }
}
