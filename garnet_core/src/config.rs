//! Read-only process configuration.

/// Tunables the core reads but never writes.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Inline-cache hit count at which a method is handed to the JIT queue.
    pub jit_threshold: u64,

    /// Upper bound on registers per call frame. Compiled code declaring more
    /// locals than this is rejected at preparation.
    pub max_registers: usize,

    /// Safepoint polls between allocation-poll checks at method entry and
    /// back-branches.
    pub safepoint_interval: u64,
}

impl VmConfig {
    pub const DEFAULT_JIT_THRESHOLD: u64 = 1_000;
    pub const DEFAULT_MAX_REGISTERS: usize = 256;
    pub const DEFAULT_SAFEPOINT_INTERVAL: u64 = 1_024;
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            jit_threshold: Self::DEFAULT_JIT_THRESHOLD,
            max_registers: Self::DEFAULT_MAX_REGISTERS,
            safepoint_interval: Self::DEFAULT_SAFEPOINT_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.jit_threshold, 1_000);
        assert_eq!(config.max_registers, 256);
        assert_eq!(config.safepoint_interval, 1_024);
    }
}
