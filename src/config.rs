//! Recognized configuration options (§6).

use std::collections::HashSet;

use crate::frame::StMin;

/// Configuration for a [`crate::multiplexer::Multiplexer`] instance.
///
/// Field names and defaults follow the options table at §6, plus
/// two knobs `original_source/` fixes as constants and the distillation
/// left implicit: `wft_max` (the bounded WAIT-FC counter §9 flags
/// as an open question) and `lock_timeout_ms`
/// (`ISOTP_MaxTimeToWaitForSync_MS`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Local source address used for every outbound N_AI.
    pub sa: u8,
    /// Byte budget handed to the memory accountant.
    pub max_memory_bytes: i64,
    /// Block size advertised in Flow Control frames this node emits as a
    /// receiver.
    pub block_size: u8,
    /// STmin advertised in Flow Control frames this node emits as a
    /// receiver.
    pub st_min: StMin,
    /// Functional target addresses this node accepts inbound traffic for.
    pub accepted_functional_tas: HashSet<u8>,
    /// Prefix used when building a runner's log target.
    pub instance_name: String,
    /// Maximum number of consecutive WAIT Flow Control frames a Request
    /// Runner tolerates before failing with `N_WFT_OVRN`.
    pub wft_max: u32,
    /// Mutex-acquisition timeout, in milliseconds, used throughout the
    /// library (accountant, runner locks).
    pub lock_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sa: 0,
            max_memory_bytes: 64 * 1024,
            block_size: 8,
            st_min: StMin::DEFAULT,
            accepted_functional_tas: HashSet::new(),
            instance_name: String::from("isotp"),
            wft_max: 8,
            lock_timeout_ms: 100,
        }
    }
}

impl Config {
    /// Whether a functionally-addressed inbound frame targeting `ta` should
    /// be accepted, per the opt-in filtering policy in §4.5.
    pub fn accepts_functional_ta(&self, ta: u8) -> bool {
        self.accepted_functional_tas.contains(&ta)
    }
}
