//! Timer budgets (§4.2, §4.3, Glossary), taken verbatim from
//! `original_source/Source/ISOTP/include/N_USData_Runner.h`.
//!
//! Under the `debug_timeouts` feature every budget is multiplied by 1e5,
//! mirroring the reference implementation's compile-time
//! `ISOTP_USE_DEBUG_TIMEOUTS` knob, so a transfer can be single-stepped
//! under a debugger without tripping a timeout.

#[cfg(not(feature = "debug_timeouts"))]
const MULTIPLIER: u32 = 1;
#[cfg(feature = "debug_timeouts")]
const MULTIPLIER: u32 = 100_000;

/// Sender-side link-layer ACK timeout (ms).
pub const N_AS_TIMEOUT_MS: u32 = 1000 * MULTIPLIER;
/// Receiver-side link-layer ACK timeout (ms).
pub const N_AR_TIMEOUT_MS: u32 = 1000 * MULTIPLIER;
/// Sender's "awaiting Flow Control" timeout (ms).
pub const N_BS_TIMEOUT_MS: u32 = 1000 * MULTIPLIER;
/// Receiver's Flow Control emission performance budget (ms); a miss only
/// logs a warning, per §7.
pub const N_BR_TIMEOUT_MS: u32 = 900 * MULTIPLIER;
/// Receiver's Consecutive Frame inter-arrival timeout (ms).
pub const N_CR_TIMEOUT_MS: u32 = 1000 * MULTIPLIER;
/// Sender's Consecutive Frame pacing performance budget (ms); a miss only
/// logs a warning, per §7.
pub const N_CS_TIMEOUT_MS: u32 = 900 * MULTIPLIER;
