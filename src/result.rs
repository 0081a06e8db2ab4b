//! The protocol-level outcome taxonomy (§3, §7) and the message-type tag.

/// Outcome of a runner step, and the terminal status delivered to user
/// callbacks.
///
/// This mirrors `N_Result` from `original_source/ISOTP_Common.h`; it is a
/// plain status code, not a Rust `Error` — recovery is never attempted
/// across transfer boundaries (§7), so there is nothing for `?` to
/// propagate here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NResult {
    /// The runner has not executed a step yet.
    NotStarted,
    /// A step executed and the transfer is still ongoing.
    InProgress,
    /// Indication-only: the First Frame was observed during this step.
    InProgressFf,
    /// The transfer completed successfully.
    NOk,
    /// N_As or N_Ar expired: no link-layer ACK within budget.
    NTimeoutA,
    /// N_Bs expired: no Flow Control within budget.
    NTimeoutBs,
    /// N_Cr expired: no Consecutive Frame within budget.
    NTimeoutCr,
    /// A Consecutive Frame's sequence number did not match what was
    /// expected.
    NWrongSn,
    /// A Flow Control frame carried an unknown or out-of-context flow
    /// status.
    NInvalidFs,
    /// A frame arrived in a state where it was not expected.
    NUnexpPdu,
    /// Too many successive WAIT Flow Control frames.
    NWftOvrn,
    /// The receiver could not allocate a buffer for the declared length, or
    /// the sender received an OVERFLOW Flow Control.
    NBufferOvflw,
    /// Catch-all: construction failure, mutex failure, ACK failure, or
    /// other misuse.
    NError,
}

/// Message-type tag attached to an SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mtype {
    /// UDS/OBD-style diagnostic payload; the only type this library
    /// currently distinguishes from `Unknown`.
    Diagnostics,
    /// Any payload not otherwise classified.
    Unknown,
}
