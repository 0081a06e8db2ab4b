//! Error types for construction-time failures and wire-codec failures.
//!
//! `NResult` (see [`crate::result::NResult`]) is the protocol-level outcome
//! delivered to user callbacks; it is a status code, not a Rust `Error`. The
//! types here cover the narrower set of failures that can occur before a
//! runner even starts running.

use thiserror::Error;

/// Failure to bring a [`crate::request_runner::RequestRunner`] into existence.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionError {
    /// The memory accountant could not reserve the bytes required for the
    /// tag and message buffer.
    #[error("not enough memory available for runner")]
    OutOfMemory,
    /// A functionally-addressed request was attempted with an SDU longer
    /// than fits a Single Frame.
    #[error("functional SDU of {len} bytes exceeds the 7-byte Single Frame limit")]
    FunctionalSduTooLarge {
        /// Length of the rejected SDU.
        len: usize,
    },
}

/// Failure to decode a [`crate::frame::Frame`] into a [`crate::frame::Pdu`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The frame's `dlc` does not match what the N_PCI code requires.
    #[error("invalid dlc {0} for this N_PCI code")]
    InvalidDlc(u8),
    /// The high nibble of the first data byte is not one of SF/FF/CF/FC.
    #[error("unknown N_PCI frame code {0:#03b}")]
    UnknownFrameCode(u8),
    /// A Flow Control frame carried a flow status outside `{0, 1, 2}`.
    #[error("invalid flow status {0}")]
    InvalidFlowStatus(u8),
}
