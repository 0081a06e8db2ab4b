//! The datalink contract this library consumes (§6): a non-blocking
//! CAN-frame writer/reader that reports transmit ACKs. Implementations are
//! an external collaborator — a real one would wrap something like a
//! SocketCAN or vendor CAN controller driver; `tests/` and `demos/` supply
//! in-memory loopback implementations.

use crate::frame::Frame;

/// Outcome of an outstanding frame write, polled via
/// [`CanInterface::ack_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// The write has not yet been acknowledged by the link.
    Pending,
    /// The link confirmed the frame was transmitted.
    Success,
    /// The link reported the frame could not be transmitted.
    Failure,
}

/// Non-blocking datalink driver contract.
///
/// `write_frame`/`read_frame`/`ack_result` must never block; suspension is
/// only permitted via the platform's own sleep/timeout primitives (§5).
pub trait CanInterface {
    /// Submits a frame for transmission. Returns `true` if the frame was
    /// accepted (a write is now outstanding); `false` if the link cannot
    /// accept a write right now (e.g. one is already in flight).
    fn write_frame(&self, frame: &Frame) -> bool;

    /// Polls the outcome of the single outstanding write submitted via
    /// `write_frame`.
    fn ack_result(&self) -> AckResult;

    /// Returns one buffered inbound frame, if any, without blocking.
    fn read_frame(&self) -> Option<Frame>;
}
