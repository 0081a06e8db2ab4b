//! Serializes link-layer writes and routes transmit-complete callbacks back
//! to the runner that originated each frame (§4.4).
//!
//! Grounded on `original_source/Source/ISOTP/include/N_USData_Runner.h`'s
//! `CanMessageACKQueue` collaborator (referenced but not itself in the kept
//! source slice) and on the design note at §4.4/§9: writes and
//! ACKs are serialized per link, and callbacks are deferred to a
//! pending-callback list so they never execute on the datalink driver's
//! thread/call-stack. The queue holds only a *weak*, non-owning reference
//! to each originating runner (§9's "back-reference from ACK queue to
//! runner"), and silently drops an ACK whose runner has already been torn
//! down.

use std::collections::VecDeque;
use std::sync::Weak;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::datalink::{AckResult, CanInterface};
use crate::frame::Frame;
use crate::indication_runner::IndicationRunner;
use crate::request_runner::RequestRunner;

/// Outcome of a frame write, as delivered to a runner's ACK callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The link transmitted the frame.
    Success,
    /// The link failed to transmit the frame.
    Failure,
}

/// A non-owning reference to whichever runner originated a queued frame.
#[derive(Clone)]
pub enum RunnerHandle {
    /// An outbound transfer's Request Runner.
    Request(Weak<Mutex<RequestRunner>>),
    /// An inbound transfer's Indication Runner.
    Indication(Weak<Mutex<IndicationRunner>>),
}

impl RunnerHandle {
    fn dispatch(&self, outcome: AckOutcome, lock_timeout: Duration) {
        match self {
            RunnerHandle::Request(weak) => match weak.upgrade() {
                Some(runner) => match runner.try_lock_for(lock_timeout) {
                    Some(mut guard) => guard.on_ack(outcome),
                    None => warn!(
                        target: "isotp::ack_queue",
                        "failed to acquire request runner lock to dispatch ACK callback"
                    ),
                },
                None => debug!(
                    target: "isotp::ack_queue",
                    "dropping ACK for a request runner that was already destroyed"
                ),
            },
            RunnerHandle::Indication(weak) => match weak.upgrade() {
                Some(runner) => match runner.try_lock_for(lock_timeout) {
                    Some(mut guard) => guard.on_ack(outcome),
                    None => warn!(
                        target: "isotp::ack_queue",
                        "failed to acquire indication runner lock to dispatch ACK callback"
                    ),
                },
                None => debug!(
                    target: "isotp::ack_queue",
                    "dropping ACK for an indication runner that was already destroyed"
                ),
            },
        }
    }
}

/// Default capacity of the write FIFO.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Single-producer, single-consumer-to-the-datalink FIFO of queued writes,
/// plus the in-flight write and the list of completed-but-undispatched
/// ACKs.
pub struct AckQueue {
    pending_writes: VecDeque<(RunnerHandle, Frame)>,
    in_flight: Option<(RunnerHandle, Instant)>,
    completed: Vec<(RunnerHandle, AckOutcome)>,
    capacity: usize,
    lock_timeout: Duration,
}

impl AckQueue {
    /// Creates an empty queue with the default capacity.
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, lock_timeout)
    }

    /// Creates an empty queue with an explicit write-FIFO capacity.
    pub fn with_capacity(capacity: usize, lock_timeout: Duration) -> Self {
        AckQueue {
            pending_writes: VecDeque::new(),
            in_flight: None,
            completed: Vec::new(),
            capacity,
            lock_timeout,
        }
    }

    /// Enqueues `frame` on behalf of `runner`. Returns `false` if the write
    /// FIFO is full.
    pub fn write_frame(&mut self, runner: RunnerHandle, frame: Frame) -> bool {
        if self.pending_writes.len() >= self.capacity {
            warn!(target: "isotp::ack_queue", "write FIFO full, rejecting frame");
            return false;
        }
        self.pending_writes.push_back((runner, frame));
        true
    }

    /// If idle and the FIFO is non-empty, submits the next frame to the
    /// link and moves to in-flight. If in-flight, polls the link's ACK
    /// result and, on completion, stashes `(runner, outcome)` for
    /// [`Self::run_available_ack_callbacks`].
    pub fn run_step(&mut self, link: &dyn CanInterface) {
        if self.in_flight.is_none() {
            if let Some((runner, frame)) = self.pending_writes.pop_front() {
                if link.write_frame(&frame) {
                    self.in_flight = Some((runner, Instant::now()));
                } else {
                    self.completed.push((runner, AckOutcome::Failure));
                }
            }
            return;
        }

        match link.ack_result() {
            AckResult::Pending => {}
            AckResult::Success => {
                let (runner, _) = self.in_flight.take().expect("in_flight checked above");
                self.completed.push((runner, AckOutcome::Success));
            }
            AckResult::Failure => {
                let (runner, _) = self.in_flight.take().expect("in_flight checked above");
                self.completed.push((runner, AckOutcome::Failure));
            }
        }
    }

    /// Dispatches every pending `(runner, outcome)` pair to its runner's ACK
    /// callback, draining the completed list. Must be called from the
    /// multiplexer's tick thread, never from the datalink driver.
    pub fn run_available_ack_callbacks(&mut self) {
        for (runner, outcome) in self.completed.drain(..) {
            runner.dispatch(outcome, self.lock_timeout);
        }
    }

    /// Number of writes queued but not yet submitted to the link.
    pub fn pending_len(&self) -> usize {
        self.pending_writes.len()
    }

    /// True if a write is currently outstanding at the link.
    pub fn is_write_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }
}
