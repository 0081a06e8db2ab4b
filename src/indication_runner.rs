//! The inbound SDU state machine (§4.3).
//!
//! Authored by mirroring `request_runner.rs`'s structure on the receive
//! side, built against `original_source/Source/ISOTP/include/N_USData_Runner.h`'s
//! abstract indication-runner contract (no indication-runner `.cpp` source
//! was retrieved). Construction never fails outright —
//! an accountant reservation failure instead starts the runner in a
//! degraded, already-overflowed state that replies OVERFLOW and tears
//! itself down, mirroring the "receiver has no way to refuse a First Frame
//! up front" constraint in §9.

use std::sync::{Arc, Weak};
use std::time::Instant;

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::accountant::Accountant;
use crate::ack_queue::{AckOutcome, AckQueue, RunnerHandle};
use crate::callbacks::Callbacks;
use crate::frame::{
    decode, encode_fc, Frame, NetworkAddressInfo, Pdu, StMin, MAX_SF_PAYLOAD,
};
use crate::result::{Mtype, NResult};
use crate::schedule::NextRun;
use crate::timing;

const TAG_RESERVE_BYTES: i64 = 64;

/// Indication Runner states (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicationState {
    NotRunning,
    SendFirstFc,
    AwaitingFirstFcAck,
    AwaitingCf,
    SendFc,
    AwaitingFcAck,
    MessageReceived,
    Error,
}

/// State machine that reassembles one inbound SDU: an SF is complete
/// immediately; an FF spawns this runner, which then drives Flow Control and
/// collects Consecutive Frames.
pub struct IndicationRunner {
    tag: String,
    nai: NetworkAddressInfo,
    mtype: Mtype,
    declared_length: u32,
    buffer: Vec<u8>,
    expected_sn: u8,
    cf_received_in_this_block: u8,
    block_size: u8,
    st_min: StMin,
    state: IndicationState,
    result: NResult,
    ff_indicated: bool,
    timer_n_ar: crate::timer::Timer,
    timer_n_br: crate::timer::Timer,
    timer_n_cr: crate::timer::Timer,
    held_frame: Option<Frame>,
    accountant: Arc<Accountant>,
    reserved_bytes: i64,
    self_handle: Weak<Mutex<IndicationRunner>>,
}

impl IndicationRunner {
    /// Completes an inbound Single Frame immediately; no runner instance is
    /// needed. Delivers `indication` directly.
    pub fn deliver_single_frame(
        nai: NetworkAddressInfo,
        payload: &[u8],
        mtype: Mtype,
        callbacks: &mut dyn Callbacks,
    ) {
        callbacks.indication(nai, Some(payload), payload.len() as u32, NResult::NOk, mtype);
    }

    /// Constructs a runner for an inbound multi-frame transfer, given the
    /// First Frame's declared length and initial payload chunk. Reserves
    /// `declared_length` bytes from `accountant`; if that fails, the runner
    /// starts already in `Error` with `N_BUFFER_OVFLW` and will emit an
    /// OVERFLOW Flow Control on its first step.
    pub fn new(
        nai: NetworkAddressInfo,
        mtype: Mtype,
        declared_length: u32,
        first_chunk: &[u8],
        accountant: Arc<Accountant>,
        instance_name: &str,
        block_size: u8,
        st_min: StMin,
    ) -> Self {
        let tag = format!("{}/ind/sa{}-ta{}", instance_name, nai.sa, nai.ta);
        let reserved_bytes = TAG_RESERVE_BYTES + i64::from(declared_length);
        let admitted = accountant.sub_if_result_would_be_greater_than_zero(reserved_bytes);

        let mut buffer = Vec::with_capacity(if admitted { declared_length as usize } else { 0 });
        if admitted {
            buffer.extend_from_slice(first_chunk);
        }

        let state = if admitted {
            IndicationState::SendFirstFc
        } else {
            warn!(target: &tag, "could not reserve {} bytes, refusing transfer", reserved_bytes);
            IndicationState::SendFirstFc
        };
        let result = if admitted { NResult::InProgressFf } else { NResult::NBufferOvflw };

        debug!(
            target: &tag,
            "created: declared length {}, admitted {}", declared_length, admitted
        );

        IndicationRunner {
            tag,
            nai,
            mtype,
            declared_length,
            buffer,
            expected_sn: 1,
            cf_received_in_this_block: 0,
            block_size,
            st_min,
            state,
            result,
            ff_indicated: false,
            timer_n_ar: crate::timer::Timer::new(),
            timer_n_br: crate::timer::Timer::new(),
            timer_n_cr: crate::timer::Timer::new(),
            held_frame: None,
            accountant,
            reserved_bytes: if admitted { reserved_bytes } else { 0 },
            self_handle: Weak::new(),
        }
    }

    /// True if construction failed to admit the declared length; the next
    /// step will emit OVERFLOW and tear down.
    pub fn is_overflowed(&self) -> bool {
        self.result == NResult::NBufferOvflw
    }

    pub(crate) fn set_self_handle(&mut self, handle: Weak<Mutex<IndicationRunner>>) {
        self.self_handle = handle;
    }

    pub fn nai(&self) -> NetworkAddressInfo {
        self.nai
    }

    pub fn mtype(&self) -> Mtype {
        self.mtype
    }

    pub fn result(&self) -> NResult {
        self.result
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, IndicationState::MessageReceived | IndicationState::Error)
    }

    /// Fires `ff_indication` exactly once, the first time the multiplexer
    /// observes this runner after construction.
    pub fn deliver_ff_indication_if_needed(&mut self, callbacks: &mut dyn Callbacks) {
        if !self.ff_indicated {
            self.ff_indicated = true;
            callbacks.ff_indication(self.nai, self.declared_length, self.mtype);
        }
    }

    /// Delivers the final `indication` callback for a terminated transfer.
    pub fn deliver_indication(&self, callbacks: &mut dyn Callbacks) {
        let bytes = if self.result == NResult::NOk {
            Some(self.buffer.as_slice())
        } else {
            None
        };
        callbacks.indication(self.nai, bytes, self.declared_length, self.result, self.mtype);
    }

    /// True iff `frame` is a Consecutive Frame this runner should consume.
    pub fn is_this_frame_for_me(&self, frame: &Frame) -> bool {
        let expecting_cf = matches!(self.state, IndicationState::AwaitingCf);
        if !expecting_cf {
            return false;
        }
        if frame.identifier != self.nai {
            return false;
        }
        matches!(decode(frame), Ok(Pdu::ConsecutiveFrame { .. }))
    }

    fn update_state(&mut self, new_state: IndicationState) {
        debug!(target: &self.tag, "{:?} -> {:?}", self.state, new_state);
        self.state = new_state;
    }

    fn fail(&mut self, result: NResult) {
        self.timer_n_ar.stop();
        self.timer_n_br.stop();
        self.timer_n_cr.stop();
        self.update_state(IndicationState::Error);
        self.result = result;
        error!(target: &self.tag, "runner failed: {:?}", result);
    }

    fn check_timeouts(&mut self) -> Option<NResult> {
        let n_br_performance = self.timer_n_br.elapsed_ms();
        if self.state == IndicationState::SendFc && n_br_performance > timing::N_BR_TIMEOUT_MS {
            warn!(
                target: &self.tag,
                "N_Br performance budget missed: {} ms elapsed, budget {} ms",
                n_br_performance, timing::N_BR_TIMEOUT_MS
            );
        }
        if self.timer_n_ar.elapsed_ms() > timing::N_AR_TIMEOUT_MS {
            self.fail(NResult::NTimeoutA);
            return Some(NResult::NTimeoutA);
        }
        if self.timer_n_cr.elapsed_ms() > timing::N_CR_TIMEOUT_MS {
            self.fail(NResult::NTimeoutCr);
            return Some(NResult::NTimeoutCr);
        }
        None
    }

    /// Runs one step of the state machine.
    pub fn run_step(&mut self, frame: Option<&Frame>, ack_queue: &mut AckQueue) -> NResult {
        if self.result == NResult::NBufferOvflw && self.state == IndicationState::SendFirstFc {
            return self.send_fc(ack_queue, crate::frame::FlowStatus::Overflow, true);
        }
        if let Some(timeout) = self.check_timeouts() {
            return timeout;
        }
        self.run_step_internal(frame, ack_queue)
    }

    fn run_step_internal(&mut self, frame: Option<&Frame>, ack_queue: &mut AckQueue) -> NResult {
        use IndicationState::*;
        match (self.state, frame) {
            (SendFirstFc, None) => {
                self.send_fc(ack_queue, crate::frame::FlowStatus::ContinueToSend, true)
            }
            (SendFirstFc, Some(_)) => {
                self.fail(NResult::NUnexpPdu);
                self.result
            }
            (AwaitingFirstFcAck, Some(f)) | (AwaitingFcAck, Some(f)) => self.hold_frame(f),
            (AwaitingFirstFcAck, None) | (AwaitingFcAck, None) => self.result,
            (AwaitingCf, Some(f)) => self.handle_cf(f),
            (AwaitingCf, None) => {
                self.fail(NResult::NUnexpPdu);
                self.result
            }
            (SendFc, None) => {
                self.send_fc(ack_queue, crate::frame::FlowStatus::ContinueToSend, false)
            }
            (SendFc, Some(_)) => {
                self.fail(NResult::NUnexpPdu);
                self.result
            }
            (MessageReceived, _) => {
                self.result = NResult::NOk;
                self.result
            }
            (Error, _) => self.result,
        }
    }

    fn send_fc(
        &mut self,
        ack_queue: &mut AckQueue,
        status: crate::frame::FlowStatus,
        first_fc: bool,
    ) -> NResult {
        self.timer_n_br.stop();
        let frame = encode_fc(self.nai.swapped(), status, self.block_size, self.st_min);
        if ack_queue.write_frame(RunnerHandle::Indication(self.self_handle.clone()), frame) {
            self.cf_received_in_this_block = 0;
            self.timer_n_ar.start();
            self.update_state(if first_fc {
                IndicationState::AwaitingFirstFcAck
            } else {
                IndicationState::AwaitingFcAck
            });
            if status == crate::frame::FlowStatus::Overflow {
                self.result = NResult::NBufferOvflw;
            } else {
                self.result = NResult::InProgress;
            }
        } else {
            self.fail(NResult::NError);
        }
        self.result
    }

    fn hold_frame(&mut self, frame: &Frame) -> NResult {
        if self.held_frame.is_some() {
            self.fail(NResult::NError);
        } else {
            warn!(
                target: &self.tag,
                "received a frame while awaiting ACK in {:?}, holding it", self.state
            );
            self.held_frame = Some(*frame);
            self.result = NResult::InProgress;
        }
        self.result
    }

    fn handle_cf(&mut self, frame: &Frame) -> NResult {
        match decode(frame) {
            Ok(Pdu::ConsecutiveFrame { sn, payload }) => {
                if sn != self.expected_sn {
                    self.fail(NResult::NWrongSn);
                    return self.result;
                }
                self.timer_n_cr.stop();
                let remaining = self.declared_length as usize - self.buffer.len();
                let take = payload.len().min(remaining);
                self.buffer.extend_from_slice(&payload[..take]);
                self.expected_sn = (self.expected_sn + 1) % 16;
                self.cf_received_in_this_block += 1;

                if self.buffer.len() >= self.declared_length as usize {
                    self.update_state(IndicationState::MessageReceived);
                    self.result = NResult::NOk;
                } else if self.block_size != 0 && self.cf_received_in_this_block == self.block_size
                {
                    self.timer_n_br.start();
                    self.update_state(IndicationState::SendFc);
                    self.result = NResult::InProgress;
                } else {
                    self.timer_n_cr.start();
                    self.result = NResult::InProgress;
                }
            }
            _ => self.fail(NResult::NError),
        }
        self.result
    }

    fn consume_held_frame(&mut self) {
        if let Some(frame) = self.held_frame.take() {
            debug!(target: &self.tag, "re-entering with held frame after ACK");
            self.handle_cf(&frame);
        }
    }

    /// ACK-queue callback: advances the state machine on the outcome of the
    /// most recently submitted Flow Control write.
    pub(crate) fn on_ack(&mut self, outcome: AckOutcome) {
        if outcome == AckOutcome::Failure {
            self.fail(NResult::NError);
            return;
        }
        if self.result == NResult::NBufferOvflw {
            // OVERFLOW FC went out, but the transfer itself never
            // completed: the peer sees N_BUFFER_OVFLW from the FC it
            // received, while this side's own outcome is N_ERROR.
            self.fail(NResult::NError);
            return;
        }

        match self.state {
            IndicationState::AwaitingFirstFcAck | IndicationState::AwaitingFcAck => {
                self.timer_n_ar.stop();
                self.timer_n_cr.start();
                self.update_state(IndicationState::AwaitingCf);
                self.result = NResult::InProgress;
                self.consume_held_frame();
            }
            _ => {
                self.fail(NResult::NError);
            }
        }
    }

    /// The absolute deadline at which the multiplexer should next call
    /// `run_step(None, ..)` on this runner.
    pub fn get_next_run_time(&self, now: Instant) -> NextRun {
        if matches!(
            self.state,
            IndicationState::Error
                | IndicationState::MessageReceived
                | IndicationState::SendFirstFc
                | IndicationState::SendFc
        ) {
            return NextRun::Immediate;
        }

        let mut remaining: Option<std::time::Duration> = None;
        let mut consider = |d: Option<std::time::Duration>| {
            if let Some(d) = d {
                remaining = Some(remaining.map_or(d, |r| r.min(d)));
            }
        };
        consider(self.timer_n_ar.remaining(timing::N_AR_TIMEOUT_MS));
        consider(self.timer_n_cr.remaining(timing::N_CR_TIMEOUT_MS));

        match remaining {
            Some(d) => NextRun::At(now + d),
            None => NextRun::Immediate,
        }
    }
}

impl Drop for IndicationRunner {
    fn drop(&mut self) {
        if self.reserved_bytes != 0 && !self.accountant.add(self.reserved_bytes) {
            error!(target: &self.tag, "failed to release {} bytes back to the accountant", self.reserved_bytes);
        }
        debug!(target: &self.tag, "destroyed");
    }
}

/// The payload-admission helper used by the multiplexer for an inbound
/// Single Frame: checks that the payload fits, with no accountant
/// involvement (an SF is always bounded by `MAX_SF_PAYLOAD`).
pub fn sf_fits(payload: &[u8]) -> bool {
    payload.len() <= MAX_SF_PAYLOAD
}
