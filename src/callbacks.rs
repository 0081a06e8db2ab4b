//! The public user-facing callback surface (§4.6).
//!
//! Callbacks are only ever invoked from [`crate::multiplexer::Multiplexer::run_step`],
//! never from the datalink driver — preserving the "no user code under
//! driver lock" contract from §5/§9.

use crate::frame::NetworkAddressInfo;
use crate::result::{Mtype, NResult};

/// User-supplied handlers for the three N_USData events.
pub trait Callbacks {
    /// Fired once per outbound transfer, on success or terminal failure.
    fn confirm(&mut self, nai: NetworkAddressInfo, result: NResult, mtype: Mtype);

    /// Fired once per inbound transfer. `bytes` is `None` iff reassembly
    /// failed (`result != N_OK`).
    fn indication(
        &mut self,
        nai: NetworkAddressInfo,
        bytes: Option<&[u8]>,
        length: u32,
        result: NResult,
        mtype: Mtype,
    );

    /// Fired once per inbound multi-frame transfer, after First Frame
    /// receipt.
    fn ff_indication(&mut self, nai: NetworkAddressInfo, length: u32, mtype: Mtype);
}
