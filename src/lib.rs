//! An ISO 15765-2 (ISO-TP) transport protocol implementation for classical
//! CAN: Single/First/Consecutive/Flow-Control framing over 29-bit extended
//! identifiers and 8-byte frames.
//!
//! The entry point is [`Multiplexer`]: it owns every in-flight transfer,
//! the bounded memory accountant, and the link-layer ACK queue, and is
//! driven by repeatedly calling [`Multiplexer::run_step`] from the
//! application's own loop — this library never spawns a thread or sleeps
//! internally.
//!
//! ```no_run
//! use isotp_rs::{Callbacks, CanInterface, Config, Frame, Mtype, NResult, Multiplexer, NetworkAddressInfo, TaType};
//! use std::time::Instant;
//!
//! struct MyLink; // wraps a real CAN socket in a complete implementation
//! impl CanInterface for MyLink {
//!     fn write_frame(&self, _frame: &Frame) -> bool { true }
//!     fn ack_result(&self) -> isotp_rs::AckResult { isotp_rs::AckResult::Success }
//!     fn read_frame(&self) -> Option<Frame> { None }
//! }
//!
//! struct MyCallbacks;
//! impl Callbacks for MyCallbacks {
//!     fn confirm(&mut self, _nai: NetworkAddressInfo, _result: NResult, _mtype: Mtype) {}
//!     fn indication(&mut self, _nai: NetworkAddressInfo, _bytes: Option<&[u8]>, _len: u32, _result: NResult, _mtype: Mtype) {}
//!     fn ff_indication(&mut self, _nai: NetworkAddressInfo, _len: u32, _mtype: Mtype) {}
//! }
//!
//! let mut mux = Multiplexer::new(Config::default(), MyLink, MyCallbacks);
//! mux.request(0x2A, TaType::Physical, Mtype::Diagnostics, b"hello");
//! loop {
//!     mux.run_step(Instant::now());
//!     # break;
//! }
//! ```

pub mod accountant;
pub mod ack_queue;
pub mod callbacks;
pub mod config;
pub mod datalink;
pub mod error;
pub mod frame;
pub mod indication_runner;
pub mod multiplexer;
pub mod request_runner;
pub mod result;
mod schedule;
mod timer;
mod timing;

pub use accountant::Accountant;
pub use callbacks::Callbacks;
pub use config::Config;
pub use datalink::{AckResult, CanInterface};
pub use error::{CodecError, ConstructionError};
pub use frame::{Frame, NetworkAddressInfo, StMin, TaType};
pub use indication_runner::IndicationRunner;
pub use multiplexer::Multiplexer;
pub use request_runner::RequestRunner;
pub use result::{Mtype, NResult};
