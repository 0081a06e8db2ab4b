//! Single-threaded loopback demo: two `Multiplexer`s exchange a multi-frame
//! SDU over an in-memory CAN bus, ticked from one loop.
//!
//! Mirrors the shape of `examples/transport.rs`'s loopback
//! harness, minus the threads (see `multithread.rs` for that version).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

use log::{info, LevelFilter};

use isotp_rs::{
    AckResult, Callbacks, CanInterface, Config, Frame, Mtype, Multiplexer, NResult,
    NetworkAddressInfo, TaType,
};

/// An in-memory CAN bus: every frame written by one side is immediately
/// visible to the other side's `read_frame`.
struct Bus {
    outbound: RefCell<VecDeque<Frame>>,
    peer_inbox: Rc<RefCell<VecDeque<Frame>>>,
}

impl Bus {
    fn pair() -> (Bus, Bus) {
        let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
        let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
        (
            Bus {
                outbound: RefCell::new(VecDeque::new()),
                peer_inbox: Rc::clone(&a_to_b),
            },
            Bus {
                outbound: RefCell::new(VecDeque::new()),
                peer_inbox: Rc::clone(&b_to_a),
            },
        )
    }
}

impl CanInterface for Bus {
    fn write_frame(&self, frame: &Frame) -> bool {
        self.peer_inbox.borrow_mut().push_back(*frame);
        self.outbound.borrow_mut().push_back(*frame);
        true
    }

    fn ack_result(&self) -> AckResult {
        // The in-memory bus accepts every write instantly.
        AckResult::Success
    }

    fn read_frame(&self) -> Option<Frame> {
        self.peer_inbox.borrow_mut().pop_front()
    }
}

struct Printer {
    name: &'static str,
}

impl Callbacks for Printer {
    fn confirm(&mut self, nai: NetworkAddressInfo, result: NResult, _mtype: Mtype) {
        info!(target: self.name, "confirm ta={} result={:?}", nai.ta, result);
    }

    fn indication(
        &mut self,
        nai: NetworkAddressInfo,
        bytes: Option<&[u8]>,
        length: u32,
        result: NResult,
        _mtype: Mtype,
    ) {
        info!(
            target: self.name,
            "indication sa={} length={} result={:?} bytes={:?}",
            nai.sa, length, result, bytes
        );
    }

    fn ff_indication(&mut self, nai: NetworkAddressInfo, length: u32, _mtype: Mtype) {
        info!(target: self.name, "ff_indication sa={} length={}", nai.sa, length);
    }
}

fn main() {
    log::set_max_level(LevelFilter::Debug);
    env_logger::init();

    let (bus_a, bus_b) = Bus::pair();

    let mut config_a = Config::default();
    config_a.sa = 0x10;
    config_a.instance_name = String::from("node_a");
    let mut mux_a = Multiplexer::new(config_a, bus_a, Printer { name: "node_a" });

    let mut config_b = Config::default();
    config_b.sa = 0x20;
    config_b.instance_name = String::from("node_b");
    let mut mux_b = Multiplexer::new(config_b, bus_b, Printer { name: "node_b" });

    let payload: Vec<u8> = (0..40u32).map(|i| i as u8).collect();
    mux_a.request(0x20, TaType::Physical, Mtype::Diagnostics, &payload);

    for _ in 0..200 {
        let now = Instant::now();
        mux_a.run_step(now);
        mux_b.run_step(now);
        if mux_a.outbound_len() == 0 && mux_b.inbound_len() == 0 {
            break;
        }
    }

    info!("done");
}
