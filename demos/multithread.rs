//! Two-thread demo: each node owns its `Multiplexer` on its own thread,
//! connected by `std::sync::mpsc` channels standing in for a CAN
//! transceiver pair.
//!
//! Mirrors `examples/transport.rs`'s multithreaded harness
//! (`thread::Builder` + `mpsc::channel` + a `thread::sleep`-paced poll
//! loop), generalized from a byte-stream UART to whole CAN frames.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use log::{info, LevelFilter};

use isotp_rs::{
    AckResult, Callbacks, CanInterface, Config, Frame, Mtype, Multiplexer, NResult,
    NetworkAddressInfo, TaType,
};

struct ChannelLink {
    tx: Sender<Frame>,
    rx: Mutex<Receiver<Frame>>,
}

impl CanInterface for ChannelLink {
    fn write_frame(&self, frame: &Frame) -> bool {
        self.tx.send(*frame).is_ok()
    }

    fn ack_result(&self) -> AckResult {
        AckResult::Success
    }

    fn read_frame(&self) -> Option<Frame> {
        self.rx.lock().unwrap().try_recv().ok()
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

    let (tx_a_to_b, rx_a_to_b) = channel();
    let (tx_b_to_a, rx_b_to_a) = channel();

    let node_a = thread::Builder::new()
        .name("node_a".into())
        .spawn(move || {
            let link = ChannelLink {
                tx: tx_a_to_b,
                rx: Mutex::new(rx_b_to_a),
            };
            let mut config = Config::default();
            config.sa = 0x10;
            config.instance_name = String::from("node_a");
            let mut mux = Multiplexer::new(config, link, Printer { name: "node_a" });

            let payload: Vec<u8> = (0..20u32).map(|i| i as u8).collect();
            mux.request(0x20, TaType::Physical, Mtype::Diagnostics, &payload);

            for _ in 0..100 {
                mux.run_step(Instant::now());
                thread::sleep(Duration::from_millis(10));
            }
        })
        .unwrap();

    let node_b = thread::Builder::new()
        .name("node_b".into())
        .spawn(move || {
            let link = ChannelLink {
                tx: tx_b_to_a,
                rx: Mutex::new(rx_a_to_b),
            };
            let mut config = Config::default();
            config.sa = 0x20;
            config.instance_name = String::from("node_b");
            let mut mux = Multiplexer::new(config, link, Printer { name: "node_b" });

            for _ in 0..100 {
                mux.run_step(Instant::now());
                thread::sleep(Duration::from_millis(10));
            }
        })
        .unwrap();

    node_a.join().unwrap();
    node_b.join().unwrap();
}
