//! Sends a PDO, an NMT command and an expedited SDO write, and separately
//! listens for whatever the bus delivers back (SDO responses, EMCY,
//! NMT-EC/guard replies), over a CAN-CPC (SocketCAN) channel.
//!
//! EMCY and NMT-EC are one-way from a node to the host — the predefined
//! connection set has no "receive" direction for them, so a host can only
//! `receive_cob` those services, never `send_cob` them.
//!
//! Requires a `vcan0` interface (`sudo ip link add dev vcan0 type vcan &&
//! sudo ip link set up vcan0`) with a peer on the bus to answer the SDO
//! request; run with `cargo run --example simple`.

use canopeners::backend::cpc::{Cpc, PARAMS};
use canopeners::config::Config;
use canopeners::connection::Service;
use canopeners::device::Device;
use canopeners::protocol::{Emergency, Guard, Nmt, NmtFunction, Pdo};

fn sender() {
    let mut dev = Device::new(Cpc::new(), Config::from_defaults(PARAMS));
    dev.open().unwrap();

    let pdo = Pdo::new(10, 1, &[3, 4, 0]).unwrap();
    dev.send_cob(Service::Pdo1, &pdo.encode()).unwrap();

    let nmt = Nmt::new(NmtFunction::EnterOperational, 10);
    dev.send_cob(Service::Nmt, &nmt.encode()).unwrap();

    dev.sdo_write(10, 0x1000, 1, &[1, 2, 3, 4]).unwrap();
    let value = dev.sdo_read(10, 0x1000, 1).unwrap();
    println!("read back {value:?}");

    dev.close().unwrap();
}

fn receiver() {
    let mut dev = Device::new(Cpc::new(), Config::from_defaults(PARAMS));
    dev.open().unwrap();
    loop {
        match dev.receive_cob() {
            Ok((Service::Emcy, cob)) => {
                let emergency = Emergency::decode(cob.node_id, cob.data()).unwrap();
                println!(
                    "emergency from node {}: {:?}",
                    emergency.node_id, emergency.error_code
                );
            }
            Ok((Service::NmtEc, cob)) => {
                let guard = Guard::decode(cob.node_id, cob.data()).unwrap();
                println!("guard reply from node {}: {:?}", guard.node_id, guard.status);
            }
            Ok((service, cob)) => println!("{service}: {cob}"),
            Err(e) => {
                eprintln!("receive error: {e}");
                break;
            }
        }
    }
}

fn main() {
    env_logger::init();
    std::thread::scope(|s| {
        s.spawn(sender);
        s.spawn(receiver);
    })
}
