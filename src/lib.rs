//! # canopeners
//!
//! A portable client-side CANopen communication library for field devices,
//! notably maxon EPOS motor controllers, over three physical transports:
//! native CAN adapters (CPC-USB / SJA1000-class, via [`backend::cpc`]),
//! RS-232 serial (via [`backend::serial`]) and FTDI-USB serial (via
//! [`backend::usb`]).
//!
//! As a [layer 1 and 2](https://en.wikipedia.org/wiki/OSI_model) protocol,
//! CAN does not support addressing — all messages arrive at all nodes.
//! CANopen adds addressing (layer 3) and a set of standard services (NMT,
//! SDO, PDO, EMCY, SYNC, TIME, LSS) on top. This crate gives you:
//!
//! - A uniform [`frame::Frame`] (raw CAN) / [`cob::Cob`] (CANopen
//!   communication object) model, and a [`connection_set::ConnectionSet`]
//!   mapping services to COB-ID ranges (§3 of the design doc).
//! - One [`device::Backend`] contract implemented by each transport, with
//!   [`device::Device`] generic over which back-end it holds.
//! - Typed, schema-validated [`config::Config`] and a `clap`-derived
//!   [`cli::CanOpenArgs`] option group as sugar over it.
//! - A chained [`error::CanOpenError`] that preserves the originating
//!   back-end failure as its `#[source]`.
//!
//! This is a host-side transport and encoding layer: it does not implement
//! a CANopen node's NMT state machine, PDO mapping management, an object
//! dictionary, or CAN controller firmware. See `DESIGN.md` for the
//! grounding of each module and the decisions behind the Open Questions.
//!
//! ```no_run
//! use canopeners::backend::cpc::Cpc;
//! use canopeners::config::Config;
//! use canopeners::connection::Service;
//! use canopeners::device::Device;
//! use canopeners::protocol::{Nmt, NmtFunction};
//!
//! # fn main() -> Result<(), canopeners::error::CanOpenError> {
//! let mut dev = Device::new(Cpc::new(), Config::from_defaults(canopeners::backend::cpc::PARAMS));
//! dev.open()?;
//! let nmt = Nmt::new(NmtFunction::EnterOperational, 10);
//! dev.send_cob(Service::Nmt, &nmt.encode())?;
//! dev.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod cob;
pub mod config;
pub mod connection;
pub mod connection_set;
pub mod crc;
pub mod device;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod reorder;

pub use cob::{Cob, Protocol};
pub use config::Config;
pub use connection::{Connection, Direction, Service};
pub use connection_set::ConnectionSet;
pub use device::{Backend, Device};
pub use error::CanOpenError;
pub use frame::Frame;
