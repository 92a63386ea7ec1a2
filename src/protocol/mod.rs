//! CANopen protocol helpers: per-service message types built on top of the
//! [`crate::cob::Cob`]/[`crate::frame::Frame`] data model.

pub mod abort;
pub mod emcy;
pub mod guard;
pub mod nmt;
pub mod pdo;
pub mod sdo;
pub mod sync_msg;

pub use abort::AbortCode;
pub use emcy::{Emergency, EmergencyErrorCode, EmergencyErrorRegister};
pub use guard::{Guard, GuardStatus};
pub use nmt::{Nmt, NmtFunction};
pub use pdo::Pdo;
pub use sdo::{InitiatePayload, Sdo, SdoCommand, SdoDirection};
pub use sync_msg::Sync;
