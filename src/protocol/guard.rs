//! Node guarding / NMT error control replies.

use binrw::{binrw, BinRead, BinWrite};

use crate::cob::{Cob, Protocol};
use crate::error::CanOpenError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardStatus {
    Boot = 0x00,
    Stopped = 0x04,
    Operational = 0x05,
    PreOperational = 0x7f,
}

impl TryFrom<u8> for GuardStatus {
    type Error = CanOpenError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(GuardStatus::Boot),
            0x04 => Ok(GuardStatus::Stopped),
            0x05 => Ok(GuardStatus::Operational),
            0x7f => Ok(GuardStatus::PreOperational),
            _ => Err(CanOpenError::Parse(format!(
                "{value:#04x} is not a valid guard status"
            ))),
        }
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug)]
struct GuardWire {
    raw_byte: u8,
}

/// A node guarding / NMT error control (NMT-EC) reply: toggle bit plus the
/// node's current NMT state.
#[derive(Debug, Clone)]
pub struct Guard {
    pub node_id: u8,
    pub toggle: bool,
    pub status: GuardStatus,
}

impl Guard {
    pub fn new(node_id: u8, toggle: bool, status: GuardStatus) -> Self {
        Self {
            node_id,
            toggle,
            status,
        }
    }

    pub fn decode(node_id: u8, data: &[u8]) -> Result<Self, CanOpenError> {
        if data.is_empty() {
            return Err(CanOpenError::Parse("guard frame is empty".to_owned()));
        }
        let mut cursor = std::io::Cursor::new(data);
        let wire =
            GuardWire::read(&mut cursor).map_err(|e| CanOpenError::Parse(format!("guard: {e}")))?;
        Ok(Guard {
            node_id,
            toggle: wire.raw_byte & 0x80 != 0,
            status: (wire.raw_byte & 0x7f).try_into()?,
        })
    }

    pub fn encode(&self) -> Cob {
        let wire = GuardWire {
            raw_byte: (self.status as u8) | ((self.toggle as u8) << 7),
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        wire.write(&mut cursor).expect("guard frame always fits 8 bytes");
        Cob::new(Protocol::NmtEc, self.node_id, false, cursor.get_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let guard = Guard::new(9, true, GuardStatus::Operational);
        let cob = guard.encode();
        let back = Guard::decode(9, cob.data()).unwrap();
        assert!(back.toggle);
        assert_eq!(back.status, GuardStatus::Operational);
    }
}
