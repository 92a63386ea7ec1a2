//! Network management (NMT) state commands.

use binrw::{binrw, BinRead, BinWrite};

use crate::cob::{Cob, Protocol};
use crate::error::CanOpenError;

#[binrw]
#[br(repr(u8))]
#[bw(repr(u8))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NmtFunction {
    EnterOperational = 0x01,
    EnterStop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

#[binrw]
#[brw(little)]
#[derive(Clone, Debug)]
pub struct Nmt {
    pub function: NmtFunction,
    pub target_node: u8,
}

impl Nmt {
    pub fn new(function: NmtFunction, target_node: u8) -> Self {
        Self {
            function,
            target_node,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, CanOpenError> {
        let mut cursor = std::io::Cursor::new(data);
        Nmt::read(&mut cursor).map_err(|e| CanOpenError::Parse(format!("nmt: {e}")))
    }

    /// NMT commands always target COB-ID 0x000 and broadcast to every node
    /// (the service's own `target_node` field does the addressing).
    pub fn encode(&self) -> Cob {
        let mut cursor = std::io::Cursor::new(Vec::new());
        self.write(&mut cursor).expect("nmt frame always fits 8 bytes");
        Cob::new(Protocol::Nmt, 0, false, cursor.get_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let nmt = Nmt::new(NmtFunction::ResetCommunication, 4);
        let cob = nmt.encode();
        assert_eq!(cob.node_id, 0);
        let back = Nmt::decode(cob.data()).unwrap();
        assert_eq!(back.function, NmtFunction::ResetCommunication);
        assert_eq!(back.target_node, 4);
    }
}
