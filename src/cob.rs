//! Communication objects: the protocol-tagged, node-addressed messages that
//! sit above raw [`Frame`](crate::frame::Frame)s.

use crate::frame::MAX_DATA_LEN;
use std::fmt;

/// The CANopen service a communication object belongs to.
///
/// `Pdo` carries its channel index (1..=4) because the connection set keeps
/// PDO1 through PDO4 as four distinct rows; a bare `Pdo` tag without an
/// index could not be matched back to one of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Sync,
    Emcy,
    Time,
    Nmt,
    NmtEc,
    Lss,
    Sdo,
    Pdo(u8),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Sync => write!(f, "SYNC"),
            Protocol::Emcy => write!(f, "EMCY"),
            Protocol::Time => write!(f, "TIME"),
            Protocol::Nmt => write!(f, "NMT"),
            Protocol::NmtEc => write!(f, "NMT error control"),
            Protocol::Lss => write!(f, "LSS"),
            Protocol::Sdo => write!(f, "SDO"),
            Protocol::Pdo(n) => write!(f, "PDO{n}"),
        }
    }
}

/// A communication object: a protocol-tagged message addressed to a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cob {
    pub protocol: Protocol,
    pub node_id: u8,
    pub rtr: bool,
    data: [u8; MAX_DATA_LEN],
    data_length: usize,
}

impl Cob {
    pub fn new(protocol: Protocol, node_id: u8, rtr: bool, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_DATA_LEN];
        let len = data.len().min(MAX_DATA_LEN);
        buf[..len].copy_from_slice(&data[..len]);
        Cob {
            protocol,
            node_id,
            rtr,
            data: buf,
            data_length: len,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length]
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }
}

impl fmt::Display for Cob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} node {}: ", self.protocol, self.node_id)?;
        if self.data_length > 0 {
            write!(f, "Data")?;
            for byte in self.data() {
                write!(f, " {byte:02x}")?;
            }
            Ok(())
        } else {
            write!(f, "No data")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdo_protocol_carries_channel() {
        let cob = Cob::new(Protocol::Pdo(3), 5, false, &[1, 2]);
        assert_eq!(cob.protocol, Protocol::Pdo(3));
        assert_ne!(cob.protocol, Protocol::Pdo(1));
    }
}
