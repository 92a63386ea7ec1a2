//! Process data objects (PDO1..PDO4): unstructured, application-defined
//! payloads delivered without an SDO handshake.

use crate::cob::{Cob, Protocol};
use crate::error::CanOpenError;

#[derive(Debug, Clone)]
pub struct Pdo {
    pub node_id: u8,
    pub channel: u8,
    pub data: Vec<u8>,
}

impl Pdo {
    pub fn new(node_id: u8, channel: u8, data: &[u8]) -> Result<Self, CanOpenError> {
        if !(1..=8).contains(&data.len()) {
            return Err(CanOpenError::BadMessage(format!(
                "PDO data must be 1..=8 bytes, got {}",
                data.len()
            )));
        }
        if !(1..=4).contains(&channel) {
            return Err(CanOpenError::BadMessage(format!(
                "PDO channel must be 1..=4, got {channel}"
            )));
        }
        Ok(Self {
            node_id,
            channel,
            data: data.to_vec(),
        })
    }

    pub fn decode(node_id: u8, channel: u8, data: &[u8]) -> Result<Self, CanOpenError> {
        Pdo::new(node_id, channel, data)
    }

    pub fn encode(&self) -> Cob {
        Cob::new(Protocol::Pdo(self.channel), self.node_id, false, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let pdo = Pdo::new(2, 3, &[1, 2, 3]).unwrap();
        let cob = pdo.encode();
        assert_eq!(cob.protocol, Protocol::Pdo(3));
        assert_eq!(cob.node_id, 2);
    }

    #[test]
    fn rejects_oversized_data() {
        assert!(Pdo::new(1, 1, &[0u8; 9]).is_err());
    }

    #[test]
    fn rejects_bad_channel() {
        assert!(Pdo::new(1, 5, &[0u8]).is_err());
    }
}
