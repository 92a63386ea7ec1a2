//! The SYNC message: a zero-length broadcast on COB-ID 0x080 that drives
//! synchronous PDO transmission.

use crate::cob::{Cob, Protocol};
use crate::error::CanOpenError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sync;

impl Sync {
    pub fn decode(data: &[u8]) -> Result<Self, CanOpenError> {
        if !data.is_empty() {
            return Err(CanOpenError::BadMessage(format!(
                "SYNC data section should be empty, found {} bytes",
                data.len()
            )));
        }
        Ok(Sync)
    }

    pub fn encode(&self) -> Cob {
        Cob::new(Protocol::Sync, 0, false, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_to_empty_cob() {
        let cob = Sync.encode();
        assert_eq!(cob.data_length(), 0);
    }

    #[test]
    fn rejects_non_empty_data() {
        assert!(Sync::decode(&[1]).is_err());
    }
}
