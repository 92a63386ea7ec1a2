//! Raw CAN frame representation shared by all back-ends.

use std::fmt;

/// Maximum number of data bytes in a standard CAN frame.
pub const MAX_DATA_LEN: usize = 8;

/// Highest value representable as an 11-bit standard CAN identifier.
pub const MAX_STD_ID: u16 = 0x7ff;

/// A standard-format CAN frame: an 11-bit identifier, an RTR flag and up
/// to 8 data bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub id: u16,
    pub rtr: bool,
    data: [u8; MAX_DATA_LEN],
    data_length: usize,
}

impl Frame {
    /// Builds a frame, truncating `data` to [`MAX_DATA_LEN`] bytes and
    /// zero-padding the remainder.
    pub fn new(id: u16, rtr: bool, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_DATA_LEN];
        let len = data.len().min(MAX_DATA_LEN);
        buf[..len].copy_from_slice(&data[..len]);
        Frame {
            id,
            rtr,
            data: buf,
            data_length: len,
        }
    }

    /// An all-zero, zero-length frame addressed to `id`.
    pub fn empty(id: u16) -> Self {
        Frame::new(id, false, &[])
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_length]
    }

    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// The full 8-byte data array, zero-padded beyond `data_length`.
    pub fn data_padded(&self) -> &[u8; MAX_DATA_LEN] {
        &self.data
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID {:03x} RTR {}: ", self.id, self.rtr as u8)?;
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
    fn truncates_and_zero_pads() {
        let f = Frame::new(0x123, false, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(f.data_length(), MAX_DATA_LEN);
        assert_eq!(f.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);

        let f = Frame::new(0x123, false, &[1, 2]);
        assert_eq!(f.data_length(), 2);
        assert_eq!(f.data_padded(), &[1, 2, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn displays_no_data() {
        let f = Frame::empty(0x701);
        assert_eq!(format!("{f}"), "ID 701 RTR 0: No data");
    }
}
