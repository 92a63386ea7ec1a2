//! Service data objects (SDO): the expedited/segmented object dictionary
//! read/write protocol used to configure EPOS parameters.
//!
//! Terminology follows the embedded device's point of view: "download"
//! means client-to-server (a write), "upload" means server-to-client (a
//! read). `SdoDirection::Request` is what a client transmits, `Response`
//! is what the server replies with.

use crate::cob::{Cob, Protocol};
use crate::error::CanOpenError;
use crate::protocol::abort::AbortCode;

/// Whether an SDO message is a client request or a server response. Drives
/// both the COB-ID offset (request: `0x600 + node`, response:
/// `0x580 + node`) and how the command specifier byte is interpreted,
/// since CiA301 overloads the top three bits of byte 0 differently for
/// each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoDirection {
    Request,
    Response,
}

impl SdoDirection {
    pub fn cob_id_offset(self) -> u16 {
        match self {
            SdoDirection::Request => 0x600,
            SdoDirection::Response => 0x580,
        }
    }

    pub fn from_cob_id(id: u16) -> Self {
        if id & 0x780 == 0x580 {
            SdoDirection::Response
        } else {
            SdoDirection::Request
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CommandSpecifier {
    DownloadSegment,
    InitiateDownload,
    InitiateUpload,
    UploadSegment,
    AbortTransfer,
    BlockUpload,
    BlockDownload,
}

impl CommandSpecifier {
    fn from_byte(byte: u8, direction: SdoDirection) -> Result<Self, CanOpenError> {
        use CommandSpecifier::*;
        let spec = match (direction, byte >> 5) {
            (SdoDirection::Request, 0x00) => DownloadSegment,
            (SdoDirection::Request, 0x01) => InitiateDownload,
            (SdoDirection::Request, 0x02) => InitiateUpload,
            (SdoDirection::Request, 0x03) => UploadSegment,

            (SdoDirection::Response, 0x00) => UploadSegment,
            (SdoDirection::Response, 0x01) => DownloadSegment,
            (SdoDirection::Response, 0x02) => InitiateUpload,
            (SdoDirection::Response, 0x03) => InitiateDownload,

            (_, 0x04) => AbortTransfer,
            (_, 0x05) => BlockUpload,
            (_, 0x06) => BlockDownload,
            _ => {
                return Err(CanOpenError::Parse(format!(
                    "bad SDO command specifier byte: {byte:#04x}"
                )))
            }
        };
        Ok(spec)
    }
}

/// The payload of an `InitiateDownload`/`InitiateUpload` command: either
/// up to 4 bytes transferred expedited, or (for a segmented transfer) the
/// total byte count to follow in subsequent segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitiatePayload {
    Expedited(Box<[u8]>),
    Segmented(Option<u32>),
}

impl InitiatePayload {
    fn command_bits(&self) -> u8 {
        match self {
            InitiatePayload::Expedited(data) => {
                let unused = match data.len() {
                    1 => 0b11,
                    2 => 0b10,
                    3 => 0b01,
                    4 => 0b00,
                    other => panic!("expedited SDO payload must be 1..=4 bytes, got {other}"),
                };
                (unused << 2) | 0b11
            }
            InitiatePayload::Segmented(Some(_)) => 0b01,
            InitiatePayload::Segmented(None) => 0b00,
        }
    }

    fn write_into(&self, data: &mut [u8; 8]) {
        match self {
            InitiatePayload::Expedited(bytes) => data[4..4 + bytes.len()].copy_from_slice(bytes),
            InitiatePayload::Segmented(Some(size)) => data[4..8].copy_from_slice(&size.to_le_bytes()),
            InitiatePayload::Segmented(None) => {}
        }
    }

    fn decode(data: &[u8]) -> Result<Self, CanOpenError> {
        let command_byte = data[0];
        let size_indicated = command_byte & 0b1 != 0;
        let expedited = command_byte & 0b10 != 0;
        if expedited {
            let len = if size_indicated {
                match (command_byte & 0b1100) >> 2 {
                    0b11 => 1,
                    0b10 => 2,
                    0b01 => 3,
                    0b00 => 4,
                    _ => unreachable!(),
                }
            } else {
                4
            };
            Ok(InitiatePayload::Expedited(data[4..4 + len].to_vec().into()))
        } else if size_indicated {
            let size = u32::from_le_bytes(data[4..8].try_into().unwrap());
            Ok(InitiatePayload::Segmented(Some(size)))
        } else {
            Ok(InitiatePayload::Segmented(None))
        }
    }
}

/// A decoded SDO command: the index/sub-index plus command-specific
/// payload. `node_id` and `direction` live alongside in [`Sdo`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SdoCommand {
    InitiateDownload {
        index: u16,
        sub_index: u8,
        payload: InitiatePayload,
    },
    /// A data-carrying download segment. Only ever the payload of a
    /// `Request`-direction [`Sdo`] (the client streaming write data).
    DownloadSegment {
        toggle: bool,
        data: Box<[u8]>,
        last: bool,
    },
    InitiateUpload {
        index: u16,
        sub_index: u8,
        payload: InitiatePayload,
    },
    /// A data-carrying upload segment. Only ever the payload of a
    /// `Response`-direction [`Sdo`] (the server streaming read data).
    UploadSegment {
        toggle: bool,
        data: Box<[u8]>,
        last: bool,
    },
    /// The toggle-only acknowledgement that flows the opposite way from a
    /// data segment: a `Response` to a `DownloadSegment`, or a `Request`
    /// asking for the next `UploadSegment`.
    SegmentAck {
        toggle: bool,
    },
    AbortTransfer {
        index: u16,
        sub_index: u8,
        abort_code: AbortCode,
    },
}

/// A full SDO message: direction, addressed node and command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sdo {
    pub node_id: u8,
    pub direction: SdoDirection,
    pub command: SdoCommand,
}

impl Sdo {
    pub fn write_request(node_id: u8, index: u16, sub_index: u8, data: Box<[u8]>) -> Self {
        Sdo {
            node_id,
            direction: SdoDirection::Request,
            command: SdoCommand::InitiateDownload {
                index,
                sub_index,
                payload: InitiatePayload::Expedited(data),
            },
        }
    }

    pub fn write_confirm(node_id: u8, index: u16, sub_index: u8) -> Self {
        Sdo {
            node_id,
            direction: SdoDirection::Response,
            command: SdoCommand::InitiateDownload {
                index,
                sub_index,
                payload: InitiatePayload::Segmented(None),
            },
        }
    }

    pub fn read_request(node_id: u8, index: u16, sub_index: u8) -> Self {
        Sdo {
            node_id,
            direction: SdoDirection::Request,
            command: SdoCommand::InitiateUpload {
                index,
                sub_index,
                payload: InitiatePayload::Segmented(None),
            },
        }
    }

    pub fn decode(node_id: u8, cob_id: u16, data: &[u8]) -> Result<Self, CanOpenError> {
        if data.len() < 8 {
            return Err(CanOpenError::BadMessage(
                "SDO frame needs 8 data bytes".to_owned(),
            ));
        }
        let direction = SdoDirection::from_cob_id(cob_id);
        let spec = CommandSpecifier::from_byte(data[0], direction)?;
        let index = || u16::from_be_bytes(data[1..3].try_into().unwrap());
        let sub_index = || data[3];

        let command = match spec {
            CommandSpecifier::InitiateDownload => SdoCommand::InitiateDownload {
                index: index(),
                sub_index: sub_index(),
                payload: InitiatePayload::decode(data)?,
            },
            CommandSpecifier::InitiateUpload => SdoCommand::InitiateUpload {
                index: index(),
                sub_index: sub_index(),
                payload: InitiatePayload::decode(data)?,
            },
            CommandSpecifier::DownloadSegment => match direction {
                SdoDirection::Request => {
                    let (toggle, last, bytes) = decode_segment(data[0], data);
                    SdoCommand::DownloadSegment {
                        toggle,
                        last,
                        data: bytes,
                    }
                }
                SdoDirection::Response => SdoCommand::SegmentAck {
                    toggle: data[0] & 0b1_0000 != 0,
                },
            },
            CommandSpecifier::UploadSegment => match direction {
                SdoDirection::Request => SdoCommand::SegmentAck {
                    toggle: data[0] & 0b1_0000 != 0,
                },
                SdoDirection::Response => {
                    let (toggle, last, bytes) = decode_segment(data[0], data);
                    SdoCommand::UploadSegment {
                        toggle,
                        last,
                        data: bytes,
                    }
                }
            },
            CommandSpecifier::AbortTransfer => SdoCommand::AbortTransfer {
                index: index(),
                sub_index: sub_index(),
                abort_code: AbortCode::decode(u32::from_le_bytes(data[4..8].try_into().unwrap())),
            },
            CommandSpecifier::BlockUpload | CommandSpecifier::BlockDownload => {
                return Err(CanOpenError::Parse(
                    "block transfer is not supported".to_owned(),
                ))
            }
        };

        Ok(Sdo {
            node_id,
            direction,
            command,
        })
    }

    pub fn encode(&self) -> Cob {
        let mut data = [0u8; 8];
        match &self.command {
            SdoCommand::InitiateDownload {
                index,
                sub_index,
                payload,
            } => {
                let ccs = match self.direction {
                    SdoDirection::Request => 0b001 << 5,
                    SdoDirection::Response => 0b011 << 5,
                };
                data[0] = ccs | if self.direction == SdoDirection::Request {
                    payload.command_bits()
                } else {
                    0
                };
                data[1..3].copy_from_slice(&index.to_be_bytes());
                data[3] = *sub_index;
                if self.direction == SdoDirection::Request {
                    payload.write_into(&mut data);
                }
            }
            SdoCommand::InitiateUpload {
                index,
                sub_index,
                payload,
            } => {
                data[0] = (0b010 << 5)
                    | if self.direction == SdoDirection::Response {
                        payload.command_bits()
                    } else {
                        0
                    };
                data[1..3].copy_from_slice(&index.to_be_bytes());
                data[3] = *sub_index;
                if self.direction == SdoDirection::Response {
                    payload.write_into(&mut data);
                }
            }
            SdoCommand::DownloadSegment { toggle, data: seg, last } => {
                encode_segment(&mut data, 0b000, *toggle, seg, *last);
            }
            SdoCommand::UploadSegment { toggle, data: seg, last } => {
                encode_segment(&mut data, 0b000, *toggle, seg, *last);
            }
            SdoCommand::SegmentAck { toggle } => {
                let ccs: u8 = match self.direction {
                    SdoDirection::Response => 0b001,
                    SdoDirection::Request => 0b011,
                };
                data[0] = (ccs << 5) | ((*toggle as u8) << 4);
            }
            SdoCommand::AbortTransfer {
                index,
                sub_index,
                abort_code,
            } => {
                data[0] = 0b100 << 5;
                data[1..3].copy_from_slice(&index.to_be_bytes());
                data[3] = *sub_index;
                data[4..8].copy_from_slice(&abort_code.encode().to_le_bytes());
            }
        }
        Cob::new(Protocol::Sdo, self.node_id, false, &data)
    }

    pub fn cob_id(&self) -> u16 {
        self.direction.cob_id_offset() + self.node_id as u16
    }
}

fn decode_segment(command_byte: u8, data: &[u8]) -> (bool, bool, Box<[u8]>) {
    let toggle = command_byte & 0b1_0000 != 0;
    let size = 7 - ((command_byte >> 1) & 0b111) as usize;
    let last = command_byte & 0b1 != 0;
    (toggle, last, data[1..1 + size].to_vec().into())
}

fn encode_segment(data: &mut [u8; 8], ccs: u8, toggle: bool, seg: &[u8], last: bool) {
    data[0] = (ccs << 5) | ((toggle as u8) << 4) | (((7 - seg.len() as u8) & 0b111) << 1) | (last as u8);
    data[1..1 + seg.len()].copy_from_slice(seg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expedited_write_round_trips() {
        let sdo = Sdo::write_request(3, 0x6040, 0x00, Box::new([0x06, 0x00]));
        let cob = sdo.encode();
        let back = Sdo::decode(3, cob.node_id as u16 + 0x600, cob.data()).unwrap();
        match back.command {
            SdoCommand::InitiateDownload { index, sub_index, payload } => {
                assert_eq!(index, 0x6040);
                assert_eq!(sub_index, 0x00);
                assert_eq!(payload, InitiatePayload::Expedited(Box::new([0x06, 0x00])));
            }
            _ => panic!("wrong command decoded"),
        }
    }

    #[test]
    fn index_is_encoded_high_byte_first_on_the_wire() {
        let sdo = Sdo::write_request(3, 0x6040, 0x00, Box::new([0x06, 0x00]));
        let data = sdo.encode().data().to_vec();
        assert_eq!(&data[1..3], &[0x60, 0x40]);
    }

    #[test]
    fn read_request_then_confirm_direction_flips_cob_id() {
        let sdo = Sdo::read_request(3, 0x1018, 0x01);
        assert_eq!(sdo.cob_id(), 0x603);
        assert_eq!(SdoDirection::from_cob_id(0x583), SdoDirection::Response);
    }

    #[test]
    fn abort_transfer_round_trips() {
        let sdo = Sdo {
            node_id: 1,
            direction: SdoDirection::Response,
            command: SdoCommand::AbortTransfer {
                index: 0x2000,
                sub_index: 0,
                abort_code: AbortCode::ObjectDoesNotExist,
            },
        };
        let cob = sdo.encode();
        let back = Sdo::decode(1, 0x581, cob.data()).unwrap();
        match back.command {
            SdoCommand::AbortTransfer { abort_code, .. } => {
                assert_eq!(abort_code, AbortCode::ObjectDoesNotExist)
            }
            _ => panic!("wrong command decoded"),
        }
    }

    #[test]
    fn download_segment_ack_round_trips() {
        let ack = Sdo {
            node_id: 2,
            direction: SdoDirection::Response,
            command: SdoCommand::SegmentAck { toggle: true },
        };
        let cob = ack.encode();
        let back = Sdo::decode(2, 0x582, cob.data()).unwrap();
        assert_eq!(back.command, SdoCommand::SegmentAck { toggle: true });
    }

    #[test]
    fn segment_round_trips() {
        let mut data = [0u8; 8];
        encode_segment(&mut data, 0b000, true, &[1, 2, 3], true);
        let (toggle, last, bytes) = decode_segment(data[0], &data);
        assert!(toggle);
        assert!(last);
        assert_eq!(&*bytes, &[1, 2, 3]);
    }
}
