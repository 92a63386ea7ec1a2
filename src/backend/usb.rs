//! CAN-USB back-end: the same opcode/CRC framing as [`crate::backend::serial`]
//! carried over an FTDI D2XX link instead of a plain RS-232 port, with
//! DLE/STX frame synchronisation and byte stuffing layered on top.
//!
//! Grounded on `backend::serial` for the shared protocol shape (opcode
//! table, handshake acks, EPOS↔SDO translation) and on
//! `original_source/src/usb/device.c` for the FTDI-specific framing
//! quirks (DLE stuffing, the non-swapped first CRC word, the extra
//! trailing reserved word). Uses `libftd2xx`, the teacher pack's own
//! choice for FTDI D2XX access — no vendor binding is fabricated here.

use std::time::Duration;

use libftd2xx::{Ftdi, FtdiCommon};

use crate::config::{Config, Constraint, ParamSpec, ParamType};
use crate::crc;
use crate::device::Backend;
use crate::error::{BackendError, UsbError};
use crate::frame::Frame;
use crate::protocol::abort::AbortCode;
use crate::protocol::sdo::{InitiatePayload, Sdo, SdoCommand, SdoDirection};
use crate::reorder;

/// Configuration schema for the CAN-USB back-end (§6).
pub static PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "usb-dev",
        param_type: ParamType::Str,
        default: "",
        constraint: Constraint::None,
        description: "FTDI device serial number (empty selects the first device found)",
    },
    ParamSpec {
        name: "usb-serial-interface",
        param_type: ParamType::Enum,
        default: "any",
        constraint: Constraint::Choices(&["any", "a", "b", "c", "d"]),
        description: "FTDI interface selector on multi-channel devices",
    },
    ParamSpec {
        name: "usb-serial-baud-rate",
        param_type: ParamType::Int,
        default: "1000000",
        constraint: Constraint::IntRange(183, 3_000_000),
        description: "baud rate",
    },
    ParamSpec {
        name: "usb-serial-data-bits",
        param_type: ParamType::Int,
        default: "8",
        constraint: Constraint::IntRange(7, 8),
        description: "data bits",
    },
    ParamSpec {
        name: "usb-serial-stop-bits",
        param_type: ParamType::Int,
        default: "1",
        constraint: Constraint::IntRange(1, 15),
        description: "stop bits",
    },
    ParamSpec {
        name: "usb-serial-parity",
        param_type: ParamType::Enum,
        default: "none",
        constraint: Constraint::Choices(&["none", "odd", "even", "mark", "space"]),
        description: "parity",
    },
    ParamSpec {
        name: "usb-serial-flow-ctrl",
        param_type: ParamType::Enum,
        default: "off",
        constraint: Constraint::Choices(&["off", "xon_xoff", "rts_cts", "dtr_dsr"]),
        description: "flow control",
    },
    ParamSpec {
        name: "usb-serial-break",
        param_type: ParamType::Enum,
        default: "off",
        constraint: Constraint::Choices(&["off", "on"]),
        description: "break condition",
    },
    ParamSpec {
        name: "usb-serial-timeout",
        param_type: ParamType::Float,
        default: "1.0",
        constraint: Constraint::None,
        description: "read/write timeout in seconds",
    },
    ParamSpec {
        name: "usb-serial-latency",
        param_type: ParamType::Float,
        default: "0.016",
        constraint: Constraint::FloatRange(0.001, 0.255),
        description: "FTDI latency timer, in seconds",
    },
];

const DLE: u8 = 0x90;
const STX: u8 = 0x02;
const OPCODE_RESPONSE: u8 = 0x00;
const OPCODE_READ: u8 = 0x10;
const OPCODE_WRITE: u8 = 0x11;
const OPCODE_INIT_SEG_WRITE: u8 = 0x13;
const OPCODE_SEG_READ: u8 = 0x14;
const OPCODE_SEG_WRITE: u8 = 0x15;
const OPCODE_SEND_RAW: u8 = 0x20;
const ACK_OK: u8 = 0x4f;
const ACK_FAIL: u8 = 0x46;

const SDO_REQUEST_RANGE: std::ops::Range<u16> = 0x600..0x680;

#[derive(Clone, Copy, Debug)]
enum PendingKind {
    Initiate { is_read: bool },
    Segment { toggle: bool, is_read: bool },
}

#[derive(Clone, Copy, Debug)]
struct PendingSdo {
    node_id: u8,
    index: u16,
    sub_index: u8,
    kind: PendingKind,
}

/// The CAN-USB back-end: an FTDI D2XX device carrying the same
/// opcode-handshake protocol as [`crate::backend::serial::Serial`].
pub struct Usb {
    device: Option<Ftdi>,
    pending: Option<PendingSdo>,
    transfer: Option<(u16, u8)>,
}

impl Default for Usb {
    fn default() -> Self {
        Usb {
            device: None,
            pending: None,
            transfer: None,
        }
    }
}

impl Usb {
    pub fn new() -> Self {
        Self::default()
    }

    fn device_mut(&mut self) -> Result<&mut Ftdi, BackendError> {
        self.device
            .as_mut()
            .ok_or_else(|| UsbError::Convert("USB device not open".to_owned()).into())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        self.device_mut()?
            .write_all(bytes)
            .map_err(|e| UsbError::Send(e.to_string()))?;
        Ok(())
    }

    fn read_ack(&mut self) -> Result<u8, BackendError> {
        let mut ack = [0u8; 1];
        self.device_mut()?
            .read_all(&mut ack)
            .map_err(|e| UsbError::Receive(e.to_string()))?;
        Ok(ack[0])
    }

    fn expect_ack(&mut self, stage: &str) -> Result<(), BackendError> {
        match self.read_ack()? {
            ACK_OK => Ok(()),
            ACK_FAIL => Err(UsbError::Send(format!("device reported FAIL after {stage}")).into()),
            other => Err(UsbError::UnexpectedResponse(other).into()),
        }
    }

    /// Reads `n` logical (destuffed) bytes from the device.
    fn read_destuffed(&mut self, n: usize) -> Result<Vec<u8>, BackendError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let mut b = [0u8; 1];
            self.device_mut()?
                .read_all(&mut b)
                .map_err(|e| UsbError::Receive(e.to_string()))?;
            if b[0] == DLE {
                let mut doubled = [0u8; 1];
                self.device_mut()?
                    .read_all(&mut doubled)
                    .map_err(|e| UsbError::Receive(e.to_string()))?;
                if doubled[0] != DLE {
                    return Err(UsbError::Convert(
                        "DLE byte was not doubled on the wire".to_owned(),
                    )
                    .into());
                }
            }
            out.push(b[0]);
        }
        Ok(out)
    }

    fn handshake_send(&mut self, wire: &[u8]) -> Result<(), BackendError> {
        let mut framed = vec![DLE, STX];
        framed.extend_from_slice(&stuff(&wire[..1]));
        self.write_raw(&framed)?;
        self.expect_ack("opcode byte")?;
        let body = stuff(&wire[1..]);
        self.write_raw(&body)?;
        self.expect_ack("frame body")
    }

    fn handshake_receive(&mut self) -> Result<Vec<u8>, BackendError> {
        let mut marker = [0u8; 2];
        self.device_mut()?
            .read_all(&mut marker)
            .map_err(|e| UsbError::Receive(e.to_string()))?;
        if marker != [DLE, STX] {
            return Err(UsbError::Convert("missing DLE STX frame marker".to_owned()).into());
        }

        let op = self.read_destuffed(1)?;
        if op[0] != OPCODE_RESPONSE {
            return Err(UsbError::Receive(format!("unexpected response opcode {:#04x}", op[0])).into());
        }
        self.write_raw(&[ACK_OK])?;

        let len_byte = self.read_destuffed(1)?;
        let len_words = len_byte[0] as usize;
        // As in the serial back-end, but the USB wire carries one
        // additional trailing reserved word throughout (§4.6).
        let rest = self.read_destuffed((len_words + 2) * 2 + 2)?;

        let mut frame = Vec::with_capacity(2 + rest.len());
        frame.push(op[0]);
        frame.push(len_byte[0]);
        frame.extend_from_slice(&rest);
        reorder::reorder_bytes(&mut frame);

        if crc::usb_crc(&frame) != 0 {
            self.write_raw(&[ACK_FAIL])?;
            return Err(UsbError::Crc.into());
        }
        self.write_raw(&[ACK_OK])?;
        reorder::reorder_words(&mut frame);
        Ok(frame)
    }
}

/// Doubles every literal `DLE` byte.
fn stuff(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == DLE {
            out.push(DLE);
        }
        out.push(b);
    }
    out
}

impl Backend for Usb {
    fn open(&mut self, config: &Config) -> Result<(), BackendError> {
        let serial = config
            .get_str("usb-dev")
            .map_err(|e| UsbError::Convert(e.to_string()))?;
        let baud = config
            .get_int("usb-serial-baud-rate")
            .map_err(|e| UsbError::Convert(e.to_string()))? as u32;
        let timeout = Duration::from_secs_f64(
            config
                .get_float("usb-serial-timeout")
                .map_err(|e| UsbError::Convert(e.to_string()))?,
        );
        let latency = Duration::from_secs_f64(
            config
                .get_float("usb-serial-latency")
                .map_err(|e| UsbError::Convert(e.to_string()))?,
        );

        let mut device = if serial.is_empty() {
            Ftdi::new()
        } else {
            Ftdi::with_serial_number(serial)
        }
        .map_err(|e| UsbError::Device(e.to_string()))?;

        device.set_baud_rate(baud).map_err(UsbError::Ftdi)?;
        device.set_timeouts(timeout, timeout).map_err(UsbError::Ftdi)?;
        device.set_latency_timer(latency).map_err(UsbError::Ftdi)?;

        match config
            .get_enum("usb-serial-flow-ctrl")
            .map_err(|e| UsbError::Convert(e.to_string()))?
        {
            "xon_xoff" => device.set_flow_control_xon_xoff().map_err(UsbError::Ftdi)?,
            "rts_cts" => device.set_flow_control_rts_cts().map_err(UsbError::Ftdi)?,
            "dtr_dsr" => device.set_flow_control_dtr_dsr().map_err(UsbError::Ftdi)?,
            _ => device.set_flow_control_none().map_err(UsbError::Ftdi)?,
        }

        match config
            .get_enum("usb-serial-break")
            .map_err(|e| UsbError::Convert(e.to_string()))?
        {
            "on" => device.set_break_on().map_err(UsbError::Ftdi)?,
            _ => device.set_break_off().map_err(UsbError::Ftdi)?,
        }

        self.device = Some(device);
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        if let Some(mut device) = self.device.take() {
            device.close().map_err(UsbError::Ftdi)?;
        }
        self.pending = None;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), BackendError> {
        let (opcode, body, pending) = if SDO_REQUEST_RANGE.contains(&frame.id) {
            let node_id = (frame.id - SDO_REQUEST_RANGE.start) as u8;
            let sdo = Sdo::decode(node_id, frame.id, frame.data_padded())
                .map_err(|e| UsbError::Convert(e.to_string()))?;
            epos_wire_body(&sdo)
        } else {
            (OPCODE_SEND_RAW, raw_wire_body(frame), None)
        };

        if let Some((index, sub_index)) = pending.as_ref().and_then(|p: &PendingSdo| {
            matches!(p.kind, PendingKind::Initiate { .. }).then_some((p.index, p.sub_index))
        }) {
            self.transfer = Some((index, sub_index));
        }

        let wire = finalize_for_wire(opcode, body);
        self.handshake_send(&wire)?;
        self.pending = pending;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Frame, BackendError> {
        let payload = self.handshake_receive()?;
        let pending = self.pending.take().ok_or_else(|| {
            BackendError::from(UsbError::Convert(
                "received a response with no outstanding request".to_owned(),
            ))
        })?;
        let body = &payload[2..payload.len() - 2];
        decode_response(pending, body, self.transfer)
    }
}

/// Same shape as `backend::serial::epos_wire_body`, plus the trailing
/// reserved word the USB wire carries throughout (§4.6).
fn epos_wire_body(sdo: &Sdo) -> (u8, Vec<u8>, Option<PendingSdo>) {
    let node = sdo.node_id;
    let mut pending_and_body = match &sdo.command {
        SdoCommand::InitiateDownload {
            index,
            sub_index,
            payload: InitiatePayload::Expedited(bytes),
        } => {
            let mut body = vec![(*index >> 8) as u8, *index as u8, node, *sub_index];
            body.extend_from_slice(&word_bytes(bytes));
            body.extend_from_slice(&[0, 0]);
            (
                OPCODE_WRITE,
                body,
                Some(PendingSdo {
                    node_id: node,
                    index: *index,
                    sub_index: *sub_index,
                    kind: PendingKind::Initiate { is_read: false },
                }),
            )
        }
        SdoCommand::InitiateDownload {
            index,
            sub_index,
            payload: InitiatePayload::Segmented(Some(total_len)),
        } => {
            let mut body = vec![(*index >> 8) as u8, *index as u8, node, *sub_index];
            body.extend_from_slice(&word_bytes(&total_len.to_be_bytes()));
            body.extend_from_slice(&[0, 0]);
            (
                OPCODE_INIT_SEG_WRITE,
                body,
                Some(PendingSdo {
                    node_id: node,
                    index: *index,
                    sub_index: *sub_index,
                    kind: PendingKind::Initiate { is_read: false },
                }),
            )
        }
        SdoCommand::DownloadSegment { toggle, data, last } => {
            let cmd_byte = ((*toggle as u8) << 4)
                | (((7 - data.len() as u8) & 0b111) << 1)
                | (*last as u8);
            let mut body = vec![node, cmd_byte];
            body.extend_from_slice(data);
            while body.len() < 8 {
                body.push(0);
            }
            (
                OPCODE_SEG_WRITE,
                body,
                Some(PendingSdo {
                    node_id: node,
                    index: 0,
                    sub_index: 0,
                    kind: PendingKind::Segment {
                        toggle: *toggle,
                        is_read: false,
                    },
                }),
            )
        }
        SdoCommand::InitiateUpload { index, sub_index, .. } => (
            OPCODE_READ,
            vec![(*index >> 8) as u8, *index as u8, node, *sub_index, 0, 0],
            Some(PendingSdo {
                node_id: node,
                index: *index,
                sub_index: *sub_index,
                kind: PendingKind::Initiate { is_read: true },
            }),
        ),
        SdoCommand::SegmentAck { toggle } => {
            let cmd_byte = (0b011u8 << 5) | ((*toggle as u8) << 4);
            (
                OPCODE_SEG_READ,
                vec![node, cmd_byte, 0, 0, 0, 0, 0, 0],
                Some(PendingSdo {
                    node_id: node,
                    index: 0,
                    sub_index: 0,
                    kind: PendingKind::Segment {
                        toggle: *toggle,
                        is_read: true,
                    },
                }),
            )
        }
        other => unreachable!("this back-end never originates an SDO {other:?} from the host"),
    };
    pending_and_body.1.extend_from_slice(&[0, 0]); // trailing reserved word
    pending_and_body
}

fn word_bytes(bytes: &[u8]) -> Vec<u8> {
    match bytes.len() {
        1 => vec![0, bytes[0]],
        2 => vec![bytes[1], bytes[0]],
        4 => vec![bytes[3], bytes[2], bytes[1], bytes[0]],
        other => panic!("expedited SDO payload must be 1, 2 or 4 bytes, got {other}"),
    }
}

fn raw_wire_body(frame: &Frame) -> Vec<u8> {
    let mut body = vec![
        (frame.id >> 8) as u8,
        frame.id as u8,
        0,
        frame.data_length() as u8,
    ];
    body.extend_from_slice(frame.data_padded());
    body.extend_from_slice(&[0, 0]);
    body
}

fn finalize_for_wire(opcode: u8, body: Vec<u8>) -> Vec<u8> {
    let len_words = (body.len() / 2).saturating_sub(2) as u8;
    let mut wire = vec![opcode, len_words];
    wire.extend_from_slice(&body);
    wire.push(0);
    wire.push(0);
    let crc = crc::usb_crc(&wire);
    let n = wire.len();
    wire[n - 2] = (crc >> 8) as u8;
    wire[n - 1] = crc as u8;
    reorder::reorder_bytes(&mut wire);
    wire
}

fn decode_response(
    pending: PendingSdo,
    body: &[u8],
    transfer: Option<(u16, u8)>,
) -> Result<Frame, BackendError> {
    if body.len() < 6 {
        return Err(UsbError::Convert("response body too short".to_owned()).into());
    }
    let ok = body[2..6] == [0, 0, 0, 0];
    let (index, sub_index) = transfer.unwrap_or((pending.index, pending.sub_index));

    let command = if ok {
        match pending.kind {
            PendingKind::Initiate { is_read: false } => SdoCommand::InitiateDownload {
                index: pending.index,
                sub_index: pending.sub_index,
                payload: InitiatePayload::Segmented(None),
            },
            PendingKind::Initiate { is_read: true } => {
                let raw = &body[2..6];
                SdoCommand::InitiateUpload {
                    index: pending.index,
                    sub_index: pending.sub_index,
                    payload: InitiatePayload::Expedited(
                        vec![raw[2], raw[3], raw[0], raw[1]].into_boxed_slice(),
                    ),
                }
            }
            PendingKind::Segment { toggle, is_read: false } => SdoCommand::SegmentAck { toggle },
            PendingKind::Segment { toggle, is_read: true } => {
                let raw = &body[2..6];
                SdoCommand::UploadSegment {
                    toggle,
                    data: vec![raw[2], raw[3], raw[0], raw[1]].into_boxed_slice(),
                    last: true,
                }
            }
        }
    } else {
        let code = u32::from_be_bytes(body[2..6].try_into().unwrap());
        SdoCommand::AbortTransfer {
            index,
            sub_index,
            abort_code: AbortCode::decode(code),
        }
    };

    let sdo = Sdo {
        node_id: pending.node_id,
        direction: SdoDirection::Response,
        command,
    };
    let cob = sdo.encode();
    Ok(Frame::new(sdo.cob_id(), false, cob.data()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stuffing_doubles_literal_dle_bytes() {
        assert_eq!(stuff(&[0x01, DLE, 0x02]), vec![0x01, DLE, DLE, 0x02]);
    }

    #[test]
    fn write_body_carries_trailing_reserved_word() {
        let sdo = Sdo::write_request(3, 0x6040, 0x00, Box::new([0x06, 0x00]));
        let (opcode, body, _) = epos_wire_body(&sdo);
        assert_eq!(opcode, OPCODE_WRITE);
        assert_eq!(body.len(), 10);
        assert_eq!(&body[8..], &[0, 0]);
        assert_eq!((body.len() / 2).saturating_sub(2), 3);
    }

    #[test]
    fn read_body_len_words_matches_spec_example() {
        let sdo = Sdo::read_request(3, 0x1018, 0x01);
        let (opcode, body, _) = epos_wire_body(&sdo);
        assert_eq!(opcode, OPCODE_READ);
        assert_eq!((body.len() / 2).saturating_sub(2), 2);
    }

    #[test]
    fn finalize_for_wire_round_trips_usb_crc() {
        let wire = finalize_for_wire(OPCODE_WRITE, vec![0x60, 0x40, 3, 0, 0, 6, 0, 0, 0, 0]);
        let mut copy = wire.clone();
        reorder::reorder_bytes(&mut copy);
        assert_eq!(crc::usb_crc(&copy), 0);
    }
}
