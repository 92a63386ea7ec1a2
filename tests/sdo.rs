//! End-to-end exercise of a [`Device`] against a simulated field device,
//! without a real or virtual CAN interface: a [`ServerBackend`] plays the
//! SDO server side of the wire (storing writes, serving reads, driving the
//! segmented toggle handshake) while the `Device` under test only ever
//! calls the public API a real caller would.

use std::collections::{HashMap, VecDeque};

use canopeners::config::Config;
use canopeners::connection::Service;
use canopeners::error::{BackendError, CpcError};
use canopeners::frame::Frame;
use canopeners::protocol::sdo::{InitiatePayload, Sdo, SdoCommand, SdoDirection};
use canopeners::protocol::{
    Emergency, EmergencyErrorCode, EmergencyErrorRegister, Guard, GuardStatus, Nmt, NmtFunction,
    Pdo,
};
use canopeners::{Backend, CanOpenError, Cob, Device};

const SDO_REQUEST_RANGE: std::ops::Range<u16> = 0x600..0x680;

/// A minimal SDO object-dictionary server, reachable only through
/// [`Backend`]: `send_frame` decodes any incoming SDO request addressed to
/// it and queues the appropriate reply onto `inbox`, exactly as a field
/// device would reply on the bus. Non-SDO frames (NMT, PDO, …) are simply
/// recorded in `sent` for assertions, since nothing on the simulated bus
/// answers them.
#[derive(Default)]
struct ServerBackend {
    opened: bool,
    inbox: VecDeque<Frame>,
    sent: Vec<Frame>,
    store: HashMap<(u16, u8), Vec<u8>>,
    pending_write: Option<(u16, u8)>,
    pending_read: Option<(u16, u8, usize)>,
}

impl ServerBackend {
    fn push_frame(&mut self, cob: &Cob) {
        self.inbox.push_back(Frame::new(
            SdoDirection::Response.cob_id_offset() + cob.node_id as u16,
            cob.rtr,
            cob.data(),
        ));
    }

    fn handle_sdo(&mut self, node_id: u8, request: &Sdo) {
        let reply = match &request.command {
            SdoCommand::InitiateDownload {
                index,
                sub_index,
                payload,
            } => {
                match payload {
                    InitiatePayload::Expedited(data) => {
                        self.store.insert((*index, *sub_index), data.to_vec());
                    }
                    InitiatePayload::Segmented(_) => {
                        self.store.insert((*index, *sub_index), Vec::new());
                        self.pending_write = Some((*index, *sub_index));
                    }
                }
                Sdo::write_confirm(node_id, *index, *sub_index)
            }
            SdoCommand::DownloadSegment { toggle, data, .. } => {
                let key = self.pending_write.expect("segment without an initiate");
                self.store.get_mut(&key).unwrap().extend_from_slice(data);
                Sdo {
                    node_id,
                    direction: SdoDirection::Response,
                    command: SdoCommand::SegmentAck { toggle: *toggle },
                }
            }
            SdoCommand::InitiateUpload { index, sub_index, .. } => {
                let data = self
                    .store
                    .get(&(*index, *sub_index))
                    .cloned()
                    .unwrap_or_default();
                if data.len() <= 4 {
                    Sdo {
                        node_id,
                        direction: SdoDirection::Response,
                        command: SdoCommand::InitiateUpload {
                            index: *index,
                            sub_index: *sub_index,
                            payload: InitiatePayload::Expedited(data.into_boxed_slice()),
                        },
                    }
                } else {
                    self.pending_read = Some((*index, *sub_index, 0));
                    Sdo {
                        node_id,
                        direction: SdoDirection::Response,
                        command: SdoCommand::InitiateUpload {
                            index: *index,
                            sub_index: *sub_index,
                            payload: InitiatePayload::Segmented(Some(data.len() as u32)),
                        },
                    }
                }
            }
            SdoCommand::SegmentAck { toggle } => {
                let (index, sub_index, pos) =
                    self.pending_read.expect("segment ack without an upload");
                let data = self.store.get(&(index, sub_index)).unwrap();
                let end = (pos + 7).min(data.len());
                let last = end >= data.len();
                let chunk = data[pos..end].to_vec().into_boxed_slice();
                self.pending_read = (!last).then_some((index, sub_index, end));
                Sdo {
                    node_id,
                    direction: SdoDirection::Response,
                    command: SdoCommand::UploadSegment {
                        toggle: *toggle,
                        data: chunk,
                        last,
                    },
                }
            }
            SdoCommand::AbortTransfer { .. } => return,
        };
        self.push_frame(&reply.encode());
    }
}

impl Backend for ServerBackend {
    fn open(&mut self, _config: &Config) -> Result<(), BackendError> {
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.opened = false;
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), BackendError> {
        if !self.opened {
            return Err(BackendError::Cpc(CpcError::Send("device not open".to_owned())));
        }
        if SDO_REQUEST_RANGE.contains(&frame.id) {
            let node_id = (frame.id - SDO_REQUEST_RANGE.start) as u8;
            if let Ok(sdo) = Sdo::decode(node_id, frame.id, frame.data_padded()) {
                self.handle_sdo(node_id, &sdo);
            }
        }
        self.sent.push(*frame);
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Frame, BackendError> {
        self.inbox
            .pop_front()
            .ok_or_else(|| BackendError::Cpc(CpcError::Timeout(std::time::Duration::from_millis(10))))
    }
}

fn device() -> Device<ServerBackend> {
    let mut dev = Device::new(ServerBackend::default(), Config::from_defaults(&[]));
    dev.open().unwrap();
    dev
}

#[test]
fn expedited_write_then_read_round_trips() {
    let mut dev = device();
    dev.sdo_write(0x10, 0x1000, 1, &[1, 2, 3, 4]).unwrap();
    let value = dev.sdo_read(0x10, 0x1000, 1).unwrap();
    assert_eq!(&*value, &[1, 2, 3, 4]);
}

#[test]
fn segmented_write_then_read_round_trips() {
    let mut dev = device();
    let payload: Vec<u8> = (1..=10).collect();
    dev.sdo_write(0x10, 0x1000, 1, &payload).unwrap();
    let value = dev.sdo_read(0x10, 0x1000, 1).unwrap();
    assert_eq!(&*value, payload.as_slice());
}

#[test]
fn nmt_broadcast_reaches_the_bus() {
    let mut dev = device();
    let nmt = Nmt::new(NmtFunction::EnterOperational, 10);
    dev.send_cob(Service::Nmt, &nmt.encode()).unwrap();
    assert_eq!(dev.backend().sent.last().unwrap().id, 0x000);
}

#[test]
fn pdo_send_targets_the_receive_cob_id() {
    let mut dev = device();
    let pdo = Pdo::new(10, 1, &[3, 4, 0]).unwrap();
    dev.send_cob(Service::Pdo1, &pdo.encode()).unwrap();
    assert_eq!(dev.backend().sent.last().unwrap().id, 0x200 + 10);
}

#[test]
fn emcy_has_no_send_direction() {
    let mut dev = device();
    let emergency = Emergency::new(
        10,
        EmergencyErrorCode::AmbientTemperature,
        vec![EmergencyErrorRegister::Temperature],
        &[1, 2],
    );
    assert!(matches!(
        dev.send_cob(Service::Emcy, &emergency.encode()),
        Err(CanOpenError::Connection(_))
    ));
}

#[test]
fn emcy_and_guard_are_received_from_the_bus() {
    let mut dev = device();

    let emergency = Emergency::new(
        10,
        EmergencyErrorCode::AmbientTemperature,
        vec![EmergencyErrorRegister::Temperature],
        &[1, 2, 3, 4, 5],
    );
    dev.backend_mut()
        .inbox
        .push_back(Frame::new(0x080 + 10, false, emergency.encode().data()));
    let (service, cob) = dev.receive_cob().unwrap();
    assert_eq!(service, Service::Emcy);
    let decoded = Emergency::decode(cob.node_id, cob.data()).unwrap();
    assert_eq!(decoded.error_code, EmergencyErrorCode::AmbientTemperature);

    let guard = Guard::new(10, true, GuardStatus::Operational);
    dev.backend_mut()
        .inbox
        .push_back(Frame::new(0x700 + 10, false, guard.encode().data()));
    let (service, cob) = dev.receive_cob().unwrap();
    assert_eq!(service, Service::NmtEc);
    let decoded = Guard::decode(cob.node_id, cob.data()).unwrap();
    assert_eq!(decoded.status, GuardStatus::Operational);
    assert!(decoded.toggle);
}

#[test]
fn reference_counted_close_then_send_fails() {
    let mut dev = device();
    dev.open().unwrap();
    assert_eq!(dev.ref_count(), 2);
    dev.close().unwrap();
    assert_eq!(dev.ref_count(), 1);
    dev.sdo_write(0x10, 0x1000, 1, &[1]).unwrap();

    dev.close().unwrap();
    assert_eq!(dev.ref_count(), 0);
    assert!(matches!(
        dev.sdo_write(0x10, 0x1000, 1, &[1]),
        Err(CanOpenError::NotOpen)
    ));
}
