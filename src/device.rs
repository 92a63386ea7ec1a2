//! Generic, back-end-agnostic device: lifecycle, configuration, connection
//! set, COB↔frame conversion and the SDO read/write state machine built on
//! top of them.
//!
//! `Device<B>` is generic over a [`Backend`] implementation so the
//! lifecycle/connection-set/SDO logic is written once and shared by the
//! CPC, serial and USB back-ends (`backend::cpc`, `backend::serial`,
//! `backend::usb`).

use std::error::Error as StdError;

use log::{debug, warn};

use crate::cob::Cob;
use crate::config::Config;
use crate::connection::{Direction, Service};
use crate::connection_set::ConnectionSet;
use crate::error::{BackendError, CanOpenError};
use crate::frame::Frame;
use crate::protocol::sdo::{InitiatePayload, Sdo, SdoCommand, SdoDirection};

/// The contract every transport back-end implements. A back-end owns its
/// transport handle; `open` is responsible for both acquiring the handle
/// and running the transport-specific setup (SJA1000 bit timing, serial
/// port parameters, FTDI latency timer, …) from `config`.
pub trait Backend {
    fn open(&mut self, config: &Config) -> Result<(), BackendError>;
    fn close(&mut self) -> Result<(), BackendError>;
    fn send_frame(&mut self, frame: &Frame) -> Result<(), BackendError>;
    fn receive_frame(&mut self) -> Result<Frame, BackendError>;
}

/// A CANopen device: a back-end-specific transport handle plus
/// configuration, a working connection set, traffic counters, a reference
/// count and the last error observed. Generic over which transport backs
/// it (`Device<backend::cpc::Cpc>`, `Device<backend::serial::Serial>`,
/// `Device<backend::usb::Usb>`).
pub struct Device<B: Backend> {
    backend: B,
    config: Config,
    connections: ConnectionSet,
    ref_count: u32,
    sent: u64,
    received: u64,
    last_error: Option<String>,
}

impl<B: Backend> Device<B> {
    /// Builds a device with the default predefined connection set and a
    /// reference count of zero (not yet open).
    pub fn new(backend: B, config: Config) -> Self {
        Device {
            backend,
            config,
            connections: ConnectionSet::with_defaults(),
            ref_count: 0,
            sent: 0,
            received: 0,
            last_error: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// The underlying back-end, e.g. to inspect transport-specific state in
    /// tests or to reach a method [`Backend`] doesn't expose.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// The device's working connection set. Each device owns an
    /// independent copy of the default set so that adding connections
    /// here never affects other devices.
    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionSet {
        &mut self.connections
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// The full source chain of the most recent failed operation, most
    /// recent cause last. `None` if no operation has failed yet.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn fail(&mut self, err: CanOpenError) -> CanOpenError {
        warn!("{}", chain(&err));
        self.last_error = Some(chain(&err));
        err
    }

    /// Acquires the transport if this is the first open, then increments
    /// the reference count. A second `open` on an already-open device is a
    /// no-op beyond the reference count bump, matching §4.3's "idempotent
    /// open/close" contract for layered callers.
    pub fn open(&mut self) -> Result<(), CanOpenError> {
        if self.ref_count == 0 {
            if let Err(e) = self.backend.open(&self.config) {
                return Err(self.fail(CanOpenError::Open(e)));
            }
            debug!("device opened");
        }
        self.ref_count += 1;
        Ok(())
    }

    /// Decrements the reference count, releasing the transport once it
    /// reaches zero. Fails with [`CanOpenError::NotOpen`] if called on a
    /// device that is not currently open.
    pub fn close(&mut self) -> Result<(), CanOpenError> {
        if self.ref_count == 0 {
            return Err(self.fail(CanOpenError::NotOpen));
        }
        self.ref_count -= 1;
        if self.ref_count == 0 {
            if let Err(e) = self.backend.close() {
                return Err(self.fail(CanOpenError::Close(e)));
            }
            debug!("device closed");
        }
        Ok(())
    }

    /// Sends a raw frame, bypassing the connection set and COB layer.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), CanOpenError> {
        if self.ref_count == 0 {
            return Err(self.fail(CanOpenError::NotOpen));
        }
        match self.backend.send_frame(frame) {
            Ok(()) => {
                self.sent += 1;
                debug!("sent {frame}");
                Ok(())
            }
            Err(e) => Err(self.fail(CanOpenError::Send(e))),
        }
    }

    /// Blocks until a frame is received or the back-end's configured
    /// timeout elapses.
    pub fn receive_frame(&mut self) -> Result<Frame, CanOpenError> {
        if self.ref_count == 0 {
            return Err(self.fail(CanOpenError::NotOpen));
        }
        match self.backend.receive_frame() {
            Ok(frame) => {
                self.received += 1;
                debug!("received {frame}");
                Ok(frame)
            }
            Err(e) => Err(self.fail(CanOpenError::Receive(e))),
        }
    }

    /// Sends a COB addressed to `service`. The outgoing COB-ID is the
    /// service's *receive* connection (the COB-ID the remote node receives
    /// this service on) plus the COB's node id — e.g. for `Sdo`, that's
    /// `0x600 + node_id`, the request COB-ID a server listens on.
    pub fn send_cob(&mut self, service: Service, cob: &Cob) -> Result<(), CanOpenError> {
        let conn = match self
            .connections
            .find_by_service(service, Direction::Receive)
            .copied()
        {
            Some(c) => c,
            None => {
                let err =
                    CanOpenError::Connection(format!("no receive connection bound to {service}"));
                return Err(self.fail(err));
            }
        };
        if cob.protocol != conn.protocol() {
            let err = CanOpenError::Convert(format!(
                "{service} expects protocol {}, got {}",
                conn.protocol(),
                cob.protocol
            ));
            return Err(self.fail(err));
        }
        if cob.node_id as u16 >= conn.range {
            let err = CanOpenError::Convert(format!(
                "node id {} is out of range for {service} (0..{})",
                cob.node_id, conn.range
            ));
            return Err(self.fail(err));
        }
        let frame = Frame::new(conn.base + cob.node_id as u16, cob.rtr, cob.data());
        self.send_frame(&frame)
    }

    /// Receives a frame and reconstructs it into a `(service, COB)` pair
    /// via the connection set. Fails with [`CanOpenError::UnknownCobId`]
    /// if no connection claims the frame's COB-ID, and with
    /// [`CanOpenError::Connection`] if the matching connection is one this
    /// device should itself be transmitting on (a `Receive` connection —
    /// the remote node's receive slot — rather than one it transmits on).
    pub fn receive_cob(&mut self) -> Result<(Service, Cob), CanOpenError> {
        let frame = self.receive_frame()?;
        let conn = match self.connections.find_by_cob_id(frame.id).copied() {
            Some(c) => c,
            None => return Err(self.fail(CanOpenError::UnknownCobId(frame.id))),
        };
        if conn.direction == Direction::Receive {
            let err = CanOpenError::Connection(format!(
                "received a frame on COB-ID {:#05x}, which is {}'s own receive slot",
                frame.id, conn.service
            ));
            return Err(self.fail(err));
        }
        let node_id = (frame.id - conn.base) as u8;
        let cob = Cob::new(conn.protocol(), node_id, frame.rtr, frame.data());
        Ok((conn.service, cob))
    }

    fn send_sdo_and_await(&mut self, sdo: &Sdo) -> Result<Sdo, CanOpenError> {
        let cob = sdo.encode();
        self.send_cob(Service::Sdo, &cob)?;
        loop {
            let (service, resp_cob) = self.receive_cob()?;
            if service != Service::Sdo || resp_cob.node_id != sdo.node_id {
                continue;
            }
            let cob_id = SdoDirection::Response.cob_id_offset() + resp_cob.node_id as u16;
            let resp = Sdo::decode(resp_cob.node_id, cob_id, resp_cob.data())?;
            if let SdoCommand::AbortTransfer { abort_code, .. } = resp.command {
                return Err(self.fail(CanOpenError::SdoAbort(abort_code)));
            }
            return Ok(resp);
        }
    }

    /// Writes `data` to `index`/`sub_index` on `node_id`: expedited for
    /// 1..=4 bytes, segmented (7 bytes per segment, alternating toggle
    /// bit) above that.
    pub fn sdo_write(
        &mut self,
        node_id: u8,
        index: u16,
        sub_index: u8,
        data: &[u8],
    ) -> Result<(), CanOpenError> {
        match data.len() {
            0 => Ok(()),
            1..=4 => {
                let sdo =
                    Sdo::write_request(node_id, index, sub_index, data.to_vec().into_boxed_slice());
                self.send_sdo_and_await(&sdo)?;
                Ok(())
            }
            n => {
                let init = Sdo {
                    node_id,
                    direction: SdoDirection::Request,
                    command: SdoCommand::InitiateDownload {
                        index,
                        sub_index,
                        payload: InitiatePayload::Segmented(Some(n as u32)),
                    },
                };
                self.send_sdo_and_await(&init)?;

                let mut toggle = false;
                let mut start = 0;
                while start < n {
                    let end = (start + 7).min(n);
                    let last = end >= n;
                    let seg = Sdo {
                        node_id,
                        direction: SdoDirection::Request,
                        command: SdoCommand::DownloadSegment {
                            toggle,
                            data: data[start..end].to_vec().into_boxed_slice(),
                            last,
                        },
                    };
                    self.send_sdo_and_await(&seg)?;
                    toggle = !toggle;
                    start = end;
                }
                Ok(())
            }
        }
    }

    /// Reads `index`/`sub_index` from `node_id`, transparently following
    /// the segmented-upload handshake if the server responds with one.
    pub fn sdo_read(&mut self, node_id: u8, index: u16, sub_index: u8) -> Result<Box<[u8]>, CanOpenError> {
        let resp = self.send_sdo_and_await(&Sdo::read_request(node_id, index, sub_index))?;
        match resp.command {
            SdoCommand::InitiateUpload {
                payload: InitiatePayload::Expedited(data),
                ..
            } => Ok(data),
            SdoCommand::InitiateUpload {
                payload: InitiatePayload::Segmented(_),
                ..
            } => {
                let mut buf = Vec::new();
                let mut toggle = false;
                loop {
                    let ack = Sdo {
                        node_id,
                        direction: SdoDirection::Request,
                        command: SdoCommand::SegmentAck { toggle },
                    };
                    let seg = self.send_sdo_and_await(&ack)?;
                    match seg.command {
                        SdoCommand::UploadSegment { data, last, .. } => {
                            buf.extend_from_slice(&data);
                            if last {
                                break;
                            }
                        }
                        _ => {
                            let err =
                                CanOpenError::Protocol("expected an SDO upload segment".to_owned());
                            return Err(self.fail(err));
                        }
                    }
                    toggle = !toggle;
                }
                Ok(buf.into_boxed_slice())
            }
            _ => {
                let err = CanOpenError::Protocol(
                    "unexpected SDO response to an upload request".to_owned(),
                );
                Err(self.fail(err))
            }
        }
    }
}

impl<B: Backend> Drop for Device<B> {
    /// Best-effort release if the caller never brought the reference count
    /// back to zero themselves.
    fn drop(&mut self) {
        if self.ref_count > 0 {
            if let Err(e) = self.backend.close() {
                warn!("error closing device on drop: {e}");
            }
        }
    }
}

fn chain(err: &(dyn StdError + 'static)) -> String {
    let mut s = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        s.push_str(" <- ");
        s.push_str(&e.to_string());
        source = e.source();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cob::Protocol;
    use crate::config::Config;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockBackend {
        opened: bool,
        outbox: Vec<Frame>,
        inbox: VecDeque<Frame>,
    }

    impl Backend for MockBackend {
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
                return Err(BackendError::Cpc(crate::error::CpcError::Send(
                    "device not open".to_owned(),
                )));
            }
            self.outbox.push(*frame);
            Ok(())
        }

        fn receive_frame(&mut self) -> Result<Frame, BackendError> {
            self.inbox.pop_front().ok_or_else(|| {
                BackendError::Cpc(crate::error::CpcError::Timeout(std::time::Duration::from_secs(1)))
            })
        }
    }

    fn device() -> Device<MockBackend> {
        Device::new(MockBackend::default(), Config::from_defaults(&[]))
    }

    #[test]
    fn double_open_then_close_then_send_fails() {
        let mut dev = device();
        dev.open().unwrap();
        dev.open().unwrap();
        assert_eq!(dev.ref_count(), 2);
        dev.close().unwrap();
        assert_eq!(dev.ref_count(), 1);
        // backend is still open because ref_count didn't reach zero
        dev.send_frame(&Frame::empty(0x181)).unwrap();

        dev.close().unwrap();
        assert_eq!(dev.ref_count(), 0);
        assert!(dev.send_frame(&Frame::empty(0x181)).is_err());
    }

    #[test]
    fn close_without_open_fails_not_open() {
        let mut dev = device();
        assert!(matches!(dev.close(), Err(CanOpenError::NotOpen)));
    }

    #[test]
    fn send_cob_nmt_builds_broadcast_frame() {
        let mut dev = device();
        dev.open().unwrap();
        let cob = Cob::new(Protocol::Nmt, 0, false, &[0x01, 0x05]);
        dev.send_cob(Service::Nmt, &cob).unwrap();
        assert_eq!(dev.backend.outbox[0].id, 0x000);
        assert_eq!(dev.sent(), 1);
    }

    #[test]
    fn send_cob_rejects_protocol_mismatch() {
        let mut dev = device();
        dev.open().unwrap();
        let cob = Cob::new(Protocol::Sync, 0, false, &[]);
        assert!(matches!(
            dev.send_cob(Service::Nmt, &cob),
            Err(CanOpenError::Convert(_))
        ));
    }

    #[test]
    fn receive_cob_on_node_receive_slot_is_rejected() {
        let mut dev = device();
        dev.open().unwrap();
        // 0x600 is the SDO "receive" connection, i.e. a server's own
        // receive slot — a host should never observe a frame arriving
        // there addressed to itself.
        dev.backend.inbox.push_back(Frame::empty(0x603));
        assert!(matches!(
            dev.receive_cob(),
            Err(CanOpenError::Connection(_))
        ));
    }

    #[test]
    fn receive_cob_reconstructs_node_id_from_default_set() {
        let mut dev = device();
        dev.open().unwrap();
        dev.backend.inbox.push_back(Frame::new(0x583, false, &[1, 2, 3, 4, 5, 6, 7, 8]));
        let (service, cob) = dev.receive_cob().unwrap();
        assert_eq!(service, Service::Sdo);
        assert_eq!(cob.node_id, 3);
        assert_eq!(cob.protocol, Protocol::Sdo);
    }
}
