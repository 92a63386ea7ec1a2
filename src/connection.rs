//! Service-to-COB-ID bindings: the rows of a [`ConnectionSet`](crate::connection_set::ConnectionSet).

use crate::cob::Protocol;
use std::fmt;

/// One of the CANopen services a connection can bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Service {
    Nmt,
    Sync,
    Emcy,
    Time,
    Pdo1,
    Pdo2,
    Pdo3,
    Pdo4,
    Sdo,
    NmtEc,
    Lss,
}

impl Service {
    /// The wire protocol a COB bound to this service is tagged with.
    pub fn protocol(self) -> Protocol {
        match self {
            Service::Nmt => Protocol::Nmt,
            Service::Sync => Protocol::Sync,
            Service::Emcy => Protocol::Emcy,
            Service::Time => Protocol::Time,
            Service::Pdo1 => Protocol::Pdo(1),
            Service::Pdo2 => Protocol::Pdo(2),
            Service::Pdo3 => Protocol::Pdo(3),
            Service::Pdo4 => Protocol::Pdo(4),
            Service::Sdo => Protocol::Sdo,
            Service::NmtEc => Protocol::NmtEc,
            Service::Lss => Protocol::Lss,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(
            match self {
                Service::Nmt => "NMT",
                Service::Sync => "SYNC",
                Service::Emcy => "EMCY",
                Service::Time => "TIME",
                Service::Pdo1 => "PDO1",
                Service::Pdo2 => "PDO2",
                Service::Pdo3 => "PDO3",
                Service::Pdo4 => "PDO4",
                Service::Sdo => "SDO",
                Service::NmtEc => "NMT-EC",
                Service::Lss => "LSS",
            },
            f,
        )
    }
}

/// Which side of the wire a connection addresses from this device's point
/// of view: a `Send` connection carries COBs this device transmits, a
/// `Receive` connection carries COBs this device consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// A `(service, direction, base COB-ID, range)` binding: `range` standard
/// node slots starting at `base`, i.e. COB-IDs `base..base+range`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connection {
    pub service: Service,
    pub direction: Direction,
    pub base: u16,
    pub range: u16,
}

impl Connection {
    pub const fn new(service: Service, direction: Direction, base: u16, range: u16) -> Self {
        Connection {
            service,
            direction,
            base,
            range,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.service.protocol()
    }

    /// Whether `cob_id` falls within this connection's COB-ID range.
    pub fn contains(&self, cob_id: u16) -> bool {
        cob_id >= self.base && cob_id < self.base + self.range
    }

    /// The node id addressed by `cob_id`, if it is within range.
    pub fn node_id(&self, cob_id: u16) -> Option<u16> {
        self.contains(cob_id).then(|| cob_id - self.base)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            Direction::Send => "send",
            Direction::Receive => "recv",
        };
        if self.range > 1 {
            write!(
                f,
                "{} {}: {:03x}-{:03x}",
                self.service,
                dir,
                self.base,
                self.base + self.range - 1
            )
        } else {
            write!(f, "{} {}: {:03x}", self.service, dir, self.base)
        }
    }
}
