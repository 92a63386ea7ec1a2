//! The predefined CANopen connection set and lookups over it.

use crate::connection::{Connection, Direction, Service};
use std::fmt;

/// The default connection set defined by the CANopen predefined connection
/// set (CiA301), as used by maxon EPOS field devices.
pub const DEFAULT_CONNECTIONS: &[Connection] = &[
    Connection::new(Service::Nmt, Direction::Receive, 0x000, 1),
    Connection::new(Service::Sync, Direction::Receive, 0x080, 1),
    Connection::new(Service::Emcy, Direction::Send, 0x080, 128),
    Connection::new(Service::Time, Direction::Receive, 0x100, 1),
    Connection::new(Service::Pdo1, Direction::Send, 0x180, 128),
    Connection::new(Service::Pdo1, Direction::Receive, 0x200, 128),
    Connection::new(Service::Pdo2, Direction::Send, 0x280, 128),
    Connection::new(Service::Pdo2, Direction::Receive, 0x300, 128),
    Connection::new(Service::Pdo3, Direction::Send, 0x380, 128),
    Connection::new(Service::Pdo3, Direction::Receive, 0x400, 128),
    Connection::new(Service::Pdo4, Direction::Send, 0x480, 128),
    Connection::new(Service::Pdo4, Direction::Receive, 0x500, 128),
    Connection::new(Service::Sdo, Direction::Send, 0x580, 128),
    Connection::new(Service::Sdo, Direction::Receive, 0x600, 128),
    Connection::new(Service::NmtEc, Direction::Send, 0x700, 128),
    Connection::new(Service::Lss, Direction::Send, 0x7e4, 1),
    Connection::new(Service::Lss, Direction::Receive, 0x7e5, 1),
];

/// An ordered collection of [`Connection`]s. Lookups are first-match linear
/// scans over insertion order, matching the predefined connection set's own
/// scan semantics.
#[derive(Clone, Debug)]
pub struct ConnectionSet {
    connections: Vec<Connection>,
}

impl ConnectionSet {
    pub fn new(connections: impl Into<Vec<Connection>>) -> Self {
        ConnectionSet {
            connections: connections.into(),
        }
    }

    /// A connection set seeded with [`DEFAULT_CONNECTIONS`].
    pub fn with_defaults() -> Self {
        ConnectionSet::new(DEFAULT_CONNECTIONS.to_vec())
    }

    /// Appends a connection, returning the resulting connection count.
    pub fn add(&mut self, connection: Connection) -> usize {
        self.connections.push(connection);
        self.connections.len()
    }

    /// The first connection bound to `service` in `direction`.
    pub fn find_by_service(&self, service: Service, direction: Direction) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.service == service && c.direction == direction)
    }

    /// The first connection whose range contains `cob_id`.
    pub fn find_by_cob_id(&self, cob_id: u16) -> Option<&Connection> {
        self.connections.iter().find(|c| c.contains(cob_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        ConnectionSet::with_defaults()
    }
}

impl fmt::Display for ConnectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.connections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_has_seventeen_rows() {
        assert_eq!(ConnectionSet::with_defaults().len(), 17);
    }

    #[test]
    fn finds_nmt_by_service() {
        let set = ConnectionSet::with_defaults();
        let conn = set
            .find_by_service(Service::Nmt, Direction::Receive)
            .expect("NMT receive connection");
        assert_eq!(conn.base, 0x000);
        assert_eq!(conn.range, 1);
    }

    #[test]
    fn finds_sdo_send_by_cob_id() {
        let set = ConnectionSet::with_defaults();
        let conn = set.find_by_cob_id(0x582).expect("SDO send connection");
        assert_eq!(conn.service, Service::Sdo);
        assert_eq!(conn.direction, Direction::Send);
        assert_eq!(conn.node_id(0x582), Some(2));
    }

    #[test]
    fn cob_id_outside_any_range_is_not_found() {
        let set = ConnectionSet::with_defaults();
        assert!(set.find_by_cob_id(0x7ff).is_none());
    }

    #[test]
    fn find_by_service_and_find_by_cob_id_agree() {
        let set = ConnectionSet::with_defaults();
        for conn in set.iter() {
            let by_service = set.find_by_service(conn.service, conn.direction).unwrap();
            let by_cob_id = set.find_by_cob_id(conn.base).unwrap();
            // Both lookups agree whenever a connection's own base COB-ID is
            // the first match for its (service, direction) pair.
            if std::ptr::eq(by_service, conn) {
                assert_eq!(by_cob_id.service, conn.service);
            }
        }
    }
}
