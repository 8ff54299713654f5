//! Registry routing host handles to emulated transports by identifier.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, warn};

use super::bridge::DeviceIo;
use super::error::TransportError;

/// Opaque handle returned by [`PortTable::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u32);

impl PortId {
    /// Raw handle value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Emulated transports keyed by identifier.
///
/// An identifier the table does not know belongs to real hardware; callers
/// forward those opens untouched. Several boards of the same model coexist as
/// long as their identifiers differ.
#[derive(Default)]
pub struct PortTable {
    ports: Vec<Box<dyn DeviceIo>>,
    by_identifier: HashMap<String, usize>,
    open: HashMap<PortId, usize>,
    next_id: u32,
}

impl PortTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transport, returning `false` if its identifier is already taken
    pub fn insert<T: DeviceIo + 'static>(&mut self, port: T) -> bool {
        self.insert_boxed(Box::new(port))
    }

    /// Add an already boxed transport
    pub fn insert_boxed(&mut self, port: Box<dyn DeviceIo>) -> bool {
        let identifier = port.identifier().to_owned();
        if self.by_identifier.contains_key(&identifier) {
            warn!(%identifier, "identifier already emulated");
            return false;
        }

        self.by_identifier.insert(identifier, self.ports.len());
        self.ports.push(port);
        true
    }

    /// Check whether `identifier` is emulated
    #[must_use]
    pub fn is_emulated(&self, identifier: &str) -> bool {
        self.by_identifier.contains_key(identifier)
    }

    /// Number of registered transports
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Check whether no transports are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Number of handles currently open
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Open an emulated transport
    ///
    /// Returns `None` for unknown identifiers and for transports that refuse
    /// the open. A transport that is already open is reopened with a fresh
    /// session and its previous handle is invalidated.
    pub fn open(&mut self, identifier: &str) -> Option<PortId> {
        let index = *self.by_identifier.get(identifier)?;

        if !self.ports[index].open(identifier) {
            return None;
        }

        self.open.retain(|_, open| *open != index);
        let id = PortId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.open.insert(id, index);
        debug!(%identifier, %id, "port opened");

        Some(id)
    }

    /// Write through an open handle
    pub fn write(&mut self, id: PortId, bytes: &[u8]) -> Result<usize, TransportError> {
        self.port_mut(id)?.write(bytes)
    }

    /// Read through an open handle
    pub fn read(&mut self, id: PortId, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.port_mut(id)?.read(buf)
    }

    /// Issue a control request through an open handle
    pub fn device_io(
        &mut self,
        id: PortId,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        self.port_mut(id)?.device_io(code, input, output)
    }

    /// Close an open handle
    pub fn close(&mut self, id: PortId) -> bool {
        let Some(index) = self.open.remove(&id) else {
            return false;
        };
        debug!(%id, "port closed");
        self.ports[index].close()
    }

    fn port_mut(&mut self, id: PortId) -> Result<&mut dyn DeviceIo, TransportError> {
        let index = *self.open.get(&id).ok_or(TransportError::NotOpen)?;
        Ok(self.ports[index].as_mut())
    }
}

impl fmt::Debug for PortTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identifiers: Vec<&str> = self.ports.iter().map(|port| port.identifier()).collect();
        f.debug_struct("PortTable")
            .field("identifiers", &identifiers)
            .field("open", &self.open.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::transport::{BusPort, PortConfig};

    fn table() -> PortTable {
        let mut table = PortTable::new();
        for identifier in ["COM1", "COM2"] {
            assert!(table.insert(BusPort::new(PortConfig::new(identifier), || {
                Ok(Bus::default())
            })));
        }
        table
    }

    #[test]
    fn test_unknown_identifier_not_emulated() {
        let mut table = table();

        assert!(!table.is_emulated("COM7"));
        assert_eq!(table.open("COM7"), None);
        assert_eq!(table.open_count(), 0);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let mut table = table();
        let duplicate = BusPort::new(PortConfig::new("COM2"), || Ok(Bus::default()));

        assert!(!table.insert(duplicate));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_same_board_type_twice() {
        let mut table = table();

        let first = table.open("COM1").unwrap();
        let second = table.open("COM2").unwrap();

        assert_ne!(first, second);
        assert_eq!(table.open_count(), 2);
        assert!(table.close(first));
        assert_eq!(table.write(first, &[0xAA]), Err(TransportError::NotOpen));
        assert_eq!(table.write(second, &[0xAA]), Ok(1));
    }

    #[test]
    fn test_reopen_invalidates_old_handle() {
        let mut table = table();

        let old = table.open("COM1").unwrap();
        let new = table.open("COM1").unwrap();

        assert_eq!(table.open_count(), 1);
        assert!(!table.close(old));
        assert!(table.close(new));
    }
}
