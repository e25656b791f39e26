//! Device registry
//!
//! Bounded table of every device that has introduced itself, in arrival order.
//! Indices are stable for the controller's lifetime since entries are never removed.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::channel::{DeviceKind, DeviceSnapshot, Identity};

/// Position of a device in the registry
pub type DeviceIndex = usize;

/// Default number of devices the registry accepts
pub const DEFAULT_CAPACITY: usize = 64;

/// Largest capacity a configuration may ask for
pub const MAX_CAPACITY: usize = 65_536;

/// Errors from registry operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry full: capacity is {0} devices")]
    Full(usize),
}

/// A registered device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub identity: Identity,
    pub name: String,
    pub kind: DeviceKind,
    pub threshold: i32,
    /// Index of the paired device, if any
    pub partner: Option<DeviceIndex>,
}

impl Device {
    pub fn is_paired(&self) -> bool {
        self.partner.is_some()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            identity: self.identity,
            name: self.name.clone(),
            kind: self.kind,
            threshold: self.threshold,
        }
    }
}

/// Registry of devices keyed by identity
#[derive(Debug)]
pub struct Registry {
    devices: Vec<Device>,
    by_identity: HashMap<Identity, DeviceIndex>,
    capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl Registry {
    /// Create a registry that accepts at most `capacity` devices
    ///
    /// Storage grows as devices register.
    pub fn with_capacity(capacity: usize) -> Self {
        debug!(capacity, "Registry::with_capacity: called");
        Self {
            devices: Vec::new(),
            by_identity: HashMap::new(),
            capacity,
        }
    }

    /// Find the index of the device with `identity`
    pub fn lookup(&self, identity: Identity) -> Option<DeviceIndex> {
        self.by_identity.get(&identity).copied()
    }

    /// Append a new device
    ///
    /// An identity that is already registered keeps its entry and index; its
    /// attributes are not changed.
    pub fn register(
        &mut self,
        identity: Identity,
        name: impl Into<String>,
        kind: DeviceKind,
        threshold: i32,
    ) -> Result<DeviceIndex, RegistryError> {
        if let Some(index) = self.lookup(identity) {
            debug!(%identity, index, "Registry::register: already registered");
            return Ok(index);
        }

        if self.is_full() {
            debug!(%identity, capacity = self.capacity, "Registry::register: full");
            return Err(RegistryError::Full(self.capacity));
        }

        let index = self.devices.len();
        self.devices.push(Device {
            identity,
            name: name.into(),
            kind,
            threshold,
            partner: None,
        });
        self.by_identity.insert(identity, index);
        debug!(%identity, index, %kind, threshold, "Registry::register: added");
        Ok(index)
    }

    pub fn get(&self, index: DeviceIndex) -> Option<&Device> {
        self.devices.get(index)
    }

    /// Find the device with `identity`
    pub fn device(&self, identity: Identity) -> Option<&Device> {
        self.lookup(identity).and_then(|index| self.get(index))
    }

    /// Index and entry of the device with `identity`
    pub fn entry(&self, identity: Identity) -> Option<(DeviceIndex, &Device)> {
        let index = self.lookup(identity)?;
        self.devices.get(index).map(|device| (index, device))
    }

    /// The paired device of `index`, if any
    pub fn partner_of(&self, index: DeviceIndex) -> Option<&Device> {
        self.get(index)?.partner.and_then(|partner| self.get(partner))
    }

    /// Link two devices as partners
    pub(crate) fn link(&mut self, sensor: DeviceIndex, actuator: DeviceIndex) {
        debug!(sensor, actuator, "Registry::link: called");
        if let Some(device) = self.devices.get_mut(sensor) {
            device.partner = Some(actuator);
        }
        if let Some(device) = self.devices.get_mut(actuator) {
            device.partner = Some(sensor);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.devices.len() >= self.capacity
    }
}
