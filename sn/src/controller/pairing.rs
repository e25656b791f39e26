//! Sensor/actuator pairing queue
//!
//! Two FIFO waiting lists of unpaired devices. A newly registered device takes the
//! head of the opposite kind's list if there is one, otherwise it waits its turn.

use std::collections::VecDeque;

use tracing::debug;

use super::registry::{DeviceIndex, Registry};
use crate::channel::DeviceKind;

/// Result of offering a device for pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Linked with the longest-waiting device of the opposite kind
    Paired { sensor: DeviceIndex, actuator: DeviceIndex },

    /// No partner available; waiting at `position` (0 is next in line)
    Queued { kind: DeviceKind, position: usize },
}

/// Waiting lists of unpaired sensors and actuators
#[derive(Debug, Default)]
pub struct PairingQueue {
    waiting_sensors: VecDeque<DeviceIndex>,
    waiting_actuators: VecDeque<DeviceIndex>,
}

impl PairingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair the device at `index` or queue it
    ///
    /// Returns `None` if `index` is not in the registry. A device that is already
    /// paired or already waiting is left where it is.
    pub fn offer(&mut self, registry: &mut Registry, index: DeviceIndex) -> Option<PairingOutcome> {
        let device = registry.get(index)?;
        let kind = device.kind;
        debug!(index, %kind, "PairingQueue::offer: called");

        if let Some(partner) = device.partner {
            debug!(index, partner, "PairingQueue::offer: already paired");
            return Some(paired(kind, index, partner));
        }

        if let Some(position) = self.waiting(kind).iter().position(|&i| i == index) {
            debug!(index, position, "PairingQueue::offer: already waiting");
            return Some(PairingOutcome::Queued { kind, position });
        }

        match self.waiting_mut(kind.opposite()).pop_front() {
            Some(partner) => {
                registry.link_pair(kind, index, partner);
                let outcome = paired(kind, index, partner);
                debug!(?outcome, "PairingQueue::offer: paired");
                Some(outcome)
            }
            None => {
                let waiting = self.waiting_mut(kind);
                waiting.push_back(index);
                let position = waiting.len() - 1;
                debug!(index, position, "PairingQueue::offer: queued");
                Some(PairingOutcome::Queued { kind, position })
            }
        }
    }

    /// Devices of `kind` waiting for a partner, longest-waiting first
    pub fn waiting(&self, kind: DeviceKind) -> &VecDeque<DeviceIndex> {
        match kind {
            DeviceKind::Sensor => &self.waiting_sensors,
            DeviceKind::Actuator => &self.waiting_actuators,
        }
    }

    fn waiting_mut(&mut self, kind: DeviceKind) -> &mut VecDeque<DeviceIndex> {
        match kind {
            DeviceKind::Sensor => &mut self.waiting_sensors,
            DeviceKind::Actuator => &mut self.waiting_actuators,
        }
    }

    pub fn is_waiting(&self, index: DeviceIndex) -> bool {
        self.waiting_sensors.contains(&index) || self.waiting_actuators.contains(&index)
    }

    /// Drop both waiting lists and their storage
    pub fn release(&mut self) {
        debug!(
            sensors = self.waiting_sensors.len(),
            actuators = self.waiting_actuators.len(),
            "PairingQueue::release: called"
        );
        self.waiting_sensors = VecDeque::new();
        self.waiting_actuators = VecDeque::new();
    }

    /// True once [`release`](Self::release) ran or nothing was ever queued
    pub fn is_released(&self) -> bool {
        self.waiting_sensors.capacity() == 0 && self.waiting_actuators.capacity() == 0
    }
}

fn paired(kind: DeviceKind, index: DeviceIndex, partner: DeviceIndex) -> PairingOutcome {
    match kind {
        DeviceKind::Sensor => PairingOutcome::Paired {
            sensor: index,
            actuator: partner,
        },
        DeviceKind::Actuator => PairingOutcome::Paired {
            sensor: partner,
            actuator: index,
        },
    }
}

impl Registry {
    /// Link `index` of `kind` with `partner` of the opposite kind
    fn link_pair(&mut self, kind: DeviceKind, index: DeviceIndex, partner: DeviceIndex) {
        match kind {
            DeviceKind::Sensor => self.link(index, partner),
            DeviceKind::Actuator => self.link(partner, index),
        }
    }
}
