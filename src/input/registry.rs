//! Device registry
//!
//! Arena of open devices keyed by backend instance id. Lives on the input
//! thread; other threads only ever see it through submitted closures.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::backend::{DeviceHandle, DeviceMode, HatMask, InputBackend, InstanceId, OpenedDevice};
use super::discretizer::{self, DiscreteAxisEvent, DiscreteHatEvent};

/// Calibration and last-seen value of a single analog axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axis {
    initial: i16,
    pub(crate) last: i16,
}

impl Axis {
    pub fn new(initial: i16) -> Self {
        Self {
            initial,
            last: initial,
        }
    }

    /// Center value captured when the device was opened.
    pub fn initial(&self) -> i16 {
        self.initial
    }

    pub fn last(&self) -> i16 {
        self.last
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hat {
    pub(crate) state: HatMask,
}

impl Hat {
    pub fn state(&self) -> HatMask {
        self.state
    }
}

/// An open device and everything the manager tracks about it.
#[derive(Debug)]
pub struct Device {
    slot: usize,
    instance_id: InstanceId,
    name: String,
    mode: DeviceMode,
    pub(crate) axes: Vec<Axis>,
    pub(crate) hats: Vec<Hat>,
    pub(crate) buttons: Vec<bool>,
    handle: DeviceHandle,
}

impl Device {
    /// Takes over a freshly opened device under `slot`. Every axis starts at
    /// its calibrated center.
    pub fn from_opened(slot: usize, opened: OpenedDevice) -> Self {
        Self {
            slot,
            instance_id: opened.instance_id,
            name: opened.name,
            mode: opened.mode,
            axes: opened.axis_initial.into_iter().map(Axis::new).collect(),
            hats: vec![Hat::default(); opened.hat_count],
            buttons: vec![false; opened.button_count],
            handle: opened.handle,
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn is_controller(&self) -> bool {
        self.mode == DeviceMode::Controller
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn hats(&self) -> &[Hat] {
        &self.hats
    }

    pub fn buttons(&self) -> &[bool] {
        &self.buttons
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Records a button transition. Out-of-range indices are ignored.
    pub fn set_button(&mut self, button: usize, pressed: bool) {
        match self.buttons.get_mut(button) {
            Some(state) => *state = pressed,
            None => debug!(
                "Button {} out of range for device {} ({} buttons)",
                button,
                self.instance_id,
                self.buttons.len()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("No open device with instance id {0}")]
    LookupMiss(InstanceId),
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<InstanceId, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the device at `raw_index` and registers it under its instance id.
    ///
    /// A failed open leaves the registry untouched and surfaces nothing to
    /// subscribers. Returns the device only when it was newly registered; an
    /// instance id that is already open keeps its entry and yields `None`.
    pub fn add_device(
        &mut self,
        backend: &mut dyn InputBackend,
        raw_index: u32,
    ) -> Option<&Device> {
        let opened = match backend.open(raw_index) {
            Ok(opened) => opened,
            Err(e) => {
                debug!("Ignoring device at index {}: {}", raw_index, e);
                return None;
            }
        };
        let instance_id = opened.instance_id;

        if self.devices.contains_key(&instance_id) {
            warn!(
                "Device {} is already open, releasing duplicate handle",
                instance_id
            );
            backend.close(opened.handle, opened.mode);
            return None;
        }

        let slot = self.find_first_open_slot();
        let device = Device::from_opened(slot, opened);

        info!(
            "Slot {}: {}: {} axes, {} buttons, {} hats, {} API",
            slot,
            device.name(),
            device.axes.len(),
            device.buttons.len(),
            device.hats.len(),
            device.mode().api_name()
        );

        Some(self.devices.entry(instance_id).or_insert(device))
    }

    /// Closes and forgets a device. Unknown ids are ignored. Returns the
    /// slot that was freed.
    pub fn remove_device(
        &mut self,
        backend: &mut dyn InputBackend,
        instance_id: InstanceId,
    ) -> Option<usize> {
        let device = self.devices.remove(&instance_id)?;
        let slot = device.slot;
        info!("Slot {}: {} removed", slot, device.name);
        backend.close(device.handle, device.mode);
        Some(slot)
    }

    /// Closes every open device, lowest slot first.
    pub fn close_all(&mut self, backend: &mut dyn InputBackend) {
        let mut devices: Vec<Device> = std::mem::take(&mut self.devices).into_values().collect();
        devices.sort_by_key(Device::slot);
        for device in devices {
            debug!("Slot {}: closing {}", device.slot, device.name);
            backend.close(device.handle, device.mode);
        }
    }

    /// Mutable access to a device the caller knows is open.
    pub fn lookup(&mut self, instance_id: InstanceId) -> Result<&mut Device, RegistryError> {
        self.devices
            .get_mut(&instance_id)
            .ok_or(RegistryError::LookupMiss(instance_id))
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<&Device> {
        self.devices.get(&instance_id)
    }

    /// Smallest non-negative slot not held by an open device.
    pub fn find_first_open_slot(&self) -> usize {
        (0..)
            .find(|candidate| self.devices.values().all(|d| d.slot != *candidate))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices ordered by instance id.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Device> {
        self.devices.values().filter(|d| d.is_controller())
    }

    /// `(instance id, display name)` of every open controller-mode device.
    pub fn controller_devices(&self) -> Vec<(InstanceId, String)> {
        self.controllers()
            .map(|d| (d.instance_id, d.name.clone()))
            .collect()
    }

    pub fn discretize_axis(
        &mut self,
        instance_id: InstanceId,
        axis: usize,
        value: i16,
    ) -> Result<Option<DiscreteAxisEvent>, RegistryError> {
        let device = self.lookup(instance_id)?;
        Ok(discretizer::discretize_axis(device, axis, value))
    }

    pub fn discretize_hat(
        &mut self,
        instance_id: InstanceId,
        hat: usize,
        mask: HatMask,
    ) -> Result<Option<DiscreteHatEvent>, RegistryError> {
        let device = self.lookup(instance_id)?;
        Ok(discretizer::discretize_hat(device, hat, mask))
    }
}
