//! Platform backend seam
//!
//! The event loop never talks to hardware directly. Everything it needs from
//! the platform goes through [`InputBackend`]: opening and closing device
//! handles, blocking on the next raw event, actuating rumble, and tearing the
//! platform layer down again. Other threads reach the loop only through the
//! backend's [`MarkerSink`], which injects payload-free [`Marker`] events into
//! the same stream the hardware events arrive on.

use std::ops::BitOr;
use std::sync::Arc;
use std::time::Duration;

/// Backend-stable identifier of an open device.
pub type InstanceId = u32;

/// How a device was opened by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Plain joystick API, no controller mapping available.
    RawJoystick,
    /// Mapped game controller; the only mode that receives rumble.
    Controller,
}

impl DeviceMode {
    pub fn api_name(&self) -> &'static str {
        match self {
            DeviceMode::RawJoystick => "Joystick",
            DeviceMode::Controller => "Controller",
        }
    }
}

/// Exclusively owned reference to an open backend device.
///
/// Deliberately neither `Clone` nor `Copy`: the registry holds the only
/// instance and hands it back to [`InputBackend::close`] on removal.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceHandle(u64);

impl DeviceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Directional bitmask reported by a hat switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HatMask(u8);

impl HatMask {
    pub const CENTERED: HatMask = HatMask(0x00);
    pub const UP: HatMask = HatMask(0x01);
    pub const RIGHT: HatMask = HatMask(0x02);
    pub const DOWN: HatMask = HatMask(0x04);
    pub const LEFT: HatMask = HatMask(0x08);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn contains(&self, other: HatMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: HatMask, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl BitOr for HatMask {
    type Output = HatMask;

    fn bitor(self, rhs: HatMask) -> HatMask {
        HatMask(self.0 | rhs.0)
    }
}

/// Everything the registry needs to know about a freshly opened device.
#[derive(Debug)]
pub struct OpenedDevice {
    pub handle: DeviceHandle,
    pub instance_id: InstanceId,
    pub name: String,
    pub mode: DeviceMode,
    /// Axis values observed at open time, one per axis.
    pub axis_initial: Vec<i16>,
    pub button_count: usize,
    pub hat_count: usize,
}

/// Loop wake-up signals. They carry no device payload; the actual command
/// data waits in the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Work,
    Rumble,
    Quit,
}

/// Raw events as delivered by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    AxisMotion {
        instance_id: InstanceId,
        axis: u8,
        value: i16,
    },
    HatMotion {
        instance_id: InstanceId,
        hat: u8,
        mask: HatMask,
    },
    ButtonDown {
        instance_id: InstanceId,
        button: u8,
    },
    ButtonUp {
        instance_id: InstanceId,
        button: u8,
    },
    /// A device became available at the given enumeration index.
    DeviceAdded { raw_index: u32 },
    DeviceRemoved { instance_id: InstanceId },
    /// Platform-level quit request.
    Quit,
    Marker(Marker),
    /// Backend-specific event kind the loop has no use for.
    Other(u32),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to initialize input backend: {0}")]
    InitializationError(String),

    #[error("Failed to open device at index {raw_index}: {reason}")]
    OpenError { raw_index: u32, reason: String },

    #[error("Failed to actuate rumble on handle {handle}: {reason}")]
    RumbleError { handle: u64, reason: String },

    #[error("Backend event stream is closed")]
    Disconnected,
}

/// Thread-safe injector for loop markers.
pub trait MarkerSink: Send + Sync {
    fn push(&self, marker: Marker) -> Result<(), BackendError>;
}

/// The platform input layer, owned exclusively by the input thread.
///
/// Implementations need not be `Send`; they are constructed on the input
/// thread itself.
pub trait InputBackend {
    /// Opens the device at enumeration index `raw_index`.
    fn open(&mut self, raw_index: u32) -> Result<OpenedDevice, BackendError>;

    /// Releases a handle previously returned by [`InputBackend::open`].
    fn close(&mut self, handle: DeviceHandle, mode: DeviceMode);

    /// Blocks until the next event arrives. With `Some(timeout)` this returns
    /// `None` once the timeout elapses without an event.
    fn wait_event(&mut self, timeout: Option<Duration>) -> Option<BackendEvent>;

    /// Actuates rumble on a controller. All-zero parameters stop it.
    fn rumble(
        &mut self,
        handle: &DeviceHandle,
        low_intensity: u16,
        high_intensity: u16,
        duration_ms: u32,
    ) -> Result<(), BackendError>;

    fn marker_sink(&self) -> Arc<dyn MarkerSink>;

    /// Releases all platform resources. Called once, right before the input
    /// thread exits.
    fn shutdown(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hat_mask_set_and_contains() {
        let mut mask = HatMask::UP | HatMask::RIGHT;
        assert!(mask.contains(HatMask::UP));
        assert!(mask.contains(HatMask::RIGHT));
        assert!(!mask.contains(HatMask::DOWN));

        mask.set(HatMask::UP, false);
        mask.set(HatMask::LEFT, true);
        assert_eq!(mask, HatMask::RIGHT | HatMask::LEFT);
        assert_eq!(mask.bits(), 0x0a);
    }
}
