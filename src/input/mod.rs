//! Input subsystem for game controllers and joysticks
//!
//! One thread owns the platform backend and every open device:
//!
//! 1. [`backend`] - Platform seam: handles, raw events, rumble, wake-up markers
//! 2. [`registry`] - Open devices keyed by instance id, with compact slots
//! 3. [`discretizer`] - Analog and hat state to press/release edges
//! 4. [`event_loop`] - The input thread itself
//! 5. [`command`] - Mailbox for work submitted from other threads
//! 6. [`manager_handle`] - Unified API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! Backend ──► InputLoop ──► Registry ──► Subscribers
//!                 ▲
//! Other threads ──┴── Mailbox + Marker (submit / rumble / stop)
//! ```

pub mod backend;
pub mod command;
pub mod discretizer;
pub mod event;
pub mod event_loop;
#[cfg(feature = "gilrs")]
pub mod gilrs_backend;
pub mod manager_handle;
pub mod registry;
pub mod virtual_backend;

pub use backend::{
    BackendError, BackendEvent, DeviceHandle, DeviceMode, HatMask, InputBackend, InstanceId,
    Marker, MarkerSink, OpenedDevice,
};
pub use command::{CommandChannel, CommandError, RumbleParams};
pub use discretizer::{DiscreteAxisEvent, DiscreteHatEvent, HatDirection};
pub use event::{
    bounded_channel_subscriber, channel_subscriber, crossbeam_subscriber, EventSubscriber,
    InputEvent, SlotEvent, UNRESOLVED_SLOT,
};
pub use event_loop::WaitState;
#[cfg(feature = "gilrs")]
pub use gilrs_backend::GilrsBackend;
pub use manager_handle::{
    DiscreteEvent, InputManager, InputManagerBuilder, InputSettings, ManagerError,
};
pub use registry::{Device, DeviceRegistry, RegistryError};
pub use virtual_backend::{RumbleCommand, VirtualBackend, VirtualDeviceFeed, VirtualDeviceSpec};
