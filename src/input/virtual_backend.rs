//! In-process backend driven from another thread
//!
//! [`VirtualBackend`] behaves like a platform backend from the event loop's
//! point of view, but its devices and raw events come from a
//! [`VirtualDeviceFeed`] instead of hardware. Useful for tests, replays and
//! running the manager on machines without controllers.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::backend::{
    BackendError, BackendEvent, DeviceHandle, DeviceMode, HatMask, InputBackend, InstanceId,
    Marker, MarkerSink, OpenedDevice,
};

/// Description of a device the feed can plug in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDeviceSpec {
    pub instance_id: InstanceId,
    pub name: String,
    pub mode: DeviceMode,
    pub axis_initial: Vec<i16>,
    pub button_count: usize,
    pub hat_count: usize,
}

impl VirtualDeviceSpec {
    /// A typical dual-stick gamepad: six centered axes, fifteen buttons and
    /// one hat.
    pub fn gamepad(instance_id: InstanceId, name: impl Into<String>) -> Self {
        Self {
            instance_id,
            name: name.into(),
            mode: DeviceMode::Controller,
            axis_initial: vec![0; 6],
            button_count: 15,
            hat_count: 1,
        }
    }

    pub fn joystick(instance_id: InstanceId, name: impl Into<String>) -> Self {
        Self {
            instance_id,
            name: name.into(),
            mode: DeviceMode::RawJoystick,
            axis_initial: vec![0; 3],
            button_count: 12,
            hat_count: 1,
        }
    }
}

/// One rumble actuation as seen by the virtual backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RumbleCommand {
    pub instance_id: InstanceId,
    pub low_intensity: u16,
    pub high_intensity: u16,
    pub duration_ms: u32,
    pub at: Instant,
}

impl RumbleCommand {
    pub fn is_stop(&self) -> bool {
        self.low_intensity == 0 && self.high_intensity == 0 && self.duration_ms == 0
    }
}

#[derive(Debug, Default)]
struct SharedState {
    catalog: HashMap<u32, VirtualDeviceSpec>,
    rumble_log: Vec<RumbleCommand>,
    closed: Vec<InstanceId>,
}

fn lock(state: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct VirtualBackend {
    events_tx: Sender<BackendEvent>,
    events_rx: Receiver<BackendEvent>,
    shared: Arc<Mutex<SharedState>>,
    open: HashMap<u64, InstanceId>,
    next_handle: u64,
    shut_down: Arc<AtomicBool>,
}

impl VirtualBackend {
    pub fn new() -> (Self, VirtualDeviceFeed) {
        let (events_tx, events_rx) = unbounded();
        let shared = Arc::new(Mutex::new(SharedState::default()));
        let shut_down = Arc::new(AtomicBool::new(false));

        let feed = VirtualDeviceFeed {
            events: events_tx.clone(),
            shared: shared.clone(),
            shut_down: shut_down.clone(),
        };

        let backend = Self {
            events_tx,
            events_rx,
            shared,
            open: HashMap::new(),
            next_handle: 1,
            shut_down,
        };

        (backend, feed)
    }
}

impl InputBackend for VirtualBackend {
    fn open(&mut self, raw_index: u32) -> Result<OpenedDevice, BackendError> {
        let spec = lock(&self.shared)
            .catalog
            .get(&raw_index)
            .cloned()
            .ok_or_else(|| BackendError::OpenError {
                raw_index,
                reason: "no virtual device registered at this index".to_string(),
            })?;

        let handle = DeviceHandle::new(self.next_handle);
        self.next_handle += 1;
        self.open.insert(handle.raw(), spec.instance_id);
        debug!("Opened virtual device {} as handle {}", spec.instance_id, handle.raw());

        Ok(OpenedDevice {
            handle,
            instance_id: spec.instance_id,
            name: spec.name,
            mode: spec.mode,
            axis_initial: spec.axis_initial,
            button_count: spec.button_count,
            hat_count: spec.hat_count,
        })
    }

    fn close(&mut self, handle: DeviceHandle, mode: DeviceMode) {
        if let Some(instance_id) = self.open.remove(&handle.raw()) {
            debug!("Closing virtual {} {}", mode.api_name(), instance_id);
            lock(&self.shared).closed.push(instance_id);
        }
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> Option<BackendEvent> {
        match timeout {
            None => self.events_rx.recv().ok(),
            Some(timeout) => match self.events_rx.recv_timeout(timeout) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    fn rumble(
        &mut self,
        handle: &DeviceHandle,
        low_intensity: u16,
        high_intensity: u16,
        duration_ms: u32,
    ) -> Result<(), BackendError> {
        let instance_id =
            *self
                .open
                .get(&handle.raw())
                .ok_or_else(|| BackendError::RumbleError {
                    handle: handle.raw(),
                    reason: "handle is not open".to_string(),
                })?;

        lock(&self.shared).rumble_log.push(RumbleCommand {
            instance_id,
            low_intensity,
            high_intensity,
            duration_ms,
            at: Instant::now(),
        });
        Ok(())
    }

    fn marker_sink(&self) -> Arc<dyn MarkerSink> {
        Arc::new(VirtualMarkerSink {
            events: self.events_tx.clone(),
        })
    }

    fn shutdown(&mut self) {
        info!("Shutting down virtual backend ({} handles open)", self.open.len());
        let mut shared = lock(&self.shared);
        for (_, instance_id) in self.open.drain() {
            shared.closed.push(instance_id);
        }
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

struct VirtualMarkerSink {
    events: Sender<BackendEvent>,
}

impl MarkerSink for VirtualMarkerSink {
    fn push(&self, marker: Marker) -> Result<(), BackendError> {
        self.events
            .send(BackendEvent::Marker(marker))
            .map_err(|_| BackendError::Disconnected)
    }
}

/// Producer side of a [`VirtualBackend`].
#[derive(Clone)]
pub struct VirtualDeviceFeed {
    events: Sender<BackendEvent>,
    shared: Arc<Mutex<SharedState>>,
    shut_down: Arc<AtomicBool>,
}

impl VirtualDeviceFeed {
    /// Makes `spec` openable at `raw_index` without announcing it.
    pub fn register(&self, raw_index: u32, spec: VirtualDeviceSpec) {
        lock(&self.shared).catalog.insert(raw_index, spec);
    }

    /// Registers `spec` and announces it to the loop.
    pub fn plug(&self, raw_index: u32, spec: VirtualDeviceSpec) {
        self.register(raw_index, spec);
        self.send(BackendEvent::DeviceAdded { raw_index });
    }

    /// Announces a device at `raw_index`; opening fails unless something was
    /// registered there.
    pub fn announce(&self, raw_index: u32) {
        self.send(BackendEvent::DeviceAdded { raw_index });
    }

    pub fn unplug(&self, instance_id: InstanceId) {
        self.send(BackendEvent::DeviceRemoved { instance_id });
    }

    pub fn axis(&self, instance_id: InstanceId, axis: u8, value: i16) {
        self.send(BackendEvent::AxisMotion {
            instance_id,
            axis,
            value,
        });
    }

    pub fn hat(&self, instance_id: InstanceId, hat: u8, mask: HatMask) {
        self.send(BackendEvent::HatMotion {
            instance_id,
            hat,
            mask,
        });
    }

    pub fn button(&self, instance_id: InstanceId, button: u8, pressed: bool) {
        if pressed {
            self.send(BackendEvent::ButtonDown {
                instance_id,
                button,
            });
        } else {
            self.send(BackendEvent::ButtonUp {
                instance_id,
                button,
            });
        }
    }

    pub fn quit(&self) {
        self.send(BackendEvent::Quit);
    }

    pub fn send(&self, event: BackendEvent) {
        if self.events.send(event).is_err() {
            debug!("Virtual backend is gone, dropping event");
        }
    }

    pub fn rumble_log(&self) -> Vec<RumbleCommand> {
        lock(&self.shared).rumble_log.clone()
    }

    pub fn closed_devices(&self) -> Vec<InstanceId> {
        lock(&self.shared).closed.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
