//! gilrs-backed hardware input
//!
//! gilrs has no way to inject foreign events into its queue, so markers from
//! other threads travel over a separate channel and the wait loop polls gilrs
//! in short slices between checks of that channel.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Replay, Ticks};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs, MappingSource};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backend::{
    BackendError, BackendEvent, DeviceHandle, DeviceMode, HatMask, InputBackend, InstanceId,
    Marker, MarkerSink, OpenedDevice,
};

/// Axes in the order they are reported by index.
const AXES: [Axis; 6] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::LeftZ,
    Axis::RightStickX,
    Axis::RightStickY,
    Axis::RightZ,
];

/// Buttons in the order they are reported by index. The d-pad is reported
/// through hat 0 instead.
const BUTTONS: [Button; 15] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::Select,
    Button::Mode,
    Button::Start,
    Button::LeftThumb,
    Button::RightThumb,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::C,
    Button::Z,
];

fn axis_index(axis: Axis) -> Option<u8> {
    AXES.iter().position(|a| *a == axis).map(|i| i as u8)
}

fn button_index(button: Button) -> Option<u8> {
    BUTTONS.iter().position(|b| *b == button).map(|i| i as u8)
}

fn dpad_direction(button: Button) -> Option<HatMask> {
    match button {
        Button::DPadUp => Some(HatMask::UP),
        Button::DPadDown => Some(HatMask::DOWN),
        Button::DPadLeft => Some(HatMask::LEFT),
        Button::DPadRight => Some(HatMask::RIGHT),
        _ => None,
    }
}

/// Scales gilrs' normalized `-1.0..=1.0` range to the raw `i16` range.
fn to_raw(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

fn instance_id_of(id: GamepadId) -> InstanceId {
    usize::from(id) as InstanceId
}

pub struct GilrsBackend {
    gilrs: Gilrs,
    markers_tx: Sender<Marker>,
    markers_rx: Receiver<Marker>,
    poll_interval: Duration,

    // Gamepads gilrs has told us about, by instance id
    known: HashMap<InstanceId, GamepadId>,

    // D-pad state folded into a hat mask per gamepad
    hats: HashMap<InstanceId, HatMask>,

    // Running force feedback effect per open handle
    effects: HashMap<u64, Effect>,

    pending: VecDeque<BackendEvent>,
}

impl GilrsBackend {
    pub fn new(poll_interval: Duration) -> Result<Self, BackendError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(BackendError::InitializationError(e.to_string()));
            }
        };

        let (markers_tx, markers_rx) = unbounded();
        let mut backend = Self {
            gilrs,
            markers_tx,
            markers_rx,
            poll_interval,
            known: HashMap::new(),
            hats: HashMap::new(),
            effects: HashMap::new(),
            pending: VecDeque::new(),
        };

        // Gamepads present before startup are announced like hotplugged ones.
        let present: Vec<GamepadId> = backend.gilrs.gamepads().map(|(id, _)| id).collect();
        info!("Found {} gamepads", present.len());
        for id in present {
            let instance_id = instance_id_of(id);
            backend.known.insert(instance_id, id);
            backend.pending.push_back(BackendEvent::DeviceAdded {
                raw_index: instance_id,
            });
        }

        Ok(backend)
    }

    fn gamepad_id(&self, handle: &DeviceHandle) -> Option<GamepadId> {
        self.known.get(&(handle.raw() as InstanceId)).copied()
    }

    fn translate(&mut self, id: GamepadId, event: EventType) -> Option<BackendEvent> {
        let instance_id = instance_id_of(id);

        match event {
            EventType::Connected => {
                self.known.insert(instance_id, id);
                Some(BackendEvent::DeviceAdded {
                    raw_index: instance_id,
                })
            }
            EventType::Disconnected => {
                self.hats.remove(&instance_id);
                Some(BackendEvent::DeviceRemoved { instance_id })
            }
            EventType::ButtonPressed(button, _) | EventType::ButtonReleased(button, _) => {
                let pressed = matches!(event, EventType::ButtonPressed(..));
                if let Some(direction) = dpad_direction(button) {
                    let mask = self.hats.entry(instance_id).or_default();
                    mask.set(direction, pressed);
                    return Some(BackendEvent::HatMotion {
                        instance_id,
                        hat: 0,
                        mask: *mask,
                    });
                }

                let button = button_index(button)?;
                Some(if pressed {
                    BackendEvent::ButtonDown {
                        instance_id,
                        button,
                    }
                } else {
                    BackendEvent::ButtonUp {
                        instance_id,
                        button,
                    }
                })
            }
            EventType::AxisChanged(Axis::DPadX, value, _) => {
                let mask = self.hats.entry(instance_id).or_default();
                mask.set(HatMask::RIGHT, value > 0.5);
                mask.set(HatMask::LEFT, value < -0.5);
                Some(BackendEvent::HatMotion {
                    instance_id,
                    hat: 0,
                    mask: *mask,
                })
            }
            EventType::AxisChanged(Axis::DPadY, value, _) => {
                let mask = self.hats.entry(instance_id).or_default();
                mask.set(HatMask::UP, value > 0.5);
                mask.set(HatMask::DOWN, value < -0.5);
                Some(BackendEvent::HatMotion {
                    instance_id,
                    hat: 0,
                    mask: *mask,
                })
            }
            EventType::AxisChanged(axis, value, _) => {
                let axis = axis_index(axis)?;
                Some(BackendEvent::AxisMotion {
                    instance_id,
                    axis,
                    value: to_raw(value),
                })
            }
            other => {
                debug!("Unhandled gilrs event: {:?}", other);
                None
            }
        }
    }
}

impl InputBackend for GilrsBackend {
    fn open(&mut self, raw_index: u32) -> Result<OpenedDevice, BackendError> {
        let open_error = |reason: &str| BackendError::OpenError {
            raw_index,
            reason: reason.to_string(),
        };

        let id = *self
            .known
            .get(&raw_index)
            .ok_or_else(|| open_error("unknown gamepad"))?;
        let gamepad = self
            .gilrs
            .connected_gamepad(id)
            .ok_or_else(|| open_error("gamepad is not connected"))?;

        let mode = match gamepad.mapping_source() {
            MappingSource::None => DeviceMode::RawJoystick,
            _ => DeviceMode::Controller,
        };
        let axis_initial = AXES.iter().map(|axis| to_raw(gamepad.value(*axis))).collect();

        debug!(
            "Opened gamepad {} ({}), force feedback: {}",
            raw_index,
            gamepad.name(),
            gamepad.is_ff_supported()
        );

        Ok(OpenedDevice {
            handle: DeviceHandle::new(u64::from(raw_index)),
            instance_id: raw_index,
            name: gamepad.name().to_string(),
            mode,
            axis_initial,
            button_count: BUTTONS.len(),
            hat_count: 1,
        })
    }

    fn close(&mut self, handle: DeviceHandle, mode: DeviceMode) {
        debug!("Closing {} handle {}", mode.api_name(), handle.raw());
        self.effects.remove(&handle.raw());
        self.hats.remove(&(handle.raw() as InstanceId));
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> Option<BackendEvent> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
                if let Some(event) = self.translate(id, event) {
                    return Some(event);
                }
            }

            let slice = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    remaining.min(self.poll_interval)
                }
                None => self.poll_interval,
            };

            match self.markers_rx.recv_timeout(slice) {
                Ok(marker) => return Some(BackendEvent::Marker(marker)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn rumble(
        &mut self,
        handle: &DeviceHandle,
        low_intensity: u16,
        high_intensity: u16,
        duration_ms: u32,
    ) -> Result<(), BackendError> {
        let rumble_error = |reason: String| BackendError::RumbleError {
            handle: handle.raw(),
            reason,
        };

        // Dropping the previous effect stops it.
        self.effects.remove(&handle.raw());
        if low_intensity == 0 && high_intensity == 0 {
            return Ok(());
        }

        let id = self
            .gamepad_id(handle)
            .ok_or_else(|| rumble_error("unknown gamepad".to_string()))?;
        let scheduling = Replay {
            play_for: Ticks::from_ms(duration_ms),
            ..Default::default()
        };

        let effect = EffectBuilder::new()
            .add_effect(BaseEffect {
                kind: BaseEffectType::Strong {
                    magnitude: low_intensity,
                },
                scheduling,
                envelope: Default::default(),
            })
            .add_effect(BaseEffect {
                kind: BaseEffectType::Weak {
                    magnitude: high_intensity,
                },
                scheduling,
                envelope: Default::default(),
            })
            .gamepads(&[id])
            .finish(&mut self.gilrs)
            .map_err(|e| rumble_error(e.to_string()))?;
        effect.play().map_err(|e| rumble_error(e.to_string()))?;

        self.effects.insert(handle.raw(), effect);
        Ok(())
    }

    fn marker_sink(&self) -> Arc<dyn MarkerSink> {
        Arc::new(GilrsMarkerSink {
            markers: self.markers_tx.clone(),
        })
    }

    fn shutdown(&mut self) {
        info!("Shutting down gilrs backend");
        if !self.effects.is_empty() {
            warn!("Dropping {} running rumble effect(s)", self.effects.len());
        }
        self.effects.clear();
        self.hats.clear();
        self.known.clear();
        self.pending.clear();
    }
}

struct GilrsMarkerSink {
    markers: Sender<Marker>,
}

impl MarkerSink for GilrsMarkerSink {
    fn push(&self, marker: Marker) -> Result<(), BackendError> {
        self.markers
            .send(marker)
            .map_err(|_| BackendError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_values_scale_to_i16() {
        assert_eq!(to_raw(0.0), 0);
        assert_eq!(to_raw(1.0), 32767);
        assert_eq!(to_raw(-1.0), -32767);
        assert_eq!(to_raw(4.0), 32767);
    }

    #[test]
    fn dpad_buttons_are_not_indexed() {
        assert_eq!(button_index(Button::DPadUp), None);
        assert_eq!(dpad_direction(Button::DPadLeft), Some(HatMask::LEFT));
        assert_eq!(button_index(Button::South), Some(0));
        assert_eq!(axis_index(Axis::RightZ), Some(5));
    }
}
