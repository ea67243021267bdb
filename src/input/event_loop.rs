use statum::{machine, state};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::backend::{BackendError, BackendEvent, InputBackend, InstanceId, Marker, MarkerSink};
use super::command::{Mailbox, RumbleParams};
use super::event::{EventSubscriber, InputEvent, UNRESOLVED_SLOT};
use super::manager_handle::InputSettings;
use super::registry::DeviceRegistry;

/// How the loop waits for the next backend event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    WaitIndefinite,
    /// A rumble is running and must be stopped at the deadline.
    WaitWithDeadline(Instant),
}

impl WaitState {
    /// Timeout to hand to the backend, `None` meaning "block forever".
    pub fn timeout(&self, now: Instant) -> Option<Duration> {
        match self {
            WaitState::WaitIndefinite => None,
            WaitState::WaitWithDeadline(deadline) => Some(deadline.saturating_duration_since(now)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Terminate,
}

#[state]
#[derive(Debug, Clone)]
pub enum LoopState {
    Initializing,
    Running,
}

#[machine]
pub struct InputLoop<S: LoopState> {
    // Platform layer, created on this thread
    backend: Box<dyn InputBackend>,

    // Open devices, only ever touched from this thread
    registry: DeviceRegistry,

    subscribers: Vec<Box<dyn EventSubscriber>>,

    // Commands left by other threads
    mailbox: Arc<Mailbox>,

    settings: InputSettings,

    wait: WaitState,

    // Backend events handled so far
    event_count: u64,
}

impl<S: LoopState> InputLoop<S> {
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn wait_state(&self) -> WaitState {
        self.wait
    }
}

impl InputLoop<Initializing> {
    /// Builds the backend through `factory`. Must run on the thread that will
    /// drive the loop.
    pub fn create<B, F>(
        factory: F,
        subscribers: Vec<Box<dyn EventSubscriber>>,
        mailbox: Arc<Mailbox>,
        settings: InputSettings,
    ) -> Result<Self, BackendError>
    where
        B: InputBackend + 'static,
        F: FnOnce() -> Result<B, BackendError>,
    {
        debug!("Creating input loop with settings: {:?}", settings);

        info!("Initializing input backend");
        let backend = match factory() {
            Ok(backend) => {
                info!("Successfully initialized input backend");
                backend
            }
            Err(e) => {
                error!("Failed to initialize input backend: {}", e);
                return Err(e);
            }
        };

        Ok(Self::new(
            Box::new(backend),
            DeviceRegistry::new(),
            subscribers,
            mailbox,
            settings,
            WaitState::WaitIndefinite,
            0,
        ))
    }

    pub fn initialize(self) -> InputLoop<Running> {
        info!(
            "Input loop initialized with {} subscriber(s), transitioning to Running state",
            self.subscribers.len()
        );
        self.transition()
    }
}

impl InputLoop<Running> {
    pub fn marker_sink(&self) -> Arc<dyn MarkerSink> {
        self.backend.marker_sink()
    }

    /// Runs until a quit request arrives, then releases every backend
    /// resource.
    pub fn run(mut self) {
        info!("Starting input loop");

        loop {
            let Some(event) = self.next_event() else {
                continue;
            };
            self.event_count += 1;

            if self.handle_event(event) == LoopControl::Terminate {
                break;
            }
        }

        self.terminate();
    }

    /// Waits for the next backend event. Returns `None` when a rumble
    /// deadline passed first; the rumble has been stopped by then.
    fn next_event(&mut self) -> Option<BackendEvent> {
        match self.wait.timeout(Instant::now()) {
            None => match self.backend.wait_event(None) {
                Some(event) => Some(event),
                None => {
                    error!("Backend event stream ended, shutting down input loop");
                    Some(BackendEvent::Quit)
                }
            },
            Some(timeout) => {
                let event = self.backend.wait_event(Some(timeout));
                if event.is_none() {
                    debug!("Rumble deadline reached");
                    self.stop_rumble();
                }
                event
            }
        }
    }

    fn handle_event(&mut self, event: BackendEvent) -> LoopControl {
        match event {
            BackendEvent::AxisMotion {
                instance_id,
                axis,
                value,
            } => {
                let slot = self.motion_slot(instance_id);
                self.publish(
                    InputEvent::AxisMotion {
                        instance_id,
                        axis,
                        value,
                    },
                    slot,
                );
            }
            BackendEvent::HatMotion {
                instance_id,
                hat,
                mask,
            } => {
                let slot = self.motion_slot(instance_id);
                self.publish(
                    InputEvent::HatMotion {
                        instance_id,
                        hat,
                        mask,
                    },
                    slot,
                );
            }
            BackendEvent::ButtonDown {
                instance_id,
                button,
            } => self.handle_button(instance_id, button, true),
            BackendEvent::ButtonUp {
                instance_id,
                button,
            } => self.handle_button(instance_id, button, false),
            BackendEvent::DeviceAdded { raw_index } => {
                let added = self
                    .registry
                    .add_device(self.backend.as_mut(), raw_index)
                    .map(|device| device.instance_id());
                if let Some(instance_id) = added {
                    self.publish(
                        InputEvent::DeviceAdded {
                            raw_index,
                            instance_id,
                        },
                        UNRESOLVED_SLOT,
                    );
                }
            }
            BackendEvent::DeviceRemoved { instance_id } => {
                self.registry
                    .remove_device(self.backend.as_mut(), instance_id);
                self.publish(InputEvent::DeviceRemoved { instance_id }, UNRESOLVED_SLOT);
            }
            BackendEvent::Quit | BackendEvent::Marker(Marker::Quit) => {
                info!("Quit requested");
                return LoopControl::Terminate;
            }
            BackendEvent::Marker(Marker::Work) => self.run_pending_job(),
            BackendEvent::Marker(Marker::Rumble) => self.start_rumble(),
            BackendEvent::Other(kind) => trace!("Ignoring backend event kind {}", kind),
        }

        LoopControl::Continue
    }

    fn handle_button(&mut self, instance_id: InstanceId, button: u8, pressed: bool) {
        let slot = match self.registry.lookup(instance_id) {
            Ok(device) => {
                device.set_button(usize::from(button), pressed);
                device.slot()
            }
            Err(e) => {
                error!("Dropping button {} event: {}", button, e);
                return;
            }
        };

        let event = if pressed {
            InputEvent::ButtonDown {
                instance_id,
                button,
            }
        } else {
            InputEvent::ButtonUp {
                instance_id,
                button,
            }
        };
        self.publish(event, slot);
    }

    fn motion_slot(&self, instance_id: InstanceId) -> usize {
        if !self.settings.resolve_motion_slots {
            return UNRESOLVED_SLOT;
        }
        self.registry
            .get(instance_id)
            .map(|device| device.slot())
            .unwrap_or(UNRESOLVED_SLOT)
    }

    fn publish(&mut self, event: InputEvent, slot: usize) {
        trace!("Dispatching {:?} (slot {})", event, slot);
        for subscriber in self.subscribers.iter_mut() {
            subscriber.on_event(&event, slot);
        }
    }

    fn run_pending_job(&mut self) {
        match self.mailbox.take_job() {
            Some(job) => job(&mut self.registry),
            None => debug!("Work marker without pending closure"),
        }
    }

    fn start_rumble(&mut self) {
        let Some(params) = self.mailbox.take_rumble() else {
            debug!("Rumble marker without pending parameters");
            return;
        };

        debug!(
            "Rumble {}/{} for {}ms",
            params.low_intensity, params.high_intensity, params.duration_ms
        );
        self.actuate_controllers(params);
        self.wait = WaitState::WaitWithDeadline(
            Instant::now() + Duration::from_millis(u64::from(params.duration_ms)),
        );
    }

    fn stop_rumble(&mut self) {
        self.actuate_controllers(RumbleParams::STOP);
        self.wait = WaitState::WaitIndefinite;
    }

    fn actuate_controllers(&mut self, params: RumbleParams) {
        for device in self.registry.controllers() {
            if let Err(e) = self.backend.rumble(
                device.handle(),
                params.low_intensity,
                params.high_intensity,
                params.duration_ms,
            ) {
                warn!("Rumble failed on slot {}: {}", device.slot(), e);
            }
        }
    }

    fn terminate(mut self) {
        if matches!(self.wait, WaitState::WaitWithDeadline(_))
            && self.settings.stop_rumble_on_shutdown
        {
            self.stop_rumble();
        }

        self.registry.close_all(self.backend.as_mut());
        self.backend.shutdown();
        self.mailbox.close();
        info!(
            "Input loop terminated after {} backend events",
            self.event_count
        );
    }
}
