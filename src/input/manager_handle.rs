//! Input Manager Handle - Unified API for the input thread
//!
//! Spawns the single input thread that owns the platform backend and the
//! device registry, and exposes the command surface other threads use to
//! reach it: synchronous closure submission, fire-and-forget rumble and a
//! blocking, terminal stop.
//!

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use super::backend::{BackendError, InputBackend, InstanceId, MarkerSink};
use super::command::{CommandChannel, CommandError, Mailbox};
use super::discretizer::{DiscreteAxisEvent, DiscreteHatEvent};
use super::event::{EventSubscriber, InputEvent};
use super::event_loop::{Initializing, InputLoop};
use super::registry::{DeviceRegistry, RegistryError};

/// Configuration settings for the input thread
///
/// # Examples
///
/// ```rust
/// use padhub::input::InputSettings;
///
/// // Tag axis and hat motion with the owning device's slot
/// let settings = InputSettings {
///     resolve_motion_slots: true,
///     ..InputSettings::default()
/// };
/// assert_eq!(settings.poll_interval_ms, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Forward axis and hat motion with the device's slot instead of slot 0
    ///
    /// Off by default, in which case only button events carry the resolved
    /// slot.
    pub resolve_motion_slots: bool,

    /// Polling slice in milliseconds for backends without a native blocking
    /// wait (gilrs)
    ///
    /// Bounds the latency of commands from other threads. Lower values wake
    /// the input thread more often.
    pub poll_interval_ms: u64,

    /// Stop a running rumble effect before tearing the backend down
    pub stop_rumble_on_shutdown: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            resolve_motion_slots: false,
            poll_interval_ms: 4,
            stop_rumble_on_shutdown: true,
        }
    }
}

/// Errors that can occur while starting or talking to the input thread
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The backend could not be initialized; the loop never ran
    #[error("Backend error: {0}")]
    BackendError(#[from] BackendError),

    /// A command could not be delivered or completed
    #[error("Command error: {0}")]
    CommandError(#[from] CommandError),

    /// A submitted query referenced a device that is not open
    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    /// The input thread could not be spawned or panicked
    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Result of discretizing a motion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscreteEvent {
    Axis(DiscreteAxisEvent),
    Hat(DiscreteHatEvent),
}

/// Collects subscribers and settings before the input thread starts
///
/// Subscribers run on the input thread, so they have to be known up front.
#[derive(Default)]
pub struct InputManagerBuilder {
    settings: InputSettings,
    subscribers: Vec<Box<dyn EventSubscriber>>,
}

impl InputManagerBuilder {
    pub fn settings(mut self, settings: InputSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn subscribe(mut self, subscriber: impl EventSubscriber + 'static) -> Self {
        self.subscribers.push(Box::new(subscriber));
        self
    }

    /// Spawns the input thread and waits until its backend is initialized
    ///
    /// `factory` runs on the input thread, so backends that cannot move
    /// between threads are fine.
    ///
    /// # Errors
    ///
    /// * [`ManagerError::BackendError`] - `factory` failed; the thread has
    ///   already exited
    /// * [`ManagerError::ThreadError`] - the thread could not be spawned
    ///
    /// # Examples
    ///
    /// ```rust
    /// use padhub::input::{InputManager, VirtualBackend, VirtualDeviceSpec};
    ///
    /// let (backend, feed) = VirtualBackend::new();
    /// let manager = InputManager::builder()
    ///     .subscribe(|event: &padhub::input::InputEvent, slot: usize| {
    ///         println!("{slot}: {event:?}");
    ///     })
    ///     .spawn(move || Ok(backend))
    ///     .unwrap();
    ///
    /// feed.plug(0, VirtualDeviceSpec::gamepad(17, "Pad"));
    /// let count = manager.submit(|registry| registry.len()).unwrap();
    /// assert_eq!(count, 1);
    /// manager.stop().unwrap();
    /// ```
    pub fn spawn<B, F>(self, factory: F) -> Result<InputManager, ManagerError>
    where
        B: InputBackend + 'static,
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        info!("Initializing input manager with settings: {:?}", self.settings);

        let settings = self.settings;
        let subscribers = self.subscribers;
        let mailbox = Arc::new(Mailbox::new());
        let loop_mailbox = mailbox.clone();
        let (ready_tx, ready_rx) =
            crossbeam_channel::bounded::<Result<Arc<dyn MarkerSink>, BackendError>>(1);

        info!("Spawning input thread");
        let thread = thread::Builder::new()
            .name("padhub-input".to_string())
            .spawn(move || {
                let input_loop = match InputLoop::<Initializing>::create(
                    factory,
                    subscribers,
                    loop_mailbox.clone(),
                    settings,
                ) {
                    Ok(input_loop) => input_loop,
                    Err(e) => {
                        loop_mailbox.close();
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let running = input_loop.initialize();
                let _ = ready_tx.send(Ok(running.marker_sink()));
                running.run();
            })
            .map_err(|e| ManagerError::ThreadError(e.to_string()))?;

        let markers = match ready_rx.recv() {
            Ok(Ok(markers)) => markers,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(ManagerError::BackendError(e));
            }
            Err(_) => {
                let _ = thread.join();
                return Err(ManagerError::ThreadError(
                    "input thread exited during startup".to_string(),
                ));
            }
        };

        let commands = CommandChannel::new(mailbox, markers, thread.thread().id());
        info!("Input manager initialized successfully");

        Ok(InputManager {
            commands,
            thread: Mutex::new(Some(thread)),
        })
    }
}

/// Handle for the running input thread
///
/// Cheap operations (`rumble`) return immediately; `submit`, the queries
/// built on it and `stop` block the caller. None of the blocking calls may be
/// made from inside a subscriber, which runs on the input thread itself.
///
/// Dropping the handle stops the thread.
pub struct InputManager {
    commands: CommandChannel,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl InputManager {
    pub fn builder() -> InputManagerBuilder {
        InputManagerBuilder::default()
    }

    /// Spawns an input thread with default settings and no subscribers
    pub fn spawn<B, F>(factory: F) -> Result<Self, ManagerError>
    where
        B: InputBackend + 'static,
        F: FnOnce() -> Result<B, BackendError> + Send + 'static,
    {
        Self::builder().spawn(factory)
    }

    /// A cloneable command surface for handing to other threads
    pub fn commands(&self) -> CommandChannel {
        self.commands.clone()
    }

    /// Runs `f` on the input thread with exclusive registry access
    ///
    /// See [`CommandChannel::submit`].
    pub fn submit<F, R>(&self, f: F) -> Result<R, ManagerError>
    where
        F: FnOnce(&mut DeviceRegistry) -> R + Send + 'static,
        R: Send + 'static,
    {
        Ok(self.commands.submit(f)?)
    }

    /// Rumbles every open controller for `duration_ms`
    pub fn rumble(
        &self,
        low_intensity: u16,
        high_intensity: u16,
        duration_ms: u32,
    ) -> Result<(), ManagerError> {
        debug!(
            "Requesting rumble {}/{} for {}ms",
            low_intensity, high_intensity, duration_ms
        );
        Ok(self
            .commands
            .rumble(low_intensity, high_intensity, duration_ms)?)
    }

    /// `(instance id, display name)` of every open controller-mode device,
    /// as of the moment the input thread answered
    pub fn list_controller_devices(&self) -> Result<Vec<(InstanceId, String)>, ManagerError> {
        self.submit(|registry| registry.controller_devices())
    }

    /// Discretizes a motion event against the device's stored state
    ///
    /// Axis and hat motion yield at most one press/release; every other event
    /// kind yields `None`.
    pub fn discretize(&self, event: &InputEvent) -> Result<Option<DiscreteEvent>, ManagerError> {
        match *event {
            InputEvent::AxisMotion {
                instance_id,
                axis,
                value,
            } => {
                let discrete = self.submit(move |registry| {
                    registry.discretize_axis(instance_id, usize::from(axis), value)
                })??;
                Ok(discrete.map(DiscreteEvent::Axis))
            }
            InputEvent::HatMotion {
                instance_id,
                hat,
                mask,
            } => {
                let discrete = self.submit(move |registry| {
                    registry.discretize_hat(instance_id, usize::from(hat), mask)
                })??;
                Ok(discrete.map(DiscreteEvent::Hat))
            }
            _ => Ok(None),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stops the input thread and waits until it has released the backend
    ///
    /// Concurrent callers all return after teardown; the lock on the join
    /// handle is held until the thread has been joined.
    pub fn stop(&self) -> Result<(), ManagerError> {
        if self.commands.on_input_thread() {
            return Err(CommandError::OnInputThread.into());
        }

        let mut guard = self.lock_thread();
        let Some(thread) = guard.take() else {
            return Ok(());
        };

        info!("Stopping input thread");
        match self.commands.request_stop() {
            Ok(()) | Err(CommandError::Terminated) => {}
            Err(e) => warn!("Failed to request input thread stop: {}", e),
        }

        thread.join().map_err(|_| {
            error!("Input thread panicked");
            ManagerError::ThreadError("input thread panicked".to_string())
        })?;
        info!("Input thread stopped");
        Ok(())
    }

    fn lock_thread(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for InputManager {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop input thread on drop: {}", e);
        }
    }
}
