//! Cross-thread command mailbox
//!
//! Other threads never touch the registry directly. They leave a command in
//! the single-slot [`Mailbox`] and wake the input thread with a marker; the
//! input thread picks the command up between backend events.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

use super::backend::{BackendError, Marker, MarkerSink};
use super::registry::DeviceRegistry;

pub(crate) type Job = Box<dyn FnOnce(&mut DeviceRegistry) + Send>;

/// Pending rumble request. Zero intensities stop any running effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RumbleParams {
    pub low_intensity: u16,
    pub high_intensity: u16,
    pub duration_ms: u32,
}

impl RumbleParams {
    pub const STOP: RumbleParams = RumbleParams {
        low_intensity: 0,
        high_intensity: 0,
        duration_ms: 0,
    };
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Input thread has terminated")]
    Terminated,

    #[error("Blocking commands cannot be issued from the input thread")]
    OnInputThread,

    #[error("Failed to wake input thread: {0}")]
    WakeError(#[from] BackendError),
}

#[derive(Default)]
struct MailboxState {
    job: Option<Job>,
    rumble: Option<RumbleParams>,
    closed: bool,
}

/// Single-slot storage shared between callers and the input thread.
#[derive(Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    slot_freed: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes the pending closure and lets the next submitter in.
    pub(crate) fn take_job(&self) -> Option<Job> {
        let job = self.lock().job.take();
        self.slot_freed.notify_all();
        job
    }

    pub(crate) fn take_rumble(&self) -> Option<RumbleParams> {
        self.lock().rumble.take()
    }

    /// Rejects all further commands. A closure still waiting in the slot is
    /// dropped, which fails its submitter.
    pub(crate) fn close(&self) {
        let job = {
            let mut state = self.lock();
            state.closed = true;
            state.rumble = None;
            state.job.take()
        };
        if job.is_some() {
            debug!("Discarding pending closure on shutdown");
        }
        drop(job);
        self.slot_freed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Cloneable command surface of a running input thread.
#[derive(Clone)]
pub struct CommandChannel {
    mailbox: Arc<Mailbox>,
    markers: Arc<dyn MarkerSink>,
    input_thread: ThreadId,
}

impl CommandChannel {
    pub(crate) fn new(
        mailbox: Arc<Mailbox>,
        markers: Arc<dyn MarkerSink>,
        input_thread: ThreadId,
    ) -> Self {
        Self {
            mailbox,
            markers,
            input_thread,
        }
    }

    pub fn on_input_thread(&self) -> bool {
        thread::current().id() == self.input_thread
    }

    /// Runs `f` on the input thread with exclusive access to the registry and
    /// returns its result.
    ///
    /// Blocks until the closure has run. Only one closure is pending at a
    /// time; a concurrent caller waits for the slot to free up.
    pub fn submit<F, R>(&self, f: F) -> Result<R, CommandError>
    where
        F: FnOnce(&mut DeviceRegistry) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.on_input_thread() {
            return Err(CommandError::OnInputThread);
        }

        let (result_tx, result_rx) = crossbeam_channel::bounded(1);
        let job: Job = Box::new(move |registry| {
            let _ = result_tx.send(f(registry));
        });

        {
            let mut state = self.mailbox.lock();
            while state.job.is_some() && !state.closed {
                state = self
                    .mailbox
                    .slot_freed
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if state.closed {
                return Err(CommandError::Terminated);
            }
            state.job = Some(job);
        }

        if let Err(e) = self.markers.push(Marker::Work) {
            warn!("Failed to push work marker: {}", e);
            self.mailbox.take_job();
            return Err(e.into());
        }

        result_rx.recv().map_err(|_| CommandError::Terminated)
    }

    /// Starts rumble on every open controller and returns immediately. The
    /// input thread stops it again after `duration_ms`.
    pub fn rumble(
        &self,
        low_intensity: u16,
        high_intensity: u16,
        duration_ms: u32,
    ) -> Result<(), CommandError> {
        {
            let mut state = self.mailbox.lock();
            if state.closed {
                return Err(CommandError::Terminated);
            }
            state.rumble = Some(RumbleParams {
                low_intensity,
                high_intensity,
                duration_ms,
            });
        }
        self.markers.push(Marker::Rumble)?;
        Ok(())
    }

    /// Asks the input thread to quit without waiting for it.
    pub(crate) fn request_stop(&self) -> Result<(), CommandError> {
        if self.mailbox.is_closed() {
            return Err(CommandError::Terminated);
        }
        self.markers.push(Marker::Quit)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}
