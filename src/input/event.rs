//! Normalized events and the subscriber seam
//!
//! Subscribers run on the input thread, in backend order, and must not block
//! for long: the loop cannot service commands while a subscriber is running.

use chrono::{DateTime, Local};
use tracing::warn;

use super::backend::{HatMask, InstanceId};

/// Slot forwarded with events whose slot is not resolved.
pub const UNRESOLVED_SLOT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
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
    DeviceAdded {
        raw_index: u32,
        instance_id: InstanceId,
    },
    DeviceRemoved {
        instance_id: InstanceId,
    },
}

impl InputEvent {
    pub fn instance_id(&self) -> InstanceId {
        match *self {
            InputEvent::AxisMotion { instance_id, .. }
            | InputEvent::HatMotion { instance_id, .. }
            | InputEvent::ButtonDown { instance_id, .. }
            | InputEvent::ButtonUp { instance_id, .. }
            | InputEvent::DeviceAdded { instance_id, .. }
            | InputEvent::DeviceRemoved { instance_id } => instance_id,
        }
    }
}

/// An event together with its slot, stamped when the input thread handled it.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotEvent {
    pub event: InputEvent,
    pub slot: usize,
    pub timestamp: DateTime<Local>,
}

impl SlotEvent {
    pub fn new(event: InputEvent, slot: usize) -> Self {
        Self {
            event,
            slot,
            timestamp: Local::now(),
        }
    }
}

/// Receives every normalized event the input thread produces.
pub trait EventSubscriber: Send {
    fn on_event(&mut self, event: &InputEvent, slot: usize);
}

impl<F> EventSubscriber for F
where
    F: FnMut(&InputEvent, usize) + Send,
{
    fn on_event(&mut self, event: &InputEvent, slot: usize) {
        self(event, slot)
    }
}

/// Forwards events into an unbounded tokio channel.
pub fn channel_subscriber(
    sender: tokio::sync::mpsc::UnboundedSender<SlotEvent>,
) -> impl EventSubscriber {
    move |event: &InputEvent, slot: usize| {
        if sender.send(SlotEvent::new(*event, slot)).is_err() {
            warn!("Event receiver dropped, discarding {:?}", event);
        }
    }
}

/// Forwards events into a bounded tokio channel, dropping them when it is full.
pub fn bounded_channel_subscriber(
    sender: tokio::sync::mpsc::Sender<SlotEvent>,
) -> impl EventSubscriber {
    move |event: &InputEvent, slot: usize| {
        if let Err(e) = sender.try_send(SlotEvent::new(*event, slot)) {
            warn!("Failed to forward input event: {}", e);
        }
    }
}

/// Forwards events into a crossbeam channel for consumers on plain threads.
pub fn crossbeam_subscriber(sender: crossbeam_channel::Sender<SlotEvent>) -> impl EventSubscriber {
    move |event: &InputEvent, slot: usize| {
        if sender.send(SlotEvent::new(*event, slot)).is_err() {
            warn!("Event receiver dropped, discarding {:?}", event);
        }
    }
}
