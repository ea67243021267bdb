//! End-to-end tests of the input thread driven by the virtual backend.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use padhub::input::{
    crossbeam_subscriber, BackendError, CommandError, DeviceRegistry, DiscreteEvent, HatDirection,
    HatMask, InputEvent, InputManager, InputSettings, ManagerError, RumbleCommand, SlotEvent,
    VirtualBackend, VirtualDeviceFeed, VirtualDeviceSpec,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(2);

fn start(settings: InputSettings) -> (InputManager, VirtualDeviceFeed, Receiver<SlotEvent>) {
    let (backend, feed) = VirtualBackend::new();
    let (tx, rx) = crossbeam_channel::unbounded();
    let manager = InputManager::builder()
        .settings(settings)
        .subscribe(crossbeam_subscriber(tx))
        .spawn(move || Ok(backend))
        .expect("virtual backend starts");
    (manager, feed, rx)
}

fn next(rx: &Receiver<SlotEvent>) -> (InputEvent, usize) {
    let slot_event = rx.recv_timeout(TIMEOUT).expect("event within timeout");
    (slot_event.event, slot_event.slot)
}

/// Blocks until the input thread has handled everything sent before.
fn sync(manager: &InputManager) {
    manager.submit(|_| ()).expect("input thread alive");
}

fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn rumbles_for(log: &[RumbleCommand], instance_id: u32) -> Vec<RumbleCommand> {
    log.iter()
        .filter(|c| c.instance_id == instance_id)
        .copied()
        .collect()
}

#[test]
fn events_arrive_in_order_with_slot_tags() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(10, "First"));
    feed.plug(1, VirtualDeviceSpec::gamepad(20, "Second"));
    feed.button(20, 3, true);
    feed.axis(20, 1, 25000);
    feed.hat(20, 0, HatMask::LEFT);
    feed.button(20, 3, false);
    feed.unplug(10);

    assert_eq!(
        next(&rx),
        (
            InputEvent::DeviceAdded {
                raw_index: 0,
                instance_id: 10
            },
            0
        )
    );
    assert_eq!(
        next(&rx),
        (
            InputEvent::DeviceAdded {
                raw_index: 1,
                instance_id: 20
            },
            0
        )
    );
    assert_eq!(
        next(&rx),
        (
            InputEvent::ButtonDown {
                instance_id: 20,
                button: 3
            },
            1
        )
    );
    // Motion keeps the placeholder slot unless resolution is enabled.
    assert_eq!(
        next(&rx),
        (
            InputEvent::AxisMotion {
                instance_id: 20,
                axis: 1,
                value: 25000
            },
            0
        )
    );
    assert_eq!(
        next(&rx),
        (
            InputEvent::HatMotion {
                instance_id: 20,
                hat: 0,
                mask: HatMask::LEFT
            },
            0
        )
    );
    assert_eq!(
        next(&rx),
        (
            InputEvent::ButtonUp {
                instance_id: 20,
                button: 3
            },
            1
        )
    );
    assert_eq!(next(&rx), (InputEvent::DeviceRemoved { instance_id: 10 }, 0));

    manager.stop().unwrap();
}

#[test]
fn motion_slots_resolve_when_enabled() {
    let settings = InputSettings {
        resolve_motion_slots: true,
        ..InputSettings::default()
    };
    let (manager, feed, rx) = start(settings);

    feed.plug(0, VirtualDeviceSpec::gamepad(10, "First"));
    feed.plug(1, VirtualDeviceSpec::gamepad(20, "Second"));
    feed.axis(20, 0, -30000);
    feed.hat(20, 0, HatMask::DOWN);

    next(&rx);
    next(&rx);
    assert_eq!(next(&rx).1, 1);
    assert_eq!(next(&rx).1, 1);

    manager.stop().unwrap();
}

#[test]
fn failed_open_is_silent() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.announce(4);
    feed.plug(5, VirtualDeviceSpec::gamepad(50, "Real"));

    assert_eq!(
        next(&rx).0,
        InputEvent::DeviceAdded {
            raw_index: 5,
            instance_id: 50
        }
    );
    assert_eq!(manager.submit(|registry| registry.len()).unwrap(), 1);

    manager.stop().unwrap();
}

#[test]
fn button_for_unknown_device_is_dropped() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.button(99, 0, true);
    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));

    assert!(matches!(next(&rx).0, InputEvent::DeviceAdded { .. }));
    manager.stop().unwrap();
}

#[test]
fn button_state_is_tracked() {
    let (manager, feed, _rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));
    feed.button(1, 2, true);
    feed.button(1, 4, true);
    feed.button(1, 4, false);

    let buttons = manager
        .submit(|registry| registry.get(1).map(|d| d.buttons().to_vec()))
        .unwrap()
        .expect("pad is open");
    assert!(buttons[2]);
    assert!(!buttons[4]);

    manager.stop().unwrap();
}

#[test]
fn freed_slot_is_reused() {
    let (manager, feed, _rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(10, "A"));
    feed.plug(1, VirtualDeviceSpec::gamepad(20, "B"));
    feed.plug(2, VirtualDeviceSpec::gamepad(30, "C"));
    feed.unplug(20);
    feed.plug(3, VirtualDeviceSpec::joystick(40, "D"));

    let slots = manager
        .submit(|registry: &mut DeviceRegistry| {
            registry
                .iter()
                .map(|d| (d.instance_id(), d.slot()))
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(slots, vec![(10, 0), (30, 2), (40, 1)]);

    manager.stop().unwrap();
}

#[test]
fn controller_listing_is_a_snapshot_of_controllers() {
    let (manager, feed, _rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(3, "Pad Three"));
    feed.plug(1, VirtualDeviceSpec::joystick(1, "Stick"));
    feed.plug(2, VirtualDeviceSpec::gamepad(2, "Pad Two"));

    assert_eq!(
        manager.list_controller_devices().unwrap(),
        vec![(2, "Pad Two".to_string()), (3, "Pad Three".to_string())]
    );

    feed.unplug(2);
    assert_eq!(
        manager.list_controller_devices().unwrap(),
        vec![(3, "Pad Three".to_string())]
    );

    manager.stop().unwrap();
}

#[test]
fn discretize_uses_device_state() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(8, "Pad"));
    next(&rx);

    let mut axis_edges = Vec::new();
    for value in [0, 20000, 0] {
        let event = InputEvent::AxisMotion {
            instance_id: 8,
            axis: 2,
            value,
        };
        if let Some(DiscreteEvent::Axis(edge)) = manager.discretize(&event).unwrap() {
            axis_edges.push((edge.slot, edge.direction, edge.pressed));
        }
    }
    assert_eq!(axis_edges, vec![(0, 1, true), (0, 1, false)]);

    let hat = InputEvent::HatMotion {
        instance_id: 8,
        hat: 0,
        mask: HatMask::UP | HatMask::RIGHT,
    };
    match manager.discretize(&hat).unwrap() {
        Some(DiscreteEvent::Hat(edge)) => {
            assert_eq!(edge.direction, HatDirection::Up);
            assert!(edge.pressed);
        }
        other => panic!("expected a hat edge, got {other:?}"),
    }
    assert_eq!(manager.discretize(&hat).unwrap(), None);

    let unknown = InputEvent::AxisMotion {
        instance_id: 77,
        axis: 0,
        value: 0,
    };
    assert!(matches!(
        manager.discretize(&unknown),
        Err(ManagerError::RegistryError(_))
    ));

    manager.stop().unwrap();
}

#[test]
fn rumble_starts_immediately_and_stops_once() {
    let (manager, feed, _rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad One"));
    feed.plug(1, VirtualDeviceSpec::joystick(2, "Stick"));
    feed.plug(2, VirtualDeviceSpec::gamepad(3, "Pad Three"));
    sync(&manager);

    manager.rumble(1000, 2000, 100).unwrap();

    assert!(wait_for(|| feed.rumble_log().iter().filter(|c| c.is_stop()).count() == 2));
    // Give a spurious second stop a chance to show up.
    thread::sleep(Duration::from_millis(150));

    let log = feed.rumble_log();
    assert!(rumbles_for(&log, 2).is_empty());
    for pad in [1, 3] {
        let commands = rumbles_for(&log, pad);
        assert_eq!(commands.len(), 2, "pad {pad}: {commands:?}");
        let (start, stop) = (commands[0], commands[1]);
        assert_eq!(
            (start.low_intensity, start.high_intensity, start.duration_ms),
            (1000, 2000, 100)
        );
        assert!(stop.is_stop());
        assert!(stop.at.duration_since(start.at) >= Duration::from_millis(100));
    }

    manager.stop().unwrap();
}

#[test]
fn stop_with_pending_rumble_tears_down_backend() {
    let (manager, feed, _rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));
    sync(&manager);
    manager.rumble(500, 500, 10_000).unwrap();
    assert!(wait_for(|| !feed.rumble_log().is_empty()));

    manager.stop().unwrap();

    assert!(!manager.is_running());
    assert!(feed.is_shut_down());
    assert_eq!(feed.closed_devices(), vec![1]);
    let log = feed.rumble_log();
    assert_eq!(log.len(), 2);
    assert!(log[1].is_stop());

    assert!(matches!(
        manager.submit(|registry| registry.len()),
        Err(ManagerError::CommandError(CommandError::Terminated))
    ));
    assert!(matches!(
        manager.rumble(1, 1, 1),
        Err(ManagerError::CommandError(CommandError::Terminated))
    ));
    // A second stop is a no-op.
    manager.stop().unwrap();
}

#[test]
fn backend_quit_terminates_the_loop() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.quit();

    assert!(wait_for(|| !manager.is_running()));
    assert!(feed.is_shut_down());
    // Subscribers are dropped with the loop.
    assert!(matches!(
        rx.recv_timeout(TIMEOUT),
        Err(RecvTimeoutError::Disconnected)
    ));
    manager.stop().unwrap();
}

#[test]
fn dropping_the_manager_stops_the_thread() {
    let (manager, feed, _rx) = start(InputSettings::default());
    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));
    sync(&manager);

    drop(manager);

    assert!(feed.is_shut_down());
    assert_eq!(feed.closed_devices(), vec![1]);
}

#[test]
fn backend_init_failure_is_reported() {
    let result = InputManager::spawn(|| {
        Err::<VirtualBackend, _>(BackendError::InitializationError(
            "no input subsystem".to_string(),
        ))
    });

    assert!(matches!(
        result,
        Err(ManagerError::BackendError(BackendError::InitializationError(_)))
    ));
}

#[test]
fn concurrent_submitters_are_serialized() {
    let (manager, feed, _rx) = start(InputSettings::default());
    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));
    let commands = manager.commands();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let commands = commands.clone();
            thread::spawn(move || {
                (0..25)
                    .map(|_| commands.submit(|registry| registry.len()).unwrap())
                    .sum::<usize>()
            })
        })
        .collect();

    let total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert_eq!(total, 100);

    manager.stop().unwrap();
}

#[test]
fn blocking_commands_are_refused_inside_subscribers() {
    let (backend, feed) = VirtualBackend::new();
    let (commands_tx, commands_rx) = crossbeam_channel::bounded(1);
    let (result_tx, result_rx) = crossbeam_channel::bounded(1);

    let manager = InputManager::builder()
        .subscribe(move |_event: &InputEvent, _slot: usize| {
            if let Ok(commands) = commands_rx.try_recv() {
                let commands: padhub::input::CommandChannel = commands;
                let _ = result_tx.send(commands.submit(|registry| registry.len()).is_err());
            }
        })
        .spawn(move || Ok(backend))
        .unwrap();

    commands_tx.send(manager.commands()).unwrap();
    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));

    assert!(result_rx.recv_timeout(TIMEOUT).unwrap());
    manager.stop().unwrap();
}

#[test]
fn reattaching_an_open_device_is_not_announced_again() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(10, "Pad"));
    feed.plug(1, VirtualDeviceSpec::gamepad(10, "Pad"));
    feed.plug(2, VirtualDeviceSpec::gamepad(20, "Other"));

    assert_eq!(
        next(&rx).0,
        InputEvent::DeviceAdded {
            raw_index: 0,
            instance_id: 10
        }
    );
    assert_eq!(
        next(&rx).0,
        InputEvent::DeviceAdded {
            raw_index: 2,
            instance_id: 20
        }
    );

    let slots = manager
        .submit(|registry| {
            registry
                .iter()
                .map(|d| (d.instance_id(), d.slot()))
                .collect::<Vec<_>>()
        })
        .unwrap();
    assert_eq!(slots, vec![(10, 0), (20, 1)]);
    // Only the duplicate handle was released.
    assert_eq!(feed.closed_devices(), vec![10]);

    manager.stop().unwrap();
}

#[test]
fn rumble_stops_once_while_events_trickle_in() {
    let (manager, feed, rx) = start(InputSettings::default());

    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad One"));
    feed.plug(1, VirtualDeviceSpec::gamepad(2, "Pad Two"));
    sync(&manager);

    manager.rumble(1200, 600, 150).unwrap();
    for value in 0..10i16 {
        feed.axis(1, 0, value * 1000);
        thread::sleep(Duration::from_millis(40));
    }
    thread::sleep(Duration::from_millis(300));

    let axis_events = rx
        .try_iter()
        .filter(|e| matches!(e.event, InputEvent::AxisMotion { .. }))
        .count();
    assert_eq!(axis_events, 10);

    let log = feed.rumble_log();
    for pad in [1, 2] {
        let commands = rumbles_for(&log, pad);
        assert_eq!(commands.len(), 2, "pad {pad}: {commands:?}");
        assert!(!commands[0].is_stop());
        assert!(commands[1].is_stop());
        assert!(commands[1].at.duration_since(commands[0].at) >= Duration::from_millis(150));
    }

    manager.stop().unwrap();
}

#[test]
fn queued_events_delay_the_rumble_stop_without_losing_it() {
    let (backend, feed) = VirtualBackend::new();
    let (handled_tx, handled_rx) = crossbeam_channel::unbounded();
    let manager = InputManager::builder()
        .subscribe(move |event: &InputEvent, _slot: usize| {
            if let InputEvent::AxisMotion { .. } = event {
                thread::sleep(Duration::from_millis(5));
                let _ = handled_tx.send(Instant::now());
            }
        })
        .spawn(move || Ok(backend))
        .unwrap();

    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad One"));
    feed.plug(1, VirtualDeviceSpec::gamepad(2, "Pad Two"));
    feed.plug(2, VirtualDeviceSpec::joystick(3, "Stick"));
    sync(&manager);

    // The backlog takes far longer to drain than the rumble lasts.
    manager.rumble(900, 300, 50).unwrap();
    for value in 0..40i16 {
        feed.axis(1, 0, value * 500);
    }

    let handled: Vec<Instant> = (0..40)
        .map(|_| handled_rx.recv_timeout(TIMEOUT).expect("axis event handled"))
        .collect();
    let last_handled = handled[handled.len() - 1];

    assert!(wait_for(|| feed.rumble_log().iter().filter(|c| c.is_stop()).count() == 2));
    thread::sleep(Duration::from_millis(150));

    let log = feed.rumble_log();
    assert!(rumbles_for(&log, 3).is_empty());
    for pad in [1, 2] {
        let commands = rumbles_for(&log, pad);
        assert_eq!(commands.len(), 2, "pad {pad}: {commands:?}");
        let (start, stop) = (commands[0], commands[1]);
        assert!(stop.is_stop());
        assert!(stop.at >= last_handled);
        assert!(stop.at.duration_since(start.at) >= Duration::from_millis(50));
    }

    manager.stop().unwrap();
}

#[test]
fn concurrent_stops_both_wait_for_teardown() {
    let (backend, feed) = VirtualBackend::new();
    let manager = Arc::new(
        InputManager::builder()
            .subscribe(|_event: &InputEvent, _slot: usize| {
                thread::sleep(Duration::from_millis(400));
            })
            .spawn(move || Ok(backend))
            .unwrap(),
    );

    // Keeps the input thread inside the subscriber for a while.
    feed.plug(0, VirtualDeviceSpec::gamepad(1, "Pad"));
    thread::sleep(Duration::from_millis(20));

    let stoppers: Vec<_> = (0..2)
        .map(|_| {
            let manager = manager.clone();
            let feed = feed.clone();
            let stopper = thread::spawn(move || {
                manager.stop().unwrap();
                feed.is_shut_down()
            });
            thread::sleep(Duration::from_millis(20));
            stopper
        })
        .collect();

    for stopper in stoppers {
        assert!(stopper.join().unwrap(), "stop returned before teardown");
    }
    assert!(!manager.is_running());
}
