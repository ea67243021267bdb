//! Analog and hat discretization
//!
//! Turns continuous axis values and hat bitmasks into edge-triggered
//! press/release events. Both functions are pure apart from updating the
//! per-device state they are handed.

use super::backend::HatMask;
use super::registry::Device;

/// Hat directions in the order they are checked for changes.
pub const HAT_PRIORITY: [HatDirection; 4] = [
    HatDirection::Up,
    HatDirection::Down,
    HatDirection::Left,
    HatDirection::Right,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

impl HatDirection {
    pub fn mask(&self) -> HatMask {
        match self {
            HatDirection::Up => HatMask::UP,
            HatDirection::Down => HatMask::DOWN,
            HatDirection::Left => HatMask::LEFT,
            HatDirection::Right => HatMask::RIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteHatEvent {
    pub slot: usize,
    pub hat: usize,
    pub direction: HatDirection,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscreteAxisEvent {
    pub slot: usize,
    pub axis: usize,
    /// `+1` or `-1`: the side of the center the axis was pushed to.
    pub direction: i8,
    pub pressed: bool,
}

/// Reports the first changed hat direction, if any.
///
/// Only one event is produced per call even when several bits flip at once;
/// the stored state still absorbs every change.
pub fn discretize_hat(device: &mut Device, hat: usize, new_mask: HatMask) -> Option<DiscreteHatEvent> {
    let slot = device.slot();
    let stored = device.hats.get_mut(hat)?;
    let old_mask = stored.state;

    if old_mask == new_mask {
        return None;
    }

    let direction = HAT_PRIORITY
        .into_iter()
        .find(|d| old_mask.contains(d.mask()) != new_mask.contains(d.mask()))?;

    stored.state = new_mask;
    Some(DiscreteHatEvent {
        slot,
        hat,
        direction,
        pressed: new_mask.contains(direction.mask()),
    })
}

/// Classifies `value` relative to `center`: `1` past the upper threshold,
/// `-1` past the lower one, `0` in between.
///
/// Each threshold sits a third of the way from the center to the respective
/// end of the `i16` range.
pub fn axis_zone(center: i16, value: i16) -> i8 {
    let center = i32::from(center);
    let value = i32::from(value);

    if value > center + (32767 - center) / 3 {
        1
    } else if value < center - (center + 32768) / 3 {
        -1
    } else {
        0
    }
}

/// Emits a press when an axis leaves its center zone and a release when it
/// returns.
pub fn discretize_axis(device: &mut Device, axis: usize, new_value: i16) -> Option<DiscreteAxisEvent> {
    let slot = device.slot();
    let stored = device.axes.get_mut(axis)?;
    let center = stored.initial();

    let was_pressed = axis_zone(center, stored.last);
    let is_pressed = axis_zone(center, new_value);
    stored.last = new_value;

    if was_pressed == is_pressed {
        return None;
    }

    Some(DiscreteAxisEvent {
        slot,
        axis,
        direction: if is_pressed != 0 { is_pressed } else { was_pressed },
        pressed: is_pressed != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::backend::{DeviceHandle, DeviceMode, OpenedDevice};

    fn device(axis_initial: &[i16]) -> Device {
        Device::from_opened(
            2,
            OpenedDevice {
                handle: DeviceHandle::new(1),
                instance_id: 77,
                name: "test pad".to_string(),
                mode: DeviceMode::Controller,
                axis_initial: axis_initial.to_vec(),
                button_count: 8,
                hat_count: 2,
            },
        )
    }

    #[test]
    fn hat_same_mask_twice_is_silent() {
        let mut dev = device(&[]);
        assert!(discretize_hat(&mut dev, 0, HatMask::LEFT).is_some());
        assert_eq!(discretize_hat(&mut dev, 0, HatMask::LEFT), None);
    }

    #[test]
    fn hat_reports_only_highest_priority_change() {
        let mut dev = device(&[]);
        let event = discretize_hat(&mut dev, 0, HatMask::UP | HatMask::RIGHT);

        assert_eq!(
            event,
            Some(DiscreteHatEvent {
                slot: 2,
                hat: 0,
                direction: HatDirection::Up,
                pressed: true,
            })
        );
        assert_eq!(dev.hats()[0].state(), HatMask::UP | HatMask::RIGHT);
    }

    #[test]
    fn hat_simultaneous_release_is_absorbed() {
        let mut dev = device(&[]);
        discretize_hat(&mut dev, 1, HatMask::DOWN | HatMask::LEFT);

        let event = discretize_hat(&mut dev, 1, HatMask::CENTERED).expect("a change");
        assert_eq!(event.direction, HatDirection::Down);
        assert!(!event.pressed);
        assert_eq!(dev.hats()[1].state(), HatMask::CENTERED);
        assert_eq!(discretize_hat(&mut dev, 1, HatMask::CENTERED), None);
    }

    #[test]
    fn hat_priority_order_is_up_down_left_right() {
        let mut dev = device(&[]);
        discretize_hat(&mut dev, 0, HatMask::RIGHT);

        let event = discretize_hat(&mut dev, 0, HatMask::LEFT).expect("a change");
        assert_eq!(event.direction, HatDirection::Left);
        assert!(event.pressed);
    }

    #[test]
    fn hat_out_of_range_is_ignored() {
        let mut dev = device(&[]);
        assert_eq!(discretize_hat(&mut dev, 5, HatMask::UP), None);
    }

    #[test]
    fn axis_press_and_release_round_trip() {
        let mut dev = device(&[0]);
        let events: Vec<_> = [0, 20000, 0]
            .into_iter()
            .filter_map(|v| discretize_axis(&mut dev, 0, v))
            .map(|e| (e.direction, e.pressed))
            .collect();

        assert_eq!(events, vec![(1, true), (1, false)]);
    }

    #[test]
    fn axis_small_moves_only_advance_state() {
        let mut dev = device(&[0]);
        assert_eq!(discretize_axis(&mut dev, 0, 100), None);
        assert_eq!(discretize_axis(&mut dev, 0, 150), None);
        assert_eq!(dev.axes()[0].last(), 150);
    }

    #[test]
    fn axis_negative_side() {
        let mut dev = device(&[0]);
        let press = discretize_axis(&mut dev, 0, -20000).expect("press");
        assert_eq!((press.direction, press.pressed), (-1, true));

        let release = discretize_axis(&mut dev, 0, -5).expect("release");
        assert_eq!((release.direction, release.pressed), (-1, false));
    }

    #[test]
    fn axis_flip_reports_new_side() {
        let mut dev = device(&[0]);
        discretize_axis(&mut dev, 0, 30000);

        let event = discretize_axis(&mut dev, 0, -30000).expect("flip");
        assert_eq!((event.direction, event.pressed), (-1, true));
    }

    #[test]
    fn axis_thresholds_follow_off_center_calibration() {
        // Triggers rest at the bottom of the range.
        assert_eq!(axis_zone(-32768, -32768), 0);
        assert_eq!(axis_zone(-32768, -10923), 0);
        assert_eq!(axis_zone(-32768, -10922), 1);
        // Nothing is below the lower threshold of a bottom-resting axis.
        assert_eq!(axis_zone(-32768, i16::MIN), 0);

        assert_eq!(axis_zone(0, 10922), 0);
        assert_eq!(axis_zone(0, 10923), 1);
        assert_eq!(axis_zone(0, -10922), 0);
        assert_eq!(axis_zone(0, -10923), -1);
    }

    #[test]
    fn axis_out_of_range_is_ignored() {
        let mut dev = device(&[0]);
        assert_eq!(discretize_axis(&mut dev, 3, 30000), None);
    }
}
