//! Manual-control mapping from a physical input device to actuator channels.

use crate::protocol::{Command, TiltDirection};
use serde::Deserialize;

pub const PWM_MIN: u16 = 1000;
pub const PWM_MAX: u16 = 2000;
pub const PWM_CENTER: u16 = 1500;

pub const DEFAULT_DEADZONE: f64 = 0.05;
/// Pulse-width change per tick at full throttle-stick deflection.
pub const DEFAULT_THROTTLE_RATE: f64 = 10.0;
/// Smallest change worth sending for a channel.
pub const DEFAULT_MIN_DELTA: u16 = 5;

/// RC channel numbers understood by the vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Roll = 1,
    Pitch = 2,
    Throttle = 3,
    Yaw = 4,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Roll, Channel::Pitch, Channel::Throttle, Channel::Yaw];

    pub fn number(self) -> u8 {
        self as u8
    }

    fn slot(self) -> usize {
        self as usize - 1
    }
}

/// Suppresses `|x| < d` and rescales the remaining range back onto [0, 1],
/// preserving sign. The boundary `|x| == d` maps to zero.
pub fn apply_deadzone(x: f64, d: f64) -> f64 {
    if !x.is_finite() || !(0.0..1.0).contains(&d) {
        return 0.0;
    }
    let x = x.clamp(-1.0, 1.0);
    let magnitude = x.abs();
    if magnitude < d {
        return 0.0;
    }
    x.signum() * (magnitude - d) / (1.0 - d)
}

/// Maps an axis value in [-1, 1] linearly onto [1000, 2000].
pub fn axis_to_pwm(x: f64) -> u16 {
    if !x.is_finite() {
        return PWM_CENTER;
    }
    let span = f64::from(PWM_MAX - PWM_CENTER);
    (f64::from(PWM_CENTER) + x.clamp(-1.0, 1.0) * span).round() as u16
}

/// Latest state of the input device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadSnapshot {
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
}

impl GamepadSnapshot {
    pub fn axis(&self, index: usize) -> f64 {
        self.axes.get(index).copied().unwrap_or(0.0)
    }

    pub fn button(&self, index: usize) -> bool {
        self.buttons.get(index).copied().unwrap_or(false)
    }
}

/// Which device axes and buttons drive which controls.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AxisMapping {
    pub yaw_axis: usize,
    pub throttle_axis: usize,
    pub roll_axis: usize,
    pub pitch_axis: usize,
    /// Stick-up reports negative values on most devices.
    pub invert_throttle: bool,
    pub tilt_up_button: usize,
    pub tilt_down_button: usize,
}

impl Default for AxisMapping {
    fn default() -> Self {
        Self {
            yaw_axis: 0,
            throttle_axis: 1,
            roll_axis: 2,
            pitch_axis: 3,
            invert_throttle: true,
            tilt_up_button: 4,
            tilt_down_button: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoystickSettings {
    pub deadzone: f64,
    pub throttle_rate: f64,
    pub min_delta: u16,
    pub mapping: AxisMapping,
}

impl Default for JoystickSettings {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
            throttle_rate: DEFAULT_THROTTLE_RATE,
            min_delta: DEFAULT_MIN_DELTA,
            mapping: AxisMapping::default(),
        }
    }
}

/// Current actuator command, one pulse width per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ActuatorFrame {
    pub roll: u16,
    pub pitch: u16,
    pub throttle: u16,
    pub yaw: u16,
    /// Bumped on every change.
    pub revision: u64,
}

impl Default for ActuatorFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

impl ActuatorFrame {
    /// Sticks centred, throttle at idle.
    pub const fn neutral() -> Self {
        Self {
            roll: PWM_CENTER,
            pitch: PWM_CENTER,
            throttle: PWM_MIN,
            yaw: PWM_CENTER,
            revision: 0,
        }
    }

    pub fn get(&self, channel: Channel) -> u16 {
        match channel {
            Channel::Roll => self.roll,
            Channel::Pitch => self.pitch,
            Channel::Throttle => self.throttle,
            Channel::Yaw => self.yaw,
        }
    }

    fn set(&mut self, channel: Channel, value: u16) {
        let value = value.clamp(PWM_MIN, PWM_MAX);
        let slot = match channel {
            Channel::Roll => &mut self.roll,
            Channel::Pitch => &mut self.pitch,
            Channel::Throttle => &mut self.throttle,
            Channel::Yaw => &mut self.yaw,
        };
        if *slot != value {
            *slot = value;
            self.revision += 1;
        }
    }
}

/// Rate-commanding throttle: the stick sets climb/descent rate, not position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleIntegrator {
    value: f64,
}

impl Default for ThrottleIntegrator {
    fn default() -> Self {
        Self {
            value: f64::from(PWM_MIN),
        }
    }
}

impl ThrottleIntegrator {
    pub fn step(&mut self, axis: f64, rate: f64) -> u16 {
        let delta = axis.clamp(-1.0, 1.0) * rate;
        if delta.is_finite() {
            self.value = (self.value + delta).clamp(f64::from(PWM_MIN), f64::from(PWM_MAX));
        }
        self.value.round() as u16
    }

    pub fn value(&self) -> u16 {
        self.value.round() as u16
    }
}

/// Polls the input device snapshot once per tick and produces the commands
/// worth sending.
#[derive(Debug, Clone)]
pub struct JoystickSampler {
    settings: JoystickSettings,
    frame: ActuatorFrame,
    throttle: ThrottleIntegrator,
    last_sent: [Option<u16>; 4],
    tilt_up_held: bool,
    tilt_down_held: bool,
}

impl JoystickSampler {
    pub fn new(settings: JoystickSettings) -> Self {
        Self {
            settings,
            frame: ActuatorFrame::neutral(),
            throttle: ThrottleIntegrator::default(),
            last_sent: [None; 4],
            tilt_up_held: false,
            tilt_down_held: false,
        }
    }

    pub fn frame(&self) -> ActuatorFrame {
        self.frame
    }

    /// Back to neutral; the next tick re-sends every channel.
    pub fn reset(&mut self) {
        let revision = self.frame.revision;
        self.frame = ActuatorFrame {
            revision: revision + 1,
            ..ActuatorFrame::neutral()
        };
        self.throttle = ThrottleIntegrator::default();
        self.last_sent = [None; 4];
        self.tilt_up_held = false;
        self.tilt_down_held = false;
    }

    pub fn tick(&mut self, snapshot: &GamepadSnapshot) -> Vec<Command> {
        let m = &self.settings.mapping;
        let d = self.settings.deadzone;

        let yaw = apply_deadzone(snapshot.axis(m.yaw_axis), d);
        let roll = apply_deadzone(snapshot.axis(m.roll_axis), d);
        let pitch = apply_deadzone(snapshot.axis(m.pitch_axis), d);
        let mut climb = apply_deadzone(snapshot.axis(m.throttle_axis), d);
        if m.invert_throttle {
            climb = -climb;
        }

        self.frame.set(Channel::Yaw, axis_to_pwm(yaw));
        self.frame.set(Channel::Roll, axis_to_pwm(roll));
        self.frame.set(Channel::Pitch, axis_to_pwm(pitch));
        let throttle = self.throttle.step(climb, self.settings.throttle_rate);
        self.frame.set(Channel::Throttle, throttle);

        let mut commands = Vec::new();
        for channel in Channel::ALL {
            let value = self.frame.get(channel);
            let slot = channel.slot();
            let due = match self.last_sent[slot] {
                None => true,
                Some(prev) => prev.abs_diff(value) >= self.settings.min_delta,
            };
            if due {
                self.last_sent[slot] = Some(value);
                commands.push(Command::ManualPwm {
                    channel: channel.number(),
                    value,
                });
            }
        }

        let up = snapshot.button(m.tilt_up_button);
        if up && !self.tilt_up_held {
            commands.push(Command::CameraTilt(TiltDirection::Up));
        }
        self.tilt_up_held = up;

        let down = snapshot.button(m.tilt_down_button);
        if down && !self.tilt_down_held {
            commands.push(Command::CameraTilt(TiltDirection::Down));
        }
        self.tilt_down_held = down;

        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> impl Iterator<Item = f64> {
        (0..=n).map(move |i| -1.0 + 2.0 * i as f64 / n as f64)
    }

    fn snapshot(axes: [f64; 4], buttons: &[bool]) -> GamepadSnapshot {
        GamepadSnapshot {
            axes: axes.to_vec(),
            buttons: buttons.to_vec(),
        }
    }

    fn pwm_of(commands: &[Command], channel: Channel) -> Option<u16> {
        commands.iter().find_map(|c| match c {
            Command::ManualPwm { channel: ch, value } if *ch == channel.number() => Some(*value),
            _ => None,
        })
    }

    #[test]
    fn test_deadzone_zero_exactly_inside_band() {
        for d in [0.0, 0.05, 0.2, 0.5, 0.9] {
            for x in grid(400) {
                let y = apply_deadzone(x, d);
                if x.abs() < d {
                    assert_eq!(y, 0.0, "x={x} d={d}");
                } else if x.abs() > d {
                    assert_ne!(y, 0.0, "x={x} d={d}");
                    assert_eq!(y.signum(), x.signum());
                }
            }
        }
    }

    #[test]
    fn test_deadzone_reaches_full_range() {
        for d in [0.0, 0.05, 0.3, 0.95] {
            assert_eq!(apply_deadzone(1.0, d), 1.0);
            assert_eq!(apply_deadzone(-1.0, d), -1.0);
        }
    }

    #[test]
    fn test_deadzone_is_continuous_at_edge() {
        let d = 0.05;
        let just_outside = apply_deadzone(d + 1e-9, d);
        assert!(just_outside.abs() < 1e-6);
        assert_eq!(apply_deadzone(f64::NAN, d), 0.0);
    }

    #[test]
    fn test_pwm_mapping_is_monotonic_and_bounded() {
        let mut prev = 0u16;
        for x in grid(1000) {
            let pwm = axis_to_pwm(x);
            assert!((PWM_MIN..=PWM_MAX).contains(&pwm));
            assert!(pwm >= prev);
            prev = pwm;
        }
        assert_eq!(axis_to_pwm(-1.0), 1000);
        assert_eq!(axis_to_pwm(0.0), 1500);
        assert_eq!(axis_to_pwm(1.0), 2000);
        assert_eq!(axis_to_pwm(7.0), 2000);
    }

    #[test]
    fn test_throttle_integration_stays_bounded() {
        let mut t = ThrottleIntegrator::default();
        let pattern = [1.0, 1.0, -0.3, 0.7, -1.0, 0.05, 1.0];
        for i in 0..2_000 {
            let axis = pattern[i % pattern.len()] * if i % 400 < 200 { 1.0 } else { -1.0 };
            let v = t.step(axis, 37.0);
            assert!((PWM_MIN..=PWM_MAX).contains(&v));
        }
        for _ in 0..500 {
            t.step(1.0, 10.0);
        }
        assert_eq!(t.value(), PWM_MAX);
        for _ in 0..500 {
            t.step(-1.0, 10.0);
        }
        assert_eq!(t.value(), PWM_MIN);
    }

    #[test]
    fn test_throttle_holds_when_stick_centred() {
        let mut sampler = JoystickSampler::new(JoystickSettings::default());
        // Stick up (negative on device) for ten ticks.
        for _ in 0..10 {
            sampler.tick(&snapshot([0.0, -1.0, 0.0, 0.0], &[]));
        }
        let climbed = sampler.frame().throttle;
        assert_eq!(climbed, 1100);
        sampler.tick(&snapshot([0.0, 0.0, 0.0, 0.0], &[]));
        assert_eq!(sampler.frame().throttle, climbed);
    }

    #[test]
    fn test_first_tick_sends_all_channels() {
        let mut sampler = JoystickSampler::new(JoystickSettings::default());
        let commands = sampler.tick(&GamepadSnapshot::default());
        assert_eq!(commands.len(), 4);
        assert_eq!(pwm_of(&commands, Channel::Throttle), Some(1000));
        assert_eq!(pwm_of(&commands, Channel::Yaw), Some(1500));
    }

    #[test]
    fn test_change_gate_suppresses_small_moves() {
        let mut sampler = JoystickSampler::new(JoystickSettings {
            deadzone: 0.0,
            ..Default::default()
        });
        sampler.tick(&GamepadSnapshot::default());

        // 0.006 * 500 = 3 µs: below the gate.
        let commands = sampler.tick(&snapshot([0.006, 0.0, 0.0, 0.0], &[]));
        assert_eq!(pwm_of(&commands, Channel::Yaw), None);
        assert_eq!(sampler.frame().yaw, 1503);

        // 0.01 * 500 = 5 µs from the last sent value: sent.
        let commands = sampler.tick(&snapshot([0.01, 0.0, 0.0, 0.0], &[]));
        assert_eq!(pwm_of(&commands, Channel::Yaw), Some(1505));
    }

    #[test]
    fn test_tilt_buttons_are_edge_triggered() {
        let mut sampler = JoystickSampler::new(JoystickSettings::default());
        let mut buttons = vec![false; 6];
        sampler.tick(&snapshot([0.0; 4], &buttons));

        buttons[4] = true;
        let pressed = sampler.tick(&snapshot([0.0; 4], &buttons));
        assert!(pressed.contains(&Command::CameraTilt(TiltDirection::Up)));

        let held = sampler.tick(&snapshot([0.0; 4], &buttons));
        assert!(!held.contains(&Command::CameraTilt(TiltDirection::Up)));

        buttons[4] = false;
        buttons[5] = true;
        let other = sampler.tick(&snapshot([0.0; 4], &buttons));
        assert!(other.contains(&Command::CameraTilt(TiltDirection::Down)));
        assert!(!other.contains(&Command::CameraTilt(TiltDirection::Up)));
    }

    #[test]
    fn test_reset_returns_to_neutral() {
        let mut sampler = JoystickSampler::new(JoystickSettings::default());
        for _ in 0..5 {
            sampler.tick(&snapshot([1.0, -1.0, -1.0, 1.0], &[]));
        }
        let before = sampler.frame().revision;
        assert_ne!(sampler.frame().roll, PWM_CENTER);

        sampler.reset();
        let frame = sampler.frame();
        assert_eq!(
            (frame.roll, frame.pitch, frame.throttle, frame.yaw),
            (1500, 1500, 1000, 1500)
        );
        assert!(frame.revision > before);
        assert_eq!(sampler.tick(&GamepadSnapshot::default()).len(), 4);
    }
}
