//! Pad and button LED feedback.
//!
//! In user mode the surface lights a pad when it receives a Note On on the
//! pad's note, and a button when it receives a CC on the button's number. The
//! velocity (or CC value) is an index into the device palette; the MIDI
//! channel selects the animation.

use crate::event::ButtonId;
use crate::profile::DeviceProfile;

/// Palette indices common to both generations.
pub mod colors {
    pub const OFF: u8 = 0;
    pub const RED: u8 = 5;
    pub const ORANGE: u8 = 9;
    pub const YELLOW: u8 = 13;
    pub const GREEN: u8 = 17;
    pub const CYAN: u8 = 33;
    pub const BLUE: u8 = 37;
    pub const PURPLE: u8 = 41;
    pub const PINK: u8 = 45;
    pub const GRAY_DARK: u8 = 117;
    pub const GRAY_LIGHT: u8 = 118;
    pub const WHITE: u8 = 119;
}

/// LED animation, carried in the MIDI channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Animation {
    #[default]
    Static,
    /// Pulse at the given rate (1 = 1/24 .. 5 = 1/2).
    Pulse(u8),
    /// Blink at the given rate (1 = 1/24 .. 5 = 1/2).
    Blink(u8),
}

impl Animation {
    pub fn channel(self) -> u8 {
        match self {
            Animation::Static => 0,
            Animation::Pulse(rate) => 5 + rate.clamp(1, 5),
            Animation::Blink(rate) => 10 + rate.clamp(1, 5),
        }
    }
}

/// Color and animation for a single LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedColor {
    /// Palette index
    pub color: u8,
    pub animation: Animation,
}

impl LedColor {
    pub const fn new(color: u8) -> Self {
        Self {
            color,
            animation: Animation::Static,
        }
    }

    pub const fn off() -> Self {
        Self::new(colors::OFF)
    }

    pub const fn with_animation(color: u8, animation: Animation) -> Self {
        Self { color, animation }
    }
}

/// Note On lighting pad `index` (0-63), or `None` if the pad does not exist.
pub fn pad_color(profile: &DeviceProfile, index: u8, color: LedColor) -> Option<[u8; 3]> {
    let note = profile.controls.pads.number_of(index)?;
    Some([0x90 | color.animation.channel(), note, color.color & 0x7F])
}

/// CC lighting `button`, or `None` if this generation has no such button.
pub fn button_color(profile: &DeviceProfile, button: ButtonId, color: LedColor) -> Option<[u8; 3]> {
    let cc = profile.controls.button_cc(button)?;
    Some([0xB0 | color.animation.channel(), cc, color.color & 0x7F])
}

/// Pad LED state with dirty tracking, so only changes go on the wire.
pub struct LedState {
    profile: &'static DeviceProfile,
    pads: Vec<LedColor>,
    dirty: Vec<bool>,
}

impl LedState {
    /// All pads off and marked dirty.
    pub fn new(profile: &'static DeviceProfile) -> Self {
        let count = profile.controls.pads.count as usize;
        Self {
            profile,
            pads: vec![LedColor::off(); count],
            dirty: vec![true; count],
        }
    }

    pub fn pad(&self, index: u8) -> Option<LedColor> {
        self.pads.get(index as usize).copied()
    }

    pub fn set_pad(&mut self, index: u8, color: LedColor) {
        if let Some(slot) = self.pads.get_mut(index as usize) {
            if *slot != color {
                *slot = color;
                self.dirty[index as usize] = true;
            }
        }
    }

    /// Set pad by grid position, row 0 being the bottom row.
    pub fn set_grid(&mut self, row: u8, col: u8, color: LedColor) {
        if row < 8 && col < 8 {
            self.set_pad(row * 8 + col, color);
        }
    }

    pub fn clear(&mut self) {
        for index in 0..self.pads.len() as u8 {
            self.set_pad(index, LedColor::off());
        }
    }

    /// Messages for every changed pad; clears the dirty flags.
    pub fn take_messages(&mut self) -> Vec<[u8; 3]> {
        let mut messages = Vec::new();
        for (index, dirty) in self.dirty.iter_mut().enumerate() {
            if *dirty {
                if let Some(message) = pad_color(self.profile, index as u8, self.pads[index]) {
                    messages.push(message);
                }
                *dirty = false;
            }
        }
        messages
    }

    /// Messages for every pad (full refresh).
    pub fn all_messages(&self) -> Vec<[u8; 3]> {
        self.pads
            .iter()
            .enumerate()
            .filter_map(|(index, color)| pad_color(self.profile, index as u8, *color))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::DeviceKind;

    #[test]
    fn test_pad_color_message() {
        let profile = DeviceKind::Push3.profile();
        assert_eq!(pad_color(profile, 0, LedColor::new(colors::RED)), Some([0x90, 36, 5]));
        assert_eq!(pad_color(profile, 63, LedColor::new(colors::WHITE)), Some([0x90, 99, 119]));
        assert_eq!(pad_color(profile, 64, LedColor::new(colors::WHITE)), None);
    }

    #[test]
    fn test_animation_channel() {
        let profile = DeviceKind::Push2.profile();
        let blink = LedColor::with_animation(colors::BLUE, Animation::Blink(5));
        assert_eq!(pad_color(profile, 1, blink), Some([0x9F, 37, 37]));
        let pulse = LedColor::with_animation(colors::GREEN, Animation::Pulse(9));
        assert_eq!(pad_color(profile, 1, pulse), Some([0x9A, 37, 17]));
    }

    #[test]
    fn test_button_color_message() {
        let profile = DeviceKind::Push2.profile();
        let cc = profile.controls.button_cc(ButtonId::Play).unwrap();
        assert_eq!(
            button_color(profile, ButtonId::Play, LedColor::new(colors::GREEN)),
            Some([0xB0, cc, 17])
        );
        // Push 2 has no volume button
        assert_eq!(button_color(profile, ButtonId::Volume, LedColor::new(colors::GREEN)), None);
    }

    #[test]
    fn test_dirty_tracking() {
        let mut state = LedState::new(DeviceKind::Push3.profile());
        assert_eq!(state.take_messages().len(), 64);
        assert!(state.take_messages().is_empty());

        state.set_grid(7, 7, LedColor::new(colors::PINK));
        state.set_pad(0, LedColor::off());
        assert_eq!(state.take_messages(), vec![[0x90, 99, 45]]);
        assert_eq!(state.pad(63), Some(LedColor::new(colors::PINK)));

        state.clear();
        assert_eq!(state.take_messages(), vec![[0x90, 99, 0]]);
        assert_eq!(state.all_messages().len(), 64);
    }
}
