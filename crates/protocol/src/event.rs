//! Control event decoding.
//!
//! Turns one raw MIDI message into a semantic [`ControlEvent`] using the
//! profile's control map. Decoding is a pure function: it keeps no state and
//! never blocks. Messages that are well formed but not in the map come back as
//! [`ControlEvent::Unknown`] rather than being dropped.

use thiserror::Error;

use crate::profile::{DeviceProfile, MessageKind, Polarity};
use crate::sysex::{self, IdentityReply, SysExMessage, SYSEX_END, SYSEX_START};

const NOTE_OFF: u8 = 0x80;
const NOTE_ON: u8 = 0x90;
const POLY_PRESSURE: u8 = 0xA0;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const PITCH_BEND: u8 = 0xE0;

/// Rotation value that means "left" (counter-clockwise).
pub const ROTATION_LEFT: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed MIDI message: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    /// Encoders report one step per message: 127 for left, anything else right.
    pub fn from_rotation(value: u8) -> Self {
        if value == ROTATION_LEFT {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JogKind {
    Scroll,
    Nudge,
}

/// Named buttons across both generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    TapTempo,
    Metronome,
    SwingTempo,
    /// Buttons below the display, 0-7 left to right
    LowerDisplay(u8),
    /// Buttons above the pads, 0-7 left to right
    UpperDisplay(u8),
    Master,
    Stop,
    Setup,
    Layout,
    Convert,
    Add,
    Swap,
    AddDevice,
    AddTrack,
    /// Note repeat rates, 1/4 .. 1/32t
    RepeatRate(u8),
    Left,
    Right,
    Up,
    Down,
    DpadCenter,
    Select,
    Shift,
    Note,
    Session,
    OctaveDown,
    OctaveUp,
    Repeat,
    Accent,
    Scale,
    User,
    Mute,
    Solo,
    PageLeft,
    PageRight,
    Capture,
    Sets,
    Learn,
    Save,
    Lock,
    Play,
    Record,
    New,
    Duplicate,
    Automate,
    FixedLength,
    Device,
    Browse,
    Volume,
    Mix,
    Clip,
    Quantize,
    DoubleLoop,
    Delete,
    Undo,
    JogTouch,
    JogPress,
}

/// A decoded control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Pad {
        index: u8,
        velocity: u8,
        pressed: bool,
    },
    /// Polyphonic aftertouch on a pad
    PadPressure {
        index: u8,
        pressure: u8,
    },
    EncoderTouch {
        index: u8,
        touched: bool,
    },
    /// One detent. Callers accumulate messages for rotation speed.
    EncoderTurn {
        index: u8,
        direction: Direction,
        magnitude: u8,
    },
    Button {
        id: ButtonId,
        pressed: bool,
    },
    Jog {
        kind: JogKind,
        direction: Direction,
    },
    Identity(IdentityReply),
    /// Vendor SysEx from the device
    Vendor(SysExMessage),
    /// Well-formed but outside the known control map
    Unknown {
        raw: Vec<u8>,
    },
}

impl ControlEvent {
    fn unknown(bytes: &[u8]) -> Self {
        ControlEvent::Unknown {
            raw: bytes.to_vec(),
        }
    }
}

/// Expected length of a channel voice message with this status.
fn channel_message_len(status: u8) -> Option<usize> {
    match status & 0xF0 {
        NOTE_OFF | NOTE_ON | POLY_PRESSURE | CONTROL_CHANGE | PITCH_BEND => Some(3),
        PROGRAM_CHANGE | CHANNEL_PRESSURE => Some(2),
        _ => None,
    }
}

/// Decode one complete MIDI message.
pub fn decode(profile: &DeviceProfile, bytes: &[u8]) -> Result<ControlEvent, DecodeError> {
    let Some(&status) = bytes.first() else {
        return Err(DecodeError::Malformed("empty message".to_string()));
    };

    if status == SYSEX_START {
        return decode_sysex(profile, bytes);
    }

    if status < 0x80 {
        return Err(DecodeError::Malformed(format!(
            "expected status byte, got 0x{status:02X}"
        )));
    }

    // System common / realtime (clock, active sensing, ...) are not control events
    let Some(expected) = channel_message_len(status) else {
        return Ok(ControlEvent::unknown(bytes));
    };

    if bytes.len() != expected {
        return Err(DecodeError::Malformed(format!(
            "status 0x{status:02X} expects {expected} bytes, got {}",
            bytes.len()
        )));
    }
    if let Some(b) = bytes[1..].iter().find(|b| **b > 0x7F) {
        return Err(DecodeError::Malformed(format!(
            "data byte 0x{b:02X} is not 7-bit"
        )));
    }

    let event = match status & 0xF0 {
        NOTE_ON => decode_note(profile, bytes, bytes[1], bytes[2], true),
        NOTE_OFF => decode_note(profile, bytes, bytes[1], bytes[2], false),
        POLY_PRESSURE => match profile.controls.pads.index_of(MessageKind::Note, bytes[1]) {
            Some(index) => ControlEvent::PadPressure {
                index,
                pressure: bytes[2],
            },
            None => ControlEvent::unknown(bytes),
        },
        CONTROL_CHANGE => decode_cc(profile, bytes, bytes[1], bytes[2]),
        _ => ControlEvent::unknown(bytes),
    };

    Ok(event)
}

fn decode_note(profile: &DeviceProfile, bytes: &[u8], note: u8, velocity: u8, on: bool) -> ControlEvent {
    let controls = &profile.controls;
    let pressed = on && velocity > 0;

    if let Some(index) = controls.pads.index_of(MessageKind::Note, note) {
        return ControlEvent::Pad {
            index,
            velocity,
            pressed,
        };
    }

    if let Some(index) = touch_index(profile, MessageKind::Note, note) {
        return ControlEvent::EncoderTouch {
            index,
            touched: pressed,
        };
    }

    ControlEvent::unknown(bytes)
}

fn decode_cc(profile: &DeviceProfile, bytes: &[u8], cc: u8, value: u8) -> ControlEvent {
    let controls = &profile.controls;

    if let Some(binding) = controls.button(cc) {
        let pressed = match binding.polarity {
            Polarity::Normal => value == 127,
            Polarity::Inverted => value == 0,
        };
        return ControlEvent::Button {
            id: binding.id,
            pressed,
        };
    }

    if let Some(jog) = controls.jog(cc) {
        return match jog.direction {
            None => ControlEvent::Jog {
                kind: jog.kind,
                direction: Direction::from_rotation(value),
            },
            Some(direction) if value > 0 => ControlEvent::Jog {
                kind: jog.kind,
                direction,
            },
            // Release of a fixed-direction jog CC carries no motion
            Some(_) => ControlEvent::unknown(bytes),
        };
    }

    if let Some(index) = touch_index(profile, MessageKind::ControlChange, cc) {
        return ControlEvent::EncoderTouch {
            index,
            touched: value > 0,
        };
    }

    let turn = controls
        .encoder_turn
        .index_of(MessageKind::ControlChange, cc)
        .or_else(|| lookup(controls.named_turn, cc));
    if let Some(index) = turn {
        return ControlEvent::EncoderTurn {
            index,
            direction: Direction::from_rotation(value),
            magnitude: 1,
        };
    }

    ControlEvent::unknown(bytes)
}

fn touch_index(profile: &DeviceProfile, kind: MessageKind, number: u8) -> Option<u8> {
    let controls = &profile.controls;
    controls.encoder_touch.index_of(kind, number).or_else(|| {
        // Named touch sensors share the message kind of the track encoders
        (controls.encoder_touch.kind == kind)
            .then(|| lookup(controls.named_touch, number))
            .flatten()
    })
}

fn lookup(table: &[(u8, u8)], number: u8) -> Option<u8> {
    table.iter().find(|(n, _)| *n == number).map(|(_, index)| *index)
}

fn decode_sysex(profile: &DeviceProfile, bytes: &[u8]) -> Result<ControlEvent, DecodeError> {
    if bytes.len() < 2 || bytes[bytes.len() - 1] != SYSEX_END {
        return Err(DecodeError::Malformed("truncated SysEx".to_string()));
    }

    if let Some(identity) = IdentityReply::parse(bytes) {
        return Ok(ControlEvent::Identity(identity));
    }

    match sysex::decode(bytes) {
        Ok(message) if message.is_from(profile) => Ok(ControlEvent::Vendor(message)),
        Ok(_) => Ok(ControlEvent::unknown(bytes)),
        // Short universal messages and other vendors' formats are still valid SysEx
        Err(_) if bytes[1..bytes.len() - 1].iter().all(|b| *b <= 0x7F) => {
            Ok(ControlEvent::unknown(bytes))
        }
        Err(e) => Err(DecodeError::Malformed(e.to_string())),
    }
}
