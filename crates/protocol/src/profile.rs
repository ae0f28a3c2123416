//! Static device profiles for the supported Push generations.
//!
//! Everything that differs between hardware generations lives here as data:
//! USB identity, display geometry, transport pacing, the vendor SysEx address,
//! the supported vendor command set and the MIDI control map. Profiles are
//! `'static` values and are passed by reference to every other component.
//!
//! ```text
//!                Push 2            Push 3
//! product id     0x1967            0x1969
//! chunk size     512 bytes         16 384 bytes
//! frame rate     ~30 fps           ~60 fps
//! encoder touch  Note 0-7          CC 0-7
//! jog wheel      -                 CC 70 / 93 / 95
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::event::{ButtonId, Direction, JogKind};
use crate::sysex::VendorCommand;

/// Ableton USB vendor id, shared by both generations.
pub const ABLETON_VENDOR_ID: u16 = 0x2982;

/// Ableton SysEx manufacturer id.
pub const ABLETON_MANUFACTURER_ID: [u8; 3] = [0x00, 0x21, 0x1D];

/// Frame header sent before every frame. Never encrypted.
pub const FRAME_HEADER: [u8; 16] = [
    0xFF, 0xCC, 0xAA, 0x88, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// XOR key applied to the display payload (repeating every 4 bytes).
pub const DISPLAY_XOR_KEY: [u8; 4] = [0xE7, 0xF3, 0xE7, 0xFF];

/// Named encoder indices following the eight track encoders.
pub const ENCODER_MASTER: u8 = 8;
pub const ENCODER_TEMPO: u8 = 9;
pub const ENCODER_SWING: u8 = 10;

/// Supported hardware generations.
///
/// Stored in configuration as `"push2"` / `"push3"`; reading also accepts
/// the product names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceKind {
    Push2,
    Push3,
}

impl DeviceKind {
    /// All supported kinds, in release order.
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Push2, DeviceKind::Push3];

    /// The immutable profile for this generation.
    pub fn profile(self) -> &'static DeviceProfile {
        match self {
            DeviceKind::Push2 => &PUSH2,
            DeviceKind::Push3 => &PUSH3,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            DeviceKind::Push2 => "push2",
            DeviceKind::Push3 => "push3",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

impl FromStr for DeviceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "push2" | "abletonpush2" => Ok(DeviceKind::Push2),
            "push3" | "abletonpush3" => Ok(DeviceKind::Push3),
            _ => Err(ConfigError::UnknownDevice(s.to_string())),
        }
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        kind.key().to_string()
    }
}

/// USB identification and the interface to claim before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub alt_setting: u8,
    /// Bulk OUT endpoint for display data
    pub endpoint: u8,
}

/// Display geometry in pixels, plus per-line zero padding in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub width: usize,
    pub height: usize,
    pub line_padding: usize,
}

impl DisplayGeometry {
    /// Bytes of pixel data per line (RGB565, 2 bytes per pixel).
    pub const fn visible_bytes_per_line(&self) -> usize {
        self.width * 2
    }

    /// Bytes per line on the wire, including padding.
    pub const fn line_stride(&self) -> usize {
        self.visible_bytes_per_line() + self.line_padding
    }

    /// Payload size (excluding the header).
    pub const fn payload_len(&self) -> usize {
        self.height * self.line_stride()
    }
}

/// Manufacturer and family bytes that prefix every vendor SysEx message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysExAddress {
    pub manufacturer: [u8; 3],
    pub family: [u8; 2],
}

/// Which MIDI channel-voice message a control range is reported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Note,
    ControlChange,
}

/// A contiguous block of note or CC numbers, mapped to indices `0..count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub kind: MessageKind,
    pub first: u8,
    pub count: u8,
}

impl ControlRange {
    pub const fn new(kind: MessageKind, first: u8, count: u8) -> Self {
        Self { kind, first, count }
    }

    /// Index of `number` inside this range, if it is reported as `kind`.
    pub fn index_of(&self, kind: MessageKind, number: u8) -> Option<u8> {
        if kind != self.kind || number < self.first {
            return None;
        }
        let index = number - self.first;
        (index < self.count).then_some(index)
    }

    /// Note or CC number of a given index.
    pub fn number_of(&self, index: u8) -> Option<u8> {
        (index < self.count).then(|| self.first + index)
    }
}

/// Whether a button reports "pressed" as 127 or as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Normal,
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonBinding {
    pub cc: u8,
    pub id: ButtonId,
    pub polarity: Polarity,
}

const fn button(cc: u8, id: ButtonId) -> ButtonBinding {
    ButtonBinding {
        cc,
        id,
        polarity: Polarity::Normal,
    }
}

/// A jog wheel CC. A fixed `direction` means the CC itself encodes it;
/// `None` means the value does (127 = left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JogBinding {
    pub cc: u8,
    pub kind: JogKind,
    pub direction: Option<Direction>,
}

/// The per-generation MIDI control layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMap {
    /// 8x8 pad grid, Note On/Off
    pub pads: ControlRange,
    pub encoder_touch: ControlRange,
    pub encoder_turn: ControlRange,
    /// Touch sensors of the named encoders: (number, encoder index)
    pub named_touch: &'static [(u8, u8)],
    /// Rotation CCs of the named encoders: (cc, encoder index)
    pub named_turn: &'static [(u8, u8)],
    pub jog: &'static [JogBinding],
    pub buttons: &'static [ButtonBinding],
}

impl ControlMap {
    pub fn button(&self, cc: u8) -> Option<&ButtonBinding> {
        self.buttons.iter().find(|b| b.cc == cc)
    }

    /// Reverse lookup used for LED feedback.
    pub fn button_cc(&self, id: ButtonId) -> Option<u8> {
        self.buttons.iter().find(|b| b.id == id).map(|b| b.cc)
    }

    pub fn jog(&self, cc: u8) -> Option<&JogBinding> {
        self.jog.iter().find(|j| j.cc == cc)
    }
}

/// Immutable capability descriptor for one hardware generation.
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    pub name: &'static str,
    /// Substring used to find the MIDI ports
    pub midi_port_hint: &'static str,
    pub usb: UsbIdentity,
    pub display: DisplayGeometry,
    pub frame_header: [u8; 16],
    /// `None` when the display payload is sent in the clear
    pub xor_key: Option<[u8; 4]>,
    pub chunk_size: usize,
    pub frame_interval: Duration,
    pub sysex: SysExAddress,
    pub commands: &'static [VendorCommand],
    pub controls: ControlMap,
}

impl DeviceProfile {
    pub fn supports(&self, command: VendorCommand) -> bool {
        self.commands.contains(&command)
    }

    pub fn is_encrypted(&self) -> bool {
        self.xor_key.is_some()
    }

    /// Display payload size, excluding the header.
    pub fn payload_len(&self) -> usize {
        self.display.payload_len()
    }

    /// Full frame size, header included.
    pub fn frame_len(&self) -> usize {
        self.frame_header.len() + self.payload_len()
    }

    /// Number of bulk writes needed for one payload.
    pub fn chunks_per_frame(&self) -> usize {
        self.payload_len().div_ceil(self.chunk_size)
    }
}

const SHARED_DISPLAY: DisplayGeometry = DisplayGeometry {
    width: 960,
    height: 160,
    line_padding: 128,
};

const SHARED_SYSEX: SysExAddress = SysExAddress {
    manufacturer: ABLETON_MANUFACTURER_ID,
    family: [0x01, 0x01],
};

const PUSH2_COMMANDS: &[VendorCommand] = &[
    VendorCommand::SetLedBrightness,
    VendorCommand::SetDisplayBrightness,
    VendorCommand::SetMidiMode,
    VendorCommand::SetCurveEntries,
];

// The legacy per-entry curve command is unverified on Push 3, so only the
// bulk upload is listed.
const PUSH3_COMMANDS: &[VendorCommand] = &[VendorCommand::SetMidiMode, VendorCommand::UploadCurve];

const PUSH2_NAMED_TOUCH: &[(u8, u8)] = &[(8, ENCODER_MASTER), (9, ENCODER_SWING), (10, ENCODER_TEMPO)];
const PUSH2_NAMED_TURN: &[(u8, u8)] = &[(79, ENCODER_MASTER), (14, ENCODER_TEMPO), (15, ENCODER_SWING)];

const PUSH3_NAMED_TOUCH: &[(u8, u8)] = &[(8, ENCODER_MASTER), (10, ENCODER_TEMPO)];
const PUSH3_NAMED_TURN: &[(u8, u8)] = &[(79, ENCODER_MASTER), (14, ENCODER_TEMPO)];

const PUSH3_JOG: &[JogBinding] = &[
    JogBinding {
        cc: 70,
        kind: JogKind::Scroll,
        direction: None,
    },
    JogBinding {
        cc: 93,
        kind: JogKind::Nudge,
        direction: Some(Direction::Left),
    },
    JogBinding {
        cc: 95,
        kind: JogKind::Nudge,
        direction: Some(Direction::Right),
    },
];

const PUSH2_BUTTONS: &[ButtonBinding] = &[
    button(3, ButtonId::TapTempo),
    button(9, ButtonId::Metronome),
    button(20, ButtonId::LowerDisplay(0)),
    button(21, ButtonId::LowerDisplay(1)),
    button(22, ButtonId::LowerDisplay(2)),
    button(23, ButtonId::LowerDisplay(3)),
    button(24, ButtonId::LowerDisplay(4)),
    button(25, ButtonId::LowerDisplay(5)),
    button(26, ButtonId::LowerDisplay(6)),
    button(27, ButtonId::LowerDisplay(7)),
    button(28, ButtonId::Master),
    button(29, ButtonId::Stop),
    button(30, ButtonId::Setup),
    button(31, ButtonId::Layout),
    button(32, ButtonId::Convert),
    button(36, ButtonId::RepeatRate(0)),
    button(37, ButtonId::RepeatRate(1)),
    button(38, ButtonId::RepeatRate(2)),
    button(39, ButtonId::RepeatRate(3)),
    button(40, ButtonId::RepeatRate(4)),
    button(41, ButtonId::RepeatRate(5)),
    button(42, ButtonId::RepeatRate(6)),
    button(43, ButtonId::RepeatRate(7)),
    button(44, ButtonId::Left),
    button(45, ButtonId::Right),
    button(46, ButtonId::Up),
    button(47, ButtonId::Down),
    button(48, ButtonId::Select),
    button(49, ButtonId::Shift),
    button(50, ButtonId::Note),
    button(51, ButtonId::Session),
    button(52, ButtonId::AddDevice),
    button(53, ButtonId::AddTrack),
    button(54, ButtonId::OctaveDown),
    button(55, ButtonId::OctaveUp),
    button(56, ButtonId::Repeat),
    button(57, ButtonId::Accent),
    button(58, ButtonId::Scale),
    button(59, ButtonId::User),
    button(60, ButtonId::Mute),
    button(61, ButtonId::Solo),
    button(62, ButtonId::PageLeft),
    button(63, ButtonId::PageRight),
    button(85, ButtonId::Play),
    button(86, ButtonId::Record),
    button(87, ButtonId::New),
    button(88, ButtonId::Duplicate),
    button(89, ButtonId::Automate),
    button(90, ButtonId::FixedLength),
    button(102, ButtonId::UpperDisplay(0)),
    button(103, ButtonId::UpperDisplay(1)),
    button(104, ButtonId::UpperDisplay(2)),
    button(105, ButtonId::UpperDisplay(3)),
    button(106, ButtonId::UpperDisplay(4)),
    button(107, ButtonId::UpperDisplay(5)),
    button(108, ButtonId::UpperDisplay(6)),
    button(109, ButtonId::UpperDisplay(7)),
    button(110, ButtonId::Device),
    button(111, ButtonId::Browse),
    button(112, ButtonId::Mix),
    button(113, ButtonId::Clip),
    button(116, ButtonId::Quantize),
    button(117, ButtonId::DoubleLoop),
    button(118, ButtonId::Delete),
    button(119, ButtonId::Undo),
];

const PUSH3_BUTTONS: &[ButtonBinding] = &[
    button(3, ButtonId::TapTempo),
    button(9, ButtonId::Metronome),
    button(11, ButtonId::JogTouch),
    button(15, ButtonId::SwingTempo),
    button(20, ButtonId::LowerDisplay(0)),
    button(21, ButtonId::LowerDisplay(1)),
    button(22, ButtonId::LowerDisplay(2)),
    button(23, ButtonId::LowerDisplay(3)),
    button(24, ButtonId::LowerDisplay(4)),
    button(25, ButtonId::LowerDisplay(5)),
    button(26, ButtonId::LowerDisplay(6)),
    button(27, ButtonId::LowerDisplay(7)),
    button(28, ButtonId::Master),
    button(29, ButtonId::Stop),
    button(30, ButtonId::Setup),
    button(31, ButtonId::Layout),
    button(32, ButtonId::Add),
    button(33, ButtonId::Swap),
    button(35, ButtonId::Convert),
    button(36, ButtonId::RepeatRate(0)),
    button(37, ButtonId::RepeatRate(1)),
    button(38, ButtonId::RepeatRate(2)),
    button(39, ButtonId::RepeatRate(3)),
    button(40, ButtonId::RepeatRate(4)),
    button(41, ButtonId::RepeatRate(5)),
    button(42, ButtonId::RepeatRate(6)),
    button(43, ButtonId::RepeatRate(7)),
    button(44, ButtonId::Left),
    button(45, ButtonId::Right),
    button(46, ButtonId::Up),
    button(47, ButtonId::Down),
    button(48, ButtonId::Select),
    button(49, ButtonId::Shift),
    button(50, ButtonId::Note),
    button(51, ButtonId::Session),
    button(54, ButtonId::OctaveDown),
    button(55, ButtonId::OctaveUp),
    button(56, ButtonId::Repeat),
    button(57, ButtonId::Accent),
    button(58, ButtonId::Scale),
    button(59, ButtonId::User),
    button(60, ButtonId::Mute),
    button(61, ButtonId::Solo),
    button(62, ButtonId::PageLeft),
    button(63, ButtonId::PageRight),
    button(65, ButtonId::Capture),
    button(80, ButtonId::Sets),
    button(81, ButtonId::Learn),
    button(82, ButtonId::Save),
    button(83, ButtonId::Lock),
    button(85, ButtonId::Play),
    button(86, ButtonId::Record),
    button(88, ButtonId::Duplicate),
    button(89, ButtonId::Automate),
    button(90, ButtonId::FixedLength),
    button(91, ButtonId::DpadCenter),
    button(92, ButtonId::New),
    button(94, ButtonId::JogPress),
    button(102, ButtonId::UpperDisplay(0)),
    button(103, ButtonId::UpperDisplay(1)),
    button(104, ButtonId::UpperDisplay(2)),
    button(105, ButtonId::UpperDisplay(3)),
    button(106, ButtonId::UpperDisplay(4)),
    button(107, ButtonId::UpperDisplay(5)),
    button(108, ButtonId::UpperDisplay(6)),
    button(109, ButtonId::UpperDisplay(7)),
    button(110, ButtonId::Device),
    // Reports 0 on press and 127 on release
    ButtonBinding {
        cc: 111,
        id: ButtonId::Volume,
        polarity: Polarity::Inverted,
    },
    button(112, ButtonId::Mix),
    button(113, ButtonId::Clip),
    button(116, ButtonId::Quantize),
    button(117, ButtonId::DoubleLoop),
    button(118, ButtonId::Delete),
    button(119, ButtonId::Undo),
];

static PUSH2: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Push2,
    name: "Ableton Push 2",
    midi_port_hint: "Push 2",
    usb: UsbIdentity {
        vendor_id: ABLETON_VENDOR_ID,
        product_id: 0x1967,
        interface: 0,
        alt_setting: 0,
        endpoint: 0x01,
    },
    display: SHARED_DISPLAY,
    frame_header: FRAME_HEADER,
    xor_key: Some(DISPLAY_XOR_KEY),
    chunk_size: 512,
    frame_interval: Duration::from_millis(33),
    sysex: SHARED_SYSEX,
    commands: PUSH2_COMMANDS,
    controls: ControlMap {
        pads: ControlRange::new(MessageKind::Note, 36, 64),
        encoder_touch: ControlRange::new(MessageKind::Note, 0, 8),
        encoder_turn: ControlRange::new(MessageKind::ControlChange, 71, 8),
        named_touch: PUSH2_NAMED_TOUCH,
        named_turn: PUSH2_NAMED_TURN,
        jog: &[],
        buttons: PUSH2_BUTTONS,
    },
};

static PUSH3: DeviceProfile = DeviceProfile {
    kind: DeviceKind::Push3,
    name: "Ableton Push 3",
    midi_port_hint: "Push 3",
    usb: UsbIdentity {
        vendor_id: ABLETON_VENDOR_ID,
        product_id: 0x1969,
        interface: 0,
        alt_setting: 0,
        endpoint: 0x01,
    },
    display: SHARED_DISPLAY,
    frame_header: FRAME_HEADER,
    xor_key: Some(DISPLAY_XOR_KEY),
    chunk_size: 16_384,
    frame_interval: Duration::from_micros(16_667),
    sysex: SHARED_SYSEX,
    commands: PUSH3_COMMANDS,
    controls: ControlMap {
        pads: ControlRange::new(MessageKind::Note, 36, 64),
        encoder_touch: ControlRange::new(MessageKind::ControlChange, 0, 8),
        encoder_turn: ControlRange::new(MessageKind::ControlChange, 71, 8),
        named_touch: PUSH3_NAMED_TOUCH,
        named_turn: PUSH3_NAMED_TURN,
        jog: PUSH3_JOG,
        buttons: PUSH3_BUTTONS,
    },
};

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_frame_geometry() {
        for kind in DeviceKind::ALL {
            let profile = kind.profile();
            assert_eq!(profile.display.line_stride(), 2048);
            assert_eq!(profile.payload_len(), 327_680);
            assert_eq!(profile.frame_len(), 327_696);
        }
    }

    #[test]
    fn test_chunk_counts() {
        assert_eq!(DeviceKind::Push2.profile().chunks_per_frame(), 640);
        assert_eq!(DeviceKind::Push3.profile().chunks_per_frame(), 20);
    }

    #[test]
    fn test_usb_identity() {
        assert_eq!(DeviceKind::Push2.profile().usb.product_id, 0x1967);
        assert_eq!(DeviceKind::Push3.profile().usb.product_id, 0x1969);
        for kind in DeviceKind::ALL {
            assert_eq!(kind.profile().usb.vendor_id, ABLETON_VENDOR_ID);
            assert_eq!(kind.profile().kind, kind);
        }
    }

    #[test]
    fn test_button_tables_have_unique_ccs() {
        for kind in DeviceKind::ALL {
            let controls = &kind.profile().controls;
            let mut seen = HashSet::new();
            for binding in controls.buttons {
                assert!(seen.insert(binding.cc), "{kind}: duplicate CC {}", binding.cc);
                assert!(controls.jog(binding.cc).is_none());
            }
        }
    }

    #[test]
    fn test_control_range_lookup() {
        let pads = DeviceKind::Push3.profile().controls.pads;
        assert_eq!(pads.index_of(MessageKind::Note, 36), Some(0));
        assert_eq!(pads.index_of(MessageKind::Note, 99), Some(63));
        assert_eq!(pads.index_of(MessageKind::Note, 100), None);
        assert_eq!(pads.index_of(MessageKind::Note, 35), None);
        assert_eq!(pads.index_of(MessageKind::ControlChange, 40), None);
        assert_eq!(pads.number_of(63), Some(99));
        assert_eq!(pads.number_of(64), None);
    }

    #[test]
    fn test_curve_command_support_differs() {
        let push2 = DeviceKind::Push2.profile();
        let push3 = DeviceKind::Push3.profile();
        assert!(push2.supports(VendorCommand::SetCurveEntries));
        assert!(!push2.supports(VendorCommand::UploadCurve));
        assert!(push3.supports(VendorCommand::UploadCurve));
        assert!(!push3.supports(VendorCommand::SetCurveEntries));
    }

    #[test]
    fn test_device_kind_parsing() {
        assert_eq!("push2".parse::<DeviceKind>().unwrap(), DeviceKind::Push2);
        assert_eq!("Ableton Push 3".parse::<DeviceKind>().unwrap(), DeviceKind::Push3);
        assert!(matches!(
            "launchpad".parse::<DeviceKind>(),
            Err(ConfigError::UnknownDevice(name)) if name == "launchpad"
        ));

        for kind in DeviceKind::ALL {
            assert_eq!(kind.to_string().parse::<DeviceKind>().unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind.key()));
        }
    }
}
