//! Vendor SysEx encoding and decoding.
//!
//! Wire format: `F0 <manufacturer:3> <family:2> <command:1> <data:0..N> F7`.
//! Every byte between the start and end markers is 7-bit.

use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::profile::DeviceProfile;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Start, manufacturer, family, command, end.
pub const SYSEX_MIN_LEN: usize = 8;

/// Universal non-realtime device inquiry, addressed to all devices.
pub const UNIVERSAL_INQUIRY: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

/// MIDI mode flag for [`VendorCommand::SetMidiMode`].
pub const MIDI_MODE_LIVE: u8 = 0x00;
pub const MIDI_MODE_USER: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SysExError {
    #[error("byte 0x{byte:02X} at offset {index} is not 7-bit")]
    Encoding { index: usize, byte: u8 },

    #[error("malformed SysEx: {0}")]
    Malformed(&'static str),

    #[error("{device} does not support vendor command {command:?}")]
    UnsupportedCommand {
        device: &'static str,
        command: VendorCommand,
    },
}

/// Vendor command byte.
///
/// Commands whose semantics are not documented (RGB LED control, aftertouch
/// mode and others) are carried as [`VendorCommand::Unknown`] with their raw
/// byte and an opaque payload. Equality and hashing go by the wire byte, so
/// `Unknown(0x0A)` is the same command as `SetMidiMode`.
#[derive(Debug, Clone, Copy)]
pub enum VendorCommand {
    SetLedBrightness,
    SetDisplayBrightness,
    /// Payload: one mode byte (0 = Live, 1 = User)
    SetMidiMode,
    /// Legacy curve upload: start index followed by 16 entries
    SetCurveEntries,
    /// Bulk curve upload: optional 4-byte parameter echo, then 128 entries
    UploadCurve,
    Unknown(u8),
}

impl VendorCommand {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x06 => VendorCommand::SetLedBrightness,
            0x08 => VendorCommand::SetDisplayBrightness,
            0x0A => VendorCommand::SetMidiMode,
            0x20 => VendorCommand::SetCurveEntries,
            0x2C => VendorCommand::UploadCurve,
            other => VendorCommand::Unknown(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            VendorCommand::SetLedBrightness => 0x06,
            VendorCommand::SetDisplayBrightness => 0x08,
            VendorCommand::SetMidiMode => 0x0A,
            VendorCommand::SetCurveEntries => 0x20,
            VendorCommand::UploadCurve => 0x2C,
            VendorCommand::Unknown(byte) => byte,
        }
    }
}

impl PartialEq for VendorCommand {
    fn eq(&self, other: &Self) -> bool {
        self.byte() == other.byte()
    }
}

impl Eq for VendorCommand {}

impl Hash for VendorCommand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.byte().hash(state);
    }
}

impl From<u8> for VendorCommand {
    fn from(byte: u8) -> Self {
        Self::from_byte(byte)
    }
}

/// A vendor-specific SysEx message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysExMessage {
    pub manufacturer: [u8; 3],
    pub family: [u8; 2],
    pub command: VendorCommand,
    pub data: Vec<u8>,
}

impl SysExMessage {
    /// `command` is stored in its named form when its byte has one.
    pub fn new(manufacturer: [u8; 3], family: [u8; 2], command: VendorCommand, data: Vec<u8>) -> Self {
        Self {
            manufacturer,
            family,
            command: VendorCommand::from_byte(command.byte()),
            data,
        }
    }

    /// Build a message addressed to `profile`, refusing commands it does not list.
    pub fn for_profile(
        profile: &DeviceProfile,
        command: VendorCommand,
        data: Vec<u8>,
    ) -> Result<Self, SysExError> {
        if !profile.supports(command) {
            return Err(SysExError::UnsupportedCommand {
                device: profile.name,
                command,
            });
        }
        Ok(Self::new(
            profile.sysex.manufacturer,
            profile.sysex.family,
            command,
            data,
        ))
    }

    /// The mode-activation message (mode command + enable flag).
    pub fn user_mode(profile: &DeviceProfile) -> Result<Self, SysExError> {
        Self::for_profile(profile, VendorCommand::SetMidiMode, vec![MIDI_MODE_USER])
    }

    /// True if this message is addressed with `profile`'s manufacturer and family.
    pub fn is_from(&self, profile: &DeviceProfile) -> bool {
        self.manufacturer == profile.sysex.manufacturer && self.family == profile.sysex.family
    }

    pub fn encode(&self) -> Result<Vec<u8>, SysExError> {
        encode(self)
    }
}

/// Encode a message to raw bytes, start and end markers included.
pub fn encode(message: &SysExMessage) -> Result<Vec<u8>, SysExError> {
    let mut bytes = Vec::with_capacity(SYSEX_MIN_LEN + message.data.len());
    bytes.push(SYSEX_START);
    bytes.extend_from_slice(&message.manufacturer);
    bytes.extend_from_slice(&message.family);
    bytes.push(message.command.byte());
    bytes.extend_from_slice(&message.data);

    if let Some((index, &byte)) = bytes.iter().enumerate().skip(1).find(|(_, b)| **b > 0x7F) {
        return Err(SysExError::Encoding { index, byte });
    }

    bytes.push(SYSEX_END);
    Ok(bytes)
}

/// Decode raw bytes into a vendor message.
pub fn decode(bytes: &[u8]) -> Result<SysExMessage, SysExError> {
    if bytes.len() < SYSEX_MIN_LEN {
        return Err(SysExError::Malformed("shorter than the fixed header"));
    }
    if bytes[0] != SYSEX_START {
        return Err(SysExError::Malformed("missing start byte"));
    }
    if bytes[bytes.len() - 1] != SYSEX_END {
        return Err(SysExError::Malformed("missing end byte"));
    }

    let body = &bytes[1..bytes.len() - 1];
    if body.iter().any(|b| *b > 0x7F) {
        return Err(SysExError::Malformed("status byte inside message body"));
    }

    Ok(SysExMessage {
        manufacturer: [body[0], body[1], body[2]],
        family: [body[3], body[4]],
        command: VendorCommand::from_byte(body[5]),
        data: body[6..].to_vec(),
    })
}

/// The universal device inquiry request.
pub fn universal_inquiry() -> Vec<u8> {
    UNIVERSAL_INQUIRY.to_vec()
}

/// Reply to a universal device inquiry.
///
/// `F0 7E <device> 06 02 <manufacturer:3> <family:2> <model:2> <version:4> .. F7`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityReply {
    pub device_id: u8,
    pub manufacturer: [u8; 3],
    pub family: [u8; 2],
    pub model: [u8; 2],
    pub version: [u8; 4],
    /// Trailing vendor bytes (serial number, build info), uninterpreted
    pub extra: Vec<u8>,
}

impl IdentityReply {
    const MIN_LEN: usize = 17;

    /// Returns `None` when `bytes` is not an identity reply.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::MIN_LEN
            || bytes[0] != SYSEX_START
            || bytes[bytes.len() - 1] != SYSEX_END
            || bytes[1] != 0x7E
            || bytes[3..5] != [0x06, 0x02]
        {
            return None;
        }
        let body = &bytes[..bytes.len() - 1];
        Some(Self {
            device_id: body[2],
            manufacturer: [body[5], body[6], body[7]],
            family: [body[8], body[9]],
            model: [body[10], body[11]],
            version: [body[12], body[13], body[14], body[15]],
            extra: body[16..].to_vec(),
        })
    }

    /// Firmware version as "major.minor.build" (build is a 14-bit value).
    pub fn firmware_version(&self) -> String {
        let build = ((self.version[3] as u16) << 7) | self.version[2] as u16;
        format!("{}.{}.{}", self.version[0], self.version[1], build)
    }
}
