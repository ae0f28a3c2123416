//! Device-mode handshake.
//!
//! ```text
//! Uninitialized --send_inquiry--> InquirySent --request_user_mode--> ModeRequested
//!       |                                                                 |
//!       +-----------------------request_user_mode------------------------+
//!                                                                         |
//!                                         confirm_active / observe(ack)   v
//!                                                                  UserModeActive
//!                                                                         |
//!                                                            release      v
//!                                                                     Released
//! ```
//!
//! Pad events and display frames work in any state. Everything else (LED
//! control, curve uploads, other vendor commands) has `UserModeActive` as a
//! precondition; [`Handshake::ensure_user_mode`] checks it. `Released` is
//! terminal: the device is back in Live mode and a new handshake is needed.
//!
//! The state machine has no internal locking. It takes `&mut self` for every
//! transition, so sharing it across threads requires external serialization.

use std::fmt;

use thiserror::Error;

use crate::event::ControlEvent;
use crate::profile::DeviceProfile;
use crate::sysex::{self, SysExError, SysExMessage, VendorCommand, MIDI_MODE_LIVE, MIDI_MODE_USER};
use crate::transport::{MidiSink, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Uninitialized,
    InquirySent,
    ModeRequested,
    UserModeActive,
    Released,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Uninitialized => "uninitialized",
            HandshakeState::InquirySent => "inquiry sent",
            HandshakeState::ModeRequested => "mode requested",
            HandshakeState::UserModeActive => "user mode active",
            HandshakeState::Released => "released",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("cannot {operation} while {from}")]
    InvalidTransition {
        from: HandshakeState,
        operation: &'static str,
    },

    #[error("user mode is not active (state: {0})")]
    NotInUserMode(HandshakeState),

    #[error(transparent)]
    SysEx(#[from] SysExError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Handshake driver for one device.
#[derive(Debug)]
pub struct Handshake {
    profile: &'static DeviceProfile,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(profile: &'static DeviceProfile) -> Self {
        Self {
            profile,
            state: HandshakeState::Uninitialized,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandshakeState::UserModeActive
    }

    /// Send the universal device inquiry. The reply is advisory; the state
    /// advances whether or not one arrives.
    pub fn send_inquiry(&mut self, out: &mut impl MidiSink) -> Result<(), HandshakeError> {
        self.require(&[HandshakeState::Uninitialized], "send inquiry")?;
        out.send(&sysex::universal_inquiry())?;
        self.transition(HandshakeState::InquirySent);
        Ok(())
    }

    /// Send the vendor mode-activation message (user mode on).
    pub fn request_user_mode(&mut self, out: &mut impl MidiSink) -> Result<(), HandshakeError> {
        self.require(
            &[HandshakeState::Uninitialized, HandshakeState::InquirySent],
            "request user mode",
        )?;
        let message = SysExMessage::user_mode(self.profile)?;
        out.send(&message.encode()?)?;
        self.transition(HandshakeState::ModeRequested);
        Ok(())
    }

    /// Declare user mode active. The device does not guarantee an
    /// acknowledgement, so callers may confirm right after requesting or
    /// after a bounded wait.
    pub fn confirm_active(&mut self) -> Result<(), HandshakeError> {
        self.require(&[HandshakeState::ModeRequested], "confirm user mode")?;
        self.transition(HandshakeState::UserModeActive);
        Ok(())
    }

    /// Hand the device back to Live mode. Every gated operation fails afterwards.
    pub fn release(&mut self, out: &mut impl MidiSink) -> Result<(), HandshakeError> {
        self.require(&[HandshakeState::UserModeActive], "release user mode")?;
        let message = SysExMessage::for_profile(self.profile, VendorCommand::SetMidiMode, vec![MIDI_MODE_LIVE])?;
        out.send(&message.encode()?)?;
        self.transition(HandshakeState::Released);
        Ok(())
    }

    /// Feed an incoming event. A mode echo from the device confirms the
    /// pending request; returns `true` if it did.
    pub fn observe(&mut self, event: &ControlEvent) -> bool {
        if self.state != HandshakeState::ModeRequested {
            return false;
        }
        match event {
            ControlEvent::Vendor(message)
                if message.is_from(self.profile)
                    && message.command == VendorCommand::SetMidiMode
                    && message.data.first() == Some(&MIDI_MODE_USER) =>
            {
                tracing::debug!(device = self.profile.name, "user mode acknowledged");
                self.transition(HandshakeState::UserModeActive);
                true
            }
            _ => false,
        }
    }

    /// Precondition check for operations other than pad input and display frames.
    pub fn ensure_user_mode(&self) -> Result<(), HandshakeError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(HandshakeError::NotInUserMode(self.state))
        }
    }

    /// Send vendor messages that require user mode. Nothing is sent unless
    /// every message encodes.
    pub fn send_vendor(
        &self,
        out: &mut impl MidiSink,
        messages: &[SysExMessage],
    ) -> Result<(), HandshakeError> {
        self.ensure_user_mode()?;
        let encoded = messages
            .iter()
            .map(SysExMessage::encode)
            .collect::<Result<Vec<_>, _>>()?;
        for bytes in &encoded {
            out.send(bytes)?;
        }
        Ok(())
    }

    /// Send raw channel messages (LED feedback) that require user mode.
    pub fn send_raw(&self, out: &mut impl MidiSink, messages: &[[u8; 3]]) -> Result<(), HandshakeError> {
        self.ensure_user_mode()?;
        for message in messages {
            out.send(message)?;
        }
        Ok(())
    }

    fn require(&self, allowed: &[HandshakeState], operation: &'static str) -> Result<(), HandshakeError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HandshakeError::InvalidTransition {
                from: self.state,
                operation,
            })
        }
    }

    fn transition(&mut self, to: HandshakeState) {
        tracing::debug!(device = self.profile.name, from = %self.state, to = %to, "handshake");
        self.state = to;
    }
}
