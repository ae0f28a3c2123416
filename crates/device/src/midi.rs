//! MIDI port binding and the control-event reader.
//!
//! The surface exposes two port pairs (a "Live" port and a "User" port). The
//! user port is preferred; any port containing the profile's name hint is
//! the fallback. Incoming messages are forwarded from the midir callback to a
//! tokio channel and decoded when the caller drains it.

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutputConnection};
use surface_protocol::{event, ControlEvent, DecodeError, DeviceProfile, MidiSink, TransportError};
use tokio::sync::mpsc;

use crate::error::DeviceError;

const CLIENT_NAME: &str = "surface";

/// Pick a port from `names`.
///
/// An explicit `preferred` name must match exactly. Otherwise ports whose name
/// contains the profile hint are candidates, and one containing "User" wins.
pub fn select_port(names: &[String], profile: &DeviceProfile, preferred: Option<&str>) -> Option<usize> {
    if let Some(wanted) = preferred {
        return names.iter().position(|n| n == wanted);
    }

    let candidates: Vec<usize> = names
        .iter()
        .enumerate()
        .filter(|(_, n)| n.contains(profile.midi_port_hint))
        .map(|(i, _)| i)
        .collect();

    candidates
        .iter()
        .copied()
        .find(|i| names[*i].contains("User"))
        .or_else(|| candidates.first().copied())
}

/// Output port for LEDs, handshake and vendor SysEx.
pub struct MidiOut {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidiOut {
    pub fn connect(profile: &DeviceProfile, preferred: Option<&str>) -> Result<Self, DeviceError> {
        let midi_out = midir::MidiOutput::new(&format!("{CLIENT_NAME}-out"))?;
        let ports = midi_out.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_out.port_name(p).unwrap_or_default())
            .collect();

        let index = select_port(&names, profile, preferred)
            .ok_or_else(|| DeviceError::DeviceNotFound(format!("{} MIDI output", profile.name)))?;
        let connection = midi_out.connect(&ports[index], "surface-output")?;

        tracing::info!(port = %names[index], "MIDI output connected");
        Ok(Self {
            connection,
            port_name: names[index].clone(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiSink for MidiOut {
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.connection
            .send(message)
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

/// Receives raw messages and decodes them on demand.
pub struct EventReader {
    profile: &'static DeviceProfile,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    _connection: Option<MidiInputConnection<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl EventReader {
    /// Connect to the surface's input port.
    pub fn connect(profile: &'static DeviceProfile, preferred: Option<&str>) -> Result<Self, DeviceError> {
        let mut midi_in = MidiInput::new(&format!("{CLIENT_NAME}-in"))?;
        // SysEx carries the handshake acknowledgement and identity reply
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|p| midi_in.port_name(p).unwrap_or_default())
            .collect();
        let index = select_port(&names, profile, preferred)
            .ok_or_else(|| DeviceError::DeviceNotFound(format!("{} MIDI input", profile.name)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = midi_in.connect(
            &ports[index],
            "surface-input",
            move |_timestamp, message, tx| {
                let _ = tx.send(message.to_vec());
            },
            tx,
        )?;

        tracing::info!(port = %names[index], "MIDI input connected");
        Ok(Self {
            profile,
            rx,
            _connection: Some(connection),
        })
    }

    /// Read from an existing channel instead of a hardware port.
    pub fn from_channel(profile: &'static DeviceProfile, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            profile,
            rx,
            _connection: None,
        }
    }

    /// Drain whatever has arrived, without blocking.
    ///
    /// The returned iterator ends as soon as the channel is empty; calling
    /// `poll` again later picks up newer messages.
    pub fn poll(&mut self) -> impl Iterator<Item = Result<ControlEvent, DecodeError>> + '_ {
        let profile = self.profile;
        std::iter::from_fn(move || self.rx.try_recv().ok()).map(move |bytes| decode_logged(profile, &bytes))
    }

    /// Wait for the next message. `None` once the input is closed.
    pub async fn next_event(&mut self) -> Option<Result<ControlEvent, DecodeError>> {
        let bytes = self.rx.recv().await?;
        Some(decode_logged(self.profile, &bytes))
    }
}

fn decode_logged(profile: &DeviceProfile, bytes: &[u8]) -> Result<ControlEvent, DecodeError> {
    let result = event::decode(profile, bytes);
    if let Err(e) = &result {
        tracing::warn!(?bytes, "undecodable MIDI message: {}", e);
    }
    result
}
