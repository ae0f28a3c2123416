use surface_protocol::{
    ConfigError, CurveError, DecodeError, FrameError, HandshakeError, SysExError, TransportError,
};
use thiserror::Error;

/// Errors raised while opening or driving a surface.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} not found")]
    DeviceNotFound(String),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("display is not connected")]
    NoDisplay,

    #[error("no such control: {0}")]
    UnknownControl(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    SysEx(#[from] SysExError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<midir::InitError> for DeviceError {
    fn from(e: midir::InitError) -> Self {
        DeviceError::Midi(e.to_string())
    }
}

impl<T> From<midir::ConnectError<T>> for DeviceError {
    fn from(e: midir::ConnectError<T>) -> Self {
        DeviceError::Midi(e.to_string())
    }
}
