//! Protocol core for Ableton Push-class control surfaces.
//!
//! This crate covers everything that does not touch hardware:
//! - Device profiles for the Push 2 and Push 3 generations
//! - SysEx encoding and decoding, and the user-mode handshake
//! - Decoding raw MIDI into control events
//! - Velocity curve synthesis and upload
//! - Display frame encoding and the paced, chunked frame transport
//!
//! # Architecture
//!
//! The surface is driven over two interfaces:
//! - **USB bulk**: the 960x160 display (vendor ID 0x2982), fed by
//!   [`transport::TransportPump`] through a [`transport::BulkSink`]
//! - **MIDI**: pads, encoders, buttons, LEDs and vendor SysEx, written
//!   through a [`transport::MidiSink`] and read via [`event::decode`]
//!
//! Every generation-specific constant lives in a [`DeviceProfile`]; nothing
//! else branches on the device kind.

pub mod config;
pub mod curve;
pub mod event;
pub mod frame;
pub mod handshake;
pub mod led;
pub mod profile;
pub mod sysex;
pub mod transport;

pub use config::{ConfigError, ConfigManager, SurfaceConfig};
pub use curve::{CurveError, CurveLut, CurveParameters, ParameterPolicy};
pub use event::{ButtonId, ControlEvent, DecodeError, Direction, JogKind};
pub use frame::{Frame, FrameError, PixelBuffer};
pub use handshake::{Handshake, HandshakeError, HandshakeState};
pub use profile::{DeviceKind, DeviceProfile};
pub use sysex::{SysExError, SysExMessage, VendorCommand};
pub use transport::{BulkSink, CancelToken, FrameStats, MidiSink, TransportError, TransportPump};
