//! Hardware bindings for Ableton Push 2 / Push 3 surfaces.
//!
//! - [`usb::UsbDisplay`]: rusb bulk sink for the display
//! - [`midi`]: midir port selection, output sink and the event reader
//! - [`Surface`]: opens both, runs the handshake and splits into a
//!   [`DisplayWriter`] and a [`ControlChannel`]

pub mod error;
pub mod midi;
pub mod surface;
pub mod usb;

pub use error::DeviceError;
pub use midi::{EventReader, MidiOut};
pub use surface::{ControlChannel, DisplayWriter, Surface};
pub use usb::UsbDisplay;
