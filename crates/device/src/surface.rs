//! Surface facade: one display writer plus one control channel.
//!
//! The two halves share nothing but the profile, so [`Surface::split`] can
//! hand them to different tasks. Display writes block for the frame interval;
//! drive them from a dedicated thread or `spawn_blocking`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use surface_protocol::curve::{self, CurveLut, CurveParameters};
use surface_protocol::frame::{self, Frame, PixelBuffer};
use surface_protocol::led::{self, LedColor, LedState};
use surface_protocol::sysex::{IdentityReply, SysExMessage, VendorCommand};
use surface_protocol::{
    BulkSink, ButtonId, CancelToken, ConfigError, ConfigManager, ControlEvent, DecodeError,
    DeviceProfile, FrameStats, Handshake, HandshakeState, MidiSink, SurfaceConfig, TransportPump,
};

use crate::error::DeviceError;
use crate::midi::{EventReader, MidiOut};
use crate::usb::UsbDisplay;

/// Display half. Cheap to clone; clones share the pump and the cancel flag.
pub struct DisplayWriter<S = UsbDisplay> {
    pump: Arc<TransportPump<S>>,
    cancel: CancelToken,
}

impl<S> Clone for DisplayWriter<S> {
    fn clone(&self) -> Self {
        Self {
            pump: Arc::clone(&self.pump),
            cancel: self.cancel.clone(),
        }
    }
}

impl<S: BulkSink> DisplayWriter<S> {
    pub fn new(pump: TransportPump<S>) -> Self {
        Self {
            pump: Arc::new(pump),
            cancel: CancelToken::new(),
        }
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.pump.profile()
    }

    /// Encode and send `pixels`, waiting for any frame in flight.
    pub fn draw(&self, pixels: &PixelBuffer) -> Result<FrameStats, DeviceError> {
        let frame = frame::encode(pixels, self.profile())?;
        self.send_frame(&frame)
    }

    pub fn send_frame(&self, frame: &Frame) -> Result<FrameStats, DeviceError> {
        Ok(self.pump.send_frame(frame, &self.cancel)?)
    }

    /// Like [`send_frame`](Self::send_frame) but fails with `Busy` instead of waiting.
    pub fn try_send_frame(&self, frame: &Frame) -> Result<FrameStats, DeviceError> {
        Ok(self.pump.try_send_frame(frame, &self.cancel)?)
    }

    /// Stop the frame in flight at the next chunk boundary. Later frames are
    /// refused until [`resume`](Self::resume).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn resume(&self) {
        self.cancel.reset();
    }
}

/// MIDI half: handshake, LEDs, curve uploads and incoming events.
pub struct ControlChannel<O = MidiOut> {
    profile: &'static DeviceProfile,
    out: O,
    events: EventReader,
    handshake: Handshake,
    identity: Option<IdentityReply>,
    /// Read during the handshake, not yet handed out
    pending: VecDeque<Result<ControlEvent, DecodeError>>,
}

impl<O: MidiSink> ControlChannel<O> {
    pub fn new(profile: &'static DeviceProfile, out: O, events: EventReader) -> Self {
        Self {
            profile,
            out,
            events,
            handshake: Handshake::new(profile),
            identity: None,
            pending: VecDeque::new(),
        }
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Identity reported by the device in answer to the inquiry, if any.
    pub fn identity(&self) -> Option<&IdentityReply> {
        self.identity.as_ref()
    }

    /// Run the handshake: inquiry, user-mode request, then wait up to
    /// `ack_wait` for the device to echo the mode. Without an echo the mode
    /// is confirmed anyway. Other messages read while waiting are kept for
    /// the next [`poll`](Self::poll) or [`next_event`](Self::next_event).
    pub async fn activate(&mut self, ack_wait: Duration) -> Result<(), DeviceError> {
        self.handshake.send_inquiry(&mut self.out)?;
        self.handshake.request_user_mode(&mut self.out)?;

        let deadline = tokio::time::Instant::now() + ack_wait;
        while !self.handshake.is_active() {
            match tokio::time::timeout_at(deadline, self.events.next_event()).await {
                Ok(Some(Ok(event))) => {
                    let acknowledged = note_event(self.profile, &mut self.handshake, &mut self.identity, &event);
                    if !acknowledged {
                        tracing::debug!(?event, "held during handshake");
                        self.pending.push_back(Ok(event));
                    }
                }
                Ok(Some(Err(e))) => self.pending.push_back(Err(e)),
                Ok(None) | Err(_) => break,
            }
        }

        if !self.handshake.is_active() {
            tracing::debug!(device = self.profile.name, "no mode acknowledgement, assuming user mode");
            self.handshake.confirm_active()?;
        }
        tracing::info!(device = self.profile.name, "user mode active");
        Ok(())
    }

    /// Drain incoming events without blocking.
    pub fn poll(&mut self) -> impl Iterator<Item = Result<ControlEvent, DecodeError>> + '_ {
        let profile = self.profile;
        let handshake = &mut self.handshake;
        let identity = &mut self.identity;
        let fresh = self.events.poll().inspect(move |result| {
            if let Ok(event) = result {
                note_event(profile, handshake, identity, event);
            }
        });
        self.pending.drain(..).chain(fresh)
    }

    pub async fn next_event(&mut self) -> Option<Result<ControlEvent, DecodeError>> {
        if let Some(result) = self.pending.pop_front() {
            return Some(result);
        }
        let result = self.events.next_event().await?;
        if let Ok(event) = &result {
            note_event(self.profile, &mut self.handshake, &mut self.identity, event);
        }
        Some(result)
    }

    /// Build, validate and upload a velocity curve. Returns the table sent.
    pub fn upload_velocity_curve(&mut self, params: &CurveParameters) -> Result<CurveLut, DeviceError> {
        self.handshake.ensure_user_mode()?;
        let lut = curve::build(params);
        lut.validate()?;
        let messages = curve::upload_messages(self.profile, &lut, Some(params))?;
        self.handshake.send_vendor(&mut self.out, &messages)?;
        tracing::info!(
            device = self.profile.name,
            threshold = params.threshold(),
            drive = params.drive(),
            compand = params.compand(),
            range = params.range(),
            "velocity curve uploaded"
        );
        Ok(lut)
    }

    /// Global pad/button LED brightness, 0-127.
    pub fn set_led_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        let message = SysExMessage::for_profile(
            self.profile,
            VendorCommand::SetLedBrightness,
            vec![level.min(127)],
        )?;
        Ok(self.handshake.send_vendor(&mut self.out, &[message])?)
    }

    /// Display backlight, 0-255, sent as two 7-bit halves (low first).
    pub fn set_display_brightness(&mut self, level: u8) -> Result<(), DeviceError> {
        let message = SysExMessage::for_profile(
            self.profile,
            VendorCommand::SetDisplayBrightness,
            vec![level & 0x7F, level >> 7],
        )?;
        Ok(self.handshake.send_vendor(&mut self.out, &[message])?)
    }

    pub fn set_pad_color(&mut self, index: u8, color: LedColor) -> Result<(), DeviceError> {
        let message = led::pad_color(self.profile, index, color)
            .ok_or_else(|| DeviceError::UnknownControl(format!("pad {index}")))?;
        Ok(self.handshake.send_raw(&mut self.out, &[message])?)
    }

    pub fn set_button_color(&mut self, button: ButtonId, color: LedColor) -> Result<(), DeviceError> {
        let message = led::button_color(self.profile, button, color)
            .ok_or_else(|| DeviceError::UnknownControl(format!("{button:?}")))?;
        Ok(self.handshake.send_raw(&mut self.out, &[message])?)
    }

    /// Send every changed pad in `state`. Returns the number of messages.
    pub fn flush_leds(&mut self, state: &mut LedState) -> Result<usize, DeviceError> {
        self.handshake.ensure_user_mode()?;
        let messages = state.take_messages();
        self.handshake.send_raw(&mut self.out, &messages)?;
        Ok(messages.len())
    }

    /// Hand the surface back to its default (Live) mode. LED, brightness
    /// and curve calls fail from then on.
    pub fn release(&mut self) -> Result<(), DeviceError> {
        self.handshake.release(&mut self.out)?;
        tracing::info!(device = self.profile.name, "returned to live mode");
        Ok(())
    }

    pub fn into_sink(self) -> O {
        self.out
    }
}

fn note_event(
    profile: &DeviceProfile,
    handshake: &mut Handshake,
    identity: &mut Option<IdentityReply>,
    event: &ControlEvent,
) -> bool {
    if let ControlEvent::Identity(reply) = event {
        tracing::info!(
            device = profile.name,
            firmware = %reply.firmware_version(),
            "identity reply"
        );
        *identity = Some(reply.clone());
    }
    handshake.observe(event)
}

/// A missing display means MIDI-only operation; any other failure to
/// acquire it is returned.
fn optional_display<T>(profile: &DeviceProfile, opened: Result<T, DeviceError>) -> Result<Option<T>, DeviceError> {
    match opened {
        Ok(display) => Ok(Some(display)),
        Err(DeviceError::DeviceNotFound(_)) => {
            tracing::warn!("{} display not found. MIDI-only mode.", profile.name);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// An opened surface.
pub struct Surface {
    display: Option<DisplayWriter>,
    control: ControlChannel,
}

impl Surface {
    /// Open the configured device, run the handshake and upload the
    /// configured velocity curve. A missing display is not fatal; the
    /// surface then runs MIDI-only. A display that is present but cannot be
    /// claimed is an error.
    pub async fn open(config: &SurfaceConfig) -> Result<Self, DeviceError> {
        ConfigManager::validate_settings(config).map_err(ConfigError::Validation)?;
        let profile = config.device.profile();
        let params = config.curve_parameters()?;

        let display = optional_display(profile, UsbDisplay::open(profile))?.map(|usb| {
            DisplayWriter::new(
                TransportPump::new(profile, usb)
                    .with_timeout(config.transfer_timeout())
                    .with_pacing(config.pace_frames),
            )
        });

        let port = config.midi_port.as_deref();
        let out = MidiOut::connect(profile, port)?;
        let events = EventReader::connect(profile, port)?;

        let mut control = ControlChannel::new(profile, out, events);
        control.activate(config.ack_wait()).await?;
        control.upload_velocity_curve(&params)?;

        Ok(Self { display, control })
    }

    pub fn profile(&self) -> &'static DeviceProfile {
        self.control.profile()
    }

    pub fn display(&self) -> Option<&DisplayWriter> {
        self.display.as_ref()
    }

    pub fn control(&mut self) -> &mut ControlChannel {
        &mut self.control
    }

    pub fn draw(&self, pixels: &PixelBuffer) -> Result<FrameStats, DeviceError> {
        self.display.as_ref().ok_or(DeviceError::NoDisplay)?.draw(pixels)
    }

    /// Separate the display and control flows.
    pub fn split(self) -> (Option<DisplayWriter>, ControlChannel) {
        (self.display, self.control)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;

    use surface_protocol::led::colors;
    use surface_protocol::{DeviceKind, TransportError};
    use tokio::sync::mpsc;

    use super::*;

    const USER_MODE_ACK: [u8; 9] = [0xF0, 0x00, 0x21, 0x1D, 0x01, 0x01, 0x0A, 0x01, 0xF7];

    fn channel(kind: DeviceKind) -> (ControlChannel<Vec<Vec<u8>>>, mpsc::UnboundedSender<Vec<u8>>) {
        let profile = kind.profile();
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventReader::from_channel(profile, rx);
        (ControlChannel::new(profile, Vec::new(), events), tx)
    }

    #[derive(Default)]
    struct CountingSink {
        writes: Arc<Mutex<usize>>,
    }

    impl BulkSink for CountingSink {
        fn write_bulk(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize, TransportError> {
            *self.writes.lock().unwrap() += 1;
            Ok(data.len())
        }
    }

    #[test]
    fn test_activate_with_acknowledgement() {
        let (mut control, tx) = channel(DeviceKind::Push3);
        tx.send(vec![0x90, 36, 10]).unwrap();
        tx.send(USER_MODE_ACK.to_vec()).unwrap();

        tokio_test::block_on(control.activate(Duration::from_secs(5))).unwrap();
        assert_eq!(control.handshake_state(), HandshakeState::UserModeActive);
        assert_eq!(control.out.len(), 2);
    }

    #[test]
    fn test_activate_without_acknowledgement() {
        let (mut control, _tx) = channel(DeviceKind::Push2);
        tokio_test::block_on(control.activate(Duration::from_millis(20))).unwrap();
        assert_eq!(control.handshake_state(), HandshakeState::UserModeActive);
    }

    #[test]
    fn test_activate_records_identity() {
        let (mut control, tx) = channel(DeviceKind::Push2);
        tx.send(vec![
            0xF0, 0x7E, 0x01, 0x06, 0x02, 0x00, 0x21, 0x1D, 0x67, 0x32, 0x02, 0x00, 0x01, 0x00, 0x05, 0x00,
            0xF7,
        ])
        .unwrap();
        drop(tx);

        tokio_test::block_on(control.activate(Duration::from_secs(5))).unwrap();
        assert!(control.identity().is_some());
        assert!(control.handshake.is_active());
    }

    #[test]
    fn test_leds_require_user_mode() {
        let (mut control, _tx) = channel(DeviceKind::Push3);
        assert!(matches!(
            control.set_pad_color(0, LedColor::new(colors::RED)),
            Err(DeviceError::Handshake(_))
        ));

        tokio_test::block_on(control.activate(Duration::ZERO)).unwrap();
        control.set_pad_color(0, LedColor::new(colors::RED)).unwrap();
        assert!(matches!(
            control.set_pad_color(64, LedColor::new(colors::RED)),
            Err(DeviceError::UnknownControl(_))
        ));

        let mut state = LedState::new(control.profile());
        assert_eq!(control.flush_leds(&mut state).unwrap(), 64);
        assert_eq!(control.flush_leds(&mut state).unwrap(), 0);
        assert_eq!(control.into_sink().last().unwrap(), &vec![0x90, 99, 0]);
    }

    #[test]
    fn test_curve_upload_per_generation() {
        let params = CurveParameters::new(10, 20, -10, 80).unwrap();

        let (mut push3, _tx3) = channel(DeviceKind::Push3);
        assert!(push3.upload_velocity_curve(&params).is_err());
        tokio_test::block_on(push3.activate(Duration::ZERO)).unwrap();
        let lut = push3.upload_velocity_curve(&params).unwrap();
        let sent = push3.into_sink();
        // inquiry, mode request, one bulk upload
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2][6], VendorCommand::UploadCurve.byte());
        assert!(sent[2].windows(128).any(|w| w == lut.as_slice()));

        let (mut push2, _tx2) = channel(DeviceKind::Push2);
        tokio_test::block_on(push2.activate(Duration::ZERO)).unwrap();
        push2.upload_velocity_curve(&params).unwrap();
        let sent = push2.into_sink();
        assert_eq!(sent.len(), 2 + 8);
        assert!(sent[2..].iter().all(|m| m[6] == VendorCommand::SetCurveEntries.byte()));
    }

    #[test]
    fn test_brightness_is_push2_only() {
        let (mut push3, _tx) = channel(DeviceKind::Push3);
        tokio_test::block_on(push3.activate(Duration::ZERO)).unwrap();
        assert!(matches!(push3.set_led_brightness(64), Err(DeviceError::SysEx(_))));

        let (mut push2, _tx) = channel(DeviceKind::Push2);
        tokio_test::block_on(push2.activate(Duration::ZERO)).unwrap();
        push2.set_display_brightness(200).unwrap();
        push2.release().unwrap();
        let sent = push2.into_sink();
        assert_eq!(sent[2], vec![0xF0, 0x00, 0x21, 0x1D, 0x01, 0x01, 0x08, 0x48, 0x01, 0xF7]);
        assert_eq!(sent[3], vec![0xF0, 0x00, 0x21, 0x1D, 0x01, 0x01, 0x0A, 0x00, 0xF7]);
    }

    #[test]
    fn test_poll_confirms_late_acknowledgement() {
        let (mut control, tx) = channel(DeviceKind::Push3);
        control.handshake.request_user_mode(&mut control.out).unwrap();
        tx.send(USER_MODE_ACK.to_vec()).unwrap();

        let events: Vec<_> = control.poll().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(ControlEvent::Vendor(_))));
        assert_eq!(control.handshake_state(), HandshakeState::UserModeActive);
    }

    #[test]
    fn test_display_writer_shared_across_threads() {
        let profile = DeviceKind::Push3.profile();
        let sink = CountingSink::default();
        let writes = Arc::clone(&sink.writes);
        let writer = DisplayWriter::new(TransportPump::new(profile, sink).with_pacing(false));

        let pixels = PixelBuffer::for_profile(profile);
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let writer = writer.clone();
                let pixels = pixels.clone();
                thread::spawn(move || writer.draw(&pixels).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().chunks, 20);
        }
        assert_eq!(*writes.lock().unwrap(), 2 * 21);
    }

    #[test]
    fn test_display_writer_cancel() {
        let profile = DeviceKind::Push2.profile();
        let writer = DisplayWriter::new(TransportPump::new(profile, CountingSink::default()).with_pacing(false));
        let pixels = PixelBuffer::for_profile(profile);

        writer.cancel();
        assert!(matches!(
            writer.draw(&pixels),
            Err(DeviceError::Transport(TransportError::Cancelled { chunks_sent: 0 }))
        ));
        writer.resume();
        assert_eq!(writer.draw(&pixels).unwrap().chunks, 640);

        let wrong = PixelBuffer::new(10, 10);
        assert!(matches!(writer.draw(&wrong), Err(DeviceError::Frame(_))));
    }

    #[test]
    fn test_release_refuses_later_writes() {
        let (mut control, _tx) = channel(DeviceKind::Push2);
        tokio_test::block_on(control.activate(Duration::ZERO)).unwrap();
        control.release().unwrap();
        assert_eq!(control.handshake_state(), HandshakeState::Released);

        assert!(matches!(
            control.set_pad_color(0, LedColor::new(colors::RED)),
            Err(DeviceError::Handshake(_))
        ));
        assert!(control.set_led_brightness(64).is_err());
        let mut state = LedState::new(control.profile());
        assert!(control.flush_leds(&mut state).is_err());
        assert!(control.release().is_err());

        // inquiry, mode request, live mode
        assert_eq!(control.into_sink().len(), 3);
    }

    #[test]
    fn test_activate_keeps_other_events() {
        let (mut control, tx) = channel(DeviceKind::Push3);
        tx.send(vec![0x90, 36, 10]).unwrap();
        tx.send(vec![0x90]).unwrap();
        tx.send(USER_MODE_ACK.to_vec()).unwrap();
        tx.send(vec![0x80, 36, 0]).unwrap();

        tokio_test::block_on(control.activate(Duration::from_secs(5))).unwrap();
        let events: Vec<_> = control.poll().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Ok(ControlEvent::Pad { pressed: true, .. })));
        assert!(events[1].is_err());
        assert!(matches!(events[2], Ok(ControlEvent::Pad { pressed: false, .. })));
    }

    #[test]
    fn test_next_event_returns_held_events_first() {
        let (mut control, tx) = channel(DeviceKind::Push3);
        tx.send(vec![0x90, 36, 10]).unwrap();
        tx.send(USER_MODE_ACK.to_vec()).unwrap();
        tokio_test::block_on(control.activate(Duration::from_secs(5))).unwrap();

        tx.send(vec![0x80, 36, 0]).unwrap();
        let first = tokio_test::block_on(control.next_event()).unwrap();
        assert!(matches!(first, Ok(ControlEvent::Pad { pressed: true, .. })));
        let second = tokio_test::block_on(control.next_event()).unwrap();
        assert!(matches!(second, Ok(ControlEvent::Pad { pressed: false, .. })));
    }

    #[test]
    fn test_only_missing_display_falls_back() {
        let profile = DeviceKind::Push3.profile();
        assert_eq!(optional_display(profile, Ok(7)).unwrap(), Some(7));
        assert_eq!(
            optional_display::<u8>(profile, Err(DeviceError::DeviceNotFound("Push 3".into()))).unwrap(),
            None
        );
        assert!(matches!(
            optional_display::<u8>(profile, Err(DeviceError::Usb(rusb::Error::Access))),
            Err(DeviceError::Usb(rusb::Error::Access))
        ));
        assert!(matches!(
            optional_display::<u8>(profile, Err(DeviceError::Usb(rusb::Error::Busy))),
            Err(DeviceError::Usb(rusb::Error::Busy))
        ));
    }
}
