//! Display frame encoding.
//!
//! A frame is the 16-byte header followed by `height` lines of little-endian
//! RGB565 samples, each line padded with zeros to the profile's stride. The
//! payload (never the header) is XORed with the profile's 4-byte key before
//! it goes on the wire.

use thiserror::Error;

use crate::profile::DeviceProfile;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("pixel buffer is {width}x{height}, display expects {expected_width}x{expected_height}")]
    DimensionMismatch {
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },

    #[error("frame is {actual} bytes, expected {expected}")]
    InvalidFrameSize { actual: usize, expected: usize },
}

/// Convert 24-bit RGB to 16-bit RGB565.
pub const fn rgb888_to_rgb565(r: u8, g: u8, b: u8) -> u16 {
    let r5 = (r >> 3) as u16;
    let g6 = (g >> 2) as u16;
    let b5 = (b >> 3) as u16;
    (r5 << 11) | (g6 << 5) | b5
}

/// Common colors (RGB565)
pub mod colors {
    pub const BLACK: u16 = 0x0000;
    pub const WHITE: u16 = 0xFFFF;
    pub const RED: u16 = 0xF800;
    pub const GREEN: u16 = 0x07E0;
    pub const BLUE: u16 = 0x001F;
    pub const GRAY: u16 = 0x8410;
}

/// Caller-owned RGB565 pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u16>,
}

impl PixelBuffer {
    /// A black buffer.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![colors::BLACK; width * height],
        }
    }

    /// A black buffer sized for `profile`'s display.
    pub fn for_profile(profile: &DeviceProfile) -> Self {
        Self::new(profile.display.width, profile.display.height)
    }

    /// Wrap existing pixels. Returns `InvalidFrameSize` if the count is wrong.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<u16>) -> Result<Self, FrameError> {
        if pixels.len() != width * height {
            return Err(FrameError::InvalidFrameSize {
                actual: pixels.len(),
                expected: width * height,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Convert packed RGB888 (3 bytes per pixel, row-major).
    pub fn from_rgb888(width: usize, height: usize, rgb: &[u8]) -> Result<Self, FrameError> {
        if rgb.len() != width * height * 3 {
            return Err(FrameError::InvalidFrameSize {
                actual: rgb.len(),
                expected: width * height * 3,
            });
        }
        let pixels = rgb
            .chunks_exact(3)
            .map(|p| rgb888_to_rgb565(p[0], p[1], p[2]))
            .collect();
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn row(&self, y: usize) -> &[u16] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    pub fn fill(&mut self, color: u16) {
        self.pixels.fill(color);
    }

    /// Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: usize, y: usize, color: u16) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    /// Fill a rectangle, clipped to the buffer.
    pub fn fill_rect(&mut self, x: usize, y: usize, w: usize, h: usize, color: u16) {
        let x_end = (x + w).min(self.width);
        let y_end = (y + h).min(self.height);
        for row in y.min(y_end)..y_end {
            let start = row * self.width;
            self.pixels[start + x.min(x_end)..start + x_end].fill(color);
        }
    }
}

/// A complete display frame: header + unencrypted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
    header_len: usize,
}

impl Frame {
    /// Adopt raw frame bytes (header + plain payload) for `profile`.
    pub fn from_bytes(profile: &DeviceProfile, bytes: Vec<u8>) -> Result<Self, FrameError> {
        if bytes.len() != profile.frame_len() {
            return Err(FrameError::InvalidFrameSize {
                actual: bytes.len(),
                expected: profile.frame_len(),
            });
        }
        Ok(Self {
            bytes,
            header_len: profile.frame_header.len(),
        })
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..self.header_len]
    }

    /// The plain (unencrypted) payload.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.header_len..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The payload as it goes on the wire: encrypted if the profile has a key.
    pub fn wire_payload(&self, profile: &DeviceProfile) -> Vec<u8> {
        match profile.xor_key {
            Some(key) => apply_cipher(self.payload(), key),
            None => self.payload().to_vec(),
        }
    }

    /// Header followed by the wire payload.
    pub fn to_wire(&self, profile: &DeviceProfile) -> Vec<u8> {
        let mut wire = Vec::with_capacity(self.len());
        wire.extend_from_slice(self.header());
        wire.extend_from_slice(&self.wire_payload(profile));
        wire
    }
}

/// Serialize `pixels` into a frame for `profile`.
pub fn encode(pixels: &PixelBuffer, profile: &DeviceProfile) -> Result<Frame, FrameError> {
    let display = &profile.display;
    if pixels.width != display.width || pixels.height != display.height {
        return Err(FrameError::DimensionMismatch {
            width: pixels.width,
            height: pixels.height,
            expected_width: display.width,
            expected_height: display.height,
        });
    }

    let mut bytes = Vec::with_capacity(profile.frame_len());
    bytes.extend_from_slice(&profile.frame_header);
    for y in 0..display.height {
        for pixel in pixels.row(y) {
            bytes.extend_from_slice(&pixel.to_le_bytes());
        }
        bytes.resize(bytes.len() + display.line_padding, 0);
    }
    debug_assert_eq!(bytes.len(), profile.frame_len());

    Ok(Frame {
        bytes,
        header_len: profile.frame_header.len(),
    })
}

/// XOR byte `i` of `payload` with `key[i % 4]`. Applying it twice restores
/// the input.
pub fn apply_cipher(payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let mut out = payload.to_vec();
    apply_cipher_in_place(&mut out, key);
    out
}

pub fn apply_cipher_in_place(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::profile::{DeviceKind, DISPLAY_XOR_KEY, FRAME_HEADER};

    fn profile() -> &'static DeviceProfile {
        DeviceKind::Push3.profile()
    }

    #[test]
    fn test_rgb565_conversion() {
        assert_eq!(rgb888_to_rgb565(255, 255, 255), colors::WHITE);
        assert_eq!(rgb888_to_rgb565(255, 0, 0), colors::RED);
        assert_eq!(rgb888_to_rgb565(0, 255, 0), colors::GREEN);
        assert_eq!(rgb888_to_rgb565(0, 0, 255), colors::BLUE);
        assert_eq!(rgb888_to_rgb565(7, 3, 7), 0);
    }

    #[test]
    fn test_frame_layout() {
        let mut pixels = PixelBuffer::for_profile(profile());
        pixels.set_pixel(0, 0, 0x1234);
        pixels.set_pixel(959, 1, 0xABCD);

        let frame = encode(&pixels, profile()).unwrap();
        assert_eq!(frame.len(), 327_696);
        assert_eq!(frame.header(), &FRAME_HEADER);

        let payload = frame.payload();
        assert_eq!(payload.len(), 327_680);
        // Little-endian samples
        assert_eq!(&payload[0..2], &[0x34, 0x12]);
        // Line padding is zero
        assert!(payload[1920..2048].iter().all(|b| *b == 0));
        // Last pixel of line 1
        assert_eq!(&payload[2048 + 1918..2048 + 1920], &[0xCD, 0xAB]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let pixels = PixelBuffer::new(480, 160);
        assert!(matches!(
            encode(&pixels, profile()),
            Err(FrameError::DimensionMismatch { width: 480, .. })
        ));
    }

    #[test]
    fn test_from_bytes_checks_size() {
        assert!(matches!(
            Frame::from_bytes(profile(), vec![0; 100]),
            Err(FrameError::InvalidFrameSize { actual: 100, .. })
        ));
        let frame = Frame::from_bytes(profile(), vec![0; profile().frame_len()]).unwrap();
        assert_eq!(frame.payload().len(), profile().payload_len());
    }

    #[test]
    fn test_wire_encryption_skips_header() {
        let pixels = PixelBuffer::for_profile(profile());
        let frame = encode(&pixels, profile()).unwrap();
        let wire = frame.to_wire(profile());
        assert_eq!(&wire[..16], &FRAME_HEADER);
        // Black pixels XORed with the key reveal the key
        assert_eq!(&wire[16..20], &DISPLAY_XOR_KEY);
        assert_eq!(wire.len(), frame.len());
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut pixels = PixelBuffer::new(4, 3);
        pixels.fill_rect(2, 1, 10, 10, colors::WHITE);
        assert_eq!(pixels.get(1, 1), Some(colors::BLACK));
        assert_eq!(pixels.get(3, 2), Some(colors::WHITE));
        assert_eq!(pixels.get(2, 0), Some(colors::BLACK));
        assert_eq!(pixels.get(4, 0), None);
        pixels.fill_rect(10, 10, 2, 2, colors::RED);
    }

    #[test]
    fn test_from_rgb888() {
        let buffer = PixelBuffer::from_rgb888(2, 1, &[255, 0, 0, 0, 0, 255]).unwrap();
        assert_eq!(buffer.pixels(), &[colors::RED, colors::BLUE]);
        assert!(PixelBuffer::from_rgb888(2, 1, &[0; 5]).is_err());
    }

    proptest! {
        #[test]
        fn prop_cipher_is_involution(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            key in prop::array::uniform4(any::<u8>()),
        ) {
            prop_assert_eq!(apply_cipher(&apply_cipher(&data, key), key), data);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_frame_size_is_constant(seed in any::<u16>(), step in 1u16..977) {
            let profile = DeviceKind::Push2.profile();
            let count = profile.display.width * profile.display.height;
            let pixels: Vec<u16> = (0..count)
                .map(|i| seed.wrapping_add((i as u16).wrapping_mul(step)))
                .collect();
            let buffer = PixelBuffer::from_pixels(profile.display.width, profile.display.height, pixels).unwrap();
            let frame = encode(&buffer, profile).unwrap();
            prop_assert_eq!(frame.len(), profile.frame_len());
            prop_assert_eq!(frame.payload().len(), 327_680);
        }
    }
}
