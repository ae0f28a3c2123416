//! Pad velocity curve synthesis.
//!
//! Four UI parameters are turned into a 128-entry table mapping pad pressure
//! to MIDI velocity. The stages run in a fixed order and the result is always
//! non-decreasing and plateaus once it reaches 127:
//!
//! ```text
//! threshold -> drive -> compand -> range -> quantize -> repair -> plateau
//! ```
//!
//! Reordering the stages changes the resulting tables, so previously captured
//! reference tables would no longer match.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::DeviceProfile;
use crate::sysex::{SysExError, SysExMessage, VendorCommand};

pub const LUT_SIZE: usize = 128;
pub const MIN_OUTPUT: u8 = 1;
pub const MAX_OUTPUT: u8 = 127;

/// Threshold 100 pins this many leading entries.
const MAX_THRESHOLD_ENTRIES: f64 = 16.0;
/// Resolution of the range parameter.
const RANGE_STEPS: f64 = 103.0;
/// Steepness of the logistic used by the compand stage.
const LOGISTIC_STEEPNESS: f64 = 10.0;
/// Entries per legacy curve upload message.
const LEGACY_BLOCK: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("{name} = {value} is outside {min}..={max}")]
    InvalidParameter {
        name: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    #[error("invalid curve table: {0}")]
    InvalidTable(String),
}

/// What to do with out-of-range curve parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterPolicy {
    #[default]
    Reject,
    Clamp,
}

/// Validated curve parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCurveParameters", into = "RawCurveParameters")]
pub struct CurveParameters {
    threshold: i32,
    drive: i32,
    compand: i32,
    range: i32,
}

/// Unvalidated parameters as they appear in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCurveParameters {
    pub threshold: i32,
    pub drive: i32,
    pub compand: i32,
    pub range: i32,
}

impl TryFrom<RawCurveParameters> for CurveParameters {
    type Error = CurveError;

    fn try_from(raw: RawCurveParameters) -> Result<Self, Self::Error> {
        CurveParameters::new(raw.threshold, raw.drive, raw.compand, raw.range)
    }
}

impl From<CurveParameters> for RawCurveParameters {
    fn from(params: CurveParameters) -> Self {
        Self {
            threshold: params.threshold,
            drive: params.drive,
            compand: params.compand,
            range: params.range,
        }
    }
}

impl CurveParameters {
    pub const THRESHOLD: (i32, i32) = (0, 100);
    pub const DRIVE: (i32, i32) = (-50, 50);
    pub const COMPAND: (i32, i32) = (-50, 50);
    pub const RANGE: (i32, i32) = (0, 100);

    /// Validate, rejecting anything out of range.
    pub fn new(threshold: i32, drive: i32, compand: i32, range: i32) -> Result<Self, CurveError> {
        Ok(Self {
            threshold: check("threshold", threshold, Self::THRESHOLD)?,
            drive: check("drive", drive, Self::DRIVE)?,
            compand: check("compand", compand, Self::COMPAND)?,
            range: check("range", range, Self::RANGE)?,
        })
    }

    /// Validate, clamping anything out of range.
    pub fn clamped(threshold: i32, drive: i32, compand: i32, range: i32) -> Self {
        let clamp = |v: i32, (min, max): (i32, i32)| v.clamp(min, max);
        Self {
            threshold: clamp(threshold, Self::THRESHOLD),
            drive: clamp(drive, Self::DRIVE),
            compand: clamp(compand, Self::COMPAND),
            range: clamp(range, Self::RANGE),
        }
    }

    pub fn with_policy(raw: RawCurveParameters, policy: ParameterPolicy) -> Result<Self, CurveError> {
        match policy {
            ParameterPolicy::Reject => Self::try_from(raw),
            ParameterPolicy::Clamp => Ok(Self::clamped(
                raw.threshold,
                raw.drive,
                raw.compand,
                raw.range,
            )),
        }
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn drive(&self) -> i32 {
        self.drive
    }

    pub fn compand(&self) -> i32 {
        self.compand
    }

    pub fn range(&self) -> i32 {
        self.range
    }

    /// The 4-byte parameter echo sent ahead of a bulk upload.
    /// Signed parameters are offset by 50 to stay 7-bit.
    pub fn echo_bytes(&self) -> [u8; 4] {
        [
            self.threshold as u8,
            (self.drive + 50) as u8,
            (self.compand + 50) as u8,
            self.range as u8,
        ]
    }
}

impl Default for CurveParameters {
    /// The linear curve.
    fn default() -> Self {
        Self {
            threshold: 0,
            drive: 0,
            compand: 0,
            range: 100,
        }
    }
}

fn check(name: &'static str, value: i32, (min, max): (i32, i32)) -> Result<i32, CurveError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(CurveError::InvalidParameter {
            name,
            value,
            min,
            max,
        })
    }
}

/// A validated 128-entry velocity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurveLut([u8; LUT_SIZE]);

impl CurveLut {
    /// Accept a table only if it satisfies every curve invariant.
    pub fn try_from_entries(entries: &[u8]) -> Result<Self, CurveError> {
        let table: [u8; LUT_SIZE] = entries.try_into().map_err(|_| {
            CurveError::InvalidTable(format!("expected {LUT_SIZE} entries, got {}", entries.len()))
        })?;
        let lut = Self(table);
        lut.validate()?;
        Ok(lut)
    }

    /// Check range, monotonicity and the plateau rule.
    pub fn validate(&self) -> Result<(), CurveError> {
        if let Some(i) = self.0.iter().position(|v| *v > MAX_OUTPUT) {
            return Err(CurveError::InvalidTable(format!(
                "entry {i} = {} exceeds {MAX_OUTPUT}",
                self.0[i]
            )));
        }
        if let Some(i) = (1..LUT_SIZE).find(|&i| self.0[i] < self.0[i - 1]) {
            return Err(CurveError::InvalidTable(format!(
                "entry {i} decreases from {} to {}",
                self.0[i - 1],
                self.0[i]
            )));
        }
        if let Some(first) = self.0.iter().position(|v| *v == MAX_OUTPUT) {
            if self.0[first..].iter().any(|v| *v != MAX_OUTPUT) {
                return Err(CurveError::InvalidTable(format!(
                    "entries after index {first} leave the {MAX_OUTPUT} plateau"
                )));
            }
        }
        Ok(())
    }

    pub fn entries(&self) -> &[u8; LUT_SIZE] {
        &self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Build the velocity table. Never fails for validated parameters.
pub fn build(params: &CurveParameters) -> CurveLut {
    let threshold_len = threshold_entries(params.threshold);
    let ramp_len = ramp_entries(params.range, threshold_len);
    let exponent = drive_exponent(params.drive);
    let mix = params.compand as f64 / 50.0;

    let mut table = [MAX_OUTPUT; LUT_SIZE];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = if i < threshold_len {
            MIN_OUTPUT
        } else if i < threshold_len + ramp_len {
            // Position inside the ramp, rescaled to [0, 1]
            let x = if ramp_len > 1 {
                (i - threshold_len) as f64 / (ramp_len - 1) as f64
            } else {
                1.0
            };
            quantize(compand(drive(x, exponent), mix))
        } else {
            MAX_OUTPUT
        };
    }

    repair_monotonic(&mut table);
    enforce_plateau(&mut table);

    let lut = CurveLut(table);
    debug_assert!(lut.validate().is_ok());
    tracing::debug!(
        threshold = params.threshold,
        drive = params.drive,
        compand = params.compand,
        range = params.range,
        threshold_len,
        ramp_len,
        "built velocity curve"
    );
    lut
}

/// `Nt = round(threshold * 16 / 100)`
fn threshold_entries(threshold: i32) -> usize {
    (threshold as f64 * MAX_THRESHOLD_ENTRIES / 100.0).round() as usize
}

/// `Nr = round(range * 103 / 100)` scaled onto the entries left after the
/// threshold region. Range 100 ramps across all of them, range 0 across none.
fn ramp_entries(range: i32, threshold_len: usize) -> usize {
    let steps = (range as f64 * RANGE_STEPS / 100.0).round();
    let available = (LUT_SIZE - threshold_len) as f64;
    ((available * steps / RANGE_STEPS).round() as usize).min(LUT_SIZE - threshold_len)
}

fn drive_exponent(drive: i32) -> f64 {
    (-(drive as f64) / 50.0).exp()
}

fn drive(x: f64, exponent: f64) -> f64 {
    x.clamp(0.0, 1.0).powf(exponent)
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-LOGISTIC_STEEPNESS * (x - 0.5)).exp())
}

/// Logistic rescaled so that 0 -> 0 and 1 -> 1.
fn s_curve(x: f64) -> f64 {
    let (lo, hi) = (logistic(0.0), logistic(1.0));
    (logistic(x) - lo) / (hi - lo)
}

/// Inverse of [`s_curve`]: flat in the middle, steep at both ends.
fn inverse_s_curve(y: f64) -> f64 {
    let (lo, hi) = (logistic(0.0), logistic(1.0));
    let p = (lo + y.clamp(0.0, 1.0) * (hi - lo)).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
    (0.5 + (p / (1.0 - p)).ln() / LOGISTIC_STEEPNESS).clamp(0.0, 1.0)
}

/// Blend with the logistic by `|mix|`; the sign picks S or inverse S.
fn compand(y: f64, mix: f64) -> f64 {
    if mix == 0.0 {
        return y;
    }
    let shaped = if mix > 0.0 {
        s_curve(y)
    } else {
        inverse_s_curve(y)
    };
    let weight = mix.abs().min(1.0);
    (1.0 - weight) * y + weight * shaped
}

fn quantize(x: f64) -> u8 {
    if x <= 0.0 {
        MIN_OUTPUT
    } else if x >= 1.0 {
        MAX_OUTPUT
    } else {
        (1.0 + x * 126.0).round() as u8
    }
}

fn repair_monotonic(table: &mut [u8; LUT_SIZE]) {
    for i in 1..LUT_SIZE {
        if table[i] < table[i - 1] {
            table[i] = table[i - 1];
        }
    }
}

fn enforce_plateau(table: &mut [u8; LUT_SIZE]) {
    if let Some(first) = table.iter().position(|v| *v == MAX_OUTPUT) {
        table[first..].fill(MAX_OUTPUT);
    }
}

/// Package a table for upload to `profile`.
///
/// Uses the bulk command when the profile lists it, otherwise the legacy
/// per-entry command; profiles with neither get `UnsupportedCommand`.
pub fn upload_messages(
    profile: &DeviceProfile,
    lut: &CurveLut,
    echo: Option<&CurveParameters>,
) -> Result<Vec<SysExMessage>, SysExError> {
    if profile.supports(VendorCommand::UploadCurve) {
        let mut data = Vec::with_capacity(4 + LUT_SIZE);
        if let Some(params) = echo {
            data.extend_from_slice(&params.echo_bytes());
        }
        data.extend_from_slice(lut.as_slice());
        return Ok(vec![SysExMessage::for_profile(
            profile,
            VendorCommand::UploadCurve,
            data,
        )?]);
    }

    if profile.supports(VendorCommand::SetCurveEntries) {
        return lut
            .as_slice()
            .chunks(LEGACY_BLOCK)
            .enumerate()
            .map(|(block, entries)| {
                let mut data = Vec::with_capacity(1 + LEGACY_BLOCK);
                data.push((block * LEGACY_BLOCK) as u8);
                data.extend_from_slice(entries);
                SysExMessage::for_profile(profile, VendorCommand::SetCurveEntries, data)
            })
            .collect();
    }

    Err(SysExError::UnsupportedCommand {
        device: profile.name,
        command: VendorCommand::UploadCurve,
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::profile::DeviceKind;

    fn lut(threshold: i32, drive: i32, compand: i32, range: i32) -> CurveLut {
        build(&CurveParameters::new(threshold, drive, compand, range).unwrap())
    }

    #[test]
    fn test_linear_curve() {
        let table = lut(0, 0, 0, 100);
        let entries = table.entries();
        assert_eq!(entries[0], 1);
        assert_eq!(entries[127], 127);
        // Only the last entry reaches the maximum
        assert_eq!(entries.iter().filter(|v| **v == 127).count(), 1);
        for (i, v) in entries.iter().enumerate() {
            let expected = (1.0 + i as f64 / 127.0 * 126.0).round() as u8;
            assert_eq!(*v, expected, "entry {i}");
        }
    }

    #[test]
    fn test_full_threshold_pins_first_sixteen() {
        let table = lut(100, 0, 0, 100);
        let entries = table.entries();
        assert!(entries[..16].iter().all(|v| *v == MIN_OUTPUT));
        assert!(entries[16] >= MIN_OUTPUT);
        assert_eq!(entries[127], 127);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_zero_range_saturates_after_threshold() {
        let table = lut(0, 0, 0, 0);
        assert!(table.entries().iter().all(|v| *v == 127));

        let table = lut(50, 0, 0, 0);
        let entries = table.entries();
        assert!(entries[..8].iter().all(|v| *v == MIN_OUTPUT));
        assert!(entries[8..].iter().all(|v| *v == 127));
    }

    #[test]
    fn test_partial_range_plateaus() {
        let table = lut(0, 0, 0, 50);
        let entries = table.entries();
        let first_max = entries.iter().position(|v| *v == 127).unwrap();
        assert!(first_max < 70, "plateau starts at {first_max}");
        assert!(entries[first_max..].iter().all(|v| *v == 127));
    }

    #[test]
    fn test_drive_shapes_lower_portion() {
        let linear = lut(0, 0, 0, 100);
        let steep = lut(0, 50, 0, 100);
        let flat = lut(0, -50, 0, 100);
        assert!(steep.entries()[32] > linear.entries()[32]);
        assert!(flat.entries()[32] < linear.entries()[32]);
    }

    #[test]
    fn test_compand_sign() {
        let linear = lut(0, 0, 0, 100);
        let s = lut(0, 0, 50, 100);
        let inverse = lut(0, 0, -50, 100);
        // S curve is slower at the bottom, the inverse faster
        assert!(s.entries()[16] < linear.entries()[16]);
        assert!(inverse.entries()[16] > linear.entries()[16]);
    }

    #[test]
    fn test_parameter_validation() {
        assert!(matches!(
            CurveParameters::new(101, 0, 0, 100),
            Err(CurveError::InvalidParameter {
                name: "threshold",
                ..
            })
        ));
        assert!(CurveParameters::new(0, -51, 0, 100).is_err());
        assert!(CurveParameters::new(0, 0, 51, 100).is_err());
        assert!(CurveParameters::new(0, 0, 0, -1).is_err());

        let clamped = CurveParameters::clamped(150, -80, 80, -5);
        assert_eq!(
            (clamped.threshold(), clamped.drive(), clamped.compand(), clamped.range()),
            (100, -50, 50, 0)
        );

        let raw = RawCurveParameters {
            threshold: 200,
            drive: 0,
            compand: 0,
            range: 100,
        };
        assert!(CurveParameters::with_policy(raw, ParameterPolicy::Reject).is_err());
        assert_eq!(
            CurveParameters::with_policy(raw, ParameterPolicy::Clamp)
                .unwrap()
                .threshold(),
            100
        );
    }

    #[test]
    fn test_table_validation() {
        let mut entries = [64u8; LUT_SIZE];
        assert!(CurveLut::try_from_entries(&entries).is_ok());

        entries[10] = 10;
        assert!(CurveLut::try_from_entries(&entries).is_err());

        let mut entries: Vec<u8> = (0..128).collect();
        entries[100] = 127;
        assert!(CurveLut::try_from_entries(&entries).is_err());

        assert!(CurveLut::try_from_entries(&[1, 2, 3]).is_err());
        assert!(CurveLut::try_from_entries(&[128u8; LUT_SIZE]).is_err());
    }

    #[test]
    fn test_bulk_upload() {
        let params = CurveParameters::new(10, -20, 5, 90).unwrap();
        let table = build(&params);
        let messages = upload_messages(DeviceKind::Push3.profile(), &table, Some(&params)).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].command, VendorCommand::UploadCurve);
        assert_eq!(messages[0].data[..4], [10, 30, 55, 90]);
        assert_eq!(&messages[0].data[4..], table.as_slice());
        assert!(messages[0].encode().is_ok());

        let without_echo = upload_messages(DeviceKind::Push3.profile(), &table, None).unwrap();
        assert_eq!(without_echo[0].data.len(), LUT_SIZE);
    }

    #[test]
    fn test_legacy_upload() {
        let table = build(&CurveParameters::default());
        let messages = upload_messages(DeviceKind::Push2.profile(), &table, None).unwrap();
        assert_eq!(messages.len(), 8);
        for (block, message) in messages.iter().enumerate() {
            assert_eq!(message.command, VendorCommand::SetCurveEntries);
            assert_eq!(message.data[0] as usize, block * 16);
            assert_eq!(&message.data[1..], &table.as_slice()[block * 16..block * 16 + 16]);
        }
    }

    #[test]
    fn test_config_round_trip_validates() {
        let params: CurveParameters =
            serde_json::from_str(r#"{"threshold":20,"drive":10,"compand":-10,"range":80}"#).unwrap();
        assert_eq!(params.drive(), 10);
        assert!(serde_json::from_str::<CurveParameters>(
            r#"{"threshold":20,"drive":99,"compand":0,"range":80}"#
        )
        .is_err());
    }

    proptest! {
        #[test]
        fn prop_lut_invariants(
            threshold in 0i32..=100,
            drive in -50i32..=50,
            compand in -50i32..=50,
            range in 0i32..=100,
        ) {
            let table = lut(threshold, drive, compand, range);
            let entries = table.entries();
            prop_assert_eq!(entries.len(), LUT_SIZE);
            prop_assert!(entries.iter().all(|v| *v <= MAX_OUTPUT));
            prop_assert!(entries.windows(2).all(|w| w[1] >= w[0]));
            if let Some(first) = entries.iter().position(|v| *v == MAX_OUTPUT) {
                prop_assert!(entries[first..].iter().all(|v| *v == MAX_OUTPUT));
            }
            let pinned = threshold_entries(threshold);
            prop_assert!(entries[..pinned].iter().all(|v| *v == MIN_OUTPUT));
        }

        #[test]
        fn prop_build_is_deterministic(
            threshold in 0i32..=100,
            drive in -50i32..=50,
            compand in -50i32..=50,
            range in 0i32..=100,
        ) {
            prop_assert_eq!(
                lut(threshold, drive, compand, range),
                lut(threshold, drive, compand, range)
            );
        }
    }
}
