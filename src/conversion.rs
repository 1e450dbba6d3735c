//! Raw-count to physical-unit conversion.
//!
//! Everything here is pure: the same raw record and configuration always
//! produce the same bits.

use crate::messages::SampleKind;
use serde::Deserialize;

pub const GRAVITY_MSS: f32 = 9.80665;
pub const DEG_TO_RAD: f32 = core::f32::consts::PI / 180.0;

/// Bytes per raw three-axis record
pub const SAMPLE_SIZE: usize = 6;

const HALF_SQRT_2: f32 = core::f32::consts::FRAC_1_SQRT_2;

/// Three signed 16-bit axis values exactly as produced by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample(pub [i16; 3]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl RawSample {
    pub fn decode(bytes: &[u8; SAMPLE_SIZE], order: ByteOrder) -> Self {
        let axis = |i: usize| {
            let pair = [bytes[i * 2], bytes[i * 2 + 1]];
            match order {
                ByteOrder::Little => i16::from_le_bytes(pair),
                ByteOrder::Big => i16::from_be_bytes(pair),
            }
        };
        RawSample([axis(0), axis(1), axis(2)])
    }

    /// Decode consecutive records from a burst read, in arrival order
    pub fn decode_all(
        bytes: &[u8],
        order: ByteOrder,
    ) -> impl Iterator<Item = RawSample> + '_ {
        bytes.chunks_exact(SAMPLE_SIZE).map(move |chunk| {
            let mut record = [0u8; SAMPLE_SIZE];
            record.copy_from_slice(chunk);
            RawSample::decode(&record, order)
        })
    }
}

/// Physical units per raw count
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactor(pub f32);

/// Device full-scale range selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum FullScaleRange {
    #[serde(rename = "245dps")]
    Dps245,
    #[serde(rename = "500dps")]
    Dps500,
    #[serde(rename = "2000dps")]
    Dps2000,
    #[serde(rename = "2g")]
    G2,
    #[serde(rename = "4g")]
    G4,
    #[serde(rename = "6g")]
    G6,
    #[serde(rename = "8g")]
    G8,
    #[serde(rename = "16g")]
    G16,
    #[serde(rename = "2gauss")]
    Gauss2,
    #[serde(rename = "4gauss")]
    Gauss4,
    #[serde(rename = "8gauss")]
    Gauss8,
    #[serde(rename = "12gauss")]
    Gauss12,
}

impl FullScaleRange {
    pub fn kind(self) -> SampleKind {
        use FullScaleRange::*;
        match self {
            Dps245 | Dps500 | Dps2000 => SampleKind::Gyro,
            G2 | G4 | G6 | G8 | G16 => SampleKind::Accel,
            Gauss2 | Gauss4 | Gauss8 | Gauss12 => SampleKind::Mag,
        }
    }

    /// rad/s, m/s/s or µT per LSB
    pub fn scale_factor(self) -> ScaleFactor {
        use FullScaleRange::*;
        let scale = match self {
            // datasheet sensitivities in mdps/digit
            Dps245 => 8.75 / 1000.0 * DEG_TO_RAD,
            Dps500 => 17.50 / 1000.0 * DEG_TO_RAD,
            Dps2000 => 70.0 / 1000.0 * DEG_TO_RAD,
            G2 => accel_g_per_lsb(0) * GRAVITY_MSS,
            G4 => accel_g_per_lsb(1) * GRAVITY_MSS,
            G6 => accel_g_per_lsb(2) * GRAVITY_MSS,
            G8 => accel_g_per_lsb(3) * GRAVITY_MSS,
            // the datasheet lists an exception for +-16g
            G16 => 0.000732 * GRAVITY_MSS,
            // mgauss/digit, 1 mgauss = 0.1 uT
            Gauss2 => 0.08 * 0.1,
            Gauss4 => 0.16 * 0.1,
            Gauss8 => 0.32 * 0.1,
            Gauss12 => 0.48 * 0.1,
        };
        ScaleFactor(scale)
    }
}

fn accel_g_per_lsb(selector: u8) -> f32 {
    ((selector as f32 + 1.0) * 2.0) / 32768.0
}

/// Per-axis sign flips matching how the die is wired on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(transparent)]
pub struct AxisSigns(pub [bool; 3]);

impl AxisSigns {
    fn apply(self, raw: RawSample) -> [f32; 3] {
        let mut out = [0.0f32; 3];
        for (axis, value) in raw.0.iter().enumerate() {
            let v = *value as f32;
            out[axis] = if self.0[axis] { -v } else { v };
        }
        out
    }
}

/// Fixed board mounting rotation, applied as an exact axis remap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    #[default]
    None,
    #[serde(rename = "yaw_45")]
    Yaw45,
    #[serde(rename = "yaw_90")]
    Yaw90,
    #[serde(rename = "yaw_135")]
    Yaw135,
    #[serde(rename = "yaw_180")]
    Yaw180,
    #[serde(rename = "yaw_225")]
    Yaw225,
    #[serde(rename = "yaw_270")]
    Yaw270,
    #[serde(rename = "yaw_315")]
    Yaw315,
    #[serde(rename = "roll_180")]
    Roll180,
    #[serde(rename = "roll_180_yaw_45")]
    Roll180Yaw45,
    #[serde(rename = "roll_180_yaw_90")]
    Roll180Yaw90,
    #[serde(rename = "roll_180_yaw_135")]
    Roll180Yaw135,
    #[serde(rename = "pitch_180")]
    Pitch180,
    #[serde(rename = "roll_180_yaw_225")]
    Roll180Yaw225,
    #[serde(rename = "roll_180_yaw_270")]
    Roll180Yaw270,
    #[serde(rename = "roll_180_yaw_315")]
    Roll180Yaw315,
    #[serde(rename = "roll_90")]
    Roll90,
    #[serde(rename = "roll_270")]
    Roll270,
    #[serde(rename = "pitch_90")]
    Pitch90,
    #[serde(rename = "pitch_270")]
    Pitch270,
}

impl Rotation {
    pub fn apply(self, v: [f32; 3]) -> [f32; 3] {
        let [x, y, z] = v;
        use Rotation::*;
        match self {
            None => [x, y, z],
            Yaw45 => [HALF_SQRT_2 * (x - y), HALF_SQRT_2 * (x + y), z],
            Yaw90 => [-y, x, z],
            Yaw135 => [-HALF_SQRT_2 * (x + y), HALF_SQRT_2 * (x - y), z],
            Yaw180 => [-x, -y, z],
            Yaw225 => [HALF_SQRT_2 * (y - x), -HALF_SQRT_2 * (x + y), z],
            Yaw270 => [y, -x, z],
            Yaw315 => [HALF_SQRT_2 * (x + y), HALF_SQRT_2 * (y - x), z],
            Roll180 => [x, -y, -z],
            Roll180Yaw45 => [HALF_SQRT_2 * (x + y), HALF_SQRT_2 * (x - y), -z],
            Roll180Yaw90 => [y, x, -z],
            Roll180Yaw135 => [HALF_SQRT_2 * (y - x), HALF_SQRT_2 * (y + x), -z],
            Pitch180 => [-x, y, -z],
            Roll180Yaw225 => [-HALF_SQRT_2 * (x + y), HALF_SQRT_2 * (y - x), -z],
            Roll180Yaw270 => [-y, -x, -z],
            Roll180Yaw315 => [HALF_SQRT_2 * (x - y), -HALF_SQRT_2 * (x + y), -z],
            Roll90 => [x, -z, y],
            Roll270 => [x, z, -y],
            Pitch90 => [z, y, -x],
            Pitch270 => [-z, y, x],
        }
    }
}

/// Immutable per-instance conversion settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub signs: AxisSigns,
    pub scale: ScaleFactor,
    pub rotation: Rotation,
    pub byte_order: ByteOrder,
}

impl Conversion {
    pub fn new(range: FullScaleRange, signs: AxisSigns, rotation: Rotation) -> Self {
        Self {
            signs,
            scale: range.scale_factor(),
            rotation,
            byte_order: ByteOrder::Little,
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Sign-correct, scale, then rotate into the board frame
    pub fn apply(&self, raw: RawSample) -> [f32; 3] {
        let signed = self.signs.apply(raw);
        let scaled = signed.map(|v| v * self.scale.0);
        self.rotation.apply(scaled)
    }
}
