use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

pub const POINTS_PER_INCH: f32 = 72.0;
pub const CM_PER_INCH: f32 = 2.54;
pub const MM_PER_INCH: f32 = 25.4;

// Length in PDF points, fixed-point (32.32). Page/bleed sums stay exact in
// milli-point units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn from_cm(value: f32) -> Pt {
        Pt::from_f32((value as f64 / CM_PER_INCH as f64 * POINTS_PER_INCH as f64) as f32)
    }

    pub fn from_px(px: u32, density: f32) -> Pt {
        if density <= 0.0 || !density.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32((px as f64 / density as f64 * POINTS_PER_INCH as f64) as f32)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_cm(self) -> f32 {
        self.to_f32() / POINTS_PER_INCH * CM_PER_INCH
    }

    pub fn to_inches(self) -> f32 {
        self.to_f32() / POINTS_PER_INCH
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }

    pub fn abs(self) -> Pt {
        if self.to_milli_i64() < 0 { -self } else { self }
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        Pt::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Pt {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::SubAssign for Pt {
    fn sub_assign(&mut self, rhs: Pt) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<i32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: i32) -> Pt {
        let milli = self.to_milli_i64() as i128;
        Pt::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Div<i32> for Pt {
    type Output = Pt;
    fn div(self, rhs: i32) -> Pt {
        if rhs == 0 {
            Pt::ZERO
        } else {
            let milli = self.to_milli_i64() as i128;
            let value = div_round_i128(milli, rhs as i128);
            Pt::from_milli_i128(value)
        }
    }
}

impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        if !rhs.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() * rhs)
    }
}

impl std::ops::Div<f32> for Pt {
    type Output = Pt;
    fn div(self, rhs: f32) -> Pt {
        if rhs == 0.0 || !rhs.is_finite() {
            Pt::ZERO
        } else {
            Pt::from_f32(self.to_f32() / rhs)
        }
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt::from_milli_i128(-(self.to_milli_i64() as i128))
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

// Axis-aligned box in points, origin bottom-left as in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    // Accepts #rgb or #rrggbb, with or without the leading hash.
    pub fn from_hex(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        let expand = |nibble: u8| nibble << 4 | nibble;
        let bytes = match hex.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in hex.chars().enumerate() {
                    out[i] = expand(c.to_digit(16)? as u8);
                }
                out
            }
            6 => {
                let mut out = [0u8; 3];
                for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
                    let s = std::str::from_utf8(chunk).ok()?;
                    out[i] = u8::from_str_radix(s, 16).ok()?;
                }
                out
            }
            _ => return None,
        };
        Some(Self {
            r: bytes[0] as f32 / 255.0,
            g: bytes[1] as f32 / 255.0,
            b: bytes[2] as f32 / 255.0,
        })
    }

    pub fn to_rgb8(self) -> [u8; 3] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b)]
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_sum_is_exact_in_milli_units() {
        let image = Pt::from_cm(90.0);
        let bleed = Pt::from_cm(1.0);
        let page = image + bleed * 2;
        assert_eq!(
            page.to_milli_i64(),
            image.to_milli_i64() + 2 * bleed.to_milli_i64()
        );
        // 92cm in points, allowing one milli-point of quantization.
        let direct = Pt::from_cm(92.0);
        assert!((page.to_milli_i64() - direct.to_milli_i64()).abs() <= 2);
    }

    #[test]
    fn cm_round_trip_stays_close() {
        for cm in [0.5f32, 1.0, 10.0, 29.7, 60.0, 90.0] {
            let pt = Pt::from_cm(cm);
            assert!((pt.to_cm() - cm).abs() < 0.001, "cm {cm} -> {}", pt.to_cm());
        }
    }

    #[test]
    fn px_conversion_uses_density() {
        let pt = Pt::from_px(150, 150.0);
        assert_eq!(pt.to_milli_i64(), 72_000);
        let default_density = Pt::from_px(72, 72.0);
        assert_eq!(default_density.to_milli_i64(), 72_000);
    }

    #[test]
    fn hex_colors_parse() {
        let c = Color::from_hex("#ff8000").unwrap();
        assert!((c.r - 1.0).abs() < 1e-6);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert!((c.b - 0.0).abs() < 1e-6);
        let short = Color::from_hex("fff").unwrap();
        assert_eq!(short.to_rgb8(), [255, 255, 255]);
        assert!(Color::from_hex("#12345").is_none());
        assert!(Color::from_hex("zzzzzz").is_none());
    }

    #[test]
    fn negative_and_division_behave() {
        let v = Pt::from_f32(10.0);
        assert_eq!((-v).to_milli_i64(), -10_000);
        assert_eq!((v / 4).to_milli_i64(), 2_500);
        assert_eq!(v.abs().to_milli_i64(), 10_000);
        assert_eq!((v / 0).to_milli_i64(), 0);
    }
}
