//! Dequantization of raw interleaved IQ bytes into [-1, 1] complex floats.
//!
//! Mirrors the receiver-side sample formats named in spec §3/§6.

use num_complex::Complex32;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    U8,
    S8,
    S16,
    F32,
}

impl SampleFormat {
    pub const fn bytes_per_component(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    /// Bytes per complex IQ sample (two components, I then Q).
    pub const fn bytes_per_sample(self) -> usize {
        self.bytes_per_component() * 2
    }

    pub const fn full_scale(self) -> f32 {
        match self {
            SampleFormat::U8 => 127.5,
            SampleFormat::S8 => 127.0,
            SampleFormat::S16 => 32767.0,
            SampleFormat::F32 => 1.0,
        }
    }

    /// Dequantize one interleaved (I, Q) pair starting at `bytes[0]`.
    #[inline]
    pub fn dequantize(self, bytes: &[u8]) -> Complex32 {
        let fs = self.full_scale();
        match self {
            SampleFormat::U8 => {
                let i = (bytes[0] as f32 - 127.5) / fs;
                let q = (bytes[1] as f32 - 127.5) / fs;
                Complex32::new(i, q)
            }
            SampleFormat::S8 => {
                let i = (bytes[0] as i8) as f32 / fs;
                let q = (bytes[1] as i8) as f32 / fs;
                Complex32::new(i, q)
            }
            SampleFormat::S16 => {
                let i = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / fs;
                let q = i16::from_le_bytes([bytes[2], bytes[3]]) as f32 / fs;
                Complex32::new(i, q)
            }
            SampleFormat::F32 => {
                let i = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let q = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
                Complex32::new(i, q)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_midpoint_is_zero() {
        let c = SampleFormat::U8.dequantize(&[128, 128]);
        assert!(c.re.abs() < 0.01 && c.im.abs() < 0.01);
    }

    #[test]
    fn s16_full_scale_near_one() {
        let bytes = 32767i16.to_le_bytes();
        let c = SampleFormat::S16.dequantize(&[bytes[0], bytes[1], bytes[0], bytes[1]]);
        assert!((c.re - 1.0).abs() < 1e-3);
    }

    #[test]
    fn f32_round_trip() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.25f32.to_le_bytes());
        bytes.extend_from_slice(&(-0.5f32).to_le_bytes());
        let c = SampleFormat::F32.dequantize(&bytes);
        assert_eq!(c, Complex32::new(0.25, -0.5));
    }
}
