//! 24-bit fixed-point downmix phase accumulator (spec §4.7).

use num_complex::Complex32;
use std::f64::consts::PI;
use std::sync::OnceLock;

const PHASE_BITS: u32 = 24;
pub const PHASE_MODULUS: u32 = 1 << PHASE_BITS;

/// Quarter-symmetric sin table: only the first quadrant is stored;
/// cos/negative-quadrant values are derived by index reflection.
const LUT_BITS: u32 = 16;
const LUT_SIZE: usize = 1 << LUT_BITS;

fn sin_lut() -> &'static [f32; LUT_SIZE] {
    static LUT: OnceLock<Box<[f32; LUT_SIZE]>> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut table = vec![0f32; LUT_SIZE].into_boxed_slice();
        for (i, slot) in table.iter_mut().enumerate() {
            let angle = 2.0 * PI * i as f64 / LUT_SIZE as f64;
            *slot = angle.sin() as f32;
        }
        table.try_into().unwrap_or_else(|_| unreachable!())
    })
}

#[inline]
fn lookup_sin(phase: u32) -> f32 {
    let idx = (phase >> (PHASE_BITS - LUT_BITS)) as usize & (LUT_SIZE - 1);
    sin_lut()[idx]
}

#[inline]
fn lookup_cos(phase: u32) -> f32 {
    // cos(x) = sin(x + pi/2); pi/2 is a quarter turn of the full circle.
    let quarter_turn = PHASE_MODULUS / 4;
    lookup_sin(phase.wrapping_add(quarter_turn) % PHASE_MODULUS)
}

/// Fine-frequency-correction downmix oscillator, modular over
/// `[0, 2^24)`, advanced once per processed IQ sample.
#[derive(Debug, Clone, Copy)]
pub struct PhaseAccumulator {
    phase: u32,
    increment: u32,
}

impl PhaseAccumulator {
    pub fn new(increment: u32) -> Self {
        Self {
            phase: 0,
            increment: increment % PHASE_MODULUS,
        }
    }

    pub fn set_increment(&mut self, increment: u32) {
        self.increment = increment % PHASE_MODULUS;
    }

    /// Derive `dphi` from channel offset vs receiver center per §4.7,
    /// correcting for the residual from non-integer decimation.
    pub fn increment_from_offset(
        channel_freq_hz: f64,
        receiver_center_hz: f64,
        fs_hz: f64,
        audio_rate_hz: f64,
    ) -> u32 {
        let decimation = fs_hz / audio_rate_hz;
        let dphi_hz = channel_freq_hz - receiver_center_hz;
        let corr =
            (audio_rate_hz / 2.0) * (decimation - decimation.round()) * (dphi_hz / (fs_hz / 2.0));
        let mut dphi = (dphi_hz - corr) / audio_rate_hz;
        // normalize to [-0.5, 0.5)
        dphi -= dphi.floor();
        if dphi >= 0.5 {
            dphi -= 1.0;
        }
        let scaled = (dphi * PHASE_MODULUS as f64).round() as i64;
        scaled.rem_euclid(PHASE_MODULUS as i64) as u32
    }

    /// Multiply `sample` by `exp(-i*phi)` and advance the accumulator.
    #[inline]
    pub fn downmix(&mut self, sample: Complex32) -> Complex32 {
        let c = lookup_cos(self.phase);
        let s = -lookup_sin(self.phase); // exp(-i*phi) = cos(phi) - i*sin(phi)
        let rotated = Complex32::new(
            sample.re * c - sample.im * s,
            sample.re * s + sample.im * c,
        );
        self.phase = (self.phase + self.increment) % PHASE_MODULUS;
        rotated
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_stays_in_modulus() {
        let mut acc = PhaseAccumulator::new(PHASE_MODULUS - 1);
        for _ in 0..4 {
            acc.downmix(Complex32::new(1.0, 0.0));
            assert!(acc.phase() < PHASE_MODULUS);
        }
    }

    #[test]
    fn zero_increment_is_identity_rotation() {
        let mut acc = PhaseAccumulator::new(0);
        let out = acc.downmix(Complex32::new(0.3, -0.7));
        assert!((out.re - 0.3).abs() < 1e-5);
        assert!((out.im + 0.7).abs() < 1e-5);
    }

    #[test]
    fn lut_sin_cos_matches_std_at_quarter_turn() {
        let quarter = PHASE_MODULUS / 4;
        assert!((lookup_sin(quarter) - 1.0).abs() < 1e-3);
        assert!(lookup_cos(quarter).abs() < 1e-3);
    }

    #[test]
    fn increment_from_offset_normalizes_into_range() {
        let inc = PhaseAccumulator::increment_from_offset(100_020_000.0, 100_000_000.0, 2_048_000.0, 8000.0);
        assert!(inc < PHASE_MODULUS);
    }
}
