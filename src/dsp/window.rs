//! Blackman-Harris 7-term analysis window for the FFT channelizer (spec §4.2).

use std::f64::consts::PI;

/// 7-term Blackman-Harris coefficients (symmetric, high sidelobe
/// rejection — chosen for narrowband channel isolation over a wide IQ
/// capture, where adjacent strong carriers must not leak into a weak
/// channel's bin).
const COEFFS: [f64; 7] = [
    0.271_051_4,
    -0.433_297_9,
    0.218_280_4,
    -0.065_925_45,
    0.010_811_7,
    -0.000_776_6,
    0.000_013_68,
];

/// Precomputed window of length `fft_size`, applied in-place to the FFT
/// input magnitude/phase before the forward transform.
pub struct BlackmanHarrisWindow {
    taps: Vec<f32>,
}

impl BlackmanHarrisWindow {
    pub fn new(fft_size: usize) -> Self {
        let n = fft_size as f64;
        let taps = (0..fft_size)
            .map(|i| {
                let mut acc = 0.0;
                for (k, &c) in COEFFS.iter().enumerate() {
                    acc += c * (2.0 * PI * k as f64 * i as f64 / (n - 1.0)).cos();
                }
                acc as f32
            })
            .collect();
        Self { taps }
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    #[inline]
    pub fn apply(&self, samples: &mut [num_complex::Complex32]) {
        debug_assert_eq!(samples.len(), self.taps.len());
        for (s, &w) in samples.iter_mut().zip(self.taps.iter()) {
            *s *= w;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_taper_toward_zero() {
        let w = BlackmanHarrisWindow::new(256);
        assert!(w.taps[0] < 0.01);
        assert!(w.taps[w.len() - 1] < 0.01);
    }

    #[test]
    fn peak_is_near_center() {
        let w = BlackmanHarrisWindow::new(256);
        let center = w.taps[128];
        assert!(center > 0.9, "center tap should be near unity gain: {center}");
    }
}
