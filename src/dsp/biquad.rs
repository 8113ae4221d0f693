//! Notch and low-pass stages for the per-channel demod chain (spec §4.4).
//!
//! Adapted from the teacher's `audio/dsp/eq.rs` 3-band EQ: same
//! `biquad` crate, same `DirectForm2Transposed` direct-form, retargeted
//! from shelf/peaking bands to a single configurable notch and a single
//! configurable low-pass, each independently disable-able per spec.

use biquad::{Biquad as _, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

/// Center-frequency notch, Q defaults to 10.0 per §4.4. A zero or
/// negative frequency disables the stage (pass-through).
pub struct NotchFilter {
    filter: Option<DirectForm2Transposed<f32>>,
}

impl NotchFilter {
    pub fn new(sample_rate: f32, center_hz: f32, q: f32) -> Self {
        if center_hz <= 0.0 {
            return Self { filter: None };
        }
        let q = if q > 0.0 { q } else { 10.0 };
        let coeffs = Coefficients::<f32>::from_params(
            Type::Notch,
            sample_rate.hz(),
            center_hz.clamp(1.0, sample_rate / 2.0 - 1.0).hz(),
            q,
        )
        .ok();
        Self {
            filter: coeffs.map(DirectForm2Transposed::<f32>::new),
        }
    }

    pub fn disabled() -> Self {
        Self { filter: None }
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        match &mut self.filter {
            Some(f) => f.run(sample),
            None => sample,
        }
    }
}

/// Cutoff is half the configured channel bandwidth; disabled when
/// bandwidth is zero.
pub struct LowPassFilter {
    filter: Option<DirectForm2Transposed<f32>>,
}

impl LowPassFilter {
    pub fn new(sample_rate: f32, bandwidth_hz: f32) -> Self {
        if bandwidth_hz <= 0.0 {
            return Self { filter: None };
        }
        let cutoff = (bandwidth_hz / 2.0).clamp(1.0, sample_rate / 2.0 - 1.0);
        let coeffs = Coefficients::<f32>::from_params(
            Type::LowPass,
            sample_rate.hz(),
            cutoff.hz(),
            Q_BUTTERWORTH_F32,
        )
        .ok();
        Self {
            filter: coeffs.map(DirectForm2Transposed::<f32>::new),
        }
    }

    pub fn disabled() -> Self {
        Self { filter: None }
    }

    pub fn is_active(&self) -> bool {
        self.filter.is_some()
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        match &mut self.filter {
            Some(f) => f.run(sample),
            None => sample,
        }
    }
}

/// Narrow bandpass used by the CTCSS correlator (§4.5), built the same
/// way as the notch/low-pass stages above but tightly centered on the
/// subtone frequency.
pub struct CtcssBandpass {
    filter: DirectForm2Transposed<f32>,
}

impl CtcssBandpass {
    pub fn new(sample_rate: f32, tone_hz: f32) -> Self {
        let q = 20.0;
        let coeffs = Coefficients::<f32>::from_params(
            Type::BandPass,
            sample_rate.hz(),
            tone_hz.clamp(1.0, sample_rate / 2.0 - 1.0).hz(),
            q,
        )
        .unwrap_or(Coefficients {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        });
        Self {
            filter: DirectForm2Transposed::<f32>::new(coeffs),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        self.filter.run(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_notch_is_pass_through() {
        let mut n = NotchFilter::new(8000.0, 0.0, 10.0);
        assert_eq!(n.process(0.37), 0.37);
    }

    #[test]
    fn disabled_low_pass_is_pass_through() {
        let mut lp = LowPassFilter::new(8000.0, 0.0);
        assert!(!lp.is_active());
        assert_eq!(lp.process(-0.2), -0.2);
    }

    #[test]
    fn active_low_pass_attenuates_step() {
        let mut lp = LowPassFilter::new(8000.0, 500.0);
        assert!(lp.is_active());
        let mut last = 0.0;
        for _ in 0..200 {
            last = lp.process(1.0);
        }
        assert!(last > 0.5 && last <= 1.01);
    }
}
