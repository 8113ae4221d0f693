//! AM envelope and NFM phase-discriminator demodulators (spec §4.3d, §4.6).

use num_complex::Complex32;

/// Two-tier envelope AGC shared by AM detection and NFM de-emphasis:
/// a slow tracker (`agcavgfast`, despite the name it is the *single*
/// tracked average) plus, for AM, a fast headroom compressor.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeTracker {
    pub agcavgfast: f32,
}

impl EnvelopeTracker {
    pub fn new() -> Self {
        Self { agcavgfast: 1e-6 }
    }
}

impl Default for EnvelopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// AM envelope detector with two-tier AGC: a slow envelope tracker plus a
/// fast compressor that kicks in above 0.8 full-scale (§4.3d).
pub struct AmDemod {
    pub tracker: EnvelopeTracker,
    squelch_level: f32,
}

impl AmDemod {
    pub fn new(squelch_level: f32) -> Self {
        Self {
            tracker: EnvelopeTracker::new(),
            squelch_level,
        }
    }

    pub fn set_squelch_level(&mut self, level: f32) {
        self.squelch_level = level;
    }

    /// `wavein_j` is the current raw magnitude sample; `wavein_lookback`
    /// is the sample `AGC_EXTRA` positions earlier, per §9's deliberate
    /// lookahead note — preserve the index offset at the call site.
    #[inline]
    pub fn process(&mut self, wavein_j: f32, wavein_lookback: f32) -> f32 {
        if wavein_j > self.squelch_level {
            self.tracker.agcavgfast = 0.995 * self.tracker.agcavgfast + 0.005 * wavein_j;
        }
        let denom = (1.5 * self.tracker.agcavgfast).max(1e-9);
        let mut out = (wavein_lookback - self.tracker.agcavgfast) / denom;
        if out.abs() > 0.8 {
            out *= 0.85;
            self.tracker.agcavgfast *= 1.15;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NfmDiscriminator {
    /// `atan2` via a piecewise-linear approximation.
    Fast,
    /// Ratio-based quadrature discriminator, avoids the `atan2` call.
    Quadri,
}

/// Piecewise-linear atan2 approximation in units of `[-1, 1]` (i.e.
/// already divided by pi), matching the discriminator's own normalization.
fn fast_atan2_over_pi(im: f32, re: f32) -> f32 {
    if re == 0.0 && im == 0.0 {
        return 0.0;
    }
    const QPI: f32 = 0.25;
    const TQPI: f32 = 0.75;
    let (abs_im, abs_re) = (im.abs(), re.abs());
    let angle = if re >= 0.0 {
        if abs_re + abs_im == 0.0 {
            0.0
        } else {
            QPI - QPI * (re - abs_im) / (re + abs_im)
        }
    } else if abs_re + abs_im == 0.0 {
        0.0
    } else {
        TQPI - QPI * (re + abs_im) / (abs_im - re)
    };
    if im < 0.0 {
        -angle
    } else {
        angle
    }
}

/// NFM phase-differential demodulator with single-pole de-emphasis
/// (`alpha = exp(-1/(Fs*tau))`, default tau = 200 us per §4.6).
pub struct NfmDemod {
    discriminator: NfmDiscriminator,
    prev: Complex32,
    dc_tracker: f32,
    prev_waveout: f32,
    alpha: f32,
}

impl NfmDemod {
    pub fn new(sample_rate: f32, discriminator: NfmDiscriminator, tau_seconds: f32) -> Self {
        let alpha = (-1.0 / (sample_rate * tau_seconds)).exp();
        Self {
            discriminator,
            prev: Complex32::new(0.0, 0.0),
            dc_tracker: 0.0,
            prev_waveout: 0.0,
            alpha,
        }
    }

    pub fn default_tau(sample_rate: f32, discriminator: NfmDiscriminator) -> Self {
        Self::new(sample_rate, discriminator, 200e-6)
    }

    #[inline]
    pub fn process(&mut self, sample: Complex32) -> f32 {
        let raw = match self.discriminator {
            NfmDiscriminator::Fast => {
                let z = sample * self.prev.conj();
                fast_atan2_over_pi(z.im, z.re)
            }
            NfmDiscriminator::Quadri => {
                let denom = sample.re * sample.re + sample.im * sample.im + 1.0;
                (sample.im * self.prev.re - sample.re * self.prev.im) / denom / std::f32::consts::PI
            }
        };
        self.prev = sample;

        self.dc_tracker = 0.995 * self.dc_tracker + 0.005 * raw;
        let dc_blocked = raw - self.dc_tracker;
        let out = dc_blocked * (1.0 - self.alpha) + self.prev_waveout * self.alpha;
        self.prev_waveout = out;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn am_tracks_constant_envelope_toward_zero_output() {
        let mut demod = AmDemod::new(0.01);
        let mut out = 0.0;
        for _ in 0..500 {
            out = demod.process(0.5, 0.5);
        }
        assert!(out.abs() < 0.05, "steady carrier should settle near zero AM output: {out}");
    }

    #[test]
    fn am_clamps_large_excursions() {
        let mut demod = AmDemod::new(0.01);
        for _ in 0..50 {
            demod.process(0.2, 0.2);
        }
        let out = demod.process(2.0, 2.0);
        assert!(out.abs() <= 1.0 + 1e-3);
    }

    #[test]
    fn nfm_fast_and_quadri_agree_on_sign_for_rising_phase() {
        let mut fast = NfmDemod::default_tau(8000.0, NfmDiscriminator::Fast);
        let mut quadri = NfmDemod::default_tau(8000.0, NfmDiscriminator::Quadri);
        let samples: Vec<Complex32> = (0..32)
            .map(|i| Complex32::from_polar(1.0, i as f32 * 0.2))
            .collect();
        let mut fast_sum = 0.0;
        let mut quadri_sum = 0.0;
        for s in samples {
            fast_sum += fast.process(s);
            quadri_sum += quadri.process(s);
        }
        assert!(fast_sum.signum() == quadri_sum.signum() || fast_sum.abs() < 1e-3);
    }
}
