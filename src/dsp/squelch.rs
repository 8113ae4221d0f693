//! Squelch state machine and CTCSS subtone gate (spec §4.3a, §4.5).
//!
//! The open/close hysteresis and envelope tracking are adapted from the
//! teacher's `GatedAGC` (`audio/dsp/agc.rs`): distinct attack/release
//! one-pole smoothing over an RMS-like envelope, a gate threshold in dB.
//! Here the gate is discretized into an explicit Schmitt-trigger state
//! machine (the teacher's gate just holds gain; this one must also drive
//! demod enable/disable and ramps), and a CTCSS correlator is added.

use crate::dsp::biquad::CtcssBandpass;

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquelchState {
    Closed,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone)]
pub struct SquelchConfig {
    /// Linear threshold; 0.0 means "use the noise-floor auto estimate".
    pub threshold_abs: f32,
    pub snr_factor: f32,
    pub n_open: u32,
    pub n_close: u32,
    pub ramp_len: usize,
    /// CTCSS tone frequency in Hz; 0.0 disables subtone gating.
    pub ctcss_hz: f32,
}

impl Default for SquelchConfig {
    fn default() -> Self {
        Self {
            threshold_abs: 0.0,
            snr_factor: 3.0,
            n_open: 2,
            n_close: 10,
            ramp_len: 48,
            ctcss_hz: 0.0,
        }
    }
}

/// Schmitt-trigger squelch with slow-decay signal/noise envelopes and an
/// optional CTCSS gate on the Opening transition.
pub struct Squelch {
    config: SquelchConfig,
    state: SquelchState,

    noise_envelope: f32,
    signal_envelope: f32,

    above_count: u32,
    below_count: u32,
    ramp_pos: usize,

    ctcss: Option<CtcssBandpass>,
    ctcss_detected: bool,
    ctcss_corr: f32,
}

const NOISE_TC: f32 = 0.999;
const SIGNAL_TC: f32 = 0.98;

/// Closing-state output decay factor (spec §4.3c, §4.5): each closing
/// sample is `CLOSING_DECAY` times the previous output sample, not a
/// linear ramp back to zero.
pub const CLOSING_DECAY: f32 = 0.94;

impl Squelch {
    pub fn new(sample_rate: f32, config: SquelchConfig) -> Self {
        let ctcss = if config.ctcss_hz > 0.0 {
            Some(CtcssBandpass::new(sample_rate, config.ctcss_hz))
        } else {
            None
        };
        Self {
            config,
            state: SquelchState::Closed,
            noise_envelope: 1e-6,
            signal_envelope: 0.0,
            above_count: 0,
            below_count: 0,
            ramp_pos: 0,
            ctcss,
            ctcss_detected: false,
            ctcss_corr: 0.0,
        }
    }

    pub fn state(&self) -> SquelchState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, SquelchState::Open | SquelchState::Closing)
    }

    pub fn should_filter_sample(&self) -> bool {
        matches!(self.state, SquelchState::Open | SquelchState::Opening)
    }

    pub fn should_process_audio(&self) -> bool {
        matches!(
            self.state,
            SquelchState::Open | SquelchState::Opening | SquelchState::Closing
        )
    }

    /// Live open/close threshold: the configured floor, or the tracked
    /// noise envelope scaled by `snr_factor` in auto mode (spec §4.3a).
    /// Also the gate other per-sample stages (e.g. AM's AGC bootstrap)
    /// should read instead of the static config value.
    pub fn effective_threshold(&self) -> f32 {
        if self.config.threshold_abs > 0.0 {
            self.config.threshold_abs.max(self.noise_envelope * self.config.snr_factor)
        } else {
            self.noise_envelope * self.config.snr_factor
        }
    }

    /// Feed one raw (pre-filter) magnitude sample; drives open/close
    /// hysteresis. Returns the ramp gain (1.0 outside Opening/Closing).
    pub fn process_raw_sample(&mut self, level: f32) -> f32 {
        self.noise_envelope = NOISE_TC * self.noise_envelope + (1.0 - NOISE_TC) * level;
        let threshold = self.effective_threshold();

        match self.state {
            SquelchState::Closed => {
                if level > threshold {
                    self.above_count += 1;
                } else {
                    self.above_count = 0;
                }
                if self.above_count >= self.config.n_open
                    && (self.config.ctcss_hz <= 0.0 || self.ctcss_detected)
                {
                    self.state = SquelchState::Opening;
                    self.ramp_pos = 0;
                    self.above_count = 0;
                }
                0.0
            }
            SquelchState::Opening => {
                self.signal_envelope = SIGNAL_TC * self.signal_envelope + (1.0 - SIGNAL_TC) * level;
                self.ramp_pos += 1;
                let gain = (self.ramp_pos as f32 / self.config.ramp_len as f32).min(1.0);
                if self.ramp_pos >= self.config.ramp_len {
                    self.state = SquelchState::Open;
                }
                gain
            }
            SquelchState::Open => {
                self.signal_envelope = SIGNAL_TC * self.signal_envelope + (1.0 - SIGNAL_TC) * level;
                if level < threshold {
                    self.below_count += 1;
                } else {
                    self.below_count = 0;
                }
                if self.below_count >= self.config.n_close {
                    self.state = SquelchState::Closing;
                    self.ramp_pos = 0;
                    self.below_count = 0;
                }
                1.0
            }
            SquelchState::Closing => {
                self.ramp_pos += 1;
                if self.ramp_pos >= self.config.ramp_len {
                    self.state = SquelchState::Closed;
                }
                CLOSING_DECAY
            }
        }
    }

    /// Refine the open/close decision after a low-pass stage has run
    /// (§4.3b: "feed the refined magnitude back via process_filtered_sample").
    pub fn process_filtered_sample(&mut self, level: f32) {
        self.signal_envelope = SIGNAL_TC * self.signal_envelope + (1.0 - SIGNAL_TC) * level;
    }

    /// CTCSS tone detector driven from demodulated audio (§4.3d): narrow
    /// bandpass + running correlation against the configured tone.
    pub fn process_audio_sample(&mut self, audio: f32) {
        let Some(bp) = self.ctcss.as_mut() else { return };
        let filtered = bp.process(audio);
        self.ctcss_corr = 0.995 * self.ctcss_corr + 0.005 * filtered.abs();
        self.ctcss_detected = self.ctcss_corr > 0.02;
    }

    pub fn reset(&mut self) {
        self.state = SquelchState::Closed;
        self.above_count = 0;
        self.below_count = 0;
        self.ramp_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_threshold() {
        let mut sq = Squelch::new(
            8000.0,
            SquelchConfig {
                threshold_abs: 0.5,
                ..Default::default()
            },
        );
        for _ in 0..200 {
            sq.process_raw_sample(0.01);
        }
        assert_eq!(sq.state(), SquelchState::Closed);
        assert!(!sq.is_open());
    }

    #[test]
    fn opens_after_n_open_above_threshold_samples() {
        let mut sq = Squelch::new(
            8000.0,
            SquelchConfig {
                threshold_abs: 0.1,
                n_open: 2,
                ramp_len: 4,
                ..Default::default()
            },
        );
        sq.process_raw_sample(1.0);
        sq.process_raw_sample(1.0);
        assert_eq!(sq.state(), SquelchState::Opening);
        for _ in 0..4 {
            sq.process_raw_sample(1.0);
        }
        assert_eq!(sq.state(), SquelchState::Open);
    }

    #[test]
    fn closes_after_n_close_below_threshold_samples() {
        let mut sq = Squelch::new(
            8000.0,
            SquelchConfig {
                threshold_abs: 0.1,
                n_open: 1,
                n_close: 3,
                ramp_len: 2,
                ..Default::default()
            },
        );
        sq.process_raw_sample(1.0);
        for _ in 0..2 {
            sq.process_raw_sample(1.0);
        }
        assert_eq!(sq.state(), SquelchState::Open);
        for _ in 0..3 {
            sq.process_raw_sample(0.0);
        }
        assert_eq!(sq.state(), SquelchState::Closing);
    }

    #[test]
    fn closing_returns_constant_decay_and_expires_after_ramp_len() {
        let mut sq = Squelch::new(
            8000.0,
            SquelchConfig {
                threshold_abs: 0.1,
                n_open: 1,
                n_close: 1,
                ramp_len: 3,
                ..Default::default()
            },
        );
        sq.process_raw_sample(1.0);
        for _ in 0..3 {
            sq.process_raw_sample(1.0);
        }
        assert_eq!(sq.state(), SquelchState::Open);

        sq.process_raw_sample(0.0);
        assert_eq!(sq.state(), SquelchState::Closing);

        for _ in 0..2 {
            let gain = sq.process_raw_sample(0.0);
            assert_eq!(gain, CLOSING_DECAY);
            assert_eq!(sq.state(), SquelchState::Closing);
        }
        sq.process_raw_sample(0.0);
        assert_eq!(sq.state(), SquelchState::Closed);
    }
}
