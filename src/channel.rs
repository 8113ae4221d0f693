//! Per-channel narrowband extraction and demod state machine (spec §3, §4.3).

use num_complex::Complex32;

use crate::constants::{AGC_EXTRA, WAVE_BATCH};
use crate::dsp::afc::{afc_walk, AfcIndication};
use crate::dsp::biquad::{LowPassFilter, NotchFilter};
use crate::dsp::demod::{AmDemod, NfmDemod, NfmDiscriminator};
use crate::dsp::phase::PhaseAccumulator;
use crate::dsp::squelch::{Squelch, SquelchConfig, SquelchState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modulation {
    Am,
    Nfm,
}

#[derive(Debug, Clone)]
pub struct ScanEntry {
    pub label: String,
    pub freq_hz: i64,
    pub modulation: Modulation,
    pub ampfactor: f32,
    pub squelch: SquelchConfig,
    pub notch_hz: f32,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub label: String,
    pub freq_hz: i64,
    pub modulation: Modulation,
    pub ampfactor: f32,
    pub squelch: SquelchConfig,
    pub notch_hz: f32,
    pub notch_q: f32,
    pub bandwidth_hz: f32,
    pub afc: f32,
    pub needs_raw_iq: bool,
    pub nfm_discriminator: NfmDiscriminator,
    pub nfm_tau_seconds: f32,
    pub scan_list: Vec<ScanEntry>,
}

/// One channel's full per-tick DSP state, per §3.
pub struct Channel {
    pub config: ChannelConfig,

    wavein: Vec<f32>,
    iq_in: Option<Vec<Complex32>>,
    waveend: usize,

    pub waveout: Vec<f32>,
    iq_out: Option<Vec<Complex32>>,

    squelch: Squelch,
    phase: PhaseAccumulator,
    notch: NotchFilter,
    lowpass: LowPassFilter,
    am: Option<AmDemod>,
    nfm: Option<NfmDemod>,

    pub bin: usize,
    pub base_bin: usize,

    pub axcindicate: AfcIndication,
    prev_axcindicate: AfcIndication,

    pub output_overrun_count: u64,
    waveavail: bool,
    prev_sample: f32,

    /// Scan mode: index into `config.scan_list`, and samples since last retune.
    pub scan_index: usize,
    pub scan_idle_ticks: u32,
}

impl Channel {
    pub fn new(config: ChannelConfig, sample_rate: f32, base_bin: usize) -> Self {
        let squelch_level = if config.squelch.threshold_abs > 0.0 {
            config.squelch.threshold_abs
        } else {
            0.0
        };
        let am = match config.modulation {
            Modulation::Am => Some(AmDemod::new(squelch_level)),
            Modulation::Nfm => None,
        };
        let nfm = match config.modulation {
            Modulation::Nfm => Some(NfmDemod::new(
                crate::constants::AUDIO_RATE as f32,
                config.nfm_discriminator,
                config.nfm_tau_seconds,
            )),
            Modulation::Am => None,
        };
        let needs_raw_iq = config.needs_raw_iq || config.modulation == Modulation::Nfm;

        Self {
            squelch: Squelch::new(sample_rate, config.squelch.clone()),
            notch: NotchFilter::new(sample_rate, config.notch_hz, config.notch_q),
            lowpass: LowPassFilter::new(sample_rate, config.bandwidth_hz),
            phase: PhaseAccumulator::new(0),
            wavein: vec![0.0; WAVE_BATCH + 2 * AGC_EXTRA],
            iq_in: needs_raw_iq.then(|| vec![Complex32::new(0.0, 0.0); WAVE_BATCH + 2 * AGC_EXTRA]),
            waveend: AGC_EXTRA,
            waveout: vec![0.0; WAVE_BATCH],
            iq_out: needs_raw_iq.then(|| vec![Complex32::new(0.0, 0.0); WAVE_BATCH]),
            am,
            nfm,
            bin: base_bin,
            base_bin,
            axcindicate: AfcIndication::NoSignal,
            prev_axcindicate: AfcIndication::NoSignal,
            output_overrun_count: 0,
            waveavail: false,
            prev_sample: 0.0,
            scan_index: 0,
            scan_idle_ticks: 0,
            config,
        }
    }

    pub fn needs_raw_iq(&self) -> bool {
        self.iq_in.is_some()
    }

    pub fn set_downmix_increment(&mut self, increment: u32) {
        self.phase.set_increment(increment);
    }

    pub fn is_ready_for_demod(&self) -> bool {
        self.waveend >= WAVE_BATCH + AGC_EXTRA
    }

    /// Append one bin-extracted sample to the sliding window (§4.2 step 4).
    pub fn push_bin_sample(&mut self, magnitude: f32, iq: Option<Complex32>) {
        if self.waveend < self.wavein.len() {
            self.wavein[self.waveend] = magnitude;
            if let (Some(store), Some(v)) = (self.iq_in.as_mut(), iq) {
                if self.waveend < store.len() {
                    store[self.waveend] = v;
                }
            }
            self.waveend += 1;
        }
    }

    /// Run the per-channel demod loop (§4.3), once `waveend` reaches
    /// `WAVE_BATCH + AGC_EXTRA`. Returns true if this tick overran the
    /// previous un-consumed output block.
    pub fn run_demod_tick(&mut self) -> bool {
        self.prev_axcindicate = self.axcindicate;
        self.axcindicate = AfcIndication::NoSignal;

        for j in AGC_EXTRA..(WAVE_BATCH + AGC_EXTRA) {
            let was_open = self.squelch.is_open();
            let raw_level = self.wavein[j];
            let ramp_gain = self.squelch.process_raw_sample(raw_level);

            // (b) IQ cleanup: downmix + optional low-pass, refine squelch input.
            if self.squelch.should_filter_sample() {
                if let Some(iq_in) = self.iq_in.as_mut() {
                    let sample = iq_in[j - AGC_EXTRA];
                    let mut rotated = self.phase.downmix(sample);
                    if self.lowpass.is_active() {
                        rotated = Complex32::new(
                            self.lowpass.process(rotated.re),
                            self.lowpass.process(rotated.im),
                        );
                    }
                    let mag = (rotated.re * rotated.re + rotated.im * rotated.im).sqrt();
                    self.wavein[j] = mag;
                    iq_in[j - AGC_EXTRA] = rotated;
                    if self.lowpass.is_active() {
                        self.squelch.process_filtered_sample(mag);
                    }
                }
            }

            // (c) AGC bootstrap at the Closed->Opening transition.
            if !was_open && self.squelch.is_open() {
                self.first_open_sample(j);
            }

            let out_idx = j - AGC_EXTRA;

            // (d) demodulation. Closing is an exponential fade-out applied
            // directly to the previous output sample (§4.3c, §4.5), not a
            // continuation of demodulation scaled by a linear ramp.
            if self.squelch.should_process_audio() {
                if self.squelch.state() == SquelchState::Closing {
                    let prev = if out_idx == 0 {
                        self.prev_sample
                    } else {
                        self.waveout[out_idx - 1]
                    };
                    self.waveout[out_idx] = crate::dsp::squelch::CLOSING_DECAY * prev;
                } else {
                    if let Some(am) = self.am.as_mut() {
                        am.set_squelch_level(self.squelch.effective_threshold());
                    }
                    let demod_out = match (&mut self.am, &mut self.nfm) {
                        (Some(am), _) => {
                            let lookback = self.wavein[j - AGC_EXTRA];
                            am.process(self.wavein[j], lookback)
                        }
                        (_, Some(nfm)) => {
                            let sample = self
                                .iq_in
                                .as_ref()
                                .map(|buf| buf[j - AGC_EXTRA])
                                .unwrap_or(Complex32::new(0.0, 0.0));
                            nfm.process(sample)
                        }
                        _ => 0.0,
                    };
                    self.waveout[out_idx] = demod_out * ramp_gain;
                }
                self.squelch.process_audio_sample(self.waveout[out_idx]);
            }

            // (e) post and clamp
            if self.squelch.is_open() {
                let mut sample = self.waveout[out_idx];
                sample = self.notch.process(sample);
                sample *= self.config.ampfactor;
                if sample.is_nan() {
                    sample = 0.0;
                }
                sample = sample.clamp(-1.0, 1.0);
                self.waveout[out_idx] = sample;
                self.axcindicate = AfcIndication::Signal;
                if let (Some(iq_out), Some(iq_in)) = (self.iq_out.as_mut(), self.iq_in.as_ref()) {
                    iq_out[out_idx] = iq_in[j - AGC_EXTRA];
                }
            } else {
                self.waveout[out_idx] = 0.0;
                if let Some(iq_out) = self.iq_out.as_mut() {
                    iq_out[out_idx] = Complex32::new(0.0, 0.0);
                }
            }

            self.prev_sample = self.waveout[out_idx];
        }

        // memmove the trailing AGC_EXTRA samples to the front.
        let tail_start = self.wavein.len() - AGC_EXTRA;
        self.wavein.copy_within(tail_start.., 0);
        if let Some(iq_in) = self.iq_in.as_mut() {
            let len = iq_in.len();
            iq_in.copy_within(len - AGC_EXTRA.., 0);
        }
        self.waveend = AGC_EXTRA;

        let overran = self.waveavail;
        self.waveavail = true;
        if overran {
            self.output_overrun_count += 1;
        }
        overran
    }

    pub fn take_output(&mut self) -> bool {
        std::mem::replace(&mut self.waveavail, false)
    }

    pub fn iq_output(&self) -> Option<&[Complex32]> {
        self.iq_out.as_deref()
    }

    fn first_open_sample(&mut self, j: usize) {
        let squelch_level = self.squelch.effective_threshold();
        if let Some(am) = self.am.as_mut() {
            let start = j.saturating_sub(AGC_EXTRA);
            for k in start..j {
                if self.wavein[k] >= squelch_level {
                    am.tracker.agcavgfast = 0.9 * am.tracker.agcavgfast + 0.1 * self.wavein[k];
                }
            }
        }
    }

    /// Run AFC at the end of the demod tick iff `afc != 0` and the
    /// channel transitioned NoSignal -> Signal this tick (§4.8).
    pub fn run_afc(&mut self, magnitudes: &[f32]) {
        if self.config.afc == 0.0 {
            return;
        }
        let transitioned_up =
            self.prev_axcindicate == AfcIndication::NoSignal && self.axcindicate == AfcIndication::Signal;
        let transitioned_down =
            self.prev_axcindicate != AfcIndication::NoSignal && self.axcindicate == AfcIndication::NoSignal;

        if transitioned_down {
            self.bin = self.base_bin;
            return;
        }
        if !transitioned_up {
            return;
        }
        let (landed, indication) = afc_walk(magnitudes, self.base_bin, self.bin, self.config.afc);
        let clamped = clamp_bin_distance(landed, self.base_bin, self.config.afc as i64, magnitudes.len());
        if clamped != self.bin {
            self.bin = clamped;
            self.axcindicate = indication;
        }
    }
}

fn clamp_bin_distance(bin: usize, base: usize, max_dist: i64, fft_size: usize) -> usize {
    let fft_size = fft_size as i64;
    let raw_delta = bin as i64 - base as i64;
    let delta = if raw_delta > fft_size / 2 {
        raw_delta - fft_size
    } else if raw_delta < -fft_size / 2 {
        raw_delta + fft_size
    } else {
        raw_delta
    };
    let clamped_delta = delta.clamp(-max_dist, max_dist);
    ((base as i64 + clamped_delta).rem_euclid(fft_size)) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(modulation: Modulation) -> ChannelConfig {
        ChannelConfig {
            label: "test".into(),
            freq_hz: 100_000_000,
            modulation,
            ampfactor: 1.0,
            squelch: SquelchConfig {
                threshold_abs: 0.1,
                n_open: 2,
                n_close: 5,
                ramp_len: 8,
                ..Default::default()
            },
            notch_hz: 0.0,
            notch_q: 10.0,
            bandwidth_hz: 0.0,
            afc: 0.0,
            needs_raw_iq: false,
            nfm_discriminator: NfmDiscriminator::Fast,
            nfm_tau_seconds: 200e-6,
            scan_list: Vec::new(),
        }
    }

    #[test]
    fn silent_input_produces_zero_output() {
        let mut ch = Channel::new(test_config(Modulation::Am), 8000.0, 10);
        for _ in 0..(WAVE_BATCH + AGC_EXTRA) {
            ch.push_bin_sample(0.0, None);
        }
        assert!(ch.is_ready_for_demod());
        ch.run_demod_tick();
        assert!(ch.waveout.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn strong_carrier_opens_squelch_and_sets_signal() {
        let mut ch = Channel::new(test_config(Modulation::Am), 8000.0, 10);
        for _ in 0..(WAVE_BATCH + AGC_EXTRA) {
            ch.push_bin_sample(0.5, None);
        }
        ch.run_demod_tick();
        assert_eq!(ch.axcindicate, AfcIndication::Signal);
        assert!(ch.waveout.iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn clamp_bin_distance_respects_afc_bound() {
        assert_eq!(clamp_bin_distance(20, 10, 4, 1024), 14);
        assert_eq!(clamp_bin_distance(5, 10, 4, 1024), 6);
    }
}
