//! Windowed FFT channelizer worker (spec §4.2).

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::channel::Channel;
use crate::constants::{EPSILON, FFT_BATCH, SPECTRUM_REFRESH_ITERS};
use crate::dsp::window::BlackmanHarrisWindow;
use crate::error::{InitError, InitResult};
use crate::receiver::Receiver;
use crate::spectrum::SpectrumSnapshot;

/// Abstraction point for the "CPU SIMD vs fixed-function FFT unit"
/// backend choice (spec §9 redesign flag): the channelizer only depends
/// on this trait, never on a concrete transform implementation.
pub trait FftBackend: Send {
    fn size(&self) -> usize;
    fn process(&self, buffer: &mut [Complex32]);
}

pub struct RustFftBackend {
    fft: Arc<dyn Fft<f32>>,
    size: usize,
}

impl RustFftBackend {
    pub fn new(fft_size: usize) -> InitResult<Self> {
        if !fft_size.is_power_of_two() || !(256..=131_072).contains(&fft_size) {
            return Err(InitError::InvalidFftSize(fft_size));
        }
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Ok(Self { fft, size: fft_size })
    }
}

impl FftBackend for RustFftBackend {
    fn size(&self) -> usize {
        self.size
    }

    fn process(&self, buffer: &mut [Complex32]) {
        self.fft.process(buffer);
    }
}

/// FFT bin assignment for a channel at `freq_hz` given the receiver's
/// current center frequency and rate (§4.2 "FFT bin assignment").
pub fn bin_for_frequency(freq_hz: i64, receiver_center_hz: i64, fs_hz: f64, fft_size: usize) -> usize {
    let bin_width = fs_hz / fft_size as f64;
    let raw = ((freq_hz as f64 + fs_hz - receiver_center_hz as f64) / bin_width - 1.0).ceil();
    (raw.rem_euclid(fft_size as f64)) as usize
}

pub struct ChannelizerLane {
    pub receiver: Arc<Receiver>,
    pub channels: Vec<Channel>,
    pub spectrum: Arc<SpectrumSnapshot>,
    window: BlackmanHarrisWindow,
    backend: Box<dyn FftBackend>,
    fft_input: Vec<Complex32>,
    iterations: u64,
}

impl ChannelizerLane {
    pub fn new(
        receiver: Arc<Receiver>,
        channels: Vec<Channel>,
        backend: Box<dyn FftBackend>,
    ) -> Self {
        let fft_size = backend.size();
        Self {
            receiver,
            channels,
            spectrum: Arc::new(SpectrumSnapshot::new(fft_size)),
            window: BlackmanHarrisWindow::new(fft_size),
            backend,
            fft_input: vec![Complex32::new(0.0, 0.0); fft_size],
            iterations: 0,
        }
    }

    fn bps(&self) -> usize {
        self.receiver.bps(crate::constants::AUDIO_RATE)
    }

    /// One channelizer iteration (§4.2 steps 1-7). Returns true if a
    /// demod tick ran (i.e. the caller should signal the output stage).
    pub fn run_iteration(&mut self, now: u64) -> bool {
        let fft_size = self.backend.size();
        let bps = self.bps();
        let bytes_per_sample = self.receiver.bytes_per_sample();
        let guard = fft_size * bytes_per_sample;

        if self.receiver.ring_buffer.available() < FFT_BATCH * bps + guard {
            return false;
        }

        let mut any_demod_ran = false;

        for _ in 0..FFT_BATCH {
            self.fill_fft_input(bps, bytes_per_sample, fft_size);
            self.window.apply(&mut self.fft_input);
            self.backend.process(&mut self.fft_input);

            for channel in &mut self.channels {
                let bin = channel.bin;
                let value = self.fft_input[bin];
                let magnitude = (value.re * value.re + value.im * value.im).sqrt();
                let iq = channel.needs_raw_iq().then_some(value);
                channel.push_bin_sample(magnitude, iq);
            }

            self.receiver.ring_buffer.advance_head(bps);
        }

        self.iterations += 1;
        if self.iterations % SPECTRUM_REFRESH_ITERS == 0 {
            self.refresh_spectrum(now);
        }

        if self.channels.iter().any(|c| c.is_ready_for_demod()) {
            let magnitudes: Vec<f32> = self
                .fft_input
                .iter()
                .map(|c| c.re * c.re + c.im * c.im)
                .collect();
            for channel in &mut self.channels {
                if channel.is_ready_for_demod() {
                    channel.run_demod_tick();
                    channel.run_afc(&magnitudes);
                    any_demod_ran = true;
                }
            }
        }

        any_demod_ran
    }

    fn fill_fft_input(&mut self, bps: usize, bytes_per_sample: usize, fft_size: usize) {
        let mut scratch = vec![0u8; fft_size * bytes_per_sample];
        if !self.receiver.ring_buffer.peek(scratch.len(), &mut scratch) {
            self.fft_input.fill(Complex32::new(0.0, 0.0));
            return;
        }
        let _ = bps;
        for (i, chunk) in scratch.chunks_exact(bytes_per_sample).enumerate() {
            self.fft_input[i] = self.receiver.sample_format.dequantize(chunk);
        }
    }

    fn refresh_spectrum(&self, now: u64) {
        let fft_size = self.backend.size();
        let mut bins_db = vec![0.0f32; fft_size];
        for (i, slot) in bins_db.iter_mut().enumerate() {
            let src = (i + fft_size / 2) % fft_size;
            let mag = (self.fft_input[src].re * self.fft_input[src].re
                + self.fft_input[src].im * self.fft_input[src].im)
                .sqrt();
            *slot = 20.0 * (mag + EPSILON).log10();
        }
        self.spectrum.publish(&bins_db, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Modulation};
    use crate::constants::{AGC_EXTRA, AUDIO_RATE, WAVE_BATCH};
    use crate::dsp::afc::AfcIndication;
    use crate::dsp::demod::NfmDiscriminator;
    use crate::dsp::squelch::SquelchConfig;
    use crate::sample_format::SampleFormat;

    #[test]
    fn bin_assignment_wraps_into_fft_size() {
        let bin = bin_for_frequency(100_250_000, 100_000_000, 2_560_000.0, 2048);
        assert!(bin < 2048);
    }

    #[test]
    fn zero_offset_channel_lands_near_bin_zero_region() {
        let bin = bin_for_frequency(100_000_000, 100_000_000, 2_560_000.0, 2048);
        assert!(bin < 2048);
    }

    const TEST_FFT_SIZE: usize = 1024;
    const TEST_SAMPLE_RATE: u32 = AUDIO_RATE * 2;

    fn build_lane(base_bin: usize, squelch: SquelchConfig) -> (ChannelizerLane, usize) {
        let receiver = Receiver::new(
            "test-rx",
            TEST_SAMPLE_RATE,
            100_000_000,
            SampleFormat::F32,
            1 << 20,
        )
        .expect("receiver");
        let receiver = Arc::new(receiver);

        let config = ChannelConfig {
            label: "am0".into(),
            freq_hz: receiver.center_freq(),
            modulation: Modulation::Am,
            ampfactor: 1.0,
            squelch,
            notch_hz: 0.0,
            notch_q: 10.0,
            bandwidth_hz: 0.0,
            afc: 0.0,
            needs_raw_iq: false,
            nfm_discriminator: NfmDiscriminator::Fast,
            nfm_tau_seconds: 200e-6,
            scan_list: Vec::new(),
        };
        let channel = Channel::new(config, TEST_SAMPLE_RATE as f32, base_bin);

        let backend = RustFftBackend::new(TEST_FFT_SIZE).expect("fft backend");
        let lane = ChannelizerLane::new(receiver.clone(), vec![channel], Box::new(backend));
        let bps = receiver.bps(AUDIO_RATE);
        (lane, bps)
    }

    fn feed_constant_tone(lane: &ChannelizerLane, amplitude: f32, bytes: usize) {
        let mut buf = Vec::with_capacity(bytes);
        while buf.len() < bytes {
            buf.extend_from_slice(&amplitude.to_le_bytes());
            buf.extend_from_slice(&0.0f32.to_le_bytes());
        }
        lane.receiver.ring_buffer.produce(&buf);
    }

    fn run_until_demod(lane: &mut ChannelizerLane, max_iterations: usize) -> bool {
        for i in 0..max_iterations {
            if lane.run_iteration(i as u64) {
                return true;
            }
        }
        false
    }

    #[test]
    fn strong_carrier_opens_squelch_and_bounds_output() {
        let base_bin = bin_for_frequency(
            100_000_000,
            100_000_000,
            TEST_SAMPLE_RATE as f64,
            TEST_FFT_SIZE,
        );
        let squelch = SquelchConfig {
            threshold_abs: 0.001,
            n_open: 1,
            n_close: 2,
            ramp_len: 1,
            ..Default::default()
        };
        let (mut lane, bps) = build_lane(base_bin, squelch);
        feed_constant_tone(
            &lane,
            0.9,
            (WAVE_BATCH + AGC_EXTRA + TEST_FFT_SIZE) * bps * 4,
        );

        let did_demod = run_until_demod(&mut lane, 64);
        assert!(did_demod, "expected a demod tick to have run");

        let channel = &lane.channels[0];
        assert_eq!(channel.axcindicate, AfcIndication::Signal);
        assert!(channel.waveout.iter().any(|&s| s != 0.0));
        assert!(channel.waveout.iter().all(|&s| s.abs() <= 1.0));
    }

    #[test]
    fn silence_never_opens_squelch() {
        let base_bin = bin_for_frequency(
            100_000_000,
            100_000_000,
            TEST_SAMPLE_RATE as f64,
            TEST_FFT_SIZE,
        );
        let squelch = SquelchConfig {
            threshold_abs: 0.1,
            n_open: 1,
            n_close: 2,
            ramp_len: 1,
            ..Default::default()
        };
        let (mut lane, bps) = build_lane(base_bin, squelch);
        feed_constant_tone(
            &lane,
            0.0,
            (WAVE_BATCH + AGC_EXTRA + TEST_FFT_SIZE) * bps * 4,
        );

        let did_demod = run_until_demod(&mut lane, 64);
        assert!(did_demod, "expected a demod tick to have run");

        let channel = &lane.channels[0];
        assert_eq!(channel.axcindicate, AfcIndication::NoSignal);
        assert!(channel.waveout.iter().all(|&s| s == 0.0));
    }
}
