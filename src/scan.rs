//! Scan controller: slow-tick frequency sweep for scanning receivers
//! (spec §4.9).
//!
//! Follows the same "enum state + counter + tick()" shape as the
//! teacher's per-deck crossfade trigger logic, adapted from a time-based
//! fade trigger to an idle-counter-based retune trigger.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::channel::Channel;
use crate::constants::{SCAN_BIN_OFFSET, SCAN_IDLE_THRESHOLD};
use crate::dsp::afc::AfcIndication;
use crate::receiver::Receiver;

#[derive(Debug, Clone, Copy)]
pub struct ScanTagEvent {
    pub frequency_index: usize,
    pub wall_clock_unix_ms: u64,
}

/// One scan controller per scanning receiver; advances the channel's
/// active scan index when idle, emits a tag event on first detection.
pub struct ScanController {
    receiver: Arc<Receiver>,
    fft_size: usize,
    last_emitted_index: Option<usize>,
}

impl ScanController {
    pub fn new(receiver: Arc<Receiver>, fft_size: usize) -> Self {
        Self {
            receiver,
            fft_size,
            last_emitted_index: None,
        }
    }

    /// Called every `SCAN_TICK_MS` (§4.9). Returns a tag event if this
    /// tick is the first detection at a new frequency index.
    pub fn tick(&mut self, channel: &mut Channel) -> Option<ScanTagEvent> {
        if channel.config.scan_list.len() <= 1 {
            return None;
        }

        if channel.axcindicate == AfcIndication::NoSignal {
            channel.scan_idle_ticks += 1;
            if channel.scan_idle_ticks >= SCAN_IDLE_THRESHOLD {
                self.advance(channel);
                channel.scan_idle_ticks = 0;
            }
            None
        } else {
            let mut event = None;
            if channel.scan_idle_ticks == SCAN_IDLE_THRESHOLD
                || self.last_emitted_index != Some(channel.scan_index)
            {
                event = Some(ScanTagEvent {
                    frequency_index: channel.scan_index,
                    wall_clock_unix_ms: now_unix_ms(),
                });
                self.last_emitted_index = Some(channel.scan_index);
            }
            channel.scan_idle_ticks = 0;
            event
        }
    }

    fn advance(&self, channel: &mut Channel) {
        let len = channel.config.scan_list.len();
        channel.scan_index = (channel.scan_index + 1) % len;
        let entry = &channel.config.scan_list[channel.scan_index];
        let fs = self.receiver.sample_rate as f64;
        let bin_width = fs / self.fft_size as f64;
        let pretune = entry.freq_hz + (SCAN_BIN_OFFSET as f64 * bin_width) as i64;
        self.receiver.set_center_freq(pretune);
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, Modulation, ScanEntry};
    use crate::dsp::demod::NfmDiscriminator;
    use crate::dsp::squelch::SquelchConfig;
    use crate::sample_format::SampleFormat;

    fn scanning_channel() -> Channel {
        let scan_list = vec![
            ScanEntry {
                label: "f0".into(),
                freq_hz: 100_000_000,
                modulation: Modulation::Am,
                ampfactor: 1.0,
                squelch: SquelchConfig::default(),
                notch_hz: 0.0,
            },
            ScanEntry {
                label: "f1".into(),
                freq_hz: 100_100_000,
                modulation: Modulation::Am,
                ampfactor: 1.0,
                squelch: SquelchConfig::default(),
                notch_hz: 0.0,
            },
            ScanEntry {
                label: "f2".into(),
                freq_hz: 100_200_000,
                modulation: Modulation::Am,
                ampfactor: 1.0,
                squelch: SquelchConfig::default(),
                notch_hz: 0.0,
            },
        ];
        let config = ChannelConfig {
            label: "scan".into(),
            freq_hz: 100_000_000,
            modulation: Modulation::Am,
            ampfactor: 1.0,
            squelch: SquelchConfig::default(),
            notch_hz: 0.0,
            notch_q: 10.0,
            bandwidth_hz: 0.0,
            afc: 0.0,
            needs_raw_iq: false,
            nfm_discriminator: NfmDiscriminator::Fast,
            nfm_tau_seconds: 200e-6,
            scan_list,
        };
        Channel::new(config, 8000.0, 10)
    }

    #[test]
    fn visits_each_frequency_once_per_pass_when_idle() {
        let receiver =
            Arc::new(Receiver::new("r", 2_000_000, 100_000_000, SampleFormat::S16, 4096).unwrap());
        let mut controller = ScanController::new(receiver, 1024);
        let mut channel = scanning_channel();

        let mut visited = vec![channel.scan_index];
        for _ in 0..(SCAN_IDLE_THRESHOLD * 3) {
            channel.axcindicate = AfcIndication::NoSignal;
            controller.tick(&mut channel);
            if visited.last() != Some(&channel.scan_index) {
                visited.push(channel.scan_index);
            }
        }
        assert_eq!(visited, vec![0, 1, 2, 0]);
    }

    #[test]
    fn emits_tag_on_first_detection_only() {
        let receiver =
            Arc::new(Receiver::new("r", 2_000_000, 100_000_000, SampleFormat::S16, 4096).unwrap());
        let mut controller = ScanController::new(receiver, 1024);
        let mut channel = scanning_channel();
        for _ in 0..SCAN_IDLE_THRESHOLD {
            channel.axcindicate = AfcIndication::NoSignal;
            controller.tick(&mut channel);
        }
        channel.axcindicate = AfcIndication::Signal;
        channel.scan_idle_ticks = SCAN_IDLE_THRESHOLD;
        let first = controller.tick(&mut channel);
        assert!(first.is_some());
        let second = controller.tick(&mut channel);
        assert!(second.is_none());
    }
}
