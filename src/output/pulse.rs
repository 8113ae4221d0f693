//! Live audio monitor sink via the default system output device (spec §6,
//! SPEC_FULL Open-Question resolution: PulseAudio/ALSA/CoreAudio access goes
//! through `cpal` rather than a PulseAudio-specific client crate).
//!
//! Grounded on the teacher's `audio/engine.rs` CPAL setup: default host,
//! default output device/config, a lock-free ring buffer feeding the
//! real-time callback which fills silence rather than blocking when the
//! feeder has nothing ready.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{OutputError, OutputResult};

const FEED_RING_SECONDS: usize = 2;

/// Owns the live `cpal::Stream`; dropping it stops playback.
pub struct PulseSink {
    _stream: Stream,
    feed: HeapProd<f32>,
    channels: usize,
}

impl PulseSink {
    pub fn new() -> OutputResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| OutputError::Connection("no default audio output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| OutputError::Connection(format!("default output config: {e}")))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        log::info!(
            "pulse sink opened on '{}' at {} Hz, {} channel(s)",
            device.name().unwrap_or_default(),
            sample_rate,
            channels
        );

        let ring = HeapRb::<f32>::new(sample_rate as usize * channels * FEED_RING_SECONDS);
        let (feed, mut drain) = ring.split();

        let err_fn = |e| log::error!("pulse sink stream error: {e}");
        let stream = device
            .build_output_stream(
                &config.into(),
                move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    fill_from_ring(output, &mut drain);
                },
                err_fn,
                None,
            )
            .map_err(|e| OutputError::Connection(format!("build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| OutputError::Connection(format!("start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            feed,
            channels,
        })
    }

    /// Push one tick's mono PCM block, duplicated across output channels.
    /// Drops samples the ring has no room for rather than blocking — the
    /// monitor is best-effort per §7.
    pub fn write_block(&mut self, pcm: &[f32]) {
        for &sample in pcm {
            for _ in 0..self.channels {
                let _ = self.feed.try_push(sample);
            }
        }
    }
}

fn fill_from_ring(output: &mut [f32], drain: &mut HeapCons<f32>) {
    for slot in output.iter_mut() {
        *slot = drain.try_pop().unwrap_or(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_from_ring_emits_silence_when_empty() {
        let ring = HeapRb::<f32>::new(4);
        let (_prod, mut drain) = ring.split();
        let mut output = vec![1.0f32; 4];
        fill_from_ring(&mut output, &mut drain);
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fill_from_ring_drains_queued_samples_first() {
        let ring = HeapRb::<f32>::new(4);
        let (mut prod, mut drain) = ring.split();
        prod.try_push(0.5).unwrap();
        prod.try_push(0.25).unwrap();
        let mut output = vec![0.0f32; 4];
        fill_from_ring(&mut output, &mut drain);
        assert_eq!(output[0], 0.5);
        assert_eq!(output[1], 0.25);
        assert_eq!(output[2], 0.0);
    }
}
