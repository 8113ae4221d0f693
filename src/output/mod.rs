//! Output fan-out: tagged descriptors, per-output lock-free block queues,
//! sink writers (spec §3, §4.11, §6).
//!
//! Grounded on the teacher's `stream/encoder_manager.rs` (tagged sink
//! config, per-sink background task, reconnect bookkeeping) and
//! `audio/engine.rs`'s use of `ringbuf::HeapRb` for the producer/consumer
//! split feeding a background task. Each sink here runs on an OS thread
//! rather than a tokio task — the teacher's async runtime has no other
//! consumer in this crate, so it is dropped in favor of `std::thread`.

pub mod file_iq;
pub mod file_mp3;
pub mod icecast;
pub mod misc;
pub mod pulse;
pub mod udp;

use std::time::Duration;

use num_complex::Complex32;
use ringbuf::{traits::Split, HeapProd, HeapRb};

use crate::dsp::afc::AfcIndication;
use crate::scan::ScanTagEvent;

/// One tick's worth of material for a single output, per §6's "Audio
/// output interface": a PCM block, an optional matching IQ block for IQ
/// sinks, the tick's signal indication (drives gated-vs-continuous
/// policy), and at most one scan tag event.
#[derive(Debug, Clone)]
pub struct OutputBlock {
    pub pcm: Vec<f32>,
    pub iq: Option<Vec<Complex32>>,
    pub axcindicate: AfcIndication,
    pub scan_tag: Option<ScanTagEvent>,
}

impl OutputBlock {
    pub fn is_silence(&self) -> bool {
        self.axcindicate == AfcIndication::NoSignal
    }
}

#[derive(Debug, Clone)]
pub enum OutputKind {
    FileMp3(file_mp3::FileMp3Config),
    FileRawIq(file_iq::FileIqConfig),
    Mixer { input_id: usize },
    UdpStream(udp::UdpConfig),
    Icecast(icecast::IcecastConfig),
    Pulse,
    ApiPost { url: String },
    KeyValueStore { key_prefix: String },
}

/// §6: "a sink may elect to suppress silence-only blocks ('gated') or
/// always write ('continuous')".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Gated,
    Continuous,
}

pub struct OutputDescriptor {
    pub label: String,
    pub kind: OutputKind,
    pub delivery: DeliveryMode,
    pub output_overrun_count: u64,
    producer: HeapProd<OutputBlock>,
}

/// The channelizer-facing half of an output: owns the write side of the
/// block queue. Push failures (queue full — consumer too slow) count as
/// overruns per §7, never block the channelizer.
impl OutputDescriptor {
    pub fn push(&mut self, block: OutputBlock) {
        if self.delivery == DeliveryMode::Gated && block.is_silence() {
            return;
        }
        use ringbuf::traits::Producer;
        if self.producer.try_push(block).is_err() {
            self.output_overrun_count += 1;
        }
    }
}

const OUTPUT_QUEUE_CAPACITY: usize = 64;

pub fn new_output_queue() -> (HeapProd<OutputBlock>, ringbuf::HeapCons<OutputBlock>) {
    HeapRb::<OutputBlock>::new(OUTPUT_QUEUE_CAPACITY).split()
}

pub fn build_descriptor(
    label: impl Into<String>,
    kind: OutputKind,
    delivery: DeliveryMode,
) -> (OutputDescriptor, ringbuf::HeapCons<OutputBlock>) {
    let (producer, consumer) = new_output_queue();
    (
        OutputDescriptor {
            label: label.into(),
            kind,
            delivery,
            output_overrun_count: 0,
            producer,
        },
        consumer,
    )
}

/// Exponential back-off policy shared by every reconnecting sink
/// (Icecast, UDP if connection-oriented, API POST): initial delay 1s,
/// doubling, capped at 30s, reset on a successful write (SPEC_FULL §3).
pub struct ReconnectBackoff {
    current: Duration,
    max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            current: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = Duration::from_secs(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = ReconnectBackoff::default();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut b = ReconnectBackoff::default();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn gated_descriptor_drops_silence_blocks() {
        let (mut desc, mut cons) = build_descriptor(
            "test",
            OutputKind::ApiPost { url: "http://x".into() },
            DeliveryMode::Gated,
        );
        desc.push(OutputBlock {
            pcm: vec![0.0; 4],
            iq: None,
            axcindicate: AfcIndication::NoSignal,
            scan_tag: None,
        });
        use ringbuf::traits::Consumer;
        assert!(cons.try_pop().is_none());

        desc.push(OutputBlock {
            pcm: vec![0.1; 4],
            iq: None,
            axcindicate: AfcIndication::Signal,
            scan_tag: None,
        });
        assert!(cons.try_pop().is_some());
    }
}
