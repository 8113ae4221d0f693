//! Receiver: one wideband IQ source feeding one channelizer lane
//! (spec §3, §6).

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{InitError, InitResult};
use crate::ring_buffer::IqRingBuffer;
use crate::sample_format::SampleFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Initialized,
    Running,
    Failed,
    Stopped,
    Disabled,
}

impl ReceiverState {
    pub fn is_live(self) -> bool {
        matches!(self, ReceiverState::Initialized | ReceiverState::Running)
    }
}

pub struct Receiver {
    pub label: String,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    center_freq: AtomicI64,
    state: AtomicU32,
    pub ring_buffer: Arc<IqRingBuffer>,
}

fn state_to_u32(s: ReceiverState) -> u32 {
    match s {
        ReceiverState::Initialized => 0,
        ReceiverState::Running => 1,
        ReceiverState::Failed => 2,
        ReceiverState::Stopped => 3,
        ReceiverState::Disabled => 4,
    }
}

fn u32_to_state(v: u32) -> ReceiverState {
    match v {
        0 => ReceiverState::Initialized,
        1 => ReceiverState::Running,
        2 => ReceiverState::Failed,
        3 => ReceiverState::Stopped,
        _ => ReceiverState::Disabled,
    }
}

impl Receiver {
    pub fn new(
        label: impl Into<String>,
        sample_rate: u32,
        center_freq: i64,
        sample_format: SampleFormat,
        ring_capacity: usize,
    ) -> InitResult<Self> {
        if sample_rate <= crate::constants::AUDIO_RATE {
            return Err(InitError::InvalidSampleRate {
                rate: sample_rate,
                audio_rate: crate::constants::AUDIO_RATE,
            });
        }
        Ok(Self {
            label: label.into(),
            sample_rate,
            sample_format,
            center_freq: AtomicI64::new(center_freq),
            state: AtomicU32::new(state_to_u32(ReceiverState::Initialized)),
            ring_buffer: Arc::new(IqRingBuffer::new(ring_capacity)),
        })
    }

    pub fn center_freq(&self) -> i64 {
        self.center_freq.load(Ordering::Acquire)
    }

    /// Retune; serialized with the channelizer by virtue of both sides
    /// only observing this value at the head of their own tick (§5).
    pub fn set_center_freq(&self, new_hz: i64) {
        self.center_freq.store(new_hz, Ordering::Release);
    }

    pub fn state(&self) -> ReceiverState {
        u32_to_state(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ReceiverState) {
        self.state.store(state_to_u32(state), Ordering::Release);
        log::info!("receiver '{}' state -> {:?}", self.label, state);
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// Byte stride per channelizer input batch at this receiver's
    /// decimation ratio, per §4.1 (`bps`).
    pub fn bps(&self, audio_rate: u32) -> usize {
        let decimation = (self.sample_rate as f64 / audio_rate as f64).round().max(1.0);
        self.bytes_per_sample() * decimation as usize
    }
}
