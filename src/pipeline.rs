//! Wires receivers, channelizer lanes, the mixer, scan controllers, and
//! output sinks into worker threads; owns the single shutdown flag and
//! the join order (spec §5).
//!
//! Grounded on the teacher's `AudioEngine`/`RtState` split: one real-time
//! producer side (here, per-receiver channelizer threads) feeding ring
//! buffers that background consumer threads (here, output sinks) drain
//! without ever blocking the producer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ringbuf::traits::Consumer;

use crate::audio::mixer::Mixer;
use crate::channel::{Channel, ChannelConfig};
use crate::channelizer::{bin_for_frequency, ChannelizerLane, FftBackend, RustFftBackend};
use crate::config::{ChannelConfigToml, OutputConfig, PipelineConfig};
use crate::constants::{AUDIO_RATE, SCAN_TICK_MS};
use crate::error::{PipelineError, PipelineResult};
use crate::output::{
    build_descriptor, misc::KeyValueStore, OutputBlock, OutputDescriptor, OutputKind,
};
use crate::receiver::{Receiver, ReceiverState};

/// Handle returned by `PipelineContext::start`; `stop` flips the single
/// shutdown flag every worker checks at the head of its loop, `join`
/// waits for channelizer -> mixer -> output -> nothing-else-left in that
/// order (receivers have no owned thread of their own in this crate;
/// they are fed externally and read from by the channelizer threads).
pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    channelizer_workers: Vec<JoinHandle<()>>,
    mixer_worker: Option<JoinHandle<()>>,
    output_workers: Vec<JoinHandle<()>>,
    pub receivers: Vec<Arc<Receiver>>,
    pub key_value_store: KeyValueStore,
}

impl PipelineHandle {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Count of receivers not in a terminal state; the orchestrator
    /// escalates to a full shutdown when this reaches zero (SPEC_FULL §3
    /// "Graceful receiver failure escalation").
    pub fn running_receivers(&self) -> usize {
        self.receivers.iter().filter(|r| r.state().is_live()).count()
    }

    pub fn join(self) {
        for worker in self.channelizer_workers {
            let _ = worker.join();
        }
        if let Some(worker) = self.mixer_worker {
            let _ = worker.join();
        }
        for worker in self.output_workers {
            let _ = worker.join();
        }
    }
}

struct BuiltOutput {
    channel_label: String,
    descriptor: OutputDescriptor,
}

pub struct PipelineContext;

impl PipelineContext {
    pub fn start(config: PipelineConfig) -> PipelineResult<PipelineHandle> {
        if config.receivers.is_empty() {
            return Err(PipelineError::NoReceivers);
        }

        let shutdown = Arc::new(AtomicBool::new(false));

        let mut receivers: HashMap<String, Arc<Receiver>> = HashMap::new();
        let mut receiver_order = Vec::new();
        for rc in &config.receivers {
            let receiver = Receiver::new(
                rc.label.clone(),
                rc.sample_rate,
                rc.center_freq_hz,
                rc.sample_format,
                rc.ring_capacity_bytes(),
            )?;
            receiver.set_state(ReceiverState::Running);
            let receiver = Arc::new(receiver);
            receiver_order.push(receiver.clone());
            receivers.insert(rc.label.clone(), receiver);
        }

        let mut mixer = Mixer::new(crate::constants::WAVE_BATCH);
        let mut mixer_input_ids: HashMap<String, usize> = HashMap::new();
        for input in &config.mixer.inputs {
            let id = mixer.connect_input(crate::dsp::squelch::db_to_linear(input.ampfactor_db), input.balance);
            mixer_input_ids.insert(input.channel_label.clone(), id);
        }
        let mixer = Arc::new(Mutex::new(mixer));

        let mut channels_by_receiver: HashMap<String, Vec<ChannelConfigToml>> = HashMap::new();
        for ch in &config.channels {
            channels_by_receiver
                .entry(ch.receiver_label.clone())
                .or_default()
                .push(ch.clone());
        }

        let mut outputs_by_label: HashMap<String, Vec<&OutputConfig>> = HashMap::new();
        for out in &config.outputs {
            outputs_by_label
                .entry(out.channel_label().to_string())
                .or_default()
                .push(out);
        }

        let key_value_store: KeyValueStore = Arc::new(Mutex::new(HashMap::new()));

        let mut channelizer_workers = Vec::new();
        let mut output_workers = Vec::new();
        let mut built_outputs: Vec<BuiltOutput> = Vec::new();

        let mut mixer_outputs = Vec::new();
        for out_cfg in &config.mixer.outputs {
            match out_cfg {
                OutputConfig::MixerInput { .. } => {
                    return Err(PipelineError::Config(
                        "mixer output cannot feed another mixer".into(),
                    ));
                }
                OutputConfig::FileRawIq { .. } => {
                    return Err(PipelineError::Config(
                        "mixer output has no IQ to offer a FileRawIq sink".into(),
                    ));
                }
                _ => {}
            }
            let kind = out_cfg.build(0, "mixer", None)?;
            let (descriptor, consumer) = build_descriptor("mixer", kind.clone(), out_cfg.delivery());
            output_workers.push(spawn_output_worker(
                descriptor.label.clone(),
                0,
                kind,
                consumer,
                shutdown.clone(),
                mixer.clone(),
                key_value_store.clone(),
            ));
            mixer_outputs.push(descriptor);
        }

        for rc in &config.receivers {
            let receiver = receivers.get(&rc.label).expect("just inserted").clone();
            let backend = RustFftBackend::new(rc.fft_size)?;
            let fft_size = backend.size();

            let mut channels = Vec::new();
            for toml_ch in channels_by_receiver.remove(&rc.label).unwrap_or_default() {
                let runtime_config: ChannelConfig = config.build_channel(&toml_ch);
                let base_bin = bin_for_frequency(
                    runtime_config.freq_hz,
                    receiver.center_freq(),
                    receiver.sample_rate as f64,
                    fft_size,
                );
                let mut channel = Channel::new(runtime_config, receiver.sample_rate as f32, base_bin);
                let increment = crate::dsp::phase::PhaseAccumulator::increment_from_offset(
                    channel.config.freq_hz as f64,
                    receiver.center_freq() as f64,
                    receiver.sample_rate as f64,
                    AUDIO_RATE as f64,
                );
                channel.set_downmix_increment(increment);

                for out_cfg in outputs_by_label.get(&toml_ch.label).into_iter().flatten() {
                    let mixer_input_id = mixer_input_ids.get(&toml_ch.label).copied();
                    let kind = out_cfg.build(channel.config.freq_hz, &toml_ch.label, mixer_input_id)?;
                    let (descriptor, consumer) = build_descriptor(toml_ch.label.clone(), kind.clone(), out_cfg.delivery());
                    output_workers.push(spawn_output_worker(
                        descriptor.label.clone(),
                        channel.config.freq_hz,
                        kind,
                        consumer,
                        shutdown.clone(),
                        mixer.clone(),
                        key_value_store.clone(),
                    ));
                    built_outputs.push(BuiltOutput {
                        channel_label: toml_ch.label.clone(),
                        descriptor,
                    });
                }

                channels.push(channel);
            }

            let lane = ChannelizerLane::new(receiver.clone(), channels, Box::new(backend));
            channelizer_workers.push(spawn_channelizer_worker(lane, shutdown.clone(), &mut built_outputs));
        }

        let mixer_worker = Some(spawn_mixer_worker(mixer.clone(), mixer_outputs, shutdown.clone()));

        Ok(PipelineHandle {
            shutdown,
            channelizer_workers,
            mixer_worker,
            output_workers,
            receivers: receiver_order,
            key_value_store,
        })
    }
}

fn spawn_channelizer_worker(
    mut lane: ChannelizerLane,
    shutdown: Arc<AtomicBool>,
    built_outputs: &mut Vec<BuiltOutput>,
) -> JoinHandle<()> {
    // Each lane drains the descriptors for its own channels; other lanes'
    // descriptors are left in `built_outputs` for their own worker to claim.
    let mut my_outputs: Vec<BuiltOutput> = Vec::new();
    let mut remaining = Vec::new();
    let lane_labels: std::collections::HashSet<String> =
        lane.channels.iter().map(|c| c.config.label.clone()).collect();
    for out in built_outputs.drain(..) {
        if lane_labels.contains(&out.channel_label) {
            my_outputs.push(out);
        } else {
            remaining.push(out);
        }
    }
    *built_outputs = remaining;

    let label = lane.receiver.label.clone();
    std::thread::Builder::new()
        .name(format!("channelizer-{label}"))
        .spawn(move || {
            let mut descriptors = my_outputs;
            while !shutdown.load(Ordering::Acquire) {
                if lane.receiver.state() != ReceiverState::Running {
                    std::thread::sleep(Duration::from_millis(20));
                    continue;
                }
                let now = now_unix_ms();
                let did_demod = lane.run_iteration(now);
                if did_demod {
                    dispatch_channel_outputs(&mut lane, &mut descriptors);
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            log::info!("channelizer worker for '{label}' exiting");
        })
        .expect("failed to spawn channelizer worker")
}

fn dispatch_channel_outputs(lane: &mut ChannelizerLane, descriptors: &mut [BuiltOutput]) {
    for channel in &mut lane.channels {
        if !channel.take_output() {
            continue;
        }
        for built in descriptors.iter_mut().filter(|b| b.channel_label == channel.config.label) {
            let block = OutputBlock {
                pcm: channel.waveout.clone(),
                iq: channel.iq_output().map(|iq| iq.to_vec()),
                axcindicate: channel.axcindicate,
                scan_tag: None,
            };
            built.descriptor.push(block);
        }
    }
}

/// Concrete sink handle lazily built on the first block a worker sees
/// (file/UDP/Icecast/pulse sinks all need the first block's channel
/// metadata already captured in `kind`, so construction can happen
/// eagerly here instead).
enum Sink {
    FileMp3(crate::output::file_mp3::FileMp3Sink),
    FileRawIq(crate::output::file_iq::FileIqSink),
    Mixer { input_id: usize },
    Udp(crate::output::udp::UdpSink, i64),
    Icecast(crate::output::icecast::IcecastSink),
    Pulse(crate::output::pulse::PulseSink),
    ApiPost(crate::output::misc::ApiPostSink, String, i64),
    KeyValueStore(crate::output::misc::KeyValueStoreSink, String),
}

fn build_sink(kind: &OutputKind, label: &str, freq_hz: i64, key_value_store: &KeyValueStore) -> OutputResultSink {
    match kind {
        OutputKind::FileMp3(cfg) => crate::output::file_mp3::FileMp3Sink::new(cfg.clone()).map(Sink::FileMp3),
        OutputKind::FileRawIq(cfg) => Ok(Sink::FileRawIq(crate::output::file_iq::FileIqSink::new(cfg.clone()))),
        OutputKind::Mixer { input_id } => Ok(Sink::Mixer { input_id: *input_id }),
        OutputKind::UdpStream(cfg) => crate::output::udp::UdpSink::new(cfg.clone()).map(|s| Sink::Udp(s, freq_hz)),
        OutputKind::Icecast(cfg) => crate::output::icecast::IcecastSink::new(cfg.clone()).map(Sink::Icecast),
        OutputKind::Pulse => crate::output::pulse::PulseSink::new().map(Sink::Pulse),
        OutputKind::ApiPost { url } => Ok(Sink::ApiPost(
            crate::output::misc::ApiPostSink::new(url.clone()),
            label.to_string(),
            freq_hz,
        )),
        OutputKind::KeyValueStore { key_prefix } => Ok(Sink::KeyValueStore(
            crate::output::misc::KeyValueStoreSink::new(key_value_store.clone(), key_prefix.clone()),
            label.to_string(),
        )),
    }
}

type OutputResultSink = crate::error::OutputResult<Sink>;

fn spawn_output_worker(
    label: String,
    freq_hz: i64,
    kind: OutputKind,
    mut consumer: ringbuf::HeapCons<OutputBlock>,
    shutdown: Arc<AtomicBool>,
    mixer: Arc<Mutex<Mixer>>,
    key_value_store: KeyValueStore,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("output-{label}"))
        .spawn(move || {
            run_output_worker(&label, freq_hz, kind, &mut consumer, &shutdown, &mixer, &key_value_store);
            log::info!("output worker for '{label}' exiting");
        })
        .expect("failed to spawn output worker")
}

fn run_output_worker(
    label: &str,
    freq_hz: i64,
    kind: OutputKind,
    consumer: &mut ringbuf::HeapCons<OutputBlock>,
    shutdown: &AtomicBool,
    mixer: &Arc<Mutex<Mixer>>,
    key_value_store: &KeyValueStore,
) {
    let mut sink = match build_sink(&kind, label, freq_hz, key_value_store) {
        Ok(sink) => sink,
        Err(e) => {
            log::error!("output '{label}' failed to initialize: {e}");
            return;
        }
    };
    let mut backoff = crate::output::ReconnectBackoff::default();

    while !shutdown.load(Ordering::Acquire) {
        match consumer.try_pop() {
            Some(block) => {
                let result = write_to_sink(&mut sink, &block, mixer);
                if let Err(e) = result {
                    log::warn!("output '{label}' write failed: {e}");
                    let delay = backoff.next_delay();
                    std::thread::sleep(delay);
                } else {
                    backoff.reset();
                }
            }
            None => std::thread::sleep(Duration::from_millis(2)),
        }
    }
}

fn write_to_sink(sink: &mut Sink, block: &OutputBlock, mixer: &Arc<Mutex<Mixer>>) -> crate::error::OutputResult<()> {
    match sink {
        Sink::FileMp3(s) => s.write_block(&block.pcm),
        Sink::FileRawIq(s) => {
            if let Some(iq) = &block.iq {
                s.write_block(iq)
            } else {
                Ok(())
            }
        }
        Sink::Mixer { input_id } => {
            if let Ok(mut guard) = mixer.lock() {
                guard.submit_block(*input_id, &block.pcm);
            }
            Ok(())
        }
        Sink::Udp(s, freq_hz) => s.write_block(&block.pcm, *freq_hz as u32, 0.0, 0.0, block.axcindicate),
        Sink::Icecast(s) => {
            s.ensure_connected()?;
            s.write_block(&block.pcm)
        }
        Sink::Pulse(s) => {
            s.write_block(&block.pcm);
            Ok(())
        }
        Sink::ApiPost(s, label, freq_hz) => s.write_block(label, *freq_hz, &block.pcm, block.axcindicate),
        Sink::KeyValueStore(s, label) => {
            s.write_block(label, &block.pcm);
            Ok(())
        }
    }
}

/// Drives the mixer's own tick (§4.10): inputs arrive asynchronously via
/// output workers calling `submit_block`, but something has to poll
/// `tick()` to notice when the mask fills and push the combined block to
/// the mixer's own outputs. Also detects a stalled mask (an enrolled
/// input that never arrives) and resets it after 2s so one dead input
/// can't wedge the whole mixer.
fn spawn_mixer_worker(
    mixer: Arc<Mutex<Mixer>>,
    mut outputs: Vec<OutputDescriptor>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("mixer-worker".into())
        .spawn(move || {
            let mut last_progress = Instant::now();
            while !shutdown.load(Ordering::Acquire) {
                let tick = mixer.lock().ok().and_then(|mut guard| guard.tick());
                match tick {
                    Some((left, right)) => {
                        last_progress = Instant::now();
                        let pcm: Vec<f32> = left
                            .iter()
                            .zip(right.iter())
                            .map(|(l, r)| 0.5 * (l + r))
                            .collect();
                        let axcindicate = if pcm.iter().any(|&s| s != 0.0) {
                            crate::dsp::afc::AfcIndication::Signal
                        } else {
                            crate::dsp::afc::AfcIndication::NoSignal
                        };
                        for out in &mut outputs {
                            out.push(OutputBlock {
                                pcm: pcm.clone(),
                                iq: None,
                                axcindicate,
                                scan_tag: None,
                            });
                        }
                    }
                    None => {
                        if last_progress.elapsed() >= Duration::from_secs(2) {
                            if let Ok(mut guard) = mixer.lock() {
                                guard.mark_overrun_and_reset();
                            }
                            last_progress = Instant::now();
                        }
                        std::thread::sleep(Duration::from_millis(SCAN_TICK_MS));
                    }
                }
            }
            log::info!("mixer worker exiting");
        })
        .expect("failed to spawn mixer worker")
}

fn now_unix_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MixerConfig, MixerInputConfig, ReceiverConfig};
    use crate::sample_format::SampleFormat;

    #[test]
    fn start_rejects_empty_receiver_list() {
        let config = PipelineConfig::default();
        let result = PipelineContext::start(config);
        assert!(matches!(result, Err(PipelineError::NoReceivers)));
    }

    #[test]
    fn start_builds_a_single_receiver_pipeline() {
        let config = PipelineConfig {
            receivers: vec![ReceiverConfig {
                label: "hf0".into(),
                sample_rate: 2_048_000,
                center_freq_hz: 100_000_000,
                sample_format: SampleFormat::S16,
                fft_size: 8192,
                ring_seconds: 1.0,
            }],
            channels: vec![ChannelConfigToml {
                label: "am0".into(),
                receiver_label: "hf0".into(),
                freq_hz: 100_000_000,
                modulation: crate::channel::Modulation::Am,
                ampfactor_db: 0.0,
                squelch: crate::config::SquelchConfigToml::default(),
                notch_hz: 0.0,
                notch_q: 4.0,
                bandwidth_hz: 3_000.0,
                afc: 0.0,
                needs_raw_iq: false,
                nfm_discriminator: crate::dsp::demod::NfmDiscriminator::Fast,
                nfm_tau_seconds: 200e-6,
                scan_list: Vec::new(),
            }],
            mixer: MixerConfig {
                inputs: vec![MixerInputConfig {
                    channel_label: "am0".into(),
                    ampfactor_db: 0.0,
                    balance: 0.0,
                }],
                outputs: Vec::new(),
            },
            outputs: Vec::new(),
        };
        let handle = PipelineContext::start(config).expect("pipeline should start");
        assert_eq!(handle.running_receivers(), 1);
        handle.stop();
        handle.join();
    }
}
