//! Minor sinks named in spec §3's output descriptor kinds but left fully
//! at the interface boundary ("output encoder backends... carry no DSP
//! logic", spec §1): a generic webhook POST and an in-process key/value
//! snapshot store, both adapted from the teacher's tagged-sink shape
//! rather than from any single teacher file.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::dsp::afc::AfcIndication;
use crate::error::{OutputError, OutputResult};

#[derive(Debug, Serialize)]
struct ApiPostPayload<'a> {
    label: &'a str,
    freq_hz: i64,
    axcindicate: &'static str,
    rms: f32,
}

fn axcindicate_label(axcindicate: AfcIndication) -> &'static str {
    match axcindicate {
        AfcIndication::NoSignal => "no_signal",
        AfcIndication::Signal => "signal",
        AfcIndication::AfcUp => "afc_up",
        AfcIndication::AfcDown => "afc_down",
    }
}

pub struct ApiPostSink {
    url: String,
    client: reqwest::blocking::Client,
}

impl ApiPostSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client"),
        }
    }

    pub fn write_block(&mut self, label: &str, freq_hz: i64, pcm: &[f32], axcindicate: AfcIndication) -> OutputResult<()> {
        let rms = if pcm.is_empty() {
            0.0
        } else {
            (pcm.iter().map(|s| s * s).sum::<f32>() / pcm.len() as f32).sqrt()
        };
        let payload = ApiPostPayload {
            label,
            freq_hz,
            axcindicate: axcindicate_label(axcindicate),
            rms,
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .map_err(|e| OutputError::Connection(format!("api post failed: {e}")))?;
        Ok(())
    }
}

/// Shared map a monitoring surface can poll; this process writes the
/// latest snapshot under `key_prefix`/`label`, never reads it back.
pub type KeyValueStore = Arc<Mutex<HashMap<String, Vec<u8>>>>;

pub struct KeyValueStoreSink {
    store: KeyValueStore,
    key_prefix: String,
}

impl KeyValueStoreSink {
    pub fn new(store: KeyValueStore, key_prefix: String) -> Self {
        Self { store, key_prefix }
    }

    pub fn write_block(&mut self, label: &str, pcm: &[f32]) {
        let key = format!("{}/{}", self.key_prefix, label);
        let mut bytes = Vec::with_capacity(pcm.len() * 4);
        for &s in pcm {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        if let Ok(mut guard) = self.store.lock() {
            guard.insert(key, bytes);
        }
    }
}
