//! Icecast source sink: HTTP PUT streaming of MP3 frames (spec §6).
//!
//! Adapted from the teacher's `stream/icecast.rs` `BodyReader`/streaming-PUT
//! shape: a `sync_channel` feeds a `reqwest::blocking::Body` read on a
//! dedicated request thread, so the pipeline thread calling `write_block`
//! never blocks on the socket. The teacher's raw 16-bit PCM frames are
//! replaced with real MP3 frames from `shine_rs`, and the ad hoc
//! `is_shoutcast` bool stays since both auth schemes are still in scope.

use std::io::Read;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::time::Duration;

use shine_rs::Encoder as ShineEncoder;

use super::ReconnectBackoff;
use crate::error::{OutputError, OutputResult};

#[derive(Debug, Clone)]
pub struct IcecastConfig {
    pub host: String,
    pub port: u16,
    pub mount: String,
    pub password: String,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub stream_name: String,
    pub genre: String,
    pub is_shoutcast: bool,
}

impl Default for IcecastConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            mount: "/stream".to_string(),
            password: "hackme".to_string(),
            bitrate_kbps: 32,
            sample_rate: super::file_mp3::MP3_SAMPLE_RATE,
            stream_name: "channel".to_string(),
            genre: "Various".to_string(),
            is_shoutcast: false,
        }
    }
}

impl IcecastConfig {
    fn url(&self) -> String {
        if self.is_shoutcast {
            format!("http://{}:{}/", self.host, self.port)
        } else {
            format!("http://{}:{}{}", self.host, self.port, self.mount)
        }
    }
}

/// Adapter that makes a `sync_channel` receiver look like `Read` for reqwest.
struct BodyReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    pos: usize,
}

impl BodyReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buffer: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.buffer.len() {
            match self.rx.recv() {
                Ok(data) => {
                    self.buffer = data;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = self.buffer.len() - self.pos;
        let to_copy = buf.len().min(available);
        buf[..to_copy].copy_from_slice(&self.buffer[self.pos..self.pos + to_copy]);
        self.pos += to_copy;
        Ok(to_copy)
    }
}

enum Connection {
    Disconnected,
    Connected {
        body_tx: SyncSender<Vec<u8>>,
        request_thread: Option<std::thread::JoinHandle<()>>,
    },
}

pub struct IcecastSink {
    config: IcecastConfig,
    encoder: ShineEncoder,
    conn: Connection,
    backoff: ReconnectBackoff,
}

impl IcecastSink {
    pub fn new(config: IcecastConfig) -> OutputResult<Self> {
        let encoder = ShineEncoder::new(config.sample_rate, 1, config.bitrate_kbps)
            .map_err(|e| OutputError::Encoder(format!("shine init failed: {e}")))?;
        Ok(Self {
            config,
            encoder,
            conn: Connection::Disconnected,
            backoff: ReconnectBackoff::default(),
        })
    }

    fn connect(&mut self) -> OutputResult<()> {
        let url = self.config.url();
        log::info!("icecast sink connecting to {url}");

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| OutputError::Connection(format!("client build failed: {e}")))?;

        let auth_user = if self.config.is_shoutcast {
            self.config.password.clone()
        } else {
            "source".to_string()
        };
        let auth_pass = self.config.password.clone();

        let (body_tx, body_rx) = sync_channel::<Vec<u8>>(32);
        let body = reqwest::blocking::Body::new(BodyReader::new(body_rx));

        let bitrate = self.config.bitrate_kbps;
        let sample_rate = self.config.sample_rate;
        let stream_name = self.config.stream_name.clone();
        let genre = self.config.genre.clone();

        let request_thread = std::thread::Builder::new()
            .name("icecast-put".into())
            .spawn(move || {
                let result = client
                    .put(&url)
                    .basic_auth(auth_user, Some(auth_pass))
                    .header("Content-Type", "audio/mpeg")
                    .header("Icy-Name", stream_name)
                    .header("Icy-Genre", genre)
                    .header("Icy-Br", bitrate.to_string())
                    .header("Icy-Sr", sample_rate.to_string())
                    .header("Icy-Pub", "0")
                    .header("Transfer-Encoding", "chunked")
                    .body(body)
                    .send();
                match result {
                    Ok(resp) => log::info!("icecast response: {}", resp.status()),
                    Err(e) => log::warn!("icecast request failed: {e}"),
                }
            })
            .expect("failed to spawn icecast-put thread");

        self.conn = Connection::Connected {
            body_tx,
            request_thread: Some(request_thread),
        };
        self.backoff.reset();
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Connection::Connected {
            body_tx,
            request_thread,
        } = std::mem::replace(&mut self.conn, Connection::Disconnected)
        {
            drop(body_tx);
            if let Some(handle) = request_thread {
                let _ = handle.join();
            }
        }
    }

    /// Encode one PCM block to MP3 and push it down the streaming body.
    /// On a dropped connection, reports `OutputError::BackingOff` and the
    /// caller is expected to retry after `ReconnectBackoff::next_delay`.
    pub fn write_block(&mut self, pcm: &[f32]) -> OutputResult<()> {
        if matches!(self.conn, Connection::Disconnected) {
            return Err(OutputError::BackingOff);
        }
        let samples: Vec<i16> = pcm
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        let frame = self
            .encoder
            .encode(&samples)
            .map_err(|e| OutputError::Encoder(format!("mp3 encode failed: {e}")))?;

        if let Connection::Connected { body_tx, .. } = &self.conn {
            if body_tx.send(frame).is_err() {
                self.disconnect();
                return Err(OutputError::Connection("body channel closed".into()));
            }
        }
        Ok(())
    }

    /// Attempt (re)connection, backing off on repeated failure per the
    /// shared `ReconnectBackoff` policy.
    pub fn ensure_connected(&mut self) -> OutputResult<()> {
        if matches!(self.conn, Connection::Connected { .. }) {
            return Ok(());
        }
        match self.connect() {
            Ok(()) => Ok(()),
            Err(e) => {
                let delay = self.backoff.next_delay();
                log::warn!("icecast connect failed, retrying in {delay:?}: {e}");
                Err(e)
            }
        }
    }

    pub fn close(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shoutcast_url_has_no_mount_path() {
        let config = IcecastConfig {
            is_shoutcast: true,
            host: "radio.example".into(),
            port: 8010,
            ..IcecastConfig::default()
        };
        assert_eq!(config.url(), "http://radio.example:8010/");
    }

    #[test]
    fn icecast_url_includes_mount_path() {
        let config = IcecastConfig {
            host: "radio.example".into(),
            port: 8000,
            mount: "/police".into(),
            ..IcecastConfig::default()
        };
        assert_eq!(config.url(), "http://radio.example:8000/police");
    }
}
