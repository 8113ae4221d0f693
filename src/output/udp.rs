//! UDP audio stream sink — bit-exact wire format per spec §6.

use std::net::UdpSocket;

use crate::dsp::afc::AfcIndication;
use crate::error::{OutputError, OutputResult};

const MAX_UDP_PAYLOAD: usize = 1472;

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub channel_id: u16,
    pub target_addr: String,
    pub include_header: bool,
    pub stereo: bool,
    pub chunking: bool,
}

pub struct UdpSink {
    config: UdpConfig,
    socket: UdpSocket,
}

impl UdpSink {
    pub fn new(config: UdpConfig) -> OutputResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(OutputError::Io)?;
        socket.connect(&config.target_addr).map_err(OutputError::Io)?;
        Ok(Self { config, socket })
    }

    fn build_header(&self, freq_hz: u32, signal_dbfs: f32, snr_db: f32) -> [u8; 16] {
        let mut header = [0u8; 16];
        header[0..2].copy_from_slice(&self.config.channel_id.to_be_bytes());
        // header[2..4] reserved, left zero
        header[4..8].copy_from_slice(&freq_hz.to_be_bytes());
        header[8..10].copy_from_slice(&((signal_dbfs * 10.0) as i16).to_be_bytes());
        header[10..12].copy_from_slice(&((snr_db * 10.0) as i16).to_be_bytes());
        // header[12..16] padding, left zero
        header
    }

    /// Send one tick's PCM block, chunked to the UDP MTU and aligned to
    /// `4 * channels` bytes when chunking is enabled.
    pub fn write_block(
        &mut self,
        pcm: &[f32],
        freq_hz: u32,
        signal_dbfs: f32,
        snr_db: f32,
        axcindicate: AfcIndication,
    ) -> OutputResult<()> {
        if axcindicate == AfcIndication::NoSignal {
            return Ok(());
        }
        let channels = if self.config.stereo { 2 } else { 1 };
        let frame_bytes = 4 * channels;

        let mut payload = Vec::with_capacity(pcm.len() * 4);
        for &s in pcm {
            payload.extend_from_slice(&s.to_le_bytes());
        }

        if !self.config.chunking {
            self.send_packet(&payload, freq_hz, signal_dbfs, snr_db)?;
            return Ok(());
        }

        let header_len = if self.config.include_header { 16 } else { 0 };
        let mut max_chunk = MAX_UDP_PAYLOAD - header_len;
        max_chunk -= max_chunk % frame_bytes;

        for chunk in payload.chunks(max_chunk) {
            self.send_packet(chunk, freq_hz, signal_dbfs, snr_db)?;
        }
        Ok(())
    }

    fn send_packet(&self, payload: &[u8], freq_hz: u32, signal_dbfs: f32, snr_db: f32) -> OutputResult<()> {
        let mut packet = Vec::with_capacity(16 + payload.len());
        if self.config.include_header {
            packet.extend_from_slice(&self.build_header(freq_hz, signal_dbfs, snr_db));
        }
        packet.extend_from_slice(payload);
        self.socket.send(&packet).map_err(OutputError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encodes_big_endian_fields() {
        let config = UdpConfig {
            channel_id: 7,
            target_addr: "127.0.0.1:9".into(),
            include_header: true,
            stereo: false,
            chunking: true,
        };
        let sink = UdpSink {
            config,
            socket: UdpSocket::bind("0.0.0.0:0").unwrap(),
        };
        let header = sink.build_header(155_955_000, -12.5, 20.0);
        assert_eq!(u16::from_be_bytes([header[0], header[1]]), 7);
        assert_eq!(
            u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
            155_955_000
        );
        assert_eq!(i16::from_be_bytes([header[8], header[9]]), -125);
        assert_eq!(i16::from_be_bytes([header[10], header[11]]), 200);
    }

    #[test]
    fn chunk_size_is_aligned_to_frame_bytes() {
        let max_chunk_mono = MAX_UDP_PAYLOAD - (MAX_UDP_PAYLOAD % 4);
        assert_eq!(max_chunk_mono % 4, 0);
    }
}
