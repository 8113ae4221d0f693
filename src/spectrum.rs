//! Per-receiver spectrum snapshot (spec §3, §4.2 step 5).

use std::sync::Mutex;

pub struct SpectrumSnapshot {
    inner: Mutex<Inner>,
    fft_size: usize,
}

struct Inner {
    magnitudes_db: Vec<f32>,
    timestamp: u64,
}

impl SpectrumSnapshot {
    pub fn new(fft_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                magnitudes_db: vec![20.0 * crate::constants::EPSILON.log10(); fft_size],
                timestamp: 0,
            }),
            fft_size,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Writer side: `bins` must already be DC-centered (index `i`
    /// corresponds to FFT bin `(i + fft_size/2) mod fft_size`) and in dB.
    pub fn publish(&self, bins_db: &[f32], timestamp: u64) {
        debug_assert_eq!(bins_db.len(), self.fft_size);
        let mut inner = self.inner.lock().unwrap();
        inner.magnitudes_db.copy_from_slice(bins_db);
        inner.timestamp = timestamp;
    }

    /// Reader side: copies the current snapshot into `out`, returns the
    /// snapshot's timestamp. `out.len()` must equal `fft_size`.
    pub fn read_into(&self, out: &mut [f32]) -> u64 {
        let inner = self.inner.lock().unwrap();
        out.copy_from_slice(&inner.magnitudes_db);
        inner.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_noise_floor() {
        let snap = SpectrumSnapshot::new(8);
        let mut out = vec![0.0; 8];
        let ts = snap.read_into(&mut out);
        assert_eq!(ts, 0);
        for v in out {
            assert!(v <= 20.0 * crate::constants::EPSILON.log10() + 1e-3);
        }
    }

    #[test]
    fn publish_then_read_round_trips() {
        let snap = SpectrumSnapshot::new(4);
        snap.publish(&[1.0, 2.0, 3.0, 4.0], 42);
        let mut out = vec![0.0; 4];
        let ts = snap.read_into(&mut out);
        assert_eq!(ts, 42);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }
}
