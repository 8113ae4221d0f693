//! Fixed pipeline-wide constants (spec GLOSSARY, §3, §4.2).

/// Fixed internal per-channel audio sample rate.
pub const AUDIO_RATE: u32 = 8000;

/// PCM samples produced per demod tick.
pub const WAVE_BATCH: usize = 800;

/// Lookback/lookahead margin in the per-channel sliding window for AGC
/// bootstrap and close-fade.
pub const AGC_EXTRA: usize = 64;

/// FFT instances consumed per channelizer iteration.
pub const FFT_BATCH: usize = WAVE_BATCH / 8;

/// Spectrum snapshot refresh period, in channelizer iterations.
pub const SPECTRUM_REFRESH_ITERS: u64 = 4;

/// Numeric floor used in dB conversions to avoid `log10(0)`.
pub const EPSILON: f32 = 1e-10;

/// Scan controller slow-tick period.
pub const SCAN_TICK_MS: u64 = 200;

/// Idle ticks before a scanning receiver retunes (~2 s at 200 ms/tick).
pub const SCAN_IDLE_THRESHOLD: u32 = 10;

/// Bin offset applied when pre-tuning a scan-mode receiver, to keep the
/// channel off the DC spike at bin 0.
pub const SCAN_BIN_OFFSET: i64 = 20;
