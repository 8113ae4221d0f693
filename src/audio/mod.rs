//! N-input mixing (spec §3, §4.10); the only audio-domain concern left
//! in this crate once per-channel DSP moved under `dsp/`.

pub mod mixer;
