//! Per-channel DSP building blocks (spec §4.2–§4.8): window, biquads,
//! phase accumulator, squelch/CTCSS, AM/NFM demod, AFC.

pub mod afc;
pub mod biquad;
pub mod demod;
pub mod phase;
pub mod squelch;
pub mod window;
