//! N-input mixer with an input-ready mask (spec §3, §4.10).
//!
//! `accumulate`'s gain-scale-and-sum shape is kept from the teacher's
//! fixed 6-channel `ChannelStrip` mixer; the fixed deck fields are
//! replaced by a `Vec<MixerInput>` enrolled at init via `connect_input`,
//! and fader/mute become ampfactor/balance with linear unity-at-center
//! panning (§4.10's worked example requires 0.3+0.4 centered to sum to
//! 0.7, not the ~0.707 an equal-power law would give).

#[derive(Debug, Clone)]
pub struct MixerInput {
    pub ampfactor: f32,
    /// Stereo balance in [-1, +1]; 0 is centered.
    pub balance: f32,
    ready: bool,
    pending: Vec<f32>,
}

impl MixerInput {
    fn new(ampfactor: f32, balance: f32, block_len: usize) -> Self {
        Self {
            ampfactor,
            balance: balance.clamp(-1.0, 1.0),
            ready: false,
            pending: vec![0.0; block_len],
        }
    }

    /// Linear pan gains (left, right) derived from `balance`; unity gain
    /// on both channels at center, tapering to full gain on one channel
    /// and silence on the other at `balance = ±1`.
    fn pan_gains(&self) -> (f32, f32) {
        let gl = (1.0 - self.balance).clamp(0.0, 1.0);
        let gr = (1.0 + self.balance).clamp(0.0, 1.0);
        (gl, gr)
    }
}

pub struct Mixer {
    block_len: usize,
    inputs: Vec<MixerInput>,
    left_accum: Vec<f32>,
    right_accum: Vec<f32>,
    pub output_overrun_count: u64,
}

impl Mixer {
    pub fn new(block_len: usize) -> Self {
        Self {
            block_len,
            inputs: Vec::new(),
            left_accum: vec![0.0; block_len],
            right_accum: vec![0.0; block_len],
            output_overrun_count: 0,
        }
    }

    /// §6 "connect_input(ampfactor, balance) -> input_id", called once
    /// at init; the DSP graph is static after start.
    pub fn connect_input(&mut self, ampfactor: f32, balance: f32) -> usize {
        self.inputs.push(MixerInput::new(ampfactor, balance, self.block_len));
        self.inputs.len() - 1
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn all_ready(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| i.ready)
    }

    /// Called by an output worker when `input_id`'s block for this tick
    /// has arrived.
    pub fn submit_block(&mut self, input_id: usize, block: &[f32]) {
        let input = &mut self.inputs[input_id];
        input.pending.copy_from_slice(block);
        input.ready = true;
    }

    /// Called once per channelizer tick. If a previous tick's mask was
    /// left non-empty (a slow input), counts an overrun and drops it.
    /// Returns `Some((left, right))` when the mask is fully set.
    pub fn tick(&mut self) -> Option<(Vec<f32>, Vec<f32>)> {
        if !self.all_ready() {
            return None;
        }

        self.left_accum.fill(0.0);
        self.right_accum.fill(0.0);

        for input in &mut self.inputs {
            let (gl, gr) = input.pan_gains();
            for i in 0..self.block_len {
                let scaled = input.pending[i] * input.ampfactor;
                self.left_accum[i] += scaled * gl;
                self.right_accum[i] += scaled * gr;
            }
            input.ready = false;
        }

        Some((self.left_accum.clone(), self.right_accum.clone()))
    }

    /// Called at the start of a new tick if the previous tick's mask was
    /// non-empty when this one began (a slow input never arrived).
    pub fn mark_overrun_and_reset(&mut self) {
        self.output_overrun_count += 1;
        for input in &mut self.inputs {
            input.ready = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_when_all_inputs_ready() {
        let mut mixer = Mixer::new(4);
        let a = mixer.connect_input(1.0, 0.0);
        let b = mixer.connect_input(1.0, 0.0);
        mixer.submit_block(a, &[0.1, 0.1, 0.1, 0.1]);
        assert!(mixer.tick().is_none());
        mixer.submit_block(b, &[0.2, 0.2, 0.2, 0.2]);
        let (l, r) = mixer.tick().unwrap();
        assert!((l[0] - r[0]).abs() < 1e-5);
        assert!(l[0] > 0.0);
    }

    #[test]
    fn sums_two_equal_amplitude_centered_inputs() {
        let mut mixer = Mixer::new(2);
        let a = mixer.connect_input(1.0, 0.0);
        let b = mixer.connect_input(1.0, 0.0);
        mixer.submit_block(a, &[0.3, 0.3]);
        mixer.submit_block(b, &[0.4, 0.4]);
        let (l, _r) = mixer.tick().unwrap();
        assert!((l[0] - 0.7).abs() < 1e-4);
    }

    #[test]
    fn hard_left_balance_puts_all_energy_in_left_channel() {
        let mut mixer = Mixer::new(1);
        let a = mixer.connect_input(1.0, -1.0);
        mixer.submit_block(a, &[1.0]);
        let (l, r) = mixer.tick().unwrap();
        assert!(l[0] > 0.9);
        assert!(r[0] < 0.1);
    }
}
