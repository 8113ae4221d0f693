//! Automatic Frequency Control: gradient-climbing bin walk (spec §4.8).
//!
//! No close teacher analogue exists for this; written directly from the
//! spec's algorithm description, in the plain-function unit-tested style
//! the teacher uses for its own standalone DSP helpers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfcIndication {
    NoSignal,
    Signal,
    AfcUp,
    AfcDown,
}

/// Walk outward from `base_bin` across `magnitudes` (indexed modulo
/// `fft_size`), climbing the gradient while it keeps increasing by more
/// than a growing threshold. Returns the landed bin and the resulting
/// indication, given the channel's current bin.
pub fn afc_walk(
    magnitudes: &[f32],
    base_bin: usize,
    current_bin: usize,
    afc: f32,
) -> (usize, AfcIndication) {
    let fft_size = magnitudes.len();
    if fft_size == 0 || afc == 0.0 {
        return (current_bin, AfcIndication::Signal);
    }
    let base_value = magnitudes[base_bin % fft_size];

    let walk = |direction: isize| -> Option<usize> {
        let mut bin = base_bin;
        let mut prev_value = base_value;
        let mut threshold: Option<f32> = None;
        let mut moved = false;
        loop {
            let next_bin = ((bin as isize + direction).rem_euclid(fft_size as isize)) as usize;
            let next_value = magnitudes[next_bin];
            if next_value <= base_value {
                break;
            }
            let increment = next_value - prev_value;
            match threshold {
                None => {
                    threshold = Some((next_value - base_value) / afc);
                    bin = next_bin;
                    prev_value = next_value;
                    moved = true;
                }
                Some(t) => {
                    if increment <= t {
                        break;
                    }
                    threshold = Some(t * 1.1);
                    bin = next_bin;
                    prev_value = next_value;
                    moved = true;
                }
            }
        }
        if moved {
            Some(bin)
        } else {
            None
        }
    };

    let landed = walk(-1).or_else(|| walk(1)).unwrap_or(base_bin);

    if landed == current_bin {
        (landed, AfcIndication::Signal)
    } else if landed > current_bin {
        (landed, AfcIndication::AfcUp)
    } else {
        (landed, AfcIndication::AfcDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_spectrum_does_not_move() {
        let mags = vec![1.0f32; 16];
        let (bin, indication) = afc_walk(&mags, 4, 4, 2.0);
        assert_eq!(bin, 4);
        assert_eq!(indication, AfcIndication::Signal);
    }

    #[test]
    fn climbs_toward_a_stronger_adjacent_bin() {
        let mut mags = vec![0.1f32; 16];
        mags[4] = 1.0;
        mags[5] = 3.0;
        mags[6] = 5.0;
        let (bin, indication) = afc_walk(&mags, 4, 4, 1.0);
        assert!(bin == 5 || bin == 6, "expected to climb toward bin 5 or 6, got {bin}");
        assert_eq!(indication, AfcIndication::AfcUp);
    }

    #[test]
    fn zero_afc_disables_walk() {
        let mags = vec![1.0f32; 16];
        let (bin, indication) = afc_walk(&mags, 4, 4, 0.0);
        assert_eq!(bin, 4);
        assert_eq!(indication, AfcIndication::Signal);
    }
}
