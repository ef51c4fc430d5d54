//! Four-line feedback-delay-network reverb

use super::engine::AudioParams;
use super::filter::Biquad;

/// Number of parallel delay lines in the network.
pub const FDN_LINES: usize = 4;

/// Default delay line lengths in samples. Mutually coprime primes, so the
/// recirculating echoes never line up into a comb.
const DELAYS: [usize; FDN_LINES] = [3041, 3385, 4481, 5477];

const IN_GAIN: [f32; FDN_LINES] = [0.4, 0.3, 0.2, 0.2];
const OUT_GAIN: [f32; FDN_LINES] = [0.5, 0.5, 0.3, 0.1];
const FEEDBACK: [f32; FDN_LINES] = [0.83, 0.9, 0.93, 0.85];

/// Normalised 4x4 Hadamard matrix mixing the line outputs back into the
/// feedback paths.
const HADAMARD: [[f32; FDN_LINES]; FDN_LINES] = [
    [0.5, 0.5, 0.5, 0.5],
    [0.5, -0.5, 0.5, -0.5],
    [0.5, 0.5, -0.5, -0.5],
    [0.5, -0.5, -0.5, 0.5],
];

/// Cutoff of the per-line damping lowpass. High frequencies die faster than
/// lows, as they do in a physical room.
const DAMP_HZ: f64 = 5600.0;

/// A feedback-delay-network reverb: four parallel delay lines whose outputs
/// are mixed through a Hadamard matrix, damped, and fed back in alongside
/// the dry input.
#[derive(Debug, Clone)]
pub struct Reverb {
    lines: [Vec<f32>; FDN_LINES],
    heads: [usize; FDN_LINES],
    damping: [Biquad; FDN_LINES],
    /// Wet/dry balance: 0 is fully dry, 1 fully wet.
    pub mix: f32,
}

impl Reverb {
    pub fn new(params: &AudioParams) -> Self {
        let mut rv = Reverb {
            lines: [
                vec![0.0; DELAYS[0]],
                vec![0.0; DELAYS[1]],
                vec![0.0; DELAYS[2]],
                vec![0.0; DELAYS[3]],
            ],
            heads: [0; FDN_LINES],
            damping: Default::default(),
            mix: 0.3,
        };
        rv.retune(params);
        rv
    }

    /// Re-designs the damping filters for a new sample rate. Line contents
    /// are kept; the tail simply continues at the new rate.
    pub fn retune(&mut self, params: &AudioParams) {
        for bq in &mut self.damping {
            bq.lowpass(DAMP_HZ, std::f64::consts::FRAC_1_SQRT_2, params);
        }
    }

    /// Runs one dry sample through the network and returns the mixed
    /// output.
    pub fn run(&mut self, dry: f32) -> f32 {
        // Advance every read head. The heads walk backwards through the
        // circular lines so the write always lands a full delay behind the
        // read.
        let mut outputs = [0.0f32; FDN_LINES];
        for i in 0..FDN_LINES {
            self.heads[i] = if self.heads[i] == 0 {
                self.lines[i].len() - 1
            } else {
                self.heads[i] - 1
            };
            outputs[i] = self.lines[i][self.heads[i]];
        }

        let mut wet = 0.0f32;
        for i in 0..FDN_LINES {
            let mut fb = 0.0f32;
            for (j, &y) in outputs.iter().enumerate() {
                fb += HADAMARD[i][j] * y;
            }
            fb = self.damping[i].run(fb * FEEDBACK[i]);

            let head = self.heads[i];
            self.lines[i][head] = fb + IN_GAIN[i] * dry;

            wet += outputs[i] * OUT_GAIN[i];
        }

        self.mix * wet + (1.0 - self.mix) * dry
    }

    /// Silences the network without touching the damping design.
    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        for bq in &mut self.damping {
            bq.reset();
        }
    }
}
