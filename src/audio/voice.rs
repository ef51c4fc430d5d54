//! One monophonic evaluation of an instrument's operator graph

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::engine::AudioParams;
use super::instrument::N_CHANNELS;
use super::operator::{Operator, ReceiveKind, Waveform};

use std::f64::consts::TAU;

/// The note a voice is currently sounding, in real time. A frequency of
/// zero means the voice is idle. All state transitions (held → released →
/// silent) are driven purely by the current time against `start` and
/// `duration`; there is no explicit note-off event.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayingNote {
    /// Oscillator base frequency in Hz. Zero silences the voice.
    pub freq: f32,
    /// Note-on time in seconds on the player clock.
    pub start: f64,
    /// Held time in seconds; release begins at `start + duration`.
    pub duration: f64,
    pub velocity: f32,
}

impl PlayingNote {
    /// When the envelopes' held phase ends. The voice keeps ringing for
    /// each operator's release time after this.
    pub fn finish(&self) -> f64 {
        self.start + self.duration
    }
}

/// One voice: the per-note mutable state of an instrument's operator graph.
///
/// Each operator owns a phase accumulator, and the operators exchange
/// signal through a fixed bank of channels. The channels are double
/// buffered: a frame reads the values written during the previous frame and
/// writes into the back bank, which is swapped in and zeroed afterwards.
/// That one-frame delay is what lets the graph contain cycles: a feedback
/// operator reads yesterday's output instead of forming an algebraic loop.
#[derive(Debug, Clone)]
pub struct Voice {
    phases: Vec<f32>,
    channels: Vec<f32>,
    channels_back: Vec<f32>,
    pub note: PlayingNote,
    rng: SmallRng,
}

impl Voice {
    pub fn new(n_ops: usize, seed: u64) -> Self {
        Voice {
            phases: vec![0.0; n_ops],
            channels: vec![0.0; N_CHANNELS],
            channels_back: vec![0.0; N_CHANNELS],
            note: PlayingNote::default(),
            // Deterministic seeding keeps the audio path away from OS
            // entropy; the noise waveform only needs decorrelation.
            rng: SmallRng::seed_from_u64(seed.wrapping_mul(0x9e37_79b9) | 1),
        }
    }

    /// Replaces the sounding note. Phases and channel contents carry over;
    /// a stolen voice glides into its new note rather than clicking from a
    /// hard reset.
    pub fn set_note(&mut self, note: PlayingNote) {
        self.note = note;
    }

    /// Silences the voice and clears its bus, e.g. on player reset.
    pub fn clear(&mut self) {
        self.note = PlayingNote::default();
        self.channels.fill(0.0);
        self.channels_back.fill(0.0);
    }

    /// The voice's output bus after the most recent frame.
    pub fn output(&self) -> f32 {
        self.channels[0]
    }

    /// Evaluates every operator for one frame at absolute time `time`.
    ///
    /// Operators run in declaration order. Phase updates integrate the
    /// received channels scaled by `dt`; `Modulate` receives additionally
    /// scale by the note frequency. Operator output fans out into the back
    /// channel bank, which becomes visible next frame.
    pub fn frame(&mut self, ops: &[Operator], time: f64, dt: f64) {
        for (i, op) in ops.iter().enumerate() {
            for recv in &op.receives {
                let mut m = (self.channels[recv.source] * recv.level) as f64 * dt;
                if recv.kind == ReceiveKind::Modulate {
                    m *= self.note.freq as f64;
                }
                self.phases[i] += m as f32;
            }

            // Keep the accumulator wrapped into [0, 2π). The waveforms are
            // all periodic, so this only guards against unbounded growth.
            while self.phases[i] >= TAU as f32 {
                self.phases[i] -= TAU as f32;
            }
            while self.phases[i] < 0.0 {
                self.phases[i] += TAU as f32;
            }

            let mut sample = 0.0f32;

            if self.note.freq > 0.0 {
                let env = op
                    .envelope
                    .evaluate((time - self.note.start) as f32, self.note.duration as f32);
                let vel = env * self.note.velocity;
                let f = if op.fixed {
                    op.transpose as f64
                } else {
                    self.note.freq as f64 * op.transpose as f64
                };
                let arg = f * time + self.phases[i] as f64;

                let wave = match op.wave {
                    Waveform::Sine => -(TAU * arg).cos() as f32,
                    Waveform::Square => {
                        if (TAU * arg).sin() >= 0.0 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Waveform::Triangle => {
                        (1.0 - 2.0 * (2.0 * (arg - arg.floor()) - 1.0).abs()) as f32
                    }
                    Waveform::Sawtooth => (arg - arg.floor()) as f32,
                    Waveform::Noise => {
                        if self.rng.gen::<bool>() {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                };

                sample = wave * vel;
            }

            for send in &op.sends {
                self.channels_back[send.dest] += send.level * sample;
            }
        }

        self.swap_channels();
    }

    /// Runs the voice for `out.len()` frames starting at `start_time`,
    /// accumulating the output bus into `out`.
    pub fn run_block(
        &mut self,
        ops: &[Operator],
        out: &mut [f32],
        start_time: f64,
        params: &AudioParams,
    ) {
        for (frame, slot) in out.iter_mut().enumerate() {
            let time = start_time + params.dt * frame as f64;
            self.frame(ops, time, params.dt);
            *slot += self.channels[0];
        }
    }

    fn swap_channels(&mut self) {
        std::mem::swap(&mut self.channels, &mut self.channels_back);
        self.channels_back.fill(0.0);
    }
}
