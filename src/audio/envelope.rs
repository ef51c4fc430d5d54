//! ADSR amplitude envelopes evaluated at a point in time

/// An attack-decay-sustain-release envelope.
///
/// The curve is evaluated against a note's hold time rather than stepped
/// statefully: given the seconds since note-on and the note's length, the
/// same envelope value always comes back for the same inputs. Release
/// begins at the hold point; if the note is shorter than attack + decay,
/// release starts from wherever the curve had reached and fades that value
/// out over the release time.
///
/// A negative attack is a sentinel meaning "always on": the envelope
/// evaluates to 1 regardless of time. Operators that must never fade, such
/// as a vibrato LFO, use this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Seconds to rise from 0 to 1. Negative bypasses the envelope.
    pub attack: f32,
    /// Seconds to fall from 1 to the sustain level.
    pub decay: f32,
    /// Level held until the note ends.
    pub sustain: f32,
    /// Seconds to fade to 0 after the note ends.
    pub release: f32,
}

impl Envelope {
    pub fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Envelope {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// Evaluate the envelope `t` seconds after note-on, for a note held for
    /// `hold` seconds. The result is always in [0, 1].
    pub fn evaluate(&self, t: f32, hold: f32) -> f32 {
        if self.attack < 0.0 {
            return 1.0;
        }

        let value = if hold < self.attack + self.decay && t > hold && t < hold + self.release {
            // The note ended mid-attack or mid-decay: release from whatever
            // value the curve had reached at the hold point.
            let rf = 1.0 - (t - hold) / self.release;
            if hold < self.attack {
                (hold / self.attack) * rf
            } else {
                (1.0 - ((1.0 - self.sustain) * (hold - self.attack)) / self.decay) * rf
            }
        } else if t < self.attack {
            t / self.attack
        } else if t < self.attack + self.decay {
            1.0 - ((1.0 - self.sustain) * (t - self.attack)) / self.decay
        } else if t < hold {
            self.sustain
        } else if t < hold + self.release {
            self.sustain * (1.0 - (t - hold) / self.release)
        } else {
            0.0
        };

        value.clamp(0.0, 1.0)
    }
}
