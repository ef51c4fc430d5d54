//! Built-in instrument patches

use super::engine::AudioParams;
use super::envelope::Envelope;
use super::instrument::Instrument;
use super::operator::{Operator, ReceiveKind, Waveform};

/// Names accepted by [`by_name`], in menu order.
pub const PRESET_NAMES: [&str; 5] = ["flute", "lute", "organ", "percussion", "sine"];

/// Looks up a preset builder by name.
pub fn by_name(name: &str, params: &AudioParams) -> Result<Instrument, String> {
    match name {
        "flute" => flute(params),
        "lute" => lute(params),
        "organ" => organ(params),
        "percussion" => percussion(params),
        "sine" => sine(params),
        _ => Err(format!(
            "unknown instrument '{}', expected one of: {}",
            name,
            PRESET_NAMES.join(", ")
        )),
    }
}

/// A breathy lead: a sine carrier under two plain modulators, a slightly
/// detuned modulator with its own feedback operator, and a 4 Hz vibrato
/// LFO, band-limited by the EQ.
pub fn flute(params: &AudioParams) -> Result<Instrument, String> {
    let carrier = Operator::new(1.0, Envelope::new(0.1, 0.45, 0.8, 0.35))
        .receive(1, 4.0, ReceiveKind::Modulate)
        .receive(3, 1.5, ReceiveKind::Vibrato)
        .send(0, 0.5);

    let mod1 = Operator::new(2.0, Envelope::new(0.05, 0.45, 0.9, 0.35)).send(1, 0.33);
    let mod2 = Operator::new(1.0, Envelope::new(0.06, 0.45, 0.9, 0.35)).send(1, 0.27);

    let mod3 = Operator::new(1.01, Envelope::new(0.02, 0.45, 0.9, 0.1))
        .receive(4, 0.045, ReceiveKind::Modulate)
        .send(1, 0.2);

    let feedback = Operator::new(1.0, Envelope::new(0.05, 1.0, 1.0, 0.35))
        .receive(4, 0.12, ReceiveKind::Modulate)
        .send(4, 1.0);

    let vibrato = Operator::fixed(4.0, Envelope::new(1.3, 0.2, 2.0, 0.0)).send(3, 1.0);

    let mut instr = Instrument::new(vec![carrier, mod1, mod2, mod3, feedback, vibrato])?;
    instr.eq.lowpass(4000.0, 2.0);
    instr.eq.highpass(250.0, 2.0);
    instr.eq.bake(params);
    Ok(instr)
}

/// A plucked string: a square fundamental with a fast-decaying triangle an
/// octave up.
pub fn lute(_params: &AudioParams) -> Result<Instrument, String> {
    let body = Operator::new(1.0, Envelope::new(0.01, 0.6, 0.3, 0.3))
        .wave(Waveform::Square)
        .send(0, 0.65);

    let shimmer = Operator::new(2.0, Envelope::new(0.01, 0.1, 0.15, 0.8))
        .wave(Waveform::Triangle)
        .send(0, 0.1);

    Instrument::new(vec![body, shimmer])
}

/// Four octave-stacked partials, each frequency-modulated by its own
/// feedback operator.
pub fn organ(_params: &AudioParams) -> Result<Instrument, String> {
    let mut ops = Vec::with_capacity(8);

    for i in 0..4 {
        let transpose = 2.0f32.powi(i as i32);

        ops.push(
            Operator::new(transpose, Envelope::new(0.02, 0.2, 1.0, 0.1))
                .receive(i + 1, 4.0, ReceiveKind::Modulate)
                .send(0, 0.4 - i as f32 / 12.0),
        );
    }

    for i in 0..4 {
        let transpose = 2.0f32.powi(i as i32);

        ops.push(
            Operator::new(transpose, Envelope::new(0.05, 0.2, 1.0, 0.35))
                .receive(i + 1, 0.45 + i as f32 / 15.0, ReceiveKind::Modulate)
                .send(i + 1, 2.0),
        );
    }

    Instrument::new(ops)
}

/// An enveloped noise burst.
pub fn percussion(_params: &AudioParams) -> Result<Instrument, String> {
    let hit = Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0))
        .wave(Waveform::Noise)
        .send(0, 1.5);

    Instrument::new(vec![hit])
}

/// A single enveloped sine; the reference patch for tests and debugging.
pub fn sine(_params: &AudioParams) -> Result<Instrument, String> {
    let tone = Operator::new(1.0, Envelope::new(0.1, 0.2, 0.7, 0.5)).send(0, 1.0);
    Instrument::new(vec![tone])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::PlayingNote;

    #[test]
    fn test_all_presets_build() {
        let params = AudioParams::new(44100);
        for name in PRESET_NAMES {
            assert!(by_name(name, &params).is_ok(), "preset {} failed", name);
        }
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        let err = by_name("theremin", &AudioParams::new(44100)).unwrap_err();
        assert!(err.contains("theremin"));
        assert!(err.contains("flute"));
    }

    #[test]
    fn test_presets_make_sound() {
        let params = AudioParams::new(44100);
        for name in PRESET_NAMES {
            let mut instr = by_name(name, &params).unwrap();
            instr.voice_mut(0).set_note(PlayingNote {
                freq: 220.0,
                start: 0.0,
                duration: 1.0,
                velocity: 1.0,
            });

            let mut energy = 0.0f64;
            for i in 0..4096 {
                let s = instr.next_output(i as f64 * params.dt, &params);
                assert!(s.is_finite(), "{} produced a non-finite sample", name);
                energy += (s * s) as f64;
            }
            assert!(energy > 0.0, "{} is silent", name);
        }
    }
}
