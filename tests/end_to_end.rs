//! Full-pipeline tests: score text in, audio out.

use polyfm::audio::engine::{AudioParams, Player};
use polyfm::audio::presets;
use polyfm::audio::reverb::Reverb;
use polyfm::export::export_wav;
use polyfm::score::parse_song;

const SCORE: &str = "\
bpm 120
num_parts 2

part
  num_notes 3
  0:0 48 16 0.9
  1:0 55 16 0.8
  2:0 60 32 1.0
end

part
  num_notes 2
  0:16 72 24 0.6
  2:0  67 32 0.7
end
";

fn build_player(instrument_names: &[&str], reverb: bool) -> Player {
    let song = parse_song(SCORE).expect("score parses");
    let params = AudioParams::new(44100);

    let instruments = instrument_names
        .iter()
        .map(|name| {
            let mut instr = presets::by_name(name, &params).expect("preset builds");
            if reverb {
                instr.reverb = Some(Reverb::new(&params));
            }
            instr
        })
        .collect();

    Player::new(instruments, song, params).expect("player builds")
}

#[test]
fn score_plays_through_every_preset() {
    for name in presets::PRESET_NAMES {
        let mut player = build_player(&[name, name], false);
        player.volume = 0.2;

        // Render two seconds: all five notes start inside that window.
        let mut out = vec![0.0f32; 88200];
        player.fill(&mut out);

        assert!(
            out.iter().all(|x| x.is_finite()),
            "{} produced a non-finite sample",
            name
        );
        let energy: f64 = out.iter().map(|x| (x * x) as f64).sum();
        assert!(energy > 0.0, "{} rendered silence", name);
    }
}

#[test]
fn notes_sound_when_the_score_says_so() {
    let mut player = build_player(&["sine", "sine"], false);

    // The first part's opening note starts at beat 0; the second part's
    // only opens half a beat in (division 16 at 120 bpm = 0.25 s).
    let mut first_quarter = vec![0.0f32; 11025];
    player.fill(&mut first_quarter);
    let early_energy: f64 = first_quarter.iter().map(|x| (x * x) as f64).sum();
    assert!(early_energy > 0.0, "nothing sounding in the first quarter second");

    // Beat 3 onward is past every note's hold time; by beat 4 plus the
    // longest release everything has faded.
    let mut rest = vec![0.0f32; 44100 * 3];
    player.fill(&mut rest);
    let tail = &rest[rest.len() - 22050..];
    let tail_energy: f64 = tail.iter().map(|x| (x * x) as f64).sum();
    assert!(
        tail_energy < 1e-6,
        "voices still sounding long after the song ended: {}",
        tail_energy
    );
}

#[test]
fn reverb_extends_the_tail() {
    let render = |reverb: bool| -> f64 {
        let mut player = build_player(&["lute", "lute"], reverb);
        let mut out = vec![0.0f32; 44100 * 3];
        player.fill(&mut out);
        // Energy well after the last note's release.
        out[44100 * 2 + 22050..].iter().map(|x| (x * x) as f64).sum()
    };

    let dry = render(false);
    let wet = render(true);
    assert!(wet > dry, "reverb tail not audible: dry {} wet {}", dry, wet);
}

#[test]
fn monitors_deliver_spectrum_and_waveform_offline() {
    let mut player = build_player(&["lute", "lute"], false);
    let monitors: Vec<_> = player
        .instruments_mut()
        .iter_mut()
        .map(|instr| instr.monitor())
        .collect();

    // Half a second covers the second part's first note at 0.25 s, so
    // both instruments have something to show.
    let mut out = vec![0.0f32; 22528];
    player.fill(&mut out);

    for monitor in &monitors {
        let mut bins = vec![0.0f32; polyfm::FREQ_DOMAIN];
        monitor.spectrum.read(&mut bins);
        assert!(bins.iter().any(|&b| b > 0.0), "spectrum tap stayed empty");

        let mut wave = vec![0.0f32; polyfm::BLOCK];
        assert!(monitor.read_waveform(&mut wave) > 0, "waveform tap stayed empty");
    }
}

#[test]
fn parsed_score_exports_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("song.wav");

    let mut player = build_player(&["lute", "flute"], false);
    player.volume = 0.2;
    export_wav(&path, &mut player, 44100, 16, 1.0).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 44 + 44100 * 2);
    assert_eq!(&bytes[..4], b"RIFF");

    // The render is not silence.
    let loud = bytes[44..]
        .chunks_exact(2)
        .map(|p| i16::from_le_bytes([p[0], p[1]]).unsigned_abs())
        .max()
        .unwrap();
    assert!(loud > 100, "export peaked at only {}", loud);
}
