//! Command-line front end: play a score live or render it to a WAV file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use polyfm::audio::device::{list_output_devices, AudioConfig};
use polyfm::audio::engine::{AudioOutput, AudioParams, Player};
use polyfm::audio::presets;
use polyfm::audio::reverb::Reverb;
use polyfm::export::export_wav;
use polyfm::score::parse_song;

/// Release tail appended after the last note before live playback stops.
const LIVE_TAIL_SECONDS: f64 = 2.0;

/// Extra tail appended to the default export length so releases and
/// reverb ring out before the file ends.
const EXPORT_TAIL_SECONDS: f64 = 5.0;

#[derive(Debug, Parser)]
#[command(name = "polyfm", version, about = "Polyphonic FM synthesis engine")]
struct Args {
    /// Score file to play
    score: Option<PathBuf>,

    /// Comma-separated instrument presets, one per part; the last entry
    /// repeats if the song has more parts
    #[arg(long, default_value = "lute")]
    instruments: String,

    /// Output level, 0 to 1
    #[arg(long, default_value_t = 0.2)]
    volume: f32,

    /// Enable the reverb on every instrument
    #[arg(long)]
    reverb: bool,

    /// Output device name (the default device if omitted)
    #[arg(long)]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Render to a WAV file instead of playing live
    #[arg(long)]
    export: Option<PathBuf>,

    /// Export length in seconds (default: song length + 5)
    #[arg(long)]
    seconds: Option<f64>,

    /// Export sample rate
    #[arg(long, default_value_t = 44100)]
    rate: u32,

    /// Export bit depth
    #[arg(long, default_value_t = 16)]
    bits: u16,
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    if args.list_devices {
        for device in list_output_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let score_path = args
        .score
        .as_deref()
        .ok_or("no score file given (try --help)")?;
    let source = std::fs::read_to_string(score_path)
        .map_err(|e| format!("could not read {}: {}", score_path.display(), e))?;
    let song =
        parse_song(&source).map_err(|e| format!("{}: {}", score_path.display(), e))?;

    log::info!(
        "loaded {}: {} bpm, {} parts, {:.1}s",
        score_path.display(),
        song.bpm,
        song.parts.len(),
        song.duration_seconds()
    );

    let params = AudioParams::new(args.rate);
    let names: Vec<&str> = args
        .instruments
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    if names.is_empty() {
        return Err("no instrument presets given".into());
    }
    if !song.parts.is_empty() && names.len() > song.parts.len() {
        return Err(format!(
            "{} instruments given but the song only has {} parts",
            names.len(),
            song.parts.len()
        ));
    }

    let mut instruments = Vec::with_capacity(song.parts.len());
    for part in 0..song.parts.len() {
        let name = names[part.min(names.len() - 1)];
        let mut instr = presets::by_name(name, &params)?;
        if args.reverb {
            instr.reverb = Some(Reverb::new(&params));
        }
        instruments.push(instr);
    }

    let song_seconds = song.duration_seconds();
    let mut player = Player::new(instruments, song, params)?;
    player.volume = args.volume.clamp(0.0, 1.0);

    if let Some(out_path) = &args.export {
        let seconds = args.seconds.unwrap_or(song_seconds + EXPORT_TAIL_SECONDS);
        return export_wav(out_path, &mut player, args.rate, args.bits, seconds);
    }

    let output = AudioOutput::start(player, args.device.as_deref(), AudioConfig::default())?;
    let handle = output.handle();
    let total = song_seconds + LIVE_TAIL_SECONDS;

    while handle.playhead() < total {
        std::thread::sleep(Duration::from_millis(50));
    }

    output.close();
    Ok(())
}
