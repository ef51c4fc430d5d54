//! Offline rendering of a player into a RIFF/WAVE file
//!
//! The export driver owns the player for the duration of the render and
//! pushes it through the same quantised scheduling and mixing pipeline the
//! live callback uses, just against a file clock instead of the device's.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio::engine::Player;

/// Frames between progress reports during an export.
pub const WAV_CHUNK_SIZE: usize = 65536;

/// Renders `seconds` of the player into a mono 16-bit PCM WAV at
/// `sample_rate`. The player is rewound first and re-tuned if the render
/// rate differs from its current rate.
pub fn export_wav(
    path: &Path,
    player: &mut Player,
    sample_rate: u32,
    bits_per_sample: u16,
    seconds: f64,
) -> Result<(), String> {
    if bits_per_sample != 16 {
        return Err(format!(
            "only 16-bit export is supported, got {} bits per sample",
            bits_per_sample
        ));
    }

    if player.params().sample_rate != sample_rate {
        player.set_sample_rate(sample_rate);
    }
    player.reset();

    let num_samples = (sample_rate as f64 * seconds) as usize;
    log::info!(
        "exporting {} frames ({:.1}s at {} Hz) to {}",
        num_samples,
        seconds,
        sample_rate,
        path.display()
    );

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| format!("could not create {}: {}", path.display(), e))?;

    for frame in 0..num_samples {
        let sample = player.next_sample();
        // Float-to-int casts saturate, so a hot mix clips instead of
        // wrapping.
        let pcm = (sample * 32767.0) as i16;
        writer
            .write_sample(pcm)
            .map_err(|e| format!("write to {} failed: {}", path.display(), e))?;

        if (frame + 1) % WAV_CHUNK_SIZE == 0 {
            log::info!(
                "{:.1}s/{:.1}s ({:.0}%)",
                (frame + 1) as f64 / sample_rate as f64,
                seconds,
                100.0 * (frame + 1) as f64 / num_samples as f64
            );
        }
    }

    writer
        .finalize()
        .map_err(|e| format!("could not finalise {}: {}", path.display(), e))?;

    log::info!("written output to {}", path.display());
    Ok(())
}
