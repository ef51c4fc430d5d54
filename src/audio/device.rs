//! Output device selection for a mono engine
//!
//! The engine produces a single logical channel and the callback fans the
//! same sample into every channel of the device frame. Negotiation here
//! therefore only has to settle a sample rate and a buffer size; the
//! channel count is a layout detail, never a constraint.

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};

/// One entry of [`list_output_devices`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

/// Requested stream settings.
///
/// `fan_out` is not a signal channel count: it is how many device channels
/// the one mono sample should be duplicated into, and only steers which of
/// the device's layouts gets picked when several can run at the requested
/// rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Preferred number of device channels to fan the mono sample into.
    pub fan_out: u16,
    pub buffer_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            // Most devices are stereo; the same sample in both ears.
            fan_out: 2,
            buffer_size: 512,
        }
    }
}

/// Enumerates the output devices of the default host.
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>, String> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| format!("could not enumerate output devices: {}", e))?;

    let mut found = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        found.push(AudioDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
        });
    }

    Ok(found)
}

/// Looks an output device up by name; `None` means the default device.
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, String> {
    let host = cpal::default_host();

    let Some(wanted) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| "no default output device found".to_string());
    };

    host.output_devices()
        .map_err(|e| format!("could not enumerate output devices: {}", e))?
        .find(|device| device.name().map_or(false, |n| n == wanted))
        .ok_or_else(|| format!("output device '{}' not found", wanted))
}

/// Settles a stream config for `device`.
///
/// Every layout the device offers can carry the engine's output, since the
/// callback duplicates its one sample across the frame. Among the layouts
/// that support the requested rate, the one closest to the requested
/// fan-out wins, narrower on a tie (extra channels are just copies). When
/// no layout covers the rate, the device default is used exactly as
/// reported. It is deliberately not clamped down to stereo: a mono engine
/// has no channel budget to protect, and writing the same sample into a
/// wide layout costs copies, not correctness.
pub fn get_supported_config(
    device: &cpal::Device,
    preferred: &AudioConfig,
) -> Result<cpal::StreamConfig, String> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| format!("could not query output configs: {}", e))?;

    let fan_out_distance =
        |channels: u16| (channels as i32 - preferred.fan_out as i32).abs();

    let mut best: Option<cpal::SupportedStreamConfigRange> = None;
    for range in ranges {
        let covers_rate = range.min_sample_rate().0 <= preferred.sample_rate
            && preferred.sample_rate <= range.max_sample_rate().0;
        if !covers_rate {
            continue;
        }

        let closer = match &best {
            None => true,
            Some(current) => {
                let (a, b) = (fan_out_distance(range.channels()), fan_out_distance(current.channels()));
                a < b || (a == b && range.channels() < current.channels())
            }
        };
        if closer {
            best = Some(range);
        }
    }

    if let Some(range) = best {
        return Ok(cpal::StreamConfig {
            channels: range.channels(),
            sample_rate: cpal::SampleRate(preferred.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(preferred.buffer_size),
        });
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| format!("could not query the default output config: {}", e))?;

    Ok(cpal::StreamConfig {
        channels: fallback.channels(),
        sample_rate: fallback.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    })
}
