//! The player: instruments, playhead, quantised note dispatch, and the
//! real-time output stream

use cpal::traits::{DeviceTrait, StreamTrait};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::device::{get_output_device, get_supported_config, AudioConfig};
use super::instrument::{Instrument, InstrumentMonitor};
use super::voice::PlayingNote;
use crate::score::Song;

/// Scheduling quanta per second of audio: note dispatch re-runs every
/// `sample_rate / TIME_QUANTIZE` frames (~43 Hz at 44.1 kHz).
pub const TIME_QUANTIZE: u32 = 1024;

/// Timing context threaded through every sample producer. There is no
/// global sample-rate record; whoever drives the engine owns one of these
/// and passes it down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    /// Seconds per frame, `1 / sample_rate`.
    pub dt: f64,
}

impl AudioParams {
    pub fn new(sample_rate: u32) -> Self {
        AudioParams {
            sample_rate,
            dt: 1.0 / sample_rate as f64,
        }
    }
}

/// Current state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// The playback core: owns the instruments, the song, the playhead and the
/// quantised scheduler. It has no thread of its own; the cpal callback
/// drives it live through [`AudioOutput`], and the export driver drives the
/// very same struct from an offline clock.
pub struct Player {
    params: AudioParams,
    instruments: Vec<Instrument>,
    song: Song,
    /// Beats per second; note grid positions scale through this into real
    /// time.
    bps: f64,
    /// Output level, 0 silent to 1 full.
    pub volume: f32,
    /// Playhead position in seconds.
    playhead: f64,
    /// Index of the next undispatched note, per part.
    next_notes: Vec<usize>,
    quantize_counter: u32,
    frames_per_quantum: u32,
}

impl Player {
    /// Binds `song.parts[i]` to `instruments[i]`. The counts must match;
    /// a part without an instrument could never sound and an instrument
    /// without a part could never be played.
    pub fn new(
        instruments: Vec<Instrument>,
        song: Song,
        params: AudioParams,
    ) -> Result<Self, String> {
        if instruments.len() != song.parts.len() {
            return Err(format!(
                "song has {} parts but {} instruments were provided",
                song.parts.len(),
                instruments.len()
            ));
        }

        let frames_per_quantum = (params.sample_rate / TIME_QUANTIZE).max(1);
        let next_notes = vec![0; song.parts.len()];
        let bps = song.bps();

        Ok(Player {
            params,
            instruments,
            song,
            bps,
            volume: 1.0,
            playhead: 0.0,
            next_notes,
            // Saturated so the very first frame runs a dispatch.
            quantize_counter: frames_per_quantum,
            frames_per_quantum,
        })
    }

    pub fn params(&self) -> &AudioParams {
        &self.params
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instruments_mut(&mut self) -> &mut [Instrument] {
        &mut self.instruments
    }

    /// Re-times the engine for a new sample rate, re-designing every
    /// sample-rate-dependent filter. The export driver uses this when the
    /// requested render rate differs from the live rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.params = AudioParams::new(sample_rate);
        self.frames_per_quantum = (sample_rate / TIME_QUANTIZE).max(1);
        for instr in &mut self.instruments {
            instr.retune(&self.params);
        }
    }

    /// Rewinds to the top of the song: playhead at zero, all parts back at
    /// their first note, every voice silenced.
    pub fn reset(&mut self) {
        self.playhead = 0.0;
        self.quantize_counter = self.frames_per_quantum;
        self.next_notes.iter_mut().for_each(|n| *n = 0);
        for instr in &mut self.instruments {
            instr.reset();
        }
    }

    /// Dispatches every note that starts inside the window
    /// `[playhead, playhead + dq)` onto a voice of its part's instrument.
    ///
    /// Voice choice: a voice already sounding the same frequency is
    /// re-triggered; otherwise the voice whose envelope finished longest
    /// ago (the least audible one) is stolen. Notes are never dropped.
    ///
    /// Late dispatch is corrected: the voice starts at the playhead but its
    /// held time is shortened by the lateness, so the release still lands
    /// where the score asked for it. Calling this again without moving the
    /// playhead is a no-op, since `next_notes` only moves forward.
    pub fn schedule(&mut self, dq: f64) {
        for (i, instr) in self.instruments.iter_mut().enumerate() {
            let part = &self.song.parts[i];

            while self.next_notes[i] < part.notes.len() {
                let note = part.notes[self.next_notes[i]];
                if note.start_beats() >= (self.playhead + dq) * self.bps {
                    break;
                }

                let freq = note.freq();
                let mut steal = 0;
                let mut earliest_finish = f64::MAX;
                for (v, voice) in instr.voices().iter().enumerate() {
                    if voice.note.freq == freq {
                        steal = v;
                        break;
                    }
                    let finish = voice.note.finish();
                    if finish < earliest_finish {
                        earliest_finish = finish;
                        steal = v;
                    }
                }

                let error = self.playhead - note.start_seconds(self.bps);
                instr.voice_mut(steal).set_note(PlayingNote {
                    freq,
                    start: self.playhead,
                    duration: note.duration_seconds(self.bps) - error,
                    velocity: note.velocity,
                });

                self.next_notes[i] += 1;
            }
        }
    }

    /// Produces the next mono output sample, running the scheduler at
    /// quantum boundaries and advancing the playhead.
    pub fn next_sample(&mut self) -> f32 {
        if self.quantize_counter >= self.frames_per_quantum {
            self.schedule(self.frames_per_quantum as f64 * self.params.dt);
            self.quantize_counter = 0;
        }
        self.quantize_counter += 1;

        let mut sample = 0.0f32;
        for instr in &mut self.instruments {
            sample += instr.next_output(self.playhead, &self.params);
        }
        self.playhead += self.params.dt;

        sample * self.volume
    }

    /// Fills `out` with consecutive mono samples.
    pub fn fill(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }
}

/// Helper to store f32 in AtomicU32
#[inline]
fn f32_to_u32(f: f32) -> u32 {
    f.to_bits()
}

/// Helper to load f32 from AtomicU32
#[inline]
fn u32_to_f32(u: u32) -> f32 {
    f32::from_bits(u)
}

/// State shared between the audio callback and the control thread. Flags
/// and the volume flow control → audio; the playhead mirror flows audio →
/// control. Everything is an atomic; the callback never takes a lock.
struct SharedState {
    playing: AtomicBool,
    paused: AtomicBool,
    volume: AtomicU32,
    playhead_bits: AtomicU64,
}

/// Cloneable control surface for a running [`AudioOutput`], safe to hand to
/// any thread.
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<SharedState>,
    monitors: Arc<Vec<InstrumentMonitor>>,
}

impl PlayerHandle {
    /// Silences the output without stopping the device stream. Use
    /// [`AudioOutput::pause`] to also halt the device.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Asks the audio callback to go permanently silent. The stream itself
    /// is torn down by dropping or closing the [`AudioOutput`].
    pub fn stop(&self) {
        self.shared.playing.store(false, Ordering::SeqCst);
    }

    pub fn state(&self) -> TransportState {
        if !self.shared.playing.load(Ordering::SeqCst) {
            TransportState::Stopped
        } else if self.shared.paused.load(Ordering::SeqCst) {
            TransportState::Paused
        } else {
            TransportState::Playing
        }
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume
            .store(f32_to_u32(volume.clamp(0.0, 1.0)), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        u32_to_f32(self.shared.volume.load(Ordering::Relaxed))
    }

    /// Playhead position in seconds, as last published by the audio
    /// thread.
    pub fn playhead(&self) -> f64 {
        f64::from_bits(self.shared.playhead_bits.load(Ordering::Relaxed))
    }

    /// Per-instrument monitor taps (spectrum and waveform), index-aligned
    /// with the player's instruments.
    pub fn monitors(&self) -> &[InstrumentMonitor] {
        &self.monitors
    }
}

/// A [`Player`] running live on a cpal output stream.
///
/// Construction moves the player onto the audio thread; afterwards the
/// engine is reachable only through the lock-free [`PlayerHandle`].
/// Reconfiguring instruments or swapping songs means building a new
/// player; nothing can reach into a running graph.
pub struct AudioOutput {
    stream: cpal::Stream,
    handle: PlayerHandle,
    sample_rate: u32,
}

impl AudioOutput {
    /// Opens the output device and starts playback immediately.
    pub fn start(
        mut player: Player,
        device_name: Option<&str>,
        config: AudioConfig,
    ) -> Result<Self, String> {
        let device = get_output_device(device_name)?;
        let stream_config = get_supported_config(&device, &config)?;

        let sample_rate = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;

        log::info!("starting audio output: {} Hz, {} channels", sample_rate, channels);

        if player.params().sample_rate != sample_rate {
            player.set_sample_rate(sample_rate);
        }

        let monitors: Vec<InstrumentMonitor> = player
            .instruments_mut()
            .iter_mut()
            .map(|instr| instr.monitor())
            .collect();

        let shared = Arc::new(SharedState {
            playing: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            volume: AtomicU32::new(f32_to_u32(player.volume)),
            playhead_bits: AtomicU64::new(0.0f64.to_bits()),
        });
        let shared_cb = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let playing = shared_cb.playing.load(Ordering::SeqCst);
                    let paused = shared_cb.paused.load(Ordering::SeqCst);
                    if !playing || paused {
                        data.fill(0.0);
                        return;
                    }

                    player.volume = u32_to_f32(shared_cb.volume.load(Ordering::Relaxed));

                    for frame in data.chunks_mut(channels) {
                        let mut sample = player.next_sample();
                        // Output limiter: a runaway feedback patch must not
                        // reach the device as NaN or full-scale garbage.
                        if !sample.is_finite() {
                            sample = 0.0;
                        } else {
                            sample = sample.clamp(-1.0, 1.0);
                        }
                        // Mono engine: every device channel gets the same
                        // sample.
                        for slot in frame.iter_mut() {
                            *slot = sample;
                        }
                    }

                    shared_cb
                        .playhead_bits
                        .store(player.playhead().to_bits(), Ordering::Relaxed);
                },
                move |err| {
                    log::error!("audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| format!("failed to build output stream: {}", e))?;

        stream
            .play()
            .map_err(|e| format!("failed to start stream: {}", e))?;

        Ok(AudioOutput {
            stream,
            handle: PlayerHandle {
                shared,
                monitors: Arc::new(monitors),
            },
            sample_rate,
        })
    }

    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Pauses both the engine and the device stream.
    pub fn pause(&self) -> Result<(), String> {
        self.handle.pause();
        self.stream
            .pause()
            .map_err(|e| format!("failed to pause stream: {}", e))
    }

    pub fn resume(&self) -> Result<(), String> {
        self.handle.resume();
        self.stream
            .play()
            .map_err(|e| format!("failed to resume stream: {}", e))
    }

    /// Stops playback and tears the stream down. Dropping the stream joins
    /// the device callback, so when this returns the audio thread has
    /// observed the stop.
    pub fn close(self) {
        self.handle.stop();
        drop(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::envelope::Envelope;
    use crate::audio::instrument::POLYPHONY;
    use crate::audio::operator::Operator;
    use crate::score::{Note, Part, Song};

    fn sine_instrument() -> Instrument {
        let ops = vec![Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0)).send(0, 1.0)];
        Instrument::new(ops).unwrap()
    }

    fn note(pitch: i32, beat: u32, division: u32, duration: u32) -> Note {
        Note {
            pitch,
            beat,
            division,
            duration,
            velocity: 1.0,
        }
    }

    fn one_part_song(notes: Vec<Note>) -> Song {
        Song {
            bpm: 120,
            beats_per_bar: 4,
            parts: vec![Part { notes }],
        }
    }

    #[test]
    fn test_part_instrument_count_mismatch() {
        let song = Song::empty(120, 2);
        assert!(Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).is_err());
    }

    #[test]
    fn test_quantised_dispatch_timing() {
        // Two whole-beat notes at 120 bpm: the first spans [0, 0.5), the
        // second [0.5, 1.0).
        let song = one_part_song(vec![note(60, 0, 0, 32), note(67, 1, 0, 32)]);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        // Run 1.2 seconds of audio so both notes dispatch.
        let mut out = vec![0.0f32; 52920];
        player.fill(&mut out);

        let first_freq = note(60, 0, 0, 32).freq();
        let second_freq = note(67, 1, 0, 32).freq();
        // One dispatch window, ~23 ms at 44.1 kHz.
        let quantum = TIME_QUANTIZE as f64 / 44100.0;

        let voices = player.instruments()[0].voices();
        let first = voices.iter().find(|v| v.note.freq == first_freq).unwrap();
        let second = voices.iter().find(|v| v.note.freq == second_freq).unwrap();

        // The first note is dispatched by the very first quantum, before
        // any lateness accrues.
        assert_eq!(first.note.start, 0.0);
        assert!((first.note.duration - 0.5).abs() < 1e-9);

        // The second starts within one quantum of its musical position and
        // the timing correction makes its release land at exactly 1.0 s.
        assert!(
            (second.note.start - 0.5).abs() <= quantum + 1e-9,
            "start {}",
            second.note.start
        );
        assert!(
            (second.note.finish() - 1.0).abs() < 1e-9,
            "finish {}",
            second.note.finish()
        );
    }

    #[test]
    fn test_dispatch_is_idempotent_per_quantum() {
        let song = one_part_song(vec![note(60, 0, 0, 32), note(67, 4, 0, 32)]);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        player.schedule(0.1);
        assert_eq!(player.next_notes[0], 1);
        let notes_after_first: Vec<_> = player.instruments()[0]
            .voices()
            .iter()
            .map(|v| v.note)
            .collect();

        // Same playhead, same window: nothing changes.
        player.schedule(0.1);
        assert_eq!(player.next_notes[0], 1);
        for (before, voice) in notes_after_first.iter().zip(player.instruments()[0].voices()) {
            assert_eq!(before.freq, voice.note.freq);
            assert_eq!(before.start, voice.note.start);
        }
    }

    #[test]
    fn test_next_note_index_is_monotonic() {
        let song = one_part_song((0..20).map(|b| note(60, b, 0, 16)).collect());
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        let mut last = 0;
        let mut out = vec![0.0f32; 1024];
        for _ in 0..50 {
            player.fill(&mut out);
            let current = player.next_notes[0];
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn test_same_pitch_retriggers_same_voice() {
        let target = note(60, 0, 0, 32);
        let song = one_part_song(vec![target]);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        // All voices busy with distinct pitches; voice 5 holds the target
        // frequency.
        for v in 0..POLYPHONY {
            let freq = if v == 5 { target.freq() } else { 100.0 + v as f32 };
            player.instruments_mut()[0].voice_mut(v).set_note(PlayingNote {
                freq,
                start: 0.0,
                duration: 10.0,
                velocity: 0.5,
            });
        }

        player.schedule(1.0);

        let stolen = &player.instruments()[0].voices()[5];
        assert_eq!(stolen.note.freq, target.freq());
        assert_eq!(stolen.note.velocity, 1.0, "voice 5 was not re-triggered");
    }

    #[test]
    fn test_overflow_steals_least_audible_voice() {
        let song = one_part_song(vec![note(72, 0, 0, 32)]);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        // Distinct pitches everywhere; voice 2 finished longest ago.
        for v in 0..POLYPHONY {
            player.instruments_mut()[0].voice_mut(v).set_note(PlayingNote {
                freq: 100.0 + v as f32,
                start: 0.0,
                duration: if v == 2 { 0.25 } else { 2.0 + v as f64 },
                velocity: 0.5,
            });
        }

        player.schedule(1.0);

        let target_freq = note(72, 0, 0, 32).freq();
        assert_eq!(player.instruments()[0].voices()[2].note.freq, target_freq);
    }

    #[test]
    fn test_reset_rewinds_everything() {
        let song = one_part_song(vec![note(60, 0, 0, 32)]);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        let mut out = vec![0.0f32; 4096];
        player.fill(&mut out);
        assert!(player.playhead() > 0.0);
        assert_eq!(player.next_notes[0], 1);

        player.reset();
        assert_eq!(player.playhead(), 0.0);
        assert_eq!(player.next_notes[0], 0);
        assert!(player.instruments()[0]
            .voices()
            .iter()
            .all(|v| v.note.freq == 0.0));
    }

    #[test]
    fn test_empty_part_is_skipped() {
        let song = Song::empty(120, 1);
        let mut player =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();

        let mut out = vec![0.0f32; 8192];
        player.fill(&mut out);
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_volume_scales_output() {
        let song = one_part_song(vec![note(60, 0, 0, 32)]);
        let mut loud =
            Player::new(vec![sine_instrument()], song.clone(), AudioParams::new(44100)).unwrap();
        let mut quiet =
            Player::new(vec![sine_instrument()], song, AudioParams::new(44100)).unwrap();
        quiet.volume = 0.5;

        let mut a = vec![0.0f32; 1024];
        let mut b = vec![0.0f32; 1024];
        loud.fill(&mut a);
        quiet.fill(&mut b);

        for (x, y) in a.iter().zip(&b) {
            assert!((x * 0.5 - y).abs() < 1e-6);
        }
    }
}
