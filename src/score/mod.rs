//! The score model: songs, parts and beat-quantised notes

mod parse;

pub use parse::{parse_song, ParseError};

/// Subdivisions of one beat on the note grid.
pub const DIVS_PER_BEAT: u32 = 32;

/// Frequency of the reference C0 in Hz. Note pitches are signed semitone
/// offsets from this.
pub const C0: f32 = 16.3516;

/// One note on the beat grid. Positions and lengths are integers on the
/// grid; conversion to seconds happens against the player's beats-per-
/// second at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// Semitone offset from [`C0`]; may be negative.
    pub pitch: i32,
    /// Beat the note starts in.
    pub beat: u32,
    /// Subdivision within the beat, `0..DIVS_PER_BEAT`.
    pub division: u32,
    /// Length in subdivisions.
    pub duration: u32,
    /// Loudness in [0, 1].
    pub velocity: f32,
}

impl Note {
    pub fn freq(&self) -> f32 {
        C0 * 2.0f32.powf(self.pitch as f32 / 12.0)
    }

    pub fn start_beats(&self) -> f64 {
        self.beat as f64 + self.division as f64 / DIVS_PER_BEAT as f64
    }

    pub fn start_seconds(&self, bps: f64) -> f64 {
        self.start_beats() / bps
    }

    pub fn duration_seconds(&self, bps: f64) -> f64 {
        (self.duration as f64 / DIVS_PER_BEAT as f64) / bps
    }

    pub fn end_beats(&self) -> f64 {
        self.start_beats() + self.duration as f64 / DIVS_PER_BEAT as f64
    }
}

/// The notes played by one instrument, sorted by start time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Part {
    pub notes: Vec<Note>,
}

/// A full song: tempo plus one part per instrument. Part `i` is bound to
/// instrument `i` by the player.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub bpm: u32,
    /// For bar-line display; the text format does not carry it.
    pub beats_per_bar: u32,
    pub parts: Vec<Part>,
}

impl Song {
    pub fn bps(&self) -> f64 {
        self.bpm as f64 / 60.0
    }

    /// End of the last note, in beats.
    pub fn duration_beats(&self) -> f64 {
        self.parts
            .iter()
            .flat_map(|p| p.notes.iter())
            .map(|n| n.end_beats())
            .fold(0.0, f64::max)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_beats() / self.bps()
    }

    /// An empty song at the given tempo; useful as a placeholder when
    /// nothing is loaded.
    pub fn empty(bpm: u32, parts: usize) -> Self {
        Song {
            bpm,
            beats_per_bar: 4,
            parts: vec![Part::default(); parts],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_to_freq() {
        // Pitch 57 is A above middle C at standard C0.
        let note = Note {
            pitch: 57,
            beat: 0,
            division: 0,
            duration: 32,
            velocity: 1.0,
        };
        assert!((note.freq() - 440.0).abs() < 0.5, "freq {}", note.freq());

        // One octave is a doubling.
        let low = Note { pitch: 45, ..note };
        assert!((note.freq() / low.freq() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_grid_timing() {
        // At 120 bpm a whole beat lasts half a second.
        let note = Note {
            pitch: 60,
            beat: 1,
            division: 16,
            duration: 32,
            velocity: 1.0,
        };
        let bps = 2.0;
        assert_eq!(note.start_beats(), 1.5);
        assert_eq!(note.start_seconds(bps), 0.75);
        assert_eq!(note.duration_seconds(bps), 0.5);
    }

    #[test]
    fn test_song_duration() {
        let mut song = Song::empty(120, 2);
        song.parts[0].notes.push(Note {
            pitch: 60,
            beat: 0,
            division: 0,
            duration: 32,
            velocity: 1.0,
        });
        song.parts[1].notes.push(Note {
            pitch: 67,
            beat: 3,
            division: 0,
            duration: 16,
            velocity: 1.0,
        });
        assert_eq!(song.duration_beats(), 3.5);
        assert_eq!(song.duration_seconds(), 1.75);
    }
}
