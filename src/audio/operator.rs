//! Static descriptions of FM graph nodes

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;

/// The closed set of oscillator shapes. A plain match in the voice loop
/// dispatches these; the loop is far too hot for dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    Noise,
}

/// How a received channel affects the operator's phase.
///
/// `Modulate` scales the incoming signal by the note frequency, turning a
/// unit-amplitude modulator into a proper frequency-modulation offset that
/// tracks pitch automatically. `Vibrato` behaves identically to `Normal` in
/// the sample loop; the tag is kept distinct so renderers can draw vibrato
/// routes differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveKind {
    Normal,
    Modulate,
    Vibrato,
}

/// One fan-in edge: read channel `source`, scale by `level`.
#[derive(Debug, Clone, Copy)]
pub struct Receive {
    pub source: usize,
    pub level: f32,
    pub kind: ReceiveKind,
}

/// One fan-out edge: add `level` times the operator's sample to channel
/// `dest`. Channel 0 is the voice's output bus.
#[derive(Debug, Clone, Copy)]
pub struct Send {
    pub dest: usize,
    pub level: f32,
}

/// A single FM operator: an oscillator, its envelope, and its channel
/// fan-in/fan-out. Operators are plain data, immutable during playback and
/// shared read-only by every voice of an instrument; all mutable state
/// (phase, bus contents) lives in the voice.
///
/// Feedback is expressed through the channels: an operator that sends to a
/// channel it also receives from reads its own previous frame's output.
#[derive(Debug, Clone)]
pub struct Operator {
    pub wave: Waveform,
    /// Frequency scale factor, or the absolute frequency in Hz when
    /// `fixed` is set.
    pub transpose: f32,
    /// Untie the oscillator from the note: frequency = `transpose` Hz.
    pub fixed: bool,
    pub envelope: Envelope,
    pub receives: Vec<Receive>,
    pub sends: Vec<Send>,
}

impl Operator {
    /// A sine operator tracking the note at `transpose` times its
    /// frequency, with no routing yet.
    pub fn new(transpose: f32, envelope: Envelope) -> Self {
        Operator {
            wave: Waveform::Sine,
            transpose,
            fixed: false,
            envelope,
            receives: Vec::new(),
            sends: Vec::new(),
        }
    }

    /// A fixed-frequency operator, e.g. an LFO: the oscillator runs at
    /// `hz` regardless of the note.
    pub fn fixed(hz: f32, envelope: Envelope) -> Self {
        Operator {
            wave: Waveform::Sine,
            transpose: hz,
            fixed: true,
            envelope,
            receives: Vec::new(),
            sends: Vec::new(),
        }
    }

    pub fn wave(mut self, wave: Waveform) -> Self {
        self.wave = wave;
        self
    }

    /// Adds a fan-in edge from channel `source`.
    pub fn receive(mut self, source: usize, level: f32, kind: ReceiveKind) -> Self {
        self.receives.push(Receive { source, level, kind });
        self
    }

    /// Adds a fan-out edge to channel `dest` (0 is the output bus).
    pub fn send(mut self, dest: usize, level: f32) -> Self {
        self.sends.push(Send { dest, level });
        self
    }
}
