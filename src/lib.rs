//! Polyphonic multi-instrument FM synthesis engine.
//!
//! A score of beat-quantised notes is dispatched onto pools of identical
//! voices, each of which evaluates an FM operator graph with feedback
//! through a double-buffered channel bus. Instrument output runs through a
//! biquad EQ and an optional feedback-delay-network reverb, is mixed to
//! mono, and leaves either through a cpal output stream or an offline WAV
//! render driven by the same pipeline.

pub mod audio;
pub mod export;
pub mod score;

pub use audio::engine::{AudioParams, Player, TIME_QUANTIZE};
pub use audio::instrument::{Instrument, BLOCK, FREQ_DOMAIN, N_CHANNELS, POLYPHONY};
pub use score::{Song, C0, DIVS_PER_BEAT};
