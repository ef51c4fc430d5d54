//! The synthesis engine
//!
//! - FM operator graphs evaluated per voice over a double-buffered bus
//! - Polyphonic instruments with EQ, reverb and spectrum analysis
//! - A quantised note scheduler driving the voices from the score
//! - Real-time output through cpal with a lock-free control handle

pub mod device;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod instrument;
pub mod operator;
pub mod presets;
pub mod reverb;
pub mod spectrum;
pub mod voice;
