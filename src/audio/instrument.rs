//! Instruments: pools of identical voices with shared post-processing

use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;

use super::engine::AudioParams;
use super::filter::Eq;
use super::operator::Operator;
use super::reverb::Reverb;
use super::spectrum::{SpectrumAnalyzer, SpectrumTap};
use super::voice::Voice;

/// Voices per instrument. Incoming notes beyond this are placed by
/// stealing, never dropped.
pub const POLYPHONY: usize = 8;

/// Channels in each voice's bus. Channel 0 is the output bus.
pub const N_CHANNELS: usize = 8;

/// Upper bound on operators per instrument.
pub const MAX_OPERATORS: usize = 8;

/// Frames per hold block. Voices are evaluated a block at a time and the
/// finished block doubles as the FFT analysis window.
pub const BLOCK: usize = 1024;

/// Bins in the real spectrum of one hold block.
pub const FREQ_DOMAIN: usize = BLOCK / 2 + 1;

/// Hold blocks buffered for the waveform monitor before overflow drops.
const WAVEFORM_TAP_BLOCKS: usize = 4;

/// Read side of an instrument's monitor taps, handed to the control
/// thread. The spectrum is atomic bins (tearing tolerated); the waveform is
/// an SPSC ring fed with each finished hold block.
pub struct InstrumentMonitor {
    pub spectrum: Arc<SpectrumTap>,
    // ringbuf consumers hold interior Cells, so the shared read side sits
    // behind a mutex. Only the control thread touches it.
    waveform: Mutex<ringbuf::HeapCons<f32>>,
}

impl InstrumentMonitor {
    /// Pops buffered waveform samples into `out`, returning how many were
    /// available. Blocks dropped on overflow are simply missing.
    pub fn read_waveform(&self, out: &mut [f32]) -> usize {
        self.waveform.lock().pop_slice(out)
    }
}

/// A bank of identical voices sharing one operator graph, plus the
/// instrument-wide post-processing: EQ, optional reverb, and the hold
/// buffer with its spectrum analysis.
///
/// Output is produced a block at a time: the voices each run [`BLOCK`]
/// frames into the back hold buffer, the EQ/reverb chain filters it in
/// place, the buffers swap, and single samples are then popped until the
/// block is exhausted.
pub struct Instrument {
    ops: Vec<Operator>,
    voices: Vec<Voice>,
    pub eq: Eq,
    pub reverb: Option<Reverb>,

    hold_buf: Vec<f32>,
    hold_buf_back: Vec<f32>,
    hold_index: usize,

    analyzer: SpectrumAnalyzer,
    tap: Arc<SpectrumTap>,
    waveform: Option<ringbuf::HeapProd<f32>>,
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("ops", &self.ops)
            .field("voices", &self.voices)
            .field("eq", &self.eq)
            .field("reverb", &self.reverb)
            .field("hold_index", &self.hold_index)
            .finish_non_exhaustive()
    }
}

impl Instrument {
    /// Builds an instrument around an operator graph. Every channel index
    /// the graph references is validated here; a bad index is a
    /// construction error, not a runtime one.
    pub fn new(ops: Vec<Operator>) -> Result<Self, String> {
        if ops.len() > MAX_OPERATORS {
            return Err(format!(
                "instrument has {} operators, the maximum is {}",
                ops.len(),
                MAX_OPERATORS
            ));
        }
        for (i, op) in ops.iter().enumerate() {
            for recv in &op.receives {
                if recv.source >= N_CHANNELS {
                    return Err(format!(
                        "operator {}: receive channel {} out of range (bus has {} channels)",
                        i, recv.source, N_CHANNELS
                    ));
                }
            }
            for send in &op.sends {
                if send.dest >= N_CHANNELS {
                    return Err(format!(
                        "operator {}: send channel {} out of range (bus has {} channels)",
                        i, send.dest, N_CHANNELS
                    ));
                }
            }
        }

        let voices = (0..POLYPHONY).map(|v| Voice::new(ops.len(), v as u64)).collect();

        Ok(Instrument {
            ops,
            voices,
            eq: Eq::new(),
            reverb: None,
            hold_buf: vec![0.0; BLOCK],
            hold_buf_back: vec![0.0; BLOCK],
            // Start exhausted so the first output request fills a block.
            hold_index: BLOCK,
            analyzer: SpectrumAnalyzer::new(),
            tap: SpectrumTap::new(),
            waveform: None,
        })
    }

    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voice_mut(&mut self, index: usize) -> &mut Voice {
        &mut self.voices[index]
    }

    /// Creates the monitor taps for this instrument. The returned handle is
    /// given to the control thread; the write sides stay here.
    pub fn monitor(&mut self) -> InstrumentMonitor {
        let rb = HeapRb::<f32>::new(BLOCK * WAVEFORM_TAP_BLOCKS);
        let (producer, consumer) = rb.split();
        self.waveform = Some(producer);
        InstrumentMonitor {
            spectrum: Arc::clone(&self.tap),
            waveform: Mutex::new(consumer),
        }
    }

    /// Re-designs the EQ and reverb for a new sample rate, e.g. when the
    /// export driver runs at a different rate than the live stream.
    pub fn retune(&mut self, params: &AudioParams) {
        self.eq.bake(params);
        if let Some(rv) = &mut self.reverb {
            rv.retune(params);
        }
    }

    /// Pops the next output sample, refilling the hold buffer when the
    /// current block is exhausted. `start_time` is the player clock at the
    /// moment of the call; a refill evaluates the whole next block from
    /// that base.
    pub fn next_output(&mut self, start_time: f64, params: &AudioParams) -> f32 {
        if self.hold_index >= BLOCK {
            self.fill_hold_block(start_time, params);
        }
        let sample = self.hold_buf[self.hold_index];
        self.hold_index += 1;
        sample
    }

    /// Runs every voice for one block, filters the sum in place, swaps the
    /// hold buffers, and publishes the finished block to the monitor taps.
    fn fill_hold_block(&mut self, start_time: f64, params: &AudioParams) {
        self.hold_buf_back.fill(0.0);

        for voice in &mut self.voices {
            voice.run_block(&self.ops, &mut self.hold_buf_back, start_time, params);
        }

        for sample in &mut self.hold_buf_back {
            let mut s = self.eq.run(*sample);
            if let Some(rv) = &mut self.reverb {
                s = rv.run(s);
            }
            *sample = s;
        }

        std::mem::swap(&mut self.hold_buf, &mut self.hold_buf_back);
        self.hold_index = 0;

        // Analysis feeds the visualiser only; atomic stores and a
        // non-blocking ring push, nothing that can stall the audio path.
        self.analyzer.analyze(&self.hold_buf, &self.tap);
        if let Some(producer) = &mut self.waveform {
            let _ = producer.push_slice(&self.hold_buf);
        }
    }

    /// Silences all voices and forces the next output request to render a
    /// fresh block.
    pub fn reset(&mut self) {
        for voice in &mut self.voices {
            voice.clear();
        }
        self.hold_buf.fill(0.0);
        self.hold_buf_back.fill(0.0);
        self.hold_index = BLOCK;
        if let Some(rv) = &mut self.reverb {
            rv.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::envelope::Envelope;
    use crate::audio::voice::PlayingNote;

    fn params() -> AudioParams {
        AudioParams::new(44100)
    }

    fn sine_ops() -> Vec<Operator> {
        vec![Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0)).send(0, 1.0)]
    }

    #[test]
    fn test_rejects_out_of_range_send() {
        let ops = vec![Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0)).send(N_CHANNELS, 1.0)];
        let err = Instrument::new(ops).unwrap_err();
        assert!(err.contains("send channel"), "unexpected error: {}", err);
    }

    #[test]
    fn test_rejects_out_of_range_receive() {
        let ops = vec![Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0))
            .receive(99, 1.0, crate::audio::operator::ReceiveKind::Normal)];
        assert!(Instrument::new(ops).is_err());
    }

    #[test]
    fn test_rejects_too_many_operators() {
        let ops: Vec<Operator> = (0..MAX_OPERATORS + 1)
            .map(|_| Operator::new(1.0, Envelope::new(0.0, 0.0, 1.0, 0.0)))
            .collect();
        assert!(Instrument::new(ops).is_err());
    }

    #[test]
    fn test_block_amortised_output() {
        let p = params();
        let mut instr = Instrument::new(sine_ops()).unwrap();
        instr.voice_mut(0).set_note(PlayingNote {
            freq: 440.0,
            start: 0.0,
            duration: 1.0,
            velocity: 1.0,
        });

        // Pull a block and a half of samples one at a time.
        let mut out = Vec::new();
        for i in 0..BLOCK + BLOCK / 2 {
            let t = i as f64 * p.dt;
            out.push(instr.next_output(t, &p));
        }

        let rms = (out[..441].iter().map(|x| (x * x) as f64).sum::<f64>() / 441.0).sqrt();
        assert!((rms - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {}", rms);
    }

    #[test]
    fn test_spectrum_tap_sees_the_tone() {
        let p = params();
        let mut instr = Instrument::new(sine_ops()).unwrap();
        let monitor = instr.monitor();
        instr.voice_mut(0).set_note(PlayingNote {
            // Exactly 10 cycles per hold block, so the energy lands in bin 10.
            freq: 10.0 * 44100.0 / BLOCK as f32,
            start: 0.0,
            duration: 1.0,
            velocity: 1.0,
        });

        for i in 0..BLOCK {
            let t = i as f64 * p.dt;
            instr.next_output(t, &p);
        }

        let mut bins = vec![0.0f32; FREQ_DOMAIN];
        monitor.spectrum.read(&mut bins);
        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 10);

        // The waveform tap buffered the same block.
        let mut wave = vec![0.0f32; BLOCK];
        assert_eq!(monitor.read_waveform(&mut wave), BLOCK);
    }

    #[test]
    fn test_reset_goes_silent() {
        let p = params();
        let mut instr = Instrument::new(sine_ops()).unwrap();
        instr.voice_mut(0).set_note(PlayingNote {
            freq: 440.0,
            start: 0.0,
            duration: 1.0,
            velocity: 1.0,
        });
        instr.next_output(0.0, &p);
        instr.reset();

        for i in 0..BLOCK {
            assert_eq!(instr.next_output(i as f64 * p.dt, &p), 0.0);
        }
    }
}
