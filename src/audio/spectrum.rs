//! FFT spectrum analysis of instrument hold blocks

use realfft::{RealFftPlanner, RealToComplex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::instrument::{BLOCK, FREQ_DOMAIN};

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

/// Lock-free spectrum hand-off between the audio thread and a reader.
///
/// Bin magnitudes are stored as f32 bit patterns in atomics. Writes happen
/// once per finished hold block; reads can interleave freely. A reader may
/// observe bins from two adjacent blocks at once; that tearing is
/// acceptable for visualisation and the next read heals it.
pub struct SpectrumTap {
    bins: [AtomicU32; FREQ_DOMAIN],
}

impl SpectrumTap {
    pub fn new() -> Arc<Self> {
        const ZERO: AtomicU32 = AtomicU32::new(0);
        Arc::new(SpectrumTap {
            bins: [ZERO; FREQ_DOMAIN],
        })
    }

    /// Read all bin magnitudes into `out` (truncated to the shorter of the
    /// two lengths). Returns how many bins were written.
    pub fn read(&self, out: &mut [f32]) -> usize {
        let n = out.len().min(FREQ_DOMAIN);
        for (slot, bin) in out.iter_mut().zip(&self.bins).take(n) {
            *slot = u32_to_f32(bin.load(Ordering::Relaxed));
        }
        n
    }

    /// Magnitude of a single bin.
    pub fn bin(&self, index: usize) -> f32 {
        u32_to_f32(self.bins[index].load(Ordering::Relaxed))
    }

    fn publish(&self, magnitudes: &[f32]) {
        for (bin, &mag) in self.bins.iter().zip(magnitudes) {
            bin.store(f32_to_u32(mag), Ordering::Relaxed);
        }
    }
}

/// Real-FFT analyzer sized to the instrument hold block.
///
/// The transform is planned once and all working memory is pre-allocated,
/// so `analyze` never allocates on the audio path.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<realfft::num_complex::Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(BLOCK);
        let spectrum = fft.make_output_vec();
        debug_assert_eq!(spectrum.len(), FREQ_DOMAIN);

        SpectrumAnalyzer {
            fft,
            input: vec![0.0; BLOCK],
            spectrum,
            magnitudes: vec![0.0; FREQ_DOMAIN],
        }
    }

    /// Transforms one hold block and publishes the bin magnitudes through
    /// `tap`. The block is copied first: realfft scrambles its input and
    /// the caller still owns the hold buffer.
    pub fn analyze(&mut self, block: &[f32], tap: &SpectrumTap) {
        self.input.copy_from_slice(block);
        if self.fft.process(&mut self.input, &mut self.spectrum).is_err() {
            return;
        }
        for (mag, c) in self.magnitudes.iter_mut().zip(&self.spectrum) {
            *mag = c.norm();
        }
        tap.publish(&self.magnitudes);
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_tone_lands_in_its_bin() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = SpectrumTap::new();

        // 32 cycles across the block: all energy in bin 32.
        let block: Vec<f32> = (0..BLOCK)
            .map(|i| (std::f32::consts::TAU * 32.0 * i as f32 / BLOCK as f32).sin())
            .collect();
        analyzer.analyze(&block, &tap);

        let mut bins = vec![0.0f32; FREQ_DOMAIN];
        assert_eq!(tap.read(&mut bins), FREQ_DOMAIN);

        let peak = bins
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 32);
        assert!(bins[32] > 100.0 * bins[100]);
    }

    #[test]
    fn test_silent_block_publishes_zeros() {
        let mut analyzer = SpectrumAnalyzer::new();
        let tap = SpectrumTap::new();
        analyzer.analyze(&vec![0.0; BLOCK], &tap);

        let mut bins = vec![0.0f32; FREQ_DOMAIN];
        tap.read(&mut bins);
        assert!(bins.iter().all(|&b| b == 0.0));
    }
}
