//! Direct-form-I biquad filters and the per-instrument EQ chain

use super::engine::AudioParams;

/// Maximum number of peaking filters an EQ will accept.
pub const EQ_MAX_PEAKS: usize = 8;

const PI: f64 = std::f64::consts::PI;

/// A two-pole, two-zero IIR filter in direct form I.
///
/// `a` is the denominator and `b` the numerator; `a[0]` is ignored and
/// assumed to be 1, since the design functions fold it into the remaining
/// coefficients. Design formulas follow the RBJ Audio EQ Cookbook.
#[derive(Debug, Clone)]
pub struct Biquad {
    a: [f64; 3],
    b: [f64; 3],
    // x[0] is the current input, x[1..] the previous two; likewise for the
    // outputs in y. y[0] is only meaningful after run().
    x: [f32; 3],
    y: [f32; 3],
}

impl Biquad {
    /// A biquad with zeroed state. The coefficients start as a passthrough
    /// and are overwritten by one of the design methods.
    pub fn new() -> Self {
        let mut bq = Biquad {
            a: [1.0, 0.0, 0.0],
            b: [1.0, 0.0, 0.0],
            x: [0.0; 3],
            y: [0.0; 3],
        };
        bq.passthrough();
        bq
    }

    /// Leaves the input untouched.
    pub fn passthrough(&mut self) {
        self.gain(1.0);
    }

    /// A flat gain with no memory.
    pub fn gain(&mut self, gain: f64) {
        self.b = [gain, 0.0, 0.0];
        self.a = [1.0, 0.0, 0.0];
    }

    /// Second-order lowpass at `hz` with resonance `q`.
    pub fn lowpass(&mut self, hz: f64, q: f64, params: &AudioParams) {
        let w = 2.0 * PI * hz * params.dt;
        let alpha = w.sin() / (2.0 * q);
        let cos_w = w.cos();

        let a0 = 1.0 + alpha;
        self.b = [
            (1.0 - cos_w) / 2.0 / a0,
            (1.0 - cos_w) / a0,
            (1.0 - cos_w) / 2.0 / a0,
        ];
        self.a = [a0, (-2.0 * cos_w) / a0, (1.0 - alpha) / a0];
    }

    /// Second-order highpass at `hz` with resonance `q`.
    pub fn highpass(&mut self, hz: f64, q: f64, params: &AudioParams) {
        let w = 2.0 * PI * hz * params.dt;
        let alpha = w.sin() / (2.0 * q);
        let cos_w = w.cos();

        let a0 = 1.0 + alpha;
        self.b = [
            (1.0 + cos_w) / 2.0 / a0,
            -(1.0 + cos_w) / a0,
            (1.0 + cos_w) / 2.0 / a0,
        ];
        self.a = [a0, (-2.0 * cos_w) / a0, (1.0 - alpha) / a0];
    }

    /// Peaking filter at `hz` with width `q` and linear amplitude `a`.
    pub fn peak(&mut self, hz: f64, q: f64, a: f64, params: &AudioParams) {
        let w = 2.0 * PI * hz * params.dt;
        let alpha = w.sin() / (2.0 * q);
        let cos_w = w.cos();

        let a0 = 1.0 + alpha / a;
        self.b = [
            (1.0 + alpha * a) / a0,
            (-2.0 * cos_w) / a0,
            (1.0 - alpha * a) / a0,
        ];
        self.a = [a0, (-2.0 * cos_w) / a0, (1.0 - alpha / a) / a0];
    }

    /// Pushes `x0` into the input history and runs the filter, returning
    /// the next output sample.
    pub fn run(&mut self, x0: f32) -> f32 {
        self.x[2] = self.x[1];
        self.x[1] = self.x[0];
        self.x[0] = x0;

        let y0 = (self.b[0] * self.x[0] as f64
            + self.b[1] * self.x[1] as f64
            + self.b[2] * self.x[2] as f64
            - self.a[1] * self.y[0] as f64
            - self.a[2] * self.y[1] as f64) as f32;

        self.y[2] = self.y[1];
        self.y[1] = self.y[0];
        self.y[0] = y0;

        y0
    }

    /// Clears the input/output history, keeping the coefficients.
    pub fn reset(&mut self) {
        self.x = [0.0; 3];
        self.y = [0.0; 3];
    }
}

impl Default for Biquad {
    fn default() -> Self {
        Self::new()
    }
}

/// Design parameters for one EQ section, kept so the chain can be re-baked
/// at a different sample rate.
#[derive(Debug, Clone, Copy)]
struct Section {
    hz: f64,
    q: f64,
    a: f64,
}

/// A per-instrument equaliser: an optional lowpass, an optional highpass
/// and up to [`EQ_MAX_PEAKS`] peaking filters, applied in that order, then
/// an output gain.
///
/// The filters are described first and materialised into biquads by
/// [`Eq::bake`]; running an unbaked EQ passes the signal through untouched
/// apart from the gain.
#[derive(Debug, Clone)]
pub struct Eq {
    lowpass: Option<Section>,
    highpass: Option<Section>,
    peaks: Vec<Section>,
    biquads: Vec<Biquad>,
    pub gain: f32,
}

impl Eq {
    pub fn new() -> Self {
        Eq {
            lowpass: None,
            highpass: None,
            peaks: Vec::with_capacity(EQ_MAX_PEAKS),
            biquads: Vec::new(),
            gain: 1.0,
        }
    }

    pub fn lowpass(&mut self, hz: f64, q: f64) {
        self.lowpass = Some(Section { hz, q, a: 1.0 });
    }

    pub fn highpass(&mut self, hz: f64, q: f64) {
        self.highpass = Some(Section { hz, q, a: 1.0 });
    }

    /// Adds a peaking section. Beyond [`EQ_MAX_PEAKS`] the request is
    /// ignored with a warning; it is a configuration mistake, not a fault.
    pub fn add_peak(&mut self, hz: f64, q: f64, a: f64) {
        if self.peaks.len() >= EQ_MAX_PEAKS {
            log::warn!("EQ already has {} peaks, ignoring peak at {} Hz", EQ_MAX_PEAKS, hz);
            return;
        }
        self.peaks.push(Section { hz, q, a });
    }

    /// Materialises the described sections into the biquad chain. Call
    /// after describing the sections, and again whenever the sample rate
    /// changes.
    pub fn bake(&mut self, params: &AudioParams) {
        self.biquads.clear();

        if let Some(lp) = self.lowpass {
            let mut bq = Biquad::new();
            bq.lowpass(lp.hz, lp.q, params);
            self.biquads.push(bq);
        }

        if let Some(hp) = self.highpass {
            let mut bq = Biquad::new();
            bq.highpass(hp.hz, hp.q, params);
            self.biquads.push(bq);
        }

        for peak in &self.peaks {
            let mut bq = Biquad::new();
            bq.peak(peak.hz, peak.q, peak.a, params);
            self.biquads.push(bq);
        }
    }

    /// Runs one sample through every baked section, then applies the gain.
    pub fn run(&mut self, sample: f32) -> f32 {
        let mut out = sample;
        for bq in &mut self.biquads {
            out = bq.run(out);
        }
        out * self.gain
    }
}

impl Default for Eq {
    fn default() -> Self {
        Self::new()
    }
}
