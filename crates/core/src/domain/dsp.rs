//! Built-in filter types
//!
//! Small, allocation-free processors registered by
//! [`FilterCatalog::with_builtins`](crate::domain::filter::FilterCatalog::with_builtins):
//! - Gain filter (gain, polarity)
//! - Biquad resonant filter (low/high/band pass)
//! - LO-FI filter (sample-rate and bit-depth reduction)
//!
//! Every filter has a `Wet` parameter at index 0 blending the processed
//! signal with the dry input.

use crate::domain::filter::{FilterInstance, FilterType, ParamKind, ParamSchema, SharedFilter};
use std::f32::consts::PI;
use std::sync::Arc;

pub const GAIN_FILTER: &str = "Gain filter";
pub const BIQUAD_FILTER: &str = "Biquad resonant filter";
pub const LOFI_FILTER: &str = "LO-FI filter";

pub fn builtin_filters() -> Vec<SharedFilter> {
    vec![
        Arc::new(GainFilter::new()),
        Arc::new(BiquadResonantFilter::new()),
        Arc::new(LofiFilter::new()),
    ]
}

/// Parameter storage shared by the built-in instances
///
/// Values are clamped to the schema range; int and bool params are rounded.
#[derive(Debug, Clone)]
struct ParamBank {
    values: Vec<f32>,
    schema: Vec<ParamSchema>,
}

impl ParamBank {
    fn new(schema: &[ParamSchema], defaults: &[f32]) -> Self {
        Self {
            values: defaults.to_vec(),
            schema: schema.to_vec(),
        }
    }

    fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    fn set(&mut self, index: usize, value: f32) -> bool {
        let Some(schema) = self.schema.get(index) else {
            return false;
        };
        let clamped = value.clamp(schema.min, schema.max);
        self.values[index] = match schema.kind {
            ParamKind::Float => clamped,
            ParamKind::Int => clamped.round(),
            ParamKind::Bool => {
                if clamped >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        true
    }

    fn wet(&self) -> f32 {
        self.values[0]
    }
}

#[inline]
fn blend(dry: f32, wet_sample: f32, wet: f32) -> f32 {
    dry + (wet_sample - dry) * wet
}

// ============================================================================
// GAIN
// ============================================================================

#[derive(Debug)]
pub struct GainFilter {
    schema: Vec<ParamSchema>,
}

impl GainFilter {
    pub const WET: usize = 0;
    pub const GAIN: usize = 1;
    pub const INVERT: usize = 2;

    pub fn new() -> Self {
        Self {
            schema: vec![
                ParamSchema::float("Wet", 0.0, 1.0),
                ParamSchema::float("Gain", 0.0, 4.0),
                ParamSchema::boolean("Invert"),
            ],
        }
    }
}

impl Default for GainFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterType for GainFilter {
    fn name(&self) -> &str {
        GAIN_FILTER
    }

    fn params(&self) -> &[ParamSchema] {
        &self.schema
    }

    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(GainInstance {
            params: ParamBank::new(&self.schema, &[1.0, 1.0, 0.0]),
        })
    }
}

struct GainInstance {
    params: ParamBank,
}

impl FilterInstance for GainInstance {
    fn param_count(&self) -> usize {
        self.params.values.len()
    }

    fn param(&self, index: usize) -> Option<f32> {
        self.params.get(index)
    }

    fn set_param(&mut self, index: usize, value: f32) -> bool {
        self.params.set(index, value)
    }

    fn process(&mut self, samples: &mut [f32], _channels: usize, _sample_rate: u32) {
        let wet = self.params.wet();
        let mut gain = self.params.values[GainFilter::GAIN];
        if self.params.values[GainFilter::INVERT] >= 0.5 {
            gain = -gain;
        }
        for sample in samples.iter_mut() {
            *sample = blend(*sample, *sample * gain, wet);
        }
    }
}

// ============================================================================
// BIQUAD RESONANT
// ============================================================================

/// Biquad coefficients normalized by a0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Response shape selected by the `Type` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
    BandPass,
}

impl BiquadKind {
    fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => BiquadKind::HighPass,
            2 => BiquadKind::BandPass,
            _ => BiquadKind::LowPass,
        }
    }
}

impl BiquadCoeffs {
    /// Cookbook coefficients for the given response
    #[must_use]
    pub fn resonant(kind: BiquadKind, sample_rate: f32, freq: f32, q: f32) -> Self {
        let freq = freq.clamp(10.0, sample_rate * 0.49);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q.max(0.01));

        let (b0, b1, b2) = match kind {
            BiquadKind::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            BiquadKind::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
            BiquadKind::BandPass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Direct Form I state for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &BiquadCoeffs, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[derive(Debug)]
pub struct BiquadResonantFilter {
    schema: Vec<ParamSchema>,
}

impl BiquadResonantFilter {
    pub const WET: usize = 0;
    pub const TYPE: usize = 1;
    pub const FREQUENCY: usize = 2;
    pub const RESONANCE: usize = 3;

    pub fn new() -> Self {
        Self {
            schema: vec![
                ParamSchema::float("Wet", 0.0, 1.0),
                ParamSchema::int("Type", 0.0, 2.0),
                ParamSchema::float("Frequency", 10.0, 8000.0),
                ParamSchema::float("Resonance", 0.1, 20.0),
            ],
        }
    }
}

impl Default for BiquadResonantFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterType for BiquadResonantFilter {
    fn name(&self) -> &str {
        BIQUAD_FILTER
    }

    fn params(&self) -> &[ParamSchema] {
        &self.schema
    }

    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(BiquadInstance {
            params: ParamBank::new(&self.schema, &[1.0, 0.0, 1000.0, 2.0]),
            coeffs: BiquadCoeffs::default(),
            states: Vec::new(),
            tuned_for: None,
        })
    }
}

struct BiquadInstance {
    params: ParamBank,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
    /// Sample rate the coefficients were computed for; `None` after a param change
    tuned_for: Option<u32>,
}

impl FilterInstance for BiquadInstance {
    fn param_count(&self) -> usize {
        self.params.values.len()
    }

    fn param(&self, index: usize) -> Option<f32> {
        self.params.get(index)
    }

    fn set_param(&mut self, index: usize, value: f32) -> bool {
        let changed = self.params.set(index, value);
        if changed {
            self.tuned_for = None;
        }
        changed
    }

    fn process(&mut self, samples: &mut [f32], channels: usize, sample_rate: u32) {
        if channels == 0 || sample_rate == 0 {
            return;
        }
        if self.tuned_for != Some(sample_rate) {
            let values = &self.params.values;
            self.coeffs = BiquadCoeffs::resonant(
                BiquadKind::from_param(values[BiquadResonantFilter::TYPE]),
                sample_rate as f32,
                values[BiquadResonantFilter::FREQUENCY],
                values[BiquadResonantFilter::RESONANCE],
            );
            self.tuned_for = Some(sample_rate);
        }
        if self.states.len() != channels {
            self.states = vec![BiquadState::default(); channels];
        }

        let wet = self.params.wet();
        for frame in samples.chunks_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
                let filtered = state.process(&self.coeffs, *sample);
                *sample = blend(*sample, filtered, wet);
            }
        }
    }
}

// ============================================================================
// LO-FI
// ============================================================================

#[derive(Debug)]
pub struct LofiFilter {
    schema: Vec<ParamSchema>,
}

impl LofiFilter {
    pub const WET: usize = 0;
    pub const SAMPLERATE: usize = 1;
    pub const BITDEPTH: usize = 2;

    pub fn new() -> Self {
        Self {
            schema: vec![
                ParamSchema::float("Wet", 0.0, 1.0),
                ParamSchema::float("Samplerate", 100.0, 22000.0),
                ParamSchema::float("Bitdepth", 0.5, 16.0),
            ],
        }
    }
}

impl Default for LofiFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterType for LofiFilter {
    fn name(&self) -> &str {
        LOFI_FILTER
    }

    fn params(&self) -> &[ParamSchema] {
        &self.schema
    }

    fn create_instance(&self) -> Box<dyn FilterInstance> {
        Box::new(LofiInstance {
            params: ParamBank::new(&self.schema, &[1.0, 4000.0, 3.0]),
            held: Vec::new(),
            phase: 1.0,
        })
    }
}

struct LofiInstance {
    params: ParamBank,
    held: Vec<f32>,
    phase: f32,
}

impl FilterInstance for LofiInstance {
    fn param_count(&self) -> usize {
        self.params.values.len()
    }

    fn param(&self, index: usize) -> Option<f32> {
        self.params.get(index)
    }

    fn set_param(&mut self, index: usize, value: f32) -> bool {
        self.params.set(index, value)
    }

    fn process(&mut self, samples: &mut [f32], channels: usize, sample_rate: u32) {
        if channels == 0 || sample_rate == 0 {
            return;
        }
        if self.held.len() != channels {
            self.held = vec![0.0; channels];
        }

        let wet = self.params.wet();
        let step = self.params.values[LofiFilter::SAMPLERATE] / sample_rate as f32;
        let levels = 2.0_f32.powf(self.params.values[LofiFilter::BITDEPTH]);

        for frame in samples.chunks_mut(channels) {
            if self.phase >= 1.0 {
                self.phase -= self.phase.floor();
                for (held, sample) in self.held.iter_mut().zip(frame.iter()) {
                    *held = (*sample * levels).round() / levels;
                }
            }
            self.phase += step;
            for (sample, held) in frame.iter_mut().zip(self.held.iter()) {
                *sample = blend(*sample, *held, wet);
            }
        }
    }
}
