//! The core module set.
//!
//! Concrete DSP is deliberately thin here: a pair of naive oscillators, an
//! amplifier, the voice/timbre summing pair, and the output sink. They are
//! enough to patch a complete synth and to exercise every planner path; a
//! real instrument brings its own modules through the same trait.

use crate::config::ConfigCtx;
use crate::module::{Binding, Module, ModuleHandle, ModuleKey, RenderCtx};
use crate::port::{ElementType, PortDef, PortSpec};

/// Naive square oscillator: ±1, no band limiting.
///
/// Ports: `freq` (Hz in), `out`.
#[derive(Clone)]
pub struct NaiveSquare {
    spec: PortSpec,
    inv_fs: f32,
    phase: f32,
}

impl NaiveSquare {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![
                PortDef::input("freq", ElementType::F32),
                PortDef::output("out", ElementType::F32),
            ]),
            inv_fs: 0.0,
            phase: 0.0,
        }
    }
}

impl Default for NaiveSquare {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for NaiveSquare {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        self.inv_fs = 1.0 / ctx.sample_rate as f32;
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        debug_assert!(self.inv_fs > 0.0, "not configured");
        let inv_fs = self.inv_fs;
        let mut phase = self.phase;
        let (freq, out) = ctx.in_out(0, 1);
        for i in 0..out.len() {
            out[i] = if phase < 0.5 { 1.0 } else { -1.0 };
            phase += inv_fs * freq[i];
            if phase >= 1.0 {
                phase -= 1.0;
            }
        }
        self.phase = phase;
    }
}

/// Naive sawtooth oscillator: -1..1 ramp, no band limiting.
///
/// Ports: `freq` (Hz in), `out`.
#[derive(Clone)]
pub struct NaiveSaw {
    spec: PortSpec,
    inv_fs: f32,
    phase: f32,
}

impl NaiveSaw {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![
                PortDef::input("freq", ElementType::F32),
                PortDef::output("out", ElementType::F32),
            ]),
            inv_fs: 0.0,
            phase: 0.0,
        }
    }
}

impl Default for NaiveSaw {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for NaiveSaw {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        self.inv_fs = 1.0 / ctx.sample_rate as f32;
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        let inv_fs = self.inv_fs;
        let mut phase = self.phase;
        let (freq, out) = ctx.in_out(0, 1);
        for i in 0..out.len() {
            out[i] = 2.0 * phase - 1.0;
            phase += inv_fs * freq[i];
            if phase >= 1.0 {
                phase -= 1.0;
            }
        }
        self.phase = phase;
    }
}

/// Amplifier: `out = in · gain`.
#[derive(Clone)]
pub struct Amp {
    spec: PortSpec,
}

impl Amp {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![
                PortDef::input("in", ElementType::F32),
                PortDef::input("gain", ElementType::F32),
                PortDef::output("out", ElementType::F32),
            ]),
        }
    }
}

impl Default for Amp {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Amp {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        let (input, gain, out) = ctx.in2_out(0, 1, 2);
        for i in 0..out.len() {
            out[i] = input[i] * gain[i];
        }
    }
}

/// Voice side of the summing pair: a plain input the voice chain writes
/// into. Rendering is a no-op; the timbre side reads the buffer across the
/// boundary.
///
/// Ports: `in`.
#[derive(Clone)]
pub struct SumInput {
    spec: PortSpec,
}

impl SumInput {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::input("in", ElementType::F32)]),
        }
    }
}

impl Default for SumInput {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for SumInput {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn render(&mut self, _ctx: &mut RenderCtx) {}
}

/// Timbre side of the summing pair: mixes its twin's buffer across all
/// attached voices.
///
/// Ports: `out`.
#[derive(Clone)]
pub struct SumOutput {
    spec: PortSpec,
    twin: ModuleKey,
    twin_port: Option<u16>,
}

impl SumOutput {
    /// Pair with an already-registered [`SumInput`] on the voice archetype.
    pub fn new(voice_side: &ModuleHandle) -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            twin: voice_side.key(),
            twin_port: None,
        }
    }
}

impl Module for SumOutput {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn twin(&self) -> Option<ModuleKey> {
        Some(self.twin)
    }

    fn bind(&mut self, binding: &Binding) {
        self.twin_port = binding.voice_port(self.twin, 0);
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        let frames = ctx.frames();
        let voices = ctx.take_voices();
        let out = ctx.output(0);
        out.fill(0.0);
        let (Some(view), Some(port)) = (voices, self.twin_port) else {
            return;
        };
        for vi in 0..view.len() {
            if view.is_attached(vi) {
                let buf = view.read(vi, port, frames);
                for (o, v) in out.iter_mut().zip(buf) {
                    *o += v;
                }
            }
        }
    }
}

/// Output sink: the engine's audible output is whatever lands on `in`.
/// The host reads the buffer after the post-render phase.
#[derive(Clone)]
pub struct AudioOut {
    spec: PortSpec,
}

impl AudioOut {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::input("in", ElementType::F32)]),
        }
    }
}

impl Default for AudioOut {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for AudioOut {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn render(&mut self, _ctx: &mut RenderCtx) {}
}
