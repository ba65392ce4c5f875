//! Core controls.
//!
//! The one control every synth needs: a linear attack/release amplitude
//! envelope that also anchors voice lifetime. Its `note_is_done` reports
//! when a released or killed note has decayed to silence, which is what
//! lets the voice go idle.

use crate::config::ConfigCtx;
use crate::defs::{Sample, NOTE_SHUTDOWN_TIME};
use crate::module::{Control, RenderCtx};
use crate::port::{ElementType, PortDef, PortSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Attack,
    Sustain,
    Release,
    /// Fast release after a kill, bounded by the voice shutdown ramp.
    Kill,
}

/// Linear attack/release envelope control.
///
/// Ports: `out` (0..1).
#[derive(Clone)]
pub struct EnvelopeControl {
    spec: PortSpec,
    attack_time: f32,
    release_time: f32,
    attack_step: Sample,
    release_step: Sample,
    kill_step: Sample,
    level: Sample,
    stage: Stage,
}

impl EnvelopeControl {
    pub fn new(attack_time: f32, release_time: f32) -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            attack_time,
            release_time,
            attack_step: 0.0,
            release_step: 0.0,
            kill_step: 0.0,
            level: 0.0,
            stage: Stage::Idle,
        }
    }

    fn step(time: f32, sample_rate: u32) -> Sample {
        if time <= 0.0 {
            1.0
        } else {
            1.0 / (time * sample_rate as f32)
        }
    }
}

impl Control for EnvelopeControl {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        self.attack_step = Self::step(self.attack_time, ctx.sample_rate);
        self.release_step = Self::step(self.release_time, ctx.sample_rate);
        self.kill_step = Self::step(NOTE_SHUTDOWN_TIME, ctx.sample_rate);
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        let out = ctx.output(0);
        for sample in out.iter_mut() {
            match self.stage {
                Stage::Idle => self.level = 0.0,
                Stage::Attack => {
                    self.level += self.attack_step;
                    if self.level >= 1.0 {
                        self.level = 1.0;
                        self.stage = Stage::Sustain;
                    }
                }
                Stage::Sustain => {}
                Stage::Release => {
                    self.level -= self.release_step;
                    if self.level <= 0.0 {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
                Stage::Kill => {
                    self.level -= self.kill_step;
                    if self.level <= 0.0 {
                        self.level = 0.0;
                        self.stage = Stage::Idle;
                    }
                }
            }
            *sample = self.level;
        }
    }

    fn start_note(&mut self) {
        self.stage = Stage::Attack;
    }

    fn release_note(&mut self) {
        if self.stage != Stage::Idle {
            self.stage = Stage::Release;
        }
    }

    fn kill_note(&mut self) {
        if self.stage != Stage::Idle {
            self.stage = Stage::Kill;
        }
    }

    fn note_is_done(&self) -> bool {
        self.stage == Stage::Idle
    }

    fn is_lifecycle(&self) -> bool {
        true
    }
}
