//! Timbres: one independent sound program.
//!
//! A timbre owns its timbre-level controls and modules, the plan compiled
//! from its current patch, the pre/post render action lists bound from that
//! plan, and a bitset of the voices currently attached to it. Modules that
//! sum across voices iterate that bitset to find live voice buffers.

use crate::action::{self, Action};
use crate::config::ConfigCtx;
use crate::defs::{Sample, MAX_POLYPHONY};
use crate::module::{Control, Module};
use crate::patch::Patch;
use crate::plan::{Plan, PrepStep};
use crate::port::BufferPool;
use crate::voice::Voice;

/// One timbre: patch, plan, objects, and attached voices.
#[derive(Clone)]
pub struct Timbre {
    controls: Vec<Box<dyn Control>>,
    modules: Vec<Box<dyn Module>>,
    pool: BufferPool,
    control_bases: Vec<u16>,
    module_bases: Vec<u16>,
    patch: Option<Patch>,
    plan: Option<Plan>,
    pre_actions: Vec<Action>,
    post_actions: Vec<Action>,
    /// Voice-render action template; every attaching voice copies it.
    voice_actions: Vec<Action>,
    attached: u64,
    /// The designated output module's input port, for reading final samples.
    output_port: Option<u16>,
}

impl Timbre {
    pub(crate) fn new() -> Self {
        Self {
            controls: Vec::new(),
            modules: Vec::new(),
            pool: BufferPool::for_layout(&[]),
            control_bases: Vec::new(),
            module_bases: Vec::new(),
            patch: None,
            plan: None,
            pre_actions: Vec::new(),
            post_actions: Vec::new(),
            voice_actions: Vec::new(),
            attached: 0,
            output_port: None,
        }
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    pub fn controls(&self) -> &[Box<dyn Control>] {
        &self.controls
    }

    pub fn modules(&self) -> &[Box<dyn Module>] {
        &self.modules
    }

    pub(crate) fn add_control(&mut self, control: Box<dyn Control>) {
        self.controls.push(control);
    }

    pub(crate) fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    pub(crate) fn modules_mut(&mut self) -> &mut [Box<dyn Module>] {
        &mut self.modules
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn set_layout(
        &mut self,
        pool: BufferPool,
        control_bases: Vec<u16>,
        module_bases: Vec<u16>,
    ) {
        self.pool = pool;
        self.control_bases = control_bases;
        self.module_bases = module_bases;
    }

    pub(crate) fn configure(&mut self, ctx: &mut ConfigCtx) {
        for c in &mut self.controls {
            c.configure(ctx);
        }
        for m in &mut self.modules {
            m.configure(ctx);
        }
    }

    /// Install a compiled plan: run the timbre prep steps once and bind the
    /// per-chunk action lists.
    pub(crate) fn install(&mut self, patch: Patch, plan: Plan, output_port: Option<u16>) {
        for step in plan.t_prep() {
            run_prep(&mut self.pool, step, 0);
        }
        action::bind(plan.pre_render(), patch.links(), &mut self.pre_actions);
        action::bind(plan.post_render(), patch.links(), &mut self.post_actions);
        action::bind(plan.v_render(), patch.links(), &mut self.voice_actions);
        self.output_port = output_port;
        self.patch = Some(patch);
        self.plan = Some(plan);
    }

    pub(crate) fn voice_actions(&self) -> &[Action] {
        &self.voice_actions
    }

    /// Run the plan's voice prep steps against an attaching voice's pool.
    pub(crate) fn prep_voice(&self, voice: &mut Voice) {
        let Some(plan) = &self.plan else { return };
        let offset = voice.port_offset();
        for step in plan.v_prep() {
            run_prep(voice.pool_mut(), step, offset);
        }
    }

    /// Attached voice indices.
    pub fn attached_voices(&self) -> u64 {
        self.attached
    }

    pub fn is_attached(&self, voice: usize) -> bool {
        self.attached & (1 << voice) != 0
    }

    pub(crate) fn add_voice(&mut self, voice: usize) {
        debug_assert!(voice < MAX_POLYPHONY);
        self.attached |= 1 << voice;
    }

    pub(crate) fn remove_voice(&mut self, voice: usize) {
        self.attached &= !(1 << voice);
    }

    /// Run the pre-voice render actions for one chunk.
    pub fn pre_render(&mut self, frames: usize) {
        let mut scope = action::Scope {
            pool: &mut self.pool,
            upstream: None,
            controls: &mut self.controls,
            modules: &mut self.modules,
            control_bases: &self.control_bases,
            module_bases: &self.module_bases,
            control_offset: 0,
            module_offset: 0,
            port_offset: 0,
            voices: None,
        };
        action::run(&self.pre_actions, frames, &mut scope);
    }

    /// Run the post-voice render actions for one chunk. `voices` is the
    /// synth's voice vector; summing modules read the attached ones.
    pub fn post_render(&mut self, frames: usize, voices: &[Voice]) {
        let mut scope = action::Scope {
            pool: &mut self.pool,
            upstream: None,
            controls: &mut self.controls,
            modules: &mut self.modules,
            control_bases: &self.control_bases,
            module_bases: &self.module_bases,
            control_offset: 0,
            module_offset: 0,
            port_offset: 0,
            voices: Some((voices, self.attached)),
        };
        action::run(&self.post_actions, frames, &mut scope);
    }

    /// The engine's final samples for this timbre: the designated output
    /// module's input port buffer, read through its redirect.
    pub fn output_samples(&self, frames: usize) -> &[Sample] {
        let port = self
            .output_port
            .expect("no output module; apply a patch first") as usize;
        &self.pool.read_f32(port)[..frames]
    }
}

fn run_prep(pool: &mut BufferPool, step: &PrepStep, offset: usize) {
    match *step {
        PrepStep::Clear { port, value } => {
            pool.clear(port as usize - offset, value as f64);
        }
        PrepStep::Alias { dest, src } => {
            pool.alias(
                dest as usize - offset,
                src.map(|s| s as usize - offset),
            );
        }
    }
}
