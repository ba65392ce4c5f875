//! The synth: timbres, voices, and the embedder surface.
//!
//! A synth is built in two phases. Before `finalize`, the embedder
//! populates the *archetype* timbre and voice (index 0 of each vector) with
//! controls and modules; `finalize` clones the archetypes into the
//! remaining slots, lays out the buffer pools, and configures every object.
//! The structure is frozen afterwards: patches may be applied and voices
//! attached, but no object may be added.
//!
//! The render path entry points are `Timbre::pre_render`, `Voice::render`,
//! and `Timbre::post_render`; [`Synth::render_chunk`] drives all three in
//! order for every timbre, and [`Synth::render_chunk_parallel`] renders the
//! voices of a chunk on worker threads (voices are mutually independent
//! within a chunk: they read timbre buffers written by pre-render and write
//! only their own).

use crate::config::{Config, ConfigCtx, ConfigScope};
use crate::defs::{Sample, MAX_FRAMES, MAX_OUTPUT_MODULES, MAX_POLYPHONY, MAX_TIMBRALITY,
    MAX_TIMBRE_CONTROLS, MAX_TIMBRE_MODULES, MAX_VOICE_CONTROLS, MAX_VOICE_MODULES,
    MODULE_MAX_PORTS};
use crate::module::{Binding, Control, ControlHandle, ControlKey, Module, ModuleHandle, ModuleKey};
use crate::patch::Patch;
use crate::planner::{ControlDesc, ModuleDesc, PlanError, Planner};
use crate::port::{BufferPool, PortDir};
use crate::resolver::Resolver;
use crate::timbre::Timbre;
use crate::voice::{Voice, VoiceState};
use slotmap::SlotMap;

/// A complete synthesizer: up to *timbrality* sound programs sharing up to
/// *polyphony* voices.
pub struct Synth {
    name: String,
    polyphony: usize,
    timbrality: usize,
    timbres: Vec<Timbre>,
    voices: Vec<Voice>,
    module_keys: SlotMap<ModuleKey, ()>,
    control_keys: SlotMap<ControlKey, ()>,
    tcontrols: Vec<ControlDesc>,
    tmodules: Vec<ModuleDesc>,
    vcontrols: Vec<ControlDesc>,
    vmodules: Vec<ModuleDesc>,
    outputs: Vec<ModuleKey>,
    timbre_ports: usize,
    finalized: bool,
    sample_rate: u32,
}

impl Synth {
    /// Create an unfinalized synth with empty archetypes.
    pub fn new(name: impl Into<String>, polyphony: usize, timbrality: usize) -> Self {
        assert!(polyphony >= 1 && polyphony <= MAX_POLYPHONY);
        assert!(timbrality >= 1 && timbrality <= MAX_TIMBRALITY);
        Self {
            name: name.into(),
            polyphony,
            timbrality,
            timbres: vec![Timbre::new()],
            voices: vec![Voice::new()],
            module_keys: SlotMap::with_key(),
            control_keys: SlotMap::with_key(),
            tcontrols: Vec::new(),
            tmodules: Vec::new(),
            vcontrols: Vec::new(),
            vmodules: Vec::new(),
            outputs: Vec::new(),
            timbre_ports: 0,
            finalized: false,
            sample_rate: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    pub fn timbrality(&self) -> usize {
        self.timbrality
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn timbres(&self) -> &[Timbre] {
        &self.timbres
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut [Voice] {
        &mut self.voices
    }

    /// Register a control on the archetype timbre.
    pub fn add_timbre_control(
        &mut self,
        name: impl Into<String>,
        control: impl Control + 'static,
    ) -> ControlHandle {
        assert!(!self.finalized, "structure is frozen after finalize");
        let spec = control.port_spec().clone();
        let key = self.control_keys.insert(());
        self.tcontrols.push(ControlDesc {
            key,
            name: name.into(),
            spec: spec.clone(),
        });
        self.timbres[0].add_control(Box::new(control));
        ControlHandle { key, spec }
    }

    /// Register a module on the archetype timbre. Output modules carry the
    /// engine's audible output on their input ports.
    pub fn add_timbre_module(
        &mut self,
        name: impl Into<String>,
        module: impl Module + 'static,
        is_output: bool,
    ) -> ModuleHandle {
        assert!(!self.finalized, "structure is frozen after finalize");
        let spec = module.port_spec().clone();
        let key = self.module_keys.insert(());
        self.tmodules.push(ModuleDesc {
            key,
            name: name.into(),
            spec: spec.clone(),
            twin: module.twin(),
        });
        if is_output {
            self.outputs.push(key);
        }
        self.timbres[0].add_module(Box::new(module));
        ModuleHandle { key, spec }
    }

    /// Register a control on the archetype voice.
    pub fn add_voice_control(
        &mut self,
        name: impl Into<String>,
        control: impl Control + 'static,
    ) -> ControlHandle {
        assert!(!self.finalized, "structure is frozen after finalize");
        let spec = control.port_spec().clone();
        let key = self.control_keys.insert(());
        self.vcontrols.push(ControlDesc {
            key,
            name: name.into(),
            spec: spec.clone(),
        });
        self.voices[0].add_control(Box::new(control));
        ControlHandle { key, spec }
    }

    /// Register a module on the archetype voice.
    pub fn add_voice_module(
        &mut self,
        name: impl Into<String>,
        module: impl Module + 'static,
    ) -> ModuleHandle {
        assert!(!self.finalized, "structure is frozen after finalize");
        let spec = module.port_spec().clone();
        let key = self.module_keys.insert(());
        self.vmodules.push(ModuleDesc {
            key,
            name: name.into(),
            spec: spec.clone(),
            twin: module.twin(),
        });
        self.voices[0].add_module(Box::new(module));
        ModuleHandle { key, spec }
    }

    /// Freeze the structure: clone the archetypes into every slot, lay out
    /// buffer pools, and configure all objects.
    pub fn finalize(&mut self, config: &mut Config) -> Result<(), PlanError> {
        assert!(!self.finalized, "finalize called twice");
        self.check_capacities()?;

        // Timbre-local layout.
        let mut tres = Resolver::new();
        for c in &self.tcontrols {
            tres.add_control(c.key, &c.spec);
        }
        for m in &self.tmodules {
            tres.add_module(m.key, &m.spec);
        }
        tres.finalize();
        let t_pool = BufferPool::for_layout(tres.port_types());
        let t_cbases: Vec<u16> = (0..self.tcontrols.len())
            .map(|i| tres.control_port_base(i))
            .collect();
        let t_mbases: Vec<u16> = (0..self.tmodules.len())
            .map(|i| tres.module_port_base(i))
            .collect();
        self.timbre_ports = tres.port_count();

        // Voice-local layout. The combined resolver appends voice ports
        // after the timbre prefix, so a voice-only resolver yields exactly
        // the localized suffix.
        let mut vres = Resolver::new();
        for c in &self.vcontrols {
            vres.add_control(c.key, &c.spec);
        }
        for m in &self.vmodules {
            vres.add_module(m.key, &m.spec);
        }
        vres.finalize();
        let v_pool = BufferPool::for_layout(vres.port_types());
        let v_cbases: Vec<u16> = (0..self.vcontrols.len())
            .map(|i| vres.control_port_base(i))
            .collect();
        let v_mbases: Vec<u16> = (0..self.vmodules.len())
            .map(|i| vres.module_port_base(i))
            .collect();

        self.timbres[0].set_layout(t_pool, t_cbases, t_mbases);
        self.voices[0].set_layout(
            v_pool,
            v_cbases,
            v_mbases,
            self.tcontrols.len(),
            self.tmodules.len(),
            self.timbre_ports,
        );

        for _ in 1..self.timbrality {
            let clone = self.timbres[0].clone();
            self.timbres.push(clone);
        }
        for _ in 1..self.polyphony {
            let clone = self.voices[0].clone();
            self.voices.push(clone);
        }

        self.sample_rate = config.sample_rate;
        for (ti, timbre) in self.timbres.iter_mut().enumerate() {
            let mut ctx = ConfigCtx {
                sample_rate: config.sample_rate,
                midi: config.midi.as_deref_mut(),
                scope: ConfigScope::Timbre(ti),
            };
            timbre.configure(&mut ctx);
        }
        for (vi, voice) in self.voices.iter_mut().enumerate() {
            let mut ctx = ConfigCtx {
                sample_rate: config.sample_rate,
                midi: config.midi.as_deref_mut(),
                scope: ConfigScope::Voice(vi),
            };
            voice.configure(&mut ctx);
        }

        self.finalized = true;
        Ok(())
    }

    fn check_capacities(&self) -> Result<(), PlanError> {
        let checks: [(usize, usize, &'static str); 5] = [
            (self.tcontrols.len(), MAX_TIMBRE_CONTROLS, "MAX_TIMBRE_CONTROLS"),
            (self.tmodules.len(), MAX_TIMBRE_MODULES, "MAX_TIMBRE_MODULES"),
            (self.vcontrols.len(), MAX_VOICE_CONTROLS, "MAX_VOICE_CONTROLS"),
            (self.vmodules.len(), MAX_VOICE_MODULES, "MAX_VOICE_MODULES"),
            (self.outputs.len(), MAX_OUTPUT_MODULES, "MAX_OUTPUT_MODULES"),
        ];
        for (len, max, what) in checks {
            if len > max {
                return Err(PlanError::Capacity { what });
            }
        }
        for m in self.tmodules.iter().chain(&self.vmodules) {
            if m.spec.len() > MODULE_MAX_PORTS {
                return Err(PlanError::Capacity {
                    what: "MODULE_MAX_PORTS",
                });
            }
        }
        Ok(())
    }

    /// Compile `patch` and install the plan on one timbre.
    pub fn apply_patch(&mut self, patch: &Patch, timbre: usize) -> Result<(), PlanError> {
        if !self.finalized {
            return Err(PlanError::NotFinalized);
        }
        let planner = Planner::new(
            &self.tcontrols,
            &self.tmodules,
            &self.vcontrols,
            &self.vmodules,
            patch.links(),
            &self.outputs,
        );
        let plan = planner.make_plan()?;
        let resolver = planner.resolver();

        let output_port = self.outputs.first().and_then(|k| {
            let mi = resolver.modules().find(*k)? as usize;
            resolver
                .module_ports(mi)
                .find(|&p| resolver.port_dir(p) == PortDir::Input)
                .map(|p| p as u16)
        });

        let binding = Binding {
            resolver,
            timbre_ports: self.timbre_ports,
        };
        for m in self.timbres[timbre].modules_mut() {
            m.bind(&binding);
        }
        self.timbres[timbre].install(patch.clone(), plan, output_port);
        Ok(())
    }

    /// Attach a voice to a timbre: run the plan's voice prep steps and bind
    /// the voice-render actions.
    pub fn attach_voice_to_timbre(&mut self, timbre: usize, voice: usize) {
        debug_assert!(self.finalized);
        let t = &self.timbres[timbre];
        let v = &mut self.voices[voice];
        t.prep_voice(v);
        v.install_actions(t.voice_actions(), timbre);
        self.timbres[timbre].add_voice(voice);
    }

    pub fn detach_voice_from_timbre(&mut self, timbre: usize, voice: usize) {
        self.timbres[timbre].remove_voice(voice);
        self.voices[voice].clear_timbre();
    }

    /// Render one chunk: for each timbre, pre-render, then every attached
    /// voice, then post-render. Voices that finished go idle and are
    /// detached after the post phase (their last ramp chunk is still
    /// summed).
    pub fn render_chunk(&mut self, frames: usize) {
        assert!(frames <= MAX_FRAMES, "chunk exceeds MAX_FRAMES");
        for ti in 0..self.timbres.len() {
            self.timbres[ti].pre_render(frames);
            let attached = self.timbres[ti].attached_voices();
            for vi in 0..self.voices.len() {
                if attached & (1 << vi) != 0 {
                    self.voices[vi].render(frames, self.timbres[ti].pool());
                }
            }
            self.timbres[ti].post_render(frames, &self.voices);
            self.detach_idle(ti, attached);
        }
    }

    /// Render one chunk with voices partitioned across `workers` threads.
    ///
    /// Ordering matches [`Synth::render_chunk`]: every pre-render completes
    /// before any voice renders, and every voice joins before any
    /// post-render runs. Within one voice execution is serial.
    pub fn render_chunk_parallel(&mut self, frames: usize, workers: usize) {
        assert!(frames <= MAX_FRAMES, "chunk exceeds MAX_FRAMES");
        for t in &mut self.timbres {
            t.pre_render(frames);
        }

        let pools: Vec<&BufferPool> = self.timbres.iter().map(|t| t.pool()).collect();
        let masks: Vec<u64> = self.timbres.iter().map(|t| t.attached_voices()).collect();
        let per = self.voices.len().div_ceil(workers.max(1));
        std::thread::scope(|s| {
            for (w, chunk) in self.voices.chunks_mut(per).enumerate() {
                let pools = &pools;
                let masks = &masks;
                s.spawn(move || {
                    for (i, v) in chunk.iter_mut().enumerate() {
                        let vi = w * per + i;
                        if let Some(ti) = v.timbre() {
                            if masks[ti] & (1 << vi) != 0 {
                                v.render(frames, pools[ti]);
                            }
                        }
                    }
                });
            }
        });

        for ti in 0..self.timbres.len() {
            let attached = self.timbres[ti].attached_voices();
            self.timbres[ti].post_render(frames, &self.voices);
            self.detach_idle(ti, attached);
        }
    }

    fn detach_idle(&mut self, timbre: usize, attached: u64) {
        for vi in 0..self.voices.len() {
            if attached & (1 << vi) != 0 && self.voices[vi].state() == VoiceState::Idle {
                self.detach_voice_from_timbre(timbre, vi);
            }
        }
    }

    /// The final samples of one timbre's last rendered chunk.
    pub fn output(&self, timbre: usize, frames: usize) -> &[Sample] {
        self.timbres[timbre].output_samples(frames)
    }
}
