//! The planner: compiles a patch into a plan.
//!
//! Given the archetype timbre and voice populations, a patch's links, and
//! the set of output modules, the planner:
//!
//! 1. partitions the modules reachable from the outputs into `pre` (timbre
//!    modules feeding voices), `voice`, and `post` (timbre modules fed by
//!    voices), eliding everything unreachable;
//! 2. classifies the controls the used links reference;
//! 3. assembles one-shot prep steps per used input port (clear, alias, or
//!    alias reset);
//! 4. schedules each phase topologically, emitting copy/add steps for
//!    un-aliased links and render steps for controls and modules, with ties
//!    broken by resolver index so identical inputs always produce identical
//!    plans.
//!
//! The module graph must be a DAG; an empty ready set aborts compilation.

use crate::link::Link;
use crate::module::{ControlKey, ModuleKey, OwnerKey, PortKey};
use crate::plan::{Plan, PrepStep, RenderStep};
use crate::port::{PortDir, PortSpec};
use crate::resolver::Resolver;
use crate::universe::Subset;
use std::fmt;

/// A registered module, as the planner sees it.
#[derive(Clone)]
pub struct ModuleDesc {
    pub key: ModuleKey,
    pub name: String,
    pub spec: PortSpec,
    pub twin: Option<ModuleKey>,
}

/// A registered control, as the planner sees it.
#[derive(Clone)]
pub struct ControlDesc {
    pub key: ControlKey,
    pub name: String,
    pub spec: PortSpec,
}

/// Configuration faults detected while compiling or installing a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The module graph is not a DAG.
    GraphCycle,
    /// A fixed-capacity sequence overflowed; `what` names the limit.
    Capacity { what: &'static str },
    /// A link flows from a voice object into a timbre module. Summing
    /// across voices is a twin module's job, not a link's.
    CrossBoundaryLink,
    /// A link or twin references a port that is not registered on this
    /// synth.
    UnknownEndpoint,
    /// A twin pair's boundary ports disagree on element type.
    TypeMismatch,
    /// The synth structure is not frozen yet.
    NotFinalized,
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::GraphCycle => write!(f, "graph cycle"),
            PlanError::Capacity { what } => write!(f, "capacity exceeded: {}", what),
            PlanError::CrossBoundaryLink => {
                write!(f, "link crosses the voice/timbre boundary")
            }
            PlanError::UnknownEndpoint => write!(f, "link references an unregistered port"),
            PlanError::TypeMismatch => write!(f, "twin ports have mismatched element types"),
            PlanError::NotFinalized => write!(f, "synth is not finalized"),
        }
    }
}

impl std::error::Error for PlanError {}

pub struct Planner<'a> {
    tcontrols: &'a [ControlDesc],
    tmodules: &'a [ModuleDesc],
    vcontrols: &'a [ControlDesc],
    vmodules: &'a [ModuleDesc],
    links: &'a [Link],
    outputs: &'a [ModuleKey],
    resolver: Resolver,
}

struct Partition {
    pre: Subset,
    voice: Subset,
    post: Subset,
}

struct ControlsUsed {
    timbre: Subset,
    voice: Subset,
}

impl<'a> Planner<'a> {
    pub fn new(
        tcontrols: &'a [ControlDesc],
        tmodules: &'a [ModuleDesc],
        vcontrols: &'a [ControlDesc],
        vmodules: &'a [ModuleDesc],
        links: &'a [Link],
        outputs: &'a [ModuleKey],
    ) -> Self {
        // Timbre objects are added before voice objects so the combined
        // resolver's timbre prefix matches the timbre-only resolver.
        let mut resolver = Resolver::new();
        for c in tcontrols {
            resolver.add_control(c.key, &c.spec);
        }
        for m in tmodules {
            resolver.add_module(m.key, &m.spec);
        }
        for c in vcontrols {
            resolver.add_control(c.key, &c.spec);
        }
        for m in vmodules {
            resolver.add_module(m.key, &m.spec);
        }
        resolver.finalize();
        Self {
            tcontrols,
            tmodules,
            vcontrols,
            vmodules,
            links,
            outputs,
            resolver,
        }
    }

    /// The combined timbre+voice resolver the plan's voice-side indices
    /// refer to.
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn make_plan(&self) -> Result<Plan, PlanError> {
        let (preds, links_to) = self.relations()?;
        self.check_twins()?;

        let parts = self.partition_modules_used(&preds);
        let timbre_mods = parts.pre | parts.post;
        let voice_mods = parts.voice;
        let mods_used = timbre_mods | voice_mods;
        let controls_used = self.find_controls_used(mods_used);
        let no_controls = self.resolver.controls().none();
        let no_mods = self.resolver.modules().none();

        let mut plan = Plan::new();

        self.assemble_prep_steps(timbre_mods, &links_to, &mut plan, Phase::TimbrePrep)?;
        self.assemble_prep_steps(voice_mods, &links_to, &mut plan, Phase::VoicePrep)?;

        self.assemble_render_steps(
            controls_used.timbre,
            parts.pre,
            no_mods,
            timbre_mods,
            &preds,
            &links_to,
            &mut plan,
            Phase::PreRender,
        )?;
        self.assemble_render_steps(
            controls_used.voice,
            voice_mods,
            parts.pre,
            voice_mods,
            &preds,
            &links_to,
            &mut plan,
            Phase::VoiceRender,
        )?;
        self.assemble_render_steps(
            no_controls,
            parts.post,
            parts.pre | parts.voice,
            timbre_mods,
            &preds,
            &links_to,
            &mut plan,
            Phase::PostRender,
        )?;

        Ok(plan)
    }

    /// Build the module-predecessor relation and the links-to-port map.
    ///
    /// Also validates every link endpoint: all ports must be registered, and
    /// no signal may flow from a voice object into a timbre module.
    fn relations(&self) -> Result<(Vec<Subset>, Vec<Vec<u16>>), PlanError> {
        let modules = self.resolver.modules();
        let mut preds: Vec<Subset> = vec![modules.none(); modules.len()];
        let mut links_to: Vec<Vec<u16>> = vec![Vec::new(); self.resolver.port_count()];

        let vmodule_set = modules.subset(self.vmodules.iter().map(|m| m.key));

        for (li, link) in self.links.iter().enumerate() {
            let dest = self
                .resolver
                .find_port(link.dest().key)
                .ok_or(PlanError::UnknownEndpoint)?;
            let dest_mod = match link.dest().key.owner {
                OwnerKey::Module(m) => m,
                OwnerKey::Control(_) => return Err(PlanError::UnknownEndpoint),
            };
            let di = modules.find(dest_mod).ok_or(PlanError::UnknownEndpoint)? as usize;
            let dest_is_voice = vmodule_set.contains(di);

            for out in [link.src(), link.ctl()].into_iter().flatten() {
                self.resolver
                    .find_port(out.key)
                    .ok_or(PlanError::UnknownEndpoint)?;
                match out.key.owner {
                    OwnerKey::Module(m) => {
                        let si = modules.find(m).ok_or(PlanError::UnknownEndpoint)? as usize;
                        if vmodule_set.contains(si) && !dest_is_voice {
                            return Err(PlanError::CrossBoundaryLink);
                        }
                        preds[di].insert(si);
                    }
                    OwnerKey::Control(c) => {
                        let from_voice = self.vcontrols.iter().any(|vc| vc.key == c);
                        if from_voice && !dest_is_voice {
                            return Err(PlanError::CrossBoundaryLink);
                        }
                    }
                }
            }

            links_to[dest as usize].push(li as u16);
        }

        // Twin pairs act as a simple connection across the boundary: the
        // timbre side depends on the voice side. An explicit link into the
        // timbre side overrides the relation.
        for m in self.tmodules {
            if let Some(twin) = m.twin {
                let ti = modules.index(m.key) as usize;
                let vi = modules.find(twin).ok_or(PlanError::UnknownEndpoint)? as usize;
                let has_explicit = self
                    .resolver
                    .module_ports(ti)
                    .any(|p| !links_to[p].is_empty());
                if !has_explicit {
                    preds[ti].insert(vi);
                }
            }
        }

        Ok((preds, links_to))
    }

    fn check_twins(&self) -> Result<(), PlanError> {
        for m in self.tmodules {
            let Some(twin) = m.twin else { continue };
            let partner = self
                .vmodules
                .iter()
                .find(|v| v.key == twin)
                .ok_or(PlanError::UnknownEndpoint)?;
            let out_ty = m.spec.outputs().next().map(|(_, d)| d.ty);
            let in_ty = partner.spec.inputs().next().map(|(_, d)| d.ty);
            if let (Some(a), Some(b)) = (out_ty, in_ty) {
                if a != b {
                    return Err(PlanError::TypeMismatch);
                }
            }
        }
        Ok(())
    }

    fn partition_modules_used(&self, preds: &[Subset]) -> Partition {
        let modules = self.resolver.modules();
        let outputs_used = modules.subset(self.outputs.iter().copied());
        let all_tmods = modules.subset(self.tmodules.iter().map(|m| m.key));
        let all_vmods = modules.subset(self.vmodules.iter().map(|m| m.key));

        let post = outputs_used | collect_pred(outputs_used, all_tmods, preds, modules.none());
        let voice = collect_pred(post, all_vmods, preds, modules.none());
        let pre = collect_pred(voice, all_tmods, preds, modules.none());

        debug_assert!(voice.is_subset_of(&all_vmods));
        debug_assert!((pre & post).is_empty(), "pre and post partitions overlap");
        debug_assert!((pre | post).is_subset_of(&all_tmods));
        Partition { pre, voice, post }
    }

    fn find_controls_used(&self, mods_used: Subset) -> ControlsUsed {
        let controls = self.resolver.controls();
        let modules = self.resolver.modules();
        let mut timbre = controls.none();
        let mut voice = controls.none();
        for link in self.links {
            let OwnerKey::Module(dest_mod) = link.dest().key.owner else {
                continue;
            };
            let Some(di) = modules.find(dest_mod) else {
                continue;
            };
            if !mods_used.contains(di as usize) {
                continue;
            }
            // A control feeding a used module needs a render step whether
            // it is wired as the source or as the modulator.
            for out in [link.src(), link.ctl()].into_iter().flatten() {
                let OwnerKey::Control(ck) = out.key.owner else {
                    continue;
                };
                let ci = controls.index(ck) as usize;
                if self.tcontrols.iter().any(|c| c.key == ck) {
                    timbre.insert(ci);
                }
                if self.vcontrols.iter().any(|c| c.key == ck) {
                    voice.insert(ci);
                }
            }
        }
        ControlsUsed { timbre, voice }
    }

    fn assemble_prep_steps(
        &self,
        modules: Subset,
        links_to: &[Vec<u16>],
        plan: &mut Plan,
        phase: Phase,
    ) -> Result<(), PlanError> {
        for mi in modules.iter() {
            for p in self.resolver.module_ports(mi) {
                if self.resolver.port_dir(p) != PortDir::Input {
                    continue;
                }
                let incoming = &links_to[p];
                let step = if incoming.is_empty() {
                    // Unconnected input: silence.
                    PrepStep::Clear {
                        port: p as u16,
                        value: 0.0,
                    }
                } else if let [single] = incoming[..] {
                    let link = &self.links[single as usize];
                    if link.is_constant() {
                        // Constant fan-in folds into the prep fill.
                        PrepStep::Clear {
                            port: p as u16,
                            value: link.scale(),
                        }
                    } else if let Some(src) = self.aliasable_source(link, modules) {
                        PrepStep::Alias {
                            dest: p as u16,
                            src: Some(src),
                        }
                    } else {
                        PrepStep::Alias {
                            dest: p as u16,
                            src: None,
                        }
                    }
                } else {
                    // Complex fan-in: reset any previous aliasing.
                    PrepStep::Alias {
                        dest: p as u16,
                        src: None,
                    }
                };
                match phase {
                    Phase::TimbrePrep => plan.push_t_prep(step)?,
                    Phase::VoicePrep => plan.push_v_prep(step)?,
                    _ => unreachable!("prep step in a render phase"),
                }
            }
        }
        Ok(())
    }

    /// The source port index, if this link may be aliased within the given
    /// partition: simple, and sourced from a module in the same partition.
    fn aliasable_source(&self, link: &Link, partition: Subset) -> Option<u16> {
        if !link.is_simple() {
            return None;
        }
        let src = link.src()?;
        let OwnerKey::Module(owner) = src.key.owner else {
            return None;
        };
        let si = self.resolver.modules().find(owner)?;
        if !partition.contains(si as usize) {
            return None;
        }
        self.resolver.find_port(src.key)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_render_steps(
        &self,
        controls: Subset,
        section: Subset,
        done_init: Subset,
        alias_partition: Subset,
        preds: &[Subset],
        links_to: &[Vec<u16>],
        plan: &mut Plan,
        phase: Phase,
    ) -> Result<(), PlanError> {
        let mut push = |step: RenderStep, plan: &mut Plan| match phase {
            Phase::PreRender => plan.push_pre_render(step),
            Phase::VoiceRender => plan.push_v_render(step),
            Phase::PostRender => plan.push_post_render(step),
            _ => unreachable!("render step in a prep phase"),
        };

        for ci in controls.iter() {
            push(RenderStep::Control { ctl: ci as u16 }, plan)?;
        }

        let mut done = done_init;
        while (section - done).any() {
            let mut ready = self.resolver.modules().none();
            for mi in (section - done).iter() {
                if preds[mi].is_subset_of(&done) {
                    ready.insert(mi);
                }
            }
            if ready.is_empty() {
                return Err(PlanError::GraphCycle);
            }
            for mi in ready.iter() {
                for p in self.resolver.module_ports(mi) {
                    if self.resolver.port_dir(p) != PortDir::Input {
                        continue;
                    }
                    let incoming = &links_to[p];
                    let mut copied = false;
                    for &li in incoming {
                        let link = &self.links[li as usize];
                        if incoming.len() == 1 {
                            if link.is_constant() {
                                // Folded into the prep fill.
                                break;
                            }
                            if self.aliasable_source(link, alias_partition).is_some() {
                                // Aliased at prep time.
                                break;
                            }
                        }
                        let src = link.src().and_then(|s| self.resolver.find_port(s.key));
                        let ctl = link.ctl().and_then(|c| self.resolver.find_port(c.key));
                        let step = if !copied {
                            copied = true;
                            RenderStep::Copy {
                                dest: p as u16,
                                src,
                                ctl,
                                link: li,
                            }
                        } else {
                            RenderStep::Add {
                                dest: p as u16,
                                src,
                                ctl,
                                link: li,
                            }
                        };
                        push(step, plan)?;
                    }
                }
                push(RenderStep::Module { module: mi as u16 }, plan)?;
            }
            done = done | ready;
        }
        Ok(())
    }
}

/// Transitive predecessors of `succ`, restricted to `candidates`.
fn collect_pred(succ: Subset, candidates: Subset, preds: &[Subset], none: Subset) -> Subset {
    let mut collected = none;
    let mut cur = succ;
    loop {
        let mut prev = none;
        for mi in cur.iter() {
            prev = prev | preds[mi];
        }
        prev = prev & candidates;
        let fresh = prev - collected;
        if fresh.is_empty() {
            break;
        }
        collected = collected | fresh;
        cur = fresh;
    }
    collected
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    TimbrePrep,
    VoicePrep,
    PreRender,
    VoiceRender,
    PostRender,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::DEFAULT_SCALE;
    use crate::module::{InRef, OutRef};
    use crate::port::{ElementType, PortDef};
    use slotmap::SlotMap;

    fn key_index<K: slotmap::Key>(map: &SlotMap<K, ()>) -> usize {
        map.len()
    }

    struct Rig {
        mods: SlotMap<ModuleKey, ()>,
        ctls: SlotMap<ControlKey, ()>,
        tcontrols: Vec<ControlDesc>,
        tmodules: Vec<ModuleDesc>,
        vcontrols: Vec<ControlDesc>,
        vmodules: Vec<ModuleDesc>,
        links: Vec<Link>,
        outputs: Vec<ModuleKey>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                mods: SlotMap::with_key(),
                ctls: SlotMap::with_key(),
                tcontrols: Vec::new(),
                tmodules: Vec::new(),
                vcontrols: Vec::new(),
                vmodules: Vec::new(),
                links: Vec::new(),
                outputs: Vec::new(),
            }
        }

        fn module(&mut self, voice: bool, ports: &[(&str, PortDir)]) -> ModuleKey {
            let key = self.mods.insert(());
            let spec = PortSpec::new(
                ports
                    .iter()
                    .map(|(name, dir)| match dir {
                        PortDir::Input => PortDef::input(*name, ElementType::F32),
                        PortDir::Output => PortDef::output(*name, ElementType::F32),
                    })
                    .collect(),
            );
            let desc = ModuleDesc {
                key,
                name: format!("m{}", key_index(&self.mods)),
                spec,
                twin: None,
            };
            if voice {
                self.vmodules.push(desc);
            } else {
                self.tmodules.push(desc);
            }
            key
        }

        fn control(&mut self, voice: bool) -> ControlKey {
            let key = self.ctls.insert(());
            let desc = ControlDesc {
                key,
                name: format!("c{}", key_index(&self.ctls)),
                spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            };
            if voice {
                self.vcontrols.push(desc);
            } else {
                self.tcontrols.push(desc);
            }
            key
        }

        fn set_twin(&mut self, timbre_side: ModuleKey, voice_side: ModuleKey) {
            let desc = self
                .tmodules
                .iter_mut()
                .find(|m| m.key == timbre_side)
                .unwrap();
            desc.twin = Some(voice_side);
        }

        fn in_ref(&self, m: ModuleKey, port: u8) -> InRef {
            InRef {
                key: PortKey {
                    owner: OwnerKey::Module(m),
                    port,
                },
                ty: ElementType::F32,
            }
        }

        fn out_ref(&self, m: ModuleKey, port: u8) -> OutRef {
            OutRef {
                key: PortKey {
                    owner: OwnerKey::Module(m),
                    port,
                },
                ty: ElementType::F32,
            }
        }

        fn ctl_ref(&self, c: ControlKey) -> OutRef {
            OutRef {
                key: PortKey {
                    owner: OwnerKey::Control(c),
                    port: 0,
                },
                ty: ElementType::F32,
            }
        }

        fn plan(&self) -> Result<Plan, PlanError> {
            Planner::new(
                &self.tcontrols,
                &self.tmodules,
                &self.vcontrols,
                &self.vmodules,
                &self.links,
                &self.outputs,
            )
            .make_plan()
        }
    }

    /// A typical small synth: voice oscillator into a summing twin pair
    /// into an output sink, with a constant frequency.
    fn beep_rig() -> (Rig, ModuleKey, ModuleKey, ModuleKey, ModuleKey) {
        let mut rig = Rig::new();
        let sumout = rig.module(false, &[("out", PortDir::Output)]);
        let sink = rig.module(false, &[("in", PortDir::Input)]);
        let osc = rig.module(
            true,
            &[("freq", PortDir::Input), ("out", PortDir::Output)],
        );
        let sumin = rig.module(true, &[("in", PortDir::Input)]);
        rig.set_twin(sumout, sumin);
        rig.outputs.push(sink);

        let freq = rig.in_ref(osc, 0);
        rig.links.push(Link::new(freq, None, None, 440.0));
        rig.links.push(Link::new(
            rig.in_ref(sumin, 0),
            Some(rig.out_ref(osc, 1)),
            None,
            DEFAULT_SCALE,
        ));
        rig.links.push(Link::new(
            rig.in_ref(sink, 0),
            Some(rig.out_ref(sumout, 0)),
            None,
            DEFAULT_SCALE,
        ));
        (rig, sumout, sink, osc, sumin)
    }

    #[test]
    fn beep_plan_aliases_and_folds() {
        let (rig, _, _, _, _) = beep_rig();
        let plan = rig.plan().unwrap();

        // Port layout: sumout.out=0, sink.in=1, osc.freq=2, osc.out=3,
        // sumin.in=4. Module indices: sumout=0, sink=1, osc=2, sumin=3.
        assert_eq!(
            plan.t_prep(),
            &[PrepStep::Alias {
                dest: 1,
                src: Some(0)
            }]
        );
        assert_eq!(
            plan.v_prep(),
            &[
                PrepStep::Clear {
                    port: 2,
                    value: 440.0
                },
                PrepStep::Alias {
                    dest: 4,
                    src: Some(3)
                },
            ]
        );
        assert!(plan.pre_render().is_empty());
        // Aliased and folded links emit no copy steps.
        assert_eq!(
            plan.v_render(),
            &[
                RenderStep::Module { module: 2 },
                RenderStep::Module { module: 3 },
            ]
        );
        assert_eq!(
            plan.post_render(),
            &[
                RenderStep::Module { module: 0 },
                RenderStep::Module { module: 1 },
            ]
        );
    }

    #[test]
    fn plans_are_deterministic() {
        let (rig, ..) = beep_rig();
        assert_eq!(rig.plan().unwrap(), rig.plan().unwrap());
    }

    #[test]
    fn unreachable_modules_are_elided() {
        let (mut rig, ..) = beep_rig();
        // A dangling LFO nobody listens to.
        let lfo = rig.module(false, &[("out", PortDir::Output)]);
        let plan = rig.plan().unwrap();
        let lfo_index = Planner::new(
            &rig.tcontrols,
            &rig.tmodules,
            &rig.vcontrols,
            &rig.vmodules,
            &rig.links,
            &rig.outputs,
        )
        .resolver()
        .modules()
        .index(lfo) as u16;
        let renders: Vec<&RenderStep> = plan
            .pre_render()
            .iter()
            .chain(plan.post_render())
            .collect();
        assert!(renders
            .iter()
            .all(|s| !matches!(s, RenderStep::Module { module } if *module == lfo_index)));
    }

    #[test]
    fn cycle_is_detected() {
        let mut rig = Rig::new();
        let a = rig.module(false, &[("in", PortDir::Input), ("out", PortDir::Output)]);
        let b = rig.module(false, &[("in", PortDir::Input), ("out", PortDir::Output)]);
        rig.outputs.push(b);
        rig.links.push(Link::new(
            rig.in_ref(b, 0),
            Some(rig.out_ref(a, 1)),
            None,
            DEFAULT_SCALE,
        ));
        rig.links.push(Link::new(
            rig.in_ref(a, 0),
            Some(rig.out_ref(b, 1)),
            None,
            DEFAULT_SCALE,
        ));
        assert_eq!(rig.plan().unwrap_err(), PlanError::GraphCycle);
        assert_eq!(PlanError::GraphCycle.to_string(), "graph cycle");
    }

    #[test]
    fn fan_in_emits_copy_then_adds_in_declaration_order() {
        let mut rig = Rig::new();
        let a = rig.module(false, &[("out", PortDir::Output)]);
        let b = rig.module(false, &[("out", PortDir::Output)]);
        let mix = rig.module(false, &[("in", PortDir::Input)]);
        rig.outputs.push(mix);
        rig.links.push(Link::new(
            rig.in_ref(mix, 0),
            Some(rig.out_ref(b, 0)),
            None,
            DEFAULT_SCALE,
        ));
        rig.links.push(Link::new(
            rig.in_ref(mix, 0),
            Some(rig.out_ref(a, 0)),
            None,
            0.5,
        ));
        let plan = rig.plan().unwrap();
        // Fan-in means no aliasing: the input is reset instead.
        assert_eq!(plan.t_prep(), &[PrepStep::Alias { dest: 2, src: None }]);
        let copies: Vec<&RenderStep> = plan
            .post_render()
            .iter()
            .filter(|s| matches!(s, RenderStep::Copy { .. } | RenderStep::Add { .. }))
            .collect();
        assert_eq!(copies.len(), 2);
        assert!(matches!(copies[0], RenderStep::Copy { link: 0, .. }));
        assert!(matches!(copies[1], RenderStep::Add { link: 1, .. }));
    }

    #[test]
    fn voice_to_timbre_link_is_rejected() {
        let mut rig = Rig::new();
        let sink = rig.module(false, &[("in", PortDir::Input)]);
        let osc = rig.module(true, &[("out", PortDir::Output)]);
        rig.outputs.push(sink);
        rig.links.push(Link::new(
            rig.in_ref(sink, 0),
            Some(rig.out_ref(osc, 0)),
            None,
            DEFAULT_SCALE,
        ));
        assert_eq!(rig.plan().unwrap_err(), PlanError::CrossBoundaryLink);
    }

    #[test]
    fn voice_controls_render_in_the_voice_phase() {
        let (mut rig, _, _, osc, _) = beep_rig();
        let env = rig.control(true);
        // Replace the constant freq with an enveloped one: freq = env.
        rig.links[0] = Link::new(rig.in_ref(osc, 0), None, Some(rig.ctl_ref(env)), 880.0);
        let plan = rig.plan().unwrap();
        assert!(matches!(plan.v_render()[0], RenderStep::Control { .. }));
        // The ctl-only link needs a per-chunk copy now.
        assert!(plan
            .v_render()
            .iter()
            .any(|s| matches!(s, RenderStep::Copy { src: None, ctl: Some(_), .. })));
        // And the prep step resets rather than folds.
        assert!(plan
            .v_prep()
            .iter()
            .any(|s| matches!(s, PrepStep::Alias { src: None, .. })));
    }

    #[test]
    fn timbre_lfo_feeding_a_voice_schedules_pre_phase() {
        let (mut rig, _, _, osc, _) = beep_rig();
        let lfo = rig.module(false, &[("out", PortDir::Output)]);
        // Vibrato: freq input now has constant + LFO fan-in.
        rig.links.push(Link::new(
            rig.in_ref(osc, 0),
            Some(rig.out_ref(lfo, 0)),
            None,
            10.0,
        ));
        let plan = rig.plan().unwrap();
        let lfo_index = Planner::new(
            &rig.tcontrols,
            &rig.tmodules,
            &rig.vcontrols,
            &rig.vmodules,
            &rig.links,
            &rig.outputs,
        )
        .resolver()
        .modules()
        .index(lfo) as u16;
        assert_eq!(
            plan.pre_render(),
            &[RenderStep::Module { module: lfo_index }]
        );
        // The voice phase copies the constant, then adds the LFO.
        assert!(plan
            .v_render()
            .iter()
            .any(|s| matches!(s, RenderStep::Copy { src: None, ctl: None, .. })));
        assert!(plan
            .v_render()
            .iter()
            .any(|s| matches!(s, RenderStep::Add { src: Some(_), .. })));
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let mut rig = Rig::new();
        let sink = rig.module(false, &[("in", PortDir::Input)]);
        rig.outputs.push(sink);
        let ghost = rig.mods.insert(());
        rig.links.push(Link::new(
            rig.in_ref(sink, 0),
            Some(rig.out_ref(ghost, 0)),
            None,
            DEFAULT_SCALE,
        ));
        assert_eq!(rig.plan().unwrap_err(), PlanError::UnknownEndpoint);
    }
}
