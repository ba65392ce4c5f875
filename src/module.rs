//! Modules and controls: the signal producers and consumers of the engine.
//!
//! A module is a unit of audio processing, very much analogous to a module
//! in a hardware modular synth: it declares an ordered set of ports, and its
//! `render` reads its inputs and writes its outputs one chunk at a time.
//!
//! A control is a specialized module that emits a value stream into a single
//! output port. Voice controls additionally participate in voice lifetime
//! through the `start_note` / `release_note` / `kill_note` / `note_is_done`
//! hooks.
//!
//! Both are registered on the synth's archetype timbre or voice and cloned
//! into the remaining slots at finalize time, so both are trait objects with
//! a boxed-clone contract.

use crate::config::ConfigCtx;
use crate::defs::Sample;
use crate::port::{BufferPool, ElementType, PortDir, PortSpec};
use crate::resolver::Resolver;
use dyn_clone::DynClone;
use slotmap::new_key_type;

new_key_type! {
    /// Stable identity of a registered module.
    pub struct ModuleKey;
    /// Stable identity of a registered control.
    pub struct ControlKey;
}

/// The owner of a port: a module or a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OwnerKey {
    Module(ModuleKey),
    Control(ControlKey),
}

/// A specific port on a specific owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortKey {
    pub owner: OwnerKey,
    /// Index into the owner's port declaration order.
    pub port: u8,
}

/// Reference to an input port, as used by patch links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InRef {
    pub(crate) key: PortKey,
    pub(crate) ty: ElementType,
}

/// Reference to an output port, as used by patch links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutRef {
    pub(crate) key: PortKey,
    pub(crate) ty: ElementType,
}

impl InRef {
    pub fn element_type(&self) -> ElementType {
        self.ty
    }
}

impl OutRef {
    pub fn element_type(&self) -> ElementType {
        self.ty
    }
}

/// Handle returned when a module is registered; resolves port names to
/// typed references for patching.
#[derive(Clone)]
pub struct ModuleHandle {
    pub(crate) key: ModuleKey,
    pub(crate) spec: PortSpec,
}

impl ModuleHandle {
    pub fn key(&self) -> ModuleKey {
        self.key
    }

    /// Reference an input port by name.
    ///
    /// Panics on an unknown name or an output port; handles are only used
    /// while wiring, so a bad name is a programming error.
    pub fn input(&self, name: &str) -> InRef {
        let (port, def) = self
            .spec
            .by_name(name)
            .unwrap_or_else(|| panic!("unknown port: {}", name));
        assert_eq!(def.dir, PortDir::Input, "{} is not an input", name);
        InRef {
            key: PortKey {
                owner: OwnerKey::Module(self.key),
                port,
            },
            ty: def.ty,
        }
    }

    /// Reference an output port by name.
    pub fn output(&self, name: &str) -> OutRef {
        let (port, def) = self
            .spec
            .by_name(name)
            .unwrap_or_else(|| panic!("unknown port: {}", name));
        assert_eq!(def.dir, PortDir::Output, "{} is not an output", name);
        OutRef {
            key: PortKey {
                owner: OwnerKey::Module(self.key),
                port,
            },
            ty: def.ty,
        }
    }

    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }
}

/// Handle returned when a control is registered.
#[derive(Clone)]
pub struct ControlHandle {
    pub(crate) key: ControlKey,
    pub(crate) spec: PortSpec,
}

impl ControlHandle {
    pub fn key(&self) -> ControlKey {
        self.key
    }

    /// Reference the control's output port.
    pub fn out(&self) -> OutRef {
        let (port, def) = self
            .spec
            .outputs()
            .next()
            .expect("control declares no output port");
        OutRef {
            key: PortKey {
                owner: OwnerKey::Control(self.key),
                port,
            },
            ty: def.ty,
        }
    }
}

/// Read access to the attached voices of a timbre, for modules that sum
/// across the voice/timbre boundary.
pub struct VoiceView<'a> {
    pub(crate) voices: &'a [crate::voice::Voice],
    pub(crate) attached: u64,
}

impl<'a> VoiceView<'a> {
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn is_attached(&self, voice: usize) -> bool {
        self.attached & (1 << voice) != 0
    }

    /// Read a voice-pool-local port of one voice, through its redirect.
    pub fn read(&self, voice: usize, port: u16, frames: usize) -> &'a [Sample] {
        &self.voices[voice].pool().read_f32(port as usize)[..frames]
    }
}

/// Everything a module sees while rendering one chunk.
///
/// Port indices are the module's own declaration indices; the context
/// translates them into the owning pool.
pub struct RenderCtx<'a> {
    pub(crate) pool: &'a mut BufferPool,
    pub(crate) base: usize,
    pub(crate) frames: usize,
    pub(crate) voices: Option<VoiceView<'a>>,
}

impl<'a> RenderCtx<'a> {
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Read one of this module's input ports.
    pub fn input(&self, port: usize) -> &[Sample] {
        &self.pool.read_f32(self.base + port)[..self.frames]
    }

    pub fn input_f64(&self, port: usize) -> &[f64] {
        &self.pool.read_f64(self.base + port)[..self.frames]
    }

    /// Write one of this module's output ports.
    pub fn output(&mut self, port: usize) -> &mut [Sample] {
        let frames = self.frames;
        &mut self.pool.write_f32(self.base + port)[..frames]
    }

    pub fn output_f64(&mut self, port: usize) -> &mut [f64] {
        let frames = self.frames;
        &mut self.pool.write_f64(self.base + port)[..frames]
    }

    /// One input and one output, borrowed simultaneously.
    pub fn in_out(&mut self, input: usize, output: usize) -> (&[Sample], &mut [Sample]) {
        let frames = self.frames;
        let (i, o) = self
            .pool
            .read_write_f32(self.base + input, self.base + output);
        (&i[..frames], &mut o[..frames])
    }

    /// Two inputs and one output, borrowed simultaneously.
    pub fn in2_out(
        &mut self,
        input_a: usize,
        input_b: usize,
        output: usize,
    ) -> (&[Sample], &[Sample], &mut [Sample]) {
        let frames = self.frames;
        let (a, b, o) = self.pool.read2_write_f32(
            self.base + input_a,
            self.base + input_b,
            self.base + output,
        );
        (&a[..frames], &b[..frames], &mut o[..frames])
    }

    /// The timbre's attached voices, available during post-render only.
    pub fn voices(&self) -> Option<&VoiceView<'a>> {
        self.voices.as_ref()
    }

    /// Take the voice view out of the context, releasing its borrow so the
    /// module can hold output slices at the same time.
    pub fn take_voices(&mut self) -> Option<VoiceView<'a>> {
        self.voices.take()
    }
}

/// Resolution info handed to timbre modules when a patch is applied.
///
/// Twin modules use it to capture their partner's voice-pool port index.
pub struct Binding<'a> {
    pub(crate) resolver: &'a Resolver,
    pub(crate) timbre_ports: usize,
}

impl Binding<'_> {
    /// Resolve a port of a voice module to its voice-pool-local index.
    pub fn voice_port(&self, key: ModuleKey, port: u8) -> Option<u16> {
        let global = self.resolver.find_port(PortKey {
            owner: OwnerKey::Module(key),
            port,
        })?;
        let global = global as usize;
        if global < self.timbre_ports {
            return None;
        }
        Some((global - self.timbre_ports) as u16)
    }
}

/// A unit of audio processing.
///
/// Implementations declare their ports once (the declaration order defines
/// the resolver's port numbering) and render chunk by chunk. Cloning
/// duplicates the module's parameters but never its external bindings; a
/// clone becomes usable once the engine has re-indexed its ports.
pub trait Module: DynClone + Send {
    fn port_spec(&self) -> &PortSpec;

    /// Render `ctx.frames()` frames, reading inputs and writing outputs.
    fn render(&mut self, ctx: &mut RenderCtx);

    /// Called once at finalize time with the engine configuration.
    fn configure(&mut self, _ctx: &mut ConfigCtx) {}

    /// A second module instance on the other side of the voice/timbre
    /// boundary. The planner treats the pair as connected for scheduling;
    /// an explicit link into a twinned port overrides the relation.
    fn twin(&self) -> Option<ModuleKey> {
        None
    }

    /// Called when a plan is installed, so the module can capture resolved
    /// indices (e.g. its twin's port).
    fn bind(&mut self, _binding: &Binding) {}
}

dyn_clone::clone_trait_object!(Module);

/// A value-stream producer with a single output port.
///
/// Controls on the voice archetype may take part in voice lifetime: a
/// lifecycle control (`is_lifecycle` true) is consulted by the voice's
/// `note_is_done` disjunction, typically an amplitude envelope reporting
/// that it has decayed to silence.
pub trait Control: DynClone + Send {
    fn port_spec(&self) -> &PortSpec;

    fn render(&mut self, ctx: &mut RenderCtx);

    fn configure(&mut self, _ctx: &mut ConfigCtx) {}

    fn start_note(&mut self) {}
    fn release_note(&mut self) {}
    fn kill_note(&mut self) {}

    /// Whether this control's note has finished sounding. Only consulted on
    /// lifecycle controls.
    fn note_is_done(&self) -> bool {
        true
    }

    /// Lifecycle controls participate in the voice-done disjunction.
    fn is_lifecycle(&self) -> bool {
        false
    }
}

dyn_clone::clone_trait_object!(Control);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortDef;
    use slotmap::SlotMap;

    fn handle() -> ModuleHandle {
        let mut keys: SlotMap<ModuleKey, ()> = SlotMap::with_key();
        ModuleHandle {
            key: keys.insert(()),
            spec: PortSpec::new(vec![
                PortDef::input("in", ElementType::F32),
                PortDef::output("out", ElementType::F32),
            ]),
        }
    }

    #[test]
    fn handle_resolves_ports_by_name() {
        let h = handle();
        let input = h.input("in");
        let output = h.output("out");
        assert_eq!(input.key.port, 0);
        assert_eq!(output.key.port, 1);
        assert_eq!(input.element_type(), ElementType::F32);
    }

    #[test]
    #[should_panic(expected = "unknown port")]
    fn handle_panics_on_unknown_name() {
        handle().input("nope");
    }

    #[test]
    #[should_panic(expected = "not an input")]
    fn handle_panics_on_direction_mismatch() {
        handle().input("out");
    }

    #[test]
    fn render_ctx_translates_port_indices() {
        let mut pool = BufferPool::for_layout(&[
            ElementType::F32,
            ElementType::F32,
            ElementType::F32,
        ]);
        pool.write_f32(1).fill(0.5);
        let mut ctx = RenderCtx {
            pool: &mut pool,
            base: 1,
            frames: 8,
            voices: None,
        };
        assert_eq!(ctx.input(0).len(), 8);
        assert_eq!(ctx.input(0)[0], 0.5);
        ctx.output(1).fill(1.0);
        assert_eq!(pool.read_f32(2)[7], 1.0);
    }
}
