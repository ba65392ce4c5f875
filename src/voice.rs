//! Voices: one polyphonic instance, sounding a single note at a time.
//!
//! A voice owns clones of the archetype's voice controls and modules, a
//! buffer pool for their ports, and the action list bound when it attached
//! to a timbre. Its lifetime is a small state machine:
//!
//! | from      | event                        | to        |
//! |-----------|------------------------------|-----------|
//! | Idle      | `start_note`                 | Sounding  |
//! | Sounding  | `release_note`               | Releasing |
//! | Sounding  | `kill_note`                  | Stopping  |
//! | Releasing | render done && note is done  | Idle      |
//! | Releasing | `kill_note`                  | Stopping  |
//! | Stopping  | shutdown frames elapsed      | Idle      |
//!
//! Stopping is the soft-shutdown ramp of a stolen voice: it keeps rendering
//! for `NOTE_SHUTDOWN_TIME` worth of frames so the amplitude can reach zero
//! without a click, then goes idle.

use crate::action::{self, Action};
use crate::config::ConfigCtx;
use crate::defs::{MAX_FRAMES, MAX_RENDER_STEPS, NOTE_SHUTDOWN_TIME};
use crate::module::{Control, Module};
use crate::port::BufferPool;

/// The lifecycle state of a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Not sounding, not attached to any timbre.
    Idle,
    /// Playing a note.
    Sounding,
    /// Note released, envelopes decaying.
    Releasing,
    /// Killed; running the shutdown ramp before going idle.
    Stopping,
}

/// One polyphonic voice.
#[derive(Clone)]
pub struct Voice {
    controls: Vec<Box<dyn Control>>,
    modules: Vec<Box<dyn Module>>,
    pool: BufferPool,
    control_bases: Vec<u16>,
    module_bases: Vec<u16>,
    actions: Vec<Action>,
    state: VoiceState,
    timbre: Option<usize>,
    /// Global-index offsets into the combined timbre+voice resolver.
    control_offset: usize,
    module_offset: usize,
    port_offset: usize,
    shutdown_total: i64,
    shutdown_remaining: i64,
    age: u64,
}

impl Voice {
    pub(crate) fn new() -> Self {
        Self {
            controls: Vec::new(),
            modules: Vec::new(),
            pool: BufferPool::for_layout(&[]),
            control_bases: Vec::new(),
            module_bases: Vec::new(),
            actions: Vec::with_capacity(MAX_RENDER_STEPS),
            state: VoiceState::Idle,
            timbre: None,
            control_offset: 0,
            module_offset: 0,
            port_offset: 0,
            shutdown_total: 0,
            shutdown_remaining: 0,
            age: 0,
        }
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// The timbre this voice is attached to, if any.
    pub fn timbre(&self) -> Option<usize> {
        self.timbre
    }

    /// Render calls since the note started.
    pub fn age(&self) -> u64 {
        self.age
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

    pub(crate) fn controls_mut(&mut self) -> &mut [Box<dyn Control>] {
        &mut self.controls
    }

    pub(crate) fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    pub(crate) fn set_layout(
        &mut self,
        pool: BufferPool,
        control_bases: Vec<u16>,
        module_bases: Vec<u16>,
        control_offset: usize,
        module_offset: usize,
        port_offset: usize,
    ) {
        self.pool = pool;
        self.control_bases = control_bases;
        self.module_bases = module_bases;
        self.control_offset = control_offset;
        self.module_offset = module_offset;
        self.port_offset = port_offset;
    }

    pub(crate) fn configure(&mut self, ctx: &mut ConfigCtx) {
        self.shutdown_total = (NOTE_SHUTDOWN_TIME * ctx.sample_rate as f32).ceil() as i64;
        for c in &mut self.controls {
            c.configure(ctx);
        }
        for m in &mut self.modules {
            m.configure(ctx);
        }
    }

    /// Bind the timbre's voice-render actions into this voice. Reuses the
    /// existing allocation; voices attach between render chunks.
    pub(crate) fn install_actions(&mut self, actions: &[Action], timbre: usize) {
        self.actions.clear();
        self.actions.extend_from_slice(actions);
        self.timbre = Some(timbre);
    }

    pub(crate) fn clear_timbre(&mut self) {
        self.timbre = None;
    }

    pub(crate) fn port_offset(&self) -> usize {
        self.port_offset
    }

    /// Start a note: enter Sounding and notify every control.
    pub fn start_note(&mut self) {
        debug_assert_eq!(self.state, VoiceState::Idle, "start_note on a busy voice");
        self.state = VoiceState::Sounding;
        self.age = 0;
        for c in &mut self.controls {
            c.start_note();
        }
    }

    /// Release the note: begin envelope decay.
    pub fn release_note(&mut self) {
        if self.state == VoiceState::Sounding {
            self.state = VoiceState::Releasing;
            for c in &mut self.controls {
                c.release_note();
            }
        }
    }

    /// Kill the note: run the shutdown ramp, then go idle.
    pub fn kill_note(&mut self) {
        if matches!(self.state, VoiceState::Sounding | VoiceState::Releasing) {
            self.state = VoiceState::Stopping;
            self.shutdown_remaining = self.shutdown_total;
            for c in &mut self.controls {
                c.kill_note();
            }
        }
    }

    /// Whether the note has finished sounding: the disjunction over the
    /// lifecycle controls' `note_is_done`. A voice with no lifecycle
    /// controls is done as soon as it is released.
    pub fn note_is_done(&self) -> bool {
        let mut has_lifecycle = false;
        for c in &self.controls {
            if c.is_lifecycle() {
                if c.note_is_done() {
                    return true;
                }
                has_lifecycle = true;
            }
        }
        !has_lifecycle
    }

    /// Render one chunk and step the state machine. Returns true when the
    /// voice just went idle, so the caller can detach it from its timbre.
    pub fn render(&mut self, frames: usize, timbre_pool: &BufferPool) -> bool {
        debug_assert!(frames <= MAX_FRAMES);
        if self.state == VoiceState::Idle {
            return false;
        }
        let mut scope = action::Scope {
            pool: &mut self.pool,
            upstream: Some(timbre_pool),
            controls: &mut self.controls,
            modules: &mut self.modules,
            control_bases: &self.control_bases,
            module_bases: &self.module_bases,
            control_offset: self.control_offset,
            module_offset: self.module_offset,
            port_offset: self.port_offset,
            voices: None,
        };
        action::run(&self.actions, frames, &mut scope);
        self.age += 1;

        match self.state {
            VoiceState::Releasing if self.note_is_done() => {
                self.state = VoiceState::Idle;
                true
            }
            VoiceState::Stopping => {
                self.shutdown_remaining -= frames as i64;
                if self.shutdown_remaining <= 0 {
                    self.state = VoiceState::Idle;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::Sample;
    use crate::module::RenderCtx;
    use crate::port::PortSpec;

    /// Minimal amplitude envelope standing in for a lifecycle control.
    #[derive(Clone)]
    struct Env {
        level: Sample,
        releasing: bool,
    }

    impl Env {
        fn new() -> Self {
            Self {
                level: 0.0,
                releasing: false,
            }
        }
    }

    impl Control for Env {
        fn port_spec(&self) -> &PortSpec {
            unimplemented!("not rendered in these tests")
        }
        fn render(&mut self, _ctx: &mut RenderCtx) {}
        fn start_note(&mut self) {
            self.level = 1.0;
            self.releasing = false;
        }
        fn release_note(&mut self) {
            self.releasing = true;
            self.level = 0.5;
        }
        fn kill_note(&mut self) {
            self.level = 0.0;
        }
        fn note_is_done(&self) -> bool {
            self.releasing && self.level <= 0.0
        }
        fn is_lifecycle(&self) -> bool {
            true
        }
    }

    fn configured_voice() -> Voice {
        let mut v = Voice::new();
        let mut ctx = ConfigCtx {
            sample_rate: 44_100,
            midi: None,
            scope: crate::config::ConfigScope::Voice(0),
        };
        v.configure(&mut ctx);
        v
    }

    #[test]
    fn bare_voice_idles_right_after_release() {
        let mut v = configured_voice();
        let pool = BufferPool::for_layout(&[]);
        assert_eq!(v.state(), VoiceState::Idle);
        v.start_note();
        assert_eq!(v.state(), VoiceState::Sounding);
        v.release_note();
        assert_eq!(v.state(), VoiceState::Releasing);
        assert!(v.render(1, &pool));
        assert_eq!(v.state(), VoiceState::Idle);
    }

    #[test]
    fn kill_runs_the_shutdown_ramp() {
        let mut v = configured_voice();
        let pool = BufferPool::for_layout(&[]);
        v.start_note();
        v.kill_note();
        assert_eq!(v.state(), VoiceState::Stopping);

        // ceil(0.010 * 44100) = 441 frames; ceil(441 / 64) = 7 chunks.
        let chunks = (NOTE_SHUTDOWN_TIME * 44_100.0 / MAX_FRAMES as f32).ceil() as usize;
        for i in 0..chunks {
            assert_eq!(v.state(), VoiceState::Stopping, "chunk {}", i);
            let went_idle = v.render(MAX_FRAMES, &pool);
            assert_eq!(went_idle, i == chunks - 1);
        }
        assert_eq!(v.state(), VoiceState::Idle);
    }

    #[test]
    fn kill_from_releasing_also_stops() {
        let mut v = configured_voice();
        v.add_control(Box::new(Env::new()));
        v.start_note();
        v.release_note();
        assert_eq!(v.state(), VoiceState::Releasing);
        v.kill_note();
        assert_eq!(v.state(), VoiceState::Stopping);
    }

    #[test]
    fn lifecycle_control_gates_release() {
        let mut v = configured_voice();
        v.add_control(Box::new(Env::new()));
        let pool = BufferPool::for_layout(&[]);
        v.start_note();
        v.release_note();
        // Envelope still at 0.5: not done.
        assert!(!v.render(4, &pool));
        assert_eq!(v.state(), VoiceState::Releasing);
        // Force the envelope to silence.
        if let Some(c) = v.controls_mut().first_mut() {
            c.kill_note();
        }
        assert!(v.render(4, &pool));
        assert_eq!(v.state(), VoiceState::Idle);
    }

    #[test]
    fn release_from_idle_is_a_no_op() {
        let mut v = configured_voice();
        v.release_note();
        assert_eq!(v.state(), VoiceState::Idle);
        v.kill_note();
        assert_eq!(v.state(), VoiceState::Idle);
    }
}
