//! # Tessitura: a polyphonic, multitimbral synthesizer engine
//!
//! `tessitura` is the core of a modular software synthesizer: given a set
//! of sound-generating modules, a set of controls (including MIDI-driven
//! ones), and a *patch* describing how they are wired, it renders audio
//! sample frames, offline or in real time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  MIDI: parser → dispatcher → note manager    │  drives voices and
//! │        layering · modes · RPN/NRPN           │  control values
//! ├──────────────────────────────────────────────┤
//! │  Planner: patch → plan                       │  build time
//! │  reachability · aliasing · topological order │
//! ├──────────────────────────────────────────────┤
//! │  Render: timbres and voices run bound        │  chunk by chunk,
//! │  action lists over preallocated buffers      │  allocation-free
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The embedder populates an *archetype* timbre and voice, freezes the
//! structure, and applies a patch; the planner compiles the patch into five
//! index-based step lists (timbre prep, voice prep, pre-render,
//! voice-render, post-render) that are bound into straight-line action
//! lists. Trivial connections are *aliased* (the destination reads the
//! source's buffer directly) instead of copied.
//!
//! ## Quick start
//!
//! ```rust
//! use tessitura::prelude::*;
//!
//! // One voice, one timbre: a square beep.
//! let mut synth = Synth::new("beep", 1, 1);
//! let osc = synth.add_voice_module("osc", NaiveSquare::new());
//! let sum_in = synth.add_voice_module("sum", SumInput::new());
//! let sum_out = synth.add_timbre_module("sum", SumOutput::new(&sum_in), false);
//! let out = synth.add_timbre_module("out", AudioOut::new(), true);
//!
//! let mut patch = Patch::new();
//! patch.constant(osc.input("freq"), 440.0).unwrap();
//! patch.connect(osc.output("out"), sum_in.input("in")).unwrap();
//! patch.connect(sum_out.output("out"), out.input("in")).unwrap();
//!
//! synth.finalize(&mut Config::new(44_100)).unwrap();
//! synth.apply_patch(&patch, 0).unwrap();
//!
//! synth.attach_voice_to_timbre(0, 0);
//! synth.voices_mut()[0].start_note();
//! synth.render_chunk(64);
//! let samples = synth.output(0, 64);
//! assert_eq!(samples[0], 1.0);
//! ```
//!
//! ## Voices and MIDI
//!
//! Voices move through `Idle → Sounding → Releasing → Idle`, with a
//! `Stopping` shutdown ramp when a voice is stolen. The MIDI facade parses
//! raw bytes, routes notes through the channel→timbre layering, allocates
//! voices through a pluggable [`assign::Assigner`], and maintains the
//! damper/sostenuto note masks and RPN/NRPN state machines.
//!
//! MIDI bytes must arrive between render chunks; the render path itself
//! never allocates, locks, or dispatches on types.

mod action;

pub mod assign;
pub mod config;
pub mod controls;
pub mod defs;
pub mod link;
pub mod midi;
pub mod module;
pub mod modules;
pub mod patch;
pub mod plan;
pub mod planner;
pub mod port;
pub mod resolver;
pub mod synth;
pub mod timbre;
pub mod universe;
pub mod voice;

/// Prelude for embedders.
pub mod prelude {
    pub use crate::assign::{Assigner, PriorityAssigner};
    pub use crate::config::{Config, ConfigCtx, ConfigScope};
    pub use crate::controls::EnvelopeControl;
    pub use crate::defs::{Sample, Scale, MAX_FRAMES, MAX_POLYPHONY, MAX_TIMBRALITY};
    pub use crate::link::Link;
    pub use crate::midi::{
        CcControl, ChannelPressureControl, Facade, NoteControl, Parser, SmallMessage,
        VelocityControl,
    };
    pub use crate::module::{
        Control, ControlHandle, InRef, Module, ModuleHandle, OutRef, RenderCtx,
    };
    pub use crate::modules::{Amp, AudioOut, NaiveSaw, NaiveSquare, SumInput, SumOutput};
    pub use crate::patch::Patch;
    pub use crate::plan::{Plan, PrepStep, RenderStep};
    pub use crate::planner::PlanError;
    pub use crate::port::{ElementType, PortDef, PortSpec};
    pub use crate::synth::Synth;
    pub use crate::timbre::Timbre;
    pub use crate::voice::{Voice, VoiceState};
}

pub use prelude::*;
