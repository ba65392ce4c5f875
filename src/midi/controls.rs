//! MIDI-driven controls.
//!
//! These controls bridge the MIDI subsystem into the signal graph. Each one
//! owns a shared atomic cell; during finalize it registers a handler with
//! the note manager or dispatcher that writes the cell, and every chunk its
//! `render` reads the cell into its output port. Handlers run between
//! chunks on the control side, so the cells are the only state the two
//! paths share.
//!
//! Cloning a MIDI control gives the clone a fresh cell: each voice or
//! timbre copy binds to its own slot when it is configured.

use super::defs::cc as cc_defs;
use crate::config::ConfigCtx;
use crate::module::{Control, RenderCtx};
use crate::port::{ElementType, PortDef, PortSpec};
use libm::Libm;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Lock-free f32 cell for handler-to-render communication.
///
/// Uses `AtomicU32` internally since there is no native atomic f32.
#[derive(Debug, Default)]
pub struct AtomicSample(AtomicU32);

impl AtomicSample {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Clone for AtomicSample {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// Equal temperament: note 69 (A4) is 440 Hz.
pub fn note_to_freq(note: u8) -> f64 {
    440.0 * Libm::<f64>::pow(2.0, (note as f64 - 69.0) / 12.0)
}

/// Note-number control: emits the current note's frequency in Hz.
pub struct NoteControl {
    spec: PortSpec,
    cell: Arc<AtomicSample>,
}

impl NoteControl {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F64)]),
            cell: Arc::new(AtomicSample::new(69.0)),
        }
    }
}

impl Default for NoteControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for NoteControl {
    fn clone(&self) -> Self {
        // Each voice clone gets its own cell and registers it afresh.
        Self::new()
    }
}

impl Control for NoteControl {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        let Some(vi) = ctx.scope.voice() else { return };
        let Some(midi) = ctx.midi.as_mut() else { return };
        let cell = self.cell.clone();
        midi.notes_mut()
            .register_note_number_handler(vi, Box::new(move |note| cell.set(note as f32)));
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        let freq = note_to_freq(self.cell.get() as u8);
        ctx.output_f64(0).fill(freq);
    }
}

/// Attack-velocity control: emits the note's 14-bit velocity scaled to 0..1.
pub struct VelocityControl {
    spec: PortSpec,
    cell: Arc<AtomicSample>,
}

impl VelocityControl {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            cell: Arc::new(AtomicSample::new(0.0)),
        }
    }
}

impl Default for VelocityControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for VelocityControl {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Control for VelocityControl {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        let Some(vi) = ctx.scope.voice() else { return };
        let Some(midi) = ctx.midi.as_mut() else { return };
        let cell = self.cell.clone();
        midi.notes_mut().register_attack_velocity_handler(
            vi,
            Box::new(move |vel| cell.set(vel as f32 / 16383.0)),
        );
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        ctx.output(0).fill(self.cell.get());
    }
}

/// Channel-pressure (aftertouch) control: emits the channel's pressure
/// scaled to 0..1.
///
/// Pressure follows the voice's channel: the note manager forwards a
/// pressure message to every voice sounding on that channel, so each voice
/// clone registers its own handler. The cell resets when a note starts.
pub struct ChannelPressureControl {
    spec: PortSpec,
    cell: Arc<AtomicSample>,
}

impl ChannelPressureControl {
    pub fn new() -> Self {
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            cell: Arc::new(AtomicSample::new(0.0)),
        }
    }
}

impl Default for ChannelPressureControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for ChannelPressureControl {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Control for ChannelPressureControl {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        let Some(vi) = ctx.scope.voice() else { return };
        let Some(midi) = ctx.midi.as_mut() else { return };
        let cell = self.cell.clone();
        midi.notes_mut().register_channel_pressure_handler(
            vi,
            Box::new(move |pressure| cell.set(pressure as f32 / 127.0)),
        );
    }

    fn start_note(&mut self) {
        // A fresh note starts without leftover pressure.
        self.cell.set(0.0);
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        ctx.output(0).fill(self.cell.get());
    }
}

/// Control-change control: emits one CC's value scaled to 0..1.
///
/// Belongs on the timbre archetype; each timbre clone registers for its own
/// slot in the dispatcher's per-timbre CC table.
pub struct CcControl {
    spec: PortSpec,
    cc: u8,
    default: f32,
    cell: Arc<AtomicSample>,
}

impl CcControl {
    pub fn new(cc: u8) -> Self {
        Self::with_default(cc, 0.0)
    }

    /// A CC control with an initial value (e.g. 1.0 for channel volume).
    pub fn with_default(cc: u8, default: f32) -> Self {
        debug_assert!(cc < cc_defs::ALL_SOUND_OFF, "channel mode CCs are not controllers");
        Self {
            spec: PortSpec::new(vec![PortDef::output("out", ElementType::F32)]),
            cc,
            default,
            cell: Arc::new(AtomicSample::new(default)),
        }
    }
}

impl Clone for CcControl {
    fn clone(&self) -> Self {
        Self::with_default(self.cc, self.default)
    }
}

impl Control for CcControl {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }

    fn configure(&mut self, ctx: &mut ConfigCtx) {
        let Some(ti) = ctx.scope.timbre() else { return };
        let Some(midi) = ctx.midi.as_mut() else { return };
        let cell = self.cell.clone();
        midi.dispatcher_mut().register_cc_handler(
            self.cc,
            ti,
            Box::new(move |msg| cell.set(msg.control_value() as f32 / 127.0)),
        );
    }

    fn render(&mut self, ctx: &mut RenderCtx) {
        ctx.output(0).fill(self.cell.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_sample_round_trips() {
        let a = AtomicSample::new(0.25);
        assert_eq!(a.get(), 0.25);
        a.set(-3.5);
        assert_eq!(a.get(), -3.5);
    }

    #[test]
    fn cloned_controls_get_fresh_cells() {
        let a = NoteControl::new();
        a.cell.set(60.0);
        let b = a.clone();
        assert_eq!(b.cell.get(), 69.0);
        assert!(!Arc::ptr_eq(&a.cell, &b.cell));
    }

    #[test]
    fn channel_pressure_control_emits_its_cell() {
        use crate::port::BufferPool;

        let mut ctl = ChannelPressureControl::new();
        ctl.cell.set(0.5);
        let mut pool = BufferPool::for_layout(&[ElementType::F32]);
        let mut ctx = RenderCtx {
            pool: &mut pool,
            base: 0,
            frames: 4,
            voices: None,
        };
        ctl.render(&mut ctx);
        assert_eq!(pool.read_f32(0)[3], 0.5);
        // Starting a note clears leftover pressure.
        ctl.start_note();
        assert_eq!(ctl.cell.get(), 0.0);
    }

    #[test]
    fn note_to_freq_is_equal_tempered() {
        assert!((note_to_freq(69) - 440.0).abs() < 1e-9);
        assert!((note_to_freq(81) - 880.0).abs() < 1e-9);
        assert!((note_to_freq(57) - 220.0).abs() < 1e-9);
        // Middle C.
        assert!((note_to_freq(60) - 261.6256).abs() < 1e-3);
    }
}
