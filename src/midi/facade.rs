//! The MIDI facade: interfaces, routing, and mode control.
//!
//! The facade owns one parser per interface, the dispatcher, the note
//! manager, the mode manager, the layering table, and the voice assigner.
//! Bytes go in; parsed messages are routed to the note manager (notes,
//! pedals, channel resets), the mode manager (channel mode messages), and
//! the dispatcher's handler registries.
//!
//! MIDI input must arrive between render chunks; the host typically drains
//! a lock-free queue at the chunk boundary and calls
//! [`Facade::process_bytes`]. Bytes known to arrive together may be wrapped
//! in [`Facade::begin_packet`] / [`Facade::end_packet`] to defer handler
//! execution to the packet end.

use super::defs::{cc, status, ChannelMode, MAX_INTERFACES};
use super::dispatcher::Dispatcher;
use super::layering::{ChannelMask, Layering, TimbreMask};
use super::mode::ModeManager;
use super::notes::{NoteManager, VoiceMode};
use super::parser::{MidiEvent, Parser};
use crate::assign::{Assigner, PriorityAssigner};
use crate::synth::Synth;
use std::collections::VecDeque;

struct Interface {
    is_input: bool,
    parser: Parser,
}

impl Interface {
    fn new() -> Self {
        Self {
            is_input: false,
            parser: Parser::new(),
        }
    }
}

pub struct Facade {
    polyphony: usize,
    timbrality: usize,
    layering: Layering,
    dispatcher: Dispatcher,
    notes: NoteManager,
    modes: ModeManager,
    assigner: Box<dyn Assigner>,
    interfaces: [Interface; MAX_INTERFACES],
    packet_depth: u32,
    deferred: VecDeque<MidiEvent>,
}

impl Facade {
    pub fn new(polyphony: usize, timbrality: usize) -> Self {
        let mut f = Self {
            polyphony,
            timbrality,
            layering: Layering::new(timbrality),
            dispatcher: Dispatcher::new(),
            notes: NoteManager::new(polyphony),
            modes: ModeManager::new(),
            assigner: Box::new(PriorityAssigner::with_default_priority()),
            interfaces: std::array::from_fn(|_| Interface::new()),
            packet_depth: 0,
            deferred: VecDeque::new(),
        };
        // Interface 0 is an input by default.
        f.interfaces[0].is_input = true;
        f
    }

    pub fn polyphony(&self) -> usize {
        self.polyphony
    }

    pub fn timbrality(&self) -> usize {
        self.timbrality
    }

    /// Replace the voice assignment policy.
    pub fn attach_assigner(&mut self, assigner: Box<dyn Assigner>) {
        self.assigner = assigner;
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub fn notes(&self) -> &NoteManager {
        &self.notes
    }

    pub fn notes_mut(&mut self) -> &mut NoteManager {
        &mut self.notes
    }

    pub fn layering(&self) -> &Layering {
        &self.layering
    }

    // -- interface configuration ----------------------------------------

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn interface_is_input(&self, index: usize) -> bool {
        self.interfaces[index].is_input
    }

    pub fn set_interface_input(&mut self, index: usize, enable: bool) {
        let ifc = &mut self.interfaces[index];
        if enable && !ifc.is_input {
            ifc.parser.reset();
        }
        ifc.is_input = enable;
    }

    // -- input -----------------------------------------------------------

    pub fn process_byte(&mut self, synth: &mut Synth, interface: usize, byte: u8) {
        debug_assert!(interface < MAX_INTERFACES);
        debug_assert!(self.interfaces[interface].is_input);
        if let Some(event) = self.interfaces[interface].parser.feed(byte) {
            self.consume(synth, event);
        }
    }

    pub fn process_bytes(&mut self, synth: &mut Synth, interface: usize, bytes: &[u8]) {
        for &b in bytes {
            self.process_byte(synth, interface, b);
        }
    }

    /// Process one whole framed message (no running status). Malformed
    /// messages are dropped silently, by contract.
    pub fn process_message(&mut self, synth: &mut Synth, interface: usize, bytes: &[u8]) {
        debug_assert!(interface < MAX_INTERFACES);
        debug_assert!(self.interfaces[interface].is_input);
        if let Ok(event) = self.interfaces[interface].parser.parse_message(bytes) {
            self.consume(synth, event);
        }
    }

    /// Defer handler execution until the matching [`Facade::end_packet`].
    pub fn begin_packet(&mut self) {
        self.packet_depth += 1;
    }

    pub fn end_packet(&mut self, synth: &mut Synth) {
        debug_assert!(self.packet_depth > 0, "end_packet without begin_packet");
        self.packet_depth = self.packet_depth.saturating_sub(1);
        if self.packet_depth == 0 {
            while let Some(event) = self.deferred.pop_front() {
                self.handle_event(synth, event);
            }
        }
    }

    /// Chunk-boundary work: rebind killed voices to pending notes.
    pub fn render(&mut self, synth: &mut Synth) {
        self.notes.render(synth);
    }

    // -- mode control ----------------------------------------------------

    pub fn mode(&self) -> ChannelMode {
        self.modes.mode()
    }

    pub fn is_omni(&self) -> bool {
        self.modes.is_omni()
    }

    pub fn is_mono(&self) -> bool {
        self.modes.is_mono()
    }

    pub fn is_multi(&self) -> bool {
        self.modes.is_multi()
    }

    pub fn channel_is_mono(&self, channel: u8) -> bool {
        self.notes.channel_mode(channel) == VoiceMode::Mono
    }

    pub fn mode4_active_channels(&self) -> ChannelMask {
        self.modes.mode4_active_channels()
    }

    pub fn basic_channel(&self) -> u8 {
        self.modes.basic_channel()
    }

    pub fn set_basic_channel(&mut self, channel: u8) {
        self.modes.set_basic_channel(channel);
    }

    /// Enable or disable multitimbral operation (the host-controlled fifth
    /// mode).
    pub fn set_multi(&mut self, synth: &mut Synth, enable: bool) {
        self.modes
            .set_multi(enable, synth, &mut self.layering, &mut self.notes);
    }

    /// Install an arbitrary channel→timbres mapping (multi-mode extension).
    pub fn set_channel_timbres(&mut self, channel: u8, timbres: TimbreMask) {
        self.layering.set_channel_timbres(channel, timbres);
    }

    // -- routing ---------------------------------------------------------

    fn consume(&mut self, synth: &mut Synth, event: MidiEvent) {
        if self.packet_depth > 0 {
            self.deferred.push_back(event);
        } else {
            self.handle_event(synth, event);
        }
    }

    fn handle_event(&mut self, synth: &mut Synth, event: MidiEvent) {
        match event {
            MidiEvent::Small(msg) => {
                if msg.is_channel_message() {
                    self.route_channel_message(synth, &msg);
                }
                self.dispatcher.dispatch(&self.layering, &msg);
            }
            MidiEvent::Sysex(msg) => {
                self.dispatcher.dispatch_sysex(&msg);
            }
        }
    }

    fn route_channel_message(&mut self, synth: &mut Synth, msg: &super::message::SmallMessage) {
        match msg.status() {
            status::NOTE_ON => {
                self.notes
                    .note_on(synth, self.assigner.as_mut(), &self.layering, msg)
            }
            status::NOTE_OFF => self.notes.note_off(synth, msg),
            status::POLY_KEY_PRESSURE => self.notes.poly_pressure(msg),
            status::CHANNEL_PRESSURE => self.notes.channel_pressure(msg),
            status::CONTROL_CHANGE => match msg.control_number() {
                cc::DAMPER_PEDAL => self.notes.damper_pedal(synth, msg),
                cc::SOSTENUTO => self.notes.sostenuto(synth, msg),
                cc::HIGH_RESOLUTION_VELOCITY_PREFIX => self.notes.high_res_velocity(msg),
                cc::PORTAMENTO_CONTROL => self.notes.portamento_control(msg),
                cc::ALL_SOUND_OFF => self.notes.all_sound_off(synth),
                cc::RESET_ALL_CONTROLLERS => {
                    self.dispatcher.reset();
                    self.notes.reset_all_controllers(synth, msg.channel());
                }
                cc::ALL_NOTES_OFF => self.notes.all_notes_off_channel(synth, msg.channel()),
                cc::OMNI_MODE_OFF | cc::OMNI_MODE_ON | cc::MONO_MODE_ON | cc::POLY_MODE_ON => {
                    self.modes.handle_mode_message(
                        msg,
                        synth,
                        &mut self.layering,
                        &mut self.notes,
                    )
                }
                _ => {}
            },
            _ => {}
        }
    }
}
