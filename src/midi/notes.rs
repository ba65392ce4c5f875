//! The note manager: voice lifecycle driven by MIDI note messages.
//!
//! Per channel it tracks three 128-bit note masks (`notes_on`,
//! `notes_sustaining`, `notes_sostenuto`); a note *should sound* while any
//! of its bits is set. Note-ons allocate voices through the assigner,
//! stealing (kill + queue the pending note) when none are idle; between
//! render chunks [`NoteManager::render`] rebinds voices that finished their
//! shutdown ramp to pending notes in FIFO order.
//!
//! Queues are fixed-capacity. When one saturates, the oldest pending note
//! is dropped and a monotonic counter the host may poll is bumped.

use super::defs::CHANNEL_COUNT;
use super::layering::{Layering, TimbreMask};
use super::message::SmallMessage;
use crate::assign::Assigner;
use crate::defs::{MAX_POLYPHONY, MAX_TIMBRALITY};
use crate::synth::Synth;
use crate::voice::VoiceState;
use std::collections::VecDeque;

/// Poly or mono operation of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceMode {
    #[default]
    Poly,
    Mono,
}

/// A 128-bit set of note numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct NoteSet(u128);

impl NoteSet {
    fn insert(&mut self, note: u8) {
        self.0 |= 1 << note;
    }

    fn remove(&mut self, note: u8) {
        self.0 &= !(1 << note);
    }

    fn contains(&self, note: u8) -> bool {
        self.0 & (1 << note) != 0
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

struct ChannelData {
    mode: VoiceMode,
    velocity_lsb: Option<u8>,
    portamento_note: Option<u8>,
    sustaining: bool,
    notes_on: NoteSet,
    notes_sustaining: NoteSet,
    notes_sostenuto: NoteSet,
}

impl Default for ChannelData {
    fn default() -> Self {
        Self {
            mode: VoiceMode::Poly,
            velocity_lsb: None,
            portamento_note: None,
            sustaining: false,
            notes_on: NoteSet::default(),
            notes_sustaining: NoteSet::default(),
            notes_sostenuto: NoteSet::default(),
        }
    }
}

/// Per-voice routing state and the handlers voice controls registered.
#[derive(Default)]
struct VoiceData {
    channel: Option<u8>,
    note: Option<u8>,
    note_number: Option<Box<dyn FnMut(u8)>>,
    attack_velocity: Option<Box<dyn FnMut(u16)>>,
    release_velocity: Option<Box<dyn FnMut(u8)>>,
    poly_pressure: Option<Box<dyn FnMut(u8)>>,
    channel_pressure: Option<Box<dyn FnMut(u8)>>,
    portamento: Option<Box<dyn FnMut(u8)>>,
}

#[derive(Default)]
struct TimbreData {
    mono_voice: Option<usize>,
}

/// Everything needed to start a note once a voice frees up.
#[derive(Debug, Clone, Copy)]
struct PendingNote {
    timbres: TimbreMask,
    channel: u8,
    note: u8,
    velocity: u16,
    portamento: Option<u8>,
}

pub struct NoteManager {
    channels: [ChannelData; CHANNEL_COUNT],
    voices: Vec<VoiceData>,
    timbres: Vec<TimbreData>,
    pending: VecDeque<PendingNote>,
    killed: VecDeque<usize>,
    dropped_notes: u64,
}

impl NoteManager {
    pub fn new(polyphony: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| ChannelData::default()),
            voices: (0..polyphony).map(|_| VoiceData::default()).collect(),
            timbres: (0..MAX_TIMBRALITY).map(|_| TimbreData::default()).collect(),
            pending: VecDeque::with_capacity(MAX_POLYPHONY),
            killed: VecDeque::with_capacity(MAX_POLYPHONY),
            dropped_notes: 0,
        }
    }

    /// Pending notes dropped to queue saturation since construction.
    pub fn dropped_notes(&self) -> u64 {
        self.dropped_notes
    }

    pub fn channel_mode(&self, channel: u8) -> VoiceMode {
        self.channels[channel as usize].mode
    }

    /// Switch a channel between poly and mono, silencing it first.
    pub fn set_channel_mode(&mut self, synth: &mut Synth, channel: u8, mode: VoiceMode) {
        if self.channels[channel as usize].mode != mode {
            self.all_notes_off_channel(synth, channel);
            self.channels[channel as usize].mode = mode;
        }
    }

    // -- handler registration -------------------------------------------

    pub fn register_note_number_handler(&mut self, voice: usize, h: Box<dyn FnMut(u8)>) {
        self.voices[voice].note_number = Some(h);
    }

    pub fn register_attack_velocity_handler(&mut self, voice: usize, h: Box<dyn FnMut(u16)>) {
        self.voices[voice].attack_velocity = Some(h);
    }

    pub fn register_release_velocity_handler(&mut self, voice: usize, h: Box<dyn FnMut(u8)>) {
        self.voices[voice].release_velocity = Some(h);
    }

    pub fn register_poly_pressure_handler(&mut self, voice: usize, h: Box<dyn FnMut(u8)>) {
        self.voices[voice].poly_pressure = Some(h);
    }

    pub fn register_channel_pressure_handler(&mut self, voice: usize, h: Box<dyn FnMut(u8)>) {
        self.voices[voice].channel_pressure = Some(h);
    }

    pub fn register_portamento_note_handler(&mut self, voice: usize, h: Box<dyn FnMut(u8)>) {
        self.voices[voice].portamento = Some(h);
    }

    // -- message consumption --------------------------------------------

    pub fn note_on(
        &mut self,
        synth: &mut Synth,
        assigner: &mut dyn Assigner,
        layering: &Layering,
        msg: &SmallMessage,
    ) {
        if msg.velocity() == 0 {
            // Note on with velocity zero means note off.
            return self.note_off(synth, msg);
        }
        let ci = msg.channel();
        let note = msg.note();
        let v = msg.velocity();
        let timbres = layering.channel_timbres(ci);

        let chan = &mut self.channels[ci as usize];
        chan.notes_on.insert(note);
        if chan.sustaining {
            chan.notes_sustaining.insert(note);
        }
        let velocity = match chan.velocity_lsb.take() {
            Some(lsb) => (v as u16) << 7 | lsb as u16,
            None => (v as u16) << 7 | v as u16,
        };
        let portamento = chan.portamento_note.take();
        let mode = chan.mode;

        let info = PendingNote {
            timbres,
            channel: ci,
            note,
            velocity,
            portamento,
        };
        match mode {
            VoiceMode::Poly => self.note_on_poly(synth, assigner, info),
            VoiceMode::Mono => self.note_on_mono(synth, assigner, info),
        }
    }

    fn note_on_poly(&mut self, synth: &mut Synth, assigner: &mut dyn Assigner, info: PendingNote) {
        let mut remaining = info.timbres;
        for ti in 0..MAX_TIMBRALITY {
            if remaining & (1 << ti) == 0 {
                continue;
            }
            match assigner.assign_idle_voice(synth) {
                Some(vi) => {
                    debug_assert_eq!(
                        synth.voices()[vi].state(),
                        VoiceState::Idle,
                        "assigner returned a busy voice"
                    );
                    self.start_note(synth, vi, ti, &info);
                    remaining &= !(1 << ti);
                }
                None => break,
            }
        }
        if remaining != 0 {
            // Steal one voice per timbre still waiting; the note starts
            // when the ramps finish.
            for ti in 0..MAX_TIMBRALITY {
                if remaining & (1 << ti) == 0 {
                    continue;
                }
                if let Some(vi) = assigner.choose_voice_to_steal(synth) {
                    synth.voices_mut()[vi].kill_note();
                    self.push_killed(vi);
                }
            }
            self.push_pending(PendingNote {
                timbres: remaining,
                ..info
            });
        }
    }

    fn note_on_mono(&mut self, synth: &mut Synth, assigner: &mut dyn Assigner, info: PendingNote) {
        let mut remaining = info.timbres;
        for ti in 0..MAX_TIMBRALITY {
            if remaining & (1 << ti) == 0 {
                continue;
            }
            let sounding_mono = self.timbres[ti]
                .mono_voice
                .filter(|&vi| synth.voices()[vi].state() == VoiceState::Sounding);
            if let Some(vi) = sounding_mono {
                // Legato: swap pitch and velocity without restarting the
                // envelopes.
                let vd = &mut self.voices[vi];
                vd.note = Some(info.note);
                vd.channel = Some(info.channel);
                if let Some(h) = &mut vd.note_number {
                    h(info.note);
                }
                if let Some(h) = &mut vd.attack_velocity {
                    h(info.velocity);
                }
                remaining &= !(1 << ti);
            } else if let Some(vi) = assigner.assign_idle_voice(synth) {
                self.start_note(synth, vi, ti, &info);
                self.timbres[ti].mono_voice = Some(vi);
                remaining &= !(1 << ti);
            }
        }
        if remaining != 0 {
            for ti in 0..MAX_TIMBRALITY {
                if remaining & (1 << ti) == 0 {
                    continue;
                }
                if let Some(vi) = assigner.choose_voice_to_steal(synth) {
                    synth.voices_mut()[vi].kill_note();
                    self.push_killed(vi);
                }
            }
            self.push_pending(PendingNote {
                timbres: remaining,
                ..info
            });
        }
    }

    pub fn note_off(&mut self, synth: &mut Synth, msg: &SmallMessage) {
        // Status may be note-off or note-on with velocity zero.
        let ci = msg.channel();
        let note = msg.note();
        let velocity = msg.velocity();
        self.channels[ci as usize].notes_on.remove(note);
        if self.note_should_sound(ci, note) {
            // Held by damper or sostenuto.
            return;
        }
        self.release_note(synth, ci, note, velocity);
    }

    pub fn poly_pressure(&mut self, msg: &SmallMessage) {
        let ci = msg.channel();
        let note = msg.note();
        let pressure = msg.poly_pressure();
        for vd in &mut self.voices {
            if vd.channel == Some(ci) && vd.note == Some(note) {
                if let Some(h) = &mut vd.poly_pressure {
                    h(pressure);
                }
            }
        }
    }

    /// Channel pressure applies to every voice sounding on the channel.
    pub fn channel_pressure(&mut self, msg: &SmallMessage) {
        let ci = msg.channel();
        let pressure = msg.channel_pressure();
        for vd in &mut self.voices {
            if vd.channel == Some(ci) {
                if let Some(h) = &mut vd.channel_pressure {
                    h(pressure);
                }
            }
        }
    }

    pub fn damper_pedal(&mut self, synth: &mut Synth, msg: &SmallMessage) {
        let ci = msg.channel();
        let on = msg.switch_value();
        let chan = &mut self.channels[ci as usize];
        if on && !chan.sustaining {
            chan.sustaining = true;
            chan.notes_sustaining = chan.notes_on;
        } else if !on && chan.sustaining {
            chan.sustaining = false;
            chan.notes_sustaining.clear();
            self.release_stale_voices(synth, ci);
        }
    }

    pub fn sostenuto(&mut self, synth: &mut Synth, msg: &SmallMessage) {
        let ci = msg.channel();
        let chan = &mut self.channels[ci as usize];
        if msg.switch_value() {
            chan.notes_sostenuto = chan.notes_on;
        } else {
            chan.notes_sostenuto.clear();
            self.release_stale_voices(synth, ci);
        }
    }

    pub fn high_res_velocity(&mut self, msg: &SmallMessage) {
        self.channels[msg.channel() as usize].velocity_lsb = Some(msg.control_value());
    }

    pub fn portamento_control(&mut self, msg: &SmallMessage) {
        self.channels[msg.channel() as usize].portamento_note = Some(msg.control_value());
    }

    // -- channel resets -------------------------------------------------

    /// Kill every active voice immediately (CC 120).
    pub fn all_sound_off(&mut self, synth: &mut Synth) {
        for v in synth.voices_mut() {
            if !matches!(v.state(), VoiceState::Idle | VoiceState::Stopping) {
                v.kill_note();
            }
        }
        for chan in &mut self.channels {
            chan.notes_on.clear();
            chan.notes_sustaining.clear();
            chan.notes_sostenuto.clear();
        }
    }

    /// Release every note on every channel (CC 123 on all channels).
    pub fn all_notes_off(&mut self, synth: &mut Synth) {
        for ci in 0..CHANNEL_COUNT as u8 {
            self.all_notes_off_channel(synth, ci);
        }
    }

    pub fn all_notes_off_channel(&mut self, synth: &mut Synth, channel: u8) {
        let notes_on = self.channels[channel as usize].notes_on;
        self.channels[channel as usize].notes_on.clear();
        for note in 0..128u8 {
            if notes_on.contains(note) && !self.note_should_sound(channel, note) {
                self.release_note(synth, channel, note, 0);
            }
        }
    }

    /// Reset the channel's transient controller state (CC 121).
    pub fn reset_all_controllers(&mut self, synth: &mut Synth, channel: u8) {
        let chan = &mut self.channels[channel as usize];
        chan.velocity_lsb = None;
        chan.portamento_note = None;
        chan.sustaining = false;
        chan.notes_sustaining.clear();
        chan.notes_sostenuto.clear();
        self.release_stale_voices(synth, channel);
    }

    // -- chunk boundary -------------------------------------------------

    /// Rebind voices whose shutdown ramp finished to pending notes, FIFO.
    /// Call between render chunks.
    pub fn render(&mut self, synth: &mut Synth) {
        loop {
            let Some(&vi) = self.killed.front() else { break };
            if synth.voices()[vi].state() != VoiceState::Idle {
                break;
            }
            self.killed.pop_front();
            for td in &mut self.timbres {
                if td.mono_voice == Some(vi) {
                    td.mono_voice = None;
                }
            }
            let Some(&front) = self.pending.front() else {
                continue;
            };
            let Some(ti) = (0..MAX_TIMBRALITY).find(|t| front.timbres & (1 << t) != 0) else {
                self.pending.pop_front();
                continue;
            };
            if let Some(queued) = self.pending.front_mut() {
                queued.timbres &= !(1 << ti);
                if queued.timbres == 0 {
                    self.pending.pop_front();
                }
            }
            self.start_note(synth, vi, ti, &front);
            if self.channels[front.channel as usize].mode == VoiceMode::Mono {
                self.timbres[ti].mono_voice = Some(vi);
            }
        }
    }

    // -- internals ------------------------------------------------------

    fn note_should_sound(&self, channel: u8, note: u8) -> bool {
        let chan = &self.channels[channel as usize];
        chan.notes_on.contains(note)
            || chan.notes_sustaining.contains(note)
            || chan.notes_sostenuto.contains(note)
    }

    fn start_note(&mut self, synth: &mut Synth, vi: usize, ti: usize, info: &PendingNote) {
        synth.attach_voice_to_timbre(ti, vi);
        let vd = &mut self.voices[vi];
        vd.channel = Some(info.channel);
        vd.note = Some(info.note);
        if let Some(h) = &mut vd.note_number {
            h(info.note);
        }
        if let Some(h) = &mut vd.attack_velocity {
            h(info.velocity);
        }
        if let Some(p) = info.portamento {
            if let Some(h) = &mut vd.portamento {
                h(p);
            }
        }
        synth.voices_mut()[vi].start_note();
    }

    fn release_note(&mut self, synth: &mut Synth, channel: u8, note: u8, velocity: u8) {
        for vi in 0..self.voices.len() {
            if self.voices[vi].channel == Some(channel) && self.voices[vi].note == Some(note) {
                if let Some(h) = &mut self.voices[vi].release_velocity {
                    h(velocity);
                }
                synth.voices_mut()[vi].release_note();
            }
        }
    }

    /// Release every voice on the channel whose note no longer should
    /// sound (after a damper or sostenuto pedal fell).
    fn release_stale_voices(&mut self, synth: &mut Synth, channel: u8) {
        for vi in 0..self.voices.len() {
            let (vd_channel, vd_note) = (self.voices[vi].channel, self.voices[vi].note);
            if vd_channel == Some(channel) {
                if let Some(note) = vd_note {
                    if !self.note_should_sound(channel, note) {
                        if let Some(h) = &mut self.voices[vi].release_velocity {
                            h(0);
                        }
                        synth.voices_mut()[vi].release_note();
                    }
                }
            }
        }
    }

    fn push_killed(&mut self, vi: usize) {
        if self.killed.len() >= MAX_POLYPHONY {
            // Saturation: make room by abandoning the oldest pending note.
            if self.pending.pop_front().is_some() {
                self.dropped_notes += 1;
            }
            self.killed.pop_front();
        }
        self.killed.push_back(vi);
    }

    fn push_pending(&mut self, info: PendingNote) {
        if self.pending.len() >= MAX_POLYPHONY {
            self.pending.pop_front();
            self.dropped_notes += 1;
        }
        self.pending.push_back(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_set_bits() {
        let mut s = NoteSet::default();
        s.insert(0);
        s.insert(127);
        assert!(s.contains(0));
        assert!(s.contains(127));
        assert!(!s.contains(64));
        s.remove(0);
        assert!(!s.contains(0));
        s.clear();
        assert!(!s.contains(127));
    }

    #[test]
    fn should_sound_is_the_mask_disjunction() {
        let mut nm = NoteManager::new(2);
        assert!(!nm.note_should_sound(0, 60));
        nm.channels[0].notes_on.insert(60);
        assert!(nm.note_should_sound(0, 60));
        nm.channels[0].notes_on.remove(60);
        nm.channels[0].notes_sustaining.insert(60);
        assert!(nm.note_should_sound(0, 60));
        nm.channels[0].notes_sustaining.remove(60);
        nm.channels[0].notes_sostenuto.insert(60);
        assert!(nm.note_should_sound(0, 60));
    }

    #[test]
    fn channels_default_to_poly() {
        let nm = NoteManager::new(4);
        for ci in 0..CHANNEL_COUNT as u8 {
            assert_eq!(nm.channel_mode(ci), VoiceMode::Poly);
        }
    }
}
