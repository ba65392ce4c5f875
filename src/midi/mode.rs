//! The mode manager: MIDI channel modes.
//!
//! The MIDI spec defines four modes selected by channel mode messages on
//! the basic channel: omni poly (mode 1), omni mono (2), poly (3), and mono
//! (4). In mode 4 the active channels are the basic channel plus the N - 1
//! following ones, wrapping mod 16.
//!
//! Multitimbral operation is a fifth state that overrides the classic
//! modes: voice messages are accepted on all channels and routed through
//! the layering table, and each channel keeps its own poly/mono setting.
//! There is no MIDI message for multi mode; the host enables it through the
//! facade.

use super::defs::{cc, ChannelMode, CHANNEL_COUNT};
use super::layering::{ChannelMask, Layering};
use super::message::SmallMessage;
use super::notes::{NoteManager, VoiceMode};
use crate::synth::Synth;

pub struct ModeManager {
    basic_channel: u8,
    omni: bool,
    mono: bool,
    /// The N parameter of the last mono-mode-on message; 0 means "as many
    /// channels as voices", which we treat as all 16.
    mono_channels: u8,
    multi: bool,
}

impl ModeManager {
    pub fn new() -> Self {
        Self {
            basic_channel: 0,
            omni: true,
            mono: false,
            mono_channels: 1,
            multi: false,
        }
    }

    pub fn basic_channel(&self) -> u8 {
        self.basic_channel
    }

    pub fn set_basic_channel(&mut self, channel: u8) {
        debug_assert!((channel as usize) < CHANNEL_COUNT);
        self.basic_channel = channel;
    }

    pub fn mode(&self) -> ChannelMode {
        match (self.omni, self.mono) {
            (true, false) => ChannelMode::OmniPoly,
            (true, true) => ChannelMode::OmniMono,
            (false, false) => ChannelMode::Poly,
            (false, true) => ChannelMode::Mono,
        }
    }

    pub fn is_omni(&self) -> bool {
        self.omni
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    pub fn is_multi(&self) -> bool {
        self.multi
    }

    /// The channels responding to voice messages in mode 4.
    pub fn mode4_active_channels(&self) -> ChannelMask {
        let n = if self.mono_channels == 0 {
            CHANNEL_COUNT as u8
        } else {
            self.mono_channels.min(CHANNEL_COUNT as u8)
        };
        let mut mask: ChannelMask = 0;
        for i in 0..n {
            mask |= 1 << ((self.basic_channel + i) as usize % CHANNEL_COUNT);
        }
        mask
    }

    /// Enable or disable multitimbral operation.
    pub fn set_multi(
        &mut self,
        enable: bool,
        synth: &mut Synth,
        layering: &mut Layering,
        notes: &mut NoteManager,
    ) {
        if self.multi != enable {
            self.multi = enable;
            self.apply(synth, layering, notes);
        }
    }

    /// Consume a channel mode message (CC 124–127). Outside multi mode
    /// only the basic channel is honored; in multi mode, mono/poly apply to
    /// the sending channel individually.
    pub fn handle_mode_message(
        &mut self,
        msg: &SmallMessage,
        synth: &mut Synth,
        layering: &mut Layering,
        notes: &mut NoteManager,
    ) {
        let channel = msg.channel();
        if self.multi {
            match msg.control_number() {
                cc::MONO_MODE_ON => notes.set_channel_mode(synth, channel, VoiceMode::Mono),
                cc::POLY_MODE_ON => notes.set_channel_mode(synth, channel, VoiceMode::Poly),
                _ => {}
            }
            return;
        }
        if channel != self.basic_channel {
            return;
        }
        match msg.control_number() {
            cc::OMNI_MODE_OFF => self.omni = false,
            cc::OMNI_MODE_ON => self.omni = true,
            cc::MONO_MODE_ON => {
                self.mono = true;
                self.mono_channels = msg.control_value();
            }
            cc::POLY_MODE_ON => self.mono = false,
            _ => return,
        }
        self.apply(synth, layering, notes);
    }

    /// Rebuild the layering and per-channel voice modes for the current
    /// mode, silencing everything first (mode changes imply all notes off).
    pub fn apply(&self, synth: &mut Synth, layering: &mut Layering, notes: &mut NoteManager) {
        notes.all_notes_off(synth);
        if self.multi {
            layering.multi_mode();
            return;
        }
        match self.mode() {
            ChannelMode::OmniPoly => {
                layering.omni_mode();
                for ci in 0..CHANNEL_COUNT as u8 {
                    notes.set_channel_mode(synth, ci, VoiceMode::Poly);
                }
            }
            ChannelMode::OmniMono => {
                layering.omni_mode();
                for ci in 0..CHANNEL_COUNT as u8 {
                    notes.set_channel_mode(synth, ci, VoiceMode::Mono);
                }
            }
            ChannelMode::Poly => {
                layering.poly_mode(self.basic_channel);
                notes.set_channel_mode(synth, self.basic_channel, VoiceMode::Poly);
            }
            ChannelMode::Mono => {
                let mask = self.mode4_active_channels();
                layering.mono_mode(mask);
                for ci in 0..CHANNEL_COUNT as u8 {
                    if mask & (1 << ci) != 0 {
                        notes.set_channel_mode(synth, ci, VoiceMode::Mono);
                    }
                }
            }
        }
    }
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_omni_poly() {
        let m = ModeManager::new();
        assert_eq!(m.mode(), ChannelMode::OmniPoly);
        assert!(m.is_omni());
        assert!(!m.is_mono());
        assert!(!m.is_multi());
    }

    #[test]
    fn mode4_channels_wrap_mod_16() {
        let mut m = ModeManager::new();
        m.set_basic_channel(14);
        m.mono_channels = 4;
        let mask = m.mode4_active_channels();
        assert_eq!(mask, 1 << 14 | 1 << 15 | 1 << 0 | 1 << 1);
    }

    #[test]
    fn mono_n_zero_means_all_channels() {
        let mut m = ModeManager::new();
        m.mono_channels = 0;
        assert_eq!(m.mode4_active_channels(), 0xFFFF);
    }
}
