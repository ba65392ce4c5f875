//! MIDI message types.
//!
//! [`SmallMessage`] covers every one- to three-byte message; accessors are
//! named for the message kind and debug-assert that the status matches.
//! [`SysexMessage`] holds system-exclusive payloads in a fixed buffer of
//! [`MAX_SYSEX_SIZE`](crate::midi::defs::MAX_SYSEX_SIZE) bytes, delimiters
//! included.

use super::defs::{status, MAX_SYSEX_SIZE};
use std::fmt;

/// A channel or system message of up to three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallMessage {
    pub status_byte: u8,
    pub data1: u8,
    pub data2: u8,
}

impl SmallMessage {
    pub fn one(status_byte: u8) -> Self {
        debug_assert!(status_byte & 0x80 != 0);
        Self {
            status_byte,
            data1: 0,
            data2: 0,
        }
    }

    pub fn two(status_byte: u8, data1: u8) -> Self {
        debug_assert!(status_byte & 0x80 != 0 && data1 & 0x80 == 0);
        Self {
            status_byte,
            data1,
            data2: 0,
        }
    }

    pub fn three(status_byte: u8, data1: u8, data2: u8) -> Self {
        debug_assert!(status_byte & 0x80 != 0 && data1 & 0x80 == 0 && data2 & 0x80 == 0);
        Self {
            status_byte,
            data1,
            data2,
        }
    }

    /// The high nibble of channel messages, or the whole status byte of
    /// system messages.
    pub fn status(&self) -> u8 {
        if self.status_byte & 0xF0 != 0xF0 {
            self.status_byte & 0xF0
        } else {
            self.status_byte
        }
    }

    pub fn is_channel_message(&self) -> bool {
        self.status_byte & 0xF0 != 0xF0
    }

    pub fn channel(&self) -> u8 {
        debug_assert!(self.is_channel_message());
        self.status_byte & 0x0F
    }

    pub fn note(&self) -> u8 {
        debug_assert!(matches!(
            self.status(),
            status::NOTE_OFF | status::NOTE_ON | status::POLY_KEY_PRESSURE
        ));
        self.data1
    }

    pub fn velocity(&self) -> u8 {
        debug_assert!(matches!(self.status(), status::NOTE_OFF | status::NOTE_ON));
        self.data2
    }

    pub fn poly_pressure(&self) -> u8 {
        debug_assert_eq!(self.status(), status::POLY_KEY_PRESSURE);
        self.data2
    }

    pub fn control_number(&self) -> u8 {
        debug_assert_eq!(self.status(), status::CONTROL_CHANGE);
        self.data1
    }

    pub fn control_value(&self) -> u8 {
        debug_assert_eq!(self.status(), status::CONTROL_CHANGE);
        self.data2
    }

    /// Controllers 64–69 are switches: on at 64 and above.
    pub fn switch_value(&self) -> bool {
        self.control_value() >= 64
    }

    pub fn channel_pressure(&self) -> u8 {
        debug_assert_eq!(self.status(), status::CHANNEL_PRESSURE);
        self.data1
    }

    /// Pitch bend as a signed offset, -8192..=8191.
    pub fn bend(&self) -> i16 {
        debug_assert_eq!(self.status(), status::PITCH_BEND);
        ((self.data2 as i16) << 7 | self.data1 as i16) - 8192
    }

    pub fn song_position(&self) -> u16 {
        (self.data2 as u16) << 7 | self.data1 as u16
    }

    pub fn song_number(&self) -> u8 {
        self.data1
    }
}

/// A system-exclusive message, delimiters included.
#[derive(Clone)]
pub struct SysexMessage {
    data: [u8; MAX_SYSEX_SIZE],
    len: usize,
}

impl SysexMessage {
    pub fn new() -> Self {
        Self {
            data: [0; MAX_SYSEX_SIZE],
            len: 0,
        }
    }

    /// Append a byte; returns false (dropping the byte) when full.
    pub fn append(&mut self, byte: u8) -> bool {
        if self.len >= MAX_SYSEX_SIZE {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The manufacturer ID byte, if present.
    pub fn id(&self) -> Option<u8> {
        self.data().get(1).copied()
    }
}

impl Default for SysexMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SysexMessage {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data()
    }
}

impl Eq for SysexMessage {}

impl fmt::Debug for SysexMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SysexMessage")
            .field("len", &self.len)
            .field("data", &self.data())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalizes_channel_messages() {
        let m = SmallMessage::three(0x93, 60, 100);
        assert_eq!(m.status(), status::NOTE_ON);
        assert_eq!(m.channel(), 3);
        assert_eq!(m.note(), 60);
        assert_eq!(m.velocity(), 100);
    }

    #[test]
    fn system_messages_keep_full_status() {
        let m = SmallMessage::one(status::TIMING_CLOCK);
        assert_eq!(m.status(), status::TIMING_CLOCK);
        assert!(!m.is_channel_message());
    }

    #[test]
    fn channel_pressure_reads_the_single_data_byte() {
        let m = SmallMessage::two(0xD3, 80);
        assert_eq!(m.status(), status::CHANNEL_PRESSURE);
        assert_eq!(m.channel(), 3);
        assert_eq!(m.channel_pressure(), 80);
    }

    #[test]
    fn bend_is_centered() {
        let m = SmallMessage::three(0xE0, 0x00, 0x40);
        assert_eq!(m.bend(), 0);
        let up = SmallMessage::three(0xE0, 0x7F, 0x7F);
        assert_eq!(up.bend(), 8191);
        let down = SmallMessage::three(0xE0, 0x00, 0x00);
        assert_eq!(down.bend(), -8192);
    }

    #[test]
    fn switch_threshold_is_64() {
        assert!(SmallMessage::three(0xB0, 64, 127).switch_value());
        assert!(SmallMessage::three(0xB0, 64, 64).switch_value());
        assert!(!SmallMessage::three(0xB0, 64, 63).switch_value());
    }

    #[test]
    fn sysex_caps_at_buffer_size() {
        let mut s = SysexMessage::new();
        for i in 0..MAX_SYSEX_SIZE {
            assert!(s.append(i as u8));
        }
        assert!(!s.append(0));
        assert_eq!(s.len(), MAX_SYSEX_SIZE);
    }
}
