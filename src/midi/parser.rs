//! The MIDI byte parser: a byte-at-a-time state machine.
//!
//! Running status is honored for channel messages. Real-time bytes
//! (0xF8–0xFF) may interleave anywhere without disturbing the current
//! message; undefined real-time bytes are swallowed. A SysEx larger than
//! the fixed buffer is accumulated up to the cap and then discarded when
//! its EOX arrives; the stream stays in sync and nothing malformed is
//! ever emitted.

use super::defs::{status, MAX_SYSEX_SIZE};
use super::message::{SmallMessage, SysexMessage};
use std::fmt;

/// Parser states. Channel states track how many data bytes have arrived;
/// `Rt`/`Urt`/`Ex` are transient classifications that never persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No message in progress.
    No,
    /// Channel message, after status, expecting the only data byte.
    C21,
    /// Channel message, after status, expecting the first of two.
    C31,
    /// Channel message, expecting the second of two.
    C32,
    /// Inside a system-exclusive message.
    Sx,
    /// One-byte system message.
    S1,
    /// System message expecting one data byte.
    S21,
    /// System message expecting the first of two.
    S31,
    /// System message expecting the second of two.
    S32,
    /// End of system exclusive.
    Ex,
    /// Real-time message.
    Rt,
    /// Undefined real-time message.
    Urt,
}

use State::*;

/// Classification of each status byte, indexed by its low seven bits.
const STATE_TABLE: [State; 128] = [
    C31, C31, C31, C31, C31, C31, C31, C31, // note off
    C31, C31, C31, C31, C31, C31, C31, C31, //
    C31, C31, C31, C31, C31, C31, C31, C31, // note on
    C31, C31, C31, C31, C31, C31, C31, C31, //
    C31, C31, C31, C31, C31, C31, C31, C31, // poly key pressure
    C31, C31, C31, C31, C31, C31, C31, C31, //
    C31, C31, C31, C31, C31, C31, C31, C31, // control change
    C31, C31, C31, C31, C31, C31, C31, C31, //
    C21, C21, C21, C21, C21, C21, C21, C21, // program change
    C21, C21, C21, C21, C21, C21, C21, C21, //
    C21, C21, C21, C21, C21, C21, C21, C21, // channel pressure
    C21, C21, C21, C21, C21, C21, C21, C21, //
    C31, C31, C31, C31, C31, C31, C31, C31, // pitch bend
    C31, C31, C31, C31, C31, C31, C31, C31, //
    Sx, S21, S31, S21, No, No, S1, Ex, // system common
    Rt, Urt, Rt, Rt, Rt, Urt, Rt, Rt, // system real time
];

/// A parsed message.
#[derive(Debug, Clone, PartialEq)]
pub enum MidiEvent {
    Small(SmallMessage),
    Sysex(SysexMessage),
}

/// Malformed input to [`Parser::parse_message`]. Parse faults are non-fatal
/// by contract: the offending bytes are dropped and parsing resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError;

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed message")
    }
}

impl std::error::Error for ParseError {}

pub struct Parser {
    state: State,
    status_byte: u8,
    data1: u8,
    sysex: SysexMessage,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: No,
            status_byte: 0,
            data1: 0,
            sysex: SysexMessage::new(),
        }
    }

    pub fn reset(&mut self) {
        self.state = No;
        self.status_byte = 0;
        self.data1 = 0;
        self.sysex.clear();
    }

    /// Consume one byte; returns a message when one completes.
    pub fn feed(&mut self, byte: u8) -> Option<MidiEvent> {
        if byte & 0x80 != 0 {
            self.feed_status(byte)
        } else {
            self.feed_data(byte)
        }
    }

    fn feed_status(&mut self, byte: u8) -> Option<MidiEvent> {
        let prev = self.state;
        let next = STATE_TABLE[(byte & 0x7F) as usize];
        match next {
            Rt => {
                // Real time interleaves without touching parse state.
                self.state = prev;
                Some(MidiEvent::Small(SmallMessage::one(byte)))
            }
            Urt => {
                self.state = prev;
                None
            }
            Sx => {
                self.sysex.clear();
                self.sysex.append(byte);
                self.state = Sx;
                None
            }
            Ex => {
                let mut out = None;
                if prev == Sx && self.sysex.len() < MAX_SYSEX_SIZE {
                    self.sysex.append(byte);
                    out = Some(MidiEvent::Sysex(self.sysex.clone()));
                }
                // Oversize accumulation is discarded here.
                self.state = No;
                out
            }
            S1 => {
                self.state = No;
                Some(MidiEvent::Small(SmallMessage::one(byte)))
            }
            C21 | C31 | S21 | S31 => {
                self.status_byte = byte;
                self.data1 = 0;
                self.state = next;
                None
            }
            No => {
                // Undefined system common: resynchronize.
                self.state = No;
                None
            }
            C32 | S32 => unreachable!("no status byte classifies mid-message"),
        }
    }

    fn feed_data(&mut self, byte: u8) -> Option<MidiEvent> {
        match self.state {
            No => None,
            C31 => {
                self.data1 = byte;
                self.state = C32;
                None
            }
            C32 => {
                let msg = SmallMessage::three(self.status_byte, self.data1, byte);
                // Running status: stay ready for another data pair.
                self.state = C31;
                Some(MidiEvent::Small(msg))
            }
            C21 => {
                // Running status for one-data-byte messages.
                Some(MidiEvent::Small(SmallMessage::two(self.status_byte, byte)))
            }
            Sx => {
                // Over-long SysEx bytes are not accumulated.
                self.sysex.append(byte);
                None
            }
            S31 => {
                self.data1 = byte;
                self.state = S32;
                None
            }
            S32 => {
                let msg = SmallMessage::three(self.status_byte, self.data1, byte);
                self.state = No;
                Some(MidiEvent::Small(msg))
            }
            S21 => {
                let msg = SmallMessage::two(self.status_byte, byte);
                self.state = No;
                Some(MidiEvent::Small(msg))
            }
            Rt | Urt | Ex | S1 => unreachable!("transient parser state persisted"),
        }
    }

    /// Parse one whole message, without running status. Used by hosts that
    /// deliver framed messages (e.g. from a MIDI file reader). Resets the
    /// byte-stream state, since framed and streamed input cannot interleave.
    pub fn parse_message(&mut self, bytes: &[u8]) -> Result<MidiEvent, ParseError> {
        self.reset();
        let (&first, rest) = bytes.split_first().ok_or(ParseError)?;
        if first & 0x80 == 0 {
            return Err(ParseError);
        }
        let state = STATE_TABLE[(first & 0x7F) as usize];
        let event = match bytes.len() {
            1 => {
                if state != S1 && state != Rt {
                    return Err(ParseError);
                }
                MidiEvent::Small(SmallMessage::one(first))
            }
            2 => {
                if state != C21 && state != S21 || rest[0] & 0x80 != 0 {
                    return Err(ParseError);
                }
                MidiEvent::Small(SmallMessage::two(first, rest[0]))
            }
            3 => {
                if state != C31 && state != S31 || rest[0] & 0x80 != 0 || rest[1] & 0x80 != 0 {
                    return Err(ParseError);
                }
                MidiEvent::Small(SmallMessage::three(first, rest[0], rest[1]))
            }
            _ => {
                if state != Sx || *bytes.last().unwrap() != status::EOX {
                    return Err(ParseError);
                }
                let mut sysex = SysexMessage::new();
                for (i, &b) in bytes.iter().enumerate() {
                    if i > 0 && i < bytes.len() - 1 && b & 0x80 != 0 {
                        return Err(ParseError);
                    }
                    if !sysex.append(b) {
                        return Err(ParseError);
                    }
                }
                MidiEvent::Sysex(sysex)
            }
        };
        Ok(event)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut Parser, bytes: &[u8]) -> Vec<MidiEvent> {
        bytes.iter().filter_map(|&b| parser.feed(b)).collect()
    }

    #[test]
    fn three_byte_channel_message() {
        let mut p = Parser::new();
        let events = feed_all(&mut p, &[0x90, 60, 100]);
        assert_eq!(
            events,
            vec![MidiEvent::Small(SmallMessage::three(0x90, 60, 100))]
        );
    }

    #[test]
    fn running_status() {
        let mut p = Parser::new();
        let events = feed_all(&mut p, &[0x90, 60, 100, 62, 101, 64, 0]);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            MidiEvent::Small(SmallMessage::three(0x90, 64, 0))
        );
    }

    #[test]
    fn real_time_interleaves_mid_message() {
        let mut p = Parser::new();
        let events = feed_all(&mut p, &[0x90, 60, 0xF8, 100]);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            MidiEvent::Small(SmallMessage::one(status::TIMING_CLOCK))
        );
        assert_eq!(
            events[1],
            MidiEvent::Small(SmallMessage::three(0x90, 60, 100))
        );
    }

    #[test]
    fn undefined_real_time_is_swallowed() {
        let mut p = Parser::new();
        let events = feed_all(&mut p, &[0x90, 60, 0xF9, 0xFD, 100]);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            MidiEvent::Small(SmallMessage::three(0x90, 60, 100))
        );
    }

    #[test]
    fn sysex_round_trip() {
        let mut p = Parser::new();
        let events = feed_all(&mut p, &[0xF0, 0x7D, 1, 2, 3, 0xF7]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            MidiEvent::Sysex(s) => {
                assert_eq!(s.data(), &[0xF0, 0x7D, 1, 2, 3, 0xF7]);
                assert_eq!(s.id(), Some(0x7D));
            }
            other => panic!("expected sysex, got {:?}", other),
        }
    }

    #[test]
    fn oversize_sysex_is_dropped_and_stream_recovers() {
        let mut p = Parser::new();
        let mut bytes = vec![0xF0];
        bytes.extend(std::iter::repeat(0x01).take(MAX_SYSEX_SIZE + 1));
        bytes.push(0xF7);
        // A well-formed message right after.
        bytes.extend([0x80, 60, 0]);
        let events = feed_all(&mut p, &bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            MidiEvent::Small(SmallMessage::three(0x80, 60, 0))
        );
    }

    #[test]
    fn orphan_data_bytes_are_ignored() {
        let mut p = Parser::new();
        assert!(feed_all(&mut p, &[1, 2, 3, 0x42]).is_empty());
    }

    #[test]
    fn random_bytes_never_panic_or_emit_garbage() {
        // A cheap deterministic byte stream covering status and data bytes.
        let mut p = Parser::new();
        let mut x: u32 = 0x1234_5678;
        for _ in 0..20_000 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let byte = (x >> 16) as u8;
            if let Some(MidiEvent::Small(m)) = p.feed(byte) {
                assert!(m.status_byte & 0x80 != 0);
                assert!(m.data1 & 0x80 == 0 && m.data2 & 0x80 == 0);
            }
        }
    }

    #[test]
    fn parse_message_validates_framing() {
        let mut p = Parser::new();
        assert!(p.parse_message(&[0x90, 60, 100]).is_ok());
        assert!(p.parse_message(&[0xC0, 12]).is_ok());
        assert!(p.parse_message(&[0xF6]).is_ok());
        assert!(p.parse_message(&[0xF0, 1, 2, 0xF7]).is_ok());

        assert_eq!(p.parse_message(&[]), Err(ParseError));
        assert_eq!(p.parse_message(&[60, 100]), Err(ParseError));
        assert_eq!(p.parse_message(&[0x90, 60]), Err(ParseError));
        assert_eq!(p.parse_message(&[0x90, 60, 0x80]), Err(ParseError));
        assert_eq!(p.parse_message(&[0xF0, 1, 2, 3]), Err(ParseError));
    }
}
