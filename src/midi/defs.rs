//! MIDI 1.0 definitions: status bytes, controller numbers, modes, sizes.

/// MIDI channels per interface.
pub const CHANNEL_COUNT: usize = 16;

/// MIDI note numbers.
pub const NOTE_COUNT: usize = 128;

/// Control change numbers.
pub const CC_COUNT: usize = 128;

/// Registered parameter numbers tracked by the dispatcher. MIDI CA-026
/// defines six.
pub const MAX_RPNS: usize = 6;

/// Non-registered parameter numbers the dispatcher can track.
pub const MAX_NRPNS: usize = 16;

/// Largest SysEx message accumulated before the parser gives up.
pub const MAX_SYSEX_SIZE: usize = 512;

/// MIDI interfaces (in/out pairs) one facade can serve.
pub const MAX_INTERFACES: usize = 4;

/// Status bytes. Channel-message values are the high nibble with channel 0.
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_KEY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    pub const SYSTEM_EXCLUSIVE: u8 = 0xF0;
    pub const MTC_QTR_FRAME: u8 = 0xF1;
    pub const SONG_POSITION: u8 = 0xF2;
    pub const SONG_SELECT: u8 = 0xF3;
    pub const TUNE_REQUEST: u8 = 0xF6;
    pub const EOX: u8 = 0xF7;

    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;
    pub const ACTIVE_SENSING: u8 = 0xFE;
    pub const SYSTEM_RESET: u8 = 0xFF;
}

/// Controller numbers the engine routes or consumes.
pub mod cc {
    pub const BANK_SELECT_MSB: u8 = 0;
    pub const MOD_WHEEL_MSB: u8 = 1;
    pub const BREATH_MSB: u8 = 2;
    pub const FOOT_MSB: u8 = 4;
    pub const PORTAMENTO_TIME_MSB: u8 = 5;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const CHANNEL_VOLUME_MSB: u8 = 7;
    pub const PAN_MSB: u8 = 10;
    pub const EXPRESSION_MSB: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;

    pub const DAMPER_PEDAL: u8 = 64;
    pub const PORTAMENTO_ON_OFF: u8 = 65;
    pub const SOSTENUTO: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const LEGATO_FOOTSWITCH: u8 = 68;

    pub const PORTAMENTO_CONTROL: u8 = 84;
    pub const HIGH_RESOLUTION_VELOCITY_PREFIX: u8 = 88;

    pub const DATA_INCREMENT: u8 = 96;
    pub const DATA_DECREMENT: u8 = 97;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;

    // Channel mode messages.
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const LOCAL_CONTROL: u8 = 122;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_MODE_OFF: u8 = 124;
    pub const OMNI_MODE_ON: u8 = 125;
    pub const MONO_MODE_ON: u8 = 126;
    pub const POLY_MODE_ON: u8 = 127;
}

/// The four classic channel modes. Multitimbral operation is a fifth state
/// layered on top (see the mode manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    OmniPoly = 1,
    OmniMono = 2,
    Poly = 3,
    Mono = 4,
}
