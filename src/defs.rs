//! Engine-wide definitions and capacity limits.
//!
//! The render path never allocates: every vector, queue, and step list is
//! preallocated against the limits below, and overflow is reported while the
//! synth is being configured, never while it is rendering.

/// The sample type used by audio-rate buffers.
pub type Sample = f32;

/// The scalar gain type carried by links.
pub type Scale = f32;

/// Unity gain; links constructed without an explicit scale use this.
pub const DEFAULT_SCALE: Scale = 1.0;

/// Largest frame count a single render call may process.
///
/// Buffers are fixed `[T; MAX_FRAMES]` arrays; hosts render in chunks of at
/// most this many frames.
pub const MAX_FRAMES: usize = 64;

/// Length of the soft-shutdown ramp a killed voice runs before going idle,
/// in seconds. Long enough to avoid clicks, short enough that a stolen
/// voice is reusable almost immediately.
pub const NOTE_SHUTDOWN_TIME: f32 = 0.010;

/// Maximum simultaneously sounding voices.
pub const MAX_POLYPHONY: usize = 8;

/// Maximum simultaneously active timbres.
pub const MAX_TIMBRALITY: usize = 4;

/// Per-timbre and per-voice object limits.
pub const MAX_TIMBRE_CONTROLS: usize = 8;
pub const MAX_VOICE_CONTROLS: usize = 8;
pub const MAX_TIMBRE_MODULES: usize = 16;
pub const MAX_VOICE_MODULES: usize = 16;
pub const MAX_OUTPUT_MODULES: usize = 4;

/// Most ports any single module may declare.
pub const MODULE_MAX_PORTS: usize = 6;

/// Derived totals across one timbre plus one voice.
pub const MAX_CONTROLS: usize = MAX_TIMBRE_CONTROLS + MAX_VOICE_CONTROLS;
pub const MAX_MODULES: usize = MAX_TIMBRE_MODULES + MAX_VOICE_MODULES;

/// Pessimistic port bound: every control has one port, every module may
/// declare the maximum.
pub const MAX_PORTS: usize = MAX_CONTROLS + MODULE_MAX_PORTS * MAX_MODULES;

/// Most links one patch may declare.
pub const MAX_LINKS: usize = 64;

/// Step-list bounds for a compiled plan.
pub const MAX_PREP_STEPS: usize = MAX_CONTROLS + MAX_LINKS;
pub const MAX_RENDER_STEPS: usize = MAX_CONTROLS + MAX_LINKS + MAX_MODULES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_limits_are_consistent() {
        assert!(MAX_CONTROLS >= MAX_TIMBRE_CONTROLS);
        assert!(MAX_MODULES >= MAX_TIMBRE_MODULES);
        assert!(MAX_RENDER_STEPS >= MAX_PREP_STEPS);
        // Step indices are stored as u16.
        assert!(MAX_PORTS < u16::MAX as usize);
        // Port indices fit a subset bitset.
        assert!(MAX_PORTS <= crate::universe::MAX_UNIVERSE);
    }
}
