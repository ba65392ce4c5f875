//! Voice assignment policies.
//!
//! The note manager asks an [`Assigner`] for voices: first for an idle one,
//! and failing that for a victim to steal. Stealing is soft: the chosen
//! voice is killed (it runs its shutdown ramp) and the incoming note waits
//! in the pending queue until the voice goes idle.

use crate::synth::Synth;
use crate::voice::{Voice, VoiceState};
use std::collections::VecDeque;

/// A pluggable voice allocation policy.
pub trait Assigner: Send {
    /// An idle voice, or `None` when every voice is busy.
    ///
    /// Returning a non-idle voice is a policy bug; the engine asserts
    /// against it in debug builds.
    fn assign_idle_voice(&mut self, synth: &Synth) -> Option<usize>;

    /// The voice to steal when none are idle, or `None` when every voice is
    /// already stopping.
    fn choose_voice_to_steal(&mut self, synth: &Synth) -> Option<usize>;
}

/// The reference policy: idle voices round-robin, stealing by lowest
/// priority.
pub struct PriorityAssigner {
    prio: Box<dyn Fn(&Voice) -> i64 + Send>,
    free: VecDeque<usize>,
}

impl PriorityAssigner {
    /// Build with a custom priority function; the voice with the *lowest*
    /// value is stolen first.
    pub fn new(prio: impl Fn(&Voice) -> i64 + Send + 'static) -> Self {
        Self {
            prio: Box::new(prio),
            free: VecDeque::new(),
        }
    }

    /// The usual ordering: released notes are stolen before sounding ones,
    /// older notes before newer ones.
    pub fn with_default_priority() -> Self {
        Self::new(|v| {
            let bucket: i64 = match v.state() {
                VoiceState::Releasing => 0,
                VoiceState::Sounding => 1,
                _ => 2,
            };
            (bucket << 32) - v.age() as i64
        })
    }
}

impl Assigner for PriorityAssigner {
    fn assign_idle_voice(&mut self, synth: &Synth) -> Option<usize> {
        if self.free.is_empty() {
            for (i, v) in synth.voices().iter().enumerate() {
                if v.state() == VoiceState::Idle {
                    self.free.push_back(i);
                }
            }
        }
        while let Some(i) = self.free.pop_front() {
            // The scan may be stale; skip voices that became busy.
            if synth.voices()[i].state() == VoiceState::Idle {
                return Some(i);
            }
        }
        None
    }

    fn choose_voice_to_steal(&mut self, synth: &Synth) -> Option<usize> {
        synth
            .voices()
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state() != VoiceState::Stopping)
            .min_by_key(|(_, v)| (self.prio)(v))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn synth(polyphony: usize) -> Synth {
        let mut s = Synth::new("assign-test", polyphony, 1);
        s.finalize(&mut Config::new(44_100)).unwrap();
        s
    }

    #[test]
    fn idle_voices_assign_in_index_order() {
        let mut s = synth(3);
        let mut a = PriorityAssigner::with_default_priority();
        assert_eq!(a.assign_idle_voice(&s), Some(0));
        s.voices_mut()[0].start_note();
        assert_eq!(a.assign_idle_voice(&s), Some(1));
        s.voices_mut()[1].start_note();
        assert_eq!(a.assign_idle_voice(&s), Some(2));
        s.voices_mut()[2].start_note();
        assert_eq!(a.assign_idle_voice(&s), None);
    }

    #[test]
    fn steal_prefers_released_then_oldest() {
        let mut s = synth(3);
        let mut a = PriorityAssigner::with_default_priority();
        for v in s.voices_mut() {
            v.start_note();
        }
        // Voice 1 is released; it loses to the sounding ones.
        s.voices_mut()[1].release_note();
        assert_eq!(a.choose_voice_to_steal(&s), Some(1));
        s.voices_mut()[1].kill_note();
        // All remaining are sounding with equal age; lowest index wins.
        assert_eq!(a.choose_voice_to_steal(&s), Some(0));
    }

    #[test]
    fn steal_when_all_stopping_returns_none() {
        let mut s = synth(2);
        let mut a = PriorityAssigner::with_default_priority();
        for v in s.voices_mut() {
            v.start_note();
            v.kill_note();
        }
        assert_eq!(a.choose_voice_to_steal(&s), None);
    }
}
