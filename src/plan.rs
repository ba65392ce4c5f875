//! Plans: the compiled, index-based representation of one patch.
//!
//! A plan has five ordered step sequences. The prep sequences run once, when
//! the plan is installed (timbre side) or when a voice attaches (voice
//! side); the render sequences are bound into action lists and run every
//! chunk. Steps hold resolver indices only, so a plan is pure data: it can
//! be compared structurally, printed, and serialized for golden tests.

use crate::defs::{Scale, MAX_PREP_STEPS, MAX_RENDER_STEPS};
use crate::planner::PlanError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One-shot buffer preparation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrepStep {
    /// Fill the port's backing buffer and reset any aliasing.
    Clear { port: u16, value: Scale },
    /// Redirect the destination's reads, or reset them when `src` is none.
    Alias { dest: u16, src: Option<u16> },
}

/// Per-chunk render work.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RenderStep {
    /// Render a control into its output port.
    Control { ctl: u16 },
    /// Render a module.
    Module { module: u16 },
    /// First write into a destination: `dest = src · ctl · scale`.
    Copy {
        dest: u16,
        src: Option<u16>,
        ctl: Option<u16>,
        link: u16,
    },
    /// Subsequent writes accumulate: `dest += src · ctl · scale`.
    Add {
        dest: u16,
        src: Option<u16>,
        ctl: Option<u16>,
        link: u16,
    },
}

/// Five ordered step sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    t_prep: Vec<PrepStep>,
    v_prep: Vec<PrepStep>,
    pre_render: Vec<RenderStep>,
    v_render: Vec<RenderStep>,
    post_render: Vec<RenderStep>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn t_prep(&self) -> &[PrepStep] {
        &self.t_prep
    }

    pub fn v_prep(&self) -> &[PrepStep] {
        &self.v_prep
    }

    pub fn pre_render(&self) -> &[RenderStep] {
        &self.pre_render
    }

    pub fn v_render(&self) -> &[RenderStep] {
        &self.v_render
    }

    pub fn post_render(&self) -> &[RenderStep] {
        &self.post_render
    }

    pub(crate) fn push_t_prep(&mut self, step: PrepStep) -> Result<(), PlanError> {
        push_prep(&mut self.t_prep, step)
    }

    pub(crate) fn push_v_prep(&mut self, step: PrepStep) -> Result<(), PlanError> {
        push_prep(&mut self.v_prep, step)
    }

    pub(crate) fn push_pre_render(&mut self, step: RenderStep) -> Result<(), PlanError> {
        push_render(&mut self.pre_render, step)
    }

    pub(crate) fn push_v_render(&mut self, step: RenderStep) -> Result<(), PlanError> {
        push_render(&mut self.v_render, step)
    }

    pub(crate) fn push_post_render(&mut self, step: RenderStep) -> Result<(), PlanError> {
        push_render(&mut self.post_render, step)
    }
}

fn push_prep(seq: &mut Vec<PrepStep>, step: PrepStep) -> Result<(), PlanError> {
    if seq.len() >= MAX_PREP_STEPS {
        return Err(PlanError::Capacity {
            what: "MAX_PREP_STEPS",
        });
    }
    seq.push(step);
    Ok(())
}

fn push_render(seq: &mut Vec<RenderStep>, step: RenderStep) -> Result<(), PlanError> {
    if seq.len() >= MAX_RENDER_STEPS {
        return Err(PlanError::Capacity {
            what: "MAX_RENDER_STEPS",
        });
    }
    seq.push(step);
    Ok(())
}

impl fmt::Display for PrepStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepStep::Clear { port, value } => write!(f, "clear({}, {})", port, value),
            PrepStep::Alias { dest, src: Some(s) } => write!(f, "alias({}, {})", dest, s),
            PrepStep::Alias { dest, src: None } => write!(f, "alias({}, -)", dest),
        }
    }
}

impl fmt::Display for RenderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |i: &Option<u16>| match i {
            Some(v) => v.to_string(),
            None => "-".to_string(),
        };
        match self {
            RenderStep::Control { ctl } => write!(f, "crend({})", ctl),
            RenderStep::Module { module } => write!(f, "mrend({})", module),
            RenderStep::Copy { dest, src, ctl, .. } => {
                write!(f, "copy({}, {}, {})", dest, opt(src), opt(ctl))
            }
            RenderStep::Add { dest, src, ctl, .. } => {
                write!(f, "add({}, {}, {})", dest, opt(src), opt(ctl))
            }
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq<T: fmt::Display>(f: &mut fmt::Formatter<'_>, name: &str, steps: &[T]) -> fmt::Result {
            write!(f, "{}: [", name)?;
            for (i, s) in steps.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", s)?;
            }
            writeln!(f, "]")
        }
        seq(f, "t_prep", &self.t_prep)?;
        seq(f, "v_prep", &self.v_prep)?;
        seq(f, "pre_render", &self.pre_render)?;
        seq(f, "v_render", &self.v_render)?;
        seq(f, "post_render", &self.post_render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        let mut a = Plan::new();
        let mut b = Plan::new();
        a.push_t_prep(PrepStep::Clear { port: 0, value: 0.0 }).unwrap();
        b.push_t_prep(PrepStep::Clear { port: 0, value: 0.0 }).unwrap();
        assert_eq!(a, b);
        b.push_v_render(RenderStep::Module { module: 1 }).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn step_display_matches_step_kind() {
        assert_eq!(
            PrepStep::Alias {
                dest: 3,
                src: Some(1)
            }
            .to_string(),
            "alias(3, 1)"
        );
        assert_eq!(PrepStep::Alias { dest: 3, src: None }.to_string(), "alias(3, -)");
        assert_eq!(
            RenderStep::Copy {
                dest: 2,
                src: Some(4),
                ctl: None,
                link: 0
            }
            .to_string(),
            "copy(2, 4, -)"
        );
    }

    #[test]
    fn prep_capacity_is_enforced() {
        let mut plan = Plan::new();
        for i in 0..MAX_PREP_STEPS {
            plan.push_t_prep(PrepStep::Clear {
                port: i as u16,
                value: 0.0,
            })
            .unwrap();
        }
        assert!(plan
            .push_t_prep(PrepStep::Clear { port: 0, value: 0.0 })
            .is_err());
    }

    #[test]
    fn plans_round_trip_through_json() {
        let mut plan = Plan::new();
        plan.push_v_prep(PrepStep::Alias { dest: 1, src: None }).unwrap();
        plan.push_v_render(RenderStep::Copy {
            dest: 1,
            src: Some(0),
            ctl: None,
            link: 0,
        })
        .unwrap();
        plan.push_v_render(RenderStep::Module { module: 0 }).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
    }
}
