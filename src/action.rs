//! Bound render actions.
//!
//! Plan steps are pure data; installing a plan binds them into actions:
//! copy/add steps pick up their monomorphized kernel and gain, control and
//! module steps keep their dense index. Executing an action list is a
//! straight-line walk over preallocated buffers with no allocation, no
//! locks, and no type dispatch.

use crate::defs::Scale;
use crate::link::Link;
use crate::module::{Control, Module, RenderCtx, VoiceView};
use crate::plan::RenderStep;
use crate::port::{BufferPool, Kernel, PortLoc};
use crate::voice::Voice;

/// One executable render step.
#[derive(Clone, Copy)]
pub(crate) enum Action {
    /// Run a kernel: `dest (+)= src · ctl · scale`. Whether it assigns or
    /// accumulates is baked into the kernel.
    Mix {
        dest: u16,
        src: Option<u16>,
        ctl: Option<u16>,
        kernel: Kernel,
        scale: Scale,
    },
    Control {
        index: u16,
    },
    Module {
        index: u16,
    },
}

/// Bind a step sequence against the patch's links.
pub(crate) fn bind(steps: &[RenderStep], links: &[Link], out: &mut Vec<Action>) {
    out.clear();
    for step in steps {
        let action = match *step {
            RenderStep::Control { ctl } => Action::Control { index: ctl },
            RenderStep::Module { module } => Action::Module { index: module },
            RenderStep::Copy {
                dest,
                src,
                ctl,
                link,
            } => {
                let link = &links[link as usize];
                Action::Mix {
                    dest,
                    src,
                    ctl,
                    kernel: link.copy_kernel(),
                    scale: link.scale(),
                }
            }
            RenderStep::Add {
                dest,
                src,
                ctl,
                link,
            } => {
                let link = &links[link as usize];
                Action::Mix {
                    dest,
                    src,
                    ctl,
                    kernel: link.add_kernel(),
                    scale: link.scale(),
                }
            }
        };
        out.push(action);
    }
}

/// The execution scope for one action list: the owning pool, the owning
/// objects, and the offsets translating the resolver's global indices into
/// this scope.
pub(crate) struct Scope<'a> {
    pub pool: &'a mut BufferPool,
    /// The timbre's pool, present while a voice renders. Voice-phase mix
    /// steps may read timbre buffers; everything else is scope-local.
    pub upstream: Option<&'a BufferPool>,
    pub controls: &'a mut [Box<dyn Control>],
    pub modules: &'a mut [Box<dyn Module>],
    /// Pool-local first-port index per local control / module.
    pub control_bases: &'a [u16],
    pub module_bases: &'a [u16],
    /// Global index of this scope's first control / module / port.
    pub control_offset: usize,
    pub module_offset: usize,
    pub port_offset: usize,
    /// Attached voices, present during the post-render phase.
    pub voices: Option<(&'a [Voice], u64)>,
}

pub(crate) fn run(actions: &[Action], frames: usize, scope: &mut Scope) {
    for action in actions {
        match *action {
            Action::Mix {
                dest,
                src,
                ctl,
                kernel,
                scale,
            } => {
                let dest = dest as usize - scope.port_offset;
                scope.pool.run_kernel(
                    kernel,
                    scale,
                    frames,
                    dest,
                    locate(src, scope.port_offset),
                    locate(ctl, scope.port_offset),
                    scope.upstream,
                );
            }
            Action::Control { index } => {
                let local = index as usize - scope.control_offset;
                let base = scope.control_bases[local] as usize;
                let mut ctx = RenderCtx {
                    pool: &mut *scope.pool,
                    base,
                    frames,
                    voices: None,
                };
                scope.controls[local].render(&mut ctx);
            }
            Action::Module { index } => {
                let local = index as usize - scope.module_offset;
                let base = scope.module_bases[local] as usize;
                let voices = scope.voices.map(|(voices, attached)| VoiceView {
                    voices,
                    attached,
                });
                let mut ctx = RenderCtx {
                    pool: &mut *scope.pool,
                    base,
                    frames,
                    voices,
                };
                scope.modules[local].render(&mut ctx);
            }
        }
    }
}

/// Split a global port index into local / upstream halves.
fn locate(port: Option<u16>, offset: usize) -> Option<PortLoc> {
    port.map(|p| {
        let p = p as usize;
        if p >= offset {
            PortLoc::Local(p - offset)
        } else {
            PortLoc::Upstream(p)
        }
    })
}
