//! Links: typed patch cords.
//!
//! A link connects an optional source output and an optional control output
//! to a destination input, with a scalar gain:
//!
//! | src | ctl | effect per frame              |
//! |-----|-----|-------------------------------|
//! | yes | yes | `dest = src · ctl · scale`    |
//! | yes | no  | `dest = src · scale`          |
//! | no  | yes | `dest = ctl · scale`          |
//! | no  | no  | `dest = scale` (constant)     |
//!
//! When several links target the same input, the first becomes a copy and
//! the rest add, in patch declaration order.
//!
//! Links are immutable once built. Element conversions between differing
//! port types are resolved when the plan is bound: [`Link::copy_kernel`] and
//! [`Link::add_kernel`] hand back a monomorphic function pointer, so the
//! render loop performs no type dispatch.

use crate::defs::{Scale, DEFAULT_SCALE};
use crate::module::{InRef, OutRef};
use crate::port::{select_kernel, Kernel};

/// A directed, typed connection in a patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    dest: InRef,
    src: Option<OutRef>,
    ctl: Option<OutRef>,
    scale: Scale,
}

impl Link {
    pub(crate) fn new(
        dest: InRef,
        src: Option<OutRef>,
        ctl: Option<OutRef>,
        scale: Scale,
    ) -> Self {
        Self {
            dest,
            src,
            ctl,
            scale,
        }
    }

    pub fn dest(&self) -> InRef {
        self.dest
    }

    pub fn src(&self) -> Option<OutRef> {
        self.src
    }

    pub fn ctl(&self) -> Option<OutRef> {
        self.ctl
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// A simple link passes data through unmodified: source only, matching
    /// element types, unit scale. Simple links are eligible for aliasing
    /// instead of copying.
    pub fn is_simple(&self) -> bool {
        match self.src {
            Some(src) => {
                self.ctl.is_none()
                    && src.element_type() == self.dest.element_type()
                    && self.scale == DEFAULT_SCALE
            }
            None => false,
        }
    }

    /// A constant link has neither source nor control; it degenerates to
    /// filling the destination with `scale`, which the planner folds into a
    /// clear-buffer prep step when it is the port's only fan-in.
    pub fn is_constant(&self) -> bool {
        self.src.is_none() && self.ctl.is_none()
    }

    pub(crate) fn copy_kernel(&self) -> Kernel {
        select_kernel(
            false,
            self.dest.element_type(),
            self.src.map(|s| s.element_type()),
            self.ctl.map(|c| c.element_type()),
        )
    }

    pub(crate) fn add_kernel(&self) -> Kernel {
        select_kernel(
            true,
            self.dest.element_type(),
            self.src.map(|s| s.element_type()),
            self.ctl.map(|c| c.element_type()),
        )
    }
}
