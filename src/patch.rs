//! Patches: a user-authored set of links defining one timbre's wiring.
//!
//! Declaration order is preserved end to end. When several links target the
//! same destination, the first one the patch declared becomes the copy and
//! the later ones become adds.

use crate::defs::{Scale, DEFAULT_SCALE, MAX_LINKS};
use crate::link::Link;
use crate::module::{InRef, OutRef};
use crate::planner::PlanError;

/// An ordered set of links.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    links: Vec<Link>,
}

impl Patch {
    pub fn new() -> Self {
        Self {
            links: Vec::with_capacity(MAX_LINKS),
        }
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Connect a source output to a destination input at unit gain.
    pub fn connect(&mut self, src: OutRef, dest: InRef) -> Result<(), PlanError> {
        self.push(Link::new(dest, Some(src), None, DEFAULT_SCALE))
    }

    /// Connect a source output to a destination input with a gain.
    pub fn connect_scaled(
        &mut self,
        src: OutRef,
        dest: InRef,
        scale: Scale,
    ) -> Result<(), PlanError> {
        self.push(Link::new(dest, Some(src), None, scale))
    }

    /// Connect a source modulated by a control: `dest = src · ctl`.
    pub fn modulate(&mut self, src: OutRef, ctl: OutRef, dest: InRef) -> Result<(), PlanError> {
        self.push(Link::new(dest, Some(src), Some(ctl), DEFAULT_SCALE))
    }

    /// Connect a source modulated by a control with a gain.
    pub fn modulate_scaled(
        &mut self,
        src: OutRef,
        ctl: OutRef,
        dest: InRef,
        scale: Scale,
    ) -> Result<(), PlanError> {
        self.push(Link::new(dest, Some(src), Some(ctl), scale))
    }

    /// Feed a control's value stream into an input: `dest = ctl`.
    pub fn drive(&mut self, ctl: OutRef, dest: InRef) -> Result<(), PlanError> {
        self.push(Link::new(dest, None, Some(ctl), DEFAULT_SCALE))
    }

    /// Feed a control's value stream into an input with a gain.
    pub fn drive_scaled(
        &mut self,
        ctl: OutRef,
        dest: InRef,
        scale: Scale,
    ) -> Result<(), PlanError> {
        self.push(Link::new(dest, None, Some(ctl), scale))
    }

    /// Hold an input at a constant value.
    pub fn constant(&mut self, dest: InRef, value: Scale) -> Result<(), PlanError> {
        self.push(Link::new(dest, None, None, value))
    }

    fn push(&mut self, link: Link) -> Result<(), PlanError> {
        if self.links.len() >= MAX_LINKS {
            return Err(PlanError::Capacity { what: "MAX_LINKS" });
        }
        self.links.push(link);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleKey, OwnerKey, PortKey};
    use crate::port::ElementType;
    use slotmap::SlotMap;

    fn endpoints() -> (OutRef, InRef) {
        let mut keys: SlotMap<ModuleKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let src = OutRef {
            key: PortKey {
                owner: OwnerKey::Module(a),
                port: 0,
            },
            ty: ElementType::F32,
        };
        let dest = InRef {
            key: PortKey {
                owner: OwnerKey::Module(b),
                port: 0,
            },
            ty: ElementType::F32,
        };
        (src, dest)
    }

    #[test]
    fn declaration_order_is_preserved() {
        let (src, dest) = endpoints();
        let mut patch = Patch::new();
        patch.connect(src, dest).unwrap();
        patch.connect_scaled(src, dest, 0.25).unwrap();
        patch.constant(dest, 1.0).unwrap();
        assert_eq!(patch.links().len(), 3);
        assert!(patch.links()[0].is_simple());
        assert_eq!(patch.links()[1].scale(), 0.25);
        assert!(patch.links()[2].is_constant());
    }

    #[test]
    fn link_capacity_is_enforced() {
        let (src, dest) = endpoints();
        let mut patch = Patch::new();
        for _ in 0..MAX_LINKS {
            patch.connect(src, dest).unwrap();
        }
        let err = patch.connect(src, dest).unwrap_err();
        assert_eq!(err.to_string(), "capacity exceeded: MAX_LINKS");
    }
}
