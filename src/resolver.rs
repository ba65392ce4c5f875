//! The resolver: a finalized bijection between registered objects and dense
//! indices.
//!
//! Plan steps reference controls, modules, and ports by index. Two resolvers
//! coexist per timbre: a timbre-only resolver (prep and pre/post render) and
//! a timbre+voice resolver (voice render). Because objects are always added
//! timbre-first and ports are collected in registration order followed by
//! each owner's declaration order, the two resolvers agree on every index in
//! the shared timbre prefix.

use crate::module::{ControlKey, ModuleKey, PortKey};
use crate::port::{ElementType, PortDir, PortSpec};
use crate::universe::Universe;

/// Dense index assignment over controls, modules, and their ports.
pub struct Resolver {
    controls: Universe<ControlKey>,
    modules: Universe<ModuleKey>,
    ports: Universe<PortKey>,
    port_dirs: Vec<PortDir>,
    port_types: Vec<ElementType>,
    control_port_base: Vec<u16>,
    module_port_base: Vec<u16>,
    module_port_len: Vec<u16>,
    finalized: bool,
}

impl Resolver {
    pub fn new() -> Self {
        Self {
            controls: Universe::new(),
            modules: Universe::new(),
            ports: Universe::new(),
            port_dirs: Vec::new(),
            port_types: Vec::new(),
            control_port_base: Vec::new(),
            module_port_base: Vec::new(),
            module_port_len: Vec::new(),
            finalized: false,
        }
    }

    /// Register a control and collect its ports.
    pub fn add_control(&mut self, key: ControlKey, spec: &PortSpec) -> &mut Self {
        assert!(!self.finalized, "resolver already finalized");
        self.controls.push(key);
        self.control_port_base.push(self.ports.len() as u16);
        self.collect_ports(PortOwner::Control(key), spec);
        self
    }

    /// Register a module and collect its ports.
    pub fn add_module(&mut self, key: ModuleKey, spec: &PortSpec) -> &mut Self {
        assert!(!self.finalized, "resolver already finalized");
        self.modules.push(key);
        self.module_port_base.push(self.ports.len() as u16);
        self.module_port_len.push(spec.len() as u16);
        self.collect_ports(PortOwner::Module(key), spec);
        self
    }

    fn collect_ports(&mut self, owner: PortOwner, spec: &PortSpec) {
        for (i, def) in spec.ports.iter().enumerate() {
            let key = PortKey {
                owner: match owner {
                    PortOwner::Control(c) => crate::module::OwnerKey::Control(c),
                    PortOwner::Module(m) => crate::module::OwnerKey::Module(m),
                },
                port: i as u8,
            };
            self.ports.push(key);
            self.port_dirs.push(def.dir);
            self.port_types.push(def.ty);
        }
    }

    /// Lock the index assignment.
    pub fn finalize(&mut self) -> &mut Self {
        self.finalized = true;
        self
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn controls(&self) -> &Universe<ControlKey> {
        &self.controls
    }

    pub fn modules(&self) -> &Universe<ModuleKey> {
        &self.modules
    }

    pub fn ports(&self) -> &Universe<PortKey> {
        &self.ports
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn find_port(&self, key: PortKey) -> Option<u16> {
        self.ports.find(key).map(|i| i as u16)
    }

    pub fn port_dir(&self, index: usize) -> PortDir {
        self.port_dirs[index]
    }

    pub fn port_type(&self, index: usize) -> ElementType {
        self.port_types[index]
    }

    pub fn port_types(&self) -> &[ElementType] {
        &self.port_types
    }

    /// First port index of the control at dense index `ci`.
    pub fn control_port_base(&self, ci: usize) -> u16 {
        self.control_port_base[ci]
    }

    /// First port index of the module at dense index `mi`.
    pub fn module_port_base(&self, mi: usize) -> u16 {
        self.module_port_base[mi]
    }

    /// Global port indices of the module at dense index `mi`, in
    /// declaration order.
    pub fn module_ports(&self, mi: usize) -> impl Iterator<Item = usize> {
        let base = self.module_port_base[mi] as usize;
        let len = self.module_port_len[mi] as usize;
        base..base + len
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

enum PortOwner {
    Control(ControlKey),
    Module(ModuleKey),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortDef;
    use slotmap::SlotMap;

    fn spec(io: &[(&str, PortDir)]) -> PortSpec {
        PortSpec::new(
            io.iter()
                .map(|(name, dir)| match dir {
                    PortDir::Input => PortDef::input(*name, ElementType::F32),
                    PortDir::Output => PortDef::output(*name, ElementType::F32),
                })
                .collect(),
        )
    }

    #[test]
    fn ports_follow_registration_and_declaration_order() {
        let mut mods: SlotMap<ModuleKey, ()> = SlotMap::with_key();
        let mut ctls: SlotMap<ControlKey, ()> = SlotMap::with_key();
        let c0 = ctls.insert(());
        let m0 = mods.insert(());
        let m1 = mods.insert(());

        let c_spec = spec(&[("out", PortDir::Output)]);
        let m0_spec = spec(&[("in", PortDir::Input), ("out", PortDir::Output)]);
        let m1_spec = spec(&[("in", PortDir::Input)]);

        let mut r = Resolver::new();
        r.add_control(c0, &c_spec)
            .add_module(m0, &m0_spec)
            .add_module(m1, &m1_spec)
            .finalize();

        assert_eq!(r.port_count(), 4);
        assert_eq!(r.control_port_base(0), 0);
        assert_eq!(r.module_port_base(0), 1);
        assert_eq!(r.module_port_base(1), 3);
        assert_eq!(r.module_ports(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(r.port_dir(1), PortDir::Input);
        assert_eq!(r.port_dir(2), PortDir::Output);
    }

    #[test]
    fn timbre_prefix_agrees_between_resolvers() {
        let mut mods: SlotMap<ModuleKey, ()> = SlotMap::with_key();
        let tm = mods.insert(());
        let vm = mods.insert(());
        let t_spec = spec(&[("in", PortDir::Input), ("out", PortDir::Output)]);
        let v_spec = spec(&[("out", PortDir::Output)]);

        let mut timbre_only = Resolver::new();
        timbre_only.add_module(tm, &t_spec).finalize();

        let mut combined = Resolver::new();
        combined
            .add_module(tm, &t_spec)
            .add_module(vm, &v_spec)
            .finalize();

        for pi in 0..timbre_only.port_count() {
            assert_eq!(
                timbre_only.ports().member(pi),
                combined.ports().member(pi)
            );
        }
        assert_eq!(combined.modules().index(tm), timbre_only.modules().index(tm));
    }
}
