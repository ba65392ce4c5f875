//! Ports and buffers.
//!
//! A port is a named endpoint through which signal data passes. Every port
//! owns a backing buffer of [`MAX_FRAMES`] samples; an input port
//! additionally carries a read redirect, so the planner can *alias* a
//! trivially connected input straight onto its source's buffer instead of
//! copying every chunk.
//!
//! Buffers do not live inside the modules that declare them. Each timbre and
//! each voice owns a [`BufferPool`] laid out by the resolver, and modules
//! render through a context that hands them slices of that pool. Plan steps
//! reference pool indices, never pointers, so timbres and voices can be
//! cloned and relocated freely.

use crate::defs::{Scale, MAX_FRAMES};
use serde::{Deserialize, Serialize};

/// Element type of a port's samples.
///
/// The set is closed: link kernels are monomorphized over these variants
/// when a patch is applied, so the per-frame loops contain no type dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Audio-rate samples (32-bit float).
    F32,
    /// Double-precision values, used by controls that need the headroom
    /// (e.g. frequency in Hz).
    F64,
}

/// Types that can flow through a port.
pub trait Element: Copy + Default + Send + 'static {
    const TYPE: ElementType;
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::F64;
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_f64(self) -> f64 {
        self
    }
}

/// Direction of a port, seen from its owning module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDir {
    Input,
    Output,
}

/// Definition of a single port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDef {
    /// Human-readable name (e.g. "freq", "out").
    pub name: String,
    pub dir: PortDir,
    pub ty: ElementType,
}

impl PortDef {
    pub fn input(name: impl Into<String>, ty: ElementType) -> Self {
        Self {
            name: name.into(),
            dir: PortDir::Input,
            ty,
        }
    }

    pub fn output(name: impl Into<String>, ty: ElementType) -> Self {
        Self {
            name: name.into(),
            dir: PortDir::Output,
            ty,
        }
    }
}

/// Ordered list of a module's ports.
///
/// The order is significant: it defines the resolver's port numbering, so a
/// module must declare its ports once and never reorder them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub ports: Vec<PortDef>,
}

impl PortSpec {
    pub fn new(ports: Vec<PortDef>) -> Self {
        Self { ports }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Find a port by name, returning its declaration index.
    pub fn by_name(&self, name: &str) -> Option<(u8, &PortDef)> {
        self.ports
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
            .map(|(i, p)| (i as u8, p))
    }

    pub fn inputs(&self) -> impl Iterator<Item = (u8, &PortDef)> {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.dir == PortDir::Input)
            .map(|(i, p)| (i as u8, p))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (u8, &PortDef)> {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.dir == PortDir::Output)
            .map(|(i, p)| (i as u8, p))
    }
}

/// One port's backing storage.
#[derive(Clone)]
pub(crate) enum Buf {
    F32([f32; MAX_FRAMES]),
    F64([f64; MAX_FRAMES]),
}

impl Buf {
    fn new(ty: ElementType) -> Self {
        match ty {
            ElementType::F32 => Buf::F32([0.0; MAX_FRAMES]),
            ElementType::F64 => Buf::F64([0.0; MAX_FRAMES]),
        }
    }

    pub(crate) fn element_type(&self) -> ElementType {
        match self {
            Buf::F32(_) => ElementType::F32,
            Buf::F64(_) => ElementType::F64,
        }
    }

    fn fill(&mut self, value: f64) {
        match self {
            Buf::F32(b) => b.fill(value as f32),
            Buf::F64(b) => b.fill(value),
        }
    }

    fn as_f32(&self) -> &[f32; MAX_FRAMES] {
        match self {
            Buf::F32(b) => b,
            Buf::F64(_) => panic!("port is f64, accessed as f32"),
        }
    }

    fn as_f32_mut(&mut self) -> &mut [f32; MAX_FRAMES] {
        match self {
            Buf::F32(b) => b,
            Buf::F64(_) => panic!("port is f64, accessed as f32"),
        }
    }

    fn as_f64(&self) -> &[f64; MAX_FRAMES] {
        match self {
            Buf::F64(b) => b,
            Buf::F32(_) => panic!("port is f32, accessed as f64"),
        }
    }

    fn as_f64_mut(&mut self) -> &mut [f64; MAX_FRAMES] {
        match self {
            Buf::F64(b) => b,
            Buf::F32(_) => panic!("port is f32, accessed as f64"),
        }
    }

}

/// Typed access to a [`Buf`], so kernels can monomorphize over element
/// types. Crate-internal companion to [`Element`].
pub(crate) trait BufAccess: Element {
    fn of(buf: &Buf) -> &[Self; MAX_FRAMES];
    fn of_mut(buf: &mut Buf) -> &mut [Self; MAX_FRAMES];
}

impl BufAccess for f32 {
    fn of(buf: &Buf) -> &[f32; MAX_FRAMES] {
        buf.as_f32()
    }
    fn of_mut(buf: &mut Buf) -> &mut [f32; MAX_FRAMES] {
        buf.as_f32_mut()
    }
}

impl BufAccess for f64 {
    fn of(buf: &Buf) -> &[f64; MAX_FRAMES] {
        buf.as_f64()
    }
    fn of_mut(buf: &mut Buf) -> &mut [f64; MAX_FRAMES] {
        buf.as_f64_mut()
    }
}

/// A pool of port buffers for one timbre or one voice.
///
/// Index space is the resolver's dense port numbering, localized to the
/// owning scope (a voice pool's index 0 is the first voice port). Input
/// ports carry a redirect: reads go through `read_from`, writes always land
/// in the backing buffer. The redirect is always a valid local index.
#[derive(Clone)]
pub struct BufferPool {
    bufs: Vec<Buf>,
    read_from: Vec<u16>,
}

impl BufferPool {
    /// Build a pool for the given port layout.
    pub(crate) fn for_layout(types: &[ElementType]) -> Self {
        Self {
            bufs: types.iter().map(|&t| Buf::new(t)).collect(),
            read_from: (0..types.len() as u16).collect(),
        }
    }

    /// Fill the backing buffer with `value` and point reads back at it.
    pub(crate) fn clear(&mut self, port: usize, value: f64) {
        self.bufs[port].fill(value);
        self.read_from[port] = port as u16;
    }

    /// Redirect reads of `dest` to `src`'s buffer, or back to the backing
    /// buffer when `src` is `None`. Aliasing is only legal between ports of
    /// equal element type; the planner guarantees this.
    pub(crate) fn alias(&mut self, dest: usize, src: Option<usize>) {
        match src {
            Some(s) => {
                debug_assert_eq!(
                    self.bufs[dest].element_type(),
                    self.bufs[s].element_type(),
                    "aliased ports must share an element type",
                );
                self.read_from[dest] = s as u16;
            }
            None => self.read_from[dest] = dest as u16,
        }
    }

    /// Read an input port through its redirect.
    pub(crate) fn read_f32(&self, port: usize) -> &[f32; MAX_FRAMES] {
        self.bufs[self.read_from[port] as usize].as_f32()
    }

    pub(crate) fn read_f64(&self, port: usize) -> &[f64; MAX_FRAMES] {
        self.bufs[self.read_from[port] as usize].as_f64()
    }

    /// Borrow an output port's backing buffer for writing.
    pub(crate) fn write_f32(&mut self, port: usize) -> &mut [f32; MAX_FRAMES] {
        self.bufs[port].as_f32_mut()
    }

    pub(crate) fn write_f64(&mut self, port: usize) -> &mut [f64; MAX_FRAMES] {
        self.bufs[port].as_f64_mut()
    }

    pub(crate) fn backing(&self, port: usize) -> &Buf {
        &self.bufs[port]
    }

    pub(crate) fn backing_mut(&mut self, port: usize) -> &mut Buf {
        &mut self.bufs[port]
    }

    /// Borrow one buffer for reading (through `read`'s redirect) and a
    /// different buffer for writing, simultaneously.
    ///
    /// Disjointness rests on the planner: the module graph is a DAG and an
    /// input only ever aliases a predecessor's output, so a module never
    /// reads the buffer it is writing. The property is still asserted.
    pub(crate) fn read_write_f32(
        &mut self,
        read: usize,
        write: usize,
    ) -> (&[f32; MAX_FRAMES], &mut [f32; MAX_FRAMES]) {
        let resolved = self.read_from[read] as usize;
        assert_ne!(resolved, write, "render step reads the buffer it writes");
        let rp: *const Buf = &self.bufs[resolved];
        let wp: *mut Buf = &mut self.bufs[write];
        // SAFETY: `resolved != write`, so the two references cover disjoint
        // elements of `self.bufs` and cannot overlap.
        unsafe { ((*rp).as_f32(), (*wp).as_f32_mut()) }
    }

    /// Execute a bound kernel: read `src`/`ctl` backing buffers and write
    /// `dest`'s backing buffer.
    ///
    /// Local operands come from this pool; upstream operands from the
    /// timbre pool a voice is rendering under. A local operand never equals
    /// `dest` (planner-guaranteed, asserted here), so the split borrows are
    /// disjoint.
    pub(crate) fn run_kernel(
        &mut self,
        kernel: Kernel,
        scale: Scale,
        frames: usize,
        dest: usize,
        src: Option<PortLoc>,
        ctl: Option<PortLoc>,
        upstream: Option<&BufferPool>,
    ) {
        fn fetch<'p>(
            pool: &'p BufferPool,
            upstream: Option<&'p BufferPool>,
            dest: usize,
            loc: PortLoc,
        ) -> &'p Buf {
            match loc {
                PortLoc::Local(i) => {
                    assert_ne!(i, dest, "render step reads the buffer it writes");
                    &pool.bufs[i]
                }
                PortLoc::Upstream(i) => upstream
                    .expect("step reads a timbre buffer without an upstream pool")
                    .backing(i),
            }
        }
        let this: *mut BufferPool = self;
        // SAFETY: the shared borrows fetched below are either from the
        // upstream pool or from local indices asserted distinct from
        // `dest`, so they are disjoint from the mutable borrow of `dest`.
        unsafe {
            let src_buf = src.map(|loc| fetch(&*this, upstream, dest, loc));
            let ctl_buf = ctl.map(|loc| fetch(&*this, upstream, dest, loc));
            let dest_buf = &mut (&mut (*this).bufs)[dest];
            kernel(dest_buf, src_buf, ctl_buf, scale, frames);
        }
    }

    /// Two redirected reads and one write. The reads may share a buffer;
    /// neither may be the written one.
    pub(crate) fn read2_write_f32(
        &mut self,
        read_a: usize,
        read_b: usize,
        write: usize,
    ) -> (
        &[f32; MAX_FRAMES],
        &[f32; MAX_FRAMES],
        &mut [f32; MAX_FRAMES],
    ) {
        let ra = self.read_from[read_a] as usize;
        let rb = self.read_from[read_b] as usize;
        assert_ne!(ra, write, "render step reads the buffer it writes");
        assert_ne!(rb, write, "render step reads the buffer it writes");
        let pa: *const Buf = &self.bufs[ra];
        let pb: *const Buf = &self.bufs[rb];
        let wp: *mut Buf = &mut self.bufs[write];
        // SAFETY: neither read index equals the write index; shared reads of
        // the same buffer are fine.
        unsafe { ((*pa).as_f32(), (*pb).as_f32(), (*wp).as_f32_mut()) }
    }
}

/// Where a kernel operand lives: this scope's pool, or the timbre pool a
/// voice renders under.
#[derive(Debug, Clone, Copy)]
pub(crate) enum PortLoc {
    Local(usize),
    Upstream(usize),
}

/// A copy/add kernel with its element conversions resolved at bind time.
///
/// `dest` is always the destination input port's backing buffer; `src` and
/// `ctl` are output-port backing buffers, possibly from a different pool
/// (a voice reading a timbre buffer). The per-frame loops below are fully
/// monomorphic; the element-type match happens once, in [`select_kernel`].
pub(crate) type Kernel =
    fn(dest: &mut Buf, src: Option<&Buf>, ctl: Option<&Buf>, scale: Scale, frames: usize);

fn mix_src_ctl<D: BufAccess, S: BufAccess, C: BufAccess, const ADD: bool>(
    dest: &mut Buf,
    src: Option<&Buf>,
    ctl: Option<&Buf>,
    scale: Scale,
    frames: usize,
) {
    let src = S::of(src.expect("kernel bound with a source"));
    let ctl = C::of(ctl.expect("kernel bound with a control"));
    let dest = D::of_mut(dest);
    let scale = scale as f64;
    for i in 0..frames {
        let v = src[i].to_f64() * ctl[i].to_f64() * scale;
        let prev = if ADD { dest[i].to_f64() } else { 0.0 };
        dest[i] = D::from_f64(prev + v);
    }
}

fn mix_src<D: BufAccess, S: BufAccess, const ADD: bool>(
    dest: &mut Buf,
    src: Option<&Buf>,
    _ctl: Option<&Buf>,
    scale: Scale,
    frames: usize,
) {
    let src = S::of(src.expect("kernel bound with a source"));
    let dest = D::of_mut(dest);
    let scale = scale as f64;
    for i in 0..frames {
        let v = src[i].to_f64() * scale;
        let prev = if ADD { dest[i].to_f64() } else { 0.0 };
        dest[i] = D::from_f64(prev + v);
    }
}

fn mix_ctl<D: BufAccess, C: BufAccess, const ADD: bool>(
    dest: &mut Buf,
    _src: Option<&Buf>,
    ctl: Option<&Buf>,
    scale: Scale,
    frames: usize,
) {
    let ctl = C::of(ctl.expect("kernel bound with a control"));
    let dest = D::of_mut(dest);
    let scale = scale as f64;
    for i in 0..frames {
        let v = ctl[i].to_f64() * scale;
        let prev = if ADD { dest[i].to_f64() } else { 0.0 };
        dest[i] = D::from_f64(prev + v);
    }
}

fn mix_const<D: BufAccess, const ADD: bool>(
    dest: &mut Buf,
    _src: Option<&Buf>,
    _ctl: Option<&Buf>,
    scale: Scale,
    frames: usize,
) {
    let dest = D::of_mut(dest);
    let v = scale as f64;
    for i in 0..frames {
        let prev = if ADD { dest[i].to_f64() } else { 0.0 };
        dest[i] = D::from_f64(prev + v);
    }
}

fn select<const ADD: bool>(
    dest: ElementType,
    src: Option<ElementType>,
    ctl: Option<ElementType>,
) -> Kernel {
    use ElementType::{F32, F64};
    match (dest, src, ctl) {
        (F32, Some(F32), Some(F32)) => mix_src_ctl::<f32, f32, f32, ADD>,
        (F32, Some(F32), Some(F64)) => mix_src_ctl::<f32, f32, f64, ADD>,
        (F32, Some(F64), Some(F32)) => mix_src_ctl::<f32, f64, f32, ADD>,
        (F32, Some(F64), Some(F64)) => mix_src_ctl::<f32, f64, f64, ADD>,
        (F64, Some(F32), Some(F32)) => mix_src_ctl::<f64, f32, f32, ADD>,
        (F64, Some(F32), Some(F64)) => mix_src_ctl::<f64, f32, f64, ADD>,
        (F64, Some(F64), Some(F32)) => mix_src_ctl::<f64, f64, f32, ADD>,
        (F64, Some(F64), Some(F64)) => mix_src_ctl::<f64, f64, f64, ADD>,
        (F32, Some(F32), None) => mix_src::<f32, f32, ADD>,
        (F32, Some(F64), None) => mix_src::<f32, f64, ADD>,
        (F64, Some(F32), None) => mix_src::<f64, f32, ADD>,
        (F64, Some(F64), None) => mix_src::<f64, f64, ADD>,
        (F32, None, Some(F32)) => mix_ctl::<f32, f32, ADD>,
        (F32, None, Some(F64)) => mix_ctl::<f32, f64, ADD>,
        (F64, None, Some(F32)) => mix_ctl::<f64, f32, ADD>,
        (F64, None, Some(F64)) => mix_ctl::<f64, f64, ADD>,
        (F32, None, None) => mix_const::<f32, ADD>,
        (F64, None, None) => mix_const::<f64, ADD>,
    }
}

/// Pick the monomorphic kernel for a link's element-type triple.
pub(crate) fn select_kernel(
    accumulate: bool,
    dest: ElementType,
    src: Option<ElementType>,
    ctl: Option<ElementType>,
) -> Kernel {
    if accumulate {
        select::<true>(dest, src, ctl)
    } else {
        select::<false>(dest, src, ctl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool3() -> BufferPool {
        BufferPool::for_layout(&[ElementType::F32, ElementType::F32, ElementType::F64])
    }

    #[test]
    fn clear_fills_and_unaliases() {
        let mut pool = pool3();
        pool.alias(0, Some(1));
        pool.clear(0, 2.5);
        assert_eq!(pool.read_f32(0)[0], 2.5);
        assert_eq!(pool.read_f32(0)[MAX_FRAMES - 1], 2.5);
    }

    #[test]
    fn alias_redirects_reads_not_writes() {
        let mut pool = pool3();
        pool.write_f32(1).fill(0.75);
        pool.alias(0, Some(1));
        assert_eq!(pool.read_f32(0)[0], 0.75);
        // Writing the backing buffer does not disturb the redirect.
        pool.write_f32(0).fill(-1.0);
        assert_eq!(pool.read_f32(0)[0], 0.75);
        pool.alias(0, None);
        assert_eq!(pool.read_f32(0)[0], -1.0);
    }

    #[test]
    fn read_write_split_is_disjoint() {
        let mut pool = pool3();
        pool.write_f32(1).fill(0.5);
        {
            let (src, dst) = pool.read_write_f32(1, 0);
            for i in 0..MAX_FRAMES {
                dst[i] = src[i] * 2.0;
            }
        }
        assert_eq!(pool.read_f32(0)[7], 1.0);
    }

    #[test]
    fn read_write_resolves_redirect() {
        let mut pool = pool3();
        pool.write_f32(1).fill(0.25);
        pool.alias(0, Some(1));
        {
            // Reading port 0 resolves to port 1's buffer; writing port 0
            // still targets its own backing buffer.
            let (src, _dst) = pool.read_write_f32(0, 0);
            assert_eq!(src[0], 0.25);
        }
    }

    #[test]
    #[should_panic(expected = "reads the buffer it writes")]
    fn read_write_same_buffer_panics() {
        let mut pool = pool3();
        let _ = pool.read_write_f32(0, 0);
    }

    #[test]
    fn kernels_convert_between_element_types() {
        let mut pool = pool3();
        pool.write_f64(2).fill(3.0);
        let src = pool.backing(2).clone();
        let copy = select_kernel(false, ElementType::F32, Some(ElementType::F64), None);
        copy(pool.backing_mut(0), Some(&src), None, 0.5, 4);
        assert_eq!(pool.read_f32(0)[3], 1.5);
        let add = select_kernel(true, ElementType::F32, Some(ElementType::F64), None);
        add(pool.backing_mut(0), Some(&src), None, 0.5, 4);
        assert_eq!(pool.read_f32(0)[3], 3.0);
    }

    #[test]
    fn constant_kernel_fills_scale() {
        let mut pool = pool3();
        let fill = select_kernel(false, ElementType::F32, None, None);
        fill(pool.backing_mut(0), None, None, 440.0, MAX_FRAMES);
        assert_eq!(pool.read_f32(0)[0], 440.0);
        assert_eq!(pool.read_f32(0)[MAX_FRAMES - 1], 440.0);
    }

    #[test]
    fn kernel_with_control_multiplies() {
        let mut pool = pool3();
        pool.write_f32(1).fill(0.5);
        let src = pool.backing(1).clone();
        pool.write_f64(2).fill(2.0);
        let ctl = pool.backing(2).clone();
        let k = select_kernel(
            false,
            ElementType::F32,
            Some(ElementType::F32),
            Some(ElementType::F64),
        );
        k(pool.backing_mut(0), Some(&src), Some(&ctl), 3.0, 2);
        assert_eq!(pool.read_f32(0)[1], 3.0);
    }

    #[test]
    fn port_spec_lookup() {
        let spec = PortSpec::new(vec![
            PortDef::input("freq", ElementType::F32),
            PortDef::output("out", ElementType::F32),
        ]);
        assert_eq!(spec.by_name("freq").map(|(i, _)| i), Some(0));
        assert_eq!(spec.by_name("out").map(|(i, _)| i), Some(1));
        assert!(spec.by_name("nope").is_none());
        assert_eq!(spec.inputs().count(), 1);
        assert_eq!(spec.outputs().count(), 1);
    }
}
