//! Virtual-dispatch and interface-offset table construction across hybrid
//! AOT + interpreted inheritance chains.
//!
//! For every concrete (possibly inflated) type the resolver produces an
//! ordered slot vector plus an interface-to-offset-range map. Chains are
//! built bottom-up and memoized per distinct concrete type; instantiating
//! a generic type inflates the cached definition node instead of
//! rebuilding it.
//!
//! The algorithm is deliberately two explicit phases, in this order:
//!
//! 1. **Slot-count pass**: a conservative upper bound (parent slots +
//!    interface method counts + own virtual methods), computed before any
//!    assignment so the assignment pass can verify it never grows past
//!    the bound.
//! 2. **Assignment pass**: AOT-rooted types trust the host's precomputed
//!    slot vector and only re-derive slots the host left unbound;
//!    interpreted types copy-on-extend the parent, append offset ranges
//!    for newly satisfied interfaces, then place their own virtual
//!    methods (fresh slot, explicit-override target, or
//!    exactly-one-inherited-slot override).
//!
//! After assignment the table must reconcile exactly: no empty slots, no
//! slot bound to two methods that disagree on name + signature, every
//! interface range fully covered. Failures are fatal; there is no partial
//! vtable.

mod setup;

use crate::metadata::typesystem::{MethodHandle, TyRef};

pub use setup::VTableResolver;

/// One virtual-dispatch slot: the implementing method and the concrete
/// type it was resolved against.
#[derive(Clone)]
pub struct VTableSlot {
    /// The type providing the implementation (inflated for instantiated
    /// ancestors)
    pub decl_ty: TyRef,
    /// The implementing method
    pub method: MethodHandle,
}

/// One interface's slot range within a vtable.
#[derive(Clone)]
pub struct InterfaceOffset {
    /// The (possibly inflated) interface type
    pub interface: TyRef,
    /// First slot of the interface's contiguous range
    pub offset: u32,
}

/// A resolved vtable: ordered slots plus interface offset ranges.
pub struct VTable {
    /// Dispatch slots in slot order
    pub slots: Vec<VTableSlot>,
    /// Interface ranges, in discovery order (parents first)
    pub interface_offsets: Vec<InterfaceOffset>,
}

impl VTable {
    /// The slot range covered by `interface`, if implemented.
    #[must_use]
    pub fn interface_range(&self, interface: &TyRef) -> Option<u32> {
        self.interface_offsets
            .iter()
            .find(|entry| entry.interface == *interface)
            .map(|entry| entry.offset)
    }

    /// The method bound to `slot`.
    #[must_use]
    pub fn method_at(&self, slot: u32) -> Option<&MethodHandle> {
        self.slots.get(slot as usize).map(|entry| &entry.method)
    }
}
