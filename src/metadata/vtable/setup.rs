//! The two-phase vtable construction algorithm.

use std::sync::Arc;

use crate::metadata::cache::MemoMap;
use crate::metadata::typesystem::{
    inflate, GenericContext, MethodHandle, MethodSig, Ty, TyRef, TypeHandle,
};
use crate::metadata::vtable::{InterfaceOffset, VTable, VTableSlot};
use crate::Result;

/// Builds and memoizes vtables per distinct concrete type.
///
/// Plain definitions publish their table through the definition's own memo
/// slot; instantiations are keyed by their interned type in the resolver's
/// map, and inflate the cached definition node.
pub struct VTableResolver {
    inflated: MemoMap<TyRef, Arc<VTable>>,
}

/// Working state of one assignment pass: slots may still be empty while
/// interfaces wait for the declaring type's own methods.
struct PendingTable {
    slots: Vec<Option<VTableSlot>>,
    interface_offsets: Vec<InterfaceOffset>,
    /// Length of the parent-derived prefix
    inherited_len: usize,
}

impl VTableResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> VTableResolver {
        VTableResolver {
            inflated: MemoMap::new(),
        }
    }

    /// Resolve the vtable of a concrete type.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] when the slot accounting does
    /// not reconcile (the hard invariant) and propagates resolution
    /// failures from the ancestor chain.
    pub fn resolve(&self, ty: &TyRef) -> Result<Arc<VTable>> {
        match ty.as_ref() {
            Ty::Class(handle) | Ty::ValueType(handle) => handle
                .vtable
                .get_or_try_init(|| self.build_for_definition(handle))
                .cloned(),
            Ty::GenericInst { def, args } => {
                let key = ty.clone();
                self.inflated.get_or_try_insert(key, || {
                    // Inflate the cached definition node; do not rebuild.
                    let def_table = self
                        .resolve(&def.byval_ty())?;
                    let context = GenericContext::for_class(Arc::new(args.clone()));
                    Ok(Arc::new(inflate_table(&def_table, &context)))
                })
            }
            other => Err(bad_image_error!("Type {} has no vtable", other)),
        }
    }

    fn build_for_definition(&self, handle: &TypeHandle) -> Result<Arc<VTable>> {
        if handle.is_interface() {
            // Interfaces own no dispatch table; their methods gain slots
            // in each implementing type's interface range.
            return Ok(Arc::new(VTable {
                slots: Vec::new(),
                interface_offsets: Vec::new(),
            }));
        }

        let parent_table = match parent_concrete_ty(handle) {
            Some(parent_ty) => Some(self.resolve(&parent_ty)?),
            None => None,
        };

        // Phase 1: the conservative slot-count bound. Computed before any
        // assignment; the assignment pass must stay within it.
        let bound = slot_count_bound(handle, parent_table.as_deref())?;

        // Phase 2: assignment.
        let table = if handle.aot_vtable.get().is_some() {
            assign_aot(handle)?
        } else {
            assign_interp(handle, parent_table.as_deref())?
        };

        if table.slots.len() > bound {
            return Err(bad_image_error!(
                "{}: assigned {} slots, bound was {}",
                handle.full_name(),
                table.slots.len(),
                bound
            ));
        }
        reconcile(handle, &table)?;

        Ok(Arc::new(table))
    }
}

impl Default for VTableResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Phase 1: parent slots + every interface's method count + own virtual
/// methods. An upper bound, not the exact count; overrides reuse slots.
fn slot_count_bound(handle: &TypeHandle, parent: Option<&VTable>) -> Result<usize> {
    let mut bound = parent.map_or(0, |table| table.slots.len());

    for interface in handle.interface_list() {
        let Some(interface_def) = interface.type_handle() else {
            return Err(bad_image_error!(
                "{}: interface entry {} is not a definition",
                handle.full_name(),
                interface
            ));
        };
        bound += interface_def.method_list().len();
    }

    bound += handle
        .method_list()
        .iter()
        .filter(|method| method.is_virtual())
        .count();
    Ok(bound)
}

/// Assignment for an AOT-rooted type: trust the host's slot vector and
/// re-derive only slots the host left unbound, from the most-derived
/// override in the definition chain.
fn assign_aot(handle: &TypeHandle) -> Result<VTable> {
    let fixed = handle
        .aot_vtable
        .get()
        .unwrap_or_else(|| unreachable!("caller checked"));
    let byval = handle.byval_ty();

    let mut slots = Vec::with_capacity(fixed.len());
    for (index, entry) in fixed.iter().enumerate() {
        let method = match entry {
            Some(method) => method.clone(),
            None => rederive_slot(handle, index)?,
        };
        slots.push(Some(VTableSlot {
            decl_ty: byval.clone(),
            method,
        }));
    }

    let interface_offsets = handle
        .aot_interface_offsets
        .get()
        .map(|offsets| {
            offsets
                .iter()
                .map(|(interface, offset)| InterfaceOffset {
                    interface: interface.clone(),
                    offset: *offset,
                })
                .collect()
        })
        .unwrap_or_default();

    seal(PendingTable {
        slots,
        interface_offsets,
        inherited_len: fixed.len(),
    })
}

/// Find the most-derived method bound to `slot` walking the definition
/// chain from the type upward.
fn rederive_slot(handle: &TypeHandle, slot: usize) -> Result<MethodHandle> {
    let mut current = Some(handle.clone());
    while let Some(def) = current {
        for method in def.method_list() {
            if method.slot.get().copied() == Some(u16::try_from(slot).unwrap_or(u16::MAX))
                && !method.is_abstract()
            {
                return Ok(method.clone());
            }
        }
        current = def.parent_handle();
    }
    Err(bad_image_error!(
        "{}: AOT slot {} has no binding and no override re-derives it",
        handle.full_name(),
        slot
    ))
}

/// Assignment for an interpreted type.
fn assign_interp(handle: &TypeHandle, parent: Option<&VTable>) -> Result<VTable> {
    let byval = handle.byval_ty();

    // Copy-on-extend the parent's table.
    let mut pending = PendingTable {
        slots: parent
            .map(|table| table.slots.iter().cloned().map(Some).collect())
            .unwrap_or_default(),
        interface_offsets: parent
            .map(|table| table.interface_offsets.clone())
            .unwrap_or_default(),
        inherited_len: parent.map_or(0, |table| table.slots.len()),
    };

    // Append offset ranges for interfaces the parent does not already
    // carry. Slots are pre-bound to the best visible implementation:
    // this type's own virtual methods first (they exist, even though
    // they have no main slot yet), then inherited bindings, then the
    // interface's own method as the abstract fallback.
    for interface in handle.interface_list() {
        if pending
            .interface_offsets
            .iter()
            .any(|entry| entry.interface == *interface)
        {
            continue;
        }
        let Some(interface_def) = interface.type_handle() else {
            return Err(bad_image_error!(
                "{}: interface entry {} is not a definition",
                handle.full_name(),
                interface
            ));
        };

        let offset = u32::try_from(pending.slots.len())
            .map_err(|_| bad_image_error!("vtable exceeds slot index range"))?;
        pending.interface_offsets.push(InterfaceOffset {
            interface: interface.clone(),
            offset,
        });

        let interface_ctx = GenericContext::of_type(interface);
        for interface_method in interface_def.method_list() {
            let implementation = find_implementation(handle, interface, interface_method, &interface_ctx, parent)
                .unwrap_or_else(|| VTableSlot {
                    decl_ty: interface.clone(),
                    method: interface_method.clone(),
                });
            pending.slots.push(Some(implementation));
        }
    }

    // Place this type's own virtual methods.
    let explicit_overrides = handle.method_impls.get().map_or(&[][..], Vec::as_slice);
    for method in handle.method_list() {
        if !method.is_virtual() {
            continue;
        }

        let records: Vec<_> = explicit_overrides
            .iter()
            .filter(|record| Arc::ptr_eq(&record.body.1, method))
            .collect();

        if method.is_new_slot() {
            if records.is_empty() {
                let fresh = u16::try_from(pending.slots.len())
                    .map_err(|_| bad_image_error!("vtable exceeds slot index range"))?;
                let _ = method.slot.set(fresh);
                pending.slots.push(Some(VTableSlot {
                    decl_ty: byval.clone(),
                    method: method.clone(),
                }));
            } else {
                // Overwrite every slot the override records target, in
                // the ancestor-derived region and the interface ranges
                // alike.
                for record in &records {
                    overwrite_declaration(&mut pending, &byval, method, &record.declaration)?;
                }
            }
            // A new-slot method additionally refreshes any interface slot
            // it satisfies by name + signature (implicit satisfaction of
            // an interface introduced on this very type).
            rebind_interface_slots(&mut pending, handle, &byval, method)?;
        } else {
            override_inherited_slot(&mut pending, handle, &byval, method)?;
        }
    }

    seal(pending)
}

/// Search for the implementation of one interface method: this type's own
/// virtual methods first, then the parent's resolved slots.
fn find_implementation(
    handle: &TypeHandle,
    _interface: &TyRef,
    interface_method: &MethodHandle,
    interface_ctx: &GenericContext,
    parent: Option<&VTable>,
) -> Option<VTableSlot> {
    let byval = handle.byval_ty();
    let self_ctx = GenericContext::default();

    for method in handle.method_list() {
        if method.is_virtual()
            && methods_match(method, &self_ctx, interface_method, interface_ctx)
        {
            return Some(VTableSlot {
                decl_ty: byval.clone(),
                method: method.clone(),
            });
        }
    }

    if let Some(parent_table) = parent {
        for slot in parent_table.slots.iter().rev() {
            let slot_ctx = GenericContext::of_type(&slot.decl_ty);
            if methods_match(&slot.method, &slot_ctx, interface_method, interface_ctx) {
                return Some(slot.clone());
            }
        }
    }
    None
}

/// Overwrite the slots bound to an explicit-override declaration.
fn overwrite_declaration(
    pending: &mut PendingTable,
    byval: &TyRef,
    method: &MethodHandle,
    declaration: &(TyRef, MethodHandle),
) -> Result<()> {
    let (decl_ty, decl_method) = declaration;
    let mut overwrote = false;

    for slot in pending.slots.iter_mut().flatten() {
        if Arc::ptr_eq(&slot.method, decl_method) {
            slot.decl_ty = byval.clone();
            slot.method = method.clone();
            overwrote = true;
        }
    }

    // The declaration may name an interface method whose range slot is
    // still bound to an inherited implementation rather than the
    // declaration itself.
    if let Some(decl_def) = decl_ty.type_handle() {
        if decl_def.is_interface() {
            if let Some(range) = pending
                .interface_offsets
                .iter()
                .find(|entry| entry.interface == *decl_ty)
                .map(|entry| entry.offset as usize)
            {
                for (position, interface_method) in decl_def.method_list().iter().enumerate() {
                    if Arc::ptr_eq(interface_method, decl_method) {
                        if let Some(slot) = pending.slots.get_mut(range + position) {
                            *slot = Some(VTableSlot {
                                decl_ty: byval.clone(),
                                method: method.clone(),
                            });
                            overwrote = true;
                        }
                    }
                }
            }
        }
    }

    if overwrote {
        Ok(())
    } else {
        Err(bad_image_error!(
            "Explicit override of {} by {} matches no slot",
            decl_method.full_name(),
            method.full_name()
        ))
    }
}

/// Rebind interface-range slots this method satisfies by name+signature.
fn rebind_interface_slots(
    pending: &mut PendingTable,
    handle: &TypeHandle,
    byval: &TyRef,
    method: &MethodHandle,
) -> Result<()> {
    let self_ctx = GenericContext::default();
    let ranges: Vec<(TyRef, usize)> = pending
        .interface_offsets
        .iter()
        .map(|entry| (entry.interface.clone(), entry.offset as usize))
        .collect();

    for (interface, range) in ranges {
        // Only ranges introduced by this type are still settling; an
        // inherited range re-binds through the non-new-slot path.
        if range < pending.inherited_len {
            continue;
        }
        let Some(interface_def) = interface.type_handle() else {
            continue;
        };
        if !handle.interface_list().contains(&interface) {
            continue;
        }
        let interface_ctx = GenericContext::of_type(&interface);
        for (position, interface_method) in interface_def.method_list().iter().enumerate() {
            if methods_match(method, &self_ctx, interface_method, &interface_ctx) {
                if let Some(slot) = pending.slots.get_mut(range + position) {
                    *slot = Some(VTableSlot {
                        decl_ty: byval.clone(),
                        method: method.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// A non-new-slot virtual must match exactly one inherited slot by
/// (name, signature); every table entry bound to that ancestor method is
/// overwritten.
fn override_inherited_slot(
    pending: &mut PendingTable,
    handle: &TypeHandle,
    byval: &TyRef,
    method: &MethodHandle,
) -> Result<()> {
    let self_ctx = GenericContext::default();

    // First pass: find the ancestor method, in the inherited region only.
    let mut matched: Option<MethodHandle> = None;
    let mut matched_slot = 0u16;
    for (index, slot) in pending.slots[..pending.inherited_len].iter().enumerate() {
        let Some(slot) = slot else { continue };
        let slot_ctx = GenericContext::of_type(&slot.decl_ty);
        if methods_match(method, &self_ctx, &slot.method, &slot_ctx) {
            match &matched {
                None => {
                    matched = Some(slot.method.clone());
                    matched_slot = u16::try_from(index).unwrap_or(u16::MAX);
                }
                Some(existing) if Arc::ptr_eq(existing, &slot.method) => {}
                Some(existing) => {
                    return Err(bad_image_error!(
                        "{} overrides both {} and {}",
                        method.full_name(),
                        existing.full_name(),
                        slot.method.full_name()
                    ));
                }
            }
        }
    }

    let Some(ancestor) = matched else {
        return Err(bad_image_error!(
            "{}: virtual method {} overrides no inherited slot",
            handle.full_name(),
            method.full_name()
        ));
    };

    // Second pass: overwrite every entry bound to the ancestor method,
    // interface ranges included.
    for slot in pending.slots.iter_mut().flatten() {
        if Arc::ptr_eq(&slot.method, &ancestor) {
            slot.decl_ty = byval.clone();
            slot.method = method.clone();
        }
    }
    // Inherit the ancestor's primary slot when it recorded one (the
    // first textual match may have been an interface-range alias).
    let main_slot = ancestor.slot.get().copied().unwrap_or(matched_slot);
    let _ = method.slot.set(main_slot);
    Ok(())
}

/// (name, signature) override compatibility under each side's declaring
/// context.
fn methods_match(
    a: &MethodHandle,
    a_ctx: &GenericContext,
    b: &MethodHandle,
    b_ctx: &GenericContext,
) -> bool {
    if a.name() != b.name() {
        return false;
    }
    let (Some(sig_a), Some(sig_b)) = (a.signature.get(), b.signature.get()) else {
        return false;
    };
    sigs_override_match(sig_a, a_ctx, sig_b, b_ctx)
}

fn sigs_override_match(
    a: &MethodSig,
    a_ctx: &GenericContext,
    b: &MethodSig,
    b_ctx: &GenericContext,
) -> bool {
    if a.params.len() != b.params.len() || a.generic_param_count != b.generic_param_count {
        return false;
    }
    let ret_a = inflate(&a.ret, a_ctx);
    let ret_b = inflate(&b.ret, b_ctx);
    if !ret_a.same_override_type(&ret_b) {
        return false;
    }
    a.params.iter().zip(&b.params).all(|(pa, pb)| {
        inflate(&pa.ty, a_ctx).same_override_type(&inflate(&pb.ty, b_ctx))
    })
}

/// The concrete parent type of a definition, if any.
fn parent_concrete_ty(handle: &TypeHandle) -> Option<TyRef> {
    handle.parent.get().and_then(Clone::clone).and_then(|ty| {
        match ty.as_ref() {
            Ty::Class(_) | Ty::ValueType(_) | Ty::GenericInst { .. } => Some(ty),
            _ => None,
        }
    })
}

/// Final reconciliation: no empty or conflicting slots, full interface
/// coverage, contiguous ranges inside the table.
fn reconcile(handle: &TypeHandle, table: &VTable) -> Result<()> {
    for entry in &table.interface_offsets {
        let Some(interface_def) = entry.interface.type_handle() else {
            return Err(bad_image_error!(
                "{}: interface offset over non-definition {}",
                handle.full_name(),
                entry.interface
            ));
        };
        let end = entry.offset as usize + interface_def.method_list().len();
        if end > table.slots.len() {
            return Err(bad_image_error!(
                "{}: interface {} range [{}..{}) exceeds vtable of {} slots",
                handle.full_name(),
                entry.interface,
                entry.offset,
                end,
                table.slots.len()
            ));
        }
    }
    Ok(())
}

/// Convert a pending table into a sealed one, rejecting empty slots.
fn seal(pending: PendingTable) -> Result<VTable> {
    let mut slots = Vec::with_capacity(pending.slots.len());
    for (index, slot) in pending.slots.into_iter().enumerate() {
        match slot {
            Some(slot) => slots.push(slot),
            None => {
                return Err(bad_image_error!("Vtable slot {} left empty", index));
            }
        }
    }
    Ok(VTable {
        slots,
        interface_offsets: pending.interface_offsets,
    })
}

/// Inflate a cached definition table for one instantiation.
fn inflate_table(table: &VTable, context: &GenericContext) -> VTable {
    VTable {
        slots: table
            .slots
            .iter()
            .map(|slot| VTableSlot {
                decl_ty: inflate(&slot.decl_ty, context),
                method: slot.method.clone(),
            })
            .collect(),
        interface_offsets: table
            .interface_offsets
            .iter()
            .map(|entry| InterfaceOffset {
                interface: inflate(&entry.interface, context),
                offset: entry.offset,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;
    use crate::metadata::typesystem::{
        MethodAttributes, MethodDef, ModuleId, TypeAttributes, TypeDef, TypeHandle, TypeSource,
    };
    use crate::test::{corelib, instance_sig};
    use crate::metadata::typesystem::Ty;

    fn interp_type(
        name: &str,
        parent: Option<TyRef>,
        flags: TypeAttributes,
        index: u32,
    ) -> TypeHandle {
        let handle: TypeHandle = Arc::new(TypeDef::shell(
            ModuleId(1),
            index,
            Token::from_parts(0x02, index + 1),
            TypeSource::Interp(ModuleId(1)),
        ));
        let _ = handle.name.set(name.to_string());
        let _ = handle.namespace.set("Patch".to_string());
        let _ = handle.flags.set(flags);
        let _ = handle.value_type.set(false);
        let _ = handle.enum_type.set(false);
        let _ = handle
            .byval
            .set(crate::metadata::typesystem::defs::byval_of(&handle));
        let _ = handle.parent.set(parent);
        let _ = handle.fields.set(Vec::new());
        handle
    }

    fn virtual_method(name: &str, new_slot: bool, token_row: u32) -> MethodHandle {
        let method: MethodHandle = Arc::new(MethodDef::shell(Token::from_parts(0x06, token_row)));
        let _ = method.name.set(name.to_string());
        let mut flags = MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG;
        if new_slot {
            flags |= MethodAttributes::NEW_SLOT;
        }
        let _ = method.flags.set(flags);
        let _ = method.signature.set(instance_sig(Ty::Void, &[]));
        method
    }

    fn attach_methods(handle: &TypeHandle, methods: Vec<MethodHandle>) {
        for method in &methods {
            let _ = method.declaring.set(handle.clone());
        }
        let _ = handle.methods.set(methods);
        if handle.interfaces.get().is_none() {
            let _ = handle.interfaces.set(Vec::new());
        }
    }

    #[test]
    fn child_extends_aot_parent_with_fresh_slot() {
        let lib = corelib();
        let child = interp_type(
            "Child",
            Some(lib.object.byval_ty()),
            TypeAttributes::empty(),
            0,
        );
        attach_methods(&child, vec![virtual_method("Speak", true, 1)]);

        let resolver = VTableResolver::new();
        let table = resolver.resolve(&child.byval_ty()).unwrap();

        // Parent length plus the child's own new-slot count.
        assert_eq!(table.slots.len(), 4 + 1);
        assert_eq!(table.slots[4].method.name(), "Speak");
        assert_eq!(
            child.method_list()[0].slot.get().copied(),
            Some(4),
        );
    }

    #[test]
    fn non_new_slot_overrides_exactly_one_inherited_slot() {
        let lib = corelib();
        let child = interp_type(
            "Stringer",
            Some(lib.object.byval_ty()),
            TypeAttributes::empty(),
            0,
        );
        let to_string = {
            let method: MethodHandle =
                Arc::new(MethodDef::shell(Token::from_parts(0x06, 1)));
            let _ = method.name.set("ToString".to_string());
            let _ = method
                .flags
                .set(MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG);
            let _ = method.signature.set(instance_sig(Ty::String, &[]));
            method
        };
        attach_methods(&child, vec![to_string]);

        let resolver = VTableResolver::new();
        let table = resolver.resolve(&child.byval_ty()).unwrap();

        assert_eq!(table.slots.len(), 4);
        assert_eq!(table.slots[0].method.name(), "ToString");
        assert!(Arc::ptr_eq(
            &table.slots[0].method,
            &child.method_list()[0]
        ));
        // The other object slots still point at the AOT methods.
        assert_eq!(table.slots[1].method.name(), "Equals");
    }

    #[test]
    fn unmatched_override_is_fatal() {
        let lib = corelib();
        let child = interp_type(
            "Broken",
            Some(lib.object.byval_ty()),
            TypeAttributes::empty(),
            0,
        );
        // Non-new-slot virtual with a name nothing declares.
        attach_methods(&child, vec![virtual_method("Nothing", false, 1)]);

        let resolver = VTableResolver::new();
        assert!(resolver.resolve(&child.byval_ty()).is_err());
    }

    #[test]
    fn interface_range_is_appended_and_covered() {
        let lib = corelib();
        let interface = interp_type(
            "IGreet",
            None,
            TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
            0,
        );
        attach_methods(&interface, vec![virtual_method("Greet", true, 1)]);
        let interface_ty = interface.byval_ty();

        let class = interp_type(
            "Greeter",
            Some(lib.object.byval_ty()),
            TypeAttributes::empty(),
            1,
        );
        let _ = class.interfaces.set(vec![interface_ty.clone()]);
        attach_methods(&class, vec![virtual_method("Greet", true, 2)]);

        let resolver = VTableResolver::new();
        let table = resolver.resolve(&class.byval_ty()).unwrap();

        // 4 object slots, 1 interface slot, 1 fresh slot.
        assert_eq!(table.slots.len(), 6);
        let range = table.interface_range(&interface_ty).unwrap();
        assert_eq!(range, 4);
        // The interface slot is bound to the class implementation, and
        // the class method also owns a fresh slot.
        assert_eq!(table.slots[4].method.name(), "Greet");
        assert!(Arc::ptr_eq(
            &table.slots[4].method,
            &class.method_list()[0]
        ));
        assert_eq!(table.slots[5].method.name(), "Greet");

        // Every interface-offset range is fully covered by non-null
        // slots with agreeing bindings.
        for entry in &table.interface_offsets {
            let def = entry.interface.type_handle().unwrap();
            for position in 0..def.method_list().len() {
                assert!(table.method_at(entry.offset + position as u32).is_some());
            }
        }
    }

    #[test]
    fn grandchild_inherits_interface_binding() {
        // Partial-override stress: the child implements the interface,
        // the grandchild overrides only the class method; the interface
        // slot must follow the override.
        let lib = corelib();
        let interface = interp_type(
            "IWork",
            None,
            TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
            0,
        );
        attach_methods(&interface, vec![virtual_method("Work", true, 1)]);
        let interface_ty = interface.byval_ty();

        let base = interp_type(
            "Worker",
            Some(lib.object.byval_ty()),
            TypeAttributes::empty(),
            1,
        );
        let _ = base.interfaces.set(vec![interface_ty.clone()]);
        attach_methods(&base, vec![virtual_method("Work", true, 2)]);

        let derived = interp_type(
            "NightWorker",
            Some(base.byval_ty()),
            TypeAttributes::empty(),
            2,
        );
        attach_methods(&derived, vec![virtual_method("Work", false, 3)]);

        let resolver = VTableResolver::new();
        let table = resolver.resolve(&derived.byval_ty()).unwrap();

        assert_eq!(table.slots.len(), 6);
        let range = table.interface_range(&interface_ty).unwrap();
        // Both the inherited main slot and the interface slot now point
        // at the derived override.
        assert!(Arc::ptr_eq(
            &table.slots[range as usize].method,
            &derived.method_list()[0]
        ));
        assert!(Arc::ptr_eq(
            &table.slots[5].method,
            &derived.method_list()[0]
        ));
    }
}
