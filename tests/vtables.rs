//! Hybrid vtable construction over loaded modules.

mod common;

use common::{corelib, sig_instance_void, ImageBuilder};
use emberclr::metadata::tables::TableId;
use emberclr::InterpModule;

const TYPE_INTERFACE: u32 = 0x20 | 0x80; // interface | abstract
const METHOD_VIRTUAL: u16 = 0x0040;
const METHOD_NEW_SLOT: u16 = 0x0100;
const METHOD_HIDE_BY_SIG: u16 = 0x0080;
const METHOD_ABSTRACT: u16 = 0x0400;

#[test]
fn child_vtable_extends_aot_parent() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");

    builder.begin_type(0, "Patch", "Child", Some((TableId::TypeRef, object_ref)));
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_NEW_SLOT | METHOD_HIDE_BY_SIG | METHOD_ABSTRACT,
        "Speak",
        &sig_instance_void(),
    );

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let child = module.type_by_name("Patch", "Child").unwrap();
    let table = module.vtable_of(&child.byval_ty()).unwrap();

    // Child length = parent length + its own new-slot count.
    assert_eq!(table.slots.len(), 4 + 1);
    assert_eq!(table.slots[4].method.name(), "Speak");
    assert_eq!(child.method_list()[0].slot.get().copied(), Some(4));

    // No two slots disagree: each slot's bound method is unique by
    // (name, signature) within its chain position.
    for (index, slot) in table.slots.iter().enumerate() {
        for other in &table.slots[index + 1..] {
            if std::sync::Arc::ptr_eq(&slot.method, &other.method) {
                continue;
            }
            assert!(
                slot.method.name() != other.method.name()
                    || slot.method.sig().unwrap().params.len()
                        != other.method.sig().unwrap().params.len(),
                "distinct methods {} sharing name+signature across slots",
                slot.method.name()
            );
        }
    }
}

#[test]
fn interpreted_interface_gets_contiguous_covered_range() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");

    let igreet = builder.begin_type(TYPE_INTERFACE, "Patch", "IGreet", None);
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_NEW_SLOT | METHOD_ABSTRACT | METHOD_HIDE_BY_SIG,
        "Greet",
        &sig_instance_void(),
    );

    let greeter = builder.begin_type(0, "Patch", "Greeter", Some((TableId::TypeRef, object_ref)));
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_NEW_SLOT | METHOD_HIDE_BY_SIG | METHOD_ABSTRACT,
        "Greet",
        &sig_instance_void(),
    );
    builder.add_interface_impl(greeter, (TableId::TypeDef, igreet));

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let greeter_ty = module.type_by_name("Patch", "Greeter").unwrap();
    let interface_ty = module
        .type_by_name("Patch", "IGreet")
        .unwrap()
        .byval_ty();

    let table = module.vtable_of(&greeter_ty.byval_ty()).unwrap();
    // 4 inherited + 1 interface range slot + 1 fresh slot.
    assert_eq!(table.slots.len(), 6);

    let range = table.interface_range(&interface_ty).unwrap();
    assert_eq!(range, 4);

    // The interface range is fully covered and agrees with the class's
    // own implementation.
    let implementation = &greeter_ty.method_list()[0];
    assert!(std::sync::Arc::ptr_eq(
        &table.slots[range as usize].method,
        implementation
    ));
    assert!(std::sync::Arc::ptr_eq(&table.slots[5].method, implementation));
}

#[test]
fn interpreted_chain_overrides_propagate_to_interface_slots() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");

    let iwork = builder.begin_type(TYPE_INTERFACE, "Patch", "IWork", None);
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_NEW_SLOT | METHOD_ABSTRACT | METHOD_HIDE_BY_SIG,
        "Work",
        &sig_instance_void(),
    );

    let worker = builder.begin_type(0, "Patch", "Worker", Some((TableId::TypeRef, object_ref)));
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_NEW_SLOT | METHOD_HIDE_BY_SIG | METHOD_ABSTRACT,
        "Work",
        &sig_instance_void(),
    );
    builder.add_interface_impl(worker, (TableId::TypeDef, iwork));

    // The derived type overrides Work without re-listing the interface:
    // the partial-override case.
    builder.begin_type(0, "Patch", "NightWorker", Some((TableId::TypeDef, worker)));
    builder.add_method(
        0,
        0,
        METHOD_VIRTUAL | METHOD_HIDE_BY_SIG | METHOD_ABSTRACT,
        "Work",
        &sig_instance_void(),
    );

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let night = module.type_by_name("Patch", "NightWorker").unwrap();
    let interface_ty = module.type_by_name("Patch", "IWork").unwrap().byval_ty();

    let table = module.vtable_of(&night.byval_ty()).unwrap();
    assert_eq!(table.slots.len(), 6);

    let implementation = &night.method_list()[0];
    let range = table.interface_range(&interface_ty).unwrap();
    // Both the inherited main slot and the interface-range slot follow
    // the override: contiguous-range and per-slot bookkeeping agree.
    assert!(std::sync::Arc::ptr_eq(
        &table.slots[range as usize].method,
        implementation
    ));
    let main_slot = implementation.slot.get().copied().unwrap();
    assert!(std::sync::Arc::ptr_eq(
        &table.slots[main_slot as usize].method,
        implementation
    ));
}

#[test]
fn vtables_are_memoized_per_type() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Plain", Some((TableId::TypeRef, object_ref)));

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let plain = module.type_by_name("Patch", "Plain").unwrap();

    let first = module.vtable_of(&plain.byval_ty()).unwrap();
    let second = module.vtable_of(&plain.byval_ty()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}
