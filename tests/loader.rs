//! End-to-end loading of synthetic module images.

mod common;

use common::{corelib, sig_field, sig_instance_void, sig_static_i4, tiny_body, ImageBuilder};
use emberclr::metadata::tables::TableId;
use emberclr::metadata::typesystem::ConstantValue;
use emberclr::metadata::module::AttrArg;
use emberclr::{Error, InterpModule, Token};

/// field: static (0x10), literal (0x40), has-default (0x8000)
const FIELD_STATIC: u16 = 0x10;
const FIELD_LITERAL: u16 = 0x40;
const FIELD_HAS_DEFAULT: u16 = 0x8000;
const METHOD_STATIC: u16 = 0x10;

#[test]
fn loads_a_minimal_module() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    builder.add_assembly("patch");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");

    builder.begin_type(0, "Patch", "Hello", Some((TableId::TypeRef, object_ref)));
    let body = tiny_body(&[0x16, 0x2A]); // ldc.i4.0; ret (wrong stack, never transformed)
    let body_rva = builder.add_method_body(&body);
    builder.add_method(body_rva, 0, METHOD_STATIC, "Noop", &sig_static_i4());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    assert_eq!(module.name(), "patch.dll");
    assert_eq!(module.assembly().unwrap().name, "patch");

    let hello = module.type_by_name("Patch", "Hello").unwrap();
    assert!(!hello.is_value_type());
    let parent = hello.parent_handle().unwrap();
    assert!(std::sync::Arc::ptr_eq(&parent, &lib.object));
    assert_eq!(hello.method_list().len(), 1);
    assert_eq!(hello.method_list()[0].name(), "Noop");
    assert!(hello.method_list()[0].is_interp());

    // The loaded assembly is resolvable through the universe.
    assert!(lib.universe.lookup_type("patch", "Patch", "Hello").is_ok());
}

#[test]
fn value_type_size_and_blittability() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let value_type_ref = builder.add_type_ref(mscorlib, "System", "ValueType");

    // One 4-byte and one 8-byte field: size 12 without explicit packing.
    builder.begin_type(
        0x0008, // sequential layout
        "Patch",
        "Pair",
        Some((TableId::TypeRef, value_type_ref)),
    );
    builder.add_field(0, "A", &sig_field(0x08)); // int32
    builder.add_field(0, "B", &sig_field(0x0A)); // int64

    builder.begin_type(
        0x0008,
        "Patch",
        "Named",
        Some((TableId::TypeRef, value_type_ref)),
    );
    builder.add_field(0, "Name", &sig_field(0x0E)); // string

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();

    let pair = module.type_by_name("Patch", "Pair").unwrap();
    assert!(pair.is_value_type());
    assert_eq!(pair.value_size().unwrap(), 12);
    assert_eq!(pair.blittable.get(), Some(&true));

    let named = module.type_by_name("Patch", "Named").unwrap();
    assert!(named.is_value_type());
    assert_eq!(named.blittable.get(), Some(&false));
}

#[test]
fn truncated_table_stream_is_bad_image() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Hello", Some((TableId::TypeRef, object_ref)));

    let mut bytes = builder.build();
    // Cut into the declared table-stream length; the loader must fail
    // cleanly, never read past the end.
    bytes.truncate(bytes.len() - 8);

    match InterpModule::load_from_bytes(&lib.universe, bytes) {
        Err(Error::BadImage { .. } | Error::OutOfBounds) => {}
        other => panic!("expected BadImage, got {other:?}"),
    }
}

#[test]
fn thread_static_detection_uses_first_match_baseline() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    let marker_ref = builder.add_type_ref(mscorlib, "System", "ThreadStaticAttribute");
    let obsolete_ref = builder.add_type_ref(mscorlib, "System", "ObsoleteAttribute");

    let marker_ctor = builder.add_member_ref(
        (TableId::TypeRef, marker_ref),
        ".ctor",
        &sig_instance_void(),
    );
    let obsolete_ctor =
        builder.add_member_ref((TableId::TypeRef, obsolete_ref), ".ctor", &[0x20, 0x01, 0x01, 0x0E]);

    builder.begin_type(0, "Patch", "Holder", Some((TableId::TypeRef, object_ref)));
    let counter = builder.add_field(FIELD_STATIC, "Counter", &sig_field(0x08));
    let other = builder.add_field(FIELD_STATIC, "Other", &sig_field(0x08));
    let plain = builder.add_field(FIELD_STATIC, "Plain", &sig_field(0x08));

    builder.add_custom_attribute(
        (TableId::Field, counter),
        (TableId::MemberRef, marker_ctor),
        &[0x01, 0x00, 0x00, 0x00],
    );
    builder.add_custom_attribute(
        (TableId::Field, other),
        (TableId::MemberRef, marker_ctor),
        &[0x01, 0x00, 0x00, 0x00],
    );
    // A different attribute constructor: not the baseline token.
    let mut obsolete_blob = vec![0x01, 0x00];
    obsolete_blob.push(2);
    obsolete_blob.extend_from_slice(b"no");
    obsolete_blob.extend_from_slice(&[0x00, 0x00]);
    builder.add_custom_attribute(
        (TableId::Field, plain),
        (TableId::MemberRef, obsolete_ctor),
        &obsolete_blob,
    );

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let holder = module.type_by_name("Patch", "Holder").unwrap();
    let fields = holder.field_list();
    assert!(fields[0].is_thread_static());
    assert!(fields[1].is_thread_static());
    assert!(!fields[2].is_thread_static());
}

#[test]
fn custom_attribute_arguments_decode_lazily() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    let obsolete_ref = builder.add_type_ref(mscorlib, "System", "ObsoleteAttribute");
    let ctor = builder.add_member_ref(
        (TableId::TypeRef, obsolete_ref),
        ".ctor",
        &[0x20, 0x01, 0x01, 0x0E], // instance void (string)
    );

    let type_row = builder.begin_type(0, "Patch", "Old", Some((TableId::TypeRef, object_ref)));

    // prolog, "gone", no named args
    let mut value = vec![0x01, 0x00];
    value.push(4);
    value.extend_from_slice(b"gone");
    value.extend_from_slice(&[0x00, 0x00]);
    builder.add_custom_attribute(
        (TableId::TypeDef, type_row),
        (TableId::MemberRef, ctor),
        &value,
    );

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let old = module.type_by_name("Patch", "Old").unwrap();

    let attrs = module.custom_attributes(old.token).unwrap();
    assert_eq!(attrs.len(), 1);
    assert_eq!(attrs[0].ctor.method.name(), ".ctor");
    assert_eq!(
        attrs[0].fixed_args,
        vec![AttrArg::String(Some("gone".to_string()))]
    );

    // Unattributed parents decode to nothing.
    assert!(module
        .custom_attributes(Token::new(0x0200_07FF))
        .unwrap()
        .is_empty());
}

#[test]
fn enum_projection_and_field_constants() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let enum_ref = builder.add_type_ref(mscorlib, "System", "Enum");

    builder.begin_type(0x0100, "Patch", "Color", Some((TableId::TypeRef, enum_ref)));
    builder.add_field(0x0606, "value__", &sig_field(0x08));
    let red = builder.add_field(
        FIELD_STATIC | FIELD_LITERAL | FIELD_HAS_DEFAULT,
        "Red",
        &sig_field(0x08),
    );
    builder.add_constant(0x08, (TableId::Field, red), &1i32.to_le_bytes());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let color = module.type_by_name("Patch", "Color").unwrap();
    assert!(color.is_enum());
    assert!(color.is_value_type());
    assert!(matches!(
        color.enum_element.get().unwrap().as_ref(),
        emberclr::Ty::I4
    ));

    let red_field = &color.field_list()[1];
    assert_eq!(red_field.default.get(), Some(&ConstantValue::I4(1)));
}

#[test]
fn explicit_layout_offsets_apply() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let value_type_ref = builder.add_type_ref(mscorlib, "System", "ValueType");

    let packed = builder.begin_type(
        0x0010, // explicit layout
        "Patch",
        "Packed",
        Some((TableId::TypeRef, value_type_ref)),
    );
    let low = builder.add_field(0, "Low", &sig_field(0x08));
    let high = builder.add_field(0, "High", &sig_field(0x08));
    builder.add_field_layout(0, low);
    builder.add_field_layout(4, high);
    builder.add_class_layout(0, 16, packed);

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let ty = module.type_by_name("Patch", "Packed").unwrap();
    // Explicit offsets carry the object-header bias.
    assert_eq!(ty.field_list()[0].instance_offset(), Some(16));
    assert_eq!(ty.field_list()[1].instance_offset(), Some(20));
    // The explicit class size wins over the field sum.
    assert_eq!(ty.value_size().unwrap(), 16);
}

#[test]
fn nested_types_resolve_through_enclosing_links() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");

    let outer = builder.begin_type(0, "Patch", "Outer", Some((TableId::TypeRef, object_ref)));
    let inner = builder.begin_type(
        0x0002, // nested public
        "",
        "Inner",
        Some((TableId::TypeRef, object_ref)),
    );
    builder.add_nested_class(inner, outer);

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let outer_ty = module.type_by_name("Patch", "Outer").unwrap();
    let nested = outer_ty.nested_types.get().unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].name(), "Inner");
    assert!(std::sync::Arc::ptr_eq(
        nested[0].declaring_type.get().unwrap(),
        &outer_ty
    ));
}
