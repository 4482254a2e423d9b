//! Shared fixtures for unit tests: a miniature AOT corelib.

use std::sync::Arc;

use crate::metadata::typesystem::{
    AotMethodSpec, AotTypeSpec, MethodAttributes, MethodSig, Ty, TypeAttributes, TypeHandle,
    TypeUniverse, UniverseBuilder,
};

/// Handles of the well-known corelib types the tests wire against.
pub struct Corelib {
    /// The built universe
    pub universe: Arc<TypeUniverse>,
    /// `System.Object` with its four standard virtual slots
    pub object: TypeHandle,
    /// `System.ValueType`
    pub value_type: TypeHandle,
    /// `System.Enum`
    pub enum_type: TypeHandle,
    /// `System.String`
    pub string: TypeHandle,
    /// `System.Type`
    pub systemtype: TypeHandle,
}

/// A `this`-taking signature returning `ret` over `params`.
pub fn instance_sig(ret: Ty, params: &[Ty]) -> MethodSig {
    MethodSig {
        has_this: true,
        call_conv: 0x20,
        generic_param_count: 0,
        ret: ret.shared(),
        params: params
            .iter()
            .map(|param| crate::metadata::typesystem::ParamSig {
                ty: param.clone().shared(),
                attrs: crate::metadata::typesystem::ParamAttributes::empty(),
                name: None,
            })
            .collect(),
    }
}

/// Build the miniature corelib: `System.Object` (four virtual slots),
/// `System.ValueType`, `System.Enum`, `System.String`, `System.Type`,
/// `System.Attribute` with `ThreadStaticAttribute` and the interop
/// `In`/`Out` marker attributes.
pub fn corelib() -> Corelib {
    let builder: UniverseBuilder = TypeUniverse::builder().assembly("mscorlib");

    let virt = MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;
    let object = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                slot_count: 4,
                methods: vec![
                    AotMethodSpec {
                        name: "ToString".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::String, &[]),
                        slot: Some(0),
                    },
                    AotMethodSpec {
                        name: "Equals".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::Bool, &[Ty::Object]),
                        slot: Some(1),
                    },
                    AotMethodSpec {
                        name: "GetHashCode".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::I4, &[]),
                        slot: Some(2),
                    },
                    AotMethodSpec {
                        name: "Finalize".to_string(),
                        flags: virt,
                        sig: instance_sig(Ty::Void, &[]),
                        slot: Some(3),
                    },
                ],
                ..AotTypeSpec::class("System", "Object")
            },
        )
        .unwrap();
    let object_ty = object.byval_ty();

    let value_type = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "ValueType")
            },
        )
        .unwrap();

    let enum_type = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(value_type.byval_ty()),
                ..AotTypeSpec::class("System", "Enum")
            },
        )
        .unwrap();

    let string = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::SEALED,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "String")
            },
        )
        .unwrap();

    let systemtype = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "Type")
            },
        )
        .unwrap();

    let attribute = builder
        .add_type(
            "mscorlib",
            AotTypeSpec {
                flags: TypeAttributes::ABSTRACT,
                parent: Some(object_ty.clone()),
                ..AotTypeSpec::class("System", "Attribute")
            },
        )
        .unwrap();

    for (namespace, name) in [
        ("System", "ThreadStaticAttribute"),
        ("System.Runtime.InteropServices", "InAttribute"),
        ("System.Runtime.InteropServices", "OutAttribute"),
    ] {
        builder
            .add_type(
                "mscorlib",
                AotTypeSpec {
                    flags: TypeAttributes::SEALED,
                    parent: Some(attribute.byval_ty()),
                    methods: vec![AotMethodSpec {
                        name: ".ctor".to_string(),
                        flags: MethodAttributes::SPECIAL_NAME,
                        sig: instance_sig(Ty::Void, &[]),
                        slot: None,
                    }],
                    ..AotTypeSpec::class(namespace, name)
                },
            )
            .unwrap();
    }

    Corelib {
        universe: builder.finish(),
        object,
        value_type,
        enum_type,
        string,
        systemtype,
    }
}
