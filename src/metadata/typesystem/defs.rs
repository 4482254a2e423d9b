//! Type, method and field definition handles.
//!
//! Definitions are built in stages: the projection passes create shells
//! first (so signatures decoded in later passes can already reference
//! them) and publish each attribute group exactly once. All set-once state
//! sits behind [`std::sync::OnceLock`]; the two late-bound artifacts
//! (vtable, method IR) use the memo primitive because they are computed on
//! demand, possibly concurrently, after loading.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;

use crate::metadata::cache::MemoSlot;
use crate::metadata::method::MethodBody;
use crate::metadata::token::Token;
use crate::metadata::typesystem::{GenericContainerRef, ModuleId, Ty, TyRef};
use crate::metadata::vtable::VTable;
use crate::Result;

/// Shared handle to a type definition.
pub type TypeHandle = Arc<TypeDef>;
/// Shared handle to a method definition.
pub type MethodHandle = Arc<MethodDef>;
/// Shared handle to a field definition.
pub type FieldHandle = Arc<FieldDef>;

/// Byte size of the object header preceding instance fields.
pub const OBJECT_HEADER_SIZE: u32 = 16;

/// Sentinel: field offset not assigned.
pub const FIELD_OFFSET_UNSET: u32 = u32::MAX;
/// Sentinel: field promoted to thread-local storage.
pub const FIELD_OFFSET_THREAD_STATIC: u32 = u32::MAX - 1;

bitflags! {
    /// Type attribute flags (the subset the core consumes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeAttributes: u32 {
        /// Layout is sequential
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Layout is explicit (field offsets from the layout table)
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// The type is an interface
        const INTERFACE = 0x0000_0020;
        /// The type is abstract
        const ABSTRACT = 0x0000_0080;
        /// The type is sealed
        const SEALED = 0x0000_0100;
        /// The type has security associated with it
        const HAS_SECURITY = 0x0004_0000;
        /// Class initializer runs lazily
        const BEFORE_FIELD_INIT = 0x0010_0000;
    }
}

bitflags! {
    /// Method attribute flags (the subset the core consumes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAttributes: u16 {
        /// Method is static
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method participates in virtual dispatch
        const VIRTUAL = 0x0040;
        /// Method hides by name + signature
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a fresh vtable slot
        const NEW_SLOT = 0x0100;
        /// Method is abstract (no body, slot bound by derived types)
        const ABSTRACT = 0x0400;
        /// Special name (accessors, operators, `.ctor`)
        const SPECIAL_NAME = 0x0800;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
    }
}

bitflags! {
    /// Method implementation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodImplAttributes: u16 {
        /// Implementation is provided by the runtime
        const INTERNAL_CALL = 0x1000;
        /// Method body is native code
        const NATIVE = 0x0001;
        /// Method may not be inlined (informational here)
        const NO_INLINING = 0x0008;
    }
}

bitflags! {
    /// Field attribute flags (the subset the core consumes).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldAttributes: u16 {
        /// Field is static
        const STATIC = 0x0010;
        /// Field is init-only
        const INIT_ONLY = 0x0020;
        /// Field is a compile-time literal
        const LITERAL = 0x0040;
        /// Field has a default value record
        const HAS_DEFAULT = 0x8000;
        /// Field has mapped initial data
        const HAS_FIELD_RVA = 0x0100;
    }
}

bitflags! {
    /// Parameter attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParamAttributes: u16 {
        /// Parameter is an input (`[In]` or required `InAttribute`
        /// modifier)
        const IN = 0x0001;
        /// Parameter is an output
        const OUT = 0x0002;
        /// Parameter is optional
        const OPTIONAL = 0x0010;
        /// Parameter has a default value record
        const HAS_DEFAULT = 0x1000;
    }
}

/// Where a type's code and layout come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSource {
    /// Compiled ahead of time into the host binary; layout and vtable are
    /// precomputed and trusted
    Aot,
    /// Loaded from an interpreter module at runtime
    Interp(ModuleId),
}

/// A decoded compile-time constant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// Boolean constant
    Bool(bool),
    /// Character constant
    Char(u16),
    /// 8-bit signed constant
    I1(i8),
    /// 8-bit unsigned constant
    U1(u8),
    /// 16-bit signed constant
    I2(i16),
    /// 16-bit unsigned constant
    U2(u16),
    /// 32-bit signed constant
    I4(i32),
    /// 32-bit unsigned constant
    U4(u32),
    /// 64-bit signed constant
    I8(i64),
    /// 64-bit unsigned constant
    U8(u64),
    /// 32-bit float constant
    R4(f32),
    /// 64-bit float constant
    R8(f64),
    /// String constant (None encodes the null string)
    String(Option<String>),
    /// Null reference constant
    Null,
}

/// One parameter of a resolved method signature.
#[derive(Debug, Clone)]
pub struct ParamSig {
    /// Parameter type
    pub ty: TyRef,
    /// Attributes merged from the definition row and custom modifiers
    pub attrs: ParamAttributes,
    /// Parameter name, when the definition row carries one
    pub name: Option<String>,
}

/// A resolved method signature.
#[derive(Debug, Clone)]
pub struct MethodSig {
    /// `this` is passed
    pub has_this: bool,
    /// Raw calling-convention byte
    pub call_conv: u8,
    /// Declared generic parameter count (0 for non-generic methods)
    pub generic_param_count: u32,
    /// Return type
    pub ret: TyRef,
    /// Parameters in declaration order, excluding `this`
    pub params: Vec<ParamSig>,
}

/// A type definition shared between the AOT universe and interpreter
/// modules.
pub struct TypeDef {
    /// Defining module
    pub module: ModuleId,
    /// 0-based definition index within the module
    pub index: u32,
    /// Defining token (TypeDef table row for interpreted types)
    pub token: Token,
    /// Where this type's code and layout come from
    pub source: TypeSource,

    /// Simple name
    pub name: OnceLock<String>,
    /// Namespace ("" for the global namespace)
    pub namespace: OnceLock<String>,
    /// Attribute flags
    pub flags: OnceLock<TypeAttributes>,
    /// Whether this is a value type (known before the parent is resolved)
    pub value_type: OnceLock<bool>,
    /// Whether this is an enum
    pub enum_type: OnceLock<bool>,
    /// The self type (`Ty::Class`/`Ty::ValueType` over this handle)
    pub byval: OnceLock<TyRef>,
    /// Resolved base type (None for `System.Object` and interfaces)
    pub parent: OnceLock<Option<TyRef>>,
    /// Enum element type (first instance field's type)
    pub enum_element: OnceLock<TyRef>,

    /// Methods in definition order
    pub methods: OnceLock<Vec<MethodHandle>>,
    /// Fields in definition order
    pub fields: OnceLock<Vec<FieldHandle>>,
    /// Directly implemented interfaces, in table order
    pub interfaces: OnceLock<Vec<TyRef>>,
    /// Explicit override records
    pub method_impls: OnceLock<Vec<MethodImplRecord>>,
    /// Nested type definitions
    pub nested_types: OnceLock<Vec<TypeHandle>>,
    /// Enclosing type for nested definitions
    pub declaring_type: OnceLock<TypeHandle>,
    /// Generic parameter container, if generic
    pub generic_container: OnceLock<GenericContainerRef>,
    /// Explicit layout record `(packing, class size)`
    pub class_layout: OnceLock<(u16, u32)>,
    /// Whether every instance field is blittable
    pub blittable: OnceLock<bool>,

    /// Precomputed vtable slots for AOT types (None = unbound slot left
    /// for the resolver to re-derive)
    pub aot_vtable: OnceLock<Vec<Option<MethodHandle>>>,
    /// Precomputed interface offset ranges for AOT types
    pub aot_interface_offsets: OnceLock<Vec<(TyRef, u32)>>,
    /// Declared AOT value size (value types)
    pub aot_value_size: OnceLock<u32>,

    /// Late-bound vtable artifact
    pub vtable: MemoSlot<Arc<VTable>>,
    /// Memoized value size
    value_size: MemoSlot<u32>,
}

/// An explicit override record: `body` implements `declaration`.
#[derive(Clone)]
pub struct MethodImplRecord {
    /// The implementing method and the type it was resolved against
    pub body: (TyRef, MethodHandle),
    /// The overridden declaration and the type it was resolved against
    pub declaration: (TyRef, MethodHandle),
}

impl TypeDef {
    /// Create an unpopulated shell; the projection passes (or the AOT
    /// builder) fill the rest.
    #[must_use]
    pub fn shell(module: ModuleId, index: u32, token: Token, source: TypeSource) -> TypeDef {
        TypeDef {
            module,
            index,
            token,
            source,
            name: OnceLock::new(),
            namespace: OnceLock::new(),
            flags: OnceLock::new(),
            value_type: OnceLock::new(),
            enum_type: OnceLock::new(),
            byval: OnceLock::new(),
            parent: OnceLock::new(),
            enum_element: OnceLock::new(),
            methods: OnceLock::new(),
            fields: OnceLock::new(),
            interfaces: OnceLock::new(),
            method_impls: OnceLock::new(),
            nested_types: OnceLock::new(),
            declaring_type: OnceLock::new(),
            generic_container: OnceLock::new(),
            class_layout: OnceLock::new(),
            blittable: OnceLock::new(),
            aot_vtable: OnceLock::new(),
            aot_interface_offsets: OnceLock::new(),
            aot_value_size: OnceLock::new(),
            vtable: MemoSlot::new(),
            value_size: MemoSlot::new(),
        }
    }

    /// Simple name ("" until published).
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Namespace ("" until published).
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.get().map_or("", String::as_str)
    }

    /// `Namespace.Name` for diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        let namespace = self.namespace();
        if namespace.is_empty() {
            self.name().to_string()
        } else {
            format!("{}.{}", namespace, self.name())
        }
    }

    /// Attribute flags (empty until published).
    #[must_use]
    pub fn attributes(&self) -> TypeAttributes {
        self.flags
            .get()
            .copied()
            .unwrap_or(TypeAttributes::empty())
    }

    /// Returns `true` for interface definitions.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.attributes().contains(TypeAttributes::INTERFACE)
    }

    /// Returns `true` for value-type definitions.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.value_type.get().copied().unwrap_or(false)
    }

    /// Returns `true` for enum definitions.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.enum_type.get().copied().unwrap_or(false)
    }

    /// Returns `true` when the type came from an interpreter module.
    #[must_use]
    pub fn is_interp(&self) -> bool {
        matches!(self.source, TypeSource::Interp(_))
    }

    /// The self type.
    ///
    /// # Panics
    /// Panics if called before the projection published it; pass ordering
    /// guarantees publication in pass 0.
    #[must_use]
    pub fn byval_ty(&self) -> TyRef {
        self.byval
            .get()
            .cloned()
            .unwrap_or_else(|| panic!("byval type not yet published for {}", self.full_name()))
    }

    /// Methods in definition order (empty until published).
    #[must_use]
    pub fn method_list(&self) -> &[MethodHandle] {
        self.methods.get().map_or(&[], Vec::as_slice)
    }

    /// Fields in definition order (empty until published).
    #[must_use]
    pub fn field_list(&self) -> &[FieldHandle] {
        self.fields.get().map_or(&[], Vec::as_slice)
    }

    /// Directly implemented interfaces (empty until published).
    #[must_use]
    pub fn interface_list(&self) -> &[TyRef] {
        self.interfaces.get().map_or(&[], Vec::as_slice)
    }

    /// Value size in bytes.
    ///
    /// Reference types have handle size. Value types use the declared AOT
    /// or explicit layout size when present; otherwise the sum of the
    /// instance fields' value sizes.
    ///
    /// # Errors
    /// Propagates field type size failures.
    pub fn value_size(&self) -> Result<u32> {
        if !self.is_value_type() {
            return Ok(8);
        }
        self.value_size
            .get_or_try_init(|| {
                if let Some(size) = self.aot_value_size.get() {
                    return Ok(*size);
                }
                if let Some((_, class_size)) = self.class_layout.get() {
                    if *class_size > 0 {
                        return Ok(*class_size);
                    }
                }

                let mut total = 0u32;
                for field in self.field_list() {
                    if !field.is_instance() {
                        continue;
                    }
                    total += field.ty()?.value_size()?;
                }
                Ok(total)
            })
            .copied()
    }

    /// Walk `parent` links to the definition chain root.
    #[must_use]
    pub fn parent_handle(&self) -> Option<TypeHandle> {
        self.parent
            .get()
            .and_then(|parent| parent.as_ref())
            .and_then(|ty| ty.type_handle().cloned())
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDef({}, {})", self.full_name(), self.token)
    }
}

/// A method definition shared between the AOT universe and interpreter
/// modules.
pub struct MethodDef {
    /// Defining token
    pub token: Token,
    /// Method name
    pub name: OnceLock<String>,
    /// Attribute flags
    pub flags: OnceLock<MethodAttributes>,
    /// Implementation flags
    pub impl_flags: OnceLock<MethodImplAttributes>,
    /// Declaring type
    pub declaring: OnceLock<TypeHandle>,
    /// Resolved signature
    pub signature: OnceLock<MethodSig>,
    /// Generic parameter container, if generic
    pub generic_container: OnceLock<GenericContainerRef>,
    /// Parsed raw body (None for abstract/extern methods)
    pub body: OnceLock<Option<Arc<MethodBody>>>,
    /// Assigned vtable slot
    pub slot: OnceLock<u16>,
    /// Per-method IR descriptor cache
    pub ir: MemoSlot<Arc<crate::interp::InterpMethodInfo>>,
}

impl MethodDef {
    /// Create an unpopulated shell.
    #[must_use]
    pub fn shell(token: Token) -> MethodDef {
        MethodDef {
            token,
            name: OnceLock::new(),
            flags: OnceLock::new(),
            impl_flags: OnceLock::new(),
            declaring: OnceLock::new(),
            signature: OnceLock::new(),
            generic_container: OnceLock::new(),
            body: OnceLock::new(),
            slot: OnceLock::new(),
            ir: MemoSlot::new(),
        }
    }

    /// Method name ("" until published).
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Attribute flags (empty until published).
    #[must_use]
    pub fn attributes(&self) -> MethodAttributes {
        self.flags
            .get()
            .copied()
            .unwrap_or(MethodAttributes::empty())
    }

    /// Returns `true` for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes().contains(MethodAttributes::VIRTUAL)
    }

    /// Returns `true` for new-slot virtual methods.
    #[must_use]
    pub fn is_new_slot(&self) -> bool {
        self.attributes().contains(MethodAttributes::NEW_SLOT)
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes().contains(MethodAttributes::STATIC)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.attributes().contains(MethodAttributes::ABSTRACT)
    }

    /// Returns `true` when the declaring type is interpreted.
    #[must_use]
    pub fn is_interp(&self) -> bool {
        self.declaring
            .get()
            .map_or(false, |declaring| declaring.is_interp())
    }

    /// Resolved signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] before publication
    /// (projection ordering makes this unreachable for loaded modules).
    pub fn sig(&self) -> Result<&MethodSig> {
        self.signature
            .get()
            .ok_or_else(|| resolution_error!("Signature of {} not resolved", self.name()))
    }

    /// `Type::Method` for diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        match self.declaring.get() {
            Some(declaring) => format!("{}::{}", declaring.full_name(), self.name()),
            None => self.name().to_string(),
        }
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodDef({}, {})", self.full_name(), self.token)
    }
}

/// A field definition.
pub struct FieldDef {
    /// Defining token
    pub token: Token,
    /// Field name
    pub name: OnceLock<String>,
    /// Attribute flags
    pub flags: OnceLock<FieldAttributes>,
    /// Declaring type
    pub declaring: OnceLock<TypeHandle>,
    /// Resolved field type
    pub field_ty: OnceLock<TyRef>,
    /// Instance offset, [`FIELD_OFFSET_UNSET`] or
    /// [`FIELD_OFFSET_THREAD_STATIC`]
    pub offset: AtomicU32,
    /// Decoded default value, when the field has one
    pub default: OnceLock<ConstantValue>,
    /// Mapped initial data, when the field has an RVA record
    pub rva_data: OnceLock<Vec<u8>>,
}

impl FieldDef {
    /// Create an unpopulated shell.
    #[must_use]
    pub fn shell(token: Token) -> FieldDef {
        FieldDef {
            token,
            name: OnceLock::new(),
            flags: OnceLock::new(),
            declaring: OnceLock::new(),
            field_ty: OnceLock::new(),
            offset: AtomicU32::new(FIELD_OFFSET_UNSET),
            default: OnceLock::new(),
            rva_data: OnceLock::new(),
        }
    }

    /// Field name ("" until published).
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.get().map_or("", String::as_str)
    }

    /// Attribute flags (empty until published).
    #[must_use]
    pub fn attributes(&self) -> FieldAttributes {
        self.flags
            .get()
            .copied()
            .unwrap_or(FieldAttributes::empty())
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes().contains(FieldAttributes::STATIC)
    }

    /// Returns `true` for literal fields (no storage).
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.attributes().contains(FieldAttributes::LITERAL)
    }

    /// Returns `true` for fields with per-instance storage.
    #[must_use]
    pub fn is_instance(&self) -> bool {
        !self.is_static() && !self.is_literal()
    }

    /// Resolved field type.
    ///
    /// # Errors
    /// Returns [`crate::Error::ResolutionFailed`] before publication.
    pub fn ty(&self) -> Result<TyRef> {
        self.field_ty
            .get()
            .cloned()
            .ok_or_else(|| resolution_error!("Type of field {} not resolved", self.name()))
    }

    /// Assigned instance offset, if any.
    #[must_use]
    pub fn instance_offset(&self) -> Option<u32> {
        match self.offset.load(Ordering::Acquire) {
            FIELD_OFFSET_UNSET | FIELD_OFFSET_THREAD_STATIC => None,
            offset => Some(offset),
        }
    }

    /// Returns `true` if the field was promoted to thread-local storage.
    #[must_use]
    pub fn is_thread_static(&self) -> bool {
        self.offset.load(Ordering::Acquire) == FIELD_OFFSET_THREAD_STATIC
    }

    /// Record the instance offset.
    pub fn set_offset(&self, offset: u32) {
        self.offset.store(offset, Ordering::Release);
    }

    /// Promote the field to thread-local storage.
    pub fn promote_thread_static(&self) {
        self.offset
            .store(FIELD_OFFSET_THREAD_STATIC, Ordering::Release);
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldDef({}, {})", self.name(), self.token)
    }
}

/// Build the self type for a definition once its valueness is known.
#[must_use]
pub(crate) fn byval_of(handle: &TypeHandle) -> TyRef {
    if handle.is_value_type() {
        Arc::new(Ty::ValueType(handle.clone()))
    } else {
        Arc::new(Ty::Class(handle.clone()))
    }
}
