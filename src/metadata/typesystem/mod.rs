//! The shared type universe: one handle space over AOT-compiled and
//! interpreted types.
//!
//! Everything downstream of the raw reader works in terms of the handles
//! defined here. A [`TypeDef`] may originate in the host binary (registered
//! up front by the embedder through [`UniverseBuilder`], with its layout
//! and vtable precomputed by the AOT compiler) or in an interpreter module
//! loaded at runtime; consumers cannot and must not care which, except for
//! the vtable resolver, where the two origins follow different strategies.
//!
//! Cross-module references are composite keys (module + local index) over
//! arena storage rather than bit-packed integers; handles are `Arc`-shared
//! and live for the process lifetime, like every cache in this crate.

pub(crate) mod defs;
mod generics;
mod ty;
mod universe;

pub use defs::{
    ConstantValue, FieldAttributes, FieldDef, FieldHandle, MethodAttributes, MethodDef,
    MethodHandle, MethodImplAttributes, MethodImplRecord, MethodSig, ParamAttributes, ParamSig,
    TypeAttributes, TypeDef, TypeHandle, TypeSource, FIELD_OFFSET_THREAD_STATIC,
    FIELD_OFFSET_UNSET, OBJECT_HEADER_SIZE,
};
pub use generics::{
    inflate, inflate_args, GenericContainer, GenericContainerRef, GenericContext, GenericOwner,
    GenericParam, GenericParamRef,
};
pub use ty::{Ty, TyRef};
pub use universe::{AotMethodSpec, AotTypeSpec, ModuleId, TypeUniverse, UniverseBuilder};
