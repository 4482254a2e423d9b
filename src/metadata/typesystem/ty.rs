//! Resolved type values.
//!
//! [`Ty`] is the decoded, resolved form of an encoded type signature: the
//! currency passed between the signature decoder, the metadata projection,
//! the vtable resolver and the bytecode transform. Class and value-type
//! leaves hold [`TypeHandle`]s into the shared universe; generic variables
//! are either bound to a concrete parameter handle (when their container
//! was known at decode time) or kept as raw indices for later inflation.
//!
//! Equality and hashing are structural with pointer identity at the
//! leaves, which is what both the instantiation interner and the
//! override-matching rules need.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::metadata::typesystem::{GenericParamRef, TypeHandle};
use crate::Result;

/// Shared reference to a resolved type value.
pub type TyRef = Arc<Ty>;

/// A resolved type.
#[derive(Clone)]
pub enum Ty {
    /// `void` (return types only)
    Void,
    /// `bool`
    Bool,
    /// `char` (UTF-16 code unit)
    Char,
    /// `sbyte`
    I1,
    /// `byte`
    U1,
    /// `short`
    I2,
    /// `ushort`
    U2,
    /// `int`
    I4,
    /// `uint`
    U4,
    /// `long`
    I8,
    /// `ulong`
    U8,
    /// `float`
    R4,
    /// `double`
    R8,
    /// native `int`
    I,
    /// native `uint`
    U,
    /// `string`
    String,
    /// `object`
    Object,
    /// Typed reference (value type of pointer + type pair)
    TypedByRef,
    /// A reference type defined by a [`TypeHandle`]
    Class(TypeHandle),
    /// A value type defined by a [`TypeHandle`]
    ValueType(TypeHandle),
    /// Unmanaged pointer
    Ptr(TyRef),
    /// Managed by-reference
    ByRef(TyRef),
    /// Single-dimensional, zero-based array
    SzArray(TyRef),
    /// Multi-dimensional array with optional explicit bounds
    Array {
        /// Element type
        elem: TyRef,
        /// Number of dimensions
        rank: u32,
        /// Explicit sizes, one per leading dimension that has one
        sizes: Vec<u32>,
        /// Explicit lower bounds, one per leading dimension that has one
        lo_bounds: Vec<i32>,
    },
    /// A generic instantiation: open definition plus ordered arguments
    GenericInst {
        /// The open generic definition
        def: TypeHandle,
        /// Concrete (or still-open) type arguments
        args: Vec<TyRef>,
    },
    /// A type generic variable bound to its parameter definition
    Var(GenericParamRef),
    /// A method generic variable bound to its parameter definition
    MVar(GenericParamRef),
    /// A type generic variable whose container was unknown at decode time
    RawVar(u32),
    /// A method generic variable whose container was unknown at decode
    /// time
    RawMVar(u32),
    /// Pinned local wrapper
    Pinned(TyRef),
    /// Vararg sentinel marker (signature internal)
    Sentinel,
}

impl Ty {
    /// Shared singletons for the primitive leaves.
    #[must_use]
    pub fn shared(self) -> TyRef {
        Arc::new(self)
    }

    /// Returns `true` for value types (primitives, value-type handles and
    /// value-typed generic instantiations).
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        match self {
            Ty::Bool
            | Ty::Char
            | Ty::I1
            | Ty::U1
            | Ty::I2
            | Ty::U2
            | Ty::I4
            | Ty::U4
            | Ty::I8
            | Ty::U8
            | Ty::R4
            | Ty::R8
            | Ty::I
            | Ty::U
            | Ty::TypedByRef
            | Ty::ValueType(_) => true,
            Ty::GenericInst { def, .. } => def.is_value_type(),
            Ty::Pinned(inner) => inner.is_value_type(),
            _ => false,
        }
    }

    /// Returns `true` for by-reference types.
    #[must_use]
    pub fn is_byref(&self) -> bool {
        matches!(self, Ty::ByRef(_))
    }

    /// The defining handle behind a class/value-type/generic-inst value.
    #[must_use]
    pub fn type_handle(&self) -> Option<&TypeHandle> {
        match self {
            Ty::Class(handle) | Ty::ValueType(handle) | Ty::GenericInst { def: handle, .. } => {
                Some(handle)
            }
            Ty::Pinned(inner) | Ty::ByRef(inner) => inner.type_handle(),
            _ => None,
        }
    }

    /// Byte size of a value of this type in an object or frame.
    ///
    /// References, pointers and object handles are 8 bytes on every
    /// supported target; value types report their computed or declared
    /// instance size.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for types without a value
    /// size (`void`, sentinels, unbound variables).
    pub fn value_size(&self) -> Result<u32> {
        match self {
            Ty::Bool | Ty::I1 | Ty::U1 => Ok(1),
            Ty::Char | Ty::I2 | Ty::U2 => Ok(2),
            Ty::I4 | Ty::U4 | Ty::R4 => Ok(4),
            Ty::I8
            | Ty::U8
            | Ty::R8
            | Ty::I
            | Ty::U
            | Ty::String
            | Ty::Object
            | Ty::Ptr(_)
            | Ty::ByRef(_)
            | Ty::SzArray(_)
            | Ty::Array { .. }
            | Ty::Class(_) => Ok(8),
            // pointer + type + mode
            Ty::TypedByRef => Ok(24),
            Ty::ValueType(handle) => handle.value_size(),
            Ty::GenericInst { def, .. } => {
                if def.is_value_type() {
                    def.value_size()
                } else {
                    Ok(8)
                }
            }
            Ty::Pinned(inner) => inner.value_size(),
            other => Err(not_supported_error!("Type {} has no value size", other)),
        }
    }

    /// Override-compatibility compare: the (name-independent) part of the
    /// slot-matching rule used by the vtable resolver.
    ///
    /// Handles compare by identity; generic instantiations compare their
    /// definitions and arguments recursively; bound variables compare by
    /// parameter identity for type variables and by position for method
    /// variables (two overriding methods declare distinct parameter
    /// objects at the same positions).
    #[must_use]
    pub fn same_override_type(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Class(a), Ty::Class(b)) | (Ty::ValueType(a), Ty::ValueType(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Ty::Ptr(a), Ty::Ptr(b))
            | (Ty::SzArray(a), Ty::SzArray(b))
            | (Ty::ByRef(a), Ty::ByRef(b))
            | (Ty::Pinned(a), Ty::Pinned(b)) => a.same_override_type(b),
            (
                Ty::Array {
                    elem: elem_a,
                    rank: rank_a,
                    ..
                },
                Ty::Array {
                    elem: elem_b,
                    rank: rank_b,
                    ..
                },
            ) => rank_a == rank_b && elem_a.same_override_type(elem_b),
            (
                Ty::GenericInst {
                    def: def_a,
                    args: args_a,
                },
                Ty::GenericInst {
                    def: def_b,
                    args: args_b,
                },
            ) => {
                Arc::ptr_eq(def_a, def_b)
                    && args_a.len() == args_b.len()
                    && args_a
                        .iter()
                        .zip(args_b)
                        .all(|(a, b)| a.same_override_type(b))
            }
            (Ty::Var(a), Ty::Var(b)) => Arc::ptr_eq(a, b),
            (Ty::MVar(a), Ty::MVar(b)) => a.number == b.number,
            (Ty::RawVar(a), Ty::RawVar(b)) | (Ty::RawMVar(a), Ty::RawMVar(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl PartialEq for Ty {
    fn eq(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Class(a), Ty::Class(b)) | (Ty::ValueType(a), Ty::ValueType(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Ty::Ptr(a), Ty::Ptr(b))
            | (Ty::ByRef(a), Ty::ByRef(b))
            | (Ty::SzArray(a), Ty::SzArray(b))
            | (Ty::Pinned(a), Ty::Pinned(b)) => a == b,
            (
                Ty::Array {
                    elem: elem_a,
                    rank: rank_a,
                    sizes: sizes_a,
                    lo_bounds: lo_a,
                },
                Ty::Array {
                    elem: elem_b,
                    rank: rank_b,
                    sizes: sizes_b,
                    lo_bounds: lo_b,
                },
            ) => rank_a == rank_b && sizes_a == sizes_b && lo_a == lo_b && elem_a == elem_b,
            (
                Ty::GenericInst {
                    def: def_a,
                    args: args_a,
                },
                Ty::GenericInst {
                    def: def_b,
                    args: args_b,
                },
            ) => Arc::ptr_eq(def_a, def_b) && args_a == args_b,
            (Ty::Var(a), Ty::Var(b)) | (Ty::MVar(a), Ty::MVar(b)) => Arc::ptr_eq(a, b),
            (Ty::RawVar(a), Ty::RawVar(b)) | (Ty::RawMVar(a), Ty::RawMVar(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl Eq for Ty {}

impl Hash for Ty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Ty::Class(handle) | Ty::ValueType(handle) => {
                Arc::as_ptr(handle).hash(state);
            }
            Ty::Ptr(inner) | Ty::ByRef(inner) | Ty::SzArray(inner) | Ty::Pinned(inner) => {
                inner.hash(state);
            }
            Ty::Array {
                elem,
                rank,
                sizes,
                lo_bounds,
            } => {
                elem.hash(state);
                rank.hash(state);
                sizes.hash(state);
                lo_bounds.hash(state);
            }
            Ty::GenericInst { def, args } => {
                Arc::as_ptr(def).hash(state);
                for arg in args {
                    arg.hash(state);
                }
            }
            Ty::Var(param) | Ty::MVar(param) => {
                Arc::as_ptr(param).hash(state);
            }
            Ty::RawVar(number) | Ty::RawMVar(number) => number.hash(state),
            _ => {}
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Bool => write!(f, "bool"),
            Ty::Char => write!(f, "char"),
            Ty::I1 => write!(f, "sbyte"),
            Ty::U1 => write!(f, "byte"),
            Ty::I2 => write!(f, "short"),
            Ty::U2 => write!(f, "ushort"),
            Ty::I4 => write!(f, "int"),
            Ty::U4 => write!(f, "uint"),
            Ty::I8 => write!(f, "long"),
            Ty::U8 => write!(f, "ulong"),
            Ty::R4 => write!(f, "float"),
            Ty::R8 => write!(f, "double"),
            Ty::I => write!(f, "nint"),
            Ty::U => write!(f, "nuint"),
            Ty::String => write!(f, "string"),
            Ty::Object => write!(f, "object"),
            Ty::TypedByRef => write!(f, "typedref"),
            Ty::Class(handle) | Ty::ValueType(handle) => write!(f, "{}", handle.full_name()),
            Ty::Ptr(inner) => write!(f, "{inner}*"),
            Ty::ByRef(inner) => write!(f, "{inner}&"),
            Ty::SzArray(inner) => write!(f, "{inner}[]"),
            Ty::Array { elem, rank, .. } => {
                write!(f, "{elem}[{}]", ",".repeat(*rank as usize - 1))
            }
            Ty::GenericInst { def, args } => {
                write!(f, "{}<", def.full_name())?;
                for (position, arg) in args.iter().enumerate() {
                    if position > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ">")
            }
            Ty::Var(param) => write!(f, "!{}", param.number),
            Ty::MVar(param) => write!(f, "!!{}", param.number),
            Ty::RawVar(number) => write!(f, "!{number}"),
            Ty::RawMVar(number) => write!(f, "!!{number}"),
            Ty::Pinned(inner) => write!(f, "pinned {inner}"),
            Ty::Sentinel => write!(f, "..."),
        }
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
