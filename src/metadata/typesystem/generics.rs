//! Generic containers, parameters and inflation.
//!
//! A container associates a type or method definition with its ordered
//! generic parameters. Inflation substitutes concrete arguments for the
//! open variables of a signature; instantiation interning lives in the
//! universe so `inflate(def, args)` observed through any path yields the
//! same handle for identical arguments.

use std::sync::{Arc, OnceLock};

use crate::metadata::typesystem::{MethodHandle, Ty, TyRef, TypeHandle};
use crate::Result;

/// Shared reference to a generic container.
pub type GenericContainerRef = Arc<GenericContainer>;
/// Shared reference to a generic parameter.
pub type GenericParamRef = Arc<GenericParam>;

/// The definition owning a generic container.
#[derive(Clone)]
pub enum GenericOwner {
    /// A generic type definition
    Type(TypeHandle),
    /// A generic method definition
    Method(MethodHandle),
}

/// Ordered generic parameters of one type or method definition.
pub struct GenericContainer {
    /// Owning definition
    pub owner: GenericOwner,
    /// `true` when the owner is a method
    pub is_method: bool,
    /// Parameters ordered by their declared number
    pub params: Vec<GenericParamRef>,
}

impl GenericContainer {
    /// The parameter declared at `number`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for an out-of-range variable
    /// number, which can only come from a malformed signature.
    pub fn param(&self, number: u32) -> Result<GenericParamRef> {
        self.params
            .get(number as usize)
            .cloned()
            .ok_or_else(|| bad_image_error!("Generic variable {} out of range", number))
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> u32 {
        u32::try_from(self.params.len()).unwrap_or(u32::MAX)
    }
}

/// One declared generic parameter.
pub struct GenericParam {
    /// 0-based position within the owning container
    pub number: u16,
    /// Variance and special-constraint flags
    pub flags: u16,
    /// Declared name
    pub name: String,
    /// `true` when declared on a method
    pub is_method: bool,
    /// Constraint types, published by the constraint pass
    pub constraints: OnceLock<Vec<TyRef>>,
}

/// Concrete arguments for the class and/or method containers, used to
/// close over open variables during inflation.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct GenericContext {
    /// Arguments for the declaring type's container
    pub class_args: Option<Arc<Vec<TyRef>>>,
    /// Arguments for the method's container
    pub method_args: Option<Arc<Vec<TyRef>>>,
}

impl GenericContext {
    /// A context closing only type variables.
    #[must_use]
    pub fn for_class(args: Arc<Vec<TyRef>>) -> GenericContext {
        GenericContext {
            class_args: Some(args),
            method_args: None,
        }
    }

    /// Returns `true` when the context closes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.class_args.is_none() && self.method_args.is_none()
    }

    /// Extract the class arguments of `ty` when it is an instantiation.
    #[must_use]
    pub fn of_type(ty: &Ty) -> GenericContext {
        match ty {
            Ty::GenericInst { args, .. } => {
                GenericContext::for_class(Arc::new(args.clone()))
            }
            _ => GenericContext::default(),
        }
    }
}

/// Substitute context arguments for the open variables of `ty`.
///
/// Types without open variables are returned as the same shared value.
/// Bound and raw variables both substitute by position; a variable with no
/// argument in the context is left open (partial inflation happens while
/// resolving nested instantiations).
#[must_use]
pub fn inflate(ty: &TyRef, context: &GenericContext) -> TyRef {
    if context.is_empty() {
        return ty.clone();
    }

    match ty.as_ref() {
        Ty::Var(param) => match &context.class_args {
            Some(args) => args
                .get(usize::from(param.number))
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            None => ty.clone(),
        },
        Ty::RawVar(number) => match &context.class_args {
            Some(args) => args
                .get(*number as usize)
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            None => ty.clone(),
        },
        Ty::MVar(param) => match &context.method_args {
            Some(args) => args
                .get(usize::from(param.number))
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            None => ty.clone(),
        },
        Ty::RawMVar(number) => match &context.method_args {
            Some(args) => args
                .get(*number as usize)
                .cloned()
                .unwrap_or_else(|| ty.clone()),
            None => ty.clone(),
        },
        Ty::Ptr(inner) => Arc::new(Ty::Ptr(inflate(inner, context))),
        Ty::ByRef(inner) => Arc::new(Ty::ByRef(inflate(inner, context))),
        Ty::SzArray(inner) => Arc::new(Ty::SzArray(inflate(inner, context))),
        Ty::Pinned(inner) => Arc::new(Ty::Pinned(inflate(inner, context))),
        Ty::Array {
            elem,
            rank,
            sizes,
            lo_bounds,
        } => Arc::new(Ty::Array {
            elem: inflate(elem, context),
            rank: *rank,
            sizes: sizes.clone(),
            lo_bounds: lo_bounds.clone(),
        }),
        Ty::GenericInst { def, args } => Arc::new(Ty::GenericInst {
            def: def.clone(),
            args: args.iter().map(|arg| inflate(arg, context)).collect(),
        }),
        _ => ty.clone(),
    }
}

/// Inflate every element of an argument list.
#[must_use]
pub fn inflate_args(args: &[TyRef], context: &GenericContext) -> Vec<TyRef> {
    args.iter().map(|arg| inflate(arg, context)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(number: u16) -> GenericParamRef {
        Arc::new(GenericParam {
            number,
            flags: 0,
            name: format!("T{number}"),
            is_method: false,
            constraints: OnceLock::new(),
        })
    }

    #[test]
    fn inflates_class_variables() {
        let context =
            GenericContext::for_class(Arc::new(vec![Ty::I4.shared(), Ty::String.shared()]));
        let open = Arc::new(Ty::SzArray(Arc::new(Ty::Var(param(1)))));
        let closed = inflate(&open, &context);
        assert_eq!(closed.as_ref(), &Ty::SzArray(Ty::String.shared()));
    }

    #[test]
    fn method_variables_need_method_args() {
        let context = GenericContext::for_class(Arc::new(vec![Ty::I4.shared()]));
        let open: TyRef = Arc::new(Ty::RawMVar(0));
        assert_eq!(inflate(&open, &context).as_ref(), open.as_ref());

        let context = GenericContext {
            class_args: None,
            method_args: Some(Arc::new(vec![Ty::I8.shared()])),
        };
        assert_eq!(inflate(&open, &context).as_ref(), &Ty::I8);
    }

    #[test]
    fn empty_context_is_identity() {
        let open: TyRef = Arc::new(Ty::RawVar(3));
        let inflated = inflate(&open, &GenericContext::default());
        assert!(Arc::ptr_eq(&open, &inflated));
    }
}
