//! Evaluation-stack value categories.
//!
//! The transform simulates the operand stack symbolically: every entry is
//! a category, a byte size and a frame-slot offset. Categories mirror the
//! machine-level shapes the interpreter distinguishes, not source types;
//! all object references collapse to [`EvalStackKind::Obj`], managed
//! references to [`EvalStackKind::Ref`], and value types ride as
//! [`EvalStackKind::Other`] with their byte size.

use crate::metadata::typesystem::{Ty, TyRef};
use crate::Result;

/// Frame slots are 8 bytes wide; value types occupy a run of slots.
pub const STACK_SLOT_SIZE: u32 = 8;

/// Abstract category of one evaluation-stack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStackKind {
    /// 4-byte integer
    I4,
    /// 8-byte integer
    I8,
    /// Native-size integer (8 bytes on every supported target)
    I,
    /// 4-byte float
    R4,
    /// 8-byte float
    R8,
    /// Managed reference (by-ref pointer)
    Ref,
    /// Object reference
    Obj,
    /// Any other aggregate (value types), sized explicitly
    Other,
}

impl EvalStackKind {
    /// The category a value of `ty` takes on the evaluation stack.
    #[must_use]
    pub fn of_ty(ty: &Ty) -> EvalStackKind {
        match ty {
            Ty::Bool
            | Ty::Char
            | Ty::I1
            | Ty::U1
            | Ty::I2
            | Ty::U2
            | Ty::I4
            | Ty::U4 => EvalStackKind::I4,
            Ty::I8 | Ty::U8 => EvalStackKind::I8,
            Ty::I | Ty::U | Ty::Ptr(_) => EvalStackKind::I,
            Ty::R4 => EvalStackKind::R4,
            Ty::R8 => EvalStackKind::R8,
            Ty::ByRef(_) => EvalStackKind::Ref,
            Ty::String | Ty::Object | Ty::Class(_) | Ty::SzArray(_) | Ty::Array { .. } => {
                EvalStackKind::Obj
            }
            Ty::ValueType(def) => {
                if def.is_enum() {
                    // Enums reduce to their element category when known.
                    def.enum_element
                        .get()
                        .map_or(EvalStackKind::Other, |element| Self::of_ty(element))
                } else {
                    EvalStackKind::Other
                }
            }
            Ty::GenericInst { def, .. } => {
                if def.is_value_type() {
                    EvalStackKind::Other
                } else {
                    EvalStackKind::Obj
                }
            }
            Ty::TypedByRef => EvalStackKind::Other,
            Ty::Pinned(inner) => Self::of_ty(inner),
            // Open variables and markers do not reach the stack simulator.
            _ => EvalStackKind::Other,
        }
    }

    /// Default byte size of this category (aggregates size themselves).
    #[must_use]
    pub fn default_size(&self) -> u32 {
        match self {
            EvalStackKind::I4 | EvalStackKind::R4 => 4,
            _ => 8,
        }
    }

    /// Returns `true` for the integral categories.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(self, EvalStackKind::I4 | EvalStackKind::I8 | EvalStackKind::I)
    }

    /// Returns `true` for the float categories.
    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, EvalStackKind::R4 | EvalStackKind::R8)
    }
}

/// One symbolic evaluation-stack entry.
#[derive(Debug, Clone, Copy)]
pub struct EvalEntry {
    /// Abstract category
    pub kind: EvalStackKind,
    /// Byte size of the value
    pub byte_size: u32,
    /// Frame-slot offset where the value lives
    pub slot: u16,
}

/// Slots occupied by a value of `byte_size` bytes.
#[must_use]
pub fn slots_of(byte_size: u32) -> u16 {
    u16::try_from(byte_size.div_ceil(STACK_SLOT_SIZE).max(1)).unwrap_or(u16::MAX)
}

/// Slots occupied by a value of type `ty`.
///
/// # Errors
/// Propagates value-size failures for unsized types.
pub fn slots_of_ty(ty: &TyRef) -> Result<u16> {
    Ok(slots_of(ty.value_size()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_of_primitives() {
        assert_eq!(EvalStackKind::of_ty(&Ty::I4), EvalStackKind::I4);
        assert_eq!(EvalStackKind::of_ty(&Ty::U2), EvalStackKind::I4);
        assert_eq!(EvalStackKind::of_ty(&Ty::I8), EvalStackKind::I8);
        assert_eq!(EvalStackKind::of_ty(&Ty::R4), EvalStackKind::R4);
        assert_eq!(EvalStackKind::of_ty(&Ty::String), EvalStackKind::Obj);
        assert_eq!(
            EvalStackKind::of_ty(&Ty::ByRef(Ty::I4.shared())),
            EvalStackKind::Ref
        );
        assert_eq!(
            EvalStackKind::of_ty(&Ty::Ptr(Ty::I4.shared())),
            EvalStackKind::I
        );
    }

    #[test]
    fn slot_rounding() {
        assert_eq!(slots_of(0), 1);
        assert_eq!(slots_of(1), 1);
        assert_eq!(slots_of(8), 1);
        assert_eq!(slots_of(9), 2);
        assert_eq!(slots_of(16), 2);
        assert_eq!(slots_of(24), 3);
    }
}
