//! The IR instruction set and the per-method descriptor.
//!
//! Instructions are tagged variants over frame-slot operands (`u16`, in
//! 8-byte stack slots) and side-table indices (`u32` into the method's
//! resolved-data vector). Branch and exception targets are linear indices
//! into the instruction vector, patched in after all blocks are emitted.
//!
//! Memory-touching instructions carry a [`MemKind`]: the total
//! (category, resolved byte size) selector that decides which machine
//! shape the interpreter executes. Value-type accesses specialize on the
//! sizes 1/2/4/8/12/16 and fall back to an explicit byte count.

use crate::metadata::method::EhClauseKind;
use crate::metadata::token::Token;
use crate::metadata::typesystem::{MethodSig, Ty, TyRef};
use crate::Result;

/// Numeric operand width class for arithmetic and comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    /// 32-bit integer
    I4,
    /// 64-bit integer (also native ints)
    I8,
    /// 32-bit float
    R4,
    /// 64-bit float
    R8,
}

/// Binary arithmetic/bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    AddOvf,
    AddOvfUn,
    SubOvf,
    SubOvfUn,
    MulOvf,
    MulOvfUn,
}

/// Comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    GtUn,
    Ge,
    GeUn,
    Lt,
    LtUn,
    Le,
    LeUn,
}

/// The (category, size) selector for memory accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    /// 1 byte, sign-extended
    I1,
    /// 1 byte, zero-extended
    U1,
    /// 2 bytes, sign-extended
    I2,
    /// 2 bytes, zero-extended
    U2,
    /// 4 bytes
    I4,
    /// 8 bytes
    I8,
    /// 4-byte float
    R4,
    /// 8-byte float
    R8,
    /// Object reference
    Obj,
    /// 12-byte aggregate
    Size12,
    /// 16-byte aggregate
    Size16,
    /// Arbitrary-size aggregate
    SizeN(u32),
}

impl MemKind {
    /// Total selection table from a resolved type to its access shape.
    ///
    /// # Errors
    /// Propagates value-size failures for unsized types.
    pub fn of_ty(ty: &Ty) -> Result<MemKind> {
        Ok(match ty {
            Ty::Bool | Ty::U1 => MemKind::U1,
            Ty::I1 => MemKind::I1,
            Ty::Char | Ty::U2 => MemKind::U2,
            Ty::I2 => MemKind::I2,
            Ty::I4 | Ty::U4 => MemKind::I4,
            Ty::I8 | Ty::U8 | Ty::I | Ty::U | Ty::Ptr(_) | Ty::ByRef(_) => MemKind::I8,
            Ty::R4 => MemKind::R4,
            Ty::R8 => MemKind::R8,
            Ty::String | Ty::Object | Ty::Class(_) | Ty::SzArray(_) | Ty::Array { .. } => {
                MemKind::Obj
            }
            Ty::Pinned(inner) => MemKind::of_ty(inner)?,
            Ty::ValueType(def) if def.is_enum() => match def.enum_element.get() {
                Some(element) => MemKind::of_ty(element)?,
                None => MemKind::I4,
            },
            other => match other.value_size()? {
                1 => MemKind::U1,
                2 => MemKind::U2,
                4 => MemKind::I4,
                8 => MemKind::I8,
                12 => MemKind::Size12,
                16 => MemKind::Size16,
                size => MemKind::SizeN(size),
            },
        })
    }

    /// Byte size accessed by this kind.
    #[must_use]
    pub fn byte_size(&self) -> u32 {
        match self {
            MemKind::I1 | MemKind::U1 => 1,
            MemKind::I2 | MemKind::U2 => 2,
            MemKind::I4 | MemKind::R4 => 4,
            MemKind::I8 | MemKind::R8 | MemKind::Obj => 8,
            MemKind::Size12 => 12,
            MemKind::Size16 => 16,
            MemKind::SizeN(size) => *size,
        }
    }
}

/// One entry of the resolved-data side table.
pub enum ResolvedData {
    /// A resolved method target with optional method instantiation
    Method(crate::metadata::module::ResolvedMethod),
    /// A resolved field with its (possibly inflated) container
    Field(TyRef, crate::metadata::typesystem::FieldHandle),
    /// A resolved type
    Type(TyRef),
    /// An interned string literal
    String(std::sync::Arc<String>),
    /// Call-site argument slot offsets, `this` included
    ArgList(Vec<u16>),
    /// Switch case targets (IL offsets until patching, IR offsets after)
    SwitchTargets(Vec<u32>),
    /// A stand-alone call-site signature
    Sig(MethodSig),
}

/// One exception clause, in final IR offsets.
pub struct IrExceptionClause {
    /// Handler kind
    pub kind: EhClauseKind,
    /// First instruction of the protected region
    pub try_start: u32,
    /// Past-the-end instruction of the protected region
    pub try_end: u32,
    /// First instruction of the handler
    pub handler_start: u32,
    /// Past-the-end instruction of the handler
    pub handler_end: u32,
    /// First instruction of the filter (filter clauses only)
    pub filter_start: u32,
    /// The catch type (typed clauses only)
    pub catch_type: Option<TyRef>,
}

/// Describes one argument's frame placement.
pub struct ArgDesc {
    /// Argument type
    pub ty: TyRef,
    /// First frame slot
    pub slot: u16,
    /// Occupied slot count
    pub slots: u16,
}

/// The transformed method: a linked, frame-sized program.
pub struct InterpMethodInfo {
    /// The source method's token
    pub method_token: Token,
    /// IR instructions in execution order
    pub code: Vec<IrInst>,
    /// Deduplicated operand side table
    pub resolved_data: Vec<ResolvedData>,
    /// Arguments with their frame placement
    pub args: Vec<ArgDesc>,
    /// Total slots occupied by arguments
    pub arg_slots: u16,
    /// Total slots occupied by arguments + locals
    pub local_slots: u16,
    /// First evaluation-stack slot
    pub eval_stack_base: u16,
    /// Frame high-water mark, in slots
    pub max_frame_slots: u16,
    /// Exception clauses in declaration order
    pub ex_clauses: Vec<IrExceptionClause>,
}

/// A tagged IR instruction.
///
/// `dst`/`src`/operand fields are frame-slot offsets; `data` fields index
/// [`InterpMethodInfo::resolved_data`]; `target` fields are IR code
/// offsets after patching.
#[derive(Debug, Clone, PartialEq)]
pub enum IrInst {
    /// Zero-initialize the locals area
    InitLocals {
        /// First local slot
        base: u16,
        /// Local slot count
        slots: u16,
    },
    /// Copy a value between frame slots, widening small ints to the
    /// stack's 4-byte form
    LoadVar {
        /// Destination slot
        dst: u16,
        /// Source slot
        src: u16,
        /// Byte size
        size: u32,
    },
    /// Push the address of a frame slot
    LoadVarAddress {
        /// Destination slot
        dst: u16,
        /// Addressed slot
        src: u16,
    },
    /// Copy a value from the stack into an argument/local slot
    StoreVar {
        /// Destination slot
        dst: u16,
        /// Source slot
        src: u16,
        /// Byte size
        size: u32,
    },
    /// Load a 4-byte constant
    LoadConstI4 {
        /// Destination slot
        dst: u16,
        /// Constant value
        value: i32,
    },
    /// Load an 8-byte constant (also carries `r4`/`r8` bit patterns)
    LoadConstI8 {
        /// Destination slot
        dst: u16,
        /// Constant value
        value: i64,
    },
    /// Push a null object reference
    LoadNull {
        /// Destination slot
        dst: u16,
    },
    /// Push an interned string literal
    LoadString {
        /// Destination slot
        dst: u16,
        /// Side-table index of the literal
        data: u32,
    },
    /// Numeric conversion
    Convert {
        /// Destination slot
        dst: u16,
        /// Source slot
        src: u16,
        /// Source width class
        from: NumKind,
        /// Destination width class
        to: NumKind,
        /// Treat the source as unsigned
        unsigned: bool,
        /// Overflow-checked conversion
        checked: bool,
        /// Truncate the checked result to this byte width (1/2/4/8)
        result_bytes: u8,
        /// The checked result is unsigned
        result_unsigned: bool,
    },
    /// Binary arithmetic/bitwise operation
    Binary {
        /// Destination slot
        dst: u16,
        /// Left operand slot
        lhs: u16,
        /// Right operand slot
        rhs: u16,
        /// Operation
        op: BinOp,
        /// Operand width class
        kind: NumKind,
    },
    /// Negate
    Neg {
        /// Destination slot
        dst: u16,
        /// Source slot
        src: u16,
        /// Operand width class
        kind: NumKind,
    },
    /// Bitwise complement
    Not {
        /// Destination slot
        dst: u16,
        /// Source slot
        src: u16,
        /// Operand width class
        kind: NumKind,
    },
    /// Raise if the float operand is NaN or infinite
    CheckFinite {
        /// Operand slot
        src: u16,
        /// Operand width class
        kind: NumKind,
    },
    /// Compare and push 0/1
    Compare {
        /// Destination slot
        dst: u16,
        /// Left operand slot
        lhs: u16,
        /// Right operand slot
        rhs: u16,
        /// Comparison
        op: CmpOp,
        /// Operand width class
        kind: NumKind,
    },
    /// Unconditional branch
    Branch {
        /// Target IR offset
        target: u32,
    },
    /// Branch when the operand is non-zero
    BranchTrue {
        /// Operand slot
        cond: u16,
        /// Operand is 8 bytes wide
        wide: bool,
        /// Target IR offset
        target: u32,
    },
    /// Branch when the operand is zero
    BranchFalse {
        /// Operand slot
        cond: u16,
        /// Operand is 8 bytes wide
        wide: bool,
        /// Target IR offset
        target: u32,
    },
    /// Compare-and-branch
    BranchCmp {
        /// Left operand slot
        lhs: u16,
        /// Right operand slot
        rhs: u16,
        /// Comparison
        op: CmpOp,
        /// Operand width class
        kind: NumKind,
        /// Target IR offset
        target: u32,
    },
    /// Jump table over a 4-byte selector
    Switch {
        /// Selector slot
        value: u16,
        /// Side-table index of the case target vector
        data: u32,
        /// Case count
        count: u32,
    },
    /// Load through a pointer/reference
    LoadIndirect {
        /// Destination slot
        dst: u16,
        /// Address slot
        addr: u16,
        /// Access shape
        kind: MemKind,
    },
    /// Store through a pointer/reference
    StoreIndirect {
        /// Address slot
        addr: u16,
        /// Source slot
        src: u16,
        /// Access shape
        kind: MemKind,
    },
    /// Load an instance field
    LoadField {
        /// Destination slot
        dst: u16,
        /// Object/value address slot
        obj: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape (1/2/4/8/12/16/N by resolved size)
        kind: MemKind,
    },
    /// Push the address of an instance field
    LoadFieldAddress {
        /// Destination slot
        dst: u16,
        /// Object slot
        obj: u16,
        /// Side-table index of the field
        data: u32,
    },
    /// Store an instance field
    StoreField {
        /// Object slot
        obj: u16,
        /// Source slot
        src: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape
        kind: MemKind,
    },
    /// Load a static field
    LoadStaticField {
        /// Destination slot
        dst: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape
        kind: MemKind,
    },
    /// Push the address of a static field
    LoadStaticFieldAddress {
        /// Destination slot
        dst: u16,
        /// Side-table index of the field
        data: u32,
    },
    /// Store a static field
    StoreStaticField {
        /// Source slot
        src: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape
        kind: MemKind,
    },
    /// Load a thread-local static field
    LoadThreadStaticField {
        /// Destination slot
        dst: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape
        kind: MemKind,
    },
    /// Store a thread-local static field
    StoreThreadStaticField {
        /// Source slot
        src: u16,
        /// Side-table index of the field
        data: u32,
        /// Access shape
        kind: MemKind,
    },
    /// Copy an aggregate from an address onto the stack
    LoadObject {
        /// Destination slot
        dst: u16,
        /// Source address slot
        addr: u16,
        /// Byte size
        size: u32,
    },
    /// Copy an aggregate from the stack through an address
    StoreObject {
        /// Destination address slot
        addr: u16,
        /// Source slot
        src: u16,
        /// Byte size
        size: u32,
    },
    /// Copy an aggregate between two addresses
    CopyObject {
        /// Destination address slot
        dst_addr: u16,
        /// Source address slot
        src_addr: u16,
        /// Byte size
        size: u32,
    },
    /// Zero an aggregate behind an address
    InitObject {
        /// Address slot
        addr: u16,
        /// Byte size
        size: u32,
    },
    /// Copy raw bytes between addresses
    CopyBlock {
        /// Destination address slot
        dst_addr: u16,
        /// Source address slot
        src_addr: u16,
        /// Byte-count slot
        size: u16,
    },
    /// Fill raw bytes behind an address
    InitBlock {
        /// Address slot
        addr: u16,
        /// Fill value slot
        value: u16,
        /// Byte-count slot
        size: u16,
    },
    /// Box a value
    Box {
        /// Destination slot
        dst: u16,
        /// Source value slot
        src: u16,
        /// Side-table index of the boxed type
        data: u32,
    },
    /// Unbox to a managed interior pointer
    Unbox {
        /// Destination slot
        dst: u16,
        /// Object slot
        obj: u16,
        /// Side-table index of the target type
        data: u32,
    },
    /// Unbox (or cast) to the value itself
    UnboxAny {
        /// Destination slot
        dst: u16,
        /// Object slot
        obj: u16,
        /// Side-table index of the target type
        data: u32,
        /// Value byte size
        size: u32,
    },
    /// Checked cast; raises on failure
    CastClass {
        /// Object slot (in place)
        obj: u16,
        /// Side-table index of the target type
        data: u32,
    },
    /// Type test; pushes null on failure
    IsInst {
        /// Destination slot
        dst: u16,
        /// Object slot
        obj: u16,
        /// Side-table index of the target type
        data: u32,
    },
    /// Allocate and construct through an AOT constructor
    NewObject {
        /// Destination slot
        dst: u16,
        /// Side-table index of the constructor
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
    },
    /// Allocate and construct through an interpreted constructor
    NewObjectInterp {
        /// Destination slot
        dst: u16,
        /// Side-table index of the constructor
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
    },
    /// Construct a value type in place through its constructor
    NewValueType {
        /// Destination slot
        dst: u16,
        /// Side-table index of the constructor
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Value byte size
        size: u32,
        /// The constructor is interpreted
        is_interp: bool,
    },
    /// Direct call into AOT code via the native bridge
    CallNative {
        /// Side-table index of the target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot (meaningful when `has_ret`)
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Direct call into another interpreted method (no bridge)
    CallInterp {
        /// Side-table index of the target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Slot-dispatched virtual call whose resolved target is AOT code
    CallVirtualNative {
        /// Side-table index of the declared target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Slot-dispatched virtual call whose resolved target is interpreted
    CallVirtualInterp {
        /// Side-table index of the declared target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Interface-dispatched call
    CallInterface {
        /// Side-table index of the declared target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Constrained virtual call (value-type receivers)
    CallConstrained {
        /// Side-table index of the constrained type
        constrained: u32,
        /// Side-table index of the declared target
        method: u32,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Indirect call through a function pointer
    CallIndirect {
        /// Side-table index of the call-site signature
        sig: u32,
        /// Function pointer slot
        ftn: u16,
        /// Side-table index of the argument slot list
        args: u32,
        /// Return slot
        ret: u16,
        /// The call produces a value
        has_ret: bool,
    },
    /// Return a value
    Return {
        /// Source slot
        src: u16,
        /// Byte size
        size: u32,
    },
    /// Return void
    ReturnVoid,
    /// Allocate a one-dimensional array
    NewArray {
        /// Destination slot
        dst: u16,
        /// Length slot
        len: u16,
        /// Side-table index of the element type
        data: u32,
    },
    /// Push an array's length
    LoadArrayLength {
        /// Destination slot
        dst: u16,
        /// Array slot
        arr: u16,
    },
    /// Load an array element
    LoadElement {
        /// Destination slot
        dst: u16,
        /// Array slot
        arr: u16,
        /// Index slot
        index: u16,
        /// Access shape
        kind: MemKind,
    },
    /// Push the address of an array element
    LoadElementAddress {
        /// Destination slot
        dst: u16,
        /// Array slot
        arr: u16,
        /// Index slot
        index: u16,
        /// Side-table index of the element type
        data: u32,
    },
    /// Store an array element
    StoreElement {
        /// Array slot
        arr: u16,
        /// Index slot
        index: u16,
        /// Source slot
        src: u16,
        /// Access shape
        kind: MemKind,
    },
    /// Raise an exception object
    Throw {
        /// Exception slot
        ex: u16,
    },
    /// Re-raise inside a handler
    Rethrow,
    /// Exit a protected region toward a target
    Leave {
        /// Target IR offset
        target: u32,
    },
    /// End a finally/fault handler
    EndFinally,
    /// End a filter with its decision value
    EndFilter {
        /// Decision slot
        value: u16,
    },
    /// Push a runtime handle for a token
    LoadToken {
        /// Destination slot
        dst: u16,
        /// Side-table index of the handle
        data: u32,
    },
    /// Push a method's entry pointer
    LoadFunction {
        /// Destination slot
        dst: u16,
        /// Side-table index of the method
        data: u32,
    },
    /// Push the dispatched entry pointer for an object's method
    LoadVirtualFunction {
        /// Destination slot
        dst: u16,
        /// Object slot
        obj: u16,
        /// Side-table index of the declared method
        data: u32,
    },
    /// Full memory fence (volatile accesses)
    MemoryBarrier,
}

impl IrInst {
    /// Rewrite this instruction's IL-offset targets to IR offsets.
    ///
    /// Only the branch family carries inline targets; switch cases live
    /// in the side table and are patched there.
    pub fn patch_targets(&mut self, map: &impl Fn(u32) -> u32) {
        match self {
            IrInst::Branch { target }
            | IrInst::BranchTrue { target, .. }
            | IrInst::BranchFalse { target, .. }
            | IrInst::BranchCmp { target, .. }
            | IrInst::Leave { target } => {
                *target = map(*target);
            }
            _ => {}
        }
    }
}
