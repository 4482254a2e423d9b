//! Encoded type and member signatures.
//!
//! Signatures are the second binary grammar of the module format (the
//! first being the tables): a prefix-tagged, recursive encoding of types,
//! stored in the `#Blob` heap and referenced from field, method, local,
//! stand-alone and type-spec rows, and inline in custom-modifier chains.
//!
//! Decoding and resolution are one step here: class/value-type leaves and
//! custom-modifier tokens are resolved through a [`TypeResolver`] as they
//! are read, and generic variables bind to their concrete parameter
//! handles whenever the enclosing type/method containers are known. The
//! output is the [`crate::metadata::typesystem::Ty`] currency everything
//! downstream shares.

mod reader;

pub use reader::{SignatureReader, TypeResolver, MAX_SIGNATURE_DEPTH};

/// Leading element-type tags of the signature grammar.
#[allow(missing_docs)]
pub mod element_type {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const PTR: u8 = 0x0F;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const ARRAY: u8 = 0x14;
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const FNPTR: u8 = 0x1B;
    pub const OBJECT: u8 = 0x1C;
    pub const SZARRAY: u8 = 0x1D;
    pub const MVAR: u8 = 0x1E;
    pub const CMOD_REQD: u8 = 0x1F;
    pub const CMOD_OPT: u8 = 0x20;
    pub const INTERNAL: u8 = 0x21;
    pub const MODIFIER: u8 = 0x40;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
    /// Custom-attribute only: `System.Type` argument
    pub const SYSTEM_TYPE: u8 = 0x50;
    /// Custom-attribute only: boxed value argument
    pub const BOXED_OBJECT: u8 = 0x51;
    /// Custom-attribute only: named field marker
    pub const FIELD_MARKER: u8 = 0x53;
    /// Custom-attribute only: named property marker
    pub const PROPERTY_MARKER: u8 = 0x54;
    /// Custom-attribute only: enum argument with inline type name
    pub const ENUM: u8 = 0x55;
}

/// Calling-convention bytes and flags of member signatures.
#[allow(missing_docs)]
pub mod calling_convention {
    pub const DEFAULT: u8 = 0x00;
    pub const VARARG: u8 = 0x05;
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const GENERIC_INST: u8 = 0x0A;
    pub const MASK: u8 = 0x0F;
    pub const GENERIC: u8 = 0x10;
    pub const HAS_THIS: u8 = 0x20;
    pub const EXPLICIT_THIS: u8 = 0x40;
}
