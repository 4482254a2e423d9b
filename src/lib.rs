#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]

//! # emberclr
//!
//! Runtime metadata, hybrid virtual dispatch and bytecode-to-IR
//! transformation for hot patching a statically compiled .NET runtime
//! with interpreted code.
//!
//! A host binary compiled ahead of time has a fixed type universe: every
//! type layout and vtable was computed by the AOT compiler, and nothing
//! new can be linked in. `emberclr` lets such a host load an ordinary
//! module image at runtime and execute its methods by interpretation,
//! sharing one type universe with the precompiled world: interpreted
//! classes can derive from AOT classes, implement AOT interfaces, satisfy
//! AOT virtual calls and vice versa.
//!
//! The crate covers the hard, format-bound core of that capability:
//!
//! - **Raw image reading** - container header validation, heap streams,
//!   and the ~40 metadata tables with their width-entangled coded
//!   indices ([`metadata::image`], [`metadata::tables`],
//!   [`metadata::streams`])
//! - **Type/signature resolution** - recursive signature decoding and
//!   token resolution against the shared AOT + interpreted universe,
//!   including generic instantiation and inflation
//!   ([`metadata::signatures`], [`metadata::typesystem`])
//! - **Per-module projection** - the fixed-order passes that turn raw
//!   tables into type/method/field handles, custom attributes, constants
//!   and layouts ([`metadata::module`])
//! - **Hybrid vtables** - virtual-dispatch and interface-offset tables
//!   across inheritance chains that mix AOT and interpreted types
//!   ([`metadata::vtable`])
//! - **Bytecode transformation** - a stack-simulation compiler from raw
//!   method bodies to a linked, frame-sized interpreter program
//!   ([`interp`])
//!
//! The interpreter dispatch loop itself, native-call bridging, garbage
//! collection and threading are external collaborators: this crate
//! produces the data they consume.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use emberclr::{InterpModule, TypeUniverse};
//!
//! // The host registers its AOT content once at startup.
//! let universe = TypeUniverse::builder().assembly("mscorlib").finish();
//!
//! // Load a patch module and transform one of its methods.
//! let bytes = std::fs::read("patch.dll")?;
//! let module = InterpModule::load_from_bytes(&universe, bytes)?;
//! let method = module.methods()[0].clone();
//! let ir = module.method_ir(&method)?;
//! println!("{} compiled to {} instructions", method.full_name(), ir.code.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Failure model
//!
//! Every structural violation is fatal at its detection point: a bad
//! module aborts loading, an unsupported opcode aborts transforming that
//! method, and nothing is retried because all results are cached. See
//! [`Error`] for the taxonomy.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared fixtures for unit and integration tests
#[cfg(test)]
pub(crate) mod test;

pub mod interp;
pub mod metadata;

/// `emberclr` Result type.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;

pub use file::{parser::Parser, File};
pub use interp::InterpMethodInfo;
pub use metadata::module::InterpModule;
pub use metadata::token::Token;
pub use metadata::typesystem::{Ty, TypeUniverse, UniverseBuilder};
