//! The named heap streams of a module image.
//!
//! The metadata root enumerates a small set of named streams. Four of them
//! are heaps addressed by byte offset from table columns and signature
//! blobs:
//!
//! - `#Strings` - NUL-terminated UTF-8 identifier names ([`Strings`])
//! - `#US` - length-prefixed UTF-16 user string literals ([`UserStrings`])
//! - `#Blob` - length-prefixed binary blobs, mostly signatures ([`Blob`])
//! - `#GUID` - 16-byte identifiers addressed by 1-based index ([`Guid`])
//!
//! The fifth, `#~`, is the tables stream and is handled by
//! [`crate::metadata::tables`]. Every heap is validated in full at load
//! time: a heap whose entries do not tile its declared size exactly is a
//! structural error, surfaced before any row ever dereferences into it.

mod blob;
mod guid;
mod streamheader;
mod strings;
mod userstrings;

pub use blob::Blob;
pub use guid::Guid;
pub use streamheader::StreamHeader;
pub use strings::Strings;
pub use userstrings::UserStrings;
