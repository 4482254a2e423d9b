//! The `#~` tables stream: fixed-schema metadata tables with variable-width
//! cross references.
//!
//! The tables stream is self-describing in an awkward way: every row of
//! every table is fixed-width, but the widths themselves depend on the row
//! counts of *other* tables (a column referencing a table with more than
//! 2^16 rows widens from 2 to 4 bytes) and on the heap-size flags (string,
//! GUID and blob offsets widen the same way). Coded-index columns, which
//! can reference one of several tables behind a small tag, widen when the
//! largest candidate table overflows the bits left next to the tag.
//!
//! Loading therefore happens in two strict steps, mirrored by the types
//! here:
//!
//! 1. [`TableInfo`] parses the header and row counts for every present
//!    table and only then fixes every index width for the whole image.
//! 2. [`MetadataTable`] slices each table's rows out of the stream using
//!    the now-known widths; [`RowDefinition`] implementations decode
//!    individual rows on demand, always 1-based and bounds-checked.
//!
//! Tables are decoded by the row structs in [`rows`] (one struct per
//! supported table kind). PDB-only tables are recognized and rejected with
//! `NotSupported`; unknown bits in the valid mask are a structural error.

mod codedindex;
pub mod rows;
mod table;
mod tableid;
mod tableinfo;

pub use codedindex::{CodedIndex, CodedIndexType};
pub use table::{MetadataTable, RowDefinition, TableIterator};
pub use tableid::{is_pdb_table_number, TableId};
pub use tableinfo::{TableInfo, TableInfoRef, TableRowInfo};
