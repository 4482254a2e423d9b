//! Per-image row counts and index widths for every metadata table.
//!
//! Nothing in a row can be decoded before the widths of all index columns
//! are known, and those widths depend on the row counts of every table an
//! index might reference. [`TableInfo`] is built in that order: row counts
//! first, widths second, and is immutable afterwards.

use std::sync::Arc;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::read_le_at,
    metadata::tables::{CodedIndexType, TableId},
    Result,
};

/// Row count and index width of a single table.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows in this table
    pub rows: u32,
    /// Bits required to represent any valid row index
    pub bits: u8,
    /// When rows exceed `u16::MAX`, indexes into this table widen to 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Describe a table with `rows` rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Row counts, heap-index widths and coded-index widths of one image.
///
/// Shared by reference (`TableInfoRef`) between every table and row decoder
/// of the image.
#[derive(Clone, Default)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_index_bits: Vec<u8>,
    large_str: bool,
    large_guid: bool,
    large_blob: bool,
}

/// Cheap-copy shared reference to a [`TableInfo`].
pub type TableInfoRef = Arc<TableInfo>;

impl TableInfo {
    /// Parse row counts from a tables-stream header and fix all widths.
    ///
    /// `data` is the full `#~` stream; `valid_bitvec` its valid-table mask;
    /// `heap_size_flags` the (already validated) heap width byte. Returns
    /// the info plus the stream offset where table row data begins.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the row-count array is
    /// truncated.
    pub fn new(data: &[u8], valid_bitvec: u64, heap_size_flags: u8) -> Result<(Self, usize)> {
        let mut rows = vec![TableRowInfo::default(); usize::from(TableId::MAX) + 1];
        let mut offset = 24;

        for number in 0..=TableId::MAX {
            if (valid_bitvec & (1u64 << number)) == 0 {
                continue;
            }
            let row_count = read_le_at::<u32>(data, &mut offset)?;
            rows[usize::from(number)] = TableRowInfo::new(row_count);
        }

        let mut info = TableInfo {
            rows,
            coded_index_bits: vec![0; CodedIndexType::COUNT],
            large_str: heap_size_flags & 0x1 != 0,
            large_guid: heap_size_flags & 0x2 != 0,
            large_blob: heap_size_flags & 0x4 != 0,
        };
        info.fix_coded_index_bits();

        Ok((info, offset))
    }

    /// Construct a `TableInfo` directly from `(table, row_count)` pairs.
    ///
    /// Used by unit tests and by the synthetic image builder.
    #[must_use]
    pub fn new_test(
        valid_tables: &[(TableId, u32)],
        large_str: bool,
        large_blob: bool,
        large_guid: bool,
    ) -> Self {
        let mut info = TableInfo {
            rows: vec![TableRowInfo::default(); usize::from(TableId::MAX) + 1],
            coded_index_bits: vec![0; CodedIndexType::COUNT],
            large_str,
            large_guid,
            large_blob,
        };

        for (table, row_count) in valid_tables {
            info.rows[*table as usize] = TableRowInfo::new(*row_count);
        }

        info.fix_coded_index_bits();
        info
    }

    /// Row metadata of `table`.
    #[must_use]
    pub fn get(&self, table: TableId) -> &TableRowInfo {
        &self.rows[table as usize]
    }

    /// Row count of `table` (0 when absent).
    #[must_use]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.rows[table as usize].rows
    }

    /// Returns `true` if indexes into `table` are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self, table: TableId) -> bool {
        self.rows[table as usize].is_large
    }

    /// Byte width of an index into `table`.
    #[must_use]
    pub fn table_index_bytes(&self, table: TableId) -> u8 {
        if self.is_large(table) {
            4
        } else {
            2
        }
    }

    /// Returns `true` if `#Strings` offsets are 4 bytes wide.
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.large_str
    }

    /// Returns `true` if `#GUID` indexes are 4 bytes wide.
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.large_guid
    }

    /// Returns `true` if `#Blob` offsets are 4 bytes wide.
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.large_blob
    }

    /// Byte width of `#Strings` offsets.
    #[must_use]
    pub fn str_bytes(&self) -> u8 {
        if self.large_str {
            4
        } else {
            2
        }
    }

    /// Byte width of `#GUID` indexes.
    #[must_use]
    pub fn guid_bytes(&self) -> u8 {
        if self.large_guid {
            4
        } else {
            2
        }
    }

    /// Byte width of `#Blob` offsets.
    #[must_use]
    pub fn blob_bytes(&self) -> u8 {
        if self.large_blob {
            4
        } else {
            2
        }
    }

    /// Bit width fixed for coded indexes of family `ci_type`.
    #[must_use]
    pub fn coded_index_bits(&self, ci_type: CodedIndexType) -> u8 {
        self.coded_index_bits[ci_type as usize]
    }

    /// Byte width fixed for coded indexes of family `ci_type`.
    #[must_use]
    pub fn coded_index_bytes(&self, ci_type: CodedIndexType) -> u8 {
        if self.coded_index_bits(ci_type) > 16 {
            4
        } else {
            2
        }
    }

    /// Fix the width of every coded-index family from the (now complete)
    /// row counts: tag bits plus the bits of the largest candidate table.
    fn fix_coded_index_bits(&mut self) {
        for ci_type in CodedIndexType::iter() {
            let max_bits = ci_type
                .tables()
                .iter()
                .map(|table| self.rows[*table as usize].bits)
                .max()
                .unwrap_or(1);
            self.coded_index_bits[ci_type as usize] = max_bits + ci_type.tag_bits();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_info_bit_widths() {
        assert_eq!(TableRowInfo::new(0).bits, 1);
        assert_eq!(TableRowInfo::new(1).bits, 1);
        assert_eq!(TableRowInfo::new(255).bits, 8);
        assert!(!TableRowInfo::new(0xFFFF).is_large);
        assert!(TableRowInfo::new(0x10000).is_large);
    }

    #[test]
    fn coded_index_widens_with_candidate_table() {
        // TypeDefOrRef has 2 tag bits: > 2^14 rows in any candidate table
        // widens the column to 4 bytes.
        let small = TableInfo::new_test(&[(TableId::TypeDef, 0x3FFF)], false, false, false);
        assert_eq!(small.coded_index_bytes(CodedIndexType::TypeDefOrRef), 2);

        let large = TableInfo::new_test(&[(TableId::TypeDef, 0x4000)], false, false, false);
        assert_eq!(large.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);

        // The widening table does not need to be the referenced one.
        let via_spec = TableInfo::new_test(&[(TableId::TypeSpec, 0x4000)], false, false, false);
        assert_eq!(via_spec.coded_index_bytes(CodedIndexType::TypeDefOrRef), 4);
    }

    #[test]
    fn plain_table_index_widens_at_u16_max() {
        let info = TableInfo::new_test(&[(TableId::Field, 0x10000)], false, false, false);
        assert_eq!(info.table_index_bytes(TableId::Field), 4);
        assert_eq!(info.table_index_bytes(TableId::Param), 2);
    }
}
