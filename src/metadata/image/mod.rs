//! The raw image parser: from bytes to located heaps and sized tables.
//!
//! [`RawImage::load`] performs the full structural validation pass over a
//! module image. The order is fixed and every check failure is a
//! [`crate::Error::BadImage`]:
//!
//! 1. Container walk: `e_lfanew`, `PE\0\0` signature, one of the two known
//!    optional-header sizes (224 for PE32, 240 for PE32+), the runtime
//!    header directory entry, section-table RVA translation.
//! 2. Metadata root (`BSJB` signature) and the named stream directory.
//! 3. Whole-heap validation of `#Strings`, `#US`, `#GUID` and `#Blob`.
//! 4. The tables stream: version and flag checks, row counts for every
//!    present table, and only then per-table row widths (coded-index
//!    widths need every candidate table's row count).
//!
//! After `load` the image is immutable. Row access is 1-based
//! `base + width * (row - 1)`, bounds-checked in [`RawImage::table`].

mod pe;

use std::ops::Range;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::{
        streams::{Blob, Guid, StreamHeader, Strings, UserStrings},
        tables::{
            rows::row_size_of, MetadataTable, RowDefinition, TableId, TableInfo, TableInfoRef,
        },
        token::Token,
    },
    Result,
};

pub use pe::SectionHeader;

/// Metadata root signature: `BSJB`.
const METADATA_SIGNATURE: u32 = 0x424A_5342;

/// Location of one present table inside the tables stream.
#[derive(Clone, Copy, Default)]
struct TableSlot {
    /// Absolute image offset of the first row
    offset: usize,
    /// Number of rows
    rows: u32,
    /// Bytes per row
    row_size: u32,
    /// Whether the table appears in the valid mask
    present: bool,
}

/// A fully validated module image: raw bytes plus located heaps and sized
/// tables.
///
/// Owns nothing but offsets and counts; all accessors slice the caller's
/// byte buffer on demand. Lifetime of the borrowed data equals the module
/// lifetime by construction (the owning module holds the backing
/// [`crate::File`]).
pub struct RawImage<'data> {
    data: &'data [u8],
    sections: Vec<SectionHeader>,
    info: TableInfoRef,
    slots: Vec<TableSlot>,
    strings_range: Range<usize>,
    blob_range: Range<usize>,
    guid_range: Range<usize>,
    us_range: Range<usize>,
    entry_point_token: u32,
}

impl<'data> RawImage<'data> {
    /// Validate `data` as a module image and locate all metadata.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for any structural violation,
    /// [`crate::Error::NotSupported`] for recognized-but-unsupported
    /// shapes (PDB or edit-and-continue tables, extra heap-flag bits) and
    /// [`crate::Error::Empty`] for an empty buffer.
    pub fn load(data: &'data [u8]) -> Result<RawImage<'data>> {
        if data.is_empty() {
            return Err(crate::Error::Empty);
        }

        let pe = pe::PeInfo::parse(data)?;
        let meta_offset = pe.translate_rva(pe.metadata_rva)?;
        if meta_offset >= data.len() {
            return Err(bad_image_error!("Metadata root offset out of range"));
        }

        let meta = &data[meta_offset..];
        if meta.len() < 20 {
            return Err(bad_image_error!("Metadata root shorter than its header"));
        }
        if read_le::<u32>(meta)? != METADATA_SIGNATURE {
            return Err(bad_image_error!("Invalid metadata root signature"));
        }

        // Root: sig(4) major(2) minor(2) reserved(4) length(4) version[length]
        // flags(2) stream_count(2), with the version blob already padded.
        let version_length = read_le::<u32>(&meta[12..])? as usize;
        let mut cursor = 16 + version_length;
        if cursor + 4 > meta.len() {
            return Err(bad_image_error!("Metadata root version overruns image"));
        }
        cursor += 2; // flags
        let stream_count = {
            let mut at = cursor;
            read_le_at::<u16>(meta, &mut at)?
        };
        cursor += 2;

        let mut tables_range = None;
        let mut strings_range = None;
        let mut us_range = None;
        let mut guid_range = None;
        let mut blob_range = None;

        for _ in 0..stream_count {
            let header = StreamHeader::read(meta, &mut cursor)?;
            if u64::from(header.offset) + u64::from(header.size) > pe.metadata_size as u64 {
                return Err(bad_image_error!(
                    "Stream '{}' overruns the metadata root",
                    header.name
                ));
            }
            let start = meta_offset + header.offset as usize;
            let range = start..start + header.size as usize;
            if range.end > data.len() {
                return Err(bad_image_error!("Stream '{}' overruns the image", header.name));
            }

            match header.name.as_str() {
                "#~" => tables_range = Some(range),
                "#Strings" => strings_range = Some(range),
                "#US" => us_range = Some(range),
                "#GUID" => {
                    if header.size % 16 != 0 {
                        return Err(bad_image_error!("#GUID heap size {} not a multiple of 16", header.size));
                    }
                    guid_range = Some(range);
                }
                "#Blob" => blob_range = Some(range),
                // Uncompressed-stream and PDB markers occur in the wild and
                // carry nothing the interpreter needs.
                "#-" | "#Pdb" => {}
                other => {
                    return Err(bad_image_error!("Unknown stream name '{}'", other));
                }
            }
        }

        let tables_range =
            tables_range.ok_or_else(|| bad_image_error!("Missing #~ tables stream"))?;
        let strings_range = strings_range.unwrap_or(0..0);
        let us_range = us_range.unwrap_or(0..0);
        let guid_range = guid_range.unwrap_or(0..0);
        let blob_range = blob_range.unwrap_or(0..0);

        // Validate the heaps in full before any row can reference them.
        if !strings_range.is_empty() {
            Strings::from(&data[strings_range.clone()])?;
        }
        if !us_range.is_empty() {
            UserStrings::from(&data[us_range.clone()])?;
        }
        Guid::from(&data[guid_range.clone()])?;
        if !blob_range.is_empty() {
            Blob::from(&data[blob_range.clone()])?;
        }

        let (info, slots) = Self::load_tables(data, tables_range)?;

        Ok(RawImage {
            data,
            sections: pe.sections,
            info: std::sync::Arc::new(info),
            slots,
            strings_range,
            blob_range,
            guid_range,
            us_range,
            entry_point_token: pe.entry_point_token,
        })
    }

    /// Parse the `#~` stream: header checks, row counts, then widths and
    /// table locations.
    fn load_tables(
        data: &[u8],
        tables_range: Range<usize>,
    ) -> Result<(TableInfo, Vec<TableSlot>)> {
        let stream = &data[tables_range.clone()];
        if stream.len() < 24 {
            return Err(bad_image_error!("#~ stream shorter than its header"));
        }

        // reserved(4) major(1) minor(1) heap_sizes(1) reserved(1)
        // valid(8) sorted(8) then row counts.
        if read_le::<u32>(stream)? != 0 {
            return Err(bad_image_error!("#~ reserved field is non-zero"));
        }
        if stream[4] != 2 || stream[5] != 0 {
            return Err(bad_image_error!(
                "Unsupported #~ version {}.{}",
                stream[4],
                stream[5]
            ));
        }
        let heap_size_flags = stream[6];
        if heap_size_flags & !0x7 != 0 {
            return Err(not_supported_error!(
                "Unsupported heap index width flags {:#x}",
                heap_size_flags
            ));
        }

        let valid = read_le::<u64>(&stream[8..])?;
        let known_mask = (1u64 << (u64::from(TableId::MAX) + 1)) - 1;
        if valid & !known_mask != 0 {
            for bit in (u64::from(TableId::MAX) + 1)..64 {
                if valid & (1u64 << bit) == 0 {
                    continue;
                }
                #[allow(clippy::cast_possible_truncation)]
                let number = bit as u8;
                if crate::metadata::tables::is_pdb_table_number(number) {
                    return Err(not_supported_error!(
                        "Portable PDB table {:#x} present",
                        number
                    ));
                }
                return Err(bad_image_error!("Unknown table {:#x} in valid mask", number));
            }
        }
        if valid & (1u64 << (TableId::EncLog as u8)) != 0
            || valid & (1u64 << (TableId::EncMap as u8)) != 0
        {
            return Err(not_supported_error!("Edit-and-continue tables present"));
        }

        // Row counts first; widths can only exist after every count is in.
        let (info, counts_end) = TableInfo::new(stream, valid, heap_size_flags)?;
        let info_ref: TableInfoRef = std::sync::Arc::new(info.clone());

        let mut slots = vec![TableSlot::default(); usize::from(TableId::MAX) + 1];
        let mut cursor = tables_range.start + counts_end;
        for number in 0..=TableId::MAX {
            if valid & (1u64 << number) == 0 {
                continue;
            }
            let Some(id) = TableId::from_number(number) else {
                return Err(bad_image_error!("Unknown table {:#x} in valid mask", number));
            };

            let rows = info.row_count(id);
            let row_size = row_size_of(id, &info_ref);
            let byte_len = u64::from(rows) * u64::from(row_size);
            if cursor as u64 + byte_len > tables_range.end as u64 {
                return Err(bad_image_error!(
                    "Table {:?} overruns the #~ stream ({} rows of {} bytes)",
                    id,
                    rows,
                    row_size
                ));
            }

            slots[usize::from(number)] = TableSlot {
                offset: cursor,
                rows,
                row_size,
                present: true,
            };
            #[allow(clippy::cast_possible_truncation)]
            {
                cursor += byte_len as usize;
            }
        }

        Ok((info, slots))
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// Width configuration of this image's tables.
    #[must_use]
    pub fn table_info(&self) -> &TableInfoRef {
        &self.info
    }

    /// Returns `true` if `id` is present in the valid mask.
    #[must_use]
    pub fn has_table(&self, id: TableId) -> bool {
        self.slots[id as usize].present
    }

    /// Row count of `id` (0 when absent).
    #[must_use]
    pub fn row_count(&self, id: TableId) -> u32 {
        self.slots[id as usize].rows
    }

    /// Access table `id` with row type `T`.
    ///
    /// An absent table yields an empty table, so iteration-style passes
    /// need no presence special-casing.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the recorded location no
    /// longer fits the buffer (cannot happen after a successful `load`).
    pub fn table<T: RowDefinition>(&self, id: TableId) -> Result<MetadataTable<'data, T>> {
        let slot = &self.slots[id as usize];
        if !slot.present {
            return MetadataTable::new(&[], 0, self.info.clone());
        }
        MetadataTable::new(&self.data[slot.offset..], slot.rows, self.info.clone())
    }

    /// Decode the row for `token`, dispatching on its table kind.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for a row index outside the
    /// table.
    pub fn row<T: RowDefinition>(&self, id: TableId, rid: u32) -> Result<T> {
        self.table::<T>(id)?.get(rid)
    }

    /// The `#Strings` heap.
    #[must_use]
    pub fn strings(&self) -> Strings<'data> {
        if self.strings_range.is_empty() {
            // A module without a #Strings stream still answers offset 0.
            return Strings::from(b"\0").unwrap_or_else(|_| unreachable!());
        }
        // Heaps were validated during load; re-wrapping cannot fail.
        Strings::from(&self.data[self.strings_range.clone()])
            .unwrap_or_else(|_| unreachable!("#Strings validated at load"))
    }

    /// Look up a `#Strings` entry directly.
    ///
    /// # Errors
    /// Propagates heap lookup failures for out-of-range offsets.
    pub fn string(&self, index: u32) -> Result<&'data str> {
        if self.strings_range.is_empty() {
            if index == 0 {
                return Ok("");
            }
            return Err(out_of_bounds_error!());
        }
        self.strings().get(index)
    }

    /// The `#Blob` heap.
    #[must_use]
    pub fn blob_heap(&self) -> Blob<'data> {
        Blob::from(&self.data[self.blob_range.clone()])
            .unwrap_or_else(|_| unreachable!("#Blob validated at load"))
    }

    /// Look up a `#Blob` entry directly.
    ///
    /// # Errors
    /// Propagates heap lookup failures for out-of-range offsets.
    pub fn blob(&self, index: u32) -> Result<&'data [u8]> {
        if self.blob_range.is_empty() && index == 0 {
            return Ok(&[]);
        }
        self.blob_heap().get(index)
    }

    /// The `#US` heap.
    #[must_use]
    pub fn user_strings(&self) -> UserStrings<'data> {
        UserStrings::from(&self.data[self.us_range.clone()])
            .unwrap_or_else(|_| unreachable!("#US validated at load"))
    }

    /// The `#GUID` heap.
    #[must_use]
    pub fn guids(&self) -> Guid<'data> {
        Guid::from(&self.data[self.guid_range.clone()])
            .unwrap_or_else(|_| unreachable!("#GUID validated at load"))
    }

    /// Entry point token from the runtime header (0 if none).
    #[must_use]
    pub fn entry_point_token(&self) -> Option<Token> {
        if self.entry_point_token == 0 {
            None
        } else {
            Some(Token::new(self.entry_point_token))
        }
    }

    /// Translate an RVA to an image offset through the section table.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if no section covers `rva`.
    pub fn translate_rva(&self, rva: u32) -> Result<usize> {
        pe::translate_rva(&self.sections, self.data.len(), rva)
    }

    /// The image bytes starting at `rva`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if `rva` is not mapped.
    pub fn data_at_rva(&self, rva: u32) -> Result<&'data [u8]> {
        let offset = self.translate_rva(rva)?;
        Ok(&self.data[offset..])
    }
}
