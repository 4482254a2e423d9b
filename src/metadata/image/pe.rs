//! Minimal container (PE) walk: exactly what locating the embedded
//! metadata root requires, with the original loader's validation points.

use crate::{file::io::read_le_at, Result};

/// Offset of `e_lfanew` in the DOS stub.
const LFANEW_OFFSET: usize = 0x3C;
/// Optional header size of a PE32 image.
const OPTIONAL_HEADER_SIZE_32: u16 = 224;
/// Optional header size of a PE32+ image.
const OPTIONAL_HEADER_SIZE_64: u16 = 240;
/// Runtime-header directory entry offset within the PE32 optional header.
const CLI_HEADER_OFFSET_32: usize = 208;
/// Runtime-header directory entry offset within the PE32+ optional header.
const CLI_HEADER_OFFSET_64: usize = 224;

/// One section-table entry, reduced to the fields RVA translation needs.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    /// Virtual address the section is mapped at
    pub virtual_address: u32,
    /// Mapped size of the section
    pub virtual_size: u32,
    /// File offset of the section's raw data
    pub raw_data_offset: u32,
}

/// Everything the metadata loader needs from the container headers.
pub(crate) struct PeInfo {
    /// Parsed section table, in file order
    pub sections: Vec<SectionHeader>,
    /// RVA of the metadata root
    pub metadata_rva: u32,
    /// Declared size of the metadata root
    pub metadata_size: u32,
    /// Managed entry point token (0 for libraries)
    pub entry_point_token: u32,
}

impl PeInfo {
    /// Walk the container headers down to the runtime header.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] at the first failed validation
    /// point: bad `e_lfanew`, missing `PE\0\0`, an optional header size
    /// other than the two known ones, or an unmappable directory entry.
    pub fn parse(data: &[u8]) -> Result<PeInfo> {
        let mut at = LFANEW_OFFSET;
        let lfanew = read_le_at::<u32>(data, &mut at)? as usize;
        if lfanew >= data.len() {
            return Err(bad_image_error!("e_lfanew {:#x} out of range", lfanew));
        }

        at = lfanew;
        let signature = read_le_at::<u32>(data, &mut at)?;
        if signature != 0x0000_4550 {
            return Err(bad_image_error!("Missing PE signature"));
        }

        // COFF header: machine(2) sections(2) timestamp(4) symtab(4)
        // symcount(4) optional_size(2) characteristics(2)
        let _machine = read_le_at::<u16>(data, &mut at)?;
        let section_count = read_le_at::<u16>(data, &mut at)?;
        at += 12;
        let optional_size = read_le_at::<u16>(data, &mut at)?;
        let _characteristics = read_le_at::<u16>(data, &mut at)?;

        let is_pe32 = match optional_size {
            OPTIONAL_HEADER_SIZE_32 => true,
            OPTIONAL_HEADER_SIZE_64 => false,
            other => {
                return Err(bad_image_error!("Unexpected optional header size {}", other));
            }
        };

        let optional_start = at;
        let cli_entry = optional_start
            + if is_pe32 {
                CLI_HEADER_OFFSET_32
            } else {
                CLI_HEADER_OFFSET_64
            };

        let mut at_entry = cli_entry;
        let cli_rva = read_le_at::<u32>(data, &mut at_entry)?;
        let _cli_size = read_le_at::<u32>(data, &mut at_entry)?;

        let mut sections = Vec::with_capacity(usize::from(section_count));
        let mut section_at = optional_start + usize::from(optional_size);
        for _ in 0..section_count {
            // name(8) virtual_size(4) virtual_address(4) raw_size(4)
            // raw_offset(4) ... 40 bytes total
            let entry_start = section_at;
            section_at += 8;
            let virtual_size = read_le_at::<u32>(data, &mut section_at)?;
            let virtual_address = read_le_at::<u32>(data, &mut section_at)?;
            let _raw_size = read_le_at::<u32>(data, &mut section_at)?;
            let raw_data_offset = read_le_at::<u32>(data, &mut section_at)?;
            section_at = entry_start + 40;
            if section_at > data.len() {
                return Err(bad_image_error!("Section table overruns image"));
            }

            sections.push(SectionHeader {
                virtual_address,
                virtual_size,
                raw_data_offset,
            });
        }

        let cli_offset = translate_rva(&sections, data.len(), cli_rva)?;
        if cli_offset >= data.len() {
            return Err(bad_image_error!("Runtime header offset out of range"));
        }

        // Runtime header: cb(4) major(2) minor(2) metadata rva(4) size(4)
        // flags(4) entry_point(4) ...
        let mut cli_at = cli_offset + 8;
        let metadata_rva = read_le_at::<u32>(data, &mut cli_at)?;
        let metadata_size = read_le_at::<u32>(data, &mut cli_at)?;
        let _flags = read_le_at::<u32>(data, &mut cli_at)?;
        let entry_point_token = read_le_at::<u32>(data, &mut cli_at)?;

        Ok(PeInfo {
            sections,
            metadata_rva,
            metadata_size,
            entry_point_token,
        })
    }

    /// Translate `rva` through this image's section table.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if no section covers `rva`.
    pub fn translate_rva(&self, rva: u32) -> Result<usize> {
        // Length bound re-checked by the caller against its own buffer.
        translate_rva(&self.sections, usize::MAX, rva)
    }
}

/// Map an RVA onto a file offset via the section that covers it.
///
/// # Errors
/// Returns [`crate::Error::BadImage`] if no section covers `rva` or the
/// resulting offset is outside the image.
pub fn translate_rva(sections: &[SectionHeader], image_len: usize, rva: u32) -> Result<usize> {
    for section in sections {
        if section.virtual_address <= rva
            && u64::from(rva) < u64::from(section.virtual_address) + u64::from(section.virtual_size)
        {
            let offset =
                section.raw_data_offset as usize + (rva - section.virtual_address) as usize;
            if offset >= image_len {
                return Err(bad_image_error!("RVA {:#x} maps outside the image", rva));
            }
            return Ok(offset);
        }
    }
    Err(bad_image_error!("RVA {:#x} not covered by any section", rva))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rva_translation_picks_covering_section() {
        let sections = [
            SectionHeader {
                virtual_address: 0x2000,
                virtual_size: 0x1000,
                raw_data_offset: 0x200,
            },
            SectionHeader {
                virtual_address: 0x4000,
                virtual_size: 0x800,
                raw_data_offset: 0x1200,
            },
        ];
        assert_eq!(translate_rva(&sections, usize::MAX, 0x2004).unwrap(), 0x204);
        assert_eq!(
            translate_rva(&sections, usize::MAX, 0x4100).unwrap(),
            0x1300
        );
        assert!(translate_rva(&sections, usize::MAX, 0x1000).is_err());
        assert!(translate_rva(&sections, 0x210, 0x2014).is_err());
    }
}
