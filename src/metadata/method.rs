//! Raw method bodies: tiny/fat headers, code bytes and exception-handling
//! sections.
//!
//! A body is parsed structurally when its module loads; the local-variable
//! signature is decoded separately by the projection (it needs the
//! signature reader and the method's generic context) and published onto
//! the parsed body.

use std::sync::OnceLock;

use bitflags::bitflags;

use crate::{
    file::{io::read_le_at, parser::Parser},
    metadata::typesystem::TyRef,
    Result,
};

bitflags! {
    /// Method body header flags (fat format).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Fat header marker (low two bits == 0x3)
        const FAT = 0x0003;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x0008;
        /// Locals are zero-initialized on entry
        const INIT_LOCALS = 0x0010;
    }
}

bitflags! {
    /// Data-section kind flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Section is an exception-handling table
        const EH_TABLE = 0x01;
        /// Section uses the fat layout
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}

/// Exception-clause kinds, as encoded in the handler sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EhClauseKind {
    /// Typed catch handler
    Exception,
    /// Filter handler (filter code precedes the handler)
    Filter,
    /// Finally handler
    Finally,
    /// Fault handler (finally that only runs on exceptional exit)
    Fault,
}

impl EhClauseKind {
    fn from_flags(flags: u32) -> Result<EhClauseKind> {
        match flags {
            0 => Ok(EhClauseKind::Exception),
            1 => Ok(EhClauseKind::Filter),
            2 => Ok(EhClauseKind::Finally),
            4 => Ok(EhClauseKind::Fault),
            other => Err(bad_image_error!("Unknown exception clause kind {}", other)),
        }
    }
}

/// One raw exception clause, in IL byte offsets.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionClause {
    /// Handler kind
    pub kind: EhClauseKind,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Catch type token (Exception) or filter start offset (Filter);
    /// must be 0 for finally/fault
    pub class_token_or_filter_offset: u32,
}

/// A parsed raw method body.
pub struct MethodBody {
    /// Header flags (synthesized for tiny bodies)
    pub flags: MethodBodyFlags,
    /// Declared operand stack depth bound
    pub max_stack: u32,
    /// The raw instruction bytes
    pub code: Vec<u8>,
    /// Local-variable signature token (0 when there are no locals)
    pub local_var_sig_token: u32,
    /// Resolved local-variable types, published by the projection
    pub locals: OnceLock<Vec<TyRef>>,
    /// Exception clauses in section order
    pub exception_clauses: Vec<ExceptionClause>,
}

impl MethodBody {
    /// Parse a method body starting at `data[0]`.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for malformed headers or
    /// exception sections and [`crate::Error::OutOfBounds`] for
    /// truncation.
    pub fn parse(data: &[u8]) -> Result<MethodBody> {
        let mut parser = Parser::new(data);
        let first = parser.read_le::<u8>()?;

        match first & 0x3 {
            // Tiny: code length in the upper six bits, fixed maximums.
            0x2 => {
                let code_size = usize::from(first >> 2);
                let code = parser.take(code_size)?.to_vec();
                Ok(MethodBody {
                    flags: MethodBodyFlags::empty(),
                    max_stack: 8,
                    code,
                    local_var_sig_token: 0,
                    locals: OnceLock::new(),
                    exception_clauses: Vec::new(),
                })
            }
            0x3 => Self::parse_fat(data),
            other => Err(bad_image_error!("Unknown method header kind {:#x}", other)),
        }
    }

    fn parse_fat(data: &[u8]) -> Result<MethodBody> {
        let mut at = 0usize;
        let flags_and_size = read_le_at::<u16>(data, &mut at)?;
        let header_dwords = (flags_and_size >> 12) & 0xF;
        if header_dwords != 3 {
            return Err(bad_image_error!(
                "Fat method header declares {} dwords",
                header_dwords
            ));
        }
        let flags = MethodBodyFlags::from_bits_truncate(flags_and_size & 0x0FFF);

        let max_stack = u32::from(read_le_at::<u16>(data, &mut at)?);
        let code_size = read_le_at::<u32>(data, &mut at)? as usize;
        let local_var_sig_token = read_le_at::<u32>(data, &mut at)?;

        let code_start = at;
        let code_end = code_start
            .checked_add(code_size)
            .ok_or(crate::Error::OutOfBounds)?;
        if code_end > data.len() {
            return Err(out_of_bounds_error!());
        }
        let code = data[code_start..code_end].to_vec();

        let mut exception_clauses = Vec::new();
        if flags.contains(MethodBodyFlags::MORE_SECTS) {
            // Sections are 4-aligned relative to the body start.
            let mut section_at = (code_end + 3) & !3;
            loop {
                if section_at >= data.len() {
                    return Err(out_of_bounds_error!());
                }
                let kind = SectionFlags::from_bits_truncate(data[section_at]);
                if !kind.contains(SectionFlags::EH_TABLE) {
                    return Err(not_supported_error!(
                        "Unknown method data section kind {:#x}",
                        data[section_at]
                    ));
                }

                if kind.contains(SectionFlags::FAT_FORMAT) {
                    let mut at = section_at;
                    let header = read_le_at::<u32>(data, &mut at)?;
                    let data_size = (header >> 8) as usize;
                    if data_size % 24 != 4 {
                        return Err(bad_image_error!(
                            "Fat EH section size {} not 24n+4",
                            data_size
                        ));
                    }
                    for _ in 0..(data_size - 4) / 24 {
                        let clause_flags = read_le_at::<u32>(data, &mut at)?;
                        exception_clauses.push(ExceptionClause {
                            kind: EhClauseKind::from_flags(clause_flags)?,
                            try_offset: read_le_at::<u32>(data, &mut at)?,
                            try_length: read_le_at::<u32>(data, &mut at)?,
                            handler_offset: read_le_at::<u32>(data, &mut at)?,
                            handler_length: read_le_at::<u32>(data, &mut at)?,
                            class_token_or_filter_offset: read_le_at::<u32>(data, &mut at)?,
                        });
                    }
                    section_at += data_size;
                } else {
                    let mut at = section_at + 1;
                    let data_size = usize::from(read_le_at::<u8>(data, &mut at)?);
                    at += 2; // reserved
                    if data_size % 12 != 4 {
                        return Err(bad_image_error!(
                            "Small EH section size {} not 12n+4",
                            data_size
                        ));
                    }
                    for _ in 0..(data_size - 4) / 12 {
                        let clause_flags = u32::from(read_le_at::<u16>(data, &mut at)?);
                        let try_offset = u32::from(read_le_at::<u16>(data, &mut at)?);
                        let try_length = u32::from(read_le_at::<u8>(data, &mut at)?);
                        let handler_offset = u32::from(read_le_at::<u16>(data, &mut at)?);
                        let handler_length = u32::from(read_le_at::<u8>(data, &mut at)?);
                        let class_token = read_le_at::<u32>(data, &mut at)?;
                        exception_clauses.push(ExceptionClause {
                            kind: EhClauseKind::from_flags(clause_flags)?,
                            try_offset,
                            try_length,
                            handler_offset,
                            handler_length,
                            class_token_or_filter_offset: class_token,
                        });
                    }
                    section_at += data_size;
                }

                if !kind.contains(SectionFlags::MORE_SECTS) {
                    break;
                }
            }
        }

        Ok(MethodBody {
            flags,
            max_stack,
            code,
            local_var_sig_token,
            locals: OnceLock::new(),
            exception_clauses,
        })
    }

    /// Returns `true` when locals must be zero-initialized.
    #[must_use]
    pub fn init_locals(&self) -> bool {
        self.flags.contains(MethodBodyFlags::INIT_LOCALS)
    }

    /// Resolved local types (empty until the projection publishes them).
    #[must_use]
    pub fn local_types(&self) -> &[TyRef] {
        self.locals.get().map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_body() {
        // 2 bytes of code: size 2 -> header (2 << 2) | 0x2 = 0x0A
        let data = [0x0A, 0x00, 0x2A];
        let body = MethodBody::parse(&data).unwrap();
        assert_eq!(body.code, &[0x00, 0x2A]);
        assert_eq!(body.max_stack, 8);
        assert!(body.exception_clauses.is_empty());
    }

    #[test]
    fn fat_body_with_small_eh_section() {
        let mut data = vec![
            0x1B, 0x30, // flags: fat | more_sects | init_locals, size 3
            0x04, 0x00, // max_stack
            0x05, 0x00, 0x00, 0x00, // code_size
            0x00, 0x00, 0x00, 0x00, // local_var_sig_token
            0x00, 0x00, 0x00, 0x00, 0x2A, // code (5 bytes)
        ];
        // pad to 4-byte boundary (body starts at 0; code ends at 17)
        while data.len() % 4 != 0 {
            data.push(0);
        }
        data.extend_from_slice(&[
            0x01, 0x10, 0x00, 0x00, // kind=EH, size=16, reserved
            0x00, 0x00, // flags: exception
            0x00, 0x00, // try_offset
            0x02, // try_length
            0x02, 0x00, // handler_offset
            0x03, // handler_length
            0x01, 0x00, 0x00, 0x02, // class token 0x02000001
        ]);

        let body = MethodBody::parse(&data).unwrap();
        assert!(body.init_locals());
        assert_eq!(body.max_stack, 4);
        assert_eq!(body.code.len(), 5);
        assert_eq!(body.exception_clauses.len(), 1);
        let clause = &body.exception_clauses[0];
        assert_eq!(clause.kind, EhClauseKind::Exception);
        assert_eq!(clause.try_length, 2);
        assert_eq!(clause.handler_offset, 2);
        assert_eq!(clause.class_token_or_filter_offset, 0x0200_0001);
    }

    #[test]
    fn rejects_bad_header_dword_count() {
        let data = [0x03, 0x40, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(MethodBody::parse(&data).is_err());
    }
}
