//! Pre-scan: basic-block split points of one method body.
//!
//! Before any IR is emitted the raw instruction stream is walked once to
//! find every offset that must start a block: offset 0, every
//! branch/leave/switch target, and every exception-region boundary (try
//! start/end, handler start/end, filter start). The transform's worklist,
//! relocation and exception tables all key off this set; a control
//! transfer to an offset outside it is a structural error.

use std::collections::BTreeSet;

use crate::{
    file::io::read_le_at,
    interp::opcodes as op,
    metadata::method::{EhClauseKind, MethodBody},
    Result,
};

/// The computed split points of one body.
pub struct BasicBlockSpliter {
    /// Block start offsets, ascending; always contains 0
    splits: BTreeSet<u32>,
    /// Total code length
    code_len: u32,
}

impl BasicBlockSpliter {
    /// Scan `body` and collect its split points.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] for unknown opcodes, truncated
    /// operands or control transfers outside the body.
    pub fn split(body: &MethodBody) -> Result<BasicBlockSpliter> {
        let code = &body.code;
        let code_len = u32::try_from(code.len())
            .map_err(|_| bad_image_error!("Method body exceeds the code size range"))?;

        let mut splits = BTreeSet::new();
        splits.insert(0u32);

        let mut at = 0usize;
        while at < code.len() {
            // Conditional fall-through needs no split; linear decoding
            // continues into the same block.
            let targets = scan_instruction(code, &mut at)?;
            for target in targets {
                if target >= code_len {
                    return Err(bad_image_error!(
                        "Branch target {:#x} outside the body",
                        target
                    ));
                }
                splits.insert(target);
            }
        }
        if at != code.len() {
            return Err(bad_image_error!("Instruction overruns the body"));
        }

        for clause in &body.exception_clauses {
            let try_end = clause.try_offset + clause.try_length;
            let handler_end = clause.handler_offset + clause.handler_length;
            for boundary in [clause.try_offset, clause.handler_offset] {
                if boundary >= code_len {
                    return Err(bad_image_error!(
                        "Exception boundary {:#x} outside the body",
                        boundary
                    ));
                }
                splits.insert(boundary);
            }
            for boundary in [try_end, handler_end] {
                if boundary > code_len {
                    return Err(bad_image_error!(
                        "Exception boundary {:#x} outside the body",
                        boundary
                    ));
                }
                if boundary < code_len {
                    splits.insert(boundary);
                }
            }
            if clause.kind == EhClauseKind::Filter {
                let filter = clause.class_token_or_filter_offset;
                if filter >= code_len {
                    return Err(bad_image_error!(
                        "Filter start {:#x} outside the body",
                        filter
                    ));
                }
                splits.insert(filter);
            }
        }

        Ok(BasicBlockSpliter { splits, code_len })
    }

    /// Block start offsets, ascending.
    #[must_use]
    pub fn split_offsets(&self) -> &BTreeSet<u32> {
        &self.splits
    }

    /// Returns `true` if `offset` starts a block.
    #[must_use]
    pub fn is_split(&self, offset: u32) -> bool {
        self.splits.contains(&offset)
    }

    /// Total code length.
    #[must_use]
    pub fn code_len(&self) -> u32 {
        self.code_len
    }
}

/// Advance past one instruction, returning any branch targets.
#[allow(clippy::too_many_lines)]
fn scan_instruction(code: &[u8], at: &mut usize) -> Result<Vec<u32>> {
    let opcode = code[*at];
    *at += 1;

    let mut targets = Vec::new();
    match opcode {
        // No operand.
        op::NOP
        | op::BREAK
        | op::LDARG_0..=op::STLOC_3
        | op::LDNULL
        | op::LDC_I4_M1..=op::LDC_I4_8
        | op::DUP
        | op::POP
        | op::RET
        | op::LDIND_I1..=op::STIND_R8
        | op::ADD..=op::CONV_U8
        | op::CONV_R_UN
        | op::THROW
        | op::CONV_OVF_I1_UN..=op::CONV_OVF_U_UN
        | op::LDLEN
        | op::LDELEM_I1..=op::STELEM_REF
        | op::CONV_OVF_I1..=op::CONV_OVF_U8
        | op::CKFINITE
        | op::CONV_U2
        | op::CONV_U1
        | op::CONV_I
        | op::CONV_OVF_I
        | op::CONV_OVF_U
        | op::ADD_OVF..=op::SUB_OVF_UN
        | op::ENDFINALLY
        | op::STIND_I
        | op::CONV_U => {}

        // 1-byte operand.
        op::LDARG_S | op::LDARGA_S | op::STARG_S | op::LDLOC_S | op::LDLOCA_S | op::STLOC_S
        | op::LDC_I4_S => {
            advance(code, at, 1)?;
        }

        // 4-byte operand (constants and tokens).
        op::LDC_I4
        | op::LDC_R4
        | op::JMP
        | op::CALL
        | op::CALLI
        | op::CALLVIRT
        | op::CPOBJ
        | op::LDOBJ
        | op::LDSTR
        | op::NEWOBJ
        | op::CASTCLASS
        | op::ISINST
        | op::UNBOX
        | op::LDFLD
        | op::LDFLDA
        | op::STFLD
        | op::LDSFLD
        | op::LDSFLDA
        | op::STSFLD
        | op::STOBJ
        | op::BOX
        | op::NEWARR
        | op::LDELEMA
        | op::LDELEM
        | op::STELEM
        | op::UNBOX_ANY
        | op::REFANYVAL
        | op::MKREFANY
        | op::LDTOKEN => {
            advance(code, at, 4)?;
        }

        // 8-byte operand.
        op::LDC_I8 | op::LDC_R8 => {
            advance(code, at, 8)?;
        }

        // Short branches: 1-byte signed displacement from the next
        // instruction.
        op::BR_S..=op::BLT_UN_S | op::LEAVE_S => {
            let displacement = i32::from(read_le_at::<i8>(code, at)?);
            targets.push(relative_target(*at, displacement)?);
        }

        // Long branches: 4-byte signed displacement.
        op::BR..=op::BLT_UN | op::LEAVE => {
            let displacement = read_le_at::<i32>(code, at)?;
            targets.push(relative_target(*at, displacement)?);
        }

        op::SWITCH => {
            let count = read_le_at::<u32>(code, at)? as usize;
            let end = *at + count * 4;
            if end > code.len() {
                return Err(out_of_bounds_error!());
            }
            let mut case_at = *at;
            *at = end;
            for _ in 0..count {
                let displacement = read_le_at::<i32>(code, &mut case_at)?;
                targets.push(relative_target(end, displacement)?);
            }
        }

        op::PREFIX => {
            let extended = code
                .get(*at)
                .copied()
                .ok_or(crate::Error::OutOfBounds)?;
            *at += 1;
            match extended {
                op::ext::ARGLIST
                | op::ext::CEQ..=op::ext::CLT_UN
                | op::ext::LOCALLOC
                | op::ext::VOLATILE
                | op::ext::TAIL
                | op::ext::CPBLK
                | op::ext::INITBLK
                | op::ext::RETHROW
                | op::ext::REFANYTYPE
                | op::ext::READONLY => {}
                op::ext::ENDFILTER => {}
                op::ext::UNALIGNED => {
                    advance(code, at, 1)?;
                }
                op::ext::LDARG | op::ext::LDARGA | op::ext::STARG | op::ext::LDLOC
                | op::ext::LDLOCA | op::ext::STLOC => {
                    advance(code, at, 2)?;
                }
                op::ext::LDFTN
                | op::ext::LDVIRTFTN
                | op::ext::INITOBJ
                | op::ext::CONSTRAINED
                | op::ext::SIZEOF => {
                    advance(code, at, 4)?;
                }
                other => {
                    return Err(bad_image_error!("Unknown extended opcode 0xFE {:#04x}", other));
                }
            }
        }

        other => {
            return Err(bad_image_error!("Unknown opcode {:#04x}", other));
        }
    }
    Ok(targets)
}

fn advance(code: &[u8], at: &mut usize, by: usize) -> Result<()> {
    if *at + by > code.len() {
        return Err(out_of_bounds_error!());
    }
    *at += by;
    Ok(())
}

fn relative_target(next: usize, displacement: i32) -> Result<u32> {
    let target = i64::try_from(next).unwrap_or(i64::MAX) + i64::from(displacement);
    u32::try_from(target).map_err(|_| bad_image_error!("Branch target {:#x} out of range", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::MethodBody;

    fn body_of(code: &[u8]) -> MethodBody {
        MethodBody {
            flags: crate::metadata::method::MethodBodyFlags::empty(),
            max_stack: 8,
            code: code.to_vec(),
            local_var_sig_token: 0,
            locals: std::sync::OnceLock::new(),
            exception_clauses: Vec::new(),
        }
    }

    #[test]
    fn collects_branch_targets() {
        // 0: br.s +2 (-> 4); 2: ldc.i4.0; 3: pop; 4: ret
        let code = [op::BR_S, 0x02, op::LDC_I4_0, op::POP, op::RET];
        let splits = BasicBlockSpliter::split(&body_of(&code)).unwrap();
        assert!(splits.is_split(0));
        assert!(splits.is_split(4));
        assert!(!splits.is_split(2));
    }

    #[test]
    fn switch_targets_are_relative_to_instruction_end() {
        // switch with 1 case of displacement 1, end of instruction at 9.
        let code = [
            op::SWITCH,
            0x01,
            0x00,
            0x00,
            0x00,
            0x01,
            0x00,
            0x00,
            0x00,
            op::NOP,
            op::NOP,
            op::RET,
        ];
        let splits = BasicBlockSpliter::split(&body_of(&code)).unwrap();
        assert!(splits.is_split(10));
    }

    #[test]
    fn rejects_out_of_body_targets() {
        let code = [op::BR_S, 0x20, op::RET];
        assert!(BasicBlockSpliter::split(&body_of(&code)).is_err());
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let code = [0xC0];
        assert!(BasicBlockSpliter::split(&body_of(&code)).is_err());
    }
}
