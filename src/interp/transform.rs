//! The bytecode-to-IR compiler.
//!
//! One pass over the raw instruction stream, driven by a pending-flow
//! worklist: linear decoding proceeds until a terminator (return, branch,
//! throw, leave, end-of-handler), then resumes at the next pending branch
//! target with that target's recorded stack shape. A block reached twice
//! is skipped; the first arrival's stack shape wins, relying on (and not
//! re-verifying) the producing compiler's guarantee that predecessors
//! agree.
//!
//! Instruction selection is a total match over (opcode, operand category,
//! resolved target shape); anything outside the table is a fatal
//! `BadImage`/`NotSupported`, never a best-effort translation. After all
//! blocks are emitted, branch targets, switch cases and exception-clause
//! boundaries are patched from IL offsets to final linear IR offsets.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    file::io::read_le_at,
    interp::{
        basicblock::BasicBlockSpliter,
        engine::{slots_of, EvalEntry, EvalStackKind},
        instruction::{
            ArgDesc, BinOp, CmpOp, InterpMethodInfo, IrExceptionClause, IrInst, MemKind, NumKind,
            ResolvedData,
        },
        opcodes as op,
    },
    metadata::{
        method::{EhClauseKind, MethodBody},
        module::{InterpModule, ResolvedMethod},
        token::Token,
        typesystem::{
            GenericContainerRef, GenericContext, MethodHandle, Ty, TyRef,
        },
    },
    Result,
};

/// Hard bound on frame slots (arguments + locals + evaluation stack).
const MAX_FRAME_SLOTS: u32 = 0xFFFF;
/// Hard bound on a single value's byte size.
const MAX_VALUE_SIZE: u32 = 0xFFFF;

/// Transform `method`'s raw body into its IR descriptor.
///
/// # Errors
/// Returns [`crate::Error::BadImage`] for bytecode-format violations and
/// structural mismatches, [`crate::Error::NotSupported`] for recognized
/// but unimplemented shapes, and [`crate::Error::LimitExceeded`] when a
/// frame or value bound is exceeded. All are fatal to this method.
pub fn transform(module: &InterpModule, method: &MethodHandle) -> Result<InterpMethodInfo> {
    let Some(Some(body)) = method.body.get().map(Clone::clone) else {
        return Err(bad_image_error!(
            "Method {} has no body to transform",
            method.full_name()
        ));
    };

    let mut transformer = Transformer::new(module, method, &body)?;
    transformer.run()?;
    transformer.finish()
}

struct Block {
    il_start: u32,
    insts: Vec<IrInst>,
    code_offset: u32,
    visited: bool,
    in_pending: bool,
}

struct Flow {
    offset: u32,
    stack: Vec<EvalEntry>,
    cur_slots: u32,
}

struct Transformer<'m> {
    module: &'m InterpModule,
    method: MethodHandle,
    body: Arc<MethodBody>,
    class_ctx: Option<GenericContainerRef>,
    method_ctx: Option<GenericContainerRef>,
    context: GenericContext,

    blocks: Vec<Block>,
    ip2block: Vec<usize>,
    cur_block: usize,

    args: Vec<ArgDesc>,
    arg_slots: u32,
    local_slot_of: Vec<u16>,
    local_tys: Vec<TyRef>,
    local_slots: u32,
    eval_base: u32,

    stack: Vec<EvalEntry>,
    cur_slots: u32,
    max_slots: u32,

    pending: Vec<Flow>,
    next_flow: usize,

    data: Vec<ResolvedData>,
    data_index: HashMap<DataKey, u32>,
    switch_patches: Vec<u32>,

    clauses: Vec<IrExceptionClause>,

    prefix_volatile: bool,
    constrained: Option<u32>,
}

/// Identity keys for resolved-data deduplication.
#[derive(PartialEq, Eq, Hash)]
enum DataKey {
    Token(u32),
    String(u32),
    Sig(u32),
}

impl<'m> Transformer<'m> {
    fn new(
        module: &'m InterpModule,
        method: &MethodHandle,
        body: &Arc<MethodBody>,
    ) -> Result<Transformer<'m>> {
        let splitter = BasicBlockSpliter::split(body)?;
        let code_len = splitter.code_len() as usize;

        let mut blocks: Vec<Block> = splitter
            .split_offsets()
            .iter()
            .map(|start| Block {
                il_start: *start,
                insts: Vec::new(),
                code_offset: 0,
                visited: false,
                in_pending: false,
            })
            .collect();
        if blocks.is_empty() {
            blocks.push(Block {
                il_start: 0,
                insts: Vec::new(),
                code_offset: 0,
                visited: false,
                in_pending: false,
            });
        }

        let mut ip2block = vec![0usize; code_len + 1];
        for (index, block) in blocks.iter().enumerate() {
            let end = blocks
                .get(index + 1)
                .map_or(code_len, |next| next.il_start as usize);
            for slot in ip2block
                .iter_mut()
                .take(end)
                .skip(block.il_start as usize)
            {
                *slot = index;
            }
        }
        ip2block[code_len] = blocks.len();

        let class_ctx = InterpModule::class_container_of(method);
        let method_ctx = method.generic_container.get().cloned();

        // Frame layout: arguments (this first), then locals, then the
        // evaluation stack area.
        let sig = method.sig()?.clone();
        let mut args = Vec::new();
        let mut arg_slots = 0u32;
        if sig.has_this {
            let declaring = method
                .declaring
                .get()
                .ok_or_else(|| resolution_error!("{} has no declaring type", method.full_name()))?;
            let this_ty = if declaring.is_value_type() {
                Arc::new(Ty::ByRef(declaring.byval_ty()))
            } else {
                declaring.byval_ty()
            };
            let slots = slots_of(this_ty.value_size()?);
            args.push(ArgDesc {
                ty: this_ty,
                slot: 0,
                slots,
            });
            arg_slots += u32::from(slots);
        }
        for param in &sig.params {
            let slots = slots_of(param.ty.value_size()?);
            args.push(ArgDesc {
                ty: param.ty.clone(),
                slot: u16::try_from(arg_slots).map_err(|_| frame_overflow())?,
                slots,
            });
            arg_slots += u32::from(slots);
        }

        let local_tys: Vec<TyRef> = body.local_types().to_vec();
        let mut local_slot_of = Vec::with_capacity(local_tys.len());
        let mut cursor = arg_slots;
        for local in &local_tys {
            local_slot_of.push(u16::try_from(cursor).map_err(|_| frame_overflow())?);
            cursor += u32::from(slots_of(local.value_size()?));
        }
        let eval_base = cursor;
        if eval_base > MAX_FRAME_SLOTS {
            return Err(frame_overflow());
        }

        let mut transformer = Transformer {
            module,
            method: method.clone(),
            body: body.clone(),
            class_ctx,
            method_ctx,
            context: GenericContext::default(),
            blocks,
            ip2block,
            cur_block: 0,
            args,
            arg_slots,
            local_slot_of,
            local_tys,
            local_slots: eval_base - arg_slots,
            eval_base,
            stack: Vec::new(),
            cur_slots: eval_base,
            max_slots: eval_base,
            pending: Vec::new(),
            next_flow: 0,
            data: Vec::new(),
            data_index: HashMap::new(),
            switch_patches: Vec::new(),
            clauses: Vec::new(),
            prefix_volatile: false,
            constrained: None,
        };

        transformer.seed_exception_flows(&splitter)?;
        Ok(transformer)
    }

    /// Exception clauses become worklist seeds: a typed handler and a
    /// filter each start with exactly one object reference on the stack;
    /// finally/fault handlers start empty.
    fn seed_exception_flows(&mut self, splitter: &BasicBlockSpliter) -> Result<()> {
        let clauses = self.body.exception_clauses.clone();
        for clause in &clauses {
            let try_end = clause.try_offset + clause.try_length;
            let handler_end = clause.handler_offset + clause.handler_length;

            let catch_type = match clause.kind {
                EhClauseKind::Exception => {
                    let token = Token::new(clause.class_token_or_filter_offset);
                    Some(self.module.resolve_type(
                        token,
                        self.class_ctx.as_ref(),
                        self.method_ctx.as_ref(),
                        &self.context,
                    )?)
                }
                _ => None,
            };
            let filter_start = if clause.kind == EhClauseKind::Filter {
                clause.class_token_or_filter_offset
            } else {
                0
            };

            for boundary in [clause.try_offset, clause.handler_offset] {
                if !splitter.is_split(boundary) {
                    return Err(bad_image_error!(
                        "Exception boundary {:#x} does not start a block",
                        boundary
                    ));
                }
            }

            self.clauses.push(IrExceptionClause {
                kind: clause.kind,
                try_start: clause.try_offset,
                try_end,
                handler_start: clause.handler_offset,
                handler_end,
                filter_start,
                catch_type,
            });

            let obj_entry = EvalEntry {
                kind: EvalStackKind::Obj,
                byte_size: 8,
                slot: u16::try_from(self.eval_base).map_err(|_| frame_overflow())?,
            };
            match clause.kind {
                EhClauseKind::Exception => {
                    self.push_flow(clause.handler_offset, vec![obj_entry], self.eval_base + 1);
                }
                EhClauseKind::Filter => {
                    self.push_flow(filter_start, vec![obj_entry], self.eval_base + 1);
                    self.push_flow(clause.handler_offset, vec![obj_entry], self.eval_base + 1);
                }
                EhClauseKind::Finally | EhClauseKind::Fault => {
                    self.push_flow(clause.handler_offset, Vec::new(), self.eval_base);
                }
            }
        }
        Ok(())
    }

    // ---- worklist -------------------------------------------------------

    fn push_flow(&mut self, offset: u32, stack: Vec<EvalEntry>, cur_slots: u32) {
        let block = self.ip2block[offset as usize];
        if self.blocks[block].in_pending {
            return;
        }
        self.blocks[block].in_pending = true;
        self.pending.push(Flow {
            offset,
            stack,
            cur_slots,
        });
    }

    /// Record a branch to `target` with the current stack shape.
    fn push_branch(&mut self, target: u32) {
        let stack = self.stack.clone();
        let cur = self.cur_slots;
        self.push_flow(target, stack, cur);
    }

    /// Resume at the next unvisited pending flow, restoring its stack.
    fn pop_branch(&mut self) -> Option<u32> {
        while self.next_flow < self.pending.len() {
            let flow = &self.pending[self.next_flow];
            self.next_flow += 1;
            let block = self.ip2block[flow.offset as usize];
            if self.blocks[block].visited {
                continue;
            }
            self.stack = flow.stack.clone();
            self.cur_slots = flow.cur_slots;
            // Seeded handler entries carry stack the block never pushed
            // itself; the frame must still cover them.
            self.max_slots = self.max_slots.max(flow.cur_slots);
            return Some(flow.offset);
        }
        None
    }

    // ---- stack ----------------------------------------------------------

    fn emit(&mut self, inst: IrInst) {
        self.blocks[self.cur_block].insts.push(inst);
    }

    fn new_top_slot(&self) -> Result<u16> {
        u16::try_from(self.cur_slots).map_err(|_| frame_overflow())
    }

    fn push_entry(&mut self, kind: EvalStackKind, byte_size: u32) -> Result<u16> {
        if byte_size > MAX_VALUE_SIZE {
            return Err(crate::Error::LimitExceeded(format!(
                "Value of {byte_size} bytes exceeds the value-size bound"
            )));
        }
        let slot = self.new_top_slot()?;
        self.stack.push(EvalEntry {
            kind,
            byte_size,
            slot,
        });
        self.cur_slots += u32::from(slots_of(byte_size));
        if self.cur_slots > MAX_FRAME_SLOTS {
            return Err(frame_overflow());
        }
        self.max_slots = self.max_slots.max(self.cur_slots);
        Ok(slot)
    }

    fn push_ty(&mut self, ty: &TyRef) -> Result<u16> {
        let kind = EvalStackKind::of_ty(ty);
        let byte_size = if kind == EvalStackKind::Other {
            ty.value_size()?
        } else {
            kind.default_size()
        };
        self.push_entry(kind, byte_size)
    }

    fn pop(&mut self) -> Result<EvalEntry> {
        let entry = self
            .stack
            .pop()
            .ok_or_else(|| bad_image_error!("Evaluation stack underflow"))?;
        self.cur_slots = u32::from(entry.slot);
        Ok(entry)
    }

    fn pop_n(&mut self, count: usize) -> Result<Vec<EvalEntry>> {
        if self.stack.len() < count {
            return Err(bad_image_error!(
                "Evaluation stack underflow: need {}, have {}",
                count,
                self.stack.len()
            ));
        }
        let entries = self.stack.split_off(self.stack.len() - count);
        if let Some(first) = entries.first() {
            self.cur_slots = u32::from(first.slot);
        }
        Ok(entries)
    }

    fn top(&self, depth: usize) -> Result<&EvalEntry> {
        self.stack
            .len()
            .checked_sub(1 + depth)
            .and_then(|index| self.stack.get(index))
            .ok_or_else(|| bad_image_error!("Evaluation stack underflow"))
    }

    // ---- resolved data --------------------------------------------------

    fn add_data(&mut self, key: Option<DataKey>, make: impl FnOnce() -> ResolvedData) -> u32 {
        if let Some(key) = &key {
            if let Some(existing) = self.data_index.get(key) {
                return *existing;
            }
        }
        let index = u32::try_from(self.data.len()).unwrap_or(u32::MAX);
        self.data.push(make());
        if let Some(key) = key {
            self.data_index.insert(key, index);
        }
        index
    }

    fn type_data(&mut self, token: Token) -> Result<u32> {
        let ty = self.module.resolve_type(
            token,
            self.class_ctx.as_ref(),
            self.method_ctx.as_ref(),
            &self.context,
        )?;
        Ok(self.add_data(Some(DataKey::Token(token.value())), || {
            ResolvedData::Type(ty)
        }))
    }

    fn resolve_type_operand(&mut self, token: Token) -> Result<TyRef> {
        self.module.resolve_type(
            token,
            self.class_ctx.as_ref(),
            self.method_ctx.as_ref(),
            &self.context,
        )
    }

    fn method_data(&mut self, resolved: &ResolvedMethod, token: Token) -> u32 {
        let cloned = resolved.clone();
        self.add_data(Some(DataKey::Token(token.value())), move || {
            ResolvedData::Method(cloned)
        })
    }

    fn field_data(&mut self, token: Token) -> Result<(u32, crate::metadata::typesystem::FieldHandle)> {
        let (container, field) = self.module.resolve_field(
            token,
            self.class_ctx.as_ref(),
            self.method_ctx.as_ref(),
            &self.context,
        )?;
        let field_clone = field.clone();
        let index = self.add_data(Some(DataKey::Token(token.value())), move || {
            ResolvedData::Field(container, field_clone)
        });
        Ok((index, field))
    }

    // ---- entry ----------------------------------------------------------

    fn run(&mut self) -> Result<()> {
        if self.body.init_locals() && self.local_slots > 0 {
            let base = u16::try_from(self.arg_slots).map_err(|_| frame_overflow())?;
            let slots = u16::try_from(self.local_slots).map_err(|_| frame_overflow())?;
            self.emit(IrInst::InitLocals { base, slots });
        }

        let code = self.body.code.clone();
        let mut ip = 0usize;
        let mut last_block = usize::MAX;

        'outer: loop {
            if ip > code.len() {
                return Err(bad_image_error!("Decoder ran past the body"));
            }
            if ip == code.len() {
                // Falling off the end without a terminator.
                return Err(bad_image_error!(
                    "{}: control flow reaches the end of the body",
                    self.method.full_name()
                ));
            }

            let block = self.ip2block[ip];
            if block != last_block {
                if self.blocks[block].visited {
                    // First arrival's stack shape won; skip re-decoding.
                    match self.pop_branch() {
                        Some(next) => {
                            ip = next as usize;
                            last_block = usize::MAX;
                            continue 'outer;
                        }
                        None => break 'outer,
                    }
                }
                self.blocks[block].visited = true;
                self.cur_block = block;
                last_block = block;
            }

            match self.step(&code, &mut ip)? {
                Step::Continue => {}
                Step::EndOfFlow => match self.pop_branch() {
                    Some(next) => {
                        ip = next as usize;
                        last_block = usize::MAX;
                    }
                    None => break 'outer,
                },
            }
        }
        Ok(())
    }

    // ---- the dispatch table ---------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn step(&mut self, code: &[u8], ip: &mut usize) -> Result<Step> {
        let opcode = code[*ip];
        *ip += 1;

        match opcode {
            op::NOP | op::BREAK => {}

            op::LDARG_0 | op::LDARG_1 | op::LDARG_2 | op::LDARG_3 => {
                self.load_arg(u32::from(opcode - op::LDARG_0))?;
            }
            op::LDLOC_0 | op::LDLOC_1 | op::LDLOC_2 | op::LDLOC_3 => {
                self.load_local(u32::from(opcode - op::LDLOC_0))?;
            }
            op::STLOC_0 | op::STLOC_1 | op::STLOC_2 | op::STLOC_3 => {
                self.store_local(u32::from(opcode - op::STLOC_0))?;
            }
            op::LDARG_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.load_arg(index)?;
            }
            op::LDARGA_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.load_arg_address(index)?;
            }
            op::STARG_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.store_arg(index)?;
            }
            op::LDLOC_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.load_local(index)?;
            }
            op::LDLOCA_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.load_local_address(index)?;
            }
            op::STLOC_S => {
                let index = u32::from(read_le_at::<u8>(code, ip)?);
                self.store_local(index)?;
            }

            op::LDNULL => {
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadNull { dst });
                self.push_entry(EvalStackKind::Obj, 8)?;
            }
            op::LDC_I4_M1..=op::LDC_I4_8 => {
                let value = i32::from(opcode) - i32::from(op::LDC_I4_0);
                self.load_const_i4(value)?;
            }
            op::LDC_I4_S => {
                let value = i32::from(read_le_at::<i8>(code, ip)?);
                self.load_const_i4(value)?;
            }
            op::LDC_I4 => {
                let value = read_le_at::<i32>(code, ip)?;
                self.load_const_i4(value)?;
            }
            op::LDC_I8 => {
                let value = read_le_at::<i64>(code, ip)?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadConstI8 { dst, value });
                self.push_entry(EvalStackKind::I8, 8)?;
            }
            op::LDC_R4 => {
                let value = read_le_at::<f32>(code, ip)?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadConstI4 {
                    dst,
                    value: value.to_bits() as i32,
                });
                self.push_entry(EvalStackKind::R4, 4)?;
            }
            op::LDC_R8 => {
                let value = read_le_at::<f64>(code, ip)?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadConstI8 {
                    dst,
                    value: value.to_bits() as i64,
                });
                self.push_entry(EvalStackKind::R8, 8)?;
            }

            op::DUP => {
                let top = *self.top(0)?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadVar {
                    dst,
                    src: top.slot,
                    size: top.byte_size,
                });
                self.push_entry(top.kind, top.byte_size)?;
            }
            op::POP => {
                self.pop()?;
            }

            op::JMP => {
                return Err(not_supported_error!("jmp instruction"));
            }

            op::CALL => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                self.call(token, false)?;
            }
            op::CALLVIRT => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                self.call(token, true)?;
            }
            op::CALLI => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                self.call_indirect(token)?;
            }

            op::RET => {
                let ret_ty = self.method.sig()?.ret.clone();
                if matches!(ret_ty.as_ref(), Ty::Void) {
                    if !self.stack.is_empty() {
                        return Err(bad_image_error!(
                            "{}: stack not empty at void return",
                            self.method.full_name()
                        ));
                    }
                    self.emit(IrInst::ReturnVoid);
                } else {
                    if self.stack.len() != 1 {
                        return Err(bad_image_error!(
                            "{}: {} values on the stack at return",
                            self.method.full_name(),
                            self.stack.len()
                        ));
                    }
                    let value = self.pop()?;
                    self.emit(IrInst::Return {
                        src: value.slot,
                        size: ret_ty.value_size()?,
                    });
                }
                return Ok(Step::EndOfFlow);
            }

            op::BR_S | op::BR => {
                let target = self.read_branch_target(code, ip, opcode == op::BR_S)?;
                self.emit(IrInst::Branch { target });
                self.push_branch(target);
                return Ok(Step::EndOfFlow);
            }
            op::BRFALSE_S | op::BRFALSE | op::BRTRUE_S | op::BRTRUE => {
                let short = opcode == op::BRFALSE_S || opcode == op::BRTRUE_S;
                let truthy = opcode == op::BRTRUE_S || opcode == op::BRTRUE;
                let target = self.read_branch_target(code, ip, short)?;
                let cond = self.pop()?;
                let wide = cond.byte_size > 4;
                if truthy {
                    self.emit(IrInst::BranchTrue {
                        cond: cond.slot,
                        wide,
                        target,
                    });
                } else {
                    self.emit(IrInst::BranchFalse {
                        cond: cond.slot,
                        wide,
                        target,
                    });
                }
                self.push_branch(target);
            }

            op::BEQ_S..=op::BLT_UN_S => {
                let cmp = compare_of_branch(opcode - op::BEQ_S);
                let target = self.read_branch_target(code, ip, true)?;
                self.branch_compare(cmp, target)?;
            }
            op::BEQ..=op::BLT_UN => {
                let cmp = compare_of_branch(opcode - op::BEQ);
                let target = self.read_branch_target(code, ip, false)?;
                self.branch_compare(cmp, target)?;
            }

            op::SWITCH => {
                let count = read_le_at::<u32>(code, ip)?;
                let end = *ip + count as usize * 4;
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let displacement = read_le_at::<i32>(code, ip)?;
                    let target = u32::try_from(end as i64 + i64::from(displacement))
                        .map_err(|_| bad_image_error!("Switch target out of range"))?;
                    targets.push(target);
                }
                let selector = self.pop()?;
                let data = u32::try_from(self.data.len()).unwrap_or(u32::MAX);
                self.data.push(ResolvedData::SwitchTargets(targets.clone()));
                self.switch_patches.push(data);
                self.emit(IrInst::Switch {
                    value: selector.slot,
                    data,
                    count,
                });
                for target in targets {
                    self.push_branch(target);
                }
            }

            op::LDIND_I1..=op::LDIND_REF => {
                let kind = indirect_kind(opcode);
                let addr = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadIndirect {
                    dst,
                    addr: addr.slot,
                    kind,
                });
                self.barrier_if_volatile();
                self.push_entry(stack_kind_of_mem(kind), kind.byte_size().max(4))?;
            }
            op::STIND_REF | op::STIND_I1 | op::STIND_I2 | op::STIND_I4 | op::STIND_I8
            | op::STIND_R4 | op::STIND_R8 | op::STIND_I => {
                let kind = indirect_kind(opcode);
                self.barrier_if_volatile();
                let value = self.pop()?;
                let addr = self.pop()?;
                self.emit(IrInst::StoreIndirect {
                    addr: addr.slot,
                    src: value.slot,
                    kind,
                });
            }

            op::ADD..=op::REM_UN => {
                let bin = match opcode {
                    op::ADD => BinOp::Add,
                    op::SUB => BinOp::Sub,
                    op::MUL => BinOp::Mul,
                    op::DIV => BinOp::Div,
                    op::DIV_UN => BinOp::DivUn,
                    op::REM => BinOp::Rem,
                    _ => BinOp::RemUn,
                };
                self.binary(bin)?;
            }
            op::AND => self.binary(BinOp::And)?,
            op::OR => self.binary(BinOp::Or)?,
            op::XOR => self.binary(BinOp::Xor)?,
            op::SHL | op::SHR | op::SHR_UN => {
                let bin = match opcode {
                    op::SHL => BinOp::Shl,
                    op::SHR => BinOp::Shr,
                    _ => BinOp::ShrUn,
                };
                self.shift(bin)?;
            }
            op::ADD_OVF..=op::SUB_OVF_UN => {
                let bin = match opcode {
                    op::ADD_OVF => BinOp::AddOvf,
                    op::ADD_OVF_UN => BinOp::AddOvfUn,
                    op::MUL_OVF => BinOp::MulOvf,
                    op::MUL_OVF_UN => BinOp::MulOvfUn,
                    op::SUB_OVF => BinOp::SubOvf,
                    _ => BinOp::SubOvfUn,
                };
                self.binary(bin)?;
            }

            op::NEG | op::NOT => {
                let operand = self.pop()?;
                let kind = num_kind(operand.kind)?;
                if opcode == op::NOT && !operand.kind.is_integral() {
                    return Err(bad_image_error!("not over a non-integral operand"));
                }
                let dst = self.new_top_slot()?;
                if opcode == op::NEG {
                    self.emit(IrInst::Neg {
                        dst,
                        src: operand.slot,
                        kind,
                    });
                } else {
                    self.emit(IrInst::Not {
                        dst,
                        src: operand.slot,
                        kind,
                    });
                }
                self.push_entry(operand.kind, operand.byte_size)?;
            }
            op::CKFINITE => {
                let operand = self.top(0)?;
                if !operand.kind.is_float() {
                    return Err(bad_image_error!("ckfinite over a non-float operand"));
                }
                let kind = num_kind(operand.kind)?;
                let src = operand.slot;
                self.emit(IrInst::CheckFinite { src, kind });
            }

            op::CONV_I1 => self.convert(NumKind::I4, false, false, 1, false)?,
            op::CONV_I2 => self.convert(NumKind::I4, false, false, 2, false)?,
            op::CONV_I4 => self.convert(NumKind::I4, false, false, 4, false)?,
            op::CONV_I8 => self.convert(NumKind::I8, false, false, 8, false)?,
            op::CONV_R4 => self.convert(NumKind::R4, false, false, 4, false)?,
            op::CONV_R8 => self.convert(NumKind::R8, false, false, 8, false)?,
            op::CONV_U4 => self.convert(NumKind::I4, false, false, 4, true)?,
            op::CONV_U8 => self.convert(NumKind::I8, false, false, 8, true)?,
            op::CONV_U2 => self.convert(NumKind::I4, false, false, 2, true)?,
            op::CONV_U1 => self.convert(NumKind::I4, false, false, 1, true)?,
            op::CONV_I => self.convert(NumKind::I8, false, false, 8, false)?,
            op::CONV_U => self.convert(NumKind::I8, false, false, 8, true)?,
            op::CONV_R_UN => self.convert(NumKind::R8, true, false, 8, false)?,
            op::CONV_OVF_I1 => self.convert(NumKind::I4, false, true, 1, false)?,
            op::CONV_OVF_U1 => self.convert(NumKind::I4, false, true, 1, true)?,
            op::CONV_OVF_I2 => self.convert(NumKind::I4, false, true, 2, false)?,
            op::CONV_OVF_U2 => self.convert(NumKind::I4, false, true, 2, true)?,
            op::CONV_OVF_I4 => self.convert(NumKind::I4, false, true, 4, false)?,
            op::CONV_OVF_U4 => self.convert(NumKind::I4, false, true, 4, true)?,
            op::CONV_OVF_I8 => self.convert(NumKind::I8, false, true, 8, false)?,
            op::CONV_OVF_U8 => self.convert(NumKind::I8, false, true, 8, true)?,
            op::CONV_OVF_I => self.convert(NumKind::I8, false, true, 8, false)?,
            op::CONV_OVF_U => self.convert(NumKind::I8, false, true, 8, true)?,
            op::CONV_OVF_I1_UN => self.convert(NumKind::I4, true, true, 1, false)?,
            op::CONV_OVF_I2_UN => self.convert(NumKind::I4, true, true, 2, false)?,
            op::CONV_OVF_I4_UN => self.convert(NumKind::I4, true, true, 4, false)?,
            op::CONV_OVF_I8_UN => self.convert(NumKind::I8, true, true, 8, false)?,
            op::CONV_OVF_U1_UN => self.convert(NumKind::I4, true, true, 1, true)?,
            op::CONV_OVF_U2_UN => self.convert(NumKind::I4, true, true, 2, true)?,
            op::CONV_OVF_U4_UN => self.convert(NumKind::I4, true, true, 4, true)?,
            op::CONV_OVF_U8_UN => self.convert(NumKind::I8, true, true, 8, true)?,
            op::CONV_OVF_I_UN => self.convert(NumKind::I8, true, true, 8, false)?,
            op::CONV_OVF_U_UN => self.convert(NumKind::I8, true, true, 8, true)?,

            op::CPOBJ => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let src_addr = self.pop()?;
                let dst_addr = self.pop()?;
                self.emit(IrInst::CopyObject {
                    dst_addr: dst_addr.slot,
                    src_addr: src_addr.slot,
                    size: ty.value_size()?,
                });
            }
            op::LDOBJ => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let addr = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadObject {
                    dst,
                    addr: addr.slot,
                    size: ty.value_size()?,
                });
                self.barrier_if_volatile();
                self.push_ty(&ty)?;
            }
            op::STOBJ => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                self.barrier_if_volatile();
                let value = self.pop()?;
                let addr = self.pop()?;
                self.emit(IrInst::StoreObject {
                    addr: addr.slot,
                    src: value.slot,
                    size: ty.value_size()?,
                });
            }

            op::LDSTR => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                if token.table() != 0x70 {
                    return Err(bad_image_error!("ldstr with non-string token {}", token));
                }
                let literal = self.module.user_string(token.row())?;
                let data = self.add_data(Some(DataKey::String(token.row())), move || {
                    ResolvedData::String(literal)
                });
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadString { dst, data });
                self.push_entry(EvalStackKind::Obj, 8)?;
            }

            op::NEWOBJ => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                self.new_object(token)?;
            }

            op::CASTCLASS => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                let obj = self.top(0)?.slot;
                self.emit(IrInst::CastClass { obj, data });
            }
            op::ISINST => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::IsInst {
                    dst,
                    obj: obj.slot,
                    data,
                });
                self.push_entry(EvalStackKind::Obj, 8)?;
            }
            op::UNBOX => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::Unbox {
                    dst,
                    obj: obj.slot,
                    data,
                });
                self.push_entry(EvalStackKind::Ref, 8)?;
            }
            op::UNBOX_ANY => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let data = self.type_data(token)?;
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::UnboxAny {
                    dst,
                    obj: obj.slot,
                    data,
                    size: ty.value_size()?,
                });
                self.push_ty(&ty)?;
            }
            op::BOX => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let data = self.type_data(token)?;
                let value = self.pop()?;
                let dst = self.new_top_slot()?;
                if ty.is_value_type() {
                    self.emit(IrInst::Box {
                        dst,
                        src: value.slot,
                        data,
                    });
                } else {
                    // Boxing a reference type is the identity.
                    self.emit(IrInst::LoadVar {
                        dst,
                        src: value.slot,
                        size: 8,
                    });
                }
                self.push_entry(EvalStackKind::Obj, 8)?;
            }

            op::THROW => {
                let ex = self.pop()?;
                self.emit(IrInst::Throw { ex: ex.slot });
                return Ok(Step::EndOfFlow);
            }

            op::LDFLD => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, field) = self.field_data(token)?;
                let field_ty = field.ty()?;
                let kind = MemKind::of_ty(&field_ty)?;
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadField {
                    dst,
                    obj: obj.slot,
                    data,
                    kind,
                });
                self.barrier_if_volatile();
                self.push_ty(&field_ty)?;
            }
            op::LDFLDA => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, _field) = self.field_data(token)?;
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadFieldAddress {
                    dst,
                    obj: obj.slot,
                    data,
                });
                self.push_entry(EvalStackKind::Ref, 8)?;
            }
            op::STFLD => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, field) = self.field_data(token)?;
                let field_ty = field.ty()?;
                let kind = MemKind::of_ty(&field_ty)?;
                self.barrier_if_volatile();
                let value = self.pop()?;
                let obj = self.pop()?;
                self.emit(IrInst::StoreField {
                    obj: obj.slot,
                    src: value.slot,
                    data,
                    kind,
                });
            }
            op::LDSFLD => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, field) = self.field_data(token)?;
                let field_ty = field.ty()?;
                let kind = MemKind::of_ty(&field_ty)?;
                let dst = self.new_top_slot()?;
                if field.is_thread_static() {
                    self.emit(IrInst::LoadThreadStaticField { dst, data, kind });
                } else {
                    self.emit(IrInst::LoadStaticField { dst, data, kind });
                }
                self.barrier_if_volatile();
                self.push_ty(&field_ty)?;
            }
            op::LDSFLDA => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, field) = self.field_data(token)?;
                if field.is_thread_static() {
                    return Err(not_supported_error!(
                        "Address of thread-static field {}",
                        field.name()
                    ));
                }
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadStaticFieldAddress { dst, data });
                self.push_entry(EvalStackKind::Ref, 8)?;
            }
            op::STSFLD => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let (data, field) = self.field_data(token)?;
                let field_ty = field.ty()?;
                let kind = MemKind::of_ty(&field_ty)?;
                self.barrier_if_volatile();
                let value = self.pop()?;
                if field.is_thread_static() {
                    self.emit(IrInst::StoreThreadStaticField {
                        src: value.slot,
                        data,
                        kind,
                    });
                } else {
                    self.emit(IrInst::StoreStaticField {
                        src: value.slot,
                        data,
                        kind,
                    });
                }
            }

            op::NEWARR => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                let len = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::NewArray {
                    dst,
                    len: len.slot,
                    data,
                });
                self.push_entry(EvalStackKind::Obj, 8)?;
            }
            op::LDLEN => {
                let arr = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadArrayLength {
                    dst,
                    arr: arr.slot,
                });
                self.push_entry(EvalStackKind::I, 8)?;
            }
            op::LDELEMA => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                let index = self.pop()?;
                let arr = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadElementAddress {
                    dst,
                    arr: arr.slot,
                    index: index.slot,
                    data,
                });
                self.push_entry(EvalStackKind::Ref, 8)?;
            }
            op::LDELEM_I1..=op::LDELEM_REF => {
                let kind = element_kind(opcode);
                self.load_element(kind)?;
            }
            op::LDELEM => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                self.load_element_ty(&ty)?;
            }
            op::STELEM_I..=op::STELEM_REF => {
                let kind = store_element_kind(opcode);
                self.store_element(kind)?;
            }
            op::STELEM => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let kind = MemKind::of_ty(&ty)?;
                self.store_element(kind)?;
            }

            op::REFANYVAL | op::MKREFANY => {
                return Err(not_supported_error!("typed references"));
            }

            op::LDTOKEN => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.runtime_handle_data(token)?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadToken { dst, data });
                self.push_entry(EvalStackKind::I, 8)?;
            }

            op::ENDFINALLY => {
                self.stack.clear();
                self.cur_slots = self.eval_base;
                self.emit(IrInst::EndFinally);
                return Ok(Step::EndOfFlow);
            }
            op::LEAVE_S | op::LEAVE => {
                let target = self.read_branch_target(code, ip, opcode == op::LEAVE_S)?;
                // Leaving a protected region abandons the eval stack.
                self.stack.clear();
                self.cur_slots = self.eval_base;
                self.emit(IrInst::Leave { target });
                self.push_branch(target);
                return Ok(Step::EndOfFlow);
            }

            op::PREFIX => {
                let extended = read_le_at::<u8>(code, ip)?;
                return self.step_extended(extended, code, ip);
            }

            other => {
                return Err(not_supported_error!("Opcode {:#04x}", other));
            }
        }
        Ok(Step::Continue)
    }

    #[allow(clippy::too_many_lines)]
    fn step_extended(&mut self, extended: u8, code: &[u8], ip: &mut usize) -> Result<Step> {
        match extended {
            op::ext::CEQ => self.compare_push(CmpOp::Eq)?,
            op::ext::CGT => self.compare_push(CmpOp::Gt)?,
            op::ext::CGT_UN => self.compare_push(CmpOp::GtUn)?,
            op::ext::CLT => self.compare_push(CmpOp::Lt)?,
            op::ext::CLT_UN => self.compare_push(CmpOp::LtUn)?,

            op::ext::LDFTN => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let resolved = self.resolve_method_operand(token)?;
                let data = self.method_data(&resolved, token);
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadFunction { dst, data });
                self.push_entry(EvalStackKind::I, 8)?;
            }
            op::ext::LDVIRTFTN => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let resolved = self.resolve_method_operand(token)?;
                let data = self.method_data(&resolved, token);
                let obj = self.pop()?;
                let dst = self.new_top_slot()?;
                self.emit(IrInst::LoadVirtualFunction {
                    dst,
                    obj: obj.slot,
                    data,
                });
                self.push_entry(EvalStackKind::I, 8)?;
            }

            op::ext::LDARG => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.load_arg(index)?;
            }
            op::ext::LDARGA => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.load_arg_address(index)?;
            }
            op::ext::STARG => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.store_arg(index)?;
            }
            op::ext::LDLOC => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.load_local(index)?;
            }
            op::ext::LDLOCA => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.load_local_address(index)?;
            }
            op::ext::STLOC => {
                let index = u32::from(read_le_at::<u16>(code, ip)?);
                self.store_local(index)?;
            }

            op::ext::LOCALLOC | op::ext::ARGLIST => {
                return Err(not_supported_error!("Extended opcode 0xFE {:#04x}", extended));
            }

            op::ext::ENDFILTER => {
                let decision = self.pop()?;
                self.emit(IrInst::EndFilter {
                    value: decision.slot,
                });
                self.stack.clear();
                self.cur_slots = self.eval_base;
                return Ok(Step::EndOfFlow);
            }

            op::ext::UNALIGNED => {
                // Alignment hint: consumed and ignored.
                let _alignment = read_le_at::<u8>(code, ip)?;
            }
            op::ext::VOLATILE => {
                self.prefix_volatile = true;
            }
            op::ext::TAIL => {
                // Tail-call hint: legal to ignore.
            }
            op::ext::READONLY => {}
            op::ext::CONSTRAINED => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let data = self.type_data(token)?;
                self.constrained = Some(data);
            }

            op::ext::INITOBJ => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let addr = self.pop()?;
                self.emit(IrInst::InitObject {
                    addr: addr.slot,
                    size: ty.value_size()?,
                });
            }
            op::ext::CPBLK => {
                let size = self.pop()?;
                let src_addr = self.pop()?;
                let dst_addr = self.pop()?;
                self.emit(IrInst::CopyBlock {
                    dst_addr: dst_addr.slot,
                    src_addr: src_addr.slot,
                    size: size.slot,
                });
            }
            op::ext::INITBLK => {
                let size = self.pop()?;
                let value = self.pop()?;
                let addr = self.pop()?;
                self.emit(IrInst::InitBlock {
                    addr: addr.slot,
                    value: value.slot,
                    size: size.slot,
                });
            }

            op::ext::RETHROW => {
                self.emit(IrInst::Rethrow);
                return Ok(Step::EndOfFlow);
            }
            op::ext::SIZEOF => {
                let token = Token::new(read_le_at::<u32>(code, ip)?);
                let ty = self.resolve_type_operand(token)?;
                let size = ty.value_size()?;
                self.load_const_i4(i32::try_from(size).unwrap_or(i32::MAX))?;
            }
            op::ext::REFANYTYPE => {
                return Err(not_supported_error!("typed references"));
            }

            other => {
                return Err(not_supported_error!("Extended opcode 0xFE {:#04x}", other));
            }
        }
        Ok(Step::Continue)
    }

    // ---- helpers --------------------------------------------------------

    fn read_branch_target(&self, code: &[u8], ip: &mut usize, short: bool) -> Result<u32> {
        let displacement = if short {
            i32::from(read_le_at::<i8>(code, ip)?)
        } else {
            read_le_at::<i32>(code, ip)?
        };
        u32::try_from(*ip as i64 + i64::from(displacement))
            .map_err(|_| bad_image_error!("Branch target out of range"))
    }

    fn barrier_if_volatile(&mut self) {
        if self.prefix_volatile {
            self.emit(IrInst::MemoryBarrier);
            self.prefix_volatile = false;
        }
    }

    fn load_const_i4(&mut self, value: i32) -> Result<()> {
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadConstI4 { dst, value });
        self.push_entry(EvalStackKind::I4, 4)?;
        Ok(())
    }

    fn arg_desc(&self, index: u32) -> Result<(u16, TyRef)> {
        let desc = self
            .args
            .get(index as usize)
            .ok_or_else(|| bad_image_error!("Argument index {} out of range", index))?;
        Ok((desc.slot, desc.ty.clone()))
    }

    fn load_arg(&mut self, index: u32) -> Result<()> {
        let (slot, ty) = self.arg_desc(index)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadVar {
            dst,
            src: slot,
            size: ty.value_size()?,
        });
        self.push_ty(&ty)?;
        Ok(())
    }

    fn load_arg_address(&mut self, index: u32) -> Result<()> {
        let (slot, _ty) = self.arg_desc(index)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadVarAddress { dst, src: slot });
        self.push_entry(EvalStackKind::Ref, 8)?;
        Ok(())
    }

    fn store_arg(&mut self, index: u32) -> Result<()> {
        let (slot, ty) = self.arg_desc(index)?;
        let value = self.pop()?;
        self.emit(IrInst::StoreVar {
            dst: slot,
            src: value.slot,
            size: ty.value_size()?,
        });
        Ok(())
    }

    fn local_desc(&self, index: u32) -> Result<(u16, TyRef)> {
        let slot = self
            .local_slot_of
            .get(index as usize)
            .copied()
            .ok_or_else(|| bad_image_error!("Local index {} out of range", index))?;
        Ok((slot, self.local_tys[index as usize].clone()))
    }

    fn load_local(&mut self, index: u32) -> Result<()> {
        let (slot, ty) = self.local_desc(index)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadVar {
            dst,
            src: slot,
            size: ty.value_size()?,
        });
        self.push_ty(&ty)?;
        Ok(())
    }

    fn load_local_address(&mut self, index: u32) -> Result<()> {
        let (slot, _ty) = self.local_desc(index)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadVarAddress { dst, src: slot });
        self.push_entry(EvalStackKind::Ref, 8)?;
        Ok(())
    }

    fn store_local(&mut self, index: u32) -> Result<()> {
        let (slot, ty) = self.local_desc(index)?;
        let value = self.pop()?;
        self.emit(IrInst::StoreVar {
            dst: slot,
            src: value.slot,
            size: ty.value_size()?,
        });
        Ok(())
    }

    /// Unify two numeric operands, emitting widening conversions in
    /// place, and return the common width class.
    fn unify(&mut self, lhs: &EvalEntry, rhs: &EvalEntry) -> Result<NumKind> {
        let a = num_kind(lhs.kind)?;
        let b = num_kind(rhs.kind)?;
        Ok(match (a, b) {
            (NumKind::I4, NumKind::I4) => NumKind::I4,
            (NumKind::I8, NumKind::I8) => NumKind::I8,
            (NumKind::I4, NumKind::I8) => {
                self.emit(IrInst::Convert {
                    dst: lhs.slot,
                    src: lhs.slot,
                    from: NumKind::I4,
                    to: NumKind::I8,
                    unsigned: false,
                    checked: false,
                    result_bytes: 8,
                    result_unsigned: false,
                });
                NumKind::I8
            }
            (NumKind::I8, NumKind::I4) => {
                self.emit(IrInst::Convert {
                    dst: rhs.slot,
                    src: rhs.slot,
                    from: NumKind::I4,
                    to: NumKind::I8,
                    unsigned: false,
                    checked: false,
                    result_bytes: 8,
                    result_unsigned: false,
                });
                NumKind::I8
            }
            (NumKind::R4, NumKind::R4) => NumKind::R4,
            (NumKind::R8, NumKind::R8) => NumKind::R8,
            (NumKind::R4, NumKind::R8) => {
                self.emit(IrInst::Convert {
                    dst: lhs.slot,
                    src: lhs.slot,
                    from: NumKind::R4,
                    to: NumKind::R8,
                    unsigned: false,
                    checked: false,
                    result_bytes: 8,
                    result_unsigned: false,
                });
                NumKind::R8
            }
            (NumKind::R8, NumKind::R4) => {
                self.emit(IrInst::Convert {
                    dst: rhs.slot,
                    src: rhs.slot,
                    from: NumKind::R4,
                    to: NumKind::R8,
                    unsigned: false,
                    checked: false,
                    result_bytes: 8,
                    result_unsigned: false,
                });
                NumKind::R8
            }
            _ => {
                return Err(bad_image_error!(
                    "Operand categories {:?} and {:?} cannot combine",
                    lhs.kind,
                    rhs.kind
                ));
            }
        })
    }

    fn binary(&mut self, bin: BinOp) -> Result<()> {
        let rhs = *self.top(0)?;
        let lhs = *self.top(1)?;
        let kind = self.unify(&lhs, &rhs)?;
        self.pop_n(2)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::Binary {
            dst,
            lhs: lhs.slot,
            rhs: rhs.slot,
            op: bin,
            kind,
        });
        let result_kind = match kind {
            NumKind::I4 => EvalStackKind::I4,
            NumKind::I8 => EvalStackKind::I8,
            NumKind::R4 => EvalStackKind::R4,
            NumKind::R8 => EvalStackKind::R8,
        };
        self.push_entry(result_kind, result_kind.default_size())?;
        Ok(())
    }

    /// Shifts keep the left operand's width; the count is i4.
    fn shift(&mut self, bin: BinOp) -> Result<()> {
        let count = *self.top(0)?;
        let value = *self.top(1)?;
        if !count.kind.is_integral() || !value.kind.is_integral() {
            return Err(bad_image_error!("Shift over non-integral operands"));
        }
        let kind = num_kind(value.kind)?;
        self.pop_n(2)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::Binary {
            dst,
            lhs: value.slot,
            rhs: count.slot,
            op: bin,
            kind,
        });
        self.push_entry(value.kind, value.byte_size)?;
        Ok(())
    }

    fn compare_push(&mut self, cmp: CmpOp) -> Result<()> {
        let rhs = *self.top(0)?;
        let lhs = *self.top(1)?;
        let kind = self.unify(&lhs, &rhs)?;
        self.pop_n(2)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::Compare {
            dst,
            lhs: lhs.slot,
            rhs: rhs.slot,
            op: cmp,
            kind,
        });
        self.push_entry(EvalStackKind::I4, 4)?;
        Ok(())
    }

    fn branch_compare(&mut self, cmp: CmpOp, target: u32) -> Result<()> {
        let rhs = *self.top(0)?;
        let lhs = *self.top(1)?;
        let kind = self.unify(&lhs, &rhs)?;
        self.pop_n(2)?;
        self.emit(IrInst::BranchCmp {
            lhs: lhs.slot,
            rhs: rhs.slot,
            op: cmp,
            kind,
            target,
        });
        self.push_branch(target);
        Ok(())
    }

    fn convert(
        &mut self,
        to: NumKind,
        unsigned: bool,
        checked: bool,
        result_bytes: u8,
        result_unsigned: bool,
    ) -> Result<()> {
        let operand = self.pop()?;
        let from = num_kind(operand.kind)?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::Convert {
            dst,
            src: operand.slot,
            from,
            to,
            unsigned,
            checked,
            result_bytes,
            result_unsigned,
        });
        let result_kind = match to {
            NumKind::I4 => EvalStackKind::I4,
            NumKind::I8 => EvalStackKind::I8,
            NumKind::R4 => EvalStackKind::R4,
            NumKind::R8 => EvalStackKind::R8,
        };
        self.push_entry(result_kind, result_kind.default_size())?;
        Ok(())
    }

    fn load_element(&mut self, kind: MemKind) -> Result<()> {
        let index = self.pop()?;
        let arr = self.pop()?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadElement {
            dst,
            arr: arr.slot,
            index: index.slot,
            kind,
        });
        self.push_entry(stack_kind_of_mem(kind), kind.byte_size().max(4))?;
        Ok(())
    }

    fn load_element_ty(&mut self, ty: &TyRef) -> Result<()> {
        let kind = MemKind::of_ty(ty)?;
        let index = self.pop()?;
        let arr = self.pop()?;
        let dst = self.new_top_slot()?;
        self.emit(IrInst::LoadElement {
            dst,
            arr: arr.slot,
            index: index.slot,
            kind,
        });
        self.push_ty(ty)?;
        Ok(())
    }

    fn store_element(&mut self, kind: MemKind) -> Result<()> {
        let value = self.pop()?;
        let index = self.pop()?;
        let arr = self.pop()?;
        self.emit(IrInst::StoreElement {
            arr: arr.slot,
            index: index.slot,
            src: value.slot,
            kind,
        });
        Ok(())
    }

    fn resolve_method_operand(&mut self, token: Token) -> Result<ResolvedMethod> {
        self.module.resolve_method(
            token,
            self.class_ctx.as_ref(),
            self.method_ctx.as_ref(),
            &self.context,
        )
    }

    /// Shared call lowering for `call` and `callvirt`.
    fn call(&mut self, token: Token, virtual_call: bool) -> Result<()> {
        let resolved = self.resolve_method_operand(token)?;
        let target = resolved.method.clone();
        let sig = target.sig()?.clone();

        let argc = sig.params.len() + usize::from(sig.has_this);
        if self.stack.len() < argc {
            return Err(bad_image_error!(
                "Call to {} needs {} arguments, stack holds {}",
                target.full_name(),
                argc,
                self.stack.len()
            ));
        }
        let arg_entries = self.pop_n(argc)?;
        let arg_slots: Vec<u16> = arg_entries.iter().map(|entry| entry.slot).collect();

        let method = self.method_data(&resolved, token);
        let args = self.add_data(None, move || ResolvedData::ArgList(arg_slots));

        let has_ret = !matches!(sig.ret.as_ref(), Ty::Void);
        let ret = self.new_top_slot()?;

        let constrained = self.constrained.take();
        let declaring_interface = target
            .declaring
            .get()
            .map_or(false, |declaring| declaring.is_interface());
        let target_interp = target.is_interp();

        // (operation, target shape) -> instruction selection. A virtual
        // or interface call whose resolved target is interpreted stays
        // inside the interpreter; only AOT targets cross the bridge.
        let inst = if let Some(constrained) = constrained {
            IrInst::CallConstrained {
                constrained,
                method,
                args,
                ret,
                has_ret,
            }
        } else if !virtual_call || !target.is_virtual() {
            if target_interp {
                IrInst::CallInterp {
                    method,
                    args,
                    ret,
                    has_ret,
                }
            } else {
                IrInst::CallNative {
                    method,
                    args,
                    ret,
                    has_ret,
                }
            }
        } else if declaring_interface {
            IrInst::CallInterface {
                method,
                args,
                ret,
                has_ret,
            }
        } else if target_interp {
            IrInst::CallVirtualInterp {
                method,
                args,
                ret,
                has_ret,
            }
        } else {
            IrInst::CallVirtualNative {
                method,
                args,
                ret,
                has_ret,
            }
        };
        self.emit(inst);

        if has_ret {
            self.push_ty(&sig.ret)?;
        }
        Ok(())
    }

    fn call_indirect(&mut self, token: Token) -> Result<()> {
        let sig = self.module.resolve_stand_alone_sig(
            token,
            self.class_ctx.as_ref(),
            self.method_ctx.as_ref(),
            &self.context,
        )?;

        let ftn = self.pop()?;
        let argc = sig.params.len() + usize::from(sig.has_this);
        let arg_entries = self.pop_n(argc)?;
        let arg_slots: Vec<u16> = arg_entries.iter().map(|entry| entry.slot).collect();

        let has_ret = !matches!(sig.ret.as_ref(), Ty::Void);
        let ret_ty = sig.ret.clone();
        let sig_data = self.add_data(Some(DataKey::Sig(token.value())), move || {
            ResolvedData::Sig(sig)
        });
        let args = self.add_data(None, move || ResolvedData::ArgList(arg_slots));
        let ret = self.new_top_slot()?;
        self.emit(IrInst::CallIndirect {
            sig: sig_data,
            ftn: ftn.slot,
            args,
            ret,
            has_ret,
        });
        if has_ret {
            self.push_ty(&ret_ty)?;
        }
        Ok(())
    }

    fn new_object(&mut self, token: Token) -> Result<()> {
        let resolved = self.resolve_method_operand(token)?;
        let ctor = resolved.method.clone();
        let sig = ctor.sig()?.clone();
        if !sig.has_this {
            return Err(bad_image_error!(
                "newobj constructor {} is static",
                ctor.full_name()
            ));
        }

        let argc = sig.params.len();
        if self.stack.len() < argc {
            return Err(bad_image_error!(
                "newobj {} needs {} arguments, stack holds {}",
                ctor.full_name(),
                argc,
                self.stack.len()
            ));
        }
        let arg_entries = self.pop_n(argc)?;
        let arg_slots: Vec<u16> = arg_entries.iter().map(|entry| entry.slot).collect();

        let container = resolved.container.clone();
        let is_interp = ctor.is_interp();
        let method = self.method_data(&resolved, token);
        let args = self.add_data(None, move || ResolvedData::ArgList(arg_slots));
        let dst = self.new_top_slot()?;

        if container.is_value_type() {
            let size = container.value_size()?;
            self.emit(IrInst::NewValueType {
                dst,
                method,
                args,
                size,
                is_interp,
            });
            self.push_ty(&container)?;
        } else {
            if is_interp {
                self.emit(IrInst::NewObjectInterp { dst, method, args });
            } else {
                self.emit(IrInst::NewObject { dst, method, args });
            }
            self.push_entry(EvalStackKind::Obj, 8)?;
        }
        Ok(())
    }

    /// The runtime-handle data entry for `ldtoken`.
    fn runtime_handle_data(&mut self, token: Token) -> Result<u32> {
        use crate::metadata::tables::TableId;
        match token.table() {
            table
                if table == TableId::TypeDef as u8
                    || table == TableId::TypeRef as u8
                    || table == TableId::TypeSpec as u8 =>
            {
                self.type_data(token)
            }
            table if table == TableId::Field as u8 || table == TableId::MemberRef as u8 => {
                // MemberRef may name either a field or a method; try the
                // field interpretation first, as the original does.
                if table == TableId::Field as u8 {
                    let (data, _field) = self.field_data(token)?;
                    return Ok(data);
                }
                if let Ok((data, _field)) = self.field_data(token) {
                    return Ok(data);
                }
                let resolved = self.resolve_method_operand(token)?;
                Ok(self.method_data(&resolved, token))
            }
            table
                if table == TableId::MethodDef as u8 || table == TableId::MethodSpec as u8 =>
            {
                let resolved = self.resolve_method_operand(token)?;
                Ok(self.method_data(&resolved, token))
            }
            _ => Err(bad_image_error!("ldtoken over {}", token)),
        }
    }

    // ---- final assembly -------------------------------------------------

    fn finish(mut self) -> Result<InterpMethodInfo> {
        // Lay the blocks out linearly (they are ordered by IL offset) and
        // compute each one's final code offset.
        let mut total = 0u32;
        for block in &mut self.blocks {
            block.code_offset = total;
            total += u32::try_from(block.insts.len())
                .map_err(|_| bad_image_error!("IR exceeds the code offset range"))?;
        }

        let code_len = self.body.code.len();
        let block_offsets: Vec<u32> = self.blocks.iter().map(|block| block.code_offset).collect();
        let ip2block = self.ip2block.clone();
        let map = move |il: u32| -> u32 {
            let il = il as usize;
            if il >= code_len {
                total
            } else {
                block_offsets[ip2block[il]]
            }
        };

        // Patch inline branch targets.
        for block in &mut self.blocks {
            for inst in &mut block.insts {
                inst.patch_targets(&map);
            }
        }
        // Patch switch case tables in the side table.
        for data_index in &self.switch_patches {
            if let Some(ResolvedData::SwitchTargets(targets)) =
                self.data.get_mut(*data_index as usize)
            {
                for target in targets {
                    *target = map(*target);
                }
            }
        }
        // Patch exception-clause boundaries.
        for clause in &mut self.clauses {
            clause.try_start = map(clause.try_start);
            clause.try_end = map(clause.try_end);
            clause.handler_start = map(clause.handler_start);
            clause.handler_end = map(clause.handler_end);
            if clause.kind == EhClauseKind::Filter {
                clause.filter_start = map(clause.filter_start);
            }
        }

        let code: Vec<IrInst> = self
            .blocks
            .into_iter()
            .flat_map(|block| block.insts)
            .collect();

        Ok(InterpMethodInfo {
            method_token: self.method.token,
            code,
            resolved_data: self.data,
            args: self.args,
            arg_slots: u16::try_from(self.arg_slots).map_err(|_| frame_overflow())?,
            local_slots: u16::try_from(self.arg_slots + self.local_slots)
                .map_err(|_| frame_overflow())?,
            eval_stack_base: u16::try_from(self.eval_base).map_err(|_| frame_overflow())?,
            max_frame_slots: u16::try_from(self.max_slots).map_err(|_| frame_overflow())?,
            ex_clauses: self.clauses,
        })
    }
}

enum Step {
    Continue,
    EndOfFlow,
}

fn frame_overflow() -> crate::Error {
    crate::Error::LimitExceeded("Frame slot count exceeds the stack bound".to_string())
}

/// The numeric width class of a stack category; references participate in
/// pointer-width arithmetic.
fn num_kind(kind: EvalStackKind) -> Result<NumKind> {
    Ok(match kind {
        EvalStackKind::I4 => NumKind::I4,
        EvalStackKind::I8 | EvalStackKind::I | EvalStackKind::Ref | EvalStackKind::Obj => {
            NumKind::I8
        }
        EvalStackKind::R4 => NumKind::R4,
        EvalStackKind::R8 => NumKind::R8,
        EvalStackKind::Other => {
            return Err(bad_image_error!("Aggregate operand in numeric position"));
        }
    })
}

/// Branch comparison table, ordered as the opcode block is.
fn compare_of_branch(offset: u8) -> CmpOp {
    match offset {
        0 => CmpOp::Eq,
        1 => CmpOp::Ge,
        2 => CmpOp::Gt,
        3 => CmpOp::Le,
        4 => CmpOp::Lt,
        5 => CmpOp::Ne,
        6 => CmpOp::GeUn,
        7 => CmpOp::GtUn,
        8 => CmpOp::LeUn,
        _ => CmpOp::LtUn,
    }
}

/// `ldind.*`/`stind.*` access-shape table.
fn indirect_kind(opcode: u8) -> MemKind {
    match opcode {
        op::LDIND_I1 => MemKind::I1,
        op::LDIND_U1 => MemKind::U1,
        op::LDIND_I2 => MemKind::I2,
        op::LDIND_U2 => MemKind::U2,
        op::LDIND_I4 | op::LDIND_U4 | op::STIND_I4 => MemKind::I4,
        op::LDIND_I8 | op::STIND_I8 => MemKind::I8,
        op::LDIND_I | op::STIND_I => MemKind::I8,
        op::LDIND_R4 | op::STIND_R4 => MemKind::R4,
        op::LDIND_R8 | op::STIND_R8 => MemKind::R8,
        op::LDIND_REF | op::STIND_REF => MemKind::Obj,
        op::STIND_I1 => MemKind::I1,
        op::STIND_I2 => MemKind::I2,
        _ => MemKind::I4,
    }
}

/// `ldelem.*` access-shape table.
fn element_kind(opcode: u8) -> MemKind {
    match opcode {
        op::LDELEM_I1 => MemKind::I1,
        op::LDELEM_U1 => MemKind::U1,
        op::LDELEM_I2 => MemKind::I2,
        op::LDELEM_U2 => MemKind::U2,
        op::LDELEM_I4 | op::LDELEM_U4 => MemKind::I4,
        op::LDELEM_I8 | op::LDELEM_I => MemKind::I8,
        op::LDELEM_R4 => MemKind::R4,
        op::LDELEM_R8 => MemKind::R8,
        _ => MemKind::Obj,
    }
}

/// `stelem.*` access-shape table.
fn store_element_kind(opcode: u8) -> MemKind {
    match opcode {
        op::STELEM_I1 => MemKind::I1,
        op::STELEM_I2 => MemKind::I2,
        op::STELEM_I4 => MemKind::I4,
        op::STELEM_I8 | op::STELEM_I => MemKind::I8,
        op::STELEM_R4 => MemKind::R4,
        op::STELEM_R8 => MemKind::R8,
        _ => MemKind::Obj,
    }
}

/// The stack category a memory access pushes.
fn stack_kind_of_mem(kind: MemKind) -> EvalStackKind {
    match kind {
        MemKind::I1 | MemKind::U1 | MemKind::I2 | MemKind::U2 | MemKind::I4 => EvalStackKind::I4,
        MemKind::I8 => EvalStackKind::I8,
        MemKind::R4 => EvalStackKind::R4,
        MemKind::R8 => EvalStackKind::R8,
        MemKind::Obj => EvalStackKind::Obj,
        MemKind::Size12 | MemKind::Size16 | MemKind::SizeN(_) => EvalStackKind::Other,
    }
}
