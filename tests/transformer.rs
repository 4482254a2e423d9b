//! End-to-end bytecode transformation over loaded modules.

mod common;

use common::{corelib, fat_body_with_catch, sig_static_i4, sig_static_void, tiny_body, ImageBuilder};
use emberclr::interp::{BinOp, IrInst, NumKind};
use emberclr::metadata::method::EhClauseKind;
use emberclr::metadata::tables::TableId;
use emberclr::InterpModule;

const METHOD_STATIC: u16 = 0x10;

fn single_method_module(
    lib: &common::Corelib,
    body: &[u8],
    signature: &[u8],
) -> std::sync::Arc<InterpModule> {
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Program", Some((TableId::TypeRef, object_ref)));
    let rva = builder.add_method_body(body);
    builder.add_method(rva, 0, METHOD_STATIC, "Main", signature);
    InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap()
}

#[test]
fn transforms_constant_arithmetic() {
    let lib = corelib();
    // ldc.i4.2; ldc.i4.3; add; ret
    let module = single_method_module(
        &lib,
        &tiny_body(&[0x18, 0x19, 0x58, 0x2A]),
        &sig_static_i4(),
    );
    let main = module.methods()[0].clone();
    let ir = module.method_ir(&main).unwrap();

    assert_eq!(
        ir.code,
        vec![
            IrInst::LoadConstI4 { dst: 0, value: 2 },
            IrInst::LoadConstI4 { dst: 1, value: 3 },
            IrInst::Binary {
                dst: 0,
                lhs: 0,
                rhs: 1,
                op: BinOp::Add,
                kind: NumKind::I4,
            },
            IrInst::Return { src: 0, size: 4 },
        ]
    );
    // No args, no locals; the frame is exactly the two-deep eval stack.
    assert_eq!(ir.arg_slots, 0);
    assert_eq!(ir.eval_stack_base, 0);
    assert_eq!(ir.max_frame_slots, 2);
}

#[test]
fn branch_targets_patch_to_ir_offsets() {
    let lib = corelib();
    // 0: ldc.i4.0; 1: brtrue.s +1 (-> 4); 3: nop; 4: ret
    let module = single_method_module(
        &lib,
        &tiny_body(&[0x16, 0x2D, 0x01, 0x00, 0x2A]),
        &sig_static_void(),
    );
    let main = module.methods()[0].clone();
    let ir = module.method_ir(&main).unwrap();

    assert_eq!(ir.code.len(), 3);
    match &ir.code[1] {
        IrInst::BranchTrue { target, wide, .. } => {
            assert!(!wide);
            // The ret block starts at IR offset 2.
            assert_eq!(*target, 2);
        }
        other => panic!("expected BranchTrue, got {other:?}"),
    }
    assert!(matches!(ir.code[2], IrInst::ReturnVoid));
}

#[test]
fn try_catch_boundaries_match_block_offsets() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Program", Some((TableId::TypeRef, object_ref)));

    // try { 0: nop; 1: leave.s 6 } catch(object) { 3: pop; 4: leave.s 6 }
    // 6: ret
    let code = [0x00, 0xDE, 0x03, 0x26, 0xDE, 0x00, 0x2A];
    let body = fat_body_with_catch(&code, 2, 0, 3, 3, 3, 0x0100_0000 | object_ref);
    let rva = builder.add_method_body(&body);
    builder.add_method(rva, 0, METHOD_STATIC, "Guarded", &sig_static_void());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let guarded = module.methods()[0].clone();
    let ir = module.method_ir(&guarded).unwrap();

    // Blocks: [0..3) -> Leave, [3..6) -> Leave (pop emits nothing),
    // [6..) -> ReturnVoid.
    assert_eq!(
        ir.code,
        vec![
            IrInst::Leave { target: 2 },
            IrInst::Leave { target: 2 },
            IrInst::ReturnVoid,
        ]
    );

    assert_eq!(ir.ex_clauses.len(), 1);
    let clause = &ir.ex_clauses[0];
    assert_eq!(clause.kind, EhClauseKind::Exception);
    assert_eq!(clause.try_start, 0);
    assert_eq!(clause.try_end, 1);
    assert_eq!(clause.handler_start, 1);
    assert_eq!(clause.handler_end, 2);
    let catch_ty = clause.catch_type.as_ref().unwrap();
    assert_eq!(catch_ty.type_handle().unwrap().name(), "Object");

    // The handler entered with exactly one object-reference slot: the
    // `pop` at its head consumed it without underflow, and the handler's
    // frame shape sized the eval stack to one slot.
    assert_eq!(ir.max_frame_slots, 1);
}

#[test]
fn interpreted_call_targets_stay_in_the_interpreter() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Program", Some((TableId::TypeRef, object_ref)));

    let callee_rva = builder.add_method_body(&tiny_body(&[0x2A])); // ret
    builder.add_method(callee_rva, 0, METHOD_STATIC, "Callee", &sig_static_void());

    // call 0x06000001; ret
    let caller_rva = builder.add_method_body(&tiny_body(&[0x28, 0x01, 0x00, 0x00, 0x06, 0x2A]));
    builder.add_method(caller_rva, 0, METHOD_STATIC, "Caller", &sig_static_void());

    // ldnull; callvirt object::ToString; pop; ret
    let to_string = builder.add_member_ref(
        (TableId::TypeRef, object_ref),
        "ToString",
        &[0x20, 0x00, 0x0E],
    );
    let virt_code = {
        let mut code = vec![0x14, 0x6F];
        code.extend_from_slice(&(0x0A00_0000u32 | to_string).to_le_bytes());
        code.extend_from_slice(&[0x26, 0x2A]);
        code
    };
    let virt_rva = builder.add_method_body(&tiny_body(&virt_code));
    builder.add_method(virt_rva, 0, METHOD_STATIC, "Virt", &sig_static_void());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();

    let caller = module.methods()[1].clone();
    let ir = module.method_ir(&caller).unwrap();
    assert!(
        ir.code
            .iter()
            .any(|inst| matches!(inst, IrInst::CallInterp { .. })),
        "call to an interpreted method must bypass the native bridge"
    );

    let virt = module.methods()[2].clone();
    let ir = module.method_ir(&virt).unwrap();
    assert!(
        ir.code
            .iter()
            .any(|inst| matches!(inst, IrInst::CallVirtualNative { .. })),
        "virtual call to an AOT method dispatches through the host"
    );
}

#[test]
fn ldstr_interns_through_the_user_string_cache() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Program", Some((TableId::TypeRef, object_ref)));

    let token = builder.user_string("hello");
    let mut code = vec![0x72];
    code.extend_from_slice(&token.to_le_bytes());
    code.extend_from_slice(&[0x26, 0x2A]); // pop; ret
    let rva = builder.add_method_body(&tiny_body(&code));
    builder.add_method(rva, 0, METHOD_STATIC, "Strings", &sig_static_void());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let method = module.methods()[0].clone();
    let ir = module.method_ir(&method).unwrap();

    let data = match &ir.code[0] {
        IrInst::LoadString { data, .. } => *data,
        other => panic!("expected LoadString, got {other:?}"),
    };
    match &ir.resolved_data[data as usize] {
        emberclr::interp::ResolvedData::String(value) => assert_eq!(value.as_str(), "hello"),
        _ => panic!("expected interned string"),
    }

    // The literal is the same interned handle the module cache holds.
    let interned = module.user_string(token & 0x00FF_FFFF).unwrap();
    assert_eq!(interned.as_str(), "hello");
}

#[test]
fn concurrent_transforms_publish_one_descriptor() {
    let lib = corelib();
    let module = single_method_module(
        &lib,
        &tiny_body(&[0x18, 0x19, 0x58, 0x2A]),
        &sig_static_i4(),
    );
    let main = module.methods()[0].clone();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let module = module.clone();
        let main = main.clone();
        handles.push(std::thread::spawn(move || module.method_ir(&main).unwrap()));
    }
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for pair in results.windows(2) {
        // Either the identical cached descriptor or a structurally equal
        // one; with first-writer-wins publication they are identical.
        assert!(std::sync::Arc::ptr_eq(&pair[0], &pair[1]));
        assert_eq!(pair[0].code, pair[1].code);
    }
}

#[test]
fn unknown_opcode_is_fatal() {
    let lib = corelib();
    let module = single_method_module(&lib, &tiny_body(&[0xC0, 0x2A]), &sig_static_void());
    let main = module.methods()[0].clone();
    assert!(module.method_ir(&main).is_err());
}

#[test]
fn call_argument_shape_mismatch_is_fatal() {
    let lib = corelib();
    let mut builder = ImageBuilder::new("patch.dll");
    let mscorlib = builder.add_assembly_ref("mscorlib");
    let object_ref = builder.add_type_ref(mscorlib, "System", "Object");
    builder.begin_type(0, "Patch", "Program", Some((TableId::TypeRef, object_ref)));

    // Callee takes (int32) but the call site pushes nothing.
    let callee_rva = builder.add_method_body(&tiny_body(&[0x2A]));
    builder.add_method(
        callee_rva,
        0,
        METHOD_STATIC,
        "NeedsArg",
        &[0x00, 0x01, 0x01, 0x08],
    );
    let caller_rva = builder.add_method_body(&tiny_body(&[0x28, 0x01, 0x00, 0x00, 0x06, 0x2A]));
    builder.add_method(caller_rva, 0, METHOD_STATIC, "Caller", &sig_static_void());

    let module = InterpModule::load_from_bytes(&lib.universe, builder.build()).unwrap();
    let caller = module.methods()[1].clone();
    assert!(module.method_ir(&caller).is_err());
}
