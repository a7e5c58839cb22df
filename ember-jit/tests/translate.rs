//! End-to-end translation scenarios: assembled bytecode in, expected
//! instruction streams out.

mod common;

use common::*;
use ember_ir::{CmpOp, EdgeKind, Opcode, Payload};
use ember_jit::{translate_method, DefaultConfig};
use ember_types::{ClassInfo, TypeManager};
use test_case::test_case;

fn no_opt() -> Vec<(&'static str, bool)> {
    vec![("doCSE", false), ("doSimplify", false)]
}

#[test]
fn add_two_constants() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new().iconst(5).iconst(3).iadd().ireturn().finish();
    let i32t = tm.int32_type();
    let method = MethodBuilder::new(&mut tm, code).ret(i32t).build();

    let flags = no_opt();
    let result = translate_method(&mut tm, &mut rt, &method, &flags.as_slice()).unwrap();
    check_invariants(&result);

    assert_eq!(
        layout_ops(&result),
        vec![
            Opcode::MethodEntryLabel,
            Opcode::LdConstant,
            Opcode::LdConstant,
            Opcode::Add,
            Opcode::Return,
        ]
    );
}

#[test_case(0x60, Opcode::Add; "iadd")]
#[test_case(0x64, Opcode::Sub; "isub")]
#[test_case(0x68, Opcode::Mul; "imul")]
#[test_case(0x7e, Opcode::And; "iand")]
#[test_case(0x80, Opcode::Or; "ior")]
#[test_case(0x82, Opcode::Xor; "ixor")]
fn binary_arithmetic_lowers(op: u8, expected: Opcode) {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new().iload(0).iload(1).op(op).ireturn().finish();
    let i32t = tm.int32_type();
    let method = MethodBuilder::new(&mut tm, code)
        .param(i32t)
        .param(i32t)
        .ret(i32t)
        .build();

    let flags = no_opt();
    let result = translate_method(&mut tm, &mut rt, &method, &flags.as_slice()).unwrap();
    check_invariants(&result);
    assert_eq!(count_ops(&result, expected), 1);
}

#[test]
fn cse_reuses_equal_constants() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new().iconst(5).iconst(5).iadd().ireturn().finish();
    let i32t = tm.int32_type();
    let method = MethodBuilder::new(&mut tm, code).ret(i32t).build();

    let flags: Vec<(&str, bool)> = vec![("doCSE", true), ("doSimplify", false)];
    let result = translate_method(&mut tm, &mut rt, &method, &flags.as_slice()).unwrap();
    check_invariants(&result);

    assert_eq!(count_ops(&result, Opcode::LdConstant), 1);
    // both add sources are the same operand
    let node = entry_node(&result);
    let label = result.cfg.node(node).label;
    let add = result
        .arena
        .chain(label)
        .find(|&i| result.arena.inst(i).op == Opcode::Add)
        .unwrap();
    let add = result.arena.inst(add);
    assert_eq!(add.src(0), add.src(1));
    assert!(result.num_cse_hits > 0);
}

#[test]
fn simplification_folds_constant_add() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new().iconst(5).iconst(3).iadd().ireturn().finish();
    let i32t = tm.int32_type();
    let method = MethodBuilder::new(&mut tm, code).ret(i32t).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(count_ops(&result, Opcode::Add), 0);
    let node = entry_node(&result);
    let label = result.cfg.node(node).label;
    let ret = result
        .arena
        .chain(label)
        .find(|&i| result.arena.inst(i).op == Opcode::Return)
        .unwrap();
    let ret_src = result.arena.inst(ret).src(0);
    let def = result.arena.opnd(ret_src).def.unwrap();
    assert_eq!(
        result.arena.inst(def).const_value().and_then(|c| c.as_i4()),
        Some(8)
    );
}

#[test]
fn virtual_call_sequence() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();

    let callee_class = tm.register_class(ClassInfo::resolved("test/Callee", 7));
    let callee_ty = tm.object_type(callee_class);
    let i32t = tm.int32_type();
    rt.virtual_methods.insert(
        1,
        method_ref(40, "test/Callee", "answer", callee_ty, 1, i32t, false),
    );

    let code = Asm::new().aload(0).invokevirtual(1).pop().return_().finish();
    let target = tm.register_class(ClassInfo::resolved("test/Target", 2));
    let this_ty = tm.object_type(target);
    let method = MethodBuilder::new(&mut tm, code).instance(this_ty).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(
        layout_ops(&result),
        vec![
            Opcode::MethodEntryLabel,
            Opcode::DefArg,
            Opcode::TauCheckNull,
            Opcode::TauHasType,
            Opcode::TauVirtualCall,
            Opcode::Return,
        ]
    );
}

#[test]
fn constant_array_initializer_collapses() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new()
        .iconst(4)
        .newarray(10) // int[]
        .dup()
        .iconst(0)
        .iconst(7)
        .iastore()
        .dup()
        .iconst(1)
        .iconst(8)
        .iastore()
        .areturn()
        .finish();
    let i32t = tm.int32_type();
    let arr = tm.array_type(i32t);
    let method = MethodBuilder::new(&mut tm, code).ret(arr).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(
        layout_ops(&result),
        vec![
            Opcode::MethodEntryLabel,
            Opcode::LdConstant, // array length 4
            Opcode::NewArray,
            Opcode::LdConstant, // &{7, 8}
            Opcode::LdConstant, // elements offset
            Opcode::LdConstant, // data size in bytes
            Opcode::JitHelperCall,
            Opcode::Return,
        ]
    );
    // the image holds the two constants at four bytes each
    let node = entry_node(&result);
    let label = result.cfg.node(node).label;
    let blob = result
        .arena
        .chain(label)
        .find_map(|i| match result.arena.inst(i).payload {
            Payload::Const(ember_ir::ConstValue::Data(id)) => Some(id),
            _ => None,
        })
        .expect("data image constant");
    assert_eq!(result.arena.data(blob), [7, 0, 0, 0, 8, 0, 0, 0]);
}

#[test]
fn non_constant_initializer_translates_normally() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let i32t = tm.int32_type();
    // second element comes from a local, so the pattern must not match
    let code = Asm::new()
        .iconst(4)
        .newarray(10)
        .dup()
        .iconst(0)
        .iload(0)
        .iastore()
        .dup()
        .iconst(1)
        .iconst(8)
        .iastore()
        .areturn()
        .finish();
    let arr = tm.array_type(i32t);
    let method = MethodBuilder::new(&mut tm, code)
        .param(i32t)
        .ret(arr)
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(count_ops(&result, Opcode::JitHelperCall), 0);
    assert!(count_ops(&result, Opcode::TauStInd) >= 2);
}

#[test]
fn null_branch_builds_two_armed_cfg() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let target = tm.register_class(ClassInfo::resolved("test/Target", 2));
    let this_ty = tm.object_type(target);
    let i32t = tm.int32_type();

    // 0: aload_0; 1: ifnull 6; 4: iconst_1; 5: ireturn; 6: iconst_0; 7: ireturn
    let code = Asm::new()
        .aload(0)
        .ifnull(6)
        .iconst(1)
        .ireturn()
        .iconst(0)
        .ireturn()
        .finish();
    let method = MethodBuilder::new(&mut tm, code)
        .instance(this_ty)
        .ret(i32t)
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    let entry = entry_node(&result);
    let entry_ops = node_ops(&result, entry);
    assert_eq!(
        entry_ops,
        vec![Opcode::MethodEntryLabel, Opcode::DefArg, Opcode::Branch]
    );
    let branch = result.cfg.last_inst(entry, &result.arena);
    assert_eq!(result.arena.inst(branch).modifier.cmp(), Some(CmpOp::Zero));

    let succs = result.cfg.node(entry).succs();
    let true_edge = succs.iter().find(|(_, k)| *k == EdgeKind::True).unwrap();
    let false_edge = succs.iter().find(|(_, k)| *k == EdgeKind::False).unwrap();
    // the taken arm starts the L1 block returning 0
    assert_eq!(
        node_ops(&result, true_edge.0),
        vec![Opcode::Label, Opcode::LdConstant, Opcode::Return]
    );
    assert_eq!(
        node_ops(&result, false_edge.0),
        vec![Opcode::Label, Opcode::LdConstant, Opcode::Return]
    );
}

#[test]
fn synchronized_method_brackets_body() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let target = tm.register_class(ClassInfo::resolved("test/Target", 2));
    let this_ty = tm.object_type(target);

    let code = Asm::new().aload(0).areturn().finish();
    let method = MethodBuilder::new(&mut tm, code)
        .instance(this_ty)
        .ret(this_ty)
        .synchronized()
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    let blocks: Vec<_> = result
        .cfg
        .layout()
        .iter()
        .map(|&n| node_ops(&result, n))
        .collect();
    assert_eq!(blocks.len(), 2, "monitor exit lives in its own block");
    assert_eq!(
        blocks[0],
        vec![
            Opcode::MethodEntryLabel,
            Opcode::DefArg,
            Opcode::TauCheckNull,
            Opcode::MonitorEnter,
        ]
    );
    assert_eq!(
        blocks[1],
        vec![Opcode::Label, Opcode::MonitorExit, Opcode::Return]
    );
}

#[test]
fn unresolved_catch_type_poisons_the_body() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    // cp 99 resolves to nothing
    let code = Asm::new().iconst(1).pop().return_().finish();
    let method = MethodBuilder::new(&mut tm, code)
        .handler(ember_jit::runtime::HandlerRecord {
            try_begin: 0,
            try_end: 2,
            handler_pc: 2,
            class_token: 99,
        })
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(result.cfg.layout().len(), 1);
    assert_eq!(
        layout_ops(&result),
        vec![Opcode::MethodEntryLabel, Opcode::ThrowLinkingException]
    );
}

#[test]
fn empty_body_is_one_block() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let code = Asm::new().return_().finish();
    let method = MethodBuilder::new(&mut tm, code).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    assert_eq!(result.cfg.layout().len(), 1);
    assert_eq!(
        layout_ops(&result),
        vec![Opcode::MethodEntryLabel, Opcode::Return]
    );
}

#[test]
fn math_min_inlines_to_select() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let i32t = tm.int32_type();
    let math = tm.register_class(ClassInfo::resolved("java/lang/Math", 30));
    let math_ty = tm.object_type(math);
    rt.static_methods.insert(
        1,
        method_ref(50, "java/lang/Math", "min", math_ty, 2, i32t, true),
    );

    let code = Asm::new()
        .iload(0)
        .iload(1)
        .invokestatic(1)
        .ireturn()
        .finish();
    let method = MethodBuilder::new(&mut tm, code)
        .param(i32t)
        .param(i32t)
        .ret(i32t)
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    // hand-built min: no call remains, a compare feeds a select
    assert_eq!(count_ops(&result, Opcode::DirectCall), 0);
    assert_eq!(count_ops(&result, Opcode::Cmp), 1);
    assert_eq!(count_ops(&result, Opcode::Select), 1);
}

#[test]
fn dead_code_after_goto_is_skipped() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    // 0: goto 4; 3: nop (dead); 4: return
    let code = Asm::new().goto(4).op(0x00).return_().finish();
    let method = MethodBuilder::new(&mut tm, code).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    let ops = layout_ops(&result);
    assert!(ops.contains(&Opcode::Jump));
    assert!(ops.contains(&Opcode::Return));
}

#[test]
fn loop_with_iinc_round_trips_variables() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let i32t = tm.int32_type();
    // int i = 0; while (i < 10) i += 1; return i;
    // 0: iconst_0; 1: istore_0; 2: iload_0; 3: bipush 10; 5: if_icmpge 14;
    // 8: iinc 0, 1; 11: goto 2; 14: iload_0; 15: ireturn
    let code = Asm::new()
        .iconst(0)
        .istore(0)
        .iload(0)
        .iconst(10)
        .if_icmpge(14)
        .iinc(0, 1)
        .goto(2)
        .iload(0)
        .ireturn()
        .finish();
    let method = MethodBuilder::new(&mut tm, code).ret(i32t).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    // the loop variable becomes a real variable with loads and stores
    assert!(count_ops(&result, Opcode::StVar) >= 2);
    assert!(count_ops(&result, Opcode::LdVar) >= 2);
    // the backward goto emits a pseudo throw to keep its dispatch distinct
    assert!(count_ops(&result, Opcode::PseudoThrow) >= 1);
    // the loop header must be reachable from the latch
    assert!(result.cfg.layout().len() >= 3);
}

#[test]
fn athrow_terminates_its_block() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let target = tm.register_class(ClassInfo::resolved("test/Target", 2));
    let this_ty = tm.object_type(target);
    let code = Asm::new().aload(0).athrow().finish();
    let method = MethodBuilder::new(&mut tm, code).instance(this_ty).build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);
    assert_eq!(
        layout_ops(&result),
        vec![Opcode::MethodEntryLabel, Opcode::DefArg, Opcode::Throw]
    );
}

#[test]
fn catch_region_dispatches_to_handler() {
    let mut tm = TypeManager::new(false);
    let mut rt = FakeRuntime::new();
    let exc = tm.register_class(ClassInfo::resolved("java/lang/Exception", 21));
    let exc_ty = tm.object_type(exc);
    rt.named_types.insert(21, exc_ty);

    let target = tm.register_class(ClassInfo::resolved("test/Target", 2));
    let this_ty = tm.object_type(target);
    rt.virtual_methods.insert(
        1,
        method_ref(41, "test/Target", "risky", this_ty, 1, tm.void_type(), false),
    );

    // 0: aload_0; 1: invokevirtual #1; 4: return; 5: (handler) pop; 6: return
    let code = Asm::new()
        .aload(0)
        .invokevirtual(1)
        .return_()
        .pop()
        .return_()
        .finish();
    let method = MethodBuilder::new(&mut tm, code)
        .instance(this_ty)
        .handler(ember_jit::runtime::HandlerRecord {
            try_begin: 0,
            try_end: 5,
            handler_pc: 5,
            class_token: 21,
        })
        .build();

    let result = translate_method(&mut tm, &mut rt, &method, &DefaultConfig).unwrap();
    check_invariants(&result);

    // one dispatch node exists, fed by a catch edge and feeding the
    // catch-label block
    let dispatch: Vec<_> = result
        .cfg
        .nodes()
        .filter(|&n| result.cfg.node(n).kind == ember_ir::NodeKind::Dispatch)
        .collect();
    assert_eq!(dispatch.len(), 1);
    let d = dispatch[0];
    let has_catch_edge = result.cfg.nodes().any(|n| {
        result
            .cfg
            .node(n)
            .succs()
            .iter()
            .any(|&(to, k)| to == d && k == EdgeKind::Catch)
    });
    assert!(has_catch_edge);
    let handler_succ = result.cfg.node(d).succs();
    assert_eq!(handler_succ.len(), 1);
    // the dispatch target is the bare catch label; the caught-exception
    // definition sits in the handler body block it falls into
    let catch_block = handler_succ[0].0;
    assert_eq!(node_ops(&result, catch_block), vec![Opcode::CatchLabel]);
    let body = result
        .cfg
        .node(catch_block)
        .succs()
        .iter()
        .find(|(_, k)| *k == EdgeKind::Unconditional)
        .expect("catch label falls through to the handler body")
        .0;
    let body_ops = node_ops(&result, body);
    assert_eq!(body_ops[0], Opcode::Label);
    assert_eq!(body_ops[1], Opcode::Catch);
}
