//! Shared test fixtures: a tiny bytecode assembler and a scripted fake
//! runtime.

#![allow(dead_code)]

use ember_ir::{
    ControlFlowGraph, FieldId, InstId, MethodId, NodeId, Opcode, Payload, VmHelperId,
};
use ember_jit::runtime::{
    CompilationInterface, ConstLiteral, FieldDesc, HandlerRecord, MethodDesc, MethodRef,
};
use ember_jit::session::TranslationResult;
use ember_types::{ClassId, ClassInfo, Ty, TypeManager};
use hashbrown::HashMap;

/// Minimal method-body assembler. Offsets are implicit; branch helpers take
/// absolute target offsets.
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn here(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn op(mut self, byte: u8) -> Self {
        self.code.push(byte);
        self
    }

    pub fn iconst(self, v: i32) -> Self {
        match v {
            -1..=5 => self.op((v + 3) as u8),
            -128..=127 => self.op(0x10).op(v as i8 as u8),
            _ => {
                let mut s = self.op(0x11);
                s.code.extend_from_slice(&(v as i16).to_be_bytes());
                s
            }
        }
    }

    pub fn aconst_null(self) -> Self {
        self.op(0x01)
    }

    pub fn ldc(self, cp: u8) -> Self {
        self.op(0x12).op(cp)
    }

    pub fn iload(self, n: u8) -> Self {
        debug_assert!(n <= 3);
        self.op(0x1a + n)
    }

    pub fn aload(self, n: u8) -> Self {
        debug_assert!(n <= 3);
        self.op(0x2a + n)
    }

    pub fn istore(self, n: u8) -> Self {
        debug_assert!(n <= 3);
        self.op(0x3b + n)
    }

    pub fn astore(self, n: u8) -> Self {
        debug_assert!(n <= 3);
        self.op(0x4b + n)
    }

    pub fn dup(self) -> Self {
        self.op(0x59)
    }

    pub fn pop(self) -> Self {
        self.op(0x57)
    }

    pub fn iadd(self) -> Self {
        self.op(0x60)
    }

    pub fn isub(self) -> Self {
        self.op(0x64)
    }

    pub fn imul(self) -> Self {
        self.op(0x68)
    }

    pub fn idiv(self) -> Self {
        self.op(0x6c)
    }

    pub fn iastore(self) -> Self {
        self.op(0x4f)
    }

    pub fn branch(mut self, opcode: u8, target: u32) -> Self {
        let at = self.code.len() as i64;
        self.code.push(opcode);
        let rel = (target as i64 - at) as i16;
        self.code.extend_from_slice(&rel.to_be_bytes());
        self
    }

    pub fn ifnull(self, target: u32) -> Self {
        self.branch(0xc6, target)
    }

    pub fn ifeq(self, target: u32) -> Self {
        self.branch(0x99, target)
    }

    pub fn if_icmpge(self, target: u32) -> Self {
        self.branch(0xa2, target)
    }

    pub fn goto(self, target: u32) -> Self {
        self.branch(0xa7, target)
    }

    pub fn ireturn(self) -> Self {
        self.op(0xac)
    }

    pub fn areturn(self) -> Self {
        self.op(0xb0)
    }

    pub fn return_(self) -> Self {
        self.op(0xb1)
    }

    pub fn iinc(self, var: u8, delta: i8) -> Self {
        self.op(0x84).op(var).op(delta as u8)
    }

    pub fn invokevirtual(mut self, cp: u16) -> Self {
        self.code.push(0xb6);
        self.code.extend_from_slice(&cp.to_be_bytes());
        self
    }

    pub fn invokestatic(mut self, cp: u16) -> Self {
        self.code.push(0xb8);
        self.code.extend_from_slice(&cp.to_be_bytes());
        self
    }

    pub fn newarray(self, elem_code: u8) -> Self {
        self.op(0xbc).op(elem_code)
    }

    pub fn athrow(self) -> Self {
        self.op(0xbf)
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}

/// Scripted runtime standing in for class loading and resolution.
pub struct FakeRuntime {
    pub constants: HashMap<u32, ConstLiteral>,
    pub virtual_methods: HashMap<u32, MethodRef>,
    pub special_methods: HashMap<u32, MethodRef>,
    pub static_methods: HashMap<u32, MethodRef>,
    pub interface_methods: HashMap<u32, MethodRef>,
    pub static_fields: HashMap<u32, FieldDesc>,
    pub instance_fields: HashMap<u32, FieldDesc>,
    pub named_types: HashMap<u32, Ty>,
    pub signatures: HashMap<u32, String>,
    pub lazy: bool,
    pub write_barriers: bool,
    pub compressed: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            constants: HashMap::new(),
            virtual_methods: HashMap::new(),
            special_methods: HashMap::new(),
            static_methods: HashMap::new(),
            interface_methods: HashMap::new(),
            static_fields: HashMap::new(),
            instance_fields: HashMap::new(),
            named_types: HashMap::new(),
            signatures: HashMap::new(),
            lazy: false,
            write_barriers: false,
            compressed: false,
        }
    }
}

impl CompilationInterface for FakeRuntime {
    fn get_static_field(
        &mut self,
        _tm: &mut TypeManager,
        cp_index: u32,
        _for_write: bool,
    ) -> Option<FieldDesc> {
        self.static_fields.get(&cp_index).copied()
    }

    fn get_nonstatic_field(
        &mut self,
        _tm: &mut TypeManager,
        cp_index: u32,
        _for_write: bool,
    ) -> Option<FieldDesc> {
        self.instance_fields.get(&cp_index).copied()
    }

    fn get_field_type(&mut self, _tm: &mut TypeManager, cp_index: u32) -> Option<Ty> {
        self.static_fields
            .get(&cp_index)
            .or_else(|| self.instance_fields.get(&cp_index))
            .map(|f| f.ty)
    }

    fn get_virtual_method(&mut self, _tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef> {
        self.virtual_methods.get(&cp_index).cloned()
    }

    fn get_special_method(&mut self, _tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef> {
        self.special_methods.get(&cp_index).cloned()
    }

    fn get_static_method(&mut self, _tm: &mut TypeManager, cp_index: u32) -> Option<MethodRef> {
        self.static_methods.get(&cp_index).cloned()
    }

    fn get_interface_method(
        &mut self,
        _tm: &mut TypeManager,
        cp_index: u32,
    ) -> Option<MethodRef> {
        self.interface_methods.get(&cp_index).cloned()
    }

    fn get_named_type(
        &mut self,
        tm: &mut TypeManager,
        cp_index: u32,
        _resolve_new_check: bool,
    ) -> Ty {
        self.named_types
            .get(&cp_index)
            .copied()
            .unwrap_or_else(|| tm.unresolved_object_type())
    }

    fn get_constant_type(&mut self, tm: &mut TypeManager, cp_index: u32) -> Ty {
        match self.constants.get(&cp_index) {
            Some(ConstLiteral::I4(_)) => tm.int32_type(),
            Some(ConstLiteral::I8(_)) => tm.int64_type(),
            Some(ConstLiteral::Single(_)) => tm.single_type(),
            Some(ConstLiteral::Double(_)) => tm.double_type(),
            Some(ConstLiteral::String { .. }) => tm.system_string_type(),
            Some(ConstLiteral::Class { .. }) => tm.system_class_type(),
            None => tm.unresolved_object_type(),
        }
    }

    fn get_constant_value(&mut self, cp_index: u32) -> Option<ConstLiteral> {
        self.constants.get(&cp_index).copied()
    }

    fn get_signature_string(&mut self, cp_index: u32) -> String {
        self.signatures
            .get(&cp_index)
            .cloned()
            .unwrap_or_else(|| "()V".to_string())
    }

    fn needs_write_barriers(&self) -> bool {
        self.write_barriers
    }

    fn are_references_compressed(&self) -> bool {
        self.compressed
    }

    fn is_lazy_resolution_mode(&self) -> bool {
        self.lazy
    }
}

/// A compiled-method description over assembled code.
pub struct MethodBuilder {
    desc: MethodDesc,
}

impl MethodBuilder {
    pub fn new(tm: &mut TypeManager, code: Vec<u8>) -> Self {
        let class = tm.register_class(ClassInfo::resolved("test/Target", 1));
        let parent_ty = tm.object_type(class);
        Self {
            desc: MethodDesc {
                id: MethodId(1),
                name: "subject".into(),
                parent_class: class,
                parent_ty,
                code,
                max_stack: 8,
                max_locals: 4,
                is_static: true,
                is_synchronized: false,
                is_strict: false,
                param_tys: Vec::new(),
                ret_ty: None,
                handlers: Vec::new(),
            },
        }
    }

    pub fn instance(mut self, this_ty: Ty) -> Self {
        self.desc.is_static = false;
        self.desc.param_tys.insert(0, Some(this_ty));
        self
    }

    pub fn synchronized(mut self) -> Self {
        self.desc.is_synchronized = true;
        self
    }

    pub fn param(mut self, ty: Ty) -> Self {
        self.desc.param_tys.push(Some(ty));
        self
    }

    pub fn ret(mut self, ty: Ty) -> Self {
        self.desc.ret_ty = Some(ty);
        self
    }

    pub fn handler(mut self, rec: HandlerRecord) -> Self {
        self.desc.handlers.push(rec);
        self
    }

    pub fn build(self) -> MethodDesc {
        self.desc
    }
}

/// A resolved callee of the given shape.
pub fn method_ref(
    id: u32,
    class_name: &str,
    name: &str,
    parent_ty: Ty,
    num_params: u32,
    ret_ty: Ty,
    is_static: bool,
) -> MethodRef {
    MethodRef {
        id: MethodId(id),
        name: name.into(),
        class_name: class_name.into(),
        parent_ty,
        num_params,
        ret_ty: Some(ret_ty),
        is_static,
        is_virtual: !is_static,
        is_native: false,
        signature: "()V".into(),
    }
}

pub fn field_desc(id: u32, ty: Ty, parent: ClassId, parent_ty: Ty, is_static: bool) -> FieldDesc {
    FieldDesc {
        id: FieldId(id),
        ty,
        parent_class: parent,
        parent_ty,
        is_static,
    }
}

/// Opcode sequence of one node's instruction chain.
pub fn node_ops(result: &TranslationResult, node: NodeId) -> Vec<Opcode> {
    let label = result.cfg.node(node).label;
    result
        .arena
        .chain(label)
        .map(|i| result.arena.inst(i).op)
        .collect()
}

/// Opcode sequence of the whole method, blocks in layout order.
pub fn layout_ops(result: &TranslationResult) -> Vec<Opcode> {
    result
        .cfg
        .layout()
        .iter()
        .flat_map(|&n| node_ops(result, n))
        .collect()
}

/// First block of the method.
pub fn entry_node(result: &TranslationResult) -> NodeId {
    result.cfg.entry().expect("translated methods have an entry")
}

/// Structural invariants every produced graph must satisfy.
pub fn check_invariants(result: &TranslationResult) {
    let cfg: &ControlFlowGraph = &result.cfg;
    for node in cfg.nodes() {
        let label: InstId = cfg.node(node).label;
        assert!(
            result.arena.inst(label).op.is_label(),
            "block does not start with a label"
        );
        let mut seen_terminator = false;
        for inst_id in result.arena.chain(label) {
            let inst = result.arena.inst(inst_id);
            assert!(!seen_terminator, "instruction after a terminator");
            if inst.op.is_terminator() && inst.op != Opcode::PseudoThrow {
                seen_terminator = true;
            }
            // every destination knows its definition
            if !inst.dst.is_null() {
                let opnd = result.arena.opnd(inst.dst);
                if !opnd.is_var() {
                    assert_eq!(opnd.def, Some(inst_id), "dangling SSA definition");
                }
            }
        }
    }
}

/// Count instructions with the given opcode over the whole arena.
pub fn count_ops(result: &TranslationResult, op: Opcode) -> usize {
    layout_ops(result).iter().filter(|&&o| o == op).count()
}

/// The payload of the single `VmHelperCall`-of-interest, for assertions.
pub fn helper_calls(result: &TranslationResult) -> Vec<VmHelperId> {
    let mut out = Vec::new();
    for &node in result.cfg.layout() {
        let label = result.cfg.node(node).label;
        for inst_id in result.arena.chain(label) {
            if let Payload::VmHelper(id) = result.arena.inst(inst_id).payload {
                out.push(id);
            }
        }
    }
    out
}
