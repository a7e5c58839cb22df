//! Call lowering, allocation, type checks and synchronization.

use ember_ir::{
    JitHelperId, Modifier, Opcode, OpndId, Payload, VmHelperId,
};
use ember_types::{Ty, TypeManager};

use super::{CseKey, IrBuilder};
use crate::runtime::MethodRef;

impl IrBuilder {
    fn fill_tau(&mut self, tau: Option<OpndId>) -> OpndId {
        match tau {
            Some(t) => self.propagate_copy(t),
            None => self.gen_tau_unsafe(),
        }
    }

    fn is_tau_unsafe(&self, tau: OpndId) -> bool {
        matches!(self.def_of(tau), Some(inst) if inst.op == Opcode::TauUnsafe)
    }

    //
    // calls
    //

    pub fn gen_direct_call(
        &mut self,
        tm: &mut TypeManager,
        method: &MethodRef,
        return_ty: Ty,
        tau_null_checked_first_arg: Option<OpndId>,
        tau_types_checked: Option<OpndId>,
        args: &[OpndId],
    ) -> OpndId {
        let tau_null = self.fill_tau(tau_null_checked_first_arg);
        let tau_types = self.fill_tau(tau_types_checked);
        let args: Vec<_> = args.iter().map(|&a| self.propagate_copy(a)).collect();
        if self.flags.expand_call_addrs {
            let fun = self.gen_ld_fun_addr_slot(tm, method);
            return self.gen_indirect_memory_call(
                return_ty,
                fun,
                Some(tau_null),
                Some(tau_types),
                &args,
            );
        }
        let mut srcs = vec![tau_null, tau_types];
        srcs.extend(args);
        self.emit(
            Opcode::DirectCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::Method(method.id),
        )
    }

    pub fn gen_tau_virtual_call(
        &mut self,
        tm: &mut TypeManager,
        method: &MethodRef,
        return_ty: Ty,
        tau_null_checked_first_arg: Option<OpndId>,
        tau_types_checked: Option<OpndId>,
        args: &[OpndId],
    ) -> OpndId {
        if !method.is_virtual {
            // no vtable slot to dispatch through
            return self.gen_direct_call(
                tm,
                method,
                return_ty,
                tau_null_checked_first_arg,
                tau_types_checked,
                args,
            );
        }
        let mut args: Vec<_> = args.iter().map(|&a| self.propagate_copy(a)).collect();
        let tau_null = match tau_null_checked_first_arg {
            Some(t) if !self.is_tau_unsafe(t) => self.propagate_copy(t),
            _ => self.gen_tau_check_null(args[0]),
        };
        let tau_types = match tau_types_checked {
            Some(t) if !self.is_tau_unsafe(t) => self.propagate_copy(t),
            _ => {
                let mut receiver = args[0];
                let tau = self.gen_tau_has_type_with_conv(tm, &mut receiver, method.parent_ty);
                args[0] = receiver;
                tau
            }
        };
        if self.flags.expand_virtual_call_addrs {
            let fun = self.gen_tau_ld_virt_fun_addr_slot(tm, args[0], tau_null, method);
            return self.gen_indirect_memory_call(
                return_ty,
                fun,
                Some(tau_null),
                Some(tau_types),
                &args,
            );
        }
        let mut srcs = vec![tau_null, tau_types];
        srcs.extend(args);
        self.emit(
            Opcode::TauVirtualCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::Method(method.id),
        )
    }

    pub fn gen_indirect_call(
        &mut self,
        return_ty: Ty,
        fun_addr: OpndId,
        tau_null_checked_first_arg: Option<OpndId>,
        tau_types_checked: Option<OpndId>,
        args: &[OpndId],
    ) -> OpndId {
        let fun_addr = self.propagate_copy(fun_addr);
        let tau_null = self.fill_tau(tau_null_checked_first_arg);
        let tau_types = self.fill_tau(tau_types_checked);
        let mut srcs = vec![fun_addr, tau_null, tau_types];
        srcs.extend(args.iter().map(|&a| self.propagate_copy(a)));
        self.emit(
            Opcode::IndirectCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::None,
        )
    }

    pub fn gen_indirect_memory_call(
        &mut self,
        return_ty: Ty,
        fun_addr: OpndId,
        tau_null_checked_first_arg: Option<OpndId>,
        tau_types_checked: Option<OpndId>,
        args: &[OpndId],
    ) -> OpndId {
        let fun_addr = self.propagate_copy(fun_addr);
        let tau_null = self.fill_tau(tau_null_checked_first_arg);
        let tau_types = self.fill_tau(tau_types_checked);
        let mut srcs = vec![fun_addr, tau_null, tau_types];
        srcs.extend(args.iter().map(|&a| self.propagate_copy(a)));
        self.emit(
            Opcode::IndirectMemoryCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::None,
        )
    }

    pub fn gen_jit_helper_call(
        &mut self,
        helper: JitHelperId,
        return_ty: Ty,
        args: &[OpndId],
    ) -> OpndId {
        let srcs: Vec<_> = args.iter().map(|&a| self.propagate_copy(a)).collect();
        self.emit(
            Opcode::JitHelperCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::JitHelper(helper),
        )
    }

    pub fn gen_vm_helper_call(
        &mut self,
        helper: VmHelperId,
        return_ty: Ty,
        args: &[OpndId],
    ) -> OpndId {
        let srcs: Vec<_> = args.iter().map(|&a| self.propagate_copy(a)).collect();
        self.emit(
            Opcode::VmHelperCall,
            Modifier::none(),
            return_ty,
            srcs,
            Payload::VmHelper(helper),
        )
    }

    /// Unresolved call site: ask the runtime to resolve and hand back a
    /// callable address, then call it indirectly. The resolved address is
    /// cached across repeated call sites on the same constant-pool index.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_indirect_call_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        return_ty: Ty,
        tau_null_checked_first_arg: Option<OpndId>,
        tau_types_checked: Option<OpndId>,
        args: &[OpndId],
        enclosing: Ty,
        enclosing_class: ember_types::ClassId,
        bc_opcode: u8,
        cp_index: u32,
    ) -> OpndId {
        debug_assert!(!tm.is_null_object(return_ty));
        let arg0 = args.first().map(|&a| a.id()).unwrap_or(0);
        let code = self.code(Opcode::VmHelperCall, self.types.tau, Modifier::none());
        let key = CseKey::with3(code, bc_opcode as u32, cp_index, arg0);
        let tau_types = Some(self.fill_tau(tau_types_checked));

        let call_addr = match self.lookup(key) {
            Some(addr) => addr,
            None => {
                let cls = self.gen_get_class_obj(tm, enclosing);
                let idx = self.gen_ld_constant_i4(cp_index as i32);
                let (helper, receiver) = match bc_opcode {
                    0xb8 => (VmHelperId::GetInvokeStaticAddrWithResolve, None),
                    0xb6 => (VmHelperId::GetInvokeVirtualAddrWithResolve, Some(args[0])),
                    0xb7 => (VmHelperId::GetInvokeSpecialAddrWithResolve, None),
                    0xb9 => (VmHelperId::GetInvokeInterfaceAddrWithResolve, Some(args[0])),
                    _ => unreachable!("not an invoke opcode"),
                };
                let fun_ty = tm.unresolved_method_ptr_type(enclosing_class, cp_index);
                let mut helper_args = vec![cls, idx];
                helper_args.extend(receiver);
                let addr = self.gen_vm_helper_call(helper, fun_ty, &helper_args);
                self.insert(key, addr);
                addr
            }
        };
        self.gen_indirect_memory_call(
            return_ty,
            call_addr,
            tau_null_checked_first_arg,
            tau_types,
            args,
        )
    }

    //
    // function addresses and vtables
    //

    pub fn gen_ld_fun_addr(&mut self, tm: &mut TypeManager, method: &MethodRef) -> OpndId {
        let ty = tm.method_ptr_type(ember_types::MethodToken(method.id.0));
        let code = self.code(Opcode::LdFunAddr, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, method.id.0)) {
            return dst;
        }
        let dst = self.emit(
            Opcode::LdFunAddr,
            Modifier::none(),
            ty,
            Vec::new(),
            Payload::Method(method.id),
        );
        self.insert(CseKey::with1(code, method.id.0), dst);
        dst
    }

    pub fn gen_ld_fun_addr_slot(&mut self, tm: &mut TypeManager, method: &MethodRef) -> OpndId {
        let ty = tm.method_ptr_type(ember_types::MethodToken(method.id.0));
        let code = self.code(Opcode::LdFunAddrSlot, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, method.id.0)) {
            return dst;
        }
        let dst = self.emit(
            Opcode::LdFunAddrSlot,
            Modifier::none(),
            ty,
            Vec::new(),
            Payload::Method(method.id),
        );
        self.insert(CseKey::with1(code, method.id.0), dst);
        dst
    }

    pub fn gen_ld_vtable(&mut self, tm: &mut TypeManager, base: OpndId, ty: Ty) -> OpndId {
        let base = self.propagate_copy(base);
        let tau_null = self.gen_tau_check_null(base);
        self.gen_tau_ld_vtable(tm, base, tau_null, ty)
    }

    pub fn gen_tau_ld_vtable(
        &mut self,
        tm: &mut TypeManager,
        base: OpndId,
        tau_null_checked: OpndId,
        ty: Ty,
    ) -> OpndId {
        let base = self.propagate_copy(base);
        let vt_ty = tm.vtable_ptr_type(ty);
        let code = self.code(Opcode::TauLdVTableAddr, vt_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, base.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::TauLdVTableAddr,
            Modifier::none(),
            vt_ty,
            vec![base, tau_null_checked],
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with1(code, base.id()), dst);
        dst
    }

    /// Class vtable as a constant (for exact-type comparisons).
    pub fn gen_get_vtable(&mut self, tm: &mut TypeManager, ty: Ty) -> OpndId {
        let vt_ty = tm.vtable_ptr_type(ty);
        let code = self.code(Opcode::GetVTableAddr, vt_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, ty.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::GetVTableAddr,
            Modifier::none(),
            vt_ty,
            Vec::new(),
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with1(code, ty.id()), dst);
        dst
    }

    pub fn gen_get_class_obj(&mut self, tm: &mut TypeManager, ty: Ty) -> OpndId {
        debug_assert!(tm.is_object(ty));
        let cls = self.types.sys_class;
        let code = self.code(Opcode::GetClassObj, cls, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, ty.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::GetClassObj,
            Modifier::none(),
            cls,
            Vec::new(),
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with1(code, ty.id()), dst);
        dst
    }

    pub fn gen_tau_ld_virt_fun_addr_slot(
        &mut self,
        tm: &mut TypeManager,
        base: OpndId,
        tau_ok: OpndId,
        method: &MethodRef,
    ) -> OpndId {
        let vtable = self.gen_tau_ld_vtable(tm, base, tau_ok, method.parent_ty);
        let ty = tm.method_ptr_type(ember_types::MethodToken(method.id.0));
        let code = self.code(Opcode::TauLdVirtFunAddrSlot, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, vtable.id(), method.id.0)) {
            return dst;
        }
        let dst = self.emit(
            Opcode::TauLdVirtFunAddrSlot,
            Modifier::none(),
            ty,
            vec![vtable, tau_ok],
            Payload::Method(method.id),
        );
        self.insert(CseKey::with2(code, vtable.id(), method.id.0), dst);
        dst
    }

    //
    // allocation
    //

    pub fn gen_new_obj(&mut self, ty: Ty) -> OpndId {
        self.emit(Opcode::NewObj, Modifier::none(), ty, Vec::new(), Payload::None)
    }

    pub fn gen_new_obj_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let ret = tm.unresolved_object_type();
        self.gen_vm_helper_call(VmHelperId::NewResolvedUsingAllocHandle, ret, &[cls, idx])
    }

    pub fn gen_new_array(&mut self, tm: &mut TypeManager, elem_ty: Ty, num_elems: OpndId) -> OpndId {
        let num_elems = self.propagate_copy(num_elems);
        let arr = tm.array_type(elem_ty);
        self.emit(
            Opcode::NewArray,
            Modifier::none(),
            arr,
            vec![num_elems],
            Payload::TypeOp(elem_ty),
        )
    }

    pub fn gen_new_array_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        _elem_ty: Ty,
        num_elems: OpndId,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let num_elems = self.propagate_copy(num_elems);
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let ret = tm.unresolved_object_type();
        self.gen_vm_helper_call(
            VmHelperId::NewVectorUsingVtable,
            ret,
            &[cls, idx, num_elems],
        )
    }

    pub fn gen_multianewarray(
        &mut self,
        array_ty: Ty,
        dims: &[OpndId],
    ) -> OpndId {
        let srcs: Vec<_> = dims.iter().map(|&d| self.propagate_copy(d)).collect();
        self.emit(
            Opcode::NewMultiArray,
            Modifier::none(),
            array_ty,
            srcs,
            Payload::None,
        )
    }

    pub fn gen_multianewarray_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        _array_ty: Ty,
        enclosing: Ty,
        cp_index: u32,
        dims: &[OpndId],
    ) -> OpndId {
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let ret = tm.unresolved_object_type();
        let mut args = vec![cls, idx];
        args.extend(dims.iter().map(|&d| self.propagate_copy(d)));
        self.gen_vm_helper_call(VmHelperId::NewVectorUsingVtable, ret, &args)
    }

    //
    // type checks and casts
    //

    /// A cast is a check plus a typed alias, so later passes can reason
    /// about the success path separately from the check.
    pub fn gen_cast(&mut self, src: OpndId, ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let tau_null = self.gen_tau_unsafe();
        let tau_checked = self.gen_tau_check_cast(src, tau_null, ty);
        self.gen_tau_static_cast(src, tau_checked, ty)
    }

    pub fn gen_cast_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        src: OpndId,
        ty: Ty,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let src = self.propagate_copy(src);
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        self.gen_vm_helper_call(VmHelperId::CheckCast, ty, &[cls, idx, src])
    }

    pub fn gen_tau_check_cast(&mut self, src: OpndId, tau_null_checked: OpndId, ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauCheckCast, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src.id(), ty.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_tau_check_cast(src, ty) {
            return dst;
        }
        let tau = self.types.tau;
        let dst = self.emit(
            Opcode::TauCheckCast,
            Modifier::none(),
            tau,
            vec![src, tau_null_checked],
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with2(code, src.id(), ty.id()), dst);
        dst
    }

    pub fn gen_tau_static_cast(&mut self, src: OpndId, tau_checked_cast: OpndId, ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let code = self.code(Opcode::TauStaticCast, ty, Modifier::none());
        if let Some(dst) =
            self.lookup(CseKey::with3(code, src.id(), tau_checked_cast.id(), ty.id()))
        {
            return dst;
        }
        let dst = self.emit(
            Opcode::TauStaticCast,
            Modifier::none(),
            ty,
            vec![src, tau_checked_cast],
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with3(code, src.id(), tau_checked_cast.id(), ty.id()), dst);
        // the cast's success also witnesses the has-type fact
        let ht_code = self.code(Opcode::TauHasType, ty, Modifier::none());
        self.insert(CseKey::with2(ht_code, src.id(), ty.id()), dst);
        dst
    }

    /// `src` when it is an instance of `ty`, null otherwise.
    pub fn gen_as_type(&mut self, src: OpndId, ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        self.emit(
            Opcode::TauAsType,
            Modifier::none(),
            ty,
            vec![src],
            Payload::TypeOp(ty),
        )
    }

    pub fn gen_instance_of(&mut self, src: OpndId, ty: Ty) -> OpndId {
        let src = self.propagate_copy(src);
        let i32t = self.types.i32;
        let code = self.code(Opcode::TauInstanceOf, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, src.id(), ty.id())) {
            return dst;
        }
        if let Some(dst) = self.simplify_instance_of(src, ty) {
            return dst;
        }
        let dst = self.emit(
            Opcode::TauInstanceOf,
            Modifier::none(),
            i32t,
            vec![src],
            Payload::TypeOp(ty),
        );
        self.insert(CseKey::with2(code, src.id(), ty.id()), dst);
        dst
    }

    pub fn gen_instance_of_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        src: OpndId,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let src = self.propagate_copy(src);
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let i32t = self.types.i32;
        self.gen_vm_helper_call(VmHelperId::InstanceOf, i32t, &[cls, idx, src])
    }

    //
    // synchronization
    //

    pub fn gen_monitor_enter(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        let tau = self.gen_tau_check_null(src);
        self.emit_void(
            Opcode::MonitorEnter,
            Modifier::none(),
            vec![src, tau],
            Payload::None,
        );
    }

    pub fn gen_monitor_exit(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        let tau = self.gen_tau_check_null(src);
        self.emit_void(
            Opcode::MonitorExit,
            Modifier::none(),
            vec![src, tau],
            Payload::None,
        );
    }

    pub fn gen_type_monitor_enter(&mut self, ty: Ty) {
        self.emit_void(
            Opcode::TypeMonitorEnter,
            Modifier::none(),
            Vec::new(),
            Payload::TypeOp(ty),
        );
    }

    pub fn gen_type_monitor_exit(&mut self, ty: Ty) {
        self.emit_void(
            Opcode::TypeMonitorExit,
            Modifier::none(),
            Vec::new(),
            Payload::TypeOp(ty),
        );
    }

    /// Address of the object's lock word, a `u16` slot in the header.
    pub fn gen_ld_lock_addr(&mut self, tm: &mut TypeManager, obj: OpndId) -> OpndId {
        let obj = self.propagate_copy(obj);
        let u16t = self.types.uint16;
        let ptr = tm.managed_ptr_type(u16t);
        self.emit(Opcode::LdLockAddr, Modifier::none(), ptr, vec![obj], Payload::None)
    }

    pub fn gen_balanced_monitor_enter(&mut self, obj: OpndId, lock_addr: OpndId) -> OpndId {
        let obj = self.propagate_copy(obj);
        let i32t = self.types.i32;
        self.emit(
            Opcode::BalancedMonitorEnter,
            Modifier::none(),
            i32t,
            vec![obj, lock_addr],
            Payload::None,
        )
    }

    pub fn gen_balanced_monitor_exit(&mut self, obj: OpndId, lock_addr: OpndId, old_value: OpndId) {
        let obj = self.propagate_copy(obj);
        self.emit_void(
            Opcode::BalancedMonitorExit,
            Modifier::none(),
            vec![obj, lock_addr, old_value],
            Payload::None,
        );
    }

    pub fn gen_monitor_enter_fence(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        self.emit_void(
            Opcode::MonitorEnterFence,
            Modifier::none(),
            vec![src],
            Payload::None,
        );
    }

    pub fn gen_monitor_exit_fence(&mut self, src: OpndId) {
        let src = self.propagate_copy(src);
        self.emit_void(
            Opcode::MonitorExitFence,
            Modifier::none(),
            vec![src],
            Payload::None,
        );
    }
}
