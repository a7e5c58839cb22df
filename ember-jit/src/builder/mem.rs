//! Field, static and array-element access lowering, including the
//! expanded address-computation forms and compressed-reference handling.

use ember_ir::{
    AutoCompressOp, Modifier, Opcode, OpndId, Payload, VmHelperId,
};
use ember_types::{Ty, TypeManager};

use super::{CseKey, IrBuilder};
use crate::runtime::FieldDesc;

impl IrBuilder {
    fn autocompress_mod(&self, tm: &TypeManager, ty: Ty) -> Modifier {
        if self.flags.compressed_references && tm.is_object(ty) {
            debug_assert!(!tm.is_compressed(ty));
            Modifier::none().with_autocompress(AutoCompressOp::Yes)
        } else {
            Modifier::none()
        }
    }

    fn field_ptr_ty(&self, tm: &mut TypeManager, ty: Ty) -> Ty {
        if self.flags.compressed_references && tm.is_object(ty) {
            let compressed = tm.compress_type(ty);
            tm.managed_ptr_type(compressed)
        } else {
            tm.managed_ptr_type(ty)
        }
    }

    //
    // loads
    //

    pub fn gen_ld_field(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        field: FieldDesc,
    ) -> OpndId {
        debug_assert!(!field.is_static);
        let base = self.propagate_copy(base);
        let tau_null = self.gen_tau_check_null(base);
        let tau_in_range = self.gen_tau_has_type(base, field.parent_ty);
        let modifier = self.autocompress_mod(tm, ty);
        if self.flags.expand_mem_addrs {
            let addr = self.gen_ld_field_addr(tm, ty, base, field);
            return self.gen_tau_ld_ind(modifier, ty, addr, tau_null, tau_in_range);
        }
        self.emit(
            Opcode::TauLdField,
            modifier,
            ty,
            vec![base, tau_null, tau_in_range],
            Payload::Field(field.id),
        )
    }

    pub fn gen_ld_static(&mut self, tm: &mut TypeManager, ty: Ty, field: FieldDesc, parent_of_method: Ty) -> OpndId {
        let modifier = self.autocompress_mod(tm, ty);
        self.gen_init_type(tm, field.parent_ty, parent_of_method);
        if self.flags.expand_mem_addrs {
            let tau_ok = self.gen_tau_safe();
            let addr = self.gen_ld_static_addr(tm, ty, field, parent_of_method);
            return self.gen_tau_ld_ind(modifier, ty, addr, tau_ok, tau_ok);
        }
        self.emit(
            Opcode::LdStatic,
            modifier,
            ty,
            Vec::new(),
            Payload::Field(field.id),
        )
    }

    pub fn gen_ld_elem(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        array: OpndId,
        index: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let index = self.propagate_copy(index);
        let tau_null = self.gen_tau_check_null(array);
        let tau_bounds = self.gen_tau_check_bounds(array, index, tau_null);
        let array_ty = self.opnd_ty(array);
        let tau_base_type = self.gen_tau_has_type(array, array_ty);
        let tau_in_range = self.gen_tau_and(tau_bounds, tau_base_type);
        self.gen_ld_elem_with_taus(tm, ty, array, index, tau_null, tau_in_range)
    }

    pub fn gen_ld_elem_with_taus(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        array: OpndId,
        index: OpndId,
        tau_null_checked: OpndId,
        tau_in_range: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let index = self.propagate_copy(index);
        let modifier = self.autocompress_mod(tm, ty);
        if self.flags.expand_mem_addrs {
            let addr = self.gen_ld_elem_addr_no_checks(tm, ty, array, index);
            return self.gen_tau_ld_ind(modifier, ty, addr, tau_null_checked, tau_in_range);
        }
        self.emit(
            Opcode::TauLdElem,
            modifier,
            ty,
            vec![array, index, tau_null_checked, tau_in_range],
            Payload::None,
        )
    }

    /// Typed indirect load through a computed address.
    pub fn gen_tau_ld_ind(
        &mut self,
        modifier: Modifier,
        ty: Ty,
        ptr: OpndId,
        tau_non_null_base: OpndId,
        tau_address_in_range: OpndId,
    ) -> OpndId {
        let ptr = self.propagate_copy(ptr);
        self.emit(
            Opcode::TauLdInd,
            modifier,
            ty,
            vec![ptr, tau_non_null_base, tau_address_in_range],
            Payload::None,
        )
    }

    //
    // address computation
    //

    pub fn gen_ld_field_addr(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        field: FieldDesc,
    ) -> OpndId {
        debug_assert!(!field.is_static);
        let base = self.propagate_copy(base);
        self.gen_tau_check_null(base);
        let code = self.code(Opcode::LdFieldAddr, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, base.id(), field.id.0)) {
            return dst;
        }
        let ptr_ty = self.field_ptr_ty(tm, ty);
        let dst = self.emit(
            Opcode::LdFieldAddr,
            Modifier::none(),
            ptr_ty,
            vec![base],
            Payload::Field(field.id),
        );
        self.insert(CseKey::with2(code, base.id(), field.id.0), dst);
        dst
    }

    pub fn gen_ld_static_addr(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        field: FieldDesc,
        parent_of_method: Ty,
    ) -> OpndId {
        self.gen_init_type(tm, field.parent_ty, parent_of_method);
        let code = self.code(Opcode::LdStaticAddr, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, field.id.0)) {
            return dst;
        }
        let ptr_ty = self.field_ptr_ty(tm, ty);
        let dst = self.emit(
            Opcode::LdStaticAddr,
            Modifier::none(),
            ptr_ty,
            Vec::new(),
            Payload::Field(field.id),
        );
        self.insert(CseKey::with1(code, field.id.0), dst);
        dst
    }

    pub fn gen_ld_elem_addr(
        &mut self,
        tm: &mut TypeManager,
        elem_ty: Ty,
        array: OpndId,
        index: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let index = self.propagate_copy(index);
        let tau_null = self.gen_tau_check_null(array);
        self.gen_tau_check_bounds(array, index, tau_null);
        self.gen_ld_elem_addr_no_checks(tm, elem_ty, array, index)
    }

    pub fn gen_ld_elem_addr_no_checks(
        &mut self,
        tm: &mut TypeManager,
        elem_ty: Ty,
        array: OpndId,
        index: OpndId,
    ) -> OpndId {
        if self.flags.expand_elem_addrs {
            let base = self.gen_ld_array_base_addr(tm, elem_ty, array);
            return self.gen_add_scaled_index(base, index);
        }
        let code = self.code(Opcode::LdElemAddr, elem_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, array.id(), index.id())) {
            return dst;
        }
        let ptr_ty = self.field_ptr_ty(tm, elem_ty);
        let dst = self.emit(
            Opcode::LdElemAddr,
            Modifier::none(),
            ptr_ty,
            vec![array, index],
            Payload::TypeOp(elem_ty),
        );
        self.insert(CseKey::with2(code, array.id(), index.id()), dst);
        dst
    }

    pub fn gen_ld_array_base_addr(
        &mut self,
        tm: &mut TypeManager,
        elem_ty: Ty,
        array: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let code = self.code(Opcode::LdArrayBaseAddr, elem_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, array.id())) {
            return dst;
        }
        let ptr_ty = self.field_ptr_ty(tm, elem_ty);
        let dst = self.emit(
            Opcode::LdArrayBaseAddr,
            Modifier::none(),
            ptr_ty,
            vec![array],
            Payload::TypeOp(elem_ty),
        );
        self.insert(CseKey::with1(code, array.id()), dst);
        dst
    }

    pub fn gen_add_scaled_index(&mut self, ptr: OpndId, index: OpndId) -> OpndId {
        let (ptr, index) = (self.propagate_copy(ptr), self.propagate_copy(index));
        let ptr_ty = self.opnd_ty(ptr);
        let code = self.code(Opcode::AddScaledIndex, ptr_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, ptr.id(), index.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::AddScaledIndex,
            Modifier::none(),
            ptr_ty,
            vec![ptr, index],
            Payload::None,
        );
        self.insert(CseKey::with2(code, ptr.id(), index.id()), dst);
        dst
    }

    //
    // stores
    //

    pub fn gen_st_field(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        field: FieldDesc,
        src: OpndId,
    ) -> OpndId {
        debug_assert!(!field.is_static);
        let base = self.propagate_copy(base);
        let src = self.propagate_copy(src);
        let tau_null = self.gen_tau_check_null(base);
        let tau_in_range = self.gen_tau_has_type(base, field.parent_ty);
        let tau_elem_type = self.gen_tau_safe();
        let modifier = self.autocompress_mod(tm, ty);
        if self.flags.expand_mem_addrs {
            let addr = self.gen_ld_field_addr(tm, ty, base, field);
            if self.flags.insert_write_barriers && tm.is_object(ty) {
                self.gen_tau_st_ref(
                    modifier, ty, src, base, addr, tau_null, tau_in_range, tau_elem_type,
                );
            } else {
                self.gen_tau_st_ind(modifier, ty, src, addr, tau_null, tau_in_range, tau_elem_type);
            }
            return src;
        }
        self.emit_void(
            Opcode::TauStField,
            modifier,
            vec![src, base, tau_null, tau_in_range, tau_elem_type],
            Payload::Field(field.id),
        );
        src
    }

    pub fn gen_st_static(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        field: FieldDesc,
        src: OpndId,
        parent_of_method: Ty,
    ) -> OpndId {
        let src = self.propagate_copy(src);
        self.gen_init_type(tm, field.parent_ty, parent_of_method);
        let modifier = self.autocompress_mod(tm, ty);
        if self.flags.expand_mem_addrs {
            let tau_ok = self.gen_tau_safe();
            let addr = self.gen_ld_static_addr(tm, ty, field, parent_of_method);
            self.gen_tau_st_ind(modifier, ty, src, addr, tau_ok, tau_ok, tau_ok);
            return src;
        }
        self.emit_void(
            Opcode::StStatic,
            modifier,
            vec![src],
            Payload::Field(field.id),
        );
        src
    }

    pub fn gen_st_elem(
        &mut self,
        tm: &mut TypeManager,
        elem_ty: Ty,
        array: OpndId,
        index: OpndId,
        src: OpndId,
    ) -> OpndId {
        let array = self.propagate_copy(array);
        let index = self.propagate_copy(index);
        let src = self.propagate_copy(src);
        let tau_null = self.gen_tau_check_null(array);
        let tau_bounds = self.gen_tau_check_bounds(array, index, tau_null);
        let array_ty = self.opnd_ty(array);
        let tau_is_array = self.gen_tau_has_type(array, array_ty);
        let tau_in_range = self.gen_tau_and(tau_bounds, tau_is_array);
        let tau_elem = if tm.is_object(elem_ty) {
            self.gen_tau_check_elem_type(array, src, tau_null, tau_is_array)
        } else {
            self.gen_tau_safe()
        };
        self.gen_st_elem_with_taus(
            tm, elem_ty, array, index, src, tau_null, tau_elem, tau_in_range,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn gen_st_elem_with_taus(
        &mut self,
        tm: &mut TypeManager,
        elem_ty: Ty,
        array: OpndId,
        index: OpndId,
        src: OpndId,
        tau_null_checked: OpndId,
        tau_elem_type_checked: OpndId,
        tau_in_range: OpndId,
    ) -> OpndId {
        let modifier = self.autocompress_mod(tm, elem_ty);
        if self.flags.expand_mem_addrs {
            let addr = self.gen_ld_elem_addr_no_checks(tm, elem_ty, array, index);
            if self.flags.insert_write_barriers && tm.is_object(elem_ty) {
                self.gen_tau_st_ref(
                    modifier,
                    elem_ty,
                    src,
                    array,
                    addr,
                    tau_null_checked,
                    tau_in_range,
                    tau_elem_type_checked,
                );
            } else {
                self.gen_tau_st_ind(
                    modifier,
                    elem_ty,
                    src,
                    addr,
                    tau_null_checked,
                    tau_in_range,
                    tau_elem_type_checked,
                );
            }
            return src;
        }
        self.emit_void(
            Opcode::TauStElem,
            modifier,
            vec![
                src,
                array,
                index,
                tau_null_checked,
                tau_in_range,
                tau_elem_type_checked,
            ],
            Payload::None,
        );
        src
    }

    #[allow(clippy::too_many_arguments)]
    pub fn gen_tau_st_ind(
        &mut self,
        modifier: Modifier,
        ty: Ty,
        src: OpndId,
        ptr: OpndId,
        tau_base_non_null: OpndId,
        tau_address_in_range: OpndId,
        tau_elem_type_checked: OpndId,
    ) {
        let src = self.propagate_copy(src);
        let ptr = self.propagate_copy(ptr);
        let inst = self.factory.make_tau_st_ind(
            modifier,
            ty,
            src,
            ptr,
            tau_base_non_null,
            tau_address_in_range,
            tau_elem_type_checked,
        );
        self.append(inst);
    }

    /// Reference store through the GC write barrier; carries the object
    /// base so the barrier can find the card.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_tau_st_ref(
        &mut self,
        modifier: Modifier,
        ty: Ty,
        src: OpndId,
        object_base: OpndId,
        ptr: OpndId,
        tau_base_non_null: OpndId,
        tau_address_in_range: OpndId,
        tau_elem_type_checked: OpndId,
    ) {
        let src = self.propagate_copy(src);
        let ptr = self.propagate_copy(ptr);
        let inst = self.factory.make_tau_st_ref(
            modifier,
            ty,
            src,
            object_base,
            ptr,
            tau_base_non_null,
            tau_address_in_range,
            tau_elem_type_checked,
        );
        self.append(inst);
    }

    //
    // compressed references
    //

    pub fn gen_compress_ref(&mut self, tm: &mut TypeManager, uncompressed: OpndId) -> OpndId {
        let uncompressed = self.propagate_copy(uncompressed);
        let src_ty = self.opnd_ty(uncompressed);
        debug_assert!(!tm.is_compressed(src_ty));
        let ty = tm.compress_type(src_ty);
        let code = self.code(Opcode::CompressRef, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, uncompressed.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::CompressRef,
            Modifier::none(),
            ty,
            vec![uncompressed],
            Payload::None,
        );
        self.insert(CseKey::with1(code, uncompressed.id()), dst);
        dst
    }

    pub fn gen_uncompress_ref(&mut self, tm: &mut TypeManager, compressed: OpndId) -> OpndId {
        let compressed = self.propagate_copy(compressed);
        let src_ty = self.opnd_ty(compressed);
        debug_assert!(tm.is_compressed(src_ty));
        let ty = tm.uncompress_type(src_ty);
        let code = self.code(Opcode::UncompressRef, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, compressed.id())) {
            return dst;
        }
        let dst = self.emit(
            Opcode::UncompressRef,
            Modifier::none(),
            ty,
            vec![compressed],
            Payload::None,
        );
        self.insert(CseKey::with1(code, compressed.id()), dst);
        dst
    }

    pub fn gen_ld_field_offset(&mut self, field: FieldDesc, plus_heapbase: bool) -> OpndId {
        let op = if plus_heapbase {
            Opcode::LdFieldOffsetPlusHeapbase
        } else {
            Opcode::LdFieldOffset
        };
        let offset_ty = self.types.offset;
        let code = self.code(op, offset_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, field.id.0)) {
            return dst;
        }
        let dst = self.emit(op, Modifier::none(), offset_ty, Vec::new(), Payload::Field(field.id));
        self.insert(CseKey::with1(code, field.id.0), dst);
        dst
    }

    pub fn gen_ld_array_base_offset(&mut self, elem_ty: Ty, plus_heapbase: bool) -> OpndId {
        let op = if plus_heapbase {
            Opcode::LdArrayBaseOffsetPlusHeapbase
        } else {
            Opcode::LdArrayBaseOffset
        };
        let offset_ty = self.types.offset;
        let code = self.code(op, offset_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, elem_ty.id())) {
            return dst;
        }
        let dst = self.emit(op, Modifier::none(), offset_ty, Vec::new(), Payload::TypeOp(elem_ty));
        self.insert(CseKey::with1(code, elem_ty.id()), dst);
        dst
    }

    pub fn gen_ld_array_len_offset(&mut self, elem_ty: Ty, plus_heapbase: bool) -> OpndId {
        let op = if plus_heapbase {
            Opcode::LdArrayLenOffsetPlusHeapbase
        } else {
            Opcode::LdArrayLenOffset
        };
        let offset_ty = self.types.offset;
        let code = self.code(op, offset_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with1(code, elem_ty.id())) {
            return dst;
        }
        let dst = self.emit(op, Modifier::none(), offset_ty, Vec::new(), Payload::TypeOp(elem_ty));
        self.insert(CseKey::with1(code, elem_ty.id()), dst);
        dst
    }

    pub fn gen_add_offset(&mut self, ptr_ty: Ty, refr: OpndId, offset: OpndId, plus_heapbase: bool) -> OpndId {
        let op = if plus_heapbase {
            Opcode::AddOffsetPlusHeapbase
        } else {
            Opcode::AddOffset
        };
        let refr = self.propagate_copy(refr);
        let offset = self.propagate_copy(offset);
        let code = self.code(op, ptr_ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, refr.id(), offset.id())) {
            return dst;
        }
        let dst = self.emit(op, Modifier::none(), ptr_ty, vec![refr, offset], Payload::None);
        self.insert(CseKey::with2(code, refr.id(), offset.id()), dst);
        dst
    }

    //
    // class initialization
    //

    /// Ensure the declaring class is initialized before a static access.
    /// Hashed so a block re-initializes nothing; null checks of instances
    /// feed the same key.
    pub fn gen_init_type(&mut self, tm: &mut TypeManager, ty: Ty, parent_of_method: Ty) {
        let needs_init = match tm.kind(ty) {
            ember_types::TypeKind::Object(c) => tm.class(c).needs_init,
            _ => false,
        };
        if !needs_init || ty == parent_of_method {
            return;
        }
        let code = self.code(Opcode::InitType, self.types.tau, Modifier::none());
        if self.lookup(CseKey::with1(code, ty.id())).is_some() {
            return;
        }
        let inst = self.emit_void(Opcode::InitType, Modifier::none(), Vec::new(), Payload::TypeOp(ty));
        self.insert_inst(CseKey::with1(code, ty.id()), inst);
    }

    //
    // field-with-resolve forms: the constant-pool entry did not resolve, so
    // the address comes from a runtime helper that resolves and throws on
    // failure; the helper result is cached like any other value
    //

    pub fn gen_ld_field_addr_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        enclosing: Ty,
        cp_index: u32,
        is_put: bool,
    ) -> OpndId {
        let base = self.propagate_copy(base);
        self.gen_tau_check_null(base);
        let opcode_key = if is_put { 0xb5u32 } else { 0xb4 };
        let code = self.code(Opcode::VmHelperCall, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with3(code, opcode_key, base.id(), cp_index)) {
            return dst;
        }
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let put = self.gen_ld_constant_i4(is_put as i32);
        let int_ptr = self.types.int_ptr;
        let offset = self.gen_vm_helper_call(
            VmHelperId::GetNonStaticFieldOffsetWithResolve,
            int_ptr,
            &[cls, idx, put],
        );
        let ptr_ty = self.field_ptr_ty(tm, ty);
        let dst = self.gen_add_offset(ptr_ty, base, offset, false);
        self.insert(CseKey::with3(code, opcode_key, base.id(), cp_index), dst);
        dst
    }

    pub fn gen_ld_static_addr_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        enclosing: Ty,
        cp_index: u32,
        is_put: bool,
    ) -> OpndId {
        let opcode_key = if is_put { 0xb3u32 } else { 0xb2 };
        let code = self.code(Opcode::VmHelperCall, ty, Modifier::none());
        if let Some(dst) = self.lookup(CseKey::with2(code, opcode_key, cp_index)) {
            return dst;
        }
        let cls = self.gen_get_class_obj(tm, enclosing);
        let idx = self.gen_ld_constant_i4(cp_index as i32);
        let put = self.gen_ld_constant_i4(is_put as i32);
        let ptr_ty = self.field_ptr_ty(tm, ty);
        let dst = self.gen_vm_helper_call(
            VmHelperId::GetStaticFieldAddrWithResolve,
            ptr_ty,
            &[cls, idx, put],
        );
        self.insert(CseKey::with2(code, opcode_key, cp_index), dst);
        dst
    }

    pub fn gen_ld_field_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let base = self.propagate_copy(base);
        let tau_null = self.gen_tau_check_null(base);
        let tau_range = self.gen_tau_safe();
        let modifier = self.autocompress_mod(tm, ty);
        let addr = self.gen_ld_field_addr_with_resolve(tm, ty, base, enclosing, cp_index, false);
        self.gen_tau_ld_ind(modifier, ty, addr, tau_null, tau_range)
    }

    pub fn gen_ld_static_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        enclosing: Ty,
        cp_index: u32,
    ) -> OpndId {
        let modifier = self.autocompress_mod(tm, ty);
        let tau_ok = self.gen_tau_safe();
        let addr = self.gen_ld_static_addr_with_resolve(tm, ty, enclosing, cp_index, false);
        self.gen_tau_ld_ind(modifier, ty, addr, tau_ok, tau_ok)
    }

    pub fn gen_st_field_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        base: OpndId,
        enclosing: Ty,
        cp_index: u32,
        src: OpndId,
    ) {
        let base = self.propagate_copy(base);
        let src = self.propagate_copy(src);
        let tau_null = self.gen_tau_check_null(base);
        let tau_ok = self.gen_tau_safe();
        let modifier = self.autocompress_mod(tm, ty);
        let addr = self.gen_ld_field_addr_with_resolve(tm, ty, base, enclosing, cp_index, true);
        if self.flags.insert_write_barriers && tm.is_object(ty) {
            self.gen_tau_st_ref(modifier, ty, src, base, addr, tau_null, tau_ok, tau_ok);
        } else {
            self.gen_tau_st_ind(modifier, ty, src, addr, tau_null, tau_ok, tau_ok);
        }
    }

    pub fn gen_st_static_with_resolve(
        &mut self,
        tm: &mut TypeManager,
        ty: Ty,
        enclosing: Ty,
        cp_index: u32,
        src: OpndId,
    ) {
        let src = self.propagate_copy(src);
        let tau_ok = self.gen_tau_safe();
        let modifier = self.autocompress_mod(tm, ty);
        let addr = self.gen_ld_static_addr_with_resolve(tm, ty, enclosing, cp_index, true);
        self.gen_tau_st_ind(modifier, ty, src, addr, tau_ok, tau_ok, tau_ok);
    }
}
