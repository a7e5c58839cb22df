//! Recognition of constant array-initializer sequences.
//!
//! `newarray` is routinely followed by `dup; <index>; <value>; <xastore>`
//! repeated once per element. When every index is consecutive and every
//! value is a constant, the whole run collapses into one `InitializeArray`
//! helper call over an arena-owned data image. A non-matching suffix falls
//! back to normal translation.

use ember_ir::{ConstValue, JitHelperId, OpndId};
use ember_types::TypeKind;

use super::Translator;
use crate::error::Result;
use crate::runtime::ConstLiteral;

const MIN_INIT_ELEMS: u32 = 2;

impl Translator<'_> {
    /// Scan ahead from `offset` (the first byte after the `newarray`) and
    /// absorb a constant initializer run. Returns how many extra bytes the
    /// parser should skip.
    pub(super) fn check_for_array_initializer(
        &mut self,
        array: OpndId,
        code: &[u8],
        offset: u32,
    ) -> Result<u32> {
        if offset as usize >= code.len() {
            return Ok(0);
        }
        // an element initializer averages four bytes; shorter tails cannot
        // hold enough of them
        if (code.len() as u32 - offset) / 4 < MIN_INIT_ELEMS {
            return Ok(0);
        }

        let array_ty = self.builder.opnd_ty(array);
        let elem_ty = match self.tm.array_elem(array_ty) {
            Some(t) => t,
            None => return Ok(0),
        };
        let elem_size: u32 = match self.tm.kind(elem_ty) {
            TypeKind::Boolean | TypeKind::Int8 => 1,
            TypeKind::Char | TypeKind::Int16 => 2,
            TypeKind::Int32 | TypeKind::Single => 4,
            TypeKind::Int64 | TypeKind::Double => 8,
            _ => return Ok(0),
        };

        let mut data: Vec<u64> = Vec::new();
        let mut at = offset as usize;
        let mut matched_end = offset as usize;
        let mut expected_index: u64 = 0;

        loop {
            if at >= code.len() || code[at] != 0x59 {
                break; // dup
            }
            at += 1;
            let (index, used) = match self.scan_numeric_value(code, at) {
                Some(v) => v,
                None => break,
            };
            at += used;
            if at >= code.len() || index != expected_index {
                break;
            }
            let (value, used) = match self.scan_numeric_value(code, at) {
                Some(v) => v,
                None => break,
            };
            at += used;
            if at >= code.len() {
                break;
            }
            let store_size = match code[at] {
                0x4f | 0x51 => 4, // iastore, fastore
                0x50 | 0x52 => 8, // lastore, dastore
                0x54 => 1,        // bastore
                0x55 | 0x56 => 2, // castore, sastore
                _ => break,
            };
            if store_size != elem_size {
                break;
            }
            at += 1;
            data.push(value);
            expected_index += 1;
            matched_end = at;
        }

        if (data.len() as u32) < MIN_INIT_ELEMS {
            return Ok(0);
        }

        // pack the collected constants into a little image owned by the
        // arena, matching the element size
        let mut bytes = Vec::with_capacity(data.len() * elem_size as usize);
        for v in &data {
            bytes.extend_from_slice(&v.to_le_bytes()[..elem_size as usize]);
        }
        let blob = self
            .builder
            .factory
            .arena_mut()
            .intern_data(bytes.into_boxed_slice());

        let data_size = data.len() as u32 * elem_size;
        let void = self.builder.types.void;
        let offset_ty = self.builder.types.offset;
        let data_addr = self
            .builder
            .gen_ld_constant(offset_ty, ConstValue::Data(blob));
        let elems_offset = self.builder.gen_ld_constant_i4(array_elems_offset(elem_size));
        let size = self.builder.gen_ld_constant_i4(data_size as i32);
        self.builder.gen_jit_helper_call(
            JitHelperId::InitializeArray,
            void,
            &[array, elems_offset, data_addr, size],
        );

        Ok(matched_end as u32 - offset)
    }

    /// Constant pushed by the instruction at `at`, with its encoded length.
    /// Anything non-constant stops the scan.
    fn scan_numeric_value(&mut self, code: &[u8], at: usize) -> Option<(u64, usize)> {
        if at >= code.len() {
            return None;
        }
        Some(match code[at] {
            0x02 => (-1i64 as u64, 1),                     // iconst_m1
            0x03 | 0x09 => (0, 1),                         // iconst_0, lconst_0
            0x04 | 0x0a => (1, 1),                         // iconst_1, lconst_1
            op @ 0x05..=0x08 => ((op - 0x03) as u64, 1),   // iconst_2..5
            0x0b => (0.0f32.to_bits() as u64, 1),          // fconst_0
            0x0c => (1.0f32.to_bits() as u64, 1),          // fconst_1
            0x0d => (2.0f32.to_bits() as u64, 1),          // fconst_2
            0x0e => (0.0f64.to_bits(), 1),                 // dconst_0
            0x0f => (1.0f64.to_bits(), 1),                 // dconst_1
            0x10 => {
                // bipush
                let v = *code.get(at + 1)? as i8;
                (v as i64 as u64, 2)
            }
            0x11 => {
                // sipush
                let hi = *code.get(at + 1)? as u16;
                let lo = *code.get(at + 2)? as u16;
                ((((hi << 8) | lo) as i16) as i64 as u64, 3)
            }
            0x12 | 0x13 | 0x14 => {
                // ldc family: only numeric constants stream into the image
                let (cp, used) = if code[at] == 0x12 {
                    (*code.get(at + 1)? as u32, 2usize)
                } else {
                    let hi = *code.get(at + 1)? as u32;
                    let lo = *code.get(at + 2)? as u32;
                    ((hi << 8) | lo, 3)
                };
                let value = match self.ci.get_constant_value(cp)? {
                    ConstLiteral::I4(v) => v as u32 as u64,
                    ConstLiteral::Single(v) => v.to_bits() as u64,
                    ConstLiteral::I8(v) => v as u64,
                    ConstLiteral::Double(v) => v.to_bits(),
                    ConstLiteral::String { .. } | ConstLiteral::Class { .. } => return None,
                };
                (value, used)
            }
            _ => return None,
        })
    }
}

/// Offset of the first element in the array object layout.
fn array_elems_offset(elem_size: u32) -> i32 {
    // header word + length word, elements aligned to their own size
    let header = 12u32;
    (header.div_ceil(elem_size) * elem_size).max(header) as i32
}
