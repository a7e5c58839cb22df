use strum::Display;

/// Raw opcode bytes of the stack bytecode, named by mnemonic.
///
/// Only the bytes the decoder special-cases are listed as constants; the
/// decoder itself matches on the raw byte. The full mnemonic table backs
/// `Display` for diagnostics.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
#[strum(serialize_all = "lowercase")]
pub enum RawOpcode {
    Nop = 0x00,
    Dup = 0x59,
    TableSwitch = 0xaa,
    LookupSwitch = 0xab,
    GetStatic = 0xb2,
    PutStatic = 0xb3,
    GetField = 0xb4,
    PutField = 0xb5,
    InvokeVirtual = 0xb6,
    InvokeSpecial = 0xb7,
    InvokeStatic = 0xb8,
    InvokeInterface = 0xb9,
    New = 0xbb,
    NewArray = 0xbc,
    ANewArray = 0xbd,
    CheckCast = 0xc0,
    InstanceOf = 0xc1,
    Wide = 0xc4,
    MultiANewArray = 0xc5,
    GotoW = 0xc8,
    JsrW = 0xc9,
}

/// Highest defined opcode byte (`jsr_w`).
pub const MAX_OPCODE: u8 = 0xc9;

/// `invokedynamic` slot, undefined in this bytecode level.
const UNDEFINED: u8 = 0xba;

/// Instruction lengths in bytes, indexed by opcode. Zero marks the
/// variable-length cases (`tableswitch`, `lookupswitch`, `wide`).
#[rustfmt::skip]
const LENGTHS: [u8; (MAX_OPCODE as usize) + 1] = [
    // 0x00..=0x0f: nop, aconst_null, iconst_m1..iconst_5, lconst, fconst, dconst
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x10..=0x1f: bipush, sipush, ldc, ldc_w, ldc2_w, loads
    2, 3, 2, 3, 3, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1,
    // 0x20..=0x2f: xload_n, xaload
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x30..=0x3f: xaload, stores
    1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1,
    // 0x40..=0x4f: xstore_n
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x50..=0x5f: xastore, pop, dup family, swap
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x60..=0x6f: add, sub, mul, div
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x70..=0x7f: rem, neg, shifts, and
    1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x80..=0x8f: or, xor, iinc, conversions
    1, 1, 1, 1, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    // 0x90..=0x9f: conversions, cmp, ifXX
    1, 1, 1, 1, 1, 1, 1, 1, 1, 3, 3, 3, 3, 3, 3, 3,
    // 0xa0..=0xaf: if_icmpXX, if_acmpXX, goto, jsr, ret, switches, returns
    3, 3, 3, 3, 3, 3, 3, 3, 3, 2, 0, 0, 1, 1, 1, 1,
    // 0xb0..=0xbf: areturn, return, field/method access, new, newarray
    1, 1, 3, 3, 3, 3, 3, 3, 3, 5, 0, 3, 2, 3, 1, 1,
    // 0xc0..=0xc9: checkcast, instanceof, monitors, wide, multianewarray,
    //              ifnull, ifnonnull, goto_w, jsr_w
    3, 3, 1, 1, 0, 4, 3, 3, 5, 5,
];

/// Length in bytes of the instruction starting at `offset`, or `None` for an
/// undefined opcode. Variable-length instructions (switches, `wide`) return
/// their fully decoded length, including padding and target tables.
pub fn instruction_length(code: &[u8], offset: u32) -> Option<u32> {
    let at = offset as usize;
    let opcode = *code.get(at)?;
    if opcode > MAX_OPCODE || opcode == UNDEFINED {
        return None;
    }
    let len = LENGTHS[opcode as usize];
    if len != 0 {
        return Some(len as u32);
    }
    match opcode {
        0xaa => crate::switches::TableSwitch::decode(code, offset)
            .ok()
            .map(|s| s.byte_len()),
        0xab => crate::switches::LookupSwitch::decode(code, offset)
            .ok()
            .map(|s| s.byte_len()),
        0xc4 => {
            // wide iinc carries a 16-bit index and a 16-bit delta
            let widened = *code.get(at + 1)?;
            Some(if widened == 0x84 { 6 } else { 4 })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[0x00], Some(1); "nop")]
    #[test_case(&[0x10, 7], Some(2); "bipush")]
    #[test_case(&[0x11, 0, 7], Some(3); "sipush")]
    #[test_case(&[0xa7, 0, 3], Some(3); "goto")]
    #[test_case(&[0xc8, 0, 0, 0, 5], Some(5); "goto_w")]
    #[test_case(&[0xb9, 0, 1, 1, 0], Some(5); "invokeinterface")]
    #[test_case(&[0xc5, 0, 1, 2], Some(4); "multianewarray")]
    #[test_case(&[0xba], None; "undefined slot")]
    #[test_case(&[0xca], None; "breakpoint")]
    fn fixed_lengths(code: &[u8], expected: Option<u32>) {
        assert_eq!(instruction_length(code, 0), expected);
    }

    #[test]
    fn wide_lengths() {
        assert_eq!(instruction_length(&[0xc4, 0x15, 0, 5], 0), Some(4)); // wide iload
        assert_eq!(instruction_length(&[0xc4, 0x84, 0, 5, 0, 1], 0), Some(6)); // wide iinc
    }
}
