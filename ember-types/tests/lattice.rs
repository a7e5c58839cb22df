//! `common_type` is a join on a finite lattice: commutative, associative,
//! idempotent, with equal inputs fixed.

use ember_types::{ClassInfo, Ty, TypeManager};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;

/// Index into a fixed menagerie of interned types.
#[derive(Debug, Clone, Copy)]
struct TyPick(usize);

impl Arbitrary for TyPick {
    fn arbitrary(g: &mut Gen) -> Self {
        TyPick(usize::arbitrary(g))
    }
}

fn menagerie() -> (TypeManager, Vec<Ty>) {
    let mut tm = TypeManager::new(false);
    let base = tm.register_class(ClassInfo::resolved("Base", 1));
    let mid = tm.register_class(ClassInfo::resolved("Mid", 2).with_super(base));
    let left = tm.register_class(ClassInfo::resolved("Left", 3).with_super(mid));
    let right = tm.register_class(ClassInfo::resolved("Right", 4).with_super(mid));
    let lone = tm.register_class(ClassInfo::resolved("Lone", 5));

    let mut tys = vec![
        tm.void_type(),
        tm.boolean_type(),
        tm.char_type(),
        tm.int8_type(),
        tm.int16_type(),
        tm.int32_type(),
        tm.int64_type(),
        tm.single_type(),
        tm.double_type(),
        tm.int_ptr_type(),
        tm.null_object_type(),
        tm.system_object_type(),
        tm.system_string_type(),
        tm.unresolved_object_type(),
    ];
    for c in [base, mid, left, right, lone] {
        let ty = tm.object_type(c);
        tys.push(ty);
        let arr = tm.array_type(ty);
        tys.push(arr);
    }
    let i32t = tm.int32_type();
    let int_arr = tm.array_type(i32t);
    tys.push(int_arr);
    (tm, tys)
}

#[quickcheck]
fn join_is_commutative(a: TyPick, b: TyPick) -> bool {
    let (mut tm, tys) = menagerie();
    let a = tys[a.0 % tys.len()];
    let b = tys[b.0 % tys.len()];
    tm.common_type(a, b) == tm.common_type(b, a)
}

#[quickcheck]
fn join_is_associative(a: TyPick, b: TyPick, c: TyPick) -> bool {
    let (mut tm, tys) = menagerie();
    let a = tys[a.0 % tys.len()];
    let b = tys[b.0 % tys.len()];
    let c = tys[c.0 % tys.len()];
    let left = tm
        .common_type(a, b)
        .and_then(|ab| tm.common_type(ab, c));
    let right = tm
        .common_type(b, c)
        .and_then(|bc| tm.common_type(a, bc));
    left == right
}

#[quickcheck]
fn join_is_idempotent(a: TyPick) -> bool {
    let (mut tm, tys) = menagerie();
    let a = tys[a.0 % tys.len()];
    tm.common_type(a, a) == Some(a)
}

#[quickcheck]
fn join_absorbs_its_inputs(a: TyPick, b: TyPick) -> bool {
    let (mut tm, tys) = menagerie();
    let a = tys[a.0 % tys.len()];
    let b = tys[b.0 % tys.len()];
    match tm.common_type(a, b) {
        // joining either input with the join changes nothing
        Some(j) => tm.common_type(a, j) == Some(j) && tm.common_type(b, j) == Some(j),
        None => true,
    }
}
