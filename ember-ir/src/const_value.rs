/// Handle of a constant data blob owned by the arena (array-initializer
/// images).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataId(pub(crate) u32);

impl DataId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Literal payload of an `LdConstant` instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I4(i32),
    I8(i64),
    Single(f32),
    Double(f64),
    NullRef,
    /// Byte offset literal (field/array layout computations).
    Offset(i64),
    /// Address of an arena-owned data blob.
    Data(DataId),
}

impl ConstValue {
    /// Bit-exact key halves for CSE hashing. NaNs with different payloads
    /// key differently, which only costs a missed merge.
    pub fn key_bits(&self) -> (u32, u32) {
        match *self {
            ConstValue::I4(v) => (v as u32, 0),
            ConstValue::I8(v) => (v as u64 as u32, (v as u64 >> 32) as u32),
            ConstValue::Single(v) => (v.to_bits(), 0),
            ConstValue::Double(v) => (v.to_bits() as u32, (v.to_bits() >> 32) as u32),
            ConstValue::NullRef => (0, u32::MAX),
            ConstValue::Offset(v) => (v as u64 as u32, (v as u64 >> 32) as u32),
            ConstValue::Data(id) => (id.0, u32::MAX - 1),
        }
    }

    pub fn as_i4(&self) -> Option<i32> {
        match *self {
            ConstValue::I4(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<i64> {
        match *self {
            ConstValue::I8(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view used by the simplifier for either integer width.
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            ConstValue::I4(v) => Some(v as i64),
            ConstValue::I8(v) => Some(v),
            ConstValue::Offset(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ConstValue::NullRef)
    }
}
