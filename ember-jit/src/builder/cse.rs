use ember_ir::{InstId, Modifier, Opcode};
use ember_types::Ty;
use hashbrown::HashMap;

/// Injective packing of `(opcode, result type, modifier)` used as the
/// operation slot of CSE keys; instructions differing in any policy never
/// merge.
pub fn operation_code(op: Opcode, ty: Ty, modifier: Modifier) -> u64 {
    (op as u64) | ((ty.id() as u64) << 8) | ((modifier.bits() as u64) << 40)
}

/// Key of one hashable value: operation plus up to three source ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CseKey {
    code: u64,
    op1: u32,
    op2: u32,
    op3: u32,
}

impl CseKey {
    pub fn new(code: u64) -> Self {
        Self {
            code,
            op1: 0,
            op2: 0,
            op3: 0,
        }
    }

    pub fn with1(code: u64, op1: u32) -> Self {
        Self {
            code,
            op1,
            op2: 0,
            op3: 0,
        }
    }

    pub fn with2(code: u64, op1: u32, op2: u32) -> Self {
        Self {
            code,
            op1,
            op2,
            op3: 0,
        }
    }

    pub fn with3(code: u64, op1: u32, op2: u32, op3: u32) -> Self {
        Self { code, op1, op2, op3 }
    }

    fn slot(&self) -> usize {
        let h = self
            .code
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(self.op1 as u64 ^ ((self.op2 as u64) << 16) ^ ((self.op3 as u64) << 32));
        (h >> 32) as usize % PRIMARY_SLOTS
    }
}

const PRIMARY_SLOTS: usize = 128;

/// Per-block value-numbering table.
///
/// A fixed direct-mapped primary array takes the hits; colliding entries
/// demote to a spill map so capacity bounds never lose correctness. Killed
/// wholesale at every block boundary.
#[derive(Debug)]
pub struct CseTable {
    primary: Box<[Option<(CseKey, InstId)>; PRIMARY_SLOTS]>,
    spill: HashMap<CseKey, InstId>,
    pub num_cse: u32,
}

impl CseTable {
    pub fn new() -> Self {
        Self {
            primary: Box::new([None; PRIMARY_SLOTS]),
            spill: HashMap::new(),
            num_cse: 0,
        }
    }

    pub fn kill(&mut self) {
        self.primary.fill(None);
        self.spill.clear();
    }

    pub fn lookup(&mut self, key: CseKey) -> Option<InstId> {
        let found = match self.primary[key.slot()] {
            Some((k, inst)) if k == key => Some(inst),
            _ => self.spill.get(&key).copied(),
        };
        if found.is_some() {
            self.num_cse += 1;
        }
        found
    }

    pub fn insert(&mut self, key: CseKey, inst: InstId) {
        let slot = key.slot();
        if let Some((old_key, old_inst)) = self.primary[slot] {
            if old_key != key {
                self.spill.insert(old_key, old_inst);
            }
        }
        self.primary[slot] = Some((key, inst));
    }

    pub fn remove(&mut self, key: CseKey) {
        let slot = key.slot();
        if matches!(self.primary[slot], Some((k, _)) if k == key) {
            self.primary[slot] = None;
        }
        self.spill.remove(&key);
    }
}

impl Default for CseTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_ir::InstFactory;
    use ember_types::TypeManager;

    fn mint(n: usize) -> Vec<InstId> {
        let tm = TypeManager::new(false);
        let mut f = InstFactory::new(&tm);
        (0..n).map(|_| f.make_label()).collect()
    }

    #[test]
    fn lookup_after_insert() {
        let ids = mint(1);
        let mut t = CseTable::new();
        let key = CseKey::with2(42, 1, 2);
        assert_eq!(t.lookup(key), None);
        t.insert(key, ids[0]);
        assert_eq!(t.lookup(key), Some(ids[0]));
        t.kill();
        assert_eq!(t.lookup(key), None);
    }

    #[test]
    fn eviction_demotes_to_spill() {
        let ids = mint(PRIMARY_SLOTS * 3);
        let mut t = CseTable::new();
        // fill well past the primary capacity; every entry must stay
        // reachable
        let keys: Vec<_> = (0..(PRIMARY_SLOTS as u32 * 3))
            .map(|i| CseKey::with1(9, i))
            .collect();
        for (i, &k) in keys.iter().enumerate() {
            t.insert(k, ids[i]);
        }
        for (i, &k) in keys.iter().enumerate() {
            assert_eq!(t.lookup(k), Some(ids[i]), "key {i} lost");
        }
    }
}
