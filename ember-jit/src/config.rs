//! Translation-time configuration.
//!
//! Read once at session start from a key/value view; every key defaults to
//! the value listed in [`HELP`].

/// Key/value configuration source (environment, command line, embedder).
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<bool>;
}

/// A source with nothing set; every flag keeps its default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConfig;

impl ConfigSource for DefaultConfig {
    fn get(&self, _key: &str) -> Option<bool> {
        None
    }
}

impl ConfigSource for &[(&str, bool)] {
    fn get(&self, key: &str) -> Option<bool> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

/// Flags controlling how the IR builder expands and optimizes instructions.
#[derive(Debug, Clone, Copy)]
pub struct IrBuilderFlags {
    /// Decompose field/static accesses into address + typed indirection.
    pub expand_mem_addrs: bool,
    /// Compute array element addresses as `base + scaled(index)`.
    pub expand_elem_addrs: bool,
    /// Lower direct calls through method-pointer slot loads.
    pub expand_call_addrs: bool,
    /// Lower virtual calls through explicit vtable loads.
    pub expand_virtual_call_addrs: bool,
    /// Emit explicit null checks (required for tau tracking).
    pub expand_null_checks: bool,
    /// Emit explicit covariant-store element type checks.
    pub expand_elem_type_checks: bool,
    pub do_cse: bool,
    pub do_simplify: bool,
    /// Omit all array-bounds checks (limit-study mode).
    pub suppress_check_bounds: bool,
    /// Emit a method-descriptor label at method entry.
    pub insert_method_labels: bool,
    /// Reference stores call into the GC write barrier.
    pub insert_write_barriers: bool,
    /// Heap references are compressed; loads and stores convert.
    pub compressed_references: bool,
    /// Emit native min/max/abs opcodes instead of hand-built sequences.
    pub gen_min_max_abs: bool,
    /// Same, for the floating-point variants.
    pub gen_fmin_max_abs: bool,
}

impl Default for IrBuilderFlags {
    fn default() -> Self {
        Self {
            expand_mem_addrs: true,
            expand_elem_addrs: true,
            expand_call_addrs: false,
            expand_virtual_call_addrs: false,
            expand_null_checks: true,
            expand_elem_type_checks: true,
            do_cse: true,
            do_simplify: true,
            suppress_check_bounds: false,
            insert_method_labels: true,
            insert_write_barriers: false,
            compressed_references: false,
            gen_min_max_abs: false,
            gen_fmin_max_abs: false,
        }
    }
}

impl IrBuilderFlags {
    pub fn read(source: &dyn ConfigSource) -> Self {
        let d = Self::default();
        Self {
            expand_mem_addrs: source.get("expandMemAddrs").unwrap_or(d.expand_mem_addrs),
            expand_elem_addrs: source.get("expandElemAddrs").unwrap_or(d.expand_elem_addrs),
            expand_call_addrs: source.get("expandCallAddrs").unwrap_or(d.expand_call_addrs),
            expand_virtual_call_addrs: source
                .get("expandVirtualCallAddrs")
                .unwrap_or(d.expand_virtual_call_addrs),
            expand_null_checks: source
                .get("expandNullChecks")
                .unwrap_or(d.expand_null_checks),
            expand_elem_type_checks: source
                .get("expandElemTypeChecks")
                .unwrap_or(d.expand_elem_type_checks),
            do_cse: source.get("doCSE").unwrap_or(d.do_cse),
            do_simplify: source.get("doSimplify").unwrap_or(d.do_simplify),
            suppress_check_bounds: source
                .get("suppressCheckBounds")
                .unwrap_or(d.suppress_check_bounds),
            insert_method_labels: source
                .get("insertMethodLabels")
                .unwrap_or(d.insert_method_labels),
            insert_write_barriers: source
                .get("insertWriteBarriers")
                .unwrap_or(d.insert_write_barriers),
            compressed_references: source
                .get("compressedReferences")
                .unwrap_or(d.compressed_references),
            gen_min_max_abs: source.get("genMinMaxAbs").unwrap_or(d.gen_min_max_abs),
            gen_fmin_max_abs: source.get("genFMinMaxAbs").unwrap_or(d.gen_fmin_max_abs),
        }
    }
}

/// Flags controlling translator-level expansions.
#[derive(Debug, Clone, Copy)]
pub struct TranslatorFlags {
    /// Collapse constant array-initializer sequences into one helper call.
    pub opt_array_init: bool,
    /// Drop monitor operations entirely (single-threaded embeddings).
    pub ignore_sync: bool,
    /// Lower monitor operations to memory fences only.
    pub sync_as_enter_fence: bool,
    /// Use balanced lock-address monitor enter/exit for method-level sync.
    pub balanced_sync: bool,
    /// Inline `Math.min/max/abs` static calls.
    pub gen_min_max_abs: bool,
}

impl Default for TranslatorFlags {
    fn default() -> Self {
        Self {
            opt_array_init: true,
            ignore_sync: false,
            sync_as_enter_fence: false,
            balanced_sync: false,
            gen_min_max_abs: true,
        }
    }
}

impl TranslatorFlags {
    pub fn read(source: &dyn ConfigSource) -> Self {
        let d = Self::default();
        Self {
            opt_array_init: source.get("optArrayInit").unwrap_or(d.opt_array_init),
            ignore_sync: source.get("ignoreSync").unwrap_or(d.ignore_sync),
            sync_as_enter_fence: source
                .get("syncAsEnterFence")
                .unwrap_or(d.sync_as_enter_fence),
            balanced_sync: source.get("balancedSync").unwrap_or(d.balanced_sync),
            gen_min_max_abs: source.get("genMinMaxAbs").unwrap_or(d.gen_min_max_abs),
        }
    }
}

/// One free-form description of every configuration key.
pub const HELP: &str = "\
expandMemAddrs        - expand field/static accesses (default: on)
expandElemAddrs       - expand array element address computation (default: on)
expandCallAddrs       - expand direct-call address computation (default: off)
expandVirtualCallAddrs- expand virtual-call vtable loads (default: off)
expandNullChecks      - explicit null checks (default: on)
expandElemTypeChecks  - explicit array-store type checks (default: on)
doCSE                 - translation-time common subexpression elimination (default: on)
doSimplify            - translation-time simplification (default: on)
suppressCheckBounds   - omit array bounds checks, limit studies only (default: off)
insertMethodLabels    - method-descriptor entry labels (default: on)
insertWriteBarriers   - GC write barriers on reference stores (default: runtime)
compressedReferences  - compressed heap references (default: runtime)
genMinMaxAbs          - native min/max/abs opcodes (default: off)
genFMinMaxAbs         - native FP min/max/abs opcodes (default: off)
optArrayInit          - collapse constant array initializers (default: on)
ignoreSync            - drop monitor operations (default: off)
syncAsEnterFence      - monitors as fences (default: off)
balancedSync          - balanced method-level monitors (default: off)
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let flags = IrBuilderFlags::read(&DefaultConfig);
        assert!(flags.do_cse && flags.do_simplify);
        assert!(!flags.suppress_check_bounds);

        let overrides: &[(&str, bool)] = &[("doCSE", false), ("suppressCheckBounds", true)];
        let flags = IrBuilderFlags::read(&overrides);
        assert!(!flags.do_cse);
        assert!(flags.suppress_check_bounds);
        assert!(flags.do_simplify);
    }
}
