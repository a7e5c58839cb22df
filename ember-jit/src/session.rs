//! Session wiring: parser → prepass → translator → flow-graph build.

use ember_bytecode::{FlowInfo, Parser, PassMode};
use ember_ir::{ControlFlowGraph, InstId, IrArena};
use ember_types::TypeManager;
use tracing::debug_span;

use crate::config::{ConfigSource, IrBuilderFlags, TranslatorFlags};
use crate::error::Result;
use crate::prepass::LabelPrepass;
use crate::runtime::{CompilationInterface, MethodDesc};
use crate::translator::Translator;
use crate::IrBuilder;

/// Product of one front-end run: the arena owning every instruction and
/// operand, the stitched control-flow graph, and the subroutine map later
/// passes use to convert JSR/RET into ordinary control flow.
#[derive(Debug)]
pub struct TranslationResult {
    pub arena: IrArena,
    pub cfg: ControlFlowGraph,
    /// `(subroutine entry store, ret instruction)` pairs.
    pub jsr_entry_map: Vec<(InstId, InstId)>,
    pub num_cse_hits: u32,
}

/// Translate one method body into a typed SSA-form control-flow graph.
///
/// The same parser drives both passes, so each reachable opcode is decoded
/// exactly once per pass. A method whose handler table references an
/// unresolvable exception type (outside lazy resolution) compiles to a
/// single block throwing the linkage error.
pub fn translate_method(
    tm: &mut TypeManager,
    ci: &mut dyn CompilationInterface,
    method: &MethodDesc,
    config: &dyn ConfigSource,
) -> Result<TranslationResult> {
    let span = debug_span!("translate", method = %method.name);
    let _guard = span.enter();

    let mut builder_flags = IrBuilderFlags::read(config);
    builder_flags.insert_write_barriers =
        builder_flags.insert_write_barriers || ci.needs_write_barriers();
    builder_flags.compressed_references =
        builder_flags.compressed_references || ci.are_references_compressed();
    let translator_flags = TranslatorFlags::read(config);

    let parser = Parser::new(&method.code);

    // pass 1: discover blocks, types and incarnations
    let mut flow = FlowInfo::new(method.code.len().max(1));
    let mut prepass = LabelPrepass::new(tm, ci, method);
    parser.parse(&mut prepass, PassMode::Flow, &mut flow)?;
    let pre = prepass.finish(flow);

    // pass 2: emit IR
    let builder = IrBuilder::new(builder_flags, tm);
    let mut translator = Translator::new(tm, ci, method, translator_flags, builder, pre);
    let mut linear = FlowInfo::new(method.code.len().max(1));
    parser.parse(&mut translator, PassMode::Linear, &mut linear)?;

    let (builder, cfg, pre, jsr_entry_map) = translator.finish();
    let cfg = cfg.build(&builder.factory, &pre.regions);
    let num_cse_hits = builder.num_cse_hits();
    Ok(TranslationResult {
        arena: builder.factory.into_arena(),
        cfg,
        jsr_entry_map,
        num_cse_hits,
    })
}
