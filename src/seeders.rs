//! Seeding passes that populate the type graph before solving.
//!
//! Three evidence sources exist (the IR's own types, debug info, and TBAA
//! metadata), plus a combined seeder that layers them highest-trust first.
//! Seeding is idempotent with respect to `put`: running a seeder twice can
//! never shrink information.

use crate::containers::unordered::UnorderedMap;
use crate::inference_config::{InferenceConfig, TypeSrc};
use crate::ir::{
    Callee, FuncId, GlobalId, InstId, InstKind, Module, ValueRef,
};
use crate::metadata::{DiNode, DiNodeId, MdValue};
use crate::type_graph::TypeGraph;
use crate::type_names::{di_to_ir, is_opaque_name, reference_name, type_name};

/// The seeder variants. [`TypeSeeder::Combined`] calls the others directly,
/// in priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeSeeder {
    IrType,
    DebugInfo,
    Tbaa,
    Combined,
}

impl From<TypeSrc> for TypeSeeder {
    fn from(src: TypeSrc) -> Self {
        match src {
            TypeSrc::Mig => TypeSeeder::IrType,
            TypeSrc::Di => TypeSeeder::DebugInfo,
            TypeSrc::Tbaa => TypeSeeder::Tbaa,
            TypeSrc::Comb => TypeSeeder::Combined,
        }
    }
}

impl TypeSeeder {
    /// Seeders that read debug info abort the run when the module carries
    /// none.
    pub fn needs_debug_info(&self) -> bool {
        matches!(self, TypeSeeder::DebugInfo | TypeSeeder::Combined)
    }

    /// Populate `graph` with initial facts from `module`.
    pub fn seed(&self, module: &Module, graph: &mut TypeGraph, config: &InferenceConfig) {
        match self {
            TypeSeeder::IrType => seed_ir_types(module, graph),
            TypeSeeder::DebugInfo => seed_debug_info(module, graph, config),
            TypeSeeder::Tbaa => seed_tbaa(module, graph),
            TypeSeeder::Combined => seed_combined(module, graph, config),
        }
    }
}

/// The value a value-producing instruction is keyed on. Stores carry their
/// type information on the stored value, not on the store itself.
fn keyed_value(module: &Module, inst: InstId) -> ValueRef {
    match &module.inst(inst).kind {
        InstKind::Store { value, .. } => *value,
        _ => ValueRef::Inst(inst),
    }
}

/// The IR-declared type name an instruction seeds, per opcode.
fn ir_inst_type(module: &Module, inst: InstId) -> String {
    let inst = module.inst(inst);
    match &inst.kind {
        InstKind::Load { ty, .. } => type_name(module, ty),
        InstKind::Store { value_ty, .. } => type_name(module, value_ty),
        InstKind::Alloca { allocated } => {
            let name = type_name(module, allocated);
            // an alloca result is the address of what it allocates
            if !is_opaque_name(&name) {
                reference_name(&name)
            } else {
                name
            }
        }
        InstKind::Call { ret, .. } => type_name(module, ret),
        _ => type_name(module, &inst.result_type()),
    }
}

fn is_alloca_result(module: &Module, v: ValueRef) -> bool {
    matches!(
        v,
        ValueRef::Inst(id) if matches!(module.inst(id).kind, InstKind::Alloca { .. })
    )
}

/// value → DI local variables recorded for it by `llvm.dbg.*` intrinsic
/// calls. The intrinsic carries the value in metadata position as its first
/// argument and the `DILocalVariable` as its second.
fn collect_di_locals(module: &Module) -> UnorderedMap<ValueRef, Vec<DiNodeId>> {
    let mut di_locals: UnorderedMap<ValueRef, Vec<DiNodeId>> = UnorderedMap::new();
    for id in module.all_insts() {
        let InstKind::Call { callee, args, .. } = &module.inst(id).kind else {
            continue;
        };
        let Callee::Direct(fid) = callee else {
            continue;
        };
        if !module.function(*fid).name.starts_with("llvm.dbg") || args.len() < 2 {
            continue;
        }

        let ValueRef::Metadata(m0) = args[0] else {
            continue;
        };
        let MdValue::Value(value) = *module.metadata.md_value(m0) else {
            continue;
        };

        let ValueRef::Metadata(m1) = args[1] else {
            continue;
        };
        let MdValue::DiRef(var) = *module.metadata.md_value(m1) else {
            continue;
        };
        if matches!(module.metadata.di_node(var), DiNode::LocalVariable { .. }) {
            di_locals.entry(value).or_default().push(var);
        }
    }
    di_locals
}

/// Seed from the IR's own (possibly opaque) types.
fn seed_ir_types(module: &Module, graph: &mut TypeGraph) {
    // globals are always addresses of their value type
    for (g, global) in module.globals.iter().enumerate() {
        let name = type_name(module, &global.value_type);
        graph.put_name(
            None,
            ValueRef::Global(GlobalId(g)),
            &reference_name(&name),
            false,
        );
    }

    for (f, func) in module.functions.iter().enumerate() {
        let fid = FuncId(f);
        for (i, arg) in func.args.iter().enumerate() {
            let name = type_name(module, &arg.ty);
            graph.put_name(Some(fid), ValueRef::Arg(fid, i), &name, false);
        }
        for inst in module.func_insts(fid) {
            let value = keyed_value(module, inst);
            let name = ir_inst_type(module, inst);
            graph.put_name(Some(fid), value, &name, false);
        }
    }

    for (f, func) in module.functions.iter().enumerate() {
        let name = type_name(module, &func.ret);
        graph.put_name(None, ValueRef::Function(FuncId(f)), &name, true);
    }
}

fn seed_di_global(
    module: &Module,
    graph: &mut TypeGraph,
    g: GlobalId,
    expr: DiNodeId,
    config: &InferenceConfig,
) {
    let DiNode::GlobalVariableExpression { var } = module.metadata.di_node(expr) else {
        return;
    };
    let Some(var) = var else { return };
    let DiNode::GlobalVariable { ty, .. } = module.metadata.di_node(*var) else {
        return;
    };
    // the global itself is the address of the declared variable
    let name = format!(
        "{}*",
        module.metadata.di_type_name(*ty, config.resolve_typedefs)
    );
    graph.put_name(None, ValueRef::Global(g), &di_to_ir(&name), false);
}

fn seed_di_locals_of_value(
    module: &Module,
    graph: &mut TypeGraph,
    di_locals: &UnorderedMap<ValueRef, Vec<DiNodeId>>,
    scope: FuncId,
    value: ValueRef,
    config: &InferenceConfig,
) {
    let Some(vars) = di_locals.get(&value) else {
        return;
    };
    for var in vars {
        let DiNode::LocalVariable { ty, .. } = module.metadata.di_node(*var) else {
            continue;
        };
        let mut name = module.metadata.di_type_name(*ty, config.resolve_typedefs);
        // an alloca is the address of the declared variable
        if is_alloca_result(module, value) {
            name.push('*');
        }
        graph.put_name(Some(scope), value, &di_to_ir(&name), false);
    }
}

/// Subprogram signature: first entry of the type array is the return type,
/// the rest align with argument positions; null entries (variadics) are
/// skipped.
fn seed_di_function(
    module: &Module,
    graph: &mut TypeGraph,
    di_locals: &UnorderedMap<ValueRef, Vec<DiNodeId>>,
    f: FuncId,
    subprogram: DiNodeId,
    config: &InferenceConfig,
) {
    let DiNode::Subprogram { ty } = module.metadata.di_node(subprogram) else {
        return;
    };
    let Some(ty) = ty else { return };
    let DiNode::SubroutineType { types } = module.metadata.di_node(*ty) else {
        return;
    };

    let ret = types.first().copied().flatten();
    let name = module.metadata.di_type_name(ret, config.resolve_typedefs);
    graph.put_name(None, ValueRef::Function(f), &di_to_ir(&name), true);

    let func = module.function(f);
    for (i, param_ty) in types.iter().enumerate().skip(1) {
        let Some(param_ty) = param_ty else {
            continue;
        };
        if i - 1 >= func.args.len() {
            break;
        }
        let param = ValueRef::Arg(f, i - 1);
        let name = module
            .metadata
            .di_type_name(Some(*param_ty), config.resolve_typedefs);
        graph.put_name(Some(f), param, &di_to_ir(&name), false);

        seed_di_locals_of_value(module, graph, di_locals, f, param, config);
    }
}

/// Seed from debug info alone.
fn seed_debug_info(module: &Module, graph: &mut TypeGraph, config: &InferenceConfig) {
    for (g, global) in module.globals.iter().enumerate() {
        for expr in &global.di_exprs {
            seed_di_global(module, graph, GlobalId(g), *expr, config);
        }
    }

    let di_locals = collect_di_locals(module);

    for (f, _) in module.functions.iter().enumerate() {
        let fid = FuncId(f);
        for inst in module.func_insts(fid) {
            let value = keyed_value(module, inst);
            seed_di_locals_of_value(module, graph, &di_locals, fid, value, config);
        }
    }

    for (f, func) in module.functions.iter().enumerate() {
        let fid = FuncId(f);
        match func.subprogram {
            Some(sp) => seed_di_function(module, graph, &di_locals, fid, sp, config),
            None => {
                let name = type_name(module, &func.ret);
                graph.put_name(None, ValueRef::Function(fid), &name, true);
            }
        }
    }
}

fn tbaa_is_scalar(name: &str) -> bool {
    matches!(
        name,
        "i1" | "i8" | "i16" | "i32" | "i64" | "float" | "double"
    )
}

/// Seed from TBAA access tags: the base-type name of the tag is attributed
/// to the pointer the memory access went through.
fn seed_tbaa(module: &Module, graph: &mut TypeGraph) {
    for id in module.all_insts() {
        let inst = module.inst(id);
        let Some(tag) = inst.tbaa else { continue };

        let base_name = module.metadata.tbaa_base_name(tag);
        // `omnipotent char` and `any pointer` hold for everything; they say
        // nothing about this access
        if base_name.is_empty() || base_name == "omnipotent char" || base_name == "any pointer" {
            continue;
        }
        let mut tbaa_type = di_to_ir(base_name);
        if !tbaa_is_scalar(&tbaa_type) && !tbaa_type.starts_with('%') {
            tbaa_type = format!("%struct.{}", tbaa_type);
        }

        // the tag annotates a memory access; its type belongs to the pointer
        // the access went through
        let ptr = match &inst.kind {
            InstKind::Load { ptr, .. } | InstKind::Store { ptr, .. } => *ptr,
            _ => continue,
        };
        let scope = inst.func;

        if tbaa_is_scalar(&tbaa_type) {
            graph.put_name(Some(scope), ptr, &tbaa_type, false);
        } else if matches!(ptr, ValueRef::Global(_)) {
            graph.put_name(None, ptr, &tbaa_type, false);
        } else if let ValueRef::Inst(pid) = ptr {
            // a chained pointer: attribute the type to the base it came from
            if let Some(underlying) = module.inst(pid).pointer_operand() {
                graph.put_name(Some(scope), underlying, &tbaa_type, false);
            }
        }
    }
}

/// The combined seeder: DI first, then TBAA, then the IR-type fallback.
fn seed_combined(module: &Module, graph: &mut TypeGraph, config: &InferenceConfig) {
    let di_locals = collect_di_locals(module);

    // DI pass
    for (g, global) in module.globals.iter().enumerate() {
        for expr in &global.di_exprs {
            seed_di_global(module, graph, GlobalId(g), *expr, config);
        }
    }
    for (f, func) in module.functions.iter().enumerate() {
        let fid = FuncId(f);
        for inst in module.func_insts(fid) {
            let value = keyed_value(module, inst);
            seed_di_locals_of_value(module, graph, &di_locals, fid, value, config);
        }
        if let Some(sp) = func.subprogram {
            seed_di_function(module, graph, &di_locals, fid, sp, config);
        }
    }

    // TBAA pass
    seed_tbaa(module, graph);

    // IR-type fallback
    for (g, global) in module.globals.iter().enumerate() {
        if !global.di_exprs.is_empty() {
            continue;
        }
        let name = type_name(module, &global.value_type);
        graph.put_name(
            None,
            ValueRef::Global(GlobalId(g)),
            &reference_name(&name),
            false,
        );
    }
    for (f, func) in module.functions.iter().enumerate() {
        let fid = FuncId(f);
        // IR candidates stay in addition to DI ones: the result is
        // multi-hypothesis, and `put` already suppresses redundancy
        for inst in module.func_insts(fid) {
            let value = keyed_value(module, inst);
            let name = ir_inst_type(module, inst);
            graph.put_name(Some(fid), value, &name, false);
        }
        if func.subprogram.is_none() {
            let name = type_name(module, &func.ret);
            graph.put_name(None, ValueRef::Function(fid), &name, true);
            for (i, arg) in func.args.iter().enumerate() {
                let name = type_name(module, &arg.ty);
                graph.put_name(Some(fid), ValueRef::Arg(fid, i), &name, false);
            }
        }
    }
}
