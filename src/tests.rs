//! Fixture modules and tests for the inference engine. Fixtures are lifted
//! from inline `.ll` text, so they exercise the same path the CLI uses.

use crate::inference_config::{InferenceConfig, TypeSrc};
use crate::ir::Module;
use crate::ll_parser::lift_from;

#[cfg(test)]
use crate::inference_config::SolverKind;
#[cfg(test)]
use crate::ir::{InstKind, ValueRef};
#[cfg(test)]
use crate::solver::TypeInference;
#[cfg(test)]
use crate::type_graph::{Coverage, DumpTypes, TypeGraph};
#[cfg(test)]
use crate::type_set::TypeSet;

pub fn config(src: TypeSrc) -> InferenceConfig {
    InferenceConfig {
        type_src: src,
        ..Default::default()
    }
}

#[cfg(test)]
fn assert_types(set: Option<&TypeSet>, expected: &[&str]) {
    let set = set.expect("value has no recovered types");
    let got: Vec<&str> = set.iter().collect();
    assert_eq!(got, expected);
}

#[cfg(test)]
fn local(module: &Module, func: &str, name: &str) -> (crate::ir::FuncId, ValueRef) {
    let f = module.find_function(func).unwrap();
    (f, module.find_local(f, name).unwrap())
}

/// A typed-pointer (pre-erasure) module: a global, an alloca of a pointer,
/// and a store through it.
pub fn migration_module() -> Module {
    lift_from(
        r#"
%struct.S = type { i32 }

@g = global i32 0

define void @keep(%struct.S* %p) {
entry:
  %a = alloca %struct.S*
  store %struct.S* %p, %struct.S** %a
  ret void
}
"#,
    )
}

#[test]
fn migration_seeding_recovers_pointer_levels() {
    let module = migration_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let g = module.find_global("g").unwrap();
    assert_types(graph.get(None, ValueRef::Global(g)), &["i32*"]);

    let (f, a) = local(&module, "keep", "a");
    assert_types(graph.get(Some(f), a), &["%struct.S**"]);
    let (_, p) = local(&module, "keep", "p");
    assert_types(graph.get(Some(f), p), &["%struct.S*"]);
}

#[test]
fn store_information_is_keyed_on_the_stored_value() {
    let module = migration_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let f = module.find_function("keep").unwrap();
    let store = module
        .all_insts()
        .find(|id| matches!(module.inst(*id).kind, InstKind::Store { .. }))
        .unwrap();
    assert!(graph.get(Some(f), ValueRef::Inst(store)).is_none());
}

/// An opaque module where only the load's result type pins anything down.
pub fn opaque_load_module() -> Module {
    lift_from(
        r#"
define void @f(ptr %q) {
entry:
  %l = load i32, ptr %q
  ret void
}
"#,
    )
}

#[test]
fn load_back_propagates_into_the_pointer() {
    let module = opaque_load_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (f, l) = local(&module, "f", "l");
    assert_types(graph.get(Some(f), l), &["i32"]);
    let (_, q) = local(&module, "f", "q");
    assert_types(graph.get(Some(f), q), &["i32*"]);
}

/// A phi joining a known `i8*` with a still-opaque argument.
pub fn phi_module() -> Module {
    lift_from(
        r#"
define void @f(i1 %c, ptr %y) {
entry:
  %x = alloca i8
  br i1 %c, label %a, label %b
a:
  br label %m
b:
  br label %m
m:
  %r = phi ptr [ %x, %a ], [ %y, %b ]
  ret void
}
"#,
    )
}

#[test]
fn phi_merges_forward_and_back() {
    let module = phi_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (f, r) = local(&module, "f", "r");
    assert_types(graph.get(Some(f), r), &["i8*"]);
    // the still-opaque incoming takes the result's type back
    let (_, y) = local(&module, "f", "y");
    assert_types(graph.get(Some(f), y), &["i8*"]);
}

/// `llvm.memcpy` between an unknown destination and a known struct source.
pub fn memcpy_module() -> Module {
    lift_from(
        r#"
%struct.T = type { i64 }

declare void @llvm.memcpy.p0.p0.i64(ptr, ptr, i64, i1)

define void @f(ptr %d) {
entry:
  %s = alloca %struct.T
  call void @llvm.memcpy.p0.p0.i64(ptr %d, ptr %s, i64 8, i1 false)
  ret void
}
"#,
    )
}

#[test]
fn memcpy_flows_types_between_operands() {
    let module = memcpy_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (f, d) = local(&module, "f", "d");
    let set = graph.get(Some(f), d).unwrap();
    assert!(set.contains("%struct.T*"));
}

/// A field access where the struct's IR field type is opaque but debug info
/// knows the field is a `char*`.
pub fn gep_di_module() -> Module {
    lift_from(
        r#"
%struct.S = type { i32, i32, ptr }

define void @f(ptr %p) !dbg !4 {
entry:
  %g = getelementptr inbounds %struct.S, ptr %p, i32 0, i32 2, !dbg !10
  ret void
}

!1 = !DIBasicType(name: "char", size: 8, encoding: DW_ATE_signed_char)
!2 = !DIDerivedType(tag: DW_TAG_pointer_type, baseType: !1, size: 64)
!3 = !DIBasicType(name: "int", size: 32, encoding: DW_ATE_signed)
!4 = distinct !DISubprogram(name: "f", type: !5, unit: !20)
!5 = !DISubroutineType(types: !6)
!6 = !{null, !22}
!7 = !DICompositeType(tag: DW_TAG_structure_type, name: "S", size: 128, elements: !8)
!8 = !{!11, !12, !13}
!10 = !DILocation(line: 3, column: 1, scope: !4)
!11 = !DIDerivedType(tag: DW_TAG_member, name: "a", baseType: !3, size: 32)
!12 = !DIDerivedType(tag: DW_TAG_member, name: "b", baseType: !3, size: 32, offset: 32)
!13 = !DIDerivedType(tag: DW_TAG_member, name: "s", baseType: !2, size: 64, offset: 64)
!20 = distinct !DICompileUnit(language: DW_LANG_C99, file: !21)
!21 = !DIFile(filename: "t.c", directory: "/tmp")
!22 = !DIDerivedType(tag: DW_TAG_pointer_type, baseType: !7, size: 64)
"#,
    )
}

#[test]
fn gep_consults_debug_info_for_opaque_fields() {
    let module = gep_di_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Comb))
        .run()
        .unwrap();

    let (f, g) = local(&module, "f", "g");
    let set = graph.get(Some(f), g).unwrap();
    assert!(set.contains("i8**"), "got {{ {} }}", set);

    let (_, p) = local(&module, "f", "p");
    let set = graph.get(Some(f), p).unwrap();
    assert!(set.contains("%struct.S*"), "got {{ {} }}", set);
}

#[test]
fn combined_seeding_requires_debug_info() {
    let module = opaque_load_module();
    let result = TypeInference::new(&module, config(TypeSrc::Comb)).run();
    assert!(result.is_err());
}

/// A load annotated with a scalar TBAA access tag.
pub fn tbaa_module() -> Module {
    lift_from(
        r#"
define void @f(ptr %p) {
entry:
  %v = load i32, ptr %p, !tbaa !1
  ret void
}

!1 = !{!2, !2, i64 0}
!2 = !{!"int", !3, i64 0}
!3 = !{!"omnipotent char", !4, i64 0}
!4 = !{!"Simple C/C++ TBAA"}
"#,
    )
}

#[test]
fn tbaa_attaches_scalar_types_to_the_pointer() {
    let module = tbaa_module();
    let inference = TypeInference::new(&module, config(TypeSrc::Tbaa));
    let graph = inference.seed().unwrap();

    let (f, p) = local(&module, "f", "p");
    assert_types(graph.get(Some(f), p), &["i32"]);
}

/// A local with both a DI declaration (`long`) and an IR type (`i32`).
pub fn di_priority_module() -> Module {
    lift_from(
        r#"
declare void @llvm.dbg.declare(metadata, metadata, metadata)

define void @f() !dbg !4 {
entry:
  %x = alloca i32, !dbg !9
  call void @llvm.dbg.declare(metadata ptr %x, metadata !8, metadata !DIExpression()), !dbg !9
  ret void
}

!3 = !DIBasicType(name: "long", size: 64, encoding: DW_ATE_signed)
!4 = distinct !DISubprogram(name: "f", type: !5, unit: !20)
!5 = !DISubroutineType(types: !6)
!6 = !{null}
!8 = !DILocalVariable(name: "x", scope: !4, type: !3)
!9 = !DILocation(line: 1, scope: !4)
!20 = distinct !DICompileUnit(language: DW_LANG_C99, file: !21)
!21 = !DIFile(filename: "t.c", directory: "/tmp")
"#,
    )
}

#[test]
fn debug_info_outranks_but_does_not_erase_ir_types() {
    let module = di_priority_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Comb))
        .run()
        .unwrap();

    let (f, x) = local(&module, "f", "x");
    let set = graph.get(Some(f), x).unwrap();
    // the DI hypothesis is present, and the IR hypothesis survives next to it
    assert!(set.contains("i64*"), "got {{ {} }}", set);
    assert!(set.contains("i32*"), "got {{ {} }}", set);
}

/// Caller and callee connected by a direct call.
pub fn call_module() -> Module {
    lift_from(
        r#"
%struct.T = type { i64 }

define void @callee(ptr %x) {
entry:
  ret void
}

define void @caller() {
entry:
  %s = alloca %struct.T
  call void @callee(ptr %s)
  ret void
}
"#,
    )
}

#[test]
fn call_arguments_flow_into_parameters() {
    let module = call_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (callee, x) = local(&module, "callee", "x");
    let set = graph.get(Some(callee), x).unwrap();
    assert!(set.contains("%struct.T*"), "got {{ {} }}", set);
}

#[test]
fn function_return_sets_carry_the_signature_flag() {
    let module = call_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let callee = module.find_function("callee").unwrap();
    let set = graph.get(None, ValueRef::Function(callee)).unwrap();
    assert!(set.is_func());
    assert_types(Some(set), &["void"]);
}

#[test]
fn casts_type_their_results() {
    let module = lift_from(
        r#"
define void @f(i64 %a) {
entry:
  %t = trunc i64 %a to i32
  ret void
}
"#,
    );
    let inference = TypeInference::new(&module, config(TypeSrc::Mig));
    // no seeding: the cast rule alone types the result
    let mut graph = TypeGraph::new();
    inference.solve(&mut graph);

    let (f, t) = local(&module, "f", "t");
    assert_types(graph.get(Some(f), t), &["i32"]);
}

#[test]
fn select_unifies_both_arms_and_the_result() {
    let module = lift_from(
        r#"
%struct.T = type { i32 }

define void @f(i1 %c, ptr %y) {
entry:
  %x = alloca %struct.T
  %s = select i1 %c, ptr %x, ptr %y
  ret void
}
"#,
    );
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (f, y) = local(&module, "f", "y");
    assert_types(graph.get(Some(f), y), &["%struct.T*"]);
    let (_, s) = local(&module, "f", "s");
    assert_types(graph.get(Some(f), s), &["%struct.T*"]);
}

#[test]
fn comparison_types_the_opaque_side_only() {
    let module = lift_from(
        r#"
define void @f(ptr %q) {
entry:
  %x = alloca i32
  %e = icmp eq ptr %x, %q
  ret void
}
"#,
    );
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let (f, q) = local(&module, "f", "q");
    assert_types(graph.get(Some(f), q), &["i32*"]);
    // the boolean result is left alone
    let (_, e) = local(&module, "f", "e");
    assert_types(graph.get(Some(f), e), &["i1"]);
}

#[test]
fn binary_operands_share_their_types() {
    let module = lift_from(
        r#"
define void @f(ptr %p) {
entry:
  %v = load i64, ptr %p
  %w = add i64 %v, 1
  ret void
}
"#,
    );
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let f = module.find_function("f").unwrap();
    let add = module
        .func_insts(f)
        .find(|id| matches!(module.inst(*id).kind, InstKind::Binary { .. }))
        .unwrap();
    let InstKind::Binary { rhs, .. } = &module.inst(add).kind else {
        unreachable!()
    };
    // the untyped constant operand picks up the other side's type
    assert_types(graph.get(Some(f), *rhs), &["i64"]);
}

// ---------------
// graph and set invariants
// ---------------

#[test]
fn opaque_token_never_coexists_with_specific_names() {
    let mut set = TypeSet::from_name("ptr");
    assert!(set.is_opaque());
    set.insert("i32");
    assert!(!set.contains("ptr"));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["i32"]);
}

#[test]
fn put_suppresses_redundant_dereference_levels() {
    let module = opaque_load_module();
    let (f, q) = local(&module, "f", "q");
    let mut graph = TypeGraph::new();

    assert!(graph.put_name(Some(f), q, "i32*", false));
    // a bare `T` is subsumed by an existing `T*`
    assert!(!graph.put_name(Some(f), q, "i32", false));
    // and `T*` is subsumed by an existing bare `T`
    assert!(graph.put_name(Some(f), q, "i8", false));
    assert!(!graph.put_name(Some(f), q, "i8*", false));
    assert_types(graph.get(Some(f), q), &["i32*", "i8"]);
}

#[test]
fn put_reports_growth_only_when_the_set_grows() {
    let module = opaque_load_module();
    let (f, q) = local(&module, "f", "q");
    let mut graph = TypeGraph::new();

    assert!(graph.put_name(Some(f), q, "i32", false));
    assert!(!graph.put_name(Some(f), q, "i32", false));

    let incoming = TypeSet::from_name("i32");
    assert!(!graph.put(Some(f), q, &incoming, false));

    // an overlapping merge still contributes its new members
    let incoming: TypeSet = ["i32", "i64"].into_iter().collect();
    assert!(graph.put(Some(f), q, &incoming, false));
    assert_types(graph.get(Some(f), q), &["i32", "i64"]);

    // and is a no-op once everything is known
    assert!(!graph.put(Some(f), q, &incoming, false));
}

#[test]
fn module_scope_writes_ignore_the_supplied_scope() {
    let module = migration_module();
    let g = ValueRef::Global(module.find_global("g").unwrap());
    let f = module.find_function("keep").unwrap();
    let mut graph = TypeGraph::new();

    assert!(graph.put_name(Some(f), g, "i32*", false));
    // readable without any scope: the write went to the global map
    assert_types(graph.get(None, g), &["i32*"]);
}

#[test]
fn reference_caps_pointer_depth() {
    let module = opaque_load_module();
    let (f, q) = local(&module, "f", "q");
    let (_, l) = local(&module, "f", "l");
    let mut graph = TypeGraph::new();

    graph.put_name(Some(f), q, "i8*", false);
    let refd = graph.reference(Some(f), q);
    assert_eq!(refd.iter().collect::<Vec<_>>(), vec!["i8**"]);

    // `T**` is the end of the line: no `T***` is ever produced
    graph.put_name(Some(f), l, "i8**", false);
    assert!(graph.reference(Some(f), l).is_empty());
}

#[test]
fn dereference_inverts_reference() {
    let module = opaque_load_module();
    let (f, q) = local(&module, "f", "q");
    let (_, l) = local(&module, "f", "l");
    let mut graph = TypeGraph::new();

    graph.put_name(Some(f), q, "i32", false);
    graph.put_name(Some(f), q, "%struct.S", false);
    let refd = graph.reference(Some(f), q);

    graph.put(Some(f), l, &refd, false);
    let back = graph.dereference(Some(f), l);
    assert!(back.contains("i32"));
    assert!(back.contains("%struct.S"));
}

#[test]
fn structural_predicates_compare_by_kind() {
    let a: TypeSet = ["%struct.S*", "i32"].into_iter().collect();
    let b: TypeSet = ["%struct.S*"].into_iter().collect();
    let c: TypeSet = ["i64"].into_iter().collect();

    assert!(a.is_struct_ty());
    assert!(a.is_pointer_ty());
    assert!(a.is_integer_ty());
    assert!(a.intersects(&b));
    assert!(!a.intersects(&c));
    assert!(a.equal_by_struct(&b));
    assert!(!a.equal_by_struct(&c));
    assert!(a.equal_by_pointer(&b));
    assert!(!a.equal_by_integer(&c));

    let d: TypeSet = ["i32", "double"].into_iter().collect();
    assert!(a.equal_by_integer(&d));

    // equal up to pointer depth
    let e: TypeSet = ["%struct.S", "i32*"].into_iter().collect();
    assert!(a.base_equals(&e));
    assert!(!a.base_equals(&c));
}

#[test]
fn graph_exposes_one_map_per_scope() {
    let module = call_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();
    // the global map plus one local map per function that owns values
    assert_eq!(graph.all_maps().len(), 3);
}

#[test]
fn solving_reaches_a_fixed_point() {
    for fixture in [phi_module(), gep_di_module(), memcpy_module(), call_module()] {
        let src = if fixture.has_debug_info() {
            TypeSrc::Comb
        } else {
            TypeSrc::Mig
        };
        let inference = TypeInference::new(&fixture, config(src));
        let mut graph = inference.run().unwrap();
        let settled = graph.clone();
        // one more full pass over the rules must change nothing
        inference.solve(&mut graph);
        assert!(graph == settled);
    }
}

#[test]
fn bounded_iteration_matches_the_worklist_driver() {
    for fixture in [phi_module(), memcpy_module(), call_module()] {
        let worklist = TypeInference::new(&fixture, config(TypeSrc::Mig))
            .run()
            .unwrap();
        let bounded = TypeInference::new(
            &fixture,
            InferenceConfig {
                type_src: TypeSrc::Mig,
                solver: SolverKind::BoundedIteration,
                ..Default::default()
            },
        )
        .run()
        .unwrap();
        assert!(worklist == bounded);
    }
}

// ---------------
// reporting surface
// ---------------

#[test]
fn coverage_counts_non_store_values() {
    let module = phi_module();
    let inference = TypeInference::new(&module, config(TypeSrc::Mig));

    let seeded = inference.seed().unwrap();
    let before = Coverage::measure(&module, &seeded);
    // `%y` and `%r` are still opaque before solving
    assert_eq!(before.total, 8);
    assert_eq!(before.covered, 6);

    let solved = inference.run().unwrap();
    let after = Coverage::measure(&module, &solved);
    assert_eq!(
        after.to_string(),
        "total count: 8\ncover count: 8\ncoverage: 100.00%\n"
    );
}

#[test]
fn dump_lists_named_values_with_their_scopes() {
    let module = opaque_load_module();
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();

    let dump = DumpTypes {
        module: &module,
        graph: &graph,
    }
    .to_string();
    assert_eq!(
        dump,
        "(global), f, { void }\nf, q, { i32* }\nf, l, { i32 }\n"
    );
}

// ---------------
// canonicalisation
// ---------------

#[test]
fn di_spellings_canonicalise_to_ir_spellings() {
    use crate::type_names::di_to_ir;
    assert_eq!(di_to_ir("bool"), "i1");
    assert_eq!(di_to_ir("char"), "i8");
    assert_eq!(di_to_ir("unsigned long"), "i64");
    assert_eq!(di_to_ir("struct S"), "%struct.S");
    assert_eq!(di_to_ir("struct S*"), "%struct.S*");
    assert_eq!(di_to_ir("enum E"), "i32");
    assert_eq!(di_to_ir("char**"), "i8**");
    assert_eq!(di_to_ir("union U"), "%union.U");
}

#[test]
fn struct_suffix_disambiguators_are_trimmed() {
    use crate::type_names::trim_struct_suffix;
    assert_eq!(trim_struct_suffix("%struct.foo.123"), "%struct.foo");
    assert_eq!(trim_struct_suffix("%struct.foo.123*"), "%struct.foo*");
    assert_eq!(trim_struct_suffix("%struct.foo"), "%struct.foo");
    assert_eq!(trim_struct_suffix("%union.bar.7"), "%union.bar");
}

#[test]
fn array_types_flatten_to_element_pointers() {
    let module = lift_from(
        r#"
@table = global [4 x [2 x i32]] zeroinitializer

define void @f() {
entry:
  ret void
}
"#,
    );
    let graph = TypeInference::new(&module, config(TypeSrc::Mig))
        .run()
        .unwrap();
    let g = module.find_global("table").unwrap();
    // two array dimensions flatten to `i32**`, and the global adds one more
    assert_types(graph.get(None, ValueRef::Global(g)), &["i32***"]);
}

// ---------------
// lifter sanity
// ---------------

#[test]
fn lifter_builds_the_expected_shapes() {
    let module = gep_di_module();
    assert_eq!(module.structs.len(), 1);
    assert_eq!(module.struct_def(crate::ir::StructId(0)).fields.len(), 3);
    assert_eq!(module.functions.len(), 1);
    assert!(module.functions[0].subprogram.is_some());
    assert!(module.has_debug_info());

    let f = module.find_function("f").unwrap();
    let gep = module
        .func_insts(f)
        .find(|id| matches!(module.inst(*id).kind, InstKind::Gep { .. }))
        .unwrap();
    let InstKind::Gep { indices, .. } = &module.inst(gep).kind else {
        unreachable!()
    };
    assert_eq!(indices.len(), 2);
}

#[test]
fn lifter_resolves_tbaa_tags() {
    let module = tbaa_module();
    let f = module.find_function("f").unwrap();
    let load = module.func_insts(f).next().unwrap();
    let tag = module.inst(load).tbaa.expect("load carries a tbaa tag");
    assert_eq!(module.metadata.tbaa_base_name(tag), "int");
}
