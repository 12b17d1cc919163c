//! Per-opcode dataflow rules.
//!
//! Each rule reads and writes the type graph through `put`/`get`/
//! `reference`/`dereference` only, and requeues the users of any value whose
//! set strictly grew. Canonicalisation happens before names enter the graph;
//! rules move already-canonical names around.

use crate::containers::unordered::UnorderedMap;
use crate::inference_config::InferenceConfig;
use crate::ir::{
    Callee, FuncId, GepIndex, InstId, InstKind, Module, StructId, Type, ValueRef,
};
use crate::log::*;
use crate::metadata::{di_struct_field, DiNodeId};
use crate::type_graph::TypeGraph;
use crate::type_names::{can_flow, can_flow_name, reference_name, type_name};
use crate::worklist::WorkList;

/// The rule set, bound to one module and one solving run.
pub struct FlowRules<'m> {
    module: &'m Module,
    config: &'m InferenceConfig,
    struct_di: &'m UnorderedMap<StructId, DiNodeId>,
}

impl<'m> FlowRules<'m> {
    pub fn new(
        module: &'m Module,
        config: &'m InferenceConfig,
        struct_di: &'m UnorderedMap<StructId, DiNodeId>,
    ) -> Self {
        FlowRules {
            module,
            config,
            struct_di,
        }
    }

    /// Dispatch one instruction to its rule.
    pub fn apply(&self, graph: &mut TypeGraph, worklist: &mut WorkList, inst: InstId) {
        let scope = self.module.inst(inst).func;
        match &self.module.inst(inst).kind {
            InstKind::Cast { dest, .. } => self.process_cast(graph, worklist, scope, inst, dest),
            InstKind::Load { ptr, .. } => self.process_load(graph, worklist, scope, inst, *ptr),
            InstKind::Store { value, ptr, .. } => {
                self.process_store(graph, worklist, scope, *value, *ptr)
            }
            InstKind::Binary { lhs, rhs, .. } => {
                self.process_binary(graph, worklist, scope, inst, *lhs, *rhs)
            }
            InstKind::Phi { incoming, .. } => {
                self.process_phi(graph, worklist, scope, inst, incoming)
            }
            InstKind::Gep {
                source_elem,
                base,
                indices,
            } => self.process_field_of(graph, worklist, scope, inst, source_elem, *base, indices),
            InstKind::Cmp { lhs, rhs, .. } => {
                self.process_cmp(graph, worklist, scope, *lhs, *rhs)
            }
            InstKind::Call { callee, args, .. } => {
                self.process_call(graph, worklist, scope, inst, callee, args)
            }
            InstKind::Select {
                on_true, on_false, ..
            } => self.process_select(graph, worklist, scope, inst, *on_true, *on_false),
            InstKind::Alloca { .. }
            | InstKind::Ret { .. }
            | InstKind::Br { .. }
            | InstKind::CondBr { .. }
            | InstKind::Unreachable => {}
        }
    }

    /// The result of a cast is whatever the cast says it produces.
    fn process_cast(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        dest: &Type,
    ) {
        let dst = ValueRef::Inst(inst);
        let dst_type = type_name(self.module, dest);
        if graph.put_name(Some(scope), dst, &dst_type, false) {
            worklist.push_users(dst);
        }
    }

    /// `res <- dereference(ptr)`; `ptr <- reference(res)`.
    fn process_load(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        ptr: ValueRef,
    ) {
        let dst = ValueRef::Inst(inst);

        let deref = graph.dereference(Some(scope), ptr);
        if can_flow(&deref) && graph.put(Some(scope), dst, &deref, false) {
            worklist.push_users(dst);
        }

        let refd = graph.reference(Some(scope), dst);
        if can_flow(&refd) && graph.put(Some(scope), ptr, &refd, false) {
            worklist.push_users(ptr);
        }
    }

    /// `ptr <- reference(val)`; `val <- dereference(ptr)`.
    fn process_store(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        value: ValueRef,
        ptr: ValueRef,
    ) {
        let refd = graph.reference(Some(scope), value);
        if can_flow(&refd) && graph.put(Some(scope), ptr, &refd, false) {
            worklist.push_users(ptr);
        }

        let deref = graph.dereference(Some(scope), ptr);
        if can_flow(&deref) && graph.put(Some(scope), value, &deref, false) {
            worklist.push_users(value);
        }
    }

    /// Symmetric flow: a typed operand types the other operand and the
    /// result.
    fn process_binary(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        a: ValueRef,
        b: ValueRef,
    ) {
        let r = ValueRef::Inst(inst);
        let mut r_updated = false;

        if let Some(type_b) = graph.get(Some(scope), b).cloned() {
            if can_flow(&type_b) {
                if graph.put(Some(scope), a, &type_b, false) {
                    worklist.push_users(a);
                }
                if graph.put(Some(scope), r, &type_b, false) {
                    r_updated = true;
                }
            }
        }

        if let Some(type_a) = graph.get(Some(scope), a).cloned() {
            if can_flow(&type_a) {
                if graph.put(Some(scope), b, &type_a, false) {
                    worklist.push_users(b);
                }
                if graph.put(Some(scope), r, &type_a, false) {
                    r_updated = true;
                }
            }
        }

        if r_updated {
            worklist.push_users(r);
        }
    }

    /// An opaque result takes the union of its non-opaque incomings; once
    /// the result knows something, still-opaque incomings take it back.
    fn process_phi(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        incoming: &[(ValueRef, String)],
    ) {
        let r = ValueRef::Inst(inst);
        let mut r_updated = false;

        if graph.is_opaque(Some(scope), r) {
            for (v, _) in incoming {
                if graph.is_opaque(Some(scope), *v) {
                    continue;
                }
                if let Some(tv) = graph.get(Some(scope), *v).cloned() {
                    if graph.put(Some(scope), r, &tv, false) {
                        r_updated = true;
                    }
                }
            }
        }

        if let Some(tr) = graph.get(Some(scope), r).cloned() {
            if can_flow(&tr) {
                for (v, _) in incoming {
                    if graph.is_opaque(Some(scope), *v) && graph.put(Some(scope), *v, &tr, false) {
                        worklist.push_users(*v);
                    }
                }
            }
        }

        if r_updated {
            worklist.push_users(r);
        }
    }

    /// Both arms and the result converge on the union of what either arm
    /// knows.
    fn process_select(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        a: ValueRef,
        b: ValueRef,
    ) {
        let r = ValueRef::Inst(inst);
        let mut r_updated = false;

        if let Some(type_b) = graph.get(Some(scope), b).cloned() {
            if can_flow(&type_b) {
                if graph.put(Some(scope), a, &type_b, false) {
                    worklist.push_users(a);
                }
                if graph.put(Some(scope), r, &type_b, false) {
                    r_updated = true;
                }
            }
        }

        if let Some(type_a) = graph.get(Some(scope), a).cloned() {
            if can_flow(&type_a) {
                if graph.put(Some(scope), b, &type_a, false) {
                    worklist.push_users(b);
                }
                if graph.put(Some(scope), r, &type_a, false) {
                    r_updated = true;
                }
            }
        }

        if r_updated {
            worklist.push_users(r);
        }
    }

    /// A comparison says its operands agree: an opaque side takes the other
    /// side's set. The `i1` result is never updated.
    fn process_cmp(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        a: ValueRef,
        b: ValueRef,
    ) {
        let a_opaque = graph.is_opaque(Some(scope), a);
        let b_opaque = graph.is_opaque(Some(scope), b);

        if a_opaque && !b_opaque {
            if let Some(tb) = graph.get(Some(scope), b).cloned() {
                if graph.put(Some(scope), a, &tb, false) {
                    worklist.push_users(a);
                }
            }
        } else if b_opaque && !a_opaque {
            if let Some(ta) = graph.get(Some(scope), a).cloned() {
                if graph.put(Some(scope), b, &ta, false) {
                    worklist.push_users(b);
                }
            }
        }
    }

    /// Field access. The base is a pointer to the source element type; the
    /// result follows the constant-index walk through the aggregate. When
    /// the walk ends on a field whose IR type is opaque, debug info gets the
    /// last word.
    fn process_field_of(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        source_elem: &Type,
        base: ValueRef,
        indices: &[GepIndex],
    ) {
        let base_name = type_name(self.module, source_elem);
        if graph.is_opaque(Some(scope), base) && can_flow_name(&base_name) {
            if graph.put_name(Some(scope), base, &reference_name(&base_name), false) {
                worklist.push_users(base);
            }
        }

        let lhs = ValueRef::Inst(inst);
        let mut cur = source_elem.clone();
        let mut field_name = String::new();

        // the first index steps over the base pointer, not into the type
        for (pos, index) in indices.iter().enumerate().skip(1) {
            let last = pos == indices.len() - 1;
            match index {
                GepIndex::Const(n) => match cur.clone() {
                    Type::Struct(sid) => {
                        let sdef = self.module.struct_def(sid);
                        if (*n as usize) < sdef.fields.len() {
                            cur = sdef.fields[*n as usize].clone();
                            field_name = type_name(self.module, &cur);

                            if crate::type_names::is_opaque_name(&field_name) && last {
                                field_name = di_struct_field(
                                    self.module,
                                    self.struct_di,
                                    sid,
                                    *n as usize,
                                    self.config.resolve_typedefs,
                                );
                            }
                        }
                    }
                    Type::Array(elem, _) | Type::Vector(elem, _) => {
                        cur = *elem;
                    }
                    other => {
                        debug!("field access walked into a scalar"; "type" => ?other);
                    }
                },
                GepIndex::Value(_) => match cur.clone() {
                    Type::Array(elem, _) | Type::Vector(elem, _) => {
                        cur = *elem;
                    }
                    other => {
                        panic!(
                            "malformed IR: non-constant index over non-array base {:?}",
                            other
                        );
                    }
                },
            }
        }

        if graph.is_opaque(Some(scope), lhs) && can_flow_name(&field_name) {
            if graph.put_name(Some(scope), lhs, &reference_name(&field_name), false) {
                worklist.push_users(lhs);
            }
        }
    }

    /// `llvm.memcpy` / `llvm.memmove`: each side of the copy flows into the
    /// other.
    fn process_copy(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        args: &[ValueRef],
    ) {
        let (Some(&dst), Some(&src)) = (args.first(), args.get(1)) else {
            return;
        };

        if let Some(dst_type) = graph.get(Some(scope), dst).cloned() {
            if can_flow(&dst_type) && graph.put(Some(scope), src, &dst_type, false) {
                worklist.push_users(src);
            }
        }

        if let Some(src_type) = graph.get(Some(scope), src).cloned() {
            if can_flow(&src_type) && graph.put(Some(scope), dst, &src_type, false) {
                worklist.push_users(dst);
            }
        }
    }

    /// Direct calls: caller arguments flow into callee parameters, and the
    /// result takes the callee's return set. Indirect calls are not
    /// propagated. Intrinsics are skipped, except the memory-copy family,
    /// which runs the symmetric-copy rule first.
    fn process_call(
        &self,
        graph: &mut TypeGraph,
        worklist: &mut WorkList,
        scope: FuncId,
        inst: InstId,
        callee: &Callee,
        args: &[ValueRef],
    ) {
        let Callee::Direct(fid) = callee else {
            return;
        };
        let func = self.module.function(*fid);

        if func.name.starts_with("llvm.memcpy") || func.name.starts_with("llvm.memmove") {
            self.process_copy(graph, worklist, scope, args);
        } else if func.name.starts_with("llvm.") {
            return;
        }

        for (i, arg) in args.iter().enumerate().take(func.args.len()) {
            if matches!(arg, ValueRef::Metadata(_)) {
                continue;
            }
            let param = ValueRef::Arg(*fid, i);
            if let Some(arg_type) = graph.get(Some(scope), *arg).cloned() {
                if can_flow(&arg_type) && graph.put(Some(*fid), param, &arg_type, false) {
                    worklist.push_users(param);
                }
            }
        }

        let dst = ValueRef::Inst(inst);
        if let Some(ret_type) = graph.get(None, ValueRef::Function(*fid)).cloned() {
            if can_flow(&ret_type) && graph.put(Some(scope), dst, &ret_type, false) {
                worklist.push_users(dst);
            }
        }
    }
}
