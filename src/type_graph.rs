//! The type graph: a two-level mapping from values to candidate-type sets.
//!
//! Module-scope values (globals, functions) live in a global map; arguments
//! and instruction results live in per-function maps. Reads fall through
//! local to global; writes to a module-scope key always land in the global
//! map, whatever scope the writer supplies.
//!
//! The graph is monotone: sets only ever grow (the one exception being the
//! `ptr` token, which is dropped as soon as any specific name arrives).
//! Monotonicity over a finite name domain is what makes the solver terminate.

use crate::containers::unordered::UnorderedMap;
use crate::ir::{FuncId, InstKind, Module, ValueRef};
use crate::type_set::TypeSet;

use itertools::Itertools;

/// The owning function of a value; module-scope values have none.
pub type Scope = Option<FuncId>;

#[derive(Clone, Default, PartialEq)]
pub struct TypeGraph {
    global: UnorderedMap<ValueRef, TypeSet>,
    local: UnorderedMap<FuncId, UnorderedMap<ValueRef, TypeSet>>,
}

impl TypeGraph {
    pub fn new() -> Self {
        Default::default()
    }

    /// The recovered set for a value: the local map of `scope` first, then
    /// the global map.
    pub fn get(&self, scope: Scope, key: ValueRef) -> Option<&TypeSet> {
        if let Some(scope) = scope {
            if let Some(bucket) = self.local.get(&scope) {
                if let Some(set) = bucket.get(&key) {
                    return Some(set);
                }
            }
        }
        self.global.get(&key)
    }

    /// Whether the value is (still) an opaque pointer.
    pub fn is_opaque(&self, scope: Scope, key: ValueRef) -> bool {
        self.get(scope, key).map_or(false, |s| s.has_ptr())
    }

    // The slot a write to `key` must land in. Local buckets are allocated
    // lazily.
    fn slot_mut(&mut self, scope: Scope, key: ValueRef) -> &mut TypeSet {
        let scope = if key.is_module_scope() { None } else { scope };
        match scope {
            Some(f) => self
                .local
                .entry(f)
                .or_default()
                .entry(key)
                .or_default(),
            None => self.global.entry(key).or_default(),
        }
    }

    /// Merge a single name into a value's set. Returns `true` iff the stored
    /// set strictly grew; the solver propagates only on growth.
    ///
    /// A name redundant against what is already known is dropped: inserting
    /// `T` when `T*` is present is a no-op, as is `T*` when `T` is present.
    pub fn put_name(&mut self, scope: Scope, key: ValueRef, name: &str, is_func: bool) -> bool {
        if let Some(old) = self.get(scope, key) {
            if old.contains(&format!("{}*", name)) {
                return false;
            }
            if let Some(stripped) = name.strip_suffix('*') {
                if old.contains(stripped) {
                    return false;
                }
            }
            if old.contains(name) {
                return false;
            }
        }

        let slot = self.slot_mut(scope, key);
        slot.insert(name);
        if is_func {
            slot.mark_func();
        }
        true
    }

    /// Merge a whole set into a value's set; same growth contract and
    /// redundancy suppression as [`Self::put_name`], applied per element.
    /// Members the stored set already holds are dropped, so the merge grows
    /// the set exactly when the incoming set carries something new.
    pub fn put(&mut self, scope: Scope, key: ValueRef, incoming: &TypeSet, is_func: bool) -> bool {
        if incoming.is_empty() {
            return false;
        }

        let mut to_add = incoming.clone();
        if let Some(old) = self.get(scope, key) {
            for name in incoming.iter() {
                if old.contains(name) || old.contains(&format!("{}*", name)) {
                    to_add.erase(name);
                } else if let Some(stripped) = name.strip_suffix('*') {
                    if old.contains(stripped) {
                        to_add.erase(name);
                    }
                }
            }
            if to_add.is_empty() {
                return false;
            }
        }

        let slot = self.slot_mut(scope, key);
        slot.insert_set(&to_add);
        if is_func {
            slot.mark_func();
        }
        true
    }

    /// The set of pointers to a value's types. `ptr` contributes nothing,
    /// and the chain is capped at double indirection: `T**` does not grow a
    /// `T***` (deliberate depth cap on pointer chains).
    pub fn reference(&self, scope: Scope, key: ValueRef) -> TypeSet {
        let mut out = TypeSet::new();
        if let Some(old) = self.get(scope, key) {
            for name in old.iter() {
                if name.ends_with("**") || name == "ptr" {
                    continue;
                }
                out.insert(format!("{}*", name));
            }
        }
        out
    }

    /// The set of pointees of a value's types; members without a pointer
    /// suffix (including `ptr`) contribute nothing.
    pub fn dereference(&self, scope: Scope, key: ValueRef) -> TypeSet {
        let mut out = TypeSet::new();
        if let Some(old) = self.get(scope, key) {
            for name in old.iter() {
                if let Some(stripped) = name.strip_suffix('*') {
                    out.insert(stripped);
                }
            }
        }
        out
    }

    /// Every map of the graph (global first, then one per function), for
    /// consumers that post-process or merge partitions.
    pub fn all_maps(&self) -> Vec<&UnorderedMap<ValueRef, TypeSet>> {
        let mut maps = vec![&self.global];
        maps.extend(self.local.values());
        maps
    }
}

/// Share of named program values whose recovered set says more than `ptr`.
pub struct Coverage {
    pub total: usize,
    pub covered: usize,
}

impl Coverage {
    /// Count globals, arguments, and non-store instructions; one is covered
    /// when its set is present and not opaque.
    pub fn measure(module: &Module, graph: &TypeGraph) -> Self {
        let mut total = 0usize;
        let mut covered = 0usize;

        let mut visit = |scope: Scope, v: ValueRef| {
            total += 1;
            if graph.get(scope, v).map_or(false, |s| !s.is_opaque()) {
                covered += 1;
            }
        };

        for g in 0..module.globals.len() {
            visit(None, ValueRef::Global(crate::ir::GlobalId(g)));
        }
        for f in 0..module.functions.len() {
            let fid = FuncId(f);
            for a in 0..module.functions[f].args.len() {
                visit(Some(fid), ValueRef::Arg(fid, a));
            }
            for inst in module.func_insts(fid) {
                if matches!(module.inst(inst).kind, InstKind::Store { .. }) {
                    continue;
                }
                visit(Some(fid), ValueRef::Inst(inst));
            }
        }

        Coverage { total, covered }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 / self.total as f64 * 100.0
        }
    }
}

impl std::fmt::Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "total count: {}", self.total)?;
        writeln!(f, "cover count: {}", self.covered)?;
        writeln!(f, "coverage: {:.2}%", self.percent())
    }
}

/// Display adapter streaming one line per named value:
/// `scope-or-(global), name, { type, ... }`. Iterates in module order so the
/// dump is deterministic.
pub struct DumpTypes<'a> {
    pub module: &'a Module,
    pub graph: &'a TypeGraph,
}

impl<'a> DumpTypes<'a> {
    fn line(
        &self,
        f: &mut std::fmt::Formatter,
        scope: Scope,
        v: ValueRef,
    ) -> std::fmt::Result {
        let Some(name) = self.module.value_name(v) else {
            return Ok(());
        };
        let Some(set) = self.graph.get(scope, v) else {
            return Ok(());
        };
        let scope_name = match scope {
            Some(fid) => &self.module.function(fid).name,
            None => "(global)",
        };
        writeln!(
            f,
            "{}, {}, {{ {} }}",
            scope_name,
            name,
            set.iter().format(", ")
        )
    }
}

impl<'a> std::fmt::Display for DumpTypes<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for g in 0..self.module.globals.len() {
            self.line(f, None, ValueRef::Global(crate::ir::GlobalId(g)))?;
        }
        for fidx in 0..self.module.functions.len() {
            let fid = FuncId(fidx);
            self.line(f, None, ValueRef::Function(fid))?;
            for a in 0..self.module.functions[fidx].args.len() {
                self.line(f, Some(fid), ValueRef::Arg(fid, a))?;
            }
            for inst in self.module.func_insts(fid) {
                self.line(f, Some(fid), ValueRef::Inst(inst))?;
            }
        }
        Ok(())
    }
}
