//! The module view the inference engine consumes.
//!
//! Shaped like LLVM IR after pointee types have been erased to the opaque
//! `ptr` token, but independent of any LLVM binding: modules are produced by
//! the textual lifter ([`crate::ll_parser`]) or built directly by tests.
//! Typed pointers (`T*`) still occur in migration-mode modules that predate
//! the erasure.

use crate::containers::unordered::UnorderedMap;
use crate::metadata::{DiNodeId, MdValueId, Metadata, TbaaTagId};

/// Index of an identified struct or union type in [`Module::structs`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct StructId(pub usize);

/// Index of a global variable in [`Module::globals`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct GlobalId(pub usize);

/// Index of a function in [`Module::functions`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct FuncId(pub usize);

/// Index of an instruction in [`Module::insts`]. Instruction ids increase in
/// module order (functions, then blocks, then instructions).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InstId(pub usize);

/// Index of an interned constant in [`Module::consts`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ConstId(pub usize);

/// An IR type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Type {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    I128,
    Float,
    Double,
    /// The opaque pointer token `ptr`: an address whose pointee is erased.
    Ptr,
    /// A typed pointer `T*`, as found in migration-mode modules.
    Pointer(Box<Type>),
    Array(Box<Type>, u64),
    Vector(Box<Type>, u64),
    /// A named `%struct.X` / `%union.X` reference.
    Struct(StructId),
    Func {
        ret: Box<Type>,
        params: Vec<Type>,
    },
}

impl Type {
    pub fn pointer_to(self) -> Type {
        Type::Pointer(Box::new(self))
    }
}

/// An identified struct or union type.
#[derive(Clone, Debug)]
pub struct StructDef {
    /// Name as written in the module without the leading `%`, e.g.
    /// `struct.S` or `union.U`.
    pub name: String,
    pub fields: Vec<Type>,
}

#[derive(Clone, Debug)]
pub struct GlobalVariable {
    /// Name without the leading `@`.
    pub name: String,
    /// The type of the stored value (the global itself is an address).
    pub value_type: Type,
    /// Attached `!dbg` global variable expressions.
    pub di_exprs: Vec<DiNodeId>,
}

#[derive(Clone, Debug)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

#[derive(Clone, Debug)]
pub struct Function {
    /// Name without the leading `@`.
    pub name: String,
    pub ret: Type,
    pub args: Vec<Argument>,
    /// `declare`d functions have no body.
    pub is_decl: bool,
    /// Attached `!dbg` subprogram.
    pub subprogram: Option<DiNodeId>,
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub label: String,
    pub insts: Vec<InstId>,
}

/// Identity of a value, used as the key of the type graph. Module-scope
/// values are [`ValueRef::Global`] and [`ValueRef::Function`]; everything
/// else lives in some function's scope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum ValueRef {
    Global(GlobalId),
    Function(FuncId),
    Arg(FuncId, usize),
    Inst(InstId),
    Const(ConstId),
    /// A metadata-position operand (`metadata ...`); never typed.
    Metadata(MdValueId),
}

impl ValueRef {
    /// Module-scope values are routed to the global map of the type graph
    /// regardless of the scope a write supplies.
    pub fn is_module_scope(&self) -> bool {
        matches!(self, ValueRef::Global(_) | ValueRef::Function(_))
    }
}

/// An interned constant. Constants are uniqued, so the same literal used
/// twice is the same value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Constant {
    Int { ty: Type, value: u64 },
    Float { ty: Type, repr: String },
    Null { ty: Type },
    Zero { ty: Type },
    Undef { ty: Type },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CastOp {
    Bitcast,
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
    FpTrunc,
    FpExt,
    SiToFp,
    UiToFp,
    FpToSi,
    FpToUi,
    AddrSpaceCast,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// One step of a `getelementptr` index chain.
#[derive(Clone, Debug)]
pub enum GepIndex {
    Const(u64),
    Value(ValueRef),
}

#[derive(Clone, Debug)]
pub enum Callee {
    Direct(FuncId),
    Indirect(ValueRef),
}

#[derive(Clone, Debug)]
pub enum InstKind {
    Alloca {
        allocated: Type,
    },
    Load {
        ty: Type,
        ptr: ValueRef,
    },
    Store {
        value: ValueRef,
        /// The written type of the value operand.
        value_ty: Type,
        ptr: ValueRef,
    },
    Gep {
        source_elem: Type,
        base: ValueRef,
        indices: Vec<GepIndex>,
    },
    Call {
        callee: Callee,
        ret: Type,
        args: Vec<ValueRef>,
    },
    Phi {
        ty: Type,
        incoming: Vec<(ValueRef, String)>,
    },
    Select {
        ty: Type,
        cond: ValueRef,
        on_true: ValueRef,
        on_false: ValueRef,
    },
    Cast {
        op: CastOp,
        value: ValueRef,
        dest: Type,
    },
    Binary {
        op: BinaryOp,
        ty: Type,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    Cmp {
        fp: bool,
        pred: String,
        lhs: ValueRef,
        rhs: ValueRef,
    },
    Ret {
        value: Option<ValueRef>,
    },
    Br {
        dest: String,
    },
    CondBr {
        cond: ValueRef,
        on_true: String,
        on_false: String,
    },
    Unreachable,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    /// Result name without the leading `%`, for value-producing instructions
    /// that were named in the module text.
    pub name: Option<String>,
    /// The owning function.
    pub func: FuncId,
    pub kind: InstKind,
    /// Attached `!tbaa` access tag.
    pub tbaa: Option<TbaaTagId>,
    /// Whether a `!dbg` location was attached.
    pub has_dbg: bool,
}

impl Instruction {
    /// The type of the value this instruction produces. `Void` for
    /// instructions that produce none.
    pub fn result_type(&self) -> Type {
        match &self.kind {
            InstKind::Alloca { .. } => Type::Ptr,
            InstKind::Load { ty, .. } => ty.clone(),
            InstKind::Store { .. } => Type::Void,
            // The result is an address into the source aggregate; its erased
            // type is all the IR itself knows.
            InstKind::Gep { .. } => Type::Ptr,
            InstKind::Call { ret, .. } => ret.clone(),
            InstKind::Phi { ty, .. } => ty.clone(),
            InstKind::Select { ty, .. } => ty.clone(),
            InstKind::Cast { dest, .. } => dest.clone(),
            InstKind::Binary { ty, .. } => ty.clone(),
            InstKind::Cmp { .. } => Type::I1,
            InstKind::Ret { .. } | InstKind::Br { .. } | InstKind::CondBr { .. } => Type::Void,
            InstKind::Unreachable => Type::Void,
        }
    }

    /// Every value operand, in operand order. Metadata operands are included;
    /// callers that only care about typeable values filter them out.
    pub fn operands(&self) -> Vec<ValueRef> {
        match &self.kind {
            InstKind::Alloca { .. } => vec![],
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { value, ptr, .. } => vec![*value, *ptr],
            InstKind::Gep { base, indices, .. } => {
                let mut ops = vec![*base];
                for idx in indices {
                    if let GepIndex::Value(v) = idx {
                        ops.push(*v);
                    }
                }
                ops
            }
            InstKind::Call { callee, args, .. } => {
                let mut ops = vec![];
                if let Callee::Indirect(v) = callee {
                    ops.push(*v);
                }
                ops.extend(args.iter().copied());
                ops
            }
            InstKind::Phi { incoming, .. } => incoming.iter().map(|(v, _)| *v).collect(),
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Ret { value } => value.iter().copied().collect(),
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Br { .. } | InstKind::Unreachable => vec![],
        }
    }

    /// The pointer operand of a memory access, if this is one.
    pub fn pointer_operand(&self) -> Option<ValueRef> {
        match &self.kind {
            InstKind::Load { ptr, .. } | InstKind::Store { ptr, .. } => Some(*ptr),
            InstKind::Gep { base, .. } => Some(*base),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct Module {
    pub name: String,
    pub structs: Vec<StructDef>,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub insts: Vec<Instruction>,
    pub consts: Vec<Constant>,
    pub metadata: Metadata,
    struct_by_name: UnorderedMap<String, StructId>,
    func_by_name: UnorderedMap<String, FuncId>,
    const_dedup: UnorderedMap<Constant, ConstId>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.0]
    }

    /// Look up a named struct type, creating a fieldless placeholder if it
    /// has not been defined yet (types may be referenced before their
    /// definition line).
    pub fn get_or_declare_struct(&mut self, name: &str) -> StructId {
        if let Some(id) = self.struct_by_name.get(name) {
            return *id;
        }
        let id = StructId(self.structs.len());
        self.structs.push(StructDef {
            name: name.to_owned(),
            fields: vec![],
        });
        self.struct_by_name.insert(name.to_owned(), id);
        id
    }

    pub fn define_struct_fields(&mut self, id: StructId, fields: Vec<Type>) {
        self.structs[id.0].fields = fields;
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> GlobalId {
        let id = GlobalId(self.globals.len());
        self.globals.push(global);
        id
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId(self.functions.len());
        self.func_by_name.insert(function.name.clone(), id);
        self.functions.push(function);
        id
    }

    /// Append an instruction to `block` of the function it names.
    pub fn push_inst(&mut self, block: usize, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len());
        let func = inst.func;
        self.insts.push(inst);
        self.functions[func.0].blocks[block].insts.push(id);
        id
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.func_by_name.get(name).copied()
    }

    /// Intern a constant, returning the shared id for repeated literals.
    pub fn intern_const(&mut self, c: Constant) -> ConstId {
        if let Some(id) = self.const_dedup.get(&c) {
            return *id;
        }
        let id = ConstId(self.consts.len());
        self.const_dedup.insert(c.clone(), id);
        self.consts.push(c);
        id
    }

    /// All instruction ids of a function, in block order.
    pub fn func_insts(&self, f: FuncId) -> impl Iterator<Item = InstId> + '_ {
        self.functions[f.0]
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
    }

    /// All instruction ids of the module, in module order.
    pub fn all_insts(&self) -> impl Iterator<Item = InstId> + '_ {
        (0..self.functions.len()).flat_map(|f| self.func_insts(FuncId(f)))
    }

    /// The name of a value, if it has one. Constants and metadata operands
    /// are nameless.
    pub fn value_name(&self, v: ValueRef) -> Option<&str> {
        match v {
            ValueRef::Global(g) => Some(&self.globals[g.0].name),
            ValueRef::Function(f) => Some(&self.functions[f.0].name),
            ValueRef::Arg(f, i) => Some(&self.functions[f.0].args[i].name),
            ValueRef::Inst(i) => self.insts[i.0].name.as_deref(),
            ValueRef::Const(_) | ValueRef::Metadata(_) => None,
        }
    }

    /// Find a value by name within a function scope (arguments, then
    /// instruction results).
    pub fn find_local(&self, f: FuncId, name: &str) -> Option<ValueRef> {
        let func = &self.functions[f.0];
        for (i, arg) in func.args.iter().enumerate() {
            if arg.name == name {
                return Some(ValueRef::Arg(f, i));
            }
        }
        self.func_insts(f)
            .find(|id| self.insts[id.0].name.as_deref() == Some(name))
            .map(ValueRef::Inst)
    }

    pub fn find_global(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == name)
            .map(GlobalId)
    }

    /// Whether any instruction carries a debug location. Mirrors the check
    /// front ends use to decide whether a module was built with `-g`.
    pub fn has_debug_info(&self) -> bool {
        self.insts.iter().any(|i| i.has_dbg)
    }

    /// Reverse dataflow: for every value, the instructions that use it as an
    /// operand.
    pub fn users(&self) -> UnorderedMap<ValueRef, Vec<InstId>> {
        let mut users: UnorderedMap<ValueRef, Vec<InstId>> = UnorderedMap::new();
        for id in self.all_insts() {
            for op in self.inst(id).operands() {
                if matches!(op, ValueRef::Metadata(_)) {
                    continue;
                }
                users.entry(op).or_default().push(id);
            }
        }
        users
    }
}
