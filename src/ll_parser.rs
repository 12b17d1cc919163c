//! A lifter from a textual LLVM-IR subset (`.ll`) to the module view.
//!
//! Handles the opcodes and metadata forms the inference engine consumes:
//! struct type definitions, globals, function declarations and definitions,
//! the memory/dataflow instruction set, `!dbg`/`!tbaa` attachments, and the
//! DWARF-tagged `!DI*` specialized nodes. Anything outside the subset panics;
//! a module that fails to lift is malformed input, not a recoverable state.

use crate::containers::unordered::UnorderedMap;
use crate::ir::{
    Argument, BinaryOp, Block, Callee, CastOp, Constant, FuncId, Function, GepIndex,
    GlobalVariable, InstId, InstKind, Instruction, Module, Type, ValueRef,
};
use crate::metadata::{DiNode, DiNodeId, MdValue, TbaaTag, TbaaTypeDesc, TbaaTypeId, TbaaTagId};

use std::collections::BTreeMap;

/// Lift `.ll` text into a [`Module`].
pub fn lift_from(text: &str) -> Module {
    Lifter::new(text).run()
}

#[derive(Clone, Debug)]
enum RawMd {
    Tuple(Vec<RawOp>),
    Node { kind: String, fields: Vec<(String, RawOp)> },
}

#[derive(Clone, Debug)]
enum RawOp {
    Ref(u64),
    Str(String),
    Int(i64),
    Null,
    Inline(String),
    Tok(String),
}

struct Lifter<'t> {
    lines: Vec<&'t str>,
    module: Module,
    raw_md: BTreeMap<u64, RawMd>,
    di_ids: UnorderedMap<u64, DiNodeId>,
    tbaa_tag_ids: UnorderedMap<u64, TbaaTagId>,
    tbaa_type_ids: UnorderedMap<u64, TbaaTypeId>,
}

impl<'t> Lifter<'t> {
    fn new(text: &'t str) -> Self {
        let lines = text
            .lines()
            .map(strip_comment)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        Lifter {
            lines,
            module: Module::new("module"),
            raw_md: BTreeMap::new(),
            di_ids: UnorderedMap::new(),
            tbaa_tag_ids: UnorderedMap::new(),
            tbaa_type_ids: UnorderedMap::new(),
        }
    }

    fn run(mut self) -> Module {
        let lines = std::mem::take(&mut self.lines);

        // metadata and type definitions first: everything else refers to them
        for line in &lines {
            if let Some(rest) = line.strip_prefix("source_filename = ") {
                self.module.name = unquote(rest).to_owned();
            } else if let Some(id) = parse_md_def_id(line) {
                let body = line.split_once('=').unwrap().1.trim();
                self.raw_md.insert(id, parse_raw_md(body));
            } else if line.starts_with('%') && line.contains("= type") {
                let name = line.split_once('=').unwrap().0.trim();
                let name = name.strip_prefix('%').unwrap().to_owned();
                self.module.get_or_declare_struct(&name);
            }
        }
        self.resolve_di_nodes();
        for line in &lines {
            if line.starts_with('%') && line.contains("= type") {
                self.parse_struct_def(line);
            }
        }

        // register every function header before any body is parsed, so
        // forward calls resolve
        let mut bodies: Vec<(FuncId, Vec<&str>)> = vec![];
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if line.starts_with('@') {
                self.parse_global(line);
            } else if line.starts_with("declare ") {
                self.parse_function_header(line, true);
            } else if line.starts_with("define ") {
                let f = self.parse_function_header(line, false);
                let mut body = vec![];
                i += 1;
                while lines[i] != "}" {
                    body.push(lines[i]);
                    i += 1;
                }
                bodies.push((f, body));
            }
            i += 1;
        }

        for (f, body) in bodies {
            self.parse_function_body(f, &body);
        }

        self.module
    }

    // ---------------
    // metadata
    // ---------------

    /// Allocate arena ids for every specialized DI node, then fill their
    /// bodies. Two phases because DI graphs are cyclic (a struct member may
    /// point back at its struct).
    fn resolve_di_nodes(&mut self) {
        let raw: Vec<(u64, RawMd)> = self
            .raw_md
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();

        for (id, md) in &raw {
            if matches!(md, RawMd::Node { .. }) {
                let placeholder = self.module.metadata.add_di_node(DiNode::Other {
                    kind: String::new(),
                });
                self.di_ids.insert(*id, placeholder);
            }
        }

        for (id, md) in &raw {
            let RawMd::Node { kind, fields } = md else {
                continue;
            };
            let node = self.convert_di_node(kind, fields);
            let slot = self.di_ids.get(id).unwrap().0;
            self.module.metadata.di_nodes[slot] = node;
        }
    }

    fn di_ref(&self, fields: &[(String, RawOp)], key: &str) -> Option<DiNodeId> {
        match field(fields, key) {
            Some(RawOp::Ref(r)) => self.di_ids.get(r).copied(),
            _ => None,
        }
    }

    /// The list of raw operands behind a `!N` tuple reference.
    fn tuple_elems(&self, fields: &[(String, RawOp)], key: &str) -> Vec<RawOp> {
        match field(fields, key) {
            Some(RawOp::Ref(r)) => match self.raw_md.get(r) {
                Some(RawMd::Tuple(elems)) => elems.clone(),
                _ => vec![],
            },
            _ => vec![],
        }
    }

    fn convert_di_node(&self, kind: &str, fields: &[(String, RawOp)]) -> DiNode {
        let name = || match field(fields, "name") {
            Some(RawOp::Str(s)) => s.clone(),
            _ => String::new(),
        };
        match kind {
            "DIBasicType" => DiNode::BaseType { name: name() },
            "DIDerivedType" => match field_tok(fields, "tag") {
                "DW_TAG_pointer_type" | "DW_TAG_reference_type" => DiNode::PointerType {
                    base: self.di_ref(fields, "baseType"),
                },
                "DW_TAG_member" => DiNode::Member {
                    base: self.di_ref(fields, "baseType"),
                },
                "DW_TAG_typedef" => DiNode::Typedef {
                    name: name(),
                    base: self.di_ref(fields, "baseType"),
                },
                "DW_TAG_const_type" | "DW_TAG_volatile_type" | "DW_TAG_restrict_type" => {
                    DiNode::Qualified {
                        base: self.di_ref(fields, "baseType"),
                    }
                }
                tag => DiNode::Unknown {
                    tag: tag.to_owned(),
                },
            },
            "DICompositeType" => match field_tok(fields, "tag") {
                "DW_TAG_structure_type" => DiNode::StructureType {
                    name: name(),
                    elements: self
                        .tuple_elems(fields, "elements")
                        .iter()
                        .filter_map(|op| match op {
                            RawOp::Ref(r) => self.di_ids.get(r).copied(),
                            _ => None,
                        })
                        .collect(),
                },
                "DW_TAG_union_type" => DiNode::UnionType { name: name() },
                "DW_TAG_enumeration_type" => DiNode::EnumerationType { name: name() },
                "DW_TAG_array_type" => {
                    let dims = self
                        .tuple_elems(fields, "elements")
                        .iter()
                        .filter(|op| {
                            matches!(op, RawOp::Ref(r)
                                if matches!(self.raw_md.get(r),
                                    Some(RawMd::Node { kind, .. }) if kind == "DISubrange"))
                        })
                        .count();
                    DiNode::ArrayType {
                        base: self.di_ref(fields, "baseType"),
                        dims,
                    }
                }
                tag => DiNode::Unknown {
                    tag: tag.to_owned(),
                },
            },
            "DISubroutineType" => DiNode::SubroutineType {
                types: self
                    .tuple_elems(fields, "types")
                    .iter()
                    .map(|op| match op {
                        RawOp::Ref(r) => self.di_ids.get(r).copied(),
                        _ => None,
                    })
                    .collect(),
            },
            "DISubrange" => DiNode::Subrange,
            "DILocalVariable" => DiNode::LocalVariable {
                name: name(),
                ty: self.di_ref(fields, "type"),
            },
            "DIGlobalVariable" => DiNode::GlobalVariable {
                name: name(),
                ty: self.di_ref(fields, "type"),
            },
            "DIGlobalVariableExpression" => DiNode::GlobalVariableExpression {
                var: self.di_ref(fields, "var"),
            },
            "DISubprogram" => DiNode::Subprogram {
                ty: self.di_ref(fields, "type"),
            },
            "DILocation" | "DIFile" | "DICompileUnit" | "DIExpression" | "DILexicalBlock"
            | "DILexicalBlockFile" | "DINamespace" | "DIEnumerator" => DiNode::Other {
                kind: kind.to_owned(),
            },
            other => DiNode::Unknown {
                tag: other.to_owned(),
            },
        }
    }

    /// Resolve a `!tbaa !N` attachment: the tag's first field is the
    /// base-type descriptor, the second the access-type descriptor; a
    /// descriptor's first field is its name string.
    fn tbaa_tag(&mut self, raw: u64) -> TbaaTagId {
        if let Some(id) = self.tbaa_tag_ids.get(&raw) {
            return *id;
        }
        let (base_raw, access_raw) = match self.raw_md.get(&raw) {
            Some(RawMd::Tuple(elems)) => {
                let r = |i: usize| match elems.get(i) {
                    Some(RawOp::Ref(r)) => Some(*r),
                    _ => None,
                };
                (r(0), r(1))
            }
            _ => (None, None),
        };
        let base = self.tbaa_type(base_raw);
        let access = self.tbaa_type(access_raw.or(base_raw));
        let id = self.module.metadata.add_tbaa_tag(TbaaTag { base, access });
        self.tbaa_tag_ids.insert(raw, id);
        id
    }

    fn tbaa_type(&mut self, raw: Option<u64>) -> TbaaTypeId {
        let name = raw
            .and_then(|r| match self.raw_md.get(&r) {
                Some(RawMd::Tuple(elems)) => match elems.first() {
                    Some(RawOp::Str(s)) => Some(s.clone()),
                    _ => None,
                },
                _ => None,
            })
            .unwrap_or_default();
        let key = raw.unwrap_or(u64::MAX);
        if let Some(id) = self.tbaa_type_ids.get(&key) {
            return *id;
        }
        let id = self.module.metadata.add_tbaa_type(TbaaTypeDesc { name });
        self.tbaa_type_ids.insert(key, id);
        id
    }

    // ---------------
    // types
    // ---------------

    fn parse_struct_def(&mut self, line: &str) {
        let (name, rest) = line.split_once('=').unwrap();
        let name = name.trim().strip_prefix('%').unwrap().to_owned();
        let rest = rest.trim().strip_prefix("type").unwrap().trim();
        let id = self.module.get_or_declare_struct(&name);

        if rest == "opaque" {
            return;
        }
        let inner = rest
            .trim_start_matches("<{")
            .trim_start_matches('{')
            .trim_end_matches('}')
            .trim_end_matches(">")
            .trim_end_matches('}')
            .trim();
        if inner.is_empty() {
            return;
        }
        let fields = split_top_level(inner, ',')
            .into_iter()
            .map(|f| self.parse_type_full(f.trim()))
            .collect();
        self.module.define_struct_fields(id, fields);
    }

    /// Parse a type that must consume its whole input.
    fn parse_type_full(&mut self, s: &str) -> Type {
        let (ty, rest) = self.parse_type(s);
        assert!(
            rest.trim().is_empty(),
            "trailing characters after type: {:?}",
            s
        );
        ty
    }

    /// Parse a type from the front of `s`, returning the remainder.
    fn parse_type<'s>(&mut self, s: &'s str) -> (Type, &'s str) {
        let s = s.trim_start();
        let (mut ty, mut rest) = if let Some(inner) = s.strip_prefix('[') {
            let (elem, n, after) = self.parse_sized_element(inner, ']');
            (Type::Array(Box::new(elem), n), after)
        } else if let Some(inner) = s.strip_prefix('<') {
            let (elem, n, after) = self.parse_sized_element(inner, '>');
            (Type::Vector(Box::new(elem), n), after)
        } else if let Some(rest) = s.strip_prefix('%') {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || "._$-".contains(c)))
                .unwrap_or(rest.len());
            let name = &rest[..end];
            let id = self.module.get_or_declare_struct(name);
            (Type::Struct(id), &rest[end..])
        } else {
            let end = s
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(s.len());
            let (word, rest) = s.split_at(end);
            let ty = match word {
                "void" => Type::Void,
                "i1" => Type::I1,
                "i8" => Type::I8,
                "i16" => Type::I16,
                "i32" => Type::I32,
                "i64" => Type::I64,
                "i128" => Type::I128,
                "float" => Type::Float,
                "double" => Type::Double,
                "ptr" => Type::Ptr,
                other => panic!("unsupported type: {:?}", other),
            };
            (ty, rest)
        };

        loop {
            let trimmed = rest.trim_start();
            if let Some(after) = trimmed.strip_prefix('*') {
                ty = ty.pointer_to();
                rest = after;
            } else if trimmed.starts_with('(') {
                // a function type's parameter group
                let (group, after) = take_group(trimmed, '(', ')');
                let params = split_top_level(group, ',')
                    .into_iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty() && *p != "...")
                    .map(|p| self.parse_type_full(p))
                    .collect();
                ty = Type::Func {
                    ret: Box::new(ty),
                    params,
                };
                rest = after;
            } else {
                break;
            }
        }
        (ty, rest)
    }

    fn parse_sized_element<'s>(&mut self, s: &'s str, close: char) -> (Type, u64, &'s str) {
        let (count, rest) = s.trim_start().split_once(" x ").unwrap();
        let n: u64 = count.trim().parse().unwrap();
        let (elem, rest) = self.parse_type(rest);
        let rest = rest.trim_start();
        let rest = rest
            .strip_prefix(close)
            .unwrap_or_else(|| panic!("expected {:?} in type", close));
        (elem, n, rest)
    }

    // ---------------
    // globals and functions
    // ---------------

    fn parse_global(&mut self, line: &str) {
        let (name, rest) = line.split_once('=').unwrap();
        let name = name.trim().strip_prefix('@').unwrap().to_owned();
        let rest = rest.trim();

        // skip linkage and visibility words up to the `global`/`constant`
        // keyword
        let mut after = rest;
        loop {
            let (word, tail) = after.split_once(' ').unwrap_or((after, ""));
            let done = word == "global" || word == "constant";
            after = tail.trim_start();
            if done {
                break;
            }
            assert!(!after.is_empty(), "malformed global: {:?}", line);
        }

        let segments = split_top_level(after, ',');
        let (value_type, _init) = self.parse_type(segments[0].trim());

        let mut di_exprs = vec![];
        for seg in &segments[1..] {
            let seg = seg.trim();
            if let Some(md) = seg.strip_prefix("!dbg ") {
                let raw = md.trim().strip_prefix('!').unwrap().parse().unwrap();
                if let Some(id) = self.di_ids.get(&raw) {
                    di_exprs.push(*id);
                }
            }
        }

        self.module.add_global(GlobalVariable {
            name,
            value_type,
            di_exprs,
        });
    }

    fn parse_function_header(&mut self, line: &str, is_decl: bool) -> FuncId {
        let keyword = if is_decl { "declare" } else { "define" };
        let rest = line.strip_prefix(keyword).unwrap().trim();

        // skip attribute-ish words until the return type parses
        let mut rest = rest;
        loop {
            let word = rest.split_whitespace().next().unwrap();
            if matches!(
                word,
                "dso_local" | "internal" | "external" | "private" | "hidden" | "noundef"
                    | "zeroext" | "signext" | "fastcc" | "weak" | "linkonce" | "linkonce_odr"
            ) {
                rest = rest[word.len()..].trim_start();
            } else {
                break;
            }
        }

        let (ret, rest) = self.parse_type(rest);
        let rest = rest.trim_start();
        let at = rest.strip_prefix('@').expect("expected function name");
        let paren = at.find('(').expect("expected parameter list");
        let name = at[..paren].to_owned();
        let (params, after) = take_group(&at[paren..], '(', ')');

        let mut args = vec![];
        for (i, p) in split_top_level(params, ',').into_iter().enumerate() {
            let p = p.trim();
            if p.is_empty() || p == "..." {
                continue;
            }
            // metadata-typed parameters (debug intrinsics) have no value
            // type of their own
            if p == "metadata" || p.starts_with("metadata ") {
                args.push(Argument {
                    name: i.to_string(),
                    ty: Type::Ptr,
                });
                continue;
            }
            let (ty, rest) = self.parse_type(p);
            let arg_name = rest
                .split_whitespace()
                .rev()
                .find(|t| t.starts_with('%'))
                .map(|t| t[1..].to_owned())
                .unwrap_or_else(|| i.to_string());
            args.push(Argument { name: arg_name, ty });
        }

        // a trailing `!dbg !N` names the subprogram
        let subprogram = after.find("!dbg !").and_then(|pos| {
            let raw: u64 = after[pos + "!dbg !".len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .ok()?;
            self.di_ids.get(&raw).copied()
        });

        self.module.add_function(Function {
            name,
            ret,
            args,
            is_decl,
            subprogram,
            blocks: vec![],
        })
    }

    fn parse_function_body(&mut self, f: FuncId, body: &[&str]) {
        // pre-scan result names so uses can precede definitions (phis)
        let mut symtab: UnorderedMap<String, ValueRef> = UnorderedMap::new();
        for (i, arg) in self.module.function(f).args.iter().enumerate() {
            symtab.insert(arg.name.clone(), ValueRef::Arg(f, i));
        }
        let mut next = self.module.insts.len();
        for line in body {
            if is_label(line) {
                continue;
            }
            if let Some((lhs, _)) = line.split_once('=') {
                let lhs = lhs.trim();
                if let Some(name) = lhs.strip_prefix('%') {
                    symtab.insert(name.to_owned(), ValueRef::Inst(InstId(next)));
                }
            }
            next += 1;
        }

        let mut block = usize::MAX;
        for line in body {
            if let Some(label) = as_label(line) {
                self.module.functions[f.0].blocks.push(Block {
                    label: label.to_owned(),
                    insts: vec![],
                });
                block = self.module.functions[f.0].blocks.len() - 1;
                continue;
            }
            if block == usize::MAX {
                self.module.functions[f.0].blocks.push(Block {
                    label: "entry".to_owned(),
                    insts: vec![],
                });
                block = 0;
            }
            let inst = self.parse_inst(f, &symtab, line);
            self.module.push_inst(block, inst);
        }
    }

    // ---------------
    // instructions
    // ---------------

    fn parse_inst(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        line: &str,
    ) -> Instruction {
        let (name, rest) = match line.split_once('=') {
            Some((lhs, rhs)) if lhs.trim().starts_with('%') => (
                Some(lhs.trim().strip_prefix('%').unwrap().to_owned()),
                rhs.trim(),
            ),
            _ => (None, line),
        };

        // peel trailing attachments off the operand list
        let segments = split_top_level(rest, ',');
        let mut tbaa = None;
        let mut has_dbg = false;
        let mut operands: Vec<&str> = vec![];
        for seg in segments {
            let seg = seg.trim();
            if seg.starts_with("!dbg ") {
                has_dbg = true;
            } else if let Some(md) = seg.strip_prefix("!tbaa ") {
                let raw = md.trim().strip_prefix('!').unwrap().parse().unwrap();
                tbaa = Some(self.tbaa_tag(raw));
            } else if seg.starts_with('!') || seg.starts_with("align ") {
                // other attachments carry nothing we use
            } else {
                operands.push(seg);
            }
        }

        let kind = self.parse_inst_kind(f, symtab, &operands);
        Instruction {
            name,
            func: f,
            kind,
            tbaa,
            has_dbg,
        }
    }

    fn parse_inst_kind(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        operands: &[&str],
    ) -> InstKind {
        let first = operands[0];
        let (op, rest) = first.split_once(' ').unwrap_or((first, ""));
        let rest = rest.trim();

        match op {
            "alloca" => InstKind::Alloca {
                allocated: self.parse_type(rest).0,
            },
            "load" => {
                let rest = rest.strip_prefix("volatile").unwrap_or(rest).trim();
                let (ty, _) = self.parse_type(rest);
                let (_, ptr) = self.parse_typed_value(f, symtab, operands[1]);
                InstKind::Load { ty, ptr }
            }
            "store" => {
                let rest = rest.strip_prefix("volatile").unwrap_or(rest).trim();
                let (value_ty, value) = self.parse_typed_value(f, symtab, rest);
                let (_, ptr) = self.parse_typed_value(f, symtab, operands[1]);
                InstKind::Store {
                    value,
                    value_ty,
                    ptr,
                }
            }
            "getelementptr" => {
                let rest = rest.trim_start_matches("inbounds").trim();
                let (source_elem, _) = self.parse_type(rest);
                let (_, base) = self.parse_typed_value(f, symtab, operands[1]);
                let indices = operands[2..]
                    .iter()
                    .map(|seg| {
                        let (_, rest) = self.parse_type(seg.trim());
                        let tok = rest.trim();
                        match tok.parse::<i64>() {
                            Ok(n) => GepIndex::Const(n as u64),
                            Err(_) => {
                                GepIndex::Value(self.parse_value(f, symtab, &Type::I64, tok))
                            }
                        }
                    })
                    .collect();
                InstKind::Gep {
                    source_elem,
                    base,
                    indices,
                }
            }
            "tail" | "musttail" | "notail" => {
                // re-dispatch on the `call` that follows
                let mut ops = operands.to_vec();
                ops[0] = rest;
                self.parse_inst_kind(f, symtab, &ops)
            }
            "call" => self.parse_call(f, symtab, rest),
            "phi" => {
                let (ty, rest) = self.parse_type(rest);
                let mut incoming = vec![];
                let mut segs = vec![rest.trim()];
                segs.extend(operands[1..].iter().map(|s| s.trim()));
                for seg in segs {
                    let inner = seg
                        .trim()
                        .strip_prefix('[')
                        .and_then(|s| s.strip_suffix(']'))
                        .unwrap_or_else(|| panic!("malformed phi arm: {:?}", seg));
                    let (value, label) = inner.split_once(',').unwrap();
                    let value = self.parse_value(f, symtab, &ty, value.trim());
                    let label = label.trim().strip_prefix('%').unwrap().to_owned();
                    incoming.push((value, label));
                }
                InstKind::Phi { ty, incoming }
            }
            "select" => {
                let (_, cond) = self.parse_typed_value(f, symtab, rest);
                let (ty, on_true) = self.parse_typed_value(f, symtab, operands[1]);
                let (_, on_false) = self.parse_typed_value(f, symtab, operands[2]);
                InstKind::Select {
                    ty,
                    cond,
                    on_true,
                    on_false,
                }
            }
            "bitcast" | "trunc" | "zext" | "sext" | "ptrtoint" | "inttoptr" | "fptrunc"
            | "fpext" | "sitofp" | "uitofp" | "fptosi" | "fptoui" | "addrspacecast" => {
                let cast_op = match op {
                    "bitcast" => CastOp::Bitcast,
                    "trunc" => CastOp::Trunc,
                    "zext" => CastOp::ZExt,
                    "sext" => CastOp::SExt,
                    "ptrtoint" => CastOp::PtrToInt,
                    "inttoptr" => CastOp::IntToPtr,
                    "fptrunc" => CastOp::FpTrunc,
                    "fpext" => CastOp::FpExt,
                    "sitofp" => CastOp::SiToFp,
                    "uitofp" => CastOp::UiToFp,
                    "fptosi" => CastOp::FpToSi,
                    "fptoui" => CastOp::FpToUi,
                    _ => CastOp::AddrSpaceCast,
                };
                let (src, dest) = rest.split_once(" to ").unwrap();
                let (_, value) = self.parse_typed_value(f, symtab, src.trim());
                let dest = self.parse_type_full(dest.trim());
                InstKind::Cast {
                    op: cast_op,
                    value,
                    dest,
                }
            }
            "icmp" | "fcmp" => {
                let (pred, rest) = rest.split_once(' ').unwrap();
                let (ty, lhs) = self.parse_typed_value(f, symtab, rest.trim());
                let rhs = self.parse_value(f, symtab, &ty, operands[1].trim());
                InstKind::Cmp {
                    fp: op == "fcmp",
                    pred: pred.to_owned(),
                    lhs,
                    rhs,
                }
            }
            "add" | "sub" | "mul" | "udiv" | "sdiv" | "urem" | "srem" | "shl" | "lshr"
            | "ashr" | "and" | "or" | "xor" | "fadd" | "fsub" | "fmul" | "fdiv" | "frem" => {
                let bin_op = match op {
                    "add" => BinaryOp::Add,
                    "sub" => BinaryOp::Sub,
                    "mul" => BinaryOp::Mul,
                    "udiv" => BinaryOp::UDiv,
                    "sdiv" => BinaryOp::SDiv,
                    "urem" => BinaryOp::URem,
                    "srem" => BinaryOp::SRem,
                    "shl" => BinaryOp::Shl,
                    "lshr" => BinaryOp::LShr,
                    "ashr" => BinaryOp::AShr,
                    "and" => BinaryOp::And,
                    "or" => BinaryOp::Or,
                    "xor" => BinaryOp::Xor,
                    "fadd" => BinaryOp::FAdd,
                    "fsub" => BinaryOp::FSub,
                    "fmul" => BinaryOp::FMul,
                    "fdiv" => BinaryOp::FDiv,
                    _ => BinaryOp::FRem,
                };
                let rest = strip_flags(rest);
                let (ty, lhs) = self.parse_typed_value(f, symtab, rest);
                let rhs = self.parse_value(f, symtab, &ty, operands[1].trim());
                InstKind::Binary {
                    op: bin_op,
                    ty,
                    lhs,
                    rhs,
                }
            }
            "ret" => {
                if rest == "void" {
                    InstKind::Ret { value: None }
                } else {
                    let (_, value) = self.parse_typed_value(f, symtab, rest);
                    InstKind::Ret { value: Some(value) }
                }
            }
            "br" => {
                if let Some(dest) = rest.strip_prefix("label ") {
                    InstKind::Br {
                        dest: dest.trim().strip_prefix('%').unwrap().to_owned(),
                    }
                } else {
                    let (_, cond) = self.parse_typed_value(f, symtab, rest);
                    let strip = |s: &str| {
                        s.trim()
                            .strip_prefix("label ")
                            .unwrap()
                            .trim()
                            .strip_prefix('%')
                            .unwrap()
                            .to_owned()
                    };
                    InstKind::CondBr {
                        cond,
                        on_true: strip(operands[1]),
                        on_false: strip(operands[2]),
                    }
                }
            }
            "unreachable" => InstKind::Unreachable,
            other => panic!("unsupported instruction: {:?}", other),
        }
    }

    fn parse_call(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        rest: &str,
    ) -> InstKind {
        // skip call-site attributes until the return type parses
        let mut rest = rest.trim();
        loop {
            let word = rest.split_whitespace().next().unwrap();
            if matches!(word, "noundef" | "zeroext" | "signext" | "fastcc" | "inreg") {
                rest = rest[word.len()..].trim_start();
            } else {
                break;
            }
        }

        let (ret, rest) = self.parse_type(rest);
        // a parenthesised group already consumed by a function-typed callee
        // signature leaves `ret` as Func; unwrap back to the return type
        let ret = match ret {
            Type::Func { ret, .. } => *ret,
            other => other,
        };

        let rest = rest.trim_start();
        let paren = rest.find('(').expect("expected call argument list");
        let callee_tok = rest[..paren].trim();
        let (arg_text, _) = take_group(&rest[paren..], '(', ')');

        let mut args = vec![];
        for seg in split_top_level(arg_text, ',') {
            let seg = seg.trim();
            if seg.is_empty() {
                continue;
            }
            if let Some(md) = seg.strip_prefix("metadata ") {
                args.push(self.parse_metadata_operand(f, symtab, md.trim()));
            } else {
                let (_, v) = self.parse_typed_value(f, symtab, seg);
                args.push(v);
            }
        }

        let callee = if let Some(name) = callee_tok.strip_prefix('@') {
            let fid = match self.module.find_function(name) {
                Some(fid) => fid,
                // calls to undeclared symbols still resolve; the callee is
                // synthesized from the call site
                None => self.module.add_function(Function {
                    name: name.to_owned(),
                    ret: ret.clone(),
                    args: args
                        .iter()
                        .enumerate()
                        .map(|(i, _)| Argument {
                            name: i.to_string(),
                            ty: Type::Ptr,
                        })
                        .collect(),
                    is_decl: true,
                    subprogram: None,
                    blocks: vec![],
                }),
            };
            Callee::Direct(fid)
        } else {
            let name = callee_tok.strip_prefix('%').expect("expected callee");
            Callee::Indirect(
                *symtab
                    .get(name)
                    .unwrap_or_else(|| panic!("unknown callee %{}", name)),
            )
        };

        InstKind::Call { callee, ret, args }
    }

    fn parse_metadata_operand(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        text: &str,
    ) -> ValueRef {
        let md = if let Some(raw) = text.strip_prefix('!') {
            if let Ok(raw) = raw
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse::<u64>()
            {
                match self.di_ids.get(&raw) {
                    Some(id) => MdValue::DiRef(*id),
                    None => MdValue::Expression,
                }
            } else {
                MdValue::Expression
            }
        } else {
            let (_, v) = self.parse_typed_value(f, symtab, text);
            MdValue::Value(v)
        };
        ValueRef::Metadata(self.module.metadata.add_md_value(md))
    }

    /// Parse `<ty> [attrs] <value>`, taking the last token as the value.
    fn parse_typed_value(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        text: &str,
    ) -> (Type, ValueRef) {
        let (ty, rest) = self.parse_type(text.trim());
        let tok = rest
            .split_whitespace()
            .last()
            .unwrap_or_else(|| panic!("missing value in operand {:?}", text));
        let v = self.parse_value(f, symtab, &ty, tok);
        (ty, v)
    }

    fn parse_value(
        &mut self,
        f: FuncId,
        symtab: &UnorderedMap<String, ValueRef>,
        ty: &Type,
        tok: &str,
    ) -> ValueRef {
        if let Some(name) = tok.strip_prefix('%') {
            return *symtab
                .get(name)
                .unwrap_or_else(|| panic!("unknown local %{} in {:?}", name, self.module.function(f).name));
        }
        if let Some(name) = tok.strip_prefix('@') {
            if let Some(g) = self.module.find_global(name) {
                return ValueRef::Global(g);
            }
            if let Some(func) = self.module.find_function(name) {
                return ValueRef::Function(func);
            }
            panic!("unknown global @{}", name);
        }
        let c = match tok {
            "null" => Constant::Null { ty: ty.clone() },
            "undef" | "poison" => Constant::Undef { ty: ty.clone() },
            "zeroinitializer" => Constant::Zero { ty: ty.clone() },
            "true" => Constant::Int {
                ty: Type::I1,
                value: 1,
            },
            "false" => Constant::Int {
                ty: Type::I1,
                value: 0,
            },
            _ => match tok.parse::<i128>() {
                Ok(n) if !matches!(ty, Type::Float | Type::Double) => Constant::Int {
                    ty: ty.clone(),
                    value: n as u64,
                },
                _ => Constant::Float {
                    ty: ty.clone(),
                    repr: tok.to_owned(),
                },
            },
        };
        let id = self.module.intern_const(c);
        ValueRef::Const(id)
    }
}

// ---------------
// lexical helpers
// ---------------

/// Strip a `;` comment, respecting string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_str = !in_str,
            ';' if !in_str => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_label(line: &str) -> bool {
    as_label(line).is_some()
}

fn as_label(line: &str) -> Option<&str> {
    let line = line.trim();
    let head = line.strip_suffix(':')?;
    head.chars()
        .all(|c| c.is_ascii_alphanumeric() || "._-".contains(c))
        .then_some(head)
}

/// `!N = ...` definition lines (named metadata like `!llvm.module.flags` is
/// skipped).
fn parse_md_def_id(line: &str) -> Option<u64> {
    let rest = line.strip_prefix('!')?;
    let (id, _) = rest.split_once('=')?;
    id.trim().parse().ok()
}

fn unquote(s: &str) -> &str {
    s.trim().trim_start_matches('"').trim_end_matches('"')
}

/// Split at `sep` occurring outside parens, braces, brackets, angle
/// brackets, and string literals.
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = vec![];
    let mut depth = 0i32;
    let mut in_str = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_str = !in_str,
            '(' | '[' | '{' | '<' if !in_str => depth += 1,
            ')' | ']' | '}' | '>' if !in_str => depth -= 1,
            c if c == sep && depth == 0 && !in_str => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Take a balanced `open`..`close` group from the front of `s`, returning
/// the interior and the remainder after the closing delimiter.
fn take_group(s: &str, open: char, close: char) -> (&str, &str) {
    assert!(s.starts_with(open));
    let mut depth = 0i32;
    let mut in_str = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_str = !in_str,
            c if c == open && !in_str => depth += 1,
            c if c == close && !in_str => {
                depth -= 1;
                if depth == 0 {
                    return (&s[open.len_utf8()..i], &s[i + close.len_utf8()..]);
                }
            }
            _ => {}
        }
    }
    panic!("unbalanced {:?} group", open)
}

fn strip_flags(s: &str) -> &str {
    let mut s = s.trim_start();
    loop {
        let word = s.split_whitespace().next().unwrap_or("");
        if matches!(word, "nsw" | "nuw" | "exact" | "fast" | "nnan" | "ninf" | "nsz") {
            s = s[word.len()..].trim_start();
        } else {
            return s;
        }
    }
}

fn field<'a>(fields: &'a [(String, RawOp)], key: &str) -> Option<&'a RawOp> {
    fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn field_tok<'a>(fields: &'a [(String, RawOp)], key: &str) -> &'a str {
    match field(fields, key) {
        Some(RawOp::Tok(t)) => t,
        _ => "",
    }
}

/// Parse the body of a `!N = ...` metadata definition.
fn parse_raw_md(body: &str) -> RawMd {
    let body = body.trim().trim_start_matches("distinct").trim_start();
    if let Some(rest) = body.strip_prefix("!{") {
        let inner = rest.strip_suffix('}').expect("unterminated metadata tuple");
        let elems = split_top_level(inner, ',')
            .into_iter()
            .map(|e| parse_raw_op(e.trim()))
            .collect();
        return RawMd::Tuple(elems);
    }

    let rest = body.strip_prefix('!').expect("expected metadata node");
    let paren = rest.find('(').expect("expected metadata node fields");
    let kind = rest[..paren].to_owned();
    let (inner, _) = take_group(&rest[paren..], '(', ')');
    let fields = split_top_level(inner, ',')
        .into_iter()
        .map(|fld| fld.trim())
        .filter(|fld| !fld.is_empty())
        .map(|fld| {
            let (key, value) = fld
                .split_once(':')
                .unwrap_or_else(|| panic!("malformed metadata field {:?}", fld));
            (key.trim().to_owned(), parse_raw_op(value.trim()))
        })
        .collect();
    RawMd::Node { kind, fields }
}

fn parse_raw_op(tok: &str) -> RawOp {
    if tok == "null" {
        return RawOp::Null;
    }
    if let Some(rest) = tok.strip_prefix("!\"") {
        return RawOp::Str(rest.trim_end_matches('"').to_owned());
    }
    if let Some(rest) = tok.strip_prefix('"') {
        return RawOp::Str(rest.trim_end_matches('"').to_owned());
    }
    if tok.starts_with("!DI") || tok.starts_with("!Generic") {
        let kind = tok[1..].split('(').next().unwrap().to_owned();
        return RawOp::Inline(kind);
    }
    if let Some(rest) = tok.strip_prefix('!') {
        if let Ok(r) = rest.parse() {
            return RawOp::Ref(r);
        }
    }
    // `i64 0`-style typed integers
    for prefix in ["i64 ", "i32 ", "i16 ", "i8 ", "i1 "] {
        if let Some(rest) = tok.strip_prefix(prefix) {
            if let Ok(n) = rest.trim().parse() {
                return RawOp::Int(n);
            }
        }
    }
    if let Ok(n) = tok.parse() {
        return RawOp::Int(n);
    }
    RawOp::Tok(tok.to_owned())
}
