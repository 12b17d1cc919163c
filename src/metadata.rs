//! Structural view of the auxiliary metadata attached to a module: DWARF-style
//! debug info (DI) nodes and TBAA access tags.
//!
//! The engine never sees raw metadata tuples; the lifter resolves them into
//! the arenas here. DI type rendering follows the source-level spellings
//! (`int`, `struct S`, `char*`), which [`crate::type_names::di_to_ir`] later
//! canonicalises into the IR spelling.

use crate::containers::unordered::UnorderedMap;
use crate::ir::{Module, StructId, ValueRef};
use crate::log::*;

/// Index of a DI node in [`Metadata::di_nodes`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct DiNodeId(pub usize);

/// Index of a metadata-position operand in [`Metadata::md_values`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MdValueId(pub usize);

/// Index of a TBAA type descriptor in [`Metadata::tbaa_types`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TbaaTypeId(pub usize);

/// Index of a TBAA access tag in [`Metadata::tbaa_tags`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TbaaTagId(pub usize);

/// A debug-info node, discriminated by its DWARF tag.
#[derive(Clone, Debug)]
pub enum DiNode {
    BaseType {
        name: String,
    },
    EnumerationType {
        name: String,
    },
    PointerType {
        base: Option<DiNodeId>,
    },
    StructureType {
        name: String,
        /// Member entries, in field order.
        elements: Vec<DiNodeId>,
    },
    UnionType {
        name: String,
    },
    ArrayType {
        base: Option<DiNodeId>,
        /// Number of subrange entries (one per array dimension).
        dims: usize,
    },
    Typedef {
        name: String,
        base: Option<DiNodeId>,
    },
    /// `const`, `volatile` and `restrict` wrappers; transparent for naming.
    Qualified {
        base: Option<DiNodeId>,
    },
    SubroutineType {
        /// Return type first, then parameter types; `None` marks the
        /// variadic hole.
        types: Vec<Option<DiNodeId>>,
    },
    /// A struct member entry; `base` is the field's type.
    Member {
        base: Option<DiNodeId>,
    },
    LocalVariable {
        name: String,
        ty: Option<DiNodeId>,
    },
    GlobalVariable {
        name: String,
        ty: Option<DiNodeId>,
    },
    GlobalVariableExpression {
        var: Option<DiNodeId>,
    },
    Subprogram {
        /// The subroutine type carrying the signature.
        ty: Option<DiNodeId>,
    },
    /// One array dimension of a composite array type.
    Subrange,
    /// A known node kind that carries no type information (locations, files,
    /// compile units, expressions, ...).
    Other {
        kind: String,
    },
    /// A tag the decoder does not know. Logged at naming time and
    /// contributes nothing.
    Unknown {
        tag: String,
    },
}

/// A value appearing in metadata position, e.g. the operands of
/// `llvm.dbg.declare`.
#[derive(Clone, Copy, Debug)]
pub enum MdValue {
    /// `metadata <ty> <value>`
    Value(ValueRef),
    /// `metadata !N` resolving to a DI node
    DiRef(DiNodeId),
    /// `metadata !DIExpression(...)`
    Expression,
}

/// A TBAA type descriptor (`!{!"name", !parent, i64 0}`).
#[derive(Clone, Debug)]
pub struct TbaaTypeDesc {
    pub name: String,
}

/// A TBAA access tag attached to a memory instruction
/// (`!{!base, !access, i64 offset}`).
#[derive(Clone, Debug)]
pub struct TbaaTag {
    pub base: TbaaTypeId,
    pub access: TbaaTypeId,
}

#[derive(Default)]
pub struct Metadata {
    pub di_nodes: Vec<DiNode>,
    pub md_values: Vec<MdValue>,
    pub tbaa_types: Vec<TbaaTypeDesc>,
    pub tbaa_tags: Vec<TbaaTag>,
}

impl Metadata {
    pub fn di_node(&self, id: DiNodeId) -> &DiNode {
        &self.di_nodes[id.0]
    }

    pub fn md_value(&self, id: MdValueId) -> &MdValue {
        &self.md_values[id.0]
    }

    pub fn add_di_node(&mut self, node: DiNode) -> DiNodeId {
        let id = DiNodeId(self.di_nodes.len());
        self.di_nodes.push(node);
        id
    }

    pub fn add_md_value(&mut self, value: MdValue) -> MdValueId {
        let id = MdValueId(self.md_values.len());
        self.md_values.push(value);
        id
    }

    pub fn add_tbaa_type(&mut self, desc: TbaaTypeDesc) -> TbaaTypeId {
        let id = TbaaTypeId(self.tbaa_types.len());
        self.tbaa_types.push(desc);
        id
    }

    pub fn add_tbaa_tag(&mut self, tag: TbaaTag) -> TbaaTagId {
        let id = TbaaTagId(self.tbaa_tags.len());
        self.tbaa_tags.push(tag);
        id
    }

    /// The base-type name of a TBAA access tag.
    pub fn tbaa_base_name(&self, tag: TbaaTagId) -> &str {
        &self.tbaa_types[self.tbaa_tags[tag.0].base.0].name
    }

    /// Render a DI type to its source-level spelling. A missing node is
    /// `void` (DWARF encodes `void` as absence).
    pub fn di_type_name(&self, node: Option<DiNodeId>, resolve_typedefs: bool) -> String {
        let node = match node {
            Some(id) => self.di_node(id),
            None => return "void".to_owned(),
        };
        match node {
            DiNode::BaseType { name } => {
                if name == "_Bool" {
                    "bool".to_owned()
                } else {
                    name.clone()
                }
            }
            DiNode::EnumerationType { name } => format!("enum {}", name),
            DiNode::ArrayType { base, dims } => {
                let basename = self.di_type_name(*base, resolve_typedefs);
                // one `*` per array dimension
                format!("{}{}", basename, "*".repeat(*dims))
            }
            DiNode::PointerType { base } => {
                format!("{}*", self.di_type_name(*base, resolve_typedefs))
            }
            DiNode::StructureType { name, .. } => format!("struct {}", name),
            DiNode::UnionType { name } => format!("union {}", name),
            DiNode::Typedef { name, base } => {
                if resolve_typedefs && base.is_some() {
                    let resolved = self.di_type_name(*base, resolve_typedefs);
                    if resolved.is_empty() {
                        name.clone()
                    } else {
                        resolved
                    }
                } else {
                    name.clone()
                }
            }
            DiNode::Qualified { base } => self.di_type_name(*base, resolve_typedefs),
            // subroutine types carry no name of their own
            DiNode::SubroutineType { .. } => String::new(),
            DiNode::Member { base } => self.di_type_name(*base, resolve_typedefs),
            DiNode::Unknown { tag } => {
                warn!("unhandled DI tag"; "tag" => %tag);
                String::new()
            }
            DiNode::LocalVariable { .. }
            | DiNode::GlobalVariable { .. }
            | DiNode::GlobalVariableExpression { .. }
            | DiNode::Subprogram { .. }
            | DiNode::Subrange
            | DiNode::Other { .. } => String::new(),
        }
    }
}

/// Map every identified struct type of the module to its DI composite,
/// resolving `typedef` indirection. Composites with an empty element list are
/// skipped (forward declarations carry no field info). The map outlives
/// seeding: the field-access rule consults it whenever the IR's own field
/// type is opaque.
pub fn build_struct_di_map(module: &Module) -> UnorderedMap<StructId, DiNodeId> {
    let mut map = UnorderedMap::new();
    for (idx, sdef) in module.structs.iter().enumerate() {
        let struct_name = sdef
            .name
            .strip_prefix("struct.")
            .unwrap_or(&sdef.name)
            .to_owned();
        // strip the numeric disambiguator clang appends to clashing names
        let struct_name = match struct_name.rfind('.') {
            Some(dot) if struct_name[dot + 1..].chars().all(|c| c.is_ascii_digit()) => {
                struct_name[..dot].to_owned()
            }
            _ => struct_name,
        };

        for (di_idx, node) in module.metadata.di_nodes.iter().enumerate() {
            match node {
                DiNode::Typedef { name, base } if *name == struct_name => {
                    if let Some(base) = base {
                        map.insert(StructId(idx), *base);
                    }
                    break;
                }
                DiNode::StructureType { name, elements } if *name == struct_name => {
                    if elements.is_empty() {
                        continue;
                    }
                    map.insert(StructId(idx), DiNodeId(di_idx));
                    break;
                }
                _ => {}
            }
        }
    }
    map
}

/// The DI-recovered type of field `index` of `struct_id`, already
/// canonicalised to IR spelling. Empty when the mapping or the field is
/// unknown.
pub fn di_struct_field(
    module: &Module,
    struct_di: &UnorderedMap<StructId, DiNodeId>,
    struct_id: StructId,
    index: usize,
    resolve_typedefs: bool,
) -> String {
    let Some(di_id) = struct_di.get(&struct_id) else {
        return String::new();
    };
    let DiNode::StructureType { elements, .. } = module.metadata.di_node(*di_id) else {
        return String::new();
    };
    let Some(member) = elements.get(index) else {
        return String::new();
    };
    let DiNode::Member { base } = module.metadata.di_node(*member) else {
        return String::new();
    };
    let name = module.metadata.di_type_name(*base, resolve_typedefs);
    crate::type_names::di_to_ir(&name)
}
