//! Rendering IR types into the type-name grammar, and canonicalising DI
//! spellings into IR spellings.
//!
//! This is the only module where IR printing leaks into the string domain;
//! everything downstream works on names alone.

use crate::ir::{Module, Type};
use crate::type_set::TypeSet;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // clang appends `.N` to identified structs whose names clash across
    // translation units
    static ref STRUCT_SUFFIX: Regex =
        Regex::new(r"(%(?:struct|union)\.[a-zA-Z_]\w*)\.\d+(\**)$").unwrap();
}

/// The canonical name of an IR type. Arrays and vectors are flattened to
/// their element name with one `*` per dimension; identified structs print as
/// the bare `%struct.X` head with any numeric disambiguator stripped.
pub fn type_name(module: &Module, ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_owned(),
        Type::I1 => "i1".to_owned(),
        Type::I8 => "i8".to_owned(),
        Type::I16 => "i16".to_owned(),
        Type::I32 => "i32".to_owned(),
        Type::I64 => "i64".to_owned(),
        Type::I128 => "i128".to_owned(),
        Type::Float => "float".to_owned(),
        Type::Double => "double".to_owned(),
        Type::Ptr => "ptr".to_owned(),
        Type::Pointer(inner) => format!("{}*", type_name(module, inner)),
        Type::Struct(id) => trim_struct_suffix(&format!("%{}", module.struct_def(*id).name)),
        Type::Array(..) | Type::Vector(..) => {
            let mut dims = 0usize;
            let mut elem = ty;
            while let Type::Array(inner, _) | Type::Vector(inner, _) = elem {
                dims += 1;
                elem = inner;
            }
            let name = type_name(module, elem);
            if is_opaque_name(&name) {
                name
            } else {
                format!("{}{}", name, "*".repeat(dims))
            }
        }
        Type::Func { ret, params } => {
            let params = params
                .iter()
                .map(|p| type_name(module, p))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} ({})", type_name(module, ret), params)
        }
    }
}

/// Whether a name is the bare opaque token.
pub fn is_opaque_name(name: &str) -> bool {
    name == "ptr"
}

/// The name of a pointer to `name`. Referencing the opaque token stays
/// opaque: `ptr` already means "some address".
pub fn reference_name(name: &str) -> String {
    if is_opaque_name(name) {
        name.to_owned()
    } else {
        format!("{}*", name)
    }
}

/// A name may flow through a constraint iff it actually says something.
pub fn can_flow_name(name: &str) -> bool {
    !name.is_empty() && !is_opaque_name(name)
}

/// A set may flow iff it is non-empty and not purely opaque or generic.
pub fn can_flow(set: &TypeSet) -> bool {
    !set.is_empty() && !set.is_opaque() && !set.is_generic_ptr()
}

/// Strip the `.N` disambiguator from an identified struct name, preserving
/// pointer suffixes: `%struct.foo.123*` becomes `%struct.foo*`.
pub fn trim_struct_suffix(name: &str) -> String {
    STRUCT_SUFFIX.replace(name, "$1$2").into_owned()
}

/// Canonicalise a DI spelling into the IR spelling: scalar spellings map via
/// a fixed table, `struct X` becomes `%struct.X`, enums become their
/// underlying `i32`, and any pointer suffix is preserved.
pub fn di_to_ir(di_type: &str) -> String {
    let stripped = di_type.trim_end_matches('*');
    let ptr_level = di_type.len() - stripped.len();

    let base = match stripped {
        "bool" => "i1".to_owned(),
        "char" | "signed char" | "unsigned char" => "i8".to_owned(),
        "short" | "unsigned short" => "i16".to_owned(),
        "int" | "unsigned int" => "i32".to_owned(),
        "long" | "long long" | "unsigned long" | "unsigned long long" => "i64".to_owned(),
        other => {
            if let Some(rest) = other.strip_prefix("struct ") {
                format!("%struct.{}", rest)
            } else if let Some(rest) = other.strip_prefix("union ") {
                format!("%union.{}", rest)
            } else if other.starts_with("enum ") {
                "i32".to_owned()
            } else {
                other.to_owned()
            }
        }
    };

    format!("{}{}", base, "*".repeat(ptr_level))
}
