//! The candidate-type set stored per value.
//!
//! Type names live in a small closed string grammar (`i32`, `%struct.S*`,
//! `ptr`, ...). String equality is the intended semantics, so the set is kept
//! as plain strings; ordering makes dumps deterministic.

use std::collections::BTreeSet;

/// An unordered set of candidate type names for one value.
///
/// Two invariants hold at every point:
/// - the pure-opaque token `ptr` never coexists with a more specific name;
/// - a set is "opaque" exactly when it is `{ptr}`.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct TypeSet {
    types: BTreeSet<String>,
    is_func: bool,
}

/// Bit width of an integer spelling, 0 when it is not one.
pub fn integer_size(ty: &str) -> u32 {
    match ty {
        "i1" => 1,
        "i8" => 8,
        "i16" => 16,
        "i32" | "int" => 32,
        "i64" => 64,
        "i128" => 128,
        _ => 0,
    }
}

impl TypeSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        let mut s = Self::new();
        s.insert(name);
        s
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.types.insert(name.into());
        self.erase_ptr();
    }

    pub fn insert_set(&mut self, other: &TypeSet) {
        for t in &other.types {
            self.types.insert(t.clone());
        }
        self.erase_ptr();
    }

    pub fn erase(&mut self, name: &str) {
        self.types.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|s| s.as_str())
    }

    pub fn has_ptr(&self) -> bool {
        self.types.contains("ptr")
    }

    /// The set knows nothing beyond "this is an address".
    pub fn is_opaque(&self) -> bool {
        self.types.len() == 1 && self.has_ptr()
    }

    /// The set is exactly the generic pointer `{void*}`.
    pub fn is_generic_ptr(&self) -> bool {
        self.types.len() == 1 && self.types.contains("void*")
    }

    /// Marks a function-return-type set, letting consumers tell signatures
    /// apart from ordinary values.
    pub fn mark_func(&mut self) {
        self.is_func = true;
    }

    pub fn is_func(&self) -> bool {
        self.is_func
    }

    // `ptr` is dropped the moment any more specific name is present
    fn erase_ptr(&mut self) {
        if self.types.len() > 1 && self.has_ptr() {
            self.types.remove("ptr");
        }
    }

    /// Flow equality: the two sets share at least one member.
    pub fn intersects(&self, other: &TypeSet) -> bool {
        self.types.iter().any(|t| other.types.contains(t))
    }

    /// Equality after stripping trailing `*`s from every member.
    pub fn base_equals(&self, other: &TypeSet) -> bool {
        let strip = |s: &BTreeSet<String>| -> BTreeSet<String> {
            s.iter()
                .map(|t| t.trim_end_matches('*').to_owned())
                .collect()
        };
        strip(&self.types) == strip(&other.types)
    }

    pub fn is_struct_ty(&self) -> bool {
        self.types.iter().any(|t| t.contains("struct"))
    }

    pub fn is_integer_ty(&self) -> bool {
        self.types
            .iter()
            .any(|t| integer_size(t) != 0 || t.contains("int"))
    }

    pub fn is_pointer_ty(&self) -> bool {
        self.types.iter().any(|t| t == "ptr" || t.contains('*'))
    }

    /// Both sets name the same struct.
    pub fn equal_by_struct(&self, other: &TypeSet) -> bool {
        if !self.is_struct_ty() || !other.is_struct_ty() {
            return false;
        }
        self.types
            .iter()
            .filter(|t| t.contains("struct"))
            .any(|t| other.types.contains(t.as_str()))
    }

    /// Both sets contain integers of the same bit width.
    pub fn equal_by_integer(&self, other: &TypeSet) -> bool {
        if !self.is_integer_ty() || !other.is_integer_ty() {
            return false;
        }
        self.types.iter().any(|a| {
            let wa = integer_size(a);
            wa != 0 && other.types.iter().any(|b| integer_size(b) == wa)
        })
    }

    /// Both sets contain some pointer.
    pub fn equal_by_pointer(&self, other: &TypeSet) -> bool {
        self.is_pointer_ty() && other.is_pointer_ty()
    }
}

impl std::fmt::Display for TypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut first = true;
        for t in &self.types {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for TypeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut s = TypeSet::new();
        for t in iter {
            s.insert(t);
        }
        s
    }
}
