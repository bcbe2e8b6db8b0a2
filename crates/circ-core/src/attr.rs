//! `CirAttr`: GCC-style `__attribute__` leaves, and the sorted-unique
//! attribute-set algebra types carry (§3.1, §4.1 `with_attrs`/`remove_attrs`).

use crate::name::CirName;
use std::cmp::Ordering;
use std::sync::Arc;

/// One attribute leaf: a bare name, a name applied to arguments, or a
/// literal used as an argument within a `CirAttr_cons`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    Int(i32),
    Str(Arc<str>),
    Name(CirName),
    Cons(CirName, Arc<[Attr]>),
}

/// Literal leaves sort by their own value, not just their kind, so two
/// distinct int- or string-literal attributes never collapse together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Literal {
    Int(i32),
    Str(Arc<str>),
}

/// The key attributes are ordered and deduplicated by. Literal leaves used
/// only as constructor arguments have no name of their own and sort before
/// any named attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Literal(Literal),
    Named(u32),
}

impl Attr {
    fn sort_key(&self) -> SortKey {
        match self {
            Attr::Int(v) => SortKey::Literal(Literal::Int(*v)),
            Attr::Str(s) => SortKey::Literal(Literal::Str(s.clone())),
            Attr::Name(n) => SortKey::Named(name_raw(*n)),
            Attr::Cons(n, _) => SortKey::Named(name_raw(*n)),
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Attr::Int(_))
    }
    pub fn is_str(&self) -> bool {
        matches!(self, Attr::Str(_))
    }
    pub fn is_name(&self) -> bool {
        matches!(self, Attr::Name(_))
    }
    pub fn is_cons(&self) -> bool {
        matches!(self, Attr::Cons(..))
    }

    pub fn name(&self) -> Option<CirName> {
        match self {
            Attr::Name(n) => Some(*n),
            Attr::Cons(n, _) => Some(*n),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Attr] {
        match self {
            Attr::Cons(_, args) => args,
            _ => &[],
        }
    }
}

fn name_raw(n: CirName) -> u32 {
    n.raw_for_attr_sort()
}

/// A sorted, duplicate-free set of attributes, as carried by every `Type`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttrSet(Arc<[Attr]>);

impl AttrSet {
    pub fn empty() -> Self {
        AttrSet(Arc::from(Vec::new()))
    }

    pub fn from_slice(attrs: &[Attr]) -> Self {
        let mut v: Vec<Attr> = attrs.to_vec();
        v.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        v.dedup_by(|a, b| a.sort_key() == b.sort_key());
        AttrSet(Arc::from(v))
    }

    pub fn as_slice(&self) -> &[Attr] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace any existing attribute with the same name; attributes in
    /// `new` not present in `self` are added. Result stays sorted/deduped.
    pub fn with_attrs(&self, new: &[Attr]) -> AttrSet {
        let mut merged: Vec<Attr> = self
            .0
            .iter()
            .filter(|a| !new.iter().any(|b| a.sort_key() == b.sort_key()))
            .cloned()
            .collect();
        merged.extend(new.iter().cloned());
        AttrSet::from_slice(&merged)
    }

    /// Replace wholesale: result is exactly `new`, normalized.
    pub fn replace_attrs(new: &[Attr]) -> AttrSet {
        AttrSet::from_slice(new)
    }

    /// Remove every attribute whose key matches one in `remove`.
    pub fn remove_attrs(&self, remove: &[Attr]) -> AttrSet {
        let kept: Vec<Attr> = self
            .0
            .iter()
            .filter(|a| !remove.iter().any(|b| a.sort_key() == b.sort_key()))
            .cloned()
            .collect();
        AttrSet(Arc::from(kept))
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.sort_key().cmp(&other.sort_key()))
    }
}
impl Ord for Attr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::NameTable;

    #[test]
    fn with_attrs_is_noop_on_empty() {
        let set = AttrSet::empty();
        assert_eq!(set.with_attrs(&[]), set);
    }

    #[test]
    fn distinct_literal_attrs_are_not_deduped() {
        let set = AttrSet::from_slice(&[Attr::Int(1), Attr::Int(2), Attr::Int(1)]);
        assert_eq!(set.len(), 2);
        let set = AttrSet::from_slice(&[Attr::Str(Arc::from("a")), Attr::Str(Arc::from("b"))]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn remove_attrs_undoes_disjoint_with_attrs() {
        let mut names = NameTable::new();
        let n = names.intern("packed");
        let base = AttrSet::from_slice(&[Attr::Int(1)]);
        let added = base.with_attrs(&[Attr::Name(n)]);
        assert_eq!(added.remove_attrs(&[Attr::Name(n)]), base);
    }
}
