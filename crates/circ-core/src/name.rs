//! `CirName` interning: identifiers are deduplicated into small symbols so
//! name comparisons in the environment and attribute lists are `u32` equality
//! rather than string comparison.

use rustc_hash::FxHashMap;

/// An interned identifier. `CirName_equals(a, b)` in the original API is
/// just `a == b` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CirName(u32);

impl CirName {
    /// Internal-only accessor so attribute sets can sort by name identity
    /// without exposing the interner index as part of the public API.
    pub(crate) fn raw_for_attr_sort(self) -> u32 {
        self.0
    }

    /// A placeholder name used for arena dummy slots; never produced by
    /// [`NameTable::intern`] for the "none" handle's backing object, since
    /// those are never looked up by name.
    pub const fn dummy() -> Self {
        CirName(u32::MAX)
    }
}

impl Default for CirName {
    fn default() -> Self {
        CirName::dummy()
    }
}

/// Global-lifetime name interner, mirroring `CirName_of`/`CirName_cstr`.
#[derive(Default)]
pub struct NameTable {
    map: FxHashMap<String, CirName>,
    strings: Vec<String>,
}

impl NameTable {
    pub fn new() -> Self {
        NameTable::default()
    }

    /// Intern `s`, returning its (possibly pre-existing) name.
    pub fn intern(&mut self, s: &str) -> CirName {
        if let Some(&name) = self.map.get(s) {
            return name;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_owned());
        let name = CirName(idx);
        self.map.insert(s.to_owned(), name);
        name
    }

    /// Resolve a name back to its string.
    pub fn resolve(&self, name: CirName) -> &str {
        &self.strings[name.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups() {
        let mut t = NameTable::new();
        let a = t.intern("foo");
        let b = t.intern("foo");
        let c = t.intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.resolve(a), "foo");
        assert_eq!(t.resolve(c), "bar");
    }
}
