//! `CirComp`: struct/union tag objects (§3.2) and GCC-flavored field layout
//! (§4.1 "Composite layout").

use crate::arena::Handle;
use crate::machine::Machine;
use crate::name::CirName;
use crate::types::Type;
use rustc_hash::FxHashSet;

/// One field of a composite: name, type, and an optional bitfield width.
#[derive(Clone)]
pub struct Field {
    pub name: CirName,
    pub ty: Type,
    pub bitwidth: Option<u32>,
}

/// A struct or union tag. Mutable: forward-declared comps start
/// `is_defined = false` and get their fields filled in later, in place, so
/// every `Handle<Comp>` taken before the definition stays valid (§3.2,
/// §4.4 "Tags are managed separately").
pub struct Comp {
    pub name: Option<CirName>,
    pub is_struct: bool,
    pub is_defined: bool,
    pub fields: Vec<Field>,
}

impl Comp {
    pub fn dummy() -> Self {
        Comp { name: None, is_struct: true, is_defined: false, fields: Vec::new() }
    }

    pub fn new(is_struct: bool) -> Self {
        Comp { name: None, is_struct, is_defined: false, fields: Vec::new() }
    }

    pub fn field_index(&self, name: CirName) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// One packing-unit cursor tracked while laying out a struct's bitfields,
/// per §4.1: `(first_free_bit, last_field_start, last_field_width)`.
struct LayoutCursor {
    first_free_bit: u64,
    last_field_start: u64,
    last_field_width: u64,
}

fn align_up(x: u64, align: u64) -> u64 {
    if align == 0 { x } else { (x + align - 1) / align * align }
}

/// Computed layout of every field in a comp, in declaration order.
pub struct CompLayout {
    pub field_bit_offsets: Vec<u64>,
    pub size_bytes: u64,
    pub align_bytes: u64,
}

/// Lay out `comp`'s fields GCC-style. Struct fields are packed in
/// declaration order; unions overlay every field at offset 0 and take the
/// max size/alignment.
pub fn layout(comp: &Comp, machine: &Machine) -> CompLayout {
    if !comp.is_struct {
        return layout_union(comp, machine);
    }

    let mut cursor = LayoutCursor { first_free_bit: 0, last_field_start: 0, last_field_width: 0 };
    let mut offsets = Vec::with_capacity(comp.fields.len());
    let mut struct_align_bits: u64 = 8; // at least byte-aligned

    for field in &comp.fields {
        let field_align_bytes = crate::types::alignof(&field.ty, machine);
        let field_align_bits = field_align_bytes * 8;
        let field_size_bits = crate::types::sizeof(&field.ty, machine) * 8;

        match field.bitwidth {
            None => {
                let start = align_up(cursor.first_free_bit, field_align_bits);
                offsets.push(start);
                cursor.first_free_bit = start + field_size_bits;
                cursor.last_field_start = start;
                cursor.last_field_width = field_size_bits;
                struct_align_bits = struct_align_bits.max(field_align_bits);
            }
            Some(0) => {
                // Zero-width bitfield: aligns up and ends the current
                // packing unit, but does not itself occupy space or
                // contribute to struct alignment.
                cursor.first_free_bit = align_up(cursor.first_free_bit, field_align_bits);
                offsets.push(cursor.first_free_bit);
                cursor.last_field_start = cursor.first_free_bit;
                cursor.last_field_width = 0;
            }
            Some(k) => {
                let k = k as u64;
                let unit_bits = field_size_bits; // sizeof(type)/align(type) span, in bits
                let in_place_end = cursor.last_field_start + unit_bits.max(1);
                let fits_in_place = cursor.last_field_width > 0
                    && cursor.first_free_bit + k <= in_place_end
                    && cursor.first_free_bit / unit_bits.max(1) == cursor.last_field_start / unit_bits.max(1);
                let start = if fits_in_place {
                    cursor.first_free_bit
                } else {
                    align_up(cursor.first_free_bit, field_align_bits)
                };
                offsets.push(start);
                cursor.first_free_bit = start + k;
                cursor.last_field_start = align_up(start, field_align_bits).min(start);
                cursor.last_field_start = if fits_in_place { cursor.last_field_start } else { start };
                cursor.last_field_width = k;
                struct_align_bits = struct_align_bits.max(field_align_bits);
            }
        }
    }

    let struct_align = struct_align_bits / 8;
    let size_bytes = align_up(cursor.first_free_bit, struct_align_bits) / 8;
    CompLayout { field_bit_offsets: offsets, size_bytes, align_bytes: struct_align.max(1) }
}

fn layout_union(comp: &Comp, machine: &Machine) -> CompLayout {
    let mut max_size = 0u64;
    let mut max_align = 1u64;
    let offsets = vec![0u64; comp.fields.len()];
    for field in &comp.fields {
        let size_bits = match field.bitwidth {
            Some(k) => k as u64,
            None => crate::types::sizeof(&field.ty, machine) * 8,
        };
        let align_bytes = crate::types::alignof(&field.ty, machine);
        max_size = max_size.max(size_bits);
        max_align = max_align.max(align_bytes);
    }
    let size_bytes = align_up(max_size, max_align * 8) / 8;
    CompLayout { field_bit_offsets: offsets, size_bytes, align_bytes: max_align }
}

/// Pair-isomorphism set for recursive comp equality under `combine` (§3.2,
/// open question #3): tracks `a <= b` assumptions made while descending into
/// a pair of mutually-recursive comps, so cycles terminate instead of
/// looping forever. Grown freely with a `HashSet` rather than the original's
/// fixed-capacity linear-probed table; externally visible semantics are
/// unchanged.
#[derive(Default)]
pub struct IsoTable {
    pairs: FxHashSet<(Handle<Comp>, Handle<Comp>)>,
}

impl IsoTable {
    pub fn new() -> Self {
        IsoTable::default()
    }

    pub fn is_isomorphic(&self, a: Handle<Comp>, b: Handle<Comp>) -> bool {
        self.pairs.contains(&(a, b)) || self.pairs.contains(&(b, a))
    }

    pub fn mark_isomorphic(&mut self, a: Handle<Comp>, b: Handle<Comp>) {
        self.pairs.insert((a, b));
    }

    pub fn unmark_isomorphic(&mut self, a: Handle<Comp>, b: Handle<Comp>) {
        self.pairs.remove(&(a, b));
        self.pairs.remove(&(b, a));
    }
}

/// Deep structural equality of two comps under `combine`, breaking cycles
/// through mutually-recursive fields via the isomorphism table: a pair
/// already assumed equal (because we're in the middle of comparing it one
/// level up) short-circuits to `true` instead of recursing forever (§3.2).
pub fn structurally_equal(
    a: Handle<Comp>,
    b: Handle<Comp>,
    env: &dyn crate::types::TypeEnv,
    iso: &mut IsoTable,
) -> bool {
    if a == b {
        return true;
    }
    if iso.is_isomorphic(a, b) {
        return true;
    }
    iso.mark_isomorphic(a, b);
    let ca = env.comp(a);
    let cb = env.comp(b);
    let ok = ca.is_struct == cb.is_struct
        && ca.is_defined == cb.is_defined
        && ca.fields.len() == cb.fields.len()
        && ca
            .fields
            .iter()
            .zip(cb.fields.iter())
            .all(|(fa, fb)| {
                fa.name == fb.name
                    && fa.bitwidth == fb.bitwidth
                    && types_structurally_equal(&fa.ty, &fb.ty, env, iso)
            });
    if !ok {
        iso.unmark_isomorphic(a, b);
    }
    ok
}

fn types_structurally_equal(
    a: &crate::types::Type,
    b: &crate::types::Type,
    env: &dyn crate::types::TypeEnv,
    iso: &mut IsoTable,
) -> bool {
    use crate::types::TypeKind;
    match (a.kind(), b.kind()) {
        (TypeKind::Comp(ca), TypeKind::Comp(cb)) => structurally_equal(*ca, *cb, env, iso),
        (TypeKind::Ptr(pa), TypeKind::Ptr(pb)) => types_structurally_equal(pa, pb, env, iso),
        (TypeKind::Array(ba, la), TypeKind::Array(bb, lb)) => {
            la == lb && types_structurally_equal(ba, bb, env, iso)
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Machine;
    use crate::name::NameTable;
    use crate::types::Type;

    #[test]
    fn struct_size_is_multiple_of_align() {
        let mut names = NameTable::new();
        let m = Machine::build();
        let mut comp = Comp::new(true);
        comp.fields.push(Field { name: names.intern("next"), ty: Type::ptr(Type::void()), bitwidth: None });
        comp.fields.push(Field { name: names.intern("v"), ty: Type::int(crate::machine::IKind::Int), bitwidth: None });
        let l = layout(&comp, &m);
        assert_eq!(l.size_bytes % l.align_bytes, 0);
        // ptr (8, align 8) then int (4, align 4) -> offset 0, offset 64 bits
        assert_eq!(l.field_bit_offsets[0], 0);
        assert_eq!(l.field_bit_offsets[1], 64);
        assert_eq!(l.size_bytes, 16); // padded to align 8
    }

    #[test]
    fn iso_table_round_trips() {
        let mut t = IsoTable::new();
        let a: Handle<Comp> = Handle::from_raw(1);
        let b: Handle<Comp> = Handle::from_raw(2);
        assert!(!t.is_isomorphic(a, b));
        t.mark_isomorphic(a, b);
        assert!(t.is_isomorphic(a, b));
        assert!(t.is_isomorphic(b, a));
        t.unmark_isomorphic(a, b);
        assert!(!t.is_isomorphic(a, b));
    }
}
