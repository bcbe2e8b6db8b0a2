//! The type algebra (§3.1, §4.1): immutable structurally-interned types,
//! attribute-set operations, unrolling, conversions, and `combine`.

use crate::arena::Handle;
use crate::attr::{Attr, AttrSet};
use crate::comp::{self, Comp};
use crate::enum_::Enum;
use crate::error::{CirResult, FatalError, LocationStack};
use crate::machine::{FKind, IKind, Machine};
use crate::name::CirName;
use crate::typedef::Typedef;
use std::sync::Arc;

/// One formal parameter in a function type.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FunParam {
    pub name: CirName,
    pub ty: Type,
}

/// The variant arm of a type, per §3.1.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Int(IKind),
    Float(FKind),
    Ptr(Type),
    Array(Type, Option<u32>),
    Fun(Type, Arc<[FunParam]>, bool),
    Named(Handle<Typedef>),
    Comp(Handle<Comp>),
    Enum(Handle<Enum>),
    VaList,
}

impl PartialEq for IKind {
    fn eq(&self, other: &Self) -> bool {
        *self as u8 == *other as u8
    }
}
impl Eq for IKind {}
impl std::hash::Hash for IKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state);
    }
}
impl PartialEq for FKind {
    fn eq(&self, other: &Self) -> bool {
        *self as u8 == *other as u8
    }
}
impl Eq for FKind {}
impl std::hash::Hash for FKind {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state);
    }
}

struct TypeData {
    kind: TypeKind,
    attrs: AttrSet,
}

impl PartialEq for TypeData {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.attrs == other.attrs
    }
}
impl Eq for TypeData {}
impl std::hash::Hash for TypeData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        // AttrSet doesn't implement Hash (attrs are rarely the hot path for
        // equality); fold in length and leave content comparison to `eq`.
        self.attrs.len().hash(state);
    }
}

/// A type: cheap to clone (an `Arc`), structurally comparable. Leaves with
/// no attributes are never bump-allocated more than once per distinct shape;
/// everything else is freshly allocated but immutable thereafter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Type(Arc<TypeData>);

impl Type {
    fn leaf(kind: TypeKind) -> Type {
        Type(Arc::new(TypeData { kind, attrs: AttrSet::empty() }))
    }

    pub fn void() -> Type {
        Type::leaf(TypeKind::Void)
    }
    pub fn int(k: IKind) -> Type {
        Type::leaf(TypeKind::Int(k))
    }
    pub fn float(k: FKind) -> Type {
        Type::leaf(TypeKind::Float(k))
    }
    pub fn va_list() -> Type {
        Type::leaf(TypeKind::VaList)
    }
    pub fn named(id: Handle<Typedef>) -> Type {
        Type::leaf(TypeKind::Named(id))
    }
    pub fn comp(id: Handle<Comp>) -> Type {
        Type::leaf(TypeKind::Comp(id))
    }
    pub fn enum_(id: Handle<Enum>) -> Type {
        Type::leaf(TypeKind::Enum(id))
    }
    pub fn ptr(base: Type) -> Type {
        Type(Arc::new(TypeData { kind: TypeKind::Ptr(base), attrs: AttrSet::empty() }))
    }
    pub fn array(base: Type, len: Option<u32>) -> Type {
        Type(Arc::new(TypeData { kind: TypeKind::Array(base, len), attrs: AttrSet::empty() }))
    }
    pub fn fun(ret: Type, params: Vec<FunParam>, is_variadic: bool) -> Type {
        Type(Arc::new(TypeData {
            kind: TypeKind::Fun(ret, Arc::from(params), is_variadic),
            attrs: AttrSet::empty(),
        }))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    pub fn attrs(&self) -> &AttrSet {
        &self.0.attrs
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind(), TypeKind::Void)
    }
    pub fn as_int(&self) -> Option<IKind> {
        match self.kind() {
            TypeKind::Int(k) => Some(*k),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<FKind> {
        match self.kind() {
            TypeKind::Float(k) => Some(*k),
            _ => None,
        }
    }
    pub fn is_arithmetic(&self) -> bool {
        self.as_int().is_some() || self.as_float().is_some()
    }
    pub fn is_ptr(&self) -> bool {
        matches!(self.kind(), TypeKind::Ptr(_))
    }
    pub fn is_array(&self) -> bool {
        matches!(self.kind(), TypeKind::Array(..))
    }
    pub fn is_fun(&self) -> bool {
        matches!(self.kind(), TypeKind::Fun(..))
    }
    pub fn is_named(&self) -> bool {
        matches!(self.kind(), TypeKind::Named(_))
    }
    pub fn is_comp(&self) -> bool {
        matches!(self.kind(), TypeKind::Comp(_))
    }
    pub fn is_enum(&self) -> bool {
        matches!(self.kind(), TypeKind::Enum(_))
    }
    pub fn base_type(&self) -> Option<&Type> {
        match self.kind() {
            TypeKind::Ptr(b) | TypeKind::Array(b, _) => Some(b),
            _ => None,
        }
    }

    /// Replace this type's attribute set wholesale.
    pub fn with_attrs(&self, attrs: &[Attr]) -> Type {
        Type(Arc::new(TypeData { kind: self.0.kind.clone(), attrs: self.0.attrs.with_attrs(attrs) }))
    }
    pub fn replace_attrs(&self, attrs: &[Attr]) -> Type {
        Type(Arc::new(TypeData { kind: self.0.kind.clone(), attrs: AttrSet::replace_attrs(attrs) }))
    }
    pub fn remove_attrs(&self, attrs: &[Attr]) -> Type {
        Type(Arc::new(TypeData { kind: self.0.kind.clone(), attrs: self.0.attrs.remove_attrs(attrs) }))
    }
}

/// Read access to the mutable arenas a type may reference, so the type
/// algebra can resolve `Named`/`Comp`/`Enum` without owning those arenas
/// itself. Implemented by `Context`.
pub trait TypeEnv {
    fn typedef(&self, id: Handle<Typedef>) -> &Typedef;
    fn comp(&self, id: Handle<Comp>) -> &Comp;
    fn enum_(&self, id: Handle<Enum>) -> &Enum;
}

/// Repeatedly replace `Named(tid)` with the typedef's type, merging the
/// outer attribute set into the inner one. Terminates because typedef
/// expansion is acyclic by construction (§4.1).
pub fn unroll(ty: &Type, env: &dyn TypeEnv) -> Type {
    match ty.kind() {
        TypeKind::Named(tid) => {
            let inner = &env.typedef(*tid).ty;
            let merged = inner.with_attrs(ty.attrs().as_slice());
            unroll(&merged, env)
        }
        _ => ty.clone(),
    }
}

/// `unroll`, and then unroll every nested base type too (pointers, arrays,
/// function returns) so no `Named` survives anywhere in the shape.
pub fn unroll_deep(ty: &Type, env: &dyn TypeEnv) -> Type {
    let top = unroll(ty, env);
    match top.kind() {
        TypeKind::Ptr(b) => Type::ptr(unroll_deep(b, env)).with_attrs(top.attrs().as_slice()),
        TypeKind::Array(b, len) => {
            Type::array(unroll_deep(b, env), *len).with_attrs(top.attrs().as_slice())
        }
        TypeKind::Fun(ret, params, va) => {
            let ret = unroll_deep(ret, env);
            let params: Vec<FunParam> =
                params.iter().map(|p| FunParam { name: p.name, ty: unroll_deep(&p.ty, env) }).collect();
            Type::fun(ret, params, *va).with_attrs(top.attrs().as_slice())
        }
        _ => top,
    }
}

/// Function-to-pointer, array-to-pointer decay; strips `const`/`volatile`/
/// `restrict`-style qualifier attributes from anything else (§4.1).
/// Qualifier attributes are modeled as bare `Attr::Name` leaves named
/// "const"/"volatile"/"restrict"; callers pass those names in for removal.
pub fn lval_conv(ty: &Type, env: &dyn TypeEnv, qualifier_names: &[CirName]) -> Type {
    let unrolled = unroll(ty, env);
    match unrolled.kind() {
        TypeKind::Fun(..) => Type::ptr(unrolled.clone()).with_attrs(unrolled.attrs().as_slice()),
        TypeKind::Array(base, _) => Type::ptr(base.clone()).with_attrs(unrolled.attrs().as_slice()),
        _ => {
            let remove: Vec<Attr> = qualifier_names.iter().map(|n| Attr::Name(*n)).collect();
            ty.remove_attrs(&remove)
        }
    }
}

/// `_Bool -> int`; integer kinds narrower than `int` promote to `int` (or
/// `unsigned int` if `int` cannot represent every value of the source kind).
pub fn integral_promotion(k: IKind, m: &Machine) -> IKind {
    if k == IKind::Bool {
        return IKind::Int;
    }
    if k.size(m) < IKind::Int.size(m) {
        return IKind::Int;
    }
    if k.size(m) == IKind::Int.size(m) && !k.is_signed() && k != IKind::Int && k != IKind::UInt {
        return IKind::UInt;
    }
    k
}

/// The usual arithmetic conversions: float dominates by rank, otherwise
/// integer-promote both sides and apply the common signed/unsigned rule by
/// rank and representability (§4.1).
pub fn arithmetic_conversion(t1: &Type, t2: &Type, m: &Machine) -> Type {
    if let Some(f1) = t1.as_float() {
        return match t2.as_float() {
            Some(f2) => Type::float(if f1.rank() >= f2.rank() { f1 } else { f2 }),
            None => Type::float(f1),
        };
    }
    if let Some(f2) = t2.as_float() {
        return Type::float(f2);
    }
    let (Some(i1), Some(i2)) = (t1.as_int(), t2.as_int()) else {
        // Non-arithmetic operand (pointer arithmetic is handled by the
        // builder before calling this); fall back to the first type.
        return t1.clone();
    };
    let i1 = integral_promotion(i1, m);
    let i2 = integral_promotion(i2, m);
    if i1 == i2 {
        return Type::int(i1);
    }
    let same_signedness = i1.is_signed() == i2.is_signed();
    if same_signedness {
        return Type::int(if i1.rank() >= i2.rank() { i1 } else { i2 });
    }
    let (signed, unsigned) = if i1.is_signed() { (i1, i2) } else { (i2, i1) };
    if unsigned.rank() >= signed.rank() {
        return Type::int(unsigned);
    }
    if signed.size(m) > unsigned.size(m) {
        return Type::int(signed);
    }
    Type::int(signed.to_unsigned())
}

/// `sizeof`, dispatched by arm (§4.1). Function size is only defined for the
/// GCC machine flavor.
pub fn sizeof_with(ty: &Type, env: &dyn TypeEnv, m: &Machine) -> u64 {
    match ty.kind() {
        TypeKind::Void => 1,
        TypeKind::Int(k) => k.size(m),
        TypeKind::Float(k) => k.size(m),
        TypeKind::Ptr(_) => m.sizeof_ptr,
        TypeKind::Array(base, len) => sizeof_with(base, env, m) * (len.unwrap_or(0) as u64),
        TypeKind::Fun(..) => m.sizeof_fun,
        TypeKind::VaList => m.sizeof_ptr,
        TypeKind::Named(_) => sizeof_with(&unroll(ty, env), env, m),
        TypeKind::Comp(cid) => comp::layout(env.comp(*cid), m).size_bytes,
        TypeKind::Enum(eid) => env.enum_(*eid).ikind.size(m),
    }
}

/// `alignof`, dispatched by arm (§4.1).
pub fn alignof_with(ty: &Type, env: &dyn TypeEnv, m: &Machine) -> u64 {
    match ty.kind() {
        TypeKind::Void => 1,
        TypeKind::Int(k) => k.size(m),
        TypeKind::Float(FKind::LongDouble) => m.alignof_long_double,
        TypeKind::Float(k) => k.size(m),
        TypeKind::Ptr(_) => m.alignof_ptr,
        TypeKind::Array(base, _) => alignof_with(base, env, m),
        TypeKind::Fun(..) => m.alignof_fun,
        TypeKind::VaList => m.alignof_ptr,
        TypeKind::Named(_) => alignof_with(&unroll(ty, env), env, m),
        TypeKind::Comp(cid) => comp::layout(env.comp(*cid), m).align_bytes,
        TypeKind::Enum(eid) => env.enum_(*eid).ikind.size(m),
    }
}

/// Thin wrappers taking a `Machine` only, for the leaf kinds that never
/// need arena resolution (used by the JIT backend, which never sees
/// `Named`/`Comp`/`Enum` after `unroll_deep`).
pub fn sizeof(ty: &Type, m: &Machine) -> u64 {
    sizeof_with(ty, &NoopEnv, m)
}
pub fn alignof(ty: &Type, m: &Machine) -> u64 {
    alignof_with(ty, &NoopEnv, m)
}

struct NoopEnv;
impl TypeEnv for NoopEnv {
    fn typedef(&self, _id: Handle<Typedef>) -> &Typedef {
        crate::cir_bug!("sizeof/alignof fast path hit a Named type without a TypeEnv")
    }
    fn comp(&self, _id: Handle<Comp>) -> &Comp {
        crate::cir_bug!("sizeof/alignof fast path hit a Comp type without a TypeEnv")
    }
    fn enum_(&self, _id: Handle<Enum>) -> &Enum {
        crate::cir_bug!("sizeof/alignof fast path hit an Enum type without a TypeEnv")
    }
}

/// Structural merge of two declarations of the same entity (§4.1). Returns
/// `Err` rather than panicking when the declarations are incompatible.
pub fn combine(old: &Type, new: &Type, locs: &LocationStack) -> CirResult<Type> {
    match (old.kind(), new.kind()) {
        (TypeKind::Void, TypeKind::Void) => Ok(old.clone()),
        (TypeKind::Int(a), TypeKind::Int(b)) if a == b => Ok(old.clone()),
        (TypeKind::Float(a), TypeKind::Float(b)) if a == b => Ok(old.clone()),
        (TypeKind::VaList, TypeKind::VaList) => Ok(old.clone()),
        (TypeKind::Named(a), TypeKind::Named(b)) if a == b => Ok(old.clone()),
        (TypeKind::Comp(a), TypeKind::Comp(b)) if a == b => Ok(old.clone()),
        (TypeKind::Enum(a), TypeKind::Enum(b)) if a == b => Ok(old.clone()),
        (TypeKind::Ptr(a), TypeKind::Ptr(b)) => Ok(Type::ptr(combine(a, b, locs)?)),
        (TypeKind::Array(a, la), TypeKind::Array(b, lb)) => {
            let base = combine(a, b, locs)?;
            let len = la.or(*lb);
            Ok(Type::array(base, len))
        }
        (TypeKind::Fun(ra, pa, va_a), TypeKind::Fun(rb, pb, va_b)) => {
            if va_a != va_b {
                return Err(FatalError::new(
                    "incompatible function redeclaration: variadicity differs",
                    locs.clone(),
                ));
            }
            let ret = combine(ra, rb, locs)?;
            // An empty, non-variadic parameter list (`g()`, not `g(void)`)
            // means "unspecified parameters" rather than "zero parameters";
            // it combines with whatever parameter list the other
            // declaration has instead of forcing an exact-length match.
            let params = if pa.len() == pb.len() {
                let mut params = Vec::with_capacity(pa.len());
                for (p_old, p_new) in pa.iter().zip(pb.iter()) {
                    let ty = combine(&p_old.ty, &p_new.ty, locs)?;
                    // The new declaration's parameter name wins if present.
                    let name = if p_new.name != CirName::dummy() { p_new.name } else { p_old.name };
                    params.push(FunParam { name, ty });
                }
                params
            } else if pa.is_empty() && !va_a {
                pb.to_vec()
            } else if pb.is_empty() && !va_a {
                pa.to_vec()
            } else {
                return Err(FatalError::new(
                    "incompatible function redeclaration: parameter count differs",
                    locs.clone(),
                ));
            };
            Ok(Type::fun(ret, params, *va_a))
        }
        _ => Err(FatalError::new("incompatible redeclaration: types do not match", locs.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_are_interned_by_value() {
        assert!(Type::void() == Type::void());
        assert!(Type::int(IKind::Int) == Type::int(IKind::Int));
        assert!(Type::int(IKind::Int) != Type::int(IKind::Long));
    }

    #[test]
    fn with_attrs_empty_is_identity() {
        let t = Type::int(IKind::Int);
        assert!(t.with_attrs(&[]) == t);
    }

    #[test]
    fn unroll_is_idempotent_for_non_named() {
        struct Empty;
        impl TypeEnv for Empty {
            fn typedef(&self, _: Handle<Typedef>) -> &Typedef {
                unreachable!()
            }
            fn comp(&self, _: Handle<Comp>) -> &Comp {
                unreachable!()
            }
            fn enum_(&self, _: Handle<Enum>) -> &Enum {
                unreachable!()
            }
        }
        let t = Type::ptr(Type::int(IKind::Int));
        let once = unroll(&t, &Empty);
        let twice = unroll(&once, &Empty);
        assert!(once == twice);
    }

    #[test]
    fn combine_is_idempotent_on_identical_inputs() {
        let locs = LocationStack::new();
        let t = Type::int(IKind::Int);
        assert!(combine(&t, &t, &locs).unwrap() == t);
    }

    #[test]
    fn combine_function_fills_in_missing_param_name() {
        let mut names = crate::name::NameTable::new();
        let x = names.intern("x");
        let locs = LocationStack::new();
        let f1 = Type::fun(Type::void(), vec![FunParam { name: CirName::dummy(), ty: Type::int(IKind::Int) }], false);
        let f2 = Type::fun(Type::void(), vec![FunParam { name: x, ty: Type::int(IKind::Int) }], false);
        let combined = combine(&f1, &f2, &locs).unwrap();
        match combined.kind() {
            TypeKind::Fun(_, params, _) => assert_eq!(params[0].name, x),
            _ => panic!("expected Fun"),
        }
    }
}
