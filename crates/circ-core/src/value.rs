//! `CirValue` (§3.4): a small immutable, tagged value record.

use crate::arena::Handle;
use crate::machine::IKind;
use crate::name::CirName;
use crate::types::Type;
use crate::var::Var;
use std::any::Any;
use std::sync::Arc;

/// A field-access chain: `v.f.g` is `Var(v, [f, g])`.
pub type FieldChain = Arc<[CirName]>;

#[derive(Clone)]
pub enum ValueKind {
    Int(IKind, i64),
    Str(Arc<[u8]>),
    /// `v.f.g...`
    Var(Handle<Var>, FieldChain),
    /// `(*v).f.g...`
    Mem(Handle<Var>, FieldChain),
    /// Opaque payload owned by the staging library; see `circ-stage`.
    User(u32, Arc<dyn Any>),
    Type(Type),
    Builtin(crate::builtin::BuiltinId),
}

#[derive(Clone)]
pub struct Value {
    kind: ValueKind,
    /// Overlay that changes the apparent type without rewriting the
    /// underlying target (§3.4). Only meaningful for `Int`/`Str`/`Var`/`Mem`.
    cast_type: Option<Type>,
}

impl Value {
    fn new(kind: ValueKind, cast_type: Option<Type>) -> Self {
        Value { kind, cast_type }
    }

    pub fn of_i64(ikind: IKind, v: i64) -> Value {
        Value::new(ValueKind::Int(ikind, v), None)
    }
    pub fn of_u64(ikind: IKind, v: u64) -> Value {
        Value::new(ValueKind::Int(ikind, v as i64), None)
    }
    pub fn of_string(bytes: impl Into<Arc<[u8]>>) -> Value {
        Value::new(ValueKind::Str(bytes.into()), None)
    }
    pub fn of_var(v: Handle<Var>) -> Value {
        Value::new(ValueKind::Var(v, Arc::from(Vec::new())), None)
    }
    pub fn of_mem(v: Handle<Var>) -> Value {
        Value::new(ValueKind::Mem(v, Arc::from(Vec::new())), None)
    }
    pub fn of_user(uid: u32, payload: Arc<dyn Any>) -> Value {
        Value::new(ValueKind::User(uid, payload), None)
    }
    pub fn of_type(ty: Type) -> Value {
        Value::new(ValueKind::Type(ty), None)
    }
    pub fn of_builtin(id: crate::builtin::BuiltinId) -> Value {
        Value::new(ValueKind::Builtin(id), None)
    }

    pub fn kind(&self) -> &ValueKind {
        &self.kind
    }

    pub fn is_int(&self) -> bool {
        matches!(self.kind, ValueKind::Int(..))
    }
    pub fn is_string(&self) -> bool {
        matches!(self.kind, ValueKind::Str(_))
    }
    pub fn is_var(&self) -> bool {
        matches!(self.kind, ValueKind::Var(..))
    }
    pub fn is_mem(&self) -> bool {
        matches!(self.kind, ValueKind::Mem(..))
    }
    /// An lvalue iff its kind is `Var` or `Mem`.
    pub fn is_lval(&self) -> bool {
        self.is_var() || self.is_mem()
    }
    pub fn is_user(&self) -> Option<u32> {
        match self.kind {
            ValueKind::User(uid, _) => Some(uid),
            _ => None,
        }
    }
    pub fn is_type(&self) -> bool {
        matches!(self.kind, ValueKind::Type(_))
    }

    pub fn get_i64(&self) -> i64 {
        match self.kind {
            ValueKind::Int(_, v) => v,
            _ => crate::cir_bug!("Value::get_i64 on a non-Int value"),
        }
    }
    pub fn get_u64(&self) -> u64 {
        self.get_i64() as u64
    }
    pub fn get_string(&self) -> &[u8] {
        match &self.kind {
            ValueKind::Str(s) => s,
            _ => crate::cir_bug!("Value::get_string on a non-Str value"),
        }
    }
    pub fn get_var(&self) -> Handle<Var> {
        match self.kind {
            ValueKind::Var(v, _) | ValueKind::Mem(v, _) => v,
            _ => crate::cir_bug!("Value::get_var on a non-lvalue"),
        }
    }
    pub fn get_fields(&self) -> &[CirName] {
        match &self.kind {
            ValueKind::Var(_, f) | ValueKind::Mem(_, f) => f,
            _ => &[],
        }
    }
    pub fn get_type_value(&self) -> &Type {
        match &self.kind {
            ValueKind::Type(t) => t,
            _ => crate::cir_bug!("Value::get_type_value on a non-Type value"),
        }
    }

    /// Overlay a cast type without generating any operation or rewriting the
    /// underlying target.
    pub fn with_cast_type(&self, ty: Type) -> Value {
        Value::new(self.kind.clone(), Some(ty))
    }
    pub fn get_cast_type(&self) -> Option<&Type> {
        self.cast_type.as_ref()
    }

    /// Append to (or, with an empty slice, replace) the field chain of an
    /// lvalue.
    pub fn with_fields(&self, fields: &[CirName]) -> Value {
        match &self.kind {
            ValueKind::Var(v, _) => Value::new(ValueKind::Var(*v, Arc::from(fields.to_vec())), self.cast_type.clone()),
            ValueKind::Mem(v, _) => Value::new(ValueKind::Mem(*v, Arc::from(fields.to_vec())), self.cast_type.clone()),
            _ => crate::cir_bug!("Value::with_fields on a non-lvalue"),
        }
    }
    pub fn with_var(&self, v: Handle<Var>) -> Value {
        match &self.kind {
            ValueKind::Var(_, f) => Value::new(ValueKind::Var(v, f.clone()), self.cast_type.clone()),
            ValueKind::Mem(_, f) => Value::new(ValueKind::Mem(v, f.clone()), self.cast_type.clone()),
            _ => crate::cir_bug!("Value::with_var on a non-lvalue"),
        }
    }

    /// The type this value presents as: the cast type if one was overlaid,
    /// otherwise the raw underlying type. Resolving `Var`/`Mem` raw types
    /// requires the variable arena, so those go through `Context`.
    pub fn raw_type(&self, m: &crate::machine::Machine) -> Type {
        match &self.kind {
            ValueKind::Int(k, _) => Type::int(*k),
            ValueKind::Str(s) => Type::array(Type::int(IKind::Char), Some(s.len() as u32)),
            ValueKind::Type(t) => t.clone(),
            ValueKind::Builtin(id) => crate::builtin::builtin_type(*id),
            ValueKind::Var(..) | ValueKind::Mem(..) | ValueKind::User(..) => {
                let _ = m;
                crate::cir_bug!("Value::raw_type for Var/Mem/User needs Context::value_type")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_overlay_does_not_change_lvalue_kind() {
        let v: Handle<crate::var::Var> = Handle::from_raw(1);
        let base = Value::of_var(v);
        let cast = base.with_cast_type(Type::int(IKind::Long));
        assert!(cast.is_lval());
        assert_eq!(cast.get_var(), v);
        assert!(cast.get_cast_type().is_some());
    }
}
