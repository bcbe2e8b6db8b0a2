//! `CirBuiltin`: the small fixed set of compiler intrinsics (§3.5).

use crate::machine::IKind;
use crate::name::CirName;
use crate::types::{FunParam, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinId {
    Bswap16,
    Bswap32,
    Bswap64,
}

const ALL: [BuiltinId; 3] = [BuiltinId::Bswap16, BuiltinId::Bswap32, BuiltinId::Bswap64];

fn spelling(id: BuiltinId) -> &'static str {
    match id {
        BuiltinId::Bswap16 => "__builtin_bswap16",
        BuiltinId::Bswap32 => "__builtin_bswap32",
        BuiltinId::Bswap64 => "__builtin_bswap64",
    }
}

/// Look up a builtin by its spelling.
pub fn builtin_of_name(name: &str) -> Option<BuiltinId> {
    ALL.into_iter().find(|&id| spelling(id) == name)
}

pub fn builtin_name(names: &mut crate::name::NameTable, id: BuiltinId) -> CirName {
    names.intern(spelling(id))
}

fn unnamed_param(ty: Type) -> FunParam {
    FunParam { name: CirName::dummy(), ty }
}

pub fn builtin_type(id: BuiltinId) -> Type {
    match id {
        BuiltinId::Bswap16 => Type::fun(Type::int(IKind::UShort), vec![unnamed_param(Type::int(IKind::UShort))], false),
        BuiltinId::Bswap32 => Type::fun(Type::int(IKind::UInt), vec![unnamed_param(Type::int(IKind::UInt))], false),
        BuiltinId::Bswap64 => Type::fun(Type::int(IKind::ULong), vec![unnamed_param(Type::int(IKind::ULong))], false),
    }
}
