//! `CirEnum` / `CirEnumItem` (§3.3).

use crate::arena::Handle;
use crate::machine::IKind;
use crate::name::CirName;

pub struct EnumItem {
    pub name: CirName,
    pub value: i64,
}

impl EnumItem {
    pub fn dummy() -> Self {
        EnumItem { name: CirName::dummy(), value: 0 }
    }
}

pub struct Enum {
    pub name: Option<CirName>,
    pub ikind: IKind,
    pub is_defined: bool,
    pub items: Vec<Handle<EnumItem>>,
}

impl Enum {
    pub fn dummy() -> Self {
        Enum { name: None, ikind: IKind::Int, is_defined: false, items: Vec::new() }
    }

    pub fn new() -> Self {
        Enum { name: None, ikind: IKind::Int, is_defined: false, items: Vec::new() }
    }
}
