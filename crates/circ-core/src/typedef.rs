//! `CirTypedef`: an immutable name/type pairing (§3.3).

use crate::name::CirName;
use crate::types::Type;

pub struct Typedef {
    pub name: CirName,
    pub ty: Type,
}

impl Typedef {
    pub fn dummy() -> Self {
        Typedef { name: CirName::dummy(), ty: Type::void() }
    }
}
