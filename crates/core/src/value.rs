use crate::function::InstrId;
use crate::module::GlobalId;
use crate::types::Ty;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A compile-time constant operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int { ty: Ty, value: i64 },
    /// A constant byte array (only meaningful as a global initializer).
    Bytes(Vec<u8>),
    /// The null pointer.
    Null,
    /// A poison value of the given type; reading it yields an arbitrary bit
    /// pattern. Used by the demoter to define stack slots on paths that never
    /// store into them.
    Poison(Ty),
}

impl Constant {
    pub fn bool(value: bool) -> Constant {
        Constant::Int {
            ty: Ty::I1,
            value: value as i64,
        }
    }

    pub fn i8(value: u8) -> Constant {
        Constant::Int {
            ty: Ty::I8,
            value: value as i64,
        }
    }

    pub fn i32(value: i64) -> Constant {
        Constant::Int { ty: Ty::I32, value }
    }

    pub fn i64(value: i64) -> Constant {
        Constant::Int { ty: Ty::I64, value }
    }

    pub fn ty(&self) -> Ty {
        match self {
            Constant::Int { ty, .. } => ty.clone(),
            Constant::Bytes(bytes) => Ty::array(Ty::I8, bytes.len()),
            Constant::Null => Ty::Ptr,
            Constant::Poison(ty) => ty.clone(),
        }
    }
}

/// An operand: the result of an instruction, a function argument, the address
/// of a global, or a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Instr(InstrId),
    Arg(u32),
    Global(GlobalId),
    Const(Constant),
}

impl Value {
    pub fn bool(value: bool) -> Value {
        Value::Const(Constant::bool(value))
    }

    pub fn i32(value: i64) -> Value {
        Value::Const(Constant::i32(value))
    }

    pub fn i64(value: i64) -> Value {
        Value::Const(Constant::i64(value))
    }

    pub fn as_instr(&self) -> Option<InstrId> {
        match self {
            Value::Instr(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<GlobalId> {
        match self {
            Value::Global(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Instr(id) => write!(f, "%{}", id.0),
            Value::Arg(i) => write!(f, "%arg{i}"),
            Value::Global(id) => write!(f, "@g{}", id.0),
            Value::Const(Constant::Int { value, .. }) => write!(f, "{value}"),
            Value::Const(Constant::Bytes(bytes)) => write!(f, "<{} bytes>", bytes.len()),
            Value::Const(Constant::Null) => write!(f, "null"),
            Value::Const(Constant::Poison(_)) => write!(f, "poison"),
        }
    }
}
