//! Mid-level intermediate representation manipulated by the Chakravyuha
//! obfuscation passes.
//!
//! The IR is a typed, explicit-control-flow SSA form: a [`Module`] owns
//! functions and global variables, a [`Function`] owns an arena of basic
//! blocks and instructions, and every block ends in exactly one
//! [`Terminator`]. New instructions are created through a [`Builder`]
//! positioned at an insertion point, mirroring how the transforms splice
//! code into existing blocks. The [`verifier`] checks structural and
//! dominance invariants after a transform has run, and [`interp`] executes
//! modules so end-to-end tests can compare observable behavior before and
//! after obfuscation.

pub mod builder;
pub mod cfg;
pub mod function;
pub mod instruction;
pub mod interp;
pub mod module;
pub mod types;
pub mod value;
pub mod verifier;

pub use builder::Builder;
pub use function::{BlockData, BlockId, Function, FunctionBody, InstrId, Param};
pub use instruction::{BinOp, ICmpPred, InstrData, Op, Terminator};
pub use module::{FuncId, GlobalId, GlobalVariable, Initializer, Linkage, Module};
pub use types::Ty;
pub use value::{Constant, Value};
