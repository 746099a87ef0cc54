use crate::function::{BlockId, FunctionBody, InstrId};
use crate::instruction::{BinOp, ICmpPred, Op};
use crate::module::FuncId;
use crate::types::Ty;
use crate::value::Value;

/// Instruction builder: a cursor into a block at which new instructions are
/// spliced, advancing past each one it creates.
///
/// A builder borrows the body exclusively, so its lifetime is necessarily
/// shorter than the function it edits; positions are resolved at
/// construction and become stale if the caller re-enters the body between
/// builders.
pub struct Builder<'f> {
    body: &'f mut FunctionBody,
    block: BlockId,
    index: usize,
}

impl<'f> Builder<'f> {
    /// Positions the cursor immediately before `instr`.
    ///
    /// # Panics
    /// Panics if `instr` has been unlinked from its block.
    pub fn before(body: &'f mut FunctionBody, instr: InstrId) -> Builder<'f> {
        let (block, index) = body
            .position_of(instr)
            .expect("builder anchored on an unlinked instruction");
        Builder { body, block, index }
    }

    /// Positions the cursor at the block's first insertion point, after any
    /// leading phi nodes.
    pub fn at_block_begin(body: &'f mut FunctionBody, block: BlockId) -> Builder<'f> {
        let index = body.first_insertion_index(block);
        Builder { body, block, index }
    }

    /// Positions the cursor at the end of the block, just before its
    /// terminator.
    pub fn at_block_end(body: &'f mut FunctionBody, block: BlockId) -> Builder<'f> {
        let index = body.block(block).instrs.len();
        Builder { body, block, index }
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// Result type of a value in the body under edit.
    pub fn value_ty(&self, value: &Value) -> Ty {
        self.body.value_ty(value)
    }

    fn insert(&mut self, name: &str, ty: Ty, op: Op) -> Value {
        let id = self.body.insert_instr(self.block, self.index, name, ty, op);
        self.index += 1;
        Value::Instr(id)
    }

    pub fn alloca(&mut self, allocated: Ty, name: &str) -> Value {
        self.insert(name, Ty::Ptr, Op::Alloca { allocated })
    }

    pub fn load(&mut self, ty: Ty, ptr: Value, name: &str) -> Value {
        self.insert(name, ty, Op::Load { ptr })
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.insert("", Ty::Void, Op::Store { value, ptr });
    }

    pub fn gep(&mut self, base_ty: Ty, base: Value, indices: Vec<Value>, name: &str) -> Value {
        self.insert(
            name,
            Ty::Ptr,
            Op::Gep {
                base_ty,
                base,
                indices,
            },
        )
    }

    pub fn bitcast(&mut self, value: Value, name: &str) -> Value {
        self.insert(name, Ty::Ptr, Op::BitCast { value })
    }

    pub fn call(&mut self, ret_ty: Ty, callee: FuncId, args: Vec<Value>, name: &str) -> Value {
        self.insert(name, ret_ty, Op::Call { callee, args })
    }

    pub fn select(&mut self, cond: Value, if_true: Value, if_false: Value, name: &str) -> Value {
        let ty = self.body.value_ty(&if_true);
        self.insert(
            name,
            ty,
            Op::Select {
                cond,
                if_true,
                if_false,
            },
        )
    }

    pub fn icmp(&mut self, pred: ICmpPred, lhs: Value, rhs: Value, name: &str) -> Value {
        self.insert(name, Ty::I1, Op::ICmp { pred, lhs, rhs })
    }

    pub fn bin(&mut self, op: BinOp, lhs: Value, rhs: Value, name: &str) -> Value {
        let ty = self.body.value_ty(&lhs);
        self.insert(name, ty, Op::Bin { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
        self.bin(BinOp::Add, lhs, rhs, name)
    }

    pub fn xor(&mut self, lhs: Value, rhs: Value, name: &str) -> Value {
        self.bin(BinOp::Xor, lhs, rhs, name)
    }

    /// Creates a phi at the head of the builder's block regardless of the
    /// cursor position, keeping the phi run contiguous.
    pub fn phi(&mut self, ty: Ty, incomings: Vec<(Value, BlockId)>, name: &str) -> Value {
        let head = self
            .body
            .block(self.block)
            .instrs
            .iter()
            .position(|&i| !self.body.instr(i).op.is_phi())
            .unwrap_or(self.body.block(self.block).instrs.len());
        let id = self
            .body
            .insert_instr(self.block, head, name, ty, Op::Phi { incomings });
        if head <= self.index {
            self.index += 1;
        }
        Value::Instr(id)
    }
}
