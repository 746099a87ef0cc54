use crate::instruction::{InstrData, Op, Terminator};
use crate::module::Linkage;
use crate::types::Ty;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a basic block within its owning function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BlockId(pub u32);

/// Identifies an instruction within its owning function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct InstrId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

/// A basic block: an ordered run of instructions closed by one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub name: String,
    pub instrs: Vec<InstrId>,
    pub term: Option<Terminator>,
    /// Set for exception-handling landing pads; such blocks are never
    /// produced by this crate but gate functions out of flattening.
    pub is_eh_pad: bool,
}

/// The instruction and block arenas of a function definition.
///
/// Both arenas are append-only: erasing an instruction unlinks it from its
/// block (and erasing a block removes it from the layout) without reusing the
/// id, so ids held by in-flight transforms stay stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionBody {
    entry: BlockId,
    blocks: Vec<BlockData>,
    layout: Vec<BlockId>,
    instrs: Vec<InstrData>,
    param_tys: Vec<Ty>,
}

impl FunctionBody {
    pub fn new(param_tys: Vec<Ty>) -> FunctionBody {
        let entry = BlockId(0);
        FunctionBody {
            entry,
            blocks: vec![BlockData {
                name: "entry".to_string(),
                instrs: Vec::new(),
                term: None,
                is_eh_pad: false,
            }],
            layout: vec![entry],
            instrs: Vec::new(),
            param_tys,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Blocks in layout order.
    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    pub fn add_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.to_string(),
            instrs: Vec::new(),
            term: None,
            is_eh_pad: false,
        });
        self.layout.push(id);
        id
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0 as usize]
    }

    /// Removes a block from the layout. Its instructions become unlinked and
    /// its id dangles; callers are expected to have rewired all references.
    pub fn erase_block(&mut self, id: BlockId) {
        self.layout.retain(|&b| b != id);
        self.blocks[id.0 as usize].instrs.clear();
        self.blocks[id.0 as usize].term = None;
    }

    pub fn instr(&self, id: InstrId) -> &InstrData {
        &self.instrs[id.0 as usize]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut InstrData {
        &mut self.instrs[id.0 as usize]
    }

    /// Inserts a new instruction into `block` at `index` and returns its id.
    pub fn insert_instr(
        &mut self,
        block: BlockId,
        index: usize,
        name: &str,
        ty: Ty,
        op: Op,
    ) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(InstrData {
            name: name.to_string(),
            ty,
            op,
            block,
        });
        self.blocks[block.0 as usize].instrs.insert(index, id);
        id
    }

    /// Unlinks an instruction from its block. The arena slot is retained so
    /// outstanding ids stay valid but the instruction no longer executes.
    pub fn erase_instr(&mut self, id: InstrId) {
        let block = self.instrs[id.0 as usize].block;
        self.blocks[block.0 as usize].instrs.retain(|&i| i != id);
    }

    /// Position of a linked instruction as `(block, index)`.
    pub fn position_of(&self, id: InstrId) -> Option<(BlockId, usize)> {
        let block = self.instrs[id.0 as usize].block;
        self.blocks[block.0 as usize]
            .instrs
            .iter()
            .position(|&i| i == id)
            .map(|index| (block, index))
    }

    pub fn is_linked(&self, id: InstrId) -> bool {
        self.position_of(id).is_some()
    }

    pub fn set_terminator(&mut self, block: BlockId, term: Terminator) {
        self.blocks[block.0 as usize].term = Some(term);
    }

    pub fn terminator(&self, block: BlockId) -> Option<&Terminator> {
        self.blocks[block.0 as usize].term.as_ref()
    }

    pub fn terminator_mut(&mut self, block: BlockId) -> Option<&mut Terminator> {
        self.blocks[block.0 as usize].term.as_mut()
    }

    /// Index of the first non-phi slot in a block, the canonical insertion
    /// point for code that must run on block entry.
    pub fn first_insertion_index(&self, block: BlockId) -> usize {
        self.blocks[block.0 as usize]
            .instrs
            .iter()
            .position(|&i| !self.instrs[i.0 as usize].op.is_phi())
            .unwrap_or(self.blocks[block.0 as usize].instrs.len())
    }

    /// The phi nodes heading a block.
    pub fn phis_of(&self, block: BlockId) -> Vec<InstrId> {
        self.blocks[block.0 as usize]
            .instrs
            .iter()
            .copied()
            .take_while(|&i| self.instrs[i.0 as usize].op.is_phi())
            .collect()
    }

    /// Result type of a value in the context of this body.
    pub fn value_ty(&self, value: &Value) -> Ty {
        match value {
            Value::Instr(id) => self.instrs[id.0 as usize].ty.clone(),
            Value::Arg(i) => self.param_tys[*i as usize].clone(),
            Value::Global(_) => Ty::Ptr,
            Value::Const(c) => c.ty(),
        }
    }

    /// Replaces `from` with `to` in every operand slot of every linked
    /// instruction and terminator. Returns the number of slots rewritten.
    pub fn replace_all_uses(&mut self, from: &Value, to: &Value) -> usize {
        let mut rewritten = 0;
        let targets: Vec<InstrId> = self
            .layout
            .iter()
            .flat_map(|&b| self.blocks[b.0 as usize].instrs.iter().copied())
            .collect();
        for id in targets {
            for operand in self.instrs[id.0 as usize].op.operands_mut() {
                if operand == from {
                    *operand = to.clone();
                    rewritten += 1;
                }
            }
        }
        let layout = self.layout.clone();
        for b in layout {
            if let Some(term) = self.blocks[b.0 as usize].term.as_mut() {
                for operand in term.operands_mut() {
                    if operand == from {
                        *operand = to.clone();
                        rewritten += 1;
                    }
                }
            }
        }
        rewritten
    }
}

/// A function: signature, attributes, and an optional body (a `None` body is
/// a declaration resolved outside the module).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret_ty: Ty,
    pub linkage: Linkage,
    pub is_intrinsic: bool,
    pub no_inline: bool,
    pub no_unwind: bool,
    pub body: Option<FunctionBody>,
}

impl Function {
    pub fn new_definition(name: &str, params: Vec<Param>, ret_ty: Ty) -> Function {
        let param_tys = params.iter().map(|p| p.ty.clone()).collect();
        Function {
            name: name.to_string(),
            params,
            ret_ty,
            linkage: Linkage::External,
            is_intrinsic: false,
            no_inline: false,
            no_unwind: false,
            body: Some(FunctionBody::new(param_tys)),
        }
    }

    pub fn new_declaration(name: &str, params: Vec<Param>, ret_ty: Ty) -> Function {
        Function {
            name: name.to_string(),
            params,
            ret_ty,
            linkage: Linkage::External,
            is_intrinsic: false,
            no_inline: false,
            no_unwind: false,
            body: None,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    pub fn block_count(&self) -> usize {
        self.body.as_ref().map_or(0, FunctionBody::block_count)
    }
}
