use crate::function::Function;
use crate::types::Ty;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a function within a module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FuncId(pub u32);

/// Identifies a global variable within a module. Ids stay valid across
/// erasure (the slot is tombstoned).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GlobalId(pub u32);

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@g{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
    Private,
}

/// Initial contents of a global variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Initializer {
    /// A constant data array of i8 elements.
    Bytes(Vec<u8>),
    Int { ty: Ty, value: i64 },
    /// The address of another global. This is a constant user of the
    /// referenced global and cannot be rewritten by instruction insertion.
    GlobalRef(GlobalId),
    Zero,
}

/// A module-scope variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: Ty,
    pub is_constant: bool,
    pub linkage: Linkage,
    pub init: Option<Initializer>,
}

/// A compilation unit: functions, globals, and the compiler-used retention
/// set that shields globals from later dead-global elimination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    functions: Vec<Function>,
    globals: Vec<Option<GlobalVariable>>,
    compiler_used: Vec<GlobalId>,
}

impl Module {
    pub fn new(name: &str) -> Module {
        Module {
            name: name.to_string(),
            functions: Vec::new(),
            globals: Vec::new(),
            compiler_used: Vec::new(),
        }
    }

    pub fn add_function(&mut self, function: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn function_ids(&self) -> Vec<FuncId> {
        (0..self.functions.len() as u32).map(FuncId).collect()
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Some(global));
        id
    }

    /// Live globals, in id order.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVariable)> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|g| (GlobalId(i as u32), g)))
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalVariable> {
        self.globals.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut GlobalVariable> {
        self.globals.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Deletes a global from the module. Its id becomes a tombstone.
    pub fn erase_global(&mut self, id: GlobalId) {
        if let Some(slot) = self.globals.get_mut(id.0 as usize) {
            *slot = None;
        }
        self.compiler_used.retain(|&g| g != id);
    }

    /// Adds a global to the compiler-used retention set.
    pub fn append_compiler_used(&mut self, id: GlobalId) {
        if !self.compiler_used.contains(&id) {
            self.compiler_used.push(id);
        }
    }

    pub fn remove_compiler_used(&mut self, id: GlobalId) {
        self.compiler_used.retain(|&g| g != id);
    }

    pub fn compiler_used(&self) -> &[GlobalId] {
        &self.compiler_used
    }
}
