use thiserror::Error;

/// Error type for IR construction and mutation.
#[derive(Debug, Error)]
pub enum IrError {
    /// A function name was looked up but does not exist in the module.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    /// An operation required a function body but got a declaration.
    #[error("function '{0}' has no body")]
    NoBody(String),
    /// A global was accessed after being erased from the module.
    #[error("global g{0} has been erased")]
    ErasedGlobal(u32),
}

/// Errors reported by the module verifier.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("function '{func}': block '{block}' has no terminator")]
    MissingTerminator { func: String, block: String },
    #[error("function '{func}': terminator of '{block}' targets a block outside the function")]
    BadBranchTarget { func: String, block: String },
    #[error("function '{func}': phi in '{block}' does not cover predecessor '{pred}'")]
    PhiPredMismatch {
        func: String,
        block: String,
        pred: String,
    },
    #[error("function '{func}': phi in '{block}' lists '{pred}' which is not a predecessor")]
    PhiExtraPred {
        func: String,
        block: String,
        pred: String,
    },
    #[error("function '{func}': use in '{block}' is not dominated by its definition")]
    DominanceViolation { func: String, block: String },
    #[error("function '{func}': return value does not match return type")]
    ReturnTypeMismatch { func: String },
    #[error("function '{func}': entry block missing from layout")]
    MissingEntry { func: String },
    #[error("function '{func}': operand references an erased or foreign instruction")]
    DanglingOperand { func: String },
}

/// Errors raised while executing a module in the reference interpreter.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("call to unknown external '{0}'")]
    UnknownExternal(String),
    #[error("executed unreachable terminator in '{0}'")]
    UnreachableExecuted(String),
    #[error("memory access out of bounds at address {0:#x}")]
    OutOfBounds(u64),
    #[error("fuel exhausted after {0} steps")]
    OutOfFuel(u64),
    #[error("indirect branch to address {0:#x} with no matching destination")]
    BadIndirectTarget(u64),
    #[error("read of a poison value")]
    PoisonRead,
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    /// A next-state computation was required but no mapping existed.
    #[error("no next state computable for a flattened block in '{function}'")]
    StateUncomputable { function: String },
    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),
    #[error("invalid pass name: {0}")]
    InvalidPass(String),
    #[error("transform failed: {0}")]
    Generic(String),
}

/// Errors that can occur while driving the obfuscator from the CLI.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("module (de)serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("execution error: {0}")]
    Exec(#[from] ExecError),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
}
