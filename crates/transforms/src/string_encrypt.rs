//! String encryption.
//!
//! Constant NUL-terminated byte-array globals are replaced by XOR-encrypted
//! twins, and every instruction that referenced the plaintext is rewritten
//! to decrypt the ciphertext into a private stack buffer just before the
//! use. The key is a single random byte drawn per module run; the decrypt
//! routine is synthesized into the module once and shared by all rewrites.
//!
//! Encryption is length-preserving: the trailing NUL is encrypted like any
//! other byte (to `0 XOR key`), and the decrypt loop restores it, so
//! consumers that walk the buffer to its terminator see the original bytes.

use crate::{ModulePass, PassConfig, Preserved};
use chakravyuha_analysis::with_report;
use chakravyuha_core::{
    Builder, FuncId, Function, GlobalId, GlobalVariable, ICmpPred, Initializer, InstrId, Linkage,
    Module, Op, Param, Terminator, Ty, Value,
};
use chakravyuha_utils::errors::TransformError;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, warn};

/// Name of the synthesized in-module decrypt routine.
pub const DECRYPT_FN_NAME: &str = "chakravyuha_decrypt_string";

pub struct StringEncrypt {
    config: PassConfig,
}

impl StringEncrypt {
    pub fn new(config: PassConfig) -> Self {
        Self { config }
    }
}

/// Collects the globals eligible for encryption, in id order.
///
/// A global qualifies when it is a constant with a byte-array initializer
/// whose last byte is NUL. The optional name-prefix filter narrows this to
/// compiler-emitted string tables (`.str`) for toolchains that expect it.
fn collect_string_globals(module: &Module, config: &PassConfig) -> Vec<GlobalId> {
    module
        .globals()
        .filter(|(_, global)| global.is_constant)
        .filter(|(_, global)| {
            matches!(&global.init, Some(Initializer::Bytes(bytes)) if bytes.last() == Some(&0))
        })
        .filter(|(_, global)| match &config.string_name_prefix {
            Some(prefix) => global.name.starts_with(prefix.as_str()),
            None => true,
        })
        .map(|(id, _)| id)
        .collect()
}

/// Ensures the module contains the decrypt stub and returns it.
///
/// The stub is `void chakravyuha_decrypt_string(ptr dest, ptr src, i32 len)`
/// with private linkage and the no-inline/no-unwind attributes: a counted
/// loop XORing `src[i]` with the key into `dest[i]`. Idempotent per module.
fn ensure_decrypt_stub(module: &mut Module, key: u8) -> FuncId {
    if let Some(existing) = module.function_by_name(DECRYPT_FN_NAME) {
        return existing;
    }

    let params = vec![
        Param {
            name: "dest_ptr".to_string(),
            ty: Ty::Ptr,
        },
        Param {
            name: "src_ptr".to_string(),
            ty: Ty::Ptr,
        },
        Param {
            name: "length".to_string(),
            ty: Ty::I32,
        },
    ];
    let mut stub = Function::new_definition(DECRYPT_FN_NAME, params, Ty::Void);
    stub.linkage = Linkage::Private;
    stub.no_inline = true;
    stub.no_unwind = true;

    let body = stub.body.as_mut().expect("fresh definition has a body");
    let entry = body.entry();
    let header = body.add_block("loop_header");
    let loop_body = body.add_block("loop_body");
    let exit = body.add_block("loop_exit");

    body.set_terminator(entry, Terminator::Br { dest: header });

    let mut b = Builder::at_block_end(body, header);
    let index = b.phi(Ty::I32, vec![(Value::i32(0), entry)], "index");
    let cond = b.icmp(ICmpPred::Slt, index.clone(), Value::Arg(2), "loop_cond");
    body.set_terminator(
        header,
        Terminator::CondBr {
            cond,
            then_dest: loop_body,
            else_dest: exit,
        },
    );

    let mut b = Builder::at_block_end(body, loop_body);
    let src_char = b.gep(Ty::I8, Value::Arg(1), vec![index.clone()], "src_char_ptr");
    let loaded = b.load(Ty::I8, src_char, "loaded_byte");
    let decrypted = b.xor(
        loaded,
        Value::Const(chakravyuha_core::Constant::i8(key)),
        "decrypted_byte",
    );
    let dest_char = b.gep(Ty::I8, Value::Arg(0), vec![index.clone()], "dest_char_ptr");
    b.store(decrypted, dest_char);
    let next = b.add(index.clone(), Value::i32(1), "next_index");
    body.set_terminator(loop_body, Terminator::Br { dest: header });

    let index_id = index.as_instr().expect("phi is an instruction");
    if let Op::Phi { incomings } = &mut body.instr_mut(index_id).op {
        incomings.push((next, loop_body));
    }
    body.set_terminator(exit, Terminator::Ret { value: None });

    module.add_function(stub)
}

/// Instruction users of `global` across the whole module.
fn instruction_users(module: &Module, global: GlobalId) -> Vec<(FuncId, InstrId)> {
    let target = Value::Global(global);
    let mut users = Vec::new();
    for (func_id, function) in module.functions() {
        let Some(body) = function.body.as_ref() else {
            continue;
        };
        for &block in body.layout() {
            for &instr in &body.block(block).instrs {
                let hits = body
                    .instr(instr)
                    .op
                    .operands()
                    .iter()
                    .filter(|v| ***v == target)
                    .count();
                for _ in 0..hits {
                    users.push((func_id, instr));
                }
            }
        }
    }
    users
}

/// Users the rewriter cannot lower: terminator operands and constant
/// initializers of other globals.
fn unrewritable_users(module: &Module, global: GlobalId) -> usize {
    let target = Value::Global(global);
    let mut count = module
        .globals()
        .filter(|(_, other)| matches!(other.init, Some(Initializer::GlobalRef(t)) if t == global))
        .count();
    for (_, function) in module.functions() {
        let Some(body) = function.body.as_ref() else {
            continue;
        };
        for &block in body.layout() {
            if let Some(term) = body.terminator(block) {
                count += term.operands().iter().filter(|v| ***v == target).count();
            }
        }
    }
    count
}

impl ModulePass for StringEncrypt {
    fn name(&self) -> &'static str {
        "StringEncrypt"
    }

    fn run(&self, module: &mut Module, rng: &mut StdRng) -> Result<Preserved, TransformError> {
        with_report(|r| {
            r.enable_string_encryption = true;
            r.passes_run.push("StringEncrypt".to_string());
        });

        let candidates = collect_string_globals(module, &self.config);
        if candidates.is_empty() {
            return Ok(Preserved::All);
        }

        // module-scoped key; a process compiling several modules draws one
        // per invocation
        let key: u8 = rng.random_range(1..=255);
        let had_stub = module.function_by_name(DECRYPT_FN_NAME).is_some();
        let decrypt = ensure_decrypt_stub(module, key);

        let mut changed = !had_stub;
        let mut encrypted_count = 0u64;
        let mut original_bytes = 0u64;
        let mut encrypted_bytes = 0u64;

        for global_id in candidates {
            let Some(global) = module.global(global_id) else {
                continue;
            };
            let Some(Initializer::Bytes(plaintext)) = global.init.clone() else {
                continue;
            };
            if plaintext.is_empty() {
                continue;
            }
            let name = global.name.clone();

            // a use this pass cannot redirect means the original global must
            // stay; leave it fully intact rather than half-rewritten
            let stuck = unrewritable_users(module, global_id);
            if stuck > 0 {
                warn!("'{name}': {stuck} constant or terminator use(s) cannot be rewritten, leaving global alone");
                continue;
            }

            let mut ciphertext: Vec<u8> = plaintext.iter().map(|byte| byte ^ key).collect();
            // length-preserving: the trailing NUL encrypts to `0 ^ key`
            if let Some(last) = ciphertext.last_mut() {
                *last = key;
            }
            let length = ciphertext.len();
            let array_ty = Ty::array(Ty::I8, length);
            debug!(
                "'{name}': {} -> {} ({length} bytes)",
                hex::encode(&plaintext),
                hex::encode(&ciphertext)
            );

            let encrypted_id = module.add_global(GlobalVariable {
                name: format!("{name}.enc"),
                ty: array_ty.clone(),
                is_constant: true,
                linkage: Linkage::Private,
                init: Some(Initializer::Bytes(ciphertext)),
            });
            // shield the ciphertext from dead-global elimination
            module.append_compiler_used(encrypted_id);

            for (func_id, user) in instruction_users(module, global_id) {
                let body = module
                    .function_mut(func_id)
                    .body
                    .as_mut()
                    .expect("user found in a definition");
                let mut b = Builder::before(body, user);
                let encrypted_ptr = b.gep(
                    array_ty.clone(),
                    Value::Global(encrypted_id),
                    vec![Value::i64(0), Value::i64(0)],
                    "encrypted_ptr",
                );
                let src = b.bitcast(encrypted_ptr, "encrypted_ptr_cast");
                let buffer = b.alloca(array_ty.clone(), &format!("{name}.dec.alloca"));
                let dest = b.bitcast(buffer, "decrypted_ptr_cast");
                b.call(
                    Ty::Void,
                    decrypt,
                    vec![dest.clone(), src, Value::i32(length as i64)],
                    "",
                );
                let target = Value::Global(global_id);
                for operand in body.instr_mut(user).op.operands_mut() {
                    if *operand == target {
                        *operand = dest.clone();
                        break;
                    }
                }
                changed = true;
            }

            module.erase_global(global_id);
            encrypted_count += 1;
            original_bytes += plaintext.len() as u64;
            encrypted_bytes += length as u64;
            changed = true;
        }

        with_report(|r| {
            r.strings_encrypted += encrypted_count;
            r.original_string_data_size += original_bytes;
            r.obfuscated_string_data_size += encrypted_bytes;
            r.string_method = "XOR with dynamic per-run key".to_string();
        });
        debug!(encrypted_count, "string encryption finished");

        if changed {
            Ok(Preserved::None)
        } else {
            Ok(Preserved::All)
        }
    }
}
